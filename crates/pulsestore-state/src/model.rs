//! Domain records tracked per monitored account.

use serde::{Deserialize, Serialize};

/// Identity of a monitored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub mid: i64,
    pub room_id: i64,
    pub name: String,
    pub face: String,
}

impl UserInfo {
    pub fn new(mid: i64, room_id: i64, name: impl Into<String>, face: impl Into<String>) -> Self {
        Self { mid, room_id, name: name.into(), face: face.into() }
    }
}

/// Broadcast state as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LiveStatus {
    #[default]
    Unknown,
    NotLiving,
    Living,
    /// Replaying recorded streams in the room
    Rotating,
}

impl LiveStatus {
    /// Map the platform's numeric room status.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => LiveStatus::NotLiving,
            1 => LiveStatus::Living,
            2 => LiveStatus::Rotating,
            _ => LiveStatus::Unknown,
        }
    }

    pub fn is_living(self) -> bool {
        self == LiveStatus::Living
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInfo {
    pub user: UserInfo,
    pub title: String,
    pub cover: String,
    pub status: LiveStatus,
}

impl LiveInfo {
    pub fn new(user: UserInfo, title: impl Into<String>, cover: impl Into<String>, status: LiveStatus) -> Self {
        Self { user, title: title.into(), cover: cover.into(), status }
    }

    pub fn mid(&self) -> i64 {
        self.user.mid
    }
}

/// Latest feed post seen for a user; later posts replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsInfo {
    pub user: UserInfo,
    pub dynamic_id: i64,
    pub timestamp: i64,
}

impl NewsInfo {
    pub fn new(user: UserInfo, dynamic_id: i64, timestamp: i64) -> Self {
        Self { user, dynamic_id, timestamp }
    }

    pub fn mid(&self) -> i64 {
        self.user.mid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStat {
    pub mid: i64,
    pub following: i64,
    pub follower: i64,
}

impl UserStat {
    pub fn new(mid: i64, following: i64, follower: i64) -> Self {
        Self { mid, following, follower }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Login cookies for one platform account. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CookieInfo {
    pub cookies: Vec<Cookie>,
    pub domains: Vec<String>,
}

impl CookieInfo {
    pub fn new(cookies: Vec<Cookie>, domains: Vec<String>) -> Self {
        Self { cookies, domains }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_status_codes() {
        assert_eq!(LiveStatus::from_code(0), LiveStatus::NotLiving);
        assert_eq!(LiveStatus::from_code(1), LiveStatus::Living);
        assert_eq!(LiveStatus::from_code(2), LiveStatus::Rotating);
        assert_eq!(LiveStatus::from_code(-1), LiveStatus::Unknown);
        assert!(LiveStatus::Living.is_living());
        assert!(!LiveStatus::Rotating.is_living());
    }
}
