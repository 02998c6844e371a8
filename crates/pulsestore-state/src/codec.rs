//! Value encoding for stored entities.
//!
//! Values are postcard-encoded. Live and news records are stored as a
//! reference to their user plus their own fields, and re-joined with the
//! stored [`UserInfo`] on read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};
use crate::model::{CookieInfo, LiveInfo, LiveStatus, NewsInfo, UserInfo, UserStat};

/// A type stored as a value. `NAME` is used in errors and logs.
pub trait Entity: Serialize + DeserializeOwned {
    const NAME: &'static str;
}

/// Encodes an entity to its stored bytes.
///
/// # Errors
///
/// Returns `StateError::Encode` if serialization fails.
pub fn encode<T: Entity>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|source| StateError::Encode { entity: T::NAME, source })
}

/// Decodes stored bytes. A failure here means corruption, never absence.
///
/// # Errors
///
/// Returns `StateError::Decode` if deserialization fails.
pub fn decode<T: Entity>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|source| StateError::Decode { entity: T::NAME, source })
}

impl Entity for UserInfo {
    const NAME: &'static str = "user info";
}

impl Entity for UserStat {
    const NAME: &'static str = "user stat";
}

impl Entity for CookieInfo {
    const NAME: &'static str = "cookie info";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredLive {
    pub(crate) mid: i64,
    pub(crate) title: String,
    pub(crate) cover: String,
    pub(crate) status: LiveStatus,
}

impl StoredLive {
    pub(crate) fn from_info(info: &LiveInfo) -> Self {
        Self {
            mid: info.mid(),
            title: info.title.clone(),
            cover: info.cover.clone(),
            status: info.status,
        }
    }

    pub(crate) fn join(self, user: UserInfo) -> LiveInfo {
        LiveInfo { user, title: self.title, cover: self.cover, status: self.status }
    }
}

impl Entity for StoredLive {
    const NAME: &'static str = "live info";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredNews {
    pub(crate) mid: i64,
    pub(crate) dynamic_id: i64,
    pub(crate) timestamp: i64,
}

impl StoredNews {
    pub(crate) fn from_info(info: &NewsInfo) -> Self {
        Self { mid: info.mid(), dynamic_id: info.dynamic_id, timestamp: info.timestamp }
    }

    pub(crate) fn join(self, user: UserInfo) -> NewsInfo {
        NewsInfo { user, dynamic_id: self.dynamic_id, timestamp: self.timestamp }
    }
}

impl Entity for StoredNews {
    const NAME: &'static str = "news info";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FirstTimestamp(pub(crate) i64);

impl Entity for FirstTimestamp {
    const NAME: &'static str = "uid first timestamp";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NotLiveCount(pub(crate) u64);

impl Entity for NotLiveCount {
    const NAME: &'static str = "not live count";
}

/// Presence-only value for dedup markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Marker;

impl Entity for Marker {
    const NAME: &'static str = "marker";
}
