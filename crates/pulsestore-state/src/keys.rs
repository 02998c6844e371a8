//! Key encoding for stored state.
//!
//! Every key is a one-byte [`KeySpace`] tag followed by the entity's
//! identifier parts. Parts are self-delimiting, so no two distinct keys
//! share an encoding and a part boundary can never be forged by content:
//!
//! - integer: `0x10` + big-endian `i64` with the sign bit flipped
//! - string:  `0x20` + bytes, `0x00` escaped as `0x00 0xFF`, then `0x00`
//!
//! Both forms sort in the same order as their values, so a prefix made of
//! whole parts selects exactly the keys that start with those parts.
//!
//! Tag values are part of the persisted schema. Do not renumber them.

const INT_PART: u8 = 0x10;
const STR_PART: u8 = 0x20;
const ESCAPE: u8 = 0xFF;

/// Entity namespace, one per stored kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum KeySpace {
    UserInfo = 0x01,
    LiveInfo = 0x02,
    NewsInfo = 0x03,
    UserStat = 0x04,
    CookieInfo = 0x05,
    DynamicMark = 0x06,
    NotLiveCount = 0x07,
    UidFirstTimestamp = 0x08,
    GroupVideoOriginMark = 0x09,
}

impl KeySpace {
    pub const ALL: [KeySpace; 9] = [
        KeySpace::UserInfo,
        KeySpace::LiveInfo,
        KeySpace::NewsInfo,
        KeySpace::UserStat,
        KeySpace::CookieInfo,
        KeySpace::DynamicMark,
        KeySpace::NotLiveCount,
        KeySpace::UidFirstTimestamp,
        KeySpace::GroupVideoOriginMark,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            KeySpace::UserInfo => "user_info",
            KeySpace::LiveInfo => "live_info",
            KeySpace::NewsInfo => "news_info",
            KeySpace::UserStat => "user_stat",
            KeySpace::CookieInfo => "cookie_info",
            KeySpace::DynamicMark => "dynamic_mark",
            KeySpace::NotLiveCount => "not_live_count",
            KeySpace::UidFirstTimestamp => "uid_first_timestamp",
            KeySpace::GroupVideoOriginMark => "group_video_origin_mark",
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|space| space.tag() == tag)
    }

    /// Prefix covering every key of this kind.
    pub fn prefix(self) -> Vec<u8> {
        vec![self.tag()]
    }
}

/// Typed key, one variant per stored kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateKey {
    UserInfo { mid: i64 },
    LiveInfo { mid: i64 },
    NewsInfo { mid: i64 },
    UserStat { mid: i64 },
    CookieInfo { account: String },
    DynamicMark { dynamic_id: i64 },
    NotLiveCount { mid: i64 },
    UidFirstTimestamp { mid: i64 },
    GroupVideoOriginMark { group: i64, video_id: String },
}

impl StateKey {
    pub fn space(&self) -> KeySpace {
        match self {
            StateKey::UserInfo { .. } => KeySpace::UserInfo,
            StateKey::LiveInfo { .. } => KeySpace::LiveInfo,
            StateKey::NewsInfo { .. } => KeySpace::NewsInfo,
            StateKey::UserStat { .. } => KeySpace::UserStat,
            StateKey::CookieInfo { .. } => KeySpace::CookieInfo,
            StateKey::DynamicMark { .. } => KeySpace::DynamicMark,
            StateKey::NotLiveCount { .. } => KeySpace::NotLiveCount,
            StateKey::UidFirstTimestamp { .. } => KeySpace::UidFirstTimestamp,
            StateKey::GroupVideoOriginMark { .. } => KeySpace::GroupVideoOriginMark,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.space().tag()];
        match self {
            StateKey::UserInfo { mid }
            | StateKey::LiveInfo { mid }
            | StateKey::NewsInfo { mid }
            | StateKey::UserStat { mid }
            | StateKey::NotLiveCount { mid }
            | StateKey::UidFirstTimestamp { mid } => push_int(&mut out, *mid),
            StateKey::DynamicMark { dynamic_id } => push_int(&mut out, *dynamic_id),
            StateKey::CookieInfo { account } => push_str(&mut out, account),
            StateKey::GroupVideoOriginMark { group, video_id } => {
                push_int(&mut out, *group);
                push_str(&mut out, video_id);
            }
        }
        out
    }

    /// Parse an encoded key. `None` unless `bytes` is exactly one key.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        let mut parts = Parts { rest };
        let key = match KeySpace::from_tag(tag)? {
            KeySpace::UserInfo => StateKey::UserInfo { mid: parts.int()? },
            KeySpace::LiveInfo => StateKey::LiveInfo { mid: parts.int()? },
            KeySpace::NewsInfo => StateKey::NewsInfo { mid: parts.int()? },
            KeySpace::UserStat => StateKey::UserStat { mid: parts.int()? },
            KeySpace::CookieInfo => StateKey::CookieInfo { account: parts.string()? },
            KeySpace::DynamicMark => StateKey::DynamicMark { dynamic_id: parts.int()? },
            KeySpace::NotLiveCount => StateKey::NotLiveCount { mid: parts.int()? },
            KeySpace::UidFirstTimestamp => StateKey::UidFirstTimestamp { mid: parts.int()? },
            KeySpace::GroupVideoOriginMark => StateKey::GroupVideoOriginMark {
                group: parts.int()?,
                video_id: parts.string()?,
            },
        };
        parts.rest.is_empty().then_some(key)
    }
}

/// Prefix of every video origin mark in `group`.
pub fn group_scope_prefix(group: i64) -> Vec<u8> {
    let mut out = KeySpace::GroupVideoOriginMark.prefix();
    push_int(&mut out, group);
    out
}

fn push_int(out: &mut Vec<u8>, value: i64) {
    out.push(INT_PART);
    out.extend_from_slice(&((value as u64) ^ (1 << 63)).to_be_bytes());
}

fn push_str(out: &mut Vec<u8>, value: &str) {
    out.push(STR_PART);
    for &b in value.as_bytes() {
        out.push(b);
        if b == 0 {
            out.push(ESCAPE);
        }
    }
    out.push(0);
}

struct Parts<'a> {
    rest: &'a [u8],
}

impl Parts<'_> {
    fn int(&mut self) -> Option<i64> {
        let (&kind, rest) = self.rest.split_first()?;
        if kind != INT_PART || rest.len() < 8 {
            return None;
        }
        let (raw, rest) = rest.split_at(8);
        self.rest = rest;
        let raw: [u8; 8] = raw.try_into().ok()?;
        Some((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
    }

    fn string(&mut self) -> Option<String> {
        let (&kind, mut rest) = self.rest.split_first()?;
        if kind != STR_PART {
            return None;
        }
        let mut out = Vec::new();
        loop {
            let (&b, tail) = rest.split_first()?;
            rest = tail;
            if b != 0 {
                out.push(b);
                continue;
            }
            match rest.split_first() {
                Some((&ESCAPE, tail)) => {
                    out.push(0);
                    rest = tail;
                }
                _ => break,
            }
        }
        self.rest = rest;
        String::from_utf8(out).ok()
    }
}
