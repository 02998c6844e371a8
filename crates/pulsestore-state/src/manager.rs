//! Entity-level state operations.
//!
//! Every operation that reads and then conditionally writes runs inside a
//! single [`Store::update`], which is what keeps two callers from both
//! seeing "absent" and writing twice.

use std::time::Duration;

use tracing::debug;

use crate::codec::{decode, FirstTimestamp, Marker, NotLiveCount, StoredLive, StoredNews};
use crate::error::{Result, StateError};
use crate::indexes::{IndexManager, IndexSpec};
use crate::keys::{KeySpace, StateKey};
use crate::model::{CookieInfo, LiveInfo, NewsInfo, UserInfo, UserStat};
use crate::store::{StateRead, StateWrite, Store};

#[derive(Debug, Clone)]
pub struct StateManager {
    store: Store,
}

impl StateManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Declare every index this manager uses. Safe to call on each startup.
    pub fn fresh_index(&self, groups: &[i64]) -> Result<()> {
        IndexManager::plan(groups).declare_all(&self.store)?;
        Ok(())
    }

    /// Check that the store is usable.
    pub fn start(&self) -> Result<()> {
        self.store.ping()
    }

    pub fn add_user_info(&self, user: Option<&UserInfo>) -> Result<()> {
        let user = user.ok_or(StateError::MissingPayload("user info"))?;
        self.store
            .update(|tx| tx.save(&StateKey::UserInfo { mid: user.mid }, user, None))?;
        debug!(mid = user.mid, "user info saved");
        Ok(())
    }

    pub fn get_user_info(&self, mid: i64) -> Result<UserInfo> {
        self.store.view(|tx| tx.load(&StateKey::UserInfo { mid }))
    }

    /// Store the live state and (re)write its user in the same transaction.
    pub fn add_live_info(&self, live: Option<&LiveInfo>) -> Result<()> {
        let live = live.ok_or(StateError::MissingPayload("live info"))?;
        let mid = live.mid();
        self.store.update(|tx| {
            tx.save(&StateKey::UserInfo { mid }, &live.user, None)?;
            tx.save(&StateKey::LiveInfo { mid }, &StoredLive::from_info(live), None)
        })?;
        debug!(mid, status = ?live.status, "live info saved");
        Ok(())
    }

    pub fn get_live_info(&self, mid: i64) -> Result<LiveInfo> {
        self.store.view(|tx| {
            let stored: StoredLive = tx.load(&StateKey::LiveInfo { mid })?;
            Ok(stored.join(referenced_user(tx, mid)?))
        })
    }

    /// Remove the live state only; the user stays.
    pub fn delete_live_info(&self, mid: i64) -> Result<()> {
        self.store.update(|tx| {
            if tx.remove(&StateKey::LiveInfo { mid }) {
                Ok(())
            } else {
                Err(StateError::not_found("live info"))
            }
        })?;
        debug!(mid, "live info deleted");
        Ok(())
    }

    /// Store the latest post and (re)write its user in the same transaction.
    pub fn add_news_info(&self, news: Option<&NewsInfo>) -> Result<()> {
        let news = news.ok_or(StateError::MissingPayload("news info"))?;
        let mid = news.mid();
        self.store.update(|tx| {
            tx.save(&StateKey::UserInfo { mid }, &news.user, None)?;
            tx.save(&StateKey::NewsInfo { mid }, &StoredNews::from_info(news), None)
        })?;
        debug!(mid, dynamic_id = news.dynamic_id, "news info saved");
        Ok(())
    }

    pub fn get_news_info(&self, mid: i64) -> Result<NewsInfo> {
        self.store.view(|tx| {
            let stored: StoredNews = tx.load(&StateKey::NewsInfo { mid })?;
            Ok(stored.join(referenced_user(tx, mid)?))
        })
    }

    pub fn delete_news_info(&self, mid: i64) -> Result<()> {
        self.store.update(|tx| {
            if tx.remove(&StateKey::NewsInfo { mid }) {
                Ok(())
            } else {
                Err(StateError::not_found("news info"))
            }
        })?;
        debug!(mid, "news info deleted");
        Ok(())
    }

    /// Remove both news and live state atomically. The user stays.
    pub fn delete_news_and_live_info(&self, mid: i64) -> Result<()> {
        self.store.update(|tx| {
            tx.remove(&StateKey::NewsInfo { mid });
            tx.remove(&StateKey::LiveInfo { mid });
            Ok(())
        })?;
        debug!(mid, "news and live info deleted");
        Ok(())
    }

    /// Reset everything recorded for `mid` in one transaction.
    pub fn clear_by_mid(&self, mid: i64) -> Result<()> {
        let removed = self.store.update(|tx| {
            let keys = [
                StateKey::UserInfo { mid },
                StateKey::LiveInfo { mid },
                StateKey::NewsInfo { mid },
                StateKey::UidFirstTimestamp { mid },
                StateKey::NotLiveCount { mid },
            ];
            Ok(keys.iter().filter(|key| tx.remove(key)).count())
        })?;
        debug!(mid, removed, "per-user state cleared");
        Ok(())
    }

    /// `true` if `dynamic_id` has never been marked.
    pub fn check_dynamic_id(&self, dynamic_id: i64) -> Result<bool> {
        self.store.view(|tx| Ok(!tx.exists(&StateKey::DynamicMark { dynamic_id })))
    }

    /// Mark `dynamic_id` as processed. Returns `true` if it already was.
    pub fn mark_dynamic_id(&self, dynamic_id: i64) -> Result<bool> {
        let replaced = self
            .store
            .update(|tx| tx.save(&StateKey::DynamicMark { dynamic_id }, &Marker, None))?;
        debug!(dynamic_id, replaced, "dynamic id marked");
        Ok(replaced)
    }

    /// Increment and return the consecutive not-live count for `mid`.
    pub fn inc_not_live_count(&self, mid: i64) -> Result<u64> {
        let count = self.store.update(|tx| {
            let key = StateKey::NotLiveCount { mid };
            let current = match tx.load::<NotLiveCount>(&key) {
                Ok(NotLiveCount(n)) => n,
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            };
            let next = current.saturating_add(1);
            tx.save(&key, &NotLiveCount(next), None)?;
            Ok(next)
        })?;
        debug!(mid, count, "not live count incremented");
        Ok(count)
    }

    /// Drop the counter so the next increment returns 1.
    pub fn clear_not_live_count(&self, mid: i64) -> Result<()> {
        self.store.update(|tx| {
            tx.remove(&StateKey::NotLiveCount { mid });
            Ok(())
        })
    }

    pub fn get_uid_first_timestamp(&self, mid: i64) -> Result<i64> {
        self.store
            .view(|tx| tx.load::<FirstTimestamp>(&StateKey::UidFirstTimestamp { mid }))
            .map(|FirstTimestamp(ts)| ts)
    }

    /// Record `timestamp` unless one is already stored for `mid`.
    pub fn set_uid_first_timestamp_if_not_exist(&self, mid: i64, timestamp: i64) -> Result<()> {
        let written = self.store.update(|tx| {
            let key = StateKey::UidFirstTimestamp { mid };
            if tx.exists(&key) {
                return Ok(false);
            }
            tx.save(&key, &FirstTimestamp(timestamp), None)?;
            Ok(true)
        })?;
        debug!(mid, timestamp, written, "uid first timestamp set if absent");
        Ok(())
    }

    pub fn unset_uid_first_timestamp(&self, mid: i64) -> Result<()> {
        self.store.update(|tx| {
            tx.remove(&StateKey::UidFirstTimestamp { mid });
            Ok(())
        })
    }

    pub fn get_user_stat(&self, mid: i64) -> Result<UserStat> {
        self.store.view(|tx| tx.load(&StateKey::UserStat { mid }))
    }

    /// Cache a stat snapshot. `ttl` of `None` keeps it until replaced.
    pub fn add_user_stat(&self, stat: Option<&UserStat>, ttl: Option<Duration>) -> Result<()> {
        let stat = stat.ok_or(StateError::MissingPayload("user stat"))?;
        self.store
            .update(|tx| tx.save(&StateKey::UserStat { mid: stat.mid }, stat, ttl))?;
        debug!(mid = stat.mid, ttl_ms = ttl.map(|t| t.as_millis() as u64), "user stat saved");
        Ok(())
    }

    pub fn get_cookie_info(&self, account: &str) -> Result<CookieInfo> {
        self.store
            .view(|tx| tx.load(&StateKey::CookieInfo { account: account.to_string() }))
    }

    pub fn set_cookie_info(&self, account: &str, info: Option<&CookieInfo>) -> Result<()> {
        let info = info.ok_or(StateError::MissingPayload("cookie info"))?;
        self.store
            .update(|tx| tx.save(&StateKey::CookieInfo { account: account.to_string() }, info, None))?;
        debug!(account, cookies = info.cookies.len(), "cookie info saved");
        Ok(())
    }

    /// Mark `video_id` as seen in `group`.
    ///
    /// Unlike [`mark_dynamic_id`](Self::mark_dynamic_id), an existing mark is
    /// an error ([`StateError::MarkExists`]) rather than a flag.
    pub fn set_group_video_origin_mark_if_not_exist(&self, group: i64, video_id: &str) -> Result<()> {
        self.store.update(|tx| {
            let key = StateKey::GroupVideoOriginMark { group, video_id: video_id.to_string() };
            if tx.exists(&key) {
                return Err(StateError::MarkExists { group, video_id: video_id.to_string() });
            }
            tx.save(&key, &Marker, None)?;
            Ok(())
        })?;
        debug!(group, video_id, "video origin mark set");
        Ok(())
    }

    /// Delete every video origin mark of `group`. Returns how many were removed.
    pub fn clear_group_video_origin_marks(&self, group: i64) -> Result<usize> {
        let spec = IndexSpec::for_group_marks(group);
        let removed = self.store.update(|tx| {
            let keys = tx.enumerate(&spec)?;
            Ok(keys.iter().filter(|key| tx.delete(key)).count())
        })?;
        debug!(group, removed, "video origin marks cleared");
        Ok(removed)
    }

    /// Every stored user, in mid order.
    pub fn list_user_infos(&self) -> Result<Vec<UserInfo>> {
        let spec = IndexSpec::for_space(KeySpace::UserInfo);
        self.store.view(|tx| {
            tx.enumerate(&spec)?
                .iter()
                .filter_map(|key| tx.raw_get(key))
                .map(|bytes| decode(&bytes))
                .collect()
        })
    }

    /// Every stored live state, joined with its user, in mid order.
    pub fn list_live_infos(&self) -> Result<Vec<LiveInfo>> {
        let spec = IndexSpec::for_space(KeySpace::LiveInfo);
        self.store.view(|tx| {
            let mut lives = Vec::new();
            for key in tx.enumerate(&spec)? {
                let Some(bytes) = tx.raw_get(&key) else { continue };
                let stored: StoredLive = decode(&bytes)?;
                let user = referenced_user(tx, stored.mid)?;
                lives.push(stored.join(user));
            }
            Ok(lives)
        })
    }
}

/// The user a live or news record points at. Absence is corruption here.
fn referenced_user(tx: &impl StateRead, mid: i64) -> Result<UserInfo> {
    tx.load(&StateKey::UserInfo { mid }).map_err(|e| {
        if e.is_not_found() {
            StateError::MissingUser { mid }
        } else {
            e
        }
    })
}
