//! Per-user monitoring state over PulseStore
//!
//! Tracks identity, live status, the latest feed post, follower stats,
//! login cookies and idempotent "already processed" markers for monitored
//! accounts.
//!
//! # Architecture
//!
//! - [`keys`]: typed, collision-free keys, one variant per stored kind
//! - [`codec`] / [`model`]: postcard-encoded entities
//! - [`store`]: `view` / `update` transactions over a shared engine handle
//! - [`indexes`]: prefix index declarations, idempotent at startup
//! - [`manager`]: entity-level operations, each in one transaction
//!
//! ```no_run
//! use pulsestore_state::{StateManager, Store, UserInfo};
//! use pulsestore_core::Config;
//!
//! let store = Store::open("/var/lib/monitor", Config::default())?;
//! let manager = StateManager::new(store);
//! manager.fresh_index(&[10001])?;
//! manager.start()?;
//! manager.add_user_info(Some(&UserInfo::new(1, 100, "A", "")))?;
//! # Ok::<(), pulsestore_state::StateError>(())
//! ```

pub mod codec;
pub mod error;
pub mod indexes;
pub mod keys;
pub mod manager;
pub mod model;
pub mod store;

pub use error::{Result, StateError};
pub use indexes::{IndexManager, IndexPurpose, IndexSpec};
pub use keys::{KeySpace, StateKey};
pub use manager::StateManager;
pub use model::{Cookie, CookieInfo, LiveInfo, LiveStatus, NewsInfo, UserInfo, UserStat};
pub use store::{StateRead, StateWrite, Store};
