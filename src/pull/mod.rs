//! # Pull Delivery
//!
//! Lock-based reliability for the pull exchange pattern. Submitted pull
//! messages wait behind per-message locks until the entitled initiator
//! claims them; scheduled passes recycle overdue claims, expire stale
//! locks and purge the expired ones.

pub mod lock;
pub mod service;

pub use lock::{InMemoryPullLockStore, LockState, PgPullLockStore, PullLock, PullLockStore};
pub use service::{PullError, PullMessageService};
