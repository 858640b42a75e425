//! Distributed mutual exclusion for cache keys.
//!
//! A [`Locker`] serialises read-modify-write cycles on a key across
//! processes. The shipped implementation, [`RedisLocker`], runs the
//! Redlock quorum algorithm over one or more Redis nodes and remembers the
//! lock it acquired for each key so the same key can be released later.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LockerConfig;

mod redlock;

#[cfg(test)]
pub(crate) use self::redlock::testing;
pub use self::redlock::{DEFAULT_RETRY_COUNT, Lock, LockNode, RedisNode, Redlock};

/// Lock lifetime used when the caller does not pick one.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Misuse of the locking API, as opposed to a backend failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockStateError {
    #[error("no locker is configured for this cache")]
    NoLocker,

    #[error("no cache key has been loaded")]
    NoKey,

    #[error("no lock is held for key `{0}`")]
    NotHeld(String),
}

/// Errors produced while acquiring or releasing locks.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not acquire lock `{resource}` after {attempts} attempts")]
    Acquisition { resource: String, attempts: u32 },

    #[error("lock node command failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error(transparent)]
    State(#[from] LockStateError),
}

/// Acquires and releases named locks.
#[async_trait]
pub trait Locker: Send + Sync + fmt::Debug {
    /// Blocks until `key` is locked for `expires_in`, or fails.
    async fn lock(&self, key: &str, expires_in: Duration) -> Result<(), LockError>;

    /// Releases the lock this locker holds on `key`.
    async fn unlock(&self, key: &str) -> Result<(), LockError>;
}

/// Redlock-backed [`Locker`].
///
/// Locks are taken on the resource `lock-<key>`.
#[derive(Debug)]
pub struct RedisLocker<N: LockNode = RedisNode> {
    manager: Redlock<N>,
    held: DashMap<String, Lock>,
}

impl<N: LockNode> RedisLocker<N> {
    pub fn new(manager: Redlock<N>) -> Self {
        Self {
            manager,
            held: DashMap::new(),
        }
    }

    /// Returns `true` if this locker currently tracks a lock on `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}

fn resource_name(key: &str) -> String {
    format!("lock-{key}")
}

#[async_trait]
impl<N: LockNode> Locker for RedisLocker<N> {
    async fn lock(&self, key: &str, expires_in: Duration) -> Result<(), LockError> {
        let lock = self.manager.lock(&resource_name(key), expires_in).await?;
        debug!(key, validity_ms = lock.validity().as_millis() as u64, "cache key locked");
        if let Some(stale) = self.held.insert(key.to_owned(), lock) {
            // The earlier holder's lock lapsed; its unlock now releases this one.
            warn!(key, stale_token = stale.token(), "replaced a lapsed lock handle");
        }
        Ok(())
    }

    async fn unlock(&self, key: &str) -> Result<(), LockError> {
        let (_, lock) = self
            .held
            .remove(key)
            .ok_or_else(|| LockStateError::NotHeld(key.to_owned()))?;
        self.manager.unlock(&lock).await?;
        debug!(key, "cache key unlocked");
        Ok(())
    }
}

/// Builds the locker described by `config`.
///
/// No connection is opened until the first lock is requested.
pub fn make_locker(config: &LockerConfig) -> Result<Arc<dyn Locker>, LockError> {
    let nodes = config
        .nodes
        .iter()
        .map(RedisNode::new)
        .collect::<Result<Vec<_>, _>>()?;
    let manager = Redlock::new(nodes).with_retry_count(config.retry_count);
    Ok(Arc::new(RedisLocker::new(manager)))
}
