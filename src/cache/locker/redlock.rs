//! Quorum lock manager implementing the Redlock algorithm.
//!
//! A lock is held when a majority of independent nodes accepted the same
//! random token within the lock's TTL, minus an allowance for clock drift.
//! Failed attempts release whatever was acquired and retry after a random
//! delay, up to a bounded number of attempts.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::LockError;
use crate::config::RedisConfig;

/// Attempts made before giving up when no retry count is configured.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

const CLOCK_DRIFT_FACTOR: f64 = 0.01;
const CLOCK_DRIFT_FLOOR: Duration = Duration::from_millis(2);
const DEFAULT_RETRY_DELAY_MIN: Duration = Duration::from_millis(100);
const DEFAULT_RETRY_DELAY_MAX: Duration = Duration::from_millis(300);

// Deletes the key only while it still carries our token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// One independent node taking part in the lock quorum.
#[async_trait]
pub trait LockNode: Send + Sync + fmt::Debug {
    /// Sets `resource` to `token` with `ttl` if it is not already set.
    ///
    /// Returns `false` when another holder owns the resource.
    async fn acquire(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Deletes `resource` if it still holds `token`.
    async fn release(&self, resource: &str, token: &str) -> Result<bool, LockError>;
}

#[async_trait]
impl<N: LockNode + ?Sized> LockNode for Arc<N> {
    async fn acquire(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        (**self).acquire(resource, token, ttl).await
    }

    async fn release(&self, resource: &str, token: &str) -> Result<bool, LockError> {
        (**self).release(resource, token).await
    }
}

/// A Redis server acting as a lock node.
///
/// The connection is opened on first use and re-established automatically.
pub struct RedisNode {
    client: ::redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl fmt::Debug for RedisNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisNode")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisNode {
    /// # Errors
    ///
    /// [`LockError::Redis`] if the connection parameters are rejected.
    pub fn new(config: &RedisConfig) -> Result<Self, LockError> {
        Ok(Self {
            client: ::redis::Client::open(config.connection_info())?,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, LockError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl LockNode for RedisNode {
    async fn acquire(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(resource)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, resource: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let removed: i64 = ::redis::Script::new(UNLOCK_SCRIPT)
            .key(resource)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}

/// Handle for a lock held on a quorum of nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    resource: String,
    token: String,
    validity: Duration,
}

impl Lock {
    /// Name of the locked resource.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Random value proving ownership on each node.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Time the lock was guaranteed valid for when it was acquired.
    pub fn validity(&self) -> Duration {
        self.validity
    }
}

/// Redlock manager over a set of nodes.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use hitgate::cache::locker::{Redlock, RedisNode};
/// use hitgate::config::RedisConfig;
///
/// # async fn example() -> Result<(), hitgate::cache::locker::LockError> {
/// let node = RedisNode::new(&RedisConfig {
///     host: "127.0.0.1".into(),
///     port: 6379,
///     db: 0,
///     password: None,
/// })?;
/// let manager = Redlock::new(vec![node]).with_retry_count(5);
///
/// let lock = manager.lock("lock-report", Duration::from_secs(10)).await?;
/// manager.unlock(&lock).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Redlock<N = RedisNode> {
    nodes: Vec<N>,
    retry_count: u32,
    retry_delay_min: Duration,
    retry_delay_max: Duration,
}

impl<N: LockNode> Redlock<N> {
    pub fn new(nodes: Vec<N>) -> Self {
        Self {
            nodes,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_min: DEFAULT_RETRY_DELAY_MIN,
            retry_delay_max: DEFAULT_RETRY_DELAY_MAX,
        }
    }

    /// Sets the number of acquisition attempts (at least one is always made).
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the bounds of the random delay between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.retry_delay_min = min.min(max);
        self.retry_delay_max = max.max(min);
        self
    }

    /// Number of nodes that must agree for a lock to be held.
    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    /// Acquires `resource` for `ttl`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Acquisition`] when no attempt reached a quorum in time.
    /// - The last node error when no node answered at all.
    pub async fn lock(&self, resource: &str, ttl: Duration) -> Result<Lock, LockError> {
        let attempts = self.retry_count.max(1);
        let quorum = self.quorum();
        let drift = ttl.mul_f64(CLOCK_DRIFT_FACTOR) + CLOCK_DRIFT_FLOOR;
        let mut answered = false;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let token = Uuid::new_v4().to_string();
            let started = Instant::now();
            let mut votes = 0;

            for node in &self.nodes {
                match node.acquire(resource, &token, ttl).await {
                    Ok(acquired) => {
                        answered = true;
                        if acquired {
                            votes += 1;
                        }
                    }
                    Err(e) => {
                        warn!(resource, node = ?node, error = %e, "lock node failed");
                        last_error = Some(e);
                    }
                }
            }

            let validity = ttl
                .checked_sub(started.elapsed() + drift)
                .filter(|v| !v.is_zero());
            if let (true, Some(validity)) = (votes >= quorum, validity) {
                info!(resource, attempt, votes, "lock acquired");
                return Ok(Lock {
                    resource: resource.to_owned(),
                    token,
                    validity,
                });
            }

            self.release_all(resource, &token).await;

            if attempt < attempts {
                let delay = self.retry_delay();
                warn!(resource, attempt, votes, quorum, ?delay, "lock attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Err(LockError::Acquisition {
                resource: resource.to_owned(),
                attempts,
            }),
        }
    }

    /// Releases `lock` on every node.
    ///
    /// # Errors
    ///
    /// The last node error when no node could be reached.
    pub async fn unlock(&self, lock: &Lock) -> Result<(), LockError> {
        let mut reached = false;
        let mut last_error = None;

        for node in &self.nodes {
            match node.release(&lock.resource, &lock.token).await {
                Ok(_) => reached = true,
                Err(e) => {
                    warn!(resource = %lock.resource, node = ?node, error = %e, "lock release failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !reached => Err(e),
            _ => {
                info!(resource = %lock.resource, "lock released");
                Ok(())
            }
        }
    }

    async fn release_all(&self, resource: &str, token: &str) {
        for node in &self.nodes {
            if let Err(e) = node.release(resource, token).await {
                debug!(resource, error = %e, "cleanup release failed");
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        let min = self.retry_delay_min.as_millis() as u64;
        let max = self.retry_delay_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryNode;
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    fn nodes(n: usize) -> Vec<Arc<MemoryNode>> {
        (0..n).map(|_| Arc::new(MemoryNode::default())).collect()
    }

    fn manager(nodes: &[Arc<MemoryNode>]) -> Redlock<Arc<MemoryNode>> {
        Redlock::new(nodes.to_vec())
            .with_retry_count(2)
            .with_retry_delay(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(manager(&nodes(1)).quorum(), 1);
        assert_eq!(manager(&nodes(2)).quorum(), 2);
        assert_eq!(manager(&nodes(3)).quorum(), 2);
        assert_eq!(manager(&nodes(5)).quorum(), 3);
    }

    #[tokio::test]
    async fn lock_and_unlock_on_every_node() {
        let nodes = nodes(3);
        let redlock = manager(&nodes);

        let lock = redlock.lock("lock-k", TTL).await.unwrap();
        assert_eq!(lock.resource(), "lock-k");
        assert!(lock.validity() <= TTL);
        for node in &nodes {
            assert_eq!(node.holder("lock-k").as_deref(), Some(lock.token()));
        }

        redlock.unlock(&lock).await.unwrap();
        for node in &nodes {
            assert_eq!(node.holder("lock-k"), None);
        }
    }

    #[tokio::test]
    async fn contended_lock_fails_after_retries() {
        let nodes = nodes(3);
        let first = manager(&nodes);
        let second = manager(&nodes);

        let _held = first.lock("lock-k", TTL).await.unwrap();
        let err = second.lock("lock-k", TTL).await.unwrap_err();
        assert!(matches!(
            err,
            LockError::Acquisition { ref resource, attempts: 2 } if resource == "lock-k"
        ));
    }

    #[tokio::test]
    async fn minority_outage_still_reaches_quorum() {
        let nodes = nodes(3);
        nodes[0].set_down(true);

        let lock = manager(&nodes).lock("lock-k", TTL).await.unwrap();
        assert_eq!(nodes[1].holder("lock-k").as_deref(), Some(lock.token()));
    }

    #[tokio::test]
    async fn majority_outage_fails_and_cleans_up() {
        let nodes = nodes(3);
        nodes[0].set_down(true);
        nodes[1].set_down(true);

        let err = manager(&nodes).lock("lock-k", TTL).await.unwrap_err();
        assert!(matches!(err, LockError::Acquisition { .. }));
        assert_eq!(nodes[2].holder("lock-k"), None);
    }

    #[tokio::test]
    async fn total_outage_surfaces_node_error() {
        let nodes = nodes(2);
        for node in &nodes {
            node.set_down(true);
        }

        let err = manager(&nodes).lock("lock-k", TTL).await.unwrap_err();
        assert!(matches!(err, LockError::Redis(_)));
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over() {
        let nodes = nodes(1);
        let redlock = manager(&nodes);

        let first = redlock
            .lock("lock-k", Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let second = redlock.lock("lock-k", TTL).await.unwrap();
        assert_ne!(first.token(), second.token());
    }

    #[tokio::test]
    async fn ttl_shorter_than_drift_never_acquires() {
        let nodes = nodes(1);
        let err = manager(&nodes)
            .lock("lock-k", Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Acquisition { .. }));
    }
}
