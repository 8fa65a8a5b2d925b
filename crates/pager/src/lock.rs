//! Leadership lock capability.
//!
//! The engine never implements mutual exclusion itself. It consumes a lock
//! keyed by a fixed resource name and treats the lock's answers as the only
//! truth about leadership.

use crate::error::{PagerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Exclusive leadership token shared by a fleet of watchers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeadershipLock: Send + Sync {
    /// Take the token. May block while the lock's own retry policy runs.
    /// Succeeds immediately when this holder already owns the token.
    async fn acquire(&self) -> Result<()>;

    /// Give the token back. A no-op when not held.
    async fn release(&self) -> Result<()>;

    /// Remove the underlying coordination resource.
    async fn destroy(&self) -> Result<()>;

    /// Ask whether this holder currently owns the token.
    async fn is_leader(&self) -> Result<bool>;

    /// True when this holder has no acquisition outstanding.
    async fn is_unlocked(&self) -> bool;
}

#[derive(Debug, Default)]
struct Token {
    owner: Mutex<Option<u64>>,
    next_holder: AtomicU64,
    query_fault: AtomicBool,
}

/// Process-local lock.
///
/// Every handle created with [`MemoryLock::contender`] competes for the same
/// token, which makes leader handover reproducible without a cluster. Useful
/// for single-node runs and tests; it offers no protection across processes.
#[derive(Debug, Clone)]
pub struct MemoryLock {
    token: Arc<Token>,
    holder: u64,
}

impl MemoryLock {
    pub fn new() -> Self {
        let token = Arc::new(Token::default());
        let holder = token.next_holder.fetch_add(1, Ordering::SeqCst) + 1;
        Self { token, holder }
    }

    /// Another handle on the same token, as a second watcher would have.
    pub fn contender(&self) -> Self {
        let holder = self.token.next_holder.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            token: self.token.clone(),
            holder,
        }
    }

    /// Drop ownership regardless of holder, like an expired session.
    pub async fn revoke(&self) {
        *self.token.owner.lock().await = None;
    }

    /// Make leadership queries fail until cleared.
    pub fn set_query_fault(&self, failing: bool) {
        self.token.query_fault.store(failing, Ordering::SeqCst);
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadershipLock for MemoryLock {
    async fn acquire(&self) -> Result<()> {
        let mut owner = self.token.owner.lock().await;
        match *owner {
            Some(current) if current != self.holder => Err(PagerError::lock(
                "acquire",
                format!("token held by holder {current}"),
            )),
            _ => {
                *owner = Some(self.holder);
                Ok(())
            }
        }
    }

    async fn release(&self) -> Result<()> {
        let mut owner = self.token.owner.lock().await;
        if *owner == Some(self.holder) {
            *owner = None;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let owner = self.token.owner.lock().await;
        match *owner {
            Some(current) if current != self.holder => Err(PagerError::lock(
                "destroy",
                format!("token in use by holder {current}"),
            )),
            _ => Ok(()),
        }
    }

    async fn is_leader(&self) -> Result<bool> {
        if self.token.query_fault.load(Ordering::SeqCst) {
            return Err(PagerError::lock("query", "injected query failure"));
        }
        Ok(*self.token.owner.lock().await == Some(self.holder))
    }

    async fn is_unlocked(&self) -> bool {
        *self.token.owner.lock().await != Some(self.holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_holder_lifecycle() {
        let lock = MemoryLock::new();
        assert!(lock.is_unlocked().await);
        assert!(!lock.is_leader().await.unwrap());

        lock.acquire().await.unwrap();
        assert!(lock.is_leader().await.unwrap());
        assert!(!lock.is_unlocked().await);

        // Re-acquiring an owned token is fine
        lock.acquire().await.unwrap();

        lock.release().await.unwrap();
        assert!(lock.is_unlocked().await);
        lock.release().await.unwrap();
        lock.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_contenders_exclude_each_other() {
        let first = MemoryLock::new();
        let second = first.contender();

        first.acquire().await.unwrap();
        let err = second.acquire().await.unwrap_err();
        assert!(matches!(err, PagerError::LockUnavailable { op: "acquire", .. }));
        assert!(!second.is_leader().await.unwrap());

        // Release by a non-owner must not free the token
        second.release().await.unwrap();
        assert!(first.is_leader().await.unwrap());

        assert!(second.destroy().await.is_err());

        first.release().await.unwrap();
        second.acquire().await.unwrap();
        assert!(second.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_and_query_fault() {
        let lock = MemoryLock::new();
        lock.acquire().await.unwrap();

        lock.set_query_fault(true);
        assert!(lock.is_leader().await.is_err());
        lock.set_query_fault(false);

        lock.revoke().await;
        assert!(!lock.is_leader().await.unwrap());
    }
}
