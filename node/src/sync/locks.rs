use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{NodeError, Result};

/// The closed set of process-wide lock names. Acquisition never nests within
/// the same name; see the concurrency model for the (trivial) ordering DAG.
pub mod names {
    pub const GET_SOCKS5_CONFIG: &str = "get_socks5_config";
    pub const REGISTER_WIREGUARD_LEASE: &str = "register_wireguard_lease";
    pub const SCORE_ALL_KNOWN_WORKERS: &str = "score_all_known_workers";
    pub const SCORE_MINING_POOLS: &str = "score_mining_pools";
    pub const DANTE_REFRESH: &str = "dante_refresh";
}

/// Guard returned by `try_acquire`; dropping it releases the named lock.
pub struct NamedLockGuard {
    name: &'static str,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for NamedLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLockGuard").field("name", &self.name).finish()
    }
}

/// Process-wide named mutex registry. The only cross-task serialization
/// device in the node.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<&'static str, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &'static str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the named lock. The guard is released on every
    /// exit path, including panics and early `?` returns inside `f`.
    pub async fn with_lock<T, F, Fut>(
        &self,
        name: &'static str,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.slot(name);

        let _guard = match timeout {
            None => slot.lock_owned().await,
            Some(budget) => tokio::time::timeout(budget, slot.lock_owned())
                .await
                .map_err(|_| NodeError::LockTimeout {
                    name: name.to_string(),
                    timeout: budget,
                })?,
        };

        f().await
    }

    /// Non-blocking acquisition. `None` means "already running, skip".
    ///
    /// Tolerated race: two callers can observe the lock as free and both
    /// reach the try-lock; exactly one wins, the other gets `None`.
    pub fn try_acquire(&self, name: &'static str) -> Option<NamedLockGuard> {
        let slot = self.slot(name);

        slot.try_lock_owned()
            .ok()
            .map(|guard| NamedLockGuard { name, _guard: guard })
    }

    pub fn is_locked(&self, name: &'static str) -> bool {
        let slot = self.slot(name);
        let result = match slot.try_lock() {
            Ok(_guard) => false,
            Err(_) => true,
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn with_lock_serializes_critical_sections() {
        let registry = Arc::new(LockRegistry::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .with_lock(names::GET_SOCKS5_CONFIG, None, || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_lock_times_out() {
        let registry = LockRegistry::new();
        let held = registry.try_acquire(names::SCORE_MINING_POOLS).unwrap();

        let result = registry
            .with_lock(
                names::SCORE_MINING_POOLS,
                Some(Duration::from_millis(20)),
                || async { Ok(()) },
            )
            .await;

        assert!(matches!(result, Err(NodeError::LockTimeout { .. })));
        drop(held);
    }

    #[tokio::test]
    async fn try_acquire_skips_when_held() {
        let registry = LockRegistry::new();

        let first = registry.try_acquire(names::SCORE_ALL_KNOWN_WORKERS);
        assert!(first.is_some());
        assert!(registry.is_locked(names::SCORE_ALL_KNOWN_WORKERS));

        let second = registry.try_acquire(names::SCORE_ALL_KNOWN_WORKERS);
        assert!(second.is_none());

        drop(first);
        assert!(!registry.is_locked(names::SCORE_ALL_KNOWN_WORKERS));
        assert!(registry.try_acquire(names::SCORE_ALL_KNOWN_WORKERS).is_some());
    }

    #[tokio::test]
    async fn lock_released_when_closure_errors() {
        let registry = LockRegistry::new();

        let result: Result<()> = registry
            .with_lock(names::REGISTER_WIREGUARD_LEASE, None, || async {
                Err(NodeError::internal("boom"))
            })
            .await;
        assert!(result.is_err());

        assert!(!registry.is_locked(names::REGISTER_WIREGUARD_LEASE));
    }
}
