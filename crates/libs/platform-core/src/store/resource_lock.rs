//! Per-resource serialization.
//!
//! A push to `alice/blog` and a push to `bob/notes` must not block each
//! other, but two pushes to `alice/blog` must: git write operations
//! against a single bare repository are not safe to run concurrently, and
//! the same goes for a workspace's single running container or an
//! action run's checkout. Rather than one process-wide lock, writes are
//! serialized per-resource via a keyed map of mutexes.
//!
//! Keys are typically `"repo:<slug>"`, `"workspace:<id>"`, or
//! `"action_run:<id>"`. Entries are never removed: the number of distinct
//! resources is bounded by the number of repositories/workspaces/runs
//! that have ever existed, which is small relative to request volume.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ResourceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key`, blocking until it is free. Releasing
    /// the returned guard frees the resource for the next caller; the
    /// underlying mutex itself stays in the map for reuse.
    pub async fn acquire(&self, key: &str) -> ResourceLockGuard {
        let guard = self.entry(key).lock_owned().await;
        ResourceLockGuard { _guard: guard }
    }

    /// Non-blocking check of whether `key` is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }
}

pub struct ResourceLockGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(ResourceLocks::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let locks = locks.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("repo:shared").await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let locks = Arc::new(ResourceLocks::new());
        let max_concurrent = Arc::new(AtomicU32::new(0));
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for i in 0..10 {
            let locks = locks.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&format!("repo:{i}")).await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_concurrent.load(Ordering::SeqCst) > 1);
    }
}
