//! Mutual exclusion for network-level reconciliation
//!
//! Network create/destroy and per-group resource creation run one at a
//! time within a process. Node work fans out to other processes, which
//! each hold their own guard.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, MutexGuard};

/// Process-wide lock around network reconciliation
#[derive(Debug, Default)]
pub struct NetworkGuard {
    lock: Mutex<()>,
}

impl NetworkGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock, then run `work` to completion before releasing it
    pub async fn with_lock<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        let _held = self.acquire().await;
        work.await
    }

    /// Acquire the lock; it is released when the returned guard drops
    pub async fn acquire(&self) -> NetworkLock<'_> {
        let guard = self.lock.lock().await;
        tracing::debug!("Acquired network lock");
        NetworkLock { _guard: guard }
    }

    /// Whether the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// RAII guard for the network lock
pub struct NetworkLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl Drop for NetworkLock<'_> {
    fn drop(&mut self) {
        tracing::debug!("Released network lock");
    }
}

/// The guard shared by everything in this process
pub fn process_guard() -> Arc<NetworkGuard> {
    static GUARD: OnceLock<Arc<NetworkGuard>> = OnceLock::new();
    GUARD.get_or_init(|| Arc::new(NetworkGuard::new())).clone()
}
