//! Background purge of expired idle connections.
//!
//! The pool itself owns no timer; [`IdleReaper`] is the tokio task that calls
//! [`ConnectionPool::purge_expired`] and sleeps for the delay it returns.

use crate::socket::connection::HttpConnection;
use crate::socket::pool::ConnectionPool;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns the purge loop for a pool.
pub struct IdleReaper;

impl IdleReaper {
    /// Start purging `pool` in the background.
    ///
    /// The loop sleeps until the next keep-alive deadline, or for the pool's
    /// `sweep_interval` when nothing is scheduled, and ends once the pool is
    /// stopped. Must be called from within a tokio runtime.
    pub fn spawn<C: HttpConnection>(pool: ConnectionPool<C>) -> ReaperHandle {
        let task = tokio::spawn(async move {
            let fallback = pool.config().sweep_interval.max(Duration::from_millis(1));
            tracing::debug!(pool = %pool.label(), "idle reaper started");
            while !pool.is_stopped() {
                let next = pool.purge_expired();
                let wait = if next.is_zero() { fallback } else { next };
                tokio::time::sleep(wait).await;
            }
            tracing::debug!(pool = %pool.label(), "idle reaper finished");
        });
        ReaperHandle { task }
    }
}

/// Handle to a running [`IdleReaper`].
#[derive(Debug)]
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Cancel the purge loop. Idle connections stay pooled.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end (after the pool is stopped or the loop aborted).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::warn!(error = %e, "idle reaper panicked");
            }
        }
    }
}
