//! Idle-connection cleanup trigger.
//!
//! While a connection sits in the pool nobody should be reading from it, and
//! the server has nothing legitimate to send. A [`CleanupTrigger`] subscribes
//! to the connection's flow when it is released; any error, end of stream or
//! data means the connection is no longer reusable, so the trigger takes it
//! out of the pool and closes it.
//!
//! The trigger fires at most once. It is simply abandoned (and dropped by the
//! flow) when the connection is acquired again before anything happens.

use crate::base::neterror::NetError;
use crate::socket::connection::HttpConnection;
use crate::socket::flow::{FlowListener, FlowSubscription};
use crate::socket::pool::PoolInner;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct CleanupTrigger<C: HttpConnection> {
    connection: Weak<C>,
    pool: Weak<PoolInner<C>>,
    label: String,
    done: AtomicBool,
    dropped: AtomicBool,
}

impl<C: HttpConnection> CleanupTrigger<C> {
    pub(crate) fn new(connection: &Arc<C>, pool: Weak<PoolInner<C>>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            pool,
            label: connection.label(),
            done: AtomicBool::new(false),
            dropped: AtomicBool::new(false),
        }
    }

    /// Whether the trigger has fired.
    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn trigger_cleanup(&self, pending_data: usize, error: Option<NetError>) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(
            trigger = %self,
            pending_data,
            error = ?error,
            "cleanup triggered"
        );

        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.cleanup(&connection, pending_data, error),
            None => {
                // Pool is gone; nobody else will close it.
                if let Err(e) = connection.close(error) {
                    tracing::trace!(trigger = %self, error = %e, "close failed");
                }
            }
        }
    }
}

impl<C: HttpConnection> FlowListener for CleanupTrigger<C> {
    fn on_subscribe(&self, subscription: &dyn FlowSubscription) {
        if self.dropped.load(Ordering::Acquire) || self.is_done() {
            subscription.cancel();
            return;
        }
        subscription.request(1);
    }

    fn on_data(&self, data: &[Bytes]) {
        let pending: usize = data.iter().map(Bytes::len).sum();
        self.trigger_cleanup(pending, Some(NetError::DataReceivedUnexpectedly));
    }

    fn on_error(&self, error: NetError) {
        self.trigger_cleanup(0, Some(error));
    }

    fn on_complete(&self) {
        self.trigger_cleanup(0, None);
    }

    fn on_drop(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

impl<C: HttpConnection> fmt::Display for CleanupTrigger<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CleanupTrigger({})", self.label)
    }
}
