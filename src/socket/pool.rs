use crate::base::neterror::NetError;
use crate::base::timeline::{Deadline, MonotonicClock, TimeLine};
use crate::socket::config::PoolConfig;
use crate::socket::connection::HttpConnection;
use crate::socket::expiry::{ExpiryList, PurgeHint};
use crate::socket::key::{CacheKey, Endpoint};
use crate::socket::trigger::CleanupTrigger;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Bucket<C> = HashMap<CacheKey, VecDeque<Arc<C>>>;

/// Everything guarded by the pool lock.
struct PoolState<C> {
    plain: Bucket<C>,
    secure: Bucket<C>,
    expiry: ExpiryList<C>,
}

impl<C: HttpConnection> PoolState<C> {
    fn bucket_mut(&mut self, secure: bool) -> &mut Bucket<C> {
        if secure {
            &mut self.secure
        } else {
            &mut self.plain
        }
    }

    /// Take the first idle connection for `key`, together with its expiry entry.
    fn find_connection(&mut self, key: &CacheKey) -> Option<Arc<C>> {
        let bucket = self.bucket_mut(key.is_secure());
        let list = bucket.get_mut(key)?;
        let conn = list.pop_front();
        if list.is_empty() {
            bucket.remove(key);
        }
        let conn = conn?;
        self.expiry.remove(&conn);
        Some(conn)
    }

    fn put_connection(&mut self, conn: Arc<C>) {
        let key = conn.cache_key().clone();
        self.bucket_mut(conn.is_secure()).entry(key).or_default().push_back(conn);
    }

    /// Remove `conn` from its bucket only. Returns whether it was there.
    fn remove_from_pool(&mut self, conn: &Arc<C>) -> bool {
        let key = conn.cache_key();
        let bucket = self.bucket_mut(conn.is_secure());
        let Some(list) = bucket.get_mut(key) else {
            return false;
        };
        let removed = match list.iter().position(|c| Arc::ptr_eq(c, conn)) {
            Some(index) => list.remove(index).is_some(),
            None => false,
        };
        if list.is_empty() {
            bucket.remove(key);
        }
        removed
    }

    fn contains(&self, conn: &Arc<C>) -> bool {
        let key = conn.cache_key();
        [&self.plain, &self.secure]
            .iter()
            .filter_map(|bucket| bucket.get(key))
            .any(|list| list.iter().any(|c| Arc::ptr_eq(c, conn)))
    }
}

pub(crate) struct PoolInner<C: HttpConnection> {
    tag: String,
    config: PoolConfig,
    time_source: Arc<dyn TimeLine>,
    stopped: AtomicBool,
    purge_hint: PurgeHint,
    state: Mutex<PoolState<C>>,
}

impl<C: HttpConnection> PoolInner<C> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn close(&self, conn: &C, cause: Option<NetError>) {
        if let Err(e) = conn.close(cause) {
            tracing::trace!(pool = %self.tag, conn = %conn.label(), error = %e, "close failed");
        }
    }

    /// Called by a firing [`CleanupTrigger`].
    pub(crate) fn cleanup(&self, conn: &Arc<C>, pending_data: usize, error: Option<NetError>) {
        tracing::debug!(pool = %self.tag, conn = %conn.label(), error = ?error, "cleanup");
        let removed = {
            let mut state = self.lock_state();
            let removed = state.remove_from_pool(conn);
            state.expiry.remove(conn);
            removed
        };

        if !removed && pending_data != 0 {
            // Lost a race with acquire: the trigger may have consumed data that
            // belonged to the new owner. Nothing to do but close.
            tracing::warn!(
                pool = %self.tag,
                conn = %conn.label(),
                pending_data,
                "CleanupTrigger triggered for a connection not found in the pool: closing"
            );
            self.close(conn, Some(NetError::unexpected_cleanup(error)));
        } else {
            self.close(conn, None);
        }
    }
}

/// Pool of idle HTTP/1.1 connections, one per owning client.
///
/// Connections are bucketed by [`CacheKey`] (plain and TLS separately) and
/// ordered by keep-alive deadline in a single [`ExpiryList`]. All state lives
/// behind one lock; connections are only ever closed after it is released.
///
/// The pool owns no timer. Whoever owns it calls [`ConnectionPool::sweep`] (or
/// [`ConnectionPool::purge_expired`]) again after the delay it returns; see
/// [`IdleReaper`](crate::socket::reaper::IdleReaper) for a tokio driver.
pub struct ConnectionPool<C: HttpConnection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: HttpConnection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: HttpConnection> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("tag", &self.inner.tag)
            .field("max_pool_size", &self.inner.config.max_pool_size)
            .field("stopped", &self.inner.is_stopped())
            .finish()
    }
}

impl<C: HttpConnection> ConnectionPool<C> {
    /// Create the pool for client `client_id`, on the monotonic clock.
    pub fn new(client_id: u64, config: PoolConfig) -> Self {
        Self::with_time_source(client_id, config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_time_source(
        client_id: u64,
        config: PoolConfig,
        time_source: Arc<dyn TimeLine>,
    ) -> Self {
        let expiry = ExpiryList::new();
        let purge_hint = expiry.hint();
        Self {
            inner: Arc::new(PoolInner {
                tag: format!("ConnectionPool({})", client_id),
                config,
                time_source,
                stopped: AtomicBool::new(false),
                purge_hint,
                state: Mutex::new(PoolState {
                    plain: HashMap::new(),
                    secure: HashMap::new(),
                    expiry,
                }),
            }),
        }
    }

    /// Identity label used in log lines.
    pub fn label(&self) -> &str {
        &self.inner.tag
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Take an idle connection for the given route, if one is pooled.
    ///
    /// Plain connections through a proxy match on the proxy alone; TLS and
    /// direct connections match on the full route. Never blocks on I/O.
    pub fn acquire(
        &self,
        secure: bool,
        destination: Option<&Endpoint>,
        proxy: Option<&Endpoint>,
    ) -> Option<Arc<C>> {
        if self.inner.is_stopped() {
            return None;
        }
        let key = CacheKey::for_route(secure, destination.cloned(), proxy.cloned());

        let conn = {
            let mut state = self.inner.lock_state();
            if self.inner.is_stopped() {
                return None;
            }
            state.find_connection(&key)?
        };
        debug_assert_eq!(conn.is_secure(), secure);
        tracing::trace!(pool = %self.inner.tag, conn = %conn.label(), key = %key, "reusing idle connection");
        Some(conn)
    }

    /// Return a connection with the configured keep-alive.
    pub fn release_default(&self, conn: Arc<C>) {
        let now = self.inner.time_source.now();
        self.release(conn, now, self.inner.config.keep_alive);
    }

    /// Return a connection to the pool, keeping it for `keep_alive` (whole
    /// seconds) after `now`.
    ///
    /// If the pool is full the connection with the nearest deadline, under any
    /// key, is evicted. After [`stop`](Self::stop) the connection is closed
    /// instead of pooled.
    pub fn release(&self, conn: Arc<C>, now: Deadline, keep_alive: Duration) {
        // Armed before admission and outside the lock: a trigger firing in
        // between finds nothing to remove.
        let trigger = self.register_cleanup_trigger(&conn);

        let mut evicted = None;
        let admitted = {
            let mut state = self.inner.lock_state();
            if trigger.is_done() {
                // The trigger has already closed it.
                tracing::trace!(
                    pool = %self.inner.tag,
                    conn = %conn.label(),
                    "connection failed before admission"
                );
                return;
            }
            if self.inner.is_stopped() {
                false
            } else {
                if state.expiry.remove(&conn) {
                    // Released twice: keep a single idle copy with the new deadline.
                    state.remove_from_pool(&conn);
                }
                let max = self.inner.config.max_pool_size;
                if max > 0 && state.expiry.len() >= max {
                    if let Some(oldest) = state.expiry.remove_oldest() {
                        state.remove_from_pool(&oldest);
                        evicted = Some(oldest);
                    }
                }
                state.put_connection(Arc::clone(&conn));
                state.expiry.add(Arc::clone(&conn), now, keep_alive);
                true
            }
        };

        if !admitted {
            tracing::trace!(pool = %self.inner.tag, conn = %conn.label(), "pool stopped: closing");
            self.inner.close(&conn, None);
            return;
        }
        if let Some(oldest) = evicted {
            tracing::debug!(
                pool = %self.inner.tag,
                conn = %oldest.label(),
                "Maximum pool size reached: removing oldest connection"
            );
            self.inner.close(&oldest, None);
        }
    }

    fn register_cleanup_trigger(&self, conn: &Arc<C>) -> Arc<CleanupTrigger<C>> {
        let trigger = Arc::new(CleanupTrigger::new(conn, Arc::downgrade(&self.inner)));
        tracing::debug!(pool = %self.inner.tag, trigger = %trigger, "registering");
        conn.flow().subscribe(trigger.clone());
        trigger
    }

    /// Close every connection whose deadline is at or before `now`.
    ///
    /// Returns the delay until the next deadline, or zero when nothing is left
    /// to expire.
    pub fn sweep(&self, now: Deadline) -> Duration {
        // Entries being added concurrently cannot have expired yet.
        if !self.inner.purge_hint.get() {
            return Duration::ZERO;
        }

        let (closelist, next_purge) = {
            let mut state = self.inner.lock_state();
            let closelist = state.expiry.purge_until(now);
            for conn in &closelist {
                let was_present = state.remove_from_pool(conn);
                debug_assert!(was_present, "expired connection missing from its bucket");
            }
            let next = state.expiry.next_expiry_deadline().unwrap_or(now);
            (closelist, now.millis_until(&next))
        };

        if !closelist.is_empty() {
            tracing::debug!(
                pool = %self.inner.tag,
                purged = closelist.len(),
                next_purge_ms = next_purge,
                "purged expired connections"
            );
        }
        for conn in &closelist {
            self.inner.close(conn, None);
        }
        Duration::from_millis(next_purge)
    }

    /// [`sweep`](Self::sweep) at the pool clock's current time.
    pub fn purge_expired(&self) -> Duration {
        if !self.inner.purge_hint.get() {
            return Duration::ZERO;
        }
        self.sweep(self.inner.time_source.now())
    }

    /// Stop the pool for good and close every idle connection.
    pub fn stop(&self) {
        let closelist = {
            let mut state = self.inner.lock_state();
            self.inner.stopped.store(true, Ordering::Release);
            let closelist = state.expiry.drain();
            state.plain.clear();
            state.secure.clear();
            closelist
        };
        tracing::debug!(pool = %self.inner.tag, closing = closelist.len(), "stopped");
        for conn in &closelist {
            self.inner.close(conn, None);
        }
    }

    /// Take `conn` out of the pool and close it after an idle-time anomaly.
    ///
    /// If `conn` was no longer pooled and `pending_data` bytes had been read
    /// from it, the close carries [`NetError::UnexpectedCleanup`] wrapping `error`.
    pub fn cleanup(&self, conn: &Arc<C>, pending_data: usize, error: Option<NetError>) {
        self.inner.cleanup(conn, pending_data, error);
    }

    /// Whether `conn` is currently idle in this pool.
    pub fn contains(&self, conn: &Arc<C>) -> bool {
        self.inner.lock_state().contains(conn)
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.lock_state().expiry.len()
    }

    /// Keep-alive deadline of an idle connection.
    pub fn deadline_of(&self, conn: &Arc<C>) -> Option<Deadline> {
        self.inner.lock_state().expiry.deadline_of(conn)
    }

    /// Nearest keep-alive deadline among idle connections.
    pub fn next_expiry_deadline(&self) -> Option<Deadline> {
        self.inner.lock_state().expiry.next_expiry_deadline()
    }
}
