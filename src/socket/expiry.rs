//! Keep-alive deadlines for idle connections.
//!
//! [`ExpiryList`] keeps (connection, deadline) pairs sorted so that the entry
//! with the farthest deadline is at the head and the one with the nearest
//! deadline is at the tail. Connections usually share a single keep-alive
//! duration and come back in roughly FIFO order, so new entries almost always
//! land at or near the head, and expired entries are purged from the tail.
//!
//! Every method except [`ExpiryList::purge_maybe_required`] must be called with
//! the owning pool's lock held.

use crate::base::timeline::Deadline;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock-free "the list may hold entries" flag, shared between the list and
/// readers that do not hold the pool lock.
///
/// `false` means the list is empty; `true` may be stale.
#[derive(Debug, Clone, Default)]
pub struct PurgeHint(Arc<AtomicBool>);

impl PurgeHint {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

struct ExpiryEntry<C> {
    connection: Arc<C>,
    expiry: Deadline,
}

/// Idle connections sorted by keep-alive deadline, farthest first.
pub struct ExpiryList<C> {
    list: VecDeque<ExpiryEntry<C>>,
    hint: PurgeHint,
}

impl<C> Default for ExpiryList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ExpiryList<C> {
    pub fn new() -> Self {
        Self { list: VecDeque::new(), hint: PurgeHint::default() }
    }

    /// Handle on the purge hint, readable without the pool lock.
    pub fn hint(&self) -> PurgeHint {
        self.hint.clone()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Loosely accurate: recomputed at the end of every mutation.
    pub fn purge_maybe_required(&self) -> bool {
        self.hint.get()
    }

    /// Nearest remaining deadline.
    pub fn next_expiry_deadline(&self) -> Option<Deadline> {
        self.list.back().map(|e| e.expiry)
    }

    /// Add `conn`, expiring `keep_alive` whole seconds after `now` truncated to the second.
    pub fn add(&mut self, conn: Arc<C>, now: Deadline, keep_alive: Duration) {
        let then = now.truncated_to_secs().plus_secs(keep_alive.as_secs());

        // The new entry most likely has the farthest deadline, so scan from the head.
        let at = self.list.iter().position(|entry| then.is_after(&entry.expiry));
        let entry = ExpiryEntry { connection: conn, expiry: then };
        match at {
            Some(index) => self.list.insert(index, entry),
            None => self.list.push_back(entry),
        }
        self.hint.set(true);
    }

    /// Remove `conn` by identity. Returns whether it was present.
    pub fn remove(&mut self, conn: &Arc<C>) -> bool {
        let Some(index) = self.list.iter().position(|e| Arc::ptr_eq(&e.connection, conn)) else {
            return false;
        };
        self.list.remove(index);
        self.hint.set(!self.list.is_empty());
        true
    }

    /// Remove the entry with the nearest deadline.
    pub fn remove_oldest(&mut self) -> Option<Arc<C>> {
        let entry = self.list.pop_back()?;
        self.hint.set(!self.list.is_empty());
        Some(entry.connection)
    }

    /// Remove every entry whose deadline is at or before `now`, nearest first.
    pub fn purge_until(&mut self, now: Deadline) -> Vec<Arc<C>> {
        let mut closelist = Vec::new();
        while let Some(entry) = self.list.back() {
            // Sorted: the first unexpired entry from the tail ends the purge.
            if entry.expiry.is_after(&now) {
                break;
            }
            if let Some(entry) = self.list.pop_back() {
                closelist.push(entry.connection);
            }
        }
        self.hint.set(!self.list.is_empty());
        closelist
    }

    /// Remove everything, head first.
    pub fn drain(&mut self) -> Vec<Arc<C>> {
        let all = self.list.drain(..).map(|e| e.connection).collect();
        self.hint.set(false);
        all
    }

    /// Deadlines from head (farthest) to tail (nearest).
    pub fn deadlines(&self) -> Vec<Deadline> {
        self.list.iter().map(|e| e.expiry).collect()
    }

    /// Deadline of `conn`, if it is in the list.
    pub fn deadline_of(&self, conn: &Arc<C>) -> Option<Deadline> {
        self.list.iter().find(|e| Arc::ptr_eq(&e.connection, conn)).map(|e| e.expiry)
    }
}
