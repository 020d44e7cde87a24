//! Single-listener byte flow between a transport and whoever currently owns
//! the connection.
//!
//! The transport pushes data, errors and end-of-stream into an [`EventFlow`];
//! exactly one [`FlowListener`] receives them. Data is only delivered against
//! demand requested through the listener's [`FlowSubscription`]; errors and
//! completion are delivered as soon as they happen. Subscribing a new listener
//! drops the previous one, which is told via [`FlowListener::on_drop`].
//!
//! Listener callbacks are never invoked while the flow's own lock is held, so
//! a listener may call back into the flow (or close the connection) freely.

use crate::base::neterror::NetError;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Demand handle given to a listener when it subscribes.
pub trait FlowSubscription: Send + Sync {
    /// Ask for `n` more data items.
    fn request(&self, n: u64);
    /// Stop receiving signals.
    fn cancel(&self);
}

/// Receiver of flow signals. Callbacks may arrive on any thread.
pub trait FlowListener: Send + Sync {
    fn on_subscribe(&self, subscription: &dyn FlowSubscription);
    fn on_data(&self, data: &[Bytes]);
    fn on_error(&self, error: NetError);
    fn on_complete(&self);
    /// The listener has been replaced or detached and will receive nothing more.
    fn on_drop(&self);
}

/// A flow that accepts one listener at a time.
pub trait ConnectionFlow: Send + Sync {
    fn subscribe(&self, listener: Arc<dyn FlowListener>);
}

#[derive(Clone)]
enum Terminal {
    Error(NetError),
    Complete,
}

#[derive(Default)]
struct FlowState {
    listener: Option<Arc<dyn FlowListener>>,
    generation: u64,
    demand: u64,
    pending: VecDeque<Vec<Bytes>>,
    terminal: Option<Terminal>,
}

struct FlowInner {
    state: Mutex<FlowState>,
}

impl FlowInner {
    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver queued data while the current listener has demand.
    fn drain(&self, generation: u64) {
        loop {
            let (listener, item) = {
                let mut state = self.lock();
                if state.generation != generation || state.demand == 0 {
                    return;
                }
                let Some(listener) = state.listener.clone() else {
                    return;
                };
                let Some(item) = state.pending.pop_front() else {
                    return;
                };
                state.demand -= 1;
                (listener, item)
            };
            listener.on_data(&item);
        }
    }
}

struct Subscription {
    flow: Weak<FlowInner>,
    generation: u64,
}

impl FlowSubscription for Subscription {
    fn request(&self, n: u64) {
        let Some(flow) = self.flow.upgrade() else {
            return;
        };
        {
            let mut state = flow.lock();
            if state.generation != self.generation {
                return;
            }
            state.demand = state.demand.saturating_add(n);
        }
        flow.drain(self.generation);
    }

    fn cancel(&self) {
        let Some(flow) = self.flow.upgrade() else {
            return;
        };
        let mut state = flow.lock();
        if state.generation == self.generation {
            state.listener = None;
            state.demand = 0;
        }
    }
}

/// Reusable [`ConnectionFlow`] the transport layer pushes signals into.
#[derive(Clone)]
pub struct EventFlow {
    inner: Arc<FlowInner>,
}

impl Default for EventFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("EventFlow")
            .field("subscribed", &state.listener.is_some())
            .field("demand", &state.demand)
            .field("pending", &state.pending.len())
            .field("terminated", &state.terminal.is_some())
            .finish()
    }
}

impl EventFlow {
    pub fn new() -> Self {
        Self { inner: Arc::new(FlowInner { state: Mutex::new(FlowState::default()) }) }
    }

    /// Queue a data item, delivering it if the listener has demand.
    pub fn push_data(&self, item: Vec<Bytes>) {
        let generation = {
            let mut state = self.inner.lock();
            if state.terminal.is_some() {
                return;
            }
            state.pending.push_back(item);
            state.generation
        };
        self.inner.drain(generation);
    }

    /// Terminate the flow with an error.
    pub fn push_error(&self, error: NetError) {
        self.terminate(Terminal::Error(error));
    }

    /// Terminate the flow normally (end of stream).
    pub fn push_complete(&self) {
        self.terminate(Terminal::Complete);
    }

    /// Remove the current listener, notifying it via `on_drop`.
    ///
    /// Queued data and a recorded terminal signal are kept for the next listener.
    pub fn detach(&self) {
        let old = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.demand = 0;
            state.listener.take()
        };
        if let Some(old) = old {
            old.on_drop();
        }
    }

    pub fn has_listener(&self) -> bool {
        self.inner.lock().listener.is_some()
    }

    /// Number of data items waiting for demand.
    pub fn pending_items(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminal.is_some()
    }

    fn terminate(&self, terminal: Terminal) {
        let listener = {
            let mut state = self.inner.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal.clone());
            state.listener.take()
        };
        if let Some(listener) = listener {
            deliver_terminal(listener.as_ref(), terminal);
        }
    }
}

fn deliver_terminal(listener: &dyn FlowListener, terminal: Terminal) {
    match terminal {
        Terminal::Error(e) => listener.on_error(e),
        Terminal::Complete => listener.on_complete(),
    }
}

impl ConnectionFlow for EventFlow {
    fn subscribe(&self, listener: Arc<dyn FlowListener>) {
        let (old, generation, terminal) = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.demand = 0;
            let terminal = state.terminal.clone();
            let old = if terminal.is_some() {
                state.listener.take()
            } else {
                state.listener.replace(Arc::clone(&listener))
            };
            (old, state.generation, terminal)
        };

        if let Some(old) = old {
            old.on_drop();
        }

        let subscription = Subscription { flow: Arc::downgrade(&self.inner), generation };
        listener.on_subscribe(&subscription);

        match terminal {
            Some(terminal) => deliver_terminal(listener.as_ref(), terminal),
            None => self.inner.drain(generation),
        }
    }
}
