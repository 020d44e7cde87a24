//! Plain TCP connections that can be pooled.
//!
//! While a listener is subscribed to a [`TcpConnection`], a small tokio task
//! watches the socket for readability and forwards what it sees into the
//! connection's [`EventFlow`]: end of stream as completion, bytes as data,
//! errors as errors. The new owner of an acquired connection calls
//! [`TcpConnection::detach`] before using the stream, which stops the watch.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::connection::HttpConnection;
use crate::socket::flow::{ConnectionFlow, EventFlow, FlowListener};
use crate::socket::key::{CacheKey, Endpoint};
use bytes::Bytes;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const IDLE_READ_BUFFER: usize = 4096;

/// A plain (non-TLS) TCP connection, optionally through a proxy.
#[derive(Debug)]
pub struct TcpConnection {
    stream: Arc<TcpStream>,
    key: CacheKey,
    flow: EventFlow,
    watcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    label: String,
}

impl TcpConnection {
    /// Wrap an established stream to `destination` (through `proxy` if given).
    pub fn new(stream: TcpStream, destination: Endpoint, proxy: Option<Endpoint>) -> Self {
        let label = match &proxy {
            Some(p) => format!("TcpConnection({} via {})", destination, p),
            None => format!("TcpConnection({})", destination),
        };
        Self {
            stream: Arc::new(stream),
            key: CacheKey::for_route(false, Some(destination), proxy),
            flow: EventFlow::new(),
            watcher: Mutex::new(None),
            closed: AtomicBool::new(false),
            label,
        }
    }

    /// Connect directly to `destination`.
    pub async fn connect(destination: Endpoint) -> Result<Self, NetError> {
        let label = format!("TcpConnection({})", destination);
        let stream = TcpStream::connect(destination.addr()).await.connection_context(&label)?;
        Ok(Self::new(stream, destination, None))
    }

    /// The underlying stream, for the current owner's I/O.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// The flow the idle watch reports into.
    pub fn events(&self) -> &EventFlow {
        &self.flow
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take the connection back from whatever listener is watching it.
    ///
    /// Stops the idle watch and drops the current listener. Anything the watch
    /// already read stays queued in [`events`](Self::events).
    pub fn detach(&self) {
        self.stop_watch();
        self.flow.detach();
    }

    fn stop_watch(&self) {
        let handle = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn start_watch(&self) {
        if self.is_closed() {
            return;
        }
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(conn = %self.label, "no tokio runtime; idle watch disabled");
            return;
        };
        let stream = Arc::clone(&self.stream);
        let flow = self.flow.clone();
        *watcher = Some(runtime.spawn(watch_idle(stream, flow)));
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        // The watch task holds its own reference to the stream.
        self.stop_watch();
    }
}

async fn watch_idle(stream: Arc<TcpStream>, flow: EventFlow) {
    let mut buf = [0u8; IDLE_READ_BUFFER];
    loop {
        if let Err(e) = stream.readable().await {
            flow.push_error(e.into());
            return;
        }
        match stream.try_read(&mut buf) {
            Ok(0) => {
                flow.push_complete();
                return;
            }
            Ok(n) => {
                flow.push_data(vec![Bytes::copy_from_slice(&buf[..n])]);
                return;
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => {
                flow.push_error(e.into());
                return;
            }
        }
    }
}

impl ConnectionFlow for TcpConnection {
    fn subscribe(&self, listener: Arc<dyn FlowListener>) {
        self.flow.subscribe(listener);
        self.start_watch();
    }
}

impl HttpConnection for TcpConnection {
    fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    fn is_secure(&self) -> bool {
        false
    }

    fn flow(&self) -> &dyn ConnectionFlow {
        self
    }

    fn close(&self, cause: Option<NetError>) -> Result<(), NetError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::trace!(conn = %self.label, cause = ?cause, "closing");
        self.stop_watch();
        socket2::SockRef::from(self.stream.as_ref())
            .shutdown(Shutdown::Both)
            .connection_context(&self.label)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}
