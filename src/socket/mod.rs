//! Idle connection pooling.
//!
//! Mirrors the HTTP/1.1 keep-alive pool of a browser network stack:
//! - [`key`]: Cache keys bucketing connections by destination, proxy and TLS identity
//! - [`expiry`]: Keep-alive deadlines, nearest at the tail
//! - [`pool`]: The pool itself (acquire, release, sweep, stop)
//! - [`flow`]: Single-listener byte flow a transport reports idle-time events into
//! - [`tcp`]: Plain TCP connections with an idle watch
//! - [`reaper`]: tokio task driving periodic purges

pub mod config;
pub mod connection;
pub mod expiry;
pub mod flow;
pub mod key;
pub mod pool;
pub mod reaper;
pub mod tcp;
mod trigger;
