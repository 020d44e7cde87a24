//! # keepalive
//!
//! A Chromium-inspired idle connection pool for HTTP/1.1 clients.
//!
//! `keepalive` caches idle, previously established connections keyed by
//! destination, proxy and TLS identity, so later requests can skip connection
//! setup. Idle connections expire after their keep-alive, the oldest are
//! evicted when the pool is full, and any connection that receives data, an
//! error or an end-of-stream while idle is removed and closed.
//!
//! ## Features
//!
//! - **Keyed Reuse**: Plain, proxied and TLS routes bucketed separately
//! - **Keep-Alive Expiry**: Deadline-ordered purge with next-deadline scheduling
//! - **Bounded Pool**: Global capacity with oldest-deadline eviction
//! - **Idle Teardown Detection**: Per-connection cleanup trigger on the byte flow
//! - **Shutdown**: One-way `stop` that closes everything and fails closed afterwards
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keepalive::socket::config::PoolConfig;
//! use keepalive::socket::key::Endpoint;
//! use keepalive::socket::pool::ConnectionPool;
//! use keepalive::socket::reaper::IdleReaper;
//! use keepalive::socket::tcp::TcpConnection;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = ConnectionPool::new(1, PoolConfig::from_env());
//!     let _reaper = IdleReaper::spawn(pool.clone());
//!
//!     let dest = Endpoint::new("example.com", "93.184.216.34:80".parse().unwrap());
//!     let conn = match pool.acquire(false, Some(&dest), None) {
//!         Some(conn) => {
//!             conn.detach();
//!             conn
//!         }
//!         None => Arc::new(TcpConnection::connect(dest).await.unwrap()),
//!     };
//!     // ... exchange a request and response over conn.stream() ...
//!     pool.release_default(conn);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and monotonic time lines
//! - [`socket`] - Cache keys, expiry list, pool, byte flows and TCP transport

pub mod base;
pub mod socket;
