//! Ergonomic error context helpers.
//!
//! Provides extension traits for converting IO errors raised at the transport
//! boundary into `NetError` values, recording which connection produced them.

use crate::base::neterror::NetError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Convert an IO error into a `NetError`, tracing the connection it came from.
    ///
    /// # Example
    /// ```ignore
    /// use keepalive::base::context::IoResultExt;
    ///
    /// socket.shutdown(Shutdown::Both).connection_context("TcpConnection(127.0.0.1:80)")?;
    /// // Error: NetError::SocketNotConnected
    /// ```
    fn connection_context(self, conn: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, conn: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::trace!(conn = %conn, error = %e, "transport IO error");
            NetError::from(e)
        })
    }
}
