use crate::base::neterror::NetError;
use crate::socket::flow::ConnectionFlow;
use crate::socket::key::CacheKey;

/// An established connection that can sit idle in a [`ConnectionPool`].
///
/// Connections are shared as `Arc`s; the pool identifies them by pointer, never
/// by value.
///
/// [`ConnectionPool`]: crate::socket::pool::ConnectionPool
pub trait HttpConnection: Send + Sync + 'static {
    /// Key this connection is pooled under. Must not change over its lifetime.
    fn cache_key(&self) -> &CacheKey;

    /// Whether the connection runs over TLS. Decides which bucket it is pooled in.
    fn is_secure(&self) -> bool;

    /// The inbound byte flow the pool watches while the connection is idle.
    fn flow(&self) -> &dyn ConnectionFlow;

    /// Close the connection, recording `cause` if one is known.
    ///
    /// Must be idempotent: the pool may close a connection that a racing
    /// cleanup has already closed.
    fn close(&self, cause: Option<NetError>) -> Result<(), NetError>;

    /// Short identifier used in log lines.
    fn label(&self) -> String {
        format!("HttpConnection({})", self.cache_key())
    }
}
