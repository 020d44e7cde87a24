use std::io::{self, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Address in use")]
    AddressInUse,

    // Idle socket errors (custom codes starting at -900)
    #[error("Socket closed by remote")]
    SocketRemoteClosed,
    #[error("Data received unexpectedly on idle socket")]
    DataReceivedUnexpectedly,
    #[error("Unexpected cleanup triggered for non pooled connection")]
    UnexpectedCleanup {
        #[source]
        cause: Option<Box<NetError>>,
    },

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    /// Wrap the signal that fired a cleanup trigger for a connection that was
    /// no longer pooled.
    pub fn unexpected_cleanup(cause: Option<NetError>) -> Self {
        NetError::UnexpectedCleanup { cause: cause.map(Box::new) }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::AddressInUse => -147,
            NetError::SocketRemoteClosed => -901,
            NetError::DataReceivedUnexpectedly => -902,
            NetError::UnexpectedCleanup { .. } => -905,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -147 => NetError::AddressInUse,
            -901 => NetError::SocketRemoteClosed,
            -902 => NetError::DataReceivedUnexpectedly,
            -905 => NetError::UnexpectedCleanup { cause: None },
            _ => NetError::Unknown(code),
        }
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::ConnectionReset => NetError::ConnectionReset,
            ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            ErrorKind::NotConnected => NetError::SocketNotConnected,
            ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => NetError::SocketRemoteClosed,
            ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            ErrorKind::AddrInUse => NetError::AddressInUse,
            _ => NetError::ConnectionFailed,
        }
    }
}
