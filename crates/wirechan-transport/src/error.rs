use std::net::SocketAddr;
use std::time::Duration;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host name could not be resolved to an address.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The connect deadline elapsed before the connection completed.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// No connection arrived before the accept deadline.
    #[error("no connection accepted within {0:?}")]
    AcceptTimeout(Duration),

    /// The receive deadline elapsed before the request was satisfied.
    #[error("timed out after {timeout:?} ({received} of {wanted} bytes received)")]
    Timeout {
        timeout: Duration,
        wanted: usize,
        received: usize,
    },

    /// The peer closed the connection (zero-byte transfer).
    #[error("connection closed by peer")]
    Closed,

    /// A datagram reply was attempted before any peer was known.
    #[error("no datagram peer to send to")]
    NoPeer,

    /// The open-file limit could not be raised to fit a new descriptor.
    #[error("descriptor {fd} exceeds the open-file limit ({limit}): {source}")]
    DescriptorLimit {
        fd: i64,
        limit: u64,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error means the other end has gone away.
    pub fn is_peer_gone(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
