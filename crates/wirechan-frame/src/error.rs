use wirechan_transport::TransportError;

/// A primitive could not be moved between native and canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The native value is wider than its canonical slot.
    #[error("cannot narrow a {from}-byte value into a {to}-byte canonical slot")]
    Narrowing { from: usize, to: usize },

    /// The canonical value is narrower than the native slot.
    #[error("cannot widen a {from}-byte canonical value into a {to}-byte native slot")]
    Widening { from: usize, to: usize },
}

/// Coarse classification of a [`ChannelError`], used for exit codes and
/// log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The other end closed or reset the connection.
    PeerGone,
    /// A deadline elapsed.
    Timeout,
    /// Bytes on the wire did not follow the message rules.
    Protocol,
    /// A host, port, or socket could not be set up.
    Configuration,
    /// A process resource such as the descriptor table ran out.
    Resource,
    /// Any other OS-level failure.
    Io,
}

/// Errors raised by channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A length or count prefix below the null marker.
    #[error("invalid length prefix {0}")]
    InvalidLength(i32),

    #[error("string of {len} bytes exceeds the {max}-byte limit")]
    StringTooLong { len: usize, max: usize },

    #[error("terminator must not be empty")]
    EmptyTerminator,

    /// A datagram arrived without the terminator in it.
    #[error("terminator not found in {received} received bytes")]
    TerminatorNotFound { received: usize },

    /// A stream message outgrew the receive buffer. The channel consumed
    /// through the next terminator, so the following message is aligned.
    #[error("terminated message exceeded {capacity} bytes ({discarded} bytes discarded)")]
    TerminatorOverflow { capacity: usize, discarded: usize },

    /// Fewer bytes arrived than a fixed-size value needs.
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The channel was configured to treat errors as fatal.
    #[error("fatal: {0}")]
    Fatal(Box<ChannelError>),
}

impl ChannelError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::Fatal(_))
    }

    /// The underlying error with any fatal wrapper removed.
    pub fn root(&self) -> &ChannelError {
        match self {
            ChannelError::Fatal(inner) => inner.root(),
            other => other,
        }
    }

    pub fn into_root(self) -> ChannelError {
        match self {
            ChannelError::Fatal(inner) => inner.into_root(),
            other => other,
        }
    }

    pub fn is_peer_gone(&self) -> bool {
        self.category() == ErrorCategory::PeerGone
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            ChannelError::Transport(err) => transport_category(err),
            ChannelError::Codec(_)
            | ChannelError::InvalidLength(_)
            | ChannelError::StringTooLong { .. }
            | ChannelError::EmptyTerminator
            | ChannelError::TerminatorNotFound { .. }
            | ChannelError::TerminatorOverflow { .. }
            | ChannelError::ShortRead { .. }
            | ChannelError::InvalidUtf8(_) => ErrorCategory::Protocol,
            ChannelError::Fatal(_) => ErrorCategory::Io,
        }
    }
}

fn transport_category(err: &TransportError) -> ErrorCategory {
    match err {
        err if err.is_peer_gone() => ErrorCategory::PeerGone,
        TransportError::Timeout { .. }
        | TransportError::ConnectTimeout { .. }
        | TransportError::AcceptTimeout(_) => ErrorCategory::Timeout,
        TransportError::Resolve { .. }
        | TransportError::Connect { .. }
        | TransportError::Bind { .. }
        | TransportError::NoPeer => ErrorCategory::Configuration,
        TransportError::DescriptorLimit { .. } => ErrorCategory::Resource,
        _ => ErrorCategory::Io,
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};
    use std::time::Duration;

    use super::*;

    #[test]
    fn categories() {
        let cases: Vec<(ChannelError, ErrorCategory)> = vec![
            (TransportError::Closed.into(), ErrorCategory::PeerGone),
            (
                TransportError::Io(Error::from(ErrorKind::ConnectionReset)).into(),
                ErrorCategory::PeerGone,
            ),
            (
                TransportError::Timeout {
                    timeout: Duration::from_millis(1),
                    wanted: 4,
                    received: 0,
                }
                .into(),
                ErrorCategory::Timeout,
            ),
            (TransportError::NoPeer.into(), ErrorCategory::Configuration),
            (ChannelError::InvalidLength(-7), ErrorCategory::Protocol),
            (
                TransportError::Io(Error::from(ErrorKind::PermissionDenied)).into(),
                ErrorCategory::Io,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.category(), expected, "{err}");
        }
    }

    #[test]
    fn fatal_wrapper_keeps_root() {
        let err = ChannelError::Fatal(Box::new(TransportError::Closed.into()));
        assert!(err.is_fatal());
        assert!(err.is_peer_gone());
        assert!(matches!(
            err.root(),
            ChannelError::Transport(TransportError::Closed)
        ));
        assert!(err.to_string().starts_with("fatal: "));
        assert!(!err.into_root().is_fatal());
    }
}
