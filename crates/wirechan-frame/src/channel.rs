use std::time::Duration;

use tracing::{debug, error, warn};
use wirechan_transport::{timeout_from_millis, Deadline, Role, Transport, TransportKind};

use crate::error::ChannelError;
use crate::trace::{Diagnostics, Traced};

/// Largest length-prefixed string a channel accepts by default.
pub const DEFAULT_MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Default receive buffer for terminator-delimited messages.
pub const DEFAULT_TERMINATED_BUFFER: usize = 8 * 1024;

/// Per-channel behavior.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Escalate every failure to [`ChannelError::Fatal`].
    pub errors_fatal: bool,
    /// Keep failures out of the warning log (they still reach `debug`).
    pub suppress_messages: bool,
    /// Upper bound on length-prefixed strings, both directions.
    pub max_string_len: usize,
    /// Capacity of the buffer a terminated message must fit in, terminator
    /// included.
    pub terminated_buffer_size: usize,
    pub diagnostics: Diagnostics,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            errors_fatal: false,
            suppress_messages: false,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            terminated_buffer_size: DEFAULT_TERMINATED_BUFFER,
            diagnostics: Diagnostics::default(),
        }
    }
}

impl ChannelConfig {
    /// Record `err` in the shared diagnostics and apply the fatality policy.
    pub fn escalate(&self, err: ChannelError) -> ChannelError {
        self.diagnostics.record_error(err.to_string());
        if self.errors_fatal && !err.is_fatal() {
            ChannelError::Fatal(Box::new(err))
        } else {
            err
        }
    }
}

/// Deadline and completeness policy for one receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvOptions {
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Keep receiving until the request is satisfied.
    pub read_everything: bool,
}

impl RecvOptions {
    pub const fn blocking() -> Self {
        Self {
            timeout: None,
            read_everything: true,
        }
    }

    pub const fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            read_everything: true,
        }
    }

    /// Millisecond form; negative values wait indefinitely.
    pub fn millis(ms: i64) -> Self {
        Self {
            timeout: timeout_from_millis(ms),
            read_everything: true,
        }
    }

    /// Return after the first non-empty receive instead of filling the
    /// request.
    pub const fn partial(mut self) -> Self {
        self.read_everything = false;
        self
    }

    pub(crate) fn within(self, deadline: &Deadline) -> Self {
        Self {
            timeout: deadline.remaining(),
            ..self
        }
    }
}

impl Default for RecvOptions {
    fn default() -> Self {
        Self::blocking()
    }
}

/// A typed message channel over a byte transport.
///
/// Reading operations exist when `T: RawRead`, writing operations when
/// `T: RawWrite`; a pipe end therefore only offers the direction it can
/// carry. Dropping the channel closes the transport.
#[derive(Debug)]
pub struct Channel<T> {
    pub(crate) transport: T,
    pub(crate) config: ChannelConfig,
    role: Role,
    bytes_sent: u64,
    bytes_received: u64,
    last_error: Option<String>,
    peer_gone_reported: bool,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T, role: Role) -> Self {
        Self::with_config(transport, role, ChannelConfig::default())
    }

    pub fn with_config(transport: T, role: Role, config: ChannelConfig) -> Self {
        debug!(kind = %transport.kind(), ?role, "channel opened");
        Self {
            transport,
            config,
            role,
            bytes_sent: 0,
            bytes_received: 0,
            last_error: None,
            peer_gone_reported: false,
        }
    }

    /// Transport kind of the underlying handle.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

impl<T> Channel<T> {
    /// Whether this end connected out or was accepted.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current error policy and limits.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Whether failures come back wrapped in [`ChannelError::Fatal`].
    pub fn errors_fatal(&self) -> bool {
        self.config.errors_fatal
    }

    /// Change the fatality policy for later operations.
    pub fn set_errors_fatal(&mut self, fatal: bool) {
        self.config.errors_fatal = fatal;
    }

    /// Demote failure logging to `debug`.
    pub fn set_suppress_messages(&mut self, suppress: bool) {
        self.config.suppress_messages = suppress;
    }

    /// Trace sink and shared last-error text.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.config.diagnostics
    }

    /// Total payload bytes handed to the transport.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes taken from the transport.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Text of this channel's most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Wrap the next operation so its value lands in the trace.
    pub fn traced<'a>(&'a mut self, depth: usize, description: &'a str) -> Traced<'a, T> {
        Traced::new(self, depth, description)
    }

    /// The underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// The underlying transport. Bytes moved through it are not counted.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give up the channel state and return the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Rebuild the channel around a transport derived from the current one,
    /// keeping configuration, role, and counters.
    ///
    /// `channel.map_transport(Buffered::new)` layers user-space buffering
    /// over an open channel.
    pub fn map_transport<U>(self, wrap: impl FnOnce(T) -> U) -> Channel<U> {
        Channel {
            transport: wrap(self.transport),
            config: self.config,
            role: self.role,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            last_error: self.last_error,
            peer_gone_reported: self.peer_gone_reported,
        }
    }

    pub(crate) fn count_sent(&mut self, n: usize) {
        self.bytes_sent += n as u64;
    }

    pub(crate) fn count_received(&mut self, n: usize) {
        self.bytes_received += n as u64;
    }

    /// Report a failure once and apply the channel's error policy.
    ///
    /// A vanished peer is logged the first time only; later operations on
    /// the same channel fail quietly.
    pub(crate) fn fail(&mut self, err: impl Into<ChannelError>) -> ChannelError {
        let err = err.into();
        let repeated_peer_gone =
            err.is_peer_gone() && std::mem::replace(&mut self.peer_gone_reported, true);

        if self.config.suppress_messages || repeated_peer_gone {
            debug!(error = %err, "channel operation failed");
        } else if self.config.errors_fatal {
            error!(error = %err, "channel operation failed");
        } else {
            warn!(error = %err, "channel operation failed");
        }

        self.last_error = Some(err.to_string());
        self.config.escalate(err)
    }
}

#[cfg(unix)]
impl Channel<wirechan_transport::SocketChannel> {
    /// Connected peer, or for datagrams where replies are sent.
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.transport.peer_addr()
    }

    pub fn local_addr(&self) -> crate::error::Result<std::net::SocketAddr> {
        Ok(self.transport.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use wirechan_transport::TransportError;

    use super::*;

    struct Null;

    impl Transport for Null {
        fn kind(&self) -> TransportKind {
            TransportKind::Stream
        }
    }

    #[test]
    fn recv_options_forms() {
        assert_eq!(RecvOptions::default(), RecvOptions::blocking());
        assert_eq!(RecvOptions::millis(-1).timeout, None);
        assert_eq!(
            RecvOptions::millis(250).timeout,
            Some(Duration::from_millis(250))
        );
        assert!(!RecvOptions::blocking().partial().read_everything);
    }

    #[test]
    fn fail_records_last_error() {
        let mut channel = Channel::new(Null, Role::Client);
        let err = channel.fail(ChannelError::InvalidLength(-3));
        assert!(!err.is_fatal());
        assert_eq!(channel.last_error(), Some("invalid length prefix -3"));
        assert_eq!(
            channel.diagnostics().last_error().as_deref(),
            Some("invalid length prefix -3")
        );
    }

    #[test]
    fn fatal_policy_wraps_errors() {
        let config = ChannelConfig {
            errors_fatal: true,
            ..ChannelConfig::default()
        };
        let mut channel = Channel::with_config(Null, Role::Server, config);
        let err = channel.fail(TransportError::Closed);
        assert!(err.is_fatal());
        assert!(err.is_peer_gone());

        channel.set_errors_fatal(false);
        assert!(!channel.fail(TransportError::Closed).is_fatal());
    }

    #[test]
    fn peer_gone_reported_once() {
        let mut channel = Channel::new(Null, Role::Client);
        assert!(!channel.peer_gone_reported);
        channel.fail(TransportError::Closed);
        assert!(channel.peer_gone_reported);
        channel.fail(TransportError::Closed);
        assert!(channel.peer_gone_reported);
    }

    #[test]
    fn escalate_does_not_double_wrap() {
        let config = ChannelConfig {
            errors_fatal: true,
            ..ChannelConfig::default()
        };
        let once = config.escalate(ChannelError::EmptyTerminator);
        let twice = config.escalate(once);
        assert!(matches!(twice, ChannelError::Fatal(inner) if !inner.is_fatal()));
    }
}
