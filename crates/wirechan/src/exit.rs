use std::fmt;
use std::io;

use wirechan_frame::{ChannelError, ErrorCategory};
use wirechan_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let message = format!("{context}: {}", err.root());
    let code = match err.category() {
        ErrorCategory::PeerGone => FAILURE,
        ErrorCategory::Timeout => TIMEOUT,
        ErrorCategory::Protocol => DATA_INVALID,
        ErrorCategory::Configuration | ErrorCategory::Resource => TRANSPORT_ERROR,
        ErrorCategory::Io => match err.into_root() {
            ChannelError::Transport(TransportError::Io(source))
            | ChannelError::Transport(TransportError::Accept(source)) => {
                return io_error(context, source)
            }
            _ => INTERNAL,
        },
    };
    CliError::new(code, message)
}
