//! Byte transports for wirechan.
//!
//! Provides a unified raw byte-transfer interface over:
//! - TCP stream sockets and UDP datagram sockets
//! - Local unidirectional pipes
//! - User-space buffered wrappers around either
//!
//! This is the lowest layer of wirechan. The typed channel layer builds on
//! the [`RawRead`] / [`RawWrite`] traits provided here.

pub mod buffered;
pub mod env;
pub mod error;
pub mod readiness;
pub mod traits;

#[cfg(unix)]
pub mod fdlimit;
#[cfg(unix)]
pub mod pipe;
#[cfg(unix)]
pub mod socket;

pub use buffered::{BufferConfig, Buffered, DEFAULT_BUFFER_CAPACITY};
pub use env::EnvironmentGuard;
pub use error::{Result, TransportError};
pub use readiness::{timeout_from_millis, Deadline, WAIT_FOREVER_MS};
pub use traits::{RawRead, RawWrite, Role, SocketKind, Transport, TransportKind};

#[cfg(unix)]
pub use pipe::{pipe_pair, PipeReader, PipeWriter};
#[cfg(unix)]
pub use socket::{resolve, SocketChannel, SocketListener};
