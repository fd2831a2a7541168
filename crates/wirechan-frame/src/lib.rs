//! Typed message channels over wirechan transports.
//!
//! Values travel in a canonical, host-independent form:
//! - Primitives at fixed widths, most-significant byte first
//! - Strings as an int32 length (`-1` for null) followed by the bytes
//! - Terminated strings as the bytes followed by a caller-chosen terminator
//!
//! A [`Channel`] wraps any transport; it can send when the transport
//! implements `RawWrite` and receive when it implements `RawRead`.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod trace;
pub mod writer;

pub use channel::{
    Channel, ChannelConfig, RecvOptions, DEFAULT_MAX_STRING_LEN, DEFAULT_TERMINATED_BUFFER,
};
pub use codec::{
    canonicalize, canonicalize_with, decanonicalize, decanonicalize_with, flip_bytes, ByteOrder,
    Primitive, PrimitiveKind, MAX_CANONICAL_WIDTH, NULL_LENGTH,
};
pub use error::{ChannelError, CodecError, ErrorCategory, Result};
pub use trace::{Diagnostics, Direction, TraceSink, Traced};
