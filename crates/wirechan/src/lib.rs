//! Typed message channels with a host-independent wire encoding.
//!
//! wirechan lets two processes exchange primitive values, strings, arrays,
//! and raw byte blobs over TCP, UDP, or local pipes. Every value travels in
//! a canonical form, so the two ends may run on machines of different byte
//! order or word size.
//!
//! # Crate Structure
//!
//! - [`transport`]: raw byte transports (sockets, pipes, buffering, readiness)
//! - [`frame`]: the wire codec and the typed [`Channel`](frame::Channel)
//! - [`peer`]: client, server, and pipe construction (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use wirechan_transport::*;
}

/// Re-export codec and channel types.
pub mod frame {
    pub use wirechan_frame::*;
}

/// Re-export construction helpers (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use wirechan_peer::*;
}
