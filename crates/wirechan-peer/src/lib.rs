//! Channel construction for wirechan.
//!
//! Connect out as a client, listen and accept as a server, or open a local
//! pipe, and get back a typed [`Channel`](wirechan_frame::Channel) with the
//! requested error policy.

#[cfg(unix)]
pub mod connector;
#[cfg(unix)]
pub mod listener;
#[cfg(unix)]
pub mod pipe;

#[cfg(unix)]
pub use connector::{create_client, ClientOptions};
#[cfg(unix)]
pub use listener::{create_server_channel, create_server_listener, ChannelListener, ServerOptions};
#[cfg(unix)]
pub use pipe::pipe_channels;
pub use wirechan_frame::{ChannelError, Result};
