use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, warn};
use wirechan_frame::{Channel, ChannelConfig, ChannelError, Result};
use wirechan_transport::{Role, SocketChannel, SocketKind, SocketListener, TransportError};

/// Listens for and accepts channel connections.
pub struct ChannelListener {
    socket: SocketListener,
    config: ChannelConfig,
}

impl ChannelListener {
    /// Bind `port` on the wildcard address. Port 0 picks a free port.
    pub fn bind(port: u16, kind: SocketKind) -> Result<Self> {
        Self::from_socket(SocketListener::bind(port, kind))
    }

    /// Bind an explicit local address.
    pub fn bind_addr(addr: SocketAddr, kind: SocketKind) -> Result<Self> {
        Self::from_socket(SocketListener::bind_addr(addr, kind))
    }

    fn from_socket(socket: std::result::Result<SocketListener, TransportError>) -> Result<Self> {
        match socket {
            Ok(socket) => Ok(Self {
                socket,
                config: ChannelConfig::default(),
            }),
            Err(err) => {
                warn!(error = %err, "listen failed");
                Err(err.into())
            }
        }
    }

    /// Override the configuration given to accepted channels.
    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().port()
    }

    pub fn kind(&self) -> SocketKind {
        self.socket.kind()
    }

    /// Accept the next peer and keep listening.
    ///
    /// A datagram listener has no connections to accept; each call returns a
    /// channel on the bound socket that replies to whoever sent last.
    pub fn accept(&self, timeout: Option<Duration>) -> Result<Channel<SocketChannel>> {
        let config = self.config.clone();
        let accepted = self.socket.accept(timeout);
        wrap_accepted(accepted, config)
    }

    /// Accept one peer and close the listening socket.
    pub fn accept_once(self, timeout: Option<Duration>) -> Result<Channel<SocketChannel>> {
        let accepted = self.socket.accept_once(timeout);
        wrap_accepted(accepted, self.config)
    }
}

fn wrap_accepted(
    accepted: std::result::Result<SocketChannel, TransportError>,
    config: ChannelConfig,
) -> Result<Channel<SocketChannel>> {
    match accepted {
        Ok(socket) => {
            debug!(peer = ?socket.peer_addr(), "server channel ready");
            Ok(Channel::with_config(socket, Role::Server, config))
        }
        Err(err) => {
            let err = ChannelError::from(err);
            if config.suppress_messages || err.is_timeout() {
                debug!(error = %err, "accept failed");
            } else {
                warn!(error = %err, "accept failed");
            }
            Err(config.escalate(err))
        }
    }
}

impl std::fmt::Debug for ChannelListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelListener")
            .field("local_addr", &self.local_addr())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Options for [`create_server_channel`].
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Escalate failures on the accepted channel to fatal errors.
    pub errors_fatal: bool,
    /// Give up on an idle listener after this long. `None` blocks.
    pub accept_timeout: Option<Duration>,
    /// Hand the listener back for further accepts instead of closing it.
    pub keep_listening: bool,
}

/// Set up a listening socket on `port`.
pub fn create_server_listener(port: u16, kind: SocketKind) -> Result<ChannelListener> {
    ChannelListener::bind(port, kind)
}

/// Accept a peer on `listener`.
///
/// The listener comes back only when `keep_listening` is set; otherwise it
/// is closed once the peer is accepted.
pub fn create_server_channel(
    listener: ChannelListener,
    options: &ServerOptions,
) -> Result<(Channel<SocketChannel>, Option<ChannelListener>)> {
    let mut listener = listener;
    listener.config.errors_fatal = options.errors_fatal;

    if options.keep_listening {
        let channel = listener.accept(options.accept_timeout)?;
        Ok((channel, Some(listener)))
    } else {
        let channel = listener.accept_once(options.accept_timeout)?;
        Ok((channel, None))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use wirechan_frame::{ErrorCategory, RecvOptions};

    use super::*;
    use crate::connector::{create_client, ClientOptions};

    const WAIT: RecvOptions = RecvOptions::timeout(Duration::from_secs(5));

    #[test]
    fn accept_timeout_on_idle_listener() {
        let listener = create_server_listener(0, SocketKind::Stream).unwrap();
        let options = ServerOptions {
            accept_timeout: Some(Duration::from_millis(20)),
            ..ServerOptions::default()
        };
        let err = create_server_channel(listener, &options).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn keep_listening_returns_listener() {
        let listener = create_server_listener(0, SocketKind::Stream).unwrap();
        let port = listener.port();

        let clients = thread::spawn(move || {
            for value in [1i32, 2] {
                let mut client =
                    create_client("127.0.0.1", port, SocketKind::Stream, &ClientOptions::default())
                        .unwrap();
                client.send(value).unwrap();
            }
        });

        let options = ServerOptions {
            keep_listening: true,
            accept_timeout: Some(Duration::from_secs(5)),
            ..ServerOptions::default()
        };
        let (mut first, listener) = create_server_channel(listener, &options).unwrap();
        let listener = listener.unwrap();
        assert_eq!(first.role(), Role::Server);
        assert_eq!(first.accept::<i32>(WAIT).unwrap(), 1);

        let mut second = listener.accept(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(second.accept::<i32>(WAIT).unwrap(), 2);
        clients.join().unwrap();
    }

    #[test]
    fn single_accept_closes_listener() {
        let listener = create_server_listener(0, SocketKind::Stream).unwrap();
        let port = listener.port();

        let client = thread::spawn(move || {
            create_client("127.0.0.1", port, SocketKind::Stream, &ClientOptions::default())
                .unwrap()
        });

        let (_channel, listener) = create_server_channel(
            listener,
            &ServerOptions {
                accept_timeout: Some(Duration::from_secs(5)),
                ..ServerOptions::default()
            },
        )
        .unwrap();
        assert!(listener.is_none());
        drop(client.join().unwrap());
    }

    #[test]
    fn accepted_channel_inherits_policy() {
        let listener = create_server_listener(0, SocketKind::Stream).unwrap();
        let port = listener.port();

        let client = thread::spawn(move || {
            let client =
                create_client("127.0.0.1", port, SocketKind::Stream, &ClientOptions::default())
                    .unwrap();
            drop(client);
        });

        let options = ServerOptions {
            errors_fatal: true,
            accept_timeout: Some(Duration::from_secs(5)),
            ..ServerOptions::default()
        };
        let (mut channel, _) = create_server_channel(listener, &options).unwrap();
        client.join().unwrap();

        assert!(channel.errors_fatal());
        let err = channel.accept::<u8>(WAIT).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.is_peer_gone());
    }

    #[test]
    fn datagram_listener_needs_no_accept() {
        let listener = create_server_listener(0, SocketKind::Datagram).unwrap();
        assert_eq!(listener.kind(), SocketKind::Datagram);
        let (channel, _) = create_server_channel(listener, &ServerOptions::default()).unwrap();
        assert_eq!(channel.get_ref().peer_addr(), None);
    }
}
