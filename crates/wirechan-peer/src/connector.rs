use std::time::Duration;

use tracing::{debug, warn};
use wirechan_frame::{Channel, ChannelConfig, Result};
use wirechan_transport::{Role, SocketChannel, SocketKind};

/// Options for [`create_client`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Escalate failures, including this connect, to fatal errors.
    /// Overrides `config.errors_fatal`.
    pub errors_fatal: bool,
    /// Abandon the connect after this long. `None` waits as long as the OS
    /// does.
    pub connect_timeout: Option<Duration>,
    /// Log a failed connect at debug level instead of warn.
    pub quiet: bool,
    /// Settings for the resulting channel.
    pub config: ChannelConfig,
}

impl ClientOptions {
    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            errors_fatal: self.errors_fatal,
            ..self.config.clone()
        }
    }
}

/// Connect to `host:port` and wrap the socket in a channel.
///
/// Numeric addresses are used as given; names are resolved and the first
/// address wins. A datagram client addresses the server until a reply from
/// elsewhere changes its peer.
pub fn create_client(
    host: &str,
    port: u16,
    kind: SocketKind,
    options: &ClientOptions,
) -> Result<Channel<SocketChannel>> {
    let config = options.channel_config();

    match SocketChannel::connect(host, port, kind, options.connect_timeout) {
        Ok(socket) => {
            debug!(host, port, %kind, "client channel ready");
            Ok(Channel::with_config(socket, Role::Client, config))
        }
        Err(err) => {
            if options.quiet || config.suppress_messages {
                debug!(host, port, %kind, error = %err, "connect failed");
            } else {
                warn!(host, port, %kind, error = %err, "connect failed");
            }
            Err(config.escalate(err.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use wirechan_frame::{ErrorCategory, RecvOptions};

    use super::*;

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn connects_to_listening_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            std::io::Write::write_all(&mut stream, &[0, 0, 0, 42]).unwrap();
        });

        let mut client =
            create_client("127.0.0.1", port, SocketKind::Stream, &ClientOptions::default())
                .unwrap();
        assert_eq!(client.role(), Role::Client);
        assert_eq!(client.accept::<i32>(RecvOptions::millis(2000)).unwrap(), 42);
        server.join().unwrap();
    }

    #[test]
    fn refused_connect_is_configuration_error() {
        let port = unused_port();
        let options = ClientOptions {
            quiet: true,
            connect_timeout: Some(Duration::from_secs(2)),
            ..ClientOptions::default()
        };
        let err = create_client("127.0.0.1", port, SocketKind::Stream, &options).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(options.config.diagnostics.last_error().is_some());
    }

    #[test]
    fn fatal_policy_applies_to_connect() {
        let port = unused_port();
        let options = ClientOptions {
            errors_fatal: true,
            quiet: true,
            ..ClientOptions::default()
        };
        let err = create_client("127.0.0.1", port, SocketKind::Stream, &options).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unresolvable_host_fails() {
        let options = ClientOptions {
            quiet: true,
            ..ClientOptions::default()
        };
        let err = create_client("no-such-host.invalid", 9, SocketKind::Datagram, &options)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn datagram_client_targets_server() {
        let server = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();

        let mut client =
            create_client("127.0.0.1", port, SocketKind::Datagram, &ClientOptions::default())
                .unwrap();
        client.send(7u16).unwrap();

        let mut buf = [0u8; 8];
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let (n, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0, 7]);
    }
}
