use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, trace};

use crate::env::EnvironmentGuard;
use crate::error::{Result, TransportError};
use crate::fdlimit;
use crate::readiness;
use crate::traits::{RawRead, RawWrite, Role, SocketKind, Transport, TransportKind};

/// Pending connections a stream listener queues.
pub const LISTEN_BACKLOG: i32 = 1;

/// Resolve `host` to a socket address.
///
/// Numeric addresses are parsed directly; anything else goes through the
/// system resolver and the first address wins.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs.next().ok_or_else(|| TransportError::Resolve {
        host: host.to_string(),
        source: std::io::Error::new(ErrorKind::NotFound, "no addresses returned"),
    })
}

/// A connected TCP stream or a UDP socket with its current peer.
///
/// Datagram channels remember the sender of the most recent datagram and
/// address replies to it.
pub struct SocketChannel {
    inner: SocketInner,
    role: Role,
    _env: EnvironmentGuard,
}

enum SocketInner {
    Stream(TcpStream),
    Datagram {
        socket: UdpSocket,
        peer: Option<SocketAddr>,
    },
}

impl SocketChannel {
    /// Resolve `host` and connect to it.
    ///
    /// With a `timeout` the connect is abandoned once the deadline passes
    /// and reported as [`TransportError::ConnectTimeout`].
    pub fn connect(
        host: &str,
        port: u16,
        kind: SocketKind,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let addr = resolve(host, port)?;
        Self::connect_addr(addr, kind, timeout)
    }

    /// Connect to an already resolved address.
    pub fn connect_addr(
        addr: SocketAddr,
        kind: SocketKind,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let env = EnvironmentGuard::acquire();
        let connect_err = |source| TransportError::Connect { addr, source };

        let inner = match kind {
            SocketKind::Stream => {
                let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
                    .map_err(connect_err)?;
                fdlimit::ensure_capacity(socket.as_raw_fd())?;

                let target = SockAddr::from(addr);
                let connected = match timeout {
                    Some(timeout) => socket.connect_timeout(&target, timeout).map_err(|source| {
                        if source.kind() == ErrorKind::TimedOut {
                            TransportError::ConnectTimeout { addr, timeout }
                        } else {
                            connect_err(source)
                        }
                    }),
                    None => socket.connect(&target).map_err(connect_err),
                };
                connected?;

                let stream: TcpStream = socket.into();
                debug!(%addr, fd = stream.as_raw_fd(), "connected stream socket");
                SocketInner::Stream(stream)
            }
            SocketKind::Datagram => {
                let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
                    .map_err(connect_err)?;
                fdlimit::ensure_capacity(socket.as_raw_fd())?;
                socket
                    .bind(&SockAddr::from(unspecified_like(addr)))
                    .map_err(connect_err)?;

                let socket: UdpSocket = socket.into();
                debug!(%addr, fd = socket.as_raw_fd(), "opened datagram socket");
                SocketInner::Datagram {
                    socket,
                    peer: Some(addr),
                }
            }
        };

        Ok(Self {
            inner,
            role: Role::Client,
            _env: env,
        })
    }

    fn accepted(stream: TcpStream) -> Self {
        Self {
            inner: SocketInner::Stream(stream),
            role: Role::Server,
            _env: EnvironmentGuard::acquire(),
        }
    }

    fn bound_datagram(socket: UdpSocket) -> Self {
        Self {
            inner: SocketInner::Datagram { socket, peer: None },
            role: Role::Server,
            _env: EnvironmentGuard::acquire(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn socket_kind(&self) -> SocketKind {
        match self.inner {
            SocketInner::Stream(_) => SocketKind::Stream,
            SocketInner::Datagram { .. } => SocketKind::Datagram,
        }
    }

    /// The connected peer, or for datagrams the peer replies go to.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            SocketInner::Stream(stream) => stream.peer_addr().ok(),
            SocketInner::Datagram { peer, .. } => *peer,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            SocketInner::Stream(stream) => Ok(stream.local_addr()?),
            SocketInner::Datagram { socket, .. } => Ok(socket.local_addr()?),
        }
    }
}

impl AsRawFd for SocketChannel {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            SocketInner::Stream(stream) => stream.as_raw_fd(),
            SocketInner::Datagram { socket, .. } => socket.as_raw_fd(),
        }
    }
}

impl Transport for SocketChannel {
    fn kind(&self) -> TransportKind {
        self.socket_kind().into()
    }
}

impl RawRead for SocketChannel {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.inner {
            SocketInner::Stream(stream) => match stream.read(buf)? {
                0 if !buf.is_empty() => Err(TransportError::Closed),
                n => Ok(n),
            },
            SocketInner::Datagram { socket, peer } => {
                let (n, from) = socket.recv_from(buf)?;
                if *peer != Some(from) {
                    trace!(%from, "datagram peer changed");
                }
                *peer = Some(from);
                Ok(n)
            }
        }
    }

    fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        Ok(readiness::wait_readable(self.as_raw_fd(), timeout)?)
    }
}

impl RawWrite for SocketChannel {
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.inner {
            SocketInner::Stream(stream) => Ok(stream.write(buf)?),
            SocketInner::Datagram { socket, peer } => {
                let peer = peer.ok_or(TransportError::NoPeer)?;
                Ok(socket.send_to(buf, peer)?)
            }
        }
    }
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketChannel")
            .field("kind", &self.socket_kind())
            .field("role", &self.role)
            .field("fd", &self.as_raw_fd())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

/// A bound server socket.
///
/// Stream listeners hand out one [`SocketChannel`] per accepted connection.
/// Datagram sockets need no accept step: the bound socket itself becomes the
/// channel.
pub struct SocketListener {
    inner: ListenerInner,
    local_addr: SocketAddr,
    _env: EnvironmentGuard,
}

enum ListenerInner {
    Stream(TcpListener),
    Datagram(UdpSocket),
}

impl SocketListener {
    /// Bind `port` on all IPv4 interfaces.
    pub fn bind(port: u16, kind: SocketKind) -> Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), kind)
    }

    /// Bind an explicit local address.
    ///
    /// Address reuse is enabled so a restarted server can rebind right away.
    pub fn bind_addr(addr: SocketAddr, kind: SocketKind) -> Result<Self> {
        let env = EnvironmentGuard::acquire();
        let bind_err = |source| TransportError::Bind { addr, source };

        let (ty, protocol) = match kind {
            SocketKind::Stream => (Type::STREAM, Protocol::TCP),
            SocketKind::Datagram => (Type::DGRAM, Protocol::UDP),
        };
        let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol)).map_err(bind_err)?;
        fdlimit::ensure_capacity(socket.as_raw_fd())?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
        if kind == SocketKind::Stream {
            socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
        }

        let local_addr = socket
            .local_addr()
            .map_err(bind_err)?
            .as_socket()
            .unwrap_or(addr);
        let inner = match kind {
            SocketKind::Stream => ListenerInner::Stream(socket.into()),
            SocketKind::Datagram => ListenerInner::Datagram(socket.into()),
        };

        info!(%local_addr, %kind, "listening");
        Ok(Self {
            inner,
            local_addr,
            _env: env,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn kind(&self) -> SocketKind {
        match self.inner {
            ListenerInner::Stream(_) => SocketKind::Stream,
            ListenerInner::Datagram(_) => SocketKind::Datagram,
        }
    }

    /// Accept the next connection and keep listening.
    ///
    /// With a `timeout`, readiness is checked first so an idle listener
    /// fails with [`TransportError::AcceptTimeout`] instead of blocking.
    /// Datagram listeners return a channel on a duplicate of the bound
    /// socket.
    pub fn accept(&self, timeout: Option<Duration>) -> Result<SocketChannel> {
        match &self.inner {
            ListenerInner::Stream(listener) => accept_stream(listener, timeout),
            ListenerInner::Datagram(socket) => {
                let socket = socket.try_clone().map_err(TransportError::Accept)?;
                fdlimit::ensure_capacity(socket.as_raw_fd())?;
                Ok(SocketChannel::bound_datagram(socket))
            }
        }
    }

    /// Accept one connection and close the listening socket.
    pub fn accept_once(self, timeout: Option<Duration>) -> Result<SocketChannel> {
        let channel = match self.inner {
            ListenerInner::Stream(listener) => accept_stream(&listener, timeout)?,
            ListenerInner::Datagram(socket) => SocketChannel::bound_datagram(socket),
        };
        debug!(local_addr = %self.local_addr, "listener closed after accept");
        Ok(channel)
    }
}

fn accept_stream(listener: &TcpListener, timeout: Option<Duration>) -> Result<SocketChannel> {
    let ready =
        readiness::wait_readable(listener.as_raw_fd(), timeout).map_err(TransportError::Accept)?;
    if !ready {
        return Err(TransportError::AcceptTimeout(timeout.unwrap_or_default()));
    }

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                fdlimit::ensure_capacity(stream.as_raw_fd())?;
                debug!(%peer, fd = stream.as_raw_fd(), "accepted connection");
                return Ok(SocketChannel::accepted(stream));
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::Accept(err)),
        }
    }
}

impl AsRawFd for SocketListener {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            ListenerInner::Stream(listener) => listener.as_raw_fd(),
            ListenerInner::Datagram(socket) => socket.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketListener")
            .field("kind", &self.kind())
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

fn unspecified_like(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}
