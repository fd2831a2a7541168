use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::readiness::Deadline;

/// How bytes travel between the two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Connected byte stream (TCP).
    Stream,
    /// Connectionless datagrams (UDP).
    Datagram,
    /// One end of a local pipe.
    Pipe,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stream => "stream",
            TransportKind::Datagram => "datagram",
            TransportKind::Pipe => "pipe",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Socket flavor requested when connecting or listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Stream,
    Datagram,
}

impl From<SocketKind> for TransportKind {
    fn from(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Stream => TransportKind::Stream,
            SocketKind::Datagram => TransportKind::Datagram,
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        TransportKind::from(*self).fmt(f)
    }
}

/// Which side of the connection lifecycle produced a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created by connecting out.
    Client,
    /// Created by a listener (accepted stream or bound datagram socket).
    Server,
    /// A local pipe end.
    Local,
}

/// Common surface of every transport.
pub trait Transport {
    fn kind(&self) -> TransportKind;
}

/// Receive half of a transport.
///
/// Implementors supply a single OS-level receive and a readiness check;
/// [`RawRead::receive`] builds the deadline-bounded loop on top of them.
pub trait RawRead: Transport {
    /// Perform one receive into `buf`.
    ///
    /// Stream and pipe transports report a zero-byte read as
    /// [`TransportError::Closed`]. Datagram transports return at most one
    /// datagram per call, and `Ok(0)` for an empty datagram.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Wait until a receive would not block.
    ///
    /// `None` means no deadline: the transport is assumed ready and the caller
    /// goes straight to the blocking receive.
    fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Receive into `buf`, bounded by `timeout` over the whole request.
    ///
    /// With `read_everything` the call keeps receiving until `buf` is full;
    /// otherwise it returns after the first non-empty receive. Returns the
    /// number of bytes placed in `buf`.
    fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        read_everything: bool,
    ) -> Result<usize> {
        let deadline = Deadline::after(timeout);
        let mut received = 0usize;

        while received < buf.len() {
            if !self.poll_readable(deadline.remaining())? {
                return Err(TransportError::Timeout {
                    timeout: timeout.unwrap_or_default(),
                    wanted: buf.len(),
                    received,
                });
            }

            let read = match self.read_raw(&mut buf[received..]) {
                Ok(n) => n,
                Err(TransportError::Io(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            received += read;

            if !read_everything && read > 0 {
                break;
            }
        }

        Ok(received)
    }
}

/// Transmit half of a transport.
pub trait RawWrite: Transport {
    /// Perform one send of (a prefix of) `buf`, returning the bytes accepted.
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize>;

    /// Push any user-space buffered bytes to the OS.
    fn flush_raw(&mut self) -> Result<()> {
        Ok(())
    }

    /// Send all of `buf`, retrying interrupted and short writes.
    fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < buf.len() {
            match self.write_raw(&buf[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(TransportError::Io(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
