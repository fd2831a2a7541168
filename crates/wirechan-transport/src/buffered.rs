use std::io::ErrorKind;
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::warn;

use crate::error::{Result, TransportError};
use crate::traits::{RawRead, RawWrite, Transport, TransportKind};

/// Default size of each user-space buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Configuration for [`Buffered`].
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Bytes held before a write is pushed through and the size of each
    /// refill read.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// User-space buffering over a socket or pipe transport.
///
/// Writes collect in memory and reach the OS on [`RawWrite::flush_raw`],
/// when the buffer fills, or when the wrapper is dropped. Reads are
/// served from already-buffered bytes before the OS is asked for more, and
/// readiness reports ready while unread bytes remain.
///
/// Over datagrams, one refill read holds one whole datagram and a flush
/// sends the collected writes as one datagram, so both ends of a datagram
/// conversation should agree on buffering.
pub struct Buffered<T> {
    inner: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    capacity: usize,
    // Set by the first buffered write; `Drop` cannot require `T: RawWrite`.
    drain_on_drop: Option<DrainFn<T>>,
}

type DrainFn<T> = fn(&mut T, &mut BytesMut) -> Result<()>;

impl<T> Buffered<T> {
    /// Wrap `inner` with buffers of [`DEFAULT_BUFFER_CAPACITY`] bytes.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, BufferConfig::default())
    }

    /// Wrap `inner` with buffers sized by `config`.
    pub fn with_config(inner: T, config: BufferConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            inner,
            read_buf: BytesMut::with_capacity(capacity),
            write_buf: BytesMut::with_capacity(capacity),
            capacity,
            drain_on_drop: None,
        }
    }

    /// Unread bytes held in the read buffer.
    pub fn buffered_len(&self) -> usize {
        self.read_buf.len()
    }

    /// Written bytes not yet handed to the OS.
    pub fn pending_write_len(&self) -> usize {
        self.write_buf.len()
    }

    /// Size of each buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The wrapped transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// The wrapped transport. Reading or writing through it bypasses the
    /// buffers.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: RawWrite> Buffered<T> {
    fn drain_write_buf(&mut self) -> Result<()> {
        drain(&mut self.inner, &mut self.write_buf)
    }
}

fn drain<T: RawWrite>(inner: &mut T, pending: &mut BytesMut) -> Result<()> {
    while !pending.is_empty() {
        match inner.write_raw(pending) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => pending.advance(n),
            Err(TransportError::Io(err)) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

impl<T> Drop for Buffered<T> {
    fn drop(&mut self) {
        if self.write_buf.is_empty() {
            return;
        }
        if let Some(drain) = self.drain_on_drop {
            if let Err(err) = drain(&mut self.inner, &mut self.write_buf) {
                warn!(error = %err, pending = self.write_buf.len(), "unflushed bytes lost on drop");
            }
        }
    }
}

impl<T: Transport> Transport for Buffered<T> {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }
}

impl<T: RawRead> RawRead for Buffered<T> {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.read_buf.is_empty() {
            // Large reads skip the copy through the buffer.
            if buf.len() >= self.capacity {
                return self.inner.read_raw(buf);
            }

            self.read_buf.resize(self.capacity, 0);
            match self.inner.read_raw(&mut self.read_buf[..]) {
                Ok(n) => self.read_buf.truncate(n),
                Err(err) => {
                    self.read_buf.clear();
                    return Err(err);
                }
            }
        }

        let n = buf.len().min(self.read_buf.len());
        buf[..n].copy_from_slice(&self.read_buf[..n]);
        self.read_buf.advance(n);
        Ok(n)
    }

    fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !self.read_buf.is_empty() {
            return Ok(true);
        }
        self.inner.poll_readable(timeout)
    }
}

impl<T: RawWrite> RawWrite for Buffered<T> {
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        if self.write_buf.len() + buf.len() > self.capacity {
            self.drain_write_buf()?;
        }
        if buf.len() >= self.capacity {
            return self.inner.write_raw(buf);
        }
        self.drain_on_drop = Some(drain::<T>);
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush_raw(&mut self) -> Result<()> {
        self.drain_write_buf()?;
        self.inner.flush_raw()
    }
}

#[cfg(unix)]
impl<T: AsRawFd> AsRawFd for Buffered<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Buffered<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffered")
            .field("inner", &self.inner)
            .field("buffered", &self.read_buf.len())
            .field("pending_write", &self.write_buf.len())
            .finish()
    }
}
