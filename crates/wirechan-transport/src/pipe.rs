use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::debug;

use crate::env::EnvironmentGuard;
use crate::error::{Result, TransportError};
use crate::fdlimit;
use crate::readiness;
use crate::traits::{RawRead, RawWrite, Transport, TransportKind};

/// Read end of a local pipe.
pub struct PipeReader {
    file: File,
    _env: EnvironmentGuard,
}

/// Write end of a local pipe.
pub struct PipeWriter {
    file: File,
    _env: EnvironmentGuard,
}

/// Create a fresh pipe and return its read end and companion write end.
///
/// Both descriptors are close-on-exec.
pub fn pipe_pair() -> Result<(PipeReader, PipeWriter)> {
    let [read_fd, write_fd] = create_pipe()?;
    // SAFETY: both descriptors were just returned by pipe(2) and are owned by
    // nothing else.
    let (read_end, write_end) =
        unsafe { (OwnedFd::from_raw_fd(read_fd), OwnedFd::from_raw_fd(write_fd)) };

    fdlimit::ensure_capacity(read_fd)?;
    fdlimit::ensure_capacity(write_fd)?;
    debug!(read_fd, write_fd, "created pipe");

    Ok((PipeReader::from_fd(read_end), PipeWriter::from_fd(write_end)))
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn create_pipe() -> Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: `fds` is a writable array of two descriptors.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    Ok(fds)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn create_pipe() -> Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: `fds` is a writable array of two descriptors.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    for fd in fds {
        if let Err(err) = set_cloexec(fd) {
            // SAFETY: both descriptors are open and owned here.
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    Ok(fds)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` is an open descriptor; F_GETFD/F_SETFD take no pointers.
    let rc = unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            flags
        } else {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC)
        }
    };
    if rc < 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

impl PipeReader {
    /// Wrap an inherited or explicitly passed read descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            _env: EnvironmentGuard::acquire(),
        }
    }
}

impl PipeWriter {
    /// Wrap an inherited or explicitly passed write descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            _env: EnvironmentGuard::acquire(),
        }
    }
}

impl FromRawFd for PipeReader {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: the caller guarantees `fd` is open and exclusively owned.
        Self::from_fd(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

impl FromRawFd for PipeWriter {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: the caller guarantees `fd` is open and exclusively owned.
        Self::from_fd(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<PipeReader> for OwnedFd {
    fn from(reader: PipeReader) -> Self {
        reader.file.into()
    }
}

impl From<PipeWriter> for OwnedFd {
    fn from(writer: PipeWriter) -> Self {
        writer.file.into()
    }
}

impl Transport for PipeReader {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }
}

impl Transport for PipeWriter {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }
}

impl RawRead for PipeReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.read(buf)? {
            0 if !buf.is_empty() => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        Ok(readiness::wait_readable(self.as_raw_fd(), timeout)?)
    }
}

impl RawWrite for PipeWriter {
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}
