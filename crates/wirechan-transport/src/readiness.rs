//! Readiness checks with deadlines.
//!
//! Waits are implemented with `poll(2)` rather than `select(2)`, so there is
//! no `FD_SETSIZE` ceiling on the descriptor numbers that can be watched.

use std::time::{Duration, Instant};

/// Millisecond sentinel meaning "block without a deadline".
pub const WAIT_FOREVER_MS: i64 = -1;

/// Convert a millisecond timeout into the internal form.
///
/// Any negative value means no deadline.
pub fn timeout_from_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}

/// A point in time a multi-step operation must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now; `None` never expires.
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    /// Time left before the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_unbounded(&self) -> bool {
        self.at.is_none()
    }
}

/// Wait until `fd` is readable or the timeout elapses.
///
/// Returns `Ok(true)` when ready, `Ok(false)` on timeout. Hang-up and error
/// conditions count as ready: the following read reports them.
#[cfg(unix)]
pub fn wait_readable(fd: std::os::fd::RawFd, timeout: Option<Duration>) -> std::io::Result<bool> {
    wait_for(fd, libc::POLLIN, timeout)
}

#[cfg(unix)]
fn wait_for(
    fd: std::os::fd::RawFd,
    events: libc::c_short,
    timeout: Option<Duration>,
) -> std::io::Result<bool> {
    let Some(timeout) = timeout else {
        return Ok(true);
    };
    let deadline = Deadline::after(Some(timeout));

    loop {
        let remaining = deadline.remaining().unwrap_or_default();
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, poll_millis(remaining)) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(std::io::Error::from_raw_os_error(libc::EBADF));
        }
        return Ok(true);
    }
}

/// Round up to whole milliseconds so short waits are not turned into spins.
#[cfg(unix)]
fn poll_millis(remaining: Duration) -> libc::c_int {
    let mut millis = remaining.as_millis();
    if millis == 0 && !remaining.is_zero() {
        millis = 1;
    }
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn negative_millis_mean_no_deadline() {
        assert_eq!(timeout_from_millis(WAIT_FOREVER_MS), None);
        assert_eq!(timeout_from_millis(-42), None);
        assert_eq!(timeout_from_millis(0), Some(Duration::ZERO));
        assert_eq!(timeout_from_millis(250), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_timeout_without_data_is_not_ready() {
        let (left, _right) = UnixStream::pair().unwrap();
        let start = Instant::now();
        let ready = wait_readable(left.as_raw_fd(), Some(Duration::ZERO)).unwrap();
        assert!(!ready);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn no_deadline_reports_ready_without_polling() {
        let (left, _right) = UnixStream::pair().unwrap();
        assert!(wait_readable(left.as_raw_fd(), None).unwrap());
    }

    #[test]
    fn pending_data_is_ready() {
        let (left, mut right) = UnixStream::pair().unwrap();
        right.write_all(b"x").unwrap();
        assert!(wait_readable(left.as_raw_fd(), Some(Duration::from_millis(100))).unwrap());
    }

    #[test]
    fn short_timeout_elapses() {
        let (left, _right) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!wait_readable(left.as_raw_fd(), Some(Duration::from_millis(30))).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn peer_hangup_counts_as_ready() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        assert!(wait_readable(left.as_raw_fd(), Some(Duration::from_millis(100))).unwrap());
    }

    #[test]
    fn deadline_remaining_saturates() {
        let deadline = Deadline::after(Some(Duration::ZERO));
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(Deadline::after(None).is_unbounded());
    }
}
