//! Process environment shared by all channels.
//!
//! The first live channel sets the environment up and the last one to go
//! away restores it. On Unix the environment is the `SIGPIPE` disposition:
//! while channels exist it is ignored, so writing to a vanished peer
//! surfaces as an `EPIPE` error instead of killing the process.

use std::sync::{Mutex, PoisonError};

use tracing::debug;

struct EnvironmentState {
    refs: usize,
    #[cfg(unix)]
    previous_sigpipe: Option<libc::sighandler_t>,
}

static ENVIRONMENT: Mutex<EnvironmentState> = Mutex::new(EnvironmentState {
    refs: 0,
    #[cfg(unix)]
    previous_sigpipe: None,
});

/// Reference-counted hold on the shared environment.
///
/// Every transport owns one; dropping the last guard restores the
/// environment.
#[derive(Debug)]
pub struct EnvironmentGuard {
    _private: (),
}

impl EnvironmentGuard {
    pub fn acquire() -> Self {
        let mut state = ENVIRONMENT.lock().unwrap_or_else(PoisonError::into_inner);
        if state.refs == 0 {
            init_environment(&mut state);
        }
        state.refs += 1;
        Self { _private: () }
    }

    /// Number of guards currently alive.
    pub fn active() -> usize {
        ENVIRONMENT
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refs
    }
}

impl Clone for EnvironmentGuard {
    fn clone(&self) -> Self {
        Self::acquire()
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        let mut state = ENVIRONMENT.lock().unwrap_or_else(PoisonError::into_inner);
        state.refs = state.refs.saturating_sub(1);
        if state.refs == 0 {
            restore_environment(&mut state);
        }
    }
}

#[cfg(unix)]
fn init_environment(state: &mut EnvironmentState) {
    // SAFETY: installing SIG_IGN for SIGPIPE has no preconditions.
    let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    state.previous_sigpipe = (previous != libc::SIG_ERR).then_some(previous);
    debug!("channel environment initialized");
}

#[cfg(unix)]
fn restore_environment(state: &mut EnvironmentState) {
    if let Some(previous) = state.previous_sigpipe.take() {
        // SAFETY: `previous` was returned by signal(2) for this same signal.
        unsafe {
            libc::signal(libc::SIGPIPE, previous);
        }
    }
    debug!("channel environment restored");
}

#[cfg(not(unix))]
fn init_environment(_state: &mut EnvironmentState) {
    debug!("channel environment initialized");
}

#[cfg(not(unix))]
fn restore_environment(_state: &mut EnvironmentState) {
    debug!("channel environment restored");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sigpipe_disposition() -> libc::sighandler_t {
        // SAFETY: a zeroed sigaction is a valid out-parameter and a null
        // `act` only queries the current disposition.
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGPIPE, std::ptr::null(), &mut current);
            current.sa_sigaction
        }
    }

    #[test]
    fn sigpipe_ignored_while_guard_held() {
        let guard = EnvironmentGuard::acquire();
        assert_eq!(sigpipe_disposition(), libc::SIG_IGN);
        assert!(EnvironmentGuard::active() >= 1);
        drop(guard);
    }

    #[test]
    fn nested_guards_keep_environment() {
        let outer = EnvironmentGuard::acquire();
        let inner = outer.clone();
        drop(outer);
        assert_eq!(sigpipe_disposition(), libc::SIG_IGN);
        assert!(EnvironmentGuard::active() >= 1);
        drop(inner);
    }
}
