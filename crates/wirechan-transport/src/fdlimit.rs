//! Open-file table sizing.
//!
//! Every descriptor a channel creates is checked against the process soft
//! limit. When a descriptor lands within [`HEADROOM`] of the limit, the soft
//! limit is raised toward the hard limit so long-running servers do not run
//! into `EMFILE`.

use std::os::fd::RawFd;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// Descriptors kept free below the soft limit before it is raised.
pub const HEADROOM: u64 = 16;

/// Limit value the OS reports for "no limit".
pub const UNLIMITED: u64 = libc::RLIM_INFINITY as u64;

/// Smallest soft limit considered when doubling.
const MIN_GROWTH_BASE: u64 = 64;

/// Soft and hard open-file limits of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLimits {
    pub soft: u64,
    pub hard: u64,
}

struct DescriptorTable {
    limits: Option<DescriptorLimits>,
}

static TABLE: Mutex<DescriptorTable> = Mutex::new(DescriptorTable { limits: None });

/// Read the current limits from the OS.
pub fn descriptor_limits() -> std::io::Result<DescriptorLimits> {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rl` is a valid, writable rlimit struct.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(DescriptorLimits {
        soft: rl.rlim_cur as u64,
        hard: rl.rlim_max as u64,
    })
}

fn set_soft_limit(soft: u64, hard: u64) -> std::io::Result<()> {
    let rl = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: `rl` is a valid rlimit struct that outlives the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rl) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Highest soft limit this platform accepts for the given hard limit.
fn ceiling(hard: u64) -> u64 {
    #[cfg(target_os = "macos")]
    {
        hard.min(libc::OPEN_MAX as u64)
    }
    #[cfg(not(target_os = "macos"))]
    {
        hard
    }
}

/// Make sure the table has room beyond `fd`.
///
/// Raises the soft limit when `fd` is within [`HEADROOM`] of it. Once the
/// hard ceiling is reached nothing more can be done and the call succeeds;
/// the next descriptor allocation fails on its own. A refused raise is a
/// [`TransportError::DescriptorLimit`].
pub fn ensure_capacity(fd: RawFd) -> Result<()> {
    let mut table = TABLE.lock().unwrap_or_else(PoisonError::into_inner);
    let limits = match table.limits {
        Some(limits) => limits,
        None => {
            let limits = descriptor_limits()?;
            table.limits = Some(limits);
            limits
        }
    };

    let fd = u64::try_from(fd).unwrap_or_default();
    let needed = fd.saturating_add(HEADROOM);
    if needed < limits.soft {
        return Ok(());
    }

    let ceiling = ceiling(limits.hard);
    let target = limits
        .soft
        .max(MIN_GROWTH_BASE)
        .saturating_mul(2)
        .max(needed.saturating_add(1))
        .min(ceiling);
    if target <= limits.soft {
        debug!(fd, soft = limits.soft, "descriptor table at hard ceiling");
        return Ok(());
    }

    set_soft_limit(target, limits.hard).map_err(|source| {
        warn!(fd, soft = limits.soft, target, error = %source, "raising open-file limit failed");
        TransportError::DescriptorLimit {
            fd: fd as i64,
            limit: limits.soft,
            source,
        }
    })?;

    debug!(fd, from = limits.soft, to = target, "raised open-file limit");
    table.limits = Some(DescriptorLimits {
        soft: target,
        hard: limits.hard,
    });
    Ok(())
}

/// Limits as last recorded by [`ensure_capacity`], or freshly read.
pub fn tracked_limits() -> std::io::Result<DescriptorLimits> {
    let table = TABLE.lock().unwrap_or_else(PoisonError::into_inner);
    match table.limits {
        Some(limits) => Ok(limits),
        None => descriptor_limits(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_limits() {
        let limits = descriptor_limits().unwrap();
        assert!(limits.soft > 0);
        assert!(limits.soft <= limits.hard);
    }

    #[test]
    fn low_descriptor_needs_no_change() {
        let before = descriptor_limits().unwrap();
        ensure_capacity(0).unwrap();
        let after = descriptor_limits().unwrap();
        assert!(after.soft >= before.soft);
        assert_eq!(after.hard, before.hard);
    }

    #[test]
    fn descriptor_near_limit_raises_soft_limit() {
        let limits = descriptor_limits().unwrap();
        let ceiling = ceiling(limits.hard);
        if limits.soft >= ceiling {
            // Nothing to raise on this machine; the call must still succeed.
            ensure_capacity((limits.soft - 1) as RawFd).unwrap();
            return;
        }

        let fd = limits.soft.saturating_sub(HEADROOM / 2);
        ensure_capacity(fd as RawFd).unwrap();
        let raised = descriptor_limits().unwrap();
        assert!(raised.soft > fd + HEADROOM / 2 || raised.soft == ceiling);
        assert!(raised.soft <= raised.hard);
    }

    #[test]
    fn many_open_descriptors_stay_usable() {
        let before = descriptor_limits().unwrap();
        let files: Vec<std::fs::File> = (0..64)
            .map(|_| std::fs::File::open("/dev/null").unwrap())
            .collect();
        for file in &files {
            use std::os::fd::AsRawFd;
            ensure_capacity(file.as_raw_fd()).unwrap();
        }
        assert!(descriptor_limits().unwrap().soft >= before.soft);
    }
}
