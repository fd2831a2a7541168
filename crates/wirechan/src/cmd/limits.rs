use wirechan_transport::fdlimit::{tracked_limits, HEADROOM, UNLIMITED};

use crate::cmd::LimitsArgs;
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_limits, LimitsReport, OutputFormat};

pub fn run(_args: LimitsArgs, format: OutputFormat) -> CliResult<i32> {
    let limits = tracked_limits().map_err(|err| io_error("reading open-file limits failed", err))?;
    let report = LimitsReport {
        soft: finite(limits.soft),
        hard: finite(limits.hard),
        headroom: HEADROOM,
    };
    print_limits(&report, format);
    Ok(SUCCESS)
}

fn finite(limit: u64) -> Option<u64> {
    (limit != UNLIMITED).then_some(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinity_is_unlimited() {
        assert_eq!(finite(UNLIMITED), None);
        assert_eq!(finite(4096), Some(4096));
    }
}
