use chiplink_scan::{AddressScanner, ScanConfig, ScanReport};

use crate::cmd::{parse_duration, ScanArgs};
use crate::exit::{scan_error, CliError, CliResult, NOT_FOUND, SUCCESS};
use crate::output::{print_scan, OutputFormat};

pub fn run(args: ScanArgs, format: OutputFormat) -> CliResult<i32> {
    let report = discover(&args)?;
    print_scan(&report, format);
    Ok(if report.found.is_some() {
        SUCCESS
    } else {
        NOT_FOUND
    })
}

/// Run a scan as configured by `args`.
pub(crate) fn discover(args: &ScanArgs) -> CliResult<ScanReport> {
    let config = ScanConfig {
        overall_timeout: parse_duration(&args.timeout)?,
        ..ScanConfig::default()
    };
    let scanner = AddressScanner::new(config);
    let report = match args.around {
        Some(local) => scanner.scan_subnet(local, args.port),
        None => scanner.scan(args.port),
    };
    report.map_err(|err| scan_error("scan failed", err))
}

/// Scan and insist on a hit; used by `connect --scan`.
pub(crate) fn require_controller(args: &ScanArgs) -> CliResult<String> {
    let report = discover(args)?;
    report.found.map(|ip| ip.to_string()).ok_or_else(|| {
        CliError::new(
            NOT_FOUND,
            format!(
                "no controller answered on port {} in {}/24",
                report.port, report.local
            ),
        )
    })
}
