use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use chiplink_session::DEFAULT_PORT;
use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod connect;
pub mod device;
pub mod scan;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Look for a controller on the local /24.
    Scan(ScanArgs),
    /// Hold a session and drive outputs from stdin.
    Connect(ConnectArgs),
    /// Push one output frame and exit.
    Send(SendArgs),
    /// Run a simulated controller that prints and ACKs packets.
    Device(DeviceArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Scan(args) => scan::run(args, format),
        Command::Connect(args) => connect::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Device(args) => device::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Controller port to probe.
    #[arg(long, env = "CHIPLINK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Give up after this long (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Scan the /24 around this address instead of the local one.
    #[arg(long, value_name = "IPV4")]
    pub around: Option<Ipv4Addr>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Controller host name or address.
    #[arg(env = "CHIPLINK_HOST", required_unless_present = "scan")]
    pub host: Option<String>,
    /// Controller port.
    #[arg(long, env = "CHIPLINK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Find the controller with a subnet scan; any host given is ignored.
    #[arg(long)]
    pub scan: bool,
    /// Only send when asked (`send`), not after every change.
    #[arg(long)]
    pub no_auto_send: bool,
    /// Shell command run whenever an output is switched on.
    /// CHIPLINK_CHIP and CHIPLINK_BIT are set in its environment.
    #[arg(long, value_name = "CMD")]
    pub on_set_exec: Option<String>,
    /// Socket connect/read/write timeout.
    #[arg(long, default_value = "2s")]
    pub io_timeout: String,
    /// Drop the link after this long without hearing from the controller.
    #[arg(long, default_value = "6s")]
    pub liveness_timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Controller host name or address.
    #[arg(env = "CHIPLINK_HOST")]
    pub host: String,
    /// Controller port.
    #[arg(long, env = "CHIPLINK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Six chip bytes as 12 hex digits, chip 0 first (e.g. 010000000080).
    #[arg(long, short = 'd')]
    pub data: String,
    /// Wait for the controller's ACK before exiting.
    #[arg(long)]
    pub wait_ack: bool,
    /// Connect timeout, and the ACK wait when --wait-ack is set.
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,
    /// Accept packets without answering.
    #[arg(long)]
    pub no_ack: bool,
    /// Exit after this many valid packets.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
    }
}
