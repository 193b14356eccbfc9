use std::fmt;
use std::io;

use chiplink_frame::FrameError;
use chiplink_scan::ScanError;
use chiplink_session::SessionError;
use chiplink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// A scan finished without finding a controller.
pub const NOT_FOUND: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Resolve { .. } => CliError::usage(format!("{context}: {err}")),
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::LocalAddress(source)
        | TransportError::Io(source) => io_error(context, source),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::OutOfRange { .. } => CliError::usage(format!("{context}: {err}")),
        FrameError::InvalidSync(..)
        | FrameError::ChecksumMismatch { .. }
        | FrameError::InvalidLength { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Connect(err) => transport_error(context, err),
        SessionError::Send(err) | SessionError::Output(err) => frame_error(context, err),
        SessionError::ReceiveFault(err) => io_error(context, err),
        SessionError::LivenessTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::AlreadyActive(_) => CliError::usage(format!("{context}: {err}")),
        SessionError::Worker(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        SessionError::PeerClosed | SessionError::NotConnected | SessionError::Cancelled => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn scan_error(context: &str, err: ScanError) -> CliError {
    match err {
        ScanError::LocalAddress(err) => transport_error(context, err),
        ScanError::Worker(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn refused_connect_is_a_transport_error() {
        let err = session_error(
            "connect failed",
            SessionError::Connect(TransportError::Connect {
                addr: "127.0.0.1:9".parse().unwrap(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: "));
    }

    #[test]
    fn connect_timeout_maps_to_124() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                addr: "10.0.0.1:8080".parse().unwrap(),
                source: io::Error::from(io::ErrorKind::TimedOut),
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn unresolvable_host_is_a_usage_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Resolve {
                host: "nope".into(),
                port: 8080,
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn liveness_timeout_maps_to_124() {
        let err = session_error(
            "link lost",
            SessionError::LivenessTimeout {
                elapsed: Duration::from_millis(6500),
                limit: Duration::from_secs(6),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert_eq!(err.message, "link lost: heartbeat timeout (6.5s > 6s)");
    }

    #[test]
    fn out_of_range_output_is_a_usage_error() {
        let err = frame_error("bad output", FrameError::OutOfRange { chip: 6, bit: 0 });
        assert_eq!(err.code, USAGE);
    }
}
