use std::time::Duration;

use crate::state::ConnectionState;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Opening the controller socket failed.
    #[error("connect failed: {0}")]
    Connect(#[from] chiplink_transport::TransportError),

    /// Writing a packet failed mid-session.
    #[error("send failed: {0}")]
    Send(chiplink_frame::FrameError),

    /// An output address or packet could not be built.
    #[error("invalid output: {0}")]
    Output(#[from] chiplink_frame::FrameError),

    /// A socket-level read error ended the link.
    #[error("connection lost: {0}")]
    ReceiveFault(std::io::Error),

    /// The controller performed an orderly close.
    #[error("controller closed the connection")]
    PeerClosed,

    /// Nothing was received for longer than the liveness limit.
    #[error("heartbeat timeout ({:.1}s > {}s)", .elapsed.as_secs_f64(), .limit.as_secs())]
    LivenessTimeout { elapsed: Duration, limit: Duration },

    /// The operation needs a connected session.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a link is open or being opened.
    #[error("session is already {0}")]
    AlreadyActive(ConnectionState),

    /// `disconnect` was called while the connect was still in flight.
    #[error("connect cancelled by disconnect")]
    Cancelled,

    /// A background loop could not be started.
    #[error("failed to start worker thread: {0}")]
    Worker(std::io::Error),
}

impl SessionError {
    /// Short headline for the user-facing warning raised by link-ending faults.
    pub fn warning_title(&self) -> &'static str {
        match self {
            SessionError::Send(_) => "send failed",
            SessionError::LivenessTimeout { .. } => "connection timed out",
            SessionError::ReceiveFault(_) | SessionError::PeerClosed => "connection lost",
            _ => "link error",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
