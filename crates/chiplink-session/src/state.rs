use std::time::Instant;

use serde::Serialize;

use crate::error::{Result, SessionError};
use crate::events::LinkEvent;

/// Session-wide link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// What the background loops may do to a session.
///
/// Every call names the link generation the loop was started for. A
/// generation is live while the session is `Connected` on that same link;
/// calls against a dead generation are no-ops, so loops left over from an
/// earlier connection can never touch a later one.
pub trait LinkControl: Send + Sync {
    /// True while `generation` is the current, connected link.
    fn is_live(&self, generation: u64) -> bool;

    /// Record inbound activity at `at`.
    fn touch(&self, generation: u64, at: Instant);

    /// Time of the last inbound chunk, or of the connect itself.
    fn last_active(&self, generation: u64) -> Option<Instant>;

    /// Re-send the current outputs without logging them.
    fn resend_silent(&self, generation: u64) -> Result<()>;

    /// Report a link-ending fault and disconnect.
    ///
    /// Only the first report for a live generation has any effect.
    fn fail(&self, generation: u64, fault: &SessionError);

    /// Publish an event to the session's sink.
    fn emit(&self, event: LinkEvent);
}
