//! Connection lifecycle, receive loop and liveness watchdog for chiplink
//! controllers.
//!
//! A [`ConnectionSession`] owns the single TCP link to a controller. While it
//! is connected two background loops run against shared session state:
//! - the [`ReceiveDispatcher`] reads inbound chunks and refreshes liveness
//! - the [`HeartbeatMonitor`] re-sends the current outputs when the link goes
//!   quiet and drops it when it stays quiet too long
//!
//! Every fault that makes the link unusable funnels into the session's one
//! idempotent disconnect path.

pub mod board;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod panel;
pub mod session;
pub mod state;

pub use board::{BitBoard, BitSource};
pub use config::{SessionConfig, DEFAULT_PORT};
pub use dispatcher::{DispatchExit, ReceiveDispatcher};
pub use error::{Result, SessionError};
pub use events::{EventSink, LinkEvent, NullSink, ObserverError, OutputNotifier, OutputObserver};
pub use heartbeat::{HeartbeatMonitor, TickOutcome, Verdict};
pub use panel::ControlPanel;
pub use session::{ConnectionSession, SendMode};
pub use state::{ConnectionState, LinkControl};
