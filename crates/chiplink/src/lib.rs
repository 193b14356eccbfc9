//! Drive a LAN-attached 6x8 output controller over TCP.
//!
//! The controller exposes 48 digital outputs (6 chips of 8 bits) and accepts
//! fixed 10-byte packets carrying the full output state. This crate ties the
//! pieces together:
//!
//! - [`transport`]: TCP connect, probing and a listener for simulated devices
//! - [`frame`]: the output matrix and the packet codec
//! - [`session`]: connection lifecycle, receive loop and liveness watchdog
//! - [`scan`]: local subnet discovery (behind the `scan` feature)

/// Re-export transport types.
pub mod transport {
    pub use chiplink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chiplink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use chiplink_session::*;
}

/// Re-export discovery types (requires `scan` feature).
#[cfg(feature = "scan")]
pub mod scan {
    pub use chiplink_scan::*;
}
