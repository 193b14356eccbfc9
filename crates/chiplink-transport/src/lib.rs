//! TCP transport for chiplink output controllers.
//!
//! Provides the raw stream plumbing the rest of chiplink builds on:
//! - connecting to a controller with a bounded connect timeout
//! - single-shot reachability probes used by subnet discovery
//! - resolving the outward-facing local IPv4 address
//! - a listener for the device simulator
//!
//! This is the lowest layer of chiplink. Everything else builds on top of
//! the [`LinkStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::LinkStream;
pub use tcp::{local_ipv4, probe, resolve, DeviceListener, TcpTransport};
