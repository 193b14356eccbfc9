//! Local subnet discovery for chiplink controllers.
//!
//! Probes every host of the local /24 for an open controller port and
//! reports the first one that answers. Probes run on a bounded worker pool
//! and are launched in small batches so a busy LAN is not flooded.

pub mod config;
pub mod error;
pub mod scanner;

pub use config::ScanConfig;
pub use error::{Result, ScanError};
pub use scanner::{candidates, AddressScanner, Prober, ScanReport, TcpProber};
