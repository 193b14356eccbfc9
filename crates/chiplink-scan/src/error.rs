/// Errors that stop a scan from running at all.
///
/// Finding nothing is not an error; see [`ScanReport::found`](crate::ScanReport::found).
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The local /24 could not be determined.
    #[error("cannot determine local subnet: {0}")]
    LocalAddress(#[from] chiplink_transport::TransportError),

    /// A probe worker could not be started.
    #[error("failed to start probe worker: {0}")]
    Worker(std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
