use std::time::Duration;

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Connect timeout per attempt; one attempt per entry. Default: 200ms, 400ms.
    pub probe_timeouts: Vec<Duration>,
    /// Probes queued before pausing. Default: 20.
    pub batch_size: usize,
    /// Pause between batches. Default: 100ms.
    pub batch_pause: Duration,
    /// Upper bound on the whole scan. Default: 10s.
    pub overall_timeout: Duration,
    /// How often the result slot is checked. Default: 100ms.
    pub poll_interval: Duration,
    /// Probe worker threads. Default: 64.
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_timeouts: vec![Duration::from_millis(200), Duration::from_millis(400)],
            batch_size: 20,
            batch_pause: Duration::from_millis(100),
            overall_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            workers: 64,
        }
    }
}
