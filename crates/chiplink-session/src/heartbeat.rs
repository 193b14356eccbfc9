use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::LinkEvent;
use crate::state::LinkControl;

/// What a quiet period calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Idle,
    Keepalive,
    Timeout,
}

/// Result of one watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Keepalive,
    TimedOut,
    /// The link is gone; the monitor does nothing more.
    Stopped,
}

/// Liveness watchdog for one link generation.
///
/// Ticks once per interval. Quiet for more than `keepalive_after`: re-send
/// the outputs silently to provoke an ACK. Quiet for more than
/// `liveness_timeout`: drop the link and stop.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    generation: u64,
    interval: Duration,
    keepalive_after: Duration,
    liveness_timeout: Duration,
    stopped: bool,
}

impl HeartbeatMonitor {
    pub fn new(generation: u64, config: &SessionConfig) -> Self {
        Self {
            generation,
            interval: config.heartbeat_interval,
            keepalive_after: config.keepalive_after,
            liveness_timeout: config.liveness_timeout,
            stopped: false,
        }
    }

    pub fn evaluate(&self, elapsed: Duration) -> Verdict {
        if elapsed > self.liveness_timeout {
            Verdict::Timeout
        } else if elapsed > self.keepalive_after {
            Verdict::Keepalive
        } else {
            Verdict::Idle
        }
    }

    /// Evaluate the link as of `now`.
    pub fn tick<L: LinkControl + ?Sized>(&mut self, link: &L, now: Instant) -> TickOutcome {
        if self.stopped {
            return TickOutcome::Stopped;
        }
        let last_active = match link.last_active(self.generation) {
            Some(at) if link.is_live(self.generation) => at,
            _ => {
                self.stopped = true;
                return TickOutcome::Stopped;
            }
        };

        let elapsed = now.saturating_duration_since(last_active);
        match self.evaluate(elapsed) {
            Verdict::Idle => TickOutcome::Idle,
            Verdict::Keepalive => {
                if let Err(err) = link.resend_silent(self.generation) {
                    // A failed write already dropped the link.
                    debug!(generation = self.generation, error = %err, "keepalive not sent");
                }
                TickOutcome::Keepalive
            }
            Verdict::Timeout => {
                warn!(
                    generation = self.generation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "liveness timeout"
                );
                self.stopped = true;
                link.fail(
                    self.generation,
                    &SessionError::LivenessTimeout {
                        elapsed,
                        limit: self.liveness_timeout,
                    },
                );
                TickOutcome::TimedOut
            }
        }
    }

    /// Tick every interval until the link goes away.
    pub fn run<L: LinkControl + ?Sized>(mut self, link: &L) {
        link.emit(LinkEvent::log(format!(
            "watchdog started (timeout {}s)",
            self.liveness_timeout.as_secs_f32()
        )));
        loop {
            std::thread::sleep(self.interval);
            match self.tick(link, Instant::now()) {
                TickOutcome::Stopped | TickOutcome::TimedOut => break,
                TickOutcome::Idle | TickOutcome::Keepalive => {}
            }
        }
        debug!(generation = self.generation, "watchdog stopped");
    }
}
