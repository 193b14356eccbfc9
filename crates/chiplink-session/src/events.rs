use std::sync::mpsc;
use std::sync::Arc;

use chiplink_frame::BitAddress;
use serde::Serialize;
use tracing::{debug, warn};

use crate::state::ConnectionState;

/// Something the operator-facing layer should render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    /// A human-readable log line.
    Log { message: String },
    /// A fault worth interrupting the operator for.
    Warning { title: String, message: String },
    /// The session moved to a new state.
    State { state: ConnectionState },
    /// The controller acknowledged a packet.
    Ack,
    /// Inbound bytes that were not an ACK.
    Data { hex: String },
    /// An output changed from off to on.
    OutputSet { chip: usize, bit: usize },
}

impl LinkEvent {
    pub fn log(message: impl Into<String>) -> Self {
        LinkEvent::Log {
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        LinkEvent::Warning {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Receiver of [`LinkEvent`]s. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LinkEvent);
}

impl EventSink for mpsc::Sender<LinkEvent> {
    fn emit(&self, event: LinkEvent) {
        // A dropped receiver just means nobody is rendering any more.
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: LinkEvent) {}
}

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Downstream automation notified when an output is switched on.
///
/// Best effort: an error is logged and never affects the control link.
pub trait OutputObserver: Send + Sync {
    fn on_output_set(&self, addr: BitAddress) -> std::result::Result<(), ObserverError>;
}

impl<F> OutputObserver for F
where
    F: Fn(BitAddress) -> std::result::Result<(), ObserverError> + Send + Sync,
{
    fn on_output_set(&self, addr: BitAddress) -> std::result::Result<(), ObserverError> {
        self(addr)
    }
}

/// Delivers output-set notifications on a dedicated thread.
///
/// Callers hand off an address and return immediately; the observer runs
/// detached and its outcome is only ever logged.
pub struct OutputNotifier {
    tx: mpsc::Sender<BitAddress>,
}

impl OutputNotifier {
    /// Start the delivery thread.
    pub fn spawn(
        observer: Arc<dyn OutputObserver>,
        events: Arc<dyn EventSink>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<BitAddress>();
        std::thread::Builder::new()
            .name("chiplink-notify".to_string())
            .spawn(move || {
                for addr in rx {
                    events.emit(LinkEvent::OutputSet {
                        chip: addr.chip(),
                        bit: addr.bit(),
                    });
                    match observer.on_output_set(addr) {
                        Ok(()) => debug!(chip = addr.chip(), bit = addr.bit(), "output trigger ran"),
                        Err(err) => {
                            warn!(chip = addr.chip(), bit = addr.bit(), error = %err, "output trigger failed");
                            events.emit(LinkEvent::log(format!("output trigger failed for {addr}: {err}")));
                        }
                    }
                }
            })?;
        Ok(Self { tx })
    }

    /// Queue a notification. Never blocks.
    pub fn notify(&self, addr: BitAddress) {
        if self.tx.send(addr).is_err() {
            warn!(%addr, "output notifier thread is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (tx, rx) = mpsc::channel();
        tx.emit(LinkEvent::Ack);
        assert_eq!(rx.recv().unwrap(), LinkEvent::Ack);
    }

    #[test]
    fn channel_sink_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        tx.emit(LinkEvent::log("nobody listening"));
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(LinkEvent::State {
            state: ConnectionState::Connected,
        })
        .unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["state"], "connected");

        let json = serde_json::to_value(LinkEvent::warning("connection lost", "peer closed")).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["title"], "connection lost");
    }

    #[test]
    fn notifier_delivers_and_logs_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_observer = Arc::clone(&seen);
        let observer = move |addr: BitAddress| -> std::result::Result<(), ObserverError> {
            seen_by_observer.lock().unwrap().push(addr);
            if addr.chip() == 5 {
                return Err("programmer window not found".into());
            }
            Ok(())
        };

        let (tx, rx) = mpsc::channel();
        let notifier = OutputNotifier::spawn(Arc::new(observer), Arc::new(tx)).unwrap();
        notifier.notify(BitAddress::new(0, 1).unwrap());
        notifier.notify(BitAddress::new(5, 7).unwrap());

        let mut events = Vec::new();
        while events.len() < 3 {
            events.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        }

        assert_eq!(events[0], LinkEvent::OutputSet { chip: 0, bit: 1 });
        assert_eq!(events[1], LinkEvent::OutputSet { chip: 5, bit: 7 });
        assert!(matches!(&events[2], LinkEvent::Log { message } if message.contains("programmer window not found")));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
