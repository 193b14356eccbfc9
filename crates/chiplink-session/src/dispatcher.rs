use std::io::{ErrorKind, Read};
use std::time::Instant;

use chiplink_frame::{classify, hex_dump, Inbound};
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::LinkEvent;
use crate::state::LinkControl;

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The link was closed from elsewhere.
    Stopped,
    /// The controller closed its end.
    PeerClosed,
    /// A socket-level read error.
    Fault,
}

/// Reads inbound chunks for one link generation.
///
/// Reads are bounded by the stream's read timeout, so a disconnect issued
/// elsewhere is noticed within one timeout period.
pub struct ReceiveDispatcher<R> {
    reader: R,
    generation: u64,
    chunk_size: usize,
}

impl<R: Read> ReceiveDispatcher<R> {
    pub fn new(reader: R, generation: u64, config: &SessionConfig) -> Self {
        Self {
            reader,
            generation,
            chunk_size: config.read_chunk_size.max(1),
        }
    }

    /// Run until the link generation is no longer live.
    pub fn run<L: LinkControl + ?Sized>(mut self, link: &L) -> DispatchExit {
        let generation = self.generation;
        link.emit(LinkEvent::log("receive loop started"));
        let mut buf = vec![0u8; self.chunk_size];

        while link.is_live(generation) {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    if !link.is_live(generation) {
                        break;
                    }
                    debug!(generation, "controller closed the connection");
                    link.fail(generation, &SessionError::PeerClosed);
                    return DispatchExit::PeerClosed;
                }
                Ok(n) => {
                    link.touch(generation, Instant::now());
                    Self::dispatch(link, &buf[..n]);
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    trace!(generation, "read timeout");
                    continue;
                }
                Err(err) => {
                    if !link.is_live(generation) {
                        break;
                    }
                    debug!(generation, error = %err, "read failed");
                    link.fail(generation, &SessionError::ReceiveFault(err));
                    return DispatchExit::Fault;
                }
            }
        }

        DispatchExit::Stopped
    }

    fn dispatch<L: LinkControl + ?Sized>(link: &L, chunk: &[u8]) {
        match classify(chunk) {
            Inbound::Ack => {
                debug!(size = chunk.len(), "ack received");
                link.emit(LinkEvent::Ack);
            }
            Inbound::Data(bytes) => {
                let hex = hex_dump(&bytes);
                debug!(%hex, "data received");
                link.emit(LinkEvent::Data { hex });
            }
        }
    }
}
