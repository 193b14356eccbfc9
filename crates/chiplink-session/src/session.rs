use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use chiplink_frame::{encode_with_cmd, hex_dump, BitMatrix, PacketWriter};
use chiplink_transport::{LinkStream, TcpTransport};
use tracing::{debug, info, trace, warn};

use crate::board::BitSource;
use crate::config::SessionConfig;
use crate::dispatcher::ReceiveDispatcher;
use crate::error::{Result, SessionError};
use crate::events::{EventSink, LinkEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::state::{ConnectionState, LinkControl};

/// Whether a successful send shows up in the operator log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Logged,
    /// Keepalive re-sends; traced but not shown to the operator.
    Silent,
}

/// Everything guarded by the session lock.
struct LinkSlot {
    state: ConnectionState,
    /// Bumped on every transition into `Connected`.
    generation: u64,
    /// Liveness clock: last inbound chunk or the connect itself.
    last_active: Option<Instant>,
    /// Handle used only to shut the socket down; never written through.
    control: Option<LinkStream>,
    peer: Option<SocketAddr>,
}

/// Writer tagged with the generation it belongs to.
type TaggedWriter = (u64, PacketWriter<LinkStream>);

/// A freshly opened socket, split into its three handles.
struct OpenedLink {
    writer: PacketWriter<LinkStream>,
    reader: LinkStream,
    control: LinkStream,
    peer: SocketAddr,
}

pub(crate) struct SessionShared {
    config: SessionConfig,
    slot: Mutex<LinkSlot>,
    /// Held for the duration of a blocking write. Never taken while `slot`
    /// is held, so state queries and disconnect never wait on the socket.
    writer: Mutex<Option<TaggedWriter>>,
    events: Arc<dyn EventSink>,
    source: Arc<dyn BitSource>,
}

/// The control link to one controller.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ConnectionSession {
    shared: Arc<SessionShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Create a disconnected session.
    ///
    /// `source` supplies the outputs sent on connect and on every keepalive.
    pub fn new(
        config: SessionConfig,
        source: Arc<dyn BitSource>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                config,
                slot: Mutex::new(LinkSlot {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    last_active: None,
                    control: None,
                    peer: None,
                }),
                writer: Mutex::new(None),
                events,
                source,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Open the link and start the receive loop and watchdog.
    ///
    /// On success the current outputs are sent immediately. A failed connect
    /// leaves the session `Disconnected` and is not retried.
    pub fn connect(&self, host: &str, port: u16) -> Result<SocketAddr> {
        self.begin_connect(host, port)?;
        let opened = open_link(host, port, &self.shared.config);
        self.finish_connect(host, port, opened)
    }

    /// Claim the session for a connect attempt.
    fn begin_connect(&self, host: &str, port: u16) -> Result<()> {
        let shared = &self.shared;
        {
            let mut slot = shared.lock();
            if slot.state != ConnectionState::Disconnected {
                return Err(SessionError::AlreadyActive(slot.state));
            }
            slot.state = ConnectionState::Connecting;
        }
        shared.emit_state(ConnectionState::Connecting);
        shared.emit(LinkEvent::log(format!("connecting to {host}:{port}...")));
        Ok(())
    }

    /// Install an opened link, unless a disconnect arrived in the meantime.
    fn finish_connect(
        &self,
        host: &str,
        port: u16,
        opened: Result<OpenedLink>,
    ) -> Result<SocketAddr> {
        let shared = &self.shared;
        let OpenedLink {
            writer,
            reader,
            control,
            peer,
        } = match opened {
            Ok(link) => link,
            Err(err) => {
                {
                    let mut slot = shared.lock();
                    if slot.state == ConnectionState::Connecting {
                        slot.state = ConnectionState::Disconnected;
                    }
                }
                warn!(host, port, error = %err, "connect failed");
                shared.emit(LinkEvent::log(err.to_string()));
                shared.emit_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        // Only the connecting thread bumps the generation, so the next value
        // is known before the transition. Senders check the slot first and
        // cannot reach this writer until the state flips.
        let next = shared.lock().generation + 1;
        *shared.lock_writer() = Some((next, writer));

        let cancelled = {
            let mut slot = shared.lock();
            if slot.state == ConnectionState::Connecting {
                slot.generation = next;
                slot.state = ConnectionState::Connected;
                slot.last_active = Some(Instant::now());
                slot.control = Some(control);
                slot.peer = Some(peer);
                None
            } else {
                Some(control)
            }
        };
        if let Some(control) = cancelled {
            shared.drop_writer(next);
            if let Err(err) = control.shutdown() {
                debug!(error = %err, "socket shutdown failed");
            }
            debug!(%peer, "connect completed after cancel; dropping link");
            return Err(SessionError::Cancelled);
        }

        let generation = next;
        info!(%peer, generation, "connected");
        shared.emit_state(ConnectionState::Connected);
        shared.emit(LinkEvent::log(format!("connected to {peer}")));

        if let Err(err) = self.start_workers(generation, reader) {
            shared.close(Some(generation), Some(&err));
            return Err(err);
        }

        shared.send_snapshot(Some(generation), SendMode::Logged)?;
        Ok(peer)
    }

    /// Close the link. Idempotent: a no-op when already disconnected.
    ///
    /// Also cancels a connect that is still in flight.
    pub fn disconnect(&self) {
        self.shared.close(None, None);
    }

    /// Encode and send `matrix`.
    pub fn send(&self, matrix: &BitMatrix) -> Result<()> {
        self.shared.send_matrix(None, matrix, SendMode::Logged)
    }

    /// Send the current snapshot from the session's [`BitSource`].
    pub fn send_current(&self, mode: SendMode) -> Result<()> {
        self.shared.send_snapshot(None, mode)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Liveness clock of the current link.
    pub fn last_active(&self) -> Option<Instant> {
        self.shared.lock().last_active
    }

    /// Address of the connected controller.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.lock().peer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// The sink this session publishes to.
    pub fn events(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.shared.events)
    }

    fn start_workers(&self, generation: u64, reader: LinkStream) -> Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|handle| !handle.is_finished());

        let dispatcher = ReceiveDispatcher::new(reader, generation, &self.shared.config);
        let shared = Arc::clone(&self.shared);
        let rx = std::thread::Builder::new()
            .name("chiplink-rx".to_string())
            .spawn(move || {
                let exit = dispatcher.run(&*shared);
                debug!(generation, ?exit, "receive loop exited");
            })
            .map_err(SessionError::Worker)?;
        workers.push(rx);

        let monitor = HeartbeatMonitor::new(generation, &self.shared.config);
        let shared = Arc::clone(&self.shared);
        let heartbeat = std::thread::Builder::new()
            .name("chiplink-heartbeat".to_string())
            .spawn(move || monitor.run(&*shared))
            .map_err(SessionError::Worker)?;
        workers.push(heartbeat);

        Ok(())
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.disconnect();
        let workers = std::mem::take(
            self.workers
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn open_link(host: &str, port: u16, config: &SessionConfig) -> Result<OpenedLink> {
    let stream = TcpTransport::connect_host(host, port, config.io_timeout)?;
    let peer = stream.peer_addr()?;
    let reader = stream.try_clone()?;
    let control = stream.try_clone()?;
    let writer = PacketWriter::with_timeout(stream, config.io_timeout).map_err(SessionError::Send)?;
    Ok(OpenedLink {
        writer,
        reader,
        control,
        peer,
    })
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, LinkSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<TaggedWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the writer of `generation`, if it is still installed.
    fn drop_writer(&self, generation: u64) {
        let mut writer = self.lock_writer();
        if writer.as_ref().is_some_and(|(tag, _)| *tag == generation) {
            *writer = None;
        }
    }

    fn emit_state(&self, state: ConnectionState) {
        self.events.emit(LinkEvent::State { state });
    }

    /// The single disconnect path.
    ///
    /// With `expected` set, only acts if that generation is the live link.
    /// Returns whether this call performed the transition.
    fn close(&self, expected: Option<u64>, fault: Option<&SessionError>) -> bool {
        let (previous, ended) = {
            let mut slot = self.lock();
            if let Some(generation) = expected {
                if slot.state != ConnectionState::Connected || slot.generation != generation {
                    return false;
                }
            }
            let previous = slot.state;
            let ended = match previous {
                ConnectionState::Disconnected => return false,
                ConnectionState::Connecting => None,
                ConnectionState::Connected => {
                    if let Some(control) = slot.control.take() {
                        if let Err(err) = control.shutdown() {
                            debug!(error = %err, "socket shutdown failed");
                        }
                    }
                    Some(slot.generation)
                }
            };
            slot.state = ConnectionState::Disconnected;
            slot.last_active = None;
            slot.peer = None;
            (previous, ended)
        };
        // The socket is already shut down, so a write in flight fails promptly.
        if let Some(generation) = ended {
            self.drop_writer(generation);
        }

        if let Some(fault) = fault {
            warn!(error = %fault, "link fault");
            self.emit(LinkEvent::log(fault.to_string()));
            self.emit(LinkEvent::warning(fault.warning_title(), fault.to_string()));
        }
        info!(from = %previous, "disconnected");
        self.emit_state(ConnectionState::Disconnected);
        self.emit(LinkEvent::log("disconnected"));
        true
    }

    fn send_snapshot(&self, expected: Option<u64>, mode: SendMode) -> Result<()> {
        let matrix = self.source.snapshot();
        self.send_matrix(expected, &matrix, mode)
    }

    fn send_matrix(&self, expected: Option<u64>, matrix: &BitMatrix, mode: SendMode) -> Result<()> {
        let packet = encode_with_cmd(matrix, self.config.command);
        let generation = {
            let slot = self.lock();
            if slot.state != ConnectionState::Connected
                || expected.is_some_and(|expected| expected != slot.generation)
            {
                return Err(SessionError::NotConnected);
            }
            slot.generation
        };

        let result = {
            let mut writer = self.lock_writer();
            match writer.as_mut() {
                Some((tag, writer)) if *tag == generation => writer.send(&packet),
                _ => return Err(SessionError::NotConnected),
            }
        };

        match result {
            Ok(()) => {
                let data = hex_dump(packet.frame().bytes());
                match mode {
                    SendMode::Logged => {
                        debug!(%data, "outputs sent");
                        self.emit(LinkEvent::log(format!("sent: {data}")));
                    }
                    SendMode::Silent => trace!(%data, "keepalive sent"),
                }
                Ok(())
            }
            Err(err) => {
                let err = SessionError::Send(err);
                self.close(Some(generation), Some(&err));
                Err(err)
            }
        }
    }
}

impl LinkControl for SessionShared {
    fn is_live(&self, generation: u64) -> bool {
        let slot = self.lock();
        slot.state == ConnectionState::Connected && slot.generation == generation
    }

    fn touch(&self, generation: u64, at: Instant) {
        let mut slot = self.lock();
        if slot.state == ConnectionState::Connected && slot.generation == generation {
            slot.last_active = Some(at);
        }
    }

    fn last_active(&self, generation: u64) -> Option<Instant> {
        let slot = self.lock();
        if slot.state == ConnectionState::Connected && slot.generation == generation {
            slot.last_active
        } else {
            None
        }
    }

    fn resend_silent(&self, generation: u64) -> Result<()> {
        self.send_snapshot(Some(generation), SendMode::Silent)
    }

    fn fail(&self, generation: u64, fault: &SessionError) {
        self.close(Some(generation), Some(fault));
    }

    fn emit(&self, event: LinkEvent) {
        self.events.emit(event);
    }
}
