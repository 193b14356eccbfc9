use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chiplink_frame::{BitAddress, BitMatrix};
use tracing::debug;

use crate::board::{BitBoard, BitSource};
use crate::error::{Result, SessionError};
use crate::events::{OutputNotifier, OutputObserver};
use crate::session::{ConnectionSession, SendMode};

/// Operator-side facade: owns the output board and pushes changes.
///
/// With auto-send on (the default), every change is sent while the session
/// is connected. Switching a single output on notifies the observer; bulk
/// changes (whole chip, all outputs) do not.
pub struct ControlPanel {
    session: Arc<ConnectionSession>,
    board: BitBoard,
    auto_send: AtomicBool,
    notifier: Option<OutputNotifier>,
}

impl ControlPanel {
    /// `board` should be the same board the session snapshots from.
    pub fn new(
        session: Arc<ConnectionSession>,
        board: BitBoard,
        observer: Option<Arc<dyn OutputObserver>>,
    ) -> Result<Self> {
        let notifier = observer
            .map(|observer| OutputNotifier::spawn(observer, session.events()))
            .transpose()
            .map_err(SessionError::Worker)?;
        Ok(Self {
            session,
            board,
            auto_send: AtomicBool::new(true),
            notifier,
        })
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn matrix(&self) -> BitMatrix {
        self.board.snapshot()
    }

    pub fn auto_send(&self) -> bool {
        self.auto_send.load(Ordering::SeqCst)
    }

    pub fn set_auto_send(&self, enabled: bool) {
        self.auto_send.store(enabled, Ordering::SeqCst);
    }

    /// Set one output.
    pub fn set_bit(&self, addr: BitAddress, value: bool) -> Result<()> {
        let previous = self.board.update(|m| m.set(addr, value));
        if value && !previous {
            self.notify(addr);
        }
        self.after_change()
    }

    /// Flip one output.
    pub fn toggle_bit(&self, addr: BitAddress) -> Result<()> {
        if self.board.update(|m| m.toggle(addr)) {
            self.notify(addr);
        }
        self.after_change()
    }

    /// Switch a whole chip on or off.
    pub fn set_chip(&self, chip: usize, value: bool) -> Result<()> {
        self.board.update(|m| m.set_chip(chip, value))?;
        self.after_change()
    }

    /// Switch every output on or off.
    pub fn set_all(&self, value: bool) -> Result<()> {
        self.board.update(|m| m.fill(value));
        self.after_change()
    }

    /// Send the current outputs regardless of auto-send.
    pub fn send_now(&self) -> Result<()> {
        self.session.send_current(SendMode::Logged)
    }

    fn notify(&self, addr: BitAddress) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(addr);
        }
    }

    fn after_change(&self) -> Result<()> {
        if !self.auto_send() || !self.session.is_connected() {
            return Ok(());
        }
        match self.session.send_current(SendMode::Logged) {
            // Lost the link between the check and the send.
            Err(SessionError::NotConnected) => {
                debug!("auto-send skipped, link closed");
                Ok(())
            }
            other => other,
        }
    }
}
