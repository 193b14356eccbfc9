use std::sync::{Arc, PoisonError, RwLock};

use chiplink_frame::BitMatrix;

/// Read-only access to the operator's current output state.
pub trait BitSource: Send + Sync {
    fn snapshot(&self) -> BitMatrix;
}

impl BitSource for BitMatrix {
    fn snapshot(&self) -> BitMatrix {
        *self
    }
}

/// Shared, cheaply cloned handle to a [`BitMatrix`].
///
/// The operator side is the single writer; the session only takes snapshots
/// (on connect, on every change, on every keepalive).
#[derive(Debug, Clone, Default)]
pub struct BitBoard {
    inner: Arc<RwLock<BitMatrix>>,
}

impl BitBoard {
    pub fn new(initial: BitMatrix) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Mutate the matrix under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut BitMatrix) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl BitSource for BitBoard {
    fn snapshot(&self) -> BitMatrix {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
