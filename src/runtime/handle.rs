//! Cross-thread handle to a running relay engine.

use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

struct Shared {
    forwarding: AtomicBool,
    terminate: AtomicBool,
    waker: Waker,
}

/// Cloneable handle carrying the forwarding and termination flags.
///
/// The engine thread only reads the flags; every writer goes through here.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Shared>,
}

impl RelayHandle {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            shared: Arc::new(Shared {
                forwarding: AtomicBool::new(true),
                terminate: AtomicBool::new(false),
                waker,
            }),
        }
    }

    /// Whether payload bytes are currently passed to the peer.
    pub fn is_forwarding(&self) -> bool {
        self.shared.forwarding.load(Ordering::Acquire)
    }

    pub fn set_forwarding(&self, enabled: bool) {
        self.shared.forwarding.store(enabled, Ordering::Release);
    }

    /// Invert the forwarding flag, returning the new value.
    pub fn toggle_forwarding(&self) -> bool {
        !self.shared.forwarding.fetch_xor(true, Ordering::AcqRel)
    }

    /// Ask the engine loop to exit after its current batch.
    pub fn terminate(&self) {
        self.shared.terminate.store(true, Ordering::Release);
        if let Err(e) = self.shared.waker.wake() {
            warn!(error = %e, "Failed to wake relay engine");
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminate.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("forwarding", &self.is_forwarding())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
