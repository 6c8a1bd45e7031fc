//! Observer readiness signals.
//!
//! Observers are components that must finish their own setup (for example,
//! loading a dynamic category configuration) before the handler is told that
//! tracing has started. The engine raises each registered observer's signal on
//! every session state change; the observer does its work and acknowledges
//! with [`crate::TraceEngine::notify_observer_updated`]. The handler's
//! `trace_started` callback fires only after every observer registered at
//! start time has acknowledged.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

/// Identifies one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// The raise side of an observer signal, registered with the engine.
///
/// The signal is binary: raising an already-raised signal is a no-op, so a
/// slow observer sees one wakeup for any number of state changes that
/// happened while it was busy.
#[derive(Debug)]
pub struct ObserverSignal {
    tx: Sender<()>,
}

/// The wait side of an observer signal, kept by the observer.
#[derive(Debug)]
pub struct ObserverWaiter {
    rx: Receiver<()>,
}

impl ObserverSignal {
    /// Create a connected signal/waiter pair.
    #[must_use]
    pub fn pair() -> (ObserverSignal, ObserverWaiter) {
        let (tx, rx) = channel::bounded(1);
        (ObserverSignal { tx }, ObserverWaiter { rx })
    }

    /// Raise the signal, coalescing with any signal already pending.
    pub fn raise(&self) {
        match self.tx.try_send(()) {
            // A full channel already carries a pending signal.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::trace!("observer waiter dropped; signal ignored");
            }
        }
    }
}

impl ObserverWaiter {
    /// Block until the signal is raised. Returns `false` if the signal side
    /// was dropped without raising.
    #[must_use]
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Block until the signal is raised or `timeout` elapses.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending signal without blocking.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
