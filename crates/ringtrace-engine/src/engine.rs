//! The engine: session lifecycle, the service thread, and handler dispatch.
//!
//! A [`TraceEngine`] owns one session slot and a dedicated service thread.
//! Producer-facing calls ([`TraceEngine::acquire_context`] and everything on
//! the context itself) never block on session transitions; lifecycle calls
//! take the engine lock. Handler callbacks other than the category filter
//! run on the service thread, fed by a task channel, so a slow handler can
//! delay notifications but never an allocation.
//!
//! Lock order is engine inner first, slot second, everywhere.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex, RwLock};
use ringtrace_buffer::BufferHeader;

use crate::config::SessionConfig;
use crate::context::{ContextHandle, TraceContext};
use crate::error::{EngineError, EngineResult};
use crate::handler::TraceHandler;
use crate::observer::{ObserverId, ObserverSignal};
use crate::session::{Disposition, EngineState, SessionStats};

/// How long [`Drop`] waits for outstanding trace references before forcing
/// finalization.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Generations are unique per process, not per engine, so a stale handle
/// from one engine can never validate against a session on another.
fn next_generation() -> u32 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Work posted to the service thread.
///
/// Every task carries the generation it was minted for; the service thread
/// drops tasks whose session has already ended, which makes duplicate or
/// late posts harmless.
#[derive(Debug)]
pub(crate) enum SessionTask {
    /// Deliver `TraceHandler::trace_started` once observers have acked.
    HandlerStarted { generation: u32 },
    /// Deliver `TraceHandler::notify_buffer_full` for a filled buffer.
    BufferFull {
        generation: u32,
        wrapped_count: u32,
        durable_data_end: u64,
    },
    /// Tear the session down; posted when the reference count reaches zero.
    Finalize { generation: u32 },
    /// Stop the service thread. Sent once, from `Drop`.
    Shutdown,
}

struct EngineInner {
    state: EngineState,
    /// Generation of the current (or most recent) session; 0 before any.
    generation: u32,
    handler: Option<Arc<dyn TraceHandler>>,
    disposition: Disposition,
    observers: Vec<(ObserverId, ObserverSignal)>,
    pending_acks: Vec<ObserverId>,
    next_observer_id: u64,
    started_notified: bool,
}

struct EngineShared {
    inner: Mutex<EngineInner>,
    slot: RwLock<Option<Arc<TraceContext>>>,
    state_cv: Condvar,
    tasks_tx: Sender<SessionTask>,
}

impl EngineShared {
    fn post_handler_started(&self, generation: u32) {
        let task = SessionTask::HandlerStarted { generation };
        if self.tasks_tx.send(task).is_err() {
            tracing::debug!(generation, "service channel closed; start notification dropped");
        }
    }

    fn run_trace_started(&self, generation: u32) {
        let handler = {
            let mut inner = self.inner.lock();
            if inner.generation != generation
                || inner.state == EngineState::Stopped
                || inner.started_notified
            {
                return;
            }
            inner.started_notified = true;
            match inner.handler.as_ref() {
                Some(handler) => Arc::clone(handler),
                None => return,
            }
        };
        handler.trace_started();
    }

    fn run_buffer_full(&self, generation: u32, wrapped_count: u32, durable_data_end: u64) {
        let handler = {
            let inner = self.inner.lock();
            if inner.generation != generation || inner.state == EngineState::Stopped {
                return;
            }
            match inner.handler.as_ref() {
                Some(handler) => Arc::clone(handler),
                None => return,
            }
        };
        handler.notify_buffer_full(wrapped_count, durable_data_end);
    }

    /// End the session: detach the context, settle the disposition, and
    /// deliver `trace_stopped`. Idempotent per generation.
    fn finalize(&self, generation: u32) {
        let (handler, disposition, bytes_written) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state == EngineState::Stopped {
                return;
            }
            let handler = inner.handler.take();
            let context = self.slot.write().take();
            let mut disposition = inner.disposition;
            let mut bytes_written = 0;
            if let Some(context) = context.as_ref() {
                if context.had_data_loss() {
                    disposition = disposition.merge(Disposition::BufferFull);
                }
                bytes_written = context.counters().bytes_allocated();
            }
            inner.disposition = disposition;
            inner.state = EngineState::Stopped;
            inner.pending_acks.clear();
            (handler, disposition, bytes_written)
        };
        tracing::info!(generation, disposition = %disposition, bytes_written, "trace session ended");
        if let Some(handler) = handler {
            handler.trace_stopped(disposition, bytes_written);
        }
        // Waiters in terminate wake only after the stop callback has run, so
        // a returned terminate means the handler is fully quiesced.
        self.state_cv.notify_all();
    }
}

fn service_loop(shared: &EngineShared, tasks: &Receiver<SessionTask>) {
    while let Ok(task) = tasks.recv() {
        match task {
            SessionTask::HandlerStarted { generation } => shared.run_trace_started(generation),
            SessionTask::BufferFull {
                generation,
                wrapped_count,
                durable_data_end,
            } => shared.run_buffer_full(generation, wrapped_count, durable_data_end),
            SessionTask::Finalize { generation } => shared.finalize(generation),
            SessionTask::Shutdown => break,
        }
    }
}

/// Removes `id` from the pending-ack set; returns the generation to post a
/// start notification for when this was the last outstanding ack.
fn clear_pending_ack(inner: &mut EngineInner, id: ObserverId) -> Option<u32> {
    let before = inner.pending_acks.len();
    inner.pending_acks.retain(|pending| *pending != id);
    (before != 0
        && inner.pending_acks.is_empty()
        && inner.state != EngineState::Stopped
        && !inner.started_notified)
        .then_some(inner.generation)
}

/// An in-process tracing engine hosting at most one session at a time.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Dropping the
/// engine terminates any live session (waiting up to
/// [`DEFAULT_TERMINATE_TIMEOUT`] for producers) and joins the service
/// thread.
pub struct TraceEngine {
    shared: Arc<EngineShared>,
    service: Option<JoinHandle<()>>,
}

impl TraceEngine {
    /// Create an engine with no session and spawn its service thread.
    #[must_use]
    pub fn new() -> Self {
        let (tasks_tx, tasks_rx) = unbounded();
        let shared = Arc::new(EngineShared {
            inner: Mutex::new(EngineInner {
                state: EngineState::Stopped,
                generation: 0,
                handler: None,
                disposition: Disposition::Completed,
                observers: Vec::new(),
                pending_acks: Vec::new(),
                next_observer_id: 1,
                started_notified: false,
            }),
            slot: RwLock::new(None),
            state_cv: Condvar::new(),
            tasks_tx,
        });
        let service_shared = Arc::clone(&shared);
        let service = thread::spawn(move || service_loop(&service_shared, &tasks_rx));
        Self {
            shared,
            service: Some(service),
        }
    }

    /// Start a session with the given handler and buffer configuration.
    ///
    /// Registered observers are signaled and `trace_started` is delivered on
    /// the service thread once every observer has acknowledged the new state
    /// (immediately, when there are none).
    ///
    /// # Errors
    ///
    /// [`EngineError::BadState`] unless the engine is stopped;
    /// [`EngineError::InvalidConfig`] when the configuration does not
    /// describe a valid buffer layout.
    pub fn start(&self, handler: Arc<dyn TraceHandler>, config: &SessionConfig) -> EngineResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != EngineState::Stopped {
            return Err(EngineError::bad_state("start", inner.state));
        }
        let layout = config.validated_layout()?;
        let generation = next_generation();
        let context = Arc::new(TraceContext::new(
            generation,
            layout,
            Arc::clone(&handler),
            self.shared.tasks_tx.clone(),
        ));
        *self.shared.slot.write() = Some(context);
        inner.state = EngineState::Started;
        inner.generation = generation;
        inner.handler = Some(handler);
        inner.disposition = Disposition::Completed;
        inner.started_notified = false;
        inner.pending_acks = inner.observers.iter().map(|(id, _)| *id).collect();
        for (_, signal) in &inner.observers {
            signal.raise();
        }
        let ready = inner.pending_acks.is_empty();
        drop(inner);
        if ready {
            self.shared.post_handler_started(generation);
        }
        tracing::info!(generation, mode = %config.buffering_mode(), "trace session started");
        Ok(())
    }

    /// Transition `Started` to `Stopping` under the engine lock: merge the
    /// disposition, wake observers, and hand back the context whose engine
    /// reference the caller must release once the lock is dropped.
    fn request_stop(
        &self,
        inner: &mut EngineInner,
        disposition: Disposition,
    ) -> (Option<Arc<TraceContext>>, u32, Disposition) {
        inner.state = EngineState::Stopping;
        let merged = inner.disposition.merge(disposition);
        inner.disposition = merged;
        for (_, signal) in &inner.observers {
            signal.raise();
        }
        let context = self.shared.slot.read().as_ref().map(Arc::clone);
        (context, inner.generation, merged)
    }

    /// Request that the current session stop.
    ///
    /// Allocation is not cut off here: producers holding a
    /// [`ContextHandle`] keep writing until they release it. The session
    /// finalizes (and `trace_stopped` fires) when the last reference is
    /// released. Stopping an already stopping session just merges
    /// `disposition` into the pending outcome.
    ///
    /// # Errors
    ///
    /// [`EngineError::BadState`] when no session is running.
    pub fn stop(&self, disposition: Disposition) -> EngineResult<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            EngineState::Stopped => Err(EngineError::bad_state("stop", inner.state)),
            EngineState::Stopping => {
                inner.disposition = inner.disposition.merge(disposition);
                Ok(())
            }
            EngineState::Started => {
                let (context, generation, merged) = self.request_stop(&mut inner, disposition);
                drop(inner);
                if let Some(context) = context {
                    context.begin_stop();
                }
                tracing::info!(generation, disposition = %merged, "trace session stopping");
                Ok(())
            }
        }
    }

    /// Stop the session, if one is running, and wait for it to finalize.
    ///
    /// A session still in `Started` is aborted; one already stopping keeps
    /// the disposition its `stop` asked for. An already stopped engine
    /// returns immediately. On timeout the session is finalized anyway: the
    /// context is detached so late writers hit a dead slot, and
    /// `trace_stopped` is still delivered.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] when producers still held references when
    /// the timeout expired.
    pub fn terminate(&self, timeout: Duration) -> EngineResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state == EngineState::Started {
            let (context, generation, merged) =
                self.request_stop(&mut inner, Disposition::Aborted);
            drop(inner);
            if let Some(context) = context {
                context.begin_stop();
            }
            tracing::info!(generation, disposition = %merged, "trace session stopping");
            inner = self.shared.inner.lock();
        }
        let wait = self.shared.state_cv.wait_while_for(
            &mut inner,
            |inner| inner.state != EngineState::Stopped,
            timeout,
        );
        if wait.timed_out() && inner.state != EngineState::Stopped {
            let generation = inner.generation;
            drop(inner);
            tracing::warn!(
                generation,
                ?timeout,
                "trace references still outstanding; finalizing anyway"
            );
            self.shared.finalize(generation);
            return Err(EngineError::cancelled(timeout));
        }
        Ok(())
    }

    /// Take a reference to the active session's context.
    ///
    /// `None` when no session is running, the session is tearing down, or a
    /// lifecycle transition is in progress at this instant. Never blocks, so
    /// it is safe on hot paths.
    #[must_use]
    pub fn acquire_context(&self) -> Option<ContextHandle> {
        let slot = self.shared.slot.try_read()?;
        let context = slot.as_ref()?;
        context
            .try_acquire_ref()
            .then(|| ContextHandle::new(Arc::clone(context)))
    }

    /// Register an observer interested in engine state changes.
    ///
    /// The signal is raised on every later `start` and `stop`; observers
    /// present at `start` gate the `trace_started` callback until each calls
    /// [`notify_observer_updated`](Self::notify_observer_updated). An
    /// observer registered mid-session is signaled immediately so it can
    /// catch up, but does not join the current handshake.
    pub fn register_observer(&self, signal: ObserverSignal) -> ObserverId {
        let mut inner = self.shared.inner.lock();
        let id = ObserverId(inner.next_observer_id);
        inner.next_observer_id += 1;
        if inner.state != EngineState::Stopped {
            signal.raise();
        }
        inner.observers.push((id, signal));
        id
    }

    /// Remove an observer. A pending handshake no longer waits on it.
    pub fn unregister_observer(&self, id: ObserverId) {
        let mut inner = self.shared.inner.lock();
        inner.observers.retain(|(observer_id, _)| *observer_id != id);
        let ready = clear_pending_ack(&mut inner, id);
        drop(inner);
        if let Some(generation) = ready {
            self.shared.post_handler_started(generation);
        }
    }

    /// Acknowledge that an observer has seen the current engine state.
    pub fn notify_observer_updated(&self, id: ObserverId) {
        let mut inner = self.shared.inner.lock();
        let ready = clear_pending_ack(&mut inner, id);
        drop(inner);
        if let Some(generation) = ready {
            self.shared.post_handler_started(generation);
        }
    }

    /// Release a saved streaming buffer back to the session.
    ///
    /// Forwarded to the active context; a no-op when the session has already
    /// ended.
    pub fn mark_rolling_buffer_saved(&self, wrapped_count: u32, durable_data_end: u64) {
        if let Some(context) = self.shared.slot.read().as_ref() {
            context.mark_rolling_buffer_saved(wrapped_count, durable_data_end);
        }
    }

    /// Snapshot a filled rolling buffer, for handlers draining a streaming
    /// session.
    #[must_use]
    pub fn copy_rolling_buffer(&self, wrapped_count: u32) -> Option<Vec<u8>> {
        self.shared
            .slot
            .read()
            .as_ref()
            .and_then(|context| context.copy_rolling(wrapped_count))
    }

    /// Snapshot the durable region's registration records.
    #[must_use]
    pub fn copy_durable_region(&self) -> Option<Vec<u8>> {
        self.shared
            .slot
            .read()
            .as_ref()
            .and_then(|context| context.copy_durable())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.inner.lock().state
    }

    /// Statistics for the active session, if one exists.
    #[must_use]
    pub fn session_stats(&self) -> Option<SessionStats> {
        self.shared
            .slot
            .read()
            .as_ref()
            .map(|context| context.stats())
    }

    /// The active session's buffer header, if one exists.
    #[must_use]
    pub fn buffer_header(&self) -> Option<BufferHeader> {
        self.shared
            .slot
            .read()
            .as_ref()
            .map(|context| context.buffer_header())
    }
}

impl Default for TraceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.inner.try_lock() {
            Some(inner) => f
                .debug_struct("TraceEngine")
                .field("state", &inner.state)
                .field("generation", &inner.generation)
                .finish_non_exhaustive(),
            None => f.debug_struct("TraceEngine").finish_non_exhaustive(),
        }
    }
}

impl Drop for TraceEngine {
    fn drop(&mut self) {
        if self.terminate(DEFAULT_TERMINATE_TIMEOUT).is_err() {
            tracing::warn!("engine dropped with trace references still outstanding");
        }
        // The channel is FIFO, so any queued finalization runs before the
        // service thread sees the shutdown.
        if self.shared.tasks_tx.send(SessionTask::Shutdown).is_err() {
            tracing::debug!("service channel already closed at engine drop");
        }
        if let Some(service) = self.service.take()
            && service.join().is_err()
        {
            tracing::error!("trace service thread panicked");
        }
    }
}
