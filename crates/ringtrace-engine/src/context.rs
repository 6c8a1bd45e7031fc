//! The trace context: buffer ownership, record allocation, and the
//! buffer-switch protocol.
//!
//! One context exists per session. It is shared with every producer thread
//! holding a [`ContextHandle`]; the engine's reference count (not `Arc`'s)
//! gates teardown, so the engine can observe the moment the last producer
//! lets go.
//!
//! # RT Safety
//!
//! [`TraceContext::alloc_record`] and [`TraceContext::alloc_durable_record`]
//! never block and never perform I/O. The only lock in the allocation path is
//! the switch lock, taken when a buffer actually fills; steady-state
//! allocation is a single `fetch_add`.

use core::fmt;
use core::num::{NonZeroU8, NonZeroU16};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use ringtrace_buffer::{
    BufferHeader, BufferLayout, BufferingMode, FullMark, MAX_RECORD_BYTES, MAX_WRAPPED_COUNT,
    PackedCursor, RecordArena, Reservation, RollingCursor, SessionCounters,
};

use crate::engine::SessionTask;
use crate::handler::TraceHandler;
use crate::session::SessionStats;

/// Largest string index the context will hand out.
pub const MAX_STRING_INDEX: u16 = 4095;

/// Largest thread index the context will hand out.
pub const MAX_THREAD_INDEX: u16 = 255;

/// State that only changes under the switch lock.
struct SwitchState {
    /// Set when durable exhaustion has permanently halted allocation.
    artificially_stopped: bool,
}

/// Per-session buffer owner and allocator.
///
/// Created by [`crate::TraceEngine::start`]; producers reach it through
/// [`crate::TraceEngine::acquire_context`].
pub struct TraceContext {
    generation: u32,
    layout: BufferLayout,
    handler: Arc<dyn TraceHandler>,

    durable_arena: RecordArena,
    rolling_arenas: [RecordArena; 2],

    rolling_cursor: RollingCursor,
    rolling_full_marks: [FullMark; 2],
    durable_cursor: AtomicU64,
    durable_full_mark: FullMark,
    durable_saved_end: AtomicU64,

    counters: SessionCounters,
    next_string_index: AtomicU16,
    next_thread_index: AtomicU16,

    refs: AtomicUsize,
    stopping: AtomicBool,
    switch_lock: Mutex<SwitchState>,
    tasks_tx: Sender<SessionTask>,
}

impl TraceContext {
    pub(crate) fn new(
        generation: u32,
        layout: BufferLayout,
        handler: Arc<dyn TraceHandler>,
        tasks_tx: Sender<SessionTask>,
    ) -> Self {
        let rolling_arenas = match layout.mode() {
            BufferingMode::OneShot => [arena_with_len(layout.rolling_len()), RecordArena::empty()],
            BufferingMode::Circular | BufferingMode::Streaming => [
                arena_with_len(layout.rolling_len()),
                arena_with_len(layout.rolling_len()),
            ],
        };
        Self {
            generation,
            layout,
            handler,
            durable_arena: arena_with_len(layout.durable_len()),
            rolling_arenas,
            rolling_cursor: RollingCursor::new(),
            rolling_full_marks: [FullMark::new(), FullMark::new()],
            durable_cursor: AtomicU64::new(0),
            durable_full_mark: FullMark::new(),
            durable_saved_end: AtomicU64::new(0),
            counters: SessionCounters::new(),
            next_string_index: AtomicU16::new(1),
            next_thread_index: AtomicU16::new(1),
            refs: AtomicUsize::new(1),
            stopping: AtomicBool::new(false),
            switch_lock: Mutex::new(SwitchState {
                artificially_stopped: false,
            }),
            tasks_tx,
        }
    }

    /// Generation of the session this context belongs to.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Buffering mode the session runs in.
    #[must_use]
    pub fn buffering_mode(&self) -> BufferingMode {
        self.layout.mode()
    }

    /// The session's drop and allocation counters.
    #[must_use]
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// The handler supplied at session start.
    #[must_use]
    pub fn handler(&self) -> &dyn TraceHandler {
        self.handler.as_ref()
    }

    /// Reserve `num_bytes` in the active rolling buffer.
    ///
    /// `None` means the record is dropped: the buffer is full under the
    /// session's buffering policy, the request is empty, or the request
    /// exceeds [`MAX_RECORD_BYTES`]. Every `None` increments the dropped
    /// counter; nothing here ever blocks or reports an error.
    ///
    /// # RT Safety
    ///
    /// One `fetch_add` on the granted path. The switch lock is taken only
    /// when the active buffer has filled.
    pub fn alloc_record(&self, num_bytes: usize) -> Option<Reservation<'_>> {
        let request = num_bytes as u64;
        if num_bytes == 0 || request > MAX_RECORD_BYTES {
            self.counters.inc_dropped();
            return None;
        }

        let prev = self.rolling_cursor.advance(request);
        if prev.offset() + request <= self.layout.rolling_len() {
            self.counters.add_bytes_allocated(request);
            return self.rolling_arena(prev.buffer_index()).reserve(prev.offset(), num_bytes);
        }
        self.alloc_record_slow(prev, num_bytes)
    }

    /// Reserve `num_bytes` in the durable region.
    ///
    /// In one-shot mode the buffer is undivided and this delegates to
    /// [`alloc_record`](Self::alloc_record). Durable exhaustion halts the
    /// whole session's allocation: records that reference durable entries by
    /// index would dangle if the durable region could silently lose data
    /// while ordinary allocation continued.
    pub fn alloc_durable_record(&self, num_bytes: usize) -> Option<Reservation<'_>> {
        if self.layout.mode() == BufferingMode::OneShot {
            return self.alloc_record(num_bytes);
        }
        let request = num_bytes as u64;
        if num_bytes == 0 || request > MAX_RECORD_BYTES {
            self.counters.inc_dropped();
            return None;
        }

        let offset = self.durable_cursor.fetch_add(request, Ordering::AcqRel);
        if offset + request <= self.layout.durable_len() {
            self.counters.add_bytes_allocated(request);
            return self.durable_arena.reserve(offset, num_bytes);
        }

        // Exhausted. Snap the cursor so repeated failures cannot grow it
        // without bound; the snapped value still fails every later request.
        self.durable_cursor
            .store(self.layout.durable_len(), Ordering::Release);
        if self
            .durable_full_mark
            .mark(offset.min(self.layout.durable_len()))
        {
            self.mark_artificially_stopped();
            tracing::warn!(
                generation = self.generation,
                "durable region exhausted; session allocation halted"
            );
        }
        self.counters.inc_dropped();
        None
    }

    fn alloc_record_slow(&self, prev: PackedCursor, num_bytes: usize) -> Option<Reservation<'_>> {
        let request = num_bytes as u64;
        let region_len = self.layout.rolling_len();
        match self.layout.mode() {
            BufferingMode::OneShot => {
                // The single buffer is full for the rest of the session.
                self.rolling_cursor.snap_to_end(region_len, prev.wrapped_count());
                if self.rolling_full_marks[0].mark(prev.offset().min(region_len)) {
                    tracing::debug!(generation = self.generation, "one-shot buffer filled");
                }
                self.counters.inc_dropped();
                None
            }
            BufferingMode::Circular => {
                self.mark_rolling_full(prev);
                if self.switch_rolling_buffer(prev.wrapped_count(), prev.offset()) {
                    return self.retry_after_switch(num_bytes);
                }
                self.rolling_cursor.restrain(prev, request, region_len);
                self.counters.inc_dropped();
                None
            }
            BufferingMode::Streaming => {
                if self.mark_rolling_full(prev) {
                    self.send_buffer_full(prev);
                }
                let destination = (prev.wrapped_count().wrapping_add(1) & 1) as usize;
                if self.rolling_mark(destination).is_full() {
                    // The other buffer has not been saved yet; drop rather
                    // than overwrite or block.
                    self.rolling_cursor.restrain(prev, request, region_len);
                    self.counters.inc_dropped();
                    return None;
                }
                if self.switch_rolling_buffer(prev.wrapped_count(), prev.offset()) {
                    return self.retry_after_switch(num_bytes);
                }
                self.rolling_cursor.restrain(prev, request, region_len);
                self.counters.inc_dropped();
                None
            }
        }
    }

    fn retry_after_switch(&self, num_bytes: usize) -> Option<Reservation<'_>> {
        let request = num_bytes as u64;
        let region_len = self.layout.rolling_len();
        let prev = self.rolling_cursor.advance(request);
        if prev.offset() + request <= region_len {
            self.counters.add_bytes_allocated(request);
            return self.rolling_arena(prev.buffer_index()).reserve(prev.offset(), num_bytes);
        }
        // Both buffers filled within a single allocation.
        self.rolling_cursor.restrain(prev, request, region_len);
        self.counters.inc_dropped();
        self.counters.inc_dropped_after_switch();
        None
    }

    /// Mark the buffer `prev` allocated from as full. First writer wins.
    fn mark_rolling_full(&self, prev: PackedCursor) -> bool {
        let data_end = prev.offset().min(self.layout.rolling_len());
        self.rolling_mark(prev.buffer_index()).mark(data_end)
    }

    /// Switch allocation to the other rolling buffer.
    ///
    /// `observed_wrapped_count` and `observed_offset` are the cursor fields
    /// the caller saw when it found the buffer full; if another thread has
    /// already switched, this returns `true` without doing anything. Returns
    /// `false` when the session is artificially stopped, the wrapped count
    /// is saturated, or (streaming) the destination has not been saved.
    pub fn switch_rolling_buffer(&self, observed_wrapped_count: u32, observed_offset: u64) -> bool {
        let switch_state = self.switch_lock.lock();
        if switch_state.artificially_stopped {
            return false;
        }
        let current = self.rolling_cursor.load();
        if current.wrapped_count() != observed_wrapped_count {
            return true;
        }
        if observed_wrapped_count == MAX_WRAPPED_COUNT {
            return false;
        }

        let next_wrapped = observed_wrapped_count + 1;
        let destination = (next_wrapped & 1) as usize;
        if self.layout.mode() == BufferingMode::Streaming
            && self.rolling_mark(destination).is_full()
        {
            return false;
        }

        self.rolling_mark(destination).clear();
        self.rolling_cursor.publish(PackedCursor::new(0, next_wrapped));
        tracing::trace!(
            generation = self.generation,
            wrapped_count = next_wrapped,
            observed_offset,
            "rolling buffer switched"
        );
        true
    }

    /// Release a filled streaming buffer back to the pool.
    ///
    /// Called by the handler (never by a producer) once it has copied the
    /// buffer out. Clears the buffer's full mark and records how much durable
    /// data the handler has saved; allocation resumes the next time a
    /// producer attempts a switch into this buffer.
    pub fn mark_rolling_buffer_saved(&self, wrapped_count: u32, durable_data_end: u64) {
        let _switch_state = self.switch_lock.lock();
        self.rolling_mark((wrapped_count & 1) as usize).clear();
        self.durable_saved_end
            .fetch_max(durable_data_end, Ordering::AcqRel);
        tracing::trace!(
            generation = self.generation,
            wrapped_count,
            durable_data_end,
            "rolling buffer saved"
        );
    }

    /// Durable-exhaustion halt: force every later rolling allocation to fail.
    fn mark_artificially_stopped(&self) {
        let mut switch_state = self.switch_lock.lock();
        if switch_state.artificially_stopped {
            return;
        }
        switch_state.artificially_stopped = true;
        // Holding the switch lock pins the wrapped count, so the snap cannot
        // race a concurrent buffer switch.
        let current = self.rolling_cursor.load();
        let region_len = self.layout.rolling_len();
        self.rolling_mark(current.buffer_index())
            .mark(current.offset().min(region_len));
        self.rolling_cursor.snap_to_end(region_len, current.wrapped_count());
    }

    fn send_buffer_full(&self, prev: PackedCursor) {
        let task = SessionTask::BufferFull {
            generation: self.generation,
            wrapped_count: prev.wrapped_count(),
            durable_data_end: self.durable_data_end(),
        };
        if self.tasks_tx.send(task).is_err() {
            tracing::debug!(
                generation = self.generation,
                "service channel closed; buffer-full notification dropped"
            );
        }
    }

    /// Extent of valid registration data in the durable region.
    ///
    /// Once the region has filled, the full mark pins the data end; until
    /// then the live cursor is the bound. Any slack past the last record is
    /// zero-filled, which readers treat as the end marker.
    #[must_use]
    pub fn durable_data_end(&self) -> u64 {
        if let Some(data_end) = self.durable_full_mark.get() {
            return data_end;
        }
        self.durable_cursor
            .load(Ordering::Acquire)
            .min(self.layout.durable_len())
    }

    /// Snapshot the registration data written so far.
    #[must_use]
    pub fn copy_durable(&self) -> Option<Vec<u8>> {
        self.durable_arena.snapshot_range(0, self.durable_data_end())
    }

    /// Snapshot a filled rolling buffer's contents.
    ///
    /// `None` if the buffer selected by `wrapped_count` is not marked full.
    #[must_use]
    pub fn copy_rolling(&self, wrapped_count: u32) -> Option<Vec<u8>> {
        let index = (wrapped_count & 1) as usize;
        let data_end = self.rolling_mark(index).get()?;
        self.rolling_arena(index).snapshot_range(0, data_end)
    }

    /// Allocate a compact string index, if any remain.
    #[must_use]
    pub fn try_alloc_string_index(&self) -> Option<NonZeroU16> {
        self.next_string_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current <= MAX_STRING_INDEX).then_some(current + 1)
            })
            .ok()
            .and_then(NonZeroU16::new)
    }

    /// Allocate a compact thread index, if any remain.
    #[must_use]
    pub fn try_alloc_thread_index(&self) -> Option<NonZeroU8> {
        self.next_thread_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current <= MAX_THREAD_INDEX).then_some(current + 1)
            })
            .ok()
            .and_then(|raw| u8::try_from(raw).ok())
            .and_then(NonZeroU8::new)
    }

    /// Point-in-time statistics for this session.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let snapshot = self.counters.snapshot();
        SessionStats {
            generation: self.generation,
            buffering_mode: self.layout.mode(),
            records_dropped: snapshot.records_dropped,
            dropped_after_switch: snapshot.dropped_after_switch,
            bytes_allocated: snapshot.bytes_allocated,
            wrapped_count: self.rolling_cursor.load().wrapped_count(),
            durable_data_end: self.durable_data_end(),
            durable_saved_end: self.durable_saved_end.load(Ordering::Acquire),
        }
    }

    /// Materialize the inspectable buffer header from the live atomics.
    #[must_use]
    pub fn buffer_header(&self) -> BufferHeader {
        let current = self.rolling_cursor.load();
        BufferHeader {
            buffering_mode: self.layout.mode(),
            total_size: self.layout.total_len(),
            durable_size: self.layout.durable_len(),
            rolling_size: self.layout.rolling_len(),
            durable_data_end: self.durable_data_end(),
            rolling_data_end: [
                self.rolling_data_end(0, current),
                self.rolling_data_end(1, current),
            ],
            wrapped_count: u64::from(current.wrapped_count()),
            records_dropped: self.counters.records_dropped(),
        }
    }

    fn rolling_data_end(&self, index: usize, current: PackedCursor) -> u64 {
        if let Some(data_end) = self.rolling_mark(index).get() {
            return data_end;
        }
        if current.buffer_index() == index {
            current.offset().min(self.layout.rolling_len())
        } else {
            0
        }
    }

    fn rolling_mark(&self, index: usize) -> &FullMark {
        if index == 0 {
            &self.rolling_full_marks[0]
        } else {
            &self.rolling_full_marks[1]
        }
    }

    fn rolling_arena(&self, index: usize) -> &RecordArena {
        if index == 0 {
            &self.rolling_arenas[0]
        } else {
            &self.rolling_arenas[1]
        }
    }

    /// Take a producer reference. Fails fast once the count has reached zero;
    /// a zero count never comes back.
    pub(crate) fn try_acquire_ref(&self) -> bool {
        let mut refs = self.refs.load(Ordering::Relaxed);
        loop {
            if refs == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                refs,
                refs + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => refs = current,
            }
        }
    }

    /// Drop a producer reference. The release that brings the count to zero
    /// while stopping posts finalization to the service thread.
    pub(crate) fn release_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            atomic::fence(Ordering::Acquire);
            if self.stopping.load(Ordering::Acquire) {
                let task = SessionTask::Finalize {
                    generation: self.generation,
                };
                if self.tasks_tx.send(task).is_err() {
                    tracing::debug!(
                        generation = self.generation,
                        "service channel closed; finalization request dropped"
                    );
                }
            }
        }
    }

    /// Begin teardown: flag the context as stopping, then drop the engine's
    /// own reference.
    pub(crate) fn begin_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.release_ref();
    }

    /// Whether this session lost records.
    pub(crate) fn had_data_loss(&self) -> bool {
        self.counters.records_dropped() > 0 || self.durable_full_mark.is_full()
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("generation", &self.generation)
            .field("buffering_mode", &self.layout.mode())
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// RAII producer reference to the active trace context.
///
/// Dereferences to [`TraceContext`]; dropping it releases the reference, and
/// the release that brings the count to zero during teardown lets the engine
/// finalize the session.
pub struct ContextHandle {
    context: Arc<TraceContext>,
}

impl ContextHandle {
    pub(crate) fn new(context: Arc<TraceContext>) -> Self {
        Self { context }
    }
}

impl core::ops::Deref for ContextHandle {
    type Target = TraceContext;

    fn deref(&self) -> &TraceContext {
        &self.context
    }
}

impl Clone for ContextHandle {
    fn clone(&self) -> Self {
        // Holding a handle keeps the count nonzero, so a plain increment
        // cannot race the count reaching zero.
        self.context.refs.fetch_add(1, Ordering::Acquire);
        Self {
            context: Arc::clone(&self.context),
        }
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.context.release_ref();
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("generation", &self.context.generation)
            .finish()
    }
}

fn arena_with_len(len: u64) -> RecordArena {
    match usize::try_from(len) {
        Ok(len) => RecordArena::new(len),
        // Capacities beyond the address space are rejected at config
        // validation; an empty arena fails every reservation if one slips
        // through.
        Err(_) => RecordArena::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NopHandler;
    use crossbeam::channel::{Receiver, unbounded};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn test_context(
        mode: BufferingMode,
        capacity: u64,
        durable_override: Option<u64>,
    ) -> Result<(TraceContext, Receiver<SessionTask>), Box<dyn std::error::Error>> {
        let (tasks_tx, tasks_rx) = unbounded();
        let layout = BufferLayout::compute(mode, capacity, durable_override)?;
        let context = TraceContext::new(7, layout, Arc::new(NopHandler), tasks_tx);
        Ok((context, tasks_rx))
    }

    #[test]
    fn test_sequential_allocations_are_disjoint() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::OneShot, 4096, None)?;
        let first = context.alloc_record(100).ok_or("first allocation refused")?;
        let second = context.alloc_record(100).ok_or("second allocation refused")?;
        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 100);
        assert_eq!(context.counters().bytes_allocated(), 200);
        Ok(())
    }

    #[test]
    fn test_zero_and_oversized_requests_are_counted_drops() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::OneShot, 4096, None)?;
        assert!(context.alloc_record(0).is_none());
        let oversized = usize::try_from(MAX_RECORD_BYTES)? + 1;
        assert!(context.alloc_record(oversized).is_none());
        assert_eq!(context.counters().records_dropped(), 2);
        Ok(())
    }

    #[test]
    fn test_oneshot_fills_permanently() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::OneShot, 1024, None)?;
        assert!(context.alloc_record(1000).is_some());
        assert!(context.alloc_record(100).is_none());
        // Every later call keeps failing and the counter keeps climbing.
        assert!(context.alloc_record(8).is_none());
        assert!(context.alloc_record(8).is_none());
        assert_eq!(context.counters().records_dropped(), 3);
        assert_eq!(context.buffer_header().rolling_data_end[0], 1000);
        Ok(())
    }

    #[test]
    fn test_circular_switches_and_reuses_buffers() -> TestResult {
        // durable 512, rolling regions of 1000 bytes each.
        let (context, _rx) = test_context(BufferingMode::Circular, 2512, Some(512))?;
        assert!(context.alloc_record(800).is_some());
        // Fills buffer 0, switches, and lands in buffer 1.
        let switched = context.alloc_record(800).ok_or("switch retry refused")?;
        assert_eq!(switched.offset(), 0);
        assert_eq!(context.stats().wrapped_count, 1);
        // Fills buffer 1, switches back to buffer 0 with no save handshake.
        assert!(context.alloc_record(800).is_some());
        assert_eq!(context.stats().wrapped_count, 2);
        assert_eq!(context.counters().records_dropped(), 0);
        Ok(())
    }

    #[test]
    fn test_streaming_refuses_unsaved_destination() -> TestResult {
        let (context, rx) = test_context(BufferingMode::Streaming, 2512, Some(512))?;
        assert!(context.alloc_record(800).is_some());
        // Buffer 0 fills; destination buffer 1 is clean, so the switch works.
        assert!(context.alloc_record(800).is_some());
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionTask::BufferFull {
                generation: 7,
                wrapped_count: 0,
                ..
            })
        ));
        // Buffer 1 fills; buffer 0 is still unsaved, so the record drops.
        assert!(context.alloc_record(800).is_none());
        assert_eq!(context.counters().records_dropped(), 1);
        // Saving buffer 0 re-opens it for the next switch.
        context.mark_rolling_buffer_saved(0, 0);
        let reused = context.alloc_record(800).ok_or("saved buffer still refused")?;
        assert_eq!(reused.offset(), 0);
        assert_eq!(context.stats().wrapped_count, 2);
        Ok(())
    }

    #[test]
    fn test_streaming_notifies_once_per_fill() -> TestResult {
        let (context, rx) = test_context(BufferingMode::Streaming, 2512, Some(512))?;
        assert!(context.alloc_record(800).is_some());
        assert!(context.alloc_record(800).is_some());
        assert!(context.alloc_record(800).is_none());
        assert!(context.alloc_record(800).is_none());
        // One notification for buffer 0 filling, one for buffer 1.
        assert_eq!(rx.try_iter().count(), 2);
        Ok(())
    }

    #[test]
    fn test_durable_exhaustion_halts_the_session() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::Circular, 2512, Some(512))?;
        assert!(context.alloc_record(8).is_some());
        assert!(context.alloc_durable_record(500).is_some());
        // Durable region has 12 bytes left; this fails and halts everything.
        assert!(context.alloc_durable_record(500).is_none());
        assert!(context.alloc_record(8).is_none());
        assert!(!context.switch_rolling_buffer(0, 0));
        assert!(context.had_data_loss());
        Ok(())
    }

    #[test]
    fn test_durable_exhaustion_is_idempotent() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::Circular, 2512, Some(512))?;
        assert!(context.alloc_durable_record(500).is_some());
        assert!(context.alloc_durable_record(100).is_none());
        assert!(context.alloc_durable_record(100).is_none());
        assert_eq!(context.durable_data_end(), 500);
        assert_eq!(context.counters().records_dropped(), 2);
        Ok(())
    }

    #[test]
    fn test_oneshot_durable_delegates_to_rolling() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::OneShot, 4096, None)?;
        let durable = context
            .alloc_durable_record(64)
            .ok_or("durable allocation refused")?;
        assert_eq!(durable.offset(), 0);
        let next = context.alloc_record(64).ok_or("follow-up allocation refused")?;
        assert_eq!(next.offset(), 64);
        Ok(())
    }

    #[test]
    fn test_string_index_allocator_is_bounded() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::Circular, 1 << 20, None)?;
        let first = context.try_alloc_string_index();
        assert_eq!(first.map(NonZeroU16::get), Some(1));
        for _ in 0..usize::from(MAX_STRING_INDEX - 1) {
            assert!(context.try_alloc_string_index().is_some());
        }
        assert!(context.try_alloc_string_index().is_none());
        assert!(context.try_alloc_string_index().is_none());
        Ok(())
    }

    #[test]
    fn test_thread_index_allocator_is_bounded() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::Circular, 1 << 20, None)?;
        for expected in 1..=MAX_THREAD_INDEX {
            let index = context.try_alloc_thread_index();
            assert_eq!(index.map(|index| u16::from(index.get())), Some(expected));
        }
        assert!(context.try_alloc_thread_index().is_none());
        Ok(())
    }

    #[test]
    fn test_refcount_gate_closes_permanently() -> TestResult {
        let (context, rx) = test_context(BufferingMode::OneShot, 4096, None)?;
        assert!(context.try_acquire_ref());
        context.begin_stop();
        // The producer reference is still out; the gate stays open.
        assert!(context.try_acquire_ref());
        context.release_ref();
        context.release_ref();
        // Count is now zero: closed forever, and finalization was posted.
        assert!(!context.try_acquire_ref());
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionTask::Finalize { generation: 7 })
        ));
        Ok(())
    }

    #[test]
    fn test_header_tracks_live_state() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::Circular, 2512, Some(512))?;
        assert!(context.alloc_record(104).is_some());
        let header = context.buffer_header();
        assert_eq!(header.buffering_mode, BufferingMode::Circular);
        assert_eq!(header.total_size, 2512);
        assert_eq!(header.durable_size, 512);
        assert_eq!(header.rolling_size, 1000);
        assert_eq!(header.rolling_data_end, [104, 0]);
        assert_eq!(header.wrapped_count, 0);
        assert_eq!(header.records_dropped, 0);
        Ok(())
    }

    #[test]
    fn test_copy_rolling_requires_full_mark() -> TestResult {
        let (context, _rx) = test_context(BufferingMode::Streaming, 2512, Some(512))?;
        assert!(context.alloc_record(800).is_some());
        assert!(context.copy_rolling(0).is_none());
        assert!(context.alloc_record(800).is_some());
        let snapshot = context.copy_rolling(0).ok_or("filled buffer not copyable")?;
        assert_eq!(snapshot.len(), 800);
        Ok(())
    }
}
