//! Per-thread registration caching for string literals and thread identity.
//!
//! Producers name categories and event labels with `&'static str` literals.
//! Writing the full string into every record would waste rolling-buffer
//! space, so literals are interned once per session into the durable region
//! and referenced by a compact index afterwards. The index lookup must stay
//! off the allocation fast path, so each thread keeps a small cache keyed by
//! the literal's address, tagged with the session generation so a restart
//! invalidates it wholesale.
//!
//! The cache lives in a `thread_local` `RefCell`. Re-entrant callers (a
//! handler that itself emits records, or a signal-handler-like context) find
//! the cell already borrowed; they fall back to uncached inline references
//! rather than deadlock or panic.

use core::cell::{Cell, RefCell};
use core::num::{NonZeroU8, NonZeroU16};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::TraceContext;
use crate::records::{encoded_record_len, write_string_record, write_thread_record};

/// Distinct literals one thread can cache per session.
pub const STRING_CACHE_CAPACITY: usize = 64;

/// Longest string the durable region will intern; longer literals stay
/// inline.
pub const MAX_STRING_LEN: usize = 512;

/// How a string literal is referenced from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringRef {
    /// Interned in the durable region under this index.
    Indexed(NonZeroU16),
    /// Spelled out inline; the durable region never saw it.
    Inline(&'static str),
}

/// How the current thread is referenced from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRef {
    /// Registered in the durable region under this index.
    Indexed(NonZeroU8),
    /// Referenced by its process-wide serial number.
    Inline(u64),
}

#[derive(Clone, Copy)]
struct StringEntry {
    literal_key: usize,
    enabled: bool,
    string_ref: StringRef,
}

struct ThreadCache {
    generation: u32,
    strings: Vec<StringEntry>,
    thread_ref: Option<ThreadRef>,
}

impl ThreadCache {
    const fn empty() -> Self {
        Self {
            generation: 0,
            strings: Vec::new(),
            thread_ref: None,
        }
    }

    fn reset(&mut self, generation: u32) {
        self.generation = generation;
        self.strings.clear();
        self.thread_ref = None;
    }
}

enum CacheLookup {
    Hit { enabled: bool, string_ref: StringRef },
    Miss { has_capacity: bool },
    Unavailable,
}

enum ThreadLookup {
    Cached(ThreadRef),
    Empty,
    Unavailable,
}

thread_local! {
    static THREAD_CACHE: RefCell<ThreadCache> = const { RefCell::new(ThreadCache::empty()) };
    static THREAD_SERIAL: Cell<u64> = const { Cell::new(0) };
}

static NEXT_THREAD_SERIAL: AtomicU64 = AtomicU64::new(1);

/// The calling thread's process-wide serial number.
///
/// Minted on first use and stable for the life of the thread, across
/// sessions. Serials are never reused, so a record referencing a thread
/// inline stays unambiguous even after the thread exits.
pub fn current_thread_serial() -> u64 {
    THREAD_SERIAL.with(|slot| {
        let serial = slot.get();
        if serial != 0 {
            return serial;
        }
        let serial = NEXT_THREAD_SERIAL.fetch_add(1, Ordering::Relaxed);
        slot.set(serial);
        serial
    })
}

/// Resolve `literal` to a reference usable in a record, interning it into
/// the durable region on first sight.
///
/// With `check_category` set, the handler's category filter is consulted on
/// the first sighting per thread and the verdict is cached; `None` means the
/// category is disabled and the caller should skip the record entirely.
/// Every degraded path (cache busy, cache full, index space or durable
/// region exhausted) falls back to an inline reference instead of failing.
pub fn register_string(
    context: &TraceContext,
    literal: &'static str,
    check_category: bool,
) -> Option<StringRef> {
    let key = literal.as_ptr() as usize;
    let lookup = THREAD_CACHE.with(|cache| match cache.try_borrow_mut() {
        Ok(mut cache) => {
            if cache.generation != context.generation() {
                cache.reset(context.generation());
            }
            match cache.strings.iter().find(|entry| entry.literal_key == key) {
                Some(entry) => CacheLookup::Hit {
                    enabled: entry.enabled,
                    string_ref: entry.string_ref,
                },
                None => CacheLookup::Miss {
                    has_capacity: cache.strings.len() < STRING_CACHE_CAPACITY,
                },
            }
        }
        Err(_) => CacheLookup::Unavailable,
    });

    match lookup {
        CacheLookup::Hit { enabled: false, .. } => None,
        CacheLookup::Hit { string_ref, .. } => Some(string_ref),
        CacheLookup::Unavailable => {
            let enabled = !check_category || context.handler().is_category_enabled(literal);
            enabled.then_some(StringRef::Inline(literal))
        }
        CacheLookup::Miss { has_capacity } => {
            let enabled = !check_category || context.handler().is_category_enabled(literal);
            let string_ref = if enabled {
                intern_string(context, literal)
            } else {
                StringRef::Inline(literal)
            };
            if has_capacity {
                remember_string(context, key, enabled, string_ref);
            }
            enabled.then_some(string_ref)
        }
    }
}

/// Second borrow of the cache, after the durable write. The guards repeat
/// the phase-one checks: the session may have changed and a re-entrant call
/// may have filled the table in between.
fn remember_string(context: &TraceContext, key: usize, enabled: bool, string_ref: StringRef) {
    THREAD_CACHE.with(|cache| {
        if let Ok(mut cache) = cache.try_borrow_mut()
            && cache.generation == context.generation()
            && cache.strings.len() < STRING_CACHE_CAPACITY
            && !cache.strings.iter().any(|entry| entry.literal_key == key)
        {
            cache.strings.push(StringEntry {
                literal_key: key,
                enabled,
                string_ref,
            });
        }
    });
}

/// Resolve the calling thread to a reference usable in a record,
/// registering it in the durable region on first sight per session.
///
/// Never fails: when registration is impossible the thread is referenced
/// inline by its serial number.
pub fn register_current_thread(context: &TraceContext) -> ThreadRef {
    let lookup = THREAD_CACHE.with(|cache| match cache.try_borrow_mut() {
        Ok(mut cache) => {
            if cache.generation != context.generation() {
                cache.reset(context.generation());
            }
            match cache.thread_ref {
                Some(thread_ref) => ThreadLookup::Cached(thread_ref),
                None => ThreadLookup::Empty,
            }
        }
        Err(_) => ThreadLookup::Unavailable,
    });

    match lookup {
        ThreadLookup::Cached(thread_ref) => thread_ref,
        // Re-entrant path: reference the serial without burning an index.
        ThreadLookup::Unavailable => ThreadRef::Inline(current_thread_serial()),
        ThreadLookup::Empty => {
            let thread_ref = intern_thread(context);
            THREAD_CACHE.with(|cache| {
                if let Ok(mut cache) = cache.try_borrow_mut()
                    && cache.generation == context.generation()
                    && cache.thread_ref.is_none()
                {
                    cache.thread_ref = Some(thread_ref);
                }
            });
            thread_ref
        }
    }
}

fn intern_string(context: &TraceContext, literal: &'static str) -> StringRef {
    if literal.len() > MAX_STRING_LEN {
        return StringRef::Inline(literal);
    }
    let Some(index) = context.try_alloc_string_index() else {
        return StringRef::Inline(literal);
    };
    let Some(reservation) = context.alloc_durable_record(encoded_record_len(literal.len())) else {
        return StringRef::Inline(literal);
    };
    if write_string_record(&reservation, index, literal) {
        StringRef::Indexed(index)
    } else {
        StringRef::Inline(literal)
    }
}

fn intern_thread(context: &TraceContext) -> ThreadRef {
    let serial = current_thread_serial();
    let Some(index) = context.try_alloc_thread_index() else {
        return ThreadRef::Inline(serial);
    };
    let Some(reservation) = context.alloc_durable_record(encoded_record_len(8)) else {
        return ThreadRef::Inline(serial);
    };
    if write_thread_record(&reservation, index, serial) {
        ThreadRef::Indexed(index)
    } else {
        ThreadRef::Inline(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{NopHandler, TraceHandler};
    use crate::records::{DurableRecord, DurableRecords};
    use crossbeam::channel::unbounded;
    use ringtrace_buffer::{BufferLayout, BufferingMode};
    use std::sync::Arc;
    use std::thread;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn test_context(generation: u32) -> Result<TraceContext, Box<dyn std::error::Error>> {
        let (tasks_tx, _tasks_rx) = unbounded();
        let layout = BufferLayout::compute(BufferingMode::Circular, 1 << 16, None)?;
        Ok(TraceContext::new(
            generation,
            layout,
            Arc::new(NopHandler),
            tasks_tx,
        ))
    }

    #[derive(Debug)]
    struct DenyAll;

    impl TraceHandler for DenyAll {
        fn is_category_enabled(&self, _category: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_thread_serial_is_stable() {
        let first = current_thread_serial();
        let second = current_thread_serial();
        assert_eq!(first, second);
        assert_ne!(first, 0);
    }

    #[test]
    fn test_thread_serials_differ_across_threads() -> TestResult {
        let here = current_thread_serial();
        let there = thread::spawn(current_thread_serial)
            .join()
            .map_err(|_| "serial thread panicked")?;
        assert_ne!(here, there);
        Ok(())
    }

    #[test]
    fn test_register_string_interns_once() -> TestResult {
        let context = test_context(11)?;
        let first = register_string(&context, "category:render", false)
            .ok_or("first registration refused")?;
        let interned_end = context.durable_data_end();
        let second = register_string(&context, "category:render", false)
            .ok_or("second registration refused")?;
        assert_eq!(first, second);
        assert!(matches!(first, StringRef::Indexed(_)));
        // The cache hit must not touch the durable region again.
        assert_eq!(context.durable_data_end(), interned_end);
        Ok(())
    }

    #[test]
    fn test_disabled_category_is_cached_as_none() -> TestResult {
        let (tasks_tx, _tasks_rx) = unbounded();
        let layout = BufferLayout::compute(BufferingMode::Circular, 1 << 16, None)?;
        let context = TraceContext::new(12, layout, Arc::new(DenyAll), tasks_tx);
        assert!(register_string(&context, "category:disabled", true).is_none());
        assert!(register_string(&context, "category:disabled", true).is_none());
        // A disabled literal is never interned.
        assert_eq!(context.durable_data_end(), 0);
        Ok(())
    }

    #[test]
    fn test_long_literal_stays_inline() -> TestResult {
        let context = test_context(13)?;
        let long: &'static str = Box::leak(String::from("x").repeat(600).into_boxed_str());
        let string_ref = register_string(&context, long, false).ok_or("registration refused")?;
        assert_eq!(string_ref, StringRef::Inline(long));
        assert_eq!(context.durable_data_end(), 0);
        Ok(())
    }

    #[test]
    fn test_thread_registration_round_trips_through_durable() -> TestResult {
        let context = test_context(14)?;
        let thread_ref = register_current_thread(&context);
        let index = match thread_ref {
            ThreadRef::Indexed(index) => index,
            ThreadRef::Inline(_) => return Err("expected an indexed registration".into()),
        };
        let snapshot = context.copy_durable().ok_or("durable snapshot refused")?;
        let records: Vec<_> = DurableRecords::new(&snapshot).collect();
        assert_eq!(
            records,
            vec![DurableRecord::Thread {
                index: index.get(),
                serial: current_thread_serial(),
            }]
        );
        // Same session, same thread: cached, no second record.
        assert_eq!(register_current_thread(&context), thread_ref);
        let snapshot = context.copy_durable().ok_or("durable snapshot refused")?;
        assert_eq!(DurableRecords::new(&snapshot).count(), 1);
        Ok(())
    }

    #[test]
    fn test_new_generation_invalidates_the_cache() -> TestResult {
        let first_session = test_context(15)?;
        let second_session = test_context(16)?;
        let first = register_string(&first_session, "category:physics", false)
            .ok_or("registration in first session refused")?;
        let second = register_string(&second_session, "category:physics", false)
            .ok_or("registration in second session refused")?;
        assert!(matches!(first, StringRef::Indexed(_)));
        // Re-interned under the new session's own index space.
        assert!(matches!(second, StringRef::Indexed(_)));
        assert_ne!(second_session.durable_data_end(), 0);
        Ok(())
    }

    #[test]
    fn test_durable_exhaustion_falls_back_inline() -> TestResult {
        let (tasks_tx, _tasks_rx) = unbounded();
        let layout = BufferLayout::compute(BufferingMode::Circular, 2512, Some(512))?;
        let context = TraceContext::new(17, layout, Arc::new(NopHandler), tasks_tx);
        // Fill the durable region so interning has nowhere to go.
        assert!(context.alloc_durable_record(512).is_some());
        let string_ref =
            register_string(&context, "category:overflow", false).ok_or("registration refused")?;
        assert_eq!(string_ref, StringRef::Inline("category:overflow"));
        Ok(())
    }
}
