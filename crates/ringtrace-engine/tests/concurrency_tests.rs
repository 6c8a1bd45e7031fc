//! Concurrency tests driving the engine through real producer threads.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ringtrace_engine::{
    BufferingMode, Disposition, EngineState, NopHandler, SessionConfig, TraceEngine,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_oneshot_oversubscription_has_exact_winner_count() -> TestResult {
    // Ten threads race one 500-byte record each into 4096 bytes. The cursor
    // hands out offsets in fetch_add order, so exactly eight fit no matter
    // how the threads interleave.
    let engine = Arc::new(TraceEngine::new());
    engine.start(
        Arc::new(NopHandler),
        &SessionConfig::new(BufferingMode::OneShot, 4096),
    )?;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let Some(context) = engine.acquire_context() else {
                    return false;
                };
                context.alloc_record(500).is_some()
            })
        })
        .collect();

    let mut granted = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.join() {
            Ok(true) => granted += 1,
            Ok(false) => refused += 1,
            Err(_) => panic!("producer thread panicked"),
        }
    }
    assert_eq!(granted, 8);
    assert_eq!(refused, 2);
    let stats = engine.session_stats().ok_or("no stats")?;
    assert_eq!(stats.records_dropped, 2);
    assert_eq!(stats.bytes_allocated, 4000);
    Ok(())
}

#[test]
fn test_concurrent_producers_get_disjoint_ranges() -> TestResult {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 100;

    let engine = Arc::new(TraceEngine::new());
    engine.start(
        Arc::new(NopHandler),
        &SessionConfig::new(BufferingMode::OneShot, 1 << 20),
    )?;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut offsets = Vec::new();
                let Some(context) = engine.acquire_context() else {
                    return offsets;
                };
                for _ in 0..PER_THREAD {
                    if let Some(reservation) = context.alloc_record(512) {
                        reservation.fill(0x5A);
                        offsets.push(reservation.offset());
                    }
                }
                offsets
            })
        })
        .collect();

    let mut offsets = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(mut granted) => offsets.append(&mut granted),
            Err(_) => panic!("producer thread panicked"),
        }
    }

    // Total demand fits the buffer: everything granted, no offset reused.
    assert_eq!(offsets.len(), THREADS * PER_THREAD);
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), THREADS * PER_THREAD);

    let header = engine.buffer_header().ok_or("no header")?;
    assert_eq!(header.rolling_data_end[0], (THREADS * PER_THREAD * 512) as u64);
    assert_eq!(header.records_dropped, 0);
    Ok(())
}

#[test]
fn test_concurrent_durable_exhaustion_halts_cleanly() -> TestResult {
    let engine = Arc::new(TraceEngine::new());
    engine.start(
        Arc::new(NopHandler),
        &SessionConfig::new(BufferingMode::Circular, 2512).with_durable_capacity(512),
    )?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let Some(context) = engine.acquire_context() else {
                    return 0u32;
                };
                u32::from(context.alloc_durable_record(100).is_some())
            })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.join() {
            Ok(count) => granted += count,
            Err(_) => panic!("durable producer thread panicked"),
        }
    }
    // Five 100-byte grants fit in 512 durable bytes; the sixth fails and
    // halts the session for good.
    assert_eq!(granted, 5);

    let context = engine.acquire_context().ok_or("no active session")?;
    assert!(context.alloc_record(8).is_none());
    assert!(context.alloc_durable_record(8).is_none());
    let stats = engine.session_stats().ok_or("no stats")?;
    assert_eq!(stats.records_dropped, 5);
    Ok(())
}

#[test]
fn test_acquire_release_storm_survives_stop() -> TestResult {
    let engine = Arc::new(TraceEngine::new());
    engine.start(
        Arc::new(NopHandler),
        &SessionConfig::new(BufferingMode::Circular, 1 << 20),
    )?;

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    // Re-acquire every iteration so the reference count keeps
                    // crossing the teardown path while stop races it.
                    let Some(context) = engine.acquire_context() else {
                        break;
                    };
                    if context.alloc_record(64).is_none() {
                        break;
                    }
                }
            })
        })
        .collect();

    thread::yield_now();
    engine.stop(Disposition::Completed)?;
    engine.terminate(Duration::from_secs(5))?;
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(engine.acquire_context().is_none());

    for handle in producers {
        if handle.join().is_err() {
            panic!("producer thread panicked");
        }
    }
    Ok(())
}
