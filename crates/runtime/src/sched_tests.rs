// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::gchan;
use crate::goroutine::GoRef;

#[test]
fn wait_all_with_no_goroutines_returns() {
    let rt = Runtime::new(2).unwrap();
    rt.wait_all();
    assert_eq!(rt.active(), 0);
    assert_eq!(rt.queued(), 0);
}

#[test]
fn spawn_runs_and_joins() {
    let rt = Runtime::new(2).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let hits = Arc::clone(&hits);
        rt.spawn(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    rt.wait_all();
    assert_eq!(hits.load(Ordering::SeqCst), 100);
    assert_eq!(rt.active(), 0);
}

#[test]
fn yielding_goroutines_all_complete() {
    let rt = Runtime::new(1).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    const N: usize = 8;
    const K: usize = 25;
    for id in 0..N {
        let log = Arc::clone(&log);
        rt.spawn(move || {
            for _ in 0..K {
                log.lock().push(id);
                yield_now();
            }
        })
        .unwrap();
    }
    rt.wait_all();

    let log = log.lock();
    assert_eq!(log.len(), N * K);
    for id in 0..N {
        assert_eq!(log.iter().filter(|&&v| v == id).count(), K, "goroutine {id} starved");
    }
}

#[test]
fn spawn_join_sum_through_channel() {
    let rt = Runtime::new(4).unwrap();
    let (tx, rx) = gchan::bounded::<u64>(64);

    for _ in 0..1000 {
        let tx = tx.clone();
        rt.spawn(move || {
            let sum: u64 = (0..100).sum();
            tx.send(sum);
        })
        .unwrap();
    }
    drop(tx);

    let total = Arc::new(AtomicUsize::new(0));
    {
        let total = Arc::clone(&total);
        rt.spawn(move || {
            let mut acc = 0u64;
            while let Some(v) = rx.recv() {
                acc += v;
            }
            total.store(acc as usize, Ordering::SeqCst);
        })
        .unwrap();
    }

    rt.wait_all();
    assert_eq!(total.load(Ordering::SeqCst), 4_950_000);
}

#[test]
fn ping_pong_rendezvous() {
    let rt = Runtime::new(2).unwrap();
    let (atx, arx) = gchan::bounded::<u64>(0);
    let (btx, brx) = gchan::bounded::<u64>(0);
    let final_val = Arc::new(AtomicUsize::new(0));

    rt.spawn(move || {
        let mut v = 0u64;
        for _ in 0..10_000 {
            atx.send(v);
            v = brx.recv().unwrap_or(v);
        }
    })
    .unwrap();

    {
        let final_val = Arc::clone(&final_val);
        rt.spawn(move || {
            let mut last = 0u64;
            for _ in 0..10_000 {
                if let Some(v) = arx.recv() {
                    last = v + 1;
                    btx.send(last);
                }
            }
            final_val.store(last as usize, Ordering::SeqCst);
        })
        .unwrap();
    }

    rt.wait_all();
    assert_eq!(final_val.load(Ordering::SeqCst), 10_000);
}

#[test]
fn park_unpark_roundtrip() {
    let rt = Runtime::new(2).unwrap();
    let slot: Arc<Mutex<Option<GoRef>>> = Arc::new(Mutex::new(None));
    let resumed = Arc::new(AtomicUsize::new(0));

    {
        let slot = Arc::clone(&slot);
        let resumed = Arc::clone(&resumed);
        rt.spawn(move || {
            let parked = park_current_with(|g| {
                *slot.lock() = Some(g);
            });
            assert!(parked);
            resumed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let g = loop {
        if let Some(g) = slot.lock().take() {
            break g;
        }
        assert!(std::time::Instant::now() < deadline, "goroutine never parked");
        std::thread::sleep(Duration::from_millis(1));
    };

    unpark(g);
    rt.wait_all();
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
}

#[test]
fn active_count_tracks_blocked_goroutines() {
    let rt = Runtime::new(2).unwrap();
    let (tx, rx) = gchan::bounded::<u8>(1);

    rt.spawn(move || {
        let _ = rx.recv();
    })
    .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rt.active(), 1, "parked goroutine still counts as active");

    tx.send(7);
    rt.wait_all();
    assert_eq!(rt.active(), 0);
}

#[test]
fn work_stealing_spreads_load() {
    let rt = Runtime::new(2).unwrap();
    let indices = Arc::new(Mutex::new(HashSet::new()));

    {
        let indices = Arc::clone(&indices);
        rt.spawn(move || {
            for _ in 0..16 {
                let indices = Arc::clone(&indices);
                let _ = spawn(move || {
                    for _ in 0..200 {
                        if let Some(i) = worker_index() {
                            indices.lock().insert(i);
                        }
                        yield_now();
                    }
                });
            }
        })
        .unwrap();
    }

    rt.wait_all();
    assert!(indices.lock().len() >= 2, "children should run on at least two workers");
}

#[test]
fn spawn_from_non_runtime_thread_fails() {
    assert!(matches!(spawn(|| {}), Err(crate::RtError::NotOnRuntime)));
}

#[test]
fn wait_all_can_be_called_repeatedly() {
    let rt = Runtime::new(2).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    for round in 1..=3 {
        let hits = Arc::clone(&hits);
        rt.spawn(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        rt.wait_all();
        assert_eq!(rt.active(), 0, "round {round} left goroutines behind");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
