// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[test]
fn bounded_send_recv_in_order() {
    let (tx, rx) = bounded::<u32>(3);
    for v in 1..=3 {
        assert!(tx.send(v));
    }
    assert_eq!(tx.try_send(4), Err(TrySendError::Full(4)));
    for v in 1..=3 {
        assert_eq!(rx.recv(), Some(v));
    }
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn blocked_sender_resumes_when_room_appears() {
    let (tx, rx) = bounded::<u32>(1);
    assert!(tx.send(1));

    let t = std::thread::spawn(move || tx.send(2));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(rx.recv(), Some(1));
    assert!(t.join().unwrap());
    assert_eq!(rx.recv(), Some(2));
}

#[test]
fn blocked_receiver_resumes_on_send() {
    let (tx, rx) = bounded::<u32>(1);
    let t = std::thread::spawn(move || rx.recv());
    std::thread::sleep(Duration::from_millis(30));
    assert!(tx.send(9));
    assert_eq!(t.join().unwrap(), Some(9));
}

#[test]
fn close_wakes_blocked_receiver() {
    let (tx, rx) = bounded::<u32>(1);
    let t = std::thread::spawn(move || rx.recv());
    std::thread::sleep(Duration::from_millis(30));
    tx.close();
    assert_eq!(t.join().unwrap(), None);
}

#[test]
fn rendezvous_round_trip() {
    let (tx, rx) = bounded::<&'static str>(0);
    let t = std::thread::spawn(move || rx.recv());
    assert!(tx.send("ping"));
    assert_eq!(t.join().unwrap(), Some("ping"));
}

#[test]
fn unbounded_accepts_bursts() {
    let (tx, rx) = unbounded::<u32>();
    for v in 0..500 {
        assert!(tx.send(v));
    }
    assert_eq!(tx.len(), 500);
    drop(tx);
    let mut n = 0;
    while rx.recv().is_some() {
        n += 1;
    }
    assert_eq!(n, 500);
}

#[test]
fn sender_drop_closes_for_receiver() {
    let (tx, rx) = bounded::<u32>(4);
    assert!(tx.send(1));
    drop(tx);
    assert_eq!(rx.recv(), Some(1));
    assert_eq!(rx.recv(), None);
}

#[test]
fn multi_producer_through_clones() {
    let (tx, rx) = bounded::<u32>(2);
    let mut handles = Vec::new();
    for p in 0..4u32 {
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..25 {
                assert!(tx.send(p * 100 + i));
            }
        }));
    }
    drop(tx);

    let mut got = Vec::new();
    while let Some(v) = rx.recv() {
        got.push(v);
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(got.len(), 100);
}
