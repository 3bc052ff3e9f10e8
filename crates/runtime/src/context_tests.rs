// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(unsafe_code)]

use std::cell::Cell;
use std::ffi::c_void;

use super::*;

thread_local! {
    static HOST: Cell<*mut Context> = const { Cell::new(std::ptr::null_mut()) };
    static GUEST: Cell<*mut Context> = const { Cell::new(std::ptr::null_mut()) };
    static TRACE: Cell<u32> = const { Cell::new(0) };
}

extern "C" fn guest_entry(arg: *mut c_void) {
    TRACE.with(|t| t.set(t.get() + arg as usize as u32));
    // Bounce back to the host once mid-run; a later swap resumes here.
    unsafe { swap(GUEST.with(|g| g.get()), HOST.with(|h| h.get())) };
    TRACE.with(|t| t.set(t.get() + 10));
}

extern "C" fn guest_exit() -> ! {
    TRACE.with(|t| t.set(t.get() + 100));
    unsafe { swap(GUEST.with(|g| g.get()), HOST.with(|h| h.get())) };
    std::process::abort();
}

#[test]
fn swap_resumes_after_call_site() {
    let mut stack = vec![0u8; 64 * 1024];
    let top = unsafe { stack.as_mut_ptr().add(stack.len()) };

    let mut host = Context::zeroed();
    let mut guest = Context::zeroed();
    HOST.with(|h| h.set(&mut host as *mut _));
    GUEST.with(|g| g.set(&mut guest as *mut _));
    TRACE.with(|t| t.set(0));

    make(&mut guest, top, guest_entry, 1usize as *mut c_void, guest_exit);

    // First activation runs the entry up to its bounce.
    unsafe { swap(&mut host, &guest) };
    assert_eq!(TRACE.with(|t| t.get()), 1);

    // Second activation resumes after the bounce, returns, and exits.
    unsafe { swap(&mut host, &guest) };
    assert_eq!(TRACE.with(|t| t.get()), 111);
}

extern "C" fn counting_entry(arg: *mut c_void) {
    let rounds = arg as usize as u32;
    for _ in 0..rounds {
        TRACE.with(|t| t.set(t.get() + 1));
        unsafe { swap(GUEST.with(|g| g.get()), HOST.with(|h| h.get())) };
    }
}

extern "C" fn counting_exit() -> ! {
    unsafe { swap(GUEST.with(|g| g.get()), HOST.with(|h| h.get())) };
    std::process::abort();
}

#[test]
fn repeated_round_trips_preserve_locals() {
    let mut stack = vec![0u8; 64 * 1024];
    let top = unsafe { stack.as_mut_ptr().add(stack.len()) };

    let mut host = Context::zeroed();
    let mut guest = Context::zeroed();
    HOST.with(|h| h.set(&mut host as *mut _));
    GUEST.with(|g| g.set(&mut guest as *mut _));
    TRACE.with(|t| t.set(0));

    make(&mut guest, top, counting_entry, 50usize as *mut c_void, counting_exit);

    // 50 bounces from the loop body, one final return through on_exit.
    for expected in 1..=50u32 {
        unsafe { swap(&mut host, &guest) };
        assert_eq!(TRACE.with(|t| t.get()), expected);
    }
    unsafe { swap(&mut host, &guest) };
    assert_eq!(TRACE.with(|t| t.get()), 50);
}
