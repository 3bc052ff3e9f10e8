// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native PTY backend: forkpty a shell, expose the master fd to the
//! pipeline's goroutines. `SHELL` selects the command; the child gets an
//! emulator-compatible `TERM`.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use anyhow::{bail, Context};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};

/// Exit status of a panel's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// The PTY surface a panel drives: one readable/writable fd plus resize
/// and child lifecycle. The synthetic test PTY implements the same
/// contract over pipes.
pub trait PanelPty: Send + Sync {
    /// Fd the pty_reader goroutine reads terminal output from.
    fn read_fd(&self) -> RawFd;

    /// Fd input bytes are written to.
    fn write_fd(&self) -> RawFd;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    /// Non-blocking child reap.
    fn try_wait(&self) -> anyhow::Result<Option<ExitStatus>>;

    /// Begin teardown: make any parked reader observe EOF/EIO.
    fn shutdown(&self);
}

/// Real PTY backed by `forkpty`.
pub struct NativePty {
    master: OwnedFd,
    child: Pid,
}

impl NativePty {
    /// Spawn `$SHELL` (fallback `/bin/sh`) on a fresh PTY.
    // forkpty requires unsafe: the post-fork child is partially
    // initialized until exec.
    #[allow(unsafe_code)]
    pub fn spawn(cols: u16, rows: u16) -> anyhow::Result<Self> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());
        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty leaves the child partially initialized; the
        // child branch only sets env and execs.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("MUX", "1");
                let arg = match CString::new(shell.as_bytes()) {
                    Ok(c) => c,
                    Err(_) => std::process::exit(127),
                };
                let _ = execvp(&arg, &[arg.clone()]);
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => Ok(Self { master, child }),
        }
    }

    pub fn child_pid(&self) -> u32 {
        self.child.as_raw() as u32
    }
}

impl PanelPty for NativePty {
    fn read_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    fn write_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    // TIOCSWINSZ requires unsafe for the libc::ioctl call.
    #[allow(unsafe_code)]
    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ on the owned master fd with an initialized
        // Winsize.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn try_wait(&self) -> anyhow::Result<Option<ExitStatus>> {
        match waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                Ok(Some(ExitStatus { code: Some(code), signal: None }))
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                Ok(Some(ExitStatus { code: None, signal: Some(sig as i32) }))
            }
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(_) => Ok(None),
            Err(nix::errno::Errno::ECHILD) => {
                // Already reaped (e.g. by Drop).
                Ok(Some(ExitStatus { code: None, signal: None }))
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }

    fn shutdown(&self) {
        // Hang up, then kill: once the child is gone the master fd
        // completes reads with EIO/EOF, which wakes a parked pty_reader.
        // SIGKILL covers children that ignore SIGHUP.
        let _ = kill(self.child, Signal::SIGHUP);
        let _ = kill(self.child, Signal::SIGKILL);
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        // Best-effort teardown: SIGHUP, then SIGKILL, then reap.
        let _ = kill(self.child, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let _ = kill(self.child, Signal::SIGKILL);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}
