//! Process-control abstraction for deterministic testing.
//!
//! Decouples process termination from the live kernel so the retry
//! schedule can be exercised with a scripted fake. Production code uses
//! [`SystemProcessControl`], which signals real processes and really
//! sleeps.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Sending signals and pacing retries, as needed by process termination.
pub trait ProcessControl {
    /// Send `signal` to `pid`. `None` probes for existence without
    /// delivering anything, mirroring `kill(pid, 0)`.
    fn send_signal(&self, pid: Pid, signal: Option<Signal>) -> Result<(), Errno>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Production process control backed by the kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessControl;

impl SystemProcessControl {
    /// Create a new system process control.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProcessControl for SystemProcessControl {
    fn send_signal(&self, pid: Pid, signal: Option<Signal>) -> Result<(), Errno> {
        signal::kill(pid, signal)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
