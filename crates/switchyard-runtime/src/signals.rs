//! Signal relay thread.
//!
//! Signal handling is deferred to an ordinary thread via `signal-hook`'s
//! iterator, so the responses themselves run in normal context:
//!
//! - `SIGINT` / `SIGTERM` flag the messenger loop to exit.
//! - `SIGUSR1` arms a statistics dump as the loop's one-shot external
//!   callback, executed on the next tick.
//! - `SIGUSR2` toggles the messenger dump stream.
//!
//! `SIGPIPE` needs no handler here: the Rust startup code already ignores
//! it process-wide.

use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;
use signal_hook::iterator::backend::Handle;

use crate::lifecycle::die;
use crate::{lifecycle, messenger, stat};

struct SignalRelay {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

static RELAY: Mutex<Option<SignalRelay>> = Mutex::new(None);

/// Spawn the relay thread if it is not already running.
pub(crate) fn install() {
    let mut relay = RELAY.lock();
    if relay.is_none() {
        *relay = Some(spawn_relay());
    }
}

/// Replace the relay after the daemon fork.
///
/// Only the forking thread survives a fork, so the relay spawned during
/// init is gone in the daemon child. The stale handle is closed and its
/// join handle abandoned; a fresh relay takes over.
pub(crate) fn reinstall_after_daemon() {
    let mut relay = RELAY.lock();
    if let Some(stale) = relay.take() {
        stale.handle.close();
        drop(stale.thread);
    }
    *relay = Some(spawn_relay());
}

/// Stop the relay thread and wait for it to exit.
pub(crate) fn uninstall() {
    let relay = { RELAY.lock().take() };
    if let Some(relay) = relay {
        relay.handle.close();
        if let Some(thread) = relay.thread {
            let _ = thread.join();
        }
    }
}

fn spawn_relay() -> SignalRelay {
    let signals = match Signals::new([SIGINT, SIGTERM, SIGUSR1, SIGUSR2]) {
        Ok(signals) => signals,
        Err(error) => die(&format!("failed to register signal handlers: {error}")),
    };
    let handle = signals.handle();
    let thread = match thread::Builder::new()
        .name("signal-relay".to_string())
        .spawn(move || relay_loop(signals))
    {
        Ok(thread) => thread,
        Err(error) => die(&format!("failed to spawn the signal relay: {error}")),
    };
    SignalRelay { handle, thread: Some(thread) }
}

fn relay_loop(mut signals: Signals) {
    for signal in signals.forever() {
        match signal {
            SIGINT | SIGTERM => {
                tracing::debug!(signal, "exit requested");
                messenger::stop();
            }
            SIGUSR1 => {
                messenger::set_external_callback(stat::dump_stats);
            }
            SIGUSR2 => {
                if let Some(name) = lifecycle::current_service_name() {
                    messenger::toggle_dump(&name);
                }
            }
            _ => {}
        }
    }
}
