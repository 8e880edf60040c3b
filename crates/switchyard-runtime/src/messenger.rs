//! Inter-process messenger.
//!
//! Services exchange datagrams over Unix sockets in the framework's temp
//! directory, one socket per registered service at `<tmp>/<service>.sock`.
//! The wire format is a two-byte big-endian tag followed by the payload;
//! inbound traffic reaches callbacks as `(tag, &Buffer)` and outbound
//! frames are built inside-out, payload first, tag prepended.
//!
//! [`run`] hosts the event loop on a current-thread tokio runtime: it
//! drains inbound sockets, executes due timers, runs the armed external
//! callback once per tick, and exits when [`stop`] is called. While a dump
//! target is set, a copy of every frame sent or received is forwarded to
//! the dump service as a text line.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use switchyard_buffer::Buffer;
use tokio::net::UnixDatagram;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::lifecycle::die;
use crate::timer;

/// Service name the `SIGUSR2` dump toggle targets.
pub const DEFAULT_DUMP_SERVICE_NAME: &str = "messenger_dump";

/// Tag carried by dump datagrams.
pub const DUMP_TAG: u16 = 0xffff;

/// Bytes of wire header in front of every payload.
const MESSAGE_HEADER_LENGTH: usize = 2;

/// Largest datagram the receive path accepts.
const MAX_DATAGRAM_LENGTH: usize = 64 * 1024;

/// Callback invoked with the tag and payload of each inbound message.
pub type MessageCallback = Arc<dyn Fn(u16, &Buffer) + Send + Sync>;

#[derive(Debug, Clone)]
struct DumpTarget {
    application: String,
    service: String,
}

struct Outbound {
    service: String,
    buffer: Buffer,
}

/// State shared between the API surface and the running loop.
struct Shared {
    socket_directory: PathBuf,
    callbacks: RwLock<HashMap<String, MessageCallback>>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    external: Mutex<Option<fn()>>,
    external_notify: Notify,
    dump: Mutex<Option<DumpTarget>>,
    pending_sends: Mutex<usize>,
    drained: Condvar,
    bound_paths: Mutex<Vec<PathBuf>>,
    running: AtomicBool,
}

struct Messenger {
    shared: Arc<Shared>,
    outbound_tx: UnboundedSender<Outbound>,
    outbound_rx: Option<UnboundedReceiver<Outbound>>,
    register_tx: UnboundedSender<String>,
    register_rx: Option<UnboundedReceiver<String>>,
}

static MESSENGER: Mutex<Option<Messenger>> = Mutex::new(None);

fn shared() -> Option<Arc<Shared>> {
    MESSENGER.lock().as_ref().map(|messenger| Arc::clone(&messenger.shared))
}

/// Set up the messenger with its socket directory.
pub(crate) fn init(socket_directory: &Path) {
    let mut guard = MESSENGER.lock();
    assert!(guard.is_none(), "messenger is already initialized");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (register_tx, register_rx) = mpsc::unbounded_channel();
    *guard = Some(Messenger {
        shared: Arc::new(Shared {
            socket_directory: socket_directory.to_path_buf(),
            callbacks: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            external: Mutex::new(None),
            external_notify: Notify::new(),
            dump: Mutex::new(None),
            pending_sends: Mutex::new(0),
            drained: Condvar::new(),
            bound_paths: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }),
        outbound_tx,
        outbound_rx: Some(outbound_rx),
        register_tx,
        register_rx: Some(register_rx),
    });
}

/// Tear the messenger down and remove its sockets.
///
/// The run loop must have exited already.
pub(crate) fn finalize() {
    let removed = { MESSENGER.lock().take() };
    let Some(messenger) = removed else { return };
    for path in messenger.shared.bound_paths.lock().drain(..) {
        let _ = fs::remove_file(path);
    }
}

/// Receive messages addressed to `service`.
///
/// The service socket is bound when the run loop starts, or immediately if
/// it is already running. Returns false when the messenger is not
/// initialised.
pub fn add_message_received_callback(
    service: &str,
    callback: impl Fn(u16, &Buffer) + Send + Sync + 'static,
) -> bool {
    let guard = MESSENGER.lock();
    let Some(messenger) = guard.as_ref() else { return false };
    messenger.shared.callbacks.write().insert(service.to_string(), Arc::new(callback));
    messenger.register_tx.send(service.to_string()).is_ok()
}

/// Stop delivering messages addressed to `service`.
///
/// Returns true when a callback was registered. The socket stays bound
/// until finalisation; traffic arriving in between is dropped with a debug
/// log.
pub fn delete_message_received_callback(service: &str) -> bool {
    let guard = MESSENGER.lock();
    let Some(messenger) = guard.as_ref() else { return false };
    messenger.shared.callbacks.write().remove(service).is_some()
}

/// Queue `data` for delivery to `service` under `tag`.
///
/// Returns false when the messenger is not initialised.
pub fn send_message(service: &str, tag: u16, data: &[u8]) -> bool {
    let buffer = Buffer::new();
    if !data.is_empty() {
        buffer.append_bytes(data);
    }
    buffer.prepend_bytes(&tag.to_be_bytes());
    enqueue(service, buffer)
}

/// Queue a copy of `buffer`'s payload for delivery to `service` under
/// `tag`. The caller's buffer is not consumed or modified.
pub fn send_buffer(service: &str, tag: u16, buffer: &Buffer) -> bool {
    let framed = buffer.duplicate();
    framed.prepend_bytes(&tag.to_be_bytes());
    enqueue(service, framed)
}

fn enqueue(service: &str, buffer: Buffer) -> bool {
    let guard = MESSENGER.lock();
    let Some(messenger) = guard.as_ref() else { return false };
    *messenger.shared.pending_sends.lock() += 1;
    let queued = messenger
        .outbound_tx
        .send(Outbound { service: service.to_string(), buffer })
        .is_ok();
    if !queued {
        let mut pending = messenger.shared.pending_sends.lock();
        *pending = pending.saturating_sub(1);
    }
    queued
}

/// Block until every queued outbound message has been handed to the
/// kernel. Returns immediately when the run loop is not active.
pub fn flush() {
    let Some(shared) = shared() else { return };
    let mut pending = shared.pending_sends.lock();
    while *pending > 0 && shared.running.load(Ordering::SeqCst) {
        shared.drained.wait_for(&mut pending, Duration::from_millis(50));
    }
}

/// Flag the run loop to exit. Callable from any thread; a flag set before
/// the loop starts makes it exit on entry.
pub(crate) fn stop() {
    let Some(shared) = shared() else { return };
    shared.shutdown.store(true, Ordering::SeqCst);
    shared.shutdown_notify.notify_one();
}

/// Arm `callback` to run once on the next loop tick.
///
/// A later call replaces an armed callback that has not run yet. Returns
/// false when the messenger is not initialised.
pub fn set_external_callback(callback: fn()) -> bool {
    let Some(shared) = shared() else { return false };
    *shared.external.lock() = Some(callback);
    shared.external_notify.notify_one();
    true
}

/// Forward copies of all traffic to `service`, labelled as coming from
/// `application`. Returns false when the messenger is not initialised.
pub fn start_dump(application: &str, service: &str) -> bool {
    let Some(shared) = shared() else { return false };
    *shared.dump.lock() = Some(DumpTarget {
        application: application.to_string(),
        service: service.to_string(),
    });
    true
}

/// Stop forwarding traffic copies. Returns true when dumping was active.
pub fn stop_dump() -> bool {
    let Some(shared) = shared() else { return false };
    shared.dump.lock().take().is_some()
}

/// Whether traffic copies are currently being forwarded.
#[must_use]
pub fn dump_enabled() -> bool {
    shared().is_some_and(|shared| shared.dump.lock().is_some())
}

/// Start dumping to the default service, or stop if already dumping.
pub(crate) fn toggle_dump(application: &str) {
    if dump_enabled() {
        stop_dump();
    } else {
        start_dump(application, DEFAULT_DUMP_SERVICE_NAME);
    }
}

/// Host the event loop until [`stop`] is called. Blocks the calling
/// thread.
pub(crate) fn run() {
    let (shared, outbound_rx, register_rx) = {
        let mut guard = MESSENGER.lock();
        let Some(messenger) = guard.as_mut() else {
            die("messenger is not initialized");
        };
        let (Some(outbound_rx), Some(register_rx)) =
            (messenger.outbound_rx.take(), messenger.register_rx.take())
        else {
            die("messenger run loop is already active");
        };
        (Arc::clone(&messenger.shared), outbound_rx, register_rx)
    };

    shared.running.store(true, Ordering::SeqCst);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => die(&format!("failed to build the messenger event loop: {error}")),
    };
    runtime.block_on(event_loop(Arc::clone(&shared), outbound_rx, register_rx));
    drop(runtime);

    shared.running.store(false, Ordering::SeqCst);
    shared.shutdown.store(false, Ordering::SeqCst);
    shared.drained.notify_all();

    // Fresh channels so the messenger can queue and run again. Anything
    // still queued at exit is discarded with the old receiver halves.
    let mut guard = MESSENGER.lock();
    if let Some(messenger) = guard.as_mut() {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        messenger.outbound_tx = outbound_tx;
        messenger.outbound_rx = Some(outbound_rx);
        messenger.register_tx = register_tx;
        messenger.register_rx = Some(register_rx);
        *messenger.shared.pending_sends.lock() = 0;
    }
}

async fn event_loop(
    shared: Arc<Shared>,
    outbound_rx: UnboundedReceiver<Outbound>,
    mut register_rx: UnboundedReceiver<String>,
) {
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
    let mut bound: HashSet<String> = HashSet::new();

    let services: Vec<String> = shared.callbacks.read().keys().cloned().collect();
    for service in services {
        bind_service(&shared, &service, &inbound_tx, &mut bound);
    }

    tokio::spawn(sender_task(Arc::clone(&shared), outbound_rx));

    let timer_wakeup = timer::wakeup_notify();

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let deadline = timer::next_deadline().map(tokio::time::Instant::from_std);

        tokio::select! {
            _ = shared.shutdown_notify.notified() => {}
            _ = shared.external_notify.notified() => {}
            Some(service) = register_rx.recv() => {
                bind_service(&shared, &service, &inbound_tx, &mut bound);
            }
            Some((service, datagram)) = inbound_rx.recv() => {
                dispatch(&shared, &service, &datagram);
            }
            () = sleep_until_deadline(deadline) => {
                timer::run_due();
            }
            () = timer_schedule_changed(timer_wakeup.as_ref()) => {}
        }

        run_external_callback(&shared);
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn timer_schedule_changed(wakeup: Option<&Arc<Notify>>) {
    match wakeup {
        Some(notify) => notify.notified().await,
        None => future::pending().await,
    }
}

fn socket_path(directory: &Path, service: &str) -> PathBuf {
    directory.join(format!("{service}.sock"))
}

fn bind_service(
    shared: &Arc<Shared>,
    service: &str,
    inbound_tx: &UnboundedSender<(String, Vec<u8>)>,
    bound: &mut HashSet<String>,
) {
    if bound.contains(service) {
        return;
    }

    let path = socket_path(&shared.socket_directory, service);
    // A stale socket from an earlier run would make the bind fail.
    let _ = fs::remove_file(&path);
    match UnixDatagram::bind(&path) {
        Ok(socket) => {
            bound.insert(service.to_string());
            shared.bound_paths.lock().push(path);
            tokio::spawn(receive_task(service.to_string(), socket, inbound_tx.clone()));
        }
        Err(error) => {
            tracing::error!(service, %error, "failed to bind messenger socket");
        }
    }
}

async fn receive_task(
    service: String,
    socket: UnixDatagram,
    inbound_tx: UnboundedSender<(String, Vec<u8>)>,
) {
    let mut datagram = vec![0u8; MAX_DATAGRAM_LENGTH];
    loop {
        match socket.recv(&mut datagram).await {
            Ok(received) => {
                if inbound_tx.send((service.clone(), datagram[..received].to_vec())).is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(service = %service, %error, "messenger receive failed");
                break;
            }
        }
    }
}

async fn sender_task(shared: Arc<Shared>, mut outbound_rx: UnboundedReceiver<Outbound>) {
    let socket = match UnixDatagram::unbound() {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(%error, "failed to create the messenger send socket");
            return;
        }
    };

    while let Some(outbound) = outbound_rx.recv().await {
        let datagram = outbound.buffer.to_vec();
        let path = socket_path(&shared.socket_directory, &outbound.service);
        match socket.send_to(&datagram, &path).await {
            Ok(_) => dump_frame(&shared, "send", &outbound.service, &datagram),
            Err(error) => {
                tracing::warn!(service = %outbound.service, %error, "failed to deliver message");
            }
        }

        let mut pending = shared.pending_sends.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            shared.drained.notify_all();
        }
    }
}

fn dispatch(shared: &Arc<Shared>, service: &str, datagram: &[u8]) {
    if datagram.len() < MESSAGE_HEADER_LENGTH {
        tracing::warn!(service, length = datagram.len(), "runt message dropped");
        return;
    }

    let tag = u16::from_be_bytes([datagram[0], datagram[1]]);
    let buffer = Buffer::new();
    buffer.append_bytes(datagram);
    drop(buffer.trim_front(MESSAGE_HEADER_LENGTH));

    dump_frame(shared, "recv", service, datagram);

    let callback = shared.callbacks.read().get(service).cloned();
    match callback {
        Some(callback) => callback(tag, &buffer),
        None => tracing::debug!(service, tag, "message for unregistered service dropped"),
    }
}

fn run_external_callback(shared: &Shared) {
    let callback = shared.external.lock().take();
    if let Some(callback) = callback {
        callback();
    }
}

/// Forward one frame to the dump service as
/// `<application> <direction> <service> <tag> <payload hex>`.
fn dump_frame(shared: &Shared, direction: &str, service: &str, datagram: &[u8]) {
    let target = shared.dump.lock().clone();
    let Some(target) = target else { return };
    if service == target.service || datagram.len() < MESSAGE_HEADER_LENGTH {
        return;
    }

    let tag = u16::from_be_bytes([datagram[0], datagram[1]]);
    let line = format!(
        "{} {direction} {service} {tag:#06x} {}",
        target.application,
        hex::encode(&datagram[MESSAGE_HEADER_LENGTH..])
    );

    let mut dump = Vec::with_capacity(MESSAGE_HEADER_LENGTH + line.len());
    dump.extend_from_slice(&DUMP_TAG.to_be_bytes());
    dump.extend_from_slice(line.as_bytes());

    // Fire and forget, bypassing the outbound queue so dump traffic never
    // feeds back into itself.
    let path = socket_path(&shared.socket_directory, &target.service);
    if let Ok(socket) = std::os::unix::net::UnixDatagram::unbound() {
        let _ = socket.set_nonblocking(true);
        if let Err(error) = socket.send_to(&dump, &path) {
            tracing::debug!(%error, "dump delivery failed");
        }
    }
}
