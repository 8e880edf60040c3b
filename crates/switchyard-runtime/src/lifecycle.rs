//! Application lifecycle coordinator.
//!
//! One process hosts one Switchyard application; this module owns its
//! process-wide state and the fixed bring-up/teardown order. [`init`]
//! parses the shared command-line options, starts logging, resolves the
//! home and temp directories, installs the signal relay, and brings up the
//! messenger, statistics, and timer subsystems in that order. [`start`]
//! daemonises when requested, advertises the PID file, and blocks in the
//! messenger run loop until [`stop`]; teardown then runs in reverse.
//!
//! Lock order: this module's state lock is always taken before any
//! collaborator state.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use daemonize::Daemonize;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use parking_lot::Mutex;

use crate::env::{ProcessControl, SystemProcessControl};
use crate::pidfile::{self, PidFileError};
use crate::{args, logger, messenger, openflow, signals, stat, timer};

/// Environment variable naming the base directory. Defaults to `/`.
pub const HOME_ENV: &str = "SWITCHYARD_HOME";

/// Environment variable naming the temp directory, which holds PID files
/// and messenger sockets. Defaults to `<home>/tmp`.
pub const TMP_ENV: &str = "SWITCHYARD_TMP";

/// Liveness polls after `SIGTERM` before [`terminate`] gives up.
const MAX_TERMINATE_POLLS: u32 = 10;

/// Process-wide lifecycle state.
struct Lifecycle {
    initialized: bool,
    started: bool,
    run_as_daemon: bool,
    name: Option<String>,
    executable: Option<String>,
    home: Option<PathBuf>,
    tmp: Option<PathBuf>,
}

impl Lifecycle {
    const fn new() -> Self {
        Self {
            initialized: false,
            started: false,
            run_as_daemon: false,
            name: None,
            executable: None,
            home: None,
            tmp: None,
        }
    }

    fn home_locked(&mut self) -> PathBuf {
        if let Some(home) = &self.home {
            return home.clone();
        }
        let home = resolve_home(env::var_os(HOME_ENV));
        self.home = Some(home.clone());
        home
    }

    fn tmp_locked(&mut self) -> PathBuf {
        if let Some(tmp) = &self.tmp {
            return tmp.clone();
        }
        let home = self.home_locked();
        let tmp = resolve_tmp(env::var_os(TMP_ENV), &home);
        self.tmp = Some(tmp.clone());
        tmp
    }
}

static LIFECYCLE: Mutex<Lifecycle> = Mutex::new(Lifecycle::new());

fn resolve_home(raw: Option<OsString>) -> PathBuf {
    match raw {
        None => PathBuf::from("/"),
        Some(path) => fs::canonicalize(&path).unwrap_or_else(|error| {
            tracing::info!(
                path = %Path::new(&path).display(),
                %error,
                "could not resolve the home directory, falling back to /"
            );
            PathBuf::from("/")
        }),
    }
}

fn resolve_tmp(raw: Option<OsString>, home: &Path) -> PathBuf {
    match raw {
        None => home.join("tmp"),
        Some(path) => fs::canonicalize(&path).unwrap_or_else(|error| {
            tracing::info!(
                path = %Path::new(&path).display(),
                %error,
                "could not resolve the temp directory, falling back to /tmp"
            );
            PathBuf::from("/tmp")
        }),
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned())
}

/// Log `message` at error level and abort the process.
pub fn die(message: &str) -> ! {
    tracing::error!("{message}");
    std::process::exit(1);
}

fn assert_initialized(state: &Lifecycle) {
    if !state.initialized {
        die("the runtime is not initialized; call init() first");
    }
}

/// Initialise the runtime from the process's own arguments.
///
/// See [`init_with_args`].
pub fn init() -> Vec<String> {
    init_with_args(env::args().collect())
}

/// Initialise the runtime from an explicit argument vector.
///
/// Recognised options (see [`args::parse`]) are applied and stripped; the
/// returned vector holds the program name and everything the framework
/// does not recognise, for the application to parse itself. `--help`
/// prints usage and exits with status 0.
///
/// Bring-up order: logging, directory resolution, temp-directory check
/// (fatal when missing), signal relay, messenger, statistics, timers.
///
/// # Panics
///
/// Panics when the runtime is already initialised; call [`finalize`]
/// first.
pub fn init_with_args(arguments: Vec<String>) -> Vec<String> {
    let mut state = LIFECYCLE.lock();
    assert!(!state.initialized, "the runtime is already initialized; call finalize() first");

    let parsed = args::parse(arguments);
    let executable = parsed
        .remaining
        .first()
        .map_or_else(|| "switchyard".to_string(), |program| basename(program));

    if parsed.show_help {
        args::usage(&executable);
        std::process::exit(0);
    }

    let name = parsed.service_name.clone().unwrap_or_else(|| executable.clone());
    state.name = Some(name.clone());
    state.executable = Some(executable);
    state.run_as_daemon = parsed.run_as_daemon;

    logger::init_log(&name, parsed.run_as_daemon);
    if let Some(level) = &parsed.logging_level {
        logger::set_logging_level(level);
    }

    let tmp = state.tmp_locked();
    if !tmp.is_dir() {
        die(&format!("temporary directory does not exist: {}", tmp.display()));
    }

    signals::install();
    messenger::init(&tmp);
    stat::init();
    timer::init();

    state.initialized = true;
    parsed.remaining
}

/// Run the application until [`stop`].
///
/// Daemonises first when `--daemonize` was given, writes the PID file,
/// then blocks in the messenger run loop. When the loop exits,
/// [`finalize`] tears everything down before this function returns.
pub fn start() {
    {
        let mut state = LIFECYCLE.lock();
        assert_initialized(&state);

        let name = state.name.clone().unwrap_or_default();
        let home = state.home_locked();
        let tmp = state.tmp_locked();
        tracing::debug!(name = %name, home = %home.display(), "starting");

        if state.run_as_daemon {
            daemonise(&home, &tmp, &name);
            signals::reinstall_after_daemon();
        }
        if let Err(error) = pidfile::write_pid(&tmp, &name) {
            die(&format!("failed to write the pid file for {name}: {error}"));
        }
        state.started = true;
    }

    messenger::run();
    finalize();
}

fn daemonise(home: &Path, tmp: &Path, name: &str) {
    let log_path = tmp.join(format!("{name}.log"));
    let stdout = match fs::File::create(&log_path) {
        Ok(file) => file,
        Err(error) => die(&format!("failed to open {}: {error}", log_path.display())),
    };
    let stderr = match stdout.try_clone() {
        Ok(file) => file,
        Err(error) => die(&format!("failed to open {}: {error}", log_path.display())),
    };

    let daemon = Daemonize::new().working_directory(home).stdout(stdout).stderr(stderr);
    if let Err(error) = daemon.start() {
        die(&format!("failed to daemonize: {error}"));
    }
}

/// Ask the messenger run loop to exit. Callable from any thread.
pub fn stop() {
    messenger::stop();
}

/// Block until every queued outbound message has been handed off.
pub fn flush() {
    messenger::flush();
}

/// Tear the runtime down: OpenFlow application interface (when
/// initialised), messenger, statistics, timers, signal relay, PID file.
/// Afterwards the runtime is uninitialised and [`init`] may run again.
pub fn finalize() {
    {
        let mut state = LIFECYCLE.lock();
        assert_initialized(&state);

        if let Some(name) = &state.name {
            tracing::debug!(name = %name, "terminating");
        }

        openflow::finalize_if_initialized();
        messenger::finalize();
        stat::finalize();
        timer::finalize();

        state.started = false;
        if let (Some(tmp), Some(name)) = (state.tmp.clone(), state.name.clone()) {
            if let Err(error) = pidfile::unlink_pid(&tmp, &name) {
                tracing::debug!(%error, "could not unlink the pid file");
            }
        }
        state.name = None;
        state.executable = None;
        state.home = None;
        state.tmp = None;
        state.initialized = false;
    }

    // Outside the state lock: the relay thread takes it for signal
    // responses, and uninstall joins that thread.
    signals::uninstall();
}

/// Replace the service name.
///
/// Renames the PID file when the application has already started and
/// re-identifies the log stream when logging is up.
pub fn set_service_name(name: &str) {
    let mut state = LIFECYCLE.lock();

    if let Some(old) = state.name.clone() {
        if state.started && old != name {
            let tmp = state.tmp_locked();
            if let Err(error) = pidfile::rename_pid(&tmp, &old, name) {
                tracing::warn!(%error, "could not rename the pid file");
            }
        }
    }
    state.name = Some(name.to_string());

    if logger::logging_started() {
        logger::init_log(name, state.run_as_daemon);
    }
}

/// The configured service name.
///
/// Fatal before [`init`].
#[must_use]
pub fn service_name() -> String {
    let state = LIFECYCLE.lock();
    match &state.name {
        Some(name) => name.clone(),
        None => die("the service name is not set; call init() first"),
    }
}

/// Basename of the executable, for usage text.
///
/// Fatal before [`init`].
#[must_use]
pub fn executable_name() -> String {
    let state = LIFECYCLE.lock();
    match &state.executable {
        Some(executable) => executable.clone(),
        None => die("the executable name is not set; call init() first"),
    }
}

pub(crate) fn current_service_name() -> Option<String> {
    LIFECYCLE.lock().name.clone()
}

/// The base directory, resolved on first use from [`HOME_ENV`].
#[must_use]
pub fn home_dir() -> PathBuf {
    LIFECYCLE.lock().home_locked()
}

/// The temp directory, resolved on first use from [`TMP_ENV`].
#[must_use]
pub fn tmp_dir() -> PathBuf {
    LIFECYCLE.lock().tmp_locked()
}

/// PID of the service advertised as `name` in the temp directory.
pub fn process_from_name(name: &str) -> Result<Pid, PidFileError> {
    let tmp = tmp_dir();
    pidfile::read_pid(&tmp, name)
}

/// Terminate the process `pid` with `SIGTERM` and wait for it to go away.
///
/// A process that was already gone counts as success. Polls liveness once
/// per second, up to ten times; a process still alive after that, or one
/// the caller may not signal, yields false with an error log.
///
/// # Panics
///
/// Panics when `pid` is not positive.
pub fn terminate(pid: Pid) -> bool {
    terminate_with(&SystemProcessControl::new(), pid)
}

/// [`terminate`] against an explicit [`ProcessControl`], which is how the
/// retry schedule is exercised in tests.
pub fn terminate_with(control: &impl ProcessControl, pid: Pid) -> bool {
    assert!(pid.as_raw() > 0, "pid must be positive");

    match control.send_signal(pid, Some(Signal::SIGTERM)) {
        Err(Errno::ESRCH) => return true,
        Err(errno) => {
            tracing::error!(pid = pid.as_raw(), %errno, "failed to signal the process");
            return false;
        }
        Ok(()) => {}
    }

    let mut polls = 0;
    while control.send_signal(pid, None).is_ok() {
        polls += 1;
        if polls > MAX_TERMINATE_POLLS {
            tracing::error!(pid = pid.as_raw(), "process did not exit in time");
            return false;
        }
        control.sleep(Duration::from_secs(1));
    }
    true
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::*;

    #[test]
    fn home_falls_back_to_root() {
        assert_eq!(resolve_home(None), PathBuf::from("/"));
        assert_eq!(resolve_home(Some("/no/such/directory/anywhere".into())), PathBuf::from("/"));
    }

    #[test]
    fn home_canonicalises_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();

        let resolved = resolve_home(Some(dir.path().as_os_str().to_owned()));

        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn tmp_defaults_to_a_home_subdirectory() {
        assert_eq!(resolve_tmp(None, Path::new("/")), PathBuf::from("/tmp"));
        assert_eq!(resolve_tmp(None, Path::new("/srv/app")), PathBuf::from("/srv/app/tmp"));
    }

    #[test]
    fn tmp_falls_back_when_unresolvable() {
        let resolved = resolve_tmp(Some("/no/such/directory/anywhere".into()), Path::new("/"));

        assert_eq!(resolved, PathBuf::from("/tmp"));
    }

    #[test]
    fn basename_strips_leading_directories() {
        assert_eq!(basename("/usr/local/bin/switch_app"), "switch_app");
        assert_eq!(basename("switch_app"), "switch_app");
    }

    /// Scripted process control: queued responses, counted sleeps.
    struct ScriptedControl {
        responses: RefCell<VecDeque<Result<(), Errno>>>,
        sleeps: Cell<u32>,
    }

    impl ScriptedControl {
        fn new(responses: &[Result<(), Errno>]) -> Self {
            Self {
                responses: RefCell::new(responses.iter().copied().collect()),
                sleeps: Cell::new(0),
            }
        }
    }

    impl ProcessControl for ScriptedControl {
        fn send_signal(&self, _pid: Pid, _signal: Option<Signal>) -> Result<(), Errno> {
            self.responses.borrow_mut().pop_front().unwrap_or(Err(Errno::ESRCH))
        }

        fn sleep(&self, _duration: Duration) {
            self.sleeps.set(self.sleeps.get() + 1);
        }
    }

    #[test]
    fn terminate_succeeds_after_two_liveness_polls() {
        // SIGTERM accepted, alive for two polls, then gone.
        let control = ScriptedControl::new(&[Ok(()), Ok(()), Ok(()), Err(Errno::ESRCH)]);

        assert!(terminate_with(&control, Pid::from_raw(4242)));
        assert_eq!(control.sleeps.get(), 2);
    }

    #[test]
    fn terminate_of_a_gone_process_is_success_without_sleeping() {
        let control = ScriptedControl::new(&[Err(Errno::ESRCH)]);

        assert!(terminate_with(&control, Pid::from_raw(4242)));
        assert_eq!(control.sleeps.get(), 0);
    }

    #[test]
    fn terminate_without_permission_fails_immediately() {
        let control = ScriptedControl::new(&[Err(Errno::EPERM)]);

        assert!(!terminate_with(&control, Pid::from_raw(1)));
        assert_eq!(control.sleeps.get(), 0);
    }

    #[test]
    fn terminate_gives_up_after_ten_polls() {
        let responses = vec![Ok(()); 20];
        let control = ScriptedControl::new(&responses);

        assert!(!terminate_with(&control, Pid::from_raw(4242)));
        assert_eq!(control.sleeps.get(), 10);
    }
}
