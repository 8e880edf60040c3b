//! Application runtime for Switchyard controller processes.
//!
//! Every application built on the framework runs the same skeleton: call
//! [`init`] with the process arguments, register messenger and switch-event
//! callbacks, then [`start`], which blocks in the messenger run loop until
//! a signal or an explicit [`stop`] ends it and teardown runs.
//!
//! ```no_run
//! let _remaining = switchyard_runtime::init();
//! switchyard_runtime::add_message_received_callback("my_service", |tag, data| {
//!     tracing::info!(tag, length = data.len(), "message received");
//! });
//! switchyard_runtime::start();
//! ```
//!
//! # Components
//!
//! - [`init`] / [`start`] / [`stop`] / [`finalize`]: the lifecycle
//!   coordinator owning process-wide state, directories, and the PID file
//! - messenger: datagram IPC between services, hosting the run loop
//! - timers and statistics: driven from the run loop
//! - the OpenFlow application interface: typed switch-event handlers
//!
//! The environment is read through [`HOME_ENV`] and [`TMP_ENV`]; PID files,
//! sockets, and daemon logs all live under the temp directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod args;
mod env;
mod lifecycle;
mod logger;
mod messenger;
mod openflow;
mod pidfile;
mod signals;
mod stat;
mod timer;

pub use args::{ParsedArgs, parse, usage};
pub use env::{ProcessControl, SystemProcessControl};
pub use lifecycle::{
    HOME_ENV, TMP_ENV, die, executable_name, finalize, flush, home_dir, init, init_with_args,
    process_from_name, service_name, set_service_name, start, stop, terminate, terminate_with,
    tmp_dir,
};
pub use logger::{LogLevel, UnknownLogLevel, init_log, logging_started, set_logging_level};
pub use messenger::{
    DEFAULT_DUMP_SERVICE_NAME, DUMP_TAG, MessageCallback, add_message_received_callback,
    delete_message_received_callback, dump_enabled, send_buffer, send_message,
    set_external_callback, start_dump, stop_dump,
};
pub use openflow::{
    PACKET_IN_TAG, PacketIn, PacketInHandler, SWITCH_DISCONNECTED_TAG, SWITCH_READY_TAG,
    SwitchEventHandlers, SwitchHandler, finalize_openflow_application_interface,
    init_openflow_application_interface, openflow_application_interface_is_initialized,
};
pub use pidfile::{PidFileError, read_pid, rename_pid, unlink_pid, write_pid};
pub use stat::{add_stat, dump_stats, increment_stat, reset_stats};
pub use timer::{
    TimerId, add_periodic_event_callback, add_timer_event_callback, delete_timer_event_callback,
};
