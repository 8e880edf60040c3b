//! PID-file helpers.
//!
//! A running service is advertised as `<directory>/<name>.pid` holding its
//! ASCII decimal PID. The directory is normally the framework's temp
//! directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use thiserror::Error;

/// Errors raised by the PID-file helpers.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Underlying filesystem failure.
    #[error("pid file i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The file exists but does not hold a positive decimal PID.
    #[error("pid file {path} is malformed")]
    Malformed {
        /// Path of the offending file.
        path: PathBuf,
    },
}

fn pid_file_path(directory: &Path, name: &str) -> PathBuf {
    directory.join(format!("{name}.pid"))
}

/// Write the calling process's PID for `name` under `directory`.
pub fn write_pid(directory: &Path, name: &str) -> Result<(), PidFileError> {
    let path = pid_file_path(directory, name);
    fs::write(&path, format!("{}\n", std::process::id()))?;
    Ok(())
}

/// Read the PID recorded for `name` under `directory`.
pub fn read_pid(directory: &Path, name: &str) -> Result<Pid, PidFileError> {
    let path = pid_file_path(directory, name);
    let contents = fs::read_to_string(&path)?;
    let value: i32 = contents
        .trim()
        .parse()
        .map_err(|_| PidFileError::Malformed { path: path.clone() })?;
    if value <= 0 {
        return Err(PidFileError::Malformed { path });
    }
    Ok(Pid::from_raw(value))
}

/// Remove the PID file recorded for `name` under `directory`.
pub fn unlink_pid(directory: &Path, name: &str) -> Result<(), PidFileError> {
    fs::remove_file(pid_file_path(directory, name))?;
    Ok(())
}

/// Atomically rename the PID file for `old` to `new` within `directory`.
pub fn rename_pid(directory: &Path, old: &str, new: &str) -> Result<(), PidFileError> {
    fs::rename(pid_file_path(directory, old), pid_file_path(directory, new))?;
    Ok(())
}
