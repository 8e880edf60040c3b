//! Logging glue over `tracing`.
//!
//! The framework installs one global subscriber: a reloadable level filter
//! (so `set_logging_level` works after startup) feeding a format layer that
//! prefixes every line with the service identity. The identity lives in an
//! `arc-swap` slot, which is how `set_service_name` re-identifies the log
//! stream without tearing the subscriber down.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{Event, Subscriber};
use tracing_subscriber::Registry;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;

/// Severities accepted on the command line and by [`set_logging_level`].
///
/// `tracing` has no distinct `critical` or `notice` severities, so
/// `critical` filters like `error` and `notice` like `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Unrecoverable conditions.
    Critical,
    /// Errors the process survives.
    Error,
    /// Suspicious but tolerated conditions.
    Warn,
    /// Normal but significant events.
    Notice,
    /// Routine operational messages.
    Info,
    /// Developer diagnostics.
    Debug,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            Self::Critical | Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Notice | Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Raised when a level name is not one of the six accepted spellings.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown logging level: {0}")]
pub struct UnknownLogLevel(String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "notice" => Ok(Self::Notice),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            _ => Err(UnknownLogLevel(name.to_string())),
        }
    }
}

/// Event format: `<timestamp> <service> [<level>]: <fields>`.
struct ServiceFormat {
    ident: Arc<ArcSwap<String>>,
}

impl<S, N> FormatEvent<S, N> for ServiceFormat
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        SystemTime.format_time(&mut writer)?;
        write!(writer, " {} [{}]: ", self.ident.load_full(), event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct LoggerHandle {
    ident: Arc<ArcSwap<String>>,
    reload: reload::Handle<LevelFilter, Registry>,
}

static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

/// Level requested before the subscriber was installed.
static PENDING_LEVEL: Mutex<Option<LogLevel>> = Mutex::new(None);

/// Install the global subscriber identified as `ident`, or re-identify it
/// when already installed.
///
/// ANSI colouring is disabled for daemons, whose stderr ends up in a log
/// file. Returns false when another subscriber already owns the process;
/// emission still works in that case but level reloads do not apply.
pub fn init_log(ident: &str, run_as_daemon: bool) -> bool {
    if let Some(handle) = LOGGER.get() {
        handle.ident.store(Arc::new(ident.to_string()));
        return true;
    }

    let ident_slot = Arc::new(ArcSwap::from_pointee(ident.to_string()));
    let initial = PENDING_LEVEL.lock().take().map_or(LevelFilter::INFO, LogLevel::filter);
    let (filter, reload_handle) = reload::Layer::new(initial);
    let format = ServiceFormat { ident: Arc::clone(&ident_slot) };
    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .event_format(format)
            .with_ansi(!run_as_daemon)
            .with_writer(io::stderr),
    );

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    let _ = LOGGER.set(LoggerHandle { ident: ident_slot, reload: reload_handle });
    true
}

/// Change the active logging level by name.
///
/// Unknown names are rejected with an error log and leave the level
/// unchanged. A level set before [`init_log`] is remembered and applied at
/// installation time.
pub fn set_logging_level(level: &str) -> bool {
    let parsed = match level.parse::<LogLevel>() {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::error!("{error}");
            return false;
        }
    };

    match LOGGER.get() {
        Some(handle) => handle.reload.modify(|filter| *filter = parsed.filter()).is_ok(),
        None => {
            *PENDING_LEVEL.lock() = Some(parsed);
            true
        }
    }
}

/// Whether [`init_log`] has installed the subscriber.
#[must_use]
pub fn logging_started() -> bool {
    LOGGER.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_six_level_names_parse() {
        let levels: Vec<LogLevel> = ["critical", "error", "warn", "notice", "info", "debug"]
            .iter()
            .map(|name| name.parse().unwrap())
            .collect();

        assert_eq!(
            levels,
            vec![
                LogLevel::Critical,
                LogLevel::Error,
                LogLevel::Warn,
                LogLevel::Notice,
                LogLevel::Info,
                LogLevel::Debug,
            ]
        );
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!("NOTICE".parse::<LogLevel>(), Ok(LogLevel::Notice));
        assert_eq!("Debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!("".parse::<LogLevel>().is_err());
    }

    #[test]
    fn neighbouring_severities_share_filters() {
        assert_eq!(LogLevel::Critical.filter(), LogLevel::Error.filter());
        assert_eq!(LogLevel::Notice.filter(), LogLevel::Info.filter());
        assert_ne!(LogLevel::Warn.filter(), LogLevel::Debug.filter());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for level in [
            LogLevel::Critical,
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Notice,
            LogLevel::Info,
            LogLevel::Debug,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>(), Ok(level));
        }
    }
}
