//! Named monotonic counters.
//!
//! Applications bump counters from any thread; `dump_stats` logs the whole
//! table at info level. `SIGUSR1` arms `dump_stats` as the run loop's
//! one-shot external callback, so a dump can be requested from outside
//! without stopping the process.

use std::collections::BTreeMap;

use parking_lot::Mutex;

static STATS: Mutex<Option<BTreeMap<String, u64>>> = Mutex::new(None);

/// Reset the collector to an empty table.
pub(crate) fn init() {
    *STATS.lock() = Some(BTreeMap::new());
}

/// Drop the collector and every counter in it.
pub(crate) fn finalize() {
    *STATS.lock() = None;
}

/// Add one to `key`, creating it at zero first if needed.
///
/// Returns false when the collector is not initialised.
pub fn increment_stat(key: &str) -> bool {
    add_stat(key, 1)
}

/// Add `amount` to `key`, creating it at zero first if needed.
///
/// Counters saturate instead of wrapping. Returns false when the collector
/// is not initialised.
pub fn add_stat(key: &str, amount: u64) -> bool {
    let mut guard = STATS.lock();
    let Some(table) = guard.as_mut() else { return false };
    let counter = table.entry(key.to_string()).or_insert(0);
    *counter = counter.saturating_add(amount);
    true
}

/// Clear every counter, keeping the collector alive.
pub fn reset_stats() -> bool {
    let mut guard = STATS.lock();
    let Some(table) = guard.as_mut() else { return false };
    table.clear();
    true
}

/// Log every counter at info level, one line per key in key order.
pub fn dump_stats() {
    let snapshot = STATS.lock().clone();
    match snapshot {
        None => tracing::warn!("statistics collector is not initialized"),
        Some(table) if table.is_empty() => tracing::info!("no statistics found"),
        Some(table) => {
            tracing::info!("statistics:");
            for (key, value) in &table {
                tracing::info!("{key}: {value}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn value(key: &str) -> Option<u64> {
    STATS.lock().as_ref().and_then(|table| table.get(key).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SERIAL;

    #[test]
    fn counters_require_an_initialised_collector() {
        let _guard = SERIAL.lock();
        finalize();

        assert!(!increment_stat("ignored"));

        init();
        assert!(increment_stat("packets"));
        assert!(add_stat("packets", 2));
        assert_eq!(value("packets"), Some(3));

        finalize();
    }

    #[test]
    fn reset_clears_without_dropping_the_collector() {
        let _guard = SERIAL.lock();
        init();
        increment_stat("a");
        increment_stat("b");

        assert!(reset_stats());
        assert_eq!(value("a"), None);
        assert!(increment_stat("a"));
        assert_eq!(value("a"), Some(1));

        finalize();
    }

    #[test]
    fn counters_saturate_at_the_ceiling() {
        let _guard = SERIAL.lock();
        init();
        add_stat("big", u64::MAX);
        add_stat("big", 5);

        assert_eq!(value("big"), Some(u64::MAX));

        finalize();
    }
}
