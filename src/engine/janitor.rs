//! Cache janitor
//!
//! Readers treat expired entries as absent, but reads alone may never touch
//! a stale key again; this background sweep bounds memory by expiring them
//! proactively on a fixed interval, independent of access patterns.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use super::EngineShared;

/// Janitor loop: sweep the TTL caches and log aggregate sizes
pub(crate) fn janitor(shared: Arc<EngineShared>) {
    let slice = Duration::from_secs(1);
    let mut elapsed = Duration::ZERO;

    while shared.is_running() {
        thread::sleep(slice);
        elapsed += slice;
        if elapsed < shared.janitor_interval {
            continue;
        }
        elapsed = Duration::ZERO;

        let expired_ticks = shared.tick_cache.lock().unwrap().expire();
        let expired_instruments = shared.instrument_cache.lock().unwrap().expire();
        let stats = shared.cache_stats();
        info!(
            expired_ticks,
            expired_instruments,
            instruments = stats.instruments,
            ticks = stats.ticks,
            orders = stats.orders,
            "cache sweep"
        );
    }
}
