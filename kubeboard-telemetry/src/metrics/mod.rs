pub mod history;
pub mod monitor;
pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};

/// Dirty flag for metrics - set when collectors append samples, cleared after
/// the presentation layer renders.
static METRIC_STATS_DIRTY: AtomicBool = AtomicBool::new(true);

/// Marks metric history as dirty (new data available). Called by collectors.
pub fn mark_metrics_dirty() {
    METRIC_STATS_DIRTY.store(true, Ordering::Release);
}

/// Checks if metric data has changed since last render.
/// Returns true and clears the flag if dirty, false otherwise.
pub fn take_metrics_dirty() -> bool {
    METRIC_STATS_DIRTY.swap(false, Ordering::AcqRel)
}
