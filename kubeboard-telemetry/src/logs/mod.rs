pub mod buffer;
pub mod tail;

use std::sync::atomic::{AtomicBool, Ordering};

/// Dirty flag for log tabs - set when tail pollers append lines, cleared
/// after the presentation layer renders.
static LOG_STATS_DIRTY: AtomicBool = AtomicBool::new(true);

/// Marks log buffers as dirty (new lines available). Called by tail pollers.
pub fn mark_logs_dirty() {
    LOG_STATS_DIRTY.store(true, Ordering::Release);
}

/// Checks if any log buffer changed since last render.
/// Returns true and clears the flag if dirty, false otherwise.
pub fn take_logs_dirty() -> bool {
    LOG_STATS_DIRTY.swap(false, Ordering::AcqRel)
}
