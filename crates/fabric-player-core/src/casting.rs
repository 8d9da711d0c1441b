//! Process-wide cast availability
//!
//! Set once when the cast framework reports availability, read-only afterwards.
//! Sessions consult it before honoring a casting request.

use std::sync::OnceLock;
use tracing::info;

static CAST_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Record whether a cast device framework is present.
///
/// Only the first call has an effect; returns false if the flag was already set.
pub fn init_cast_availability(available: bool) -> bool {
    let first = CAST_AVAILABLE.set(available).is_ok();
    if first {
        info!(available, "Cast availability initialized");
    }
    first
}

/// Whether casting can be offered; false until initialized
pub fn cast_available() -> bool {
    CAST_AVAILABLE.get().copied().unwrap_or(false)
}
