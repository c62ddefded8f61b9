//! Wall-clock timestamps stored on mapping rows.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch; zero if the clock is before it.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
