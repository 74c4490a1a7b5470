//! Wall and monotonic millisecond clocks.

use std::sync::OnceLock;
use std::time::Instant;

static MONOTONIC_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since an arbitrary process-local epoch. Never goes backwards.
pub fn now_monotonic_ms() -> u64 {
    let epoch = MONOTONIC_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}

/// Milliseconds since the Unix epoch.
pub fn now_wall_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
