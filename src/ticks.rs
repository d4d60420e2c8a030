//! Monotonic millisecond tick source.
//!
//! Packet ages and expiry checks are computed against this clock. The epoch
//! is pinned on first use so tick values stay small and subtraction-safe.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the process-wide epoch. Monotonic, never wraps in
/// any realistic uptime.
pub fn now_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
