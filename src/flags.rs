//! Event-flag groups.
//!
//! A 32-bit flag word producers OR into and a consumer blocks on:
//!
//! ```text
//! ┌─────────────┐  set(bits)   ┌──────────────┐  wait_any(mask)
//! │ Producer(s) │─────────────▶│  flag word   │◀────────────────  Consumer
//! └─────────────┘   notify     └──────────────┘  clears matches
//! ```
//!
//! One type serves every flag role in the engine: the worker's event group,
//! per-type delivery groups, per-thread reply flags, the shutdown ack and
//! the error-sink flag. Waits clear exactly the bits they return, so a bit
//! set while the consumer is busy is never lost.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Bitmask word used throughout the engine.
pub type FlagBits = u32;

/// Blocking bitmask flag group.
pub struct EventFlags {
    state: Mutex<FlagBits>,
    cond: Condvar,
}

impl EventFlags {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// OR `bits` into the flag word and wake all waiters.
    pub fn set(&self, bits: FlagBits) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state |= bits;
        drop(state);
        self.cond.notify_all();
    }

    /// Block until any bit in `mask` is set, then clear and return the
    /// matched bits.
    ///
    /// `timeout` semantics:
    /// - `None` — wait indefinitely.
    /// - `Some(Duration::ZERO)` — non-blocking poll.
    /// - `Some(d)` — bounded wait; returns `0` on timeout.
    pub fn wait_any(&self, mask: FlagBits, timeout: Option<Duration>) -> FlagBits {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match timeout {
            None => {
                while *state & mask == 0 {
                    state = self
                        .cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while *state & mask == 0 {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }

        let hit = *state & mask;
        *state &= !hit;
        hit
    }

    /// Read the currently-set bits in `mask` without clearing them.
    pub fn peek(&self, mask: FlagBits) -> FlagBits {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) & mask
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}
