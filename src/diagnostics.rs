//! Dispatch diagnostics: hit counters and a serializable stats snapshot.
//!
//! Counters are relaxed atomics bumped on the hot paths; `collect` folds
//! them together with queue depths into a [`DispatchStats`] a supervising
//! task can ship over its own telemetry channel.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::dispatch::engine::Shared;
use crate::dispatch::metadata::PacketType;

/// Relaxed hit counters, engine-lifetime cumulative.
pub(crate) struct Counters {
    /// Packets handed to the transport (immediate or completed).
    pub sent: AtomicU32,
    /// Responses correlated to an in-flight request.
    pub matched: AtomicU32,
    /// Frames delivered to an asynchronous consumer queue.
    pub unsolicited: AtomicU32,
    /// Pending packets discarded by age.
    pub expired: AtomicU32,
    /// Inbound frames dropped (malformed or unknown type).
    pub dropped: AtomicU32,
    /// Faults escalated to the error sink (or the log).
    pub faults: AtomicU32,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            sent: AtomicU32::new(0),
            matched: AtomicU32::new(0),
            unsolicited: AtomicU32::new(0),
            expired: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            faults: AtomicU32::new(0),
        }
    }
}

/// Per-type queue depths at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeStats {
    pub packet_type: PacketType,
    pub pending: usize,
    pub inflight: usize,
    pub inflight_count: u16,
}

/// One engine-wide snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchStats {
    pub rx_depth: usize,
    pub tx_done_depth: usize,
    pub control_depth: usize,
    pub static_types: usize,
    pub dynamic_types: usize,
    pub pool_available: usize,
    pub sent: u32,
    pub matched: u32,
    pub unsolicited: u32,
    pub expired: u32,
    pub dropped: u32,
    pub faults: u32,
    pub types: Vec<TypeStats>,
}

pub(crate) fn collect(shared: &Shared) -> DispatchStats {
    let mut types = Vec::new();
    for state in shared.table.static_slots() {
        types.push(TypeStats {
            packet_type: state.value,
            pending: state.pending.len(),
            inflight: state.inflight.len(),
            inflight_count: state.inflight_count.load(Ordering::Acquire),
        });
    }
    for state in shared.table.dynamic_snapshot() {
        types.push(TypeStats {
            packet_type: state.value,
            pending: state.pending.len(),
            inflight: state.inflight.len(),
            inflight_count: state.inflight_count.load(Ordering::Acquire),
        });
    }

    let c = &shared.counters;
    DispatchStats {
        rx_depth: shared.rx_queue.len(),
        tx_done_depth: shared.tx_done.len(),
        control_depth: shared.control.len(),
        static_types: shared.table.static_count(),
        dynamic_types: shared.table.dynamic_count(),
        pool_available: shared.pool.available(),
        sent: c.sent.load(Ordering::Relaxed),
        matched: c.matched.load(Ordering::Relaxed),
        unsolicited: c.unsolicited.load(Ordering::Relaxed),
        expired: c.expired.load(Ordering::Relaxed),
        dropped: c.dropped.load(Ordering::Relaxed),
        faults: c.faults.load(Ordering::Relaxed),
        types,
    }
}
