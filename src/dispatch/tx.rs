//! TX scheduler — one pass over a class of packet types per wake cycle.
//!
//! Types are scanned in fixed order: static slots by index, then dynamic
//! types in registration order. A type is skipped when its pending queue is
//! empty or its in-flight ceiling is reached; at most one packet per type
//! is serviced per pass so one busy type cannot starve the rest.

use log::debug;
use std::sync::atomic::Ordering;

use crate::dispatch::engine::Shared;
use crate::dispatch::metadata::{Metadata, TxHandle, TxStatus};
use crate::dispatch::table::TypeState;
use crate::error::{EscalationFailed, FaultKind};
use crate::queue::QueueError;
use crate::ticks;
use crate::transport::RouteOutcome;

/// Which half of the type table a pass covers.
#[derive(Clone, Copy)]
pub(crate) enum TxClass {
    Static,
    Dynamic,
}

/// Result of one scheduling pass.
pub(crate) struct TxOutcome {
    /// At least one packet was serviced (sent, failed or expired).
    pub did_work: bool,
    /// Every pending queue in the class is now empty; the event bit may be
    /// cleared.
    pub drained: bool,
    /// A pre-TX hook failed: stop processing for this wake cycle.
    pub stop_cycle: bool,
}

/// Run one pass over `class`.
pub(crate) fn schedule(shared: &Shared, class: TxClass) -> TxOutcome {
    let mut out = TxOutcome {
        did_work: false,
        drained: true,
        stop_cycle: false,
    };

    let dynamic;
    let states: &[std::sync::Arc<TypeState>] = match class {
        TxClass::Static => shared.table.static_slots(),
        TxClass::Dynamic => {
            dynamic = shared.table.dynamic_snapshot();
            &dynamic
        }
    };

    for state in states {
        let res = service_type(shared, state);
        out.did_work |= res.did_work;
        if res.leftover {
            out.drained = false;
        }
        if res.fatal {
            out.stop_cycle = true;
            return out;
        }
    }

    out
}

struct ServiceResult {
    did_work: bool,
    leftover: bool,
    fatal: bool,
}

/// Service one packet type: discard expired heads, then hand at most one
/// live packet to the transport.
fn service_type(shared: &Shared, state: &TypeState) -> ServiceResult {
    let mut res = ServiceResult {
        did_work: false,
        leftover: false,
        fatal: false,
    };

    if !state.admission_open() {
        // Ceiling reached — the pending work stays queued until an arriving
        // response or completion retires a slot.
        res.leftover = !state.pending.is_empty();
        return res;
    }

    let now = ticks::now_ms();
    let mut meta = loop {
        match state.pending.dequeue() {
            Ok(m) => {
                if m.is_expired(now) {
                    debug!(
                        "DSP[{}]: type {} packet {} expired after {}ms in queue",
                        shared.name,
                        m.packet_type,
                        m.packet_id,
                        now.saturating_sub(m.enqueued_at_ms)
                    );
                    shared.counters.expired.fetch_add(1, Ordering::Relaxed);
                    res.did_work = true;
                    continue;
                }
                break m;
            }
            Err(QueueError::Empty) => return res,
            Err(_) => {
                // Scheduler path: escalate and move on to the next type.
                let _ = shared.escalate(
                    FaultKind::DequeueFailed,
                    Some(state.value),
                    "pending queue dequeue failed",
                );
                return res;
            }
        }
    };

    if let Some(hook) = &state.config.pre_tx {
        if let Err(e) = hook(&mut meta) {
            let _ = shared.escalate(FaultKind::HookFailed, Some(state.value), e.reason());
            res.fatal = true;
            res.leftover = !state.pending.is_empty();
            return res;
        }
    }

    let handle = TxHandle::new(meta, shared.completion_sink());
    match shared.router.route(state.config.route_id, handle) {
        RouteOutcome::Done(handle) => {
            let mut meta = handle.into_meta();
            meta.status = TxStatus::Sent;
            // Immediate success: the payload is released now; the metadata
            // may still be needed for correlation.
            meta.payload = None;
            shared.counters.sent.fetch_add(1, Ordering::Relaxed);
            let _ = park_inflight(shared, state, meta);
            res.did_work = true;
        }
        RouteOutcome::InProgress => {
            // The transport owns the handle; bookkeeping resumes on the
            // TX-completion path.
            res.did_work = true;
        }
        RouteOutcome::Failed(handle) => {
            let meta = handle.into_meta();
            let _ = shared.escalate(
                FaultKind::CommandTxFailed,
                Some(meta.packet_type),
                "transport rejected packet",
            );
            res.did_work = true;
            // Metadata and payload released here.
        }
    }

    res.leftover = !state.pending.is_empty();
    res
}

/// Park a sent command in the type's in-flight queue, or release it if no
/// synchronous reply is expected. Shared with the TX-completion path.
pub(crate) fn park_inflight(
    shared: &Shared,
    state: &TypeState,
    meta: Metadata,
) -> Result<(), EscalationFailed> {
    if meta.flags.is_command() && meta.flags.wants_sync_reply() {
        let ty = meta.packet_type;
        match state.inflight.enqueue(meta) {
            Ok(()) => state.take_inflight_slot(),
            Err(_) => {
                shared.escalate(
                    FaultKind::EnqueueFailed,
                    Some(ty),
                    "in-flight enqueue failed",
                )?;
            }
        }
    }
    // Fire-and-forget: metadata dropped, nothing further expected.
    Ok(())
}
