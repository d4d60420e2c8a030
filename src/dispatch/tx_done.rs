//! TX-completion handler — drains the completion queue fully on each wake.
//!
//! Asynchronous transports call [`TxHandle::complete`] from their own
//! context; the metadata lands here with its final status. The payload is
//! released, then a command expecting a synchronous reply parks in the
//! type's in-flight queue — anything else is done and released.

use log::debug;
use std::sync::atomic::Ordering;

use crate::dispatch::engine::Shared;
use crate::dispatch::metadata::TxStatus;
use crate::dispatch::tx;
use crate::error::{EscalationFailed, FaultKind};
use crate::queue::QueueError;

/// Drain the completion queue. Returns whether any completion was handled.
pub(crate) fn process(shared: &Shared) -> Result<bool, EscalationFailed> {
    let mut did_work = false;

    loop {
        let mut meta = match shared.tx_done.dequeue() {
            Ok(m) => m,
            Err(QueueError::Empty) => break,
            Err(_) => {
                shared.escalate(
                    FaultKind::DequeueFailed,
                    None,
                    "tx-completion dequeue failed",
                )?;
                break;
            }
        };
        did_work = true;

        // The transmitted payload is no longer needed.
        meta.payload = None;

        if meta.status == TxStatus::Failed {
            // A failed send will never be answered; parking it in-flight
            // would leak a ceiling slot. Report and release.
            shared.escalate(
                FaultKind::CommandTxFailed,
                Some(meta.packet_type),
                "transport completion reported failure",
            )?;
            continue;
        }

        shared.counters.sent.fetch_add(1, Ordering::Relaxed);

        let Some(state) = shared.table.lookup(meta.packet_type) else {
            // Type unregistered while the send was on the bus.
            debug!(
                "DSP[{}]: completion for unknown type {} dropped",
                shared.name, meta.packet_type
            );
            continue;
        };

        tx::park_inflight(shared, &state, meta)?;
    }

    Ok(did_work)
}
