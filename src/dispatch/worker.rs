//! The worker loop — a level-triggered reactor, not a business FSM.
//!
//! Two states only: RUNNING (steady) and TERMINATING (terminal). Each wake
//! ORs the newly-signaled bits into a running pending mask, then processes
//! event classes in fixed priority:
//!
//! ```text
//! terminate → control → TX-done → RX → static TX → dynamic TX
//! ```
//!
//! A class bit is cleared only once its backlog is drained, so work the
//! cycle could not finish is retried on the next wake. A cycle that makes
//! no progress while bits remain pending (every remaining type is
//! ceiling-blocked) parks in an indefinite wait instead of spinning — the
//! completion or response that unblocks it raises its own bit.
//!
//! Termination is acknowledged immediately and the thread exits without
//! draining queues; `deinit` owns the structured teardown.

use std::sync::atomic::Ordering;
use std::time::Duration;

use log::info;

use crate::dispatch::engine::Shared;
use crate::dispatch::{
    control, rx, tx, tx_done, EV_ALL, EV_CONTROL, EV_RX, EV_TERMINATE, EV_TX_DONE, EV_TX_DYNAMIC,
    EV_TX_STATIC,
};
use crate::flags::FlagBits;

/// Bit set on the engine's shutdown flags when the worker has exited its
/// loop.
pub(crate) const SHUTDOWN_ACK: FlagBits = 1 << 0;

pub(crate) fn run(shared: &Shared) {
    info!("DSP[{}]: worker up", shared.name);

    let mut pending: FlagBits = 0;
    let mut block = true;

    'reactor: loop {
        let timeout = if block { None } else { Some(Duration::ZERO) };
        pending |= shared.flags.wait_any(EV_ALL, timeout);
        if pending == 0 {
            block = true;
            continue;
        }

        if pending & EV_TERMINATE != 0 {
            break 'reactor;
        }

        let mut progressed = false;
        let mut aborted = false;

        if pending & EV_CONTROL != 0 {
            pending &= !EV_CONTROL;
            progressed |= control::process(shared);
        }

        if !aborted && pending & EV_TX_DONE != 0 {
            pending &= !EV_TX_DONE;
            match tx_done::process(shared) {
                Ok(did_work) => progressed |= did_work,
                Err(_) => aborted = true,
            }
        }

        if !aborted && pending & EV_RX != 0 {
            match rx::process(shared) {
                Ok(out) => {
                    progressed |= out.did_work;
                    if !out.more {
                        pending &= !EV_RX;
                    }
                }
                Err(_) => aborted = true,
            }
        }

        if !aborted && pending & EV_TX_STATIC != 0 {
            let out = tx::schedule(shared, tx::TxClass::Static);
            progressed |= out.did_work;
            if out.drained {
                pending &= !EV_TX_STATIC;
            }
            if out.stop_cycle {
                aborted = true;
            }
        }

        if !aborted && pending & EV_TX_DYNAMIC != 0 {
            let out = tx::schedule(shared, tx::TxClass::Dynamic);
            progressed |= out.did_work;
            if out.drained {
                pending &= !EV_TX_DYNAMIC;
            }
        }

        // No forward progress with bits still pending means every remaining
        // class is blocked on an external event — wait for one.
        block = !progressed;
    }

    shared.running.store(false, Ordering::Release);
    shared.shutdown.set(SHUTDOWN_ACK);
    info!("DSP[{}]: worker terminated", shared.name);
}
