//! Control plane — dynamic packet-type registration without locks on the
//! worker's state.
//!
//! Requesting threads prepare everything by value (the `TypeState` node and
//! a reply flag word), enqueue a [`ControlRequest`], raise `EV_CONTROL` and
//! block on their own flags. The worker drains the queue fully in one pass
//! and acks each request on the originating thread's flags.

use std::sync::Arc;

use log::{debug, info};

use crate::dispatch::engine::Shared;
use crate::dispatch::table::TypeState;
use crate::dispatch::metadata::PacketType;
use crate::error::FaultKind;
use crate::flags::{EventFlags, FlagBits};
use crate::queue::QueueError;

/// Bit set on the requester's flags when its request has been processed.
pub(crate) const CONTROL_ACK: FlagBits = 1 << 0;

/// One registration-protocol request. Consumed by the worker.
pub(crate) enum ControlRequest {
    Register {
        state: Arc<TypeState>,
        reply: Arc<EventFlags>,
    },
    Unregister {
        packet_type: PacketType,
        reply: Arc<EventFlags>,
    },
}

/// Drain the control queue fully. Returns whether any request was handled.
pub(crate) fn process(shared: &Shared) -> bool {
    let mut did_work = false;

    loop {
        let req = match shared.control.dequeue() {
            Ok(r) => r,
            Err(QueueError::Empty) => break,
            Err(_) => {
                // Control path continues the cycle even if escalation fails.
                let _ = shared.escalate(
                    FaultKind::DequeueFailed,
                    None,
                    "control queue dequeue failed",
                );
                break;
            }
        };
        did_work = true;

        match req {
            ControlRequest::Register { state, reply } => {
                info!(
                    "DSP[{}]: registered dynamic type {} (route {}, ceiling {})",
                    shared.name, state.value, state.config.route_id, state.config.inflight_limit
                );
                shared.table.insert_dynamic(state);
                reply.set(CONTROL_ACK);
            }
            ControlRequest::Unregister { packet_type, reply } => {
                match shared.table.remove_dynamic(packet_type) {
                    Some(state) => {
                        state.flush();
                        info!(
                            "DSP[{}]: unregistered dynamic type {}",
                            shared.name, packet_type
                        );
                    }
                    None => {
                        debug!(
                            "DSP[{}]: unregister for unknown type {}",
                            shared.name, packet_type
                        );
                    }
                }
                reply.set(CONTROL_ACK);
            }
        }
    }

    did_work
}
