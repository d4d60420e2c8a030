//! RX correlator — classifies one inbound frame per wake cycle and routes
//! it to the matching in-flight request or the type's unsolicited queue.

use log::debug;
use std::sync::atomic::Ordering;

use crate::dispatch::engine::Shared;
use crate::dispatch::metadata::ReplyTarget;
use crate::error::{EscalationFailed, FaultKind};
use crate::queue::QueueError;

pub(crate) struct RxOutcome {
    pub did_work: bool,
    /// More inbound frames are queued; keep the RX bit pending.
    pub more: bool,
}

/// Process one inbound frame.
pub(crate) fn process(shared: &Shared) -> Result<RxOutcome, EscalationFailed> {
    let frame = match shared.rx_queue.dequeue() {
        Ok(f) => f,
        Err(QueueError::Empty) => {
            return Ok(RxOutcome {
                did_work: false,
                more: false,
            });
        }
        Err(_) => {
            shared.escalate(FaultKind::DequeueFailed, None, "rx queue dequeue failed")?;
            return Ok(RxOutcome {
                did_work: false,
                more: false,
            });
        }
    };
    let more = !shared.rx_queue.is_empty();

    // Malformed/unroutable input is expected under noise — drop, not fault.
    let Some(key) = (shared.extract)(frame.as_slice()) else {
        debug!(
            "DSP[{}]: unroutable frame dropped ({} bytes)",
            shared.name,
            frame.len()
        );
        shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        return Ok(RxOutcome {
            did_work: true,
            more,
        });
    };

    let Some(state) = shared.table.lookup(key.packet_type) else {
        debug!(
            "DSP[{}]: frame for unknown type {} dropped",
            shared.name, key.packet_type
        );
        shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        return Ok(RxOutcome {
            did_work: true,
            more,
        });
    };

    // An arriving packet always retires one outstanding slot, whatever the
    // correlation outcome.
    state.retire_inflight_slot();

    if let Some(hook) = &state.config.classify {
        if let Err(e) = hook(key, frame.as_slice()) {
            shared.escalate(FaultKind::HookFailed, Some(key.packet_type), e.reason())?;
            return Ok(RxOutcome {
                did_work: true,
                more,
            });
        }
    }

    let matched = state
        .inflight
        .remove_matching(|m| m.packet_type == key.packet_type && m.packet_id == key.packet_id);

    match matched {
        Err(QueueError::NotFound | QueueError::Empty) => {
            // Unsolicited / event-style packet: deliver raw to the type's
            // asynchronous consumer.
            let delivery = &state.config.delivery;
            match delivery.async_queue.enqueue(frame) {
                Ok(()) => {
                    delivery.flags.set(delivery.async_bit);
                    shared.counters.unsolicited.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    shared.escalate(
                        FaultKind::EnqueueFailed,
                        Some(key.packet_type),
                        "async delivery enqueue failed",
                    )?;
                }
            }
        }
        Err(_) => {
            shared.escalate(
                FaultKind::DequeueFailed,
                Some(key.packet_type),
                "in-flight removal failed",
            )?;
        }
        Ok(mut meta) => {
            meta.payload = Some(frame);
            let reply = meta.reply.clone();
            let delivery = &state.config.delivery;
            match delivery.sync_queue.enqueue(meta) {
                Ok(()) => {
                    // Wake the original requester if its identity survived,
                    // else fall back to the type's shared group.
                    match reply {
                        ReplyTarget::Thread(flags) => flags.set(delivery.sync_bit),
                        ReplyTarget::Group => delivery.flags.set(delivery.sync_bit),
                    }
                    shared.counters.matched.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    shared.escalate(
                        FaultKind::EnqueueFailed,
                        Some(key.packet_type),
                        "sync delivery enqueue failed",
                    )?;
                }
            }
        }
    }

    Ok(RxOutcome {
        did_work: true,
        more,
    })
}
