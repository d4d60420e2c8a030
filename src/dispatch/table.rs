//! Packet-type table: static slots fixed at engine creation plus the
//! dynamic registry.
//!
//! Static types occupy values `0..static_count` (value == slot index).
//! Dynamic types live in a vector only the worker thread ever writes;
//! producer threads read-lock just long enough to resolve a value to an
//! `Arc<TypeState>` — they never hold a reference into the table across
//! calls, and registration changes only ever travel by value through the
//! control queue.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::PacketTypeConfig;
use crate::dispatch::metadata::{Metadata, PacketId, PacketType};
use crate::queue::PacketQueue;

// ---------------------------------------------------------------------------
// Per-type state
// ---------------------------------------------------------------------------

/// Queues and counters for one packet type.
pub(crate) struct TypeState {
    pub value: PacketType,
    pub config: PacketTypeConfig,
    /// Packets accepted by `send`, waiting for the TX scheduler.
    pub pending: PacketQueue<Metadata>,
    /// Sent commands awaiting their correlated response.
    pub inflight: PacketQueue<Metadata>,
    /// Saturating count of outstanding in-flight commands.
    pub inflight_count: AtomicU16,
    next_packet_id: AtomicU16,
}

impl TypeState {
    pub fn new(value: PacketType, config: PacketTypeConfig) -> Self {
        let inflight_depth = if config.inflight_limit == 0 {
            config.pending_depth
        } else {
            config.inflight_limit as usize
        };
        let pending = PacketQueue::new(config.pending_depth);
        let inflight = PacketQueue::new(inflight_depth);
        Self {
            value,
            config,
            pending,
            inflight,
            inflight_count: AtomicU16::new(0),
            next_packet_id: AtomicU16::new(1),
        }
    }

    /// Allocate the next correlation id. Wraps at `u16`, skipping zero.
    /// Safe for concurrent producers (atomic fetch-add).
    pub fn alloc_packet_id(&self) -> PacketId {
        let mut id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    /// Whether the TX scheduler may admit another command for this type.
    pub fn admission_open(&self) -> bool {
        let limit = self.config.inflight_limit;
        limit == 0 || self.inflight_count.load(Ordering::Acquire) < limit
    }

    /// Saturating increment (slot taken when a command parks in-flight).
    pub fn take_inflight_slot(&self) {
        let _ = self
            .inflight_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_add(1));
    }

    /// Saturating decrement, floored at zero — every arriving packet
    /// retires one outstanding slot.
    pub fn retire_inflight_slot(&self) {
        let _ = self
            .inflight_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    /// Drain both queues through the configured flush hook and reset the
    /// in-flight counter. Worker thread only (unregistration, teardown).
    pub fn flush(&self) {
        self.pending.drain_with(|meta| {
            if let Some(hook) = &self.config.flush {
                hook(&meta);
            }
        });
        self.inflight.drain_with(|meta| {
            if let Some(hook) = &self.config.flush {
                hook(&meta);
            }
        });
        self.inflight_count.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

pub(crate) struct TypeTable {
    static_types: Vec<Arc<TypeState>>,
    /// Registration order. Writer: worker thread only.
    dynamic: RwLock<Vec<Arc<TypeState>>>,
}

impl TypeTable {
    pub fn new(static_configs: Vec<PacketTypeConfig>) -> Self {
        let static_types = static_configs
            .into_iter()
            .enumerate()
            .map(|(i, cfg)| Arc::new(TypeState::new(i as PacketType, cfg)))
            .collect();
        Self {
            static_types,
            dynamic: RwLock::new(Vec::new()),
        }
    }

    pub fn static_count(&self) -> usize {
        self.static_types.len()
    }

    pub fn is_static(&self, ty: PacketType) -> bool {
        (ty as usize) < self.static_types.len()
    }

    pub fn static_slots(&self) -> &[Arc<TypeState>] {
        &self.static_types
    }

    /// Resolve a type value to its state. For dynamic values the most
    /// recent registration wins.
    pub fn lookup(&self, ty: PacketType) -> Option<Arc<TypeState>> {
        if let Some(state) = self.static_types.get(ty as usize) {
            return Some(state.clone());
        }
        let dynamic = self
            .dynamic
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        dynamic.iter().rev().find(|s| s.value == ty).cloned()
    }

    pub fn has_dynamic(&self, ty: PacketType) -> bool {
        let dynamic = self
            .dynamic
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        dynamic.iter().any(|s| s.value == ty)
    }

    /// Snapshot of the dynamic list in registration order (the TX scan
    /// order). Cheap: clones `Arc`s, not state.
    pub fn dynamic_snapshot(&self) -> Vec<Arc<TypeState>> {
        self.dynamic
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamic
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Worker thread only.
    pub fn insert_dynamic(&self, state: Arc<TypeState>) {
        self.dynamic
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(state);
    }

    /// Worker thread only. Removes the most recent registration of `ty`.
    pub fn remove_dynamic(&self, ty: PacketType) -> Option<Arc<TypeState>> {
        let mut dynamic = self
            .dynamic
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let idx = dynamic.iter().rposition(|s| s.value == ty)?;
        Some(dynamic.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;

    fn cfg() -> PacketTypeConfig {
        PacketTypeConfig::new(0, DeliveryConfig::new(4, 4))
    }

    #[test]
    fn packet_ids_increase_and_skip_zero() {
        let state = TypeState::new(1, cfg());
        assert_eq!(state.alloc_packet_id(), 1);
        assert_eq!(state.alloc_packet_id(), 2);

        state.next_packet_id.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(state.alloc_packet_id(), u16::MAX);
        // Wrap lands on zero, which is skipped.
        assert_eq!(state.alloc_packet_id(), 1);
    }

    #[test]
    fn admission_respects_ceiling() {
        let mut c = cfg();
        c.inflight_limit = 2;
        let state = TypeState::new(1, c);
        assert!(state.admission_open());
        state.take_inflight_slot();
        assert!(state.admission_open());
        state.take_inflight_slot();
        assert!(!state.admission_open());
        state.retire_inflight_slot();
        assert!(state.admission_open());
    }

    #[test]
    fn retire_floors_at_zero() {
        let state = TypeState::new(1, cfg());
        state.retire_inflight_slot();
        state.retire_inflight_slot();
        assert_eq!(state.inflight_count.load(Ordering::Acquire), 0);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let state = TypeState::new(1, cfg());
        for _ in 0..100 {
            state.take_inflight_slot();
        }
        assert!(state.admission_open());
    }

    #[test]
    fn lookup_prefers_static_then_recent_dynamic() {
        let table = TypeTable::new(vec![cfg(), cfg()]);
        assert_eq!(table.static_count(), 2);
        assert!(table.lookup(0).is_some());
        assert!(table.lookup(5).is_none());

        table.insert_dynamic(Arc::new(TypeState::new(5, cfg())));
        assert!(table.has_dynamic(5));
        assert_eq!(table.lookup(5).unwrap().value, 5);

        let removed = table.remove_dynamic(5).unwrap();
        assert_eq!(removed.value, 5);
        assert!(table.remove_dynamic(5).is_none());
    }

    #[test]
    fn dynamic_snapshot_keeps_registration_order() {
        let table = TypeTable::new(Vec::new());
        table.insert_dynamic(Arc::new(TypeState::new(10, cfg())));
        table.insert_dynamic(Arc::new(TypeState::new(11, cfg())));
        let snap = table.dynamic_snapshot();
        assert_eq!(snap[0].value, 10);
        assert_eq!(snap[1].value, 11);
    }
}
