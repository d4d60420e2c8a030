//! Engine configuration.
//!
//! [`EngineTunables`] holds the plain numbers (serde-roundtrippable,
//! NVS/file-friendly); [`EngineConfig`] and [`PacketTypeConfig`] add the
//! hooks, sinks and delivery plumbing that cannot be serialized. All of it
//! is copied by value into the engine at `init`/registration time and is
//! read-only afterwards.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::PayloadBuf;
use crate::dispatch::metadata::{Metadata, RxKey};
use crate::error::{ErrorReport, HookError};
use crate::flags::{EventFlags, FlagBits};
use crate::queue::PacketQueue;
use crate::transport::RouteId;

// ---------------------------------------------------------------------------
// Hook signatures
// ---------------------------------------------------------------------------

/// Invoked by the TX scheduler just before a packet is handed to the
/// transport. May stamp headers into the payload. Failure is fatal.
pub type PreTxHook = Arc<dyn Fn(&mut Metadata) -> Result<(), HookError> + Send + Sync>;

/// Invoked by the RX correlator after type resolution, before correlation.
/// Failure is fatal and drops the frame.
pub type RxClassifyHook = Arc<dyn Fn(RxKey, &[u8]) -> Result<(), HookError> + Send + Sync>;

/// Invoked once per item drained from a type's queues at unregistration
/// (and at deinit teardown), before the item is released.
pub type FlushHook = Arc<dyn Fn(&Metadata) + Send + Sync>;

/// Maps a raw inbound frame to its packet type and correlation key.
/// Returning `None` drops the frame silently — malformed input is expected
/// under noise.
pub type ExtractFn = Arc<dyn Fn(&[u8]) -> Option<RxKey> + Send + Sync>;

// ---------------------------------------------------------------------------
// Tunables
// ---------------------------------------------------------------------------

/// Plain-number engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTunables {
    /// Inbound frame queue depth.
    pub rx_queue_depth: usize,
    /// TX-completion queue depth.
    pub tx_done_queue_depth: usize,
    /// Control-plane request queue depth.
    pub control_queue_depth: usize,
    /// Frames in the payload pool (one extra is reserved for emergency
    /// error reporting).
    pub pool_frames: usize,
    /// How long a registration call waits for the worker's acknowledgment.
    pub control_ack_timeout_ms: u32,
    /// How long `deinit` waits for the worker's termination acknowledgment.
    pub shutdown_timeout_ms: u32,
}

impl Default for EngineTunables {
    fn default() -> Self {
        Self {
            rx_queue_depth: 32,
            tx_done_queue_depth: 32,
            control_queue_depth: 8,
            pool_frames: 32,
            control_ack_timeout_ms: 500,
            shutdown_timeout_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Error sink
// ---------------------------------------------------------------------------

/// Where the worker posts escalated faults: a queue plus a flag bit the
/// supervising task waits on.
#[derive(Clone)]
pub struct ErrorSink {
    pub queue: Arc<PacketQueue<ErrorReport>>,
    pub flags: Arc<EventFlags>,
    pub bit: FlagBits,
}

impl ErrorSink {
    pub fn new(depth: usize, bit: FlagBits) -> Self {
        Self {
            queue: Arc::new(PacketQueue::new(depth)),
            flags: Arc::new(EventFlags::new()),
            bit,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Per-instance configuration, fixed at `init`.
#[derive(Clone)]
pub struct EngineConfig {
    /// Instance tag used in log lines and the worker thread name.
    pub name: &'static str,
    /// Inbound metadata extraction.
    pub extract: ExtractFn,
    pub tunables: EngineTunables,
    pub error_sink: Option<ErrorSink>,
}

impl EngineConfig {
    pub fn new(name: &'static str, extract: ExtractFn) -> Self {
        Self {
            name,
            extract,
            tunables: EngineTunables::default(),
            error_sink: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-packet-type configuration
// ---------------------------------------------------------------------------

/// Where a type's responses and unsolicited packets are delivered.
///
/// Matched (synchronous) responses land in `sync_queue`; the original
/// requester is woken with `sync_bit` — on its own thread flags when known,
/// else on the shared `flags` group. Unsolicited frames land in
/// `async_queue` and signal `async_bit` on the shared group.
#[derive(Clone)]
pub struct DeliveryConfig {
    pub sync_queue: Arc<PacketQueue<Metadata>>,
    pub async_queue: Arc<PacketQueue<PayloadBuf>>,
    pub flags: Arc<EventFlags>,
    pub sync_bit: FlagBits,
    pub async_bit: FlagBits,
}

impl DeliveryConfig {
    pub fn new(sync_depth: usize, async_depth: usize) -> Self {
        Self {
            sync_queue: Arc::new(PacketQueue::new(sync_depth)),
            async_queue: Arc::new(PacketQueue::new(async_depth)),
            flags: Arc::new(EventFlags::new()),
            sync_bit: 1 << 0,
            async_bit: 1 << 1,
        }
    }
}

/// Static or dynamic packet-type configuration.
#[derive(Clone)]
pub struct PacketTypeConfig {
    /// Route handed to the transport for this type's traffic.
    pub route_id: RouteId,
    /// In-flight command ceiling. `0` = unlimited.
    pub inflight_limit: u16,
    /// Pending-TX queue depth.
    pub pending_depth: usize,
    pub pre_tx: Option<PreTxHook>,
    pub classify: Option<RxClassifyHook>,
    pub flush: Option<FlushHook>,
    pub delivery: DeliveryConfig,
}

impl PacketTypeConfig {
    pub fn new(route_id: RouteId, delivery: DeliveryConfig) -> Self {
        Self {
            route_id,
            inflight_limit: 0,
            pending_depth: 16,
            pre_tx: None,
            classify: None,
            flush: None,
            delivery,
        }
    }
}
