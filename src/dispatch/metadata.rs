//! Per-packet bookkeeping.
//!
//! A [`Metadata`] is created when a packet enters the engine for TX and
//! lives until the send (and, for commands, the correlated response) no
//! longer needs it. It moves between exactly one queue at a time — pending,
//! then in-flight, then the sync delivery queue — and is released by drop.

use core::fmt;
use std::sync::Arc;

use log::warn;

use crate::buffer::PayloadBuf;
use crate::flags::{EventFlags, FlagBits};
use crate::queue::PacketQueue;

/// Logical packet category value.
pub type PacketType = u16;

/// Per-type monotonic correlation id (wraps at `u16`; zero is never issued).
pub type PacketId = u16;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Per-packet flag bits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    const COMMAND: u8 = 1 << 0;
    const SYNC_STATUS: u8 = 1 << 1;
    const SYNC_DATA: u8 = 1 << 2;

    /// Fire-and-forget event packet.
    pub const fn event() -> Self {
        Self(0)
    }

    /// Command packet (a response is expected on the wire).
    pub const fn command() -> Self {
        Self(Self::COMMAND)
    }

    /// The sender waits for a synchronous status reply.
    pub const fn with_sync_status(self) -> Self {
        Self(self.0 | Self::SYNC_STATUS)
    }

    /// The sender waits for a synchronous data reply.
    pub const fn with_sync_data(self) -> Self {
        Self(self.0 | Self::SYNC_DATA)
    }

    pub const fn is_command(self) -> bool {
        self.0 & Self::COMMAND != 0
    }

    /// Whether a correlated response must be delivered to the requester.
    pub const fn wants_sync_reply(self) -> bool {
        self.0 & (Self::SYNC_STATUS | Self::SYNC_DATA) != 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "EVENT");
        }
        let mut sep = "";
        if self.0 & Self::COMMAND != 0 {
            write!(f, "{sep}CMD")?;
            sep = "|";
        }
        if self.0 & Self::SYNC_STATUS != 0 {
            write!(f, "{sep}SYNC_STATUS")?;
            sep = "|";
        }
        if self.0 & Self::SYNC_DATA != 0 {
            write!(f, "{sep}SYNC_DATA")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Correlation key
// ---------------------------------------------------------------------------

/// Identity of an inbound packet: type plus frame id. Extraction functions
/// produce one per frame; correlation is exact match on both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxKey {
    pub packet_type: PacketType,
    pub packet_id: PacketId,
}

// ---------------------------------------------------------------------------
// Reply target
// ---------------------------------------------------------------------------

/// Who gets woken when a correlated response arrives. Resolved once, at
/// metadata-creation time.
#[derive(Clone)]
pub enum ReplyTarget {
    /// Wake this specific requester's flag word.
    Thread(Arc<EventFlags>),
    /// No per-thread context was retained; signal the packet type's shared
    /// delivery group instead.
    Group,
}

impl fmt::Debug for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(_) => write!(f, "Thread"),
            Self::Group => write!(f, "Group"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport status
// ---------------------------------------------------------------------------

/// Final transport disposition of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet handed to the transport, or still in flight on the bus.
    Pending,
    /// Transmitted.
    Sent,
    /// The transport gave up on this packet.
    Failed,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Bookkeeping for one packet inside the engine.
#[derive(Debug)]
pub struct Metadata {
    pub packet_type: PacketType,
    pub packet_id: PacketId,
    /// Present while the payload is still needed (pending TX, or attached
    /// response data on delivery). Cleared the moment it is not.
    pub payload: Option<PayloadBuf>,
    pub flags: PacketFlags,
    /// Tick at which the packet entered the pending queue.
    pub enqueued_at_ms: u64,
    /// Age bound in the pending queue. `0` = never expires.
    pub timeout_ms: u32,
    pub reply: ReplyTarget,
    pub status: TxStatus,
}

impl Metadata {
    /// Whether this packet has aged out of its pending-queue bound.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.timeout_ms != 0
            && now_ms.saturating_sub(self.enqueued_at_ms) > u64::from(self.timeout_ms)
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, PayloadBuf::len)
    }
}

// ---------------------------------------------------------------------------
// TX handle
// ---------------------------------------------------------------------------

/// Where asynchronous transports report completions.
#[derive(Clone)]
pub(crate) struct CompletionSink {
    pub queue: Arc<PacketQueue<Metadata>>,
    pub flags: Arc<EventFlags>,
    pub bit: FlagBits,
}

/// One packet handed to the transport.
///
/// Carries the metadata (and payload) across the routing boundary. See
/// [`Router`](crate::transport::Router) for the ownership contract.
pub struct TxHandle {
    meta: Metadata,
    sink: CompletionSink,
}

impl TxHandle {
    pub(crate) fn new(meta: Metadata, sink: CompletionSink) -> Self {
        Self { meta, sink }
    }

    /// Bytes to put on the wire.
    pub fn frame(&self) -> &[u8] {
        self.meta.payload.as_ref().map_or(&[], |p| p.as_slice())
    }

    pub fn packet_type(&self) -> PacketType {
        self.meta.packet_type
    }

    pub fn packet_id(&self) -> PacketId {
        self.meta.packet_id
    }

    /// Report an asynchronous completion. Enqueues the metadata to the
    /// engine's TX-completion queue and wakes the worker.
    pub fn complete(self, status: TxStatus) {
        let TxHandle { mut meta, sink } = self;
        meta.status = status;
        let ty = meta.packet_type;
        if sink.queue.enqueue(meta).is_err() {
            // Dropping the metadata releases its buffers; the send is lost
            // but the engine stays consistent.
            warn!("tx completion queue rejected packet of type {ty}");
        }
        sink.flags.set(sink.bit);
    }

    pub(crate) fn into_meta(self) -> Metadata {
        self.meta
    }
}
