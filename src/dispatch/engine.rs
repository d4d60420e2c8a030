//! Engine lifecycle and producer-facing surface.
//!
//! [`Engine::init`] builds the packet-type table, reserves the emergency
//! frame and spawns the worker thread; [`Engine::deinit`] stops it and
//! tears the queues down in order. Everything in between — `send`,
//! registration, inbound submission — only enqueues by value and raises
//! event bits; the worker is the sole mutator of dispatch state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};

use crate::buffer::{AllocMode, FramePool, PayloadBuf, FRAME_CAP};
use crate::config::{EngineConfig, EngineTunables, ErrorSink, ExtractFn, PacketTypeConfig};
use crate::diagnostics::{self, Counters, DispatchStats};
use crate::dispatch::control::{ControlRequest, CONTROL_ACK};
use crate::dispatch::metadata::{
    CompletionSink, Metadata, PacketFlags, PacketId, PacketType, ReplyTarget, TxStatus,
};
use crate::dispatch::table::{TypeState, TypeTable};
use crate::dispatch::worker::{self, SHUTDOWN_ACK};
use crate::dispatch::{EV_CONTROL, EV_RX, EV_TERMINATE, EV_TX_DONE, EV_TX_DYNAMIC, EV_TX_STATIC};
use crate::error::{Error, ErrorReport, EscalationFailed, FaultKind, Result};
use crate::flags::EventFlags;
use crate::queue::PacketQueue;
use crate::ticks;
use crate::transport::Router;

// ---------------------------------------------------------------------------
// Shared engine state
// ---------------------------------------------------------------------------

/// State shared between the worker thread and producer handles.
pub(crate) struct Shared {
    pub name: &'static str,
    pub table: TypeTable,
    pub rx_queue: PacketQueue<PayloadBuf>,
    pub tx_done: Arc<PacketQueue<Metadata>>,
    pub control: PacketQueue<ControlRequest>,
    /// The worker's event group.
    pub flags: Arc<EventFlags>,
    /// Worker → deinit termination acknowledgment.
    pub shutdown: EventFlags,
    pub pool: FramePool,
    pub router: Arc<dyn Router>,
    pub extract: ExtractFn,
    pub error_sink: Option<ErrorSink>,
    /// One-shot reserve for fault-report detail under pool exhaustion.
    pub emergency: Mutex<Option<PayloadBuf>>,
    pub tunables: EngineTunables,
    pub running: AtomicBool,
    pub counters: Counters,
}

impl Shared {
    pub(crate) fn completion_sink(&self) -> CompletionSink {
        CompletionSink {
            queue: self.tx_done.clone(),
            flags: self.flags.clone(),
            bit: EV_TX_DONE,
        }
    }

    /// Post a fault to the error sink. Never silently swallowed: with no
    /// sink configured the fault still hits the log.
    pub(crate) fn escalate(
        &self,
        kind: FaultKind,
        packet_type: Option<PacketType>,
        msg: &str,
    ) -> core::result::Result<(), EscalationFailed> {
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
        log::error!("DSP[{}]: {kind}: {msg}", self.name);

        let Some(sink) = &self.error_sink else {
            return Ok(());
        };

        let report = ErrorReport {
            kind,
            packet_type,
            detail: self.alloc_detail(msg),
        };
        if sink.queue.enqueue(report).is_err() {
            log::error!("DSP[{}]: error sink rejected fault report", self.name);
            return Err(EscalationFailed);
        }
        sink.flags.set(sink.bit);
        Ok(())
    }

    /// Allocate a detail frame for a fault report, falling back to the
    /// one-shot emergency frame. `None` = degraded detail-less report.
    fn alloc_detail(&self, msg: &str) -> Option<PayloadBuf> {
        let mut buf = match self.pool.allocate(AllocMode::NoWait) {
            Ok(b) => b,
            Err(_) => self
                .emergency
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()?,
        };
        let bytes = msg.as_bytes();
        let take = bytes.len().min(FRAME_CAP);
        let _ = buf.bytes_mut().extend_from_slice(&bytes[..take]);
        Some(buf)
    }
}

// ---------------------------------------------------------------------------
// Send request
// ---------------------------------------------------------------------------

/// One outbound packet, built by a producer thread.
pub struct SendRequest {
    pub packet_type: PacketType,
    pub payload: PayloadBuf,
    pub flags: PacketFlags,
    /// Pending-queue age bound in milliseconds. `0` = never expires.
    pub timeout_ms: u32,
    pub reply: ReplyTarget,
}

impl SendRequest {
    /// Fire-and-forget event packet with no expiry.
    pub fn event(packet_type: PacketType, payload: PayloadBuf) -> Self {
        Self {
            packet_type,
            payload,
            flags: PacketFlags::event(),
            timeout_ms: 0,
            reply: ReplyTarget::Group,
        }
    }

    /// Command expecting a synchronous status reply.
    pub fn command(packet_type: PacketType, payload: PayloadBuf) -> Self {
        Self {
            packet_type,
            payload,
            flags: PacketFlags::command().with_sync_status(),
            timeout_ms: 0,
            reply: ReplyTarget::Group,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound sink
// ---------------------------------------------------------------------------

/// Producer handle for transports: feeds received frames into the engine.
#[derive(Clone)]
pub struct InboundSink {
    shared: Arc<Shared>,
}

impl InboundSink {
    /// Enqueue one received frame and wake the worker. A `Full` queue
    /// rejects (and thereby drops) the frame — expected under burst noise.
    pub fn submit(&self, frame: PayloadBuf) -> Result<()> {
        self.shared.rx_queue.enqueue(frame)?;
        self.shared.flags.set(EV_RX);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One dispatch engine instance: the packet-type table, its queues, and the
/// worker thread that drains them.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Bring up an engine.
    ///
    /// `static_types` is fixed for the engine's lifetime; a config's
    /// position in the vector is its packet-type value. Dynamic types
    /// registered later must use values at or above `static_types.len()`.
    pub fn init(
        config: EngineConfig,
        static_types: Vec<PacketTypeConfig>,
        router: Arc<dyn Router>,
    ) -> Result<Self> {
        if static_types.len() > usize::from(PacketType::MAX) {
            return Err(Error::InvalidParameter("too many static types"));
        }
        let tunables = config.tunables.clone();
        if tunables.pool_frames == 0 {
            return Err(Error::InvalidParameter("pool_frames must be nonzero"));
        }

        // The emergency reserve sits outside the configured frame count.
        let pool = FramePool::new(tunables.pool_frames + 1);
        let emergency = pool.allocate(AllocMode::NoWait)?;

        let static_count = static_types.len();
        let shared = Arc::new(Shared {
            name: config.name,
            table: TypeTable::new(static_types),
            rx_queue: PacketQueue::new(tunables.rx_queue_depth),
            tx_done: Arc::new(PacketQueue::new(tunables.tx_done_queue_depth)),
            control: PacketQueue::new(tunables.control_queue_depth),
            flags: Arc::new(EventFlags::new()),
            shutdown: EventFlags::new(),
            pool,
            router,
            extract: config.extract,
            error_sink: config.error_sink,
            emergency: Mutex::new(Some(emergency)),
            tunables,
            running: AtomicBool::new(true),
            counters: Counters::new(),
        });

        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("{}-disp", config.name))
                .spawn(move || worker::run(&shared))
                .map_err(|_| Error::Init("worker thread spawn failed"))?
        };

        info!(
            "DSP[{}]: engine up ({} static types)",
            shared.name, static_count
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue one packet for transmission. Returns the correlation id
    /// assigned to it.
    pub fn send(&self, req: SendRequest) -> Result<PacketId> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Terminated);
        }
        let state = self
            .shared
            .table
            .lookup(req.packet_type)
            .ok_or(Error::UnknownType(req.packet_type))?;

        let packet_id = state.alloc_packet_id();
        let meta = Metadata {
            packet_type: req.packet_type,
            packet_id,
            payload: Some(req.payload),
            flags: req.flags,
            enqueued_at_ms: ticks::now_ms(),
            timeout_ms: req.timeout_ms,
            reply: req.reply,
            status: TxStatus::Pending,
        };
        state.pending.enqueue(meta)?;

        let bit = if self.shared.table.is_static(req.packet_type) {
            EV_TX_STATIC
        } else {
            EV_TX_DYNAMIC
        };
        self.shared.flags.set(bit);
        Ok(packet_id)
    }

    /// Send a command and block until its correlated response arrives.
    ///
    /// Forces a per-thread reply target so the response wakes this caller
    /// specifically, then pulls the matching metadata (with the response
    /// payload attached) out of the type's sync delivery queue.
    pub fn send_and_wait(&self, mut req: SendRequest, timeout: Duration) -> Result<Metadata> {
        if !req.flags.wants_sync_reply() {
            return Err(Error::InvalidParameter(
                "send_and_wait requires a sync-reply flag",
            ));
        }
        let state = self
            .shared
            .table
            .lookup(req.packet_type)
            .ok_or(Error::UnknownType(req.packet_type))?;
        let sync_bit = state.config.delivery.sync_bit;
        let sync_queue = state.config.delivery.sync_queue.clone();

        let waiter = Arc::new(EventFlags::new());
        req.reply = ReplyTarget::Thread(waiter.clone());
        let packet_type = req.packet_type;
        let packet_id = self.send(req)?;

        let deadline = std::time::Instant::now() + timeout;
        loop {
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(Error::ResponseTimeout);
            }
            if waiter.wait_any(sync_bit, Some(deadline - now)) == 0 {
                return Err(Error::ResponseTimeout);
            }
            match sync_queue
                .remove_matching(|m| m.packet_type == packet_type && m.packet_id == packet_id)
            {
                Ok(meta) => return Ok(meta),
                // A sibling waiter's response woke us; wait again.
                Err(crate::queue::QueueError::NotFound | crate::queue::QueueError::Empty) => {}
                Err(e) => return Err(Error::Queue(e)),
            }
        }
    }

    /// Register a dynamic packet type via the control plane.
    pub fn register_packet_type(
        &self,
        value: PacketType,
        config: PacketTypeConfig,
    ) -> Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Terminated);
        }
        // Collisions with the static range never enter the protocol.
        if self.shared.table.is_static(value) {
            return Err(Error::InvalidParameter(
                "packet type collides with static range",
            ));
        }
        if self.shared.table.has_dynamic(value) {
            return Err(Error::AlreadyRegistered(value));
        }

        let state = Arc::new(TypeState::new(value, config));
        let reply = Arc::new(EventFlags::new());
        self.shared.control.enqueue(ControlRequest::Register {
            state,
            reply: reply.clone(),
        })?;
        self.shared.flags.set(EV_CONTROL);

        self.wait_control_ack(&reply, "register", value)
    }

    /// Unregister a dynamic packet type. Its queues are drained through the
    /// configured flush hook on the worker thread.
    pub fn unregister_packet_type(&self, value: PacketType) -> Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Terminated);
        }
        if self.shared.table.is_static(value) {
            return Err(Error::InvalidParameter(
                "static types cannot be unregistered",
            ));
        }
        if !self.shared.table.has_dynamic(value) {
            return Err(Error::UnknownType(value));
        }

        let reply = Arc::new(EventFlags::new());
        self.shared.control.enqueue(ControlRequest::Unregister {
            packet_type: value,
            reply: reply.clone(),
        })?;
        self.shared.flags.set(EV_CONTROL);

        self.wait_control_ack(&reply, "unregister", value)
    }

    fn wait_control_ack(
        &self,
        reply: &EventFlags,
        op: &str,
        value: PacketType,
    ) -> Result<()> {
        let bound = Duration::from_millis(u64::from(self.shared.tunables.control_ack_timeout_ms));
        if reply.wait_any(CONTROL_ACK, Some(bound)) == 0 {
            warn!(
                "DSP[{}]: {op} of type {value} not acknowledged within {}ms",
                self.shared.name, self.shared.tunables.control_ack_timeout_ms
            );
            return Err(Error::AckTimeout);
        }
        Ok(())
    }

    /// Handle for transports to feed received frames into the engine.
    pub fn inbound(&self) -> InboundSink {
        InboundSink {
            shared: self.shared.clone(),
        }
    }

    /// Payload allocation for callers building send requests.
    pub fn pool(&self) -> &FramePool {
        &self.shared.pool
    }

    /// Read-only idle query: true when every engine queue and every type's
    /// pending/in-flight queue is empty. Walks the table without mutating
    /// anything.
    pub fn is_idle(&self) -> bool {
        let s = &self.shared;
        if !(s.rx_queue.is_empty() && s.tx_done.is_empty() && s.control.is_empty()) {
            return false;
        }
        for state in s.table.static_slots() {
            if !(state.pending.is_empty() && state.inflight.is_empty()) {
                return false;
            }
        }
        for state in s.table.dynamic_snapshot() {
            if !(state.pending.is_empty() && state.inflight.is_empty()) {
                return false;
            }
        }
        true
    }

    /// Snapshot of queue depths, table sizes and hit counters.
    pub fn stats(&self) -> DispatchStats {
        diagnostics::collect(&self.shared)
    }

    /// Graceful stop: signal termination, wait (bounded) for the worker's
    /// acknowledgment, join it, then tear the queues down in order.
    pub fn deinit(mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        self.shared.flags.set(EV_TERMINATE);

        let bound = Duration::from_millis(u64::from(self.shared.tunables.shutdown_timeout_ms));
        if self.shared.shutdown.wait_any(SHUTDOWN_ACK, Some(bound)) == 0 {
            warn!(
                "DSP[{}]: worker did not acknowledge termination within {}ms",
                self.shared.name, self.shared.tunables.shutdown_timeout_ms
            );
            // Leave the thread detached rather than risk a hung join.
            self.worker.take();
            return Err(Error::AckTimeout);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        // Structured teardown: engine queues first, then every type's
        // queues through its flush hook.
        self.shared.rx_queue.drain_with(drop);
        self.shared.tx_done.drain_with(drop);
        self.shared.control.drain_with(drop);
        for state in self.shared.table.static_slots() {
            state.flush();
        }
        for state in self.shared.table.dynamic_snapshot() {
            state.flush();
        }

        info!("DSP[{}]: engine down", self.shared.name);
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Safety net for instances dropped without deinit.
        if let Some(handle) = self.worker.take() {
            self.shared.running.store(false, Ordering::Release);
            self.shared.flags.set(EV_TERMINATE);
            let _ = handle.join();
        }
    }
}
