//! NCLink — command/response dispatch core for network co-processor links.
//!
//! Multiplexes many logical packet types (commands, events) over one
//! asynchronous packet transport, providing request/response correlation,
//! TX admission control, and runtime-registrable packet types.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Producer threads            Worker thread        Transport  │
//! │                                                              │
//! │  send() ───▶ pending queue ──▶ TX scheduler ──▶ route()      │
//! │  register() ▶ control queue ─▶ control plane                 │
//! │                 in-flight ◀─── TX-done drain ◀── complete()  │
//! │  consumers ◀─ sync/async  ◀─── RX correlator ◀── submit()    │
//! │               delivery                                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The worker thread is the sole mutator of the packet-type table and the
//! in-flight bookkeeping; every other thread only enqueues into
//! internally-synchronized queues and raises event-flag bits.

#![deny(unused_must_use)]

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod flags;
pub mod queue;
pub mod ticks;
pub mod transport;

mod error;

pub use buffer::{AllocError, AllocMode, FRAME_CAP, FramePool, PayloadBuf};
pub use config::{
    DeliveryConfig, EngineConfig, EngineTunables, ErrorSink, ExtractFn, FlushHook,
    PacketTypeConfig, PreTxHook, RxClassifyHook,
};
pub use diagnostics::{DispatchStats, TypeStats};
pub use dispatch::engine::{Engine, InboundSink, SendRequest};
pub use dispatch::metadata::{
    Metadata, PacketFlags, PacketId, PacketType, ReplyTarget, RxKey, TxHandle, TxStatus,
};
pub use error::{Error, ErrorReport, FaultKind, HookError, Result};
pub use flags::{EventFlags, FlagBits};
pub use queue::{PacketQueue, QueueError};
pub use transport::{NullRouter, RouteId, RouteOutcome, Router};
