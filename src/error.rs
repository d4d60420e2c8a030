//! Unified error types for the NCLink dispatch core.
//!
//! Two layers, deliberately separate:
//!
//! - [`Error`] — returned synchronously to callers (protocol misuse, queue
//!   rejection, timeouts). All variants are `Copy` so they pass through the
//!   driver layers without allocation.
//! - [`ErrorReport`] / [`FaultKind`] — internal-consistency faults the worker
//!   escalates to the configured error sink; these are never returned from
//!   the public API.

use core::fmt;

use crate::buffer::{AllocError, PayloadBuf};
use crate::dispatch::metadata::PacketType;
use crate::queue::QueueError;

// ---------------------------------------------------------------------------
// Caller-facing errors
// ---------------------------------------------------------------------------

/// Every fallible public operation of the engine funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A parameter is invalid or collides with the static type range.
    InvalidParameter(&'static str),
    /// Packet type is not present in the static or dynamic table.
    UnknownType(PacketType),
    /// Dynamic packet type value is already registered.
    AlreadyRegistered(PacketType),
    /// A collaborator queue rejected the operation.
    Queue(QueueError),
    /// The frame pool could not satisfy an allocation.
    Alloc(AllocError),
    /// The worker never acknowledged a control-plane request in time.
    AckTimeout,
    /// No correlated response arrived within the caller's wait bound.
    ResponseTimeout,
    /// The engine is terminating or already stopped.
    Terminated,
    /// Engine bring-up failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::UnknownType(ty) => write!(f, "unknown packet type {ty}"),
            Self::AlreadyRegistered(ty) => write!(f, "packet type {ty} already registered"),
            Self::Queue(e) => write!(f, "queue: {e}"),
            Self::Alloc(e) => write!(f, "alloc: {e}"),
            Self::AckTimeout => write!(f, "control-plane acknowledgment timed out"),
            Self::ResponseTimeout => write!(f, "response wait timed out"),
            Self::Terminated => write!(f, "engine terminated"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<AllocError> for Error {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}

impl std::error::Error for Error {}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Hook failures
// ---------------------------------------------------------------------------

/// Returned by pre-TX and RX-classification hooks to signal failure.
///
/// Hook failures are internal-consistency faults: the worker escalates them
/// to the error sink rather than returning them to any caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookError(pub &'static str);

impl HookError {
    pub fn reason(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook failed: {}", self.0)
    }
}

impl std::error::Error for HookError {}

// ---------------------------------------------------------------------------
// Escalated faults
// ---------------------------------------------------------------------------

/// Classes of fault the worker escalates to the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Dequeue failed on a queue that reported pending work.
    DequeueFailed,
    /// Enqueue failed on a supposedly-healthy internal queue.
    EnqueueFailed,
    /// A configured hook reported failure.
    HookFailed,
    /// The transport rejected or failed a command send. Non-fatal to the
    /// engine; reported so the application can observe the loss.
    CommandTxFailed,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DequeueFailed => write!(f, "queue dequeue failed"),
            Self::EnqueueFailed => write!(f, "queue enqueue failed"),
            Self::HookFailed => write!(f, "hook failed"),
            Self::CommandTxFailed => write!(f, "command TX failed"),
        }
    }
}

/// One escalated fault, posted to the [`ErrorSink`](crate::config::ErrorSink).
///
/// `detail` carries a human-readable description when a frame could be
/// allocated for it; under pool exhaustion the one-shot emergency frame is
/// used, and once that is gone reports arrive detail-less.
#[derive(Debug)]
pub struct ErrorReport {
    pub kind: FaultKind,
    pub packet_type: Option<PacketType>,
    pub detail: Option<PayloadBuf>,
}

/// Posting to the error sink itself failed. On the RX and TX-completion
/// paths this aborts the remainder of the wake cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EscalationFailed;
