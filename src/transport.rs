//! Routing/transport boundary — any packet-oriented back end.
//!
//! Concrete implementations in a full driver:
//! - SDIO/SPI bus to the co-processor
//! - UART serial link
//! - loopback or recording mocks for tests
//!
//! The engine is generic over [`Router`], so adding a transport requires
//! zero changes to the dispatch logic.
//!
//! Ownership contract: `route` receives a [`TxHandle`] carrying the packet
//! metadata and payload. A transport that finishes (or rejects) the send
//! immediately hands the handle back via [`RouteOutcome::Done`] /
//! [`RouteOutcome::Failed`]; one that transmits asynchronously keeps the
//! handle, returns [`RouteOutcome::InProgress`], and later calls
//! [`TxHandle::complete`] from its completion context.

use crate::dispatch::metadata::TxHandle;

/// Route identifier handed to the transport for each packet type.
pub type RouteId = u8;

/// Result of handing one packet to the transport.
pub enum RouteOutcome {
    /// Transmitted synchronously; the handle comes back for bookkeeping.
    Done(TxHandle),
    /// Transport took ownership; completion arrives via
    /// [`TxHandle::complete`].
    InProgress,
    /// Rejected; the handle comes back so the engine can release it.
    Failed(TxHandle),
}

/// Packet-oriented transport back end.
pub trait Router: Send + Sync {
    fn route(&self, route: RouteId, tx: TxHandle) -> RouteOutcome;
}

/// A null router that reports immediate success for every packet.
/// Useful as a default before the real link is up.
pub struct NullRouter;

impl Router for NullRouter {
    fn route(&self, _route: RouteId, tx: TxHandle) -> RouteOutcome {
        RouteOutcome::Done(tx)
    }
}

/// A router that rejects every packet. Exercises the failure paths.
pub struct RejectRouter;

impl Router for RejectRouter {
    fn route(&self, _route: RouteId, tx: TxHandle) -> RouteOutcome {
        RouteOutcome::Failed(tx)
    }
}
