//! Command delivery from the control plane to datanodes.
//!
//! The control plane only ever talks to datanodes through a
//! [`CommandTransport`]. Sends are fire-and-forget: a successful send means
//! the command left the control plane, not that it was applied.

mod memory;

pub use memory::{InProcessTransport, TransportStats};

use crate::command::DatanodeCommand;
use quay_core::{DatanodeId, QuayResult};

/// Trait for command transports.
///
/// # Implementation Notes
///
/// - `send` must not block; delivery happens asynchronously
/// - Delivery is at-least-once at best; callers re-send until reports
///   show convergence
/// - A failed send returns [`quay_core::QuayError::CommandDelivery`]
pub trait CommandTransport: Send + Sync {
    /// Hand a command to the given datanode.
    fn send(&self, datanode: DatanodeId, command: DatanodeCommand) -> QuayResult<()>;

    /// Datanodes currently reachable through this transport.
    fn datanodes(&self) -> Vec<DatanodeId>;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
