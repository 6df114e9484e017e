//! Identifier and lifecycle state types.

mod ids;
mod state;

pub use ids::{ContainerId, DatanodeId, PipelineId};
pub use state::{LifeCycleState, PipelineState};
