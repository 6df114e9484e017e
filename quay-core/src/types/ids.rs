//! Strongly-typed identifiers for cluster entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a container.
///
/// Container IDs are handed out by the control plane from a monotonically
/// increasing counter and are never reused, even after the container closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Create a container ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container_{}", self.0)
    }
}

impl From<u64> for ContainerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of a pipeline (a replicated-consensus group of datanodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(Uuid);

impl PipelineId {
    /// Create a new random pipeline ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a pipeline ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse a pipeline ID from its UUID string form.
    ///
    /// Returns `None` if the string is not a valid UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim_start_matches("pipeline_"))
            .ok()
            .map(Self)
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline_{}", self.0)
    }
}

/// Identifier of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatanodeId(Uuid);

impl DatanodeId {
    /// Create a new random datanode ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a datanode ID from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DatanodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatanodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_display() {
        assert_eq!(ContainerId::new(42).to_string(), "container_42");
        assert_eq!(ContainerId::from(7).as_u64(), 7);
    }

    #[test]
    fn pipeline_id_parses_display_form() {
        let id = PipelineId::new();
        assert_eq!(PipelineId::parse(&id.to_string()), Some(id));
        assert_eq!(PipelineId::parse(&id.as_uuid().to_string()), Some(id));
        assert_eq!(PipelineId::parse("not-a-uuid"), None);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ContainerId::new(9)).unwrap();
        assert_eq!(json, "9");

        let dn = DatanodeId::new();
        let json = serde_json::to_string(&dn).unwrap();
        assert_eq!(json, format!("\"{}\"", dn.as_uuid()));
    }
}
