//! Cluster orchestrator boundary.
//!
//! The provisioner and the node agent only need a handful of orchestrator
//! capabilities: run a pinned execution unit and watch it finish, check that a
//! node exists, and mark a node unusable. These are expressed as the
//! [`ExecutionUnits`] and [`Nodes`] traits, implemented against the REST API
//! by [`KubeClient`].

pub mod error;
pub mod kube;
pub mod types;

use async_trait::async_trait;

pub use error::ClusterError;
pub use kube::{KubeClient, KubeConfig};
pub use types::{
    ConditionStatus, EventType, ExecutionUnitSpec, HostMount, NodeCondition, NodeEvent,
    PullPolicy, Resources, UnitPhase,
};

/// Run-once execution units pinned to a node.
#[async_trait]
pub trait ExecutionUnits: Send + Sync {
    /// Submit a unit. Fails with [`ClusterError::AlreadyExists`] if a unit
    /// with that name exists.
    async fn create_unit(&self, spec: &ExecutionUnitSpec) -> Result<(), ClusterError>;

    async fn unit_phase(&self, namespace: &str, name: &str) -> Result<UnitPhase, ClusterError>;

    /// Log output of one container of the unit.
    async fn unit_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
    ) -> Result<String, ClusterError>;

    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Node queries and health reporting.
#[async_trait]
pub trait Nodes: Send + Sync {
    async fn node_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Mark the node unschedulable.
    async fn cordon(&self, name: &str) -> Result<(), ClusterError>;

    /// Write a status condition, replacing one of the same type.
    async fn set_condition(&self, name: &str, condition: &NodeCondition)
        -> Result<(), ClusterError>;

    async fn record_event(&self, event: &NodeEvent) -> Result<(), ClusterError>;
}
