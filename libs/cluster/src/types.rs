//! Orchestrator-facing types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image pull policy of an execution unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    #[default]
    Always,
    IfNotPresent,
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(PullPolicy::Always),
            "IfNotPresent" => Ok(PullPolicy::IfNotPresent),
            "Never" => Ok(PullPolicy::Never),
            other => Err(format!(
                "unsupported pull policy {:?}, must be one of Always|IfNotPresent|Never",
                other
            )),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host directory exposed inside an execution unit at the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    pub name: String,
    pub path: String,
    /// Propagate mounts made inside the unit back to the host.
    pub bidirectional: bool,
}

/// CPU and memory requests and limits, in orchestrator quantity notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu_request: "50m".to_string(),
            memory_request: "50Mi".to_string(),
            cpu_limit: "100m".to_string(),
            memory_limit: "100Mi".to_string(),
        }
    }
}

/// A short-lived, privileged, run-once unit pinned to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnitSpec {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub container_name: String,
    pub image: String,
    pub pull_policy: PullPolicy,
    pub args: Vec<String>,
    pub privileged: bool,
    pub host_mounts: Vec<HostMount>,
    pub resources: Resources,
}

/// Lifecycle phase of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl UnitPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => UnitPhase::Pending,
            "Running" => UnitPhase::Running,
            "Succeeded" => UnitPhase::Succeeded,
            "Failed" => UnitPhase::Failed,
            _ => UnitPhase::Unknown,
        }
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitPhase::Pending => "Pending",
            UnitPhase::Running => "Running",
            UnitPhase::Succeeded => "Succeeded",
            UnitPhase::Failed => "Failed",
            UnitPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// A node status condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCondition {
    /// Condition type, e.g. `Ready`.
    pub kind: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeCondition {
    /// `Ready=False` with the given reason.
    pub fn not_ready(reason: &str, message: &str) -> Self {
        Self {
            kind: "Ready".to_string(),
            status: ConditionStatus::False,
            reason: reason.to_string(),
            message: message.to_string(),
            last_heartbeat: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// An event attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub namespace: String,
    pub node_name: String,
    pub reason: String,
    pub message: String,
    pub event_type: EventType,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}
