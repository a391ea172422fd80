//! Orchestrator-facing request and descriptor types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::NODE_AFFINITY_KEY;
use crate::error::ProvisionError;

/// How a volume is exposed to the workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeMode {
    #[default]
    Filesystem,
    Block,
}

impl VolumeMode {
    pub fn is_block(&self) -> bool {
        matches!(self, VolumeMode::Block)
    }
}

/// What happens to the volume once its claim is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
}

/// A request for a new volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Name of the volume to create.
    pub name: String,
    pub capacity_bytes: Option<u64>,
    /// Node chosen by the scheduler.
    pub node_name: Option<String>,
    #[serde(default)]
    pub volume_mode: VolumeMode,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub access_modes: Vec<String>,
    /// Annotations of the claim, e.g. the topology hint.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Node affinity term: `key In values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAffinity {
    pub key: String,
    pub values: Vec<String>,
}

impl NodeAffinity {
    pub fn hostname(node: &str) -> Self {
        Self {
            key: NODE_AFFINITY_KEY.to_string(),
            values: vec![node.to_string()],
        }
    }
}

/// A provisioned volume as handed back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    pub name: String,
    pub host_path: Option<PathBuf>,
    pub node_affinity: Option<NodeAffinity>,
    #[serde(default)]
    pub volume_mode: VolumeMode,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Where a provisioned volume lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub path: PathBuf,
    pub node: String,
}

impl VolumeDescriptor {
    /// Host path and node of the volume.
    pub fn placement(&self) -> Result<Placement, ProvisionError> {
        let path = self.host_path.clone().ok_or_else(|| {
            ProvisionError::InvalidDescriptor(format!("no host path set for {}", self.name))
        })?;

        let affinity = self.node_affinity.as_ref().ok_or_else(|| {
            ProvisionError::InvalidDescriptor(format!("no node affinity set for {}", self.name))
        })?;
        if affinity.key != NODE_AFFINITY_KEY {
            return Err(ProvisionError::InvalidDescriptor(format!(
                "unexpected node affinity key {} for {}",
                affinity.key, self.name
            )));
        }
        let node = match affinity.values.as_slice() {
            [node] if !node.is_empty() => node.clone(),
            [] => {
                return Err(ProvisionError::InvalidDescriptor(format!(
                    "no node affinity value set for {}",
                    self.name
                )))
            }
            _ => {
                return Err(ProvisionError::InvalidDescriptor(format!(
                    "multiple or empty node affinity values {:?} for {}",
                    affinity.values, self.name
                )))
            }
        };

        Ok(Placement { path, node })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> VolumeDescriptor {
        VolumeDescriptor {
            name: "pvc-1".to_string(),
            host_path: Some(PathBuf::from("/tmp/csi-lvm/pvc-1")),
            node_affinity: Some(NodeAffinity::hostname("node-1")),
            volume_mode: VolumeMode::Filesystem,
            capacity_bytes: 1 << 30,
            reclaim_policy: ReclaimPolicy::Delete,
            access_modes: vec!["ReadWriteOnce".to_string()],
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn placement_from_descriptor() {
        let placement = descriptor().placement().unwrap();
        assert_eq!(placement.node, "node-1");
        assert_eq!(placement.path, PathBuf::from("/tmp/csi-lvm/pvc-1"));
    }

    #[test]
    fn missing_host_path_is_invalid() {
        let mut d = descriptor();
        d.host_path = None;
        assert!(matches!(
            d.placement(),
            Err(ProvisionError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn multiple_nodes_are_invalid() {
        let mut d = descriptor();
        d.node_affinity = Some(NodeAffinity {
            key: NODE_AFFINITY_KEY.to_string(),
            values: vec!["node-1".to_string(), "node-2".to_string()],
        });
        assert!(d.placement().is_err());
    }

    #[test]
    fn request_defaults_from_json() {
        let req: ProvisionRequest =
            serde_json::from_str(r#"{"name": "pvc-1", "capacity_bytes": 1024, "node_name": "n"}"#)
                .unwrap();
        assert_eq!(req.volume_mode, VolumeMode::Filesystem);
        assert_eq!(req.reclaim_policy, ReclaimPolicy::Delete);
        assert!(req.annotations.is_empty());
    }
}
