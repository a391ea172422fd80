//! LVM-backed provisioner.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use csi_lvm_cluster::Nodes;
use csi_lvm_volume::Topology;
use tracing::info;

use crate::action::{validate_volume_name, VolumeAction};
use crate::constants::{PROVISIONER_IDENTITY_ANNOTATION, TOPOLOGY_ANNOTATION};
use crate::dispatcher::Dispatcher;
use crate::error::ProvisionError;
use crate::request::{NodeAffinity, ProvisionRequest, ReclaimPolicy, VolumeDescriptor};

/// Provisions and reclaims volumes for the orchestrator.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest)
        -> Result<VolumeDescriptor, ProvisionError>;

    async fn reclaim(&self, volume: &VolumeDescriptor) -> Result<(), ProvisionError>;

    fn supports_block(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    pub mount_root: PathBuf,
    pub default_topology: Topology,
}

/// Provisions node-local logical volumes through the dispatcher.
pub struct LvmProvisioner {
    dispatcher: Dispatcher,
    nodes: Arc<dyn Nodes>,
    settings: ProvisionerSettings,
}

impl LvmProvisioner {
    pub fn new(dispatcher: Dispatcher, nodes: Arc<dyn Nodes>, settings: ProvisionerSettings) -> Self {
        Self {
            dispatcher,
            nodes,
            settings,
        }
    }

    fn topology(&self, request: &ProvisionRequest) -> Result<Topology, ProvisionError> {
        match request.annotations.get(TOPOLOGY_ANNOTATION) {
            Some(hint) => hint
                .parse()
                .map_err(|e| ProvisionError::Configuration(format!("{}", e))),
            None => Ok(self.settings.default_topology),
        }
    }
}

#[async_trait]
impl Provisioner for LvmProvisioner {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<VolumeDescriptor, ProvisionError> {
        let node = request
            .node_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ProvisionError::Configuration("no node was specified".to_string()))?;
        let size = request
            .capacity_bytes
            .filter(|s| *s > 0)
            .ok_or_else(|| {
                ProvisionError::Configuration("no volume size was specified".to_string())
            })?;
        validate_volume_name(&request.name)?;
        let topology = self.topology(request)?;
        let block_mode = request.volume_mode.is_block();

        let path = self.settings.mount_root.join(&request.name);
        info!(
            volume = %request.name,
            node = %node,
            path = %path.display(),
            size_bytes = size,
            topology = %topology,
            block_mode,
            "Creating volume"
        );

        let action = VolumeAction::create(path.clone(), node, size, topology, block_mode)?;
        self.dispatcher.dispatch(&action).await?;

        let mut annotations = BTreeMap::new();
        annotations.insert(PROVISIONER_IDENTITY_ANNOTATION.to_string(), node.to_string());

        Ok(VolumeDescriptor {
            name: request.name.clone(),
            host_path: Some(path),
            node_affinity: Some(NodeAffinity::hostname(node)),
            volume_mode: request.volume_mode,
            capacity_bytes: size,
            reclaim_policy: request.reclaim_policy,
            access_modes: request.access_modes.clone(),
            annotations,
        })
    }

    async fn reclaim(&self, volume: &VolumeDescriptor) -> Result<(), ProvisionError> {
        if volume.reclaim_policy == ReclaimPolicy::Retain {
            info!(volume = %volume.name, "Reclaim policy is retain, keeping volume");
            return Ok(());
        }

        let placement = volume.placement()?;
        if !self.nodes.node_exists(&placement.node).await? {
            info!(
                volume = %volume.name,
                node = %placement.node,
                "Node no longer exists, assuming volume is gone"
            );
            return Ok(());
        }

        info!(
            volume = %volume.name,
            node = %placement.node,
            path = %placement.path.display(),
            "Deleting volume"
        );
        let action = VolumeAction::delete(
            placement.path,
            &placement.node,
            volume.volume_mode.is_block(),
        )?;
        self.dispatcher.dispatch(&action).await
    }

    fn supports_block(&self) -> bool {
        true
    }
}
