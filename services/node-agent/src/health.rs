//! Canary health check.
//!
//! Each cycle creates, mounts, unmounts and deletes a small canary volume. A
//! failing cycle degrades the node: it records events, cordons the node and
//! keeps writing `Ready=False` until the process stops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use csi_lvm_cluster::{EventType, NodeCondition, NodeEvent, Nodes};
use csi_lvm_volume::{NewLogicalVolume, Topology, VolumeError, VolumeManager, VolumePaths};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::constants::{
    CANARY_NAME, CANARY_SIZE_BYTES, COMPONENT_EVENT_NAMESPACE, EVENT_SOURCE, NODE_EVENT_NAMESPACE,
    NODE_NOT_READY_REASON, NOT_WORKING_MESSAGE, NOT_WORKING_REASON,
};

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub node_name: String,
    pub vg_name: String,
    pub devices: Vec<String>,
    pub mount_root: PathBuf,
    /// Topology of the canary.
    pub topology: Topology,
    pub interval: Duration,
    pub reassert_interval: Duration,
}

pub struct HealthMonitor {
    manager: VolumeManager,
    nodes: Arc<dyn Nodes>,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(manager: VolumeManager, nodes: Arc<dyn Nodes>, settings: HealthSettings) -> Self {
        Self {
            manager,
            nodes,
            settings,
        }
    }

    /// Check health every interval; degrade the node on the first failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.settings.node_name,
            interval_secs = self.settings.interval.as_secs(),
            "Starting health monitor"
        );

        let mut interval = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.check().await {
                        Ok(()) => info!(node = %self.settings.node_name, "Health check passed"),
                        Err(e) => {
                            error!(node = %self.settings.node_name, error = %e, "Health check failed");
                            self.degrade(&mut shutdown).await;
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One canary cycle.
    pub async fn check(&self) -> Result<(), VolumeError> {
        let vg = &self.settings.vg_name;
        self.manager
            .ensure_volume_group(vg, &self.settings.devices)
            .await?;
        self.manager
            .create_logical_volume_exact(&NewLogicalVolume {
                vg: vg.clone(),
                name: CANARY_NAME.to_string(),
                size_bytes: CANARY_SIZE_BYTES,
                topology: self.settings.topology,
                block_mode: false,
            })
            .await?;

        let paths = VolumePaths::new(vg, CANARY_NAME, &self.settings.mount_root);
        self.manager.format_and_mount(&paths, false).await?;
        self.manager
            .unmount_and_remove(&paths, vg, CANARY_NAME)
            .await?;
        Ok(())
    }

    /// Report the node as broken and keep it marked not ready until shutdown.
    pub async fn degrade(&self, shutdown: &mut watch::Receiver<bool>) {
        let node = &self.settings.node_name;
        warn!(node = %node, "Degrading node");

        for event in self.degradation_events() {
            if let Err(e) = self.nodes.record_event(&event).await {
                error!(node = %node, reason = %event.reason, error = %e, "Unable to record event");
            }
        }

        match self.nodes.cordon(node).await {
            Ok(()) => info!(node = %node, "Node cordoned"),
            Err(e) => error!(node = %node, error = %e, "Unable to cordon node"),
        }

        let mut interval = tokio::time::interval(self.settings.reassert_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let condition = NodeCondition::not_ready(NOT_WORKING_REASON, NOT_WORKING_MESSAGE);
                    if let Err(e) = self.nodes.set_condition(node, &condition).await {
                        error!(node = %node, error = %e, "Unable to set node condition");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(node = %node, "Stopping readiness reassertion");
                        break;
                    }
                }
            }
        }
    }

    fn degradation_events(&self) -> [NodeEvent; 2] {
        let node = &self.settings.node_name;
        let now = Utc::now();
        [
            NodeEvent {
                namespace: COMPONENT_EVENT_NAMESPACE.to_string(),
                node_name: node.clone(),
                reason: NOT_WORKING_REASON.to_string(),
                message: NOT_WORKING_MESSAGE.to_string(),
                event_type: EventType::Warning,
                source: EVENT_SOURCE.to_string(),
                timestamp: now,
            },
            NodeEvent {
                namespace: NODE_EVENT_NAMESPACE.to_string(),
                node_name: node.clone(),
                reason: NODE_NOT_READY_REASON.to_string(),
                message: format!("Node {} status is now: NodeNotReady", node),
                event_type: EventType::Warning,
                source: EVENT_SOURCE.to_string(),
                timestamp: now,
            },
        ]
    }
}
