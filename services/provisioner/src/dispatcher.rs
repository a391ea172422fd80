//! Runs volume actions on their node through execution units.
//!
//! Each action gets one privileged, node-pinned unit. The unit is polled until
//! it succeeds or the time budget runs out, and is deleted afterwards no
//! matter how the wait ended.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use csi_lvm_cluster::{
    ExecutionUnitSpec, ExecutionUnits, HostMount, PullPolicy, Resources, UnitPhase,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::action::VolumeAction;
use crate::constants::DEVICE_DIR;
use crate::error::ProvisionError;

/// How execution units are built and awaited.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub namespace: String,
    pub image: String,
    pub pull_policy: PullPolicy,
    pub vg_name: String,
    pub device_pattern: String,
    /// Host directory below which volumes are mounted.
    pub mount_root: PathBuf,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl DispatchSettings {
    /// Number of status polls within the time budget.
    pub fn poll_attempts(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        (self.timeout.as_millis() / interval).max(1) as u32
    }
}

/// Dispatches volume actions to execution units.
#[derive(Clone)]
pub struct Dispatcher {
    units: Arc<dyn ExecutionUnits>,
    settings: DispatchSettings,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        units: Arc<dyn ExecutionUnits>,
        settings: DispatchSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            units,
            settings,
            shutdown,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Unit definition for `action`.
    pub fn unit_spec(&self, action: &VolumeAction) -> ExecutionUnitSpec {
        let mount_root = self.settings.mount_root.display().to_string();
        ExecutionUnitSpec {
            name: action.unit_name(),
            namespace: self.settings.namespace.clone(),
            node_name: action.node_name().to_string(),
            container_name: action.container_name(),
            image: self.settings.image.clone(),
            pull_policy: self.settings.pull_policy,
            args: action.args(&self.settings.vg_name, &self.settings.device_pattern),
            privileged: true,
            host_mounts: vec![
                HostMount {
                    name: "data".to_string(),
                    path: mount_root,
                    bidirectional: true,
                },
                HostMount {
                    name: "devices".to_string(),
                    path: DEVICE_DIR.to_string(),
                    bidirectional: false,
                },
            ],
            resources: Resources::default(),
        }
    }

    /// Runs `action` on its node and waits for it to succeed.
    pub async fn dispatch(&self, action: &VolumeAction) -> Result<(), ProvisionError> {
        let spec = self.unit_spec(action);
        info!(
            unit = %spec.name,
            node = %spec.node_name,
            action = %action.kind(),
            volume = %action.name(),
            "Dispatching volume action"
        );

        match self.units.create_unit(&spec).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                info!(unit = %spec.name, "Execution unit already exists, resuming")
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.wait_for_success(&spec).await;

        if let Err(e) = self.units.delete_unit(&spec.namespace, &spec.name).await {
            error!(unit = %spec.name, error = %e, "Failed to delete execution unit");
        }

        match &result {
            Ok(()) => info!(unit = %spec.name, "Volume action succeeded"),
            Err(e) => warn!(unit = %spec.name, error = %e, "Volume action failed"),
        }
        result
    }

    async fn wait_for_success(&self, spec: &ExecutionUnitSpec) -> Result<(), ProvisionError> {
        let mut shutdown = self.shutdown.clone();
        let attempts = self.settings.poll_attempts();

        for attempt in 1..=attempts {
            if *shutdown.borrow() {
                return Err(ProvisionError::Cancelled {
                    unit: spec.name.clone(),
                });
            }

            match self.units.unit_phase(&spec.namespace, &spec.name).await {
                Ok(UnitPhase::Succeeded) => return Ok(()),
                Ok(phase) => {
                    info!(unit = %spec.name, phase = %phase, attempt, attempts, "Execution unit not done yet")
                }
                Err(e) => {
                    warn!(unit = %spec.name, error = %e, attempt, attempts, "Failed to read execution unit status")
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(ProvisionError::Cancelled { unit: spec.name.clone() });
                    }
                }
            }
        }

        let logs = match self
            .units
            .unit_logs(&spec.namespace, &spec.name, &spec.container_name)
            .await
        {
            Ok(logs) => Some(logs),
            Err(e) => {
                warn!(unit = %spec.name, error = %e, "Unable to fetch execution unit logs");
                None
            }
        };

        Err(ProvisionError::Timeout {
            unit: spec.name.clone(),
            after: self.settings.timeout,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use csi_lvm_testing::FakeCluster;
    use csi_lvm_volume::Topology;

    use super::*;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            namespace: "csi-lvm".to_string(),
            image: "ghcr.io/metal-stack/csi-lvm-provisioner".to_string(),
            pull_policy: PullPolicy::IfNotPresent,
            vg_name: "csi-lvm".to_string(),
            device_pattern: "/dev/nvme[0-9]n*".to_string(),
            mount_root: PathBuf::from("/tmp/csi-lvm"),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(20),
        }
    }

    fn create_action() -> VolumeAction {
        VolumeAction::create(
            PathBuf::from("/tmp/csi-lvm/pvc-1"),
            "node-1",
            1 << 30,
            Topology::Linear,
            false,
        )
        .unwrap()
    }

    fn dispatcher(cluster: &FakeCluster) -> (Dispatcher, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Dispatcher::new(Arc::new(cluster.clone()), settings(), rx),
            tx,
        )
    }

    #[test]
    fn unit_is_pinned_and_privileged() {
        let (dispatcher, _tx) = dispatcher(&FakeCluster::new());
        let spec = dispatcher.unit_spec(&create_action());
        assert_eq!(spec.name, "create-pvc-1");
        assert_eq!(spec.node_name, "node-1");
        assert!(spec.privileged);
        assert_eq!(spec.container_name, "csi-lvm-create");
        assert_eq!(spec.pull_policy, PullPolicy::IfNotPresent);
        assert!(spec
            .host_mounts
            .iter()
            .any(|m| m.path == "/tmp/csi-lvm" && m.bidirectional));
        assert!(spec.host_mounts.iter().any(|m| m.path == "/dev"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_deletes_unit() {
        let cluster = FakeCluster::new();
        cluster.script_phases(
            "create-pvc-1",
            &[UnitPhase::Pending, UnitPhase::Running, UnitPhase::Succeeded],
        );
        let (dispatcher, _tx) = dispatcher(&cluster);

        dispatcher.dispatch(&create_action()).await.unwrap();

        assert_eq!(cluster.created_units().len(), 1);
        assert_eq!(cluster.deleted_units(), vec!["create-pvc-1".to_string()]);
        assert!(cluster.live_units().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_unit_times_out_with_logs() {
        let cluster = FakeCluster::new();
        cluster.script_phases("create-pvc-1", &[UnitPhase::Failed]);
        cluster.set_logs("create-pvc-1", "Insufficient free space");
        let (dispatcher, _tx) = dispatcher(&cluster);

        let started = tokio::time::Instant::now();
        let err = dispatcher.dispatch(&create_action()).await.unwrap_err();

        match err {
            ProvisionError::Timeout { unit, logs, .. } => {
                assert_eq!(unit, "create-pvc-1");
                assert_eq!(logs.as_deref(), Some("Insufficient free space"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert!(cluster.live_units().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn existing_unit_is_resumed() {
        let cluster = FakeCluster::new();
        let (dispatcher, _tx) = dispatcher(&cluster);
        let action = create_action();
        cluster
            .create_unit(&dispatcher.unit_spec(&action))
            .await
            .unwrap();

        dispatcher.dispatch(&action).await.unwrap();
        assert_eq!(cluster.created_units().len(), 1);
        assert!(cluster.live_units().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_is_propagated() {
        let cluster = FakeCluster::new();
        cluster.reject_creates(true);
        let (dispatcher, _tx) = dispatcher(&cluster);

        let err = dispatcher.dispatch(&create_action()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cluster(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_still_deletes() {
        let cluster = FakeCluster::new();
        cluster.script_phases("create-pvc-1", &[UnitPhase::Running]);
        let (dispatcher, tx) = dispatcher(&cluster);

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(&create_action()).await }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled { .. }));
        assert_eq!(cluster.deleted_units(), vec!["create-pvc-1".to_string()]);
    }

    #[test]
    fn legacy_budget_is_twenty_polls() {
        assert_eq!(settings().poll_attempts(), 20);
    }
}
