//! End-to-end happy path test.
//!
//! Runs the controller's HTTP API against execution units that invoke the
//! node agent in-process, on top of a simulated LVM toolchain:
//!
//! 1. Provision a striped filesystem volume over three devices
//! 2. Verify the descriptor and the resulting LVM state
//! 3. Reclaim the volume and verify it is gone
//! 4. Provision with a failing toolchain and verify the timeout surfaces
//!
//! ## Running
//!
//! ```bash
//! cargo test -p csi-lvm-e2e --test happy_path
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use csi_lvm_cluster::{ClusterError, ExecutionUnitSpec, ExecutionUnits, PullPolicy, UnitPhase};
use csi_lvm_node_agent::{
    agent,
    config::{Cli, Command},
};
use csi_lvm_provisioner::{
    api::{self, AppState},
    DispatchSettings, Dispatcher, LvmProvisioner, ProvisionerSettings,
};
use csi_lvm_testing::{FakeCluster, FakeLvm};
use csi_lvm_volume::{FakeExecutor, Topology, VolumeManager};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Default)]
struct Units {
    phases: HashMap<String, UnitPhase>,
    logs: HashMap<String, String>,
    created: Vec<ExecutionUnitSpec>,
}

/// Execution units that run the node agent command line in-process.
struct LocalUnits {
    manager: VolumeManager,
    units: Mutex<Units>,
}

impl LocalUnits {
    fn new(manager: VolumeManager) -> Self {
        Self {
            manager,
            units: Mutex::new(Units::default()),
        }
    }

    fn created(&self) -> Vec<ExecutionUnitSpec> {
        self.units.lock().unwrap().created.clone()
    }

    async fn run(&self, args: &[String]) -> Result<(), String> {
        let argv = std::iter::once("csi-lvm-agent".to_string()).chain(args.iter().cloned());
        let cli = Cli::try_parse_from(argv).map_err(|e| e.to_string())?;
        let result = match cli.command {
            Command::Createlv(args) => agent::create_volume(&self.manager, &args).await,
            Command::Deletelv(args) => agent::delete_volume(&self.manager, &args).await,
            Command::Revivelvs(_) => return Err("revivelvs is not a volume action".to_string()),
        };
        result.map_err(|e| e.to_string())
    }
}

fn not_found(name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind: "pod",
        name: name.to_string(),
    }
}

#[async_trait]
impl ExecutionUnits for LocalUnits {
    async fn create_unit(&self, spec: &ExecutionUnitSpec) -> Result<(), ClusterError> {
        self.units.lock().unwrap().created.push(spec.clone());
        let result = self.run(&spec.args).await;

        let mut units = self.units.lock().unwrap();
        match result {
            Ok(()) => {
                units.phases.insert(spec.name.clone(), UnitPhase::Succeeded);
            }
            Err(e) => {
                units.phases.insert(spec.name.clone(), UnitPhase::Failed);
                units.logs.insert(spec.name.clone(), e);
            }
        }
        Ok(())
    }

    async fn unit_phase(&self, _namespace: &str, name: &str) -> Result<UnitPhase, ClusterError> {
        self.units
            .lock()
            .unwrap()
            .phases
            .get(name)
            .copied()
            .ok_or_else(|| not_found(name))
    }

    async fn unit_logs(
        &self,
        _namespace: &str,
        name: &str,
        _container: &str,
    ) -> Result<String, ClusterError> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .logs
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_unit(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.units
            .lock()
            .unwrap()
            .phases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }
}

struct Harness {
    base_url: String,
    lvm: FakeLvm,
    executor: Arc<FakeExecutor>,
    units: Arc<LocalUnits>,
    mount_root: tempfile::TempDir,
    _devices: tempfile::TempDir,
    shutdown_tx: watch::Sender<bool>,
}

async fn start(device_count: usize, timeout: Duration) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();

    let devices = tempfile::tempdir().unwrap();
    for i in 0..device_count {
        std::fs::write(devices.path().join(format!("nvme{i}n1")), b"").unwrap();
    }
    let mount_root = tempfile::tempdir().unwrap();

    let lvm = FakeLvm::new();
    let executor = lvm.executor();
    let units = Arc::new(LocalUnits::new(VolumeManager::new(
        executor.clone().as_executor(),
    )));
    let cluster = FakeCluster::new().with_node("node-1");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(
        units.clone(),
        DispatchSettings {
            namespace: "csi-lvm".to_string(),
            image: "metalstack/lvmplugin:latest".to_string(),
            pull_policy: PullPolicy::IfNotPresent,
            vg_name: "csi-lvm".to_string(),
            device_pattern: format!("{}/nvme*", devices.path().display()),
            mount_root: mount_root.path().to_path_buf(),
            poll_interval: Duration::from_millis(10),
            timeout,
        },
        shutdown_rx,
    );
    let provisioner = LvmProvisioner::new(
        dispatcher,
        Arc::new(cluster),
        ProvisionerSettings {
            mount_root: mount_root.path().to_path_buf(),
            default_topology: Topology::Linear,
        },
    );
    let app = api::create_router(AppState {
        provisioner: Arc::new(provisioner),
        provisioner_name: "metal-stack.io/csi-lvm".to_string(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base_url: format!("http://{addr}"),
        lvm,
        executor,
        units,
        mount_root,
        _devices: devices,
        shutdown_tx,
    }
}

fn target(root: &Path, name: &str) -> std::path::PathBuf {
    root.join(name)
}

#[tokio::test]
async fn e2e_provision_and_reclaim_striped_volume() {
    let harness = start(3, Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/healthz", harness.base_url))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // Provision.
    let resp = client
        .post(format!("{}/v1/volumes", harness.base_url))
        .json(&serde_json::json!({
            "name": "pvc-1",
            "capacity_bytes": 1u64 << 30,
            "node_name": "node-1",
            "access_modes": ["ReadWriteOnce"],
            "annotations": { "csi-lvm.metal-stack.io/type": "striped" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let descriptor: serde_json::Value = resp.json().await.unwrap();

    let path = target(harness.mount_root.path(), "pvc-1");
    assert_eq!(descriptor["host_path"], path.display().to_string());
    assert_eq!(descriptor["node_affinity"]["key"], "kubernetes.io/hostname");
    assert_eq!(descriptor["node_affinity"]["values"][0], "node-1");
    assert_eq!(descriptor["annotations"]["lvmProvisionerIdentity"], "node-1");

    let created = harness.units.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "create-pvc-1");
    assert_eq!(created[0].node_name, "node-1");
    assert!(created[0].privileged);

    let lvcreate = &harness.executor.invocations_of("lvcreate")[0];
    assert_eq!(lvcreate.value_of("--stripes"), Some("3"));
    let lv = harness.lvm.logical_volume("csi-lvm", "pvc-1").unwrap();
    assert!(lv.tags.contains("isBlock=false"));
    assert!(harness.lvm.is_mounted(&path));
    assert!(path.is_dir());

    // Reclaim.
    let resp = client
        .post(format!("{}/v1/volumes/reclaim", harness.base_url))
        .json(&descriptor)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    assert!(harness.lvm.logical_volume("csi-lvm", "pvc-1").is_none());
    assert!(!harness.lvm.is_mounted(&path));
    assert!(!path.exists());
    assert_eq!(harness.units.created()[1].name, "delete-pvc-1");

    harness.shutdown_tx.send(true).unwrap();
}

#[tokio::test]
async fn e2e_provision_block_volume() {
    let harness = start(2, Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/volumes", harness.base_url))
        .json(&serde_json::json!({
            "name": "pvc-block",
            "capacity_bytes": 1u64 << 30,
            "node_name": "node-1",
            "volume_mode": "Block",
            "annotations": { "csi-lvm.metal-stack.io/type": "mirror" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let path = target(harness.mount_root.path(), "pvc-block");
    assert!(path.is_file());
    let mount = &harness.executor.invocations_of("mount")[0];
    assert!(mount.has_arg("--bind"));
    let lv = harness.lvm.logical_volume("csi-lvm", "pvc-block").unwrap();
    assert_eq!(lv.segment_type, "raid1");
    assert!(lv.tags.contains("isBlock=true"));
}

#[tokio::test]
async fn e2e_failed_action_surfaces_timeout_with_logs() {
    let harness = start(1, Duration::from_millis(100)).await;
    harness.lvm.fail("lvcreate", 5, "Insufficient free space");
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/volumes", harness.base_url))
        .json(&serde_json::json!({
            "name": "pvc-1",
            "capacity_bytes": 1u64 << 30,
            "node_name": "node-1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "timeout");
    assert_eq!(body["retryable"], true);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Insufficient free space"));

    // The unit was cleaned up despite the failure.
    assert!(harness.units.units.lock().unwrap().phases.is_empty());
}
