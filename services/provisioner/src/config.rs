use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use csi_lvm_cluster::PullPolicy;
use csi_lvm_volume::Topology;

use crate::constants::DEFAULT_IMAGE;
use crate::dispatcher::DispatchSettings;
use crate::provisioner::ProvisionerSettings;

/// Seconds between two status polls of an execution unit.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Controller configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "csi-lvm-controller", version, about = "Provisions node-local LVM volumes")]
pub struct Config {
    /// Name this provisioner registers under.
    #[arg(long, env = "PROVISIONER_NAME", default_value = "metal-stack.io/csi-lvm")]
    pub provisioner_name: String,

    /// Namespace execution units are created in.
    #[arg(long, env = "CSI_LVM_PROVISIONER_NAMESPACE", default_value = "csi-lvm")]
    pub namespace: String,

    #[arg(long = "vgname", env = "CSI_LVM_VG_NAME", default_value = "csi-lvm")]
    pub vg_name: String,

    /// Image of the node agent.
    #[arg(long, env = "CSI_LVM_PROVISIONER_IMAGE", default_value = DEFAULT_IMAGE)]
    pub provisioner_image: String,

    /// Glob selecting the disks of the volume group, e.g. `/dev/nvme[0-9]n*`.
    #[arg(long, env = "CSI_LVM_DEVICE_PATTERN")]
    pub device_pattern: String,

    /// Topology used when a request has no type annotation.
    #[arg(long, env = "CSI_LVM_DEFAULT_LVM_TYPE", default_value = "mirror")]
    pub default_lvm_type: Topology,

    /// Host directory volumes are mounted below.
    #[arg(long, env = "CSI_LVM_MOUNTPOINT", default_value = "/tmp/csi-lvm")]
    pub mountpoint: PathBuf,

    #[arg(long, env = "CSI_LVM_PULL_POLICY", default_value = "Always")]
    pub pull_policy: PullPolicy,

    /// Seconds to wait for an execution unit to succeed.
    #[arg(long, env = "CSI_LVM_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,

    #[arg(long, env = "CSI_LVM_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Cluster API URL; the in-cluster service account is used when unset.
    #[arg(long, env = "KUBERNETES_API_URL")]
    pub kube_api: Option<String>,
}

impl Config {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            namespace: self.namespace.clone(),
            image: self.provisioner_image.clone(),
            pull_policy: self.pull_policy,
            vg_name: self.vg_name.clone(),
            device_pattern: self.device_pattern.clone(),
            mount_root: self.mountpoint.clone(),
            poll_interval: POLL_INTERVAL,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn provisioner_settings(&self) -> ProvisionerSettings {
        ProvisionerSettings {
            mount_root: self.mountpoint.clone(),
            default_topology: self.default_lvm_type,
        }
    }
}
