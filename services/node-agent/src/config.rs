//! Command line of the node agent.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use csi_lvm_volume::Topology;

use crate::health::HealthSettings;
use crate::reconciler::ReconcilerSettings;

#[derive(Debug, Parser)]
#[command(name = "csi-lvm-agent", version, about = "Manages LVM volumes on this node")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, format and mount a logical volume.
    Createlv(CreateArgs),
    /// Unmount and remove a logical volume.
    Deletelv(DeleteArgs),
    /// Restore mounts after a restart and keep checking node health.
    Revivelvs(ReviveArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub lvname: String,

    /// Size in bytes.
    #[arg(long)]
    pub lvsize: u64,

    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub vgname: String,

    /// Mount root.
    #[arg(long)]
    pub directory: PathBuf,

    #[arg(long, default_value = "linear")]
    pub lvmtype: Topology,

    /// Device glob, repeatable.
    #[arg(long = "devices", required = true, value_parser = NonEmptyStringValueParser::new())]
    pub devices: Vec<String>,

    /// Expose the volume as a raw block device.
    #[arg(long)]
    pub block: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub lvname: String,

    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub vgname: String,

    #[arg(long)]
    pub directory: PathBuf,

    #[arg(long)]
    pub block: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ReviveArgs {
    #[arg(long, default_value = "csi-lvm", value_parser = NonEmptyStringValueParser::new())]
    pub vgname: String,

    #[arg(long, env = "CSI_LVM_MOUNTPOINT", default_value = "/tmp/csi-lvm")]
    pub directory: PathBuf,

    /// Topology of the health check canary.
    #[arg(long, env = "CSI_LVM_TYPE", default_value = "linear")]
    pub lvmtype: Topology,

    #[arg(
        long = "devices",
        env = "CSI_LVM_DEVICE_PATTERN",
        value_delimiter = ',',
        required = true
    )]
    pub devices: Vec<String>,

    #[arg(long, env = "CSI_NODE_NAME", value_parser = NonEmptyStringValueParser::new())]
    pub nodename: String,

    /// Cluster API URL; the in-cluster service account is used when unset.
    #[arg(long, env = "KUBERNETES_API_URL")]
    pub kube_api: Option<String>,

    #[arg(long, default_value_t = 60)]
    pub health_interval_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub status_interval_secs: u64,

    #[arg(long, default_value_t = 600)]
    pub revive_interval_secs: u64,

    #[arg(long, default_value_t = 300)]
    pub reassert_interval_ms: u64,
}

impl ReviveArgs {
    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            vg_name: self.vgname.clone(),
            mount_root: self.directory.clone(),
            revive_interval: Duration::from_secs(self.revive_interval_secs),
            status_interval: Duration::from_secs(self.status_interval_secs),
        }
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            node_name: self.nodename.clone(),
            vg_name: self.vgname.clone(),
            devices: self.devices.clone(),
            mount_root: self.directory.clone(),
            topology: self.lvmtype,
            interval: Duration::from_secs(self.health_interval_secs),
            reassert_interval: Duration::from_millis(self.reassert_interval_ms),
        }
    }
}
