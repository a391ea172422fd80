//! Volume group and logical volume operations.
//!
//! Every operation is idempotent against the toolchain's own state: existence
//! is always checked by listing, never remembered locally.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::VolumeError;
use crate::executor::BoxedExecutor;
use crate::report::{self, LogicalVolume, VolumeGroup};
use crate::tags::{block_mode_tag, TagVocabulary};
use crate::topology::Topology;

/// A logical volume to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogicalVolume {
    pub vg: String,
    pub name: String,
    pub size_bytes: u64,
    pub topology: Topology,
    pub block_mode: bool,
}

/// Result of [`VolumeManager::create_logical_volume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LvCreation {
    /// `lvcreate` ran; carries its output.
    Created { output: String },
    /// A volume matching the name was already listed.
    AlreadyExists { existing: String },
}

/// Raw `vgs`/`lvs` output for operators.
#[derive(Debug)]
pub struct StatusSnapshot {
    pub volume_groups: Result<String, VolumeError>,
    pub logical_volumes: Result<String, VolumeError>,
}

/// Drives the LVM toolchain through an executor.
#[derive(Clone)]
pub struct VolumeManager {
    executor: BoxedExecutor,
    tags: TagVocabulary,
}

impl VolumeManager {
    pub fn new(executor: BoxedExecutor) -> Self {
        Self {
            executor,
            tags: TagVocabulary::default(),
        }
    }

    pub fn with_tags(mut self, tags: TagVocabulary) -> Self {
        self.tags = tags;
        self
    }

    pub fn tags(&self) -> &TagVocabulary {
        &self.tags
    }

    pub(crate) fn executor(&self) -> &BoxedExecutor {
        &self.executor
    }

    /// Lists every volume group on the node.
    pub async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>, VolumeError> {
        let mut cmd = Command::new("vgs");
        cmd.args(["--reportformat", "json", "-o", "vg_name,pv_count,vg_tags"]);
        let output = self.executor.execute(&mut cmd).await?;
        report::parse_volume_groups(&output.stdout)
    }

    pub async fn volume_group(&self, name: &str) -> Result<Option<VolumeGroup>, VolumeError> {
        Ok(self
            .list_volume_groups()
            .await?
            .into_iter()
            .find(|vg| vg.name == name))
    }

    /// Ensures the volume group `name` exists.
    ///
    /// Returns `true` when the group already existed. Otherwise the group is
    /// created over the union of devices matched by `patterns` and tagged with
    /// the ownership marker.
    pub async fn ensure_volume_group(
        &self,
        name: &str,
        patterns: &[String],
    ) -> Result<bool, VolumeError> {
        match self.volume_group(name).await {
            Ok(Some(_)) => {
                debug!(vg = %name, "volume group already exists");
                return Ok(true);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "unable to list existing volume groups"),
        }

        let devices = resolve_devices(patterns)?;
        info!(vg = %name, devices = ?devices, "creating volume group");

        let mut cmd = Command::new("vgcreate");
        cmd.arg("-v")
            .arg(name)
            .args(&devices)
            .args(["--addtag", self.tags.volume_group()]);
        self.executor.execute(&mut cmd).await?;
        Ok(false)
    }

    /// Rescans devices and activates the volume group.
    pub async fn activate_volume_group(&self, name: &str) -> Result<(), VolumeError> {
        let mut scan = Command::new("vgscan");
        scan.arg("--cache");
        self.executor.execute(&mut scan).await?;
        let mut cmd = Command::new("vgchange");
        cmd.args(["-ay", name]);
        self.executor.execute(&mut cmd).await?;
        Ok(())
    }

    /// Activates every logical volume of `vg`.
    pub async fn activate_logical_volumes(&self, vg: &str) -> Result<(), VolumeError> {
        let mut cmd = Command::new("lvchange");
        cmd.args(["-ay", vg]);
        self.executor.execute(&mut cmd).await?;
        Ok(())
    }

    pub async fn list_logical_volumes(&self, vg: &str) -> Result<Vec<LogicalVolume>, VolumeError> {
        let mut cmd = Command::new("lvs");
        cmd.args([
            "--reportformat",
            "json",
            "--units",
            "b",
            "--nosuffix",
            "-o",
            "lv_name,vg_name,lv_size,lv_tags,segtype",
            vg,
        ]);
        let output = self.executor.execute(&mut cmd).await?;
        report::parse_logical_volumes(&output.stdout)
    }

    /// Finds a logical volume whose name contains `name`.
    ///
    /// The match is a substring match: `pvc-1` also finds `pvc-10`.
    /// [`VolumeManager::create_logical_volume`] inherits this, so a name that
    /// is a prefix of another volume's name is reported as existing. Removal
    /// and the canary use [`VolumeManager::find_logical_volume_exact`].
    pub async fn find_logical_volume(
        &self,
        vg: &str,
        name: &str,
    ) -> Result<Option<LogicalVolume>, VolumeError> {
        Ok(self
            .list_logical_volumes(vg)
            .await?
            .into_iter()
            .find(|lv| lv.name.contains(name)))
    }

    /// Finds the logical volume named exactly `name`.
    pub async fn find_logical_volume_exact(
        &self,
        vg: &str,
        name: &str,
    ) -> Result<Option<LogicalVolume>, VolumeError> {
        Ok(self
            .list_logical_volumes(vg)
            .await?
            .into_iter()
            .find(|lv| lv.name == name))
    }

    pub async fn pv_count(&self, vg: &str) -> Result<u32, VolumeError> {
        self.volume_group(vg)
            .await?
            .map(|group| group.pv_count)
            .ok_or_else(|| VolumeError::VolumeGroupNotFound(vg.to_string()))
    }

    /// Creates a logical volume unless one with a matching name exists.
    ///
    /// The volume is created with the ownership tag; once `lvcreate` succeeds
    /// the `isBlock` tag is added.
    pub async fn create_logical_volume(
        &self,
        lv: &NewLogicalVolume,
    ) -> Result<LvCreation, VolumeError> {
        if lv.size_bytes == 0 {
            return Err(VolumeError::InvalidSize);
        }

        let existing = self.find_logical_volume(&lv.vg, &lv.name).await?;
        self.create_unless_listed(lv, existing).await
    }

    /// Like [`VolumeManager::create_logical_volume`], but only a volume with
    /// exactly this name counts as existing.
    pub async fn create_logical_volume_exact(
        &self,
        lv: &NewLogicalVolume,
    ) -> Result<LvCreation, VolumeError> {
        if lv.size_bytes == 0 {
            return Err(VolumeError::InvalidSize);
        }

        let existing = self.find_logical_volume_exact(&lv.vg, &lv.name).await?;
        self.create_unless_listed(lv, existing).await
    }

    async fn create_unless_listed(
        &self,
        lv: &NewLogicalVolume,
        existing: Option<LogicalVolume>,
    ) -> Result<LvCreation, VolumeError> {
        if let Some(existing) = existing {
            info!(lv = %lv.name, existing = %existing.name, "logical volume already exists");
            return Ok(LvCreation::AlreadyExists {
                existing: existing.name,
            });
        }

        let pv_count = self.pv_count(&lv.vg).await?;
        if lv.topology.requires_multiple_pvs() && pv_count < 2 {
            return Err(VolumeError::InsufficientPhysicalVolumes {
                topology: lv.topology,
                vg: lv.vg.clone(),
                pv_count,
            });
        }

        let mut cmd = Command::new("lvcreate");
        cmd.args(["-v", "-n", lv.name.as_str(), "-W", "y", "-L"])
            .arg(format!("{}b", lv.size_bytes))
            .args(lv.topology.lvcreate_args(pv_count))
            .args(["--addtag", self.tags.logical_volume()])
            .arg(&lv.vg);

        info!(
            lv = %lv.name,
            vg = %lv.vg,
            size_bytes = lv.size_bytes,
            topology = %lv.topology,
            pv_count,
            "creating logical volume"
        );
        let output = self.executor.execute(&mut cmd).await?;

        self.add_tags(&lv.vg, &lv.name, &[block_mode_tag(lv.block_mode)])
            .await?;

        Ok(LvCreation::Created {
            output: output.combined(),
        })
    }

    pub async fn add_tags(&self, vg: &str, lv: &str, tags: &[String]) -> Result<(), VolumeError> {
        let mut cmd = Command::new("lvchange");
        for tag in tags {
            cmd.args(["--addtag", tag]);
        }
        cmd.arg(format!("{}/{}", vg, lv));
        self.executor.execute(&mut cmd).await?;
        Ok(())
    }

    pub async fn remove_logical_volume(&self, vg: &str, lv: &str) -> Result<(), VolumeError> {
        let mut cmd = Command::new("lvremove");
        cmd.arg("-f").arg(format!("{}/{}", vg, lv));
        self.executor.execute(&mut cmd).await?;
        info!(lv = %lv, vg = %vg, "logical volume removed");
        Ok(())
    }

    /// Human readable `vgs` and `lvs` output.
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let volume_groups = self
            .executor
            .execute(&mut Command::new("vgs"))
            .await
            .map(|o| o.stdout)
            .map_err(VolumeError::from);
        let logical_volumes = self
            .executor
            .execute(&mut Command::new("lvs"))
            .await
            .map(|o| o.stdout)
            .map_err(VolumeError::from);
        StatusSnapshot {
            volume_groups,
            logical_volumes,
        }
    }
}

/// Resolves glob patterns to the union of matching device paths.
pub fn resolve_devices(patterns: &[String]) -> Result<Vec<PathBuf>, VolumeError> {
    let mut devices: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        debug!(pattern = %pattern, "searching devices");
        let matches = glob::glob(pattern).map_err(|source| VolumeError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        for entry in matches {
            match entry {
                Ok(path) if !devices.contains(&path) => devices.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "unreadable device path"),
            }
        }
    }

    if devices.is_empty() {
        return Err(VolumeError::NoDevices {
            patterns: patterns.to_vec(),
        });
    }
    Ok(devices)
}
