//! Restores volume mounts from LVM tags.
//!
//! After a node restart nothing is mounted. The reconciler:
//! - Reactivates the volume group and its logical volumes
//! - Mounts every volume whose target is missing, as a bind mount when the
//!   volume is tagged `isBlock=true`
//! - Backfills the access-mode tag on volumes created before it existed
//! - Periodically logs the `vgs`/`lvs` listing

use std::path::PathBuf;
use std::time::Duration;

use csi_lvm_volume::{block_mode_tag, LogicalVolume, VolumeError, VolumeManager, VolumePaths};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub vg_name: String,
    pub mount_root: PathBuf,
    pub revive_interval: Duration,
    pub status_interval: Duration,
}

/// What a revival pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReviveReport {
    /// False when the volume group does not exist on this node.
    pub volume_group_present: bool,
    pub mounted: Vec<String>,
    pub backfilled: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Reconciler {
    manager: VolumeManager,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(manager: VolumeManager, settings: ReconcilerSettings) -> Self {
        Self { manager, settings }
    }

    /// Run revival and status logging until shutdown.
    ///
    /// The first revival pass happens one interval after start; callers run
    /// [`Reconciler::revive`] themselves at startup.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            vg = %self.settings.vg_name,
            revive_interval_secs = self.settings.revive_interval.as_secs(),
            status_interval_secs = self.settings.status_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let start = tokio::time::Instant::now();
        let mut revive_interval =
            tokio::time::interval_at(start + self.settings.revive_interval, self.settings.revive_interval);
        let mut status_interval =
            tokio::time::interval_at(start + self.settings.status_interval, self.settings.status_interval);

        loop {
            tokio::select! {
                _ = revive_interval.tick() => {
                    if let Err(e) = self.revive().await {
                        error!(error = %e, "Revival failed");
                    }
                }
                _ = status_interval.tick() => {
                    self.log_status().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One revival pass.
    pub async fn revive(&self) -> Result<ReviveReport, VolumeError> {
        let vg = &self.settings.vg_name;
        info!(vg = %vg, "Starting revival");
        let mut report = ReviveReport::default();

        if self.manager.volume_group(vg).await?.is_none() {
            info!(vg = %vg, "Volume group not found, activating");
            if let Err(e) = self.manager.activate_volume_group(vg).await {
                warn!(vg = %vg, error = %e, "Unable to activate volume group");
            }
            if self.manager.volume_group(vg).await?.is_none() {
                info!(vg = %vg, "Volume group not found, nothing to revive");
                return Ok(report);
            }
        }
        report.volume_group_present = true;

        if let Err(e) = self.manager.activate_logical_volumes(vg).await {
            warn!(vg = %vg, error = %e, "Unable to activate logical volumes");
        }

        let volumes = match self.manager.list_logical_volumes(vg).await {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(vg = %vg, error = %e, "Unable to list logical volumes");
                return Ok(report);
            }
        };

        for lv in &volumes {
            self.revive_volume(lv, &mut report).await;
        }

        info!(
            vg = %vg,
            mounted = report.mounted.len(),
            backfilled = report.backfilled.len(),
            failed = report.failed.len(),
            "Revival finished"
        );
        Ok(report)
    }

    async fn revive_volume(&self, lv: &LogicalVolume, report: &mut ReviveReport) {
        let paths = VolumePaths::new(&lv.vg_name, &lv.name, &self.settings.mount_root);

        match tokio::fs::symlink_metadata(&paths.target).await {
            Err(_) => {
                let Some(block_mode) = lv.tags.block_mode() else {
                    info!(lv = %lv.name, "Target missing and volume has no access mode tag");
                    return;
                };
                info!(lv = %lv.name, target = %paths.target.display(), block_mode, "Target missing, reviving");
                match self.manager.format_and_mount(&paths, block_mode).await {
                    Ok(_) => report.mounted.push(lv.name.clone()),
                    Err(e) => {
                        error!(lv = %lv.name, error = %e, "Unable to mount logical volume");
                        report.failed.push(lv.name.clone());
                    }
                }
            }
            Ok(meta) => {
                if lv.tags.block_mode().is_some() {
                    return;
                }
                let block_mode = !meta.is_dir();
                info!(lv = %lv.name, block_mode, "Volume lacks access mode tag, backfilling");
                let tags = [
                    self.manager.tags().logical_volume().to_string(),
                    block_mode_tag(block_mode),
                ];
                match self.manager.add_tags(&lv.vg_name, &lv.name, &tags).await {
                    Ok(()) => report.backfilled.push(lv.name.clone()),
                    Err(e) => {
                        error!(lv = %lv.name, error = %e, "Unable to add tags to logical volume");
                        report.failed.push(lv.name.clone());
                    }
                }
            }
        }
    }

    /// Log the raw `vgs` and `lvs` listings.
    pub async fn log_status(&self) {
        let snapshot = self.manager.status_snapshot().await;
        match snapshot.volume_groups {
            Ok(out) => info!(output = %out, "vgs"),
            Err(e) => error!(error = %e, "Unable to display volume groups"),
        }
        match snapshot.logical_volumes {
            Ok(out) => info!(output = %out, "lvs"),
            Err(e) => error!(error = %e, "Unable to display logical volumes"),
        }
    }
}
