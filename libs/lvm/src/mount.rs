//! Formatting, mounting and unmounting of logical volumes.

use std::path::Path;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::VolumeError;
use crate::executor::ExecutionError;
use crate::manager::VolumeManager;
use crate::paths::VolumePaths;

/// Filesystem put on volumes exposed as a directory.
pub const FILESYSTEM: &str = "ext4";

/// `blkid` exit code when no signature was found.
const BLKID_NOT_FOUND: i32 = 2;

fn already_mounted(err: &ExecutionError) -> bool {
    err.output().contains("already mounted")
}

fn not_mounted(err: &ExecutionError) -> bool {
    let output = err.output();
    output.contains("not mounted") || output.contains("no mount point specified")
}

impl VolumeManager {
    /// Filesystem signature on `device`, `None` when it is blank.
    pub async fn filesystem_type(&self, device: &Path) -> Result<Option<String>, VolumeError> {
        let mut cmd = Command::new("blkid");
        cmd.args(["-o", "value", "-s", "TYPE"]).arg(device);
        match self.executor().execute(&mut cmd).await {
            Ok(output) => {
                let fstype = output.stdout.trim();
                Ok((!fstype.is_empty()).then(|| fstype.to_string()))
            }
            Err(e) if e.exit_code() == Some(BLKID_NOT_FOUND) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Makes the volume available at its target path.
    ///
    /// Directory mode formats a blank device with ext4 and mounts it on a
    /// directory. Block mode bind-mounts the device node onto a regular file.
    /// A target that is already mounted counts as success.
    pub async fn format_and_mount(
        &self,
        paths: &VolumePaths,
        block_mode: bool,
    ) -> Result<String, VolumeError> {
        if block_mode {
            return self.bind_mount(paths).await;
        }

        match self.filesystem_type(&paths.device).await? {
            Some(fstype) => {
                info!(device = %paths.device.display(), fstype = %fstype, "device already formatted")
            }
            None => {
                let mut cmd = Command::new(format!("mkfs.{}", FILESYSTEM));
                cmd.arg(&paths.device);
                self.executor().execute(&mut cmd).await?;
            }
        }

        tokio::fs::create_dir_all(&paths.target)
            .await
            .map_err(|e| VolumeError::io(&paths.target, e))?;

        let mut cmd = Command::new("mount");
        cmd.args(["--make-shared", "-t", FILESYSTEM])
            .arg(&paths.device)
            .arg(&paths.target);
        self.run_mount(cmd, paths).await
    }

    async fn bind_mount(&self, paths: &VolumePaths) -> Result<String, VolumeError> {
        if let Some(parent) = paths.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VolumeError::io(parent, e))?;
        }
        if tokio::fs::symlink_metadata(&paths.target).await.is_err() {
            tokio::fs::File::create(&paths.target)
                .await
                .map_err(|e| VolumeError::io(&paths.target, e))?;
        }

        let mut cmd = Command::new("mount");
        cmd.args(["--make-shared", "--bind"])
            .arg(&paths.device)
            .arg(&paths.target);
        self.run_mount(cmd, paths).await
    }

    async fn run_mount(
        &self,
        mut cmd: Command,
        paths: &VolumePaths,
    ) -> Result<String, VolumeError> {
        match self.executor().execute(&mut cmd).await {
            Ok(output) => {
                info!(target = %paths.target.display(), "volume mounted");
                Ok(output.combined())
            }
            Err(e) if already_mounted(&e) => {
                info!(target = %paths.target.display(), "volume already mounted");
                Ok(e.output().to_string())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unmounts the target, removes it, then removes the logical volume.
    ///
    /// An absent mount point or volume is not an error. Failing to remove the
    /// mount point is only logged.
    pub async fn unmount_and_remove(
        &self,
        paths: &VolumePaths,
        vg: &str,
        lv: &str,
    ) -> Result<(), VolumeError> {
        match tokio::fs::symlink_metadata(&paths.target).await {
            Ok(meta) => {
                let mut cmd = Command::new("umount");
                cmd.args(["--lazy", "--force"]).arg(&paths.target);
                match self.executor().execute(&mut cmd).await {
                    Ok(_) => {}
                    Err(e) if not_mounted(&e) => {
                        info!(target = %paths.target.display(), "target was not mounted")
                    }
                    Err(e) => return Err(e.into()),
                }

                let removed = if meta.is_dir() {
                    tokio::fs::remove_dir(&paths.target).await
                } else {
                    tokio::fs::remove_file(&paths.target).await
                };
                if let Err(e) = removed {
                    warn!(target = %paths.target.display(), error = %e, "unable to remove mount point");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(target = %paths.target.display(), "mount point not found anymore")
            }
            Err(e) => {
                warn!(target = %paths.target.display(), error = %e, "unable to inspect mount point")
            }
        }

        if self.find_logical_volume_exact(vg, lv).await?.is_none() {
            info!(lv = %lv, vg = %vg, "logical volume not found anymore");
            return Ok(());
        }
        self.remove_logical_volume(vg, lv).await
    }
}
