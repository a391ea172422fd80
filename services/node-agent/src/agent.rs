//! Single volume actions, run once per execution unit.

use csi_lvm_volume::{
    block_mode_tag, LvCreation, NewLogicalVolume, VolumeError, VolumeManager, VolumePaths,
};
use tracing::info;

use crate::config::{CreateArgs, DeleteArgs};

/// Ensures the volume group, creates the volume and mounts it.
///
/// A volume that already exists is mounted again, so a repeated action picks
/// up where an interrupted one stopped.
pub async fn create_volume(manager: &VolumeManager, args: &CreateArgs) -> Result<(), VolumeError> {
    info!(
        lv = %args.lvname,
        size_bytes = args.lvsize,
        vg = %args.vgname,
        devices = ?args.devices,
        directory = %args.directory.display(),
        lvmtype = %args.lvmtype,
        block = args.block,
        "Creating logical volume"
    );

    let existed = manager
        .ensure_volume_group(&args.vgname, &args.devices)
        .await?;
    if !existed {
        info!(vg = %args.vgname, "Volume group created");
    }

    let creation = manager
        .create_logical_volume(&NewLogicalVolume {
            vg: args.vgname.clone(),
            name: args.lvname.clone(),
            size_bytes: args.lvsize,
            topology: args.lvmtype,
            block_mode: args.block,
        })
        .await?;
    if let LvCreation::AlreadyExists { existing } = &creation {
        info!(lv = %args.lvname, existing = %existing, "Logical volume exists, mounting");
        if *existing == args.lvname {
            ensure_block_mode_tag(manager, args).await?;
        }
    }

    let paths = VolumePaths::new(&args.vgname, &args.lvname, &args.directory);
    manager.format_and_mount(&paths, args.block).await?;

    info!(lv = %args.lvname, vg = %args.vgname, target = %paths.target.display(), "Logical volume created");
    Ok(())
}

/// Adds the `isBlock` tag if an earlier attempt created the volume but did
/// not get to tag it.
async fn ensure_block_mode_tag(manager: &VolumeManager, args: &CreateArgs) -> Result<(), VolumeError> {
    let Some(lv) = manager
        .find_logical_volume_exact(&args.vgname, &args.lvname)
        .await?
    else {
        return Ok(());
    };
    if lv.tags.block_mode().is_none() {
        info!(lv = %args.lvname, block = args.block, "Logical volume lacks access mode tag, adding");
        manager
            .add_tags(&args.vgname, &args.lvname, &[block_mode_tag(args.block)])
            .await?;
    }
    Ok(())
}

/// Unmounts and removes the volume; a volume that is already gone is fine.
pub async fn delete_volume(manager: &VolumeManager, args: &DeleteArgs) -> Result<(), VolumeError> {
    info!(
        lv = %args.lvname,
        vg = %args.vgname,
        directory = %args.directory.display(),
        block = args.block,
        "Deleting logical volume"
    );

    let paths = VolumePaths::new(&args.vgname, &args.lvname, &args.directory);
    manager
        .unmount_and_remove(&paths, &args.vgname, &args.lvname)
        .await?;

    info!(lv = %args.lvname, vg = %args.vgname, "Logical volume deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use csi_lvm_testing::FakeLvm;
    use csi_lvm_volume::Topology;

    use super::*;

    fn devices(count: usize) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            std::fs::write(dir.path().join(format!("nvme{}n1", i)), b"").unwrap();
        }
        let pattern = format!("{}/nvme*", dir.path().display());
        (dir, pattern)
    }

    fn create_args(root: &std::path::Path, pattern: &str, lvmtype: Topology, block: bool) -> CreateArgs {
        CreateArgs {
            lvname: "pvc-1".to_string(),
            lvsize: 10 << 30,
            vgname: "csi-lvm".to_string(),
            directory: root.to_path_buf(),
            lvmtype,
            devices: vec![pattern.to_string()],
            block,
        }
    }

    #[tokio::test]
    async fn create_builds_group_volume_and_mount() {
        let (_devs, pattern) = devices(3);
        let root = tempfile::tempdir().unwrap();
        let lvm = FakeLvm::new();
        let manager = VolumeManager::new(lvm.executor().as_executor());

        create_volume(&manager, &create_args(root.path(), &pattern, Topology::Striped, false))
            .await
            .unwrap();

        let vg = lvm.volume_group("csi-lvm").unwrap();
        assert_eq!(vg.pv_count, 3);
        assert!(vg.tags.contains("vg.metal-stack.io/csi-lvm"));
        let lv = lvm.logical_volume("csi-lvm", "pvc-1").unwrap();
        assert_eq!(lv.segment_type, "striped");
        assert_eq!(lv.filesystem.as_deref(), Some("ext4"));
        assert!(lvm.is_mounted(&root.path().join("pvc-1")));
    }

    #[tokio::test]
    async fn repeated_create_is_idempotent() {
        let (_devs, pattern) = devices(2);
        let root = tempfile::tempdir().unwrap();
        let lvm = FakeLvm::new();
        let executor = lvm.executor();
        let manager = VolumeManager::new(executor.clone().as_executor());
        let args = create_args(root.path(), &pattern, Topology::Mirror, true);

        create_volume(&manager, &args).await.unwrap();
        create_volume(&manager, &args).await.unwrap();

        assert_eq!(executor.invocations_of("vgcreate").len(), 1);
        assert_eq!(executor.invocations_of("lvcreate").len(), 1);
        assert!(root.path().join("pvc-1").is_file());
    }

    #[tokio::test]
    async fn delete_removes_mount_and_volume() {
        let (_devs, pattern) = devices(1);
        let root = tempfile::tempdir().unwrap();
        let lvm = FakeLvm::new();
        let manager = VolumeManager::new(lvm.executor().as_executor());
        create_volume(&manager, &create_args(root.path(), &pattern, Topology::Linear, false))
            .await
            .unwrap();

        let args = DeleteArgs {
            lvname: "pvc-1".to_string(),
            vgname: "csi-lvm".to_string(),
            directory: root.path().to_path_buf(),
            block: false,
        };
        delete_volume(&manager, &args).await.unwrap();
        assert!(lvm.logical_volume("csi-lvm", "pvc-1").is_none());
        assert!(!root.path().join("pvc-1").exists());

        // Second delete finds nothing to do.
        delete_volume(&manager, &args).await.unwrap();
    }

    #[tokio::test]
    async fn delete_leaves_longer_named_volume_alone() {
        let root = tempfile::tempdir().unwrap();
        let lvm = FakeLvm::new()
            .with_volume_group("csi-lvm", 1, &[])
            .with_logical_volume("csi-lvm", "pvc-10", 1 << 30, &["isBlock=false"]);
        let manager = VolumeManager::new(lvm.executor().as_executor());

        let args = DeleteArgs {
            lvname: "pvc-1".to_string(),
            vgname: "csi-lvm".to_string(),
            directory: root.path().to_path_buf(),
            block: false,
        };
        delete_volume(&manager, &args).await.unwrap();
        assert!(lvm.logical_volume("csi-lvm", "pvc-10").is_some());
    }

    #[tokio::test]
    async fn resumed_create_tags_untagged_volume() {
        let root = tempfile::tempdir().unwrap();
        let lvm = FakeLvm::new()
            .with_volume_group("csi-lvm", 1, &[])
            .with_logical_volume("csi-lvm", "pvc-1", 10 << 30, &["lv.metal-stack.io/csi-lvm"]);
        let executor = lvm.executor();
        let manager = VolumeManager::new(executor.clone().as_executor());

        let args = create_args(root.path(), "/dev/nvme*", Topology::Linear, false);
        create_volume(&manager, &args).await.unwrap();

        assert!(executor.invocations_of("lvcreate").is_empty());
        let lv = lvm.logical_volume("csi-lvm", "pvc-1").unwrap();
        assert!(lv.tags.contains("isBlock=false"));
        assert!(lvm.is_mounted(&root.path().join("pvc-1")));

        // A tagged volume is not tagged again.
        create_volume(&manager, &args).await.unwrap();
        let tag_writes = executor
            .invocations_of("lvchange")
            .into_iter()
            .filter(|i| i.has_arg("--addtag"))
            .count();
        assert_eq!(tag_writes, 1);
    }

    #[tokio::test]
    async fn create_does_not_tag_longer_named_volume() {
        let root = tempfile::tempdir().unwrap();
        let lvm = FakeLvm::new()
            .with_volume_group("csi-lvm", 1, &[])
            .with_logical_volume("csi-lvm", "pvc-10", 10 << 30, &[]);
        let executor = lvm.executor();
        let manager = VolumeManager::new(executor.clone().as_executor());

        // Substring lookup reports pvc-10 as existing; mounting pvc-1 then fails.
        let args = create_args(root.path(), "/dev/nvme*", Topology::Linear, true);
        assert!(create_volume(&manager, &args).await.is_err());
        assert!(lvm.logical_volume("csi-lvm", "pvc-10").unwrap().tags.is_empty());
    }
}
