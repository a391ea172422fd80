//! Path conventions shared by every component.

use std::path::{Path, PathBuf};

/// Device node of a logical volume, `/dev/<vg>/<lv>`.
pub fn device_path(vg: &str, lv: &str) -> PathBuf {
    Path::new("/dev").join(vg).join(lv)
}

/// Mount target of a logical volume, `<mount-root>/<lv>`.
pub fn mount_path(mount_root: &Path, lv: &str) -> PathBuf {
    mount_root.join(lv)
}

/// Device node and mount target of one logical volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePaths {
    pub device: PathBuf,
    pub target: PathBuf,
}

impl VolumePaths {
    pub fn new(vg: &str, lv: &str, mount_root: &Path) -> Self {
        Self {
            device: device_path(vg, lv),
            target: mount_path(mount_root, lv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_conventions() {
        let paths = VolumePaths::new("csi-lvm", "pvc-1", Path::new("/tmp/csi-lvm"));
        assert_eq!(paths.device, PathBuf::from("/dev/csi-lvm/pvc-1"));
        assert_eq!(paths.target, PathBuf::from("/tmp/csi-lvm/pvc-1"));
    }
}
