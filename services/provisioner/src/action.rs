//! Volume actions and their agent command lines.

use std::fmt;
use std::path::{Path, PathBuf};

use csi_lvm_volume::Topology;

use crate::error::ProvisionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Delete => "delete",
        }
    }

    fn subcommand(&self) -> &'static str {
        match self {
            ActionKind::Create => "createlv",
            ActionKind::Delete => "deletelv",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One volume operation to run on a node.
///
/// The volume name and mount root are both derived from `target_path`,
/// `<mount-root>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAction {
    kind: ActionKind,
    name: String,
    target_path: PathBuf,
    node_name: String,
    size_bytes: u64,
    topology: Topology,
    block_mode: bool,
}

fn split_target(target_path: &Path) -> Result<(String, PathBuf), ProvisionError> {
    let name = target_path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ProvisionError::Configuration(format!(
                "target path {} has no volume name",
                target_path.display()
            ))
        })?;
    let root = target_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            ProvisionError::Configuration(format!(
                "target path {} has no mount root",
                target_path.display()
            ))
        })?;
    validate_volume_name(name)?;
    Ok((name.to_string(), root.to_path_buf()))
}

/// Longest logical volume name LVM accepts.
const MAX_VOLUME_NAME_LEN: usize = 127;

/// Checks that `name` is usable both as a logical volume name and as a single
/// path component below the mount root.
pub fn validate_volume_name(name: &str) -> Result<(), ProvisionError> {
    let invalid = |reason: &str| {
        Err(ProvisionError::Configuration(format!(
            "invalid volume name {:?}: {}",
            name, reason
        )))
    };
    if name.is_empty() {
        return invalid("name is empty");
    }
    if name == "." || name == ".." {
        return invalid("name is a relative path");
    }
    if name.starts_with('-') {
        return invalid("name starts with '-'");
    }
    if name.len() > MAX_VOLUME_NAME_LEN {
        return invalid("name is too long");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-')))
    {
        return invalid(&format!("character {:?} is not allowed", c));
    }
    Ok(())
}

fn require_node(node_name: &str) -> Result<(), ProvisionError> {
    if node_name.is_empty() {
        return Err(ProvisionError::Configuration(
            "no node was specified".to_string(),
        ));
    }
    Ok(())
}

impl VolumeAction {
    pub fn create(
        target_path: PathBuf,
        node_name: &str,
        size_bytes: u64,
        topology: Topology,
        block_mode: bool,
    ) -> Result<Self, ProvisionError> {
        require_node(node_name)?;
        if size_bytes == 0 {
            return Err(ProvisionError::Configuration(
                "volume size must be greater than 0".to_string(),
            ));
        }
        let (name, _) = split_target(&target_path)?;
        Ok(Self {
            kind: ActionKind::Create,
            name,
            target_path,
            node_name: node_name.to_string(),
            size_bytes,
            topology,
            block_mode,
        })
    }

    pub fn delete(
        target_path: PathBuf,
        node_name: &str,
        block_mode: bool,
    ) -> Result<Self, ProvisionError> {
        require_node(node_name)?;
        let (name, _) = split_target(&target_path)?;
        Ok(Self {
            kind: ActionKind::Delete,
            name,
            target_path,
            node_name: node_name.to_string(),
            size_bytes: 0,
            topology: Topology::Linear,
            block_mode,
        })
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn mount_root(&self) -> &Path {
        self.target_path.parent().unwrap_or(Path::new("/"))
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn block_mode(&self) -> bool {
        self.block_mode
    }

    /// Execution unit name, `<action>-<volume>`.
    pub fn unit_name(&self) -> String {
        format!("{}-{}", self.kind, self.name)
    }

    /// Container name, `csi-lvm-<action>`.
    pub fn container_name(&self) -> String {
        format!("csi-lvm-{}", self.kind)
    }

    /// Node agent arguments.
    ///
    /// Creates carry size, device pattern and topology; deletes never carry a
    /// size. Both carry name, volume group and mount root.
    pub fn args(&self, vg: &str, device_pattern: &str) -> Vec<String> {
        let mut args = vec![self.kind.subcommand().to_string()];
        if self.kind == ActionKind::Create {
            args.extend([
                "--lvsize".to_string(),
                self.size_bytes.to_string(),
                "--devices".to_string(),
                device_pattern.to_string(),
                "--lvmtype".to_string(),
                self.topology.to_string(),
            ]);
        }
        args.extend([
            "--lvname".to_string(),
            self.name.clone(),
            "--vgname".to_string(),
            vg.to_string(),
            "--directory".to_string(),
            self.mount_root().display().to_string(),
        ]);
        if self.block_mode {
            args.push("--block".to_string());
        }
        args
    }
}
