//! Names shared with the orchestrator.

/// Annotation recording the node a volume was provisioned on.
pub const PROVISIONER_IDENTITY_ANNOTATION: &str = "lvmProvisionerIdentity";

/// Request annotation selecting the volume topology.
pub const TOPOLOGY_ANNOTATION: &str = "csi-lvm.metal-stack.io/type";

/// Node label used for node affinity.
pub const NODE_AFFINITY_KEY: &str = "kubernetes.io/hostname";

/// Container image running the node agent.
pub const DEFAULT_IMAGE: &str = "ghcr.io/metal-stack/csi-lvm-provisioner";

/// Host path holding device nodes.
pub const DEVICE_DIR: &str = "/dev";
