//! Names of the health check canary and its degradation signals.

/// Name of the health check volume.
pub const CANARY_NAME: &str = "canary";

/// Size of the health check volume; LVM rounds it up to one extent.
pub const CANARY_SIZE_BYTES: u64 = 10 * 1024;

/// Reason on the events and the readiness condition of a degraded node.
pub const NOT_WORKING_REASON: &str = "CSILVMNotWorking";

pub const NOT_WORKING_MESSAGE: &str = "csi-lvm cannot create volumes";

/// Reason of the node readiness event.
pub const NODE_NOT_READY_REASON: &str = "NodeNotReady";

/// Component reported as event source.
pub const EVENT_SOURCE: &str = "csi-lvm";

/// Namespace of the component event.
pub const COMPONENT_EVENT_NAMESPACE: &str = "csi-lvm";

/// Namespace of the node readiness event.
pub const NODE_EVENT_NAMESPACE: &str = "default";
