//! csi-lvm provisioner.
//!
//! Turns provisioning and reclaim requests into volume actions and runs them
//! on the selected node through short-lived execution units.

pub mod action;
pub mod api;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod provisioner;
pub mod request;

pub use action::{ActionKind, VolumeAction};
pub use dispatcher::{DispatchSettings, Dispatcher};
pub use error::ProvisionError;
pub use provisioner::{LvmProvisioner, Provisioner, ProvisionerSettings};
pub use request::{
    NodeAffinity, Placement, ProvisionRequest, ReclaimPolicy, VolumeDescriptor, VolumeMode,
};
