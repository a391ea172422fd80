//! Local logical volume management.
//!
//! Wraps the LVM command line toolchain (`vgs`, `lvcreate`, `mount`, ...)
//! behind a [`VolumeManager`]. All state lives in LVM itself: volume groups
//! and logical volumes created here carry an ownership tag, and every logical
//! volume also records its access mode as an `isBlock=<bool>` tag.
//!
//! Commands run through the [`Executor`] seam so the whole manager can be
//! driven by a [`FakeExecutor`] in tests.

pub mod error;
pub mod executor;
pub mod manager;
pub mod mount;
pub mod paths;
pub mod report;
pub mod tags;
pub mod topology;

pub use error::VolumeError;
pub use executor::{
    BoxedExecutor, ExecutionError, Executor, FakeExecutor, HostExecutor, Invocation, Output,
};
pub use manager::{resolve_devices, LvCreation, NewLogicalVolume, StatusSnapshot, VolumeManager};
pub use paths::VolumePaths;
pub use report::{LogicalVolume, VolumeGroup};
pub use tags::{block_mode_tag, TagVocabulary, Tags, BLOCK_MODE_KEY};
pub use topology::{ParseTopologyError, Topology};
