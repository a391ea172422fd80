//! Test doubles shared by the provisioner, the node agent and the e2e suite.

pub mod cluster;
pub mod lvm;

pub use cluster::FakeCluster;
pub use lvm::{FakeLv, FakeLvm, FakeVg};
