//! csi-lvm node agent.
//!
//! Runs on every node with local storage. Two roles:
//!
//! - **Execution agent**: `createlv` and `deletelv` run a single volume action
//!   inside an execution unit and exit.
//! - **Reviver**: `revivelvs` restores mounts after a restart, keeps them
//!   reconciled, and runs the canary health check that takes a broken node
//!   out of scheduling.

pub mod agent;
pub mod config;
pub mod constants;
pub mod health;
pub mod reconciler;

pub use agent::{create_volume, delete_volume};
pub use health::{HealthMonitor, HealthSettings};
pub use reconciler::{Reconciler, ReconcilerSettings, ReviveReport};
