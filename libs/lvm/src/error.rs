//! Volume manager errors.

use thiserror::Error;

use crate::executor::ExecutionError;
use crate::topology::Topology;

/// Errors from volume manager operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// A toolchain command failed; carries its captured output.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A report could not be understood.
    #[error("failed to parse {what} report: {detail}")]
    Parse { what: &'static str, detail: String },

    /// Device patterns resolved to nothing.
    #[error("no devices match patterns {patterns:?}")]
    NoDevices { patterns: Vec<String> },

    /// A device pattern is not a valid glob.
    #[error("invalid device pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The requested topology needs more physical volumes.
    #[error("cannot use type {topology} when pv count is smaller than 2 (vg {vg} has {pv_count})")]
    InsufficientPhysicalVolumes {
        topology: Topology,
        vg: String,
        pv_count: u32,
    },

    #[error("volume group {0} not found")]
    VolumeGroupNotFound(String),

    #[error("size must be greater than 0")]
    InvalidSize,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl VolumeError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        VolumeError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
