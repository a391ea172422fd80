//! Logical volume topologies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Layout of a logical volume across the physical volumes of its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Plain concatenation, no redundancy.
    Linear,
    /// I/O spread over every physical volume of the group.
    Striped,
    /// One redundant copy (raid1).
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported lvm type: {0:?}, must be one of linear|striped|mirror")]
pub struct ParseTopologyError(pub String);

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Linear => "linear",
            Topology::Striped => "striped",
            Topology::Mirror => "mirror",
        }
    }

    /// Whether the topology needs at least two physical volumes.
    pub fn requires_multiple_pvs(&self) -> bool {
        !matches!(self, Topology::Linear)
    }

    /// Extra `lvcreate` arguments for a group with `pv_count` physical volumes.
    ///
    /// Callers must have checked [`Topology::requires_multiple_pvs`] first.
    pub fn lvcreate_args(&self, pv_count: u32) -> Vec<String> {
        match self {
            Topology::Linear => Vec::new(),
            Topology::Striped => vec![
                "--type".to_string(),
                "striped".to_string(),
                "--stripes".to_string(),
                pv_count.to_string(),
            ],
            Topology::Mirror => vec![
                "--type".to_string(),
                "raid1".to_string(),
                "--mirrors".to_string(),
                "1".to_string(),
                "--nosync".to_string(),
            ],
        }
    }

    /// Topology of an existing volume from its LVM segment type.
    pub fn from_segment_type(segtype: &str) -> Option<Self> {
        match segtype {
            "linear" => Some(Topology::Linear),
            "striped" => Some(Topology::Striped),
            "raid1" | "mirror" => Some(Topology::Mirror),
            _ => None,
        }
    }
}

impl FromStr for Topology {
    type Err = ParseTopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Topology::Linear),
            "striped" => Ok(Topology::Striped),
            "mirror" => Ok(Topology::Mirror),
            other => Err(ParseTopologyError(other.to_string())),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("linear", Topology::Linear)]
    #[case("striped", Topology::Striped)]
    #[case("mirror", Topology::Mirror)]
    fn parses_known_types(#[case] input: &str, #[case] expected: Topology) {
        assert_eq!(input.parse::<Topology>().unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[rstest]
    #[case("")]
    #[case("raid5")]
    #[case("Striped")]
    fn rejects_unknown_types(#[case] input: &str) {
        let err = input.parse::<Topology>().unwrap_err();
        assert!(err.to_string().contains("unsupported lvm type"));
    }

    #[test]
    fn striped_uses_every_pv() {
        assert_eq!(
            Topology::Striped.lvcreate_args(3),
            vec!["--type", "striped", "--stripes", "3"]
        );
    }

    #[test]
    fn mirror_is_unsynced_raid1() {
        let args = Topology::Mirror.lvcreate_args(2);
        assert!(args.contains(&"raid1".to_string()));
        assert!(args.contains(&"--nosync".to_string()));
        assert!(Topology::Linear.lvcreate_args(4).is_empty());
    }
}
