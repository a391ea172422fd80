//! Parsing of LVM JSON reports (`vgs`/`lvs --reportformat json`).
//!
//! LVM prints every column as a string, including numbers, and wraps rows
//! in a `report` array with one section per command:
//!
//! ```text
//! {"report": [{"lv": [{"lv_name": "pvc-1", "lv_size": "1073741824", ...}]}]}
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::VolumeError;
use crate::tags::Tags;
use crate::topology::Topology;

/// A volume group as listed by `vgs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub name: String,
    pub pv_count: u32,
    pub tags: Tags,
}

/// A logical volume as listed by `lvs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub name: String,
    pub vg_name: String,
    pub size_bytes: u64,
    pub segment_type: String,
    pub tags: Tags,
}

impl LogicalVolume {
    pub fn topology(&self) -> Option<Topology> {
        Topology::from_segment_type(&self.segment_type)
    }

    /// Device node, `/dev/<vg>/<lv>`.
    pub fn device_path(&self) -> PathBuf {
        crate::paths::device_path(&self.vg_name, &self.name)
    }
}

#[derive(Debug, Deserialize)]
struct Report<S> {
    report: Vec<S>,
}

#[derive(Debug, Deserialize)]
struct VgSection {
    #[serde(default)]
    vg: Vec<VgRow>,
}

#[derive(Debug, Deserialize)]
struct VgRow {
    vg_name: String,
    #[serde(default)]
    pv_count: String,
    #[serde(default)]
    vg_tags: String,
}

#[derive(Debug, Deserialize)]
struct LvSection {
    #[serde(default)]
    lv: Vec<LvRow>,
}

#[derive(Debug, Deserialize)]
struct LvRow {
    lv_name: String,
    #[serde(default)]
    vg_name: String,
    #[serde(default)]
    lv_size: String,
    #[serde(default)]
    lv_tags: String,
    #[serde(default)]
    segtype: String,
}

fn parse_err(what: &'static str, detail: impl ToString) -> VolumeError {
    VolumeError::Parse {
        what,
        detail: detail.to_string(),
    }
}

/// Parses `vgs --reportformat json -o vg_name,pv_count,vg_tags`.
pub fn parse_volume_groups(json: &str) -> Result<Vec<VolumeGroup>, VolumeError> {
    let report: Report<VgSection> =
        serde_json::from_str(json).map_err(|e| parse_err("vgs", e))?;

    report
        .report
        .into_iter()
        .flat_map(|section| section.vg)
        .map(|row| -> Result<VolumeGroup, VolumeError> {
            let pv_count: u32 = row
                .pv_count
                .trim()
                .parse()
                .map_err(|e| parse_err("vgs", format!("pv_count {:?}: {}", row.pv_count, e)))?;
            Ok(VolumeGroup {
                name: row.vg_name,
                pv_count,
                tags: Tags::parse(&row.vg_tags),
            })
        })
        .collect()
}

/// Parses `lvs --reportformat json --units b --nosuffix -o lv_name,vg_name,lv_size,lv_tags,segtype`.
pub fn parse_logical_volumes(json: &str) -> Result<Vec<LogicalVolume>, VolumeError> {
    let report: Report<LvSection> =
        serde_json::from_str(json).map_err(|e| parse_err("lvs", e))?;

    report
        .report
        .into_iter()
        .flat_map(|section| section.lv)
        .map(|row| -> Result<LogicalVolume, VolumeError> {
            let size_bytes: u64 = if row.lv_size.trim().is_empty() {
                0
            } else {
                row.lv_size
                    .trim()
                    .parse()
                    .map_err(|e| parse_err("lvs", format!("lv_size {:?}: {}", row.lv_size, e)))?
            };
            Ok(LogicalVolume {
                name: row.lv_name,
                vg_name: row.vg_name,
                size_bytes,
                segment_type: row.segtype,
                tags: Tags::parse(&row.lv_tags),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volume_groups() {
        let json = r#"{
            "report": [
                {"vg": [
                    {"vg_name": "csi-lvm", "pv_count": "3", "vg_tags": "vg.metal-stack.io/csi-lvm"},
                    {"vg_name": "system", "pv_count": "1", "vg_tags": ""}
                ]}
            ]
        }"#;

        let vgs = parse_volume_groups(json).unwrap();
        assert_eq!(vgs.len(), 2);
        assert_eq!(vgs[0].name, "csi-lvm");
        assert_eq!(vgs[0].pv_count, 3);
        assert!(vgs[0].tags.contains("vg.metal-stack.io/csi-lvm"));
        assert!(vgs[1].tags.is_empty());
    }

    #[test]
    fn parses_logical_volumes() {
        let json = r#"{"report": [{"lv": [
            {"lv_name": "pvc-1", "vg_name": "csi-lvm", "lv_size": "1073741824",
             "lv_tags": "lv.metal-stack.io/csi-lvm,isBlock=false", "segtype": "striped"}
        ]}]}"#;

        let lvs = parse_logical_volumes(json).unwrap();
        assert_eq!(lvs.len(), 1);
        let lv = &lvs[0];
        assert_eq!(lv.size_bytes, 1 << 30);
        assert_eq!(lv.topology(), Some(Topology::Striped));
        assert_eq!(lv.tags.block_mode(), Some(false));
        assert_eq!(lv.device_path(), PathBuf::from("/dev/csi-lvm/pvc-1"));
    }

    #[test]
    fn empty_group_has_no_volumes() {
        let lvs = parse_logical_volumes(r#"{"report": [{"lv": []}]}"#).unwrap();
        assert!(lvs.is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_volume_groups("  VG  #PV").unwrap_err();
        assert!(matches!(err, VolumeError::Parse { what: "vgs", .. }));
    }

    #[test]
    fn non_numeric_pv_count_is_a_parse_error() {
        let json = r#"{"report": [{"vg": [{"vg_name": "x", "pv_count": "many"}]}]}"#;
        assert!(parse_volume_groups(json).is_err());
    }
}
