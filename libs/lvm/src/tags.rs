//! Tag vocabulary.
//!
//! LVM tags are the only persisted metadata: an ownership marker on every
//! volume group and logical volume this system creates, plus an
//! `isBlock=<bool>` access-mode marker on each logical volume. Reconciliation
//! after a node restart reads nothing else.

use std::collections::BTreeSet;

/// Key of the access-mode tag.
pub const BLOCK_MODE_KEY: &str = "isBlock";

/// Default tag domain.
pub const DEFAULT_TAG_DOMAIN: &str = "metal-stack.io";

/// Ownership marker strings, namespaced by a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVocabulary {
    volume_group: String,
    logical_volume: String,
}

impl TagVocabulary {
    /// Vocabulary for `domain`, e.g. `lv.<domain>/csi-lvm`.
    pub fn new(domain: &str) -> Self {
        Self {
            volume_group: format!("vg.{}/csi-lvm", domain),
            logical_volume: format!("lv.{}/csi-lvm", domain),
        }
    }

    pub fn volume_group(&self) -> &str {
        &self.volume_group
    }

    pub fn logical_volume(&self) -> &str {
        &self.logical_volume
    }
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_DOMAIN)
    }
}

/// Formats the access-mode tag.
pub fn block_mode_tag(block: bool) -> String {
    format!("{}={}", BLOCK_MODE_KEY, block)
}

/// Tags attached to a single LVM entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    /// Parses LVM's comma separated `lv_tags`/`vg_tags` column.
    pub fn parse(column: &str) -> Self {
        Self(
            column
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        self.0.insert(tag.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Access mode recorded in the tags, `None` for legacy volumes without one.
    ///
    /// A malformed value is treated like a missing one.
    pub fn block_mode(&self) -> Option<bool> {
        self.0.iter().find_map(|tag| {
            let (key, value) = tag.split_once('=')?;
            if key != BLOCK_MODE_KEY {
                return None;
            }
            value.parse().ok()
        })
    }
}

impl<S: Into<String>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_is_namespaced() {
        let vocab = TagVocabulary::new("example.com");
        assert_eq!(vocab.logical_volume(), "lv.example.com/csi-lvm");
        assert_eq!(vocab.volume_group(), "vg.example.com/csi-lvm");
    }

    #[test]
    fn parses_lvm_tag_column() {
        let tags = Tags::parse("lv.metal-stack.io/csi-lvm,isBlock=true");
        assert!(tags.contains("lv.metal-stack.io/csi-lvm"));
        assert_eq!(tags.block_mode(), Some(true));
    }

    #[test]
    fn empty_column_has_no_tags() {
        let tags = Tags::parse("");
        assert!(tags.is_empty());
        assert_eq!(tags.block_mode(), None);
    }

    #[test]
    fn malformed_block_tag_counts_as_missing() {
        let tags = Tags::parse("isBlock=maybe");
        assert_eq!(tags.block_mode(), None);
    }

    #[test]
    fn block_mode_tag_round_trips() {
        let tags: Tags = [block_mode_tag(false)].into_iter().collect();
        assert_eq!(tags.block_mode(), Some(false));
    }
}
