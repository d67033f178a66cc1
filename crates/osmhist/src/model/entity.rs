//! Point-in-time entity versions.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::model::Location;

/// The three OSM entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OsmType {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl OsmType {
    /// All types in storage order.
    pub const ALL: [OsmType; 3] = [OsmType::Node, OsmType::Way, OsmType::Relation];

    /// Parses the wire value of a type.
    pub fn from_u64(value: u64) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(OsmType::Node),
            1 => Ok(OsmType::Way),
            2 => Ok(OsmType::Relation),
            _ => Err(DecodeError::InvalidOsmType { value }),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            OsmType::Node => "node",
            OsmType::Way => "way",
            OsmType::Relation => "relation",
        }
    }
}

/// One tag as a pair of vocabulary ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub key: u32,
    pub value: u32,
}

impl Tag {
    pub const fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }
}

/// Fields shared by every entity version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub id: i64,
    /// Version number, always >= 1.
    pub version: u32,
    /// False for a version that deletes the entity.
    pub visible: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub changeset: i64,
    pub user_id: i64,
    /// Sorted by key. Empty for deleted versions.
    pub tags: Vec<Tag>,
}

impl Meta {
    pub fn new(id: i64, version: u32, timestamp: i64) -> Self {
        Self {
            id,
            version,
            visible: true,
            timestamp,
            changeset: 0,
            user_id: 0,
            tags: Vec::new(),
        }
    }

    /// Returns the value id of `key`, if the version carries it.
    pub fn tag_value(&self, key: u32) -> Option<u32> {
        self.tags
            .binary_search_by_key(&key, |t| t.key)
            .ok()
            .map(|i| self.tags[i].value)
    }

    pub fn has_tag_key(&self, key: u32) -> bool {
        self.tag_value(key).is_some()
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tag_value(tag.key) == Some(tag.value)
    }

    /// Sorts the tag list by key, the order the codec stores it in.
    pub fn normalize_tags(&mut self) {
        self.tags.sort_unstable();
        self.tags.dedup_by_key(|t| t.key);
    }

    /// Signed version as stored on the wire: negative for deletions.
    pub(crate) fn signed_version(&self) -> i64 {
        if self.visible {
            self.version as i64
        } else {
            -(self.version as i64)
        }
    }
}

/// Node version. `location` is `None` exactly when the version is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmNode {
    pub meta: Meta,
    pub location: Option<Location>,
}

/// Way version with its ordered node references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmWay {
    pub meta: Meta,
    pub refs: Vec<i64>,
}

/// One relation member reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsmMember {
    pub kind: OsmType,
    pub id: i64,
    pub role: u32,
}

impl OsmMember {
    pub const fn new(kind: OsmType, id: i64, role: u32) -> Self {
        Self { kind, id, role }
    }
}

/// Relation version with its ordered members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmRelation {
    pub meta: Meta,
    pub members: Vec<OsmMember>,
}

/// Access to the shared fields of a typed version.
pub trait Versioned {
    fn meta(&self) -> &Meta;
    fn meta_mut(&mut self) -> &mut Meta;
}

macro_rules! impl_versioned {
    ($($ty:ty),*) => {
        $(impl Versioned for $ty {
            fn meta(&self) -> &Meta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut Meta {
                &mut self.meta
            }
        })*
    };
}

impl_versioned!(OsmNode, OsmWay, OsmRelation);

/// Any entity version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsmEntity {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

impl OsmEntity {
    pub fn meta(&self) -> &Meta {
        match self {
            OsmEntity::Node(n) => &n.meta,
            OsmEntity::Way(w) => &w.meta,
            OsmEntity::Relation(r) => &r.meta,
        }
    }

    pub fn kind(&self) -> OsmType {
        match self {
            OsmEntity::Node(_) => OsmType::Node,
            OsmEntity::Way(_) => OsmType::Way,
            OsmEntity::Relation(_) => OsmType::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        self.meta().id
    }

    pub fn is_visible(&self) -> bool {
        self.meta().visible
    }

    pub fn timestamp(&self) -> i64 {
        self.meta().timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_lookup() {
        let mut meta = Meta::new(1, 1, 0);
        meta.tags = vec![Tag::new(5, 1), Tag::new(2, 7), Tag::new(5, 9)];
        meta.normalize_tags();
        assert_eq!(meta.tags, vec![Tag::new(2, 7), Tag::new(5, 1)]);
        assert_eq!(meta.tag_value(2), Some(7));
        assert!(meta.has_tag(Tag::new(5, 1)));
        assert!(!meta.has_tag_key(3));
    }

    #[test]
    fn test_signed_version() {
        let mut meta = Meta::new(1, 4, 0);
        assert_eq!(meta.signed_version(), 4);
        meta.visible = false;
        assert_eq!(meta.signed_version(), -4);
    }

    #[test]
    fn test_osm_type_wire_values() {
        for kind in OsmType::ALL {
            assert_eq!(OsmType::from_u64(kind.as_u8() as u64).unwrap(), kind);
        }
        assert!(matches!(
            OsmType::from_u64(3),
            Err(DecodeError::InvalidOsmType { value: 3 })
        ));
    }
}
