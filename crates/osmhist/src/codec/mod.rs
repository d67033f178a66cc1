//! Binary encoding/decoding of entity histories.
//!
//! One record holds every version of one entity, delta encoded relative to a
//! [`Base`] tuple, together with colocated child records. Records are grouped
//! into grid cells by the [`cell`] container.

pub mod cell;
pub mod node;
pub mod primitives;
pub mod record;
pub mod relation;
pub mod way;

pub use cell::{cell_bytes, decode_cell, decompress, encode_cell, encode_cell_compressed, Cell, CellBuilder};
pub use node::{encode_node, NodeRecord, NodeVersions};
pub use primitives::{zigzag_decode, zigzag_encode, Reader, Writer};
pub use record::RecordHeader;
pub use relation::{encode_relation, RelationRecord, RelationVersion, RelationVersions, ResolvedMember};
pub use way::{encode_way, WayRecord, WayVersion, WayVersions};

use crate::error::{DecodeError, EncodeError};
use crate::model::{Base, BoundingBox, EntityHistory, NodeHistory, OsmType, WayHistory};

/// Resolves children that are not colocated in a record.
///
/// Implementations return `None` for unknown ids; the member is then absent.
pub trait ChildLookup {
    fn node(&self, id: i64) -> Option<NodeHistory> {
        let _ = id;
        None
    }

    fn way(&self, id: i64) -> Option<WayHistory> {
        let _ = id;
        None
    }
}

/// Lookup that knows nothing: only colocated children resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl ChildLookup for NoLookup {}

/// A way reference resolved inside its record.
#[derive(Debug, Clone)]
pub enum MemberRef<'r, T> {
    Colocated(&'r T),
    /// Stored elsewhere; resolution is deferred to a [`ChildLookup`].
    External(i64),
}

/// A decoded record of any type.
#[derive(Debug, Clone)]
pub enum Record<'a> {
    Node(NodeRecord<'a>),
    Way(WayRecord<'a>),
    Relation(RelationRecord<'a>),
}

impl<'a> Record<'a> {
    /// Decodes a record of type `kind` occupying all of `data`.
    pub fn decode(kind: OsmType, data: &'a [u8], base: Base) -> Result<Self, DecodeError> {
        Ok(match kind {
            OsmType::Node => Record::Node(NodeRecord::decode(data, base)?),
            OsmType::Way => Record::Way(WayRecord::decode(data, base)?),
            OsmType::Relation => Record::Relation(RelationRecord::decode(data, base)?),
        })
    }

    /// Decodes the record at `data[offset..offset + len]`.
    pub fn decode_at(
        kind: OsmType,
        data: &'a [u8],
        offset: usize,
        len: usize,
        base: Base,
    ) -> Result<Self, DecodeError> {
        Self::decode(kind, record::slice_at(data, offset, len)?, base)
    }

    pub fn kind(&self) -> OsmType {
        match self {
            Record::Node(_) => OsmType::Node,
            Record::Way(_) => OsmType::Way,
            Record::Relation(_) => OsmType::Relation,
        }
    }

    pub fn header(&self) -> &RecordHeader {
        match self {
            Record::Node(r) => r.header(),
            Record::Way(r) => r.header(),
            Record::Relation(r) => r.header(),
        }
    }

    pub fn id(&self) -> i64 {
        self.header().id
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.header().bbox
    }

    pub fn to_history(&self, lookup: &dyn ChildLookup) -> Result<EntityHistory, DecodeError> {
        Ok(match self {
            Record::Node(r) => EntityHistory::Node(r.to_history()?),
            Record::Way(r) => EntityHistory::Way(r.to_history(lookup)?),
            Record::Relation(r) => EntityHistory::Relation(r.to_history(lookup)?),
        })
    }

    pub fn rebase(&self, base: &Base) -> Result<Vec<u8>, EncodeError> {
        match self {
            Record::Node(r) => r.rebase(base),
            Record::Way(r) => r.rebase(base),
            Record::Relation(r) => r.rebase(base),
        }
    }
}

/// Encodes any history relative to `base`.
pub fn encode_history(history: &EntityHistory, base: &Base) -> Result<Vec<u8>, EncodeError> {
    match history {
        EntityHistory::Node(h) => encode_node(h, base),
        EntityHistory::Way(h) => encode_way(h, base),
        EntityHistory::Relation(h) => encode_relation(h, base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, Meta, OsmMember, OsmNode, OsmRelation, OsmWay, RelationHistory, Tag};
    use proptest::prelude::*;

    fn arb_meta(id: i64) -> impl Strategy<Value = Meta> {
        (
            any::<bool>(),
            0i64..2_000_000_000_000,
            0i64..100_000_000,
            0i64..10_000_000,
            prop::collection::btree_map(0u32..50, 0u32..1000, 0..5),
        )
            .prop_map(move |(visible, timestamp, changeset, user_id, tags)| Meta {
                id,
                version: 1,
                visible,
                timestamp,
                changeset,
                user_id,
                tags: if visible {
                    tags.into_iter().map(|(k, v)| Tag::new(k, v)).collect()
                } else {
                    Vec::new()
                },
            })
    }

    /// Node versions with distinct version numbers; location is dropped for deletions.
    fn arb_nodes(id: i64) -> impl Strategy<Value = Vec<OsmNode>> {
        prop::collection::vec(
            (arb_meta(id), -1_800_000_000i64..1_800_000_000, -900_000_000i64..900_000_000),
            1..8,
        )
        .prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (mut meta, lon, lat))| {
                    meta.version = i as u32 + 1;
                    let location = meta.visible.then_some(Location::new(lon, lat));
                    OsmNode { meta, location }
                })
                .collect()
        })
    }

    fn arb_ways(id: i64) -> impl Strategy<Value = Vec<OsmWay>> {
        prop::collection::vec((arb_meta(id), prop::collection::vec(1i64..20, 0..6)), 1..6)
            .prop_map(|entries| {
                entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, (mut meta, refs))| {
                        meta.version = i as u32 + 1;
                        let refs = if meta.visible { refs } else { Vec::new() };
                        OsmWay { meta, refs }
                    })
                    .collect()
            })
    }

    fn arb_way_history(id: i64) -> impl Strategy<Value = WayHistory> {
        (arb_ways(id), prop::collection::btree_set(1i64..20, 0..10)).prop_map(|(ways, colocated)| {
            let nodes = colocated.into_iter().map(|nid| {
                NodeHistory::new(vec![OsmNode {
                    meta: Meta::new(nid, 1, 0),
                    location: Some(Location::new(nid * 10, -nid * 10)),
                }])
                .unwrap()
            });
            WayHistory::new(ways, nodes).unwrap()
        })
    }

    fn arb_relation_history() -> impl Strategy<Value = RelationHistory> {
        let member = (0u8..3, 1i64..12, 0u32..4).prop_map(|(kind, id, role)| {
            let kind = OsmType::from_u64(kind as u64).unwrap();
            OsmMember::new(kind, id, role)
        });
        (
            prop::collection::vec((arb_meta(900), prop::collection::vec(member, 0..6)), 1..5),
            arb_way_history(3),
        )
            .prop_map(|(entries, way)| {
                let versions = entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, (mut meta, members))| {
                        meta.version = i as u32 + 1;
                        let members = if meta.visible { members } else { Vec::new() };
                        OsmRelation { meta, members }
                    })
                    .collect();
                let node = NodeHistory::new(vec![OsmNode {
                    meta: Meta::new(2, 1, 0),
                    location: Some(Location::new(1, 1)),
                }])
                .unwrap();
                RelationHistory::new(versions, [node], [way]).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_node_roundtrip(versions in arb_nodes(42), lon in -100i64..100, lat in -100i64..100) {
            let history = NodeHistory::new(versions).unwrap();
            let base = Base::new(40, 1_000, lon, lat);
            let bytes = encode_node(&history, &base).unwrap();
            let record = NodeRecord::decode(&bytes, base).unwrap();
            prop_assert_eq!(record.to_history().unwrap(), history);
        }

        #[test]
        fn prop_node_bbox_contains_visible(versions in arb_nodes(7)) {
            let history = NodeHistory::new(versions).unwrap();
            let bytes = encode_node(&history, &Base::default()).unwrap();
            let record = NodeRecord::decode(&bytes, Base::default()).unwrap();
            match record.bbox() {
                Some(bbox) => {
                    for node in history.versions() {
                        if let Some(loc) = node.location {
                            prop_assert!(bbox.contains(loc));
                        }
                    }
                }
                None => prop_assert!(history.versions().iter().all(|n| n.location.is_none())),
            }
        }

        #[test]
        fn prop_way_roundtrip(history in arb_way_history(15)) {
            let base = Base::new(0, 500, 3, -3);
            let bytes = encode_way(&history, &base).unwrap();
            let record = WayRecord::decode(&bytes, base).unwrap();
            prop_assert_eq!(record.to_history(&NoLookup).unwrap(), history);
        }

        #[test]
        fn prop_relation_roundtrip(history in arb_relation_history()) {
            let base = Base::new(100, 0, 0, 0);
            let bytes = encode_relation(&history, &base).unwrap();
            let record = RelationRecord::decode(&bytes, base).unwrap();
            prop_assert_eq!(record.to_history(&NoLookup).unwrap(), history);
        }

        #[test]
        fn prop_encoding_deterministic(history in arb_relation_history()) {
            let wrapped = EntityHistory::Relation(history.clone());
            let first = encode_history(&wrapped, &Base::default()).unwrap();
            let second = encode_history(&EntityHistory::Relation(history), &Base::default()).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_truncation_never_panics(history in arb_way_history(5), cut in 0usize..64) {
            let bytes = encode_way(&history, &Base::default()).unwrap();
            let end = cut.min(bytes.len());
            if let Ok(record) = WayRecord::decode(&bytes[..end], Base::default()) {
                let _ = record.to_history(&NoLookup);
            }
        }
    }

    #[test]
    fn test_record_dispatch() {
        let history = NodeHistory::new(vec![OsmNode {
            meta: Meta::new(5, 1, 10),
            location: Some(Location::new(1, 2)),
        }])
        .unwrap();
        let bytes = encode_history(&EntityHistory::Node(history.clone()), &Base::default()).unwrap();
        let mut padded = vec![0xFF; 3];
        padded.extend_from_slice(&bytes);

        let record = Record::decode_at(OsmType::Node, &padded, 3, bytes.len(), Base::default()).unwrap();
        assert_eq!(record.kind(), OsmType::Node);
        assert_eq!(record.id(), 5);
        assert_eq!(record.to_history(&NoLookup).unwrap(), EntityHistory::Node(history));
    }
}
