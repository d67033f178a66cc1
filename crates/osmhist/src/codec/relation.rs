//! Relation records.
//!
//! Relations carry two child groups: colocated nodes (unless `HAS_NO_NODES`)
//! followed by colocated ways (unless `HAS_NO_WAYS`). Each member of a
//! relation entry is `[type:uvarint][ordinal+1:uvarint | 0 idΔ:svarint][roleId:uvarint]`.
//! The ordinal indexes the group matching the member type; relation members
//! are never colocated.

use rustc_hash::FxHashMap;

use crate::codec::node::{encode_node, NodeRecord};
use crate::codec::primitives::{Reader, Writer};
use crate::codec::record::{
    key_table, read_child_group, read_header, slice_at, version_flags, write_child_group,
    write_header, HeadDecoder, HeadEncoder, RecordHeader, CHANGED_PAYLOAD, HEADER_HAS_NO_NODES,
    HEADER_HAS_NO_WAYS,
};
use crate::codec::way::{encode_way, WayRecord};
use crate::codec::{ChildLookup, NoLookup};
use crate::error::{DecodeError, EncodeError};
use crate::limits::MAX_RELATION_MEMBERS;
use crate::model::{
    Base, BoundingBox, NodeHistory, OsmMember, OsmRelation, OsmType, RelationHistory, WayHistory,
};

/// Decoded view over an encoded relation history and its colocated children.
#[derive(Debug, Clone)]
pub struct RelationRecord<'a> {
    data: &'a [u8],
    base: Base,
    header: RecordHeader,
    nodes: Vec<NodeRecord<'a>>,
    ways: Vec<WayRecord<'a>>,
    stream: &'a [u8],
}

impl<'a> RelationRecord<'a> {
    /// Decodes the record occupying all of `data`.
    pub fn decode(data: &'a [u8], base: Base) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let header = read_header(&mut reader, &base)?;
        let child_base = base.for_children();
        let nodes = if header.flags & HEADER_HAS_NO_NODES == 0 {
            read_child_group(&mut reader)?
                .into_iter()
                .map(|bytes| NodeRecord::decode(bytes, child_base))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        let ways = if header.flags & HEADER_HAS_NO_WAYS == 0 {
            read_child_group(&mut reader)?
                .into_iter()
                .map(|bytes| WayRecord::decode(bytes, child_base))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            data,
            base,
            header,
            nodes,
            ways,
            stream: reader.remaining(),
        })
    }

    /// Decodes the record at `data[offset..offset + len]`.
    pub fn decode_at(
        data: &'a [u8],
        offset: usize,
        len: usize,
        base: Base,
    ) -> Result<Self, DecodeError> {
        Self::decode(slice_at(data, offset, len)?, base)
    }

    pub fn id(&self) -> i64 {
        self.header.id
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.header.bbox
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn nodes(&self) -> &[NodeRecord<'a>] {
        &self.nodes
    }

    pub fn ways(&self) -> &[WayRecord<'a>] {
        &self.ways
    }

    /// Lazily walks the versions, newest first.
    pub fn versions(&self) -> RelationVersions<'_, 'a> {
        RelationVersions {
            record: self,
            reader: Reader::new(self.stream),
            head: HeadDecoder::new(self.header.id, &self.base),
            members: Vec::new(),
            slots: Vec::new(),
            failed: false,
        }
    }

    /// Materializes the full history, resolving non-colocated node and way
    /// members through `lookup`. Colocated ways resolve their own external
    /// nodes through the same lookup.
    pub fn to_history(&self, lookup: &dyn ChildLookup) -> Result<RelationHistory, DecodeError> {
        let mut versions = Vec::new();
        let mut external_nodes = Vec::new();
        let mut external_ways = Vec::new();
        for version in self.versions() {
            let version = version?;
            for member in &version.members {
                if let ResolvedMember::External(m) = member {
                    match m.kind {
                        OsmType::Node => external_nodes.push(m.id),
                        OsmType::Way => external_ways.push(m.id),
                        OsmType::Relation => {}
                    }
                }
            }
            versions.push(version.relation);
        }
        external_nodes.sort_unstable();
        external_nodes.dedup();
        external_ways.sort_unstable();
        external_ways.dedup();

        let mut nodes: Vec<NodeHistory> = self
            .nodes
            .iter()
            .map(NodeRecord::to_history)
            .collect::<Result<_, _>>()?;
        nodes.extend(external_nodes.into_iter().filter_map(|id| lookup.node(id)));

        let mut ways: Vec<WayHistory> = self
            .ways
            .iter()
            .map(|w| w.to_history(lookup))
            .collect::<Result<_, _>>()?;
        ways.extend(external_ways.into_iter().filter_map(|id| lookup.way(id)));

        RelationHistory::new(versions, nodes, ways).map_err(|e| DecodeError::InvalidHistory {
            id: self.header.id,
            reason: e.to_string(),
        })
    }

    /// Re-encodes the same history, with the same colocated children, relative to another base.
    pub fn rebase(&self, base: &Base) -> Result<Vec<u8>, EncodeError> {
        encode_relation(&self.to_history(&NoLookup)?, base)
    }
}

/// How a relation member resolves inside its record.
#[derive(Debug, Clone)]
pub enum ResolvedMember<'r, 'a> {
    Node(&'r NodeRecord<'a>),
    Way(&'r WayRecord<'a>),
    /// Not colocated: relation members, or children stored in other cells.
    External(OsmMember),
}

/// One relation version together with how each member resolves.
#[derive(Debug, Clone)]
pub struct RelationVersion<'r, 'a> {
    pub relation: OsmRelation,
    /// Parallel to `relation.members`.
    pub members: Vec<ResolvedMember<'r, 'a>>,
}

/// Iterator over the versions of a [`RelationRecord`].
#[derive(Debug, Clone)]
pub struct RelationVersions<'r, 'a> {
    record: &'r RelationRecord<'a>,
    reader: Reader<'a>,
    head: HeadDecoder,
    members: Vec<OsmMember>,
    slots: Vec<Option<usize>>,
    failed: bool,
}

impl<'r, 'a> RelationVersions<'r, 'a> {
    fn read_members(&mut self) -> Result<(), DecodeError> {
        let record = self.record;
        let count = self
            .reader
            .read_count(MAX_RELATION_MEMBERS, "relation_members")?;
        self.members.clear();
        self.slots.clear();
        let mut last_id = 0i64;
        for _ in 0..count {
            let kind = OsmType::from_u64(self.reader.read_varint("member_type")?)?;
            let slot = self.reader.read_varint("member_ref")?;
            let (id, ordinal) = if slot == 0 {
                let delta = self.reader.read_signed_varint("member_id")?;
                (last_id.wrapping_add(delta), None)
            } else {
                let ordinal = (slot - 1) as usize;
                let out_of_range = |count| DecodeError::ChildOffsetOutOfRange {
                    offset: ordinal,
                    count,
                };
                let id = match kind {
                    OsmType::Node => record
                        .nodes
                        .get(ordinal)
                        .ok_or_else(|| out_of_range(record.nodes.len()))?
                        .id(),
                    OsmType::Way => record
                        .ways
                        .get(ordinal)
                        .ok_or_else(|| out_of_range(record.ways.len()))?
                        .id(),
                    OsmType::Relation => return Err(out_of_range(0)),
                };
                (id, Some(ordinal))
            };
            let role = self.reader.read_varint_u32("member_role")?;
            self.members.push(OsmMember::new(kind, id, role));
            self.slots.push(ordinal);
            last_id = id;
        }
        Ok(())
    }

    fn read_next(&mut self) -> Result<RelationVersion<'r, 'a>, DecodeError> {
        let record = self.record;
        let (meta, changed) = self.head.read(&mut self.reader)?;
        if changed & CHANGED_PAYLOAD != 0 {
            self.read_members()?;
        }
        if !meta.visible {
            return Ok(RelationVersion {
                relation: OsmRelation {
                    meta,
                    members: Vec::new(),
                },
                members: Vec::new(),
            });
        }
        let members = self
            .members
            .iter()
            .zip(&self.slots)
            .map(|(member, slot)| match (member.kind, slot) {
                (OsmType::Node, Some(i)) => ResolvedMember::Node(&record.nodes[*i]),
                (OsmType::Way, Some(i)) => ResolvedMember::Way(&record.ways[*i]),
                _ => ResolvedMember::External(*member),
            })
            .collect();
        Ok(RelationVersion {
            relation: OsmRelation {
                meta,
                members: self.members.clone(),
            },
            members,
        })
    }
}

impl<'r, 'a> Iterator for RelationVersions<'r, 'a> {
    type Item = Result<RelationVersion<'r, 'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let result = self.read_next();
        self.failed = result.is_err();
        Some(result)
    }
}

fn write_members(
    writer: &mut Writer,
    members: &[OsmMember],
    nodes: &FxHashMap<i64, usize>,
    ways: &FxHashMap<i64, usize>,
) {
    writer.write_varint(members.len() as u64);
    let mut last_id = 0i64;
    for member in members {
        writer.write_varint(member.kind.as_u8() as u64);
        let ordinal = match member.kind {
            OsmType::Node => nodes.get(&member.id),
            OsmType::Way => ways.get(&member.id),
            OsmType::Relation => None,
        };
        match ordinal {
            Some(ordinal) => writer.write_varint(*ordinal as u64 + 1),
            None => {
                writer.write_varint(0);
                writer.write_signed_varint(member.id.wrapping_sub(last_id));
            }
        }
        writer.write_varint(member.role as u64);
        last_id = member.id;
    }
}

/// Encodes a relation history and its known children relative to `base`.
pub fn encode_relation(history: &RelationHistory, base: &Base) -> Result<Vec<u8>, EncodeError> {
    let versions = history.versions();
    let child_base = base.for_children();

    let mut node_ordinals = FxHashMap::default();
    let mut nodes = Vec::new();
    for (ordinal, node) in history.nodes().enumerate() {
        node_ordinals.insert(node.id(), ordinal);
        nodes.push(encode_node(node, &child_base)?);
    }
    let mut way_ordinals = FxHashMap::default();
    let mut ways = Vec::new();
    for (ordinal, way) in history.ways().enumerate() {
        way_ordinals.insert(way.id(), ordinal);
        ways.push(encode_way(way, &child_base)?);
    }

    let mut flags = version_flags(versions.iter().map(|v| &v.meta));
    if nodes.is_empty() {
        flags |= HEADER_HAS_NO_NODES;
    }
    if ways.is_empty() {
        flags |= HEADER_HAS_NO_WAYS;
    }
    let keys = key_table(versions.iter().map(|v| &v.meta));

    let children_len: usize = nodes.iter().chain(&ways).map(Vec::len).sum();
    let mut writer = Writer::with_capacity(32 + children_len);
    write_header(&mut writer, flags, history.id(), history.bbox(), &keys, base)?;
    if !nodes.is_empty() {
        write_child_group(&mut writer, &nodes)?;
    }
    if !ways.is_empty() {
        write_child_group(&mut writer, &ways)?;
    }

    let mut head = HeadEncoder::new(base);
    let mut previous: &[OsmMember] = &[];
    for relation in versions {
        let changed = head.write(
            &mut writer,
            &relation.meta,
            relation.members.as_slice() != previous,
        );
        if changed & CHANGED_PAYLOAD != 0 {
            write_members(&mut writer, &relation.members, &node_ordinals, &way_ordinals);
            previous = &relation.members;
        }
    }
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::{node, relation, way};

    fn node_history(id: i64, lon: i64, lat: i64) -> NodeHistory {
        NodeHistory::new(vec![node(id, 1, 100).at(lon, lat).build()]).unwrap()
    }

    fn sample() -> RelationHistory {
        let w1 = WayHistory::new(
            vec![way(10, 1, 100).refs([1, 2, 3, 1]).build()],
            [node_history(1, 0, 0), node_history(2, 10, 0), node_history(3, 10, 10)],
        )
        .unwrap();
        RelationHistory::new(
            vec![
                relation(500, 1, 200)
                    .tag(1, 7)
                    .way_member(10, 1)
                    .node_member(4, 2)
                    .build(),
                relation(500, 2, 300)
                    .tag(1, 7)
                    .way_member(10, 1)
                    .way_member(11, 3)
                    .member(OsmType::Relation, 600, 0)
                    .build(),
            ],
            [node_history(4, -5, 20)],
            [w1],
        )
        .unwrap()
    }

    #[test]
    fn test_relation_roundtrip() {
        let history = sample();
        let base = Base::new(0, 50, 3, 3);
        let bytes = encode_relation(&history, &base).unwrap();
        let record = RelationRecord::decode(&bytes, base).unwrap();

        assert_eq!(record.id(), 500);
        assert_eq!(record.nodes().len(), 1);
        assert_eq!(record.ways().len(), 1);
        assert_eq!(record.bbox(), Some(BoundingBox::new(-5, 0, 10, 20)));
        assert_eq!(record.to_history(&NoLookup).unwrap(), history);
    }

    #[test]
    fn test_member_resolution() {
        let bytes = encode_relation(&sample(), &Base::default()).unwrap();
        let record = RelationRecord::decode(&bytes, Base::default()).unwrap();
        let newest = record.versions().next().unwrap().unwrap();

        assert_eq!(newest.relation.members.len(), 3);
        assert!(matches!(newest.members[0], ResolvedMember::Way(w) if w.id() == 10));
        assert!(matches!(
            newest.members[1],
            ResolvedMember::External(OsmMember { kind: OsmType::Way, id: 11, role: 3 })
        ));
        assert!(matches!(
            newest.members[2],
            ResolvedMember::External(OsmMember { kind: OsmType::Relation, id: 600, .. })
        ));

        let oldest = record.versions().nth(1).unwrap().unwrap();
        assert!(matches!(oldest.members[1], ResolvedMember::Node(n) if n.id() == 4));
    }

    #[test]
    fn test_relation_without_children() {
        let history = RelationHistory::new(
            vec![relation(9, 1, 0).way_member(77, 0).build()],
            [],
            [],
        )
        .unwrap();
        let bytes = encode_relation(&history, &Base::default()).unwrap();
        let record = RelationRecord::decode(&bytes, Base::default()).unwrap();
        assert!(record.bbox().is_none());
        assert!(record.nodes().is_empty() && record.ways().is_empty());
        assert_eq!(record.to_history(&NoLookup).unwrap(), history);
    }

    #[test]
    fn test_rebase() {
        let history = sample();
        let from = Base::default();
        let to = Base::new(100, 20, -7, 8);
        let bytes = encode_relation(&history, &from).unwrap();
        let rebased = RelationRecord::decode(&bytes, from)
            .unwrap()
            .rebase(&to)
            .unwrap();
        assert_eq!(rebased, encode_relation(&history, &to).unwrap());
    }

    #[test]
    fn test_invalid_member_type_is_corrupt() {
        let history =
            RelationHistory::new(vec![relation(9, 1, 0).way_member(77, 0).build()], [], [])
                .unwrap();
        let mut bytes = encode_relation(&history, &Base::default()).unwrap();
        // Stream tail: [count=1][type=1][slot=0][idΔ: 2 bytes][role=0]
        let type_pos = bytes.len() - 5;
        assert_eq!(bytes[type_pos], 1);
        bytes[type_pos] = 7;
        let record = RelationRecord::decode(&bytes, Base::default()).unwrap();
        assert!(matches!(
            record.versions().next().unwrap(),
            Err(DecodeError::InvalidOsmType { value: 7 })
        ));
    }
}
