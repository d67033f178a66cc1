//! Way records.
//!
//! Referenced nodes that are stored with the way are colocated in one child
//! group and addressed by ordinal. The payload of a way entry is
//! `[refCount:uvarint]{[ordinal+1:uvarint] | [0][idΔ:svarint]}*`, where `idΔ`
//! is relative to the previous reference of the same version.

use rustc_hash::FxHashMap;

use crate::codec::node::{encode_node, NodeRecord};
use crate::codec::primitives::{Reader, Writer};
use crate::codec::record::{
    key_table, read_child_group, read_header, slice_at, version_flags, write_child_group,
    write_header, HeadDecoder, HeadEncoder, RecordHeader, CHANGED_PAYLOAD, HEADER_HAS_NO_NODES,
};
use crate::codec::{ChildLookup, MemberRef};
use crate::error::{DecodeError, EncodeError};
use crate::limits::MAX_WAY_NODES;
use crate::model::{Base, BoundingBox, NodeHistory, OsmWay, WayHistory};

/// Decoded view over an encoded way history and its colocated nodes.
#[derive(Debug, Clone)]
pub struct WayRecord<'a> {
    data: &'a [u8],
    base: Base,
    header: RecordHeader,
    nodes: Vec<NodeRecord<'a>>,
    stream: &'a [u8],
}

impl<'a> WayRecord<'a> {
    /// Decodes the record occupying all of `data`.
    pub fn decode(data: &'a [u8], base: Base) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let header = read_header(&mut reader, &base)?;
        let nodes = if header.flags & HEADER_HAS_NO_NODES == 0 {
            let child_base = base.for_children();
            read_child_group(&mut reader)?
                .into_iter()
                .map(|bytes| NodeRecord::decode(bytes, child_base))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            data,
            base,
            header,
            nodes,
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

    /// Colocated node records, in ordinal order.
    pub fn nodes(&self) -> &[NodeRecord<'a>] {
        &self.nodes
    }

    /// Lazily walks the versions, newest first.
    pub fn versions(&self) -> WayVersions<'_, 'a> {
        WayVersions {
            record: self,
            reader: Reader::new(self.stream),
            head: HeadDecoder::new(self.header.id, &self.base),
            refs: Vec::new(),
            slots: Vec::new(),
            failed: false,
        }
    }

    /// Materializes the full history. Non-colocated nodes are resolved through
    /// `lookup`; the ones it cannot find stay absent.
    pub fn to_history(&self, lookup: &dyn ChildLookup) -> Result<WayHistory, DecodeError> {
        let mut versions = Vec::new();
        let mut external = Vec::new();
        for version in self.versions() {
            let version = version?;
            external.extend(version.nodes.iter().filter_map(|m| match m {
                MemberRef::External(id) => Some(*id),
                MemberRef::Colocated(_) => None,
            }));
            versions.push(version.way);
        }
        external.sort_unstable();
        external.dedup();

        let mut nodes: Vec<NodeHistory> = self
            .nodes
            .iter()
            .map(NodeRecord::to_history)
            .collect::<Result<_, _>>()?;
        nodes.extend(external.into_iter().filter_map(|id| lookup.node(id)));

        WayHistory::new(versions, nodes).map_err(|e| DecodeError::InvalidHistory {
            id: self.header.id,
            reason: e.to_string(),
        })
    }

    /// Re-encodes the same history, with the same colocated nodes, relative to another base.
    pub fn rebase(&self, base: &Base) -> Result<Vec<u8>, EncodeError> {
        encode_way(&self.to_history(&crate::codec::NoLookup)?, base)
    }
}

/// One way version together with how each of its references resolves.
#[derive(Debug, Clone)]
pub struct WayVersion<'r, 'a> {
    pub way: OsmWay,
    /// Parallel to `way.refs`.
    pub nodes: Vec<MemberRef<'r, NodeRecord<'a>>>,
}

/// Iterator over the versions of a [`WayRecord`].
#[derive(Debug, Clone)]
pub struct WayVersions<'r, 'a> {
    record: &'r WayRecord<'a>,
    reader: Reader<'a>,
    head: HeadDecoder,
    refs: Vec<i64>,
    /// Colocated ordinal per reference of the last visible version.
    slots: Vec<Option<usize>>,
    failed: bool,
}

impl<'r, 'a> WayVersions<'r, 'a> {
    fn read_next(&mut self) -> Result<WayVersion<'r, 'a>, DecodeError> {
        let record = self.record;
        let (meta, changed) = self.head.read(&mut self.reader)?;
        if changed & CHANGED_PAYLOAD != 0 {
            let count = self.reader.read_count(MAX_WAY_NODES, "way_nodes")?;
            self.refs.clear();
            self.slots.clear();
            let children = &record.nodes;
            let mut last_id = 0i64;
            for _ in 0..count {
                let slot = self.reader.read_varint("node_ref")?;
                let (id, ordinal) = if slot == 0 {
                    (last_id.wrapping_add(self.reader.read_signed_varint("node_id")?), None)
                } else {
                    let ordinal = (slot - 1) as usize;
                    let child = children.get(ordinal).ok_or(DecodeError::ChildOffsetOutOfRange {
                        offset: ordinal,
                        count: children.len(),
                    })?;
                    (child.id(), Some(ordinal))
                };
                self.refs.push(id);
                self.slots.push(ordinal);
                last_id = id;
            }
        }

        if !meta.visible {
            return Ok(WayVersion {
                way: OsmWay {
                    meta,
                    refs: Vec::new(),
                },
                nodes: Vec::new(),
            });
        }
        let nodes = self
            .refs
            .iter()
            .zip(&self.slots)
            .map(|(id, slot)| match slot {
                Some(ordinal) => MemberRef::Colocated(&record.nodes[*ordinal]),
                None => MemberRef::External(*id),
            })
            .collect();
        Ok(WayVersion {
            way: OsmWay {
                meta,
                refs: self.refs.clone(),
            },
            nodes,
        })
    }
}

impl<'r, 'a> Iterator for WayVersions<'r, 'a> {
    type Item = Result<WayVersion<'r, 'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let result = self.read_next();
        self.failed = result.is_err();
        Some(result)
    }
}

/// Writes `[count]{[ordinal+1] | [0][idΔ]}*`.
pub(crate) fn write_refs(writer: &mut Writer, refs: &[i64], ordinals: &FxHashMap<i64, usize>) {
    writer.write_varint(refs.len() as u64);
    let mut last_id = 0i64;
    for id in refs {
        match ordinals.get(id) {
            Some(ordinal) => writer.write_varint(*ordinal as u64 + 1),
            None => {
                writer.write_varint(0);
                writer.write_signed_varint(id.wrapping_sub(last_id));
            }
        }
        last_id = *id;
    }
}

/// Encodes a way history and its known nodes relative to `base`.
pub fn encode_way(history: &WayHistory, base: &Base) -> Result<Vec<u8>, EncodeError> {
    let versions = history.versions();
    let child_base = base.for_children();

    let mut ordinals = FxHashMap::default();
    let mut children = Vec::new();
    for (ordinal, node) in history.nodes().enumerate() {
        ordinals.insert(node.id(), ordinal);
        children.push(encode_node(node, &child_base)?);
    }

    let mut flags = version_flags(versions.iter().map(|v| &v.meta));
    if children.is_empty() {
        flags |= HEADER_HAS_NO_NODES;
    }
    let keys = key_table(versions.iter().map(|v| &v.meta));

    let mut writer = Writer::with_capacity(32 + children.iter().map(Vec::len).sum::<usize>());
    write_header(&mut writer, flags, history.id(), history.bbox(), &keys, base)?;
    if !children.is_empty() {
        write_child_group(&mut writer, &children)?;
    }

    let mut head = HeadEncoder::new(base);
    let mut previous: &[i64] = &[];
    for way in versions {
        let changed = head.write(&mut writer, &way.meta, way.refs.as_slice() != previous);
        if changed & CHANGED_PAYLOAD != 0 {
            write_refs(&mut writer, &way.refs, &ordinals);
            previous = &way.refs;
        }
    }
    Ok(writer.into_bytes())
}
