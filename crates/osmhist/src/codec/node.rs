//! Node records.
//!
//! A node entry's payload is `[lonΔ:svarint][latΔ:svarint]`, relative to the
//! previous visible location in the stream (the base location for the first).

use crate::codec::primitives::{Reader, Writer};
use crate::codec::record::{
    key_table, read_header, slice_at, version_flags, write_header, HeadDecoder, HeadEncoder,
    RecordHeader, CHANGED_PAYLOAD, HEADER_HAS_NO_NODES,
};
use crate::error::{DecodeError, EncodeError};
use crate::model::{Base, BoundingBox, Location, NodeHistory, OsmNode};

/// Decoded view over an encoded node history.
#[derive(Debug, Clone)]
pub struct NodeRecord<'a> {
    data: &'a [u8],
    base: Base,
    header: RecordHeader,
    stream: &'a [u8],
}

impl<'a> NodeRecord<'a> {
    /// Decodes the record occupying all of `data`.
    pub fn decode(data: &'a [u8], base: Base) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(data);
        let header = read_header(&mut reader, &base)?;
        Ok(Self {
            data,
            base,
            header,
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

    /// Lazily walks the versions, newest first.
    pub fn versions(&self) -> NodeVersions<'a> {
        NodeVersions {
            reader: Reader::new(self.stream),
            head: HeadDecoder::new(self.header.id, &self.base),
            location: Location::new(self.base.lon, self.base.lat),
            failed: false,
        }
    }

    pub fn to_history(&self) -> Result<NodeHistory, DecodeError> {
        let versions = self.versions().collect::<Result<Vec<_>, _>>()?;
        NodeHistory::new(versions).map_err(|e| DecodeError::InvalidHistory {
            id: self.header.id,
            reason: e.to_string(),
        })
    }

    /// Re-encodes the same history relative to another base.
    pub fn rebase(&self, base: &Base) -> Result<Vec<u8>, EncodeError> {
        encode_node(&self.to_history()?, base)
    }
}

/// Iterator over the versions of a [`NodeRecord`].
///
/// Yields an error once and then stops if the stream is corrupt.
#[derive(Debug, Clone)]
pub struct NodeVersions<'a> {
    reader: Reader<'a>,
    head: HeadDecoder,
    location: Location,
    failed: bool,
}

impl NodeVersions<'_> {
    fn read_next(&mut self) -> Result<OsmNode, DecodeError> {
        let (meta, changed) = self.head.read(&mut self.reader)?;
        if changed & CHANGED_PAYLOAD != 0 {
            let lon = self.reader.read_signed_varint("lon")?;
            let lat = self.reader.read_signed_varint("lat")?;
            self.location = Location::new(
                self.location.lon.wrapping_add(lon),
                self.location.lat.wrapping_add(lat),
            );
        }
        let location = meta.visible.then_some(self.location);
        Ok(OsmNode { meta, location })
    }
}

impl Iterator for NodeVersions<'_> {
    type Item = Result<OsmNode, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let result = self.read_next();
        self.failed = result.is_err();
        Some(result)
    }
}

/// Encodes a node history relative to `base`.
pub fn encode_node(history: &NodeHistory, base: &Base) -> Result<Vec<u8>, EncodeError> {
    let versions = history.versions();
    let mut writer = Writer::with_capacity(16 + versions.len() * 16);

    let flags = version_flags(versions.iter().map(|v| &v.meta)) | HEADER_HAS_NO_NODES;
    let keys = key_table(versions.iter().map(|v| &v.meta));
    write_header(&mut writer, flags, history.id(), history.bbox(), &keys, base)?;

    let mut head = HeadEncoder::new(base);
    let mut location = Location::new(base.lon, base.lat);
    for node in versions {
        let moved = node.location.filter(|l| *l != location);
        let changed = head.write(&mut writer, &node.meta, moved.is_some());
        if changed & CHANGED_PAYLOAD != 0 {
            if let Some(next) = moved {
                writer.write_signed_varint(next.lon - location.lon);
                writer.write_signed_varint(next.lat - location.lat);
                location = next;
            }
        }
    }
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::node;
    use crate::model::Tag;

    fn drinking_water() -> NodeHistory {
        NodeHistory::new(vec![
            node(300, 1, 1_000).at(86_000_000, 494_000_000).changeset(10).user(4).build(),
            node(300, 2, 2_000)
                .at(86_000_000, 494_000_000)
                .tag(1, 1)
                .changeset(12)
                .user(4)
                .build(),
        ])
        .unwrap()
    }

    #[test]
    fn test_node_roundtrip() {
        let history = drinking_water();
        let base = Base::new(0, 0, 86_000_000, 494_000_000);
        let bytes = encode_node(&history, &base).unwrap();

        let record = NodeRecord::decode(&bytes, base).unwrap();
        assert_eq!(record.id(), 300);
        assert!(record.header().is_multiversion());
        assert!(record.header().has_tag_key(1));
        assert_eq!(record.to_history().unwrap(), history);

        let newest = record.versions().next().unwrap().unwrap();
        assert_eq!(newest.meta.version, 2);
        assert_eq!(newest.meta.tags, vec![Tag::new(1, 1)]);
    }

    #[test]
    fn test_versions_restartable() {
        let history = drinking_water();
        let bytes = encode_node(&history, &Base::default()).unwrap();
        let record = NodeRecord::decode(&bytes, Base::default()).unwrap();
        let first: Vec<_> = record.versions().collect();
        let second: Vec<_> = record.versions().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_moves_and_deletion() {
        let history = NodeHistory::new(vec![
            node(7, 1, 10).at(100, 100).build(),
            node(7, 2, 20).at(150, 90).build(),
            node(7, 3, 30).deleted().build(),
            node(7, 4, 40).at(150, 90).tag(2, 3).build(),
        ])
        .unwrap();
        let base = Base::new(0, 0, 120, 95);
        let bytes = encode_node(&history, &base).unwrap();
        let record = NodeRecord::decode(&bytes, base).unwrap();

        assert_eq!(record.bbox(), Some(BoundingBox::new(100, 90, 150, 100)));
        let decoded = record.to_history().unwrap();
        assert_eq!(decoded, history);
        assert_eq!(decoded.versions()[1].location, None);
    }

    #[test]
    fn test_deterministic_encoding() {
        let history = drinking_water();
        let base = Base::new(1, 500, 3, 4);
        assert_eq!(
            encode_node(&history, &base).unwrap(),
            encode_node(&history, &base).unwrap()
        );
    }

    #[test]
    fn test_rebase_matches_direct_build() {
        let history = drinking_water();
        let first = Base::new(0, 0, 0, 0);
        let second = Base::new(200, 900, 86_100_000, 493_000_000);
        let bytes = encode_node(&history, &first).unwrap();
        let record = NodeRecord::decode(&bytes, first).unwrap();
        let rebased = record.rebase(&second).unwrap();
        assert_eq!(rebased, encode_node(&history, &second).unwrap());
        assert_eq!(
            NodeRecord::decode(&rebased, second).unwrap().to_history().unwrap(),
            history
        );
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let history = drinking_water();
        let bytes = encode_node(&history, &Base::default()).unwrap();
        let truncated = &bytes[..bytes.len() - 1];
        let record = NodeRecord::decode(truncated, Base::default()).unwrap();
        let results: Vec<_> = record.versions().collect();
        assert!(results.last().unwrap().is_err());
        assert!(record.to_history().is_err());

        assert!(NodeRecord::decode_at(&bytes, 2, bytes.len(), Base::default()).is_err());
    }
}
