//! Layout pieces shared by node, way and relation records.
//!
//! ```text
//! [header:1]
//! [minLonΔ:svarint][lonSpan:uvarint][minLatΔ:svarint][latSpan:uvarint]   unless EMPTY_BBOX
//! [keyCount:uvarint][keyId:uvarint]*                                    if HAS_TAGS
//! [idΔ:uvarint]                                                       base - id if ID_BELOW_BASE
//! child groups (type specific)
//! version stream
//! ```
//!
//! A version entry starts with
//! `[versionΔ:svarint][timestampΔ:svarint][changesetΔ:svarint][changed:1]`,
//! optionally followed by `[userΔ:svarint]` and `[tagCount:uvarint][tagId:uvarint]*`.
//! The type-specific payload comes last.

use crate::codec::primitives::{Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{MAX_CHILDREN, MAX_TAG_INTS, MAX_TAG_KEYS};
use crate::model::{Base, BoundingBox, Meta, Tag};

// Header flags.
pub const HEADER_MULTIVERSION: u8 = 1 << 0;
pub const HEADER_TIMESTAMPS_NOT_IN_ORDER: u8 = 1 << 1;
pub const HEADER_HAS_TAGS: u8 = 1 << 2;
pub const HEADER_HAS_NO_NODES: u8 = 1 << 3;
pub const HEADER_HAS_NO_WAYS: u8 = 1 << 4;
pub const HEADER_EMPTY_BBOX: u8 = 1 << 5;
/// Children are encoded against id 0, so their ids may lie below the base.
pub const HEADER_ID_BELOW_BASE: u8 = 1 << 6;

// Per-version changed flags.
pub const CHANGED_USER_ID: u8 = 1 << 0;
pub const CHANGED_TAGS: u8 = 1 << 1;
/// Location for nodes, references for ways, members for relations.
pub const CHANGED_PAYLOAD: u8 = 1 << 2;

/// Decoded fixed part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u8,
    pub id: i64,
    /// `None` when no version has a visible coordinate.
    pub bbox: Option<BoundingBox>,
    /// Every tag key used by any version, ascending.
    pub keys: Vec<u32>,
}

impl RecordHeader {
    pub fn is_multiversion(&self) -> bool {
        self.flags & HEADER_MULTIVERSION != 0
    }

    pub fn timestamps_in_order(&self) -> bool {
        self.flags & HEADER_TIMESTAMPS_NOT_IN_ORDER == 0
    }

    pub fn has_tag_key(&self, key: u32) -> bool {
        self.keys.binary_search(&key).is_ok()
    }
}

/// Returns `data[offset..offset + len]` or a corrupt-record error.
pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .map(|end| &data[offset..end])
        .ok_or(DecodeError::LengthExceedsBuffer {
            field: "record",
            len,
            remaining: data.len().saturating_sub(offset),
        })
}

// =============================================================================
// HEADER
// =============================================================================

pub fn read_header(reader: &mut Reader<'_>, base: &Base) -> Result<RecordHeader, DecodeError> {
    let flags = reader.read_byte("header")?;

    let bbox = if flags & HEADER_EMPTY_BBOX != 0 {
        None
    } else {
        let min_lon = base.lon.wrapping_add(reader.read_signed_varint("bbox_min_lon")?);
        let lon_span = reader.read_varint("bbox_lon_span")? as i64;
        let min_lat = base.lat.wrapping_add(reader.read_signed_varint("bbox_min_lat")?);
        let lat_span = reader.read_varint("bbox_lat_span")? as i64;
        Some(BoundingBox::new(
            min_lon,
            min_lat,
            min_lon.wrapping_add(lon_span),
            min_lat.wrapping_add(lat_span),
        ))
    };

    let keys = if flags & HEADER_HAS_TAGS != 0 {
        let count = reader.read_count(MAX_TAG_KEYS, "tag_keys")?;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(reader.read_varint_u32("tag_key")?);
        }
        keys
    } else {
        Vec::new()
    };

    let delta = reader.read_varint("id")? as i64;
    let id = if flags & HEADER_ID_BELOW_BASE != 0 {
        base.id.wrapping_sub(delta)
    } else {
        base.id.wrapping_add(delta)
    };

    Ok(RecordHeader {
        flags,
        id,
        bbox,
        keys,
    })
}

/// Writes the fixed part of a record. `flags` must not contain the bbox, tag
/// or id bits.
pub fn write_header(
    writer: &mut Writer,
    mut flags: u8,
    id: i64,
    bbox: Option<BoundingBox>,
    keys: &[u32],
    base: &Base,
) -> Result<(), EncodeError> {
    if keys.len() > MAX_TAG_KEYS {
        return Err(EncodeError::LengthExceedsLimit {
            field: "tag_keys",
            len: keys.len(),
            max: MAX_TAG_KEYS,
        });
    }
    if bbox.is_none() {
        flags |= HEADER_EMPTY_BBOX;
    }
    if !keys.is_empty() {
        flags |= HEADER_HAS_TAGS;
    }
    if id < base.id {
        flags |= HEADER_ID_BELOW_BASE;
    }
    writer.write_byte(flags);

    if let Some(bbox) = bbox {
        writer.write_signed_varint(bbox.min_lon - base.lon);
        writer.write_varint((bbox.max_lon - bbox.min_lon) as u64);
        writer.write_signed_varint(bbox.min_lat - base.lat);
        writer.write_varint((bbox.max_lat - bbox.min_lat) as u64);
    }
    if !keys.is_empty() {
        writer.write_varint(keys.len() as u64);
        for key in keys {
            writer.write_varint(*key as u64);
        }
    }
    let delta = if id < base.id {
        base.id.wrapping_sub(id)
    } else {
        id.wrapping_sub(base.id)
    };
    writer.write_varint(delta as u64);
    Ok(())
}

/// Flags every record type derives from its version list.
pub fn version_flags<'m>(metas: impl IntoIterator<Item = &'m Meta>) -> u8 {
    let mut flags = 0;
    let mut count = 0usize;
    let mut newer_timestamp: Option<i64> = None;
    for meta in metas {
        count += 1;
        if let Some(newer) = newer_timestamp {
            if meta.timestamp > newer {
                flags |= HEADER_TIMESTAMPS_NOT_IN_ORDER;
            }
        }
        newer_timestamp = Some(meta.timestamp);
    }
    if count > 1 {
        flags |= HEADER_MULTIVERSION;
    }
    flags
}

/// Sorted distinct tag keys over all versions.
pub fn key_table<'m>(metas: impl IntoIterator<Item = &'m Meta>) -> Vec<u32> {
    let mut keys: Vec<u32> = metas
        .into_iter()
        .flat_map(|m| m.tags.iter().map(|t| t.key))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

// =============================================================================
// CHILD GROUPS
// =============================================================================

/// Reads `[indexLen][index: u32 BE offsets][dataLen][data]` and splits the data blob.
pub fn read_child_group<'a>(reader: &mut Reader<'a>) -> Result<Vec<&'a [u8]>, DecodeError> {
    let index = reader.read_slice_prefixed("child_index")?;
    if index.len() % 4 != 0 {
        return Err(DecodeError::ChildIndexMisaligned { len: index.len() });
    }
    let count = index.len() / 4;
    if count > MAX_CHILDREN {
        return Err(DecodeError::LengthExceedsLimit {
            field: "children",
            len: count,
            max: MAX_CHILDREN,
        });
    }
    let data = reader.read_slice_prefixed("child_data")?;

    let mut offsets = Vec::with_capacity(count + 1);
    let mut index_reader = Reader::new(index);
    for _ in 0..count {
        offsets.push(index_reader.read_u32_be("child_offset")? as usize);
    }
    offsets.push(data.len());

    let mut children = Vec::with_capacity(count);
    for pair in offsets.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if start > end || end > data.len() {
            return Err(DecodeError::ChildOffsetOutOfRange {
                offset: start,
                count: data.len(),
            });
        }
        children.push(&data[start..end]);
    }
    Ok(children)
}

pub fn write_child_group(writer: &mut Writer, children: &[Vec<u8>]) -> Result<(), EncodeError> {
    if children.len() > MAX_CHILDREN {
        return Err(EncodeError::LengthExceedsLimit {
            field: "children",
            len: children.len(),
            max: MAX_CHILDREN,
        });
    }
    let mut index = Writer::with_capacity(children.len() * 4);
    let mut data = Writer::new();
    for child in children {
        let offset = u32::try_from(data.len()).map_err(|_| EncodeError::LengthExceedsLimit {
            field: "child_data",
            len: data.len(),
            max: u32::MAX as usize,
        })?;
        index.write_u32_be(offset);
        data.write_bytes(child);
    }
    writer.write_bytes_prefixed(index.as_bytes());
    writer.write_bytes_prefixed(data.as_bytes());
    Ok(())
}

// =============================================================================
// TAGS
// =============================================================================

pub fn read_tags(reader: &mut Reader<'_>) -> Result<Vec<Tag>, DecodeError> {
    let len = reader.read_count(MAX_TAG_INTS, "tags")?;
    if len % 2 != 0 {
        return Err(DecodeError::OddTagList { len });
    }
    let mut tags = Vec::with_capacity(len / 2);
    for _ in 0..len / 2 {
        let key = reader.read_varint_u32("tag_key")?;
        let value = reader.read_varint_u32("tag_value")?;
        tags.push(Tag::new(key, value));
    }
    Ok(tags)
}

pub fn write_tags(writer: &mut Writer, tags: &[Tag]) {
    writer.write_varint(tags.len() as u64 * 2);
    for tag in tags {
        writer.write_varint(tag.key as u64);
        writer.write_varint(tag.value as u64);
    }
}

// =============================================================================
// VERSION HEAD
// =============================================================================

/// Running state of the common version fields, shared by both directions.
#[derive(Debug, Clone)]
struct HeadState {
    signed_version: i64,
    timestamp: i64,
    changeset: i64,
    user_id: i64,
    /// Tags of the previous visible version.
    tags: Vec<Tag>,
}

impl HeadState {
    fn new(base: &Base) -> Self {
        Self {
            signed_version: 0,
            timestamp: base.timestamp,
            changeset: 0,
            user_id: 0,
            tags: Vec::new(),
        }
    }
}

/// Writes the common part of each version entry, newest version first.
#[derive(Debug, Clone)]
pub struct HeadEncoder {
    state: HeadState,
}

impl HeadEncoder {
    pub fn new(base: &Base) -> Self {
        Self {
            state: HeadState::new(base),
        }
    }

    /// Writes the head of one entry and returns its changed flags. The caller
    /// writes the payload afterwards when `CHANGED_PAYLOAD` is set.
    pub fn write(&mut self, writer: &mut Writer, meta: &Meta, payload_changed: bool) -> u8 {
        let state = &mut self.state;
        let signed_version = meta.signed_version();

        let mut changed = 0;
        if meta.user_id != state.user_id {
            changed |= CHANGED_USER_ID;
        }
        if meta.visible && meta.tags != state.tags {
            changed |= CHANGED_TAGS;
        }
        if meta.visible && payload_changed {
            changed |= CHANGED_PAYLOAD;
        }

        writer.write_signed_varint(signed_version - state.signed_version);
        writer.write_signed_varint(meta.timestamp.wrapping_sub(state.timestamp));
        writer.write_signed_varint(meta.changeset.wrapping_sub(state.changeset));
        writer.write_byte(changed);
        if changed & CHANGED_USER_ID != 0 {
            writer.write_signed_varint(meta.user_id.wrapping_sub(state.user_id));
        }
        if changed & CHANGED_TAGS != 0 {
            write_tags(writer, &meta.tags);
            state.tags.clone_from(&meta.tags);
        }

        state.signed_version = signed_version;
        state.timestamp = meta.timestamp;
        state.changeset = meta.changeset;
        state.user_id = meta.user_id;
        changed
    }
}

/// Reads the common part of each version entry.
#[derive(Debug, Clone)]
pub struct HeadDecoder {
    id: i64,
    state: HeadState,
}

impl HeadDecoder {
    pub fn new(id: i64, base: &Base) -> Self {
        Self {
            id,
            state: HeadState::new(base),
        }
    }

    /// Reads one entry head. Returns the version's metadata and changed flags.
    pub fn read(&mut self, reader: &mut Reader<'_>) -> Result<(Meta, u8), DecodeError> {
        let state = &mut self.state;
        state.signed_version = state
            .signed_version
            .wrapping_add(reader.read_signed_varint("version")?);
        state.timestamp = state
            .timestamp
            .wrapping_add(reader.read_signed_varint("timestamp")?);
        state.changeset = state
            .changeset
            .wrapping_add(reader.read_signed_varint("changeset")?);
        let changed = reader.read_byte("changed_flags")?;
        if changed & CHANGED_USER_ID != 0 {
            state.user_id = state
                .user_id
                .wrapping_add(reader.read_signed_varint("user_id")?);
        }
        if changed & CHANGED_TAGS != 0 {
            state.tags = read_tags(reader)?;
        }

        let visible = state.signed_version > 0;
        let version = u32::try_from(state.signed_version.unsigned_abs())
            .ok()
            .filter(|v| *v > 0)
            .ok_or(DecodeError::ValueOutOfRange {
                field: "version",
                value: state.signed_version.unsigned_abs(),
            })?;

        let meta = Meta {
            id: self.id,
            version,
            visible,
            timestamp: state.timestamp,
            changeset: state.changeset,
            user_id: state.user_id,
            tags: if visible { state.tags.clone() } else { Vec::new() },
        };
        Ok((meta, changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::node;

    #[test]
    fn test_header_roundtrip_with_bbox_and_keys() {
        let base = Base::new(100, 0, 1_000, 2_000);
        let bbox = BoundingBox::new(900, 2_100, 1_500, 2_200);
        let mut writer = Writer::new();
        write_header(&mut writer, HEADER_MULTIVERSION, 142, Some(bbox), &[3, 8], &base).unwrap();

        let mut reader = Reader::new(writer.as_bytes());
        let header = read_header(&mut reader, &base).unwrap();
        assert!(reader.is_empty());
        assert_eq!(header.id, 142);
        assert_eq!(header.bbox, Some(bbox));
        assert_eq!(header.keys, vec![3, 8]);
        assert!(header.is_multiversion());
        assert!(header.timestamps_in_order());
        assert!(header.has_tag_key(8));
        assert!(!header.has_tag_key(4));
    }

    #[test]
    fn test_empty_bbox_is_marked() {
        let base = Base::default();
        let mut writer = Writer::new();
        write_header(&mut writer, 0, 1, None, &[], &base).unwrap();
        assert_eq!(writer.as_bytes()[0], HEADER_EMPTY_BBOX);

        let header = read_header(&mut Reader::new(writer.as_bytes()), &base).unwrap();
        assert_eq!(header.bbox, None);
        assert!(header.keys.is_empty());
    }

    #[test]
    fn test_id_below_base_is_flagged() {
        for (id, base_id) in [(5, 10), (-3, 0), (i64::MIN, i64::MAX), (i64::MAX, i64::MIN)] {
            let base = Base::new(base_id, 0, 0, 0);
            let mut writer = Writer::new();
            write_header(&mut writer, 0, id, None, &[], &base).unwrap();
            assert_eq!(writer.as_bytes()[0] & HEADER_ID_BELOW_BASE != 0, id < base_id);
            let header = read_header(&mut Reader::new(writer.as_bytes()), &base).unwrap();
            assert_eq!(header.id, id);
        }
    }

    #[test]
    fn test_child_group_split() {
        let children = vec![vec![1u8, 2], vec![], vec![3u8]];
        let mut writer = Writer::new();
        write_child_group(&mut writer, &children).unwrap();

        let mut reader = Reader::new(writer.as_bytes());
        let decoded = read_child_group(&mut reader).unwrap();
        assert_eq!(decoded, vec![&[1u8, 2][..], &[][..], &[3u8][..]]);
    }

    #[test]
    fn test_child_group_bad_offset() {
        let mut writer = Writer::new();
        writer.write_bytes_prefixed(&[0, 0, 0, 9]);
        writer.write_bytes_prefixed(&[1, 2]);
        let result = read_child_group(&mut Reader::new(writer.as_bytes()));
        assert!(matches!(
            result,
            Err(DecodeError::ChildOffsetOutOfRange { offset: 9, count: 2 })
        ));

        let mut writer = Writer::new();
        writer.write_bytes_prefixed(&[0, 0, 0]);
        writer.write_bytes_prefixed(&[]);
        let result = read_child_group(&mut Reader::new(writer.as_bytes()));
        assert!(matches!(result, Err(DecodeError::ChildIndexMisaligned { len: 3 })));
    }

    #[test]
    fn test_odd_tag_list_is_corrupt() {
        let mut writer = Writer::new();
        writer.write_varint(3);
        writer.write_bytes(&[1, 2, 3]);
        let result = read_tags(&mut Reader::new(writer.as_bytes()));
        assert!(matches!(result, Err(DecodeError::OddTagList { len: 3 })));
    }

    #[test]
    fn test_head_omits_unchanged_fields() {
        let base = Base::new(0, 1_000, 0, 0);
        let newer = node(1, 2, 2_000).tag(1, 1).user(5).build();
        let older = node(1, 1, 1_500).tag(1, 1).user(5).build();

        let mut writer = Writer::new();
        let mut encoder = HeadEncoder::new(&base);
        let first = encoder.write(&mut writer, &newer.meta, false);
        let second = encoder.write(&mut writer, &older.meta, false);
        assert_eq!(first, CHANGED_USER_ID | CHANGED_TAGS);
        assert_eq!(second, 0);

        let mut reader = Reader::new(writer.as_bytes());
        let mut decoder = HeadDecoder::new(1, &base);
        assert_eq!(decoder.read(&mut reader).unwrap().0, newer.meta);
        assert_eq!(decoder.read(&mut reader).unwrap().0, older.meta);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_head_deleted_version_keeps_running_tags() {
        let base = Base::default();
        let deleted = node(1, 3, 30).deleted().build();
        let visible = node(1, 2, 20).tag(4, 4).build();
        let first = node(1, 1, 10).tag(4, 4).build();

        let mut writer = Writer::new();
        let mut encoder = HeadEncoder::new(&base);
        for meta in [&deleted.meta, &visible.meta, &first.meta] {
            encoder.write(&mut writer, meta, false);
        }

        let mut reader = Reader::new(writer.as_bytes());
        let mut decoder = HeadDecoder::new(1, &base);
        let (meta, _) = decoder.read(&mut reader).unwrap();
        assert!(!meta.visible);
        assert!(meta.tags.is_empty());
        assert_eq!(decoder.read(&mut reader).unwrap().0.tags, vec![Tag::new(4, 4)]);
        let (meta, changed) = decoder.read(&mut reader).unwrap();
        assert_eq!(meta.tags, vec![Tag::new(4, 4)]);
        assert_eq!(changed & CHANGED_TAGS, 0);
    }

    #[test]
    fn test_version_flags() {
        let a = node(1, 2, 10).build();
        let b = node(1, 1, 20).build();
        let flags = version_flags([&a.meta, &b.meta]);
        assert_eq!(flags, HEADER_MULTIVERSION | HEADER_TIMESTAMPS_NOT_IN_ORDER);
        assert_eq!(version_flags([&a.meta]), 0);
    }
}
