//! Grid cell container.
//!
//! A cell holds every record of one OSM type stored in one grid cell, sorted
//! by entity id and encoded relative to one shared base tuple:
//!
//! ```text
//! [magic "CELL"][version:1][osmType:1][zoom:1][cellId:uvarint]
//! [baseId:svarint][baseTimestamp:svarint][baseLon:svarint][baseLat:svarint]
//! [recordCount:uvarint][recordLen:uvarint]*[records...]
//! ```
//!
//! The compressed form is `[magic "CELLZ"][uncompressedSize:uvarint][zstd data]`.

use std::borrow::Cow;
use std::io::Read;

use crate::codec::primitives::{Reader, Writer};
use crate::codec::{encode_history, Record};
use crate::error::{DecodeError, EncodeError};
use crate::grid::{CellId, XyGrid};
use crate::limits::{
    CELL_FORMAT_VERSION, MAGIC_CELL, MAGIC_CELL_COMPRESSED, MAX_CELL_RECORDS, MAX_CELL_SIZE,
};
use crate::model::{Base, EntityHistory, OsmType};

// =============================================================================
// DECODING
// =============================================================================

/// A decoded cell. Records are decoded lazily.
#[derive(Debug, Clone)]
pub struct Cell<'a> {
    pub id: CellId,
    pub kind: OsmType,
    pub base: Base,
    records: Vec<&'a [u8]>,
}

impl<'a> Cell<'a> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decodes the record at `index`.
    pub fn record(&self, index: usize) -> Option<Result<Record<'a>, DecodeError>> {
        self.records
            .get(index)
            .map(|bytes| Record::decode(self.kind, bytes, self.base))
    }

    /// Decodes every record. A corrupt record yields an error without
    /// affecting the others.
    pub fn records(&self) -> impl Iterator<Item = Result<Record<'a>, DecodeError>> + '_ {
        self.records
            .iter()
            .map(|bytes| Record::decode(self.kind, bytes, self.base))
    }
}

/// Returns the uncompressed cell bytes, borrowing when the input is not compressed.
pub fn cell_bytes(input: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    if input.len() >= 5 && &input[0..5] == MAGIC_CELL_COMPRESSED {
        Ok(Cow::Owned(decompress(input)?))
    } else {
        Ok(Cow::Borrowed(input))
    }
}

/// Decompresses a `CELLZ` blob into an uncompressed `CELL` blob.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if input.len() < 5 {
        return Err(DecodeError::UnexpectedEof { context: "magic" });
    }
    if &input[0..5] != MAGIC_CELL_COMPRESSED {
        let mut found = [0u8; 4];
        found.copy_from_slice(&input[0..4]);
        return Err(DecodeError::InvalidMagic { found });
    }

    let mut reader = Reader::new(&input[5..]);
    let declared = reader.read_varint("uncompressed_size")? as usize;
    if declared > MAX_CELL_SIZE {
        return Err(DecodeError::LengthExceedsLimit {
            field: "uncompressed_size",
            len: declared,
            max: MAX_CELL_SIZE,
        });
    }

    let mut decoder = zstd::Decoder::new(reader.remaining())
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;
    let mut decompressed = Vec::with_capacity(declared);
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    if decompressed.len() != declared {
        return Err(DecodeError::UncompressedSizeMismatch {
            declared,
            actual: decompressed.len(),
        });
    }
    Ok(decompressed)
}

/// Decodes an uncompressed cell, borrowing record bytes from `input`.
///
/// For compressed input, call [`cell_bytes`] or [`decompress`] first.
pub fn decode_cell(input: &[u8]) -> Result<Cell<'_>, DecodeError> {
    if input.len() < 4 {
        return Err(DecodeError::UnexpectedEof { context: "magic" });
    }
    if &input[0..4] != MAGIC_CELL || input.get(4) == Some(&b'Z') {
        let mut found = [0u8; 4];
        found.copy_from_slice(&input[0..4]);
        return Err(DecodeError::InvalidMagic { found });
    }
    if input.len() > MAX_CELL_SIZE {
        return Err(DecodeError::LengthExceedsLimit {
            field: "cell",
            len: input.len(),
            max: MAX_CELL_SIZE,
        });
    }

    let mut reader = Reader::new(&input[4..]);
    let version = reader.read_byte("version")?;
    if version != CELL_FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    let kind = OsmType::from_u64(reader.read_byte("osm_type")? as u64)?;
    let zoom = reader.read_byte("zoom")?;
    let id = CellId::new(zoom, reader.read_varint("cell_id")?);
    let base = Base::new(
        reader.read_signed_varint("base_id")?,
        reader.read_signed_varint("base_timestamp")?,
        reader.read_signed_varint("base_lon")?,
        reader.read_signed_varint("base_lat")?,
    );

    let count = reader.read_count(MAX_CELL_RECORDS, "records")?;
    let mut lengths = Vec::with_capacity(count.min(reader.remaining_len()));
    for _ in 0..count {
        lengths.push(reader.read_varint("record_len")? as usize);
    }
    let mut records = Vec::with_capacity(count);
    for len in lengths {
        let remaining = reader.remaining_len();
        if len > remaining {
            return Err(DecodeError::LengthExceedsBuffer {
                field: "record",
                len,
                remaining,
            });
        }
        records.push(reader.read_bytes(len, "record")?);
    }

    Ok(Cell {
        id,
        kind,
        base,
        records,
    })
}

// =============================================================================
// ENCODING
// =============================================================================

/// Collects the histories of one cell and encodes them.
#[derive(Debug, Clone)]
pub struct CellBuilder {
    id: CellId,
    kind: OsmType,
    histories: Vec<EntityHistory>,
}

impl CellBuilder {
    pub fn new(id: CellId, kind: OsmType) -> Self {
        Self {
            id,
            kind,
            histories: Vec::new(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Adds a history. Its type must match the cell type.
    pub fn push(&mut self, history: EntityHistory) -> Result<(), EncodeError> {
        if history.kind() != self.kind {
            return Err(EncodeError::TypeMismatch {
                expected: self.kind.name(),
                found: history.kind().name(),
            });
        }
        self.histories.push(history);
        Ok(())
    }

    pub fn build(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cell(self.id, self.kind, &self.histories)
    }

    pub fn build_compressed(&self, level: i32) -> Result<Vec<u8>, EncodeError> {
        encode_cell_compressed(self.id, self.kind, &self.histories, level)
    }
}

/// Base of a cell: smallest id and timestamp, centre of the cell extent.
fn cell_base(id: CellId, histories: &[&EntityHistory]) -> Base {
    let extent = XyGrid::new(id.zoom).cell_extent(id.id);
    let min_id = histories.iter().map(|h| h.id()).min().unwrap_or(0);
    let min_timestamp = histories
        .iter()
        .flat_map(|h| h.metas().into_iter().map(|m| m.timestamp))
        .min()
        .unwrap_or(0);
    Base::new(
        min_id,
        min_timestamp,
        extent.min_lon + (extent.max_lon - extent.min_lon) / 2,
        extent.min_lat + (extent.max_lat - extent.min_lat) / 2,
    )
}

/// Encodes the histories of one cell. They are stored sorted by id.
pub fn encode_cell(
    id: CellId,
    kind: OsmType,
    histories: &[EntityHistory],
) -> Result<Vec<u8>, EncodeError> {
    if histories.len() > MAX_CELL_RECORDS {
        return Err(EncodeError::LengthExceedsLimit {
            field: "records",
            len: histories.len(),
            max: MAX_CELL_RECORDS,
        });
    }
    let mut sorted: Vec<&EntityHistory> = histories.iter().collect();
    for history in &sorted {
        if history.kind() != kind {
            return Err(EncodeError::TypeMismatch {
                expected: kind.name(),
                found: history.kind().name(),
            });
        }
    }
    sorted.sort_by_key(|h| h.id());
    let base = cell_base(id, &sorted);

    let records = sorted
        .iter()
        .map(|h| encode_history(h, &base))
        .collect::<Result<Vec<_>, _>>()?;

    let body: usize = records.iter().map(Vec::len).sum();
    let mut writer = Writer::with_capacity(64 + records.len() * 3 + body);
    writer.write_bytes(MAGIC_CELL);
    writer.write_byte(CELL_FORMAT_VERSION);
    writer.write_byte(kind.as_u8());
    writer.write_byte(id.zoom);
    writer.write_varint(id.id);
    writer.write_signed_varint(base.id);
    writer.write_signed_varint(base.timestamp);
    writer.write_signed_varint(base.lon);
    writer.write_signed_varint(base.lat);
    writer.write_varint(records.len() as u64);
    for record in &records {
        writer.write_varint(record.len() as u64);
    }
    for record in &records {
        writer.write_bytes(record);
    }
    Ok(writer.into_bytes())
}

/// Encodes the histories of one cell with zstd compression.
pub fn encode_cell_compressed(
    id: CellId,
    kind: OsmType,
    histories: &[EntityHistory],
    level: i32,
) -> Result<Vec<u8>, EncodeError> {
    let uncompressed = encode_cell(id, kind, histories)?;

    let compressed = zstd::encode_all(uncompressed.as_slice(), level)
        .map_err(|e| EncodeError::CompressionFailed(e.to_string()))?;

    let mut writer = Writer::with_capacity(5 + 10 + compressed.len());
    writer.write_bytes(MAGIC_CELL_COMPRESSED);
    writer.write_varint(uncompressed.len() as u64);
    writer.write_bytes(&compressed);
    Ok(writer.into_bytes())
}
