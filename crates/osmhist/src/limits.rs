//! Decoder limits and wire constants.
//!
//! All counts read from a buffer are checked against these bounds before any
//! allocation happens, so a corrupt length prefix cannot trigger a huge
//! allocation.

/// Maximum bytes of a LEB128 varint holding a 64-bit value.
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum number of versions in one entity history.
pub const MAX_VERSIONS: usize = 1 << 20;

/// Maximum number of integers in a tag list (two per tag).
pub const MAX_TAG_INTS: usize = 2 * 4096;

/// Maximum number of distinct tag keys in a record header.
pub const MAX_TAG_KEYS: usize = 1 << 16;

/// Maximum number of references of one way version (OSM API limit is 2000).
pub const MAX_WAY_NODES: usize = 1 << 16;

/// Maximum number of members of one relation version.
pub const MAX_RELATION_MEMBERS: usize = 1 << 20;

/// Maximum number of colocated child records in one record.
pub const MAX_CHILDREN: usize = 1 << 22;

/// Maximum number of records in one grid cell.
pub const MAX_CELL_RECORDS: usize = 1 << 24;

/// Maximum uncompressed size of a cell blob.
pub const MAX_CELL_SIZE: usize = 1 << 30;

/// Magic bytes of an uncompressed cell blob.
pub const MAGIC_CELL: &[u8; 4] = b"CELL";

/// Magic bytes of a zstd-compressed cell blob.
pub const MAGIC_CELL_COMPRESSED: &[u8; 5] = b"CELLZ";

/// Current cell format version.
pub const CELL_FORMAT_VERSION: u8 = 1;

/// Coordinates are stored as integers in units of 1e-7 degrees.
pub const GEOM_PRECISION: f64 = 1e-7;

/// Inverse of [`GEOM_PRECISION`].
pub const GEOM_PRECISION_TO_LONG: f64 = 1e7;
