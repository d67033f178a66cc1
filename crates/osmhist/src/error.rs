//! Error types for record encoding/decoding, geometry assembly and configuration.

use thiserror::Error;

/// Error categories surfaced to the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// H001: Buffer truncated or malformed
    CorruptRecord,
    /// H002: Input rejected by the record builder
    InvalidInput,
    /// H003: Geometry could not be assembled as requested
    InvalidGeometry,
    /// H004: Configuration or ruleset could not be loaded
    InvalidConfig,
}

impl ErrorCode {
    /// Returns the error code string (e.g., "H001").
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::CorruptRecord => "H001",
            ErrorCode::InvalidInput => "H002",
            ErrorCode::InvalidGeometry => "H003",
            ErrorCode::InvalidConfig => "H004",
        }
    }
}

/// Error while decoding a record, a cell or a version stream.
///
/// Every variant is a corrupt record: the offending record is skipped by the
/// cell iterator and counted, the rest of the cell is still processed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("[H001] unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("[H001] varint exceeds maximum length (10 bytes)")]
    VarintTooLong,

    #[error("[H001] varint overflow (value exceeds u64)")]
    VarintOverflow,

    #[error("[H001] {field} value {value} is out of range")]
    ValueOutOfRange { field: &'static str, value: u64 },

    #[error("[H001] {field} length {len} runs past the end of the buffer ({remaining} bytes left)")]
    LengthExceedsBuffer {
        field: &'static str,
        len: usize,
        remaining: usize,
    },

    #[error("[H001] {field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("[H001] tag list has odd length {len}")]
    OddTagList { len: usize },

    #[error("[H001] invalid osm type: {value}")]
    InvalidOsmType { value: u64 },

    #[error("[H001] child index length {len} is not a multiple of 4")]
    ChildIndexMisaligned { len: usize },

    #[error("[H001] child offset {offset} out of range (table size: {count})")]
    ChildOffsetOutOfRange { offset: usize, count: usize },

    #[error("[H001] invalid magic bytes: expected CELL or CELLZ, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("[H001] unsupported cell format version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("[H001] zstd decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("[H001] decompressed size {actual} doesn't match declared {declared}")]
    UncompressedSizeMismatch { declared: usize, actual: usize },

    #[error("[H001] record {id} decodes to an inconsistent history: {reason}")]
    InvalidHistory { id: i64, reason: String },
}

impl DecodeError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::CorruptRecord
    }
}

/// Error while building a record from a version list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("[H002] cannot build a record from an empty version list")]
    EmptyHistory,

    #[error("[H002] version list mixes entity ids: expected {expected}, found {found}")]
    MixedIds { expected: i64, found: i64 },

    #[error("[H002] entity {id} has version {version} twice")]
    DuplicateVersion { id: i64, version: u32 },

    #[error("[H002] visible node {id} version {version} has no location")]
    MissingLocation { id: i64, version: u32 },

    #[error("[H002] {field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("[H002] cannot store a {found} in a {expected} cell")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("[H002] zstd compression failed: {0}")]
    CompressionFailed(String),

    #[error("[H002] source record is corrupt: {0}")]
    CorruptSource(#[from] DecodeError),
}

impl EncodeError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidInput
    }
}

/// Geometry that cannot be assembled as requested.
///
/// Geometry building itself never fails: these errors are only produced by
/// the strict helpers (ring validation, measurement of old-style
/// multipolygons) and are recovered by the callers with a fallback geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("[H003] ring is not closed: first node {first}, last node {last}")]
    UnclosedRing { first: i64, last: i64 },

    #[error("[H003] {count} coordinates are not enough for the requested geometry")]
    TooFewCoordinates { count: usize },

    #[error("[H003] old-style multipolygon with {outer_count} outer ways is not supported")]
    UnsupportedOldStyleMultipolygon { outer_count: usize },
}

impl GeometryError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidGeometry
    }
}

/// Error while loading a query configuration or a tag ruleset.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("[H004] i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[H004] json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[H004] invalid timestamp {input:?}: {message}")]
    InvalidTimestamp { input: String, message: String },

    #[error("[H004] invalid period {input:?}")]
    InvalidPeriod { input: String },

    #[error("[H004] unknown area rule type {kind:?} for key {key:?}")]
    UnknownRuleType { key: String, kind: String },

    #[error("[H004] invalid area of interest: {0}")]
    InvalidArea(String),

    #[error("[H004] invalid {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl ConfigError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidConfig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_codes() {
        let err = DecodeError::UnexpectedEof { context: "header" };
        assert_eq!(err.code().code(), "H001");
        assert!(err.to_string().starts_with("[H001]"));

        let err = EncodeError::EmptyHistory;
        assert_eq!(err.code().code(), "H002");

        let err = GeometryError::UnsupportedOldStyleMultipolygon { outer_count: 2 };
        assert_eq!(err.code(), ErrorCode::InvalidGeometry);
        assert!(err.to_string().contains("2 outer ways"));
    }
}
