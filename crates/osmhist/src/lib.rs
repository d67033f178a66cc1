//! osmhist: storage and time-travel queries over the full edit history of
//! OpenStreetMap data.
//!
//! Every version of a node, way or relation is kept in one compact record,
//! delta encoded against a cell-wide base. Records are grouped into cells of a
//! quadtree grid and can be queried for the state of the map at arbitrary
//! timestamps (snapshots) or for every edit within a time interval
//! (contributions).
//!
//! # Quick Start
//!
//! ```rust
//! use osmhist::model::builder::node;
//! use osmhist::model::{EntityHistory, NodeHistory, BoundingBox};
//! use osmhist::geometry::AreaOfInterest;
//! use osmhist::tags::{TagInterpreter, Vocabulary};
//! use osmhist::iterate::CellIterator;
//!
//! let mut vocab = Vocabulary::new();
//! let drinking_water = vocab.intern_tag("amenity", "drinking_water");
//!
//! let history = EntityHistory::Node(
//!     NodeHistory::new(vec![
//!         node(42, 1, 1_000).at_degrees(8.67, 49.41).build(),
//!         node(42, 2, 2_000)
//!             .at_degrees(8.68, 49.41)
//!             .tag(drinking_water.key, drinking_water.value)
//!             .build(),
//!     ])
//!     .unwrap(),
//! );
//!
//! let interpreter = TagInterpreter::new(&[], &[], &vocab);
//! let area = AreaOfInterest::Bbox(BoundingBox::from_degrees(8.0, 49.0, 9.0, 50.0));
//! let iterator = CellIterator::new([1_500, 2_500], area, &interpreter);
//! let snapshots = iterator.iterate_snapshots([&history]);
//! assert_eq!(snapshots.entries.len(), 2);
//! ```
//!
//! # Modules
//!
//! - [`model`]: Entities, versions and histories
//! - [`codec`]: Record and cell encoding/decoding with compression support
//! - [`iterate`]: Snapshot and contribution iteration
//! - [`geometry`]: Geometry reconstruction, clipping and measurements
//! - [`tags`]: Tag vocabulary and area/multipolygon interpretation
//! - [`grid`]: Quadtree cell addressing
//! - [`mapreduce`]: Parallel aggregation over many cells
//! - [`config`]: JSON query configuration
//! - [`error`]: Error types
//! - [`limits`]: Decoder limits and format constants
//!
//! # Security
//!
//! Cells may come from untrusted storage. Decoding never panics:
//! - Every length is checked against the remaining input and a hard limit
//! - Varints are limited to 10 bytes
//! - A corrupt record is skipped without affecting the rest of its cell

pub mod codec;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod iterate;
pub mod limits;
pub mod mapreduce;
pub mod model;
pub mod tags;
pub mod util;

// Re-export commonly used types at crate root
pub use codec::{cell_bytes, decode_cell, encode_cell, encode_cell_compressed, Cell, CellBuilder, ChildLookup, NoLookup, Record};
pub use config::{QueryConfig, TimeAxis};
pub use error::{ConfigError, DecodeError, EncodeError, ErrorCode, GeometryError};
pub use geometry::{build_geometry, AreaOfInterest, BuiltGeometry};
pub use grid::{cells_intersecting, storage_cell, CellId, MAX_ZOOM};
pub use iterate::{Activities, Activity, CellIterator, ContributionEntry, Diagnostics, Iteration, SnapshotEntry};
pub use mapreduce::{CellSource, MapReducer, MemoryCellSource, Reduced};
pub use model::{
    BoundingBox, EntityHistory, Meta, NodeHistory, OsmEntity, OsmMember, OsmNode, OsmRelation, OsmType, OsmWay,
    RelationHistory, Tag, WayHistory,
};
pub use tags::{AreaRule, Classification, TagInterpreter, TagTranslator, Vocabulary};
pub use util::{format_timestamp, parse_timestamp, Period, TimestampSeries};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
