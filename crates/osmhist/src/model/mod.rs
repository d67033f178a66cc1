//! Data model types.
//!
//! - Entity versions ([`OsmNode`], [`OsmWay`], [`OsmRelation`]) sharing [`Meta`]
//! - Fixed-point coordinates and bounding boxes
//! - Full histories, the unit the codec builds records from
//! - Builders for ergonomic construction

pub mod builder;
pub mod coords;
pub mod entity;
pub mod history;

pub use coords::{Base, BoundingBox, Location};
pub use entity::{Meta, OsmEntity, OsmMember, OsmNode, OsmRelation, OsmType, OsmWay, Tag, Versioned};
pub use history::{EntityHistory, NodeHistory, RelationHistory, WayHistory};
