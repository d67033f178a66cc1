//! Geometry assembly from reconstructed entities.
//!
//! Coordinates stay fixed-point integers up to this point and are converted
//! to `f64` degrees when geometries are built.

pub mod builder;
pub mod clip;
pub mod measure;
pub mod ring;

pub use builder::{build_geometry, build_multipolygon, ring_polygon, BuiltGeometry, MultipolygonParts};
pub use clip::{clip, empty_geometry, is_empty, AreaOfInterest};
pub use measure::{geodesic_area, length, old_style_duplicate, old_style_duplicate_area};
pub use ring::{join_rings, JoinedRings, WaySegment};
