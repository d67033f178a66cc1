//! Measurements on the sphere.

use geo::ChamberlainDuquetteArea;
use geo_types::{Geometry, LineString, Polygon};

use crate::error::GeometryError;
use crate::geometry::builder::{resolve_member_way, ring_polygon};
use crate::model::{OsmRelation, RelationHistory};
use crate::tags::TagInterpreter;

/// Mean earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Approximate area in square meters (Chamberlain–Duquette).
pub fn geodesic_area(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Polygon(p) => p.chamberlain_duquette_unsigned_area(),
        Geometry::MultiPolygon(mp) => mp.chamberlain_duquette_unsigned_area(),
        Geometry::Rect(r) => r.to_polygon().chamberlain_duquette_unsigned_area(),
        Geometry::Triangle(t) => t.to_polygon().chamberlain_duquette_unsigned_area(),
        Geometry::GeometryCollection(gc) => gc.0.iter().map(geodesic_area).sum(),
        _ => 0.0,
    }
}

/// Equirectangular distance in meters between two lon/lat points.
pub fn distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians() * ((lat1 + lat2) / 2.0).to_radians().cos();
    EARTH_RADIUS * (d_lon * d_lon + d_lat * d_lat).sqrt()
}

fn line_length(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|w| distance(w[0].x, w[0].y, w[1].x, w[1].y))
        .sum()
}

/// Length in meters of the linear parts of a geometry.
pub fn length(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Line(l) => distance(l.start.x, l.start.y, l.end.x, l.end.y),
        Geometry::LineString(ls) => line_length(ls),
        Geometry::MultiLineString(mls) => mls.0.iter().map(line_length).sum(),
        Geometry::GeometryCollection(gc) => gc.0.iter().map(length).sum(),
        _ => 0.0,
    }
}

/// Polygon of the outer way of an old-style multipolygon, when that way also
/// counts as an area of its own; `None` when it does not.
///
/// Exactly one visible outer way is required at `t`.
pub fn old_style_duplicate(
    relation: &OsmRelation,
    history: &RelationHistory,
    t: i64,
    interpreter: &TagInterpreter,
) -> Result<Option<Polygon<f64>>, GeometryError> {
    let outers: Vec<_> = relation
        .members
        .iter()
        .filter(|m| interpreter.is_multipolygon_outer_member(m))
        .filter_map(|m| resolve_member_way(history, m.id, t))
        .collect();
    let [(way, segment)] = outers.as_slice() else {
        return Err(GeometryError::UnsupportedOldStyleMultipolygon {
            outer_count: outers.len(),
        });
    };
    if !interpreter.is_area_way(way) {
        return Ok(None);
    }
    ring_polygon(segment).map(Some)
}

/// Area of [`old_style_duplicate`]. Aggregations that sum the areas of ways
/// and relations subtract it once.
pub fn old_style_duplicate_area(
    relation: &OsmRelation,
    history: &RelationHistory,
    t: i64,
    interpreter: &TagInterpreter,
) -> Result<f64, GeometryError> {
    Ok(old_style_duplicate(relation, history, t, interpreter)?
        .map_or(0.0, |p| p.chamberlain_duquette_unsigned_area()))
}
