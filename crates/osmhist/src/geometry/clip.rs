//! Clipping geometries to an area of interest.

use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{BooleanOps, BoundingRect, Contains, Intersects};
use geo_types::{Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Polygon};
use log::warn;

use crate::model::BoundingBox;

/// Region that query results are clipped to.
#[derive(Debug, Clone, PartialEq)]
pub enum AreaOfInterest {
    Bbox(BoundingBox),
    Polygon(Polygon<f64>),
}

impl AreaOfInterest {
    /// Bounding box of the area.
    pub fn bbox(&self) -> BoundingBox {
        match self {
            AreaOfInterest::Bbox(bbox) => *bbox,
            AreaOfInterest::Polygon(polygon) => polygon
                .bounding_rect()
                .map(|rect| BoundingBox::from_rect(&rect))
                .unwrap_or_else(|| BoundingBox::new(0, 0, -1, -1)),
        }
    }

    /// Whether an entity with bounding box `bbox` lies completely inside.
    pub fn contains_bbox(&self, bbox: &BoundingBox) -> bool {
        match self {
            AreaOfInterest::Bbox(area) => bbox.is_inside(area),
            AreaOfInterest::Polygon(polygon) => polygon.contains(&bbox.to_rect().to_polygon()),
        }
    }

    /// Whether an entity with bounding box `bbox` may intersect the area.
    pub fn intersects_bbox(&self, bbox: &BoundingBox) -> bool {
        match self {
            AreaOfInterest::Bbox(area) => area.intersects(bbox),
            AreaOfInterest::Polygon(polygon) => polygon.intersects(&bbox.to_rect().to_polygon()),
        }
    }

    fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        match self {
            AreaOfInterest::Bbox(bbox) => MultiPolygon::new(vec![bbox.to_rect().to_polygon()]),
            AreaOfInterest::Polygon(polygon) => MultiPolygon::new(vec![polygon.clone()]),
        }
    }
}

/// The empty geometry.
pub fn empty_geometry() -> Geometry<f64> {
    Geometry::GeometryCollection(GeometryCollection::new_from(Vec::new()))
}

/// Whether a geometry has no coordinates.
pub fn is_empty(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => false,
        Geometry::LineString(ls) => ls.0.is_empty(),
        Geometry::Polygon(p) => p.exterior().0.is_empty(),
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.0.iter().all(|ls| ls.0.is_empty()),
        Geometry::MultiPolygon(mp) => mp.0.iter().all(|p| p.exterior().0.is_empty()),
        Geometry::GeometryCollection(gc) => gc.0.iter().all(is_empty),
    }
}

fn from_lines(mut lines: MultiLineString<f64>) -> Geometry<f64> {
    lines.0.retain(|ls| ls.0.len() >= 2);
    match lines.0.len() {
        0 => empty_geometry(),
        1 => Geometry::LineString(lines.0.remove(0)),
        _ => Geometry::MultiLineString(lines),
    }
}

fn from_polygons(mut polygons: MultiPolygon<f64>) -> Geometry<f64> {
    polygons.0.retain(|p| !p.exterior().0.is_empty());
    match polygons.0.len() {
        0 => empty_geometry(),
        1 => Geometry::Polygon(polygons.0.remove(0)),
        _ => Geometry::MultiPolygon(polygons),
    }
}

fn clip_with(geometry: &Geometry<f64>, area: &MultiPolygon<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Point(p) => {
            if area.intersects(p) {
                Geometry::Point(*p)
            } else {
                empty_geometry()
            }
        }
        Geometry::MultiPoint(mp) => {
            let inside: Vec<_> = mp.0.iter().filter(|p| area.intersects(*p)).copied().collect();
            if inside.is_empty() {
                empty_geometry()
            } else {
                Geometry::MultiPoint(MultiPoint::new(inside))
            }
        }
        Geometry::Line(line) => {
            let ls = LineString::from(vec![line.start, line.end]);
            from_lines(area.clip(&MultiLineString::new(vec![ls]), false))
        }
        Geometry::LineString(ls) => from_lines(area.clip(&MultiLineString::new(vec![ls.clone()]), false)),
        Geometry::MultiLineString(mls) => from_lines(area.clip(mls, false)),
        Geometry::Polygon(p) => from_polygons(area.intersection(&MultiPolygon::new(vec![p.clone()]))),
        Geometry::MultiPolygon(mp) => from_polygons(area.intersection(mp)),
        Geometry::Rect(r) => from_polygons(area.intersection(&MultiPolygon::new(vec![r.to_polygon()]))),
        Geometry::Triangle(t) => {
            from_polygons(area.intersection(&MultiPolygon::new(vec![t.to_polygon()])))
        }
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<_> = gc
                .0
                .iter()
                .map(|g| clip_with(g, area))
                .filter(|g| !is_empty(g))
                .collect();
            Geometry::GeometryCollection(GeometryCollection::new_from(parts))
        }
    }
}

/// Intersection of `geometry` with the area of interest.
///
/// A failure inside the boolean operations yields the empty geometry.
pub fn clip(geometry: &Geometry<f64>, area: &AreaOfInterest) -> Geometry<f64> {
    if is_empty(geometry) {
        return empty_geometry();
    }
    let area = area.to_multi_polygon();
    match catch_unwind(AssertUnwindSafe(|| clip_with(geometry, &area))) {
        Ok(clipped) => clipped,
        Err(_) => {
            warn!("clipping failed, using empty geometry");
            empty_geometry()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    fn unit_box() -> AreaOfInterest {
        AreaOfInterest::Bbox(BoundingBox::from_degrees(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn test_points() {
        let inside = Geometry::Point(point! { x: 0.5, y: 0.5 });
        let outside = Geometry::Point(point! { x: 2.0, y: 0.5 });
        assert_eq!(clip(&inside, &unit_box()), inside);
        assert!(is_empty(&clip(&outside, &unit_box())));
    }

    #[test]
    fn test_line_is_cut() {
        let line = Geometry::LineString(line_string![(x: -1.0, y: 0.5), (x: 2.0, y: 0.5)]);
        let Geometry::LineString(clipped) = clip(&line, &unit_box()) else {
            panic!("expected a line string");
        };
        let xs: Vec<f64> = clipped.0.iter().map(|c| c.x).collect();
        assert_eq!(xs.len(), 2);
        assert!((xs.iter().cloned().fold(f64::INFINITY, f64::min) - 0.0).abs() < 1e-9);
        assert!((xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_intersection() {
        let square = Geometry::Polygon(polygon![
            (x: 0.5, y: 0.5), (x: 1.5, y: 0.5), (x: 1.5, y: 1.5), (x: 0.5, y: 1.5), (x: 0.5, y: 0.5)
        ]);
        let clipped = clip(&square, &unit_box());
        let Geometry::Polygon(p) = clipped else {
            panic!("expected a polygon");
        };
        use geo::Area;
        assert!((p.unsigned_area() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_polygon_is_empty() {
        let far = Geometry::Polygon(polygon![
            (x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0), (x: 5.0, y: 5.0)
        ]);
        assert!(is_empty(&clip(&far, &unit_box())));
    }

    #[test]
    fn test_polygon_area_of_interest() {
        let triangle = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)];
        let aoi = AreaOfInterest::Polygon(triangle);
        let bbox = aoi.bbox();
        assert_eq!(bbox, BoundingBox::from_degrees(0.0, 0.0, 2.0, 2.0));
        assert!(aoi.contains_bbox(&BoundingBox::from_degrees(0.1, 0.1, 0.5, 0.5)));
        assert!(!aoi.contains_bbox(&BoundingBox::from_degrees(1.5, 1.5, 1.9, 1.9)));
        assert!(aoi.intersects_bbox(&BoundingBox::from_degrees(0.9, 0.9, 1.9, 1.9)));
        assert!(!aoi.intersects_bbox(&BoundingBox::from_degrees(1.5, 1.5, 1.9, 1.9)));
    }

    #[test]
    fn test_collection_drops_empty_parts() {
        let gc = Geometry::GeometryCollection(GeometryCollection::new_from(vec![
            Geometry::Point(point! { x: 0.5, y: 0.5 }),
            Geometry::Point(point! { x: 9.0, y: 9.0 }),
        ]));
        let Geometry::GeometryCollection(clipped) = clip(&gc, &unit_box()) else {
            panic!("expected a collection");
        };
        assert_eq!(clipped.0.len(), 1);
    }
}
