//! Fixed-point coordinates and bounding boxes.
//!
//! Coordinates are integers in units of 1e-7 degrees. All delta arithmetic
//! in the codec happens on these integers; conversion to floating point
//! degrees happens only when geometries are built.

use geo_types::{coord, Coord, Rect};

use crate::limits::{GEOM_PRECISION, GEOM_PRECISION_TO_LONG};

/// A fixed-point longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub lon: i64,
    pub lat: i64,
}

impl Location {
    pub const fn new(lon: i64, lat: i64) -> Self {
        Self { lon, lat }
    }

    /// Rounds degrees to the nearest representable location.
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: (lon * GEOM_PRECISION_TO_LONG).round() as i64,
            lat: (lat * GEOM_PRECISION_TO_LONG).round() as i64,
        }
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon as f64 * GEOM_PRECISION
    }

    pub fn lat_degrees(&self) -> f64 {
        self.lat as f64 * GEOM_PRECISION
    }

    pub fn to_coord(&self) -> Coord<f64> {
        coord! { x: self.lon_degrees(), y: self.lat_degrees() }
    }
}

/// Inclusive fixed-point bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub min_lon: i64,
    pub min_lat: i64,
    pub max_lon: i64,
    pub max_lat: i64,
}

impl BoundingBox {
    pub const fn new(min_lon: i64, min_lat: i64, max_lon: i64, max_lat: i64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The whole world.
    pub fn world() -> Self {
        Self::from_degrees(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn from_degrees(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        let min = Location::from_degrees(min_lon, min_lat);
        let max = Location::from_degrees(max_lon, max_lat);
        Self::new(min.lon, min.lat, max.lon, max.lat)
    }

    pub fn from_location(loc: Location) -> Self {
        Self::new(loc.lon, loc.lat, loc.lon, loc.lat)
    }

    /// Smallest box around `locations`, or `None` when there are none.
    pub fn around(locations: impl IntoIterator<Item = Location>) -> Option<Self> {
        locations.into_iter().fold(None, |acc, loc| match acc {
            None => Some(Self::from_location(loc)),
            Some(mut bbox) => {
                bbox.add_location(loc);
                Some(bbox)
            }
        })
    }

    pub fn add_location(&mut self, loc: Location) {
        self.min_lon = self.min_lon.min(loc.lon);
        self.min_lat = self.min_lat.min(loc.lat);
        self.max_lon = self.max_lon.max(loc.lon);
        self.max_lat = self.max_lat.max(loc.lat);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_lon.min(other.min_lon),
            self.min_lat.min(other.min_lat),
            self.max_lon.max(other.max_lon),
            self.max_lat.max(other.max_lat),
        )
    }

    /// Unions two optional boxes, where `None` is the empty box.
    pub fn union_opt(a: Option<BoundingBox>, b: Option<BoundingBox>) -> Option<BoundingBox> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    pub fn contains(&self, loc: Location) -> bool {
        loc.lon >= self.min_lon
            && loc.lon <= self.max_lon
            && loc.lat >= self.min_lat
            && loc.lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// True when `self` lies completely inside `other`.
    pub fn is_inside(&self, other: &BoundingBox) -> bool {
        self.min_lon >= other.min_lon
            && self.max_lon <= other.max_lon
            && self.min_lat >= other.min_lat
            && self.max_lat <= other.max_lat
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lon as f64 * GEOM_PRECISION, y: self.min_lat as f64 * GEOM_PRECISION },
            coord! { x: self.max_lon as f64 * GEOM_PRECISION, y: self.max_lat as f64 * GEOM_PRECISION },
        )
    }

    /// Smallest fixed-point box covering a degree rectangle.
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(
            (rect.min().x * GEOM_PRECISION_TO_LONG).floor() as i64,
            (rect.min().y * GEOM_PRECISION_TO_LONG).floor() as i64,
            (rect.max().x * GEOM_PRECISION_TO_LONG).ceil() as i64,
            (rect.max().y * GEOM_PRECISION_TO_LONG).ceil() as i64,
        )
    }
}

/// Reference tuple that every record is encoded relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Base {
    pub id: i64,
    pub timestamp: i64,
    pub lon: i64,
    pub lat: i64,
}

impl Base {
    pub const fn new(id: i64, timestamp: i64, lon: i64, lat: i64) -> Self {
        Self {
            id,
            timestamp,
            lon,
            lat,
        }
    }

    /// Base used for colocated child records: same spatial origin, zero id and time.
    pub fn for_children(&self) -> Base {
        Base::new(0, 0, self.lon, self.lat)
    }
}
