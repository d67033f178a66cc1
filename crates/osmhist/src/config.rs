//! Query configuration loaded from JSON.
//!
//! ```json
//! {
//!   "bbox": [8.6, 49.3, 8.8, 49.5],
//!   "timestamps": { "start": "2010-01-01", "end": "2020-01-01", "period": "P1Y" },
//!   "types": ["way", "relation"],
//!   "max_zoom": 12
//! }
//! ```

use std::path::Path;

use geo_types::{Coord, LineString, Polygon};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::geometry::AreaOfInterest;
use crate::grid::MAX_ZOOM;
use crate::model::{BoundingBox, OsmType};
use crate::util::{parse_timestamp, TimestampSeries};

/// Requested time axis.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TimeAxis {
    /// Explicit RFC 3339 timestamps.
    List(Vec<String>),
    /// Every `period` from `start` to `end`, both inclusive.
    Series {
        start: String,
        end: String,
        period: String,
    },
}

impl TimeAxis {
    /// Timestamps in milliseconds, ascending and without duplicates.
    pub fn resolve(&self) -> Result<Vec<i64>, ConfigError> {
        let mut out = match self {
            TimeAxis::List(items) => items
                .iter()
                .map(|s| parse_timestamp(s))
                .collect::<Result<Vec<_>, _>>()?,
            TimeAxis::Series { start, end, period } => TimestampSeries::parse(start, end, period)?.to_vec(),
        };
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

fn default_types() -> Vec<OsmType> {
    OsmType::ALL.to_vec()
}

fn default_max_zoom() -> u8 {
    MAX_ZOOM
}

/// One query: where, when and what.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// `[min_lon, min_lat, max_lon, max_lat]` in degrees.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    /// Outer ring of a polygon area, `[lon, lat]` pairs. Takes precedence
    /// over `bbox`.
    #[serde(default)]
    pub polygon: Option<Vec<[f64; 2]>>,
    pub timestamps: TimeAxis,
    #[serde(default = "default_types")]
    pub types: Vec<OsmType>,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default)]
    pub include_old_style_multipolygons: bool,
    /// Worker threads; the global rayon pool when absent.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl QueryConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: QueryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_zoom > MAX_ZOOM {
            return Err(ConfigError::InvalidValue {
                field: "max_zoom",
                message: format!("{} exceeds {}", self.max_zoom, MAX_ZOOM),
            });
        }
        if self.types.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "types",
                message: "at least one type is required".to_string(),
            });
        }
        if self.threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "threads",
                message: "must be positive".to_string(),
            });
        }
        self.area_of_interest()?;
        self.time_axis()?;
        Ok(())
    }

    pub fn time_axis(&self) -> Result<Vec<i64>, ConfigError> {
        let timestamps = self.timestamps.resolve()?;
        if timestamps.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "timestamps",
                message: "no timestamps".to_string(),
            });
        }
        Ok(timestamps)
    }

    /// The polygon if one is given, else the bbox, else the whole world.
    pub fn area_of_interest(&self) -> Result<AreaOfInterest, ConfigError> {
        if let Some(ring) = &self.polygon {
            return polygon_area(ring);
        }
        match self.bbox {
            Some(bbox) => bbox_area(bbox),
            None => Ok(AreaOfInterest::Bbox(BoundingBox::world())),
        }
    }

    pub fn includes(&self, kind: OsmType) -> bool {
        self.types.contains(&kind)
    }
}

fn check_coordinate(lon: f64, lat: f64) -> Result<(), ConfigError> {
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(ConfigError::InvalidArea(format!("coordinate ({lon}, {lat}) out of range")));
    }
    Ok(())
}

fn bbox_area([min_lon, min_lat, max_lon, max_lat]: [f64; 4]) -> Result<AreaOfInterest, ConfigError> {
    check_coordinate(min_lon, min_lat)?;
    check_coordinate(max_lon, max_lat)?;
    if min_lon > max_lon || min_lat > max_lat {
        return Err(ConfigError::InvalidArea("bbox minimum exceeds maximum".to_string()));
    }
    Ok(AreaOfInterest::Bbox(BoundingBox::from_degrees(min_lon, min_lat, max_lon, max_lat)))
}

fn polygon_area(ring: &[[f64; 2]]) -> Result<AreaOfInterest, ConfigError> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.len() + 1);
    for &[lon, lat] in ring {
        check_coordinate(lon, lat)?;
        coords.push(Coord { x: lon, y: lat });
    }
    if coords.first() != coords.last() {
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
    }
    if coords.len() < 4 {
        return Err(ConfigError::InvalidArea(format!(
            "polygon needs at least 3 distinct points, got {}",
            ring.len()
        )));
    }
    Ok(AreaOfInterest::Polygon(Polygon::new(LineString::new(coords), Vec::new())))
}
