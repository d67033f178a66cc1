//! Power-of-two XY grid addressing.
//!
//! At zoom `z` the world is split into square cells of `360 / 2^z` degrees,
//! numbered row by row from the south-west corner. An entity history is
//! stored in the deepest cell whose extent contains its whole bounding box.

use std::ops::RangeInclusive;

use crate::limits::GEOM_PRECISION;
use crate::model::{BoundingBox, Location};

/// Deepest zoom level used for storage.
pub const MAX_ZOOM: u8 = 14;

/// Bits reserved for the zoom level in a packed level id.
const ZOOM_BITS: u32 = 5;

/// A grid cell: zoom level plus id within that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId {
    pub zoom: u8,
    pub id: u64,
}

impl CellId {
    pub const fn new(zoom: u8, id: u64) -> Self {
        Self { zoom, id }
    }

    /// Packs zoom and id into one storage key.
    pub fn to_level_id(self) -> u64 {
        (self.id << ZOOM_BITS) | self.zoom as u64
    }

    pub fn from_level_id(level_id: u64) -> Self {
        Self {
            zoom: (level_id & ((1 << ZOOM_BITS) - 1)) as u8,
            id: level_id >> ZOOM_BITS,
        }
    }
}

/// Grid of one zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XyGrid {
    zoom: u8,
    zoompow: u64,
    cell_width: f64,
}

impl XyGrid {
    /// Creates the grid of `zoom`, capped at [`MAX_ZOOM`].
    pub fn new(zoom: u8) -> Self {
        let zoom = zoom.min(MAX_ZOOM);
        let zoompow = 1u64 << zoom;
        Self {
            zoom,
            zoompow,
            cell_width: 360.0 / zoompow as f64,
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Width and height of a cell in degrees.
    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    fn rows(&self) -> u64 {
        (self.zoompow / 2).max(1)
    }

    fn column(&self, lon: f64) -> u64 {
        let x = ((lon + 180.0) / self.cell_width).floor();
        (x.max(0.0) as u64).min(self.zoompow - 1)
    }

    fn row(&self, lat: f64) -> u64 {
        let y = ((lat + 90.0) / self.cell_width).floor();
        (y.max(0.0) as u64).min(self.rows() - 1)
    }

    /// Id of the cell containing a location.
    pub fn cell_id(&self, location: Location) -> u64 {
        let x = self.column(location.lon_degrees());
        let y = self.row(location.lat_degrees());
        y * self.zoompow + x
    }

    /// Fixed-point extent of a cell. Neighbouring extents do not overlap.
    pub fn cell_extent(&self, id: u64) -> BoundingBox {
        let x = id % self.zoompow;
        let y = id / self.zoompow;
        let min_lon = x as f64 * self.cell_width - 180.0;
        let min_lat = y as f64 * self.cell_width - 90.0;
        let max_lon = if x + 1 == self.zoompow {
            180.0
        } else {
            min_lon + self.cell_width - GEOM_PRECISION
        };
        let max_lat = if y + 1 >= self.rows() {
            90.0
        } else {
            min_lat + self.cell_width - GEOM_PRECISION
        };
        BoundingBox::from_degrees(min_lon, min_lat, max_lon, max_lat)
    }

    /// Ranges of cell ids intersecting `bbox`, one range per grid row.
    /// With `enlarge`, one ring of neighbouring cells is included as well.
    pub fn bbox_to_cell_ranges(
        &self,
        bbox: &BoundingBox,
        enlarge: bool,
    ) -> Vec<RangeInclusive<u64>> {
        let rect = bbox.to_rect();
        let mut x_min = self.column(rect.min().x);
        let mut x_max = self.column(rect.max().x);
        let mut y_min = self.row(rect.min().y);
        let mut y_max = self.row(rect.max().y);
        if enlarge {
            x_min = x_min.saturating_sub(1);
            y_min = y_min.saturating_sub(1);
            x_max = (x_max + 1).min(self.zoompow - 1);
            y_max = (y_max + 1).min(self.rows() - 1);
        }
        (y_min..=y_max)
            .map(|y| (y * self.zoompow + x_min)..=(y * self.zoompow + x_max))
            .collect()
    }
}

/// Cell an entity with bounding box `bbox` is stored in.
///
/// Histories without any visible coordinate go to the root cell.
pub fn storage_cell(bbox: Option<BoundingBox>, max_zoom: u8) -> CellId {
    let Some(bbox) = bbox else {
        return CellId::new(0, 0);
    };
    let min = Location::new(bbox.min_lon, bbox.min_lat);
    let max = Location::new(bbox.max_lon, bbox.max_lat);
    let mut best = CellId::new(0, 0);
    for zoom in 1..=max_zoom.min(MAX_ZOOM) {
        let grid = XyGrid::new(zoom);
        let id = grid.cell_id(min);
        if grid.cell_id(max) != id {
            break;
        }
        best = CellId::new(zoom, id);
    }
    best
}

/// Every cell on zoom levels `0..=max_zoom` whose extent intersects `bbox`.
pub fn cells_intersecting(bbox: &BoundingBox, max_zoom: u8) -> Vec<CellId> {
    let mut cells = Vec::new();
    for zoom in 0..=max_zoom.min(MAX_ZOOM) {
        let grid = XyGrid::new(zoom);
        for range in grid.bbox_to_cell_ranges(bbox, false) {
            cells.extend(range.map(|id| CellId::new(zoom, id)));
        }
    }
    cells
}
