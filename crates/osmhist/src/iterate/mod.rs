//! Snapshot and contribution iteration over the entities of a cell.
//!
//! A [`CellIterator`] holds everything a query fixes up front: the time
//! axis, the area of interest, the tag interpreter and the filters. It can
//! then be run against any number of cells, from any number of threads.
//!
//! Results are returned per entity in ascending id order and, within one
//! entity, in ascending timestamp order. Per-entity failures never abort a
//! cell; they are counted in [`Diagnostics`].

mod contribution;
mod snapshot;

pub use contribution::{Activities, Activity, ContributionEntry};
pub use snapshot::SnapshotEntry;

use std::sync::Arc;

use geo_types::Geometry;
use log::{debug, trace, warn};

use crate::codec::{Cell, ChildLookup, NoLookup};
use crate::geometry::{
    build_geometry, clip, geodesic_area, is_empty, old_style_duplicate, AreaOfInterest, BuiltGeometry,
};
use crate::model::{BoundingBox, EntityHistory, OsmEntity, OsmRelation, RelationHistory};
use crate::tags::{Classification, TagInterpreter};

/// Predicate on a whole entity history, evaluated before any geometry work.
pub type EntityFilter = Arc<dyn Fn(&EntityHistory) -> bool + Send + Sync>;

/// Predicate on one materialized entity version and its clipped geometry.
pub type ResultFilter = Arc<dyn Fn(&OsmEntity, &Geometry<f64>) -> bool + Send + Sync>;

/// Counters describing what a query skipped or repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub cells: u64,
    pub entities: u64,
    /// Cells that could not be opened at all.
    pub corrupt_cells: u64,
    /// Records that failed to decode and were skipped.
    pub corrupt_records: u64,
    /// Entities rejected by the entity filter.
    pub filtered: u64,
    /// Entities whose bounding box never meets the area of interest.
    pub outside: u64,
    /// Entities with no visible coordinate in any version.
    pub without_coordinates: u64,
    /// Geometries replaced by a simpler fallback.
    pub degraded_geometries: u64,
    /// Inner rings that no outer ring contains.
    pub unmatched_inner_rings: u64,
    /// Old-style multipolygons without exactly one outer way, whose outline
    /// area could not be deduplicated.
    pub unsupported_old_style: u64,
}

impl Diagnostics {
    pub fn merge(&mut self, other: &Diagnostics) {
        self.cells += other.cells;
        self.entities += other.entities;
        self.corrupt_cells += other.corrupt_cells;
        self.corrupt_records += other.corrupt_records;
        self.filtered += other.filtered;
        self.outside += other.outside;
        self.without_coordinates += other.without_coordinates;
        self.degraded_geometries += other.degraded_geometries;
        self.unmatched_inner_rings += other.unmatched_inner_rings;
        self.unsupported_old_style += other.unsupported_old_style;
    }

    pub fn merged(mut self, other: &Diagnostics) -> Self {
        self.merge(other);
        self
    }

    fn record_geometry(&mut self, built: &BuiltGeometry) {
        if built.degraded {
            self.degraded_geometries += 1;
        }
        self.unmatched_inner_rings += built.unmatched_inners as u64;
    }
}

/// Entries produced by one iteration, plus what was skipped on the way.
#[derive(Debug, Clone, Default)]
pub struct Iteration<T> {
    pub entries: Vec<T>,
    pub diagnostics: Diagnostics,
}

/// Geometry of an entity at one timestamp, clipped and unclipped.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct State {
    /// Visible version at the timestamp; `None` if absent, deleted or excluded.
    pub entity: Option<OsmEntity>,
    pub geometry: Geometry<f64>,
    pub unclipped: Geometry<f64>,
    pub classification: Classification,
    /// Clipped area shared with the outer way of an old-style multipolygon.
    pub duplicate_area: f64,
}

impl State {
    fn absent() -> Self {
        State {
            entity: None,
            geometry: crate::geometry::empty_geometry(),
            unclipped: crate::geometry::empty_geometry(),
            classification: Classification::Neither,
            duplicate_area: 0.0,
        }
    }

    /// Whether the entity shows up in the area of interest.
    pub fn is_present(&self, fully_inside: bool) -> bool {
        self.entity.is_some() && (fully_inside || !is_empty(&self.geometry))
    }
}

/// Iterates the entities of cells over a fixed time axis and area.
#[derive(Clone)]
pub struct CellIterator<'a> {
    timestamps: Vec<i64>,
    area: AreaOfInterest,
    interpreter: &'a TagInterpreter,
    entity_filter: Option<EntityFilter>,
    result_filter: Option<ResultFilter>,
    include_old_style_multipolygons: bool,
    lookup: &'a (dyn ChildLookup + Sync),
}

impl<'a> CellIterator<'a> {
    /// Timestamps are sorted and deduplicated. Snapshot queries visit each
    /// of them; contribution queries cover `[first, last)`.
    pub fn new(timestamps: impl IntoIterator<Item = i64>, area: AreaOfInterest, interpreter: &'a TagInterpreter) -> Self {
        let mut timestamps: Vec<i64> = timestamps.into_iter().collect();
        timestamps.sort_unstable();
        timestamps.dedup();
        CellIterator {
            timestamps,
            area,
            interpreter,
            entity_filter: None,
            result_filter: None,
            include_old_style_multipolygons: false,
            lookup: &NoLookup,
        }
    }

    pub fn with_entity_filter(mut self, filter: impl Fn(&EntityHistory) -> bool + Send + Sync + 'static) -> Self {
        self.entity_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_result_filter(
        mut self,
        filter: impl Fn(&OsmEntity, &Geometry<f64>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.result_filter = Some(Arc::new(filter));
        self
    }

    /// Whether relations tagged only `type=multipolygon` produce results.
    pub fn include_old_style_multipolygons(mut self, include: bool) -> Self {
        self.include_old_style_multipolygons = include;
        self
    }

    /// Resolves children that are stored outside the iterated cells.
    pub fn with_lookup(mut self, lookup: &'a (dyn ChildLookup + Sync)) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn area(&self) -> &AreaOfInterest {
        &self.area
    }

    pub fn interpreter(&self) -> &TagInterpreter {
        self.interpreter
    }

    /// Half-open interval covered by contribution queries.
    pub fn interval(&self) -> Option<(i64, i64)> {
        Some((*self.timestamps.first()?, *self.timestamps.last()?))
    }

    // =========================================================================
    // CELLS
    // =========================================================================

    /// Snapshots of every entity in `cell`.
    pub fn cell_snapshots(&self, cell: &Cell<'_>) -> Iteration<SnapshotEntry> {
        self.run_cell(cell, |history, diagnostics, out| {
            out.extend(self.snapshots(history, diagnostics))
        })
    }

    /// Contributions of every entity in `cell`.
    pub fn cell_contributions(&self, cell: &Cell<'_>) -> Iteration<ContributionEntry> {
        self.run_cell(cell, |history, diagnostics, out| {
            out.extend(self.contributions(history, diagnostics))
        })
    }

    /// Snapshots of `cell`, one group per entity.
    pub fn cell_snapshots_by_entity(&self, cell: &Cell<'_>) -> Iteration<Vec<SnapshotEntry>> {
        self.run_cell(cell, |history, diagnostics, out| {
            let entries = self.snapshots(history, diagnostics);
            if !entries.is_empty() {
                out.push(entries);
            }
        })
    }

    pub fn cell_contributions_by_entity(&self, cell: &Cell<'_>) -> Iteration<Vec<ContributionEntry>> {
        self.run_cell(cell, |history, diagnostics, out| {
            let entries = self.contributions(history, diagnostics);
            if !entries.is_empty() {
                out.push(entries);
            }
        })
    }

    fn run_cell<T>(
        &self,
        cell: &Cell<'_>,
        mut visit: impl FnMut(&EntityHistory, &mut Diagnostics, &mut Vec<T>),
    ) -> Iteration<T> {
        trace!(
            "iterating {} cell {}/{} with {} records",
            cell.kind.name(),
            cell.id.zoom,
            cell.id.id,
            cell.len()
        );
        let mut diagnostics = Diagnostics {
            cells: 1,
            ..Diagnostics::default()
        };
        let mut histories = Vec::with_capacity(cell.len());
        for (index, record) in cell.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("skipping corrupt record {} in cell {}/{}: {}", index, cell.id.zoom, cell.id.id, e);
                    diagnostics.corrupt_records += 1;
                    continue;
                }
            };
            if let Some(bbox) = record.bbox() {
                if !self.area.intersects_bbox(&bbox) {
                    diagnostics.entities += 1;
                    diagnostics.outside += 1;
                    continue;
                }
            }
            match record.to_history(self.lookup) {
                Ok(history) => histories.push(history),
                Err(e) => {
                    warn!("skipping corrupt record {} in cell {}/{}: {}", record.id(), cell.id.zoom, cell.id.id, e);
                    diagnostics.corrupt_records += 1;
                }
            }
        }
        let mut iteration = self.run(&histories, &mut visit);
        iteration.diagnostics.merge(&diagnostics);
        iteration
    }

    // =========================================================================
    // HISTORIES
    // =========================================================================

    /// Snapshots of the given entities, ordered by entity id.
    pub fn iterate_snapshots<'h>(
        &self,
        histories: impl IntoIterator<Item = &'h EntityHistory>,
    ) -> Iteration<SnapshotEntry> {
        self.run(histories, |history, diagnostics, out: &mut Vec<SnapshotEntry>| {
            out.extend(self.snapshots(history, diagnostics))
        })
    }

    /// Contributions of the given entities, ordered by entity id.
    pub fn iterate_contributions<'h>(
        &self,
        histories: impl IntoIterator<Item = &'h EntityHistory>,
    ) -> Iteration<ContributionEntry> {
        self.run(histories, |history, diagnostics, out: &mut Vec<ContributionEntry>| {
            out.extend(self.contributions(history, diagnostics))
        })
    }

    fn run<'h, T>(
        &self,
        histories: impl IntoIterator<Item = &'h EntityHistory>,
        mut visit: impl FnMut(&EntityHistory, &mut Diagnostics, &mut Vec<T>),
    ) -> Iteration<T> {
        let mut sorted: Vec<&EntityHistory> = histories.into_iter().collect();
        sorted.sort_by_key(|h| (h.id(), h.kind()));
        let mut iteration = Iteration {
            entries: Vec::new(),
            diagnostics: Diagnostics::default(),
        };
        for history in sorted {
            visit(history, &mut iteration.diagnostics, &mut iteration.entries);
        }
        iteration
    }

    // =========================================================================
    // ONE ENTITY
    // =========================================================================

    /// Applies the entity filter and the bounding box reject. Returns the
    /// bounding box and whether it lies fully inside the area of interest.
    pub(crate) fn admit(&self, history: &EntityHistory, diagnostics: &mut Diagnostics) -> Option<(BoundingBox, bool)> {
        diagnostics.entities += 1;
        if let Some(filter) = &self.entity_filter {
            if !filter(history) {
                diagnostics.filtered += 1;
                return None;
            }
        }
        let Some(bbox) = history.bbox() else {
            diagnostics.without_coordinates += 1;
            return None;
        };
        if !self.area.intersects_bbox(&bbox) {
            diagnostics.outside += 1;
            return None;
        }
        Some((bbox, self.area.contains_bbox(&bbox)))
    }

    pub(crate) fn accepts(&self, entity: &OsmEntity, geometry: &Geometry<f64>) -> bool {
        self.result_filter
            .as_ref()
            .is_none_or(|filter| filter(entity, geometry))
    }

    /// State of `history` at `t`.
    pub(crate) fn state_at(
        &self,
        history: &EntityHistory,
        t: i64,
        fully_inside: bool,
        diagnostics: &mut Diagnostics,
    ) -> State {
        let Some(entity) = history.at(t).filter(OsmEntity::is_visible) else {
            return State::absent();
        };
        if let OsmEntity::Relation(relation) = &entity {
            if !self.include_old_style_multipolygons && self.interpreter.is_old_style_multipolygon(relation) {
                return State::absent();
            }
        }
        let built = build_geometry(history, t, self.interpreter);
        diagnostics.record_geometry(&built);
        let geometry = if fully_inside {
            built.geometry.clone()
        } else {
            clip(&built.geometry, &self.area)
        };
        let duplicate_area = match (&entity, history) {
            (OsmEntity::Relation(relation), EntityHistory::Relation(members))
                if self.interpreter.is_old_style_multipolygon(relation) =>
            {
                self.duplicate_area(relation, members, t, fully_inside, diagnostics)
            }
            _ => 0.0,
        };
        State {
            entity: Some(entity),
            geometry,
            unclipped: built.geometry,
            classification: built.classification,
            duplicate_area,
        }
    }

    /// Area the outer way of an old-style multipolygon already contributes
    /// as a standalone polygon, clipped like the relation itself.
    fn duplicate_area(
        &self,
        relation: &OsmRelation,
        members: &RelationHistory,
        t: i64,
        fully_inside: bool,
        diagnostics: &mut Diagnostics,
    ) -> f64 {
        match old_style_duplicate(relation, members, t, self.interpreter) {
            Ok(Some(outline)) => {
                let outline = Geometry::Polygon(outline);
                if fully_inside {
                    geodesic_area(&outline)
                } else {
                    geodesic_area(&clip(&outline, &self.area))
                }
            }
            Ok(None) => 0.0,
            Err(e) => {
                debug!("relation {} at {}: {}", relation.meta.id, t, e);
                diagnostics.unsupported_old_style += 1;
                0.0
            }
        }
    }
}
