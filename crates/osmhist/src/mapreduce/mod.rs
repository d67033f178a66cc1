//! Local map-reduce over the cells of a [`CellSource`].
//!
//! Cells are processed in parallel on a rayon pool. Each cell is folded into
//! its own accumulator starting from `identity()`, and accumulators are merged
//! with `combine` in no particular order. `combine` must therefore be
//! associative and commutative, with `identity()` as its neutral element.

mod source;

pub use source::{CellSource, MemoryCellSource};

use std::collections::BTreeMap;

use log::{debug, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::codec::{cell_bytes, decode_cell, Cell};
use crate::config::QueryConfig;
use crate::error::ConfigError;
use crate::geometry::geodesic_area;
use crate::grid::{CellId, XyGrid, MAX_ZOOM};
use crate::iterate::{CellIterator, ContributionEntry, Diagnostics, Iteration, SnapshotEntry};
use crate::model::OsmType;
use crate::tags::TagInterpreter;

/// Result of a reduction together with the merged diagnostics of every cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced<R> {
    pub result: R,
    pub diagnostics: Diagnostics,
}

/// Merges two keyed accumulators, combining values that share a key.
pub fn merge_by_key<K: Ord, R>(
    mut a: BTreeMap<K, R>,
    b: BTreeMap<K, R>,
    combine: impl Fn(R, R) -> R,
) -> BTreeMap<K, R> {
    for (key, value) in b {
        let merged = match a.remove(&key) {
            Some(existing) => combine(existing, value),
            None => value,
        };
        a.insert(key, merged);
    }
    a
}

/// Runs snapshot or contribution queries over every cell a query touches.
pub struct MapReducer<'a, S: ?Sized> {
    source: &'a S,
    iterator: CellIterator<'a>,
    types: Vec<OsmType>,
    max_zoom: u8,
    pool: Option<ThreadPool>,
}

impl<'a, S: CellSource + Sync + ?Sized> MapReducer<'a, S> {
    /// All types, all zoom levels, the global rayon pool.
    pub fn new(source: &'a S, iterator: CellIterator<'a>) -> Self {
        MapReducer {
            source,
            iterator,
            types: OsmType::ALL.to_vec(),
            max_zoom: MAX_ZOOM,
            pool: None,
        }
    }

    pub fn from_config(
        source: &'a S,
        config: &QueryConfig,
        interpreter: &'a TagInterpreter,
    ) -> Result<Self, ConfigError> {
        let iterator = CellIterator::new(config.time_axis()?, config.area_of_interest()?, interpreter)
            .include_old_style_multipolygons(config.include_old_style_multipolygons);
        let reducer = MapReducer::new(source, iterator)
            .types(config.types.iter().copied())
            .max_zoom(config.max_zoom);
        match config.threads {
            Some(threads) => reducer.threads(threads),
            None => Ok(reducer),
        }
    }

    pub fn types(mut self, types: impl IntoIterator<Item = OsmType>) -> Self {
        let mut types: Vec<OsmType> = types.into_iter().collect();
        types.sort_unstable();
        types.dedup();
        self.types = types;
        self
    }

    /// Deepest zoom level searched. Must be at least the level cells were
    /// packed with.
    pub fn max_zoom(mut self, max_zoom: u8) -> Self {
        self.max_zoom = max_zoom.min(MAX_ZOOM);
        self
    }

    /// Runs on a dedicated pool of `threads` workers.
    pub fn threads(mut self, threads: usize) -> Result<Self, ConfigError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "threads",
                message: e.to_string(),
            })?;
        self.pool = Some(pool);
        Ok(self)
    }

    pub fn iterator(&self) -> &CellIterator<'a> {
        &self.iterator
    }

    /// Every stored cell and type the query visits: cells on zoom levels
    /// up to `max_zoom` that intersect the area of interest.
    pub fn cells(&self) -> Vec<(CellId, OsmType)> {
        let bbox = self.iterator.area().bbox();
        let mut cells = Vec::new();
        for zoom in 0..=self.max_zoom {
            let grid = XyGrid::new(zoom);
            for range in grid.bbox_to_cell_ranges(&bbox, false) {
                for &kind in &self.types {
                    let ids = self.source.stored_ids(zoom, range.clone(), kind);
                    cells.extend(ids.into_iter().map(|id| (CellId::new(zoom, id), kind)));
                }
            }
        }
        cells
    }

    // =========================================================================
    // CORE
    // =========================================================================

    fn open_and_iterate<T>(
        &self,
        cell: CellId,
        kind: OsmType,
        per_cell: &(impl Fn(&CellIterator<'a>, &Cell<'_>) -> Iteration<T> + Sync),
        diagnostics: &mut Diagnostics,
    ) -> Option<Vec<T>> {
        let raw = self.source.get(cell.zoom, cell.id, kind)?;
        let data = match cell_bytes(&raw) {
            Ok(data) => data,
            Err(e) => {
                warn!("skipping {} cell {}/{}: {}", kind.name(), cell.zoom, cell.id, e);
                diagnostics.corrupt_cells += 1;
                return None;
            }
        };
        let decoded = match decode_cell(&data) {
            Ok(decoded) if decoded.kind == kind && decoded.id == cell => decoded,
            Ok(decoded) => {
                warn!(
                    "skipping cell {}/{}: holds {} cell {}/{}",
                    cell.zoom,
                    cell.id,
                    decoded.kind.name(),
                    decoded.id.zoom,
                    decoded.id.id
                );
                diagnostics.corrupt_cells += 1;
                return None;
            }
            Err(e) => {
                warn!("skipping {} cell {}/{}: {}", kind.name(), cell.zoom, cell.id, e);
                diagnostics.corrupt_cells += 1;
                return None;
            }
        };
        let iteration = per_cell(&self.iterator, &decoded);
        diagnostics.merge(&iteration.diagnostics);
        Some(iteration.entries)
    }

    fn run<T, R, P, I, F, C>(&self, per_cell: P, identity: I, fold: F, combine: C) -> Reduced<R>
    where
        R: Send,
        P: Fn(&CellIterator<'a>, &Cell<'_>) -> Iteration<T> + Sync,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, T) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        let cells = self.cells();
        debug!("map-reduce over {} cell/type pairs", cells.len());
        let job = || {
            cells
                .par_iter()
                .map(|&(cell, kind)| {
                    let mut diagnostics = Diagnostics::default();
                    let result = match self.open_and_iterate(cell, kind, &per_cell, &mut diagnostics) {
                        Some(entries) => entries.into_iter().fold(identity(), &fold),
                        None => identity(),
                    };
                    Reduced { result, diagnostics }
                })
                .reduce(
                    || Reduced {
                        result: identity(),
                        diagnostics: Diagnostics::default(),
                    },
                    |a, b| Reduced {
                        result: combine(a.result, b.result),
                        diagnostics: a.diagnostics.merged(&b.diagnostics),
                    },
                )
        };
        match &self.pool {
            Some(pool) => pool.install(job),
            None => job(),
        }
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Folds every snapshot entry.
    pub fn map_reduce_snapshots<R, I, F, C>(&self, identity: I, fold: F, combine: C) -> Reduced<R>
    where
        R: Send,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, SnapshotEntry) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        self.run(|it, cell| it.cell_snapshots(cell), identity, fold, combine)
    }

    /// Folds the snapshots of each entity as one group, in timestamp order.
    pub fn map_reduce_snapshot_groups<R, I, F, C>(&self, identity: I, fold: F, combine: C) -> Reduced<R>
    where
        R: Send,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, Vec<SnapshotEntry>) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        self.run(|it, cell| it.cell_snapshots_by_entity(cell), identity, fold, combine)
    }

    /// Every snapshot entry, ordered by type, id and timestamp.
    pub fn collect_snapshots(&self) -> Reduced<Vec<SnapshotEntry>> {
        let mut reduced = self.map_reduce_snapshots(Vec::new, push, concat);
        reduced
            .result
            .sort_by_key(|e| (e.kind(), e.id(), e.timestamp));
        reduced
    }

    /// Folds snapshot entries separately per requested timestamp. Every
    /// timestamp is present in the result, `identity()` where nothing matched.
    pub fn aggregate_snapshots_by_timestamp<R, I, F, C>(
        &self,
        identity: I,
        fold: F,
        combine: C,
    ) -> Reduced<BTreeMap<i64, R>>
    where
        R: Send,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, &SnapshotEntry) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        let mut reduced = self.map_reduce_snapshots(
            BTreeMap::new,
            |mut acc: BTreeMap<i64, R>, entry| {
                let value = acc.remove(&entry.timestamp).unwrap_or_else(&identity);
                acc.insert(entry.timestamp, fold(value, &entry));
                acc
            },
            |a, b| merge_by_key(a, b, &combine),
        );
        for &t in self.iterator.timestamps() {
            reduced.result.entry(t).or_insert_with(&identity);
        }
        reduced
    }

    pub fn count_snapshots_by_timestamp(&self) -> Reduced<BTreeMap<i64, u64>> {
        self.aggregate_snapshots_by_timestamp(|| 0, |n, _| n + 1, |a, b| a + b)
    }

    /// Clipped area in square meters per timestamp.
    ///
    /// When ways are aggregated too, an included old-style multipolygon
    /// subtracts the area of its outer way, so the outline counts once.
    pub fn sum_area_by_timestamp(&self) -> Reduced<BTreeMap<i64, f64>> {
        let with_ways = self.types.contains(&OsmType::Way);
        self.aggregate_snapshots_by_timestamp(
            || 0.0,
            move |sum, e| {
                if with_ways {
                    sum + e.area()
                } else {
                    sum + geodesic_area(&e.geometry)
                }
            },
            |a, b| a + b,
        )
    }

    // =========================================================================
    // CONTRIBUTIONS
    // =========================================================================

    /// Folds every contribution entry.
    pub fn map_reduce_contributions<R, I, F, C>(&self, identity: I, fold: F, combine: C) -> Reduced<R>
    where
        R: Send,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, ContributionEntry) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        self.run(|it, cell| it.cell_contributions(cell), identity, fold, combine)
    }

    /// Folds the contributions of each entity as one group, in timestamp order.
    pub fn map_reduce_contribution_groups<R, I, F, C>(&self, identity: I, fold: F, combine: C) -> Reduced<R>
    where
        R: Send,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, Vec<ContributionEntry>) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        self.run(|it, cell| it.cell_contributions_by_entity(cell), identity, fold, combine)
    }

    pub fn collect_contributions(&self) -> Reduced<Vec<ContributionEntry>> {
        let mut reduced = self.map_reduce_contributions(Vec::new, push, concat);
        reduced
            .result
            .sort_by_key(|e| (e.kind(), e.id(), e.timestamp));
        reduced
    }

    /// Folds contributions per time bin. A contribution at `t` falls into the
    /// bin of the latest requested timestamp `<= t`.
    pub fn aggregate_contributions_by_timestamp<R, I, F, C>(
        &self,
        identity: I,
        fold: F,
        combine: C,
    ) -> Reduced<BTreeMap<i64, R>>
    where
        R: Send,
        I: Fn() -> R + Sync + Send,
        F: Fn(R, &ContributionEntry) -> R + Sync + Send,
        C: Fn(R, R) -> R + Sync + Send,
    {
        let timestamps = self.iterator.timestamps();
        let bin = |t: i64| {
            let i = timestamps.partition_point(|&s| s <= t);
            timestamps[i.saturating_sub(1)]
        };
        let mut reduced = self.map_reduce_contributions(
            BTreeMap::new,
            |mut acc: BTreeMap<i64, R>, entry| {
                let key = bin(entry.timestamp);
                let value = acc.remove(&key).unwrap_or_else(&identity);
                acc.insert(key, fold(value, &entry));
                acc
            },
            |a, b| merge_by_key(a, b, &combine),
        );
        if let Some((_, rest)) = timestamps.split_last() {
            for &t in rest {
                reduced.result.entry(t).or_insert_with(&identity);
            }
        }
        reduced
    }
}

fn push<T>(mut acc: Vec<T>, item: T) -> Vec<T> {
    acc.push(item);
    acc
}

fn concat<T>(mut a: Vec<T>, mut b: Vec<T>) -> Vec<T> {
    a.append(&mut b);
    a
}
