//! Where cell blobs come from.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use log::debug;
use rustc_hash::FxHashMap;

use crate::codec::CellBuilder;
use crate::error::EncodeError;
use crate::grid::{storage_cell, CellId};
use crate::model::{EntityHistory, OsmType};

/// Byte-range fetch of one stored cell.
///
/// Returns `None` when no cell of that type exists at that address. The
/// bytes may be plain or zstd-compressed cells.
pub trait CellSource {
    fn get(&self, zoom: u8, cell_id: u64, kind: OsmType) -> Option<Cow<'_, [u8]>>;

    /// Ids of the stored cells of `kind` at `zoom` within `range`, ascending.
    ///
    /// Query ranges at deep zoom levels span millions of ids, so this should
    /// come from the source's own index rather than from probing `get`.
    fn stored_ids(&self, zoom: u8, range: RangeInclusive<u64>, kind: OsmType) -> Vec<u64>;
}

/// Cells held in memory, keyed by cell and type.
#[derive(Debug, Clone, Default)]
pub struct MemoryCellSource {
    cells: FxHashMap<(CellId, OsmType), Vec<u8>>,
    index: BTreeSet<(OsmType, u8, u64)>,
}

impl MemoryCellSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cell: CellId, kind: OsmType, bytes: Vec<u8>) {
        self.cells.insert((cell, kind), bytes);
        self.index.insert((kind, cell.zoom, cell.id));
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Stored bytes over all cells.
    pub fn total_bytes(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellId, OsmType, &[u8])> {
        self.cells
            .iter()
            .map(|(&(cell, kind), bytes)| (cell, kind, bytes.as_slice()))
    }

    /// Packs each history into its storage cell on zoom levels up to
    /// `max_zoom`. With `compression`, cells are zstd-compressed at that level.
    pub fn pack(
        histories: impl IntoIterator<Item = EntityHistory>,
        max_zoom: u8,
        compression: Option<i32>,
    ) -> Result<Self, EncodeError> {
        let mut builders: BTreeMap<(CellId, OsmType), CellBuilder> = BTreeMap::new();
        for history in histories {
            let cell = storage_cell(history.bbox(), max_zoom);
            let kind = history.kind();
            builders
                .entry((cell, kind))
                .or_insert_with(|| CellBuilder::new(cell, kind))
                .push(history)?;
        }

        let mut source = MemoryCellSource::new();
        for ((cell, kind), builder) in builders {
            let bytes = match compression {
                Some(level) => builder.build_compressed(level)?,
                None => builder.build()?,
            };
            debug!(
                "packed {} {}s into cell {}/{} ({} bytes)",
                builder.len(),
                kind.name(),
                cell.zoom,
                cell.id,
                bytes.len()
            );
            source.insert(cell, kind, bytes);
        }
        Ok(source)
    }
}

impl CellSource for MemoryCellSource {
    fn get(&self, zoom: u8, cell_id: u64, kind: OsmType) -> Option<Cow<'_, [u8]>> {
        self.cells
            .get(&(CellId::new(zoom, cell_id), kind))
            .map(|bytes| Cow::Borrowed(bytes.as_slice()))
    }

    fn stored_ids(&self, zoom: u8, range: RangeInclusive<u64>, kind: OsmType) -> Vec<u64> {
        let (start, end) = range.into_inner();
        if start > end {
            return Vec::new();
        }
        self.index
            .range((kind, zoom, start)..=(kind, zoom, end))
            .map(|&(_, _, id)| id)
            .collect()
    }
}
