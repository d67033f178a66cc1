//! Entity state at requested timestamps.

use geo_types::Geometry;

use crate::geometry::geodesic_area;
use crate::iterate::{CellIterator, Diagnostics, State};
use crate::model::{EntityHistory, OsmEntity, OsmType};
use crate::tags::Classification;

/// One entity as it was at one requested timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    /// The requested timestamp, not the version's.
    pub timestamp: i64,
    pub entity: OsmEntity,
    /// Geometry clipped to the area of interest.
    pub geometry: Geometry<f64>,
    pub unclipped: Geometry<f64>,
    pub classification: Classification,
    /// Clipped area this entry shares with a way that is its own snapshot:
    /// the outline of an old-style multipolygon. Zero for everything else.
    pub duplicate_area: f64,
}

impl SnapshotEntry {
    pub fn id(&self) -> i64 {
        self.entity.id()
    }

    pub fn kind(&self) -> OsmType {
        self.entity.kind()
    }

    /// Clipped area in square meters, less [`SnapshotEntry::duplicate_area`].
    /// Summing this over ways and relations counts each outline once.
    pub fn area(&self) -> f64 {
        geodesic_area(&self.geometry) - self.duplicate_area
    }
}

/// Whether any of the sorted `changes` falls in `(after, upto]`.
fn changed_between(changes: &[i64], after: i64, upto: i64) -> bool {
    let i = changes.partition_point(|&c| c <= after);
    changes.get(i).is_some_and(|&c| c <= upto)
}

impl CellIterator<'_> {
    /// Snapshots of one entity at every timestamp of the iterator.
    ///
    /// An entity visible at a timestamp is emitted when its bounding box lies
    /// inside the area of interest or its clipped geometry is non-empty.
    /// Geometry is rebuilt only when the entity or one of its children has
    /// changed since the previous timestamp.
    pub fn snapshots(&self, history: &EntityHistory, diagnostics: &mut Diagnostics) -> Vec<SnapshotEntry> {
        let Some((_, fully_inside)) = self.admit(history, diagnostics) else {
            return Vec::new();
        };
        let changes = history.modification_timestamps();

        let mut out = Vec::new();
        let mut cached: Option<(i64, State)> = None;
        for &t in self.timestamps() {
            let stale = match &cached {
                Some((at, _)) => changed_between(&changes, *at, t),
                None => true,
            };
            if stale {
                cached = Some((t, self.state_at(history, t, fully_inside, diagnostics)));
            }
            let Some((_, state)) = &cached else {
                continue;
            };
            let Some(entity) = &state.entity else {
                continue;
            };
            if !state.is_present(fully_inside) || !self.accepts(entity, &state.geometry) {
                continue;
            }
            out.push(SnapshotEntry {
                timestamp: t,
                entity: entity.clone(),
                geometry: state.geometry.clone(),
                unclipped: state.unclipped.clone(),
                classification: state.classification,
                duplicate_area: state.duplicate_area,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AreaOfInterest;
    use crate::iterate::fixtures::{node_history, square_nodes, way_history, Fixture};
    use crate::model::builder::{node, relation, way};
    use crate::model::{BoundingBox, NodeHistory, RelationHistory, Tag, WayHistory};
    use geo_types::Coord;
    use proptest::prelude::*;

    fn world() -> AreaOfInterest {
        AreaOfInterest::Bbox(BoundingBox::world())
    }

    fn coords(geometry: &Geometry<f64>) -> Vec<(f64, f64)> {
        let to_pair = |c: &Coord<f64>| ((c.x * 1e7).round() / 1e7, (c.y * 1e7).round() / 1e7);
        match geometry {
            Geometry::LineString(ls) => ls.0.iter().map(to_pair).collect(),
            Geometry::Polygon(p) => p.exterior().0.iter().map(to_pair).collect(),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_changed_between() {
        let changes = [10, 20, 30];
        assert!(!changed_between(&changes, 10, 19));
        assert!(changed_between(&changes, 10, 20));
        assert!(changed_between(&changes, 5, 10));
        assert!(!changed_between(&changes, 30, 100));
    }

    #[test]
    fn test_drinking_water_node_snapshot() {
        let f = Fixture::new();
        let (k, v) = f.tag("amenity", "drinking_water");
        let history = EntityHistory::Node(node_history(vec![
            node(300, 1, 1_000).at_degrees(8.67, 49.41).build(),
            node(300, 2, 2_000).at_degrees(8.67, 49.41).tag(k, v).build(),
        ]));

        let iterator = CellIterator::new([2_000], world(), &f.interpreter);
        let result = iterator.iterate_snapshots([&history]);
        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(entry.id(), 300);
        assert_eq!(entry.timestamp, 2_000);
        assert!(!f.interpreter.is_area(&entry.entity));
        assert_ne!(entry.classification, Classification::Area);
        assert!(entry.entity.meta().has_tag(Tag::new(k, v)));
        assert!(matches!(entry.geometry, Geometry::Point(_)));
    }

    #[test]
    fn test_node_before_creation_and_after_deletion() {
        let f = Fixture::new();
        let history = EntityHistory::Node(node_history(vec![
            node(5, 1, 1_000).at_degrees(1.0, 1.0).build(),
            node(5, 2, 3_000).deleted().build(),
        ]));
        let iterator = CellIterator::new([500, 1_000, 2_000, 3_000, 4_000], world(), &f.interpreter);
        let stamps: Vec<i64> = iterator
            .iterate_snapshots([&history])
            .entries
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(stamps, vec![1_000, 2_000]);
    }

    #[test]
    fn test_closed_outer_way_gives_polygon() {
        let f = Fixture::new();
        let (tk, tv) = f.tag("type", "multipolygon");
        let (nk, nv) = f.tag("natural", "water");
        let outer = f.role("outer");
        let w1 = way_history(1, &[1, 2, 3, 1], &[], square_nodes());
        let rel = relation(77, 1, 0)
            .tag(tk, tv)
            .tag(nk, nv)
            .way_member(1, outer)
            .build();
        let history = EntityHistory::Relation(
            RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), [w1]).unwrap(),
        );

        let iterator = CellIterator::new([10], world(), &f.interpreter);
        let result = iterator.iterate_snapshots([&history]);
        assert_eq!(result.entries.len(), 1);
        assert!(matches!(result.entries[0].geometry, Geometry::Polygon(_)));
        assert_eq!(result.entries[0].classification, Classification::Area);
    }

    #[test]
    fn test_two_outer_ways_join_into_one_ring() {
        let f = Fixture::new();
        let (tk, tv) = f.tag("type", "multipolygon");
        let (nk, nv) = f.tag("natural", "water");
        let outer = f.role("outer");
        let w1 = way_history(1, &[1, 2, 3], &[], square_nodes());
        let w2 = way_history(2, &[3, 4, 1], &[], square_nodes());
        let rel = relation(78, 1, 0)
            .tag(tk, tv)
            .tag(nk, nv)
            .way_member(1, outer)
            .way_member(2, outer)
            .build();
        let history = EntityHistory::Relation(
            RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), [w1, w2]).unwrap(),
        );

        let iterator = CellIterator::new([10], world(), &f.interpreter);
        let result = iterator.iterate_snapshots([&history]);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(
            coords(&result.entries[0].geometry),
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
        );
    }

    #[test]
    fn test_deleted_node_shortens_line() {
        let f = Fixture::new();
        let highway = f.tag("highway", "residential");
        let mut nodes = square_nodes();
        nodes[1] = node_history(vec![
            node(2, 1, 0).at_degrees(1.0, 0.0).build(),
            node(2, 2, 2_000).deleted().build(),
        ]);
        let history = EntityHistory::Way(way_history(10, &[1, 2, 3], &[highway], nodes));

        let iterator = CellIterator::new([1_000, 2_000], world(), &f.interpreter);
        let result = iterator.iterate_snapshots([&history]);
        let lengths: Vec<usize> = result.entries.iter().map(|e| coords(&e.geometry).len()).collect();
        assert_eq!(lengths, vec![3, 2]);
        assert_eq!(result.entries[1].timestamp, 2_000);
    }

    #[test]
    fn test_partially_inside_is_clipped() {
        let f = Fixture::new();
        let highway = f.tag("highway", "residential");
        let history = EntityHistory::Way(way_history(11, &[1, 2, 3], &[highway], square_nodes()));
        let area = AreaOfInterest::Bbox(BoundingBox::from_degrees(-0.5, -0.5, 0.5, 0.5));

        let iterator = CellIterator::new([10], area, &f.interpreter);
        let result = iterator.iterate_snapshots([&history]);
        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(coords(&entry.unclipped).len(), 3);
        assert_eq!(coords(&entry.geometry), vec![(0.0, 0.0), (0.5, 0.0)]);
    }

    #[test]
    fn test_outside_and_filtered_entities_are_counted() {
        let f = Fixture::new();
        let near = EntityHistory::Node(node_history(vec![node(1, 1, 0).at_degrees(0.5, 0.5).build()]));
        let far = EntityHistory::Node(node_history(vec![node(2, 1, 0).at_degrees(50.0, 50.0).build()]));
        let odd = EntityHistory::Node(node_history(vec![node(3, 1, 0).at_degrees(0.6, 0.6).build()]));
        let area = AreaOfInterest::Bbox(BoundingBox::from_degrees(0.0, 0.0, 1.0, 1.0));

        let iterator = CellIterator::new([10], area, &f.interpreter).with_entity_filter(|h| h.id() != 3);
        let result = iterator.iterate_snapshots([&far, &odd, &near]);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].id(), 1);
        assert_eq!(result.diagnostics.entities, 3);
        assert_eq!(result.diagnostics.outside, 1);
        assert_eq!(result.diagnostics.filtered, 1);
    }

    #[test]
    fn test_result_filter_sees_entity_and_geometry() {
        let f = Fixture::new();
        let (k, v) = f.tag("amenity", "drinking_water");
        let history = EntityHistory::Node(node_history(vec![
            node(300, 1, 1_000).at_degrees(1.0, 1.0).build(),
            node(300, 2, 2_000).at_degrees(1.0, 1.0).tag(k, v).build(),
        ]));
        let iterator = CellIterator::new([1_500, 2_500], world(), &f.interpreter)
            .with_result_filter(move |entity, geometry| {
                entity.meta().has_tag_key(k) && matches!(geometry, Geometry::Point(_))
            });
        let result = iterator.iterate_snapshots([&history]);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].timestamp, 2_500);
    }

    #[test]
    fn test_results_are_ordered_by_id() {
        let f = Fixture::new();
        let histories: Vec<EntityHistory> = [9, 3, 6]
            .iter()
            .map(|&id| EntityHistory::Node(node_history(vec![node(id, 1, 0).at_degrees(1.0, 1.0).build()])))
            .collect();
        let iterator = CellIterator::new([20, 10], world(), &f.interpreter);
        let order: Vec<(i64, i64)> = iterator
            .iterate_snapshots(&histories)
            .entries
            .iter()
            .map(|e| (e.id(), e.timestamp))
            .collect();
        assert_eq!(order, vec![(3, 10), (3, 20), (6, 10), (6, 20), (9, 10), (9, 20)]);
    }

    #[test]
    fn test_old_style_multipolygon_is_optional() {
        let f = Fixture::new();
        let (tk, tv) = f.tag("type", "multipolygon");
        let outer = f.role("outer");
        let w1 = way_history(1, &[1, 2, 3, 4, 1], &[], square_nodes());
        let rel = relation(80, 1, 0).tag(tk, tv).way_member(1, outer).build();
        let history = EntityHistory::Relation(
            RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), [w1]).unwrap(),
        );

        let excluded = CellIterator::new([10], world(), &f.interpreter);
        assert!(excluded.iterate_snapshots([&history]).entries.is_empty());
        let included = excluded.clone().include_old_style_multipolygons(true);
        assert_eq!(included.iterate_snapshots([&history]).entries.len(), 1);
    }

    #[test]
    fn test_old_style_outline_area_is_marked_duplicate() {
        let f = Fixture::new();
        let (tk, tv) = f.tag("type", "multipolygon");
        let building = f.tag("building", "yes");
        let outer = f.role("outer");
        let iterator = CellIterator::new([10], world(), &f.interpreter).include_old_style_multipolygons(true);
        let old_style = |way_tags: &[(u32, u32)], ways: &[i64]| {
            let mut rel = relation(80, 1, 0).tag(tk, tv);
            let mut members = Vec::new();
            for &id in ways {
                rel = rel.way_member(id, outer);
                members.push(way_history(id, &[1, 2, 3, 4, 1], way_tags, square_nodes()));
            }
            EntityHistory::Relation(
                RelationHistory::new(vec![rel.build()], Vec::<NodeHistory>::new(), members).unwrap(),
            )
        };

        let tagged = iterator.iterate_snapshots([&old_style(&[building], &[1])]);
        let entry = &tagged.entries[0];
        assert!((entry.duplicate_area - 1.2308e10).abs() / 1.2308e10 < 0.01);
        assert!(entry.area().abs() < 1.0);

        // an untagged outline is not an area of its own
        let untagged = iterator.iterate_snapshots([&old_style(&[], &[1])]);
        assert_eq!(untagged.entries[0].duplicate_area, 0.0);

        let two_outers = iterator.iterate_snapshots([&old_style(&[building], &[1, 2])]);
        assert_eq!(two_outers.entries[0].duplicate_area, 0.0);
        assert_eq!(two_outers.diagnostics.unsupported_old_style, 1);
    }

    #[test]
    fn test_child_move_rebuilds_cached_geometry() {
        let f = Fixture::new();
        let highway = f.tag("highway", "residential");
        let mut nodes = square_nodes();
        nodes[0] = node_history(vec![
            node(1, 1, 0).at_degrees(0.0, 0.0).build(),
            node(1, 2, 500).at_degrees(0.0, -1.0).build(),
        ]);
        let history = EntityHistory::Way(WayHistory::new(
            vec![way(12, 1, 0).refs([1, 2]).tag(highway.0, highway.1).build()],
            nodes,
        )
        .unwrap());
        let iterator = CellIterator::new([100, 200, 600], world(), &f.interpreter);
        let firsts: Vec<(f64, f64)> = iterator
            .iterate_snapshots([&history])
            .entries
            .iter()
            .map(|e| coords(&e.geometry)[0])
            .collect();
        assert_eq!(firsts, vec![(0.0, 0.0), (0.0, 0.0), (0.0, -1.0)]);
    }

    fn arb_node_versions() -> impl Strategy<Value = Vec<crate::model::OsmNode>> {
        prop::collection::vec((1i64..1_000, any::<bool>()), 1..8).prop_map(|steps| {
            let mut t = 0;
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (dt, visible))| {
                    t += dt;
                    let b = node(1, i as u32 + 1, t);
                    if visible { b.at(i as i64, 0).build() } else { b.deleted().build() }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_snapshot_versions_are_monotonic(
            versions in arb_node_versions(),
            stamps in prop::collection::vec(0i64..8_000, 1..12),
        ) {
            let f = Fixture::new();
            let history = EntityHistory::Node(NodeHistory::new(versions).unwrap());
            let iterator = CellIterator::new(stamps, world(), &f.interpreter);
            let entries = iterator.iterate_snapshots([&history]).entries;

            let mut last_version = 0;
            for entry in &entries {
                let meta = entry.entity.meta();
                prop_assert!(meta.timestamp <= entry.timestamp);
                prop_assert!(meta.version >= last_version);
                let expected = history.at(entry.timestamp).unwrap();
                prop_assert_eq!(expected.meta().version, meta.version);
                last_version = meta.version;
            }
            for window in entries.windows(2) {
                prop_assert!(window[0].timestamp < window[1].timestamp);
            }
        }
    }
}
