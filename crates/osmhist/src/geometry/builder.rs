//! Geometry of an entity version at a point in time.
//!
//! Children are resolved at the same timestamp as the parent. Missing or
//! deleted children are dropped; when that makes the requested geometry type
//! impossible a simpler geometry is returned and the result is marked as
//! degraded.

use geo::{Area, Contains};
use geo_types::{Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use log::debug;

use crate::error::GeometryError;
use crate::geometry::clip::empty_geometry;
use crate::geometry::ring::{join_rings, WaySegment};
use crate::model::{
    EntityHistory, Location, NodeHistory, OsmNode, OsmRelation, OsmType, OsmWay, RelationHistory,
    WayHistory,
};
use crate::tags::{Classification, TagInterpreter};

/// Geometry of one entity version.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltGeometry {
    pub geometry: Geometry<f64>,
    pub classification: Classification,
    /// Inner rings that no outer ring contains.
    pub unmatched_inners: usize,
    /// A fallback geometry replaced the requested one.
    pub degraded: bool,
}

impl BuiltGeometry {
    fn new(geometry: Geometry<f64>, classification: Classification) -> Self {
        Self {
            geometry,
            classification,
            unmatched_inners: 0,
            degraded: false,
        }
    }

    fn empty(classification: Classification) -> Self {
        Self::new(empty_geometry(), classification)
    }
}

/// Visible location of a node at `t`.
pub(crate) fn node_location(node: Option<&NodeHistory>, t: i64) -> Option<Location> {
    node?.at(t)?.location
}

/// Resolves the node references of `way` at `t`, skipping absent nodes.
pub(crate) fn resolve_way<'h>(
    way: &OsmWay,
    nodes: impl Fn(i64) -> Option<&'h NodeHistory>,
    t: i64,
) -> WaySegment {
    let mut ids = Vec::with_capacity(way.refs.len());
    let mut coords = Vec::with_capacity(way.refs.len());
    for &id in &way.refs {
        if let Some(location) = node_location(nodes(id), t) {
            ids.push(id);
            coords.push(location.to_coord());
        }
    }
    WaySegment::new(ids, coords)
}

/// Visible version of a relation's way member at `t`, with its nodes resolved.
pub(crate) fn resolve_member_way(history: &RelationHistory, id: i64, t: i64) -> Option<(&OsmWay, WaySegment)> {
    let way_history = history.way(id)?;
    let version = way_history.at(t).filter(|w| w.meta.visible)?;
    Some((version, resolve_way(version, |n| way_history.node(n), t)))
}

/// Closed ring as a polygon without holes.
pub fn ring_polygon(segment: &WaySegment) -> Result<Polygon<f64>, GeometryError> {
    if segment.len() < 4 {
        return Err(GeometryError::TooFewCoordinates {
            count: segment.len(),
        });
    }
    if !segment.is_closed() {
        return Err(GeometryError::UnclosedRing {
            first: segment.ids[0],
            last: segment.ids[segment.len() - 1],
        });
    }
    Ok(Polygon::new(segment.to_line_string(), Vec::new()))
}

fn line_or_empty(segment: &WaySegment) -> Option<LineString<f64>> {
    (segment.len() >= 2).then(|| segment.to_line_string())
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Geometry of `history` at `t`. Entities that do not exist or are deleted
/// at `t` get the empty geometry.
pub fn build_geometry(history: &EntityHistory, t: i64, interpreter: &TagInterpreter) -> BuiltGeometry {
    match history {
        EntityHistory::Node(h) => match h.at(t) {
            Some(node) => node_geometry(node),
            None => BuiltGeometry::empty(Classification::Neither),
        },
        EntityHistory::Way(h) => match h.at(t) {
            Some(way) if way.meta.visible => way_geometry(way, h, t, interpreter),
            _ => BuiltGeometry::empty(Classification::Neither),
        },
        EntityHistory::Relation(h) => match h.at(t) {
            Some(relation) if relation.meta.visible => relation_geometry(relation, h, t, interpreter),
            _ => BuiltGeometry::empty(Classification::Neither),
        },
    }
}

fn node_geometry(node: &OsmNode) -> BuiltGeometry {
    match node.location {
        Some(location) => BuiltGeometry::new(
            Geometry::Point(Point::from(location.to_coord())),
            Classification::Neither,
        ),
        None => BuiltGeometry::empty(Classification::Neither),
    }
}

fn way_geometry(
    way: &OsmWay,
    history: &WayHistory,
    t: i64,
    interpreter: &TagInterpreter,
) -> BuiltGeometry {
    let segment = resolve_way(way, |id| history.node(id), t);
    if interpreter.is_area_way(way) {
        return match ring_polygon(&segment) {
            Ok(polygon) => BuiltGeometry::new(Geometry::Polygon(polygon), Classification::Area),
            Err(e) => {
                debug!("way {} at {}: {}", way.meta.id, t, e);
                let geometry = line_or_empty(&segment)
                    .map(Geometry::LineString)
                    .unwrap_or_else(empty_geometry);
                BuiltGeometry {
                    degraded: true,
                    ..BuiltGeometry::new(geometry, Classification::Area)
                }
            }
        };
    }
    match line_or_empty(&segment) {
        Some(line) => BuiltGeometry::new(Geometry::LineString(line), Classification::Line),
        None => BuiltGeometry::empty(Classification::Line),
    }
}

fn relation_geometry(
    relation: &OsmRelation,
    history: &RelationHistory,
    t: i64,
    interpreter: &TagInterpreter,
) -> BuiltGeometry {
    let classification = interpreter.classify_relation(relation);
    match classification {
        Classification::Area => {
            let parts = build_multipolygon(relation, history, t, interpreter);
            let unmatched_inners = parts.unmatched_inners.len();
            let degraded = !parts.dangling.is_empty();
            BuiltGeometry {
                geometry: parts.into_geometry(),
                classification,
                unmatched_inners,
                degraded,
            }
        }
        Classification::Line => {
            let lines: Vec<LineString<f64>> = relation
                .members
                .iter()
                .filter(|m| m.kind == OsmType::Way)
                .filter_map(|m| resolve_member_way(history, m.id, t))
                .filter_map(|(_, segment)| line_or_empty(&segment))
                .collect();
            if lines.is_empty() {
                BuiltGeometry::empty(classification)
            } else {
                BuiltGeometry::new(Geometry::MultiLineString(MultiLineString::new(lines)), classification)
            }
        }
        Classification::Neither => {
            let mut parts = Vec::new();
            for member in &relation.members {
                match member.kind {
                    OsmType::Node => {
                        if let Some(location) = node_location(history.node(member.id), t) {
                            parts.push(Geometry::Point(Point::from(location.to_coord())));
                        }
                    }
                    OsmType::Way => {
                        if let Some(line) = resolve_member_way(history, member.id, t)
                            .and_then(|(_, segment)| line_or_empty(&segment))
                        {
                            parts.push(Geometry::LineString(line));
                        }
                    }
                    OsmType::Relation => {}
                }
            }
            BuiltGeometry::new(
                Geometry::GeometryCollection(GeometryCollection::new_from(parts)),
                classification,
            )
        }
    }
}

// =============================================================================
// MULTIPOLYGONS
// =============================================================================

/// Assembled rings of a multipolygon relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipolygonParts {
    /// Outer rings with their inner rings attached.
    pub polygons: Vec<Polygon<f64>>,
    /// Outer or inner segments that could not be closed into rings.
    pub dangling: Vec<LineString<f64>>,
    /// Closed inner rings that no outer ring contains.
    pub unmatched_inners: Vec<LineString<f64>>,
}

impl MultipolygonParts {
    /// A polygon for one outer ring, a multipolygon for several. Dangling
    /// segments turn the result into a geometry collection.
    pub fn into_geometry(self) -> Geometry<f64> {
        if !self.dangling.is_empty() {
            let parts = self
                .polygons
                .into_iter()
                .map(Geometry::Polygon)
                .chain(self.dangling.into_iter().map(Geometry::LineString))
                .collect::<Vec<_>>();
            return Geometry::GeometryCollection(GeometryCollection::new_from(parts));
        }
        let mut polygons = self.polygons;
        match polygons.len() {
            0 => empty_geometry(),
            1 => Geometry::Polygon(polygons.remove(0)),
            _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
        }
    }
}

/// Resolves and joins the outer and inner members of a multipolygon relation
/// at `t`. Each inner ring goes to the smallest outer ring containing it.
pub fn build_multipolygon(
    relation: &OsmRelation,
    history: &RelationHistory,
    t: i64,
    interpreter: &TagInterpreter,
) -> MultipolygonParts {
    let mut outers = Vec::new();
    let mut inners = Vec::new();
    for member in &relation.members {
        let target = if interpreter.is_multipolygon_outer_member(member) {
            &mut outers
        } else if interpreter.is_multipolygon_inner_member(member) {
            &mut inners
        } else {
            continue;
        };
        if let Some((_, segment)) = resolve_member_way(history, member.id, t) {
            target.push(segment);
        }
    }

    let outer_rings = join_rings(outers);
    let inner_rings = join_rings(inners);

    let mut polygons: Vec<Polygon<f64>> = outer_rings
        .closed
        .iter()
        .map(|ring| Polygon::new(ring.to_line_string(), Vec::new()))
        .collect();
    let areas: Vec<f64> = polygons.iter().map(|p| p.unsigned_area()).collect();

    let mut unmatched_inners = Vec::new();
    for ring in &inner_rings.closed {
        let inner = ring.to_line_string();
        let smallest = polygons
            .iter()
            .enumerate()
            .filter(|(_, outer)| outer.contains(&inner))
            .min_by(|(a, _), (b, _)| areas[*a].total_cmp(&areas[*b]))
            .map(|(i, _)| i);
        match smallest {
            Some(i) => polygons[i].interiors_push(inner),
            None => unmatched_inners.push(inner),
        }
    }

    let dangling = outer_rings
        .dangling
        .iter()
        .chain(inner_rings.dangling.iter())
        .map(WaySegment::to_line_string)
        .collect();

    MultipolygonParts {
        polygons,
        dangling,
        unmatched_inners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::{node, relation, way};
    use crate::model::Tag;
    use crate::tags::{AreaRule, TagTranslator, Vocabulary};

    struct Fixture {
        vocab: Vocabulary,
        interpreter: TagInterpreter,
    }

    impl Fixture {
        fn new() -> Self {
            let mut vocab = Vocabulary::new();
            for (k, v) in [
                ("type", "multipolygon"),
                ("type", "route"),
                ("type", "site"),
                ("building", "yes"),
                ("highway", "primary"),
            ] {
                vocab.intern_tag(k, v);
            }
            for role in ["outer", "inner", ""] {
                vocab.intern_role(role);
            }
            let interpreter = TagInterpreter::new(&[AreaRule::all("building")], &[], &vocab);
            Self { vocab, interpreter }
        }

        fn tag(&self, k: &str, v: &str) -> Tag {
            self.vocab.tag_to_id(k, v).unwrap()
        }

        fn role(&self, r: &str) -> u32 {
            self.vocab.role_to_id(r).unwrap()
        }
    }

    fn nodes(coords: &[(i64, f64, f64)]) -> Vec<NodeHistory> {
        coords
            .iter()
            .map(|&(id, lon, lat)| NodeHistory::new(vec![node(id, 1, 0).at_degrees(lon, lat).build()]).unwrap())
            .collect()
    }

    fn way_history(id: i64, refs: &[i64], tags: &[Tag], all_nodes: &[NodeHistory]) -> WayHistory {
        let w = way(id, 1, 0)
            .refs(refs.iter().copied())
            .tags(tags.iter().map(|t| (t.key, t.value)))
            .build();
        WayHistory::new(vec![w], all_nodes.to_vec()).unwrap()
    }

    fn square_nodes() -> Vec<NodeHistory> {
        nodes(&[(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 1.0, 1.0), (4, 0.0, 1.0)])
    }

    #[test]
    fn test_node_point_and_deleted() {
        let history = NodeHistory::new(vec![
            node(300, 1, 10).at_degrees(8.0, 49.0).build(),
            node(300, 2, 20).deleted().build(),
        ])
        .unwrap();
        let f = Fixture::new();
        let h = EntityHistory::Node(history);
        assert!(matches!(build_geometry(&h, 15, &f.interpreter).geometry, Geometry::Point(_)));
        assert_eq!(build_geometry(&h, 25, &f.interpreter).geometry, empty_geometry());
        assert_eq!(build_geometry(&h, 5, &f.interpreter).geometry, empty_geometry());
    }

    #[test]
    fn test_closed_building_way_is_polygon() {
        let f = Fixture::new();
        let building = f.tag("building", "yes");
        let h = EntityHistory::Way(way_history(10, &[1, 2, 3, 4, 1], &[building], &square_nodes()));
        let built = build_geometry(&h, 0, &f.interpreter);
        assert_eq!(built.classification, Classification::Area);
        assert!(matches!(built.geometry, Geometry::Polygon(_)));
        assert!(!built.degraded);
    }

    #[test]
    fn test_area_way_missing_node_degrades_to_line() {
        let f = Fixture::new();
        let building = f.tag("building", "yes");
        let mut ns = square_nodes();
        ns.remove(0);
        let h = EntityHistory::Way(way_history(10, &[1, 2, 3, 4, 1], &[building], &ns));
        let built = build_geometry(&h, 0, &f.interpreter);
        assert!(built.degraded);
        let Geometry::LineString(line) = built.geometry else {
            panic!("expected a line string");
        };
        assert_eq!(line.0.len(), 3);
    }

    #[test]
    fn test_short_way_is_empty() {
        let f = Fixture::new();
        let h = EntityHistory::Way(way_history(10, &[1, 99], &[], &square_nodes()));
        assert_eq!(build_geometry(&h, 0, &f.interpreter).geometry, empty_geometry());
    }

    #[test]
    fn test_multipolygon_single_outer_is_polygon() {
        let f = Fixture::new();
        let mp = f.tag("type", "multipolygon");
        let ns = nodes(&[(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 0.0, 1.0)]);
        let w1 = way_history(1, &[1, 2, 3, 1], &[], &ns);
        let rel = relation(100, 1, 0)
            .tag(mp.key, mp.value)
            .way_member(1, f.role("outer"))
            .build();
        let history = RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), vec![w1]).unwrap();
        let built = build_geometry(&EntityHistory::Relation(history), 0, &f.interpreter);
        assert_eq!(built.classification, Classification::Area);
        assert!(matches!(built.geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_multipolygon_joined_ring_with_inner() {
        let f = Fixture::new();
        let mp = f.tag("type", "multipolygon");
        let ns = nodes(&[
            (1, 0.0, 0.0),
            (2, 4.0, 0.0),
            (3, 4.0, 4.0),
            (4, 0.0, 4.0),
            (5, 1.0, 1.0),
            (6, 2.0, 1.0),
            (7, 2.0, 2.0),
        ]);
        let w1 = way_history(1, &[1, 2, 3], &[], &ns);
        let w2 = way_history(2, &[3, 4, 1], &[], &ns);
        let w3 = way_history(3, &[5, 6, 7, 5], &[], &ns);
        let rel = relation(100, 1, 0)
            .tag(mp.key, mp.value)
            .way_member(1, f.role("outer"))
            .way_member(2, f.role(""))
            .way_member(3, f.role("inner"))
            .build();
        let history = RelationHistory::new(vec![rel.clone()], Vec::<NodeHistory>::new(), vec![w1, w2, w3]).unwrap();

        let parts = build_multipolygon(&rel, &history, 0, &f.interpreter);
        assert_eq!(parts.polygons.len(), 1);
        assert_eq!(parts.polygons[0].exterior().0.len(), 5);
        assert_eq!(parts.polygons[0].interiors().len(), 1);
        assert!(parts.unmatched_inners.is_empty());
        assert!(parts.dangling.is_empty());
    }

    #[test]
    fn test_unmatched_inner_is_reported() {
        let f = Fixture::new();
        let mp = f.tag("type", "multipolygon");
        let ns = nodes(&[(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 0.0, 1.0), (5, 5.0, 5.0), (6, 6.0, 5.0), (7, 5.0, 6.0)]);
        let outer = way_history(1, &[1, 2, 3, 1], &[], &ns);
        let inner = way_history(2, &[5, 6, 7, 5], &[], &ns);
        let rel = relation(100, 1, 0)
            .tag(mp.key, mp.value)
            .way_member(1, f.role("outer"))
            .way_member(2, f.role("inner"))
            .build();
        let history = RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), vec![outer, inner]).unwrap();
        let built = build_geometry(&EntityHistory::Relation(history), 0, &f.interpreter);
        assert_eq!(built.unmatched_inners, 1);
        assert!(matches!(built.geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_dangling_outer_falls_back_to_collection() {
        let f = Fixture::new();
        let mp = f.tag("type", "multipolygon");
        let ns = square_nodes();
        let w1 = way_history(1, &[1, 2, 3], &[], &ns);
        let rel = relation(100, 1, 0)
            .tag(mp.key, mp.value)
            .way_member(1, f.role("outer"))
            .build();
        let history = RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), vec![w1]).unwrap();
        let built = build_geometry(&EntityHistory::Relation(history), 0, &f.interpreter);
        assert!(built.degraded);
        assert!(matches!(built.geometry, Geometry::GeometryCollection(ref gc) if gc.0.len() == 1));
    }

    #[test]
    fn test_route_is_multilinestring() {
        let f = Fixture::new();
        let route = f.tag("type", "route");
        let ns = square_nodes();
        let w1 = way_history(1, &[1, 2], &[], &ns);
        let w2 = way_history(2, &[3, 4], &[], &ns);
        let rel = relation(100, 1, 0)
            .tag(route.key, route.value)
            .way_member(1, 0)
            .way_member(2, 0)
            .way_member(77, 0)
            .build();
        let history = RelationHistory::new(vec![rel], Vec::<NodeHistory>::new(), vec![w1, w2]).unwrap();
        let built = build_geometry(&EntityHistory::Relation(history), 0, &f.interpreter);
        assert_eq!(built.classification, Classification::Line);
        assert!(matches!(built.geometry, Geometry::MultiLineString(ref mls) if mls.0.len() == 2));
    }

    #[test]
    fn test_other_relation_is_collection() {
        let f = Fixture::new();
        let site = f.tag("type", "site");
        let ns = square_nodes();
        let w1 = way_history(1, &[1, 2], &[], &ns);
        let rel = relation(100, 1, 0)
            .tag(site.key, site.value)
            .node_member(3, 0)
            .way_member(1, 0)
            .build();
        let history = RelationHistory::new(vec![rel], ns.clone(), vec![w1]).unwrap();
        let built = build_geometry(&EntityHistory::Relation(history), 0, &f.interpreter);
        assert_eq!(built.classification, Classification::Neither);
        let Geometry::GeometryCollection(gc) = built.geometry else {
            panic!("expected a collection");
        };
        assert!(matches!(gc.0[0], Geometry::Point(_)));
        assert!(matches!(gc.0[1], Geometry::LineString(_)));
    }

    #[test]
    fn test_ring_polygon_errors() {
        let open = WaySegment::new(vec![1, 2, 3, 4], vec![Location::new(0, 0).to_coord(); 4]);
        assert_eq!(
            ring_polygon(&open),
            Err(GeometryError::UnclosedRing { first: 1, last: 4 })
        );
        let short = WaySegment::new(vec![1, 2, 1], vec![Location::new(0, 0).to_coord(); 3]);
        assert_eq!(
            ring_polygon(&short),
            Err(GeometryError::TooFewCoordinates { count: 3 })
        );
    }
}
