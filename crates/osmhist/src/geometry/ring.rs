//! Ring joining: stitching open way segments into closed rings by their
//! shared endpoint node ids.

use geo_types::{Coord, LineString};

/// Node ids of a resolved way together with their coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct WaySegment {
    pub ids: Vec<i64>,
    pub coords: Vec<Coord<f64>>,
}

impl WaySegment {
    pub fn new(ids: Vec<i64>, coords: Vec<Coord<f64>>) -> Self {
        debug_assert_eq!(ids.len(), coords.len());
        Self { ids, coords }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn first(&self) -> Option<i64> {
        self.ids.first().copied()
    }

    fn last(&self) -> Option<i64> {
        self.ids.last().copied()
    }

    /// First and last node are the same and the ring has an inside.
    pub fn is_closed(&self) -> bool {
        self.ids.len() >= 4 && self.first() == self.last()
    }

    fn reversed(mut self) -> Self {
        self.ids.reverse();
        self.coords.reverse();
        self
    }

    /// Appends `other`, whose first node equals this segment's last node.
    fn append(&mut self, other: WaySegment) {
        self.ids.extend(other.ids.into_iter().skip(1));
        self.coords.extend(other.coords.into_iter().skip(1));
    }

    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::new(self.coords.clone())
    }
}

/// Result of joining: closed rings and the segments that could not be closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinedRings {
    pub closed: Vec<WaySegment>,
    pub dangling: Vec<WaySegment>,
}

/// Joins segments into rings.
///
/// A ring grows from the first remaining segment. Other segments are attached
/// at either end, reversed when needed, until the ring closes or nothing
/// matches. Segments with fewer than two nodes are ignored.
pub fn join_rings(segments: Vec<WaySegment>) -> JoinedRings {
    let mut pending: Vec<WaySegment> = segments.into_iter().filter(|s| s.len() >= 2).collect();
    pending.reverse();
    let mut joined = JoinedRings::default();

    while let Some(mut ring) = pending.pop() {
        loop {
            if ring.is_closed() {
                joined.closed.push(ring);
                break;
            }
            let (Some(head), Some(tail)) = (ring.first(), ring.last()) else {
                break;
            };
            let found = pending.iter().rposition(|s| {
                s.first() == Some(tail)
                    || s.last() == Some(head)
                    || s.last() == Some(tail)
                    || s.first() == Some(head)
            });
            let Some(index) = found else {
                joined.dangling.push(ring);
                break;
            };
            let segment = pending.remove(index);
            ring = if segment.first() == Some(tail) {
                ring.append(segment);
                ring
            } else if segment.last() == Some(head) {
                let mut prefix = segment;
                prefix.append(ring);
                prefix
            } else if segment.last() == Some(tail) {
                ring.append(segment.reversed());
                ring
            } else {
                let mut prefix = segment.reversed();
                prefix.append(ring);
                prefix
            };
        }
    }
    joined
}
