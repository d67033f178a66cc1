//! Changes of an entity inside a time interval.

use std::fmt;

use geo_types::Geometry;

use crate::iterate::{CellIterator, Diagnostics};
use crate::model::{EntityHistory, OsmEntity, OsmType};
use crate::tags::Classification;

/// Kind of change a contribution makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Activity {
    Creation = 1 << 0,
    Deletion = 1 << 1,
    TagChange = 1 << 2,
    MemberListChange = 1 << 3,
    GeometryChange = 1 << 4,
}

impl Activity {
    pub const ALL: [Activity; 5] = [
        Activity::Creation,
        Activity::Deletion,
        Activity::TagChange,
        Activity::MemberListChange,
        Activity::GeometryChange,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Activity::Creation => "creation",
            Activity::Deletion => "deletion",
            Activity::TagChange => "tag_change",
            Activity::MemberListChange => "member_list_change",
            Activity::GeometryChange => "geometry_change",
        }
    }
}

/// Set of [`Activity`] values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Activities(u8);

impl Activities {
    pub fn insert(&mut self, activity: Activity) {
        self.0 |= activity as u8;
    }

    pub fn contains(&self, activity: Activity) -> bool {
        self.0 & activity as u8 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Activity> + '_ {
        Activity::ALL.into_iter().filter(|a| self.contains(*a))
    }
}

impl FromIterator<Activity> for Activities {
    fn from_iter<I: IntoIterator<Item = Activity>>(iter: I) -> Self {
        let mut set = Activities::default();
        for activity in iter {
            set.insert(activity);
        }
        set
    }
}

impl fmt::Debug for Activities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Activity::name)).finish()
    }
}

/// One change of one entity, with the states before and after it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContributionEntry {
    pub timestamp: i64,
    /// Version current at `timestamp`; a deleted version for deletions.
    pub entity: OsmEntity,
    pub previous: Option<OsmEntity>,
    pub geometry: Geometry<f64>,
    pub previous_geometry: Geometry<f64>,
    pub unclipped: Geometry<f64>,
    pub previous_unclipped: Geometry<f64>,
    pub classification: Classification,
    pub activities: Activities,
    /// Changeset of the entity's own version, or of the child version that
    /// triggered the change.
    pub changeset: Option<i64>,
    /// Whether the entity itself has a version at `timestamp`.
    pub own_version: bool,
}

impl ContributionEntry {
    pub fn id(&self) -> i64 {
        self.entity.id()
    }

    pub fn kind(&self) -> OsmType {
        self.entity.kind()
    }
}

fn members_differ(a: &OsmEntity, b: &OsmEntity) -> bool {
    match (a, b) {
        (OsmEntity::Way(a), OsmEntity::Way(b)) => a.refs != b.refs,
        (OsmEntity::Relation(a), OsmEntity::Relation(b)) => a.members != b.members,
        _ => false,
    }
}

fn child_changeset(history: &EntityHistory, t: i64) -> Option<i64> {
    let found = match history {
        EntityHistory::Node(_) => None,
        EntityHistory::Way(h) => h
            .nodes()
            .flat_map(|n| n.versions())
            .map(|v| &v.meta)
            .find(|m| m.timestamp == t),
        EntityHistory::Relation(h) => h
            .nodes()
            .flat_map(|n| n.versions())
            .map(|v| &v.meta)
            .chain(h.ways().flat_map(|w| w.versions()).map(|v| &v.meta))
            .chain(
                h.ways()
                    .flat_map(|w| w.nodes())
                    .flat_map(|n| n.versions())
                    .map(|v| &v.meta),
            )
            .find(|m| m.timestamp == t),
    };
    found.map(|m| m.changeset)
}

impl CellIterator<'_> {
    /// Contributions of one entity inside `[first, last)` of the iterator's
    /// timestamps.
    ///
    /// Every version of the entity inside the interval is reported while the
    /// entity is present in the area of interest. Child modifications are
    /// reported only when they change the clipped geometry.
    pub fn contributions(&self, history: &EntityHistory, diagnostics: &mut Diagnostics) -> Vec<ContributionEntry> {
        let Some((start, end)) = self.interval() else {
            return Vec::new();
        };
        let Some((_, fully_inside)) = self.admit(history, diagnostics) else {
            return Vec::new();
        };
        let in_range = |t: &i64| (start..end).contains(t);
        let mut own: Vec<i64> = history
            .metas()
            .iter()
            .map(|m| m.timestamp)
            .filter(in_range)
            .collect();
        own.sort_unstable();
        let events: Vec<i64> = history
            .modification_timestamps()
            .into_iter()
            .filter(in_range)
            .collect();

        let mut out = Vec::new();
        let mut previous = self.state_at(history, start.saturating_sub(1), fully_inside, diagnostics);
        for t in events {
            let current = self.state_at(history, t, fully_inside, diagnostics);
            let own_version = own.binary_search(&t).is_ok();
            let was = previous.is_present(fully_inside);
            let is = current.is_present(fully_inside);

            if !was && !is {
                previous = current;
                continue;
            }

            let mut activities = Activities::default();
            if !was {
                activities.insert(Activity::Creation);
            } else if !is {
                activities.insert(Activity::Deletion);
            } else if let (Some(before), Some(after)) = (&previous.entity, &current.entity) {
                if before.meta().tags != after.meta().tags {
                    activities.insert(Activity::TagChange);
                }
                if members_differ(before, after) {
                    activities.insert(Activity::MemberListChange);
                }
                if previous.geometry != current.geometry {
                    activities.insert(Activity::GeometryChange);
                }
            }
            if activities.is_empty() && !own_version {
                previous = current;
                continue;
            }

            let (subject, geometry) = if is {
                (&current.entity, &current.geometry)
            } else {
                (&previous.entity, &previous.geometry)
            };
            let accepted = subject.as_ref().is_some_and(|e| self.accepts(e, geometry));
            let entity = history.at(t);
            if let (true, Some(entity)) = (accepted, entity) {
                let changeset = if own_version {
                    Some(entity.meta().changeset)
                } else {
                    child_changeset(history, t)
                };
                out.push(ContributionEntry {
                    timestamp: t,
                    entity,
                    previous: previous.entity.clone(),
                    geometry: current.geometry.clone(),
                    previous_geometry: previous.geometry.clone(),
                    unclipped: current.unclipped.clone(),
                    previous_unclipped: previous.unclipped.clone(),
                    classification: if is {
                        current.classification
                    } else {
                        previous.classification
                    },
                    activities,
                    changeset,
                    own_version,
                });
            }
            previous = current;
        }
        out
    }
}
