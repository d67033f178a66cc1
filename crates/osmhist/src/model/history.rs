//! Full version histories of single entities.
//!
//! A history owns every version of one entity (newest first) together with
//! the histories of the children its versions reference. It is the input of
//! the record builders and the output of record materialization.

use std::collections::BTreeMap;

use crate::error::EncodeError;
use crate::limits::{MAX_RELATION_MEMBERS, MAX_TAG_INTS, MAX_VERSIONS, MAX_WAY_NODES};
use crate::model::{
    BoundingBox, Meta, OsmEntity, OsmNode, OsmRelation, OsmType, OsmWay, Versioned,
};

/// Sorts versions newest first and checks that they form one history.
fn normalize_versions<T: Versioned>(versions: &mut [T]) -> Result<(), EncodeError> {
    if versions.is_empty() {
        return Err(EncodeError::EmptyHistory);
    }
    if versions.len() > MAX_VERSIONS {
        return Err(EncodeError::LengthExceedsLimit {
            field: "versions",
            len: versions.len(),
            max: MAX_VERSIONS,
        });
    }
    versions.sort_by_key(|v| std::cmp::Reverse(v.meta().version));

    let id = versions[0].meta().id;
    let mut previous: Option<u32> = None;
    for v in versions.iter_mut() {
        let m = v.meta_mut();
        if m.id != id {
            return Err(EncodeError::MixedIds {
                expected: id,
                found: m.id,
            });
        }
        if previous == Some(m.version) {
            return Err(EncodeError::DuplicateVersion {
                id,
                version: m.version,
            });
        }
        previous = Some(m.version);
        if m.visible {
            m.normalize_tags();
            if m.tags.len() * 2 > MAX_TAG_INTS {
                return Err(EncodeError::LengthExceedsLimit {
                    field: "tags",
                    len: m.tags.len() * 2,
                    max: MAX_TAG_INTS,
                });
            }
        } else {
            m.tags.clear();
        }
    }
    Ok(())
}

/// Latest version (highest version number) whose timestamp is `<= t`.
fn version_at<T: Versioned>(versions: &[T], t: i64) -> Option<&T> {
    versions.iter().find(|v| v.meta().timestamp <= t)
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), EncodeError> {
    if len > max {
        return Err(EncodeError::LengthExceedsLimit { field, len, max });
    }
    Ok(())
}

// =============================================================================
// NODE
// =============================================================================

/// All versions of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHistory {
    versions: Vec<OsmNode>,
}

impl NodeHistory {
    pub fn new(mut versions: Vec<OsmNode>) -> Result<Self, EncodeError> {
        normalize_versions(&mut versions)?;
        for node in &mut versions {
            if !node.meta.visible {
                node.location = None;
            } else if node.location.is_none() {
                return Err(EncodeError::MissingLocation {
                    id: node.meta.id,
                    version: node.meta.version,
                });
            }
        }
        Ok(Self { versions })
    }

    pub fn id(&self) -> i64 {
        self.versions[0].meta.id
    }

    /// Versions ordered by descending version number.
    pub fn versions(&self) -> &[OsmNode] {
        &self.versions
    }

    pub fn latest(&self) -> &OsmNode {
        &self.versions[0]
    }

    pub fn at(&self, t: i64) -> Option<&OsmNode> {
        version_at(&self.versions, t)
    }

    /// Box around every visible location of every version.
    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::around(self.versions.iter().filter_map(|n| n.location))
    }
}

// =============================================================================
// WAY
// =============================================================================

/// All versions of one way plus the histories of referenced nodes.
///
/// Referenced nodes missing from `nodes` are absent: they live in another
/// cell or are unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WayHistory {
    versions: Vec<OsmWay>,
    nodes: BTreeMap<i64, NodeHistory>,
}

impl WayHistory {
    /// Builds a way history. Nodes never referenced by any version are dropped.
    pub fn new(
        mut versions: Vec<OsmWay>,
        nodes: impl IntoIterator<Item = NodeHistory>,
    ) -> Result<Self, EncodeError> {
        normalize_versions(&mut versions)?;
        for way in &mut versions {
            if !way.meta.visible {
                way.refs.clear();
            }
            check_len("way_nodes", way.refs.len(), MAX_WAY_NODES)?;
        }
        let mut referenced: Vec<i64> = versions.iter().flat_map(|w| w.refs.iter().copied()).collect();
        referenced.sort_unstable();
        referenced.dedup();
        let nodes = nodes
            .into_iter()
            .filter(|n| referenced.binary_search(&n.id()).is_ok())
            .map(|n| (n.id(), n))
            .collect();
        Ok(Self { versions, nodes })
    }

    pub fn id(&self) -> i64 {
        self.versions[0].meta.id
    }

    pub fn versions(&self) -> &[OsmWay] {
        &self.versions
    }

    pub fn latest(&self) -> &OsmWay {
        &self.versions[0]
    }

    pub fn at(&self, t: i64) -> Option<&OsmWay> {
        version_at(&self.versions, t)
    }

    pub fn node(&self, id: i64) -> Option<&NodeHistory> {
        self.nodes.get(&id)
    }

    /// Known node histories, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeHistory> {
        self.nodes.values()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.nodes
            .values()
            .fold(None, |acc, n| BoundingBox::union_opt(acc, n.bbox()))
    }

    /// Timestamps of own versions and of every known node version, ascending and unique.
    pub fn modification_timestamps(&self) -> Vec<i64> {
        let mut out: Vec<i64> = self.versions.iter().map(|w| w.meta.timestamp).collect();
        out.extend(
            self.nodes
                .values()
                .flat_map(|n| n.versions().iter().map(|v| v.meta.timestamp)),
        );
        out.sort_unstable();
        out.dedup();
        out
    }
}

// =============================================================================
// RELATION
// =============================================================================

/// All versions of one relation plus the histories of referenced nodes and ways.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationHistory {
    versions: Vec<OsmRelation>,
    nodes: BTreeMap<i64, NodeHistory>,
    ways: BTreeMap<i64, WayHistory>,
}

impl RelationHistory {
    /// Builds a relation history. Children never referenced as members are dropped.
    pub fn new(
        mut versions: Vec<OsmRelation>,
        nodes: impl IntoIterator<Item = NodeHistory>,
        ways: impl IntoIterator<Item = WayHistory>,
    ) -> Result<Self, EncodeError> {
        normalize_versions(&mut versions)?;
        for rel in &mut versions {
            if !rel.meta.visible {
                rel.members.clear();
            }
            check_len("relation_members", rel.members.len(), MAX_RELATION_MEMBERS)?;
        }
        let referenced = |kind: OsmType| {
            let mut ids: Vec<i64> = versions
                .iter()
                .flat_map(|r| r.members.iter())
                .filter(|m| m.kind == kind)
                .map(|m| m.id)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let node_ids = referenced(OsmType::Node);
        let way_ids = referenced(OsmType::Way);
        let nodes = nodes
            .into_iter()
            .filter(|n| node_ids.binary_search(&n.id()).is_ok())
            .map(|n| (n.id(), n))
            .collect();
        let ways = ways
            .into_iter()
            .filter(|w| way_ids.binary_search(&w.id()).is_ok())
            .map(|w| (w.id(), w))
            .collect();
        Ok(Self {
            versions,
            nodes,
            ways,
        })
    }

    pub fn id(&self) -> i64 {
        self.versions[0].meta.id
    }

    pub fn versions(&self) -> &[OsmRelation] {
        &self.versions
    }

    pub fn latest(&self) -> &OsmRelation {
        &self.versions[0]
    }

    pub fn at(&self, t: i64) -> Option<&OsmRelation> {
        version_at(&self.versions, t)
    }

    pub fn node(&self, id: i64) -> Option<&NodeHistory> {
        self.nodes.get(&id)
    }

    pub fn way(&self, id: i64) -> Option<&WayHistory> {
        self.ways.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeHistory> {
        self.nodes.values()
    }

    pub fn ways(&self) -> impl Iterator<Item = &WayHistory> {
        self.ways.values()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        let nodes = self
            .nodes
            .values()
            .fold(None, |acc, n| BoundingBox::union_opt(acc, n.bbox()));
        self.ways
            .values()
            .fold(nodes, |acc, w| BoundingBox::union_opt(acc, w.bbox()))
    }

    pub fn modification_timestamps(&self) -> Vec<i64> {
        let mut out: Vec<i64> = self.versions.iter().map(|r| r.meta.timestamp).collect();
        out.extend(
            self.nodes
                .values()
                .flat_map(|n| n.versions().iter().map(|v| v.meta.timestamp)),
        );
        for way in self.ways.values() {
            out.extend(way.modification_timestamps());
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

// =============================================================================
// ANY ENTITY
// =============================================================================

/// History of an entity of any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityHistory {
    Node(NodeHistory),
    Way(WayHistory),
    Relation(RelationHistory),
}

impl EntityHistory {
    pub fn id(&self) -> i64 {
        match self {
            EntityHistory::Node(h) => h.id(),
            EntityHistory::Way(h) => h.id(),
            EntityHistory::Relation(h) => h.id(),
        }
    }

    pub fn kind(&self) -> OsmType {
        match self {
            EntityHistory::Node(_) => OsmType::Node,
            EntityHistory::Way(_) => OsmType::Way,
            EntityHistory::Relation(_) => OsmType::Relation,
        }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            EntityHistory::Node(h) => h.bbox(),
            EntityHistory::Way(h) => h.bbox(),
            EntityHistory::Relation(h) => h.bbox(),
        }
    }

    /// The entity version valid at `t`, if one exists.
    pub fn at(&self, t: i64) -> Option<OsmEntity> {
        match self {
            EntityHistory::Node(h) => h.at(t).cloned().map(OsmEntity::Node),
            EntityHistory::Way(h) => h.at(t).cloned().map(OsmEntity::Way),
            EntityHistory::Relation(h) => h.at(t).cloned().map(OsmEntity::Relation),
        }
    }

    /// Metadata of every version, newest first.
    pub fn metas(&self) -> Vec<&Meta> {
        match self {
            EntityHistory::Node(h) => h.versions().iter().map(|v| &v.meta).collect(),
            EntityHistory::Way(h) => h.versions().iter().map(|v| &v.meta).collect(),
            EntityHistory::Relation(h) => h.versions().iter().map(|v| &v.meta).collect(),
        }
    }

    /// Own and child version timestamps, ascending and unique.
    pub fn modification_timestamps(&self) -> Vec<i64> {
        match self {
            EntityHistory::Node(h) => {
                let mut out: Vec<i64> = h.versions().iter().map(|v| v.meta.timestamp).collect();
                out.sort_unstable();
                out.dedup();
                out
            }
            EntityHistory::Way(h) => h.modification_timestamps(),
            EntityHistory::Relation(h) => h.modification_timestamps(),
        }
    }
}
