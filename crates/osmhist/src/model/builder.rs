//! Builder API for ergonomic version construction.
//!
//! # Example
//!
//! ```rust
//! use osmhist::model::builder::{node, way};
//! use osmhist::model::{NodeHistory, WayHistory};
//!
//! let n1 = NodeHistory::new(vec![node(1, 1, 1_000).at(0, 0).build()]).unwrap();
//! let n2 = NodeHistory::new(vec![node(2, 1, 1_000).at(10, 0).build()]).unwrap();
//! let history = WayHistory::new(
//!     vec![way(10, 1, 2_000).refs([1, 2]).tag(1, 2).user(7).build()],
//!     [n1, n2],
//! )
//! .unwrap();
//! assert_eq!(history.latest().refs, vec![1, 2]);
//! ```

use crate::model::{Location, Meta, OsmMember, OsmNode, OsmRelation, OsmType, OsmWay, Tag};

/// Starts a node version.
pub fn node(id: i64, version: u32, timestamp: i64) -> NodeBuilder {
    NodeBuilder {
        meta: Meta::new(id, version, timestamp),
        location: None,
    }
}

/// Starts a way version.
pub fn way(id: i64, version: u32, timestamp: i64) -> WayBuilder {
    WayBuilder {
        meta: Meta::new(id, version, timestamp),
        refs: Vec::new(),
    }
}

/// Starts a relation version.
pub fn relation(id: i64, version: u32, timestamp: i64) -> RelationBuilder {
    RelationBuilder {
        meta: Meta::new(id, version, timestamp),
        members: Vec::new(),
    }
}

macro_rules! meta_setters {
    () => {
        /// Adds a tag.
        pub fn tag(mut self, key: u32, value: u32) -> Self {
            self.meta.tags.push(Tag::new(key, value));
            self
        }

        /// Adds several tags.
        pub fn tags(mut self, tags: impl IntoIterator<Item = (u32, u32)>) -> Self {
            self.meta
                .tags
                .extend(tags.into_iter().map(|(k, v)| Tag::new(k, v)));
            self
        }

        pub fn changeset(mut self, changeset: i64) -> Self {
            self.meta.changeset = changeset;
            self
        }

        pub fn user(mut self, user_id: i64) -> Self {
            self.meta.user_id = user_id;
            self
        }

        /// Marks the version as a deletion.
        pub fn deleted(mut self) -> Self {
            self.meta.visible = false;
            self
        }
    };
}

/// Builder for a node version.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    meta: Meta,
    location: Option<Location>,
}

impl NodeBuilder {
    meta_setters!();

    /// Sets a fixed-point location.
    pub fn at(mut self, lon: i64, lat: i64) -> Self {
        self.location = Some(Location::new(lon, lat));
        self
    }

    /// Sets a location in degrees.
    pub fn at_degrees(mut self, lon: f64, lat: f64) -> Self {
        self.location = Some(Location::from_degrees(lon, lat));
        self
    }

    pub fn build(mut self) -> OsmNode {
        self.meta.normalize_tags();
        let location = if self.meta.visible { self.location } else { None };
        OsmNode {
            meta: self.meta,
            location,
        }
    }
}

/// Builder for a way version.
#[derive(Debug, Clone)]
pub struct WayBuilder {
    meta: Meta,
    refs: Vec<i64>,
}

impl WayBuilder {
    meta_setters!();

    /// Appends node references.
    pub fn refs(mut self, refs: impl IntoIterator<Item = i64>) -> Self {
        self.refs.extend(refs);
        self
    }

    pub fn build(mut self) -> OsmWay {
        self.meta.normalize_tags();
        if !self.meta.visible {
            self.refs.clear();
        }
        OsmWay {
            meta: self.meta,
            refs: self.refs,
        }
    }
}

/// Builder for a relation version.
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    meta: Meta,
    members: Vec<OsmMember>,
}

impl RelationBuilder {
    meta_setters!();

    pub fn member(mut self, kind: OsmType, id: i64, role: u32) -> Self {
        self.members.push(OsmMember::new(kind, id, role));
        self
    }

    pub fn node_member(self, id: i64, role: u32) -> Self {
        self.member(OsmType::Node, id, role)
    }

    pub fn way_member(self, id: i64, role: u32) -> Self {
        self.member(OsmType::Way, id, role)
    }

    pub fn build(mut self) -> OsmRelation {
        self.meta.normalize_tags();
        if !self.meta.visible {
            self.members.clear();
        }
        OsmRelation {
            meta: self.meta,
            members: self.members,
        }
    }
}
