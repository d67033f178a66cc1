//! Area/line classification of tagged entities.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ConfigError;
use crate::model::{Meta, OsmEntity, OsmMember, OsmRelation, OsmType, OsmWay, Tag};
use crate::tags::rules::{default_area_rules, default_uninteresting_keys, AreaRule, RuleKind};
use crate::tags::vocabulary::TagTranslator;

/// How an entity's geometry is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Area,
    Line,
    Neither,
}

/// Value ids of one key that make a closed way an area.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ValueSet {
    Only(FxHashSet<u32>),
    AllExcept(FxHashSet<u32>),
}

impl ValueSet {
    fn matches(&self, value: u32) -> bool {
        match self {
            ValueSet::Only(values) => values.contains(&value),
            ValueSet::AllExcept(values) => !values.contains(&value),
        }
    }
}

/// Immutable ruleset resolved against one vocabulary.
///
/// Rules whose key or values are not in the vocabulary are skipped: no stored
/// entity can carry them.
#[derive(Debug, Clone, Default)]
pub struct TagInterpreter {
    way_area_tags: FxHashMap<u32, ValueSet>,
    uninteresting_keys: FxHashSet<u32>,
    area_no: Option<Tag>,
    type_key: Option<u32>,
    type_multipolygon: Option<Tag>,
    type_boundary: Option<Tag>,
    type_route: Option<Tag>,
    outer_role: Option<u32>,
    inner_role: Option<u32>,
    empty_role: Option<u32>,
}

impl TagInterpreter {
    /// Resolves `rules` and `uninteresting_keys` to ids of `vocabulary`.
    pub fn new(
        rules: &[AreaRule],
        uninteresting_keys: &[String],
        vocabulary: &dyn TagTranslator,
    ) -> Self {
        let mut way_area_tags = FxHashMap::default();
        for rule in rules {
            let Some(key) = vocabulary.key_to_id(&rule.key) else {
                debug!("area rule key {:?} is not in the vocabulary", rule.key);
                continue;
            };
            let value_ids = |values: &[String]| -> FxHashSet<u32> {
                values
                    .iter()
                    .filter_map(|value| {
                        let tag = vocabulary.tag_to_id(&rule.key, value);
                        if tag.is_none() {
                            debug!("area rule tag {}={} is not in the vocabulary", rule.key, value);
                        }
                        tag.map(|t| t.value)
                    })
                    .collect()
            };
            let no = vocabulary.tag_to_id(&rule.key, "no").map(|t| t.value);
            let set = match &rule.kind {
                RuleKind::All => ValueSet::AllExcept(no.into_iter().collect()),
                RuleKind::Whitelist(values) => ValueSet::Only(value_ids(values)),
                RuleKind::Blacklist(values) => {
                    let mut except = value_ids(values);
                    except.extend(no);
                    ValueSet::AllExcept(except)
                }
            };
            way_area_tags.insert(key, set);
        }

        let uninteresting_keys = uninteresting_keys
            .iter()
            .filter_map(|key| vocabulary.key_to_id(key))
            .collect();

        let tag = |key: &str, value: &str| {
            let tag = vocabulary.tag_to_id(key, value);
            if tag.is_none() {
                debug!("tag {key}={value} is not in the vocabulary");
            }
            tag
        };

        Self {
            way_area_tags,
            uninteresting_keys,
            area_no: tag("area", "no"),
            type_key: vocabulary.key_to_id("type"),
            type_multipolygon: tag("type", "multipolygon"),
            type_boundary: tag("type", "boundary"),
            type_route: tag("type", "route"),
            outer_role: vocabulary.role_to_id("outer"),
            inner_role: vocabulary.role_to_id("inner"),
            empty_role: vocabulary.role_to_id(""),
        }
    }

    /// Interpreter using the bundled rule lists.
    pub fn with_defaults(vocabulary: &dyn TagTranslator) -> Result<Self, ConfigError> {
        Ok(Self::new(
            &default_area_rules()?,
            &default_uninteresting_keys()?,
            vocabulary,
        ))
    }

    pub fn classify(&self, entity: &OsmEntity) -> Classification {
        match entity {
            OsmEntity::Node(_) => Classification::Neither,
            OsmEntity::Way(way) => {
                if self.is_area_way(way) {
                    Classification::Area
                } else {
                    Classification::Line
                }
            }
            OsmEntity::Relation(relation) => self.classify_relation(relation),
        }
    }

    pub fn is_area(&self, entity: &OsmEntity) -> bool {
        self.classify(entity) == Classification::Area
    }

    pub fn is_line(&self, entity: &OsmEntity) -> bool {
        self.classify(entity) == Classification::Line
    }

    /// A closed way with an area tag and without `area=no`.
    pub fn is_area_way(&self, way: &OsmWay) -> bool {
        let refs = &way.refs;
        if refs.len() < 4 || refs.first() != refs.last() {
            return false;
        }
        self.has_area_tags(&way.meta)
    }

    /// Whether the tags alone would make a closed way an area.
    pub fn has_area_tags(&self, meta: &Meta) -> bool {
        if self.area_no.is_some_and(|no| meta.has_tag(no)) {
            return false;
        }
        meta.tags.iter().any(|tag| {
            self.way_area_tags
                .get(&tag.key)
                .is_some_and(|set| set.matches(tag.value))
        })
    }

    /// `type=multipolygon` and `type=boundary` are areas, `type=route` is a line.
    pub fn classify_relation(&self, relation: &OsmRelation) -> Classification {
        let Some(value) = self.type_key.and_then(|key| relation.meta.tag_value(key)) else {
            return Classification::Neither;
        };
        let is = |tag: Option<Tag>| tag.is_some_and(|t| t.value == value);
        if is(self.type_multipolygon) || is(self.type_boundary) {
            Classification::Area
        } else if is(self.type_route) {
            Classification::Line
        } else {
            Classification::Neither
        }
    }

    /// A `type=multipolygon` relation with no other interesting tag: the area
    /// tags live on its outer way.
    pub fn is_old_style_multipolygon(&self, relation: &OsmRelation) -> bool {
        let Some(mp) = self.type_multipolygon else {
            return false;
        };
        relation.meta.has_tag(mp)
            && relation
                .meta
                .tags
                .iter()
                .all(|tag| tag.key == mp.key || self.uninteresting_keys.contains(&tag.key))
    }

    /// Way members with role `outer` or no role.
    pub fn is_multipolygon_outer_member(&self, member: &OsmMember) -> bool {
        member.kind == OsmType::Way
            && (Some(member.role) == self.outer_role || Some(member.role) == self.empty_role)
    }

    pub fn is_multipolygon_inner_member(&self, member: &OsmMember) -> bool {
        member.kind == OsmType::Way && Some(member.role) == self.inner_role
    }

    /// Whether any tag key is not on the uninteresting list.
    pub fn has_interesting_tag_key(&self, meta: &Meta) -> bool {
        meta.tags
            .iter()
            .any(|tag| !self.uninteresting_keys.contains(&tag.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::{node, relation, way};
    use crate::tags::vocabulary::Vocabulary;

    struct Fixture {
        vocab: Vocabulary,
        interpreter: TagInterpreter,
    }

    fn fixture() -> Fixture {
        let mut vocab = Vocabulary::new();
        for (k, v) in [
            ("building", "yes"),
            ("building", "no"),
            ("highway", "residential"),
            ("highway", "services"),
            ("natural", "coastline"),
            ("natural", "wood"),
            ("area", "no"),
            ("type", "multipolygon"),
            ("type", "boundary"),
            ("type", "route"),
            ("type", "site"),
            ("created_by", "JOSM"),
            ("landuse", "forest"),
            ("amenity", "drinking_water"),
        ] {
            vocab.intern_tag(k, v);
        }
        for role in ["outer", "inner", "", "stop"] {
            vocab.intern_role(role);
        }
        let rules = vec![
            AreaRule::all("building"),
            AreaRule::whitelist("highway", &["services", "rest_area"]),
            AreaRule::blacklist("natural", &["coastline"]),
            AreaRule::all("landuse"),
        ];
        let interpreter = TagInterpreter::new(&rules, &["created_by".to_string()], &vocab);
        Fixture { vocab, interpreter }
    }

    fn closed_way(f: &Fixture, tags: &[(&str, &str)]) -> OsmEntity {
        let tags = tags.iter().map(|(k, v)| {
            let t = f.vocab.tag_to_id(k, v).unwrap();
            (t.key, t.value)
        });
        OsmEntity::Way(way(1, 1, 0).refs([1, 2, 3, 1]).tags(tags).build())
    }

    #[test]
    fn test_rule_kinds() {
        let f = fixture();
        let i = &f.interpreter;
        assert!(i.is_area(&closed_way(&f, &[("building", "yes")])));
        assert!(!i.is_area(&closed_way(&f, &[("building", "no")])));
        assert!(i.is_area(&closed_way(&f, &[("highway", "services")])));
        assert!(!i.is_area(&closed_way(&f, &[("highway", "residential")])));
        assert!(i.is_area(&closed_way(&f, &[("natural", "wood")])));
        assert!(!i.is_area(&closed_way(&f, &[("natural", "coastline")])));
        assert!(i.is_line(&closed_way(&f, &[])));
    }

    #[test]
    fn test_area_no_overrides() {
        let f = fixture();
        let way = closed_way(&f, &[("building", "yes"), ("area", "no")]);
        assert_eq!(f.interpreter.classify(&way), Classification::Line);
    }

    #[test]
    fn test_open_way_is_line() {
        let f = fixture();
        let building = f.vocab.tag_to_id("building", "yes").unwrap();
        let open = OsmEntity::Way(way(1, 1, 0).refs([1, 2, 3]).tag(building.key, building.value).build());
        assert_eq!(f.interpreter.classify(&open), Classification::Line);
    }

    #[test]
    fn test_nodes_are_neither() {
        let f = fixture();
        let water = f.vocab.tag_to_id("amenity", "drinking_water").unwrap();
        let n = OsmEntity::Node(node(300, 2, 0).at(0, 0).tag(water.key, water.value).build());
        assert_eq!(f.interpreter.classify(&n), Classification::Neither);
        assert!(!f.interpreter.is_area(&n));
    }

    #[test]
    fn test_relation_types() {
        let f = fixture();
        let rel = |value: &str| {
            let t = f.vocab.tag_to_id("type", value).unwrap();
            OsmEntity::Relation(relation(1, 1, 0).tag(t.key, t.value).build())
        };
        assert_eq!(f.interpreter.classify(&rel("multipolygon")), Classification::Area);
        assert_eq!(f.interpreter.classify(&rel("boundary")), Classification::Area);
        assert_eq!(f.interpreter.classify(&rel("route")), Classification::Line);
        assert_eq!(f.interpreter.classify(&rel("site")), Classification::Neither);
        let untagged = OsmEntity::Relation(relation(2, 1, 0).build());
        assert_eq!(f.interpreter.classify(&untagged), Classification::Neither);
    }

    #[test]
    fn test_old_style_multipolygon() {
        let f = fixture();
        let mp = f.vocab.tag_to_id("type", "multipolygon").unwrap();
        let building = f.vocab.tag_to_id("building", "yes").unwrap();
        let old = relation(1, 1, 0).tag(mp.key, mp.value).build();
        let new = relation(1, 1, 0)
            .tag(mp.key, mp.value)
            .tag(building.key, building.value)
            .build();
        assert!(f.interpreter.is_old_style_multipolygon(&old));
        assert!(!f.interpreter.is_old_style_multipolygon(&new));
    }

    #[test]
    fn test_old_style_multipolygon_ignores_uninteresting_keys() {
        let f = fixture();
        let tagged = |tags: &[(&str, &str)]| {
            let tags = tags.iter().map(|(k, v)| {
                let t = f.vocab.tag_to_id(k, v).unwrap();
                (t.key, t.value)
            });
            relation(1, 1, 0).tags(tags).build()
        };
        let i = &f.interpreter;
        assert!(i.is_old_style_multipolygon(&tagged(&[("type", "multipolygon"), ("created_by", "JOSM")])));
        assert!(!i.is_old_style_multipolygon(&tagged(&[("type", "multipolygon"), ("landuse", "forest")])));
        assert!(!i.is_old_style_multipolygon(&tagged(&[("created_by", "JOSM")])));
        assert!(!i.is_old_style_multipolygon(&tagged(&[("type", "boundary"), ("created_by", "JOSM")])));
    }

    #[test]
    fn test_member_roles() {
        let f = fixture();
        let role = |r: &str| f.vocab.role_to_id(r).unwrap();
        let i = &f.interpreter;
        assert!(i.is_multipolygon_outer_member(&OsmMember::new(OsmType::Way, 1, role("outer"))));
        assert!(i.is_multipolygon_outer_member(&OsmMember::new(OsmType::Way, 1, role(""))));
        assert!(!i.is_multipolygon_outer_member(&OsmMember::new(OsmType::Node, 1, role("outer"))));
        assert!(i.is_multipolygon_inner_member(&OsmMember::new(OsmType::Way, 1, role("inner"))));
        assert!(!i.is_multipolygon_inner_member(&OsmMember::new(OsmType::Way, 1, role("stop"))));
    }

    #[test]
    fn test_interesting_tag_keys() {
        let f = fixture();
        let created_by = f.vocab.tag_to_id("created_by", "JOSM").unwrap();
        let building = f.vocab.tag_to_id("building", "yes").unwrap();
        let mut meta = Meta::new(1, 1, 0);
        assert!(!f.interpreter.has_interesting_tag_key(&meta));
        meta.tags = vec![created_by];
        assert!(!f.interpreter.has_interesting_tag_key(&meta));
        meta.tags.push(building);
        meta.normalize_tags();
        assert!(f.interpreter.has_interesting_tag_key(&meta));
    }

    #[test]
    fn test_empty_vocabulary_never_matches() {
        let vocab = Vocabulary::new();
        let interpreter = TagInterpreter::with_defaults(&vocab).unwrap();
        let w = OsmEntity::Way(way(1, 1, 0).refs([1, 2, 3, 1]).tag(0, 0).build());
        assert_eq!(interpreter.classify(&w), Classification::Line);
        let r = OsmEntity::Relation(relation(1, 1, 0).tag(0, 0).build());
        assert_eq!(interpreter.classify(&r), Classification::Neither);
    }
}
