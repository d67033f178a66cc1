//! Area rules in the "polygon features" JSON format.
//!
//! ```json
//! [{ "key": "building", "polygon": "all" },
//!  { "key": "highway", "polygon": "whitelist", "values": ["services"] }]
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_AREA_RULES: &str = include_str!("../../data/polygon-features.json");
const DEFAULT_UNINTERESTING_KEYS: &str = include_str!("../../data/uninteresting-tags.json");

/// How the values of a key decide whether a closed way is an area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    /// Every value except `no`.
    All,
    /// Only the listed values.
    Whitelist(Vec<String>),
    /// Every value except the listed ones and `no`.
    Blacklist(Vec<String>),
}

/// Area rule of one tag key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaRule {
    pub key: String,
    pub kind: RuleKind,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    key: String,
    polygon: String,
    #[serde(default)]
    values: Vec<String>,
}

impl TryFrom<RawRule> for AreaRule {
    type Error = ConfigError;

    fn try_from(raw: RawRule) -> Result<Self, ConfigError> {
        let kind = match raw.polygon.as_str() {
            "all" => RuleKind::All,
            "whitelist" => RuleKind::Whitelist(raw.values),
            "blacklist" => RuleKind::Blacklist(raw.values),
            _ => {
                return Err(ConfigError::UnknownRuleType {
                    key: raw.key,
                    kind: raw.polygon,
                });
            }
        };
        Ok(AreaRule { key: raw.key, kind })
    }
}

impl AreaRule {
    pub fn all(key: &str) -> Self {
        Self {
            key: key.to_string(),
            kind: RuleKind::All,
        }
    }

    pub fn whitelist(key: &str, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            kind: RuleKind::Whitelist(values.iter().map(|v| v.to_string()).collect()),
        }
    }

    pub fn blacklist(key: &str, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            kind: RuleKind::Blacklist(values.iter().map(|v| v.to_string()).collect()),
        }
    }
}

/// Parses a rule list.
pub fn parse_area_rules(json: &str) -> Result<Vec<AreaRule>, ConfigError> {
    let raw: Vec<RawRule> = serde_json::from_str(json)?;
    raw.into_iter().map(AreaRule::try_from).collect()
}

pub fn load_area_rules(path: impl AsRef<Path>) -> Result<Vec<AreaRule>, ConfigError> {
    parse_area_rules(&std::fs::read_to_string(path)?)
}

/// The bundled rule list.
pub fn default_area_rules() -> Result<Vec<AreaRule>, ConfigError> {
    parse_area_rules(DEFAULT_AREA_RULES)
}

/// Parses a JSON list of tag keys that carry no meaning of their own.
pub fn parse_uninteresting_keys(json: &str) -> Result<Vec<String>, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// The bundled list of uninteresting keys (`source`, `created_by`, ...).
pub fn default_uninteresting_keys() -> Result<Vec<String>, ConfigError> {
    parse_uninteresting_keys(DEFAULT_UNINTERESTING_KEYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_kinds() {
        let rules = parse_area_rules(
            r#"[
                {"key": "building", "polygon": "all"},
                {"key": "highway", "polygon": "whitelist", "values": ["services"]},
                {"key": "natural", "polygon": "blacklist", "values": ["coastline", "cliff"]}
            ]"#,
        )
        .unwrap();
        assert_eq!(rules[0], AreaRule::all("building"));
        assert_eq!(rules[1], AreaRule::whitelist("highway", &["services"]));
        assert_eq!(rules[2], AreaRule::blacklist("natural", &["coastline", "cliff"]));
    }

    #[test]
    fn test_unknown_rule_type() {
        let err = parse_area_rules(r#"[{"key": "foo", "polygon": "sometimes"}]"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownRuleType { ref key, ref kind } if key == "foo" && kind == "sometimes"
        ));
        assert!(parse_area_rules("{").is_err());
    }

    #[test]
    fn test_bundled_lists_parse() {
        let rules = default_area_rules().unwrap();
        assert!(rules.iter().any(|r| r.key == "building" && r.kind == RuleKind::All));
        assert!(rules.iter().any(|r| r.key == "amenity"));
        let keys = default_uninteresting_keys().unwrap();
        assert!(keys.iter().any(|k| k == "created_by"));
    }
}
