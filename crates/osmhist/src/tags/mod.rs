//! Tag vocabulary and area/line interpretation.

pub mod interpreter;
pub mod rules;
pub mod vocabulary;

pub use interpreter::{Classification, TagInterpreter};
pub use rules::{default_area_rules, default_uninteresting_keys, load_area_rules, parse_area_rules, AreaRule, RuleKind};
pub use vocabulary::{TagTranslator, Vocabulary};
