//! Tag vocabulary: the mapping between tag strings and the integer ids stored
//! in records.
//!
//! Key ids are global, value ids are scoped to their key and role ids are
//! global. Unknown strings and ids map to `None`.

use rustc_hash::FxHashMap;

use crate::model::Tag;

/// String/id translation for keys, tags and roles.
pub trait TagTranslator {
    fn key_to_id(&self, key: &str) -> Option<u32>;
    fn tag_to_id(&self, key: &str, value: &str) -> Option<Tag>;
    fn role_to_id(&self, role: &str) -> Option<u32>;
    fn id_to_key(&self, key: u32) -> Option<&str>;
    fn id_to_tag(&self, tag: Tag) -> Option<(&str, &str)>;
    fn id_to_role(&self, role: u32) -> Option<&str>;
}

/// Interned strings with dense ids.
#[derive(Debug, Clone, Default)]
struct StringTable {
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    fn id(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    fn get(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }
}

/// In-memory vocabulary built by interning strings.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    keys: StringTable,
    /// Value table of each key, indexed by key id.
    values: Vec<StringTable>,
    roles: StringTable,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `key`, assigning the next free one if it is new.
    pub fn intern_key(&mut self, key: &str) -> u32 {
        let id = self.keys.intern(key);
        if self.values.len() <= id as usize {
            self.values.resize_with(id as usize + 1, StringTable::default);
        }
        id
    }

    pub fn intern_tag(&mut self, key: &str, value: &str) -> Tag {
        let key_id = self.intern_key(key);
        let value_id = self.values[key_id as usize].intern(value);
        Tag::new(key_id, value_id)
    }

    pub fn intern_role(&mut self, role: &str) -> u32 {
        self.roles.intern(role)
    }

    pub fn key_count(&self) -> usize {
        self.keys.strings.len()
    }
}

impl TagTranslator for Vocabulary {
    fn key_to_id(&self, key: &str) -> Option<u32> {
        self.keys.id(key)
    }

    fn tag_to_id(&self, key: &str, value: &str) -> Option<Tag> {
        let key_id = self.keys.id(key)?;
        let value_id = self.values.get(key_id as usize)?.id(value)?;
        Some(Tag::new(key_id, value_id))
    }

    fn role_to_id(&self, role: &str) -> Option<u32> {
        self.roles.id(role)
    }

    fn id_to_key(&self, key: u32) -> Option<&str> {
        self.keys.get(key)
    }

    fn id_to_tag(&self, tag: Tag) -> Option<(&str, &str)> {
        let key = self.keys.get(tag.key)?;
        let value = self.values.get(tag.key as usize)?.get(tag.value)?;
        Some((key, value))
    }

    fn id_to_role(&self, role: u32) -> Option<&str> {
        self.roles.get(role)
    }
}
