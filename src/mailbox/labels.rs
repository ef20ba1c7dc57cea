//! Label name ↔ id mapping.
//!
//! The engine speaks label names; the Gmail API speaks ids. System labels
//! (`INBOX`, `UNREAD`, ...) use the same string for both.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct LabelCache {
    by_name: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

impl LabelCache {
    /// Build from `(id, name)` pairs as returned by `labels.list`.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut cache = Self::default();
        for (id, name) in pairs {
            cache.insert(id, name);
        }
        cache
    }

    pub fn insert(&mut self, id: String, name: String) {
        self.by_name.insert(name.clone(), id.clone());
        self.by_id.insert(id, name);
    }

    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Names for `ids`. Unknown ids pass through unchanged.
    pub fn names_for<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        ids.into_iter()
            .map(|id| self.by_id.get(id).cloned().unwrap_or_else(|| id.clone()))
            .collect()
    }

    /// Names from `wanted` with no id in the cache.
    pub fn missing<'a>(&self, wanted: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        wanted
            .into_iter()
            .filter(|name| !self.by_name.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
