//! Ordered string metadata bags (title, language, ICY metadata, ...).

/// An ordered collection of key/value string pairs.
///
/// Keys are matched case-insensitively; insertion order is preserved so
/// metadata displays the way the container wrote it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tags {
    entries: Vec<(String, String)>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing an existing entry with the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Look up a tag value by key (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Merge `other` into `self`; entries from `other` win on conflict.
    pub fn merge(&mut self, other: &Tags) {
        for (k, v) in &other.entries {
            self.set(k.clone(), v.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively() {
        let mut tags = Tags::new();
        tags.set("Title", "a");
        tags.set("TITLE", "b");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("title"), Some("b"));
    }

    #[test]
    fn merge_overrides_and_appends() {
        let mut a = Tags::new();
        a.set("title", "old");
        a.set("artist", "x");
        let mut b = Tags::new();
        b.set("TITLE", "new");
        b.set("album", "y");
        a.merge(&b);
        assert_eq!(a.get("title"), Some("new"));
        assert_eq!(a.get("artist"), Some("x"));
        assert_eq!(a.get("album"), Some("y"));
        assert_eq!(a.len(), 3);
    }
}
