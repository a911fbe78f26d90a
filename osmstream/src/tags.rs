/// Ordered tag dictionary attached to every entity.
///
/// Keys are unique within one dictionary and iteration yields pairs in the
/// order they appeared in the source. OSM entities rarely carry more than a
/// handful of tags, so lookups scan linearly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pairs: Vec<(String, String)>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, or `None` if the entity has no such tag.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterator over `(key, value)` pairs in source order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &str)> + '_ {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Appends a pair. Returns the pair back if `key` is already present.
    pub(crate) fn insert(&mut self, key: String, value: String) -> Result<(), (String, String)> {
        if self.contains_key(&key) {
            return Err((key, value));
        }
        self.pairs.push((key, value));
        Ok(())
    }
}
