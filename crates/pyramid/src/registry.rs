use {crate::error::PyramidError, std::fmt::Display};

/// Ordered key → value table built once, in a fixed key order.
///
/// Iteration always follows insertion order, which is the declaration order
/// of the configuration that produced the keys.
#[derive(Debug, Clone)]
pub struct Registry<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: PartialEq + Display, V> Registry<K, V> {
    /// Build one value per key, in key order.
    pub fn build<E>(keys: impl IntoIterator<Item = K>, mut f: impl FnMut(&K) -> Result<V, E>) -> Result<Self, E> {
        let mut entries = Vec::new();
        for key in keys {
            let value = f(&key)?;
            entries.push((key, value));
        }
        Ok(Self { entries })
    }

    /// Reorder `entries` to follow `keys`, failing if any key is missing.
    pub fn complete(keys: &[K], mut entries: Vec<(K, V)>) -> Result<Self, PyramidError>
    where
        K: Clone,
    {
        let mut ordered = Vec::with_capacity(keys.len());
        for key in keys {
            let position = entries
                .iter()
                .position(|(k, _)| k == key)
                .ok_or_else(|| PyramidError::shape(key.to_string(), "no value produced for this key"))?;
            ordered.push(entries.swap_remove(position));
        }
        Ok(Self { entries: ordered })
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<(K, V)> {
        self.entries
    }
}
