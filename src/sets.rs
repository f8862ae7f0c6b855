//! Collection-style handles over the keys, entries and values of a view.
//!
//! None of these own any data. Removal through a `KeySet` or `EntrySet`
//! removes from the underlying tree; adding through them is not
//! supported, since a key alone says nothing about its value.

use super::*;

/// The keys of a `SubMap`, in the view's order.
#[derive(Debug, Clone)]
pub struct KeySet<K, V> {
    map: SubMap<K, V>,
}

impl<K: Key, V: Value> KeySet<K, V> {
    pub(crate) fn new(map: SubMap<K, V>) -> KeySet<K, V> {
        KeySet { map }
    }

    /// Iterate over the keys.
    pub fn iter(&self) -> KeysIter<K, V> {
        self.map.iter().keys()
    }

    /// The number of keys, see `SubMap::len`.
    pub fn len(&self) -> Result<usize> {
        self.map.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> Result<bool> {
        self.map.is_empty()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> Result<bool> {
        self.map.contains_key(key)
    }

    /// Removes `key` and its value, returning whether it was present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.map.remove(key)?.is_some())
    }

    /// Removes every key for which `keep` returns `false`.
    pub fn retain<F: FnMut(&K) -> bool>(&self, mut keep: F) -> Result<()> {
        let mut iter = self.iter();
        while let Some(key) = iter.next() {
            if !keep(&key?) {
                iter.remove()?;
            }
        }
        Ok(())
    }

    /// Removes every key, and its value.
    pub fn clear(&self) -> Result<()> {
        self.map.clear()
    }

    /// The first key. Fails with `NotFound` if there are none.
    pub fn first(&self) -> Result<K> {
        self.map.first_key()
    }

    /// The last key. Fails with `NotFound` if there are none.
    pub fn last(&self) -> Result<K> {
        self.map.last_key()
    }

    /// The same keys in the opposite order.
    pub fn descending(&self) -> KeySet<K, V> {
        KeySet::new(self.map.descending_map())
    }

    /// Always fails with `Unsupported`.
    pub fn insert(&self, key: K) -> Result<bool> {
        Err(Error::Unsupported(format!(
            "cannot add key {:?} without a value",
            key
        )))
    }
}

/// The entries of a `SubMap`, in the view's order.
#[derive(Debug, Clone)]
pub struct EntrySet<K, V> {
    map: SubMap<K, V>,
}

impl<K: Key, V: Value> EntrySet<K, V> {
    pub(crate) fn new(map: SubMap<K, V>) -> EntrySet<K, V> {
        EntrySet { map }
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> Iter<K, V> {
        self.map.iter()
    }

    /// The number of entries, see `SubMap::len`.
    pub fn len(&self) -> Result<usize> {
        self.map.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> Result<bool> {
        self.map.is_empty()
    }

    /// Whether the view maps `entry.0` to exactly `entry.1`.
    pub fn contains(&self, entry: &(K, V)) -> Result<bool>
    where
        V: PartialEq,
    {
        Ok(self.map.get(&entry.0)?.as_ref() == Some(&entry.1))
    }

    /// Removes `entry.0` only while it still maps to `entry.1`.
    pub fn remove(&self, entry: &(K, V)) -> Result<bool>
    where
        V: PartialEq,
    {
        self.map.remove_if_equal(&entry.0, &entry.1)
    }

    /// Removes every entry for which `keep` returns `false`.
    pub fn retain<F: FnMut(&K, &V) -> bool>(&self, mut keep: F) -> Result<()> {
        let mut iter = self.iter();
        while let Some(entry) = iter.next() {
            let (k, v) = entry?;
            if !keep(&k, &v) {
                iter.remove()?;
            }
        }
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<()> {
        self.map.clear()
    }

    /// Always fails with `Unsupported`. Insert through the map instead.
    pub fn insert(&self, entry: (K, V)) -> Result<bool> {
        Err(Error::Unsupported(format!(
            "cannot add entry for {:?} through an entry set",
            entry.0
        )))
    }
}

/// The values of a `SubMap`, in the view's key order.
#[derive(Debug, Clone)]
pub struct Values<K, V> {
    map: SubMap<K, V>,
}

impl<K: Key, V: Value> Values<K, V> {
    pub(crate) fn new(map: SubMap<K, V>) -> Values<K, V> {
        Values { map }
    }

    /// Iterate over the values.
    pub fn iter(&self) -> ValuesIter<K, V> {
        self.map.iter().values()
    }

    /// The number of values, see `SubMap::len`.
    pub fn len(&self) -> Result<usize> {
        self.map.len()
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> Result<bool> {
        self.map.is_empty()
    }

    /// Whether any key maps to `value`. This scans the whole view.
    pub fn contains(&self, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        for v in self.iter() {
            if v? == *value {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
