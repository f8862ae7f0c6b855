use std::{fmt, ops::Bound, sync::Arc};

use super::*;
use crate::span::bound;

/// A bounded, possibly descending window onto a `Tree`.
///
/// A `SubMap` holds no entries of its own. Every call reads and writes
/// the underlying tree, restricted to the view's key range and presented
/// in the view's order, so changes made through one view are visible
/// through the tree and every other view over it.
///
/// Views are narrowed with `sub_map`, `head_map` and `tail_map`, and
/// flipped with `descending_map`. Narrowing always happens relative to
/// the view it is called on: asking for a range reaching past the
/// view's own bounds fails with `InvalidRange`. On a descending view,
/// "head" and "tail", "lower" and "higher", and "first" and "last" are
/// read in descending order.
///
/// # Examples
///
/// ```
/// # fn main() -> blinkmap::Result<()> {
/// let tree = blinkmap::Config::new().tree::<u32, ()>()?;
/// for i in 0..10 {
///     tree.insert(i, ())?;
/// }
///
/// let middle = tree.sub_map(3, 7)?;
/// assert_eq!(middle.len()?, 4);
/// assert!(middle.tail_map(2).is_err());
///
/// let backward = middle.descending_map();
/// assert_eq!(backward.first_key()?, 6);
/// assert_eq!(backward.higher_key(&5)?, Some(4));
/// let head: Vec<u32> =
///     backward.head_map(5)?.keys().iter().collect::<blinkmap::Result<_>>()?;
/// assert_eq!(head, vec![6]);
/// # Ok(()) }
/// ```
pub struct SubMap<K, V> {
    tree: Tree<K, V>,
    span: Span<K>,
    direction: Direction,
}

impl<K: Clone, V> Clone for SubMap<K, V> {
    fn clone(&self) -> SubMap<K, V> {
        SubMap {
            tree: self.tree.clone(),
            span: self.span.clone(),
            direction: self.direction,
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for SubMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubMap")
            .field("root_cell", &self.tree.0.root_cell)
            .field("lo", &self.span.lo)
            .field("hi", &self.span.hi)
            .field("direction", &self.direction)
            .finish()
    }
}

impl<K: Key, V: Value> SubMap<K, V> {
    pub(crate) fn new(
        tree: Tree<K, V>,
        span: Span<K>,
        direction: Direction,
    ) -> SubMap<K, V> {
        SubMap { tree, span, direction }
    }

    fn in_span(&self, key: &K) -> Result<bool> {
        self.span.contains(key, self.tree.cmp())
    }

    fn reject_outside(&self, key: &K) -> Result<()> {
        if self.in_span(key)? {
            Ok(())
        } else {
            Err(Error::invalid_range(format!(
                "key {:?} lies outside the view",
                key
            )))
        }
    }

    /// The comparator of the underlying tree, or `None` for its
    /// natural order. Descending views report the same comparator.
    pub fn comparator(&self) -> Option<Arc<dyn Comparator<K>>> {
        self.tree.comparator()
    }

    /// Whether this view presents its keys in descending order.
    pub fn is_descending(&self) -> bool {
        self.direction == Direction::Descending
    }

    /// Retrieve a value, if its key lies within this view.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        if !self.in_span(key)? {
            return Ok(None);
        }
        self.tree.get(key)
    }

    /// Whether this view holds a value for `key`.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.in_span(key)? && self.tree.contains_key(key)?)
    }

    /// Insert a key within this view, returning the value it replaced.
    /// Keys outside the view are rejected with `InvalidRange`.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.reject_outside(&key)?;
        self.tree.insert(key, value)
    }

    /// Remove a key, returning its value. Keys outside the view are
    /// never removed.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        if !self.in_span(key)? {
            return Ok(None);
        }
        self.tree.remove(key)
    }

    /// `Tree::insert_if_absent`, restricted to this view.
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        self.reject_outside(&key)?;
        self.tree.insert_if_absent(key, value)
    }

    /// `Tree::replace`, restricted to this view.
    pub fn replace(&self, key: &K, value: V) -> Result<Option<V>> {
        if !self.in_span(key)? {
            return Ok(None);
        }
        self.tree.replace(key, value)
    }

    /// `Tree::replace_if_equal`, restricted to this view.
    pub fn replace_if_equal(&self, key: &K, old: &V, new: V) -> Result<bool>
    where
        V: PartialEq,
    {
        Ok(self.in_span(key)? && self.tree.replace_if_equal(key, old, new)?)
    }

    /// `Tree::remove_if_equal`, restricted to this view.
    pub fn remove_if_equal(&self, key: &K, old: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        Ok(self.in_span(key)? && self.tree.remove_if_equal(key, old)?)
    }

    /// Counts the entries in this view.
    ///
    /// Only a counted tree viewed without bounds answers this without
    /// scanning. Under concurrent modification a scanned count is
    /// approximate.
    pub fn len(&self) -> Result<usize> {
        if self.span.is_full() && self.tree.0.counter.is_some() {
            return self.tree.len();
        }
        let mut count = 0;
        for item in self.keys().iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Whether this view holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tree.first_in(&self.span, self.direction)?.is_none())
    }

    /// Removes every entry in this view, one at a time.
    pub fn clear(&self) -> Result<()> {
        let mut cleared = 0_usize;
        while self.tree.pop_in(&self.span, self.direction)?.is_some() {
            cleared += 1;
        }
        trace!("cleared {} entries from {:?}", cleared, self);
        Ok(())
    }

    fn first_cursor(&self) -> Result<Option<navigation::Cursor<K, V>>> {
        self.tree.first_in(&self.span, self.direction)
    }

    fn last_cursor(&self) -> Result<Option<navigation::Cursor<K, V>>> {
        self.tree.first_in(&self.span, self.direction.reverse())
    }

    fn relative(
        &self,
        key: &K,
        relation: Relation,
    ) -> Result<Option<navigation::Cursor<K, V>>> {
        self.tree.relative_in(&self.span, self.direction, key, relation)
    }

    fn relative_key(&self, key: &K, relation: Relation) -> Result<Option<K>> {
        Ok(self.relative(key, relation)?.map(|c| c.key().clone()))
    }

    fn relative_entry(
        &self,
        key: &K,
        relation: Relation,
    ) -> Result<Option<(K, V)>> {
        match self.relative(key, relation)? {
            Some(cursor) => cursor.entry().map(Some),
            None => Ok(None),
        }
    }

    /// The first key in this view's order. Fails with `NotFound` if
    /// the view is empty.
    pub fn first_key(&self) -> Result<K> {
        self.first_cursor()?.map(|c| c.key().clone()).ok_or(Error::NotFound)
    }

    /// The last key in this view's order. Fails with `NotFound` if the
    /// view is empty.
    pub fn last_key(&self) -> Result<K> {
        self.last_cursor()?.map(|c| c.key().clone()).ok_or(Error::NotFound)
    }

    /// The first entry in this view's order.
    pub fn first_entry(&self) -> Result<Option<(K, V)>> {
        self.first_cursor()?.map(|c| c.entry()).transpose()
    }

    /// The last entry in this view's order.
    pub fn last_entry(&self) -> Result<Option<(K, V)>> {
        self.last_cursor()?.map(|c| c.entry()).transpose()
    }

    /// The key strictly before `key` in this view's order.
    pub fn lower_key(&self, key: &K) -> Result<Option<K>> {
        self.relative_key(key, Relation::Lower)
    }

    /// The entry strictly before `key` in this view's order.
    pub fn lower_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.relative_entry(key, Relation::Lower)
    }

    /// `key` itself if present, otherwise the key before it.
    pub fn floor_key(&self, key: &K) -> Result<Option<K>> {
        self.relative_key(key, Relation::Floor)
    }

    /// The entry for `key` if present, otherwise the one before it.
    pub fn floor_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.relative_entry(key, Relation::Floor)
    }

    /// `key` itself if present, otherwise the key after it.
    pub fn ceiling_key(&self, key: &K) -> Result<Option<K>> {
        self.relative_key(key, Relation::Ceiling)
    }

    /// The entry for `key` if present, otherwise the one after it.
    pub fn ceiling_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.relative_entry(key, Relation::Ceiling)
    }

    /// The key strictly after `key` in this view's order.
    pub fn higher_key(&self, key: &K) -> Result<Option<K>> {
        self.relative_key(key, Relation::Higher)
    }

    /// The entry strictly after `key` in this view's order.
    pub fn higher_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.relative_entry(key, Relation::Higher)
    }

    /// Atomically removes and returns the first entry of this view.
    pub fn pop_first(&self) -> Result<Option<(K, V)>> {
        self.tree.pop_in(&self.span, self.direction)
    }

    /// Atomically removes and returns the last entry of this view.
    pub fn pop_last(&self) -> Result<Option<(K, V)>> {
        self.tree.pop_in(&self.span, self.direction.reverse())
    }

    /// Iterate over the entries of this view, in its order.
    pub fn iter(&self) -> Iter<K, V> {
        Iter::new(self.tree.clone(), self.span.clone(), self.direction)
    }

    /// The keys of this view.
    pub fn keys(&self) -> KeySet<K, V> {
        KeySet::new(self.clone())
    }

    /// The entries of this view.
    pub fn entries(&self) -> EntrySet<K, V> {
        EntrySet::new(self.clone())
    }

    /// The values of this view, in key order.
    pub fn values(&self) -> Values<K, V> {
        Values::new(self.clone())
    }

    /// This view in the opposite order, over the same keys.
    pub fn descending_map(&self) -> SubMap<K, V> {
        let direction = self.direction.reverse();
        SubMap::new(self.tree.clone(), self.span.clone(), direction)
    }

    // `first` and `last` are given in this view's order.
    fn narrow(&self, first: Bound<K>, last: Bound<K>) -> Result<SubMap<K, V>> {
        let (lo, hi) = match self.direction {
            Direction::Ascending => (first, last),
            Direction::Descending => (last, first),
        };
        let span = self.span.narrow(lo, hi, self.tree.cmp())?;
        Ok(SubMap::new(self.tree.clone(), span, self.direction))
    }

    /// A view of the keys from `from` inclusive to `to` exclusive, in
    /// this view's order.
    pub fn sub_map(&self, from: K, to: K) -> Result<SubMap<K, V>> {
        self.sub_map_with(from, true, to, false)
    }

    /// A view of the keys from `from` to `to` in this view's order,
    /// with explicit inclusivity for both ends.
    pub fn sub_map_with(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> Result<SubMap<K, V>> {
        self.narrow(bound(from, from_inclusive), bound(to, to_inclusive))
    }

    /// A view of the keys before `to`, exclusive, in this view's order.
    pub fn head_map(&self, to: K) -> Result<SubMap<K, V>> {
        self.head_map_with(to, false)
    }

    /// A view of the keys before `to` in this view's order, including
    /// it if `inclusive`.
    pub fn head_map_with(
        &self,
        to: K,
        inclusive: bool,
    ) -> Result<SubMap<K, V>> {
        self.narrow(Bound::Unbounded, bound(to, inclusive))
    }

    /// A view of the keys from `from` onward, inclusive, in this view's
    /// order.
    pub fn tail_map(&self, from: K) -> Result<SubMap<K, V>> {
        self.tail_map_with(from, true)
    }

    /// A view of the keys after `from` in this view's order, including
    /// it if `inclusive`.
    pub fn tail_map_with(
        &self,
        from: K,
        inclusive: bool,
    ) -> Result<SubMap<K, V>> {
        self.narrow(bound(from, inclusive), Bound::Unbounded)
    }
}
