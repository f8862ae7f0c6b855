use std::{
    cmp::Ordering,
    fmt::{self, Debug},
    ops::RangeBounds,
    sync::Arc,
};

use fnv::FnvHashSet;

use super::*;

#[cfg(any(test, feature = "lock_free_delays"))]
const MAX_LOOPS: usize = usize::MAX;

#[cfg(not(any(test, feature = "lock_free_delays")))]
const MAX_LOOPS: usize = 1_000_000;

/// What a read-modify-write does with the value it found.
pub(crate) enum Action<V> {
    Keep,
    Set(V),
    Remove,
}

/// Where a descent is headed.
pub(crate) enum Seek<'a, K> {
    /// The leaf whose range contains the key.
    Key(&'a K),
    /// The leaf holding the greatest keys strictly below the key.
    Below(&'a K),
    Leftmost,
    Rightmost,
}

impl<K> Clone for Seek<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Seek<'_, K> {}

impl<K: Key> Seek<'_, K> {
    /// The target lies to the right of this node's range.
    fn undershot<V: Value>(
        self,
        node: &Node<K, V>,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        match self {
            Seek::Key(key) => node.is_left_of(key, cmp),
            Seek::Below(key) => match &node.hi {
                Some(hi) => Ok(cmp.compare(key, hi)? == Ordering::Greater),
                None => Ok(false),
            },
            Seek::Leftmost => Ok(false),
            Seek::Rightmost => Ok(node.hi.is_some()),
        }
    }

    /// The target lies to the left of this node's range. Splits only
    /// ever move ranges rightward, so this means we were handed a stale
    /// pointer and must start over.
    fn overshot<V: Value>(
        self,
        node: &Node<K, V>,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        match self {
            Seek::Key(key) => node.is_right_of(key, cmp),
            Seek::Below(key) => match &node.lo {
                Some(lo) => Ok(cmp.compare(key, lo)? != Ordering::Greater),
                None => Ok(false),
            },
            Seek::Leftmost => Ok(node.lo.is_some()),
            Seek::Rightmost => Ok(false),
        }
    }

    fn child<V: Value>(
        self,
        node: &Node<K, V>,
        cmp: &dyn Comparator<K>,
    ) -> Result<RecId> {
        let child = match self {
            Seek::Key(key) => Some(node.index_next_node(key, cmp)?),
            Seek::Below(key) => Some(node.index_node_below(key, cmp)?),
            Seek::Leftmost => node.leftmost_child(),
            Seek::Rightmost => node.rightmost_child(),
        };
        child.ok_or_else(|| {
            Error::ReportableBug("directory node without children".into())
        })
    }
}

impl<K: Debug> Debug for Seek<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seek::Key(key) => write!(f, "Key({:?})", key),
            Seek::Below(key) => write!(f, "Below({:?})", key),
            Seek::Leftmost => f.write_str("Leftmost"),
            Seek::Rightmost => f.write_str("Rightmost"),
        }
    }
}

pub(crate) fn encode_root_cell(
    root: RecId,
    counter: Option<RecId>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(18);
    varint::push(root.get(), &mut buf);
    varint::push(counter.map_or(0, RecId::get), &mut buf);
    buf
}

fn decode_root_cell(
    cell: RecId,
    raw: &[u8],
) -> Result<(RecId, Option<RecId>)> {
    let located = |e: Error| match e {
        Error::Corruption { why, .. } => {
            Error::Corruption { at: Some(cell), why }
        }
        other => other,
    };
    let mut buf = raw;
    let root = varint::take(&mut buf).map_err(located)?;
    let counter = varint::take(&mut buf).map_err(located)?;
    let root = RecId::new(root).ok_or_else(|| {
        Error::corruption(Some(cell), "root cell points at record 0")
    })?;
    Ok((root, RecId::new(counter)))
}

pub(crate) struct TreeInner<K, V> {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) root_cell: RecId,
    pub(crate) counter: Option<RecId>,
    pub(crate) comparator: Arc<dyn Comparator<K>>,
    pub(crate) nodes: NodeSerializer<K, V>,
    pub(crate) fanout: usize,
}

/// A concurrent ordered map stored as a B-link tree of records.
///
/// Cloning a `Tree` is cheap and yields another handle to the same map.
///
/// # Examples
///
/// ```
/// # fn main() -> blinkmap::Result<()> {
/// let tree = blinkmap::Config::new().tree::<u64, String>()?;
///
/// assert_eq!(tree.insert(2, "two".into())?, None);
/// assert_eq!(tree.insert(2, "deux".into())?, Some("two".into()));
/// assert_eq!(tree.get(&2)?, Some("deux".into()));
/// assert_eq!(tree.remove(&2)?, Some("deux".into()));
/// assert!(tree.is_empty()?);
/// # Ok(()) }
/// ```
pub struct Tree<K, V>(pub(crate) Arc<TreeInner<K, V>>);

impl<K, V> Clone for Tree<K, V> {
    fn clone(&self) -> Tree<K, V> {
        Tree(self.0.clone())
    }
}

impl<K: Key, V: Value> Tree<K, V> {
    pub(crate) fn create(
        store: Arc<dyn Store>,
        comparator: Arc<dyn Comparator<K>>,
        nodes: NodeSerializer<K, V>,
        fanout: usize,
        counted: bool,
    ) -> Result<Tree<K, V>> {
        let mut buf = vec![];
        nodes.serialize(&Node::new_empty_leaf(), &mut buf)?;
        let root = store.put_raw(buf)?;

        let counter = if counted {
            let mut buf = vec![];
            varint::push(0, &mut buf);
            Some(store.put_raw(buf)?)
        } else {
            None
        };

        let root_cell = store.put_raw(encode_root_cell(root, counter))?;
        debug!(
            "created tree with root cell {} and root node {}",
            root_cell, root
        );

        Ok(Tree(Arc::new(TreeInner {
            store,
            root_cell,
            counter,
            comparator,
            nodes,
            fanout,
        })))
    }

    pub(crate) fn open(
        store: Arc<dyn Store>,
        root_cell: RecId,
        comparator: Arc<dyn Comparator<K>>,
        nodes: NodeSerializer<K, V>,
        fanout: usize,
    ) -> Result<Tree<K, V>> {
        let raw = store
            .get_raw(root_cell)?
            .ok_or(Error::CollectionNotFound(root_cell))?;
        let (root, counter) = decode_root_cell(root_cell, &raw)?;
        debug!(
            "opened tree with root cell {} at root node {}",
            root_cell, root
        );

        Ok(Tree(Arc::new(TreeInner {
            store,
            root_cell,
            counter,
            comparator,
            nodes,
            fanout,
        })))
    }

    pub(crate) fn cmp(&self) -> &dyn Comparator<K> {
        &*self.0.comparator
    }

    /// The record holding this tree's root pointer. Pass it to
    /// `Config::open_tree_with` to reattach to the same tree later.
    pub fn root_cell(&self) -> RecId {
        self.0.root_cell
    }

    /// The comparator this tree orders its keys by, or `None` if it
    /// uses the natural order of `K`.
    pub fn comparator(&self) -> Option<Arc<dyn Comparator<K>>> {
        if self.0.comparator.is_natural() {
            None
        } else {
            Some(self.0.comparator.clone())
        }
    }

    /// Whether ranges of this tree may be combined with ranges of
    /// `other`: both must order keys with the same comparator instance,
    /// or both with the natural order.
    pub fn is_range_compatible<V2>(&self, other: &Tree<K, V2>) -> bool {
        same_ordering(&self.0.comparator, &other.0.comparator)
    }

    /// Insert a key to a new value, returning the last value if it
    /// was set.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        trace!("inserting key {:?}", key);
        retry(|| {
            let res = self.update_inner(&key, &mut |_: Option<&V>| {
                Action::Set(value.clone())
            })?;
            Ok(res.map(|(last, _)| last))
        })
    }

    /// Retrieve a value from the `Tree` if it exists.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        trace!("getting key {:?}", key);
        let view = self.view_for_key(key)?;
        Ok(match view.find(key, self.cmp())? {
            Ok(index) => view.leaf_value(index).cloned(),
            Err(_) => None,
        })
    }

    /// Returns `true` if the `Tree` contains a value for the specified
    /// key.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        let view = self.view_for_key(key)?;
        Ok(view.find(key, self.cmp())?.is_ok())
    }

    /// Delete a value, returning the old value if it existed.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        trace!("removing key {:?}", key);
        retry(|| {
            let res =
                self.update_inner(key, &mut |_: Option<&V>| Action::Remove)?;
            Ok(res.map(|(last, _)| last))
        })
    }

    /// Sets `key` to `value` only if it has no value yet. Returns the
    /// existing value, if any, in which case nothing was written.
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        retry(|| {
            let res = self.update_inner(&key, &mut |current: Option<&V>| {
                match current {
                    Some(_) => Action::Keep,
                    None => Action::Set(value.clone()),
                }
            })?;
            Ok(res.map(|(last, _)| last))
        })
    }

    /// Sets `key` to `value` only if it already has a value, returning
    /// the value that was replaced.
    pub fn replace(&self, key: &K, value: V) -> Result<Option<V>> {
        retry(|| {
            let res = self.update_inner(key, &mut |current: Option<&V>| {
                match current {
                    Some(_) => Action::Set(value.clone()),
                    None => Action::Keep,
                }
            })?;
            Ok(res.map(|(last, _)| last))
        })
    }

    /// Sets `key` to `new` only if its current value equals `old`.
    pub fn replace_if_equal(&self, key: &K, old: &V, new: V) -> Result<bool>
    where
        V: PartialEq,
    {
        retry(|| {
            let res = self.update_inner(key, &mut |current: Option<&V>| {
                if current == Some(old) {
                    Action::Set(new.clone())
                } else {
                    Action::Keep
                }
            })?;
            Ok(res.map(|(_, applied)| applied))
        })
    }

    /// Removes `key` only if its current value equals `old`.
    pub fn remove_if_equal(&self, key: &K, old: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        retry(|| {
            let res = self.update_inner(key, &mut |current: Option<&V>| {
                if current == Some(old) {
                    Action::Remove
                } else {
                    Action::Keep
                }
            })?;
            Ok(res.map(|(_, applied)| applied))
        })
    }

    /// Compare and swap. Capable of unique creation, conditional
    /// modification, or deletion. If old is `None`, this will only set the
    /// value if it doesn't exist yet. If new is `None`, will delete the
    /// value if old is correct. If both old and new are `Some`, will modify
    /// the value if old is correct.
    ///
    /// It returns `Ok(Ok(()))` if the operation finishes successfully, and
    /// `Ok(Err(CompareAndSwapError { current, proposed }))` if the current
    /// value did not match `old`.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> blinkmap::Result<()> {
    /// let tree = blinkmap::Config::new().tree::<u8, u8>()?;
    ///
    /// // unique creation
    /// assert_eq!(tree.compare_and_swap(&1, None, Some(10))?, Ok(()));
    ///
    /// // conditional modification
    /// assert_eq!(tree.compare_and_swap(&1, Some(&10), Some(20))?, Ok(()));
    ///
    /// // failed conditional modification
    /// let failed =
    ///     tree.compare_and_swap(&1, Some(&30), Some(40))?.unwrap_err();
    /// assert_eq!(failed.current, Some(20));
    /// assert_eq!(failed.proposed, Some(40));
    ///
    /// // conditional deletion
    /// assert_eq!(tree.compare_and_swap(&1, Some(&20), None)?, Ok(()));
    /// assert_eq!(tree.get(&1)?, None);
    /// # Ok(()) }
    /// ```
    pub fn compare_and_swap(
        &self,
        key: &K,
        old: Option<&V>,
        new: Option<V>,
    ) -> CompareAndSwapResult<V>
    where
        V: PartialEq,
    {
        trace!("cas'ing key {:?}", key);
        retry(|| {
            let mut matched = false;
            let res = self.update_inner(key, &mut |current: Option<&V>| {
                matched = current == old;
                match (&new, matched) {
                    (_, false) => Action::Keep,
                    (Some(new), true) => Action::Set(new.clone()),
                    (None, true) => Action::Remove,
                }
            })?;
            Ok(res.map(|(current, _)| {
                if matched {
                    Ok(())
                } else {
                    Err(CompareAndSwapError {
                        current,
                        proposed: new.clone(),
                    })
                }
            }))
        })
    }

    /// Fetch the value, apply a function to it and return the previous
    /// value. Returning `None` from `f` removes the key.
    ///
    /// # Note
    ///
    /// This may call the function multiple times if the value has been
    /// changed from other threads in the meantime.
    pub fn fetch_and_update<F>(
        &self,
        key: &K,
        mut f: F,
    ) -> Result<Option<V>>
    where
        F: FnMut(Option<&V>) -> Option<V>,
    {
        retry(|| {
            let res = self.update_inner(key, &mut |current: Option<&V>| {
                match (f(current), current) {
                    (Some(next), _) => Action::Set(next),
                    (None, Some(_)) => Action::Remove,
                    (None, None) => Action::Keep,
                }
            })?;
            Ok(res.map(|(last, _)| last))
        })
    }

    /// Fetch the value, apply a function to it and return the result.
    ///
    /// # Note
    ///
    /// This may call the function multiple times if the value has been
    /// changed from other threads in the meantime.
    pub fn update_and_fetch<F>(
        &self,
        key: &K,
        mut f: F,
    ) -> Result<Option<V>>
    where
        F: FnMut(Option<&V>) -> Option<V>,
    {
        retry(|| {
            let mut computed = None;
            let res = self.update_inner(key, &mut |current: Option<&V>| {
                computed = f(current);
                match (&computed, current) {
                    (Some(next), _) => Action::Set(next.clone()),
                    (None, Some(_)) => Action::Remove,
                    (None, None) => Action::Keep,
                }
            })?;
            Ok(res.map(|_| computed.take()))
        })
    }

    /// Returns the number of elements in this tree.
    ///
    /// Trees created with `Config::counted` read a maintained counter.
    /// Otherwise this performs a full O(n) scan, and under concurrent
    /// modification the result is only approximate.
    pub fn len(&self) -> Result<usize> {
        if let Some(counter) = self.0.counter {
            let (count, _) = self.read_counter(counter)?;
            return usize::try_from(count).map_err(|_| {
                Error::corruption(Some(counter), "count overflows usize")
            });
        }
        self.as_map().len()
    }

    /// Returns `true` if the `Tree` contains no elements.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.first_entry()?.is_none())
    }

    /// Clears the `Tree`, removing all values.
    ///
    /// Note that this is not atomic. Emptied nodes stay linked in place.
    pub fn clear(&self) -> Result<()> {
        self.as_map().clear()
    }

    /// Returns the CRC32 of all keys and values in this `Tree`, as
    /// encoded by its serializers.
    ///
    /// This is O(N) and, under concurrent modification, checksums
    /// whatever a weakly consistent scan observes.
    pub fn checksum(&self) -> Result<u32> {
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = vec![];
        for item in self.iter() {
            let (k, v) = item?;
            buf.clear();
            self.0.nodes.keys.serialize(&k, &mut buf)?;
            self.0.nodes.values.serialize(&v, &mut buf)?;
            hasher.update(&buf);
        }
        Ok(hasher.finalize())
    }

    /// A view over the whole tree, in ascending order.
    pub(crate) fn as_map(&self) -> SubMap<K, V> {
        SubMap::new(self.clone(), Span::full(), Direction::Ascending)
    }

    /// Create an iterator over all entries, in ascending key order.
    pub fn iter(&self) -> Iter<K, V> {
        Iter::new(self.clone(), Span::full(), Direction::Ascending)
    }

    /// Create an iterator over the entries within a range.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> blinkmap::Result<()> {
    /// let tree = blinkmap::Config::new().tree::<u32, u32>()?;
    /// for i in 0..10 {
    ///     tree.insert(i, i * i)?;
    /// }
    ///
    /// let squares: Vec<u32> = tree
    ///     .range(3..=5)?
    ///     .map(|res| res.map(|(_, v)| v))
    ///     .collect::<blinkmap::Result<_>>()?;
    /// assert_eq!(squares, vec![9, 16, 25]);
    /// # Ok(()) }
    /// ```
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Result<Iter<K, V>> {
        let span = Span::new(
            range.start_bound().cloned(),
            range.end_bound().cloned(),
            self.cmp(),
        )?;
        Ok(Iter::new(self.clone(), span, Direction::Ascending))
    }

    /// The keys of this tree, as a set that removes from the tree.
    pub fn keys(&self) -> KeySet<K, V> {
        self.as_map().keys()
    }

    /// The entries of this tree, as a set that removes from the tree.
    pub fn entries(&self) -> EntrySet<K, V> {
        self.as_map().entries()
    }

    /// The values of this tree.
    pub fn values(&self) -> Values<K, V> {
        self.as_map().values()
    }

    /// A view of the keys from `from` inclusive to `to` exclusive.
    pub fn sub_map(&self, from: K, to: K) -> Result<SubMap<K, V>> {
        self.as_map().sub_map(from, to)
    }

    /// A view of the keys between `from` and `to`, with explicit
    /// inclusivity for both bounds.
    pub fn sub_map_with(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> Result<SubMap<K, V>> {
        self.as_map().sub_map_with(from, from_inclusive, to, to_inclusive)
    }

    /// A view of the keys strictly below `to`.
    pub fn head_map(&self, to: K) -> Result<SubMap<K, V>> {
        self.as_map().head_map(to)
    }

    /// A view of the keys below `to`, including it if `inclusive`.
    pub fn head_map_with(
        &self,
        to: K,
        inclusive: bool,
    ) -> Result<SubMap<K, V>> {
        self.as_map().head_map_with(to, inclusive)
    }

    /// A view of the keys from `from` onward, inclusive.
    pub fn tail_map(&self, from: K) -> Result<SubMap<K, V>> {
        self.as_map().tail_map(from)
    }

    /// A view of the keys above `from`, including it if `inclusive`.
    pub fn tail_map_with(
        &self,
        from: K,
        inclusive: bool,
    ) -> Result<SubMap<K, V>> {
        self.as_map().tail_map_with(from, inclusive)
    }

    /// A view of the whole tree in descending order.
    pub fn descending_map(&self) -> SubMap<K, V> {
        self.as_map().descending_map()
    }

    /// The lowest key. Fails with `NotFound` if the tree is empty.
    pub fn first_key(&self) -> Result<K> {
        self.as_map().first_key()
    }

    /// The highest key. Fails with `NotFound` if the tree is empty.
    pub fn last_key(&self) -> Result<K> {
        self.as_map().last_key()
    }

    /// The entry with the lowest key.
    pub fn first_entry(&self) -> Result<Option<(K, V)>> {
        self.as_map().first_entry()
    }

    /// The entry with the highest key.
    pub fn last_entry(&self) -> Result<Option<(K, V)>> {
        self.as_map().last_entry()
    }

    /// The greatest key strictly less than `key`.
    pub fn lower_key(&self, key: &K) -> Result<Option<K>> {
        self.as_map().lower_key(key)
    }

    /// The entry with the greatest key strictly less than `key`.
    pub fn lower_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.as_map().lower_entry(key)
    }

    /// The greatest key less than or equal to `key`.
    pub fn floor_key(&self, key: &K) -> Result<Option<K>> {
        self.as_map().floor_key(key)
    }

    /// The entry with the greatest key less than or equal to `key`.
    pub fn floor_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.as_map().floor_entry(key)
    }

    /// The least key greater than or equal to `key`.
    pub fn ceiling_key(&self, key: &K) -> Result<Option<K>> {
        self.as_map().ceiling_key(key)
    }

    /// The entry with the least key greater than or equal to `key`.
    pub fn ceiling_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.as_map().ceiling_entry(key)
    }

    /// The least key strictly greater than `key`.
    pub fn higher_key(&self, key: &K) -> Result<Option<K>> {
        self.as_map().higher_key(key)
    }

    /// The entry with the least key strictly greater than `key`.
    pub fn higher_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.as_map().higher_entry(key)
    }

    /// Atomically removes the minimum item in the `Tree` instance.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> blinkmap::Result<()> {
    /// let tree = blinkmap::Config::new().tree::<u8, u8>()?;
    /// for i in 0..3 {
    ///     tree.insert(i, i * 10)?;
    /// }
    ///
    /// assert_eq!(tree.pop_first()?, Some((0, 0)));
    /// assert_eq!(tree.pop_first()?, Some((1, 10)));
    /// assert_eq!(tree.pop_first()?, Some((2, 20)));
    /// assert_eq!(tree.pop_first()?, None);
    /// # Ok(()) }
    /// ```
    pub fn pop_first(&self) -> Result<Option<(K, V)>> {
        self.as_map().pop_first()
    }

    /// Atomically removes the maximum item in the `Tree` instance.
    pub fn pop_last(&self) -> Result<Option<(K, V)>> {
        self.as_map().pop_last()
    }

    fn read_counter(&self, counter: RecId) -> Result<(u64, Arc<[u8]>)> {
        let raw = self.0.store.get_raw(counter)?.ok_or_else(|| {
            Error::corruption(Some(counter), "size counter is missing")
        })?;
        let (count, _) = varint::deserialize(&raw).map_err(|e| match e {
            Error::Corruption { why, .. } => {
                Error::Corruption { at: Some(counter), why }
            }
            other => other,
        })?;
        Ok((count, raw))
    }

    fn adjust_counter(&self, delta: i64) -> Result<()> {
        let Some(counter) = self.0.counter else {
            return Ok(());
        };
        let backoff = Backoff::new();
        loop {
            let (count, raw) = self.read_counter(counter)?;
            let mut buf = vec![];
            varint::push(count.saturating_add_signed(delta), &mut buf);
            debug_delay();
            if self.0.store.cas_raw(counter, &raw, buf)? {
                return Ok(());
            }
            trace!("conflict while adjusting size counter by {}", delta);
            backoff.spin();
        }
    }

    /// One optimistic attempt at a read-modify-write of `key`. Returns
    /// the value found, and whether a change was committed.
    pub(crate) fn update_inner(
        &self,
        key: &K,
        decide: &mut dyn FnMut(Option<&V>) -> Action<V>,
    ) -> Result<Conflictable<(Option<V>, bool)>> {
        let cmp = self.cmp();
        let view = self.view_for_key(key)?;
        let found = view.find(key, cmp)?;
        let current = found.ok().and_then(|index| view.leaf_value(index));

        let mut node = view.node.clone();
        let delta = match (decide(current), found) {
            (Action::Keep, _) | (Action::Remove, Err(_)) => {
                return Ok(Ok((current.cloned(), false)));
            }
            (Action::Remove, Ok(index)) => {
                node.leaf_remove(index)?;
                -1
            }
            (Action::Set(value), found) => {
                node.leaf_set(key.clone(), value, cmp)?;
                if found.is_ok() { 0 } else { 1 }
            }
        };

        if !self.cas_node(&view, &node)? {
            trace!(
                "conflict while updating key {:?} in node {}",
                key, view.id
            );
            return Ok(Err(Conflict));
        }

        self.adjust_counter(delta)?;
        self.split_if_needed(key, &node)?;

        Ok(Ok((current.cloned(), true)))
    }

    /// Splits the leaf we just grew past the fanout, by descending to it
    /// again: `view_for` splits every oversized node it passes through.
    fn split_if_needed(&self, key: &K, written: &Node<K, V>) -> Result<()> {
        if !written.should_split(self.0.fanout) {
            return Ok(());
        }
        trace!("leaf holding {:?} outgrew the fanout", key);
        self.view_for_key(key)?;
        Ok(())
    }

    /// Removes the entry at `index` of a leaf, provided the leaf has not
    /// changed since `view` was read.
    pub(crate) fn remove_at(
        &self,
        view: &NodeView<K, V>,
        index: usize,
    ) -> Result<Conflictable<(K, V)>> {
        let mut node = view.node.clone();
        let entry = node.leaf_remove(index)?;
        if !self.cas_node(view, &node)? {
            trace!(
                "conflict while removing entry {} of node {}",
                index, view.id
            );
            return Ok(Err(Conflict));
        }
        self.adjust_counter(-1)?;
        Ok(Ok(entry))
    }

    fn put_node(&self, node: &Node<K, V>) -> Result<RecId> {
        let mut buf = vec![];
        self.0.nodes.serialize(node, &mut buf)?;
        self.0.store.put_raw(buf)
    }

    /// Installs `new` in place of `view`, only if the record still holds
    /// exactly the bytes `view` was decoded from.
    pub(crate) fn cas_node(
        &self,
        view: &NodeView<K, V>,
        new: &Node<K, V>,
    ) -> Result<bool> {
        let mut buf = vec![];
        self.0.nodes.serialize(new, &mut buf)?;
        debug_delay();
        self.0.store.cas_raw(view.id, &view.raw, buf)
    }

    fn load_root(&self) -> Result<RecId> {
        let raw = self
            .0
            .store
            .get_raw(self.0.root_cell)?
            .ok_or(Error::CollectionNotFound(self.0.root_cell))?;
        Ok(decode_root_cell(self.0.root_cell, &raw)?.0)
    }

    pub(crate) fn view_for_id(
        &self,
        id: RecId,
    ) -> Result<Option<NodeView<K, V>>> {
        let Some(raw) = self.0.store.get_raw(id)? else {
            return Ok(None);
        };
        let node =
            self.0.nodes.deserialize(&mut &raw[..]).map_err(|e| match e {
                Error::Corruption { why, .. } => {
                    Error::Corruption { at: Some(id), why }
                }
                other => other,
            })?;
        Ok(Some(NodeView { id, node, raw }))
    }

    /// Reads a node that some other node links to. Nodes are never
    /// freed once linked, so a missing one is corruption.
    pub(crate) fn linked_view(&self, id: RecId) -> Result<NodeView<K, V>> {
        self.view_for_id(id)?.ok_or_else(|| {
            Error::corruption(Some(id), "linked node does not exist")
        })
    }

    pub(crate) fn view_for_key(&self, key: &K) -> Result<NodeView<K, V>> {
        self.view_for(Seek::Key(key))
    }

    fn split_node(
        &self,
        view: &NodeView<K, V>,
        parent_view: Option<&NodeView<K, V>>,
        root_id: RecId,
    ) -> Result<()> {
        trace!("splitting node {}", view.id);
        let (mut lhs, at, rhs) = view.split();

        // install right side
        let rhs_id = self.put_node(&rhs)?;

        // replace node, pointing next to installed right
        lhs.next = Some(rhs_id);
        if !self.cas_node(view, &lhs)? {
            // nothing links to the right side yet, so it can just go
            trace!("lost the race to split node {}", view.id);
            self.0.store.delete_raw(rhs_id)?;
            return Ok(());
        }
        debug!(
            "split node {} at {:?} into {} and {}",
            view.id, at, view.id, rhs_id
        );

        // either install parent split or hoist root
        match parent_view {
            Some(parent_view) => {
                let mut parent = parent_view.node.clone();
                if parent.parent_split(&at, rhs_id, self.cmp())?
                    && !self.cas_node(parent_view, &parent)?
                {
                    // a later descent that has to follow the right
                    // link will link it instead
                    trace!(
                        "failed to link {} into parent {}",
                        rhs_id, parent_view.id
                    );
                }
            }
            None if view.id == root_id && view.lo.is_none() => {
                if !self.root_hoist(root_id, rhs_id, at)? {
                    // whoever moved the root past `root_id` also
                    // linked our right side above it
                    trace!("root {} was already hoisted", root_id);
                }
            }
            None => {}
        }

        Ok(())
    }

    fn root_hoist(&self, from: RecId, to: RecId, at: K) -> Result<bool> {
        // hoist new root, pointing to lhs & rhs
        let new_root = Node::new_hoisted_root(from, at, to);
        let new_root_id = self.put_node(&new_root)?;
        debug!("allocated record {} in root_hoist", new_root_id);

        debug_delay();

        let counter = self.0.counter;
        let cas = self.0.store.cas_raw(
            self.0.root_cell,
            &encode_root_cell(from, counter),
            encode_root_cell(new_root_id, counter),
        )?;
        if cas {
            debug!("root hoist from {} to {} successful", from, new_root_id);
            Ok(true)
        } else {
            debug!("root hoist from {} to {} failed", from, new_root_id);
            self.0.store.delete_raw(new_root_id)?;
            Ok(false)
        }
    }

    // Returns the leaf a seek ends at, completing any observed
    // partially complete splits along the way.
    //
    // We intentionally leave the cyclomatic complexity high because
    // the steps only make sense read together.
    #[allow(clippy::cognitive_complexity)]
    pub(crate) fn view_for(
        &self,
        seek: Seek<'_, K>,
    ) -> Result<NodeView<K, V>> {
        if let Seek::Key(key) | Seek::Below(key) = seek {
            self.cmp().check(key)?;
        }
        let cmp = self.cmp();

        let mut root_id = self.load_root()?;
        let mut cursor = root_id;
        let mut parent_view: Option<NodeView<K, V>> = None;
        let mut unsplit_parent: Option<NodeView<K, V>> = None;

        macro_rules! retry {
            () => {
                trace!(
                    "retrying at line {} when cursor was {}",
                    line!(),
                    cursor
                );
                root_id = self.load_root()?;
                cursor = root_id;
                parent_view = None;
                unsplit_parent = None;
                continue;
            };
        }

        for _ in 0..MAX_LOOPS {
            let Some(view) = self.view_for_id(cursor)? else {
                retry!();
            };

            if seek.overshot(&view, cmp)? {
                retry!();
            }

            if view.should_split(self.0.fanout) {
                self.split_node(&view, parent_view.as_ref(), root_id)?;
                retry!();
            }

            if seek.undershot(&view, cmp)? {
                // half-complete split detect & completion
                let Some(next) = view.next else {
                    return Err(Error::corruption(
                        Some(view.id),
                        "node with a high key has no right sibling",
                    ));
                };
                if unsplit_parent.is_none() && parent_view.is_some() {
                    unsplit_parent = parent_view.clone();
                } else if parent_view.is_none()
                    && view.lo.is_none()
                    && view.id == root_id
                {
                    // we have found a partially-split root
                    if let Some(hi) = &view.hi {
                        if self.root_hoist(root_id, next, hi.clone())? {
                            retry!();
                        }
                    }
                }
                cursor = next;
                continue;
            } else if let Some(unsplit) = unsplit_parent.take() {
                // we have found the proper node for
                // our cooperative parent split
                if let Some(lo) = &view.lo {
                    let mut parent = unsplit.node.clone();
                    if !parent.parent_split(lo, view.id, cmp)? {
                        // the parent we came through has changed
                        // underneath us
                        retry!();
                    }
                    if self.cas_node(&unsplit, &parent)? {
                        debug!(
                            "linked node {} into parent {}",
                            view.id, unsplit.id
                        );
                    }
                }
            }

            if view.data.is_dir() {
                cursor = seek.child(&view, cmp)?;
                parent_view = Some(view);
            } else {
                return Ok(view);
            }
        }

        Err(Error::ReportableBug(format!(
            "seek {:?} did not reach a leaf, last at node {}",
            seek, cursor
        )))
    }

    /// Walks every level of the tree and checks the structural
    /// invariants: keys ascend within and across siblings, every key
    /// lies within its node's bounds, each right link continues exactly
    /// where its node's range ends, and every level is acyclic.
    pub fn verify_integrity(&self) -> Result<()> {
        let cmp = self.cmp();
        let mut left_most = Some(self.load_root()?);
        let mut level = 0;

        while let Some(start) = left_most.take() {
            let mut seen = FnvHashSet::default();
            let mut expected_lo: Option<K> = None;
            let mut cursor = Some(start);
            let mut first = true;

            while let Some(id) = cursor {
                if !seen.insert(id) {
                    return Err(integrity_error(format!(
                        "loop on level {} at node {}",
                        level, id
                    )));
                }
                let view = self.linked_view(id)?;

                let lo_ok = match (&expected_lo, &view.lo) {
                    (None, None) => first,
                    (Some(expected), Some(lo)) => {
                        cmp.compare(expected, lo)? == Ordering::Equal
                    }
                    _ => false,
                };
                if !lo_ok {
                    return Err(integrity_error(format!(
                        "node {} on level {} has low key {:?} but its \
                         left sibling ends at {:?}",
                        id, level, view.lo, expected_lo
                    )));
                }

                let keys = view.data.keys();
                for pair in keys.windows(2) {
                    if cmp.compare(&pair[0], &pair[1])? != Ordering::Less {
                        return Err(integrity_error(format!(
                            "keys {:?} and {:?} out of order in node {}",
                            pair[0], pair[1], id
                        )));
                    }
                }
                if let (Some(first_key), Some(last_key)) =
                    (keys.first(), keys.last())
                {
                    if view.is_right_of(first_key, cmp)?
                        || view.is_left_of(last_key, cmp)?
                    {
                        return Err(integrity_error(format!(
                            "node {} holds keys outside of [{:?}, {:?})",
                            id, view.lo, view.hi
                        )));
                    }
                }

                match &view.data {
                    Data::Leaf { keys, values }
                        if keys.len() != values.len() =>
                    {
                        return Err(integrity_error(format!(
                            "leaf {} has {} keys but {} values",
                            id,
                            keys.len(),
                            values.len()
                        )));
                    }
                    Data::Dir { keys, children }
                        if children.len() != keys.len() + 1 =>
                    {
                        return Err(integrity_error(format!(
                            "directory {} has {} separators but {} children",
                            id,
                            keys.len(),
                            children.len()
                        )));
                    }
                    _ => {}
                }

                if view.next.is_some() != view.hi.is_some() {
                    return Err(integrity_error(format!(
                        "node {} has high key {:?} but right link {:?}",
                        id, view.hi, view.next
                    )));
                }

                if first {
                    left_most = view.leftmost_child();
                }
                first = false;
                expected_lo = view.hi.clone();
                cursor = view.next;
            }
            level += 1;
        }

        Ok(())
    }
}

fn integrity_error(why: String) -> Error {
    if cfg!(feature = "testing") {
        panic!("{}", why);
    }
    error!("{}", why);
    Error::ReportableBug(why)
}

impl<K: Key, V: Value> Debug for Tree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut left_most = match self.load_root() {
            Ok(root) => Some(root),
            Err(e) => return write!(f, "Tree(unreadable root cell: {})", e),
        };
        let mut level = 0;

        writeln!(f, "Tree with root cell {}:", self.0.root_cell)?;

        while let Some(start) = left_most.take() {
            writeln!(f, "\tlevel {}:", level)?;
            let mut seen = FnvHashSet::default();
            let mut cursor = Some(start);
            while let Some(id) = cursor {
                if !seen.insert(id) {
                    error!(
                        "detected a loop while printing the Tree at node {}",
                        id
                    );
                    break;
                }
                let view = match self.linked_view(id) {
                    Ok(view) => view,
                    Err(e) => {
                        error!("Tree::fmt failed to read node {}: {}", id, e);
                        writeln!(f, "\t\t{}: <{}>", id, e)?;
                        break;
                    }
                };
                writeln!(f, "\t\t{}: {:?}", id, view.node)?;
                if id == start {
                    left_most = view.leftmost_child();
                }
                cursor = view.next;
            }
            level += 1;
        }

        Ok(())
    }
}

/// Compare and swap result.
///
/// It returns `Ok(Ok(()))` if operation finishes successfully and
/// `Ok(Err(CompareAndSwapError { current, proposed }))` if the current
/// value did not match the expected one.
pub type CompareAndSwapResult<V> =
    Result<std::result::Result<(), CompareAndSwapError<V>>>;

/// Compare and swap error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareAndSwapError<V> {
    /// The current value which caused your CAS to fail.
    pub current: Option<V>,
    /// Returned value that was proposed unsuccessfully.
    pub proposed: Option<V>,
}

impl<V> fmt::Display for CompareAndSwapError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compare and swap conflict")
    }
}

impl<V: Debug> std::error::Error for CompareAndSwapError<V> {}
