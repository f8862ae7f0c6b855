use std::{cmp::Ordering, ops::Bound, sync::Arc};

use super::*;

/// A node as read from the store, along with the exact bytes it was
/// decoded from. Those bytes are what a later compare-and-swap must
/// expect to find.
#[derive(Clone)]
pub(crate) struct NodeView<K, V> {
    pub(crate) id: RecId,
    pub(crate) node: Node<K, V>,
    pub(crate) raw: Arc<[u8]>,
}

impl<K, V> std::ops::Deref for NodeView<K, V> {
    type Target = Node<K, V>;

    fn deref(&self) -> &Node<K, V> {
        &self.node
    }
}

/// One level-local slice of the key space, `[lo, hi)`, with a link to
/// the node that continues it to the right. `None` bounds stand for
/// negative and positive infinity.
#[derive(Clone)]
pub(crate) struct Node<K, V> {
    pub(crate) lo: Option<K>,
    pub(crate) hi: Option<K>,
    pub(crate) next: Option<RecId>,
    pub(crate) data: Data<K, V>,
}

#[derive(Clone)]
pub(crate) enum Data<K, V> {
    Leaf { keys: Vec<K>, values: Vec<V> },
    // child `i` covers `[keys[i - 1], keys[i])`
    Dir { keys: Vec<K>, children: Vec<RecId> },
}

impl<K, V> Data<K, V> {
    pub(crate) fn keys(&self) -> &[K] {
        match self {
            Data::Leaf { keys, .. } | Data::Dir { keys, .. } => keys,
        }
    }

    pub(crate) const fn is_dir(&self) -> bool {
        matches!(self, Data::Dir { .. })
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Node<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.data.is_dir() { "Dir" } else { "Leaf" };
        let mut ds = f.debug_struct(name);
        ds.field("lo", &self.lo)
            .field("hi", &self.hi)
            .field("next", &self.next);
        match &self.data {
            Data::Leaf { keys, .. } => ds.field("keys", keys),
            Data::Dir { keys, children } => {
                ds.field("keys", keys).field("children", children)
            }
        };
        ds.finish()
    }
}

/// Binary search over `keys` with a fallible comparator.
pub(crate) fn search<K>(
    keys: &[K],
    key: &K,
    cmp: &dyn Comparator<K>,
) -> Result<std::result::Result<usize, usize>> {
    let mut size = keys.len();
    let mut left = 0;
    let mut right = size;
    while left < right {
        let mid = left + size / 2;
        match cmp.compare(&keys[mid], key)? {
            Ordering::Less => left = mid + 1,
            Ordering::Greater => right = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
        size = right - left;
    }
    Ok(Err(left))
}

impl<K: Clone, V: Clone> Node<K, V> {
    pub(crate) const fn new_empty_leaf() -> Node<K, V> {
        Node {
            lo: None,
            hi: None,
            next: None,
            data: Data::Leaf { keys: vec![], values: vec![] },
        }
    }

    pub(crate) fn new_hoisted_root(
        left: RecId,
        at: K,
        right: RecId,
    ) -> Node<K, V> {
        Node {
            lo: None,
            hi: None,
            next: None,
            data: Data::Dir { keys: vec![at], children: vec![left, right] },
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.keys().len()
    }

    pub(crate) fn should_split(&self, fanout: usize) -> bool {
        self.len() > fanout
    }

    /// `key >= hi`: a split has moved `key` to a node further right.
    pub(crate) fn is_left_of(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        match &self.hi {
            Some(hi) => Ok(cmp.compare(key, hi)? != Ordering::Less),
            None => Ok(false),
        }
    }

    /// `key < lo`
    pub(crate) fn is_right_of(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        match &self.lo {
            Some(lo) => Ok(cmp.compare(key, lo)? == Ordering::Less),
            None => Ok(false),
        }
    }

    pub(crate) fn find(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<std::result::Result<usize, usize>> {
        search(self.data.keys(), key, cmp)
    }

    pub(crate) fn leaf_value(&self, index: usize) -> Option<&V> {
        match &self.data {
            Data::Leaf { values, .. } => values.get(index),
            Data::Dir { .. } => None,
        }
    }

    pub(crate) fn leaf_entry(&self, index: usize) -> Option<(K, V)> {
        match &self.data {
            Data::Leaf { keys, values } => keys
                .get(index)
                .zip(values.get(index))
                .map(|(k, v)| (k.clone(), v.clone())),
            Data::Dir { .. } => None,
        }
    }

    /// The child that may contain `key`.
    pub(crate) fn index_next_node(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<RecId> {
        let Data::Dir { keys, children } = &self.data else {
            return Err(Error::ReportableBug(
                "index_next_node called on a leaf".into(),
            ));
        };
        let index = match search(keys, key, cmp)? {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        Ok(children[index])
    }

    /// The child that may contain the largest keys strictly below `key`.
    pub(crate) fn index_node_below(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<RecId> {
        let Data::Dir { keys, children } = &self.data else {
            return Err(Error::ReportableBug(
                "index_node_below called on a leaf".into(),
            ));
        };
        let (Ok(index) | Err(index)) = search(keys, key, cmp)?;
        Ok(children[index])
    }

    pub(crate) fn leftmost_child(&self) -> Option<RecId> {
        match &self.data {
            Data::Dir { children, .. } => children.first().copied(),
            Data::Leaf { .. } => None,
        }
    }

    pub(crate) fn rightmost_child(&self) -> Option<RecId> {
        match &self.data {
            Data::Dir { children, .. } => children.last().copied(),
            Data::Leaf { .. } => None,
        }
    }

    /// Position of the first key that satisfies `bound` as a lower bound.
    pub(crate) fn successor(
        &self,
        bound: Bound<&K>,
        cmp: &dyn Comparator<K>,
    ) -> Result<Option<usize>> {
        let index = match bound {
            Bound::Unbounded => 0,
            Bound::Included(key) => {
                let (Ok(i) | Err(i)) = self.find(key, cmp)?;
                i
            }
            Bound::Excluded(key) => match self.find(key, cmp)? {
                Ok(i) => i + 1,
                Err(i) => i,
            },
        };
        Ok(if index < self.len() { Some(index) } else { None })
    }

    /// Position of the last key that satisfies `bound` as an upper bound.
    pub(crate) fn predecessor(
        &self,
        bound: Bound<&K>,
        cmp: &dyn Comparator<K>,
    ) -> Result<Option<usize>> {
        let end = match bound {
            Bound::Unbounded => self.len(),
            Bound::Included(key) => match self.find(key, cmp)? {
                Ok(i) => i + 1,
                Err(i) => i,
            },
            Bound::Excluded(key) => {
                let (Ok(i) | Err(i)) = self.find(key, cmp)?;
                i
            }
        };
        Ok(end.checked_sub(1))
    }

    /// Sets the value for `key` in a leaf, returning the previous one.
    pub(crate) fn leaf_set(
        &mut self,
        key: K,
        value: V,
        cmp: &dyn Comparator<K>,
    ) -> Result<Option<V>> {
        let search = self.find(&key, cmp)?;
        let Data::Leaf { keys, values } = &mut self.data else {
            return Err(Error::ReportableBug(
                "tried to set a value in a dir".into(),
            ));
        };
        match search {
            Ok(i) => Ok(Some(std::mem::replace(&mut values[i], value))),
            Err(i) => {
                keys.insert(i, key);
                values.insert(i, value);
                Ok(None)
            }
        }
    }

    /// Removes the entry at `index` from a leaf.
    pub(crate) fn leaf_remove(&mut self, index: usize) -> Result<(K, V)> {
        match &mut self.data {
            Data::Leaf { keys, values } if index < keys.len() => {
                Ok((keys.remove(index), values.remove(index)))
            }
            _ => Err(Error::ReportableBug(format!(
                "tried to remove missing leaf entry {}",
                index
            ))),
        }
    }

    /// Splits a full node in two. The left half keeps this node's `lo`
    /// and takes the split key as its new `hi`; the right half inherits
    /// this node's `hi` and `next`. The caller must point the left
    /// half's `next` at wherever it stores the right half.
    pub(crate) fn split(&self) -> (Node<K, V>, K, Node<K, V>) {
        let mid = self.len() / 2;
        let (at, lhs_data, rhs_data) = match &self.data {
            Data::Leaf { keys, values } => (
                keys[mid].clone(),
                Data::Leaf {
                    keys: keys[..mid].to_vec(),
                    values: values[..mid].to_vec(),
                },
                Data::Leaf {
                    keys: keys[mid..].to_vec(),
                    values: values[mid..].to_vec(),
                },
            ),
            Data::Dir { keys, children } => (
                // the separator moves up rather than being copied
                keys[mid].clone(),
                Data::Dir {
                    keys: keys[..mid].to_vec(),
                    children: children[..=mid].to_vec(),
                },
                Data::Dir {
                    keys: keys[mid + 1..].to_vec(),
                    children: children[mid + 1..].to_vec(),
                },
            ),
        };

        let lhs = Node {
            lo: self.lo.clone(),
            hi: Some(at.clone()),
            next: self.next,
            data: lhs_data,
        };
        let rhs = Node {
            lo: Some(at.clone()),
            hi: self.hi.clone(),
            next: self.next,
            data: rhs_data,
        };

        (lhs, at, rhs)
    }

    /// Links a child created by a split at `at` into this directory.
    /// Returns `false` if `at` is already present or falls outside this
    /// node's range, in which case the node is left untouched.
    pub(crate) fn parent_split(
        &mut self,
        at: &K,
        to: RecId,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        if self.is_right_of(at, cmp)? || self.is_left_of(at, cmp)? {
            return Ok(false);
        }
        if let Some(lo) = &self.lo {
            if cmp.compare(at, lo)? == Ordering::Equal {
                return Ok(false);
            }
        }
        let search = self.find(at, cmp)?;
        let Data::Dir { keys, children } = &mut self.data else {
            return Err(Error::ReportableBug(
                "tried to parent split a leaf".into(),
            ));
        };
        match search {
            Ok(_) => Ok(false),
            Err(i) => {
                keys.insert(i, at.clone());
                children.insert(i + 1, to);
                Ok(true)
            }
        }
    }
}
