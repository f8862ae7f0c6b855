use std::ops::Bound;

use super::*;
use crate::tree::Seek;

macro_rules! iter_try {
    ($e:expr) => {
        match $e {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        }
    };
}

/// An iterator over the keys and values of a `Tree` or `SubMap`, in the
/// order of the view it came from.
///
/// Iteration is weakly consistent. It never fails because of concurrent
/// modification, and never yields a key twice or out of order, but it
/// is not a snapshot: entries inserted or removed while it runs may or
/// may not be seen.
pub struct Iter<K, V> {
    tree: Tree<K, V>,
    span: Span<K>,
    direction: Direction,
    // everything on the far side of this bound has been yielded
    cursor: Bound<K>,
    cached: Option<NodeView<K, V>>,
    last_returned: Option<K>,
    done: bool,
}

impl<K: Key, V: Value> Iter<K, V> {
    pub(crate) fn new(
        tree: Tree<K, V>,
        span: Span<K>,
        direction: Direction,
    ) -> Iter<K, V> {
        let cursor = match direction {
            Direction::Ascending => span.lo.clone(),
            Direction::Descending => span.hi.clone(),
        };
        Iter {
            tree,
            span,
            direction,
            cursor,
            cached: None,
            last_returned: None,
            done: false,
        }
    }

    /// Iterate over the keys only.
    pub fn keys(self) -> KeysIter<K, V> {
        KeysIter(self)
    }

    /// Iterate over the values only.
    pub fn values(self) -> ValuesIter<K, V> {
        ValuesIter(self)
    }

    /// Like `next`, but reports the end of iteration as `Exhausted`.
    pub fn try_next(&mut self) -> Result<(K, V)> {
        match self.next() {
            Some(item) => item,
            None => Err(Error::Exhausted),
        }
    }

    /// Removes the entry most recently returned by `next` from the
    /// underlying tree. Fails with `InvalidIteratorState` if nothing has
    /// been returned since the last call to `remove`.
    pub fn remove(&mut self) -> Result<()> {
        let key = self.last_returned.take().ok_or(Error::InvalidIteratorState)?;
        trace!("removing {:?} through an iterator", key);
        self.tree.remove(&key)?;
        Ok(())
    }

    fn entry_at(view: &NodeView<K, V>, index: usize) -> Result<(K, V)> {
        view.leaf_entry(index).ok_or_else(|| {
            Error::ReportableBug(format!(
                "iterator stepped past the end of node {}",
                view.id
            ))
        })
    }

    fn step_up(&mut self) -> Result<Option<(K, V)>> {
        let tree = &self.tree;
        let cmp = tree.cmp();

        let (mut view, mut refreshed) = match self.cached.take() {
            Some(view) => (view, false),
            None => {
                let view = match &self.cursor {
                    Bound::Unbounded => tree.view_for(Seek::Leftmost)?,
                    Bound::Included(key) | Bound::Excluded(key) => {
                        tree.view_for_key(key)?
                    }
                };
                (view, true)
            }
        };

        loop {
            if let Some(index) = view.successor(self.cursor.as_ref(), cmp)? {
                let (key, value) = Self::entry_at(&view, index)?;
                if !self.span.below_hi(&key, cmp)? {
                    return Ok(None);
                }
                self.cursor = Bound::Excluded(key.clone());
                self.cached = Some(view);
                return Ok(Some((key, value)));
            }

            // the cached copy may predate inserts at its tail
            if !refreshed {
                view = tree.linked_view(view.id)?;
                refreshed = true;
                continue;
            }

            let next = match (view.next, &view.hi) {
                (Some(next), Some(hi)) if self.span.below_hi(hi, cmp)? => next,
                _ => return Ok(None),
            };
            view = tree.linked_view(next)?;
        }
    }

    fn step_down(&mut self) -> Result<Option<(K, V)>> {
        let tree = &self.tree;
        let cmp = tree.cmp();

        loop {
            let view = match self.cached.take() {
                Some(view) => view,
                None => match &self.cursor {
                    Bound::Unbounded => tree.view_for(Seek::Rightmost)?,
                    Bound::Included(key) => tree.view_for_key(key)?,
                    Bound::Excluded(key) => tree.view_for(Seek::Below(key))?,
                },
            };

            if let Some(index) = view.predecessor(self.cursor.as_ref(), cmp)? {
                let (key, value) = Self::entry_at(&view, index)?;
                if !self.span.above_lo(&key, cmp)? {
                    return Ok(None);
                }
                self.cursor = Bound::Excluded(key.clone());
                self.cached = Some(view);
                return Ok(Some((key, value)));
            }

            // no left links, so descend again toward the keys below
            // this leaf
            match &view.lo {
                Some(lo) if self.span.above_lo(lo, cmp)? => {
                    self.cursor = Bound::Excluded(lo.clone());
                }
                _ => return Ok(None),
            }
        }
    }
}

impl<K: Key, V: Value> Iterator for Iter<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.direction {
            Direction::Ascending => self.step_up(),
            Direction::Descending => self.step_down(),
        };
        let stepped = match step {
            Ok(stepped) => stepped,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        match stepped {
            Some((key, value)) => {
                self.last_returned = Some(key.clone());
                Some(Ok((key, value)))
            }
            None => {
                self.done = true;
                self.cached = None;
                None
            }
        }
    }
}

/// An iterator over the keys of a `Tree` or `SubMap`.
pub struct KeysIter<K, V>(Iter<K, V>);

impl<K: Key, V: Value> KeysIter<K, V> {
    /// Like `next`, but reports the end of iteration as `Exhausted`.
    pub fn try_next(&mut self) -> Result<K> {
        self.0.try_next().map(|(k, _)| k)
    }

    /// Removes the key most recently returned by `next`.
    pub fn remove(&mut self) -> Result<()> {
        self.0.remove()
    }
}

impl<K: Key, V: Value> Iterator for KeysIter<K, V> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let (k, _) = iter_try!(self.0.next()?);
        Some(Ok(k))
    }
}

/// An iterator over the values of a `Tree` or `SubMap`, in key order.
pub struct ValuesIter<K, V>(Iter<K, V>);

impl<K: Key, V: Value> ValuesIter<K, V> {
    /// Like `next`, but reports the end of iteration as `Exhausted`.
    pub fn try_next(&mut self) -> Result<V> {
        self.0.try_next().map(|(_, v)| v)
    }

    /// Removes the entry whose value was most recently returned.
    pub fn remove(&mut self) -> Result<()> {
        self.0.remove()
    }
}

impl<K: Key, V: Value> Iterator for ValuesIter<K, V> {
    type Item = Result<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, v) = iter_try!(self.0.next()?);
        Some(Ok(v))
    }
}
