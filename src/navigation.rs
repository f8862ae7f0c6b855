use std::{cmp::Ordering, ops::Bound};

use super::*;
use crate::tree::Seek;

/// The order a view presents its keys in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub(crate) const fn reverse(self) -> Direction {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

/// How a navigational query relates the key it returns to the key it
/// was asked about, in the order of the view it was asked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Lower,
    Floor,
    Ceiling,
    Higher,
}

impl Relation {
    const fn reverse(self) -> Relation {
        match self {
            Relation::Lower => Relation::Higher,
            Relation::Floor => Relation::Ceiling,
            Relation::Ceiling => Relation::Floor,
            Relation::Higher => Relation::Lower,
        }
    }
}

/// An entry found by navigation, and the leaf snapshot it was found in.
pub(crate) struct Cursor<K, V> {
    pub(crate) view: NodeView<K, V>,
    pub(crate) index: usize,
}

impl<K: Key, V: Value> Cursor<K, V> {
    pub(crate) fn key(&self) -> &K {
        &self.view.data.keys()[self.index]
    }

    pub(crate) fn entry(&self) -> Result<(K, V)> {
        self.view.leaf_entry(self.index).ok_or_else(|| {
            Error::ReportableBug(format!(
                "navigation pointed past the end of node {}",
                self.view.id
            ))
        })
    }
}

// Of two upper bounds, the one admitting fewer keys.
fn tighter_hi<'a, K>(
    a: Bound<&'a K>,
    b: Bound<&'a K>,
    cmp: &dyn Comparator<K>,
) -> Result<Bound<&'a K>> {
    tighter(a, b, Ordering::Less, cmp)
}

// Of two lower bounds, the one admitting fewer keys.
fn tighter_lo<'a, K>(
    a: Bound<&'a K>,
    b: Bound<&'a K>,
    cmp: &dyn Comparator<K>,
) -> Result<Bound<&'a K>> {
    tighter(a, b, Ordering::Greater, cmp)
}

fn tighter<'a, K>(
    a: Bound<&'a K>,
    b: Bound<&'a K>,
    inward: Ordering,
    cmp: &dyn Comparator<K>,
) -> Result<Bound<&'a K>> {
    let (ak, bk) = match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => {
            return Ok(other);
        }
        (
            Bound::Included(ak) | Bound::Excluded(ak),
            Bound::Included(bk) | Bound::Excluded(bk),
        ) => (ak, bk),
    };
    let order = cmp.compare(ak, bk)?;
    Ok(if order == inward {
        a
    } else if order == Ordering::Equal {
        match (a, b) {
            (Bound::Included(_), Bound::Included(_)) => a,
            _ => Bound::Excluded(ak),
        }
    } else {
        b
    })
}

impl<K: Key, V: Value> Tree<K, V> {
    /// The first entry at or after `from`, scanning right across leaves,
    /// provided it lies below the upper bound of `span`.
    pub(crate) fn seek_up(
        &self,
        from: Bound<&K>,
        span: &Span<K>,
    ) -> Result<Option<Cursor<K, V>>> {
        let cmp = self.cmp();
        let mut view = match from {
            Bound::Unbounded => self.view_for(Seek::Leftmost)?,
            Bound::Included(key) | Bound::Excluded(key) => {
                self.view_for_key(key)?
            }
        };

        loop {
            if let Some(index) = view.successor(from, cmp)? {
                let cursor = Cursor { view, index };
                let inside = span.below_hi(cursor.key(), cmp)?;
                return Ok(inside.then_some(cursor));
            }

            // nothing left in this leaf, so try its right sibling, unless
            // the sibling starts beyond the span
            let next = match (view.next, &view.hi) {
                (Some(next), Some(hi)) if span.below_hi(hi, cmp)? => next,
                _ => return Ok(None),
            };
            trace!("seek_up moving right from node {} to {}", view.id, next);
            view = self.linked_view(next)?;
        }
    }

    /// The last entry at or before `from`, provided it lies above the
    /// lower bound of `span`.
    ///
    /// Leaves only link rightward, so moving left means descending again
    /// toward the keys just below the current leaf's low key.
    pub(crate) fn seek_down(
        &self,
        from: Bound<&K>,
        span: &Span<K>,
    ) -> Result<Option<Cursor<K, V>>> {
        let cmp = self.cmp();
        let mut bound: Bound<K> = from.cloned();

        loop {
            let view = match &bound {
                Bound::Unbounded => self.view_for(Seek::Rightmost)?,
                Bound::Included(key) => self.view_for_key(key)?,
                Bound::Excluded(key) => self.view_for(Seek::Below(key))?,
            };

            if let Some(index) = view.predecessor(bound.as_ref(), cmp)? {
                let cursor = Cursor { view, index };
                let inside = span.above_lo(cursor.key(), cmp)?;
                return Ok(inside.then_some(cursor));
            }

            bound = match &view.lo {
                Some(lo) if span.above_lo(lo, cmp)? => {
                    trace!("seek_down moving left of node {}", view.id);
                    Bound::Excluded(lo.clone())
                }
                _ => return Ok(None),
            };
        }
    }

    /// The first entry of `span` in `direction`.
    pub(crate) fn first_in(
        &self,
        span: &Span<K>,
        direction: Direction,
    ) -> Result<Option<Cursor<K, V>>> {
        match direction {
            Direction::Ascending => self.seek_up(span.lo.as_ref(), span),
            Direction::Descending => self.seek_down(span.hi.as_ref(), span),
        }
    }

    /// The entry of `span` standing in `relation` to `key`, where the
    /// relation is read in `direction`. Keys outside the span are
    /// allowed, and clamp to the span's ends.
    pub(crate) fn relative_in(
        &self,
        span: &Span<K>,
        direction: Direction,
        key: &K,
        relation: Relation,
    ) -> Result<Option<Cursor<K, V>>> {
        let cmp = self.cmp();
        cmp.check(key)?;

        let relation = match direction {
            Direction::Ascending => relation,
            Direction::Descending => relation.reverse(),
        };

        let (lo, hi) = (span.lo.as_ref(), span.hi.as_ref());
        match relation {
            Relation::Lower => {
                let from = tighter_hi(Bound::Excluded(key), hi, cmp)?;
                self.seek_down(from, span)
            }
            Relation::Floor => {
                let from = tighter_hi(Bound::Included(key), hi, cmp)?;
                self.seek_down(from, span)
            }
            Relation::Ceiling => {
                let from = tighter_lo(Bound::Included(key), lo, cmp)?;
                self.seek_up(from, span)
            }
            Relation::Higher => {
                let from = tighter_lo(Bound::Excluded(key), lo, cmp)?;
                self.seek_up(from, span)
            }
        }
    }

    /// Atomically removes and returns the first entry of `span` in
    /// `direction`. The leaf the entry was found in must be unchanged
    /// when the removal commits, otherwise the search starts over.
    pub(crate) fn pop_in(
        &self,
        span: &Span<K>,
        direction: Direction,
    ) -> Result<Option<(K, V)>> {
        retry(|| {
            let Some(cursor) = self.first_in(span, direction)? else {
                return Ok(Ok(None));
            };
            Ok(self.remove_at(&cursor.view, cursor.index)?.map(Some))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_of(keys: impl IntoIterator<Item = u32>) -> Tree<u32, u32> {
        let tree = Config::new().fanout(3).tree().unwrap();
        for k in keys {
            tree.insert(k, k * 10).unwrap();
        }
        tree
    }

    fn key_of(cursor: Option<Cursor<u32, u32>>) -> Option<u32> {
        cursor.map(|c| *c.key())
    }

    fn up(tree: &Tree<u32, u32>, from: Bound<&u32>) -> Option<u32> {
        key_of(tree.seek_up(from, &Span::full()).unwrap())
    }

    fn down(tree: &Tree<u32, u32>, from: Bound<&u32>) -> Option<u32> {
        key_of(tree.seek_down(from, &Span::full()).unwrap())
    }

    #[test]
    fn tighter_bounds() {
        let cmp = &NaturalOrder;
        let (one, two) = (1_u32, 2_u32);
        let (inc, exc) = (Bound::Included, Bound::Excluded);
        assert_eq!(
            tighter_hi(inc(&one), exc(&two), cmp).unwrap(),
            Bound::Included(&1)
        );
        assert_eq!(
            tighter_hi(inc(&one), exc(&one), cmp).unwrap(),
            Bound::Excluded(&1)
        );
        assert_eq!(
            tighter_lo(inc(&one), exc(&two), cmp).unwrap(),
            Bound::Excluded(&2)
        );
        assert_eq!(
            tighter_lo(Bound::Unbounded, inc(&two), cmp).unwrap(),
            Bound::Included(&2)
        );
    }

    #[test]
    fn seeks_cross_many_leaves() {
        let tree = tree_of((0..300).map(|i| i * 3));

        assert_eq!(up(&tree, Bound::Unbounded), Some(0));
        assert_eq!(up(&tree, Bound::Excluded(&0)), Some(3));
        assert_eq!(up(&tree, Bound::Included(&4)), Some(6));
        assert_eq!(up(&tree, Bound::Excluded(&897)), None);

        assert_eq!(down(&tree, Bound::Unbounded), Some(897));
        assert_eq!(down(&tree, Bound::Excluded(&897)), Some(894));
        assert_eq!(down(&tree, Bound::Included(&5)), Some(3));
        assert_eq!(down(&tree, Bound::Excluded(&0)), None);
    }

    #[test]
    fn seek_down_skips_emptied_leaves() {
        let tree = tree_of(0..100);
        for k in 10..90 {
            tree.remove(&k).unwrap();
        }
        assert_eq!(down(&tree, Bound::Excluded(&90)), Some(9));
        assert_eq!(up(&tree, Bound::Excluded(&9)), Some(90));
    }

    #[test]
    fn relations_clamp_to_the_span() {
        let tree = tree_of(0..50);
        let span =
            Span::new(Bound::Included(10), Bound::Excluded(20), tree.cmp())
                .unwrap();
        let rel = |direction, key, relation| {
            let found = tree.relative_in(&span, direction, &key, relation);
            key_of(found.unwrap())
        };

        let asc = Direction::Ascending;
        assert_eq!(rel(asc, 15, Relation::Lower), Some(14));
        assert_eq!(rel(asc, 15, Relation::Floor), Some(15));
        assert_eq!(rel(asc, 15, Relation::Higher), Some(16));
        assert_eq!(rel(asc, 40, Relation::Lower), Some(19));
        assert_eq!(rel(asc, 40, Relation::Higher), None);
        assert_eq!(rel(asc, 0, Relation::Ceiling), Some(10));
        assert_eq!(rel(asc, 10, Relation::Lower), None);
        assert_eq!(rel(asc, 19, Relation::Higher), None);

        let desc = Direction::Descending;
        assert_eq!(rel(desc, 15, Relation::Lower), Some(16));
        assert_eq!(rel(desc, 15, Relation::Higher), Some(14));
        assert_eq!(rel(desc, 15, Relation::Ceiling), Some(15));
        assert_eq!(rel(desc, 0, Relation::Lower), Some(10));
    }

    #[test]
    fn pops_drain_in_order() {
        let tree = tree_of(0..40);
        let span =
            Span::new(Bound::Excluded(5), Bound::Included(30), tree.cmp())
                .unwrap();
        let mut popped = vec![];
        while let Some((k, v)) =
            tree.pop_in(&span, Direction::Descending).unwrap()
        {
            assert_eq!(v, k * 10);
            popped.push(k);
        }
        assert_eq!(popped, (6..=30).rev().collect::<Vec<_>>());
        assert_eq!(tree.get(&5).unwrap(), Some(50));
        assert_eq!(tree.get(&31).unwrap(), Some(310));
        tree.verify_integrity().unwrap();
    }
}
