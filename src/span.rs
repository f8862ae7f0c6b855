use std::{cmp::Ordering, ops::Bound};

use super::*;

/// The key range a view is restricted to, always stored in ascending
/// terms regardless of the view's direction.
#[derive(Debug, Clone)]
pub(crate) struct Span<K> {
    pub(crate) lo: Bound<K>,
    pub(crate) hi: Bound<K>,
}

fn bound_key<K>(bound: &Bound<K>) -> Option<&K> {
    match bound {
        Bound::Included(k) | Bound::Excluded(k) => Some(k),
        Bound::Unbounded => None,
    }
}

impl<K: Key> Span<K> {
    pub(crate) const fn full() -> Span<K> {
        Span { lo: Bound::Unbounded, hi: Bound::Unbounded }
    }

    /// Validates both keys against the comparator, and that `lo` does
    /// not lie above `hi`. Equal keys are allowed even when one side is
    /// exclusive; such a span is simply empty.
    pub(crate) fn new(
        lo: Bound<K>,
        hi: Bound<K>,
        cmp: &dyn Comparator<K>,
    ) -> Result<Span<K>> {
        if let Some(lo) = bound_key(&lo) {
            cmp.check(lo)?;
        }
        if let Some(hi) = bound_key(&hi) {
            cmp.check(hi)?;
        }
        if let (Some(l), Some(h)) = (bound_key(&lo), bound_key(&hi)) {
            if cmp.compare(l, h)? == Ordering::Greater {
                return Err(Error::invalid_range(format!(
                    "lower bound {:?} is greater than upper bound {:?}",
                    l, h
                )));
            }
        }
        Ok(Span { lo, hi })
    }

    pub(crate) fn is_full(&self) -> bool {
        matches!((&self.lo, &self.hi), (Bound::Unbounded, Bound::Unbounded))
    }

    /// `key` is not below the lower bound.
    pub(crate) fn above_lo(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        Ok(match &self.lo {
            Bound::Unbounded => true,
            Bound::Included(lo) => cmp.compare(key, lo)? != Ordering::Less,
            Bound::Excluded(lo) => cmp.compare(key, lo)? == Ordering::Greater,
        })
    }

    /// `key` is not above the upper bound.
    pub(crate) fn below_hi(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        Ok(match &self.hi {
            Bound::Unbounded => true,
            Bound::Included(hi) => cmp.compare(key, hi)? != Ordering::Greater,
            Bound::Excluded(hi) => cmp.compare(key, hi)? == Ordering::Less,
        })
    }

    pub(crate) fn contains(
        &self,
        key: &K,
        cmp: &dyn Comparator<K>,
    ) -> Result<bool> {
        cmp.check(key)?;
        Ok(self.above_lo(key, cmp)? && self.below_hi(key, cmp)?)
    }

    /// Intersects this span with a requested one. An unbounded side of
    /// the request inherits this span's bound; a bounded side that
    /// reaches beyond this span is an `InvalidRange`.
    pub(crate) fn narrow(
        &self,
        lo: Bound<K>,
        hi: Bound<K>,
        cmp: &dyn Comparator<K>,
    ) -> Result<Span<K>> {
        if widens(&lo, &self.lo, Ordering::Less, cmp)? {
            return Err(Error::invalid_range(format!(
                "lower bound {:?} lies outside the view",
                lo
            )));
        }
        if widens(&hi, &self.hi, Ordering::Greater, cmp)? {
            return Err(Error::invalid_range(format!(
                "upper bound {:?} lies outside the view",
                hi
            )));
        }

        let lo = if let Bound::Unbounded = lo { self.lo.clone() } else { lo };
        let hi = if let Bound::Unbounded = hi { self.hi.clone() } else { hi };

        Span::new(lo, hi, cmp)
    }
}

/// Whether `requested` reaches past `current` in the `outward` direction.
/// An inclusive request on the exact key of an exclusive bound counts.
fn widens<K>(
    requested: &Bound<K>,
    current: &Bound<K>,
    outward: Ordering,
    cmp: &dyn Comparator<K>,
) -> Result<bool> {
    match (requested, current) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => Ok(false),
        (
            Bound::Included(r) | Bound::Excluded(r),
            Bound::Included(c) | Bound::Excluded(c),
        ) => {
            let order = cmp.compare(r, c)?;
            Ok(order == outward
                || (order == Ordering::Equal
                    && matches!(
                        (requested, current),
                        (Bound::Included(_), Bound::Excluded(_))
                    )))
        }
    }
}

/// Builds an owned bound from a key and an inclusivity flag.
pub(crate) fn bound<K>(key: K, inclusive: bool) -> Bound<K> {
    if inclusive { Bound::Included(key) } else { Bound::Excluded(key) }
}
