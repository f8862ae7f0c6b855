//! Total orders over keys.
//!
//! Every `Tree` is built around exactly one `Comparator`, and all of its
//! views share that same instance. A comparator either reports the
//! natural order of its keys or encodes an arbitrary injected order,
//! which may also reserve a place for a null key.

use std::{cmp::Ordering, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A total order over keys of type `K`.
pub trait Comparator<K>: Send + Sync {
    /// Orders `a` relative to `b`. Fails with `TypeMismatch` if the two
    /// keys cannot be compared, or `NullKey` if either is a null that
    /// this order has no place for.
    fn compare(&self, a: &K, b: &K) -> Result<Ordering>;

    /// Rejects keys that can never participate in this order.
    fn check(&self, key: &K) -> Result<()> {
        let _ = key;
        Ok(())
    }

    /// Whether this is the natural order of the key type rather than
    /// an explicitly supplied one. Views report natural orders as an
    /// absent comparator.
    fn is_natural(&self) -> bool {
        false
    }
}

/// The `Ord` implementation of the key type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord> Comparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Result<Ordering> {
        Ok(a.cmp(b))
    }

    fn is_natural(&self) -> bool {
        true
    }
}

/// Adapts a plain closure into a `Comparator`.
///
/// # Examples
///
/// ```
/// use blinkmap::{Comparator, FnComparator};
///
/// let by_len = FnComparator::new(|a: &String, b: &String| {
///     a.len().cmp(&b.len()).then_with(|| a.cmp(b))
/// });
/// let lt = by_len.compare(&"zz".to_string(), &"aaa".to_string()).unwrap();
/// assert_eq!(lt, std::cmp::Ordering::Less);
/// ```
#[derive(Clone, Copy)]
pub struct FnComparator<F>(F);

impl<F> FnComparator<F> {
    /// Wrap `f`, which must describe a total order.
    pub const fn new(f: F) -> FnComparator<F> {
        FnComparator(f)
    }
}

impl<F> fmt::Debug for FnComparator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnComparator")
    }
}

impl<K, F> Comparator<K> for FnComparator<F>
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &K, b: &K) -> Result<Ordering> {
        Ok((self.0)(a, b))
    }
}

/// Returns `true` if two comparators define the same order for the
/// purpose of combining ranges: either they are the same instance, or
/// both are natural orders.
pub fn same_ordering<K>(
    a: &Arc<dyn Comparator<K>>,
    b: &Arc<dyn Comparator<K>>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
        || (a.is_natural() && b.is_natural())
}

/// A dynamically typed key, for maps whose keys are not known to share
/// a single Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datum {
    /// The absent key.
    Null,
    /// A boolean key.
    Bool(bool),
    /// A signed integer key.
    Int(i64),
    /// A UTF-8 string key.
    Str(String),
    /// An opaque byte string key.
    Bytes(Vec<u8>),
}

impl Datum {
    fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "bool",
            Datum::Int(_) => "int",
            Datum::Str(_) => "string",
            Datum::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for Datum {
    fn from(i: i64) -> Datum {
        Datum::Int(i)
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Datum {
        Datum::Bool(b)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Datum {
        Datum::Str(s.to_owned())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Datum {
        Datum::Str(s)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Datum {
        Datum::Bytes(v)
    }
}

/// Where `DatumOrder` places `Datum::Null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    /// Null keys are rejected with `Error::NullKey`.
    Reject,
    /// Null sorts before every other key.
    First,
}

/// Orders `Datum` keys of the same variant. Keys of different variants
/// are incomparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatumOrder {
    nulls: Nulls,
}

impl DatumOrder {
    /// The natural order: nulls are rejected.
    pub const fn natural() -> DatumOrder {
        DatumOrder { nulls: Nulls::Reject }
    }

    /// An injected order treating null as less than everything.
    pub const fn nulls_first() -> DatumOrder {
        DatumOrder { nulls: Nulls::First }
    }
}

impl Default for DatumOrder {
    fn default() -> DatumOrder {
        DatumOrder::natural()
    }
}

impl Comparator<Datum> for DatumOrder {
    fn compare(&self, a: &Datum, b: &Datum) -> Result<Ordering> {
        use Datum::*;

        match (a, b) {
            (Null, _) | (_, Null) if self.nulls == Nulls::Reject => {
                Err(Error::NullKey)
            }
            (Null, Null) => Ok(Ordering::Equal),
            (Null, _) => Ok(Ordering::Less),
            (_, Null) => Ok(Ordering::Greater),
            (Bool(l), Bool(r)) => Ok(l.cmp(r)),
            (Int(l), Int(r)) => Ok(l.cmp(r)),
            (Str(l), Str(r)) => Ok(l.cmp(r)),
            (Bytes(l), Bytes(r)) => Ok(l.cmp(r)),
            (l, r) => Err(Error::TypeMismatch(format!(
                "cannot compare {} key with {} key",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    fn check(&self, key: &Datum) -> Result<()> {
        if *key == Datum::Null && self.nulls == Nulls::Reject {
            Err(Error::NullKey)
        } else {
            Ok(())
        }
    }

    fn is_natural(&self) -> bool {
        self.nulls == Nulls::Reject
    }
}
