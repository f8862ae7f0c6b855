//! `blinkmap` is a concurrent, ordered key-value map built as a B-link
//! tree over a pluggable record store.
//!
//! Every node is an immutable record addressed by a `RecId`. Writers read
//! a node, build its replacement, and install it with a single
//! compare-and-swap; readers never lock. Each node carries a high key and
//! a link to its right sibling, so a traversal that arrives at a node
//! whose range has since been split to the right simply follows the link.
//!
//! On top of the tree sit bounded, optionally descending views
//! (`sub_map`, `head_map`, `tail_map`) with inclusive/exclusive bounds,
//! and weakly consistent iterators that tolerate concurrent mutation.
//!
//! # Examples
//!
//! ```
//! # fn main() -> blinkmap::Result<()> {
//! let tree = blinkmap::Config::new().fanout(4).tree::<String, u32>()?;
//!
//! for i in 100..110_u32 {
//!     tree.insert(i.to_string(), i)?;
//! }
//!
//! assert_eq!(tree.get(&"105".to_string())?, Some(105));
//! assert_eq!(tree.higher_key(&"105".to_string())?, Some("106".to_string()));
//!
//! let (lo, hi) = ("100".to_string(), "109".to_string());
//! let window = tree.sub_map_with(lo, false, hi, false)?;
//! assert_eq!(window.len()?, 8);
//! assert_eq!(window.first_key()?, "101");
//!
//! let reversed: Vec<String> = window
//!     .descending_map()
//!     .keys()
//!     .iter()
//!     .take(2)
//!     .collect::<blinkmap::Result<_>>()?;
//! assert_eq!(reversed, vec!["108".to_string(), "107".to_string()]);
//! # Ok(()) }
//! ```
#![deny(missing_docs)]
#![cfg_attr(test, deny(rust_2018_idioms))]

mod backoff;
mod config;
#[cfg(any(test, feature = "lock_free_delays"))]
mod debug_delay;
mod iter;
mod navigation;
mod node;
mod ordering;
mod result;
mod serialization;
mod sets;
mod span;
mod store;
mod tree;
mod varint;
mod view;

use std::fmt;

use log::{debug, error, trace, warn};

use self::{
    backoff::{Backoff, retry},
    navigation::{Direction, Relation},
    node::{Data, Node, NodeView},
    result::{Conflict, Conflictable},
    serialization::NodeSerializer,
    span::Span,
};

pub use self::{
    config::Config,
    iter::{Iter, KeysIter, ValuesIter},
    ordering::{
        Comparator, Datum, DatumOrder, FnComparator, NaturalOrder, Nulls,
        same_ordering,
    },
    result::{Error, Result},
    serialization::{BincodeSerializer, DeltaU64, PrefixStrings, Serializer},
    sets::{EntrySet, KeySet, Values},
    store::{MemoryStore, RecId, Store, StoreExt},
    tree::{CompareAndSwapError, CompareAndSwapResult, Tree},
    view::SubMap,
};

#[cfg(any(test, feature = "lock_free_delays"))]
use self::debug_delay::debug_delay;

/// Induces random jitter around compare-and-swap points when built for
/// testing. Compiles away entirely otherwise.
#[cfg(not(any(test, feature = "lock_free_delays")))]
const fn debug_delay() {}

/// Requirements on the key type of a `Tree`.
pub trait Key: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Requirements on the value type of a `Tree`.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}
