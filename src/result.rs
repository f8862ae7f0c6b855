use std::{
    error::Error as StdError,
    fmt::{self, Display},
};

use crate::RecId;

/// The top-level result type for dealing with a `Tree`.
pub type Result<T> = std::result::Result<T, Error>;

/// Marks an attempt that lost a compare-and-swap race against a
/// concurrent writer. It never escapes the crate: every public
/// operation retries until it gets an `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Conflict;

/// The outcome of a single optimistic attempt.
pub(crate) type Conflictable<T> = std::result::Result<T, Conflict>;

/// An Error type encapsulating the ways a map operation may be misused,
/// as well as problems reported by the underlying record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A null key was supplied to a comparator that has no
    /// place for it in its ordering.
    NullKey,
    /// A key could not be ordered against the keys already present.
    TypeMismatch(String),
    /// A range whose lower bound lies above its upper bound, or a
    /// narrowing request that would widen the enclosing view.
    InvalidRange(String),
    /// A navigational query had no satisfying key.
    NotFound,
    /// An iterator was advanced past its last in-bounds element.
    Exhausted,
    /// `remove` was called on an iterator without a preceding,
    /// unconsumed call to `next`.
    InvalidIteratorState,
    /// The system has been used in an unsupported way.
    Unsupported(String),
    /// A record could not be decoded, or was missing where the tree
    /// structure requires it.
    Corruption {
        /// The record that failed to decode, when known.
        at: Option<RecId>,
        /// What was wrong with it.
        why: String,
    },
    /// The root cell used to open a tree does not exist in the store.
    CollectionNotFound(RecId),
    /// An unexpected bug has happened. Please open an issue!
    ReportableBug(String),
}

impl Error {
    pub(crate) fn corruption<S: Into<String>>(
        at: Option<RecId>,
        why: S,
    ) -> Error {
        Error::Corruption { at, why: why.into() }
    }

    pub(crate) fn invalid_range<S: Into<String>>(why: S) -> Error {
        Error::InvalidRange(why.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::corruption(None, format!("bincode: {}", e))
    }
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> std::result::Result<(), fmt::Error> {
        use self::Error::*;

        match *self {
            NullKey => {
                write!(f, "null keys are not permitted by this comparator")
            }
            TypeMismatch(ref e) => write!(f, "Type mismatch: {}", e),
            InvalidRange(ref e) => write!(f, "Invalid range: {}", e),
            NotFound => write!(f, "No such element"),
            Exhausted => write!(f, "Iterator is exhausted"),
            InvalidIteratorState => write!(
                f,
                "remove called without a preceding call to next"
            ),
            Unsupported(ref e) => write!(f, "Unsupported: {}", e),
            Corruption { at: Some(at), ref why } => {
                write!(f, "Read corrupted record {}: {}", at, why)
            }
            Corruption { at: None, ref why } => {
                write!(f, "Read corrupted data: {}", why)
            }
            CollectionNotFound(ref root_cell) => {
                write!(
                    f,
                    "Collection with root cell {} does not exist",
                    root_cell
                )
            }
            ReportableBug(ref e) => write!(
                f,
                "Unexpected bug has happened: {}. \
                 PLEASE REPORT THIS BUG!",
                e
            ),
        }
    }
}
