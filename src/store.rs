//! The record store that nodes live in.
//!
//! The tree never touches bytes or files directly. Every node, the root
//! cell, and the optional size counter are records addressed by a
//! `RecId`, read atomically as a whole and replaced with
//! compare-and-swap.

use std::{
    fmt,
    num::NonZeroU64,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering::SeqCst},
    },
};

use fnv::FnvHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Serializer};

const SHARDS: u64 = 64;

/// An opaque identifier for a record in a `Store`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct RecId(NonZeroU64);

impl RecId {
    /// Wraps a raw identifier, which must be non-zero.
    pub const fn new(raw: u64) -> Option<RecId> {
        match NonZeroU64::new(raw) {
            Some(nz) => Some(RecId(nz)),
            None => None,
        }
    }

    /// The raw identifier.
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A store of byte records addressed by `RecId`.
///
/// Implementations must make each call atomic with respect to the
/// others on the same record. `cas_raw` succeeds only if the current
/// bytes are exactly `expected`.
pub trait Store: Send + Sync {
    /// Stores a new record, returning its identifier.
    fn put_raw(&self, bytes: Vec<u8>) -> Result<RecId>;

    /// Reads a record, or `None` if it does not exist.
    fn get_raw(&self, id: RecId) -> Result<Option<Arc<[u8]>>>;

    /// Unconditionally replaces an existing record.
    fn update_raw(&self, id: RecId, bytes: Vec<u8>) -> Result<()>;

    /// Replaces a record if its current bytes equal `expected`.
    fn cas_raw(&self, id: RecId, expected: &[u8], new: Vec<u8>) -> Result<bool>;

    /// Removes a record.
    fn delete_raw(&self, id: RecId) -> Result<()>;
}

/// Typed access to a `Store` through a `Serializer`.
pub trait StoreExt: Store {
    /// Serializes and stores a new record.
    fn put<T>(
        &self,
        value: &T,
        serializer: &dyn Serializer<T>,
    ) -> Result<RecId> {
        let mut buf = vec![];
        serializer.serialize(value, &mut buf)?;
        self.put_raw(buf)
    }

    /// Reads and deserializes a record.
    fn get<T>(
        &self,
        id: RecId,
        serializer: &dyn Serializer<T>,
    ) -> Result<Option<T>> {
        match self.get_raw(id)? {
            Some(bytes) => {
                let mut buf: &[u8] = &bytes;
                serializer
                    .deserialize(&mut buf)
                    .map(Some)
                    .map_err(|e| at_record(e, id))
            }
            None => Ok(None),
        }
    }

    /// Unconditionally replaces a record.
    fn update<T>(
        &self,
        id: RecId,
        value: &T,
        serializer: &dyn Serializer<T>,
    ) -> Result<()> {
        let mut buf = vec![];
        serializer.serialize(value, &mut buf)?;
        self.update_raw(id, buf)
    }

    /// Replaces a record if its current serialized form equals that of
    /// `expected`.
    fn compare_and_swap<T>(
        &self,
        id: RecId,
        expected: &T,
        new: &T,
        serializer: &dyn Serializer<T>,
    ) -> Result<bool> {
        let mut expected_buf = vec![];
        serializer.serialize(expected, &mut expected_buf)?;
        let mut new_buf = vec![];
        serializer.serialize(new, &mut new_buf)?;
        self.cas_raw(id, &expected_buf, new_buf)
    }

    /// Removes a record.
    fn delete<T>(
        &self,
        id: RecId,
        _serializer: &dyn Serializer<T>,
    ) -> Result<()> {
        self.delete_raw(id)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn at_record(error: Error, id: RecId) -> Error {
    match error {
        Error::Corruption { at: None, why } => {
            Error::Corruption { at: Some(id), why }
        }
        other => other,
    }
}

/// A `Store` that keeps every record in memory.
pub struct MemoryStore {
    next_id: AtomicU64,
    shards: Vec<RwLock<FnvHashMap<RecId, Arc<[u8]>>>>,
}

impl Default for MemoryStore {
    fn default() -> MemoryStore {
        MemoryStore {
            next_id: AtomicU64::new(1),
            shards: (0..SHARDS).map(|_| RwLock::default()).collect(),
        }
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.len())
            .field("next_id", &self.next_id.load(SeqCst))
            .finish()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// The number of live records.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, id: RecId) -> &RwLock<FnvHashMap<RecId, Arc<[u8]>>> {
        &self.shards[(id.get() % SHARDS) as usize]
    }
}

fn missing(id: RecId) -> Error {
    Error::corruption(Some(id), "record does not exist")
}

impl Store for MemoryStore {
    fn put_raw(&self, bytes: Vec<u8>) -> Result<RecId> {
        let raw = self.next_id.fetch_add(1, SeqCst);
        let id = RecId::new(raw).ok_or_else(|| {
            Error::ReportableBug("record identifiers wrapped around".into())
        })?;
        let old = self.shard(id).write().insert(id, bytes.into());
        assert!(old.is_none(), "allocated record {} twice", id);
        Ok(id)
    }

    fn get_raw(&self, id: RecId) -> Result<Option<Arc<[u8]>>> {
        Ok(self.shard(id).read().get(&id).cloned())
    }

    fn update_raw(&self, id: RecId, bytes: Vec<u8>) -> Result<()> {
        let mut shard = self.shard(id).write();
        match shard.get_mut(&id) {
            Some(current) => {
                *current = bytes.into();
                Ok(())
            }
            None => Err(missing(id)),
        }
    }

    fn cas_raw(
        &self,
        id: RecId,
        expected: &[u8],
        new: Vec<u8>,
    ) -> Result<bool> {
        let mut shard = self.shard(id).write();
        match shard.get_mut(&id) {
            Some(current) if **current == *expected => {
                *current = new.into();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(missing(id)),
        }
    }

    fn delete_raw(&self, id: RecId) -> Result<()> {
        match self.shard(id).write().remove(&id) {
            Some(_) => Ok(()),
            None => Err(missing(id)),
        }
    }
}
