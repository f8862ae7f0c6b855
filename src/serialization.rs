//! Encodings for keys, values, and the node records built from them.
//!
//! A `Serializer` turns one item into bytes, and may override the array
//! methods to compress a whole sorted key run at once. Nodes are always
//! encoded through their key and value serializers, so a tree of
//! `String` keys can store its leaves prefix-compressed without the
//! tree caring.

use std::{marker::PhantomData, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::{Data, Error, Node, RecId, Result, varint};

/// Converts items of type `T` to and from bytes.
pub trait Serializer<T>: Send + Sync {
    /// Appends the encoding of `item` to `buf`.
    fn serialize(&self, item: &T, buf: &mut Vec<u8>) -> Result<()>;

    /// Consumes one item from the front of `buf`.
    fn deserialize(&self, buf: &mut &[u8]) -> Result<T>;

    /// Appends the encoding of every item in `items`, which are in
    /// key order when called for a node's keys.
    fn serialize_array(&self, items: &[T], buf: &mut Vec<u8>) -> Result<()> {
        for item in items {
            self.serialize(item, buf)?;
        }
        Ok(())
    }

    /// Consumes `len` items written by `serialize_array`.
    fn deserialize_array(&self, buf: &mut &[u8], len: usize) -> Result<Vec<T>> {
        let mut ret = Vec::with_capacity(len.min(buf.len()));
        for _ in 0..len {
            ret.push(self.deserialize(buf)?);
        }
        Ok(ret)
    }
}

/// Encodes anything serde can handle with bincode.
pub struct BincodeSerializer<T>(PhantomData<fn() -> T>);

impl<T> Default for BincodeSerializer<T> {
    fn default() -> BincodeSerializer<T> {
        BincodeSerializer(PhantomData)
    }
}

impl<T> Clone for BincodeSerializer<T> {
    fn clone(&self) -> BincodeSerializer<T> {
        BincodeSerializer(PhantomData)
    }
}

impl<T> std::fmt::Debug for BincodeSerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BincodeSerializer")
    }
}

impl<T> Serializer<T> for BincodeSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, item: &T, buf: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(buf, item)?;
        Ok(())
    }

    fn deserialize(&self, buf: &mut &[u8]) -> Result<T> {
        Ok(bincode::deserialize_from(buf)?)
    }
}

fn take_bytes<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::corruption(
            None,
            format!("needed {} bytes but only {} remain", len, buf.len()),
        ));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        Error::corruption(None, format!("invalid utf-8 key: {}", e))
    })
}

/// Encodes sorted runs of strings by storing, for each one, only the
/// suffix that differs from its predecessor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixStrings;

impl Serializer<String> for PrefixStrings {
    fn serialize(&self, item: &String, buf: &mut Vec<u8>) -> Result<()> {
        varint::push(item.len() as u64, buf);
        buf.extend_from_slice(item.as_bytes());
        Ok(())
    }

    fn deserialize(&self, buf: &mut &[u8]) -> Result<String> {
        let len = varint::take_usize(buf)?;
        utf8(take_bytes(buf, len)?.to_vec())
    }

    fn serialize_array(
        &self,
        items: &[String],
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        let mut prev: &[u8] = &[];
        for item in items {
            let item = item.as_bytes();
            let shared = prev
                .iter()
                .zip(item.iter())
                .take_while(|(a, b)| a == b)
                .count();
            varint::push(shared as u64, buf);
            varint::push((item.len() - shared) as u64, buf);
            buf.extend_from_slice(&item[shared..]);
            prev = item;
        }
        Ok(())
    }

    fn deserialize_array(
        &self,
        buf: &mut &[u8],
        len: usize,
    ) -> Result<Vec<String>> {
        let mut ret: Vec<String> = Vec::with_capacity(len.min(buf.len()));
        let mut prev: Vec<u8> = vec![];
        for _ in 0..len {
            let shared = varint::take_usize(buf)?;
            let suffix_len = varint::take_usize(buf)?;
            if shared > prev.len() {
                return Err(Error::corruption(
                    None,
                    "shared prefix longer than the preceding key",
                ));
            }
            let mut item = prev[..shared].to_vec();
            item.extend_from_slice(take_bytes(buf, suffix_len)?);
            prev.clone_from(&item);
            ret.push(utf8(item)?);
        }
        Ok(ret)
    }
}

/// Encodes `u64`s as varints, and arrays of them as varint deltas from
/// their predecessor. Sorted, dense key runs shrink to about a byte per
/// key.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeltaU64;

impl Serializer<u64> for DeltaU64 {
    fn serialize(&self, item: &u64, buf: &mut Vec<u8>) -> Result<()> {
        varint::push(*item, buf);
        Ok(())
    }

    fn deserialize(&self, buf: &mut &[u8]) -> Result<u64> {
        varint::take(buf)
    }

    fn serialize_array(&self, items: &[u64], buf: &mut Vec<u8>) -> Result<()> {
        let mut prev = 0_u64;
        for item in items {
            varint::push(item.wrapping_sub(prev), buf);
            prev = *item;
        }
        Ok(())
    }

    fn deserialize_array(
        &self,
        buf: &mut &[u8],
        len: usize,
    ) -> Result<Vec<u64>> {
        let mut ret = Vec::with_capacity(len.min(buf.len()));
        let mut prev = 0_u64;
        for _ in 0..len {
            prev = prev.wrapping_add(varint::take(buf)?);
            ret.push(prev);
        }
        Ok(ret)
    }
}

const DIR: u8 = 1;
const HAS_LO: u8 = 1 << 1;
const HAS_HI: u8 = 1 << 2;
const HAS_NEXT: u8 = 1 << 3;

/// Encodes whole nodes:
///
/// `flags | next? | len | lo? | hi? | keys | values or children`
pub(crate) struct NodeSerializer<K, V> {
    pub(crate) keys: Arc<dyn Serializer<K>>,
    pub(crate) values: Arc<dyn Serializer<V>>,
}

impl<K, V> Clone for NodeSerializer<K, V> {
    fn clone(&self) -> NodeSerializer<K, V> {
        NodeSerializer { keys: self.keys.clone(), values: self.values.clone() }
    }
}

impl<K, V> Serializer<Node<K, V>> for NodeSerializer<K, V> {
    fn serialize(&self, node: &Node<K, V>, buf: &mut Vec<u8>) -> Result<()> {
        let mut flags = 0;
        if node.data.is_dir() {
            flags |= DIR;
        }
        if node.lo.is_some() {
            flags |= HAS_LO;
        }
        if node.hi.is_some() {
            flags |= HAS_HI;
        }
        if node.next.is_some() {
            flags |= HAS_NEXT;
        }
        buf.push(flags);
        if let Some(next) = node.next {
            varint::push(next.get(), buf);
        }

        let keys = node.data.keys();
        varint::push(keys.len() as u64, buf);
        if let Some(lo) = &node.lo {
            self.keys.serialize(lo, buf)?;
        }
        if let Some(hi) = &node.hi {
            self.keys.serialize(hi, buf)?;
        }
        self.keys.serialize_array(keys, buf)?;

        match &node.data {
            Data::Leaf { values, .. } => {
                self.values.serialize_array(values, buf)?
            }
            Data::Dir { children, .. } => {
                for child in children {
                    varint::push(child.get(), buf);
                }
            }
        }
        Ok(())
    }

    fn deserialize(&self, buf: &mut &[u8]) -> Result<Node<K, V>> {
        let flags = *take_bytes(buf, 1)?.first().ok_or_else(|| {
            Error::corruption(None, "empty node record")
        })?;
        let next = if flags & HAS_NEXT == 0 {
            None
        } else {
            let raw = varint::take(buf)?;
            Some(RecId::new(raw).ok_or_else(|| {
                Error::corruption(None, "right link to record 0")
            })?)
        };

        let len = varint::take_usize(buf)?;
        let mut bound = |flag: u8| -> Result<Option<K>> {
            if flags & flag == 0 {
                Ok(None)
            } else {
                self.keys.deserialize(buf).map(Some)
            }
        };
        let lo = bound(HAS_LO)?;
        let hi = bound(HAS_HI)?;
        let keys = self.keys.deserialize_array(buf, len)?;

        let data = if flags & DIR == 0 {
            let values = self.values.deserialize_array(buf, len)?;
            Data::Leaf { keys, values }
        } else {
            let mut children = Vec::with_capacity((len + 1).min(buf.len()));
            for _ in 0..=len {
                let raw = varint::take(buf)?;
                children.push(RecId::new(raw).ok_or_else(|| {
                    Error::corruption(None, "child pointer to record 0")
                })?);
            }
            Data::Dir { keys, children }
        };

        if !buf.is_empty() {
            return Err(Error::corruption(
                None,
                format!("{} trailing bytes after node", buf.len()),
            ));
        }

        Ok(Node { lo, hi, next, data })
    }
}
