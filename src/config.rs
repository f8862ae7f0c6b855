use std::{fmt, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use super::*;

/// Construction parameters for a `Tree`.
///
/// # Examples
///
/// ```
/// # fn main() -> blinkmap::Result<()> {
/// use std::sync::Arc;
///
/// use blinkmap::{BincodeSerializer, Config, FnComparator, MemoryStore, Store};
///
/// let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
/// let config = Config::new().store(store).fanout(8).counted(true);
///
/// let by_len = Arc::new(FnComparator::new(|a: &String, b: &String| {
///     a.len().cmp(&b.len()).then_with(|| a.cmp(b))
/// }));
/// let tree = config.tree_with::<String, u8>(
///     by_len.clone(),
///     Arc::new(BincodeSerializer::default()),
///     Arc::new(BincodeSerializer::default()),
/// )?;
/// tree.insert("ccc".into(), 3)?;
/// tree.insert("a".into(), 1)?;
///
/// let reopened = config.open_tree_with::<String, u8>(
///     tree.root_cell(),
///     by_len,
///     Arc::new(BincodeSerializer::default()),
///     Arc::new(BincodeSerializer::default()),
/// )?;
/// assert_eq!(reopened.first_key()?, "a");
/// assert_eq!(reopened.len()?, 2);
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Config {
    fanout: usize,
    counted: bool,
    store: Arc<dyn Store>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            fanout: 32,
            counted: false,
            store: Arc::new(MemoryStore::new()),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("fanout", &self.fanout)
            .field("counted", &self.counted)
            .finish_non_exhaustive()
    }
}

macro_rules! builder {
    ($(($name:ident, $get:ident, $set:ident, $t:ty, $desc:expr)),*) => {
        $(
            #[doc="Get "]
            #[doc=$desc]
            pub fn $get(&self) -> $t {
                self.$name.clone()
            }

            #[doc="Set "]
            #[doc=$desc]
            pub fn $set(&mut self, to: $t) {
                self.$name = to;
            }

            #[doc="Builder, set "]
            #[doc=$desc]
            pub fn $name(&self, to: $t) -> Config {
                let mut ret = self.clone();
                ret.$name = to;
                ret
            }
        )*
    }
}

impl Config {
    /// A configuration backed by a fresh `MemoryStore`.
    pub fn new() -> Config {
        Config::default()
    }

    builder!(
        (
            fanout,
            get_fanout,
            set_fanout,
            usize,
            "the most keys a node holds before it splits"
        ),
        (
            counted,
            get_counted,
            set_counted,
            bool,
            "whether new trees keep an exact size counter"
        ),
        (
            store,
            get_store,
            set_store,
            Arc<dyn Store>,
            "the record store trees are kept in"
        )
    );

    fn validate(&self) -> Result<()> {
        if self.fanout < 3 {
            return Err(Error::Unsupported(format!(
                "fanout must be at least 3, got {}",
                self.fanout
            )));
        }
        Ok(())
    }

    /// Create a new `Tree` ordered by the natural order of its keys,
    /// with keys and values encoded by bincode.
    pub fn tree<K, V>(&self) -> Result<Tree<K, V>>
    where
        K: Key + Ord + Serialize + DeserializeOwned,
        V: Value + Serialize + DeserializeOwned,
    {
        self.tree_with(
            Arc::new(NaturalOrder),
            Arc::new(BincodeSerializer::default()),
            Arc::new(BincodeSerializer::default()),
        )
    }

    /// Create a new `Tree` with an explicit comparator and serializers.
    pub fn tree_with<K: Key, V: Value>(
        &self,
        comparator: Arc<dyn Comparator<K>>,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Result<Tree<K, V>> {
        self.validate()?;
        Tree::create(
            self.store.clone(),
            comparator,
            NodeSerializer { keys, values },
            self.fanout,
            self.counted,
        )
    }

    /// Reattach to a naturally ordered, bincode encoded tree previously
    /// created in this configuration's store.
    pub fn open_tree<K, V>(&self, root_cell: RecId) -> Result<Tree<K, V>>
    where
        K: Key + Ord + Serialize + DeserializeOwned,
        V: Value + Serialize + DeserializeOwned,
    {
        self.open_tree_with(
            root_cell,
            Arc::new(NaturalOrder),
            Arc::new(BincodeSerializer::default()),
            Arc::new(BincodeSerializer::default()),
        )
    }

    /// Reattach to a tree previously created in this configuration's
    /// store. The comparator and serializers must be the ones it was
    /// created with. Whether the tree is counted was fixed at creation.
    pub fn open_tree_with<K: Key, V: Value>(
        &self,
        root_cell: RecId,
        comparator: Arc<dyn Comparator<K>>,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Result<Tree<K, V>> {
        self.validate()?;
        Tree::open(
            self.store.clone(),
            root_cell,
            comparator,
            NodeSerializer { keys, values },
            self.fanout,
        )
    }
}
