use core::fmt::Debug;
use core::mem;

use crate::hash_table::HashTable;
use crate::hash_table::Iter as TableIter;
use crate::hash_table::fatal;
use crate::hashing::DefaultKeyHasher;
use crate::hashing::KeyHasher;
use crate::memory::Global;
use crate::memory::Memory;
use crate::memory::TryReserveError;
use crate::node::CachedNode;
use crate::node::Node;

/// A hash map that owns its allocation context.
///
/// `HashMap<K, V, H, M>` stores its entries in a [`HashTable`] and keeps the
/// [`Memory`] the table allocates from next to it, so none of its methods
/// take a context argument. Dropping the map drops every entry and hands the
/// slot array back to `M`.
///
/// Entries use [`CachedNode`]s, so each key is hashed once on insertion and
/// never again when the table resizes or evicts a parked entry.
///
/// Unlike [`HashTable::insert`], [`insert`](Self::insert) replaces the value
/// of an existing key. [`get_or_insert`](Self::get_or_insert) offers the
/// table's get-or-create behavior.
///
/// # Performance Characteristics
///
/// - **Memory**: one machine word of chain link, a 32-bit hash and a flag
///   byte per slot, plus the size of `(K, V)`.
/// - **Growth**: the slot array doubles only when every slot is in use.
pub struct HashMap<K, V, H = DefaultKeyHasher, M: Memory = Global> {
    table: HashTable<K, V, H, CachedNode<K, V>>,
    memory: M,
}

impl<K, V, H, M: Memory> Drop for HashMap<K, V, H, M> {
    fn drop(&mut self) {
        self.table.clear(&mut self.memory);
    }
}

impl<K, V, H, M> Debug for HashMap<K, V, H, M>
where
    K: Debug,
    V: Debug,
    M: Memory,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.iter() {
            map.entry(k, v);
        }
        map.finish()
    }
}

impl<K, V, H, M> PartialEq for HashMap<K, V, H, M>
where
    K: Eq,
    V: PartialEq,
    H: KeyHasher<K>,
    M: Memory,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|other| v == other))
    }
}

impl<K, V, H, M> Default for HashMap<K, V, H, M>
where
    H: Default,
    M: Memory + Default,
{
    fn default() -> Self {
        Self::with_hasher_in(H::default(), M::default())
    }
}

impl<K, V, H, M: Memory> HashMap<K, V, H, M> {
    /// Creates an empty map that hashes with `hasher` and allocates from
    /// `memory`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    /// use home_hash::hashing::CastHasher;
    /// use home_hash::memory::Tracked;
    ///
    /// let mut map = HashMap::with_hasher_in(CastHasher, Tracked::new());
    /// map.insert(1u32, "one");
    /// assert!(map.memory().live_bytes() > 0);
    /// ```
    pub const fn with_hasher_in(hasher: H, memory: M) -> Self {
        Self {
            table: HashTable::with_hasher(hasher),
            memory,
        }
    }

    /// Creates an empty map that hashes with `hasher`.
    pub fn with_hasher(hasher: H) -> Self
    where
        M: Default,
    {
        Self::with_hasher_in(hasher, M::default())
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of entries the map holds before it next grows.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the map's hasher.
    pub fn hasher(&self) -> &H {
        self.table.hasher()
    }

    /// Returns the allocation context.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Removes every entry and releases the storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let mut map: HashMap<u32, u32> = HashMap::new();
    /// map.insert(1, 2);
    ///
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 0);
    /// ```
    pub fn clear(&mut self) {
        self.table.clear(&mut self.memory);
    }

    /// An iterator visiting all key-value pairs in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// An iterator visiting all keys in slot order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// An iterator visiting all values in slot order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Returns the underlying table.
    pub fn as_table(&self) -> &HashTable<K, V, H, CachedNode<K, V>> {
        &self.table
    }
}

impl<K, V, H, M> HashMap<K, V, H, M>
where
    H: Default,
    M: Memory + Default,
{
    /// Creates an empty map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let map: HashMap<String, u32> = HashMap::new();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 0);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, H, M> HashMap<K, V, H, M>
where
    K: Eq,
    H: KeyHasher<K> + Default,
    M: Memory + Default,
{
    /// Creates an empty map able to hold `capacity` entries without growing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let map: HashMap<u64, u64> = HashMap::with_capacity(100);
    /// assert_eq!(map.capacity(), 128);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        map.reserve(capacity);
        map
    }
}

impl<K, V, H, M> HashMap<K, V, H, M>
where
    K: Eq,
    H: KeyHasher<K>,
    M: Memory,
{
    /// Reserves room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            fatal(err);
        }
    }

    /// Fallible [`reserve`](Self::reserve). On error the map is unchanged.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let count = self
            .len()
            .checked_add(additional)
            .ok_or(TryReserveError::CapacityOverflow)?;
        self.table.try_prealloc(&mut self.memory, count)
    }

    /// Shrinks the storage to the smallest size that holds the current
    /// entries, releasing it entirely when the map is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let mut map: HashMap<u32, u32> = HashMap::with_capacity(64);
    /// map.insert(1, 1);
    ///
    /// map.shrink_to_fit();
    /// assert_eq!(map.capacity(), 4);
    /// ```
    pub fn shrink_to_fit(&mut self) {
        self.table.minimize(&mut self.memory);
    }

    /// Inserts a key-value pair, returning the previous value if the key was
    /// already present. The stored key is kept in that case and the entry is
    /// marked value-modified.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let mut map: HashMap<&str, u32> = HashMap::new();
    /// assert_eq!(map.insert("x", 1), None);
    /// assert_eq!(map.insert("x", 2), Some(1));
    /// assert_eq!(map.get(&"x"), Some(&2));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.try_insert(key, value) {
            Ok(previous) => previous,
            Err(err) => fatal(err),
        }
    }

    /// Fallible [`insert`](Self::insert). On error the map is unchanged and
    /// `key` and `value` are dropped.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, TryReserveError> {
        match self.table.probe(&key) {
            Ok(index) => {
                let node = self.table.node_at_mut(index);
                node.set_val_modified();
                Ok(Some(mem::replace(node.value_mut(), value)))
            }
            Err(hash) => {
                self.table
                    .insert_new(&mut self.memory, key, hash, value)?;
                Ok(None)
            }
        }
    }

    /// Returns the value for `key`, inserting `value` first if the key is
    /// absent. An existing value is left untouched and `value` is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let mut counts: HashMap<char, u32> = HashMap::new();
    /// for c in "hello".chars() {
    ///     *counts.get_or_insert(c, 0) += 1;
    /// }
    /// assert_eq!(counts.get(&'l'), Some(&2));
    /// ```
    pub fn get_or_insert(&mut self, key: K, value: V) -> &mut V {
        self.table.insert(&mut self.memory, key, value)
    }

    /// Like [`get_or_insert`](Self::get_or_insert), but only builds the
    /// value when the key is absent.
    pub fn get_or_insert_with(&mut self, key: K, value: impl FnOnce() -> V) -> &mut V {
        self.table.insert_with(&mut self.memory, key, value)
    }

    /// Returns a reference to the value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.table.lookup(key)
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.table.lookup_mut(key)
    }

    /// Returns the stored key and value for `key`.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        self.table
            .lookup_node(key)
            .map(|node| (node.key(), node.value()))
    }

    /// Returns `true` if the map holds `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// Removal never shrinks the storage; see
    /// [`shrink_to_fit`](Self::shrink_to_fit).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashMap;
    ///
    /// let mut map: HashMap<u32, &str> = HashMap::new();
    /// map.insert(1, "a");
    ///
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// assert_eq!(map.capacity(), 4);
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.table.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes `key`, returning the stored key and value.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        self.table.remove_entry(key)
    }
}

impl<K, V, H, M> Extend<(K, V)> for HashMap<K, V, H, M>
where
    K: Eq,
    H: KeyHasher<K>,
    M: Memory,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, H, M> FromIterator<(K, V)> for HashMap<K, V, H, M>
where
    K: Eq,
    H: KeyHasher<K> + Default,
    M: Memory + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, H, M: Memory> IntoIterator for &'a HashMap<K, V, H, M> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entries of a [`HashMap`].
pub struct Iter<'a, K, V> {
    inner: TableIter<'a, K, V, CachedNode<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// An iterator over the keys of a [`HashMap`].
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An iterator over the values of a [`HashMap`].
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
