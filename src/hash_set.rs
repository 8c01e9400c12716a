use core::fmt::Debug;

use crate::hash_table::HashTable;
use crate::hash_table::fatal;
use crate::hashing::DefaultKeyHasher;
use crate::hashing::KeyHasher;
use crate::memory::Global;
use crate::memory::Memory;
use crate::memory::TryReserveError;
use crate::node::CachedNode;
use crate::node::Node;

/// A hash set that owns its allocation context.
///
/// `HashSet<T, H, M>` is a [`HashTable`] with unit values plus the [`Memory`]
/// it allocates from. [`get_or_insert`](Self::get_or_insert) returns the
/// stored copy of a value, which makes the set a natural interner.
///
/// # Performance Characteristics
///
/// - **Memory**: one machine word of chain link, a 32-bit hash and a flag
///   byte per slot, plus the size of `T`.
pub struct HashSet<T, H = DefaultKeyHasher, M: Memory = Global> {
    table: HashTable<T, (), H, CachedNode<T, ()>>,
    memory: M,
}

impl<T, H, M: Memory> Drop for HashSet<T, H, M> {
    fn drop(&mut self) {
        self.table.clear(&mut self.memory);
    }
}

impl<T, H, M> PartialEq for HashSet<T, H, M>
where
    T: Eq,
    H: KeyHasher<T>,
    M: Memory,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|v| other.contains(v))
    }
}

impl<T, H, M> Eq for HashSet<T, H, M>
where
    T: Eq,
    H: KeyHasher<T>,
    M: Memory,
{
}

impl<T, H, M> Debug for HashSet<T, H, M>
where
    T: Debug,
    M: Memory,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, H, M> Default for HashSet<T, H, M>
where
    H: Default,
    M: Memory + Default,
{
    fn default() -> Self {
        Self::with_hasher_in(H::default(), M::default())
    }
}

impl<T, H, M: Memory> HashSet<T, H, M> {
    /// Creates an empty set that hashes with `hasher` and allocates from
    /// `memory`.
    pub const fn with_hasher_in(hasher: H, memory: M) -> Self {
        Self {
            table: HashTable::with_hasher(hasher),
            memory,
        }
    }

    /// Creates an empty set that hashes with `hasher`.
    pub fn with_hasher(hasher: H) -> Self
    where
        M: Default,
    {
        Self::with_hasher_in(hasher, M::default())
    }

    /// Returns the number of values in the set.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of values the set holds before it next grows.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the allocation context.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Removes every value and releases the storage.
    pub fn clear(&mut self) {
        self.table.clear(&mut self.memory);
    }

    /// An iterator visiting all values in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashSet;
    ///
    /// let mut set: HashSet<u32> = HashSet::new();
    /// set.insert(1);
    /// set.insert(2);
    ///
    /// let mut values: Vec<_> = set.iter().copied().collect();
    /// values.sort();
    /// assert_eq!(values, [1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.table.iter(),
        }
    }
}

impl<T, H, M> HashSet<T, H, M>
where
    H: Default,
    M: Memory + Default,
{
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, H, M> HashSet<T, H, M>
where
    T: Eq,
    H: KeyHasher<T> + Default,
    M: Memory + Default,
{
    /// Creates an empty set able to hold `capacity` values without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut set = Self::new();
        set.reserve(capacity);
        set
    }
}

impl<T, H, M> HashSet<T, H, M>
where
    T: Eq,
    H: KeyHasher<T>,
    M: Memory,
{
    /// Reserves room for at least `additional` more values.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            fatal(err);
        }
    }

    /// Fallible [`reserve`](Self::reserve). On error the set is unchanged.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let count = self
            .len()
            .checked_add(additional)
            .ok_or(TryReserveError::CapacityOverflow)?;
        self.table.try_prealloc(&mut self.memory, count)
    }

    /// Shrinks the storage to the smallest size that holds the current
    /// values.
    pub fn shrink_to_fit(&mut self) {
        self.table.minimize(&mut self.memory);
    }

    /// Adds a value, returning whether it was newly inserted. An equal value
    /// already in the set is kept.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashSet;
    ///
    /// let mut set: HashSet<&str> = HashSet::new();
    /// assert!(set.insert("a"));
    /// assert!(!set.insert("a"));
    /// assert_eq!(set.len(), 1);
    /// ```
    pub fn insert(&mut self, value: T) -> bool {
        match self.try_insert(value) {
            Ok(inserted) => inserted,
            Err(err) => fatal(err),
        }
    }

    /// Fallible [`insert`](Self::insert). On error the set is unchanged and
    /// `value` is dropped.
    pub fn try_insert(&mut self, value: T) -> Result<bool, TryReserveError> {
        match self.table.probe(&value) {
            Ok(_) => Ok(false),
            Err(hash) => {
                self.table.insert_new(&mut self.memory, value, hash, ())?;
                Ok(true)
            }
        }
    }

    /// Returns the stored value equal to `value`, inserting `value` first if
    /// there is none.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::rc::Rc;
    ///
    /// use home_hash::HashSet;
    ///
    /// let mut strings: HashSet<Rc<str>> = HashSet::new();
    /// let a = strings.get_or_insert(Rc::from("name")).clone();
    /// let b = strings.get_or_insert(Rc::from("name")).clone();
    /// assert!(Rc::ptr_eq(&a, &b));
    /// ```
    pub fn get_or_insert(&mut self, value: T) -> &T {
        let index = match self.table.probe(&value) {
            Ok(index) => index,
            Err(hash) => match self.table.insert_new(&mut self.memory, value, hash, ()) {
                Ok(index) => index,
                Err(err) => fatal(err),
            },
        };
        self.table.node_at_mut(index).key()
    }

    /// Returns `true` if the set contains `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.table.contains_key(value)
    }

    /// Returns the stored value equal to `value`.
    pub fn get(&self, value: &T) -> Option<&T> {
        self.table.lookup_node(value).map(|node| node.key())
    }

    /// Removes `value`, returning whether it was present.
    pub fn remove(&mut self, value: &T) -> bool {
        self.table.remove(value)
    }

    /// Removes and returns the stored value equal to `value`.
    pub fn take(&mut self, value: &T) -> Option<T> {
        self.table.remove_entry(value).map(|(value, ())| value)
    }

    /// Returns `true` if every value of `self` is also in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|v| other.contains(v))
    }

    /// Returns `true` if `self` and `other` share no value.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().all(|v| !large.contains(v))
    }
}

impl<T, H, M> Extend<T> for HashSet<T, H, M>
where
    T: Eq,
    H: KeyHasher<T>,
    M: Memory,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T, H, M> FromIterator<T> for HashSet<T, H, M>
where
    T: Eq,
    H: KeyHasher<T> + Default,
    M: Memory + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<'a, T, H, M: Memory> IntoIterator for &'a HashSet<T, H, M> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the values of a [`HashSet`].
pub struct Iter<'a, T> {
    inner: crate::hash_table::Iter<'a, T, (), CachedNode<T, ()>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(value, _)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
