use alloc::alloc::handle_alloc_error;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem;

use crate::hashing::CastHasher;
use crate::hashing::HashValue;
use crate::hashing::KeyHasher;
use crate::memory::Memory;
use crate::memory::TryReserveError;
use crate::node::ModifiedFilter;
use crate::node::NIL;
use crate::node::Node;
use crate::node::PlainNode;
use crate::node::sealed::Token;
use crate::slots::MIN_SLOTS;
use crate::slots::RawSlots;
use crate::slots::slots_for;

#[cold]
#[inline(never)]
pub(crate) fn fatal(err: TryReserveError) -> ! {
    match err {
        TryReserveError::CapacityOverflow => panic!("slot array capacity overflow"),
        TryReserveError::AllocError { layout } => handle_alloc_error(layout),
    }
}

/// Chain statistics for a table.
///
/// Available with the `stats` feature.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    /// Number of entries in the table.
    pub populated: usize,
    /// Number of slots.
    pub capacity: usize,
    /// Number of non-empty chains, i.e. entries sitting in their home slot.
    pub chains: usize,
    /// Entries stored away from their home slot.
    pub parked: usize,
    /// Length of the longest chain.
    pub longest_chain: usize,
    /// `chain_lengths[n]` is the number of chains of length `n + 1`.
    pub chain_lengths: alloc::vec::Vec<usize>,
    /// populated / capacity.
    pub load_factor: f64,
    /// Bytes held by the slot array.
    pub total_bytes: usize,
}

#[cfg(feature = "stats")]
impl ChainStats {
    /// Average number of slots a successful lookup visits.
    pub fn mean_probe_length(&self) -> f64 {
        if self.populated == 0 {
            return 0.0;
        }
        let visits: usize = self
            .chain_lengths
            .iter()
            .enumerate()
            .map(|(i, &count)| count * (i + 1) * (i + 2) / 2)
            .sum();
        visits as f64 / self.populated as f64
    }

    /// Pretty-print the statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Chain Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Chains: {} heads, {} parked, longest {}",
            self.chains, self.parked, self.longest_chain
        );
        for (i, count) in self.chain_lengths.iter().enumerate() {
            if *count != 0 {
                println!("  length {:>2}: {}", i + 1, count);
            }
        }
        println!("Mean probe length: {:.3}", self.mean_probe_length());
        println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// A chained hash table stored in a single power-of-two slot array.
///
/// Collisions are chained through the array itself: every slot holds one
/// node, and a node links to the next entry of its chain by slot index. No
/// entry is ever allocated on its own.
///
/// The table maintains one structural invariant, *head-stays-home*: the first
/// entry of the chain for home slot `i` always lives in slot `i`. An entry
/// that had to be stored elsewhere ("parked") is evicted to another free slot
/// as soon as a key whose home is that slot arrives. Lookup therefore always
/// starts at `hash & mask` and only walks that key's chain.
///
/// The array grows by doubling only when it is completely full, and only
/// shrinks on [`minimize`](Self::minimize).
///
/// Every operation that may allocate or free takes an allocation context
/// (`&mut impl Memory`). The table holds no allocator of its own, so release
/// its storage with [`clear`](Self::clear) before dropping it: a table
/// dropped while it still owns a slot array drops its entries but cannot
/// return the array to the context it came from.
///
/// # Type parameters
///
/// - `H` maps keys to hashes, see [`crate::hashing`].
/// - `N` is the node shape: [`PlainNode`], or [`CachedNode`] to keep each
///   key's hash next to it.
///
/// [`CachedNode`]: crate::node::CachedNode
///
/// ## Example
///
/// ```rust
/// use home_hash::HashTable;
/// use home_hash::memory::Global;
///
/// let mut mem = Global;
/// let mut globals: HashTable<u32, &str> = HashTable::new();
///
/// globals.insert(&mut mem, 7, "print");
/// globals.insert(&mut mem, 11, "require");
///
/// // Insertion never overwrites.
/// assert_eq!(*globals.insert(&mut mem, 7, "shadowed"), "print");
/// assert_eq!(globals.lookup(&11), Some(&"require"));
///
/// globals.clear(&mut mem);
/// ```
pub struct HashTable<K, V, H = CastHasher, N: Node<K, V> = PlainNode<K, V>> {
    slots: RawSlots<N>,
    mask: usize,
    free_cursor: usize,
    populated: usize,
    hasher: H,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V, H, N> Drop for HashTable<K, V, H, N>
where
    N: Node<K, V>,
{
    fn drop(&mut self) {
        self.drop_entries();
    }
}

impl<K, V, H, N> Debug for HashTable<K, V, H, N>
where
    K: Debug,
    V: Debug,
    N: Node<K, V>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, H, N> Default for HashTable<K, V, H, N>
where
    H: Default,
    N: Node<K, V>,
{
    fn default() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K, V, H, N> HashTable<K, V, H, N>
where
    N: Node<K, V>,
{
    /// Creates an empty table. No memory is allocated until the first
    /// insertion or [`prealloc`](Self::prealloc).
    pub fn new() -> Self
    where
        H: Default,
    {
        Self::with_hasher(H::default())
    }

    /// Creates an empty table that hashes keys with `hasher`.
    pub const fn with_hasher(hasher: H) -> Self {
        Self {
            slots: RawSlots::empty(),
            mask: 0,
            free_cursor: 0,
            populated: 0,
            hasher,
            _phantom: PhantomData,
        }
    }

    /// Returns the table's hasher.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Returns the number of entries in the table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u8, ()> = HashTable::new();
    /// assert_eq!(table.len(), 0);
    ///
    /// table.insert(&mut Global, 1, ());
    /// assert_eq!(table.len(), 1);
    /// # table.clear(&mut Global);
    /// ```
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of slots, which is also the number of entries the
    /// table holds before the next insertion grows it.
    ///
    /// Always zero or a power of two no smaller than four.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drops every entry and releases the slot array back to `mem`, leaving
    /// the table as if freshly constructed.
    ///
    /// `mem` must be the context the array was allocated from.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Tracked;
    ///
    /// let mut mem = Tracked::new();
    /// let mut table: HashTable<u32, String> = HashTable::new();
    /// table.insert(&mut mem, 1, "one".to_string());
    ///
    /// table.clear(&mut mem);
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 0);
    /// assert_eq!(mem.live_bytes(), 0);
    /// ```
    pub fn clear<M: Memory + ?Sized>(&mut self, mem: &mut M) {
        self.drop_entries();

        if self.slots.len() != 0 {
            resize_event!(from = self.slots.len(), "release slot array");
        }

        let slots = mem::replace(&mut self.slots, RawSlots::empty());
        slots.release(mem);
        self.mask = 0;
        self.free_cursor = 0;
        self.populated = 0;
    }

    fn drop_entries(&mut self) {
        if self.populated == 0 {
            return;
        }

        for node in self.slots.as_mut_slice() {
            if node.plain().is_used() {
                // SAFETY: The node is marked used.
                unsafe { node.plain_mut().drop_entry() };
            }
        }
        self.populated = 0;
        self.free_cursor = 0;
    }

    /// Returns the next entry at or after `*cursor` and advances the cursor
    /// past it, or `None` once every slot has been visited.
    ///
    /// Start with a cursor of `0`. Entries come out in slot order, which is
    /// unrelated to insertion order and changes whenever the table resizes.
    /// A cursor is only meaningful for the table state it was started on.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u32, u32> = HashTable::new();
    /// for k in 0..3 {
    ///     table.insert(&mut Global, k, k * 10);
    /// }
    ///
    /// let mut cursor = 0;
    /// let mut sum = 0;
    /// while let Some((_, value)) = table.next(&mut cursor) {
    ///     sum += value;
    /// }
    /// assert_eq!(sum, 30);
    /// # table.clear(&mut Global);
    /// ```
    pub fn next(&self, cursor: &mut usize) -> Option<(&K, &V)> {
        self.next_node(cursor).map(|node| (node.key(), node.value()))
    }

    /// Like [`next`](Self::next), but yields the whole node so its flags can
    /// be inspected.
    pub fn next_node(&self, cursor: &mut usize) -> Option<&N> {
        let index = self.advance(cursor, |_| true)?;
        Some(&self.slots.as_slice()[index])
    }

    /// Like [`next_node`](Self::next_node), but yields the node mutably so
    /// values and flags can be updated in place.
    pub fn next_node_mut(&mut self, cursor: &mut usize) -> Option<&mut N> {
        let index = self.advance(cursor, |_| true)?;
        Some(&mut self.slots.as_mut_slice()[index])
    }

    /// Yields the next node whose modified bits pass `filter`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    /// use home_hash::node::ModifiedFilter;
    /// use home_hash::node::Node;
    ///
    /// let mut table: HashTable<u32, u32> = HashTable::new();
    /// table.insert(&mut Global, 1, 1);
    /// table.insert_node(&mut Global, 2, 2).set_val_modified();
    ///
    /// let mut cursor = 0;
    /// let dirty = table.next_modified(&mut cursor, ModifiedFilter::Value);
    /// assert_eq!(dirty.map(|n| *n.key()), Some(2));
    /// assert!(table.next_modified(&mut cursor, ModifiedFilter::Value).is_none());
    /// # table.clear(&mut Global);
    /// ```
    pub fn next_modified(&self, cursor: &mut usize, filter: ModifiedFilter) -> Option<&N> {
        let index = self.advance(cursor, |node| filter.matches(node.flags()))?;
        Some(&self.slots.as_slice()[index])
    }

    /// Mutable form of [`next_modified`](Self::next_modified), typically used
    /// to clear the bits once an entry has been processed.
    pub fn next_modified_mut(
        &mut self,
        cursor: &mut usize,
        filter: ModifiedFilter,
    ) -> Option<&mut N> {
        let index = self.advance(cursor, |node| filter.matches(node.flags()))?;
        Some(&mut self.slots.as_mut_slice()[index])
    }

    #[inline]
    fn advance(&self, cursor: &mut usize, accept: impl Fn(&N) -> bool) -> Option<usize> {
        let slots = self.slots.as_slice();
        while *cursor < slots.len() {
            let index = *cursor;
            *cursor += 1;

            let node = &slots[index];
            if node.plain().is_used() && accept(node) {
                return Some(index);
            }
        }

        None
    }

    /// An iterator visiting all key-value pairs in slot order.
    pub fn iter(&self) -> Iter<'_, K, V, N> {
        Iter {
            slots: self.slots.as_slice().iter(),
            remaining: self.populated,
            _phantom: PhantomData,
        }
    }

    #[inline(always)]
    fn home(&self, hash: HashValue) -> usize {
        hash as usize & self.mask
    }

    fn release_slot(&mut self, index: usize) {
        debug_assert!(!self.slots.as_slice()[index].plain().is_used());
        self.populated -= 1;
        if index < self.free_cursor {
            self.free_cursor = index;
        }
    }

    /// Moves the entry out of slot `index` and does the bookkeeping for the
    /// now-free slot. Chain links must already bypass `index`.
    ///
    /// # Safety
    ///
    /// Slot `index` must be used.
    unsafe fn vacate(&mut self, index: usize) -> (K, V) {
        // SAFETY: Forwarded from the caller.
        let entry = unsafe { self.slots.as_mut_slice()[index].plain_mut().take() };
        self.release_slot(index);
        entry
    }

    /// First unused slot at or after the scan cursor. Leaves the cursor on the
    /// returned slot so a later search starts there.
    fn find_free(&mut self) -> Option<usize> {
        let slots = self.slots.as_slice();
        while self.free_cursor < slots.len() {
            if !slots[self.free_cursor].plain().is_used() {
                return Some(self.free_cursor);
            }
            self.free_cursor += 1;
        }

        None
    }
}

impl<K, V, H, N> HashTable<K, V, H, N>
where
    K: Eq,
    H: KeyHasher<K>,
    N: Node<K, V>,
{
    /// Ensures the table can hold `count` entries without growing.
    ///
    /// If `count` exceeds the current capacity, the slot array is resized
    /// once to the next power of two (at least four) and every entry is
    /// reinserted. Otherwise this does nothing.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if `mem` cannot provide the
    /// array, and panics if the size overflows. See
    /// [`try_prealloc`](Self::try_prealloc) for a fallible version.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u64, ()> = HashTable::new();
    /// table.prealloc(&mut Global, 100);
    /// assert_eq!(table.capacity(), 128);
    /// # table.clear(&mut Global);
    /// ```
    pub fn prealloc<M: Memory + ?Sized>(&mut self, mem: &mut M, count: usize) {
        if let Err(err) = self.try_prealloc(mem, count) {
            fatal(err);
        }
    }

    /// Fallible [`prealloc`](Self::prealloc). On error the table is
    /// unchanged.
    pub fn try_prealloc<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        count: usize,
    ) -> Result<(), TryReserveError> {
        if count <= self.slots.len() {
            return Ok(());
        }

        let len = slots_for(count)?;
        self.resize(mem, len)
    }

    /// Shrinks the slot array to the smallest valid size that holds the
    /// current entries. An empty table releases its array entirely.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if `mem` cannot provide the
    /// smaller array. See [`try_minimize`](Self::try_minimize).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u64, u64> = HashTable::new();
    /// for k in 0..100 {
    ///     table.insert(&mut Global, k, k);
    /// }
    /// for k in 10..100 {
    ///     table.remove(&k);
    /// }
    /// assert_eq!(table.capacity(), 128);
    ///
    /// table.minimize(&mut Global);
    /// assert_eq!(table.capacity(), 16);
    /// assert_eq!(table.lookup(&3), Some(&3));
    /// # table.clear(&mut Global);
    /// ```
    pub fn minimize<M: Memory + ?Sized>(&mut self, mem: &mut M) {
        if let Err(err) = self.try_minimize(mem) {
            fatal(err);
        }
    }

    /// Fallible [`minimize`](Self::minimize). On error the table is
    /// unchanged.
    pub fn try_minimize<M: Memory + ?Sized>(&mut self, mem: &mut M) -> Result<(), TryReserveError> {
        if self.populated == 0 {
            self.clear(mem);
            return Ok(());
        }

        let len = slots_for(self.populated)?;
        if len != self.slots.len() {
            self.resize(mem, len)?;
        }
        Ok(())
    }

    /// Returns the value for `key`, inserting `value` first if the key is
    /// absent.
    ///
    /// An existing entry is never overwritten; in that case `value` is
    /// dropped. Grows the table if it is full.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if growing fails. See
    /// [`try_insert`](Self::try_insert).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u32, u32> = HashTable::new();
    /// *table.insert(&mut Global, 5, 0) += 1;
    /// *table.insert(&mut Global, 5, 0) += 1;
    /// assert_eq!(table.lookup(&5), Some(&2));
    /// # table.clear(&mut Global);
    /// ```
    pub fn insert<M: Memory + ?Sized>(&mut self, mem: &mut M, key: K, value: V) -> &mut V {
        self.insert_node(mem, key, value).value_mut()
    }

    /// Fallible [`insert`](Self::insert). On error the table is unchanged and
    /// `key` and `value` are dropped.
    pub fn try_insert<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        key: K,
        value: V,
    ) -> Result<&mut V, TryReserveError> {
        Ok(self.try_insert_node(mem, key, value)?.value_mut())
    }

    /// Like [`insert`](Self::insert), but only builds the value when the key
    /// is absent.
    pub fn insert_with<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        key: K,
        value: impl FnOnce() -> V,
    ) -> &mut V {
        match self.insert_impl(mem, key, value) {
            Ok(index) => self.slots.as_mut_slice()[index].value_mut(),
            Err(err) => fatal(err),
        }
    }

    /// Returns the value for `key`, creating it with `V::default()` if the key
    /// is absent.
    pub fn insert_default<M: Memory + ?Sized>(&mut self, mem: &mut M, key: K) -> &mut V
    where
        V: Default,
    {
        self.insert_with(mem, key, V::default)
    }

    /// Like [`insert`](Self::insert), but returns the whole node so that its
    /// modified bits can be set.
    pub fn insert_node<M: Memory + ?Sized>(&mut self, mem: &mut M, key: K, value: V) -> &mut N {
        match self.try_insert_node(mem, key, value) {
            Ok(node) => node,
            Err(err) => fatal(err),
        }
    }

    /// Fallible [`insert_node`](Self::insert_node).
    pub fn try_insert_node<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        key: K,
        value: V,
    ) -> Result<&mut N, TryReserveError> {
        let index = self.insert_impl(mem, key, || value)?;
        Ok(&mut self.slots.as_mut_slice()[index])
    }

    /// Get-or-create. Returns the slot of the entry for `key`; `value` is
    /// only called when the key is absent.
    fn insert_impl<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        key: K,
        value: impl FnOnce() -> V,
    ) -> Result<usize, TryReserveError> {
        match self.probe(&key) {
            Ok(index) => Ok(index),
            Err(hash) => self.insert_new(mem, key, hash, value()),
        }
    }

    /// Slot of `key` if present, otherwise its hash for a following
    /// [`insert_new`](Self::insert_new).
    pub(crate) fn probe(&self, key: &K) -> Result<usize, HashValue> {
        let hash = self.hasher.hash(key);
        self.find_index(key, hash).ok_or(hash)
    }

    /// Inserts a key known to be absent, growing the table if it is full.
    pub(crate) fn insert_new<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        key: K,
        hash: HashValue,
        value: V,
    ) -> Result<usize, TryReserveError> {
        debug_assert!(self.find_index(&key, hash).is_none());

        let free = loop {
            if let Some(free) = self.find_free() {
                break free;
            }
            self.grow(mem)?;
        };

        let index = self.claim_slot(hash, free);
        let node = &mut self.slots.as_mut_slice()[index];
        node.init(hash);
        node.plain_mut().fill(key, value);
        self.populated += 1;

        Ok(index)
    }

    /// Picks and links the slot for a new key with `hash`, restoring
    /// head-stays-home on the way. `free` must be an unused slot; it is only
    /// consumed when the key's home slot is taken. The returned slot is
    /// unused with its chain link already set.
    fn claim_slot(&mut self, hash: HashValue, free: usize) -> usize {
        let home = self.home(hash);
        let slots = self.slots.as_slice();
        debug_assert!(!slots[free].plain().is_used());

        if !slots[home].plain().is_used() {
            debug_assert_eq!(slots[home].plain().next(), NIL);
            return home;
        }

        let occupant_home = self.home(self.node_hash(&slots[home]));
        let slots = self.slots.as_mut_slice();

        if occupant_home == home {
            // The occupant heads this chain: the new entry goes right behind
            // it.
            let next = slots[home].plain().next();
            slots[free].plain_mut().set_next(next);
            slots[home].plain_mut().set_next(free);
            free
        } else {
            // The occupant is parked here from another chain. Relink its
            // predecessor to the free slot and move it there, chain
            // continuation included.
            let mut prev = occupant_home;
            while slots[prev].plain().next() != home {
                prev = slots[prev].plain().next();
                debug_assert_ne!(prev, NIL, "parked entry unreachable from its home");
            }
            slots[prev].plain_mut().set_next(free);
            slots[free] = mem::replace(&mut slots[home], N::vacant(Token(())));
            home
        }
    }

    #[inline]
    fn node_hash(&self, node: &N) -> HashValue {
        match node.cached_hash() {
            Some(hash) => hash,
            None => self.hasher.hash(node.key()),
        }
    }

    #[cold]
    fn grow<M: Memory + ?Sized>(&mut self, mem: &mut M) -> Result<(), TryReserveError> {
        let len = match self.slots.len() {
            0 => MIN_SLOTS,
            len => len
                .checked_mul(2)
                .ok_or(TryReserveError::CapacityOverflow)?,
        };
        self.resize(mem, len)
    }

    /// Moves every entry into a fresh array of `len` slots and releases the
    /// old one. The new array is allocated before anything is touched, so a
    /// failed allocation leaves the table as it was.
    fn resize<M: Memory + ?Sized>(&mut self, mem: &mut M, len: usize) -> Result<(), TryReserveError> {
        debug_assert!(len >= self.populated);

        let new_slots = RawSlots::allocate(mem, len, || N::vacant(Token(())))?;
        resize_event!(
            from = self.slots.len(),
            to = len,
            live = self.populated,
            "resize slot array"
        );

        let mut old = mem::replace(&mut self.slots, new_slots);
        self.mask = len - 1;
        self.free_cursor = 0;
        let expected = mem::replace(&mut self.populated, 0);

        for node in old.as_mut_slice() {
            if !node.plain().is_used() {
                continue;
            }

            let hash = self.node_hash(node);
            let Some(free) = self.find_free() else {
                unreachable!("resized slot array cannot hold its entries");
            };
            let index = self.claim_slot(hash, free);

            // The moved node brings its value, flags and cached hash along;
            // only the link comes from the new placement.
            let target = &mut self.slots.as_mut_slice()[index];
            let next = target.plain().next();
            *target = mem::replace(node, N::vacant(Token(())));
            target.plain_mut().set_next(next);
            self.populated += 1;
        }

        debug_assert_eq!(self.populated, expected);
        old.release(mem);
        Ok(())
    }

    /// Removes `key`, returning whether it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u32, ()> = HashTable::new();
    /// table.insert(&mut Global, 3, ());
    ///
    /// assert!(table.remove(&3));
    /// assert!(!table.remove(&3));
    /// assert_eq!(table.lookup(&3), None);
    /// # table.clear(&mut Global);
    /// ```
    pub fn remove(&mut self, key: &K) -> bool {
        self.remove_entry(key).is_some()
    }

    /// Removes `key` and returns its entry.
    ///
    /// Removing a chain head promotes the next entry of the chain into the
    /// head's slot; removing any other entry just unlinks it. The freed slot
    /// pulls the free-slot cursor back so the next insertion can reuse it.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        if self.populated == 0 {
            return None;
        }

        let hash = self.hasher.hash(key);
        let home = self.home(hash);
        let slots = self.slots.as_mut_slice();

        if !slots[home].plain().is_used() {
            return None;
        }

        if slots[home].matches(key, hash) {
            let next = slots[home].plain().next();
            if next == NIL {
                // SAFETY: Checked used above.
                return Some(unsafe { self.vacate(home) });
            }

            let promoted = mem::replace(&mut slots[next], N::vacant(Token(())));
            let removed = mem::replace(&mut slots[home], promoted);
            self.release_slot(next);

            let mut removed = removed.into_plain(Token(()));
            // SAFETY: `removed` was the used head of the chain.
            return Some(unsafe { removed.take() });
        }

        let mut prev = home;
        loop {
            let index = slots[prev].plain().next();
            if index == NIL || !slots[index].plain().is_used() {
                return None;
            }

            if slots[index].matches(key, hash) {
                let next = slots[index].plain().next();
                slots[prev].plain_mut().set_next(next);
                // SAFETY: Checked used above.
                return Some(unsafe { self.vacate(index) });
            }

            prev = index;
        }
    }

    /// Returns the value for `key`, if present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use home_hash::HashTable;
    /// use home_hash::memory::Global;
    ///
    /// let mut table: HashTable<u32, &str> = HashTable::new();
    /// assert_eq!(table.lookup(&1), None);
    ///
    /// table.insert(&mut Global, 1, "one");
    /// assert_eq!(table.lookup(&1), Some(&"one"));
    /// # table.clear(&mut Global);
    /// ```
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.lookup_with_hash(key, self.hasher.hash(key))
    }

    /// Returns the value for `key`, using a hash the caller already has.
    ///
    /// `hash` must be what the table's hasher produces for `key`; otherwise
    /// the lookup simply misses.
    pub fn lookup_with_hash(&self, key: &K, hash: HashValue) -> Option<&V> {
        let index = self.find_index(key, hash)?;
        Some(self.slots.as_slice()[index].value())
    }

    /// Returns the value for `key` mutably, if present.
    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut V> {
        self.lookup_node_mut(key).map(|node| node.value_mut())
    }

    /// Returns the node for `key`, if present.
    pub fn lookup_node(&self, key: &K) -> Option<&N> {
        let index = self.find_index(key, self.hasher.hash(key))?;
        Some(&self.slots.as_slice()[index])
    }

    /// Returns the node for `key` mutably, if present.
    pub fn lookup_node_mut(&mut self, key: &K) -> Option<&mut N> {
        let index = self.find_index(key, self.hasher.hash(key))?;
        Some(&mut self.slots.as_mut_slice()[index])
    }

    /// Returns `true` if the table holds `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_index(key, self.hasher.hash(key)).is_some()
    }

    pub(crate) fn node_at_mut(&mut self, index: usize) -> &mut N {
        &mut self.slots.as_mut_slice()[index]
    }

    fn find_index(&self, key: &K, hash: HashValue) -> Option<usize> {
        if self.slots.len() == 0 {
            return None;
        }

        let slots = self.slots.as_slice();
        let mut index = self.home(hash);
        while index != NIL {
            let node = &slots[index];
            if !node.plain().is_used() {
                return None;
            }
            if node.matches(key, hash) {
                return Some(index);
            }
            index = node.plain().next();
        }

        None
    }

    /// Computes chain statistics.
    ///
    /// Available with the `stats` feature.
    #[cfg(feature = "stats")]
    pub fn chain_stats(&self) -> ChainStats {
        let slots = self.slots.as_slice();
        let mut chain_lengths = alloc::vec::Vec::new();
        let mut chains = 0;
        let mut longest_chain = 0;

        for (index, node) in slots.iter().enumerate() {
            if !node.plain().is_used() || self.home(self.node_hash(node)) != index {
                continue;
            }

            chains += 1;
            let mut length = 1;
            let mut cursor = node.plain().next();
            while cursor != NIL {
                length += 1;
                cursor = slots[cursor].plain().next();
            }

            if chain_lengths.len() < length {
                chain_lengths.resize(length, 0);
            }
            chain_lengths[length - 1] += 1;
            longest_chain = longest_chain.max(length);
        }

        ChainStats {
            populated: self.populated,
            capacity: slots.len(),
            chains,
            parked: self.populated - chains,
            longest_chain,
            chain_lengths,
            load_factor: if slots.is_empty() {
                0.0
            } else {
                self.populated as f64 / slots.len() as f64
            },
            total_bytes: self.slots.byte_size(),
        }
    }

    /// Slot holding `key`.
    #[cfg(test)]
    pub(crate) fn slot_of(&self, key: &K) -> Option<usize> {
        self.find_index(key, self.hasher.hash(key))
    }

    /// Keys of the chain starting at `index`, in link order.
    #[cfg(test)]
    pub(crate) fn chain_at(&self, index: usize) -> alloc::vec::Vec<&K> {
        let slots = self.slots.as_slice();
        let mut keys = alloc::vec::Vec::new();
        let mut cursor = index;
        while cursor != NIL && slots[cursor].plain().is_used() {
            keys.push(slots[cursor].key());
            cursor = slots[cursor].plain().next();
        }
        keys
    }

    /// Verifies every structural invariant of the table, panicking on the
    /// first violation.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let slots = self.slots.as_slice();
        let len = slots.len();

        assert!(len == 0 || (len.is_power_of_two() && len >= MIN_SLOTS));
        if len > 0 {
            assert_eq!(self.mask, len - 1);
        }
        assert!(self.free_cursor <= len);

        let used = slots.iter().filter(|n| n.plain().is_used()).count();
        assert_eq!(used, self.populated, "used slot count");

        for (index, node) in slots.iter().enumerate() {
            if !node.plain().is_used() {
                assert_eq!(node.plain().next(), NIL, "vacant slot {index} is linked");
                continue;
            }

            let home = self.home(self.node_hash(node));
            let head = &slots[home];
            assert!(head.plain().is_used(), "home of slot {index} is vacant");
            assert_eq!(
                self.home(self.node_hash(head)),
                home,
                "home slot {home} is not held by its own chain head"
            );

            // Walk the chain from home; it must reach `index` within `len`
            // steps and every member must share the home.
            let mut cursor = home;
            let mut steps = 0;
            while cursor != index {
                cursor = slots[cursor].plain().next();
                steps += 1;
                assert!(cursor != NIL, "slot {index} unreachable from home {home}");
                assert!(steps <= len, "cycle in chain {home}");
                assert_eq!(self.home(self.node_hash(&slots[cursor])), home);
            }

            if let Some(hash) = node.cached_hash() {
                assert_eq!(hash, self.hasher.hash(node.key()), "stale cached hash");
            }

            assert_eq!(
                self.find_index(node.key(), self.hasher.hash(node.key())),
                Some(index),
                "duplicate or unreachable key at slot {index}"
            );
        }

        for index in 0..self.free_cursor.min(len) {
            assert!(
                slots[index].plain().is_used(),
                "free cursor {} skipped vacant slot {index}",
                self.free_cursor
            );
        }
    }
}

/// An iterator over the entries of a [`HashTable`] in slot order.
pub struct Iter<'a, K, V, N> {
    slots: core::slice::Iter<'a, N>,
    remaining: usize,
    _phantom: PhantomData<(&'a K, &'a V)>,
}

impl<'a, K, V, N> Iterator for Iter<'a, K, V, N>
where
    N: Node<K, V>,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        for node in self.slots.by_ref() {
            if node.plain().is_used() {
                self.remaining -= 1;
                return Some((node.key(), node.value()));
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, N> ExactSizeIterator for Iter<'_, K, V, N> where N: Node<K, V> {}

impl<'a, K, V, H, N> IntoIterator for &'a HashTable<K, V, H, N>
where
    N: Node<K, V>,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use siphasher::sip::SipHasher;

    use super::*;
    use crate::hashing::StdHasher;
    use crate::memory::Global;
    use crate::memory::Tracked;
    use crate::node::CachedNode;
    use crate::node::NodeFlags;

    #[derive(Clone, Default)]
    struct SipBuilder;

    impl BuildHasher for SipBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(0x5eed, 0xcafe)
        }
    }

    type CastTable<V = u32> = HashTable<u32, V>;

    fn table_of(keys: &[u32]) -> CastTable {
        let mut table = CastTable::new();
        for &k in keys {
            table.insert(&mut Global, k, k * 10);
            table.check_invariants();
        }
        table
    }

    #[test]
    fn colliding_keys_chain_behind_head() {
        let mut table = table_of(&[0, 4, 8]);

        assert_eq!(table.len(), 3);
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.chain_at(0), [&0, &8, &4]);
        assert_eq!(table.slot_of(&0), Some(0));
        assert_eq!(table.slot_of(&8), Some(2));
        assert_eq!(table.slot_of(&4), Some(1));

        table.clear(&mut Global);
    }

    #[test]
    fn removing_head_promotes_successor() {
        let mut table = table_of(&[0, 4, 8]);

        assert!(table.remove(&0));
        table.check_invariants();

        assert_eq!(table.len(), 2);
        assert_eq!(table.slot_of(&8), Some(0));
        assert_eq!(table.chain_at(0), [&8, &4]);
        assert_eq!(table.lookup(&4), Some(&40));
        assert_eq!(table.lookup(&0), None);

        table.clear(&mut Global);
    }

    #[test]
    fn home_key_evicts_parked_entry() {
        // 5 parks in slot 0 behind its head 1; 0 then claims its home.
        let mut table = table_of(&[1, 5]);
        assert_eq!(table.slot_of(&5), Some(0));

        table.insert(&mut Global, 0, 0);
        table.check_invariants();

        assert_eq!(table.slot_of(&0), Some(0));
        assert_eq!(table.slot_of(&5), Some(2));
        assert_eq!(table.chain_at(1), [&1, &5]);
        assert_eq!(table.chain_at(0), [&0]);

        table.clear(&mut Global);
    }

    #[test]
    fn removing_mid_chain_entry_unlinks_it() {
        let mut table = table_of(&[0, 4, 8, 12]);
        assert_eq!(table.chain_at(0), [&0, &12, &8, &4]);

        assert_eq!(table.remove_entry(&8), Some((8, 80)));
        table.check_invariants();
        assert_eq!(table.chain_at(0), [&0, &12, &4]);

        // The freed slot is the first one handed out again.
        let freed = 2;
        table.insert(&mut Global, 16, 160);
        assert_eq!(table.slot_of(&16), Some(freed));
        table.check_invariants();

        table.clear(&mut Global);
    }

    #[test]
    fn removing_absent_keys() {
        let mut table = table_of(&[1, 2]);
        assert!(!table.remove(&5));
        assert!(!table.remove(&3));
        assert_eq!(table.remove_entry(&9), None);
        assert_eq!(table.len(), 2);

        let mut empty = CastTable::<u32>::new();
        assert!(!empty.remove(&0));
        assert_eq!(empty.lookup(&0), None);

        table.clear(&mut Global);
    }

    #[test]
    fn grows_only_when_full() {
        let mut table = table_of(&[0, 1, 2, 3]);
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.len(), 4);

        table.insert(&mut Global, 4, 40);
        table.check_invariants();
        assert_eq!(table.capacity(), 8);
        for k in 0..5 {
            assert_eq!(table.lookup(&k), Some(&(k * 10)));
        }

        table.clear(&mut Global);
    }

    #[test]
    fn insert_keeps_existing_value() {
        let mut table = CastTable::new();
        assert_eq!(*table.insert(&mut Global, 3, 1), 1);
        assert_eq!(*table.insert(&mut Global, 3, 2), 1);
        assert_eq!(table.len(), 1);

        let mut called = false;
        *table.insert_with(&mut Global, 3, || {
            called = true;
            9
        }) += 1;
        assert!(!called);
        assert_eq!(table.lookup(&3), Some(&2));

        assert_eq!(*table.insert_default(&mut Global, 9), 0);
        *table.insert_default(&mut Global, 9) += 4;
        assert_eq!(table.lookup(&9), Some(&4));

        table.clear(&mut Global);
    }

    #[test]
    fn prealloc_rounds_up() {
        let mut table = CastTable::<u32>::new();
        table.prealloc(&mut Global, 0);
        assert_eq!(table.capacity(), 0);

        table.prealloc(&mut Global, 1);
        assert_eq!(table.capacity(), 4);

        table.prealloc(&mut Global, 9);
        assert_eq!(table.capacity(), 16);

        // Never shrinks.
        table.prealloc(&mut Global, 5);
        assert_eq!(table.capacity(), 16);

        table.clear(&mut Global);
    }

    #[test]
    fn prealloc_keeps_entries() {
        let mut table = table_of(&[0, 4, 8, 1]);
        table.prealloc(&mut Global, 100);
        table.check_invariants();

        assert_eq!(table.capacity(), 128);
        assert_eq!(table.len(), 4);
        assert_eq!(table.chain_at(0), [&0]);
        assert_eq!(table.slot_of(&8), Some(8));

        table.clear(&mut Global);
    }

    #[test]
    fn minimize_shrinks_and_releases() {
        let mut mem = Tracked::new();
        let mut table = CastTable::new();
        for k in 0..20 {
            table.insert(&mut mem, k, k);
        }
        assert_eq!(table.capacity(), 32);

        for k in 3..20 {
            table.remove(&k);
        }
        table.minimize(&mut mem);
        table.check_invariants();
        assert_eq!(table.capacity(), 4);
        for k in 0..3 {
            assert_eq!(table.lookup(&k), Some(&k));
        }

        let capacity_before = table.capacity();
        let allocations = mem.allocations();
        table.minimize(&mut mem);
        assert_eq!(table.capacity(), capacity_before);
        assert_eq!(mem.allocations(), allocations);

        for k in 0..3 {
            table.remove(&k);
        }
        table.minimize(&mut mem);
        assert_eq!(table.capacity(), 0);
        assert_eq!(mem.live_bytes(), 0);
        assert_eq!(mem.allocations(), mem.releases());
    }

    #[test]
    fn cursor_iteration_visits_every_entry() {
        let mut table = CastTable::new();
        for k in 0..37 {
            table.insert(&mut Global, k * 3, k);
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        while let Some((k, v)) = table.next(&mut cursor) {
            assert_eq!(*k, v * 3);
            seen.push(*v);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..37).collect::<Vec<_>>());
        assert!(table.next(&mut cursor).is_none());

        assert_eq!(table.iter().len(), 37);
        assert_eq!(table.iter().count(), 37);

        let mut empty = CastTable::<u32>::new();
        let mut cursor = 0;
        assert!(empty.next(&mut cursor).is_none());
        assert!(empty.next_node_mut(&mut cursor).is_none());

        table.clear(&mut Global);
    }

    #[test]
    fn modified_flags_follow_entries() {
        let mut table = CastTable::new();
        for k in 0..4 {
            table.insert(&mut Global, k, k);
        }
        table.lookup_node_mut(&1).unwrap().set_key_modified();
        table.lookup_node_mut(&2).unwrap().set_val_modified();
        table.lookup_node_mut(&3).unwrap().set_key_modified();
        table.lookup_node_mut(&3).unwrap().set_val_modified();

        // Growth moves the flags along with the entries.
        table.insert(&mut Global, 4, 4);
        assert_eq!(table.capacity(), 8);
        table.check_invariants();

        let collect = |table: &CastTable, filter| {
            let mut cursor = 0;
            let mut keys = Vec::new();
            while let Some(node) = table.next_modified(&mut cursor, filter) {
                keys.push(*node.key());
            }
            keys.sort_unstable();
            keys
        };
        assert_eq!(collect(&table, ModifiedFilter::Key), [1, 3]);
        assert_eq!(collect(&table, ModifiedFilter::Value), [2, 3]);
        assert_eq!(collect(&table, ModifiedFilter::Either), [1, 2, 3]);
        assert_eq!(collect(&table, ModifiedFilter::Both), [3]);

        let mut cursor = 0;
        while let Some(node) = table.next_modified_mut(&mut cursor, ModifiedFilter::Either) {
            node.clear_key_modified();
            node.clear_val_modified();
        }
        assert!(collect(&table, ModifiedFilter::Either).is_empty());

        table.clear(&mut Global);
    }

    #[test]
    fn reused_slot_starts_with_clean_flags() {
        let mut table = table_of(&[0, 4]);
        table.lookup_node_mut(&4).unwrap().set_val_modified();
        table.remove(&4);

        let node = table.insert_node(&mut Global, 8, 80);
        assert_eq!(node.flags(), NodeFlags::USED);
        assert_eq!(table.slot_of(&8), Some(1));

        table.clear(&mut Global);
    }

    #[test]
    fn try_operations_leave_table_unchanged() {
        let node_size = size_of::<PlainNode<u32, u32>>();
        let mut mem = Tracked::with_limit(4 * node_size);
        let mut table = CastTable::new();

        for k in 0..4 {
            assert!(table.try_insert(&mut mem, k, k).is_ok());
        }
        let err = table.try_insert(&mut mem, 4, 4).unwrap_err();
        assert!(matches!(err, TryReserveError::AllocError { .. }));
        assert_eq!(table.len(), 4);
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.lookup(&4), None);
        table.check_invariants();

        // Existing keys never need memory.
        assert_eq!(table.try_insert(&mut mem, 2, 99).map(|v| *v), Ok(2));

        assert!(table.try_prealloc(&mut mem, 64).is_err());
        assert_eq!(
            table.try_prealloc(&mut mem, usize::MAX),
            Err(TryReserveError::CapacityOverflow)
        );
        assert_eq!(table.capacity(), 4);
        assert!(table.try_minimize(&mut mem).is_ok());
        table.check_invariants();

        mem.set_limit(None);
        table.insert(&mut mem, 4, 4);
        assert_eq!(table.capacity(), 8);
        table.clear(&mut mem);
        assert_eq!(mem.live_bytes(), 0);
    }

    #[test]
    fn cached_nodes_with_string_keys() {
        let mut mem = Tracked::new();
        let mut table: HashTable<String, usize, StdHasher<SipBuilder>, CachedNode<String, usize>> =
            HashTable::default();

        for i in 0..200 {
            table.insert(&mut mem, i.to_string(), i);
        }
        table.check_invariants();

        let hasher = table.hasher();
        let key = "117".to_string();
        assert_eq!(table.lookup_with_hash(&key, hasher.hash(&key)), Some(&117));
        assert_eq!(
            table.lookup_node(&key).map(|node| node.hash()),
            Some(hasher.hash(&key))
        );
        assert_eq!(table.lookup_with_hash(&key, hasher.hash(&key) ^ 1), None);

        for i in (0..200).filter(|i| i % 4 != 0) {
            assert_eq!(table.remove_entry(&i.to_string()), Some((i.to_string(), i)));
        }
        table.minimize(&mut mem);
        table.check_invariants();
        assert_eq!(table.len(), 50);
        assert_eq!(table.capacity(), 64);

        table.clear(&mut mem);
        assert_eq!(mem.live_bytes(), 0);
    }

    #[test]
    fn clear_drops_entries() {
        let tracker = Rc::new(());
        let mut table: HashTable<u32, Rc<()>> = HashTable::new();
        for k in 0..10 {
            table.insert(&mut Global, k, Rc::clone(&tracker));
        }
        assert_eq!(Rc::strong_count(&tracker), 11);

        table.remove(&3);
        assert_eq!(Rc::strong_count(&tracker), 10);

        // An existing key drops the offered value.
        table.insert(&mut Global, 4, Rc::clone(&tracker));
        assert_eq!(Rc::strong_count(&tracker), 10);

        table.clear(&mut Global);
        assert_eq!(Rc::strong_count(&tracker), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn drop_without_clear_drops_entries() {
        let tracker = Rc::new(());
        let mut mem = Tracked::new();
        {
            let mut table: HashTable<u32, Rc<()>> = HashTable::new();
            table.insert(&mut mem, 1, Rc::clone(&tracker));
            table.insert(&mut mem, 2, Rc::clone(&tracker));
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
        // The slot array was never handed back.
        assert!(mem.live_bytes() > 0);
    }

    #[test]
    fn debug_lists_entries() {
        let mut table = table_of(&[7]);
        assert_eq!(alloc::format!("{table:?}"), "{7: 70}");
        table.clear(&mut Global);
        assert_eq!(alloc::format!("{table:?}"), "{}");
    }

    #[cfg(feature = "stats")]
    #[test]
    fn chain_stats_describe_chains() {
        let mut table = table_of(&[0, 4, 8, 1]);
        let stats = table.chain_stats();

        assert_eq!(stats.populated, 4);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.chains, 2);
        assert_eq!(stats.parked, 2);
        assert_eq!(stats.longest_chain, 3);
        assert_eq!(stats.chain_lengths, [1, 0, 1]);
        assert_eq!(stats.load_factor, 1.0);
        assert_eq!(stats.total_bytes, 4 * size_of::<PlainNode<u32, u32>>());
        assert_eq!(stats.mean_probe_length(), 7.0 / 4.0);

        table.clear(&mut Global);
    }
}
