//! Slot representations.
//!
//! Every slot of a table holds one node, used or not. A node owns its key and
//! value only while [`NodeFlags::USED`] is set; a vacant node's key and value
//! are uninitialized. Chains are threaded through the slot array by index,
//! so a whole array can be moved without fixing up any links.

use core::fmt::Debug;
use core::mem::MaybeUninit;

use crate::hashing::HashValue;

/// Link value meaning "no successor".
pub(crate) const NIL: usize = usize::MAX;

bitflags::bitflags! {
    /// State bits carried by each node.
    ///
    /// The table only interprets `USED`. The two modified bits belong to the
    /// caller, typically for write-barrier or change tracking.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// The slot holds a live entry.
        const USED = 1 << 0;
        /// Caller-defined: the key was modified.
        const KEY_MODIFIED = 1 << 1;
        /// Caller-defined: the value was modified.
        const VAL_MODIFIED = 1 << 2;
    }
}

/// Selects which modified bits [`next_modified`] reports.
///
/// [`next_modified`]: crate::HashTable::next_modified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifiedFilter {
    /// Entries whose key is flagged.
    Key,
    /// Entries whose value is flagged.
    Value,
    /// Entries with at least one flag set.
    Either,
    /// Entries with both flags set.
    Both,
}

impl ModifiedFilter {
    /// Returns whether `flags` passes this filter.
    pub fn matches(self, flags: NodeFlags) -> bool {
        let modified = NodeFlags::KEY_MODIFIED | NodeFlags::VAL_MODIFIED;
        match self {
            ModifiedFilter::Key => flags.contains(NodeFlags::KEY_MODIFIED),
            ModifiedFilter::Value => flags.contains(NodeFlags::VAL_MODIFIED),
            ModifiedFilter::Either => flags.intersects(modified),
            ModifiedFilter::Both => flags.contains(modified),
        }
    }
}

pub(crate) mod sealed {
    use super::HashValue;
    use super::PlainNode;

    /// Proof of a call from inside the crate. Outside code can resolve
    /// `Sealed` methods through a `Node` bound but can never produce a
    /// `Token`, so the methods taking one stay crate-only.
    #[derive(Clone, Copy)]
    pub struct Token(pub(crate) ());

    /// Internal node operations. The trait is not nameable outside the crate,
    /// which keeps the set of node shapes closed. Its methods still resolve
    /// through a `Node` bound, so the ones that create or unwrap nodes take a
    /// [`Token`].
    pub trait Sealed<K, V>: Sized {
        fn vacant(token: Token) -> Self;

        fn plain(&self) -> &PlainNode<K, V>;

        fn plain_mut(&mut self) -> &mut PlainNode<K, V>;

        /// Records the hash of a key about to be written into this node.
        fn init(&mut self, hash: HashValue);

        fn cached_hash(&self) -> Option<HashValue>;

        /// Node equality against a probe key. Must only be called on used
        /// nodes.
        fn matches(&self, key: &K, hash: HashValue) -> bool
        where
            K: Eq;

        fn into_plain(self, token: Token) -> PlainNode<K, V>;
    }
}

use sealed::Sealed;
use sealed::Token;

/// An entry of a [`HashTable`](crate::HashTable).
///
/// Implemented by [`PlainNode`] and [`CachedNode`]; the set is closed. Nodes
/// only exist inside a table's slot array, and any node reference a table
/// hands out refers to a live entry. Code outside the crate cannot make one:
///
/// ```compile_fail
/// use home_hash::node::Node;
///
/// fn make_vacant<N: Node<u64, u64>>() -> N {
///     N::vacant()
/// }
/// ```
pub trait Node<K, V>: Sealed<K, V> {
    /// The entry's key.
    fn key(&self) -> &K;

    /// The entry's value.
    fn value(&self) -> &V;

    /// The entry's value, mutably.
    fn value_mut(&mut self) -> &mut V;

    /// The entry's flags.
    #[inline(always)]
    fn flags(&self) -> NodeFlags {
        self.plain().flags
    }

    /// Whether the slot holds a live entry. Always true for nodes obtained
    /// from a table.
    #[inline(always)]
    fn is_used(&self) -> bool {
        self.plain().is_used()
    }

    /// Whether the key-modified bit is set.
    fn is_key_modified(&self) -> bool {
        self.flags().contains(NodeFlags::KEY_MODIFIED)
    }

    /// Sets the key-modified bit.
    fn set_key_modified(&mut self) {
        self.plain_mut().flags.insert(NodeFlags::KEY_MODIFIED);
    }

    /// Clears the key-modified bit.
    fn clear_key_modified(&mut self) {
        self.plain_mut().flags.remove(NodeFlags::KEY_MODIFIED);
    }

    /// Whether the value-modified bit is set.
    fn is_val_modified(&self) -> bool {
        self.flags().contains(NodeFlags::VAL_MODIFIED)
    }

    /// Sets the value-modified bit.
    fn set_val_modified(&mut self) {
        self.plain_mut().flags.insert(NodeFlags::VAL_MODIFIED);
    }

    /// Clears the value-modified bit.
    fn clear_val_modified(&mut self) {
        self.plain_mut().flags.remove(NodeFlags::VAL_MODIFIED);
    }
}

/// A node that compares keys directly.
pub struct PlainNode<K, V> {
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
    next: usize,
    flags: NodeFlags,
}

impl<K, V> PlainNode<K, V> {
    #[inline(always)]
    pub(crate) fn is_used(&self) -> bool {
        self.flags.contains(NodeFlags::USED)
    }

    #[inline(always)]
    pub(crate) fn next(&self) -> usize {
        self.next
    }

    #[inline(always)]
    pub(crate) fn set_next(&mut self, next: usize) {
        self.next = next;
    }

    #[inline(always)]
    pub(crate) fn key(&self) -> &K {
        debug_assert!(self.is_used());
        // SAFETY: Keys are initialized exactly while the node is marked used,
        // and only used nodes are read.
        unsafe { self.key.assume_init_ref() }
    }

    #[inline(always)]
    pub(crate) fn value(&self) -> &V {
        debug_assert!(self.is_used());
        // SAFETY: Values are initialized exactly while the node is marked
        // used, and only used nodes are read.
        unsafe { self.value.assume_init_ref() }
    }

    #[inline(always)]
    pub(crate) fn value_mut(&mut self) -> &mut V {
        debug_assert!(self.is_used());
        // SAFETY: See `value`.
        unsafe { self.value.assume_init_mut() }
    }

    /// Writes a fresh entry into a vacant node and marks it used with no
    /// caller flags set.
    #[inline(always)]
    pub(crate) fn fill(&mut self, key: K, value: V) {
        debug_assert!(!self.is_used());
        self.key.write(key);
        self.value.write(value);
        self.flags = NodeFlags::USED;
    }

    /// Moves the entry out of a used node, leaving it vacant.
    ///
    /// # Safety
    ///
    /// The node must be marked used.
    #[inline(always)]
    pub(crate) unsafe fn take(&mut self) -> (K, V) {
        debug_assert!(self.is_used());
        self.flags = NodeFlags::empty();
        self.next = NIL;
        // SAFETY: The caller guarantees the node was used, so both fields are
        // initialized. Clearing the used bit first means they are never read
        // or dropped again through this node.
        unsafe { (self.key.assume_init_read(), self.value.assume_init_read()) }
    }

    /// Drops the entry of a used node in place, leaving it vacant.
    ///
    /// # Safety
    ///
    /// The node must be marked used.
    #[inline(always)]
    pub(crate) unsafe fn drop_entry(&mut self) {
        // SAFETY: Forwarded from the caller.
        unsafe {
            drop(self.take());
        }
    }
}

impl<K, V> Sealed<K, V> for PlainNode<K, V> {
    #[inline(always)]
    fn vacant(_: Token) -> Self {
        Self {
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
            next: NIL,
            flags: NodeFlags::empty(),
        }
    }

    #[inline(always)]
    fn plain(&self) -> &PlainNode<K, V> {
        self
    }

    #[inline(always)]
    fn plain_mut(&mut self) -> &mut PlainNode<K, V> {
        self
    }

    #[inline(always)]
    fn init(&mut self, _hash: HashValue) {}

    #[inline(always)]
    fn cached_hash(&self) -> Option<HashValue> {
        None
    }

    #[inline(always)]
    fn matches(&self, key: &K, _hash: HashValue) -> bool
    where
        K: Eq,
    {
        self.key() == key
    }

    #[inline(always)]
    fn into_plain(self, _: Token) -> PlainNode<K, V> {
        self
    }
}

impl<K, V> Node<K, V> for PlainNode<K, V> {
    #[inline(always)]
    fn key(&self) -> &K {
        PlainNode::key(self)
    }

    #[inline(always)]
    fn value(&self) -> &V {
        PlainNode::value(self)
    }

    #[inline(always)]
    fn value_mut(&mut self) -> &mut V {
        PlainNode::value_mut(self)
    }
}

impl<K: Debug, V: Debug> Debug for PlainNode<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.is_used() {
            return f.write_str("..");
        }

        let mut s = f.debug_struct("PlainNode");
        s.field("key", self.key()).field("value", self.value());
        if self.next != NIL {
            s.field("next", &self.next);
        }
        s.field("flags", &self.flags).finish()
    }
}

/// A node that also stores its key's hash.
///
/// Equality checks compare the stored hash before the keys, which pays off
/// when key comparison is expensive (long strings, structural keys). The hash
/// is computed once at insertion and reused when the table resizes.
pub struct CachedNode<K, V> {
    base: PlainNode<K, V>,
    hash: HashValue,
}

impl<K, V> CachedNode<K, V> {
    /// The stored hash of the entry's key.
    pub fn hash(&self) -> HashValue {
        self.hash
    }
}

impl<K, V> Sealed<K, V> for CachedNode<K, V> {
    #[inline(always)]
    fn vacant(token: Token) -> Self {
        Self {
            base: PlainNode::vacant(token),
            hash: 0,
        }
    }

    #[inline(always)]
    fn plain(&self) -> &PlainNode<K, V> {
        &self.base
    }

    #[inline(always)]
    fn plain_mut(&mut self) -> &mut PlainNode<K, V> {
        &mut self.base
    }

    #[inline(always)]
    fn init(&mut self, hash: HashValue) {
        self.hash = hash;
    }

    #[inline(always)]
    fn cached_hash(&self) -> Option<HashValue> {
        Some(self.hash)
    }

    #[inline(always)]
    fn matches(&self, key: &K, hash: HashValue) -> bool
    where
        K: Eq,
    {
        self.hash == hash && self.base.key() == key
    }

    #[inline(always)]
    fn into_plain(self, _: Token) -> PlainNode<K, V> {
        self.base
    }
}

impl<K, V> Node<K, V> for CachedNode<K, V> {
    #[inline(always)]
    fn key(&self) -> &K {
        self.base.key()
    }

    #[inline(always)]
    fn value(&self) -> &V {
        self.base.value()
    }

    #[inline(always)]
    fn value_mut(&mut self) -> &mut V {
        self.base.value_mut()
    }
}

impl<K: Debug, V: Debug> Debug for CachedNode<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.base.is_used() {
            return f.write_str("..");
        }

        f.debug_struct("CachedNode")
            .field("hash", &format_args!("{:08x}", self.hash))
            .field("node", &self.base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn fill_and_take() {
        let mut node: PlainNode<String, u32> = PlainNode::vacant(Token(()));
        assert!(!node.is_used());
        assert_eq!(node.next(), NIL);

        node.fill("global".to_string(), 3);
        assert!(node.is_used());
        assert_eq!(node.key(), "global");
        assert_eq!(*node.value(), 3);
        assert_eq!(node.flags(), NodeFlags::USED);

        // SAFETY: The node was filled above.
        let (key, value) = unsafe { node.take() };
        assert_eq!(key, "global");
        assert_eq!(value, 3);
        assert!(!node.is_used());
    }

    #[test]
    fn modified_bits_are_independent() {
        let mut node: PlainNode<u32, u32> = PlainNode::vacant(Token(()));
        node.fill(1, 1);

        node.set_key_modified();
        assert!(node.is_key_modified());
        assert!(!node.is_val_modified());

        node.set_val_modified();
        node.clear_key_modified();
        assert!(!node.is_key_modified());
        assert!(node.is_val_modified());
        assert!(node.is_used());

        node.clear_val_modified();
        assert_eq!(node.flags(), NodeFlags::USED);
    }

    #[test]
    fn cached_node_checks_hash_first() {
        let mut node: CachedNode<u32, ()> = CachedNode::vacant(Token(()));
        node.init(0xdead);
        node.plain_mut().fill(5, ());

        assert!(node.matches(&5, 0xdead));
        // Same key, different hash: the stored hash short-circuits.
        assert!(!node.matches(&5, 0xbeef));
        assert!(!node.matches(&6, 0xdead));
        assert_eq!(node.hash(), 0xdead);
    }

    fn entry_of<K, V, N: Node<K, V>>(node: &N) -> (&K, &V) {
        (node.key(), node.value())
    }

    #[test]
    fn trait_accessors_reach_entry() {
        let mut plain: PlainNode<String, u32> = PlainNode::vacant(Token(()));
        plain.fill("k".to_string(), 1);
        *Node::value_mut(&mut plain) += 1;
        assert_eq!(entry_of(&plain), (&"k".to_string(), &2));

        let mut cached: CachedNode<String, u32> = CachedNode::vacant(Token(()));
        cached.init(9);
        cached.plain_mut().fill("c".to_string(), 5);
        *cached.value_mut() *= 3;
        assert_eq!(entry_of(&cached), (&"c".to_string(), &15));

        // SAFETY: Both nodes were filled above.
        unsafe {
            plain.drop_entry();
            cached.plain_mut().drop_entry();
        }
    }

    #[test]
    fn modified_filter_policies() {
        let key = NodeFlags::USED | NodeFlags::KEY_MODIFIED;
        let val = NodeFlags::USED | NodeFlags::VAL_MODIFIED;
        let both = NodeFlags::all();
        let none = NodeFlags::USED;

        assert!(ModifiedFilter::Key.matches(key));
        assert!(!ModifiedFilter::Key.matches(val));
        assert!(ModifiedFilter::Value.matches(val));
        assert!(ModifiedFilter::Either.matches(key));
        assert!(ModifiedFilter::Either.matches(val));
        assert!(!ModifiedFilter::Either.matches(none));
        assert!(ModifiedFilter::Both.matches(both));
        assert!(!ModifiedFilter::Both.matches(key));
    }
}
