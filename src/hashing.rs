//! Hashing strategies for table keys.
//!
//! A [`HashTable`](crate::HashTable) never hashes keys itself. It asks a
//! [`KeyHasher`] for a 32-bit [`HashValue`], masks it down to a home slot, and
//! relies on the key's `Eq` for everything else.

use core::hash::BuildHasher;
use core::hash::Hash;

/// Hash value produced for a key.
pub type HashValue = u32;

/// Maps keys of type `K` to a [`HashValue`].
///
/// Implementations must be deterministic for the lifetime of a table: the
/// same key must always produce the same hash, and keys that compare equal
/// must hash equally.
pub trait KeyHasher<K: ?Sized> {
    /// Computes the hash of `key`.
    fn hash(&self, key: &K) -> HashValue;
}

/// Keys that can be hashed by casting them to a [`HashValue`].
///
/// Implemented for the primitive integer types, `bool` and `char`. Wider
/// integers are truncated, so only their low 32 bits participate.
pub trait CastHash {
    /// Returns `self` cast to a hash value.
    fn cast_hash(&self) -> HashValue;
}

macro_rules! impl_cast_hash {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CastHash for $ty {
                #[inline(always)]
                fn cast_hash(&self) -> HashValue {
                    *self as HashValue
                }
            }
        )*
    };
}

impl_cast_hash!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char);

/// Identity hashing: the key's own bits are its hash.
///
/// This is the cheapest strategy and the right one for dense integer keys
/// such as interned-string ids. It is also fully predictable, which makes it
/// the strategy of choice when a caller needs to reason about which slot a
/// key lands in.
///
/// # Examples
///
/// ```rust
/// use home_hash::hashing::CastHasher;
/// use home_hash::hashing::KeyHasher;
///
/// assert_eq!(CastHasher.hash(&7u64), 7);
/// assert_eq!(CastHasher.hash(&(u64::MAX)), u32::MAX);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CastHasher;

impl<K: CastHash + ?Sized> KeyHasher<K> for CastHasher {
    #[inline(always)]
    fn hash(&self, key: &K) -> HashValue {
        key.cast_hash()
    }
}

/// Keys that know how to hash themselves.
pub trait ToHash {
    /// Computes this key's hash.
    fn to_hash(&self) -> HashValue;
}

/// Delegated hashing: calls [`ToHash::to_hash`] on the key.
///
/// Useful for key types that already carry a hash, such as interned strings
/// which compute theirs once at creation.
///
/// # Examples
///
/// ```rust
/// use home_hash::hashing::KeyHasher;
/// use home_hash::hashing::MethodHasher;
/// use home_hash::hashing::ToHash;
///
/// struct Symbol {
///     id: u32,
/// }
///
/// impl ToHash for Symbol {
///     fn to_hash(&self) -> u32 {
///         self.id.rotate_left(7)
///     }
/// }
///
/// assert_eq!(MethodHasher.hash(&Symbol { id: 1 }), 1 << 7);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MethodHasher;

impl<K: ToHash + ?Sized> KeyHasher<K> for MethodHasher {
    #[inline(always)]
    fn hash(&self, key: &K) -> HashValue {
        key.to_hash()
    }
}

/// Adapts any [`BuildHasher`] into a [`KeyHasher`] for `Hash` keys.
///
/// The 64-bit digest is folded into 32 bits by xoring its halves, so both
/// halves contribute to the home slot.
#[derive(Clone, Debug, Default)]
pub struct StdHasher<S> {
    build: S,
}

impl<S> StdHasher<S> {
    /// Wraps `build`.
    pub const fn new(build: S) -> Self {
        Self { build }
    }

    /// Returns the wrapped hasher builder.
    pub fn build_hasher(&self) -> &S {
        &self.build
    }
}

impl<K, S> KeyHasher<K> for StdHasher<S>
where
    K: Hash + ?Sized,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &K) -> HashValue {
        fold(self.build.hash_one(key))
    }
}

#[inline(always)]
fn fold(hash: u64) -> HashValue {
    (hash ^ (hash >> 32)) as HashValue
}

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Seeded hashing for arbitrary `Hash` keys, backed by `foldhash`.
        pub type FoldHasher = StdHasher<foldhash::fast::RandomState>;

        /// Deterministic `foldhash` hashing with a fixed seed.
        pub type FixedFoldHasher = StdHasher<foldhash::fast::FixedState>;

        impl FixedFoldHasher {
            /// Creates a hasher that always produces the same hashes for `seed`.
            pub fn with_seed(seed: u64) -> Self {
                Self::new(foldhash::fast::FixedState::with_seed(seed))
            }
        }

        /// The hasher the owning collections use when none is named.
        pub type DefaultKeyHasher = FoldHasher;
    } else if #[cfg(feature = "std")] {
        /// The hasher the owning collections use when none is named.
        pub type DefaultKeyHasher = StdHasher<std::hash::RandomState>;
    } else {
        /// The hasher the owning collections use when none is named.
        pub type DefaultKeyHasher = CastHasher;
    }
}
