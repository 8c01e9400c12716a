#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

cfg_if::cfg_if! {
    if #[cfg(feature = "tracing")] {
        macro_rules! resize_event {
            ($($arg:tt)+) => {
                tracing::debug!(target: "home_hash", $($arg)+)
            };
        }
    } else {
        macro_rules! resize_event {
            ($($arg:tt)+) => {};
        }
    }
}

/// A map that owns its allocation context.
///
/// This module provides a `HashMap` that wraps the `HashTable`, supplies its
/// allocation context on every call, and releases its storage on drop.
pub mod hash_map;

/// A set that owns its allocation context.
///
/// This module provides a `HashSet` built on a `HashTable` with unit values,
/// suited to interning.
pub mod hash_set;

/// The core chained table and its iterator.
pub mod hash_table;
pub mod hashing;
pub mod memory;
pub mod node;

mod slots;

#[cfg(test)]
mod hash_table_proptest;

pub use hash_map::HashMap;
pub use hash_set::HashSet;
#[cfg(feature = "stats")]
pub use hash_table::ChainStats;
pub use hash_table::HashTable;
pub use memory::Global;
pub use memory::Memory;
pub use memory::TryReserveError;
pub use node::CachedNode;
pub use node::Node;
pub use node::PlainNode;
