//! Affinity distribution map and rendezvous partition hashing (spec.md §4.3).

pub mod key;
pub mod map;
pub mod rendezvous;

pub use key::{resolve_affinity_key, BinaryObjectKey, KeyConfig, KeyInput};
pub use map::{CacheAffinityMap, CacheGroup, DistributionMap};
