#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
mod bucket;
mod hash;
mod list;
mod loom;
mod map;
mod node;
mod pool;
mod stats;

pub use hash::{MAX_HASH, MAX_ID, MAX_INDEX_BITS, NUM_HASH_BITS};
pub use map::{Iter, SplitOrderedMap};
pub use stats::Stats;
