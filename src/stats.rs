//! Operation statistics.
//!
//! Every counter is a plain atomic add or compare-exchange and may be
//! momentarily stale under contention; the arithmetic identities (e.g.
//! insertions − deletions − logical length = 0) hold once the map is
//! quiescent.

use crate::loom::{AtomicU64, Ordering::SeqCst};
use std::io;

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident,)+) => {
        /// Atomic counter block owned by the map.
        pub(crate) struct Counters {
            $(pub(crate) $name: AtomicU64,)+
        }

        impl Counters {
            pub(crate) fn new() -> Self {
                Counters {
                    $($name: AtomicU64::new(0),)+
                }
            }

            pub(crate) fn clear(&self) {
                $(self.$name.store(0, SeqCst);)+
            }

            pub(crate) fn snapshot(&self) -> Stats {
                Stats {
                    $($name: self.$name.load(SeqCst),)+
                    ..Stats::default()
                }
            }
        }

        /// A point-in-time copy of the map's statistics.
        ///
        /// Returned by [`SplitOrderedMap::stats`](crate::SplitOrderedMap::stats).
        /// Counters are approximate under contention; the length fields and
        /// the counter identities are exact once the map is quiescent.
        #[derive(Clone, Debug, Default)]
        #[non_exhaustive]
        pub struct Stats {
            $($(#[$doc])* pub $name: u64,)+

            /// Live entry count (sentinels and marked nodes excluded).
            pub log_len: u64,
            /// Total list node count, sentinels and marked nodes included.
            pub phys_len: u64,
            /// Pool length, the permanent dummy node included.
            pub pool_len: i64,
            /// Bucket-index bits currently in effect.
            pub index_bits: u32,
            /// `1 << index_bits`.
            pub buckets_defined: u64,
            /// Buckets whose sentinel has been created and published.
            pub buckets_initialized: u64,
        }

        impl Stats {
            /// Writes every field as a `name: value` line.
            ///
            /// The format is for humans reading diagnostics, not for
            /// parsing, and may change.
            pub fn dump<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
                writeln!(w, "log_len: {}", self.log_len)?;
                writeln!(w, "phys_len: {}", self.phys_len)?;
                writeln!(w, "pool_len: {}", self.pool_len)?;
                writeln!(w, "index_bits: {}", self.index_bits)?;
                writeln!(w, "buckets_defined: {}", self.buckets_defined)?;
                writeln!(w, "buckets_initialized: {}", self.buckets_initialized)?;
                $(writeln!(w, "{}: {}", stringify!($name), self.$name)?;)+
                Ok(())
            }
        }
    };
}

counters! {
    /// Nodes allocated from the heap.
    nodes_allocated,
    /// Nodes returned to the heap (teardown only).
    nodes_freed,
    /// Nodes appended to the retired-node pool.
    nodes_added_to_pool,
    /// Nodes drawn from the pool for reuse.
    nodes_drawn_from_pool,
    /// Pool draws denied because the pool was logically empty.
    pool_empty_denials,
    /// Pool draws denied because the head node's ref count was positive.
    pool_pinned_denials,
    /// Lost races updating the pool head during a draw.
    pool_head_update_collisions,
    /// Lost races swinging the pool tail forward.
    pool_tail_update_collisions,
    /// Lost races linking a new node after the pool tail.
    pool_append_collisions,
    /// High-water mark of the pool length.
    max_pool_len,
    /// Guard-token ref-count increments (one per operation entry).
    guard_ref_incs,
    /// Guard-token ref-count decrements (one per operation exit).
    guard_ref_decs,

    /// Lost races incrementing the index-bit width.
    index_bits_incr_collisions,
    /// Lost first attempts updating `buckets_defined` after growth.
    buckets_defined_update_collisions,
    /// Retries needed to converge `buckets_defined`.
    buckets_defined_update_retries,
    /// Lost races inserting a bucket sentinel.
    bucket_init_collisions,
    /// Waits for another thread to finish publishing a bucket.
    bucket_init_waits,
    /// Bucket creations that first had to create an ancestor bucket.
    nested_bucket_inits,
    /// Sentinel nodes stepped over during list scans.
    sentinels_traversed,

    /// Successful insertions of regular entries.
    insertions,
    /// Insertions that failed because the id was already present.
    insertion_failures,
    /// Insertion restarts caused by a lost link compare-exchange.
    ins_link_collisions,
    /// Insertion restarts caused by a lost unlink of a marked node.
    ins_unlink_collisions,
    /// Deletions completed in passing during insertions.
    ins_deletion_completions,
    /// Nodes visited while scanning for insertion points.
    nodes_visited_during_ins,
    /// High-water mark of the logical length.
    max_log_len,
    /// High-water mark of the physical length.
    max_phys_len,

    /// Deletion requests.
    deletion_attempts,
    /// Entries this map marked for deletion.
    deletion_starts,
    /// Deletions that succeeded because another thread marked the entry first.
    deletion_start_collisions,
    /// Deletion requests whose target was absent.
    deletion_failures,
    /// Deletion restarts caused by a lost unlink of a marked node.
    del_unlink_collisions,
    /// Mark retries after the target's successor changed underfoot.
    del_retries,
    /// Deletions completed in passing during deletions.
    del_deletion_completions,
    /// Nodes visited while scanning for deletion targets.
    nodes_visited_during_dels,

    /// Lookups by id.
    searches,
    /// Lookups that found a live entry.
    successful_searches,
    /// Lookups that found nothing.
    failed_searches,
    /// Marked nodes stepped over in successful lookups.
    marked_visited_in_successful_searches,
    /// Unmarked nodes stepped over in successful lookups.
    unmarked_visited_in_successful_searches,
    /// Marked nodes stepped over in failed lookups.
    marked_visited_in_failed_searches,
    /// Unmarked nodes stepped over in failed lookups.
    unmarked_visited_in_failed_searches,

    /// Value exchanges requested.
    value_swaps,
    /// Value exchanges that found their entry.
    successful_value_swaps,
    /// Value exchanges whose entry was absent.
    failed_value_swaps,
    /// Marked nodes stepped over in successful value exchanges.
    marked_visited_in_successful_swaps,
    /// Unmarked nodes stepped over in successful value exchanges.
    unmarked_visited_in_successful_swaps,
    /// Marked nodes stepped over in failed value exchanges.
    marked_visited_in_failed_swaps,
    /// Unmarked nodes stepped over in failed value exchanges.
    unmarked_visited_in_failed_swaps,

    /// Reverse (value → id) searches.
    value_searches,
    /// Reverse searches that found a live entry.
    successful_value_searches,
    /// Reverse searches that found nothing.
    failed_value_searches,
    /// Marked nodes stepped over in reverse searches.
    marked_visited_in_value_searches,
    /// Unmarked regular nodes stepped over in reverse searches.
    unmarked_visited_in_value_searches,
    /// Sentinels stepped over in reverse searches.
    sentinels_in_value_searches,

    /// Iterations started.
    iter_inits,
    /// Iteration steps that produced an entry.
    iter_nexts,
    /// Iterations that ran off the end of the map.
    iter_ends,
    /// Marked nodes stepped over during iteration.
    marked_visited_in_iters,
    /// Unmarked regular nodes stepped over during iteration.
    unmarked_visited_in_iters,
    /// Sentinels stepped over during iteration.
    sentinels_in_iters,
}

impl Counters {
    /// Bumps a high-water counter to `observed` if it is larger. Losing a
    /// race here leaves the smaller value, which the caller tolerates.
    pub(crate) fn raise_high_water(watermark: &AtomicU64, observed: u64) {
        let current = watermark.load(SeqCst);
        if observed > current {
            let _ = watermark.compare_exchange(current, observed, SeqCst, SeqCst);
        }
    }
}
