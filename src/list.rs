//! The ordered lock-free list.
//!
//! Nodes sort by strictly increasing hash. Deletion is two-phase: a CAS
//! sets the low bit of the victim's `next` pointer (logical), and a later
//! scan unlinks it (physical). Scans that modify the list complete any
//! pending unlinks they walk over, restarting from the bucket sentinel if
//! another thread gets to an unlink first.

use core::ptr;

use crate::loom::Ordering::SeqCst;
use crate::map::SplitOrderedMap;
use crate::node::{is_marked, mark, strip_mark, Node};
use crate::pool::PoolGuard;
use crate::stats::Counters;

/// Tallies from one mutating scan.
#[derive(Default)]
pub(crate) struct Scan {
    /// Unlink compare-exchanges lost to another thread (each one restarts
    /// the scan).
    pub(crate) collisions: u64,
    /// Deletions this scan completed in passing.
    pub(crate) completions: u64,
    /// Nodes stepped over.
    pub(crate) visited: u64,
}

/// Tallies from one read-only walk.
#[derive(Default)]
pub(crate) struct VisitCounts {
    pub(crate) marked: u64,
    pub(crate) unmarked: u64,
    pub(crate) sentinels: u64,
}

impl<T> SplitOrderedMap<T> {
    /// Finds the mod point for `hash`: the adjacent pair `(first, second)`
    /// with `first.hash <= hash < second.hash` and `second` currently
    /// linked after `first`.
    ///
    /// Marked nodes met on the way are unlinked and retired; a lost unlink
    /// restarts the whole scan from the bucket sentinel (which, being a
    /// sentinel, cannot itself disappear).
    pub(crate) fn find_mod_point(
        &self,
        bucket: *mut Node<T>,
        hash: u64,
        scan: &mut Scan,
        _guard: &PoolGuard<'_, T>,
    ) -> (*mut Node<T>, *mut Node<T>) {
        /*SAFETY:
         * - `bucket` is a live sentinel (sentinels are never unlinked).
         * - every pointer followed was loaded from a `next` field, and the
         *   guard keeps any node we can still reach from being reused,
         *   even if it gets unlinked while we hold the pointer.
         */
        unsafe {
            debug_assert!((*bucket).sentinel);
            debug_assert!((*bucket).hash < hash);
            'restart: loop {
                let mut first = bucket;
                let mut second = (*first).next.load(SeqCst);
                debug_assert!(!is_marked(second));

                loop {
                    let mut third = (*second).next.load(SeqCst);

                    // unlink second while it carries the deletion mark
                    while is_marked(third) {
                        debug_assert!(!(*second).sentinel);
                        let succ = strip_mark(third);
                        if (*first)
                            .next
                            .compare_exchange(second, succ, SeqCst, SeqCst)
                            .is_err()
                        {
                            scan.collisions += 1;
                            continue 'restart;
                        }
                        self.phys_len.fetch_sub(1, SeqCst);
                        scan.completions += 1;
                        scan.visited += 1;
                        self.retire_node(second, 0);
                        second = succ;
                        third = (*second).next.load(SeqCst);
                    }

                    if (*second).hash > hash {
                        debug_assert!((*first).hash <= hash);
                        return (first, second);
                    }
                    if (*second).sentinel {
                        self.counters.sentinels_traversed.fetch_add(1, SeqCst);
                    }
                    first = second;
                    second = third;
                    scan.visited += 1;
                }
            }
        }
    }

    /// Inserts a node with the given hash, using `bucket` as the scan
    /// start. Returns the new node, or `None` if the hash is already
    /// present (the freshly made node is retired again in that case).
    pub(crate) fn insert_internal(
        &self,
        bucket: *mut Node<T>,
        id: u64,
        hash: u64,
        sentinel: bool,
        value: *mut T,
        guard: &PoolGuard<'_, T>,
    ) -> Option<*mut Node<T>> {
        debug_assert!(sentinel || hash & 1 == 1);

        // Allocate up front to keep the window between finding the mod
        // point and linking as small as possible; a duplicate costs us the
        // node back.
        let new_node = self.create_node(id, hash, sentinel, value);

        let mut scan = Scan::default();
        let mut link_collisions = 0u64;
        let inserted = loop {
            let (first, second) = self.find_mod_point(bucket, hash, &mut scan, guard);

            /*SAFETY: mod-point pointers are protected by `guard`; the
             * new node is exclusively ours until the link succeeds.
             */
            unsafe {
                if (*first).hash == hash {
                    // already present; dress the fresh node up as deleted
                    // so it can be retired
                    (*new_node).next.store(mark(ptr::null_mut()), SeqCst);
                    self.retire_node(new_node, 0);
                    break false;
                }
                (*new_node).next.store(second, SeqCst);
                if (*first)
                    .next
                    .compare_exchange(second, new_node, SeqCst, SeqCst)
                    .is_ok()
                {
                    self.phys_len.fetch_add(1, SeqCst);
                    if !sentinel {
                        self.log_len.fetch_add(1, SeqCst);
                    }
                    break true;
                }
                link_collisions += 1;
            }
        };

        let counters = &self.counters;
        if !sentinel {
            if inserted {
                counters.insertions.fetch_add(1, SeqCst);
            } else {
                counters.insertion_failures.fetch_add(1, SeqCst);
            }
        }
        Counters::raise_high_water(&counters.max_log_len, self.log_len.load(SeqCst));
        Counters::raise_high_water(&counters.max_phys_len, self.phys_len.load(SeqCst));
        counters.ins_link_collisions.fetch_add(link_collisions, SeqCst);
        counters.ins_unlink_collisions.fetch_add(scan.collisions, SeqCst);
        counters.ins_deletion_completions.fetch_add(scan.completions, SeqCst);
        counters.nodes_visited_during_ins.fetch_add(scan.visited, SeqCst);

        if inserted {
            Some(new_node)
        } else {
            None
        }
    }

    /// Looks up the node with exactly `hash`, without modifying the list.
    /// A hit requires the node to be unmarked at the moment its `next` is
    /// inspected.
    pub(crate) fn find_internal(
        &self,
        hash: u64,
        visits: &mut VisitCounts,
        guard: &PoolGuard<'_, T>,
    ) -> Option<*mut Node<T>> {
        let mut node = self.bucket_sentinel(hash, guard);

        /*SAFETY: every pointer followed comes from a `next` field and is
         * protected by `guard`; the walk ends at the tail sentinel, whose
         * hash exceeds every id hash.
         */
        unsafe {
            debug_assert!((*node).hash < hash);
            while (*node).hash < hash {
                let mut next = (*node).next.load(SeqCst);
                if is_marked(next) {
                    next = strip_mark(next);
                    visits.marked += 1;
                } else {
                    visits.unmarked += 1;
                }
                node = next;
                if (*node).sentinel && (*node).hash < hash {
                    visits.sentinels += 1;
                }
            }

            if (*node).hash != hash || is_marked((*node).next.load(SeqCst)) {
                None
            } else {
                debug_assert!(!(*node).sentinel);
                Some(node)
            }
        }
    }
}
