//! The container and its public operations.

use core::ptr;
use std::io;

use crate::hash::{id_to_hash, MAX_ID, MAX_INDEX_BITS};
use crate::list::VisitCounts;
use crate::loom::{AtomicI64, AtomicPtr, AtomicU32, AtomicU64, Ordering::SeqCst};
use crate::node::{is_marked, mark, strip_mark, Node, Sptr, TAG_DESTROYED, TAG_RETIRED};
use crate::node::AtomicSptr;
use crate::stats::{Counters, Stats};

/// A lock-free map from 64-bit ids to pointer-sized values.
///
/// Ids must be at most [`MAX_ID`](crate::MAX_ID); values are opaque
/// `*mut T` tokens that the map stores, compares, and returns, but never
/// dereferences or drops. Null is a legal value, distinguishable from
/// absence through the `Option` returns.
///
/// All operations may run from any number of threads concurrently. The map
/// is `Send` and `Sync` for every `T` for exactly the reason values are
/// `*mut T`: whether the pointee may be shared or sent is the caller's
/// contract, not the map's.
///
/// ```
/// use splitmap::SplitOrderedMap;
///
/// let map = SplitOrderedMap::<u8>::new();
/// assert!(map.add(7, 0x100 as *mut u8));
/// assert!(!map.add(7, 0x200 as *mut u8));
/// assert_eq!(map.find(7), Some(0x100 as *mut u8));
/// assert!(map.remove(7));
/// assert_eq!(map.find(7), None);
/// ```
pub struct SplitOrderedMap<T> {
    // ordered list
    pub(crate) list_head: AtomicPtr<Node<T>>,
    pub(crate) log_len: AtomicU64,
    pub(crate) phys_len: AtomicU64,

    // retired-node pool
    pub(crate) pool_head: AtomicSptr<T>,
    pub(crate) pool_tail: AtomicSptr<T>,
    pub(crate) pool_len: AtomicI64,
    pub(crate) next_sn: AtomicU64,

    // bucket index
    pub(crate) index_bits: AtomicU32,
    pub(crate) buckets_defined: AtomicU64,
    pub(crate) buckets_initialized: AtomicU64,
    pub(crate) bucket_idx: Box<[AtomicPtr<Node<T>>]>,

    pub(crate) counters: Counters,
}

/*SAFETY:
 * - nodes are reached only through the map's own atomics and are freed
 *   only in `drop(&mut self)`;
 * - values are raw pointers the map never dereferences.
 */
unsafe impl<T> Send for SplitOrderedMap<T> {}
unsafe impl<T> Sync for SplitOrderedMap<T> {}

impl<T> SplitOrderedMap<T> {
    /// Creates an empty map.
    ///
    /// Two permanent sentinels bracket the list (hash 0 and the maximum
    /// hash), bucket 0 starts out pointing at the head sentinel, and the
    /// pool is seeded with its permanent dummy node.
    pub fn new() -> Self {
        let head = Node::alloc(0, 0, true, ptr::null_mut());
        let tail = Node::alloc(0, u64::MAX, true, ptr::null_mut());
        let dummy = Node::alloc(0, 0, false, ptr::null_mut());
        /*SAFETY: nothing else can see these nodes yet. */
        unsafe {
            (*head).next.store(tail, SeqCst);
            (*dummy).tag.store(TAG_RETIRED, SeqCst);
        }

        let slots = 1usize << MAX_INDEX_BITS;
        let mut bucket_idx = Vec::with_capacity(slots);
        bucket_idx.push(AtomicPtr::new(head));
        for _ in 1..slots {
            bucket_idx.push(AtomicPtr::new(ptr::null_mut()));
        }

        let map = SplitOrderedMap {
            list_head: AtomicPtr::new(head),
            log_len: AtomicU64::new(0),
            phys_len: AtomicU64::new(2),
            pool_head: AtomicSptr::new(Sptr::new(dummy, 1)),
            pool_tail: AtomicSptr::new(Sptr::new(dummy, 1)),
            pool_len: AtomicI64::new(1),
            next_sn: AtomicU64::new(0),
            index_bits: AtomicU32::new(0),
            buckets_defined: AtomicU64::new(1),
            buckets_initialized: AtomicU64::new(1),
            bucket_idx: bucket_idx.into_boxed_slice(),
            counters: Counters::new(),
        };
        map.counters.nodes_allocated.store(3, SeqCst);
        map.counters.max_pool_len.store(1, SeqCst);
        map
    }

    /// Inserts `value` under `id`. Returns false, changing nothing, if the
    /// id is already present.
    pub fn add(&self, id: u64, value: *mut T) -> bool {
        debug_assert!(id <= MAX_ID);
        let id = id & MAX_ID;
        let guard = self.enter();

        let hash = id_to_hash(id, false);
        let bucket = self.bucket_sentinel(hash, &guard);
        let inserted = self
            .insert_internal(bucket, id, hash, false, value, &guard)
            .is_some();

        self.maybe_grow_index();
        drop(guard);
        inserted
    }

    /// Removes the entry under `id`. Returns false, changing nothing, if
    /// the id is absent.
    ///
    /// Removal is logical: the entry becomes unobservable immediately, and
    /// its node is unlinked in passing by a later operation.
    ///
    /// ```
    /// # let map = splitmap::SplitOrderedMap::<u8>::new();
    /// map.add(3, core::ptr::null_mut());
    /// assert!(map.remove(3));
    /// assert!(!map.remove(3));
    /// ```
    pub fn remove(&self, id: u64) -> bool {
        debug_assert!(id <= MAX_ID);
        let id = id & MAX_ID;
        let guard = self.enter();

        let hash = id_to_hash(id, false);
        let bucket = self.bucket_sentinel(hash, &guard);

        let mut scan = crate::list::Scan::default();
        let mut mark_collided = false;
        let mut retries = 0u64;
        let removed = loop {
            let (first, second) = self.find_mod_point(bucket, hash, &mut scan, &guard);

            /*SAFETY: mod-point pointers are protected by `guard`. */
            unsafe {
                if (*first).hash != hash {
                    break false;
                }
                debug_assert!(!(*first).sentinel);
                debug_assert_eq!((*first).id, id);

                // claim the node by marking its own next pointer
                match (*first)
                    .next
                    .compare_exchange(second, mark(second), SeqCst, SeqCst)
                {
                    Ok(_) => {
                        // physical length drops at unlink time, not here
                        self.log_len.fetch_sub(1, SeqCst);
                        break true;
                    }
                    Err(observed) => {
                        if is_marked(observed) {
                            // another thread won the marking race; that
                            // still deletes the entry
                            mark_collided = true;
                            break true;
                        }
                        // the successor changed under us (insert or unlink
                        // just behind the target); retry
                        retries += 1;
                    }
                }
            }
        };

        let counters = &self.counters;
        counters.deletion_attempts.fetch_add(1, SeqCst);
        if removed {
            if mark_collided {
                counters.deletion_start_collisions.fetch_add(1, SeqCst);
            } else {
                counters.deletion_starts.fetch_add(1, SeqCst);
            }
        } else {
            counters.deletion_failures.fetch_add(1, SeqCst);
        }
        counters.del_retries.fetch_add(retries, SeqCst);
        counters.del_unlink_collisions.fetch_add(scan.collisions, SeqCst);
        counters.del_deletion_completions.fetch_add(scan.completions, SeqCst);
        counters.nodes_visited_during_dels.fetch_add(scan.visited, SeqCst);

        drop(guard);
        removed
    }

    /// Looks up the value under `id`.
    pub fn find(&self, id: u64) -> Option<*mut T> {
        debug_assert!(id <= MAX_ID);
        let id = id & MAX_ID;
        let guard = self.enter();

        let hash = id_to_hash(id, false);
        let mut visits = VisitCounts::default();
        let found = self.find_internal(hash, &mut visits, &guard);
        /*SAFETY: the hit is protected by `guard`; `value` is atomic. */
        let value = found.map(|node| unsafe { (*node).value.load(SeqCst) });

        let counters = &self.counters;
        counters.searches.fetch_add(1, SeqCst);
        if value.is_some() {
            counters.successful_searches.fetch_add(1, SeqCst);
            counters
                .marked_visited_in_successful_searches
                .fetch_add(visits.marked, SeqCst);
            counters
                .unmarked_visited_in_successful_searches
                .fetch_add(visits.unmarked, SeqCst);
        } else {
            counters.failed_searches.fetch_add(1, SeqCst);
            counters
                .marked_visited_in_failed_searches
                .fetch_add(visits.marked, SeqCst);
            counters
                .unmarked_visited_in_failed_searches
                .fetch_add(visits.unmarked, SeqCst);
        }
        counters.sentinels_traversed.fetch_add(visits.sentinels, SeqCst);

        drop(guard);
        value
    }

    /// Replaces the value under `id`, returning the previous value. The
    /// exchange on a hit is atomic: two racing swaps chain, they cannot
    /// both return the same old value.
    ///
    /// ```
    /// # let map = splitmap::SplitOrderedMap::<u8>::new();
    /// map.add(3, 0x10 as *mut u8);
    /// assert_eq!(map.swap_value(3, 0x20 as *mut u8), Some(0x10 as *mut u8));
    /// assert_eq!(map.swap_value(4, 0x30 as *mut u8), None);
    /// ```
    pub fn swap_value(&self, id: u64, new_value: *mut T) -> Option<*mut T> {
        debug_assert!(id <= MAX_ID);
        let id = id & MAX_ID;
        let guard = self.enter();

        let hash = id_to_hash(id, false);
        let mut visits = VisitCounts::default();
        let found = self.find_internal(hash, &mut visits, &guard);
        /*SAFETY: the hit is protected by `guard`; `value` is atomic. */
        let old = found.map(|node| unsafe { (*node).value.swap(new_value, SeqCst) });

        let counters = &self.counters;
        counters.value_swaps.fetch_add(1, SeqCst);
        if old.is_some() {
            counters.successful_value_swaps.fetch_add(1, SeqCst);
            counters
                .marked_visited_in_successful_swaps
                .fetch_add(visits.marked, SeqCst);
            counters
                .unmarked_visited_in_successful_swaps
                .fetch_add(visits.unmarked, SeqCst);
        } else {
            counters.failed_value_swaps.fetch_add(1, SeqCst);
            counters
                .marked_visited_in_failed_swaps
                .fetch_add(visits.marked, SeqCst);
            counters
                .unmarked_visited_in_failed_swaps
                .fetch_add(visits.unmarked, SeqCst);
        }
        counters.sentinels_traversed.fetch_add(visits.sentinels, SeqCst);

        drop(guard);
        old
    }

    /// Finds the id of the first live entry (in list order) whose value
    /// pointer equals `value`. O(N): this walks the whole list, having no
    /// hash to start from.
    pub fn find_id_by_value(&self, value: *mut T) -> Option<u64> {
        let guard = self.enter();

        let mut visits = VisitCounts::default();
        let mut found = None;
        /*SAFETY: the walk starts at the permanent head sentinel and every
         * step is protected by `guard`; it ends at the tail, whose `next`
         * is null.
         */
        unsafe {
            let mut node = self.list_head.load(SeqCst);
            while !node.is_null() && found.is_none() {
                let mut next = (*node).next.load(SeqCst);
                let node_marked = is_marked(next);
                if node_marked {
                    debug_assert!(!(*node).sentinel);
                    next = strip_mark(next);
                    visits.marked += 1;
                } else if !(*node).sentinel {
                    visits.unmarked += 1;
                }

                if (*node).sentinel {
                    visits.sentinels += 1;
                } else if !node_marked && (*node).value.load(SeqCst) == value {
                    found = Some((*node).id);
                }
                node = next;
            }
        }

        let counters = &self.counters;
        counters.value_searches.fetch_add(1, SeqCst);
        if found.is_some() {
            counters.successful_value_searches.fetch_add(1, SeqCst);
        } else {
            counters.failed_value_searches.fetch_add(1, SeqCst);
        }
        counters
            .marked_visited_in_value_searches
            .fetch_add(visits.marked, SeqCst);
        counters
            .unmarked_visited_in_value_searches
            .fetch_add(visits.unmarked, SeqCst);
        counters.sentinels_traversed.fetch_add(visits.sentinels, SeqCst);
        counters
            .sentinels_in_value_searches
            .fetch_add(visits.sentinels, SeqCst);

        drop(guard);
        found
    }

    /// Returns the first live entry in hash order, if any.
    ///
    /// Together with [`next_after`](Self::next_after) this walks the whole
    /// map. The walk is snapshot-inconsistent: entries added or removed
    /// concurrently may or may not appear; every entry returned was live
    /// at some moment during the scan.
    pub fn first(&self) -> Option<(u64, *mut T)> {
        let guard = self.enter();

        let mut visits = VisitCounts::default();
        let mut found = None;
        /*SAFETY: as in `find_id_by_value`. */
        unsafe {
            let mut node = self.list_head.load(SeqCst);
            while !node.is_null() && found.is_none() {
                let mut next = (*node).next.load(SeqCst);
                let node_marked = is_marked(next);
                if node_marked {
                    debug_assert!(!(*node).sentinel);
                    next = strip_mark(next);
                    visits.marked += 1;
                } else if !(*node).sentinel {
                    visits.unmarked += 1;
                }

                if (*node).sentinel {
                    visits.sentinels += 1;
                } else if !node_marked {
                    found = Some(((*node).id, (*node).value.load(SeqCst)));
                }
                node = next;
            }
        }

        let counters = &self.counters;
        counters.iter_inits.fetch_add(1, SeqCst);
        if found.is_none() {
            counters.iter_ends.fetch_add(1, SeqCst);
        }
        counters.marked_visited_in_iters.fetch_add(visits.marked, SeqCst);
        counters
            .unmarked_visited_in_iters
            .fetch_add(visits.unmarked, SeqCst);
        counters.sentinels_traversed.fetch_add(visits.sentinels, SeqCst);
        counters.sentinels_in_iters.fetch_add(visits.sentinels, SeqCst);

        drop(guard);
        found
    }

    /// Returns the live entry with the smallest hash greater than
    /// `prev_id`'s hash, if any. `prev_id` itself need not still be
    /// present.
    pub fn next_after(&self, prev_id: u64) -> Option<(u64, *mut T)> {
        debug_assert!(prev_id <= MAX_ID);
        let prev_id = prev_id & MAX_ID;
        let guard = self.enter();

        let prev_hash = id_to_hash(prev_id, false);
        let mut visits = VisitCounts::default();
        let mut found = None;
        /*SAFETY: the walk starts at a live bucket sentinel and every step
         * is protected by `guard`.
         */
        unsafe {
            let mut node = self.bucket_sentinel(prev_hash, &guard);
            debug_assert!((*node).hash < prev_hash);
            while !node.is_null() && found.is_none() {
                let mut next = (*node).next.load(SeqCst);
                let node_marked = is_marked(next);
                if node_marked {
                    debug_assert!(!(*node).sentinel);
                    next = strip_mark(next);
                    visits.marked += 1;
                } else if !(*node).sentinel {
                    visits.unmarked += 1;
                }

                if (*node).sentinel {
                    visits.sentinels += 1;
                } else if !node_marked && (*node).hash > prev_hash {
                    found = Some(((*node).id, (*node).value.load(SeqCst)));
                }
                node = next;
            }
        }

        let counters = &self.counters;
        if found.is_some() {
            counters.iter_nexts.fetch_add(1, SeqCst);
        } else {
            counters.iter_ends.fetch_add(1, SeqCst);
        }
        counters.marked_visited_in_iters.fetch_add(visits.marked, SeqCst);
        counters
            .unmarked_visited_in_iters
            .fetch_add(visits.unmarked, SeqCst);
        counters.sentinels_traversed.fetch_add(visits.sentinels, SeqCst);
        counters.sentinels_in_iters.fetch_add(visits.sentinels, SeqCst);

        drop(guard);
        found
    }

    /// Returns an iterator over `(id, value)` pairs in hash order, built
    /// on [`first`](Self::first) / [`next_after`](Self::next_after) and
    /// sharing their snapshot-inconsistency.
    ///
    /// ```
    /// # let map = splitmap::SplitOrderedMap::<u8>::new();
    /// map.add(1, 0x10 as *mut u8);
    /// map.add(2, 0x20 as *mut u8);
    /// let mut ids: Vec<u64> = map.iter().map(|(id, _)| id).collect();
    /// ids.sort_unstable();
    /// assert_eq!(ids, [1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            map: self,
            prev: None,
            done: false,
        }
    }

    /// Number of live entries. Momentarily stale while operations are in
    /// flight; exact at quiescence.
    pub fn len(&self) -> u64 {
        self.log_len.load(SeqCst)
    }

    /// True if [`len`](Self::len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes a snapshot of the operation statistics and current lengths.
    pub fn stats(&self) -> Stats {
        let mut stats = self.counters.snapshot();
        stats.log_len = self.log_len.load(SeqCst);
        stats.phys_len = self.phys_len.load(SeqCst);
        stats.pool_len = self.pool_len.load(SeqCst);
        stats.index_bits = self.index_bits.load(SeqCst);
        stats.buckets_defined = self.buckets_defined.load(SeqCst);
        stats.buckets_initialized = self.buckets_initialized.load(SeqCst);
        stats
    }

    /// Resets every statistics counter to zero. Lengths are state, not
    /// statistics, and are unaffected.
    pub fn clear_stats(&self) {
        self.counters.clear();
    }

    /// Writes the current statistics to `w`, one labeled value per line.
    pub fn dump_stats<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        self.stats().dump(w)
    }

    /// Writes the raw list contents to `w` for diagnostics: one line per
    /// node with its hash, kind, and state, in list order. Like iteration,
    /// the dump is snapshot-inconsistent under concurrent modification.
    pub fn dump_list<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        let guard = self.enter();

        writeln!(w, "logical length: {}", self.log_len.load(SeqCst))?;
        writeln!(w, "physical length: {}", self.phys_len.load(SeqCst))?;
        /*SAFETY: as in `find_id_by_value`. */
        unsafe {
            let mut node = self.list_head.load(SeqCst);
            let mut position = 0u64;
            while !node.is_null() {
                let next = (*node).next.load(SeqCst);
                let line = if (*node).sentinel {
                    format!("{position}: sentinel hash {:#x}", (*node).hash)
                } else {
                    format!(
                        "{position}: id {} hash {:#x} value {:?}{}",
                        (*node).id,
                        (*node).hash,
                        (*node).value.load(SeqCst),
                        if is_marked(next) { " (marked)" } else { "" },
                    )
                };
                writeln!(w, "{line}")?;
                position += 1;
                node = strip_mark(next);
            }
        }

        drop(guard);
        Ok(())
    }
}

impl<T> Default for SplitOrderedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SplitOrderedMap<T> {
    /// Drains the list, then the pool, returning every node to the heap.
    /// `&mut self` means quiescence, so plain walks and direct frees are
    /// enough.
    fn drop(&mut self) {
        let mut sentinels = 0u64;
        let mut marked_nodes = 0u64;
        let mut live_nodes = 0u64;

        /*SAFETY: exclusive access; no guard can be outstanding. */
        unsafe {
            let mut node = self.list_head.load(SeqCst);
            while !node.is_null() {
                let next = (*node).next.load(SeqCst);
                if (*node).sentinel {
                    debug_assert!(!is_marked(next));
                    sentinels += 1;
                } else if is_marked(next) {
                    marked_nodes += 1;
                } else {
                    live_nodes += 1;
                }
                (*node).tag.store(TAG_DESTROYED, SeqCst);
                drop(Box::from_raw(node));
                self.counters.nodes_freed.fetch_add(1, SeqCst);
                node = strip_mark(next);
            }

            debug_assert_eq!(sentinels, self.buckets_initialized.load(SeqCst) + 1);
            debug_assert_eq!(
                self.phys_len.load(SeqCst),
                sentinels + marked_nodes + live_nodes
            );
            debug_assert_eq!(self.log_len.load(SeqCst), live_nodes);

            let mut node = self.pool_head.load().ptr;
            while !node.is_null() {
                let next = (*node).pool_next.load().ptr;
                debug_assert_eq!((*node).tag.load(SeqCst), TAG_RETIRED);
                (*node).tag.store(TAG_DESTROYED, SeqCst);
                drop(Box::from_raw(node));
                self.counters.nodes_freed.fetch_add(1, SeqCst);
                node = next;
            }
        }
    }
}

/// Iterator over a map's `(id, value)` pairs in hash order.
///
/// Returned by [`SplitOrderedMap::iter`]. Snapshot-inconsistent under
/// concurrent modification, like the first/next walk it is built on.
pub struct Iter<'a, T> {
    map: &'a SplitOrderedMap<T>,
    prev: Option<u64>,
    done: bool,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = (u64, *mut T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = match self.prev {
            None => self.map.first(),
            Some(prev_id) => self.map.next_after(prev_id),
        };
        match entry {
            Some((id, value)) => {
                self.prev = Some(id);
                Some((id, value))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
