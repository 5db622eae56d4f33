//! The retired-node pool and the entry/exit guard.
//!
//! Retired nodes go to a FIFO whose head and tail are `(pointer, serial)`
//! pairs; the serial half makes a node that cycles head → tail → head
//! distinguishable from its earlier self. A node may leave the pool for
//! reuse only from the head, and only when its `ref_count` is zero.
//!
//! The guard protocol turns that rule into memory safety: every public
//! operation appends one fresh node with `ref_count == 1` to the pool tail
//! and drops the count on exit. While any operation is in flight, some pool
//! node ahead of everything retired since then is pinned, so FIFO order
//! keeps every node retired during the operation unavailable for reuse
//! until the operation has left.

use core::ptr;

use crate::hash::{id_to_hash, MAX_HASH};
use crate::loom::Ordering::SeqCst;
use crate::map::SplitOrderedMap;
use crate::node::{is_marked, mark, Node, Sptr, TAG_LIVE, TAG_RETIRED};
use crate::stats::Counters;

/// Pins the pool tail for one in-flight operation; dropping it releases
/// the pin. Obtained from [`SplitOrderedMap::enter`].
pub(crate) struct PoolGuard<'a, T> {
    map: &'a SplitOrderedMap<T>,
    node: *mut Node<T>,
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        /*SAFETY:
         * - pool nodes are only freed when the map is dropped, which
         *   needs `&mut` and therefore no outstanding guard.
         */
        let old = unsafe { &(*self.node).ref_count }.fetch_sub(1, SeqCst);
        debug_assert!(old > 0);
        self.map.counters.guard_ref_decs.fetch_add(1, SeqCst);
    }
}

impl<T> SplitOrderedMap<T> {
    /// Brackets an operation: appends a fresh guard node with a positive
    /// ref count to the pool tail. Every public operation calls this first
    /// and holds the returned guard for its whole duration.
    pub(crate) fn enter(&self) -> PoolGuard<'_, T> {
        let node = self.create_node(0, id_to_hash(0, false), false, ptr::null_mut());
        /*SAFETY: `node` is exclusively ours until the retire below. */
        unsafe {
            // The mark makes the node acceptable to `retire_node`; the
            // ref count is what pins the pool while we are inside.
            (*node).next.store(mark(ptr::null_mut()), SeqCst);
            (*node).ref_count.store(1, SeqCst);
        }
        self.counters.guard_ref_incs.fetch_add(1, SeqCst);
        self.retire_node(node, 1);
        PoolGuard { map: self, node }
    }

    /// Hands out a node for a new list entry: the pool head if one is
    /// eligible, a fresh heap allocation otherwise.
    pub(crate) fn create_node(
        &self,
        id: u64,
        hash: u64,
        sentinel: bool,
        value: *mut T,
    ) -> *mut Node<T> {
        debug_assert!(hash <= MAX_HASH);

        loop {
            let first = self.pool_head.load();
            let last = self.pool_tail.load();
            debug_assert!(!first.ptr.is_null());
            debug_assert!(!last.ptr.is_null());

            /*SAFETY:
             * - pool nodes stay allocated until the map is dropped, so
             *   `first.ptr` may be dereferenced even if it has already
             *   left the pool; the serial re-check below discards
             *   anything read from a stale head.
             */
            let next = unsafe { &(*first.ptr).pool_next }.load();
            if self.pool_head.load() != first {
                continue;
            }

            if first.ptr == last.ptr {
                if next.ptr.is_null() {
                    // only the permanent dummy is left
                    self.counters.pool_empty_denials.fetch_add(1, SeqCst);
                    break;
                }
                // tail is lagging; help it along and retry
                if self
                    .pool_tail
                    .compare_exchange(last, Sptr::new(next.ptr, last.sn + 1))
                    .is_err()
                {
                    self.counters.pool_tail_update_collisions.fetch_add(1, SeqCst);
                }
            } else if unsafe { &(*first.ptr).ref_count }.load(SeqCst) > 0 {
                // Somebody may still hold a pointer into this node; leave
                // it in place until the count drains.
                self.counters.pool_pinned_denials.fetch_add(1, SeqCst);
                break;
            } else if self
                .pool_head
                .compare_exchange(first, Sptr::new(next.ptr, first.sn + 1))
                .is_ok()
            {
                let node = first.ptr;
                /*SAFETY:
                 * - the head compare-exchange succeeded, so the node is
                 *   exclusively ours; the zero ref count observed above
                 *   means no stale list reference survives either.
                 */
                unsafe {
                    debug_assert_eq!((*node).tag.load(SeqCst), TAG_RETIRED);
                    (*node).tag.store(TAG_LIVE, SeqCst);
                    debug_assert_eq!((*node).ref_count.load(SeqCst), 0);
                    let cleared = (*node)
                        .pool_next
                        .compare_exchange(next, Sptr::new(ptr::null_mut(), next.sn + 1));
                    debug_assert!(cleared.is_ok());
                    (*node).next.store(ptr::null_mut(), SeqCst);
                    (*node).id = id;
                    (*node).hash = hash;
                    (*node).sentinel = sentinel;
                    (*node).value.store(value, SeqCst);
                }
                self.pool_len.fetch_sub(1, SeqCst);
                self.counters.nodes_drawn_from_pool.fetch_add(1, SeqCst);
                return node;
            } else {
                self.counters.pool_head_update_collisions.fetch_add(1, SeqCst);
            }
        }

        self.counters.nodes_allocated.fetch_add(1, SeqCst);
        Node::alloc(id, hash, sentinel, value)
    }

    /// Appends a node to the pool tail.
    ///
    /// The caller must have set the deletion mark on `node.next` and must
    /// pass the node's current ref count (1 for guard nodes, 0 for nodes
    /// unlinked from the list).
    pub(crate) fn retire_node(&self, node: *mut Node<T>, expected_ref_count: u32) {
        debug_assert!(!node.is_null());
        /*SAFETY: the node is still exclusively the caller's. */
        unsafe {
            debug_assert!(is_marked((*node).next.load(SeqCst)));
            debug_assert_eq!((*node).ref_count.load(SeqCst), expected_ref_count);
            debug_assert!((*node).pool_next.load().ptr.is_null());
            let flipped = (*node).tag.compare_exchange(TAG_LIVE, TAG_RETIRED, SeqCst, SeqCst);
            debug_assert!(flipped.is_ok());
            let sn = self.next_sn.fetch_add(1, SeqCst);
            (*node).sn.store(sn, SeqCst);
        }

        loop {
            let last = self.pool_tail.load();
            debug_assert!(!last.ptr.is_null());

            /*SAFETY: as in `create_node` - pool nodes outlive all guards,
             * and the tail re-check discards stale reads.
             */
            let next = unsafe { &(*last.ptr).pool_next }.load();
            if self.pool_tail.load() != last {
                continue;
            }

            if next.ptr.is_null() {
                if unsafe { &(*last.ptr).pool_next }
                    .compare_exchange(next, Sptr::new(node, next.sn + 1))
                    .is_ok()
                {
                    let len = self.pool_len.fetch_add(1, SeqCst) + 1;
                    self.counters.nodes_added_to_pool.fetch_add(1, SeqCst);
                    if self
                        .pool_tail
                        .compare_exchange(last, Sptr::new(node, last.sn + 1))
                        .is_err()
                    {
                        self.counters.pool_tail_update_collisions.fetch_add(1, SeqCst);
                    }
                    Counters::raise_high_water(&self.counters.max_pool_len, len.max(0) as u64);
                    return;
                }
                self.counters.pool_append_collisions.fetch_add(1, SeqCst);
            } else if self
                .pool_tail
                .compare_exchange(last, Sptr::new(next.ptr, last.sn + 1))
                .is_err()
            {
                self.counters.pool_tail_update_collisions.fetch_add(1, SeqCst);
            }
        }
    }
}


#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn guard_pins_and_releases() {
        let map = SplitOrderedMap::<u8>::new();
        {
            let _guard = map.enter();
            let stats = map.stats();
            assert_eq!(stats.guard_ref_incs, 1);
            assert_eq!(stats.guard_ref_decs, 0);
            // the guard sits in the pool next to the dummy
            assert_eq!(stats.pool_len, 2);
        }
        let stats = map.stats();
        assert_eq!(stats.guard_ref_decs, 1);
    }

    #[test]
    fn pool_reuses_quiesced_nodes() {
        let map = SplitOrderedMap::<u8>::new();
        // first entry: pool holds only the dummy, so the guard comes from
        // the heap; second entry: the drained dummy is eligible again.
        drop(map.enter());
        drop(map.enter());
        let stats = map.stats();
        assert!(stats.nodes_drawn_from_pool >= 1);
        assert!(stats.pool_empty_denials >= 1);
    }

    #[test]
    fn pinned_head_is_not_reused() {
        let map = SplitOrderedMap::<u8>::new();
        // walk one guard node to the pool head and keep it pinned there
        drop(map.enter());
        let held = map.enter();
        drop(map.enter());
        // `held`'s node is now the pool head with ref_count 1, so this
        // entry must refuse it and allocate instead
        let before = map.stats().pool_pinned_denials;
        drop(map.enter());
        assert!(map.stats().pool_pinned_denials > before);
        drop(held);
    }
}
