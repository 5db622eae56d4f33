//! The bucket index: an array of sentinel pointers into the list.
//!
//! Slots go from null to a sentinel exactly once and never revert.
//! Growing the index just raises `index_bits`; nothing in the list moves,
//! since a finer bucket's sentinel splices in under its parent bucket's
//! sentinel.

use core::ptr;

use crate::hash::{hash_to_bucket_idx, id_to_hash};
use crate::loom::Ordering::SeqCst;
use crate::map::SplitOrderedMap;
use crate::node::{is_marked, Node};
use crate::pool::PoolGuard;

/// Entries per bucket (logical length over buckets defined) that trigger
/// doubling the index.
const GROWTH_THRESHOLD: u64 = 8;

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        fn bucket_wait(_spins: u32) {
            crate::loom::yield_now();
        }
    } else {
        fn bucket_wait(spins: u32) {
            if spins < 64 {
                crate::loom::yield_now();
            } else {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }
}

impl<T> SplitOrderedMap<T> {
    /// Returns the sentinel of the bucket `hash` falls into, creating the
    /// bucket (and any missing ancestors) on demand.
    pub(crate) fn bucket_sentinel(&self, hash: u64, guard: &PoolGuard<'_, T>) -> *mut Node<T> {
        let bits = self.index_bits.load(SeqCst);
        let idx = hash_to_bucket_idx(hash, bits);

        if self.bucket_idx[idx].load(SeqCst).is_null() {
            self.create_hash_bucket(hash, self.index_bits.load(SeqCst), guard);
        }

        let sentinel = self.bucket_idx[idx].load(SeqCst);
        debug_assert!(!sentinel.is_null());
        debug_assert!(!is_marked(sentinel));
        /*SAFETY: published sentinels are live forever. */
        unsafe {
            debug_assert!((*sentinel).sentinel);
            debug_assert!((*sentinel).hash < hash);
        }
        sentinel
    }

    /// Creates the bucket for `hash` at the given index width.
    ///
    /// Buckets form a binary parent chain (drop one index bit to get the
    /// parent), and a bucket can only be spliced in under an existing
    /// ancestor. Missing levels are collected on an explicit stack and
    /// built bottom-up.
    fn create_hash_bucket(&self, hash: u64, index_bits: u32, guard: &PoolGuard<'_, T>) {
        debug_assert!(index_bits > 0);

        let mut pending = Vec::new();
        let mut bits = index_bits;
        while bits > 0 && self.bucket_idx[hash_to_bucket_idx(hash, bits)].load(SeqCst).is_null() {
            pending.push(bits);
            bits -= 1;
        }
        if pending.len() > 1 {
            self.counters
                .nested_bucket_inits
                .fetch_add(pending.len() as u64 - 1, SeqCst);
        }

        while let Some(bits) = pending.pop() {
            let target = hash_to_bucket_idx(hash, bits);
            if !self.bucket_idx[target].load(SeqCst).is_null() {
                // either a racer finished this level, or the dropped index
                // bit was zero and the level below already owns the slot
                continue;
            }

            let parent = hash_to_bucket_idx(hash, bits - 1);
            let parent_sentinel = self.bucket_idx[parent].load(SeqCst);
            debug_assert!(!parent_sentinel.is_null());

            // the sentinel's "id" is the bucket index itself
            let target_hash = id_to_hash(target as u64, true);
            debug_assert_eq!(hash_to_bucket_idx(target_hash, bits), target);

            match self.insert_internal(parent_sentinel, 0, target_hash, true, ptr::null_mut(), guard)
            {
                Some(sentinel) => {
                    // only the insert winner publishes, so this cannot fail
                    let published = self.bucket_idx[target].compare_exchange(
                        ptr::null_mut(),
                        sentinel,
                        SeqCst,
                        SeqCst,
                    );
                    debug_assert!(published.is_ok());
                    self.buckets_initialized.fetch_add(1, SeqCst);
                }
                None => {
                    // a racer owns the sentinel; wait for it to publish
                    self.counters.bucket_init_collisions.fetch_add(1, SeqCst);
                    let mut spins = 0u32;
                    while self.bucket_idx[target].load(SeqCst).is_null() {
                        bucket_wait(spins);
                        spins = spins.saturating_add(1);
                        self.counters.bucket_init_waits.fetch_add(1, SeqCst);
                    }
                }
            }
        }
    }

    /// Doubles the index when the per-bucket load crosses the threshold.
    /// Every lost race here means another thread is doing the same job, so
    /// failures only feed the counters.
    pub(crate) fn maybe_grow_index(&self) {
        let index_bits = self.index_bits.load(SeqCst);
        if index_bits >= crate::hash::MAX_INDEX_BITS {
            return;
        }
        let current_defined = 1u64 << index_bits;
        if self.log_len.load(SeqCst) / current_defined < GROWTH_THRESHOLD {
            return;
        }

        if self
            .index_bits
            .compare_exchange(index_bits, index_bits + 1, SeqCst, SeqCst)
            .is_err()
        {
            self.counters.index_bits_incr_collisions.fetch_add(1, SeqCst);
            return;
        }

        // Converge buckets_defined on 1 << index_bits. Interleaved growth
        // by other threads can leapfrog our value; stop as soon as the
        // field is at or past what the current width requires.
        let mut first_failure = true;
        let mut current = current_defined;
        let mut target = current_defined << 1;
        loop {
            if self
                .buckets_defined
                .compare_exchange(current, target, SeqCst, SeqCst)
                .is_ok()
            {
                return;
            }
            if first_failure {
                first_failure = false;
                self.counters
                    .buckets_defined_update_collisions
                    .fetch_add(1, SeqCst);
            }
            target = 1u64 << self.index_bits.load(SeqCst);
            current = self.buckets_defined.load(SeqCst);
            if current >= target {
                return;
            }
            self.counters
                .buckets_defined_update_retries
                .fetch_add(1, SeqCst);
        }
    }
}
