//! List nodes, deletion marking, and the serial-paired pool pointers.

use crate::loom::{AtomicPtr, AtomicU32, AtomicU64};

/// Node lifecycle tag. LIVE while linked in the list (or freshly handed to
/// a caller), RETIRED while on the pool, DESTROYED just before the memory
/// is returned to the allocator.
pub(crate) const TAG_LIVE: u32 = 1;
pub(crate) const TAG_RETIRED: u32 = 2;
pub(crate) const TAG_DESTROYED: u32 = 3;

/// A node of the ordered list.
///
/// Every node also carries the pool fields (`ref_count`, `sn`,
/// `pool_next`); a node moves between the list and the pool without
/// changing shape, only its `tag`.
///
/// The deletion mark lives in the low bit of `next`; `hash`, `id` and
/// `sentinel` are plain fields, written only while the node is owned
/// exclusively (freshly allocated or just acquired from the pool).
pub(crate) struct Node<T> {
    pub(crate) tag: AtomicU32,
    pub(crate) id: u64,
    pub(crate) hash: u64,
    pub(crate) sentinel: bool,
    pub(crate) next: AtomicPtr<Node<T>>,
    pub(crate) value: AtomicPtr<T>,

    // pool fields
    pub(crate) ref_count: AtomicU32,
    pub(crate) sn: AtomicU64,
    pub(crate) pool_next: AtomicSptr<T>,
}

// The deletion mark needs the low pointer bit free.
const _: () = assert!(core::mem::align_of::<Node<()>>() >= 2);

impl<T> Node<T> {
    /// Heap-allocates a LIVE node. The caller owns the pointer until it
    /// links the node into the list or retires it.
    pub(crate) fn alloc(id: u64, hash: u64, sentinel: bool, value: *mut T) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            tag: AtomicU32::new(TAG_LIVE),
            id,
            hash,
            sentinel,
            next: AtomicPtr::new(core::ptr::null_mut()),
            value: AtomicPtr::new(value),
            ref_count: AtomicU32::new(0),
            sn: AtomicU64::new(0),
            pool_next: AtomicSptr::new(Sptr::new(core::ptr::null_mut(), 0)),
        }))
    }
}

/// True if the mark bit of a loaded `next` value is set, i.e. the node the
/// value was loaded from is logically deleted.
#[inline]
pub(crate) fn is_marked<T>(p: *mut Node<T>) -> bool {
    p as usize & 1 == 1
}

/// Decorates a successor pointer with the deletion mark.
#[inline]
pub(crate) fn mark<T>(p: *mut Node<T>) -> *mut Node<T> {
    (p as usize | 1) as *mut Node<T>
}

/// Strips the deletion mark. Required before any dereference.
#[inline]
pub(crate) fn strip_mark<T>(p: *mut Node<T>) -> *mut Node<T> {
    (p as usize & !1) as *mut Node<T>
}

/// A pool pointer paired with a serial number.
///
/// Every store pairs the new pointer with `sn + 1`, so a node that cycles
/// through the pool and returns to the same position is still
/// distinguishable. This is the pool's ABA defense.
pub(crate) struct Sptr<T> {
    pub(crate) ptr: *mut Node<T>,
    pub(crate) sn: u64,
}

impl<T> Sptr<T> {
    pub(crate) fn new(ptr: *mut Node<T>, sn: u64) -> Self {
        Sptr { ptr, sn }
    }
}

// Derived impls would bound on `T`.
impl<T> Clone for Sptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Sptr<T> {}
impl<T> PartialEq for Sptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.sn == other.sn
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(loom))] {
        use portable_atomic::AtomicU128;
        use core::marker::PhantomData;
        use core::sync::atomic::Ordering::SeqCst;

        /// `(pointer, serial)` pair updated with a single double-width CAS.
        pub(crate) struct AtomicSptr<T> {
            cell: AtomicU128,
            _ptr: PhantomData<*mut Node<T>>,
        }

        impl<T> AtomicSptr<T> {
            pub(crate) fn new(sptr: Sptr<T>) -> Self {
                AtomicSptr {
                    cell: AtomicU128::new(Self::pack(sptr)),
                    _ptr: PhantomData,
                }
            }

            #[inline]
            fn pack(sptr: Sptr<T>) -> u128 {
                (sptr.ptr as usize as u128) | ((sptr.sn as u128) << 64)
            }

            #[inline]
            fn unpack(bits: u128) -> Sptr<T> {
                Sptr::new(bits as u64 as usize as *mut Node<T>, (bits >> 64) as u64)
            }

            #[inline]
            pub(crate) fn load(&self) -> Sptr<T> {
                Self::unpack(self.cell.load(SeqCst))
            }

            #[inline]
            pub(crate) fn compare_exchange(
                &self,
                current: Sptr<T>,
                new: Sptr<T>,
            ) -> Result<(), Sptr<T>> {
                self.cell
                    .compare_exchange(Self::pack(current), Self::pack(new), SeqCst, SeqCst)
                    .map(|_| ())
                    .map_err(Self::unpack)
            }
        }
    } else {
        /// Loom model of the pair: a mutex makes each pair operation
        /// linearizable, which is the contract the double-width CAS gives
        /// on real hardware. Loom still explores every interleaving around
        /// the operations.
        pub(crate) struct AtomicSptr<T> {
            cell: ::loom::sync::Mutex<Sptr<T>>,
        }

        impl<T> AtomicSptr<T> {
            pub(crate) fn new(sptr: Sptr<T>) -> Self {
                AtomicSptr {
                    cell: ::loom::sync::Mutex::new(sptr),
                }
            }

            pub(crate) fn load(&self) -> Sptr<T> {
                *self.cell.lock().unwrap()
            }

            pub(crate) fn compare_exchange(
                &self,
                current: Sptr<T>,
                new: Sptr<T>,
            ) -> Result<(), Sptr<T>> {
                let mut cell = self.cell.lock().unwrap();
                if *cell == current {
                    *cell = new;
                    Ok(())
                } else {
                    Err(*cell)
                }
            }
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use core::ptr;

    #[test]
    fn mark_round_trip() {
        let p = 0x1000 as *mut Node<u8>;
        assert!(!is_marked(p));
        assert!(is_marked(mark(p)));
        assert_eq!(strip_mark(mark(p)), p);
        assert_eq!(strip_mark(p), p);
        // marking null is how guard nodes fake retirement
        assert!(is_marked(mark(ptr::null_mut::<Node<u8>>())));
        assert_eq!(strip_mark(mark(ptr::null_mut::<Node<u8>>())), ptr::null_mut());
    }

    #[test]
    fn sptr_pack_round_trip() {
        let sptr = AtomicSptr::new(Sptr::<u8>::new(0xBEE0 as *mut Node<u8>, 41));
        let got = sptr.load();
        assert_eq!(got.ptr, 0xBEE0 as *mut Node<u8>);
        assert_eq!(got.sn, 41);
    }

    #[test]
    fn sptr_cas_requires_both_halves() {
        let cell = AtomicSptr::new(Sptr::<u8>::new(ptr::null_mut(), 7));
        // same pointer, wrong serial: must fail
        let stale = Sptr::new(ptr::null_mut(), 6);
        let new = Sptr::new(0x2000 as *mut Node<u8>, 8);
        assert!(cell.compare_exchange(stale, new).is_err());
        // matching pair: succeeds and bumps both halves
        let current = Sptr::new(ptr::null_mut(), 7);
        assert!(cell.compare_exchange(current, new).is_ok());
        let got = cell.load();
        assert_eq!(got.ptr, 0x2000 as *mut Node<u8>);
        assert_eq!(got.sn, 8);
    }
}
