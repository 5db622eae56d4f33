macro_rules! spread_attr {
    (
        #[$cfg:meta]
        $($i:item)*
    ) => {
        $(
            #[$cfg]
            $i
        )*
    };
}

spread_attr! {
#[cfg(not(loom))]

pub(crate) use core::sync::atomic::AtomicPtr;
pub(crate) use core::sync::atomic::AtomicU32;
pub(crate) use core::sync::atomic::AtomicU64;
pub(crate) use core::sync::atomic::AtomicI64;
pub(crate) use core::sync::atomic::Ordering;
pub(crate) use std::thread::yield_now;
}

spread_attr! {
#[cfg(loom)]

pub(crate) use ::loom::sync::atomic::AtomicPtr;
pub(crate) use ::loom::sync::atomic::AtomicU32;
pub(crate) use ::loom::sync::atomic::AtomicU64;
pub(crate) use ::loom::sync::atomic::AtomicI64;
pub(crate) use ::loom::sync::atomic::Ordering;
pub(crate) use ::loom::thread::yield_now;
}
