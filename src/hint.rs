cfg_if::cfg_if! {
    // Branch prediction hints are only available on nightly but consistently
    // help on the probe hot paths. On stable they compile to plain bools.
    if #[cfg(feature = "nightly")] {
        pub(crate) use core::intrinsics::{likely, unlikely};
    } else {
        #[inline]
        pub(crate) fn likely(b: bool) -> bool {
            b
        }
        #[inline]
        pub(crate) fn unlikely(b: bool) -> bool {
            b
        }
    }
}
