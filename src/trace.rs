//! Allocator tracing, compiled in only with the `trace` feature.

/// `log::trace!` under the `heap` target when the `trace` feature is on.
/// With the feature off the branch is constant-false and folds away, but the
/// arguments still type-check.
macro_rules! trace {
  ($($arg:tt)*) => {
    if cfg!(feature = "trace") {
      ::log::trace!(target: "heap", $($arg)*);
    }
  };
}

pub(crate) use trace;
