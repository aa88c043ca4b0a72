/// Rounds `value` up to the machine word alignment.
///
/// Every block boundary inside the heap sits on a word boundary, so block
/// sizes are always pushed through this macro before they are recorded.
///
/// # Examples
///
/// ```rust
/// use kheap::align;
///
/// match core::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::core::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to the next multiple of `alignment`, which must be a
/// power of two.
///
/// ```rust
/// use kheap::align_to;
///
/// assert_eq!(align_to!(0x1001, 0x1000), 0x2000);
/// assert_eq!(align_to!(64, 32), 64);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $alignment:expr) => {
    ($value + $alignment - 1) & !($alignment - 1)
  };
}

/// Returns `true` when `addr` sits on a machine word boundary.
pub const fn is_word_aligned(addr: usize) -> bool {
  addr & (core::mem::size_of::<usize>() - 1) == 0
}

/// Checked form of [`align!`] for sizes that come from callers.
///
/// Returns `None` when rounding would overflow `usize`.
pub const fn checked_align(value: usize) -> Option<usize> {
  let word = core::mem::size_of::<usize>();
  match value.checked_add(word - 1) {
    Some(bumped) => Some(bumped & !(word - 1)),
    None => None,
  }
}
