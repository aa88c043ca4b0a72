use core::fmt;

/// Everything the heap can refuse to do.
///
/// The allocator itself only reports these; deciding that they are fatal is
/// the job of [`KernelHeap`](crate::KernelHeap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  /// Region starts at address zero.
  NullRegion,
  /// Region start is not word aligned.
  Misaligned { start: usize },
  /// Region cannot even hold the heap's own bookkeeping.
  RegionTooSmall { size: usize },
  /// No free block is large enough.
  OutOfMemory { requested: usize },
  /// Pointer was never handed out by this heap.
  InvalidPointer { ptr: usize },
  /// Pointer lies in a span that is already free.
  DoubleFree { ptr: usize },
  /// Free list failed a consistency check at the given block.
  Corrupted { at: usize },
}

impl HeapError {
  /// Short description that needs no formatting machinery.
  pub const fn as_str(&self) -> &'static str {
    match self {
      HeapError::NullRegion => "heap region starts at address zero",
      HeapError::Misaligned { .. } => "heap region start is not word aligned",
      HeapError::RegionTooSmall { .. } => "heap region too small for its header",
      HeapError::OutOfMemory { .. } => "out of heap memory",
      HeapError::InvalidPointer { .. } => "free of a pointer not owned by the heap",
      HeapError::DoubleFree { .. } => "double free",
      HeapError::Corrupted { .. } => "heap free list corrupted",
    }
  }
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match *self {
      HeapError::NullRegion => f.write_str(self.as_str()),
      HeapError::Misaligned { start } => write!(f, "{} ({:#x})", self.as_str(), start),
      HeapError::RegionTooSmall { size } => write!(f, "{} ({} bytes)", self.as_str(), size),
      HeapError::OutOfMemory { requested } => {
        write!(f, "{} (requested {} bytes)", self.as_str(), requested)
      }
      HeapError::InvalidPointer { ptr } | HeapError::DoubleFree { ptr } => {
        write!(f, "{} ({:#x})", self.as_str(), ptr)
      }
      HeapError::Corrupted { at } => write!(f, "{} at {:#x}", self.as_str(), at),
    }
  }
}

impl core::error::Error for HeapError {}
