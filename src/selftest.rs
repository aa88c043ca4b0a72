//! Boot-time allocator self-test.
//!
//! Runs a fixed alloc/free sequence against a freshly initialised heap and
//! checks exactly where each block lands and how many free blocks remain.
//! A failure here means the placement policy changed, which anything that
//! reasons about heap layout would silently get wrong.

use core::{fmt, ptr::NonNull};

use crate::{
  block::USED_HEADER_SIZE,
  error::HeapError,
  heap::{HEAP_HEADER_SIZE, Heap},
};

/// Payload offset of the first allocation on a fresh heap.
pub const FIRST_OFFSET: usize = HEAP_HEADER_SIZE + USED_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestError {
  Heap { step: &'static str, error: HeapError },
  Mismatch { step: &'static str, expected: usize, found: usize },
}

impl fmt::Display for SelfTestError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      SelfTestError::Heap { step, error } => write!(f, "heap self-test, {}: {}", step, error),
      SelfTestError::Mismatch { step, expected, found } => write!(
        f,
        "heap self-test, {}: expected {:#x}, found {:#x}",
        step, expected, found
      ),
    }
  }
}

struct Probe<'a> {
  heap: &'a mut Heap,
}

impl Probe<'_> {
  fn alloc(
    &mut self,
    step: &'static str,
    size: usize,
    offset: usize,
  ) -> Result<NonNull<u8>, SelfTestError> {
    let ptr = self
      .heap
      .allocate(size)
      .map_err(|error| SelfTestError::Heap { step, error })?;

    expect(step, offset, ptr.as_ptr() as usize - self.heap.start())?;
    Ok(ptr)
  }

  fn free(
    &mut self,
    step: &'static str,
    ptr: NonNull<u8>,
  ) -> Result<(), SelfTestError> {
    unsafe { self.heap.free(ptr) }.map_err(|error| SelfTestError::Heap { step, error })
  }

  fn count(
    &self,
    step: &'static str,
    expected: usize,
  ) -> Result<(), SelfTestError> {
    expect(step, expected, self.heap.free_block_count())
  }
}

fn expect(
  step: &'static str,
  expected: usize,
  found: usize,
) -> Result<(), SelfTestError> {
  if expected == found {
    Ok(())
  } else {
    Err(SelfTestError::Mismatch { step, expected, found })
  }
}

fn block_size(size: usize) -> usize {
  Heap::block_size_for(size).unwrap_or(0)
}

/// Runs the sequence. The heap must be freshly initialised and have room
/// for a few hundred bytes; every block the test takes is returned.
pub fn check(heap: &mut Heap) -> Result<(), SelfTestError> {
  let second_offset = FIRST_OFFSET + block_size(8);
  let third_offset = second_offset + block_size(16);

  let mut probe = Probe { heap };
  probe.count("fresh heap", 1)?;

  let first = probe.alloc("first 8 byte block", 8, FIRST_OFFSET)?;
  let second = probe.alloc("second 16 byte block", 16, second_offset)?;
  probe.count("after two allocations", 1)?;

  probe.free("free first", first)?;
  probe.count("hole after first", 2)?;

  let reused = probe.alloc("16 bytes into the hole", 16, FIRST_OFFSET)?;
  probe.count("hole refilled", 1)?;

  probe.free("free refill", reused)?;
  probe.count("hole reopened", 2)?;

  let third = probe.alloc("17 bytes past the hole", 17, third_offset)?;
  probe.count("hole untouched", 2)?;

  probe.free("free second", second)?;
  probe.free("free third", third)?;
  probe.count("fully coalesced", 1)?;

  probe
    .heap
    .verify()
    .map_err(|error| SelfTestError::Heap { step: "verify", error })
}
