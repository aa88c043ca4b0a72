//! First-fit free-list heap.
//!
//! The heap keeps its own bookkeeping at the very start of the region it
//! manages, followed by the blocks themselves:
//!
//! ```text
//!   region_start                                              region_end
//!   ┌──────────────┬──────────┬──────────────┬──────────┬─────────────┐
//!   │ HeapHeader   │  used    │    free      │  used    │    free     │
//!   │ sentinel     │          │  size, link ─┼──────────┼▶ size, link │
//!   │ region size  │          │              │          │             │
//!   └──────────────┴──────────┴──────────────┴──────────┴─────────────┘
//!        │                          ▲                          ▲
//!        └──────────────────────────┴──── free list (by address)
//! ```
//!
//! The free list is a circular list threaded through the free headers,
//! headed by a zero-size sentinel. It is kept in strictly ascending address
//! order, which is what lets [`Heap::free`] coalesce by looking only at the
//! two list neighbours of the block it returns.
//!
//! A [`Heap`] is a plain handle: whoever calls [`Heap::init`] owns it and
//! passes it by `&mut` to every mutation. Nothing here is global and nothing
//! here locks; see [`KernelHeap`](crate::KernelHeap) for that.

use core::{
  mem::{self, offset_of},
  ptr::NonNull,
};

use crate::{
  align::{checked_align, is_word_aligned},
  align_to,
  block::{FreeBlock, FreePtr, MIN_FREE_BLOCK_SIZE, USED_HEADER_SIZE, UsedPtr},
  error::HeapError,
  list,
  trace::trace,
};

#[repr(C)]
struct HeapHeader {
  sentinel: FreeBlock,
  size: usize,
}

/// Bytes taken from the front of every region for the heap's bookkeeping.
pub const HEAP_HEADER_SIZE: usize = mem::size_of::<HeapHeader>();

#[cfg(target_pointer_width = "64")]
const _: () = assert!(HEAP_HEADER_SIZE == 32);

/// Snapshot of how the region is currently split up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free_block: usize,
  pub used_bytes: usize,
}

#[derive(Debug)]
pub struct Heap {
  header: NonNull<HeapHeader>,
}

// The heap exclusively owns its region; moving the handle between contexts
// moves that ownership with it.
unsafe impl Send for Heap {}

impl Heap {
  /// Takes over `[start, start + size)` and carves it into one free block.
  ///
  /// A region with room for the header but not for a single free block
  /// yields an empty heap on which every allocation fails.
  ///
  /// # Safety
  ///
  /// The range must be valid, writable memory that nothing else uses for as
  /// long as the returned heap, or any pointer it hands out, is alive.
  pub unsafe fn init(
    start: usize,
    size: usize,
  ) -> Result<Self, HeapError> {
    if start == 0 {
      return Err(HeapError::NullRegion);
    }
    if !is_word_aligned(start) {
      return Err(HeapError::Misaligned { start });
    }
    if size < HEAP_HEADER_SIZE {
      return Err(HeapError::RegionTooSmall { size });
    }

    let header = start as *mut HeapHeader;
    let heap = unsafe {
      header.write(HeapHeader {
        sentinel: FreeBlock::new(0),
        size,
      });

      Self {
        header: NonNull::new_unchecked(header),
      }
    };

    let sentinel = heap.sentinel();
    unsafe { list::init(sentinel.link()) };

    let usable = heap.usable_size();
    if usable > 0 {
      unsafe {
        let block = FreePtr::write(heap.first_block_addr(), usable);
        list::insert_after(sentinel.link(), block.link());
      }
    }

    log::info!(
      "heap: {:#x}..{:#x}, {} bytes usable",
      start,
      heap.end(),
      usable
    );

    Ok(heap)
  }

  pub fn start(&self) -> usize {
    self.header.as_ptr() as usize
  }

  /// Region size as passed to [`Heap::init`], header included.
  pub fn size(&self) -> usize {
    unsafe { (*self.header.as_ptr()).size }
  }

  pub fn end(&self) -> usize {
    self.start() + self.size()
  }

  /// Bytes available for blocks once the header is paid for. A trailing
  /// partial word is never handed out, and a region too small for a single
  /// free block has nothing usable at all.
  pub fn usable_size(&self) -> usize {
    let span = self.end().saturating_sub(self.first_block_addr()) & !(mem::size_of::<usize>() - 1);
    if span < MIN_FREE_BLOCK_SIZE { 0 } else { span }
  }

  /// First address past the last byte any block may cover.
  fn blocks_end(&self) -> usize {
    self.first_block_addr() + self.usable_size()
  }

  fn first_block_addr(&self) -> usize {
    align_to!(self.start() + HEAP_HEADER_SIZE, mem::size_of::<usize>())
  }

  fn sentinel(&self) -> FreePtr {
    let sentinel = unsafe { self.header.byte_add(offset_of!(HeapHeader, sentinel)) };
    // The header was written by `init` and lives as long as the heap.
    unsafe { FreePtr::from_raw(sentinel.cast()) }
  }

  /// Span a request of `size` payload bytes occupies, header included.
  pub fn block_size_for(size: usize) -> Option<usize> {
    let span = checked_align(size)?.checked_add(USED_HEADER_SIZE)?;
    Some(span.max(MIN_FREE_BLOCK_SIZE))
  }

  /// Hands out `size` bytes from the lowest-addressed free block that fits.
  ///
  /// The payload is word aligned. When the chosen block is big enough to
  /// leave a usable remainder, the remainder stays on the free list in the
  /// block's old slot; otherwise the whole block is handed out.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    let out_of_memory = HeapError::OutOfMemory { requested: size };
    let need = Self::block_size_for(size).ok_or(out_of_memory)?;

    let sentinel = self.sentinel();
    let found = unsafe {
      list::find(sentinel.link(), |link| FreePtr::from_link(link).size() >= need)
    };

    let Some(link) = found else {
      trace!("allocate {} bytes: no block of {} bytes", size, need);
      return Err(out_of_memory);
    };

    unsafe {
      let block = FreePtr::from_link(link);
      let leftover = block.size() - need;

      if leftover >= MIN_FREE_BLOCK_SIZE {
        block.set_size(need);
        let rest = FreePtr::write(block.addr() + need, leftover);
        list::replace(block.link(), rest.link());
        trace!("split {:#x}: {} used, {} left at {:#x}", block.addr(), need, leftover, rest.addr());
      } else {
        list::remove(block.link());
      }

      let used = block.into_used();
      trace!("allocate {} bytes -> {:#x} ({} byte block)", size, used.payload().as_ptr() as usize, used.size());

      Ok(used.payload())
    }
  }

  /// Returns a block to the free list and merges it with any free neighbour
  /// it touches.
  ///
  /// Pointers that cannot have come from this heap, and pointers into spans
  /// that are already free, are rejected without touching the list. A pointer
  /// freed once and then handed out again by a later allocation is
  /// indistinguishable from a live one.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`Heap::allocate`] on this heap and
  /// must not be used after this call.
  pub unsafe fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<(), HeapError> {
    let addr = ptr.as_ptr() as usize;
    let invalid = HeapError::InvalidPointer { ptr: addr };

    if !is_word_aligned(addr)
      || addr < self.first_block_addr() + USED_HEADER_SIZE
      || addr >= self.blocks_end()
    {
      return Err(invalid);
    }

    let used = unsafe { UsedPtr::from_payload(ptr) };
    let block_addr = used.addr();
    let sentinel = self.sentinel();

    // First free block above us; we go in right before it.
    let mut position = sentinel.link();
    for link in unsafe { list::iter(sentinel.link()) } {
      let candidate = unsafe { FreePtr::from_link(link) };

      if candidate.addr() > block_addr {
        position = link;
        break;
      }
      if unsafe { candidate.end() } > block_addr {
        return Err(HeapError::DoubleFree { ptr: addr });
      }
    }

    // The span must stop short of the next free block, or of the region.
    let limit = if position == sentinel.link() {
      self.blocks_end()
    } else {
      unsafe { FreePtr::from_link(position) }.addr()
    };

    let size = unsafe { used.size() };
    if size < MIN_FREE_BLOCK_SIZE || !is_word_aligned(size) || size > limit - block_addr {
      return Err(invalid);
    }

    unsafe {
      let block = used.into_free();
      list::insert_before(position, block.link());
      trace!("free {:#x} ({} byte block)", addr, size);

      Self::merge_right(block);
      Self::merge_left(block);
    }

    Ok(())
  }

  unsafe fn merge_right(block: FreePtr) {
    unsafe {
      let right = FreePtr::from_link(list::next(block.link()));

      if right.size() != 0 && block.end() == right.addr() {
        block.set_size(block.size() + right.size());
        list::remove(right.link());
        trace!("merge {:#x} <- {:#x}", block.addr(), right.addr());
      }
    }
  }

  unsafe fn merge_left(block: FreePtr) {
    unsafe {
      let left = FreePtr::from_link(list::prior(block.link()));

      if left.size() != 0 && left.end() == block.addr() {
        left.set_size(left.size() + block.size());
        list::remove(block.link());
        trace!("merge {:#x} <- {:#x}", left.addr(), block.addr());
      }
    }
  }

  /// Number of blocks on the free list, sentinel excluded.
  pub fn free_block_count(&self) -> usize {
    unsafe { list::length(self.sentinel().link()) }
  }

  /// `(address, size)` of every free block, lowest address first.
  pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    unsafe { list::iter(self.sentinel().link()) }.map(|link| unsafe {
      let block = FreePtr::from_link(link);
      (block.addr(), block.size())
    })
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats::default();

    for (_, size) in self.free_blocks() {
      stats.free_blocks += 1;
      stats.free_bytes += size;
      stats.largest_free_block = stats.largest_free_block.max(size);
    }

    stats.used_bytes = self.usable_size() - stats.free_bytes;
    stats
  }

  /// Walks the free list and checks every structural invariant: links agree
  /// in both directions, blocks ascend without overlapping, none is below the
  /// minimum size or outside the region, and no two free blocks touch.
  pub fn verify(&self) -> Result<(), HeapError> {
    let sentinel = self.sentinel();
    let mut previous = sentinel.link();
    let mut floor = self.first_block_addr();
    let mut first = true;

    if unsafe { sentinel.size() } != 0 {
      return Err(HeapError::Corrupted { at: sentinel.addr() });
    }

    for link in unsafe { list::iter(sentinel.link()) } {
      let block = unsafe { FreePtr::from_link(link) };
      let corrupted = Err(HeapError::Corrupted { at: block.addr() });

      if unsafe { list::prior(link) } != previous {
        return corrupted;
      }

      let size = unsafe { block.size() };
      let touches = !first && block.addr() == floor;

      if !is_word_aligned(block.addr())
        || block.addr() < floor
        || block.addr() >= self.blocks_end()
        || touches
      {
        return corrupted;
      }
      if size < MIN_FREE_BLOCK_SIZE
        || !is_word_aligned(size)
        || size > self.blocks_end() - block.addr()
      {
        return corrupted;
      }

      previous = link;
      floor = block.addr() + size;
      first = false;
    }

    if unsafe { list::prior(sentinel.link()) } != previous {
      return Err(HeapError::Corrupted { at: sentinel.addr() });
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{vec, vec::Vec};

  use super::*;
  use crate::region::MappedRegion;

  const PAGE: usize = 4096;

  fn fresh(len: usize) -> (MappedRegion, Heap) {
    let region = MappedRegion::anywhere(len).unwrap();
    let heap = unsafe { Heap::init(region.start(), region.len()) }.unwrap();
    (region, heap)
  }

  fn offset(
    heap: &Heap,
    ptr: NonNull<u8>,
  ) -> usize {
    ptr.as_ptr() as usize - heap.start()
  }

  #[test]
  fn test_init_creates_single_block() {
    let (_region, heap) = fresh(PAGE);

    assert_eq!(heap.size(), PAGE);
    assert_eq!(heap.usable_size(), PAGE - HEAP_HEADER_SIZE);
    assert_eq!(heap.free_block_count(), 1);

    let blocks: Vec<_> = heap.free_blocks().collect();
    assert_eq!(blocks, vec![(heap.start() + HEAP_HEADER_SIZE, PAGE - HEAP_HEADER_SIZE)]);
    heap.verify().unwrap();
  }

  #[test]
  fn test_init_rejects_misaligned_start() {
    let region = MappedRegion::anywhere(PAGE).unwrap();

    let result = unsafe { Heap::init(region.start() + 1, PAGE - 1) };
    assert_eq!(result.unwrap_err(), HeapError::Misaligned { start: region.start() + 1 });
  }

  #[test]
  fn test_init_rejects_null_start() {
    let result = unsafe { Heap::init(0, PAGE) };
    assert_eq!(result.unwrap_err(), HeapError::NullRegion);
  }

  #[test]
  fn test_init_drops_trailing_partial_word() {
    let region = MappedRegion::anywhere(PAGE).unwrap();
    let word = mem::size_of::<usize>();

    let heap = unsafe { Heap::init(region.start(), 256 + word - 1) }.unwrap();

    assert_eq!(heap.usable_size(), 256 - HEAP_HEADER_SIZE);
    assert_eq!(heap.free_blocks().next(), Some((heap.start() + HEAP_HEADER_SIZE, 256 - HEAP_HEADER_SIZE)));
    heap.verify().unwrap();
  }

  #[test]
  fn test_init_rejects_region_without_room_for_header() {
    let region = MappedRegion::anywhere(PAGE).unwrap();

    let result = unsafe { Heap::init(region.start(), HEAP_HEADER_SIZE - 1) };
    assert_eq!(
      result.unwrap_err(),
      HeapError::RegionTooSmall { size: HEAP_HEADER_SIZE - 1 }
    );
  }

  #[test]
  fn test_tiny_region_gives_empty_heap() {
    let region = MappedRegion::anywhere(PAGE).unwrap();
    let size = HEAP_HEADER_SIZE + MIN_FREE_BLOCK_SIZE - 1;

    let mut heap = unsafe { Heap::init(region.start(), size) }.unwrap();

    assert_eq!(heap.free_block_count(), 0);
    assert_eq!(heap.usable_size(), 0);
    assert_eq!(heap.stats(), HeapStats::default());
    assert_eq!(heap.allocate(0), Err(HeapError::OutOfMemory { requested: 0 }));
    heap.verify().unwrap();
  }

  #[test]
  fn test_block_size_for() {
    let word = mem::size_of::<usize>();

    assert_eq!(Heap::block_size_for(0), Some(MIN_FREE_BLOCK_SIZE));
    assert_eq!(Heap::block_size_for(1), Some(MIN_FREE_BLOCK_SIZE));
    assert_eq!(Heap::block_size_for(2 * word), Some(MIN_FREE_BLOCK_SIZE));
    assert_eq!(Heap::block_size_for(2 * word + 1), Some(4 * word));
    assert_eq!(Heap::block_size_for(100), Some(checked_align(100).unwrap() + word));
    assert_eq!(Heap::block_size_for(usize::MAX), None);
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn test_placement_offsets() {
    let (_region, mut heap) = fresh(PAGE);

    let first = heap.allocate(8).unwrap();
    let second = heap.allocate(16).unwrap();
    assert_eq!(offset(&heap, first), 40);
    assert_eq!(offset(&heap, second), 64);
    assert_eq!(heap.free_block_count(), 1);

    unsafe { heap.free(first) }.unwrap();
    assert_eq!(heap.free_block_count(), 2);

    let reused = heap.allocate(16).unwrap();
    assert_eq!(reused, first);
    assert_eq!(heap.free_block_count(), 1);

    unsafe { heap.free(reused) }.unwrap();
    assert_eq!(heap.free_block_count(), 2);

    let bigger = heap.allocate(17).unwrap();
    assert_eq!(offset(&heap, bigger), 88);
    assert_eq!(heap.free_block_count(), 2);
    assert_eq!(heap.free_blocks().next(), Some((heap.start() + 32, 24)));

    unsafe {
      heap.free(second).unwrap();
      heap.free(bigger).unwrap();
    }
    assert_eq!(heap.free_block_count(), 1);
    heap.verify().unwrap();
  }

  #[test]
  fn test_payloads_are_word_aligned_and_writable() {
    let (_region, mut heap) = fresh(PAGE);
    let mut live = Vec::new();

    for (i, size) in [1usize, 3, 8, 13, 64, 7].into_iter().enumerate() {
      let ptr = heap.allocate(size).unwrap();
      assert!(is_word_aligned(ptr.as_ptr() as usize));
      unsafe { ptr.as_ptr().write_bytes(i as u8 + 1, size) };
      live.push((ptr, size, i as u8 + 1));
    }

    heap.verify().unwrap();

    for (ptr, size, fill) in live {
      let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
      assert!(bytes.iter().all(|&b| b == fill));
    }
  }

  #[test]
  fn test_exact_fit_takes_whole_block() {
    let (_region, mut heap) = fresh(PAGE);
    let usable = heap.usable_size();

    let ptr = heap.allocate(usable - USED_HEADER_SIZE).unwrap();

    assert_eq!(offset(&heap, ptr), HEAP_HEADER_SIZE + USED_HEADER_SIZE);
    assert_eq!(heap.free_block_count(), 0);
    assert_eq!(heap.stats().used_bytes, usable);
    assert!(heap.allocate(0).is_err());

    unsafe { heap.free(ptr) }.unwrap();
    assert_eq!(heap.free_block_count(), 1);
  }

  #[test]
  fn test_small_leftover_is_absorbed() {
    let (_region, mut heap) = fresh(PAGE);
    let usable = heap.usable_size();

    // Leaves one word over, too little for a free header.
    let ptr = heap.allocate(usable - USED_HEADER_SIZE - mem::size_of::<usize>()).unwrap();

    assert_eq!(heap.free_block_count(), 0);
    let used = unsafe { UsedPtr::from_payload(ptr) };
    assert_eq!(unsafe { used.size() }, usable);
  }

  #[test]
  fn test_oversized_requests_fail() {
    let (_region, mut heap) = fresh(PAGE);
    let usable = heap.usable_size();

    assert_eq!(
      heap.allocate(usable),
      Err(HeapError::OutOfMemory { requested: usable })
    );
    assert_eq!(
      heap.allocate(usize::MAX),
      Err(HeapError::OutOfMemory { requested: usize::MAX })
    );
    assert_eq!(heap.free_block_count(), 1);
    heap.verify().unwrap();
  }

  #[test]
  fn test_first_fit_prefers_lowest_address() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(8).unwrap();
    let c = heap.allocate(32).unwrap();
    let _d = heap.allocate(8).unwrap();

    unsafe {
      heap.free(c).unwrap();
      heap.free(a).unwrap();
    }
    assert_eq!(heap.free_block_count(), 3);

    // Both holes fit; the lower one wins even though the other is tighter.
    let small = heap.allocate(32).unwrap();
    assert_eq!(small, a);
    assert_eq!(heap.free_block_count(), 3);
    heap.verify().unwrap();
  }

  #[test]
  fn test_free_merges_right() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let _c = heap.allocate(16).unwrap();

    unsafe { heap.free(b) }.unwrap();
    assert_eq!(heap.free_block_count(), 2);

    unsafe { heap.free(a) }.unwrap();
    assert_eq!(heap.free_block_count(), 2);

    let blocks: Vec<_> = heap.free_blocks().collect();
    assert_eq!(blocks[0], (heap.start() + HEAP_HEADER_SIZE, 48));
    heap.verify().unwrap();
  }

  #[test]
  fn test_free_merges_left() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let _c = heap.allocate(16).unwrap();

    unsafe { heap.free(a) }.unwrap();
    unsafe { heap.free(b) }.unwrap();

    assert_eq!(heap.free_block_count(), 2);
    assert_eq!(heap.free_blocks().next(), Some((heap.start() + HEAP_HEADER_SIZE, 48)));
    heap.verify().unwrap();
  }

  #[test]
  fn test_free_merges_both_sides() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    let _d = heap.allocate(16).unwrap();

    unsafe {
      heap.free(a).unwrap();
      heap.free(c).unwrap();
      assert_eq!(heap.free_block_count(), 3);

      heap.free(b).unwrap();
    }

    assert_eq!(heap.free_block_count(), 2);
    assert_eq!(heap.free_blocks().next(), Some((heap.start() + HEAP_HEADER_SIZE, 72)));
    heap.verify().unwrap();
  }

  #[test]
  fn test_free_everything_in_any_order_coalesces_fully() {
    let orders: [&[usize]; 4] = [
      &[0, 1, 2, 3, 4, 5],
      &[5, 4, 3, 2, 1, 0],
      &[1, 3, 5, 0, 2, 4],
      &[2, 0, 4, 5, 1, 3],
    ];

    for order in orders {
      let (_region, mut heap) = fresh(PAGE);
      let usable = heap.usable_size();

      let ptrs: Vec<_> = [8usize, 100, 1, 33, 250, 16]
        .into_iter()
        .map(|size| heap.allocate(size).unwrap())
        .collect();

      for &index in order {
        unsafe { heap.free(ptrs[index]) }.unwrap();
        heap.verify().unwrap();
      }

      assert_eq!(heap.free_block_count(), 1);
      assert_eq!(heap.stats().free_bytes, usable);
      assert_eq!(heap.stats().largest_free_block, usable);
    }
  }

  #[test]
  fn test_footprints_never_exceed_region() {
    let (_region, mut heap) = fresh(PAGE);
    let usable = heap.usable_size();
    let mut footprint = 0;

    while let Ok(ptr) = heap.allocate(40) {
      footprint += unsafe { UsedPtr::from_payload(ptr).size() };
      assert!(footprint <= usable);
    }

    assert_eq!(footprint + heap.stats().free_bytes, usable);
  }

  #[test]
  fn test_double_free_is_rejected() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let _c = heap.allocate(16).unwrap();

    unsafe {
      heap.free(a).unwrap();
      assert_eq!(heap.free(a), Err(HeapError::DoubleFree { ptr: a.as_ptr() as usize }));

      // `b` gets merged into `a`'s block, so it lies inside a free span.
      heap.free(b).unwrap();
      assert_eq!(heap.free(b), Err(HeapError::DoubleFree { ptr: b.as_ptr() as usize }));
    }

    assert_eq!(heap.free_block_count(), 2);
    heap.verify().unwrap();
  }

  #[test]
  fn test_foreign_pointers_are_rejected() {
    let (region, mut heap) = fresh(PAGE);
    let outside = MappedRegion::anywhere(PAGE).unwrap();

    let a = heap.allocate(16).unwrap();

    unsafe {
      let foreign = NonNull::new_unchecked((outside.start() + 64) as *mut u8);
      assert_eq!(heap.free(foreign), Err(HeapError::InvalidPointer { ptr: outside.start() + 64 }));

      let crooked = a.byte_add(1);
      assert_eq!(heap.free(crooked), Err(HeapError::InvalidPointer { ptr: a.as_ptr() as usize + 1 }));

      let header = NonNull::new_unchecked(region.start() as *mut u8);
      assert_eq!(heap.free(header), Err(HeapError::InvalidPointer { ptr: region.start() }));
    }

    assert_eq!(heap.free_block_count(), 1);
    heap.verify().unwrap();
  }

  #[test]
  fn test_header_reaching_into_free_block_is_rejected() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let _c = heap.allocate(16).unwrap();
    unsafe { heap.free(b) }.unwrap();

    // `a`'s first payload word now reads as a header spanning over `b`.
    let inner = unsafe {
      a.cast::<usize>().write(48);
      a.byte_add(USED_HEADER_SIZE)
    };

    assert_eq!(
      unsafe { heap.free(inner) },
      Err(HeapError::InvalidPointer { ptr: inner.as_ptr() as usize })
    );
    assert_eq!(heap.free_block_count(), 2);
    heap.verify().unwrap();
  }

  #[test]
  fn test_header_with_unaligned_size_is_rejected() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(64).unwrap();
    let inner = unsafe {
      a.cast::<usize>().write(MIN_FREE_BLOCK_SIZE + 1);
      a.byte_add(USED_HEADER_SIZE)
    };

    assert_eq!(
      unsafe { heap.free(inner) },
      Err(HeapError::InvalidPointer { ptr: inner.as_ptr() as usize })
    );
    assert_eq!(heap.free_block_count(), 1);
    heap.verify().unwrap();
  }

  #[test]
  fn test_verify_catches_unaligned_size() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(16).unwrap();
    unsafe { heap.free(a) }.unwrap();

    let (addr, size) = heap.free_blocks().next().unwrap();
    unsafe { FreePtr::from_raw(NonNull::new_unchecked(addr as *mut FreeBlock)).set_size(size - 1) };

    assert_eq!(heap.verify(), Err(HeapError::Corrupted { at: addr }));
  }

  #[test]
  fn test_verify_catches_block_past_region() {
    let region = MappedRegion::anywhere(PAGE).unwrap();
    let heap = unsafe { Heap::init(region.start(), PAGE / 2) }.unwrap();

    // A header outside the heap, spliced onto the list by a stray write.
    let stray = region.start() + PAGE / 2 + 64;
    unsafe {
      let block = FreePtr::write(stray, MIN_FREE_BLOCK_SIZE);
      list::insert_before(heap.sentinel().link(), block.link());
    }

    assert_eq!(heap.verify(), Err(HeapError::Corrupted { at: stray }));
  }

  #[test]
  fn test_verify_catches_broken_size() {
    let (_region, mut heap) = fresh(PAGE);

    let a = heap.allocate(16).unwrap();
    let _b = heap.allocate(16).unwrap();
    unsafe { heap.free(a) }.unwrap();

    let (addr, _) = heap.free_blocks().next().unwrap();
    unsafe { FreePtr::from_raw(NonNull::new_unchecked(addr as *mut FreeBlock)).set_size(8) };

    assert_eq!(heap.verify(), Err(HeapError::Corrupted { at: addr }));
  }

  #[test]
  fn test_reuse_never_overlaps_live_blocks() {
    let (_region, mut heap) = fresh(4 * PAGE);
    let mut live: Vec<(usize, usize)> = Vec::new();
    let mut seed: u32 = 0x2545_f491;

    for _ in 0..2000 {
      seed ^= seed << 13;
      seed ^= seed >> 17;
      seed ^= seed << 5;

      if live.is_empty() || seed % 3 != 0 {
        let size = (seed as usize >> 4) % 200;
        if let Ok(ptr) = heap.allocate(size) {
          let start = ptr.as_ptr() as usize;
          for &(other, other_size) in &live {
            assert!(start + size <= other || other + other_size <= start);
          }
          live.push((start, size.max(1)));
        }
      } else {
        let (start, _) = live.swap_remove(seed as usize % live.len());
        unsafe { heap.free(NonNull::new_unchecked(start as *mut u8)) }.unwrap();
      }

      heap.verify().unwrap();
    }

    for (start, _) in live.drain(..) {
      unsafe { heap.free(NonNull::new_unchecked(start as *mut u8)) }.unwrap();
    }
    assert_eq!(heap.free_block_count(), 1);
  }
}
