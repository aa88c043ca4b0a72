//! Block headers.
//!
//! Every span of the heap starts with a header. A free span carries a
//! [`FreeBlock`] header, a span handed to a caller carries a [`UsedBlock`]
//! header, and both sit at the same address. Turning one into the other is a
//! header rewrite in place, never a copy of the payload.
//!
//! ```text
//!   Free block (24 bytes minimum)        Used block
//!   ┌──────────────┐ ◀── block start ──▶ ┌──────────────┐
//!   │ size         │ offset 0            │ size         │
//!   ├──────────────┤                     ├──────────────┤ ◀── payload
//!   │ link.prior   │ offset 8            │              │
//!   │ link.next    │ offset 16           │  caller data │
//!   ├──────────────┤                     │              │
//!   │  unused      │                     │              │
//!   └──────────────┘                     └──────────────┘
//! ```
//!
//! `size` always counts the whole span, header included.

use core::{
  mem::{self, offset_of},
  ptr::NonNull,
};

use crate::{align, list::Link};

#[repr(C)]
#[derive(Debug)]
pub struct FreeBlock {
  size: usize,
  link: Link,
}

impl FreeBlock {
  pub const fn new(size: usize) -> Self {
    Self {
      size,
      link: Link::unlinked(),
    }
  }
}

#[repr(C)]
#[derive(Debug)]
pub struct UsedBlock {
  size: usize,
}

/// Bytes in front of every payload pointer.
pub const USED_HEADER_SIZE: usize = mem::size_of::<UsedBlock>();

/// Smallest span that can still hold a free header. Leftovers below this are
/// left inside the used block they came from.
pub const MIN_FREE_BLOCK_SIZE: usize = align!(mem::size_of::<FreeBlock>());

const _: () = assert!(offset_of!(FreeBlock, size) == offset_of!(UsedBlock, size));
const _: () = assert!(mem::align_of::<FreeBlock>() == mem::align_of::<usize>());
const _: () = assert!(USED_HEADER_SIZE % mem::size_of::<usize>() == 0);

#[cfg(target_pointer_width = "64")]
const _: () = assert!(USED_HEADER_SIZE == 8 && MIN_FREE_BLOCK_SIZE == 24);

/// Handle to a free header living inside heap memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePtr(NonNull<FreeBlock>);

impl FreePtr {
  /// Writes a fresh, unlinked free header of `size` bytes at `addr`.
  ///
  /// # Safety
  ///
  /// `addr` must be non-null, word aligned, and the start of at least
  /// [`MIN_FREE_BLOCK_SIZE`] writable bytes owned by the caller.
  pub unsafe fn write(
    addr: usize,
    size: usize,
  ) -> Self {
    unsafe {
      let block = addr as *mut FreeBlock;
      block.write(FreeBlock::new(size));
      Self(NonNull::new_unchecked(block))
    }
  }

  /// Wraps an existing header, e.g. a sentinel embedded in another struct.
  ///
  /// # Safety
  ///
  /// `block` must point to a live, word-aligned [`FreeBlock`] that stays
  /// valid for as long as the handle is used.
  pub unsafe fn from_raw(block: NonNull<FreeBlock>) -> Self {
    Self(block)
  }

  /// Recovers the header that embeds `link`.
  ///
  /// # Safety
  ///
  /// `link` must be the `link` field of a live [`FreeBlock`].
  pub unsafe fn from_link(link: NonNull<Link>) -> Self {
    unsafe { Self(link.byte_sub(offset_of!(FreeBlock, link)).cast()) }
  }

  pub fn link(self) -> NonNull<Link> {
    // In bounds: `link` is a field of the header this handle points at.
    unsafe { self.0.byte_add(offset_of!(FreeBlock, link)).cast() }
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  /// # Safety
  ///
  /// The header must be live.
  pub unsafe fn size(self) -> usize {
    unsafe { (*self.0.as_ptr()).size }
  }

  /// # Safety
  ///
  /// The header must be live and the new size must still lie inside memory
  /// the heap owns.
  pub unsafe fn set_size(
    self,
    size: usize,
  ) {
    unsafe { (*self.0.as_ptr()).size = size }
  }

  /// First address past this span.
  ///
  /// # Safety
  ///
  /// The header must be live.
  pub unsafe fn end(self) -> usize {
    self.addr() + unsafe { self.size() }
  }

  /// Rewrites the header as a used header with the same size.
  ///
  /// # Safety
  ///
  /// The block must already be off every list.
  pub unsafe fn into_used(self) -> UsedPtr {
    unsafe {
      let size = self.size();
      let block = self.0.cast::<UsedBlock>();
      block.write(UsedBlock { size });
      UsedPtr(block)
    }
  }
}

/// Handle to a used header living inside heap memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedPtr(NonNull<UsedBlock>);

impl UsedPtr {
  /// Steps back from a payload pointer to its header.
  ///
  /// # Safety
  ///
  /// `payload` must be at least [`USED_HEADER_SIZE`] bytes past the start of
  /// memory the heap owns.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    unsafe { Self(payload.byte_sub(USED_HEADER_SIZE).cast()) }
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  pub fn payload(self) -> NonNull<u8> {
    // In bounds: every used span is at least one header plus one word.
    unsafe { self.0.byte_add(USED_HEADER_SIZE).cast() }
  }

  /// # Safety
  ///
  /// The header must be live.
  pub unsafe fn size(self) -> usize {
    unsafe { (*self.0.as_ptr()).size }
  }

  /// Rewrites the header as an unlinked free header with the same size.
  ///
  /// # Safety
  ///
  /// The span must be at least [`MIN_FREE_BLOCK_SIZE`] bytes and no longer
  /// handed out to anyone.
  pub unsafe fn into_free(self) -> FreePtr {
    unsafe {
      let size = self.size();
      FreePtr::write(self.addr(), size)
    }
  }
}
