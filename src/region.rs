//! Anonymous memory regions for running the heap hosted.
//!
//! On bare metal the heap is handed a physical range that nothing else
//! touches. Under a Unix host the same role is played by a private anonymous
//! mapping, which is what tests and the boot demo carve their heaps from.

use core::{fmt, ptr::NonNull};

use libc::{MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap, munmap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
  /// `mmap` refused the request.
  MapFailed { len: usize },
  /// The kernel placed the mapping somewhere other than the requested address.
  Displaced { wanted: usize, got: usize },
}

impl fmt::Display for RegionError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match *self {
      RegionError::MapFailed { len } => write!(f, "failed to map {} bytes", len),
      RegionError::Displaced { wanted, got } => {
        write!(f, "wanted a mapping at {:#x}, got {:#x}", wanted, got)
      }
    }
  }
}

impl core::error::Error for RegionError {}

/// A private, zero-filled, page-aligned mapping. Unmapped on drop.
#[derive(Debug)]
pub struct MappedRegion {
  start: NonNull<u8>,
  len: usize,
}

impl MappedRegion {
  /// Maps `len` bytes wherever the host likes.
  pub fn anywhere(len: usize) -> Result<Self, RegionError> {
    let start = unsafe { Self::map(core::ptr::null_mut(), len) }?;
    Ok(Self { start, len })
  }

  /// Maps `len` bytes at exactly `addr`, failing rather than clobbering an
  /// existing mapping or settling for another address.
  pub fn at(
    addr: usize,
    len: usize,
  ) -> Result<Self, RegionError> {
    let start = unsafe { Self::map(addr as *mut c_void, len) }?;
    let region = Self { start, len };

    if region.start() != addr {
      return Err(RegionError::Displaced {
        wanted: addr,
        got: region.start(),
      });
    }

    Ok(region)
  }

  unsafe fn map(
    hint: *mut c_void,
    len: usize,
  ) -> Result<NonNull<u8>, RegionError> {
    let addr = unsafe { mmap(hint, len, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANON, -1, 0) };

    if addr == MAP_FAILED {
      return Err(RegionError::MapFailed { len });
    }

    NonNull::new(addr as *mut u8).ok_or(RegionError::MapFailed { len })
  }

  pub fn start(&self) -> usize {
    self.start.as_ptr() as usize
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn end(&self) -> usize {
    self.start() + self.len
  }
}

impl Drop for MappedRegion {
  fn drop(&mut self) {
    unsafe {
      munmap(self.start.as_ptr() as *mut c_void, self.len);
    }
  }
}
