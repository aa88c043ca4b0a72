//! The kernel's heap.
//!
//! [`KernelHeap`] puts a [`Heap`] behind a spinlock and turns every heap
//! error into a fatal stop, which is the kernel's policy: there is no reclaim
//! path, so a caller that cannot get memory cannot make progress either.
//!
//! Each entry point holds the lock only for the heap operation itself. On
//! bare-metal x86_64 interrupts are also masked for that span, so a handler
//! that fires mid-splice can never observe (or deadlock on) a half-updated
//! free list. The lock is always released before the fatal reporter runs.
//!
//! The process-wide instance lives at a fixed physical range and is reached
//! through the free functions [`init`], [`alloc`], [`free`] and
//! [`free_block_count`].

use core::ptr::NonNull;

use spin::Mutex;

use crate::{
  error::HeapError,
  fatal::fatal,
  heap::{Heap, HeapStats},
  selftest,
};

/// Start of the kernel heap: 16 MiB, clear of the kernel image and stack.
pub const KERNEL_HEAP_START: usize = 0x100_0000;

/// Size of the kernel heap: 100 MiB.
pub const KERNEL_HEAP_SIZE: usize = 100 * 1024 * 1024;

static KERNEL_HEAP: KernelHeap = KernelHeap::new();

pub struct KernelHeap {
  heap: Mutex<Option<Heap>>,
}

impl KernelHeap {
  pub const fn new() -> Self {
    Self {
      heap: Mutex::new(None),
    }
  }

  /// Binds the heap to `[start, start + size)`. Misaligned or undersized
  /// regions, and a second call, are fatal.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::init`].
  pub unsafe fn init(
    &self,
    start: usize,
    size: usize,
  ) {
    let result: Result<bool, HeapError> = critical(|| {
      let mut slot = self.heap.lock();
      if slot.is_some() {
        return Ok(false);
      }

      *slot = Some(unsafe { Heap::init(start, size) }?);
      Ok(true)
    });

    match result {
      Ok(true) => {}
      Ok(false) => fatal(Some("kernel heap initialised twice")),
      Err(error) => fail(error),
    }
  }

  /// Allocates `size` bytes, reporting failure to the caller. An
  /// uninitialised heap behaves like an empty one.
  pub fn try_alloc(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    critical(|| match self.heap.lock().as_mut() {
      Some(heap) => heap.allocate(size),
      None => Err(HeapError::OutOfMemory { requested: size }),
    })
  }

  /// Allocates `size` bytes. Running out of memory is fatal.
  pub fn alloc(
    &self,
    size: usize,
  ) -> NonNull<u8> {
    match self.try_alloc(size) {
      Ok(ptr) => ptr,
      Err(error) => fail(error),
    }
  }

  /// Returns a block obtained from [`KernelHeap::alloc`]. Pointers the heap
  /// can tell are bogus are fatal.
  ///
  /// # Safety
  ///
  /// `ptr` must come from this heap and must not be used afterwards.
  pub unsafe fn free(
    &self,
    ptr: NonNull<u8>,
  ) {
    let result = critical(|| match self.heap.lock().as_mut() {
      Some(heap) => unsafe { heap.free(ptr) },
      None => Err(HeapError::InvalidPointer {
        ptr: ptr.as_ptr() as usize,
      }),
    });

    if let Err(error) = result {
      fail(error);
    }
  }

  pub fn free_block_count(&self) -> usize {
    self.with(|heap| heap.free_block_count()).unwrap_or(0)
  }

  pub fn stats(&self) -> HeapStats {
    self.with(|heap| heap.stats()).unwrap_or_default()
  }

  /// Runs `f` on the heap under the lock; `None` before [`KernelHeap::init`].
  pub fn with<R>(
    &self,
    f: impl FnOnce(&mut Heap) -> R,
  ) -> Option<R> {
    critical(|| self.heap.lock().as_mut().map(f))
  }

  /// Runs the boot self-test. Must be called right after
  /// [`KernelHeap::init`], before anything else allocates.
  pub fn self_test(&self) {
    match self.with(selftest::check) {
      Some(Ok(())) => log::info!("heap: self-test passed"),
      Some(Err(failure)) => {
        log::error!("{}", failure);
        fatal(Some("heap self-test failed"));
      }
      None => fatal(Some("heap self-test before init")),
    }
  }
}

impl Default for KernelHeap {
  fn default() -> Self {
    Self::new()
  }
}

fn fail(error: HeapError) -> ! {
  log::error!("heap: {}", error);
  fatal(Some(error.as_str()))
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn critical<R>(f: impl FnOnce() -> R) -> R {
  x86_64::instructions::interrupts::without_interrupts(f)
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
fn critical<R>(f: impl FnOnce() -> R) -> R {
  f()
}

/// Brings up the kernel heap over its fixed range and self-tests it.
///
/// # Safety
///
/// `[KERNEL_HEAP_START, KERNEL_HEAP_START + KERNEL_HEAP_SIZE)` must be
/// mapped, writable and otherwise unused. Call once, early in boot.
pub unsafe fn init() {
  unsafe { KERNEL_HEAP.init(KERNEL_HEAP_START, KERNEL_HEAP_SIZE) };
  KERNEL_HEAP.self_test();
}

pub fn alloc(size: usize) -> NonNull<u8> {
  KERNEL_HEAP.alloc(size)
}

/// # Safety
///
/// `ptr` must come from [`alloc`] and must not be used afterwards.
pub unsafe fn free(ptr: NonNull<u8>) {
  unsafe { KERNEL_HEAP.free(ptr) }
}

pub fn free_block_count() -> usize {
  KERNEL_HEAP.free_block_count()
}

pub fn kernel_heap() -> &'static KernelHeap {
  &KERNEL_HEAP
}
