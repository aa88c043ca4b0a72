//! # kheap - Kernel Heap Allocator
//!
//! This crate provides the kernel's dynamic memory manager: a **first-fit
//! free-list allocator** that carves, splits and coalesces one fixed region
//! of raw memory with no operating system underneath it.
//!
//! ## Overview
//!
//! The region is tiled by blocks. Free blocks are threaded, in address order,
//! onto a circular list whose head lives in the heap's own header at the
//! start of the region:
//!
//! ```text
//!   Kernel Heap Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ Header │ Used │ Used │  Free  │ Used │           Free                │
//!   │  ◉─────┼──────┼──────┼─▶◉─────┼──────┼─────────▶◉                    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!       ▲                                                          │
//!       └──────────────────────── free list ───────────────────────┘
//!
//!   allocate: first free block that fits, split if the rest is usable.
//!   free:     re-insert by address, merge with touching neighbours.
//! ```
//!
//! Each allocation is a block with a one-word header:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  └─────────────────┘  │  │   N - 8 bytes usable     │  │
//!   │       8 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   kheap
//!   ├── align        - Alignment macros (align!, align_to!)
//!   ├── list         - Intrusive circular list
//!   ├── block        - Free/used block headers
//!   ├── heap         - Heap: init, allocate, free, introspection
//!   ├── kernel_heap  - Locked process-wide heap, fatal on error
//!   ├── selftest     - Boot-time placement checks
//!   ├── fatal        - Fatal-error reporter
//!   └── region       - mmap-backed regions for hosted runs (unix, `hosted`)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kheap::kernel_heap;
//!
//! unsafe { kernel_heap::init() };
//!
//! let ptr = kernel_heap::alloc(64);
//! unsafe { kernel_heap::free(ptr) };
//! ```
//!
//! ## Limitations
//!
//! - **Word alignment only**: payloads are aligned to `usize`, nothing more
//! - **No growth**: the region is fixed at init
//! - **No realloc**: blocks are allocated and freed, never resized
//!
//! ## Safety
//!
//! Heap metadata lives inside the untyped memory it manages, so the raw
//! pointer work is confined to `list`, `block` and `heap`. The unsafe
//! surface callers see is `init` (the region must really be theirs) and
//! `free` (the pointer must really be ours).

#![no_std]

#[cfg(test)]
extern crate std;

pub mod align;
pub mod block;
pub mod error;
pub mod fatal;
pub mod heap;
pub mod kernel_heap;
pub mod list;
#[cfg(all(unix, any(test, feature = "hosted")))]
pub mod region;
pub mod selftest;
mod trace;

pub use error::HeapError;
pub use heap::{HEAP_HEADER_SIZE, Heap, HeapStats};
pub use kernel_heap::KernelHeap;
