//! Intrusive doubly-linked circular list.
//!
//! A [`Link`] carries nothing but its two neighbour pointers. It is embedded
//! directly inside the memory it links, so the list never allocates:
//!
//! ```text
//!          ┌──────────────────────────────────────────────┐
//!          ▼                                              │
//!   ┌────────────┐     ┌────────────┐     ┌────────────┐  │
//!   │  sentinel  │ ──▶ │   node A   │ ──▶ │   node B   │ ─┘
//!   │ prior next │ ◀── │ prior next │ ◀── │ prior next │
//!   └────────────┘     └────────────┘     └────────────┘
//!          │                                     ▲
//!          └─────────────────────────────────────┘
//! ```
//!
//! Every operation here works on raw pointers and is `unsafe`: the caller
//! guarantees that each node passed in is live, correctly aligned, and part
//! of exactly one ring. A node must never sit in two rings at once; the list
//! cannot detect that.

use core::ptr::{self, NonNull};

/// The two neighbour references of a ring member.
#[repr(C)]
#[derive(Debug)]
pub struct Link {
  prior: *mut Link,
  next: *mut Link,
}

impl Link {
  /// A link that belongs to no ring yet. Pass it to [`init`] or one of the
  /// insert functions before walking it.
  pub const fn unlinked() -> Self {
    Self {
      prior: ptr::null_mut(),
      next: ptr::null_mut(),
    }
  }

  pub fn prior(&self) -> *mut Link {
    self.prior
  }

  pub fn next(&self) -> *mut Link {
    self.next
  }
}

/// Makes `node` a ring of one: its own prior and next.
///
/// # Safety
///
/// `node` must point to writable memory large enough for a [`Link`].
pub unsafe fn init(node: NonNull<Link>) {
  unsafe {
    let node = node.as_ptr();
    (*node).prior = node;
    (*node).next = node;
  }
}

/// Splices `new_node` in directly after `at`.
///
/// # Safety
///
/// `at` must be a member of a well-formed ring and `new_node` must not be a
/// member of any ring.
pub unsafe fn insert_after(
  at: NonNull<Link>,
  new_node: NonNull<Link>,
) {
  unsafe {
    let at = at.as_ptr();
    let new_node = new_node.as_ptr();
    let next = (*at).next;

    (*new_node).prior = at;
    (*new_node).next = next;
    (*next).prior = new_node;
    (*at).next = new_node;
  }
}

/// Splices `new_node` in directly before `at`.
///
/// # Safety
///
/// Same contract as [`insert_after`].
pub unsafe fn insert_before(
  at: NonNull<Link>,
  new_node: NonNull<Link>,
) {
  unsafe {
    let at = at.as_ptr();
    let new_node = new_node.as_ptr();
    let prior = (*at).prior;

    (*new_node).prior = prior;
    (*new_node).next = at;
    (*prior).next = new_node;
    (*at).prior = new_node;
  }
}

/// Unsplices `node` from its ring.
///
/// The links stored in `node` are left stale; re-[`init`] or re-insert it
/// before using it again.
///
/// # Safety
///
/// `node` must be a member of a well-formed ring.
pub unsafe fn remove(node: NonNull<Link>) {
  unsafe {
    let node = node.as_ptr();
    let prior = (*node).prior;
    let next = (*node).next;

    (*prior).next = next;
    (*next).prior = prior;
  }
}

/// Puts `replacement` into the exact ring slot `node` occupies. `node` is
/// left stale, as with [`remove`].
///
/// # Safety
///
/// `node` must be a member of a well-formed ring of at least two nodes, and
/// `replacement` must not be a member of any ring.
pub unsafe fn replace(
  node: NonNull<Link>,
  replacement: NonNull<Link>,
) {
  unsafe {
    let node = node.as_ptr();
    let replacement = replacement.as_ptr();
    let prior = (*node).prior;
    let next = (*node).next;

    (*replacement).prior = prior;
    (*replacement).next = next;
    (*prior).next = replacement;
    (*next).prior = replacement;
  }
}

/// Unlinks and returns the node after `node`, or `None` on a ring of one.
///
/// # Safety
///
/// `node` must be a member of a well-formed ring.
pub unsafe fn pop_next(node: NonNull<Link>) -> Option<NonNull<Link>> {
  unsafe {
    let next = NonNull::new((*node.as_ptr()).next)?;
    if next == node {
      return None;
    }

    remove(next);
    Some(next)
  }
}

/// Unlinks and returns the node before `node`, or `None` on a ring of one.
///
/// # Safety
///
/// `node` must be a member of a well-formed ring.
pub unsafe fn pop_prior(node: NonNull<Link>) -> Option<NonNull<Link>> {
  unsafe {
    let prior = NonNull::new((*node.as_ptr()).prior)?;
    if prior == node {
      return None;
    }

    remove(prior);
    Some(prior)
  }
}

/// The node after `node`.
///
/// # Safety
///
/// `node` must be a member of a well-formed ring.
pub unsafe fn next(node: NonNull<Link>) -> NonNull<Link> {
  unsafe { NonNull::new_unchecked((*node.as_ptr()).next) }
}

/// The node before `node`.
///
/// # Safety
///
/// `node` must be a member of a well-formed ring.
pub unsafe fn prior(node: NonNull<Link>) -> NonNull<Link> {
  unsafe { NonNull::new_unchecked((*node.as_ptr()).prior) }
}

/// Walks the ring once, starting with `start` itself, and returns the first
/// node accepted by `matches`.
///
/// # Safety
///
/// `start` must be a member of a well-formed ring that is not modified while
/// the scan runs.
pub unsafe fn find<F>(
  start: NonNull<Link>,
  mut matches: F,
) -> Option<NonNull<Link>>
where
  F: FnMut(NonNull<Link>) -> bool,
{
  let mut node = start;

  loop {
    if matches(node) {
      return Some(node);
    }

    node = unsafe { next(node) };

    if node == start {
      return None;
    }
  }
}

/// Counts the ring members other than `start`.
///
/// # Safety
///
/// Same contract as [`find`].
pub unsafe fn length(start: NonNull<Link>) -> usize {
  unsafe { iter(start) }.count()
}

/// Iterates every ring member after `start` until the walk comes back round.
/// `start` itself is never yielded.
///
/// # Safety
///
/// Same contract as [`find`], for as long as the iterator is alive.
pub unsafe fn iter(start: NonNull<Link>) -> Iter {
  Iter {
    start,
    current: start,
  }
}

pub struct Iter {
  start: NonNull<Link>,
  current: NonNull<Link>,
}

impl Iterator for Iter {
  type Item = NonNull<Link>;

  fn next(&mut self) -> Option<Self::Item> {
    // Sound because `iter` is only reachable through its safety contract.
    let following = unsafe { next(self.current) };

    if following == self.start {
      return None;
    }

    self.current = following;
    Some(following)
  }
}
