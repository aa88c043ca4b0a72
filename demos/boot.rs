use std::{io::Read, ptr::NonNull};

use kheap::{Heap, KernelHeap, region::MappedRegion, selftest};

/// Where the boot self-test historically placed the heap.
const BOOT_HEAP_START: usize = 0x200000;
const BOOT_HEAP_SIZE: usize = 64 * 1024;

/// Waits until the user presses ENTER, when run with `--step`.
/// Useful when you want to inspect the mapping with `pmap` or `gdb` between
/// stages.
fn block_until_enter_pressed(step: bool) {
  if !step {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_free_list(
  label: &str,
  heap: &Heap,
) {
  println!("[{}] {} free block(s)", label, heap.free_block_count());
  for (addr, size) in heap.free_blocks() {
    println!("    {:#x}..{:#x} ({} bytes)", addr, addr + size, size);
  }
}

fn addr(ptr: NonNull<u8>) -> usize {
  ptr.as_ptr() as usize
}

fn main() {
  env_logger::init();
  let step = std::env::args().any(|arg| arg == "--step");

  // --------------------------------------------------------------------
  // 1) Map the region the kernel would hand the heap at boot.
  // --------------------------------------------------------------------
  let region = match MappedRegion::at(BOOT_HEAP_START, BOOT_HEAP_SIZE) {
    Ok(region) => region,
    Err(error) => {
      eprintln!("cannot reproduce the boot layout: {}", error);
      std::process::exit(1);
    }
  };
  println!("[1] Mapped {:#x}..{:#x}", region.start(), region.end());

  let mut heap = match unsafe { Heap::init(region.start(), region.len()) } {
    Ok(heap) => heap,
    Err(error) => {
      eprintln!("heap init failed: {}", error);
      std::process::exit(1);
    }
  };
  print_free_list("1", &heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) The boot self-test, then the same sequence spelled out with the
  //    absolute addresses it must produce.
  // --------------------------------------------------------------------
  if let Err(failure) = selftest::check(&mut heap) {
    eprintln!("{}", failure);
    std::process::exit(1);
  }
  println!("\n[2] Self-test passed");

  let first = heap.allocate(8).unwrap();
  let second = heap.allocate(16).unwrap();
  println!("[2] alloc(8)  = {:#x}", addr(first));
  println!("[2] alloc(16) = {:#x}", addr(second));
  assert_eq!(addr(first), BOOT_HEAP_START + 40);
  assert_eq!(addr(second), BOOT_HEAP_START + 64);

  unsafe { heap.free(first) }.unwrap();
  print_free_list("2", &heap);

  let bigger = heap.allocate(17).unwrap();
  println!("[2] alloc(17) = {:#x} (skips the 24 byte hole)", addr(bigger));
  assert_eq!(addr(bigger), BOOT_HEAP_START + 88);

  unsafe {
    heap.free(second).unwrap();
    heap.free(bigger).unwrap();
  }
  print_free_list("2", &heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) Fragment the heap, then free everything and watch it coalesce.
  // --------------------------------------------------------------------
  let blocks: Vec<_> = (1..=8).map(|i| heap.allocate(i * 24).unwrap()).collect();
  for ptr in blocks.iter().step_by(2) {
    unsafe { heap.free(*ptr) }.unwrap();
  }
  print_free_list("3 fragmented", &heap);
  println!("[3] {:?}", heap.stats());

  for ptr in blocks.iter().skip(1).step_by(2) {
    unsafe { heap.free(*ptr) }.unwrap();
  }
  print_free_list("3 coalesced", &heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) The locked kernel wrapper over a second region. Running it dry is
  //    fatal, which hosted means a panic.
  // --------------------------------------------------------------------
  drop(heap);
  drop(region);

  let region = MappedRegion::anywhere(BOOT_HEAP_SIZE).unwrap();
  let kernel = KernelHeap::new();
  unsafe { kernel.init(region.start(), region.len()) };
  kernel.self_test();

  let ptr = kernel.alloc(1024);
  println!("\n[4] kernel alloc(1024) = {:#x}", addr(ptr));
  unsafe { kernel.free(ptr) };
  println!("[4] {:?}", kernel.stats());

  println!("\n[5] End of example.");
}
