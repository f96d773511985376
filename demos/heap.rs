use std::io;

use mmheap::{Heap, HeapConfig};

const SIZE_OF_HEAP: usize = 16000;

/// Prints a progress line and, when given, the current state of the heap.
fn debug(
  test: usize,
  message: &str,
  heap: Option<&Heap>,
) {
  println!("[Test {}: {}]", test, message);
  if let Some(heap) = heap {
    let _ = heap.dump(&mut io::stdout());
  }
}

/// Each scenario gets its own preferred address so the heaps never touch.
fn create_heap(test: usize) -> Option<Heap> {
  let config = HeapConfig::default().with_preferred_start(0x0404_0000 + test * 0x0100_0000);

  match Heap::with_config(SIZE_OF_HEAP, config) {
    Ok(heap) => Some(heap),
    Err(err) => {
      debug(test, &format!("result: failed ({})", err), None);
      None
    }
  }
}

fn allocate_many(
  test: usize,
  heap: &mut Heap,
) -> Option<Vec<*mut u8>> {
  let mut blocks = Vec::new();

  for _ in 0..5 {
    let block = heap.allocate_bytes(512);
    if block.is_null() {
      debug(test, "result: failed", Some(heap));
      return None;
    }
    blocks.push(block);
  }

  Some(blocks)
}

fn memory_allocate() {
  debug(1, "started", None);
  let Some(heap) = create_heap(1) else { return };
  debug(1, "result: success", Some(&heap));
}

fn free_one_block_from_many() {
  debug(2, "started", None);
  let Some(mut heap) = create_heap(2) else { return };
  let Some(blocks) = allocate_many(2, &mut heap) else { return };

  unsafe { heap.release(blocks[3]) };
  debug(2, "result: success", Some(&heap));
}

fn free_two_blocks_from_many() {
  debug(3, "started", None);
  let Some(mut heap) = create_heap(3) else { return };
  let Some(blocks) = allocate_many(3, &mut heap) else { return };

  unsafe {
    heap.release(blocks[1]);
    heap.release(blocks[3]);
  }
  debug(3, "result: success", Some(&heap));

  let reused = heap.allocate_bytes(512);
  println!("[Test 3: reused the lower block? {}]", reused == blocks[1]);
}

fn region_was_extended() {
  let Some(mut heap) = create_heap(4) else { return };
  debug(4, "started", Some(&heap));

  if heap.allocate_bytes(SIZE_OF_HEAP * 2).is_null() {
    debug(4, "result: failed", Some(&heap));
    return;
  }

  match heap.blocks().next() {
    Some(first) if first.capacity >= SIZE_OF_HEAP * 2 => debug(4, "result: success", Some(&heap)),
    _ => debug(4, "result: failed", Some(&heap)),
  }
}

fn new_region_is_far_from_here() {
  debug(5, "started", None);
  let Some(mut heap) = create_heap(5) else { return };

  let heap_end = heap.blocks().last().map(|block| unsafe { block.contents.add(block.capacity) });
  let Some(heap_end) = heap_end else { return };
  let firewall_size = mmheap::region::page_size();

  let firewall = unsafe {
    libc::mmap(
      heap_end as *mut libc::c_void,
      firewall_size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
      -1,
      0,
    )
  };
  if firewall == libc::MAP_FAILED {
    debug(5, "result: failed (firewall)", Some(&heap));
    return;
  }

  if heap.allocate_bytes(SIZE_OF_HEAP * 2).is_null() {
    debug(5, "result: failed", Some(&heap));
  } else {
    let mut blocks = heap.blocks();
    match (blocks.next(), blocks.next()) {
      (Some(first), Some(second)) if first.is_free && !second.is_free => debug(5, "result: success", Some(&heap)),
      _ => debug(5, "result: failed", Some(&heap)),
    }
  }

  unsafe { libc::munmap(firewall, firewall_size) };
}

fn main() {
  env_logger::init();

  memory_allocate();
  free_one_block_from_many();
  free_two_blocks_from_many();
  region_was_extended();
  new_region_is_far_from_here();
}
