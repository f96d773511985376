//! In-place block headers and the operations that keep the chain consistent.
//!
//! Every raw address computation of the heap lives here: the rest of the
//! crate only moves `*mut Block` values around.

use std::mem;

/// Bytes occupied by a header in front of each payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// No block, free or used, ever carries a smaller payload.
pub const BLOCK_MIN_CAPACITY: usize = 24;

#[repr(C)]
pub struct Block {
  /// Payload bytes following the header.
  pub capacity: usize,
  /// Next block in the chain. Not necessarily adjacent in memory.
  pub next: *mut Block,
  pub is_free: bool,
}

impl Block {
  pub fn new(
    capacity: usize,
    is_free: bool,
    next: *mut Block,
  ) -> Self {
    Self {
      capacity,
      is_free,
      next,
    }
  }

  /// Writes a free header at `addr` spanning `size` bytes, header included.
  ///
  /// # Safety
  ///
  /// `addr` must be word aligned and valid for writes of `size` bytes, and
  /// `size` must be at least [`HEADER_SIZE`].
  pub unsafe fn init(
    addr: *mut u8,
    size: usize,
    next: *mut Block,
  ) -> *mut Block {
    let block = addr as *mut Block;
    unsafe { block.write(Block::new(capacity_from_size(size), true, next)) };
    block
  }
}

pub const fn size_from_capacity(capacity: usize) -> usize {
  capacity + HEADER_SIZE
}

pub const fn capacity_from_size(size: usize) -> usize {
  size - HEADER_SIZE
}

/// Payload address of `block`.
///
/// # Safety
///
/// `block` must point to a live header.
pub unsafe fn contents(block: *mut Block) -> *mut u8 {
  unsafe { (block as *mut u8).add(HEADER_SIZE) }
}

/// Header owning the payload at `contents`.
///
/// # Safety
///
/// `contents` must have been produced by [`contents`].
pub unsafe fn header_of(contents: *mut u8) -> *mut Block {
  unsafe { contents.sub(HEADER_SIZE) as *mut Block }
}

/// First address past the payload of `block`.
///
/// # Safety
///
/// `block` must point to a live header.
pub unsafe fn block_after(block: *const Block) -> *mut u8 {
  unsafe { (block as *mut u8).wrapping_add(size_from_capacity((*block).capacity)) }
}

/// # Safety
///
/// `fst` must point to a live header.
pub unsafe fn blocks_continuous(
  fst: *const Block,
  snd: *const Block,
) -> bool {
  unsafe { snd as *mut u8 == block_after(fst) }
}

/// # Safety
///
/// Both pointers must point to live headers.
pub unsafe fn mergeable(
  fst: *const Block,
  snd: *const Block,
) -> bool {
  unsafe { (*fst).is_free && (*snd).is_free && blocks_continuous(fst, snd) }
}

unsafe fn splittable(
  block: *const Block,
  query: usize,
) -> bool {
  unsafe { (*block).is_free && query + HEADER_SIZE + BLOCK_MIN_CAPACITY <= (*block).capacity }
}

/// Shrinks a free `block` to exactly `query` bytes and turns the rest into a
/// new free block linked right after it.
///
/// Nothing happens when the remainder could not hold a header plus
/// [`BLOCK_MIN_CAPACITY`] bytes; the caller then gets the whole block.
///
/// # Safety
///
/// `block` must be null or point to a live header, and `query` must be word
/// aligned.
pub unsafe fn split_if_too_big(
  block: *mut Block,
  query: usize,
) -> bool {
  unsafe {
    if block.is_null() || !splittable(block, query) {
      return false;
    }

    let tail = Block::init(contents(block).add(query), (*block).capacity - query, (*block).next);
    (*block).next = tail;
    (*block).capacity = query;

    log::trace!("[heap] split {:p} at {} bytes, tail {:p} ({} bytes)", block, query, tail, (*tail).capacity);

    true
  }
}

/// Absorbs `block.next` when both are free and adjacent in memory.
///
/// Returns `false` without touching anything otherwise, so callers loop on it
/// to swallow a whole run of free neighbours.
///
/// # Safety
///
/// `block` must be null or point to a live header whose chain is intact.
pub unsafe fn try_merge_with_next(block: *mut Block) -> bool {
  unsafe {
    if block.is_null() {
      return false;
    }

    let next = (*block).next;
    if next.is_null() || !mergeable(block, next) {
      return false;
    }

    (*block).capacity += size_from_capacity((*next).capacity);
    (*block).next = (*next).next;

    log::trace!("[heap] merged {:p} into {:p}, capacity {}", next, block, (*block).capacity);

    true
  }
}

#[cfg(test)]
mod tests {
  use std::ptr;

  use test_env_log::test;

  use super::*;

  const ARENA_SIZE: usize = 4096;

  /// Word-aligned scratch memory holding a single free block.
  fn arena() -> Vec<u64> {
    vec![0u64; ARENA_SIZE / mem::size_of::<u64>()]
  }

  unsafe fn chain_len(mut block: *mut Block) -> usize {
    let mut len = 0;
    while !block.is_null() {
      len += 1;
      block = unsafe { (*block).next };
    }
    len
  }

  #[test]
  fn test_size_conversions() {
    assert_eq!(capacity_from_size(size_from_capacity(512)), 512);
    assert_eq!(size_from_capacity(0), HEADER_SIZE);
    assert_eq!(HEADER_SIZE % mem::align_of::<Block>(), 0);
  }

  #[test]
  fn test_header_contents_roundtrip() {
    let mut memory = arena();

    unsafe {
      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());

      assert_eq!((*block).capacity, ARENA_SIZE - HEADER_SIZE);
      assert!((*block).is_free);
      assert_eq!(contents(block), (block as *mut u8).add(HEADER_SIZE));
      assert_eq!(header_of(contents(block)), block);
      assert_eq!(block_after(block), (block as *mut u8).add(ARENA_SIZE));
    }
  }

  #[test]
  fn test_split() {
    let mut memory = arena();

    unsafe {
      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());
      let capacity = (*block).capacity;

      assert!(split_if_too_big(block, 512));

      let tail = (*block).next;
      assert_eq!((*block).capacity, 512);
      assert_eq!(tail as *mut u8, contents(block).add(512));
      assert!(blocks_continuous(block, tail));
      assert!((*tail).is_free);
      assert_eq!((*tail).capacity, capacity - 512 - HEADER_SIZE);
      assert!((*tail).next.is_null());
    }
  }

  #[test]
  fn test_split_keeps_min_capacity() {
    let mut memory = arena();

    unsafe {
      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());
      let capacity = (*block).capacity;

      // One word short of room for a minimal tail.
      let too_big = capacity - HEADER_SIZE - BLOCK_MIN_CAPACITY + 8;
      assert!(!split_if_too_big(block, too_big));
      assert_eq!((*block).capacity, capacity);
      assert!((*block).next.is_null());

      let exact = capacity - HEADER_SIZE - BLOCK_MIN_CAPACITY;
      assert!(split_if_too_big(block, exact));
      assert_eq!((*(*block).next).capacity, BLOCK_MIN_CAPACITY);
    }
  }

  #[test]
  fn test_split_ignores_used_and_null() {
    let mut memory = arena();

    unsafe {
      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());
      (*block).is_free = false;

      assert!(!split_if_too_big(block, 64));
      assert!(!split_if_too_big(ptr::null_mut(), 64));
      assert_eq!((*block).capacity, ARENA_SIZE - HEADER_SIZE);
    }
  }

  #[test]
  fn test_merge_run() {
    let mut memory = arena();

    unsafe {
      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());

      let mut current = block;
      for query in [128, 256, 64, 512] {
        assert!(split_if_too_big(current, query));
        current = (*current).next;
      }
      assert_eq!(chain_len(block), 5);

      let mut capacities = 0;
      let mut walk = block;
      while !walk.is_null() {
        capacities += (*walk).capacity;
        walk = (*walk).next;
      }

      while try_merge_with_next(block) {}

      assert_eq!(chain_len(block), 1);
      assert_eq!((*block).capacity, capacities + 4 * HEADER_SIZE);
      assert_eq!((*block).capacity, ARENA_SIZE - HEADER_SIZE);

      assert!(!try_merge_with_next(block));
      assert_eq!((*block).capacity, ARENA_SIZE - HEADER_SIZE);
    }
  }

  #[test]
  fn test_merge_requires_both_free() {
    let mut memory = arena();

    unsafe {
      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());
      assert!(split_if_too_big(block, 256));
      let tail = (*block).next;

      (*tail).is_free = false;
      assert!(!try_merge_with_next(block));

      (*tail).is_free = true;
      (*block).is_free = false;
      assert!(!try_merge_with_next(block));
      assert_eq!((*block).next, tail);
    }
  }

  #[test]
  fn test_merge_requires_adjacency() {
    let mut first = arena();
    let mut second = arena();

    unsafe {
      let far = Block::init(second.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());
      let block = Block::init(first.as_mut_ptr() as *mut u8, ARENA_SIZE, far);

      assert!(!blocks_continuous(block, far));
      assert!(!try_merge_with_next(block));
      assert_eq!((*block).capacity, ARENA_SIZE - HEADER_SIZE);
      assert_eq!((*block).next, far);
    }
  }

  #[test]
  fn test_merge_null() {
    let mut memory = arena();

    unsafe {
      assert!(!try_merge_with_next(ptr::null_mut()));

      let block = Block::init(memory.as_mut_ptr() as *mut u8, ARENA_SIZE, ptr::null_mut());
      assert!(!try_merge_with_next(block));
    }
  }
}
