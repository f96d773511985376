use std::{io, marker::PhantomData, ptr::NonNull};

use crate::{
  align,
  block::{
    BLOCK_MIN_CAPACITY, Block, HEADER_SIZE, block_after, blocks_continuous, contents, header_of, size_from_capacity,
    split_if_too_big, try_merge_with_next,
  },
  config::HeapConfig,
  error::{HeapError, Result},
  region,
};

/// Larger queries are refused before any size arithmetic can overflow.
const MAX_QUERY: usize = isize::MAX as usize / 2;

/// Outcome of a walk over the block chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
  /// A free block with enough capacity, after coalescing.
  Found(*mut Block),
  /// No fit; carries the last block of the chain.
  ReachedEnd(*mut Block),
  Corrupted,
}

/// First-fit walk from `block`.
///
/// Each free block swallows its free successors before its capacity is
/// compared to `query`, so the size tested is the whole contiguous free run
/// starting there. This is the only place where predecessors of a released
/// block get merged.
///
/// # Safety
///
/// `block` must be null or the head of an intact chain.
pub unsafe fn find_good_or_last(
  mut block: *mut Block,
  query: usize,
) -> SearchResult {
  unsafe {
    if block.is_null() {
      return SearchResult::Corrupted;
    }

    loop {
      if (*block).is_free {
        while try_merge_with_next(block) {}

        if (*block).capacity >= query {
          return SearchResult::Found(block);
        }
      }

      if (*block).next.is_null() {
        return SearchResult::ReachedEnd(block);
      }

      block = (*block).next;
    }
  }
}

/// Searches from `block` and, on success, carves the block down to `query`
/// and marks it used. Never grows the heap.
unsafe fn try_memalloc_existing(
  query: usize,
  block: *mut Block,
) -> SearchResult {
  unsafe {
    let result = find_good_or_last(block, query);

    if let SearchResult::Found(found) = result {
      split_if_too_big(found, query);
      (*found).is_free = false;
    }

    result
  }
}

/// Maps a new region right after `last` and links it in.
///
/// Returns `last` itself when the region landed contiguously and could be
/// merged, otherwise the block heading the new region.
///
/// # Safety
///
/// `last` must be the final block of an intact chain.
pub unsafe fn grow_heap(
  last: *mut Block,
  query: usize,
  config: &HeapConfig,
) -> Result<*mut Block> {
  unsafe {
    let region = region::acquire(block_after(last), query, config.min_region_size)?;
    let block = region.addr as *mut Block;

    (*last).next = block;

    if try_merge_with_next(last) {
      log::debug!("[heap] grew {:p} in place to {} bytes", last, (*last).capacity);
      Ok(last)
    } else {
      log::debug!("[heap] new segment {:p} ({} bytes) after {:p}", block, region.size, last);
      Ok(block)
    }
  }
}

/// Finds or makes room for `query` bytes in the chain starting at
/// `heap_start` and returns the now used block.
///
/// # Safety
///
/// `heap_start` must be null or the head of an intact chain.
pub unsafe fn memalloc(
  heap_start: *mut Block,
  query: usize,
  config: &HeapConfig,
) -> Result<*mut Block> {
  if query > MAX_QUERY {
    return Err(HeapError::MapFailed {
      size: query,
      source: io::Error::from(io::ErrorKind::OutOfMemory),
    });
  }

  let query = align!(query).max(BLOCK_MIN_CAPACITY);

  unsafe {
    match try_memalloc_existing(query, heap_start) {
      SearchResult::Found(block) => Ok(block),
      SearchResult::ReachedEnd(last) => {
        let anchor = grow_heap(last, query, config)?;

        match try_memalloc_existing(query, anchor) {
          SearchResult::Found(block) => Ok(block),
          _ => {
            log::warn!("[heap] no block for {} bytes after growth from {:p}", query, anchor);
            Err(HeapError::Exhausted { query })
          }
        }
      }
      SearchResult::Corrupted => {
        log::warn!("[heap] corrupted chain while looking for {} bytes", query);
        Err(HeapError::Corrupted)
      }
    }
  }
}

/// A heap made of anonymous mappings, threaded by one block chain.
///
/// The chain starts at the first region and never moves. Dropping the heap
/// unmaps every region, so no pointer handed out may be used afterwards.
///
/// ```text
///   region 1 (extended in place)                      region 2 (disjoint)
///   ┌────────┬───────┬────────┬────────────────────┐   ┌────────┬──────────┐
///   │ hdr|A  │ hdr|B │ hdr|C  │ hdr|   free        │ → │ hdr|D  │ hdr|free │
///   └────────┴───────┴────────┴────────────────────┘   └────────┴──────────┘
/// ```
pub struct Heap {
  start: *mut Block,
  config: HeapConfig,
}

impl Heap {
  /// Maps the first region, able to hold at least `initial` bytes, at the
  /// default preferred address.
  pub fn init(initial: usize) -> Result<Self> {
    Self::with_config(initial, HeapConfig::default())
  }

  pub fn with_config(
    initial: usize,
    config: HeapConfig,
  ) -> Result<Self> {
    let region = region::acquire(config.preferred_start as *const u8, initial, config.min_region_size)?;

    log::debug!("[heap] initialised at {:p} with {} bytes", region.addr, region.size);

    Ok(Self {
      start: region.addr as *mut Block,
      config,
    })
  }

  /// Base of the first region, which is also the head of the chain.
  pub fn base(&self) -> *mut u8 {
    self.start as *mut u8
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  /// Returns a payload of at least `n` bytes, growing the heap if needed.
  pub fn allocate(
    &mut self,
    n: usize,
  ) -> Result<NonNull<u8>> {
    let block = unsafe { memalloc(self.start, n, &self.config) }?;
    let payload = unsafe { contents(block) };

    log::trace!("[heap] allocate({}) -> {:p}", n, payload);

    NonNull::new(payload).ok_or(HeapError::Corrupted)
  }

  /// Like [`Heap::allocate`], but reports failure as a null pointer.
  pub fn allocate_bytes(
    &mut self,
    n: usize,
  ) -> *mut u8 {
    match self.allocate(n) {
      Ok(payload) => payload.as_ptr(),
      Err(err) => {
        log::warn!("[heap] allocate({}) -> NULL: {}", n, err);
        std::ptr::null_mut()
      }
    }
  }

  /// Frees the block behind `payload` and merges it with the free blocks
  /// directly following it. Free predecessors are left alone until the next
  /// search walks over them.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a pointer returned by this heap that has not
  /// been released yet.
  pub unsafe fn release(
    &mut self,
    payload: *mut u8,
  ) {
    if payload.is_null() {
      return;
    }

    unsafe {
      let block = header_of(payload);
      (*block).is_free = true;

      while try_merge_with_next(block) {}

      log::trace!("[heap] release({:p}) -> {} bytes free", payload, (*block).capacity);
    }
  }

  /// Walks the chain in link order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.start,
      _heap: PhantomData,
    }
  }

  /// Writes one line per block: header address, capacity and status.
  pub fn dump<W: io::Write>(
    &self,
    out: &mut W,
  ) -> io::Result<()> {
    writeln!(out, " --- Heap ---")?;
    writeln!(out, "{:>18} {:>10} {:>8}", "start", "capacity", "status")?;

    for block in self.blocks() {
      writeln!(
        out,
        "{:>18p} {:>10} {:>8}",
        block.addr,
        block.capacity,
        if block.is_free { "free" } else { "taken" }
      )?;
    }

    Ok(())
  }
}

impl Drop for Heap {
  fn drop(&mut self) {
    unsafe {
      let mut segment = self.start;

      while !segment.is_null() {
        let mut end = segment;
        while !(*end).next.is_null() && blocks_continuous(end, (*end).next) {
          end = (*end).next;
        }

        let next = (*end).next;
        let size = block_after(end) as usize - segment as usize;

        log::debug!("[heap] unmapping {} bytes at {:p}", size, segment);
        region::release_pages(segment as *mut u8, size);

        segment = next;
      }
    }
  }
}

/// Snapshot of one block, as seen by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Header address.
  pub addr: *mut u8,
  /// Payload address, as returned by [`Heap::allocate`].
  pub contents: *mut u8,
  pub capacity: usize,
  pub is_free: bool,
}

impl BlockInfo {
  /// Bytes spanned by the block, header included.
  pub fn size(&self) -> usize {
    size_from_capacity(self.capacity)
  }
}

pub struct Blocks<'a> {
  current: *mut Block,
  _heap: PhantomData<&'a Heap>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    let block = self.current;
    unsafe {
      self.current = (*block).next;

      Some(BlockInfo {
        addr: block as *mut u8,
        contents: (block as *mut u8).add(HEADER_SIZE),
        capacity: (*block).capacity,
        is_free: (*block).is_free,
      })
    }
  }
}
