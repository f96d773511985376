//! Anonymous page mappings that back the heap.

use std::{io, ptr};

use libc::c_void;

use crate::{
  align_to,
  block::{Block, size_from_capacity},
  error::{HeapError, Result},
};

/// Outcome of one successful [`acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub addr: *mut u8,
  pub size: usize,
  /// The mapping starts exactly at the requested address.
  pub extends: bool,
}

pub fn page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    size if size > 0 => size as usize,
    _ => 4096,
  }
}

pub fn round_pages(bytes: usize) -> usize {
  align_to!(bytes, page_size())
}

/// Bytes actually mapped for a request of `bytes`.
pub fn region_actual_size(
  bytes: usize,
  min_region_size: usize,
) -> usize {
  round_pages(bytes).max(round_pages(min_region_size))
}

unsafe fn map_pages(
  addr: *const u8,
  length: usize,
  additional_flags: libc::c_int,
) -> *mut c_void {
  unsafe {
    libc::mmap(
      addr as *mut c_void,
      length,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | additional_flags,
      -1,
      0,
    )
  }
}

/// Maps a region able to hold a block of `query` payload bytes, preferably
/// at `preferred`, and initialises it as one free block.
///
/// The preferred address is tried without clobbering existing mappings. If it
/// is taken, the same size is mapped wherever the OS sees fit.
pub fn acquire(
  preferred: *const u8,
  query: usize,
  min_region_size: usize,
) -> Result<Region> {
  let size = region_actual_size(size_from_capacity(query), min_region_size);

  let mut addr = unsafe { map_pages(preferred, size, libc::MAP_FIXED_NOREPLACE) };
  if addr == libc::MAP_FAILED {
    log::debug!(
      "[region] {:p} unavailable ({}), falling back",
      preferred,
      io::Error::last_os_error()
    );

    addr = unsafe { map_pages(ptr::null(), size, 0) };
    if addr == libc::MAP_FAILED {
      let source = io::Error::last_os_error();
      log::warn!("[region] failed to map {} bytes: {}", size, source);
      return Err(HeapError::MapFailed { size, source });
    }
  }

  let addr = addr as *mut u8;
  unsafe { Block::init(addr, size, ptr::null_mut()) };

  let region = Region {
    addr,
    size,
    extends: addr as *const u8 == preferred,
  };

  log::debug!(
    "[region] mapped {} bytes at {:p} (wanted {:p}, extends = {})",
    size,
    addr,
    preferred,
    region.extends
  );

  Ok(region)
}

/// Unmaps `size` bytes at `addr`.
///
/// # Safety
///
/// The range must be page aligned and nothing may reference it afterwards.
pub(crate) unsafe fn release_pages(
  addr: *mut u8,
  size: usize,
) {
  if unsafe { libc::munmap(addr as *mut c_void, size) } != 0 {
    log::warn!(
      "[region] failed to unmap {} bytes at {:p}: {}",
      size,
      addr,
      io::Error::last_os_error()
    );
  }
}

#[cfg(test)]
mod tests {
  use test_env_log::test;

  use super::*;
  use crate::block::{BLOCK_MIN_CAPACITY, HEADER_SIZE};

  const PREFERRED: usize = 0x6100_0000;

  #[test]
  fn test_region_actual_size() {
    let page = page_size();

    assert_eq!(region_actual_size(1, 0), page);
    assert_eq!(region_actual_size(page + 1, 0), 2 * page);
    assert_eq!(region_actual_size(1, 2 * 4096), round_pages(2 * 4096));
    assert_eq!(region_actual_size(10 * page, 2 * 4096), 10 * page);
  }

  #[test]
  fn test_acquire_initialises_free_block() {
    let region = acquire(PREFERRED as *const u8, 16000, 2 * 4096).unwrap();

    assert_eq!(region.size % page_size(), 0);
    assert!(region.size >= 16000 + HEADER_SIZE);

    unsafe {
      let block = region.addr as *mut Block;
      assert!((*block).is_free);
      assert!((*block).next.is_null());
      assert_eq!((*block).capacity, region.size - HEADER_SIZE);

      release_pages(region.addr, region.size);
    }
  }

  #[test]
  fn test_acquire_falls_back_when_taken() {
    let preferred = (PREFERRED + 0x0010_0000) as *const u8;
    let first = acquire(preferred, BLOCK_MIN_CAPACITY, 0).unwrap();
    let second = acquire(first.addr, BLOCK_MIN_CAPACITY, 0).unwrap();

    assert!(!second.extends);
    assert_ne!(second.addr, first.addr);

    unsafe {
      release_pages(first.addr, first.size);
      release_pages(second.addr, second.size);
    }
  }
}
