use std::io;

use thiserror::Error;

/// Heap failures. Every failed call leaves the block chain untouched.
#[derive(Debug, Error)]
pub enum HeapError {
  /// Both the fixed-address and the OS-chosen mapping were refused.
  #[error("failed to map a region of {size} bytes: {source}")]
  MapFailed {
    size: usize,
    #[source]
    source: io::Error,
  },

  /// The heap grew but the retried search still found no fitting block.
  #[error("no block of {query} bytes after heap growth")]
  Exhausted { query: usize },

  #[error("block chain is corrupted")]
  Corrupted,
}

pub type Result<T> = core::result::Result<T, HeapError>;
