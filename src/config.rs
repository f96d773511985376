/// Address the first region is mapped at when nothing else lives there.
pub const HEAP_START: usize = 0x0404_0000;

/// Smallest region ever requested from the OS, in bytes.
pub const REGION_MIN_SIZE: usize = 2 * 4096;

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Preferred base of the first region. A hint: if the range is taken the
  /// OS picks another address.
  pub preferred_start: usize,
  /// Lower bound for every region size, rounded up to whole pages.
  pub min_region_size: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      preferred_start: HEAP_START,
      min_region_size: REGION_MIN_SIZE,
    }
  }
}

impl HeapConfig {
  pub fn with_preferred_start(
    mut self,
    preferred_start: usize,
  ) -> Self {
    self.preferred_start = preferred_start;
    self
  }

  pub fn with_min_region_size(
    mut self,
    min_region_size: usize,
  ) -> Self {
    self.min_region_size = min_region_size;
    self
  }
}
