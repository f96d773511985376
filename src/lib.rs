//! # mmheap - A Page-Mapped First-Fit Heap
//!
//! This crate provides a **first-fit heap** that owns its memory: it maps
//! anonymous pages with `mmap(2)` and threads them with a chain of in-place
//! block headers, instead of delegating to the platform allocator.
//!
//! ## Overview
//!
//! ```text
//!   Heap Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         MAPPED REGION                                │
//!   │                                                                      │
//!   │   ┌─────┬─────┬──────┬─────┬──────────────────────────────────────┐  │
//!   │   │ A1  │ A2  │ free │ A4  │            free (tail)               │  │
//!   │   └──┬──┴──┬──┴───┬──┴──┬──┴──────────────────────────────────────┘  │
//!   │      └─────┴──────┴─────┴──▶ next links, in address order            │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   A request takes the first free block that fits, after merging it with
//!   the free blocks right behind it. Oversized blocks are split.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   mmheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header, split and merge
//!   ├── config     - HeapConfig
//!   ├── error      - HeapError
//!   ├── heap       - Search, growth, Heap entry points, diagnostics
//!   └── region     - mmap-backed regions
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mmheap::Heap;
//!
//! fn main() -> mmheap::Result<()> {
//!     let mut heap = Heap::init(16000)?;
//!
//!     let ptr = heap.allocate(512)?.as_ptr();
//!     unsafe {
//!         ptr.write_bytes(0xAB, 512);
//!         heap.release(ptr);
//!     }
//!
//!     heap.dump(&mut std::io::stdout()).ok();
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! Each block carries its own header:
//!
//! ```text
//!   Single Block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         Payload                │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ capacity: N     │  │  ┌──────────────────────────┐  │
//!   │  │ next: null/ptr  │  │  │                          │  │
//!   │  │ is_free: bool   │  │  │     N bytes usable       │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │      24 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! When no block fits, a new region is mapped right after the last block:
//!
//! ```text
//!   Growth:
//!
//!   contiguous      ┌────────────┬──────────────┐
//!                   │ last(free) │ new region   │  → merged into `last`
//!                   └────────────┴──────────────┘
//!
//!   address taken   ┌────────────┬──────────┐        ┌──────────────┐
//!                   │ last       │ foreign  │  ...   │ new region   │
//!                   └─────┬──────┴──────────┘        └──────────────┘
//!                         └───────── next ─────────────▲
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Lazy backward merge**: a released block only merges with free blocks
//!   after it; free blocks before it are merged by the next search
//! - **No unmapping on release**: regions live until the [`Heap`] is dropped
//! - **Unix-only**: requires `libc` and `mmap` with `MAP_FIXED_NOREPLACE`
//!
//! ## Safety
//!
//! Releasing a pointer the heap did not hand out, or using a payload after
//! its release or after the heap is dropped, is undefined behavior.

pub mod align;
pub mod block;
pub mod config;
mod error;
mod heap;
pub mod region;

pub use config::HeapConfig;
pub use error::{HeapError, Result};
pub use heap::{BlockInfo, Blocks, Heap, SearchResult, find_good_or_last, grow_heap, memalloc};
