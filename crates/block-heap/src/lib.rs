//! A simulated heap over a fixed-size byte arena.
//!
//! This crate implements the classical block-allocation techniques on a single
//! in-process arena: a ledger of free and allocated blocks, pluggable placement
//! strategies, splitting and coalescing, and sliding compaction as a fallback
//! when fragmentation prevents an allocation.
//!
//! # Architecture
//!
//! ```text
//!   allocate(size)
//!        │
//!        ▼
//!   ┌──────────┐  not found   ┌────────────┐
//!   │ Strategy │─────────────▶│ Compaction │──┐ retry once
//!   │  select  │◀─────────────┴────────────┘  │
//!   └────┬─────┘◀──────────────────────────────┘
//!        │ free record
//!        ▼
//!   ┌──────────┐      ┌────────────┐
//!   │  carve   │─────▶│ bookkeeping│────▶ Handle
//!   │ (split)  │      │ id, stats  │
//!   └──────────┘      └────────────┘
//! ```
//!
//! - The **arena** is a boxed byte slice divided into units of equal size.
//! - The **ledger** is an address-ordered chain of records, kept in a slot
//!   table apart from the arena, that covers every unit exactly once.
//! - A [`Strategy`] selects a free record: first-fit, best-fit or a simplified
//!   buddy scheme.
//! - Freeing a block merges it with the next block when that one is free;
//!   [`Heap::defragment`] merges all adjacent free blocks.
//! - [`Heap::compact`] slides allocated blocks down and leaves one trailing
//!   free block.
//!
//! # Usage
//!
//! ```
//! use block_heap::{Heap, HeapConfig, Strategy};
//!
//! let mut heap = Heap::new(HeapConfig::new(8 * 1024, 1024)).unwrap();
//!
//! let a = heap.allocate(3000).unwrap().unwrap(); // 3 units
//! let b = heap.allocate(2000).unwrap().unwrap(); // 2 units
//! heap.free(a).unwrap();
//!
//! // first-fit reuses the hole left by `a`
//! let c = heap.allocate(3000).unwrap().unwrap();
//! assert_eq!(c.unit_index(), 0);
//!
//! heap.set_strategy(Strategy::BuddyFit);
//! assert_eq!(heap.stats().allocation_count, 3);
//! assert_eq!(heap.leak_report().len(), 2);
//! # heap.free(b).unwrap();
//! # heap.free(c).unwrap();
//! ```
//!
//! # Thread Safety
//!
//! A [`Heap`] is a plain single-owner value: every operation takes `&self` or
//! `&mut self` and runs to completion. Sharing one between threads requires
//! wrapping the whole heap in a lock, since splitting and coalescing rewrite
//! the ledger links.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    config::{DEFAULT_CAPACITY_BYTES, DEFAULT_UNIT_BYTES, DEFAULT_UNIT_COUNT, HeapConfig},
    error::{ConfigError, FailureReason, HeapError},
    handle::Handle,
    heap::{BlockInfo, CompactionReport, Heap, Relocation},
    ledger::{AllocationId, AllocationMeta, SizeClass},
    stats::{HeapStats, LeakEntry, LeakReport},
    strategy::{ParseStrategyError, Strategy},
};

mod arena;
mod compact;
mod config;
mod error;
mod handle;
mod heap;
mod ledger;
mod stats;
mod strategy;
