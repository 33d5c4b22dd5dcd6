//! # Storage Module
//!
//! This module provides the foundational storage layer for dendb: raw page
//! I/O against the single backing file, the free-page allocator, and the
//! page-0 meta header.
//!
//! ## Page Addressing
//!
//! The database file is a flat array of fixed-size pages:
//!
//! ```text
//! Offset 0:              Page 0 (meta)
//! Offset page_size:      Page 1
//! Offset 2 * page_size:  Page 2
//! ...
//! ```
//!
//! Page numbers are 64-bit and never reinterpreted; a page is read or
//! written in full with positional I/O, so concurrent readers need no seek
//! coordination.
//!
//! ## Page Size
//!
//! The page size is chosen when the file is created (default 4096, matching
//! the common host memory page size) and is immutable for the life of the
//! file. The format carries no page-size field, so the same size must be
//! supplied when reopening.
//!
//! ## Free List
//!
//! Released pages are tracked in memory as a LIFO stack plus a `max_page`
//! watermark, and persisted to a single page whose number is recorded in
//! meta. Allocation prefers released pages; the file only grows when the
//! stack is empty.
//!
//! ## Fill Policy
//!
//! The pager also owns the node fill policy, since the thresholds derive
//! from the page size alone:
//!
//! ```text
//! min_threshold = floor(0.5  * page_size)
//! max_threshold = floor(0.95 * page_size)
//! ```
//!
//! A non-root node whose estimated size leaves `[min, max]` is rebalanced
//! by the tree layer (split when over, rotate/merge when under).

mod freelist;
mod meta;
mod pager;

pub use freelist::Freelist;
pub use meta::{Meta, META_SIZE};
pub use pager::{Page, Pager};

/// Page number of the meta page.
pub const META_PAGE_NUMBER: u64 = 0;

/// Identifies a dendb file; the first four bytes of page 0.
pub const META_MAGIC: u32 = 0xD00D_B00D;

/// Size in bytes of a page number on disk.
pub const PAGE_NUMBER_SIZE: usize = 8;

/// Default page size for newly created databases.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size that can hold the meta header, the free-list header,
/// and a one-item node.
pub const MIN_PAGE_SIZE: usize = 64;

/// A node may not grow past this fraction of a page.
pub const MAX_FILL_PERCENT: f32 = 0.95;

/// A non-root node may not shrink below this fraction of a page.
pub const MIN_FILL_PERCENT: f32 = 0.5;
