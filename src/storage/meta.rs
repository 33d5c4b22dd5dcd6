//! # Meta Page
//!
//! Page 0 of every database file holds the meta header:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -------------------------------------------
//! 0       4     magic: 0xD00DB00D (little-endian)
//! 4       8     root_collections_page: root of the catalog tree
//! 12      8     freelist_page: where the free list is persisted
//! ```
//!
//! The rest of the page is zero padding. A magic mismatch means the file is
//! not a dendb database (or the header was overwritten); decoding fails and
//! the database is not opened.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::META_MAGIC;

pub const META_SIZE: usize = std::mem::size_of::<Meta>();

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Meta {
    magic: U32,
    root_collections_page: U64,
    freelist_page: U64,
}

const _: () = assert!(META_SIZE == 20);

impl Meta {
    pub fn new() -> Self {
        Self {
            magic: U32::new(META_MAGIC),
            root_collections_page: U64::new(0),
            freelist_page: U64::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= META_SIZE,
            "buffer too small for meta header: {} < {}",
            bytes.len(),
            META_SIZE
        );

        let meta = Self::read_from_bytes(&bytes[..META_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse meta header: {:?}", e))?;

        ensure!(
            meta.magic.get() == META_MAGIC,
            "not a dendb file: magic {:#010x} (expected {:#010x})",
            meta.magic.get(),
            META_MAGIC
        );

        Ok(meta)
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() >= META_SIZE,
            "buffer too small for meta header: {} < {}",
            buf.len(),
            META_SIZE
        );

        buf[..META_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn root_collections_page(&self) -> u64 {
        self.root_collections_page.get()
    }

    pub fn set_root_collections_page(&mut self, page: u64) {
        self.root_collections_page = U64::new(page);
    }

    pub fn freelist_page(&self) -> u64 {
        self.freelist_page.get()
    }

    pub fn set_freelist_page(&mut self, page: u64) {
        self.freelist_page = U64::new(page);
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::new()
    }
}
