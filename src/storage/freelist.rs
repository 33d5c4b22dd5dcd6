//! # Free List
//!
//! Tracks which pages of the file are available for reuse. Two pieces of
//! state: a `max_page` watermark (the highest page number ever handed out)
//! and a stack of released page numbers. Allocation pops the stack when it
//! can, so recently freed pages are reused first and the file does not
//! fragment; only when the stack is empty does the watermark advance and
//! the file grow.
//!
//! ## Page Layout
//!
//! The free list persists to a single page, recorded in meta:
//!
//! ```text
//! Offset  Size   Description
//! ------  -----  --------------------------------
//! 0       8      max_page watermark
//! 8       8      count of released page numbers
//! 16      8*N    released page numbers, LIFO order
//! ```
//!
//! All fields little-endian. Serialization fails if the released list no
//! longer fits in one page.
//!
//! Releasing the same page twice is a caller error; the list does not
//! deduplicate.

use eyre::{ensure, Result};

use super::PAGE_NUMBER_SIZE;

const FREELIST_HEADER_SIZE: usize = 2 * PAGE_NUMBER_SIZE;

#[derive(Debug, Clone, Default)]
pub struct Freelist {
    max_page: u64,
    released_pages: Vec<u64>,
}

impl Freelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a released page number, or advances the watermark when none
    /// are available.
    pub fn next_page(&mut self) -> u64 {
        if let Some(page) = self.released_pages.pop() {
            return page;
        }

        self.max_page += 1;
        self.max_page
    }

    /// Marks the given page as free for reuse.
    pub fn release_page(&mut self, number: u64) {
        self.released_pages.push(number);
    }

    pub fn max_page(&self) -> u64 {
        self.max_page
    }

    pub fn released_pages(&self) -> &[u64] {
        &self.released_pages
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        let needed = FREELIST_HEADER_SIZE + self.released_pages.len() * PAGE_NUMBER_SIZE;
        ensure!(
            needed <= buf.len(),
            "free list with {} released pages needs {} bytes, page holds {}",
            self.released_pages.len(),
            needed,
            buf.len()
        );

        buf[0..8].copy_from_slice(&self.max_page.to_le_bytes());
        buf[8..16].copy_from_slice(&(self.released_pages.len() as u64).to_le_bytes());

        let mut pos = FREELIST_HEADER_SIZE;
        for page in &self.released_pages {
            buf[pos..pos + PAGE_NUMBER_SIZE].copy_from_slice(&page.to_le_bytes());
            pos += PAGE_NUMBER_SIZE;
        }

        Ok(())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        ensure!(
            buf.len() >= FREELIST_HEADER_SIZE,
            "buffer too small for free-list header: {} < {}",
            buf.len(),
            FREELIST_HEADER_SIZE
        );

        let max_page = u64::from_le_bytes(buf[0..8].try_into().expect("slice is 8 bytes"));
        let count = u64::from_le_bytes(buf[8..16].try_into().expect("slice is 8 bytes")) as usize;

        ensure!(
            FREELIST_HEADER_SIZE + count * PAGE_NUMBER_SIZE <= buf.len(),
            "corrupt free list: {} entries do not fit in a {}-byte page",
            count,
            buf.len()
        );

        let mut released_pages = Vec::with_capacity(count);
        let mut pos = FREELIST_HEADER_SIZE;
        for _ in 0..count {
            released_pages.push(u64::from_le_bytes(
                buf[pos..pos + PAGE_NUMBER_SIZE]
                    .try_into()
                    .expect("slice is 8 bytes"),
            ));
            pos += PAGE_NUMBER_SIZE;
        }

        Ok(Self {
            max_page,
            released_pages,
        })
    }
}
