//! # Pager
//!
//! Raw page I/O against the backing file. A [`Page`] is a page-sized byte
//! buffer tagged with its page number; the [`Pager`] reads and writes pages
//! at `offset = page_number * page_size` with positional I/O.
//!
//! Reads take `&self`: `read_exact_at` carries its own offset, so any number
//! of read transactions can pull pages concurrently without a lock around
//! the file handle. Writes happen only under the database's writer lock.
//!
//! The pager also evaluates the fill policy (min/max thresholds derived
//! from the page size); the tree layer asks it where to split and when to
//! rebalance.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use super::{MAX_FILL_PERCENT, MIN_FILL_PERCENT, MIN_PAGE_SIZE};

/// The smallest unit of data exchanged between the database and the disk.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u64,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct Pager {
    file: File,
    page_size: usize,
}

impl Pager {
    /// Opens an existing database file.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        validate_page_size(page_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty database file '{}'",
            path.display()
        );

        ensure!(
            file_size % page_size as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            page_size
        );

        Ok(Self { file, page_size })
    }

    /// Creates a new, empty database file.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        validate_page_size(page_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create database file '{}'", path.display()))?;

        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns a zeroed page buffer bound to the given page number.
    pub fn allocate_page(&self, number: u64) -> Page {
        Page {
            number,
            data: vec![0u8; self.page_size],
        }
    }

    pub fn read_page(&self, number: u64) -> Result<Page> {
        let mut page = self.allocate_page(number);
        let offset = number * self.page_size as u64;

        self.file
            .read_exact_at(&mut page.data, offset)
            .wrap_err_with(|| {
                format!(
                    "failed to read page {} ({} bytes at offset {})",
                    number, self.page_size, offset
                )
            })?;

        Ok(page)
    }

    pub fn write_page(&self, page: &Page) -> Result<()> {
        ensure!(
            page.data.len() == self.page_size,
            "page {} buffer is {} bytes, expected page size {}",
            page.number,
            page.data.len(),
            self.page_size
        );

        let offset = page.number * self.page_size as u64;

        self.file
            .write_all_at(&page.data, offset)
            .wrap_err_with(|| {
                format!(
                    "failed to write page {} ({} bytes at offset {})",
                    page.number, self.page_size, offset
                )
            })
    }

    /// Flushes written pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_data()
            .wrap_err("failed to sync database file")
    }

    /// Largest estimated node size before a node counts as over-populated.
    pub fn max_threshold(&self) -> usize {
        (MAX_FILL_PERCENT * self.page_size as f32) as usize
    }

    /// Smallest estimated node size before a node counts as under-populated.
    pub fn min_threshold(&self) -> usize {
        (MIN_FILL_PERCENT * self.page_size as f32) as usize
    }
}

fn validate_page_size(page_size: usize) -> Result<()> {
    ensure!(
        page_size >= MIN_PAGE_SIZE,
        "page size {} is below the minimum of {}",
        page_size,
        MIN_PAGE_SIZE
    );
    ensure!(
        page_size - 1 <= u16::MAX as usize,
        "page size {} cannot be addressed by 16-bit slot offsets",
        page_size
    );
    Ok(())
}
