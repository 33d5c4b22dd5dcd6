//! # Database Façade
//!
//! [`Database`] owns the backing file and the engine state (pager, meta,
//! free list) behind a readers–writer lock. Transactions borrow the lock:
//! any number of readers may be active at once, a writer is exclusive, and
//! `begin_write` blocks until every earlier transaction has finished.
//!
//! ## Opening
//!
//! `Database::open` creates the file on first use: it plants the free list
//! on the first allocated page, records it in meta, and writes both. On a
//! later open it re-reads meta (failing on a magic mismatch — the file is
//! not a database) and the persisted free list.
//!
//! ## Configuration
//!
//! The builder carries the one tunable, the page size:
//!
//! ```ignore
//! let db = Database::builder()
//!     .path("./den.db")
//!     .page_size(16384)
//!     .open()?;
//! ```
//!
//! The page size is fixed at creation and is not recorded in the file, so
//! reopening must supply the same value it was created with.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use parking_lot::RwLock;

use crate::storage::{Freelist, Meta, Pager, DEFAULT_PAGE_SIZE, META_PAGE_NUMBER};
use crate::tx::Tx;

/// Engine state shared by all transactions, guarded by the database lock.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) pager: Pager,
    pub(crate) meta: Meta,
    pub(crate) freelist: Freelist,
}

/// An open database file.
#[derive(Debug)]
pub struct Database {
    shared: RwLock<Shared>,
}

impl Database {
    /// Opens (or creates) a database with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder().path(path).open()
    }

    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder {
            path: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Starts a read transaction. Blocks while a writer is active.
    pub fn begin_read(&self) -> Tx<'_> {
        Tx::new_read(self.shared.read())
    }

    /// Starts the write transaction. Blocks until all other transactions
    /// have finished.
    pub fn begin_write(&self) -> Tx<'_> {
        Tx::new_write(self.shared.write())
    }

    /// Syncs and closes the database. Any state not committed beforehand
    /// is lost.
    pub fn close(self) -> Result<()> {
        self.shared.into_inner().pager.sync()
    }
}

/// Fluent configuration for opening a [`Database`].
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    page_size: usize,
}

impl DatabaseBuilder {
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Page size for a newly created file; must match the creation-time
    /// value when reopening an existing file.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn open(self) -> Result<Database> {
        let path = self.path.ok_or_else(|| eyre::eyre!("no database path configured"))?;

        let shared = if path.exists() {
            open_existing(&path, self.page_size)?
        } else {
            create_new(&path, self.page_size)?
        };

        Ok(Database {
            shared: RwLock::new(shared),
        })
    }
}

fn open_existing(path: &Path, page_size: usize) -> Result<Shared> {
    let pager = Pager::open(path, page_size)?;

    let meta_page = pager.read_page(META_PAGE_NUMBER)?;
    let meta = Meta::from_bytes(&meta_page.data)
        .wrap_err_with(|| format!("'{}' is not a usable database file", path.display()))?;

    ensure!(
        meta.freelist_page() != 0,
        "corrupt meta in '{}': no free-list page recorded",
        path.display()
    );

    let freelist_page = pager.read_page(meta.freelist_page())?;
    let freelist = Freelist::from_bytes(&freelist_page.data)
        .wrap_err_with(|| format!("failed to read free list from '{}'", path.display()))?;

    Ok(Shared {
        pager,
        meta,
        freelist,
    })
}

fn create_new(path: &Path, page_size: usize) -> Result<Shared> {
    let pager = Pager::create(path, page_size)?;

    let mut meta = Meta::new();
    let mut freelist = Freelist::new();
    meta.set_freelist_page(freelist.next_page());

    let mut freelist_page = pager.allocate_page(meta.freelist_page());
    freelist.write_to(&mut freelist_page.data)?;
    pager.write_page(&freelist_page)?;

    let mut meta_page = pager.allocate_page(META_PAGE_NUMBER);
    meta.write_to(&mut meta_page.data)?;
    pager.write_page(&meta_page)?;

    pager.sync()?;

    Ok(Shared {
        pager,
        meta,
        freelist,
    })
}
