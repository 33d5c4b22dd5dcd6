//! # dendb - Embedded Single-File Key/Value Store
//!
//! dendb stores named collections of key/value pairs in one file, organized
//! as a disk-resident B-tree with a free-page allocator and a transactional
//! façade that serializes writers while allowing concurrent readers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use dendb::Database;
//!
//! let db = Database::open("./den.db")?;
//!
//! let mut tx = db.begin_write();
//! let mut users = tx.create_collection(b"users")?;
//! users.put(&mut tx, b"alice", b"1")?;
//! tx.commit()?;
//!
//! let tx = db.begin_read();
//! let users = tx.get_collection(b"users")?.unwrap();
//! let item = users.find(&tx, b"alice")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Public API (Database)         │
//! ├─────────────────────────────────────┤
//! │  Transactions │ Named Collections   │
//! ├───────────────┴─────────────────────┤
//! │   B-Tree (search/split/rebalance)   │
//! ├─────────────────────────────────────┤
//! │   Slotted-Page Node Serialization   │
//! ├─────────────────────────────────────┤
//! │  Pager / Free List / Meta (page 0)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A database is a single file of fixed-size pages:
//!
//! ```text
//! Page 0:   meta (magic, root-collections page, free-list page)
//! Page k:   free list (page number recorded in meta)
//! Others:   B-tree nodes in slotted-page format
//! ```
//!
//! Collections are themselves records in a distinguished root collection
//! whose root page number lives in meta, so creating a collection is an
//! ordinary B-tree insert.
//!
//! ## Concurrency
//!
//! One writer, many readers. `begin_write` takes the write side of a
//! readers–writer lock and holds it until the transaction commits, rolls
//! back, or is dropped; readers share the read side. Readers therefore see
//! the most recently committed state and never a partial write.
//!
//! ## Durability
//!
//! Pages are written in place and the file is synced at commit. There is no
//! write-ahead log: a crash in the middle of a commit can leave a mix of old
//! and new pages. See DESIGN.md for the tradeoff discussion.
//!
//! ## Module Overview
//!
//! - [`storage`]: pager, free list, and the page-0 meta header
//! - `tree`: slotted-page node codec and the B-tree algorithms
//! - `collection`: named sub-trees and their catalog records
//! - `tx`: transaction staging, commit, and rollback
//! - `db`: file bootstrap and the readers–writer façade

mod collection;
mod db;
pub mod storage;
mod tree;
mod tx;

pub use collection::Collection;
pub use db::{Database, DatabaseBuilder};
pub use tree::Item;
pub use tx::Tx;
