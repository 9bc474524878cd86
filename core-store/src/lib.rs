//! # Core Store Module
//!
//! Two-tier caching for remote payloads:
//! - A SQLite-backed record store indexing payload files on disk
//! - A byte-bounded LRU memory cache holding raw and decoded payloads
//!
//! The record store read-repairs on lookup: expired records and records
//! whose backing file disappeared are removed and reported as misses, so
//! callers never see a record they cannot read.

pub mod db;
pub mod error;
pub mod memory;
pub mod record;
pub mod record_store;

pub use db::{create_pool, DatabaseConfig};
pub use error::{Result, StoreError};
pub use memory::{CachedPayload, MemoryStore};
pub use record::{file_name_for_key, StoreRecord};
pub use record_store::{RecordStore, SqliteRecordStore};
