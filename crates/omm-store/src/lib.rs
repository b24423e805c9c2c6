//! OMM Store - persistence for the metadata namespace
//!
//! A small ordered key-value contract ([`KvStore`]) with a redb backend and
//! an in-memory backend, plus the row encoding and key layout the metadata
//! manager stores on top of it.

pub mod adapter;
pub mod codec;
pub mod error;
pub mod keys;
pub mod kv;
pub mod memory;
pub mod redb_store;
pub mod rows;
pub mod tables;

// Re-exports
pub use adapter::{OmStore, RowBatch};
pub use codec::{Row, SCHEMA_VERSION, decode_row, encode_row};
pub use error::{StoreError, StoreResult};
pub use kv::{BatchOp, KvStore, MAX_BATCH_BYTES};
pub use memory::MemoryKvStore;
pub use redb_store::RedbKvStore;
