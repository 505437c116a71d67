//! Scout state-store and result-store layer.
//!
//! Two concerns live here: the string-keyed byte store with TTL and
//! compare-and-swap used for job and saga state, and the result store that
//! workers write lookup records through. Result storage is pluggable; each
//! write returns a self-describing location descriptor that the query path
//! dereferences later.

pub mod kv;
pub mod nats_kv;
pub mod record;
pub mod result_store;

pub use kv::{Entry, KvStore, MemoryKvStore, StoreError};
pub use nats_kv::NatsKvStore;
pub use record::ResultRecord;
pub use result_store::{FilesystemBackend, KeyValueBackend, ResultBackend, ResultStore};
