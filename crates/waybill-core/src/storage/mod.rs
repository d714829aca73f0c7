//! Storage layer
//!
//! Handles the SQLite-backed local durable store.
//!
//! ## Architecture
//!
//! - **Queues**: one table per operation kind, FIFO by insertion
//! - **Cache**: last-known transfers for display while offline
//! - **Correlations**: offline tokens resolved to remote ids
//! - **Drain lease**: one drain pass per database, even across processes
//!
//! Every mutation is one statement or one transaction, so a discard from
//! the UI can race a drain pass without corrupting either.

pub mod error;
pub mod schema;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use store::LocalStore;
