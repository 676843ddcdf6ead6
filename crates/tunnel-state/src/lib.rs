//! tunnel-state — node, pool and allocation records for tunnel addressing.
//!
//! Backed by [redb](https://docs.rs/redb). The datastore plays three roles
//! at once: a node store with optimistic concurrency, a read-mostly pool
//! store, and a small address allocator keyed by handle.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Every node write carries the [`Revision`] the caller read; a write
//! against a stale revision fails with [`StateError::Conflict`] and leaves
//! the record untouched.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
