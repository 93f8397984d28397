//! confgrid-state — transactional state store for confgrid.
//!
//! Backed by [redb](https://docs.rs/redb). Rows are JSON-serialized into
//! `&[u8]` value columns keyed by `u64` sequence ids; secondary index
//! tables give uniqueness (namespace names, one branch per namespace,
//! release keys) and ordered scans (releases per namespace, history per
//! release).
//!
//! Reads go through the [`StateRead`] trait, implemented both for a
//! read-only [`StoreSnapshot`] and for the [`StoreTxn`] handed to
//! [`StateStore::write`]. A write closure either commits everything it
//! did or, on error, nothing at all.

pub mod error;
pub mod read;
pub mod store;
pub mod tables;
pub mod txn;

pub use error::{StateError, StateResult};
pub use read::StateRead;
pub use store::{StateStore, StoreSnapshot};
pub use txn::StoreTxn;
