//! confgrid-core — shared domain model for the confgrid release engine.
//!
//! Holds the persisted types (namespaces, items, releases, gray rules,
//! release history), the insertion-ordered [`ConfigMap`] used for release
//! payloads, the release-key generator, and the `confgrid.toml` parser.

pub mod config;
pub mod configmap;
pub mod context;
pub mod keys;
pub mod types;

pub use config::ConfgridConfig;
pub use configmap::ConfigMap;
pub use context::OperationContext;
pub use types::*;
