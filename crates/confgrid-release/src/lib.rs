//! confgrid-release — release and gray-release orchestration.
//!
//! [`ReleaseService`] turns a namespace's edited items into immutable
//! releases and keeps a gray branch consistent with its master namespace:
//!
//! - master publish, with a cascading re-derivation of the branch release
//! - gray publish (optionally excluding keys from the branch overrides)
//! - branch → master merge
//! - rollback of the latest release, or of a contiguous range
//!
//! Every mutating call runs in one store transaction and appends one
//! history row for each namespace whose active release it moves; a cascade
//! into the branch gets a row of its own. Subscribers are told
//! about the affected namespace through a [`ReleaseNotifier`] after commit.

pub mod branch;
pub mod error;
pub mod history;
pub mod items;
pub mod lock;
pub mod merge;
pub mod notify;
pub mod publish;
pub mod service;

pub use error::{ReleaseError, ReleaseResult};
pub use notify::{BroadcastNotifier, LogNotifier, NoopNotifier, ReleaseMessage, ReleaseNotifier};
pub use service::{ReleaseOptions, ReleaseService};
