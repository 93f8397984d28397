use std::sync::Arc;

use clap::Args;

use confgrid_core::{ConfgridConfig, NamespaceKey, ReleaseRequest, keys};
use confgrid_release::{LogNotifier, ReleaseOptions, ReleaseService};
use confgrid_state::StateStore;

pub mod branch;
pub mod gray;
pub mod init;
pub mod item;
pub mod namespace;
pub mod release;
pub mod show;

/// Selects one namespace.
#[derive(Debug, Clone, Args)]
pub struct Target {
    /// Application id
    #[arg(long)]
    pub app: String,
    #[arg(long, default_value = "default")]
    pub cluster: String,
    #[arg(long, default_value = "application")]
    pub namespace: String,
}

impl Target {
    pub fn key(&self) -> NamespaceKey {
        NamespaceKey::new(&self.app, &self.cluster, &self.namespace)
    }
}

/// Title and flags of a release.
#[derive(Debug, Clone, Default, Args)]
pub struct ReleaseText {
    /// Release title (default: `{timestamp}-release`)
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long, default_value = "")]
    pub comment: String,
    /// Skip the lock check that stops editors publishing their own change
    #[arg(long)]
    pub emergency: bool,
}

impl ReleaseText {
    pub fn request(&self, operator: &str) -> ReleaseRequest {
        let title = self
            .title
            .clone()
            .unwrap_or_else(|| format!("{}-release", keys::timestamp()));
        ReleaseRequest::new(title, operator)
            .comment(self.comment.as_str())
            .emergency(self.emergency)
    }
}

/// Everything a command needs: the service over the configured store and
/// the acting operator.
pub struct Context {
    pub service: ReleaseService,
    pub operator: String,
}

impl Context {
    pub fn open(config: &ConfgridConfig, operator: &str) -> anyhow::Result<Self> {
        let store = StateStore::open(&config.store.path)?;
        let service = ReleaseService::new(store, Arc::new(LogNotifier))
            .with_options(ReleaseOptions::from(config));
        Ok(Self {
            service,
            operator: operator.to_string(),
        })
    }

    #[cfg(test)]
    pub fn in_memory(operator: &str) -> Self {
        Self {
            service: ReleaseService::new(
                StateStore::open_in_memory().expect("in-memory store"),
                Arc::new(confgrid_release::NoopNotifier),
            ),
            operator: operator.to_string(),
        }
    }

    #[cfg(test)]
    pub fn as_operator(&self, operator: &str) -> Self {
        Self {
            service: self.service.clone(),
            operator: operator.to_string(),
        }
    }
}

#[cfg(test)]
pub fn target(app: &str) -> Target {
    Target {
        app: app.to_string(),
        cluster: "default".to_string(),
        namespace: "application".to_string(),
    }
}
