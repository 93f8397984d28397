//! Release change notifications.
//!
//! After a release-affecting operation commits, the service announces the
//! affected master namespace once. Delivery is fire-and-forget: a failing
//! notifier is logged and never undoes the committed release.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use confgrid_core::NamespaceKey;

/// A "namespace changed" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMessage {
    /// `{app}+{cluster}+{namespace}`.
    pub message: String,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
}

impl ReleaseMessage {
    pub fn for_namespace(key: &NamespaceKey) -> Self {
        Self {
            message: key.message_key(),
            app_id: key.app_id.clone(),
            cluster_name: key.cluster_name.clone(),
            namespace_name: key.namespace_name.clone(),
        }
    }
}

/// Sink for release messages.
pub trait ReleaseNotifier: Send + Sync {
    fn announce(&self, message: &ReleaseMessage) -> Result<(), String>;
}

/// Drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ReleaseNotifier for NoopNotifier {
    fn announce(&self, _message: &ReleaseMessage) -> Result<(), String> {
        Ok(())
    }
}

/// Writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ReleaseNotifier for LogNotifier {
    fn announce(&self, message: &ReleaseMessage) -> Result<(), String> {
        info!(message = %message.message, "release message");
        Ok(())
    }
}

/// Fans messages out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ReleaseMessage>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReleaseMessage> {
        self.tx.subscribe()
    }
}

impl ReleaseNotifier for BroadcastNotifier {
    fn announce(&self, message: &ReleaseMessage) -> Result<(), String> {
        match self.tx.send(message.clone()) {
            Ok(receivers) => debug!(message = %message.message, receivers, "release message sent"),
            // Nobody listening is not a delivery failure.
            Err(_) => debug!(message = %message.message, "release message dropped, no subscribers"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_key_joins_with_plus() {
        let msg = ReleaseMessage::for_namespace(&NamespaceKey::new("orderSvc", "default", "application"));
        assert_eq!(msg.message, "orderSvc+default+application");
    }

    #[test]
    fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(4);
        let mut rx = notifier.subscribe();
        let msg = ReleaseMessage::for_namespace(&NamespaceKey::new("a", "c", "n"));
        notifier.announce(&msg).unwrap();
        assert_eq!(rx.try_recv().unwrap(), msg);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new(4);
        let msg = ReleaseMessage::for_namespace(&NamespaceKey::new("a", "c", "n"));
        assert!(notifier.announce(&msg).is_ok());
    }
}
