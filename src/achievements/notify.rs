use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::achievements::catalog::{BadgeDefinition, Rarity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeNotification {
    pub user_id: String,
    pub badge_id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub rarity: Rarity,
}

impl BadgeNotification {
    pub fn new(user_id: &str, badge: &BadgeDefinition) -> Self {
        Self {
            user_id: user_id.to_string(),
            badge_id: badge.id.clone(),
            name: badge.name.clone(),
            description: badge.description.clone(),
            icon: badge.icon.clone(),
            rarity: badge.rarity,
        }
    }
}

/// Receives one call per newly earned badge, in catalog order
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &BadgeNotification);
}

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<BadgeNotification>,
}

impl ChannelNotifier {
    pub fn new(tx: UnboundedSender<BadgeNotification>) -> Self {
        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: &BadgeNotification) {
        if let Err(e) = self.tx.send(notification.clone()) {
            tracing::warn!(error = ?e, "notification receiver dropped");
        }
    }
}

/// Drains badge notifications into the log until every sender is gone
pub fn spawn_notification_logger(mut rx: UnboundedReceiver<BadgeNotification>) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        while let Some(notification) = rx.recv().await {
            tracing::info!(
                user_id = %notification.user_id,
                badge_id = %notification.badge_id,
                rarity = ?notification.rarity,
                "badge unlocked: {} {}",
                notification.icon,
                notification.name,
            );
        }

        tracing::debug!("notification channel closed");
    })
}
