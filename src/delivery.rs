//! At-least-once user notifications. Every message becomes a durable row
//! before any send is attempted; acks and failures are explicit, and
//! pending rows are replayed through the sender on startup.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::model::DeliveryQueueEntry;
use crate::store::Store;

/// Channel transport seam. The core never talks to chat platforms itself;
/// the host wires one of these in per deployment.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, entry: &DeliveryQueueEntry) -> Result<()>;
}

#[derive(Clone)]
pub struct DeliveryQueue {
    store: Store,
    max_attempts: u32,
}

impl DeliveryQueue {
    pub fn new(store: Store, max_attempts: u32) -> Self {
        DeliveryQueue { store, max_attempts }
    }

    /// Persist a notification and return its queue id. Durability first:
    /// the row exists before any delivery attempt.
    pub async fn enqueue(&self, channel: &str, recipient_id: &str, message: &str) -> Result<String> {
        self.store.enqueue_delivery(channel, recipient_id, message).await
    }

    /// Persist and immediately attempt delivery through `sender`.
    pub async fn push(
        &self,
        sender: &dyn NotificationSender,
        channel: &str,
        recipient_id: &str,
        message: &str,
    ) -> Result<String> {
        let id = self.enqueue(channel, recipient_id, message).await?;
        let entry = DeliveryQueueEntry {
            id: id.clone(),
            channel: channel.into(),
            recipient_id: recipient_id.into(),
            message: message.into(),
            status: crate::model::DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: 0,
            updated_at: 0,
        };
        self.attempt(sender, &entry).await?;
        Ok(id)
    }

    /// Replay every pending row through the sender. Called once at startup
    /// so restarts never drop notifications.
    pub async fn recover_pending(&self, sender: &dyn NotificationSender) -> Result<usize> {
        let pending = self.store.pending_deliveries().await?;
        let count = pending.len();
        if count > 0 {
            info!(count, "recovering pending notifications");
        }
        for entry in &pending {
            self.attempt(sender, entry).await?;
        }
        Ok(count)
    }

    async fn attempt(&self, sender: &dyn NotificationSender, entry: &DeliveryQueueEntry) -> Result<()> {
        match sender.send(entry).await {
            Ok(()) => self.store.ack_delivery(&entry.id).await,
            Err(err) => {
                warn!(id = %entry.id, channel = %entry.channel, %err, "notification send failed");
                self.store.fail_delivery(&entry.id, &err.to_string(), self.max_attempts).await
            }
        }
    }
}

/// Default sender: writes notifications to the log. Deployments with a real
/// chat adapter swap in their own [`NotificationSender`].
pub struct TracingSender;

#[async_trait]
impl NotificationSender for TracingSender {
    async fn send(&self, entry: &DeliveryQueueEntry) -> Result<()> {
        info!(
            channel = %entry.channel,
            recipient = %entry.recipient_id,
            message = %entry.message,
            "notification"
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSender;
    use super::*;

    #[tokio::test]
    async fn push_delivers_and_acks() {
        let store = Store::open_in_memory().unwrap();
        let queue = DeliveryQueue::new(store.clone(), 3);
        let sender = RecordingSender::new();

        queue.push(&sender, "telegram", "u1", "tx confirmed").await.unwrap();

        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert!(store.pending_deliveries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_send_stays_pending_and_recovers() {
        let store = Store::open_in_memory().unwrap();
        let queue = DeliveryQueue::new(store.clone(), 3);
        let sender = RecordingSender::failing_first(1);

        queue.push(&sender, "telegram", "u1", "whale alert").await.unwrap();
        assert_eq!(store.pending_deliveries().await.unwrap().len(), 1);

        // Simulated restart: recovery replays the row, transport is back.
        let recovered = queue.recover_pending(&sender).await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert!(store.pending_deliveries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attempts_cap_moves_row_to_failed() {
        let store = Store::open_in_memory().unwrap();
        let queue = DeliveryQueue::new(store.clone(), 2);
        let sender = RecordingSender::failing_first(10);

        queue.push(&sender, "discord", "u2", "signal closed").await.unwrap();
        queue.recover_pending(&sender).await.unwrap();

        // Two failed attempts reached the cap; nothing left to recover.
        assert_eq!(queue.recover_pending(&sender).await.unwrap(), 0);
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
