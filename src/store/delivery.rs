use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::model::{DeliveryQueueEntry, DeliveryStatus};
use crate::now_ts;

use super::Store;

impl Store {
    /// Create a pending delivery row; returns its id.
    pub async fn enqueue_delivery(
        &self,
        channel: &str,
        recipient_id: &str,
        message: &str,
    ) -> Result<String> {
        let conn = self.conn().await;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO delivery_queue (id, channel, recipient_id, message, status,
                                         attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            params![id, channel, recipient_id, message, now_ts()],
        )?;
        Ok(id)
    }

    /// Acknowledge a successful send.
    pub async fn ack_delivery(&self, id: &str) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE delivery_queue SET status = 'sent', updated_at = ?2 WHERE id = ?1",
            params![id, now_ts()],
        )?;
        Ok(())
    }

    /// Record a failed attempt. The row stays pending (and retryable) until
    /// the attempt cap is reached, then flips to failed.
    pub async fn fail_delivery(&self, id: &str, error: &str, max_attempts: u32) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE delivery_queue
             SET attempts = attempts + 1,
                 last_error = ?2,
                 status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'pending' END,
                 updated_at = ?4
             WHERE id = ?1",
            params![id, error, max_attempts, now_ts()],
        )?;
        Ok(())
    }

    /// All rows still awaiting delivery, oldest first.
    pub async fn pending_deliveries(&self) -> Result<Vec<DeliveryQueueEntry>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT id, channel, recipient_id, message, status, attempts, last_error,
                    created_at, updated_at
             FROM delivery_queue WHERE status = 'pending' ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<DeliveryQueueEntry> {
    let status: String = row.get(4)?;
    Ok(DeliveryQueueEntry {
        id: row.get(0)?,
        channel: row.get(1)?,
        recipient_id: row.get(2)?,
        message: row.get(3)?,
        status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Failed),
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_keeps_pending_until_cap() {
        let store = Store::open_in_memory().unwrap();
        let id = store.enqueue_delivery("telegram", "u1", "hello").await.unwrap();

        store.fail_delivery(&id, "network down", 3).await.unwrap();
        store.fail_delivery(&id, "still down", 3).await.unwrap();
        let pending = store.pending_deliveries().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);

        store.fail_delivery(&id, "gone", 3).await.unwrap();
        assert!(store.pending_deliveries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let store = Store::open_in_memory().unwrap();
        let id = store.enqueue_delivery("discord", "u2", "hi").await.unwrap();
        store.ack_delivery(&id).await.unwrap();
        assert!(store.pending_deliveries().await.unwrap().is_empty());
    }
}
