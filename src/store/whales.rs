use anyhow::Result;
use rusqlite::{Row, params};

use crate::model::{JobStatus, WhaleWatch};
use crate::now_ts;

use super::Store;

impl Store {
    pub async fn insert_whale_watch(&self, watch: &WhaleWatch) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO whale_watches (id, user_id, chain_id, address, label, min_value_usd,
                                        auto_copy, copy_amount, copy_max_daily, copies_today,
                                        copies_day, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                watch.id,
                watch.user_id,
                watch.chain_id,
                watch.address.to_lowercase(),
                watch.label,
                watch.min_value_usd,
                watch.auto_copy,
                watch.copy_amount,
                watch.copy_max_daily,
                watch.copies_today,
                watch.copies_day,
                watch.status.as_str(),
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn active_whale_watches(&self, chain_id: u64) -> Result<Vec<WhaleWatch>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WATCH_COLS} FROM whale_watches WHERE status = 'active' AND chain_id = ?1"
        ))?;
        let rows = stmt
            .query_map(params![chain_id], row_to_watch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Distinct chain ids with at least one active watch: the poll set.
    pub async fn watched_chain_ids(&self) -> Result<Vec<u64>> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare("SELECT DISTINCT chain_id FROM whale_watches WHERE status = 'active'")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, u64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Claim one copy-trade slot for the given UTC day. A single conditional
    /// UPDATE enforces the daily cap: the claim succeeds only while the
    /// counter is below `copy_max_daily`, resetting on day rollover.
    pub async fn claim_copy_slot(&self, id: &str, day: &str) -> Result<bool> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE whale_watches
             SET copies_today = CASE WHEN copies_day = ?2 THEN copies_today + 1 ELSE 1 END,
                 copies_day = ?2,
                 updated_at = ?3
             WHERE id = ?1 AND status = 'active'
               AND (copies_day != ?2 OR copies_today < copy_max_daily)
               AND copy_max_daily > 0",
            params![id, day, now_ts()],
        )?;
        Ok(n == 1)
    }

    pub async fn set_whale_watch_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE whale_watches SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_ts()],
        )?;
        Ok(())
    }
}

const WATCH_COLS: &str = "id, user_id, chain_id, address, label, min_value_usd, auto_copy, \
                          copy_amount, copy_max_daily, copies_today, copies_day, status, \
                          created_at, updated_at";

fn row_to_watch(row: &Row<'_>) -> rusqlite::Result<WhaleWatch> {
    let status: String = row.get(11)?;
    Ok(WhaleWatch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chain_id: row.get(2)?,
        address: row.get(3)?,
        label: row.get(4)?,
        min_value_usd: row.get(5)?,
        auto_copy: row.get(6)?,
        copy_amount: row.get(7)?,
        copy_max_daily: row.get(8)?,
        copies_today: row.get(9)?,
        copies_day: row.get(10)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Cancelled),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_watch(id: &str, max_daily: u32) -> WhaleWatch {
    WhaleWatch {
        id: id.into(),
        user_id: "user-1".into(),
        chain_id: 1,
        address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
        label: Some("fund wallet".into()),
        min_value_usd: 100_000.0,
        auto_copy: true,
        copy_amount: "50000000000000000".into(),
        copy_max_daily: max_daily,
        copies_today: 0,
        copies_day: String::new(),
        status: JobStatus::Active,
        created_at: 0,
        updated_at: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn daily_copy_cap_is_enforced() {
        let store = Store::open_in_memory().unwrap();
        store.insert_whale_watch(&sample_watch("w1", 2)).await.unwrap();

        assert!(store.claim_copy_slot("w1", "2026-08-01").await.unwrap());
        assert!(store.claim_copy_slot("w1", "2026-08-01").await.unwrap());
        // Third claim within the same UTC day is denied.
        assert!(!store.claim_copy_slot("w1", "2026-08-01").await.unwrap());
        // New day resets the counter.
        assert!(store.claim_copy_slot("w1", "2026-08-02").await.unwrap());
    }

    #[tokio::test]
    async fn zero_cap_never_claims() {
        let store = Store::open_in_memory().unwrap();
        store.insert_whale_watch(&sample_watch("w2", 0)).await.unwrap();
        assert!(!store.claim_copy_slot("w2", "2026-08-01").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_watch_cannot_claim() {
        let store = Store::open_in_memory().unwrap();
        store.insert_whale_watch(&sample_watch("w3", 5)).await.unwrap();
        store.set_whale_watch_status("w3", JobStatus::Cancelled).await.unwrap();
        assert!(!store.claim_copy_slot("w3", "2026-08-01").await.unwrap());
        assert!(store.active_whale_watches(1).await.unwrap().is_empty());
    }
}
