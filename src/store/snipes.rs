use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use crate::model::{AutoSnipe, JobStatus, Snipe};
use crate::now_ts;

use super::Store;

impl Store {
    pub async fn insert_snipe(&self, snipe: &Snipe) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO snipes (id, user_id, wallet_address, chain_id, token, amount,
                                 status, tx_hash, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                snipe.id,
                snipe.user_id,
                snipe.wallet_address,
                snipe.chain_id,
                snipe.token.to_lowercase(),
                snipe.amount,
                snipe.status.as_str(),
                snipe.tx_hash,
                snipe.error,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn settle_snipe(
        &self,
        id: &str,
        status: JobStatus,
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE snipes SET status = ?2, tx_hash = ?3, error = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, status.as_str(), tx_hash, error, now_ts()],
        )?;
        Ok(())
    }

    pub async fn get_snipe(&self, id: &str) -> Result<Option<Snipe>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!("SELECT {SNIPE_COLS} FROM snipes WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_snipe).optional()?)
    }

    // ── Auto-snipes ─────────────────────────────────────────────────

    pub async fn insert_auto_snipe(&self, auto: &AutoSnipe) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO auto_snipes (id, user_id, wallet_address, chain_id, token, amount,
                                      max_executions, executed_count, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                auto.id,
                auto.user_id,
                auto.wallet_address,
                auto.chain_id,
                auto.token.to_lowercase(),
                auto.amount,
                auto.max_executions,
                auto.executed_count,
                auto.status.as_str(),
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_auto_snipe(&self, id: &str) -> Result<Option<AutoSnipe>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {AUTO_COLS} FROM auto_snipes WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_auto).optional()?)
    }

    pub async fn active_auto_snipes(&self, chain_id: u64, token: &str) -> Result<Vec<AutoSnipe>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUTO_COLS} FROM auto_snipes
             WHERE status = 'active' AND chain_id = ?1 AND token = ?2"
        ))?;
        let rows = stmt
            .query_map(params![chain_id, token.to_lowercase()], row_to_auto)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Consume one execution slot. The increment and the exhausted
    /// transition happen in the same statement, so concurrent triggers can
    /// never push `executed_count` past `max_executions`.
    pub async fn consume_auto_snipe_slot(&self, id: &str) -> Result<bool> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE auto_snipes
             SET executed_count = executed_count + 1,
                 status = CASE WHEN executed_count + 1 >= max_executions
                               THEN 'exhausted' ELSE status END,
                 updated_at = ?2
             WHERE id = ?1 AND status = 'active' AND executed_count < max_executions",
            params![id, now_ts()],
        )?;
        Ok(n == 1)
    }

    pub async fn set_auto_snipe_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE auto_snipes SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_ts()],
        )?;
        Ok(())
    }
}

const SNIPE_COLS: &str =
    "id, user_id, wallet_address, chain_id, token, amount, status, tx_hash, error, \
     created_at, updated_at";

const AUTO_COLS: &str = "id, user_id, wallet_address, chain_id, token, amount, max_executions, \
                         executed_count, status, created_at, updated_at";

fn row_to_snipe(row: &Row<'_>) -> rusqlite::Result<Snipe> {
    let status: String = row.get(6)?;
    Ok(Snipe {
        id: row.get(0)?,
        user_id: row.get(1)?,
        wallet_address: row.get(2)?,
        chain_id: row.get(3)?,
        token: row.get(4)?,
        amount: row.get(5)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        tx_hash: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_auto(row: &Row<'_>) -> rusqlite::Result<AutoSnipe> {
    let status: String = row.get(8)?;
    Ok(AutoSnipe {
        id: row.get(0)?,
        user_id: row.get(1)?,
        wallet_address: row.get(2)?,
        chain_id: row.get(3)?,
        token: row.get(4)?,
        amount: row.get(5)?,
        max_executions: row.get(6)?,
        executed_count: row.get(7)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Cancelled),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_auto(id: &str, max: u32) -> AutoSnipe {
    AutoSnipe {
        id: id.into(),
        user_id: "user-1".into(),
        wallet_address: "0x1111111111111111111111111111111111111111".into(),
        chain_id: 8453,
        token: "0xBBbBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB0".into(),
        amount: "100000000000000000".into(),
        max_executions: max,
        executed_count: 0,
        status: JobStatus::Active,
        created_at: 0,
        updated_at: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhaustion_is_atomic_with_the_counter() {
        let store = Store::open_in_memory().unwrap();
        store.insert_auto_snipe(&sample_auto("as1", 2)).await.unwrap();

        assert!(store.consume_auto_snipe_slot("as1").await.unwrap());
        let mid = store.get_auto_snipe("as1").await.unwrap().unwrap();
        assert_eq!(mid.executed_count, 1);
        assert_eq!(mid.status, JobStatus::Active);

        assert!(store.consume_auto_snipe_slot("as1").await.unwrap());
        let done = store.get_auto_snipe("as1").await.unwrap().unwrap();
        assert_eq!(done.executed_count, 2);
        assert_eq!(done.status, JobStatus::Exhausted);

        // A third trigger observes exhausted and does not consume.
        assert!(!store.consume_auto_snipe_slot("as1").await.unwrap());
        let after = store.get_auto_snipe("as1").await.unwrap().unwrap();
        assert_eq!(after.executed_count, 2);
    }

    #[tokio::test]
    async fn parallel_triggers_never_overshoot() {
        let store = Store::open_in_memory().unwrap();
        store.insert_auto_snipe(&sample_auto("as2", 2)).await.unwrap();

        let mut claims = 0;
        let mut handles = Vec::new();
        for _ in 0..3 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.consume_auto_snipe_slot("as2").await.unwrap()
            }));
        }
        for h in handles {
            if h.await.unwrap() {
                claims += 1;
            }
        }

        assert_eq!(claims, 2);
        let after = store.get_auto_snipe("as2").await.unwrap().unwrap();
        assert_eq!(after.executed_count, 2);
        assert_eq!(after.status, JobStatus::Exhausted);
    }

    #[tokio::test]
    async fn token_lookup_is_case_insensitive() {
        let store = Store::open_in_memory().unwrap();
        store.insert_auto_snipe(&sample_auto("as3", 1)).await.unwrap();
        let found = store
            .active_auto_snipes(8453, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb0")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
