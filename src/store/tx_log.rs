use anyhow::{Result, bail};
use rusqlite::{Row, params};

use crate::model::{TransactionRecord, TxStatus};
use crate::now_ts;

use super::Store;

/// Insert parameters for a new transaction record. Everything else in the
/// record is filled by later lifecycle transitions.
pub struct NewTxRecord {
    pub user_id: String,
    pub skill_name: String,
    pub intent_description: String,
    pub chain_id: u64,
    pub from: String,
    pub to: Option<String>,
    pub value_native: String,
    pub value_usd: f64,
    pub simulation_json: Option<String>,
    pub guardrails_json: Option<String>,
}

impl Store {
    /// Persist a new record in status `pending`; returns its tx_id.
    pub async fn insert_tx(&self, new: NewTxRecord) -> Result<i64> {
        let conn = self.conn().await;
        let now = now_ts();
        conn.execute(
            "INSERT INTO tx_log (user_id, skill_name, intent, chain_id, from_addr, to_addr,
                                 value_native, value_usd, simulation_json, guardrails_json,
                                 status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?11)",
            params![
                new.user_id,
                new.skill_name,
                new.intent_description,
                new.chain_id,
                new.from,
                new.to,
                new.value_native,
                new.value_usd,
                new.simulation_json,
                new.guardrails_json,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Move a record along the lifecycle DAG. Illegal transitions are an
    /// error, so the monotonicity invariant holds for every trace.
    pub async fn set_tx_status(&self, tx_id: i64, next: TxStatus) -> Result<()> {
        let conn = self.conn().await;
        let current: String = conn.query_row(
            "SELECT status FROM tx_log WHERE id = ?1",
            params![tx_id],
            |row| row.get(0),
        )?;
        let current = TxStatus::parse(&current)
            .ok_or_else(|| anyhow::anyhow!("corrupt status '{current}' for tx {tx_id}"))?;

        if !current.can_transition_to(next) {
            bail!("illegal status transition {} -> {} for tx {tx_id}", current.as_str(), next.as_str());
        }

        conn.execute(
            "UPDATE tx_log SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![tx_id, next.as_str(), now_ts()],
        )?;
        Ok(())
    }

    /// Transition to `broadcast` and attach the hash in one statement.
    pub async fn mark_tx_broadcast(&self, tx_id: i64, hash: &str) -> Result<()> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE tx_log SET status = 'broadcast', hash = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'approved'",
            params![tx_id, hash, now_ts()],
        )?;
        if n == 0 {
            bail!("tx {tx_id} is not in approved state");
        }
        Ok(())
    }

    /// Terminal success: record all on-chain outcome fields.
    pub async fn mark_tx_confirmed(
        &self,
        tx_id: i64,
        gas_used: u64,
        effective_gas_price: u128,
        gas_cost_usd: Option<f64>,
        block_number: u64,
    ) -> Result<()> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE tx_log SET status = 'confirmed', gas_used = ?2, effective_gas_price = ?3,
                               gas_cost_usd = ?4, block_number = ?5, updated_at = ?6
             WHERE id = ?1 AND status = 'broadcast'",
            params![
                tx_id,
                gas_used,
                effective_gas_price.to_string(),
                gas_cost_usd,
                block_number,
                now_ts()
            ],
        )?;
        if n == 0 {
            bail!("tx {tx_id} is not in broadcast state");
        }
        Ok(())
    }

    /// Terminal failure with an error string. The hash, if already set, is
    /// retained (receipt timeouts may still land on-chain).
    pub async fn mark_tx_failed(&self, tx_id: i64, error: &str) -> Result<()> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE tx_log SET status = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'simulated', 'approved', 'broadcast')",
            params![tx_id, error, now_ts()],
        )?;
        if n == 0 {
            bail!("tx {tx_id} is already terminal");
        }
        Ok(())
    }

    pub async fn get_tx(&self, tx_id: i64) -> Result<Option<TransactionRecord>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, skill_name, intent, chain_id, from_addr, to_addr,
                    value_native, value_usd, simulation_json, guardrails_json, status,
                    hash, gas_used, effective_gas_price, gas_cost_usd, block_number,
                    error, created_at, updated_at
             FROM tx_log WHERE id = ?1",
        )?;
        let rec = stmt.query_row(params![tx_id], row_to_record).ok();
        Ok(rec)
    }

    /// USD sum of sends that count against the daily cap: broadcast or
    /// confirmed records within the window.
    pub async fn sum_recent_value_usd(&self, user_id: &str, window_secs: i64) -> Result<f64> {
        let conn = self.conn().await;
        let since = now_ts() - window_secs;
        let sum: f64 = conn.query_row(
            "SELECT COALESCE(SUM(value_usd), 0) FROM tx_log
             WHERE user_id = ?1 AND status IN ('broadcast', 'confirmed') AND created_at >= ?2",
            params![user_id, since],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    /// Most recent records for a user, newest first.
    pub async fn recent_txs(&self, user_id: &str, limit: u32) -> Result<Vec<TransactionRecord>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, skill_name, intent, chain_id, from_addr, to_addr,
                    value_native, value_usd, simulation_json, guardrails_json, status,
                    hash, gas_used, effective_gas_price, gas_cost_usd, block_number,
                    error, created_at, updated_at
             FROM tx_log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let status: String = row.get(11)?;
    let gas_price: Option<String> = row.get(14)?;
    Ok(TransactionRecord {
        tx_id: row.get(0)?,
        user_id: row.get(1)?,
        skill_name: row.get(2)?,
        intent_description: row.get(3)?,
        chain_id: row.get(4)?,
        from: row.get(5)?,
        to: row.get(6)?,
        value_native: row.get(7)?,
        value_usd: row.get(8)?,
        simulation_json: row.get(9)?,
        guardrails_json: row.get(10)?,
        status: TxStatus::parse(&status).unwrap_or(TxStatus::Failed),
        hash: row.get(12)?,
        gas_used: row.get(13)?,
        effective_gas_price: gas_price.and_then(|s| s.parse().ok()),
        gas_cost_usd: row.get(15)?,
        block_number: row.get(16)?,
        error: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_rec(user: &str) -> NewTxRecord {
        NewTxRecord {
            user_id: user.into(),
            skill_name: "swap".into(),
            intent_description: "swap 0.01 ETH to USDC".into(),
            chain_id: 1,
            from: "0x1111111111111111111111111111111111111111".into(),
            to: Some("0x2222222222222222222222222222222222222222".into()),
            value_native: "10000000000000000".into(),
            value_usd: 25.0,
            simulation_json: None,
            guardrails_json: None,
        }
    }

    #[tokio::test]
    async fn lifecycle_happy_path_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_tx(new_rec("alice")).await.unwrap();

        store.set_tx_status(id, TxStatus::Simulated).await.unwrap();
        store.set_tx_status(id, TxStatus::Approved).await.unwrap();
        store.mark_tx_broadcast(id, "0xabc").await.unwrap();
        store.mark_tx_confirmed(id, 150_000, 20_000_000_000, Some(7.5), 100).await.unwrap();

        let rec = store.get_tx(id).await.unwrap().unwrap();
        assert_eq!(rec.status, TxStatus::Confirmed);
        assert_eq!(rec.hash.as_deref(), Some("0xabc"));
        assert_eq!(rec.gas_used, Some(150_000));
        assert_eq!(rec.effective_gas_price, Some(20_000_000_000));
        assert_eq!(rec.gas_cost_usd, Some(7.5));
        assert_eq!(rec.block_number, Some(100));
        assert_eq!(rec.value_usd, 25.0);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_tx(new_rec("bob")).await.unwrap();

        // pending -> approved skips simulated
        assert!(store.set_tx_status(id, TxStatus::Approved).await.is_err());

        store.set_tx_status(id, TxStatus::Simulated).await.unwrap();
        store.set_tx_status(id, TxStatus::Rejected).await.unwrap();

        // rejected is terminal
        assert!(store.set_tx_status(id, TxStatus::Approved).await.is_err());
        assert!(store.mark_tx_failed(id, "nope").await.is_err());
    }

    #[tokio::test]
    async fn daily_sum_counts_only_sent_states() {
        let store = Store::open_in_memory().unwrap();

        for (usd, advance) in [(2_400.0, true), (2_400.0, true), (300.0, false)] {
            let mut rec = new_rec("carol");
            rec.value_usd = usd;
            let id = store.insert_tx(rec).await.unwrap();
            if advance {
                store.set_tx_status(id, TxStatus::Simulated).await.unwrap();
                store.set_tx_status(id, TxStatus::Approved).await.unwrap();
                store.mark_tx_broadcast(id, "0xaa").await.unwrap();
            }
        }

        let sum = store.sum_recent_value_usd("carol", 86_400).await.unwrap();
        assert_eq!(sum, 4_800.0);
    }
}
