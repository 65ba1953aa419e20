use anyhow::Result;
use rusqlite::{Row, params};

use crate::model::{JobStatus, LimitOrder, TriggerDirection};
use crate::now_ts;

use super::Store;

impl Store {
    pub async fn insert_limit_order(&self, order: &LimitOrder) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO limit_orders (id, user_id, wallet_address, chain_id, from_token,
                                       to_token, amount, trigger_price, direction, status,
                                       fill_tx_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                order.id,
                order.user_id,
                order.wallet_address,
                order.chain_id,
                order.from_token,
                order.to_token,
                order.amount,
                order.trigger_price,
                order.direction.as_str(),
                order.status.as_str(),
                order.fill_tx_hash,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn active_limit_orders(&self) -> Result<Vec<LimitOrder>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLS} FROM limit_orders WHERE status = 'active' ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_order)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fill an order (hash recorded) or fail it, but only while it is still
    /// active; a cancelled order can no longer be filled.
    pub async fn settle_limit_order(
        &self,
        id: &str,
        status: JobStatus,
        fill_tx_hash: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE limit_orders SET status = ?2, fill_tx_hash = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'active'",
            params![id, status.as_str(), fill_tx_hash, now_ts()],
        )?;
        Ok(n == 1)
    }

    pub async fn get_limit_order(&self, id: &str) -> Result<Option<LimitOrder>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {ORDER_COLS} FROM limit_orders WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_order).ok())
    }
}

const ORDER_COLS: &str = "id, user_id, wallet_address, chain_id, from_token, to_token, amount, \
                          trigger_price, direction, status, fill_tx_hash, created_at, updated_at";

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<LimitOrder> {
    let direction: String = row.get(8)?;
    let status: String = row.get(9)?;
    Ok(LimitOrder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        wallet_address: row.get(2)?,
        chain_id: row.get(3)?,
        from_token: row.get(4)?,
        to_token: row.get(5)?,
        amount: row.get(6)?,
        trigger_price: row.get(7)?,
        direction: TriggerDirection::parse(&direction).unwrap_or(TriggerDirection::Below),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Cancelled),
        fill_tx_hash: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str) -> LimitOrder {
        LimitOrder {
            id: id.into(),
            user_id: "user-1".into(),
            wallet_address: "0x1111111111111111111111111111111111111111".into(),
            chain_id: 1,
            from_token: "0xusdc".into(),
            to_token: "0xweth".into(),
            amount: "50000000".into(),
            trigger_price: 1_800.0,
            direction: TriggerDirection::Below,
            status: JobStatus::Active,
            fill_tx_hash: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn settle_is_one_shot() {
        let store = Store::open_in_memory().unwrap();
        store.insert_limit_order(&order("o1")).await.unwrap();

        assert!(store.settle_limit_order("o1", JobStatus::Filled, Some("0xfeed")).await.unwrap());
        // Second settlement attempt observes the filled row and does nothing.
        assert!(!store.settle_limit_order("o1", JobStatus::Failed, None).await.unwrap());

        let got = store.get_limit_order("o1").await.unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Filled);
        assert_eq!(got.fill_tx_hash.as_deref(), Some("0xfeed"));
        assert!(store.active_limit_orders().await.unwrap().is_empty());
    }
}
