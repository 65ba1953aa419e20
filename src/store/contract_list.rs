use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::model::{ContractAction, ContractRule};
use crate::now_ts;

use super::Store;

impl Store {
    pub async fn get_contract_rule(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<Option<ContractRule>> {
        let conn = self.conn().await;
        let rule = conn
            .query_row(
                "SELECT address, chain_id, action, reason, added_at
                 FROM contract_list WHERE chain_id = ?1 AND address = ?2",
                params![chain_id, address.to_lowercase()],
                |row| {
                    let action: String = row.get(2)?;
                    Ok(ContractRule {
                        address: row.get(0)?,
                        chain_id: row.get(1)?,
                        action: ContractAction::parse(&action).unwrap_or(ContractAction::Block),
                        reason: row.get(3)?,
                        added_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(rule)
    }

    pub async fn upsert_contract_rule(
        &self,
        chain_id: u64,
        address: &str,
        action: ContractAction,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO contract_list (address, chain_id, action, reason, added_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (address, chain_id) DO UPDATE SET
                action = excluded.action,
                reason = excluded.reason,
                added_at = excluded.added_at",
            params![address.to_lowercase(), chain_id, action.as_str(), reason, now_ts()],
        )?;
        Ok(())
    }

    pub async fn remove_contract_rule(&self, chain_id: u64, address: &str) -> Result<bool> {
        let conn = self.conn().await;
        let n = conn.execute(
            "DELETE FROM contract_list WHERE chain_id = ?1 AND address = ?2",
            params![chain_id, address.to_lowercase()],
        )?;
        Ok(n == 1)
    }
}
