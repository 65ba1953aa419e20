use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::model::UserLimits;
use crate::now_ts;

use super::Store;

impl Store {
    /// Stored limits for a user; `None` means the configured defaults apply.
    pub async fn get_limits(&self, user_id: &str) -> Result<Option<UserLimits>> {
        let conn = self.conn().await;
        let row = conn
            .query_row(
                "SELECT max_per_tx_usd, max_per_day_usd, cooldown_seconds, slippage_bps
                 FROM user_limits WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserLimits {
                        max_per_tx_usd: row.get(0)?,
                        max_per_day_usd: row.get(1)?,
                        cooldown_seconds: row.get::<_, i64>(2)? as u64,
                        slippage_bps: row.get::<_, i64>(3)? as u32,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub async fn upsert_limits(&self, user_id: &str, limits: &UserLimits) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO user_limits (user_id, max_per_tx_usd, max_per_day_usd,
                                      cooldown_seconds, slippage_bps, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (user_id) DO UPDATE SET
                max_per_tx_usd = excluded.max_per_tx_usd,
                max_per_day_usd = excluded.max_per_day_usd,
                cooldown_seconds = excluded.cooldown_seconds,
                slippage_bps = excluded.slippage_bps,
                updated_at = excluded.updated_at",
            params![
                user_id,
                limits.max_per_tx_usd,
                limits.max_per_day_usd,
                limits.cooldown_seconds as i64,
                limits.slippage_bps as i64,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    /// When this user last had a transaction broadcast, if ever.
    pub async fn last_tx_sent_at(&self, user_id: &str) -> Result<Option<i64>> {
        let conn = self.conn().await;
        let ts = conn
            .query_row(
                "SELECT last_tx_at FROM user_limits WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(ts)
    }

    /// Stamp the last-send time. Creates the limits row with defaults if the
    /// user has never customized theirs.
    pub async fn stamp_tx_sent(&self, user_id: &str, defaults: &UserLimits) -> Result<()> {
        let conn = self.conn().await;
        let now = now_ts();
        conn.execute(
            "INSERT INTO user_limits (user_id, max_per_tx_usd, max_per_day_usd,
                                      cooldown_seconds, slippage_bps, last_tx_at,
                                      created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
             ON CONFLICT (user_id) DO UPDATE SET
                last_tx_at = excluded.last_tx_at,
                updated_at = excluded.updated_at",
            params![
                user_id,
                defaults.max_per_tx_usd,
                defaults.max_per_day_usd,
                defaults.cooldown_seconds as i64,
                defaults.slippage_bps as i64,
                now,
            ],
        )?;
        Ok(())
    }
}
