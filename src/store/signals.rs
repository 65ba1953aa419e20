use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use crate::model::{Signal, SignalProvider, SignalSide, SignalStatus, SignalSubscription};
use crate::now_ts;

use super::Store;

/// Insert parameters for a new signal.
pub struct NewSignal {
    pub provider_id: String,
    pub chain_id: u64,
    pub token: String,
    pub side: SignalSide,
    pub entry_price: f64,
    pub tx_hash: Option<String>,
    pub collateral_usd: f64,
    pub leverage: f64,
}

impl Store {
    /// Publish a signal. `(provider_id, tx_hash)` is unique: re-publishing
    /// the same on-chain proof is rejected by the schema.
    pub async fn insert_signal(&self, new: NewSignal) -> Result<i64> {
        let conn = self.conn().await;
        let now = now_ts();
        conn.execute(
            "INSERT INTO signals (provider_id, chain_id, token, side, entry_price, tx_hash,
                                  collateral_usd, leverage, status, opened_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?9, ?9, ?9)",
            params![
                new.provider_id,
                new.chain_id,
                new.token,
                new.side.as_str(),
                new.entry_price,
                new.tx_hash,
                new.collateral_usd,
                new.leverage,
                now,
            ],
        )
        .context("inserting signal (duplicate provider/tx_hash?)")?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_signal(&self, id: i64) -> Result<Option<Signal>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!("SELECT {SIGNAL_COLS} FROM signals WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_signal).optional()?)
    }

    pub async fn mark_signal_verified(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE signals SET verified = 1, updated_at = ?2 WHERE id = ?1",
            params![id, now_ts()],
        )?;
        Ok(())
    }

    /// Close a signal with its exit price and realized PnL. Returns false if
    /// the signal was not open (already closed or expired): no state change.
    pub async fn close_signal(&self, id: i64, exit_price: f64, pnl_pct: f64) -> Result<bool> {
        let conn = self.conn().await;
        let now = now_ts();
        let n = conn.execute(
            "UPDATE signals SET status = 'closed', exit_price = ?2, pnl_pct = ?3,
                                closed_at = ?4, updated_at = ?4
             WHERE id = ?1 AND status = 'open'",
            params![id, exit_price, pnl_pct, now],
        )?;
        Ok(n == 1)
    }

    /// Expire open signals older than the cutoff; returns how many flipped.
    pub async fn expire_signals_before(&self, opened_before: i64) -> Result<usize> {
        let conn = self.conn().await;
        let n = conn.execute(
            "UPDATE signals SET status = 'expired', updated_at = ?2
             WHERE status = 'open' AND opened_at < ?1",
            params![opened_before, now_ts()],
        )?;
        Ok(n)
    }

    /// Signals published after the cursor, for subscriber notification.
    pub async fn signals_after(&self, provider_id: &str, after_id: i64) -> Result<Vec<Signal>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SIGNAL_COLS} FROM signals
             WHERE provider_id = ?1 AND id > ?2 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![provider_id, after_id], row_to_signal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Signals closed after the cursor time, for close notifications.
    pub async fn signals_closed_since(&self, provider_id: &str, since: i64) -> Result<Vec<Signal>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SIGNAL_COLS} FROM signals
             WHERE provider_id = ?1 AND status = 'closed' AND closed_at > ?2
             ORDER BY closed_at"
        ))?;
        let rows = stmt
            .query_map(params![provider_id, since], row_to_signal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Providers ───────────────────────────────────────────────────

    /// Register a provider, or refresh its display name preserving identity
    /// and accumulated stats.
    pub async fn upsert_signal_provider(&self, id: &str, display_name: &str) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO signal_providers (id, display_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT (id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = excluded.updated_at",
            params![id, display_name, now_ts()],
        )?;
        Ok(())
    }

    pub async fn get_signal_provider(&self, id: &str) -> Result<Option<SignalProvider>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {PROVIDER_COLS} FROM signal_providers WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_provider).optional()?)
    }

    /// Recompute a provider's aggregate stats from its closed signals.
    /// Called on every close.
    pub async fn recompute_provider_stats(&self, provider_id: &str) -> Result<()> {
        let conn = self.conn().await;
        let (total, closed, wins, losses, avg): (u32, u32, u32, u32, f64) = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN status = 'closed' THEN 1 END),
                    COUNT(CASE WHEN status = 'closed' AND pnl_pct > 0 THEN 1 END),
                    COUNT(CASE WHEN status = 'closed' AND pnl_pct <= 0 THEN 1 END),
                    COALESCE(AVG(CASE WHEN status = 'closed' THEN pnl_pct END), 0)
             FROM signals WHERE provider_id = ?1",
            params![provider_id],
            |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            },
        )?;
        conn.execute(
            "UPDATE signal_providers
             SET total_signals = ?2, closed_signals = ?3, wins = ?4, losses = ?5,
                 avg_return_pct = ?6, updated_at = ?7
             WHERE id = ?1",
            params![provider_id, total, closed, wins, losses, avg, now_ts()],
        )?;
        Ok(())
    }

    /// Providers with at least `min_closed` closed signals, best average
    /// return first, wins as the tiebreak.
    pub async fn provider_leaderboard(&self, min_closed: u32) -> Result<Vec<SignalProvider>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROVIDER_COLS} FROM signal_providers
             WHERE closed_signals >= ?1
             ORDER BY avg_return_pct DESC, wins DESC"
        ))?;
        let rows = stmt
            .query_map(params![min_closed], row_to_provider)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Subscriptions ───────────────────────────────────────────────

    pub async fn insert_subscription(&self, sub: &SignalSubscription) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO signal_subscriptions (id, user_id, provider_id, channel,
                                               last_notified_id, last_notified_close_at,
                                               created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                sub.id,
                sub.user_id,
                sub.provider_id,
                sub.channel,
                sub.last_notified_id,
                sub.last_notified_close_at,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn all_subscriptions(&self) -> Result<Vec<SignalSubscription>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUB_COLS} FROM signal_subscriptions ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_sub)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Advance a subscription's notification cursors.
    pub async fn update_subscription_cursor(
        &self,
        id: &str,
        last_notified_id: i64,
        last_notified_close_at: i64,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE signal_subscriptions
             SET last_notified_id = MAX(last_notified_id, ?2),
                 last_notified_close_at = MAX(last_notified_close_at, ?3),
                 updated_at = ?4
             WHERE id = ?1",
            params![id, last_notified_id, last_notified_close_at, now_ts()],
        )?;
        Ok(())
    }
}

const SIGNAL_COLS: &str = "id, provider_id, chain_id, token, side, entry_price, tx_hash, \
                           verified, collateral_usd, leverage, status, exit_price, pnl_pct, \
                           opened_at, closed_at, created_at, updated_at";

const PROVIDER_COLS: &str = "id, display_name, total_signals, closed_signals, wins, losses, \
                             avg_return_pct, created_at, updated_at";

const SUB_COLS: &str = "id, user_id, provider_id, channel, last_notified_id, \
                        last_notified_close_at, created_at, updated_at";

fn row_to_signal(row: &Row<'_>) -> rusqlite::Result<Signal> {
    let side: String = row.get(4)?;
    let status: String = row.get(10)?;
    Ok(Signal {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        chain_id: row.get(2)?,
        token: row.get(3)?,
        side: SignalSide::parse(&side).unwrap_or(SignalSide::Buy),
        entry_price: row.get(5)?,
        tx_hash: row.get(6)?,
        verified: row.get(7)?,
        collateral_usd: row.get(8)?,
        leverage: row.get(9)?,
        status: SignalStatus::parse(&status).unwrap_or(SignalStatus::Expired),
        exit_price: row.get(11)?,
        pnl_pct: row.get(12)?,
        opened_at: row.get(13)?,
        closed_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn row_to_provider(row: &Row<'_>) -> rusqlite::Result<SignalProvider> {
    Ok(SignalProvider {
        id: row.get(0)?,
        display_name: row.get(1)?,
        total_signals: row.get(2)?,
        closed_signals: row.get(3)?,
        wins: row.get(4)?,
        losses: row.get(5)?,
        avg_return_pct: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_sub(row: &Row<'_>) -> rusqlite::Result<SignalSubscription> {
    Ok(SignalSubscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider_id: row.get(2)?,
        channel: row.get(3)?,
        last_notified_id: row.get(4)?,
        last_notified_close_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
