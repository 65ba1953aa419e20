//! Single-file transactional row store. The sole persistence boundary:
//! every engine's writes are short transactions against this module, and
//! readers only ever observe committed state.

pub mod contract_list;
pub mod dca;
pub mod delivery;
pub mod limits;
pub mod orders;
pub mod risk_cache;
pub mod signals;
pub mod snipes;
pub mod tx_log;
pub mod whales;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::Mutex;

pub type Db = Arc<Mutex<Connection>>;

/// Handle to the durable store. Cheap to clone; all clones share one
/// serialized connection.
#[derive(Clone)]
pub struct Store {
    db: Db,
}

impl Store {
    /// Open (or create) the store at `path` and bring the schema current.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("creating data directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;

        Ok(Store { db: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Store { db: Arc::new(Mutex::new(conn)) })
    }

    pub(crate) async fn conn(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.db.lock().await
    }

    /// Row counts per table, for the `status` command.
    pub async fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn().await;
        let mut out = Vec::new();
        for table in TABLES {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            out.push((table.to_string(), n));
        }
        Ok(out)
    }
}

const TABLES: &[&str] = &[
    "tx_log",
    "user_limits",
    "dca_jobs",
    "limit_orders",
    "whale_watches",
    "signals",
    "signal_providers",
    "signal_subscriptions",
    "snipes",
    "auto_snipes",
    "privacy_deposits",
    "delivery_queue",
    "risk_reports",
    "contract_list",
];

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tx_log (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id              TEXT NOT NULL,
            skill_name           TEXT NOT NULL,
            intent               TEXT NOT NULL DEFAULT '',
            chain_id             INTEGER NOT NULL,
            from_addr            TEXT NOT NULL,
            to_addr              TEXT,
            value_native         TEXT NOT NULL DEFAULT '0',
            value_usd            REAL NOT NULL DEFAULT 0,
            simulation_json      TEXT,
            guardrails_json      TEXT,
            status               TEXT NOT NULL DEFAULT 'pending',
            hash                 TEXT,
            gas_used             INTEGER,
            effective_gas_price  TEXT,
            gas_cost_usd         REAL,
            block_number         INTEGER,
            error                TEXT,
            created_at           INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at           INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_tx_log_user_time ON tx_log (user_id, created_at);

        CREATE TABLE IF NOT EXISTS user_limits (
            user_id           TEXT PRIMARY KEY,
            max_per_tx_usd    REAL NOT NULL,
            max_per_day_usd   REAL NOT NULL,
            cooldown_seconds  INTEGER NOT NULL,
            slippage_bps      INTEGER NOT NULL,
            last_tx_at        INTEGER,
            created_at        INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at        INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS dca_jobs (
            id                 TEXT PRIMARY KEY,
            user_id            TEXT NOT NULL,
            wallet_address     TEXT NOT NULL,
            from_token         TEXT NOT NULL,
            to_token           TEXT NOT NULL,
            amount             TEXT NOT NULL,
            chain_id           INTEGER NOT NULL,
            frequency          TEXT NOT NULL,
            interval_ms        INTEGER NOT NULL,
            strategy           TEXT NOT NULL DEFAULT 'fixed',
            status             TEXT NOT NULL DEFAULT 'active',
            total_executions   INTEGER NOT NULL DEFAULT 0,
            max_executions     INTEGER,
            total_spent        TEXT NOT NULL DEFAULT '0',
            avg_price          REAL,
            last_executed_at   INTEGER,
            next_execution_at  INTEGER NOT NULL,
            created_at         INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at         INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_dca_due ON dca_jobs (status, next_execution_at);

        CREATE TABLE IF NOT EXISTS limit_orders (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            wallet_address  TEXT NOT NULL,
            chain_id        INTEGER NOT NULL,
            from_token      TEXT NOT NULL,
            to_token        TEXT NOT NULL,
            amount          TEXT NOT NULL,
            trigger_price   REAL NOT NULL,
            direction       TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'active',
            fill_tx_hash    TEXT,
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS whale_watches (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            chain_id        INTEGER NOT NULL,
            address         TEXT NOT NULL,
            label           TEXT,
            min_value_usd   REAL NOT NULL DEFAULT 0,
            auto_copy       INTEGER NOT NULL DEFAULT 0,
            copy_amount     TEXT NOT NULL DEFAULT '0',
            copy_max_daily  INTEGER NOT NULL DEFAULT 0,
            copies_today    INTEGER NOT NULL DEFAULT 0,
            copies_day      TEXT NOT NULL DEFAULT '',
            status          TEXT NOT NULL DEFAULT 'active',
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS signals (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id     TEXT NOT NULL,
            chain_id        INTEGER NOT NULL,
            token           TEXT NOT NULL,
            side            TEXT NOT NULL,
            entry_price     REAL NOT NULL,
            tx_hash         TEXT,
            verified        INTEGER NOT NULL DEFAULT 0,
            collateral_usd  REAL NOT NULL DEFAULT 0,
            leverage        REAL NOT NULL DEFAULT 1,
            status          TEXT NOT NULL DEFAULT 'open',
            exit_price      REAL,
            pnl_pct         REAL,
            opened_at       INTEGER NOT NULL,
            closed_at       INTEGER,
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE (provider_id, tx_hash)
        );

        CREATE TABLE IF NOT EXISTS signal_providers (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            total_signals   INTEGER NOT NULL DEFAULT 0,
            closed_signals  INTEGER NOT NULL DEFAULT 0,
            wins            INTEGER NOT NULL DEFAULT 0,
            losses          INTEGER NOT NULL DEFAULT 0,
            avg_return_pct  REAL NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS signal_subscriptions (
            id                      TEXT PRIMARY KEY,
            user_id                 TEXT NOT NULL,
            provider_id             TEXT NOT NULL,
            channel                 TEXT NOT NULL,
            last_notified_id        INTEGER NOT NULL DEFAULT 0,
            last_notified_close_at  INTEGER NOT NULL DEFAULT 0,
            created_at              INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at              INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE (user_id, provider_id)
        );

        CREATE TABLE IF NOT EXISTS snipes (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            wallet_address  TEXT NOT NULL,
            chain_id        INTEGER NOT NULL,
            token           TEXT NOT NULL,
            amount          TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'active',
            tx_hash         TEXT,
            error           TEXT,
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS auto_snipes (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            wallet_address  TEXT NOT NULL,
            chain_id        INTEGER NOT NULL,
            token           TEXT NOT NULL,
            amount          TEXT NOT NULL,
            max_executions  INTEGER NOT NULL,
            executed_count  INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'active',
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS privacy_deposits (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            chain_id        INTEGER NOT NULL,
            amount          TEXT NOT NULL DEFAULT '0',
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at      INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS delivery_queue (
            id            TEXT PRIMARY KEY,
            channel       TEXT NOT NULL,
            recipient_id  TEXT NOT NULL,
            message       TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            attempts      INTEGER NOT NULL DEFAULT 0,
            last_error    TEXT,
            created_at    INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at    INTEGER NOT NULL DEFAULT (unixepoch())
        );
        CREATE INDEX IF NOT EXISTS idx_delivery_pending ON delivery_queue (status);

        CREATE TABLE IF NOT EXISTS risk_reports (
            chain_id     INTEGER NOT NULL,
            contract     TEXT NOT NULL,
            report_json  TEXT NOT NULL,
            risk_level   TEXT NOT NULL,
            is_honeypot  INTEGER NOT NULL DEFAULT 0,
            cached_at    INTEGER NOT NULL,
            created_at   INTEGER NOT NULL DEFAULT (unixepoch()),
            PRIMARY KEY (chain_id, contract)
        );

        CREATE TABLE IF NOT EXISTS contract_list (
            address     TEXT NOT NULL,
            chain_id    INTEGER NOT NULL,
            action      TEXT NOT NULL,
            reason      TEXT NOT NULL DEFAULT '',
            added_at    INTEGER NOT NULL DEFAULT (unixepoch()),
            created_at  INTEGER NOT NULL DEFAULT (unixepoch()),
            PRIMARY KEY (address, chain_id)
        );
        ",
    )?;

    // Forward-only additive migrations: columns grown after first release.
    add_column_if_missing(conn, "user_limits", "last_tx_at", "INTEGER")?;
    add_column_if_missing(conn, "tx_log", "value_usd", "REAL NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "signals", "verified", "INTEGER NOT NULL DEFAULT 0")?;

    Ok(())
}

/// Additive schema evolution: if `column` is absent from `table`, add it.
/// New columns must carry a default so old rows stay readable.
fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;

    if !existing.iter().any(|c| c == column) {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_creates_all_tables() {
        let store = Store::open_in_memory().unwrap();
        let counts = store.table_counts().await.unwrap();
        assert_eq!(counts.len(), TABLES.len());
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }

    #[tokio::test]
    async fn migrate_is_idempotent_and_additive() {
        let store = Store::open_in_memory().unwrap();
        {
            let conn = store.conn().await;
            // Re-running the full migration against an existing schema is a no-op.
            migrate(&conn).unwrap();
            // Adding a column twice only alters once.
            add_column_if_missing(&conn, "tx_log", "extra_note", "TEXT").unwrap();
            add_column_if_missing(&conn, "tx_log", "extra_note", "TEXT").unwrap();
        }
        store.table_counts().await.unwrap();
    }
}
