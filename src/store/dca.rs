use anyhow::Result;
use rusqlite::{Row, params};

use crate::model::{DcaFrequency, DcaJob, DcaStrategy, JobStatus};
use crate::now_ts;

use super::Store;

impl Store {
    pub async fn insert_dca_job(&self, job: &DcaJob) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO dca_jobs (id, user_id, wallet_address, from_token, to_token, amount,
                                   chain_id, frequency, interval_ms, strategy, status,
                                   total_executions, max_executions, total_spent, avg_price,
                                   last_executed_at, next_execution_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)",
            params![
                job.id,
                job.user_id,
                job.wallet_address,
                job.from_token,
                job.to_token,
                job.amount,
                job.chain_id,
                job.frequency.as_str(),
                job.interval_ms,
                job.strategy.as_str(),
                job.status.as_str(),
                job.total_executions,
                job.max_executions,
                job.total_spent,
                job.avg_price,
                job.last_executed_at,
                job.next_execution_at,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    /// Active jobs whose schedule key has come due. One query per tick.
    pub async fn due_dca_jobs(&self, now_ms: i64) -> Result<Vec<DcaJob>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DCA_COLS} FROM dca_jobs
             WHERE status = 'active' AND next_execution_at <= ?1
             ORDER BY next_execution_at"
        ))?;
        let rows = stmt
            .query_map(params![now_ms], row_to_dca)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Advance a job after a successful round or an explicit skip:
    /// counters, running average, and the next schedule key in one statement.
    pub async fn advance_dca_job(
        &self,
        id: &str,
        total_executions: u32,
        total_spent: &str,
        avg_price: Option<f64>,
        next_execution_at: i64,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE dca_jobs
             SET total_executions = ?2, total_spent = ?3, avg_price = ?4,
                 last_executed_at = ?5, next_execution_at = ?6, updated_at = ?5
             WHERE id = ?1",
            params![id, total_executions, total_spent, avg_price, now_ts(), next_execution_at],
        )?;
        Ok(())
    }

    pub async fn set_dca_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE dca_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_ts()],
        )?;
        Ok(())
    }

    pub async fn get_dca_job(&self, id: &str) -> Result<Option<DcaJob>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {DCA_COLS} FROM dca_jobs WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_dca).ok())
    }

    pub async fn list_dca_jobs(&self, user_id: &str) -> Result<Vec<DcaJob>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DCA_COLS} FROM dca_jobs WHERE user_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map(params![user_id], row_to_dca)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

const DCA_COLS: &str = "id, user_id, wallet_address, from_token, to_token, amount, chain_id, \
                        frequency, interval_ms, strategy, status, total_executions, \
                        max_executions, total_spent, avg_price, last_executed_at, \
                        next_execution_at, created_at, updated_at";

fn row_to_dca(row: &Row<'_>) -> rusqlite::Result<DcaJob> {
    let frequency: String = row.get(7)?;
    let strategy: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(DcaJob {
        id: row.get(0)?,
        user_id: row.get(1)?,
        wallet_address: row.get(2)?,
        from_token: row.get(3)?,
        to_token: row.get(4)?,
        amount: row.get(5)?,
        chain_id: row.get(6)?,
        frequency: DcaFrequency::parse(&frequency).unwrap_or(DcaFrequency::Daily),
        interval_ms: row.get(8)?,
        strategy: DcaStrategy::parse(&strategy).unwrap_or(DcaStrategy::Fixed),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Cancelled),
        total_executions: row.get(11)?,
        max_executions: row.get(12)?,
        total_spent: row.get(13)?,
        avg_price: row.get(14)?,
        last_executed_at: row.get(15)?,
        next_execution_at: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_job(id: &str, next_at: i64) -> DcaJob {
    DcaJob {
        id: id.into(),
        user_id: "user-1".into(),
        wallet_address: "0x1111111111111111111111111111111111111111".into(),
        from_token: "0xusdc".into(),
        to_token: "0xweth".into(),
        amount: "100000000".into(),
        chain_id: 8453,
        frequency: DcaFrequency::Daily,
        interval_ms: 86_400_000,
        strategy: DcaStrategy::Fixed,
        status: JobStatus::Active,
        total_executions: 0,
        max_executions: None,
        total_spent: "0".into(),
        avg_price: None,
        last_executed_at: None,
        next_execution_at: next_at,
        created_at: 0,
        updated_at: 0,
    }
}
