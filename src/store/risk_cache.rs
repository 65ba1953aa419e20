use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use crate::model::RiskReport;
use crate::now_ts;

use super::Store;

impl Store {
    /// The cached report for `(chain_id, contract)`, if any. Freshness is
    /// the risk engine's call; the store hands back whatever it has.
    pub async fn get_risk_report(&self, chain_id: u64, contract: &str) -> Result<Option<RiskReport>> {
        let conn = self.conn().await;
        let json: Option<String> = conn
            .query_row(
                "SELECT report_json FROM risk_reports WHERE chain_id = ?1 AND contract = ?2",
                params![chain_id, contract.to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => {
                let report = serde_json::from_str(&json).context("parsing cached risk report")?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Upsert a fresh report. The level and honeypot flag are denormalized
    /// for cheap blocking queries.
    pub async fn put_risk_report(&self, report: &RiskReport) -> Result<()> {
        let conn = self.conn().await;
        let json = serde_json::to_string(report)?;
        conn.execute(
            "INSERT INTO risk_reports (chain_id, contract, report_json, risk_level,
                                       is_honeypot, cached_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (chain_id, contract) DO UPDATE SET
                report_json = excluded.report_json,
                risk_level = excluded.risk_level,
                is_honeypot = excluded.is_honeypot,
                cached_at = excluded.cached_at",
            params![
                report.chain_id,
                report.contract.to_lowercase(),
                json,
                report.risk_level.as_str(),
                report.is_honeypot,
                now_ts(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskLevel;

    #[tokio::test]
    async fn report_round_trips_exactly() {
        let store = Store::open_in_memory().unwrap();
        let report = RiskReport {
            chain_id: 1,
            contract: "0xAbCd000000000000000000000000000000000001".to_lowercase(),
            overall_score: 42.0,
            risk_level: RiskLevel::Medium,
            dimensions: vec![],
            is_honeypot: false,
            has_buy_tax: true,
            has_sell_tax: false,
            source_verified: true,
            owner_can_modify: false,
            liquidity_usd: Some(12_345.0),
            cached_at: 1_000,
        };
        store.put_risk_report(&report).await.unwrap();

        let got = store
            .get_risk_report(1, "0xABCD000000000000000000000000000000000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.overall_score, 42.0);
        assert_eq!(got.risk_level, RiskLevel::Medium);
        assert!(got.has_buy_tax);
        assert_eq!(got.liquidity_usd, Some(12_345.0));
    }
}
