//! Recurring-buy scheduler. Each tick selects the due jobs, sizes the round
//! (fixed or value-averaging), routes a swap through the aggregator, and
//! submits it down the standard pipeline. Schedule advancement is exact:
//! `next_execution_at = advance time + interval`, and a transient quote
//! failure leaves the schedule untouched so the next poll retries.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::executor::events::NoopObserver;
use crate::executor::{ExecMeta, Executor};
use crate::model::{DcaJob, DcaStrategy, JobStatus};
use crate::now_ms;
use crate::prices::PriceFeed;
use crate::quotes::{QuoteClient, QuoteQuery};
use crate::signer::Signer;
use crate::store::Store;

/// What a round decided to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoundPlan {
    /// Buy this many smallest units of `from_token`.
    Buy(f64),
    /// Holdings are ahead of target; advance the schedule without buying.
    Skip,
}

pub struct DcaEngine {
    store: Store,
    executor: Arc<Executor>,
    quotes: Arc<dyn QuoteClient>,
    prices: Arc<dyn PriceFeed>,
    signer: Arc<dyn Signer>,
    poll_interval: Duration,
    slippage_bps: u32,
}

impl DcaEngine {
    pub fn new(
        store: Store,
        executor: Arc<Executor>,
        quotes: Arc<dyn QuoteClient>,
        prices: Arc<dyn PriceFeed>,
        signer: Arc<dyn Signer>,
        poll_interval: Duration,
        slippage_bps: u32,
    ) -> Self {
        DcaEngine { store, executor, quotes, prices, signer, poll_interval, slippage_bps }
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let engine = self.clone();
            super::run_poll_loop("dca", self.poll_interval, shutdown, move || {
                let engine = engine.clone();
                async move { engine.tick().await }
            })
            .await;
        })
    }

    pub async fn tick(&self) {
        let due = match self.store.due_dca_jobs(now_ms()).await {
            Ok(due) => due,
            Err(err) => {
                warn!(%err, "dca work-set query failed");
                return;
            }
        };
        for job in due {
            if let Err(err) = self.run_round(&job).await {
                warn!(job = %job.id, %err, "dca round failed");
            }
        }
    }

    /// One round of one job.
    pub async fn run_round(&self, job: &DcaJob) -> Result<()> {
        let plan = match self.plan_round(job).await {
            Ok(plan) => plan,
            Err(err) => {
                // Price source down: value averaging falls back to fixed.
                warn!(job = %job.id, %err, "price unavailable, falling back to fixed amount");
                RoundPlan::Buy(job.amount.parse().unwrap_or(0.0))
            }
        };

        match plan {
            RoundPlan::Skip => {
                info!(job = %job.id, "dca round skipped, holdings ahead of target");
                self.advance(job, 0.0, None).await
            }
            RoundPlan::Buy(units) if units <= 0.0 => {
                warn!(job = %job.id, "dca round sized to zero, skipping");
                self.advance(job, 0.0, None).await
            }
            RoundPlan::Buy(units) => self.execute_buy(job, units).await,
        }
    }

    /// Size the round. Fixed jobs always buy `amount`; smart jobs buy the
    /// deficit against a linearly growing value target, capped at twice the
    /// per-round amount.
    async fn plan_round(&self, job: &DcaJob) -> Result<RoundPlan> {
        let amount: f64 = job.amount.parse().context("job amount")?;
        if job.strategy == DcaStrategy::Fixed {
            return Ok(RoundPlan::Buy(amount));
        }

        let total_spent: f64 = job.total_spent.parse().unwrap_or(0.0);
        let Some(avg_price) = job.avg_price.filter(|p| *p > 0.0) else {
            // Nothing bought yet: the first smart round is just the target.
            return Ok(RoundPlan::Buy(amount));
        };
        if total_spent <= 0.0 {
            return Ok(RoundPlan::Buy(amount));
        }

        let price = self.to_token_price_in_from_units(job).await?;

        let n = (job.total_executions + 1) as f64;
        let target_value = amount * n;
        let holdings = total_spent / avg_price;
        let current_value = holdings * price;
        let deficit = target_value - current_value;

        if deficit <= 0.0 {
            Ok(RoundPlan::Skip)
        } else {
            Ok(RoundPlan::Buy(deficit.min(2.0 * amount)))
        }
    }

    /// Price of `to_token` denominated in `from_token` units. For the usual
    /// stable-funded job this is just the USD price.
    async fn to_token_price_in_from_units(&self, job: &DcaJob) -> Result<f64> {
        let to_usd = self.prices.token_price_usd(job.chain_id, &job.to_token).await?;
        let from_usd =
            self.prices.token_price_usd(job.chain_id, &job.from_token).await.unwrap_or(1.0);
        Ok(to_usd / from_usd)
    }

    async fn execute_buy(&self, job: &DcaJob, units: f64) -> Result<()> {
        let amount = U256::from(units as u128);
        let from_token: Address = job.from_token.parse().context("from_token address")?;
        let to_token: Address = job.to_token.parse().context("to_token address")?;
        let wallet: Address = job.wallet_address.parse().context("wallet address")?;

        // Transient aggregator failures must not advance the schedule.
        let quote = match self
            .quotes
            .quote(&QuoteQuery {
                chain_id: job.chain_id,
                from_token: Some(from_token),
                to_token,
                amount,
                from_address: wallet,
                slippage_bps: self.slippage_bps,
            })
            .await
        {
            Ok(quote) => quote,
            Err(err) => {
                warn!(job = %job.id, %err, "swap quote failed, will retry next poll");
                return Ok(());
            }
        };

        let meta = ExecMeta::new(
            job.user_id.clone(),
            "dca",
            format!("DCA buy round {} for job {}", job.total_executions + 1, job.id),
        );
        let outcome = self
            .executor
            .execute(quote.tx, self.signer.clone(), meta, Arc::new(NoopObserver))
            .await;

        if !outcome.success {
            warn!(job = %job.id, message = %outcome.message, "dca buy not executed");
            return Ok(());
        }

        let fill_price = if quote.to_amount > U256::ZERO {
            Some(units / quote.to_amount.to::<u128>() as f64)
        } else {
            None
        };
        self.advance(job, units, fill_price).await
    }

    /// Advance counters, the running average, and the schedule key; flip to
    /// completed when the round cap is reached.
    async fn advance(&self, job: &DcaJob, spent_units: f64, fill_price: Option<f64>) -> Result<()> {
        let old_spent: f64 = job.total_spent.parse().unwrap_or(0.0);
        let new_spent = old_spent + spent_units;

        let new_avg = match (job.avg_price, fill_price) {
            (Some(old_avg), Some(fill)) if old_avg > 0.0 && old_spent > 0.0 => {
                // Quantity-weighted: total units spent over total tokens held.
                Some(new_spent / (old_spent / old_avg + spent_units / fill))
            }
            (None, Some(fill)) => Some(fill),
            (old, _) => old,
        };

        let executions = job.total_executions + 1;
        let next_at = now_ms() + job.interval_ms;
        self.store
            .advance_dca_job(&job.id, executions, &format!("{new_spent}"), new_avg, next_at)
            .await?;

        if job.max_executions.is_some_and(|max| executions >= max) {
            self.store.set_dca_status(&job.id, JobStatus::Completed).await?;
            info!(job = %job.id, executions, "dca job completed");
        }
        Ok(())
    }
}
