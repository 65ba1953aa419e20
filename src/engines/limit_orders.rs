//! Price-trigger orders. Each tick reads the active set, compares the
//! target token's price against each trigger, and fires matching orders
//! through the executor; the order settles as filled or failed on the
//! pipeline outcome.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::executor::events::NoopObserver;
use crate::executor::{ExecMeta, Executor};
use crate::model::{JobStatus, LimitOrder};
use crate::prices::PriceFeed;
use crate::quotes::{QuoteClient, QuoteQuery};
use crate::signer::Signer;
use crate::store::Store;

pub struct LimitOrderEngine {
    store: Store,
    executor: Arc<Executor>,
    quotes: Arc<dyn QuoteClient>,
    prices: Arc<dyn PriceFeed>,
    signer: Arc<dyn Signer>,
    poll_interval: Duration,
    slippage_bps: u32,
}

impl LimitOrderEngine {
    pub fn new(
        store: Store,
        executor: Arc<Executor>,
        quotes: Arc<dyn QuoteClient>,
        prices: Arc<dyn PriceFeed>,
        signer: Arc<dyn Signer>,
        poll_interval: Duration,
        slippage_bps: u32,
    ) -> Self {
        LimitOrderEngine { store, executor, quotes, prices, signer, poll_interval, slippage_bps }
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let engine = self.clone();
            super::run_poll_loop("limit-orders", self.poll_interval, shutdown, move || {
                let engine = engine.clone();
                async move { engine.tick().await }
            })
            .await;
        })
    }

    pub async fn tick(&self) {
        let orders = match self.store.active_limit_orders().await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(%err, "limit-order work-set query failed");
                return;
            }
        };
        for order in orders {
            if let Err(err) = self.check_order(&order).await {
                warn!(order = %order.id, %err, "limit-order check failed");
            }
        }
    }

    async fn check_order(&self, order: &LimitOrder) -> Result<()> {
        let price = self
            .prices
            .token_price_usd(order.chain_id, &order.to_token)
            .await
            .context("trigger price lookup")?;

        if !order.direction.is_met(price, order.trigger_price) {
            return Ok(());
        }

        info!(order = %order.id, price, trigger = order.trigger_price, "limit order triggered");
        self.fire(order).await
    }

    async fn fire(&self, order: &LimitOrder) -> Result<()> {
        let from_token: Address = order.from_token.parse().context("from_token address")?;
        let to_token: Address = order.to_token.parse().context("to_token address")?;
        let wallet: Address = order.wallet_address.parse().context("wallet address")?;
        let amount: U256 = order.amount.parse().context("order amount")?;

        let quote = match self
            .quotes
            .quote(&QuoteQuery {
                chain_id: order.chain_id,
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
                // Quote outage is transient; the order stays armed.
                warn!(order = %order.id, %err, "quote failed, order stays active");
                return Ok(());
            }
        };

        let meta = ExecMeta::new(
            order.user_id.clone(),
            "limit_order",
            format!(
                "limit order {}: swap when price {} {}",
                order.id,
                order.direction.as_str(),
                order.trigger_price
            ),
        );
        let outcome =
            self.executor.execute(quote.tx, self.signer.clone(), meta, Arc::new(NoopObserver)).await;

        let (status, hash) = if outcome.success {
            (JobStatus::Filled, outcome.hash.as_deref())
        } else {
            warn!(order = %order.id, message = %outcome.message, "limit order execution failed");
            (JobStatus::Failed, None)
        };
        self.store.settle_limit_order(&order.id, status, hash).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::TriggerDirection;
    use crate::prices::StaticPriceFeed;
    use crate::test_support::{TestChain, TestQuoteClient, TestSigner, test_executor};

    use super::*;

    const USDC: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
    const WETH: &str = "0x4200000000000000000000000000000000000006";

    fn order(id: &str, trigger: f64, direction: TriggerDirection) -> LimitOrder {
        LimitOrder {
            id: id.into(),
            user_id: "user-1".into(),
            wallet_address: "0x1111111111111111111111111111111111111111".into(),
            chain_id: 8453,
            from_token: USDC.into(),
            to_token: WETH.into(),
            amount: "50000000".into(),
            trigger_price: trigger,
            direction,
            status: JobStatus::Active,
            fill_tx_hash: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    struct Rig {
        store: Store,
        engine: LimitOrderEngine,
        prices: Arc<StaticPriceFeed>,
        quotes: Arc<TestQuoteClient>,
    }

    fn rig() -> Rig {
        let store = Store::open_in_memory().unwrap();
        let chain = Arc::new(TestChain::new(8453));
        let executor = test_executor(&store, chain);
        let quotes = Arc::new(TestQuoteClient::with_rate(1.0));
        let prices = Arc::new(StaticPriceFeed::default().with_token(8453, USDC, 1.0));
        let engine = LimitOrderEngine::new(
            store.clone(),
            executor,
            quotes.clone(),
            prices.clone(),
            Arc::new(TestSigner::new()),
            Duration::from_secs(15),
            100,
        );
        Rig { store, engine, prices, quotes }
    }

    #[tokio::test]
    async fn below_trigger_fires_on_dip() {
        let r = rig();
        r.store.insert_limit_order(&order("lo1", 1_800.0, TriggerDirection::Below)).await.unwrap();

        // Above trigger: nothing happens.
        r.prices.set_token(8453, WETH, 2_000.0);
        r.engine.tick().await;
        assert_eq!(r.store.active_limit_orders().await.unwrap().len(), 1);

        // Dip through the trigger: fills.
        r.prices.set_token(8453, WETH, 1_750.0);
        r.engine.tick().await;

        let got = r.store.get_limit_order("lo1").await.unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Filled);
        assert!(got.fill_tx_hash.is_some());
    }

    #[tokio::test]
    async fn above_trigger_fires_on_breakout() {
        let r = rig();
        r.store.insert_limit_order(&order("lo2", 2_100.0, TriggerDirection::Above)).await.unwrap();
        r.prices.set_token(8453, WETH, 2_150.0);

        r.engine.tick().await;

        let got = r.store.get_limit_order("lo2").await.unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Filled);
    }

    #[tokio::test]
    async fn quote_outage_keeps_order_armed() {
        let r = rig();
        r.store.insert_limit_order(&order("lo3", 1_800.0, TriggerDirection::Below)).await.unwrap();
        r.prices.set_token(8453, WETH, 1_700.0);
        *r.quotes.down.lock().unwrap() = true;

        r.engine.tick().await;

        let got = r.store.get_limit_order("lo3").await.unwrap().unwrap();
        assert_eq!(got.status, JobStatus::Active);
    }
}
