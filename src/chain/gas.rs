use anyhow::Result;

use crate::model::GasStrategy;

use super::client::ChainClient;

/// EIP-1559 fee pair, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

const GWEI: u128 = 1_000_000_000;

/// Derives EIP-1559 fees from the latest base fee by urgency multiplier:
/// slow = base x1.10 + 1 gwei tip, standard = base x1.25 + 1.5 gwei,
/// fast = base x2.00 + 3 gwei.
pub struct GasOptimizer;

impl GasOptimizer {
    pub async fn estimate(
        &self,
        client: &dyn ChainClient,
        strategy: GasStrategy,
    ) -> Result<FeeEstimate> {
        let base_fee = client.estimate_base_fee().await?;
        Ok(Self::from_base_fee(base_fee, strategy))
    }

    pub fn from_base_fee(base_fee: u128, strategy: GasStrategy) -> FeeEstimate {
        let (mult_num, mult_den, tip) = match strategy {
            GasStrategy::Slow => (110, 100, GWEI),
            GasStrategy::Standard => (125, 100, GWEI * 3 / 2),
            GasStrategy::Fast => (200, 100, GWEI * 3),
        };
        let max_fee = base_fee * mult_num / mult_den + tip;
        FeeEstimate { max_fee_per_gas: max_fee, max_priority_fee_per_gas: tip }
    }
}
