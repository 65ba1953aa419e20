pub mod client;
pub mod gas;

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Result, bail};

use client::{ChainClient, EvmChainClient};

// ── Chain configuration ────────────────────────────────────────────

/// Built-in default RPC endpoint for a chain id.
pub fn default_rpc_url(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://eth.llamarpc.com"),
        10 => Some("https://mainnet.optimism.io"),
        56 => Some("https://bsc-dataseed.binance.org"),
        137 => Some("https://polygon-rpc.com"),
        8453 => Some("https://mainnet.base.org"),
        42161 => Some("https://arb1.arbitrum.io/rpc"),
        _ => None,
    }
}

/// Human name used in previews and log lines.
pub fn chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "ethereum",
        10 => "optimism",
        56 => "bsc",
        137 => "polygon",
        8453 => "base",
        42161 => "arbitrum",
        _ => "unknown",
    }
}

/// The public L1 where MEV protection applies.
pub const MAINNET_CHAIN_ID: u64 = 1;

/// Canonical swap router per chain, used for anti-rug sell bundles and
/// copy-trade calldata matching.
pub fn canonical_router(chain_id: u64) -> Option<Address> {
    let addr = match chain_id {
        // Uniswap V2 router
        1 => "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
        // Uniswap V3 SwapRouter02 deployments
        10 | 42161 => "0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45",
        8453 => "0x2626664c2603336E57B271c5C0b26F421741e481",
        // PancakeSwap V2
        56 => "0x10ED43C718714eb63d5aA57B78B54704E256024E",
        // QuickSwap
        137 => "0xa5E0829CaCEd8fFDD4De3c43696c57F7D7A678ff",
        _ => return None,
    };
    addr.parse().ok()
}

/// Wrapped-native token per chain (sell bundles unwrap through it).
pub fn wrapped_native(chain_id: u64) -> Option<Address> {
    let addr = match chain_id {
        1 => "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        10 | 8453 => "0x4200000000000000000000000000000000000006",
        56 => "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c",
        137 => "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270",
        42161 => "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1",
        _ => return None,
    };
    addr.parse().ok()
}

/// Recognized stable-coins per chain. Signal verification uses these to
/// derive an effective entry price from transfer events.
pub fn known_stables(chain_id: u64) -> Vec<Address> {
    let addrs: &[&str] = match chain_id {
        1 => &[
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", // USDC
            "0xdAC17F958D2ee523a2206206994597C13D831ec7", // USDT
            "0x6B175474E89094C44Da98b954EedeAC495271d0F", // DAI
        ],
        8453 => &["0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"],
        42161 => &[
            "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
            "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9",
        ],
        10 => &["0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"],
        137 => &["0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"],
        56 => &["0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"],
        _ => &[],
    };
    addrs.iter().filter_map(|a| a.parse().ok()).collect()
}

// ── Registry ───────────────────────────────────────────────────────

/// One read/broadcast client per chain id. Constructed once at startup and
/// immutable afterwards.
pub struct ChainRegistry {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
    rpc_urls: HashMap<u64, String>,
}

impl ChainRegistry {
    /// Build clients for every chain with a known or overridden RPC URL.
    pub fn new(rpc_overrides: &HashMap<u64, String>) -> Result<Self> {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        let mut rpc_urls = HashMap::new();

        let chain_ids: Vec<u64> = [1u64, 10, 56, 137, 8453, 42161]
            .into_iter()
            .chain(rpc_overrides.keys().copied())
            .collect();

        for chain_id in chain_ids {
            if clients.contains_key(&chain_id) {
                continue;
            }
            let url = match rpc_overrides.get(&chain_id) {
                Some(url) => url.clone(),
                None => match default_rpc_url(chain_id) {
                    Some(url) => url.to_string(),
                    None => bail!("no RPC URL for chain {chain_id}; add an override"),
                },
            };
            let client = EvmChainClient::connect(chain_id, &url)?;
            clients.insert(chain_id, Arc::new(client));
            rpc_urls.insert(chain_id, url);
        }

        Ok(ChainRegistry { clients, rpc_urls })
    }

    /// Registry over pre-built clients, for tests.
    pub fn with_clients(clients: HashMap<u64, Arc<dyn ChainClient>>) -> Self {
        ChainRegistry { clients, rpc_urls: HashMap::new() }
    }

    pub fn get(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unsupported chain {chain_id}"))
    }

    pub fn rpc_url(&self, chain_id: u64) -> Option<&str> {
        self.rpc_urls.get(&chain_id).map(String::as_str)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
