//! Per `(chain, account)` nonce discipline. The first touch of a key pulls
//! the pending count from the network; after that, allocation is purely
//! local and strictly monotonic within the process.

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::chain::ChainRegistry;

#[derive(Debug, Default)]
struct NonceSlot {
    /// Next nonce to hand out. `None` until synced from the network.
    next: Option<u64>,
}

/// A held nonce. The per-key mutex stays locked for the lease's lifetime,
/// so broadcasts for one account serialize and a nonce is never handed out
/// twice: either `commit` advances the counter or the value is reused by
/// the next caller.
pub struct NonceLease {
    guard: OwnedMutexGuard<NonceSlot>,
    value: u64,
    chain_id: u64,
    account: Address,
}

impl NonceLease {
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The broadcast went out: advance the counter.
    pub fn commit(mut self) {
        self.guard.next = Some(self.value + 1);
    }

    /// The RPC reported a nonce mismatch: refetch the pending count so the
    /// next allocation starts from network truth.
    pub async fn resync(mut self, chains: &ChainRegistry) -> Result<()> {
        let client = chains.get(self.chain_id)?;
        let fresh = client
            .get_transaction_count(self.account, true)
            .await
            .with_context(|| format!("resyncing nonce for chain {}", self.chain_id))?;
        self.guard.next = Some(fresh);
        Ok(())
    }
}

pub struct NonceManager {
    chains: Arc<ChainRegistry>,
    slots: DashMap<(u64, Address), Arc<Mutex<NonceSlot>>>,
}

impl NonceManager {
    pub fn new(chains: Arc<ChainRegistry>) -> Self {
        NonceManager { chains, slots: DashMap::new() }
    }

    /// Acquire the next nonce for `(chain_id, account)`, syncing from the
    /// network on first use. Holders must `commit` after a successful
    /// broadcast or `resync` after a nonce-mismatch error; dropping the
    /// lease leaves the counter untouched.
    pub async fn acquire(&self, chain_id: u64, account: Address) -> Result<NonceLease> {
        let slot = self
            .slots
            .entry((chain_id, account))
            .or_insert_with(|| Arc::new(Mutex::new(NonceSlot::default())))
            .clone();

        let mut guard = slot.lock_owned().await;

        if guard.next.is_none() {
            let client = self.chains.get(chain_id)?;
            let network = client
                .get_transaction_count(account, true)
                .await
                .with_context(|| format!("fetching nonce for chain {chain_id}"))?;
            guard.next = Some(network);
        }

        let value = guard.next.expect("slot synced above");
        Ok(NonceLease { guard, value, chain_id, account })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use alloy::eips::BlockNumberOrTag;
    use alloy::primitives::{B256, Bytes, U256};
    use async_trait::async_trait;

    use crate::chain::client::{BlockWithTxs, ChainClient, TxReceipt};

    use super::*;

    /// Chain stub that serves a fixed starting nonce and counts fetches.
    struct StubChain {
        start_nonce: u64,
        fetches: AtomicU64,
    }

    #[async_trait]
    impl ChainClient for StubChain {
        fn chain_id(&self) -> u64 {
            1
        }
        async fn get_balance(&self, _addr: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }
        async fn read_contract(&self, _to: Address, _data: Bytes) -> Result<Bytes> {
            Ok(Bytes::new())
        }
        async fn get_block_number(&self) -> Result<u64> {
            Ok(0)
        }
        async fn get_block_with_txs(
            &self,
            _number: BlockNumberOrTag,
        ) -> Result<Option<BlockWithTxs>> {
            Ok(None)
        }
        async fn estimate_base_fee(&self) -> Result<u128> {
            Ok(0)
        }
        async fn wait_for_receipt(
            &self,
            _hash: B256,
            _timeout: Duration,
        ) -> Result<Option<TxReceipt>> {
            Ok(None)
        }
        async fn get_receipt(&self, _hash: B256) -> Result<Option<TxReceipt>> {
            Ok(None)
        }
        async fn get_transaction_count(&self, _addr: Address, _pending: bool) -> Result<u64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.start_nonce)
        }
    }

    fn registry(start_nonce: u64) -> Arc<ChainRegistry> {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, Arc::new(StubChain { start_nonce, fetches: AtomicU64::new(0) }));
        Arc::new(ChainRegistry::with_clients(clients))
    }

    #[tokio::test]
    async fn nonces_are_contiguous_and_monotonic() {
        let mgr = NonceManager::new(registry(7));
        let account = Address::new([3u8; 20]);

        for expected in 7..12 {
            let lease = mgr.acquire(1, account).await.unwrap();
            assert_eq!(lease.value(), expected);
            lease.commit();
        }
    }

    #[tokio::test]
    async fn dropped_lease_reuses_the_nonce() {
        let mgr = NonceManager::new(registry(0));
        let account = Address::new([4u8; 20]);

        let lease = mgr.acquire(1, account).await.unwrap();
        assert_eq!(lease.value(), 0);
        drop(lease); // broadcast never happened

        let lease = mgr.acquire(1, account).await.unwrap();
        assert_eq!(lease.value(), 0);
        lease.commit();

        let lease = mgr.acquire(1, account).await.unwrap();
        assert_eq!(lease.value(), 1);
    }

    #[tokio::test]
    async fn accounts_are_isolated() {
        let mgr = NonceManager::new(registry(5));
        let a = Address::new([5u8; 20]);
        let b = Address::new([6u8; 20]);

        let lease_a = mgr.acquire(1, a).await.unwrap();
        assert_eq!(lease_a.value(), 5);
        lease_a.commit();

        // b starts at the network nonce, unaffected by a's allocation.
        let lease_b = mgr.acquire(1, b).await.unwrap();
        assert_eq!(lease_b.value(), 5);
    }

    #[tokio::test]
    async fn resync_refetches_from_network() {
        let chains = registry(9);
        let mgr = NonceManager::new(chains.clone());
        let account = Address::new([7u8; 20]);

        let lease = mgr.acquire(1, account).await.unwrap();
        lease.commit(); // local now 10

        let lease = mgr.acquire(1, account).await.unwrap();
        assert_eq!(lease.value(), 10);
        lease.resync(&chains).await.unwrap(); // network says 9 again

        let lease = mgr.acquire(1, account).await.unwrap();
        assert_eq!(lease.value(), 9);
    }
}
