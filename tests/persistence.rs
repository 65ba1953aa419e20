//! Durability across process restarts: records written by one store handle
//! are read back exactly by a fresh handle over the same file, and the
//! forward-only migrations accept an existing database.

use chainclaw::model::{TxStatus, UserLimits};
use chainclaw::store::Store;
use chainclaw::store::tx_log::NewTxRecord;

struct TempDb {
    path: std::path::PathBuf,
}

impl TempDb {
    fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "chainclaw-test-{tag}-{}-{}.db",
            std::process::id(),
            chainclaw::now_ms(),
        ));
        TempDb { path }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

#[tokio::test]
async fn transaction_record_round_trips_across_reopen() {
    let db = TempDb::new("txlog");

    let tx_id = {
        let store = Store::open(&db.path).unwrap();
        let tx_id = store
            .insert_tx(NewTxRecord {
                user_id: "alice".into(),
                skill_name: "swap".into(),
                intent_description: "swap 0.01 ETH to USDC".into(),
                chain_id: 1,
                from: "0x1111111111111111111111111111111111111111".into(),
                to: Some("0x2222222222222222222222222222222222222222".into()),
                value_native: "10000000000000000".into(),
                value_usd: 25.0,
                simulation_json: Some(r#"{"success":true,"gas_estimate":180000}"#.into()),
                guardrails_json: Some(r#"[{"rule":"max_per_tx","passed":true}]"#.into()),
            })
            .await
            .unwrap();
        store.set_tx_status(tx_id, TxStatus::Simulated).await.unwrap();
        store.set_tx_status(tx_id, TxStatus::Approved).await.unwrap();
        store.mark_tx_broadcast(tx_id, "0xAB").await.unwrap();
        store
            .mark_tx_confirmed(tx_id, 150_000, 20_000_000_000, Some(7.5), 100)
            .await
            .unwrap();
        tx_id
    };

    // Fresh handle over the same file, migrations re-run.
    let store = Store::open(&db.path).unwrap();
    let rec = store.get_tx(tx_id).await.unwrap().unwrap();

    assert_eq!(rec.user_id, "alice");
    assert_eq!(rec.skill_name, "swap");
    assert_eq!(rec.status, TxStatus::Confirmed);
    assert_eq!(rec.value_native, "10000000000000000");
    assert_eq!(rec.value_usd, 25.0);
    assert_eq!(rec.hash.as_deref(), Some("0xAB"));
    assert_eq!(rec.gas_used, Some(150_000));
    assert_eq!(rec.effective_gas_price, Some(20_000_000_000));
    assert_eq!(rec.gas_cost_usd, Some(7.5));
    assert_eq!(rec.block_number, Some(100));
    assert!(rec.simulation_json.unwrap().contains("180000"));
    assert!(rec.guardrails_json.unwrap().contains("max_per_tx"));
}

#[tokio::test]
async fn jobs_and_queue_survive_restart() {
    let db = TempDb::new("jobs");

    {
        let store = Store::open(&db.path).unwrap();
        store
            .upsert_limits("bob", &UserLimits { max_per_tx_usd: 250.0, ..UserLimits::default() })
            .await
            .unwrap();
        store.enqueue_delivery("telegram", "bob", "in-flight alert").await.unwrap();
    }

    let store = Store::open(&db.path).unwrap();

    let limits = store.get_limits("bob").await.unwrap().unwrap();
    assert_eq!(limits.max_per_tx_usd, 250.0);

    // The undelivered notification is still pending for recovery.
    let pending = store.pending_deliveries().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "in-flight alert");

    store.ack_delivery(&pending[0].id).await.unwrap();
    assert!(store.pending_deliveries().await.unwrap().is_empty());
}

#[tokio::test]
async fn terminal_states_stay_terminal_after_reopen() {
    let db = TempDb::new("terminal");

    let tx_id = {
        let store = Store::open(&db.path).unwrap();
        let tx_id = store
            .insert_tx(NewTxRecord {
                user_id: "carol".into(),
                skill_name: "send".into(),
                intent_description: String::new(),
                chain_id: 8453,
                from: "0x33".into(),
                to: None,
                value_native: "0".into(),
                value_usd: 0.0,
                simulation_json: None,
                guardrails_json: None,
            })
            .await
            .unwrap();
        store.set_tx_status(tx_id, TxStatus::Simulated).await.unwrap();
        store.set_tx_status(tx_id, TxStatus::Rejected).await.unwrap();
        tx_id
    };

    let store = Store::open(&db.path).unwrap();
    assert!(store.set_tx_status(tx_id, TxStatus::Approved).await.is_err());
    let rec = store.get_tx(tx_id).await.unwrap().unwrap();
    assert_eq!(rec.status, TxStatus::Rejected);
    assert!(rec.status.is_terminal());
}
