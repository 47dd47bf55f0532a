//! Integration tests for the submission coordinator

mod common;

use common::*;
use dmint_core::constants::*;
use dmint_core::script::{decode_burn, decode_state, script_hash};
use dmint_core::*;
use num_bigint::BigUint;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    chain: Arc<MockChain>,
    coordinator: Arc<Coordinator>,
    events: events::EventReceiver,
}

impl Harness {
    fn session(&self) -> &Arc<Session> {
        self.coordinator.session()
    }
}

async fn harness(contract: Option<Contract>, funding_value: u64) -> Harness {
    let chain = Arc::new(MockChain::new());
    let (tx, events) = events::channel();
    let session = Arc::new(Session::new(tx));
    session.set_wallet(wallet());
    session.set_mint_message("hello".to_string());

    {
        let mut ledger = session.ledger().await;
        ledger.work = contract.as_ref().map(|c| work(c.contract_ref));
        ledger.contract = contract;
        ledger.utxos = UtxoSet::confirmed(funding(funding_value));
    }
    session.set_status(MiningStatus::Mining);

    let coordinator = Coordinator::new(chain.clone(), Arc::new(MemoryCache::new()), session, &Config::default());
    Harness { chain, coordinator, events }
}

#[tokio::test]
async fn test_missing_inputs_then_success() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.chain.set_unspent(vec![Utxo { tx_hash: txid(0xf1), tx_pos: 0, value: 90_000_000 }]);
    h.chain.script_broadcasts(vec![Some("bad-txns-inputs-missingorspent, Missing inputs".to_string())]);

    let n1 = Nonce(vec![1, 1, 1, 1]);
    let n2 = Nonce(vec![2, 2, 2, 2]);
    h.coordinator.found(vec![n1.clone(), n2.clone()]).await;

    assert!(h.coordinator.is_idle());
    assert_eq!(h.coordinator.pending(), 0);
    assert_eq!(h.session().accepted(), 1);
    assert_eq!(h.session().rejected(), 1);
    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 1);

    let broadcasts = h.chain.broadcasts.lock().clone();
    assert_eq!(broadcasts.len(), 2);
    // The retry spends the refreshed funding output
    assert_eq!(broadcasts[1].inputs[1].prevout.hash, txid(0xf1));
    let txid = broadcasts[1].txid();

    let events = drain(&mut h.events);
    assert_eq!(
        events,
        vec![
            Event::Reject { nonce: n1, reason: FailureReason::MissingInputs },
            Event::Accept { nonce: n2, msg: "hello".to_string(), txid },
        ]
    );

    let ledger = h.session().ledger().await;
    let contract = ledger.contract.as_ref().unwrap();
    assert_eq!(contract.height, BigUint::from(4u32));
    assert_eq!(contract.location, txid);
    assert_eq!(contract.output_index, 0);
    assert_eq!(contract.script, broadcasts[1].outputs[0].script_pubkey);

    assert!(ledger.utxos.provisional);
    assert_eq!(ledger.utxos.utxos.len(), 1);
    assert_eq!(ledger.utxos.utxos[0].tx_hash, txid);
    assert_eq!(ledger.utxos.utxos[0].tx_pos, 3);
    drop(ledger);

    assert_eq!(h.session().status(), MiningStatus::Change);
}

#[tokio::test]
async fn test_last_mint_burns_and_stops() {
    let mut h = harness(Some(contract(9, 10, 5_000)), 100_000_000).await;
    h.coordinator.found(vec![Nonce(vec![9; 4])]).await;

    let broadcasts = h.chain.broadcasts.lock().clone();
    assert_eq!(broadcasts.len(), 1);
    let contract = h.session().contract().await.unwrap();
    assert_eq!(decode_burn(&broadcasts[0].outputs[0].script_pubkey), Some(contract.contract_ref));
    assert!(decode_state(&broadcasts[0].outputs[0].script_pubkey).is_none());

    assert_eq!(h.session().status(), MiningStatus::Stop);
    assert_eq!(h.session().accepted(), 1);
    // The subscription reports the burn and publishes minted-out
    assert_eq!(contract.height, BigUint::from(9u32));
    assert!(matches!(drain(&mut h.events).as_slice(), [Event::Accept { .. }]));
}

#[tokio::test]
async fn test_fee_not_met_is_fatal() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.chain.script_broadcasts(vec![Some("66: min relay fee not met".to_string())]);

    let n1 = Nonce(vec![1; 4]);
    h.coordinator.found(vec![n1.clone(), Nonce(vec![2; 4]), Nonce(vec![3; 4])]).await;

    assert_eq!(h.chain.broadcasts.lock().len(), 1);
    assert_eq!(h.session().rejected(), 1);
    assert_eq!(h.coordinator.pending(), 0);
    assert!(h.coordinator.is_idle());
    assert_eq!(h.session().status(), MiningStatus::Stop);
    assert_eq!(
        drain(&mut h.events),
        vec![Event::Reject { nonce: n1, reason: FailureReason::FeeNotMet }, Event::Stop]
    );
}

#[tokio::test]
async fn test_conflicts_try_every_nonce() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.chain.script_broadcasts(vec![
        Some("txn-mempool-conflict".to_string()),
        Some("something unexpected".to_string()),
    ]);

    h.coordinator.found(vec![Nonce(vec![1; 4]), Nonce(vec![2; 4])]).await;

    assert_eq!(h.chain.broadcasts.lock().len(), 2);
    assert_eq!(h.session().rejected(), 2);
    assert_eq!(h.session().accepted(), 0);
    assert!(h.coordinator.is_idle());
    assert_eq!(h.session().status(), MiningStatus::Mining);

    let reasons: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            Event::Reject { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![FailureReason::MempoolConflict, FailureReason::Unknown]);
}

#[tokio::test]
async fn test_contract_execution_failure_refreshes_and_changes_work() {
    let h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.chain.set_unspent(funding(80_000_000));
    h.chain
        .script_broadcasts(vec![Some("mandatory-script-verify-flag-failed (Script evaluated without error)".to_string())]);

    h.coordinator.found(vec![Nonce(vec![1; 4])]).await;

    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 1);
    assert_eq!(h.session().balance().await, 80_000_000);
    assert_eq!(h.session().status(), MiningStatus::Change);
}

#[tokio::test]
async fn test_insufficient_funding_is_fee_not_met() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 1_000).await;
    h.coordinator.found(vec![Nonce(vec![1; 4])]).await;

    assert!(h.chain.broadcasts.lock().is_empty());
    let events = drain(&mut h.events);
    assert!(matches!(events[0], Event::Reject { reason: FailureReason::FeeNotMet, .. }));
    assert_eq!(events[1], Event::Stop);
}

#[tokio::test]
async fn test_low_balance_after_claim_stops() {
    let mut h = harness(Some(contract(3, 10, 50_000_000)), 52_000_000).await;
    h.coordinator.found(vec![Nonce(vec![1; 4])]).await;

    assert_eq!(h.session().accepted(), 1);
    assert_eq!(h.session().status(), MiningStatus::Stop);
    let events = drain(&mut h.events);
    assert!(matches!(events[0], Event::Accept { .. }));
    assert_eq!(events[1], Event::General { msg: "Balance is low".to_string() });
    assert_eq!(events[2], Event::Stop);
}

#[tokio::test]
async fn test_nothing_loaded_drops_nonces() {
    let h = harness(None, 100_000_000).await;
    h.coordinator.found(vec![Nonce(vec![1; 4]), Nonce(vec![2; 4])]).await;

    assert!(h.coordinator.is_idle());
    assert_eq!(h.coordinator.pending(), 0);
    assert!(h.chain.broadcasts.lock().is_empty());
}

#[tokio::test]
async fn test_abandoned_found_still_completes_claim() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.chain.hold_broadcasts();

    let n1 = Nonce(vec![1; 4]);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.coordinator.found(vec![n1.clone()])).await;
    assert!(abandoned.is_err());
    assert_eq!(h.chain.broadcasts.lock().len(), 1);
    assert!(!h.coordinator.is_idle());

    // Queued behind the claim still in flight
    h.coordinator.found(vec![Nonce(vec![2; 4])]).await;
    assert_eq!(h.coordinator.pending(), 1);

    h.chain.release_broadcasts();
    for _ in 0..100 {
        if h.coordinator.is_idle() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(h.coordinator.is_idle());
    assert_eq!(h.coordinator.pending(), 0);
    assert_eq!(h.session().accepted(), 1);

    let n3 = Nonce(vec![3; 4]);
    h.coordinator.found(vec![n3.clone()]).await;
    assert_eq!(h.chain.broadcasts.lock().len(), 2);
    assert_eq!(h.session().accepted(), 2);

    let accepted: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            Event::Accept { nonce, .. } => Some(nonce),
            _ => None,
        })
        .collect();
    assert_eq!(accepted, vec![n1, n3]);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_refreshes_without_subscription() {
    let h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.chain.set_unspent(funding(70_000_000));
    h.coordinator.found(vec![Nonce(vec![1; 4])]).await;

    assert!(h.session().ledger().await.utxos.provisional);
    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 0);

    tokio::time::sleep(SUBSCRIPTION_CHECK_TIMEOUT + Duration::from_secs(1)).await;

    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 1);
    let ledger = h.session().ledger().await;
    assert!(!ledger.utxos.provisional);
    assert_eq!(ledger.utxos.balance(), 70_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_skips_when_subscription_reported() {
    let h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.coordinator.found(vec![Nonce(vec![1; 4])]).await;

    h.coordinator.on_address_status(json!("status-after-claim")).await;
    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 1);

    // A repeated status is ignored
    h.coordinator.on_address_status(json!("status-after-claim")).await;
    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 1);

    tokio::time::sleep(SUBSCRIPTION_CHECK_TIMEOUT + Duration::from_secs(1)).await;
    assert_eq!(h.chain.count(METHOD_LIST_UNSPENT), 1);
}

#[tokio::test]
async fn test_address_subscription_registers_wallet() {
    let h = harness(None, 0).await;
    h.coordinator.subscribe_to_address().await.unwrap();
    assert!(h.chain.is_subscribed(&wallet().address.script_hash()));
}

fn deploy(chain: &MockChain) -> (ContractRef, Txid) {
    let commit = txid(0x40);
    let contract_ref = ContractRef::new(commit, 0);
    let reveal_id = chain.add_tx(&reveal_tx(commit, 1, 10, 100));
    chain.set_ref_history(&contract_ref, vec![reveal_id]);
    (contract_ref, reveal_id)
}

#[tokio::test]
async fn test_change_token_loads_and_subscribes() {
    let mut h = harness(None, 0).await;
    let (contract_ref, reveal_id) = deploy(&h.chain);

    let token = h.coordinator.change_token(&contract_ref.to_be_hex()).await.unwrap().unwrap();
    assert_eq!(token.contract.location, reveal_id);
    assert_eq!(h.session().contract().await, Some(token.contract));
    assert_eq!(h.session().status(), MiningStatus::Change);
    assert!(!h.session().is_loading_contract());
    assert!(h.chain.is_subscribed(&script_hash(&contract_ref.to_le_bytes())));

    assert_eq!(
        drain(&mut h.events),
        vec![
            Event::Loaded { contract_ref, msg: String::new() },
            Event::General { msg: "Balance is low. Please fund wallet to start mining.".to_string() },
        ]
    );
}

#[tokio::test]
async fn test_change_token_reload_keeps_subscription() {
    let h = harness(None, 100_000_000).await;
    let (contract_ref, reveal_id) = deploy(&h.chain);
    let hash = script_hash(&contract_ref.to_le_bytes());

    h.coordinator.change_token(&contract_ref.to_be_hex()).await.unwrap();
    h.coordinator.change_token(&contract_ref.to_be_hex()).await.unwrap();
    tokio::task::yield_now().await;
    assert!(h.chain.is_subscribed(&hash));

    // The reloaded contract still follows relocations
    let token_ref = ContractRef::new(contract_ref.txid, 1);
    let moved_id = h.chain.add_tx(&claim_tx(reveal_id, contract_ref, token_ref, 1, 10, "moved"));
    h.chain.set_ref_history(&contract_ref, vec![reveal_id, moved_id]);
    h.chain.notify(&hash, json!("after-reload"));

    for _ in 0..100 {
        if h.session().contract().await.map(|c| c.location) == Some(moved_id) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.session().contract().await.unwrap().location, moved_id);
}

#[tokio::test]
async fn test_change_token_not_found() {
    let mut h = harness(None, 0).await;
    let missing = ContractRef::new(txid(0x41), 0).to_be_hex();
    assert!(h.coordinator.change_token(&missing).await.unwrap().is_none());
    assert_eq!(drain(&mut h.events), vec![Event::NotFound { contract_ref: missing }]);
}

#[tokio::test]
async fn test_change_token_minted_out() {
    let mut h = harness(None, 0).await;
    let (contract_ref, reveal_id) = deploy(&h.chain);
    let burn_id = h.chain.add_tx(&burn_tx(reveal_id, contract_ref, "all gone"));
    h.chain.set_ref_history(&contract_ref, vec![reveal_id, burn_id]);

    let token = h.coordinator.change_token(&contract_ref.to_be_hex()).await.unwrap().unwrap();
    assert_eq!(token.contract.message, "all gone");
    assert_eq!(drain(&mut h.events), vec![Event::MintedOut { contract_ref }]);
    assert!(!h.chain.is_subscribed(&script_hash(&contract_ref.to_le_bytes())));
}

#[tokio::test]
async fn test_relocation_follows_new_location() {
    let mut h = harness(None, 100_000_000).await;
    let (contract_ref, reveal_id) = deploy(&h.chain);
    h.coordinator.change_token(&contract_ref.to_be_hex()).await.unwrap();
    h.session().set_status(MiningStatus::Mining);
    drain(&mut h.events);

    // Someone else claimed the contract
    let token_ref = ContractRef::new(contract_ref.txid, 1);
    let moved_id = h.chain.add_tx(&claim_tx(reveal_id, contract_ref, token_ref, 1, 10, "first!"));
    h.chain.set_ref_history(&contract_ref, vec![reveal_id, moved_id]);

    h.coordinator.on_contract_status(contract_ref, json!("s1")).await.unwrap();

    let contract = h.session().contract().await.unwrap();
    assert_eq!(contract.location, moved_id);
    assert_eq!(contract.height, BigUint::from(1u32));
    assert_eq!(h.session().status(), MiningStatus::Change);
    assert_eq!(drain(&mut h.events), vec![Event::NewLocation { txid: moved_id, msg: "first!".to_string() }]);

    // Same status again does nothing
    let requests = h.chain.total_requests();
    h.coordinator.on_contract_status(contract_ref, json!("s1")).await.unwrap();
    assert_eq!(h.chain.total_requests(), requests);
}

#[tokio::test]
async fn test_relocation_to_burn_mints_out() {
    let mut h = harness(None, 100_000_000).await;
    let (contract_ref, reveal_id) = deploy(&h.chain);
    h.coordinator.change_token(&contract_ref.to_be_hex()).await.unwrap();
    drain(&mut h.events);

    let burn_id = h.chain.add_tx(&burn_tx(reveal_id, contract_ref, "bye"));
    h.chain.set_ref_history(&contract_ref, vec![reveal_id, burn_id]);
    h.coordinator.on_contract_status(contract_ref, json!("s2")).await.unwrap();

    let contract = h.session().contract().await.unwrap();
    assert!(contract.is_minted_out());
    assert_eq!(h.session().status(), MiningStatus::Stop);
    assert_eq!(
        drain(&mut h.events),
        vec![
            Event::NewLocation { txid: burn_id, msg: "bye".to_string() },
            Event::MintedOut { contract_ref },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mint_time_published_once() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.session().set_hashrate(1_000_000.0);
    h.session().set_status(MiningStatus::Ready);

    let estimator = h.coordinator.spawn_mint_time_estimator();
    h.session().set_status(MiningStatus::Mining);
    tokio::time::sleep(MINT_TIME_DELAY + Duration::from_secs(1)).await;

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    let Event::MintTime { seconds } = events[0] else {
        panic!("expected mint-time, got {:?}", events[0]);
    };
    assert!(seconds > 0.0);
    assert!(estimator.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_mint_time_cancelled_when_mining_stops() {
    let mut h = harness(Some(contract(3, 10, 5_000)), 100_000_000).await;
    h.session().set_hashrate(1_000_000.0);
    h.session().set_status(MiningStatus::Ready);

    let _estimator = h.coordinator.spawn_mint_time_estimator();
    h.session().set_status(MiningStatus::Mining);
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.session().set_status(MiningStatus::Stop);
    tokio::time::sleep(MINT_TIME_DELAY).await;

    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn test_sweep_wallet_pays_mine_to() {
    let h = harness(None, 100_000_000).await;
    let to = Address { version: 0, pubkey_hash: [0x42; 20] };
    h.session().set_mine_to(Some(to));

    let swept = h.coordinator.sweep_wallet().await.unwrap();

    let broadcasts = h.chain.broadcasts.lock().clone();
    assert_eq!(broadcasts.len(), 1);
    let tx = &broadcasts[0];
    assert_eq!(tx.txid(), swept);
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.inputs[0].prevout, OutPoint { hash: txid(0xf0), index: 1 });
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].script_pubkey, to.script_pubkey());

    let fee = 100_000_000 - tx.outputs[0].value;
    assert!(fee > 0 && fee < 1_000_000);
}

#[tokio::test]
async fn test_sweep_wallet_keeps_node_rejection() {
    let h = harness(None, 100_000_000).await;
    h.chain.script_broadcasts(vec![Some("insufficient priority".to_string())]);

    let err = h.coordinator.sweep_wallet().await.unwrap_err();
    assert!(matches!(err, DmintError::Chain(msg) if msg.contains("insufficient priority")));
}
