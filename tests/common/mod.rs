//! Shared fixtures: an in-memory chain and contract transactions

#![allow(dead_code)]

use async_trait::async_trait;
use dmint_core::chain::{ChainClient, StatusReceiver};
use dmint_core::constants::*;
use dmint_core::script::{encode_burn, encode_state, push_data, DmintState};
use dmint_core::*;
use num_bigint::BigUint;
use parking_lot::Mutex;
use secp256k1::SecretKey;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

pub const GLYPH_PAYLOAD: &[u8] = &[0xa2, 0x01, 0x02, 0x03];

/// Scripted broadcast outcome; `None` accepts and returns the real txid
pub type BroadcastScript = Option<String>;

#[derive(Default)]
pub struct MockChain {
    txs: Mutex<HashMap<String, String>>,
    refs: Mutex<HashMap<String, Vec<Txid>>>,
    unspent: Mutex<Vec<Utxo>>,
    broadcast_script: Mutex<VecDeque<BroadcastScript>>,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    broadcast_gate: Mutex<Option<Arc<Notify>>>,
    pub broadcasts: Mutex<Vec<Transaction>>,
    pub requests: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, tx: &Transaction) -> Txid {
        let txid = tx.txid();
        self.txs.lock().insert(txid.to_hex(), tx.to_hex());
        txid
    }

    pub fn set_ref_history(&self, contract_ref: &ContractRef, history: Vec<Txid>) {
        self.refs.lock().insert(contract_ref.to_be_hex(), history);
    }

    pub fn set_unspent(&self, utxos: Vec<Utxo>) {
        *self.unspent.lock() = utxos;
    }

    /// Rejections to return from the next broadcasts, in order
    pub fn script_broadcasts(&self, outcomes: Vec<BroadcastScript>) {
        self.broadcast_script.lock().extend(outcomes);
    }

    /// Park every broadcast after it is recorded until `release_broadcasts`
    pub fn hold_broadcasts(&self) {
        *self.broadcast_gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release_broadcasts(&self) {
        if let Some(gate) = self.broadcast_gate.lock().take() {
            gate.notify_one();
        }
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests.lock().iter().filter(|m| m.as_str() == method).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_subscribed(&self, script_hash: &str) -> bool {
        self.subscribers.lock().contains_key(script_hash)
    }

    pub fn notify(&self, script_hash: &str, status: Value) {
        if let Some(tx) = self.subscribers.lock().get(script_hash) {
            let _ = tx.send(status);
        }
    }
}

fn param(params: &[Value]) -> String {
    params.first().and_then(Value::as_str).unwrap_or_default().to_string()
}

#[async_trait]
impl ChainClient for MockChain {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.requests.lock().push(method.to_string());
        let key = param(&params);

        match method {
            METHOD_GET_TRANSACTION => self
                .txs
                .lock()
                .get(&key)
                .map(|hex| json!(hex))
                .ok_or_else(|| DmintError::Chain(format!("No such transaction {key}"))),
            METHOD_GET_REF => Ok(match self.refs.lock().get(&key) {
                Some(history) => json!(history.iter().map(|t| json!({ "tx_hash": t.to_hex() })).collect::<Vec<_>>()),
                None => Value::Null,
            }),
            METHOD_LIST_UNSPENT => Ok(serde_json::to_value(&*self.unspent.lock())?),
            METHOD_BROADCAST => {
                let tx = Transaction::from_hex(&key)?;
                self.broadcasts.lock().push(tx.clone());
                let gate = self.broadcast_gate.lock().clone();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                match self.broadcast_script.lock().pop_front().flatten() {
                    Some(rejection) => Err(DmintError::Chain(rejection)),
                    None => Ok(json!(self.add_tx(&tx).to_hex())),
                }
            }
            _ => Err(DmintError::Chain(format!("unknown method {method}"))),
        }
    }

    async fn subscribe(&self, _method: &str, params: Vec<Value>) -> Result<StatusReceiver> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(param(&params), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, _method: &str, params: Vec<Value>) -> Result<()> {
        self.subscribers.lock().remove(&param(&params));
        Ok(())
    }
}

pub fn txid(byte: u8) -> Txid {
    Txid([byte; 32])
}

pub fn wallet() -> Wallet {
    Wallet::new(SecretKey::from_slice(&[0x33; 32]).unwrap())
}

pub fn state(contract_ref: ContractRef, token_ref: ContractRef, height: u32, max_height: u32, reward: u64) -> DmintState {
    DmintState {
        height: BigUint::from(height),
        contract_ref,
        token_ref,
        max_height: BigUint::from(max_height),
        reward: BigUint::from(reward),
        target: BigUint::from(0x0000_7fff_ffff_ffffu64),
    }
}

pub fn message_script(text: &str) -> Vec<u8> {
    let mut script = vec![OP_RETURN, 0x03];
    script.extend_from_slice(MESSAGE_TAG);
    script.extend(push_data(text.as_bytes()));
    script
}

fn input(hash: Txid, index: u32, script_sig: Vec<u8>) -> TransactionInput {
    TransactionInput { prevout: OutPoint { hash, index }, script_sig, sequence: SEQUENCE_FINAL }
}

/// A reveal of `contracts` contracts at `commit:0..contracts`, sharing the
/// token ref `commit:contracts` whose spending input carries the glyph
pub fn reveal_tx(commit: Txid, contracts: u32, max_height: u32, reward: u64) -> Transaction {
    let token_ref = ContractRef::new(commit, contracts);
    let mut glyph_sig = push_data(GLYPH_MARKER);
    glyph_sig.extend(push_data(GLYPH_PAYLOAD));

    let mut inputs: Vec<_> = (0..contracts).map(|i| input(commit, i, vec![])).collect();
    inputs.push(input(commit, contracts, glyph_sig));

    let outputs = (0..contracts)
        .map(|i| TransactionOutput {
            value: CONTRACT_OUTPUT_VALUE,
            script_pubkey: encode_state(&state(ContractRef::new(commit, i), token_ref, 0, max_height, reward)),
        })
        .collect();

    Transaction { version: 1, inputs, outputs, lock_time: 0 }
}

/// A later claim of the contract at `height`, with a miner message
pub fn claim_tx(previous: Txid, contract_ref: ContractRef, token_ref: ContractRef, height: u32, max_height: u32, message: &str) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![input(previous, 0, vec![0x51])],
        outputs: vec![
            TransactionOutput {
                value: CONTRACT_OUTPUT_VALUE,
                script_pubkey: encode_state(&state(contract_ref, token_ref, height, max_height, 100)),
            },
            TransactionOutput { value: 0, script_pubkey: message_script(message) },
        ],
        lock_time: 0,
    }
}

pub fn burn_tx(previous: Txid, contract_ref: ContractRef, message: &str) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![input(previous, 0, vec![0x51])],
        outputs: vec![
            TransactionOutput { value: 0, script_pubkey: encode_burn(&contract_ref) },
            TransactionOutput { value: 0, script_pubkey: message_script(message) },
        ],
        lock_time: 0,
    }
}

/// A tracked contract at `height`, as the resolver would produce it
pub fn contract(height: u32, max_height: u32, reward: u64) -> Contract {
    let contract_ref = ContractRef::new(txid(0xc0), 0);
    let token_ref = ContractRef::new(txid(0xc0), 1);
    let s = state(contract_ref, token_ref, height, max_height, reward);
    Contract {
        location: txid(0xd0),
        output_index: 0,
        height: s.height.clone(),
        contract_ref,
        token_ref,
        max_height: s.max_height.clone(),
        reward: s.reward.clone(),
        target: s.target.clone(),
        script: encode_state(&s),
        message: String::new(),
    }
}

pub fn work(contract_ref: ContractRef) -> Work {
    Work { input_script: vec![0x51, 0x52], output_script: message_script("gm"), contract_ref }
}

pub fn funding(value: u64) -> Vec<Utxo> {
    vec![Utxo { tx_hash: txid(0xf0), tx_pos: 1, value }]
}

pub fn drain(rx: &mut events::EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
