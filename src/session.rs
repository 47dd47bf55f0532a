//! Shared state of one mining session
//!
//! Replaces ambient global cells with an explicit context. The ledger (the
//! tracked contract, its work and the funding outputs) sits behind a single
//! async mutex so a claim, a relocation and a UTXO refresh never interleave.

use crate::config::Config;
use crate::constants::P2PKH_ADDRESS_VERSION;
use crate::events::{Event, EventSender};
use crate::types::*;
use crate::wallet::{Address, Wallet};
use log::debug;
use parking_lot::{Mutex, RwLock};
use secp256k1::SecretKey;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{watch, MutexGuard};

/// State mutated by claims, relocations and refreshes
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub contract: Option<Contract>,
    pub work: Option<Work>,
    pub glyph: Option<Glyph>,
    pub utxos: UtxoSet,
}

pub struct Session {
    address_version: u8,
    wallet: RwLock<Option<Wallet>>,
    mine_to: RwLock<Option<Address>>,
    mint_message: RwLock<String>,
    ledger: tokio::sync::Mutex<Ledger>,
    status: watch::Sender<MiningStatus>,
    events: EventSender,
    accepted: AtomicU64,
    rejected: AtomicU64,
    hashrate: RwLock<f64>,
    loading_contract: AtomicBool,
    address_status: Mutex<Option<Value>>,
    contract_status: Mutex<Option<Value>>,
}

impl Session {
    pub fn new(events: EventSender) -> Self {
        let (status, _) = watch::channel(MiningStatus::Ready);
        Self {
            address_version: P2PKH_ADDRESS_VERSION,
            wallet: RwLock::new(None),
            mine_to: RwLock::new(None),
            mint_message: RwLock::new(String::new()),
            ledger: tokio::sync::Mutex::new(Ledger::default()),
            status,
            events,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            hashrate: RwLock::new(0.0),
            loading_contract: AtomicBool::new(false),
            address_status: Mutex::new(None),
            contract_status: Mutex::new(None),
        }
    }

    pub fn with_config(config: &Config, events: EventSender) -> anyhow::Result<Self> {
        let session = Self { address_version: config.address_version, ..Self::new(events) };
        *session.mine_to.write() = config.mine_to_address()?;
        session.set_mint_message(config.mint_message.clone());
        Ok(session)
    }

    pub fn set_wallet(&self, wallet: Wallet) {
        *self.wallet.write() = Some(wallet);
    }

    /// Install the key supplied by key storage, addressed with the
    /// session's address version
    pub fn set_secret_key(&self, secret_key: SecretKey) -> Address {
        let wallet = Wallet::with_version(secret_key, self.address_version);
        let address = wallet.address;
        self.set_wallet(wallet);
        address
    }

    pub fn wallet(&self) -> Option<Wallet> {
        self.wallet.read().clone()
    }

    pub fn set_mine_to(&self, address: Option<Address>) {
        *self.mine_to.write() = address;
    }

    /// Reward recipient: the configured address, else the wallet's own
    pub fn mine_to(&self) -> Option<Address> {
        let configured = *self.mine_to.read();
        configured.or_else(|| self.wallet.read().as_ref().map(|w| w.address))
    }

    pub fn set_mint_message(&self, message: String) {
        *self.mint_message.write() = message;
    }

    pub fn mint_message(&self) -> String {
        self.mint_message.read().clone()
    }

    pub async fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().await
    }

    pub async fn contract(&self) -> Option<Contract> {
        self.ledger.lock().await.contract.clone()
    }

    pub async fn balance(&self) -> u64 {
        self.ledger.lock().await.utxos.balance()
    }

    /// Work is produced by the external miner for the tracked contract
    pub async fn set_work(&self, work: Option<Work>) {
        self.ledger.lock().await.work = work;
    }

    pub fn status(&self) -> MiningStatus {
        *self.status.borrow()
    }

    /// Publish a status; receivers are only woken on an actual change
    pub fn set_status(&self, status: MiningStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            debug!("Mining status {current:?} -> {status:?}");
            *current = status;
            true
        });
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MiningStatus> {
        self.status.subscribe()
    }

    pub fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_hashrate(&self, hashrate: f64) {
        *self.hashrate.write() = hashrate;
    }

    pub fn hashrate(&self) -> f64 {
        *self.hashrate.read()
    }

    pub fn is_loading_contract(&self) -> bool {
        self.loading_contract.load(Ordering::SeqCst)
    }

    pub(crate) fn set_loading_contract(&self, loading: bool) {
        self.loading_contract.store(loading, Ordering::SeqCst);
    }

    pub fn address_status(&self) -> Option<Value> {
        self.address_status.lock().clone()
    }

    /// Record a status; false when it repeats the last one
    pub(crate) fn update_address_status(&self, status: Value) -> bool {
        replace_if_changed(&self.address_status, status)
    }

    pub(crate) fn update_contract_status(&self, status: Value) -> bool {
        replace_if_changed(&self.contract_status, status)
    }

    pub(crate) fn reset_contract_status(&self) {
        *self.contract_status.lock() = None;
    }
}

fn replace_if_changed(cell: &Mutex<Option<Value>>, status: Value) -> bool {
    let mut current = cell.lock();
    if current.as_ref() == Some(&status) {
        return false;
    }
    *current = Some(status);
    true
}
