//! Submission coordinator
//!
//! Serializes nonces found by the miner against a single in-flight claim,
//! turns broadcast failures into recovery actions and keeps the tracked
//! contract in step with its on-chain location.
//!
//! ```text
//!            found(nonces)
//!   Idle ───────────────────▶ Submitting ──┐ failure, queue non-empty
//!    ▲                            │  ▲      │
//!    │ success / queue exhausted  │  └──────┘
//!    └────────────────────────────┘
//! ```

use crate::cache::DynCache;
use crate::chain::{self, DynChainClient};
use crate::claim::{self, claim_tokens, ClaimRejection, ClaimRequest, FailureReason};
use crate::config::Config;
use crate::constants::*;
use crate::error::{DmintError, Result};
use crate::events::Event;
use crate::pow::calc_time_to_mine;
use crate::resolver::{ParsedContractTx, Resolver};
use crate::script::{encode_state, script_hash, DmintState};
use crate::session::Session;
use crate::types::*;
use log::{debug, info, warn};
use num_traits::ToPrimitive;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pending nonces and whether a claim is being submitted
#[derive(Debug, Default)]
pub struct SubmissionState {
    pub pending: VecDeque<Nonce>,
    pub in_flight: bool,
}

enum Outcome {
    Accepted,
    Rejected(ClaimRejection),
    /// No contract or work to claim against
    Skipped,
}

pub struct Coordinator {
    session: Arc<Session>,
    client: Arc<DynChainClient>,
    resolver: Resolver,
    fee_per_kb: u64,
    subscription_check_timeout: Duration,
    mint_time_delay: Duration,
    submission: Mutex<SubmissionState>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    address_subscription: Mutex<Option<JoinHandle<()>>>,
    contract_subscription: Mutex<Option<(ContractRef, JoinHandle<()>)>>,
}

impl Coordinator {
    pub fn new(client: Arc<DynChainClient>, cache: Arc<DynCache>, session: Arc<Session>, config: &Config) -> Arc<Self> {
        let resolver = Resolver::new(Arc::clone(&client), cache)
            .with_paging(config.results_per_page, config.resolve_batch_size);
        Arc::new(Self {
            session,
            client,
            resolver,
            fee_per_kb: config.fee_per_kb,
            subscription_check_timeout: config.subscription_check_timeout(),
            mint_time_delay: config.mint_time_delay(),
            submission: Mutex::new(SubmissionState::default()),
            watchdog: Mutex::new(None),
            address_subscription: Mutex::new(None),
            contract_subscription: Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn is_idle(&self) -> bool {
        !self.submission.lock().in_flight
    }

    pub fn pending(&self) -> usize {
        self.submission.lock().pending.len()
    }

    /// Queue nonces; when idle, submit them until one is accepted or the
    /// queue runs dry. Returns once this call's work is done.
    ///
    /// Submission runs on its own task, so dropping the returned future
    /// neither interrupts a broadcast nor leaves the coordinator busy.
    pub async fn found(self: &Arc<Self>, nonces: Vec<Nonce>) {
        {
            let mut state = self.submission.lock();
            state.pending.extend(nonces);
            if state.in_flight {
                return;
            }
            state.in_flight = true;
        }

        let this = Arc::clone(self);
        if let Err(err) = tokio::spawn(async move { this.process().await }).await {
            warn!("Submission task failed: {err}");
            self.finish();
        }
    }

    async fn process(self: &Arc<Self>) {
        loop {
            let nonce = {
                let mut state = self.submission.lock();
                match state.pending.pop_front() {
                    Some(nonce) => nonce,
                    None => {
                        state.in_flight = false;
                        return;
                    }
                }
            };

            debug!("Submitting {nonce}");
            match self.submit(&nonce).await {
                Outcome::Accepted => {
                    self.finish();
                    return;
                }
                Outcome::Skipped => {
                    warn!("No contract or work loaded, dropping queued nonces");
                    self.finish();
                    return;
                }
                Outcome::Rejected(rejection) => {
                    debug!("Claim rejected: {rejection}");
                    self.session.record_rejected();
                    self.session.emit(Event::Reject { nonce, reason: rejection.reason });

                    if self.handle_failure(rejection.reason).await {
                        self.finish();
                        return;
                    }
                }
            }
        }
    }

    fn finish(&self) {
        let mut state = self.submission.lock();
        state.pending.clear();
        state.in_flight = false;
    }

    async fn submit(self: &Arc<Self>, nonce: &Nonce) -> Outcome {
        let mut ledger = self.session.ledger().await;
        let (Some(contract), Some(work)) = (ledger.contract.clone(), ledger.work.clone()) else {
            return Outcome::Skipped;
        };

        let (Some(wallet), Some(mine_to)) = (self.session.wallet(), self.session.mine_to()) else {
            return Outcome::Rejected(DmintError::MissingState("wallet").into());
        };

        let request = ClaimRequest {
            contract: &contract,
            work: &work,
            nonce,
            wallet: &wallet,
            mine_to: &mine_to,
            utxos: &ledger.utxos.utxos,
            fee_per_kb: self.fee_per_kb,
        };
        let success = match claim_tokens(self.client.as_ref(), &request).await {
            Ok(success) => success,
            Err(rejection) => return Outcome::Rejected(rejection),
        };

        // Fund the next claim before the subscription reports the change
        ledger.utxos = UtxoSet::provisional(success.change.into_iter().collect());
        let balance = ledger.utxos.balance();
        self.start_watchdog();

        self.session.record_accepted();
        self.session.emit(Event::Accept { nonce: nonce.clone(), msg: self.session.mint_message(), txid: success.txid });

        let next_height = &contract.height + 1u32;
        if next_height == contract.max_height {
            // minted-out follows from the contract subscription
            self.session.set_status(MiningStatus::Stop);
        } else {
            debug!("Changed location to {}", success.txid);
            let script = encode_state(&DmintState { height: next_height.clone(), ..DmintState::from(&contract) });
            ledger.contract = Some(Contract {
                location: success.txid,
                output_index: 0,
                height: next_height,
                script,
                ..contract.clone()
            });
            self.session.set_status(MiningStatus::Change);
        }

        let reward = contract.reward.to_u64().unwrap_or(u64::MAX);
        if balance < LOW_BALANCE_MARGIN.saturating_add(reward) {
            self.session.emit(Event::General { msg: "Balance is low".to_string() });
            self.session.set_status(MiningStatus::Stop);
            self.session.emit(Event::Stop);
        }

        Outcome::Accepted
    }

    /// Side effects of a rejection; true when submission must stop
    async fn handle_failure(&self, reason: FailureReason) -> bool {
        match reason {
            FailureReason::MissingInputs => {
                debug!("Missing inputs, updating unspent");
                self.cancel_watchdog();
                self.session.set_status(MiningStatus::Stop);
                self.refresh_logged().await;
                self.session.set_status(MiningStatus::Mining);
                false
            }
            FailureReason::FeeNotMet => {
                self.session.set_status(MiningStatus::Stop);
                self.session.emit(Event::Stop);
                true
            }
            FailureReason::ContractExecutionFailed => {
                self.session.set_status(MiningStatus::Stop);
                self.refresh_logged().await;
                self.session.set_status(MiningStatus::Mining);
                self.session.set_status(MiningStatus::Change);
                false
            }
            FailureReason::MempoolConflict | FailureReason::Unknown => false,
        }
    }

    /// Replace the funding set with the chain's view of the wallet
    pub async fn refresh_unspent(&self) -> Result<()> {
        let Some(wallet) = self.session.wallet() else {
            return Ok(());
        };
        let script_hash = wallet.address.script_hash();
        debug!("Refreshing unspent for {script_hash}");

        let utxos = chain::list_unspent(self.client.as_ref(), &script_hash).await?;
        self.session.ledger().await.utxos = UtxoSet::confirmed(utxos);
        Ok(())
    }

    async fn refresh_logged(&self) {
        if let Err(err) = self.refresh_unspent().await {
            warn!("Failed to refresh unspent: {err}");
        }
    }

    /// After a claim, refresh anyway if the address subscription stays quiet
    fn start_watchdog(self: &Arc<Self>) {
        let last_status = self.session.address_status();
        let timeout = self.subscription_check_timeout;
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if this.session.address_status() == last_status {
                debug!("No subscription received. Updating unspent.");
                this.refresh_logged().await;
            }
        });

        if let Some(previous) = self.watchdog.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_watchdog(&self) {
        if let Some(handle) = self.watchdog.lock().take() {
            handle.abort();
        }
    }

    pub async fn subscribe_to_address(self: &Arc<Self>) -> Result<()> {
        debug!("Subscribing to address");
        let Some(wallet) = self.session.wallet() else {
            return Ok(());
        };
        debug!("Address set to {}", wallet.address);

        let mut statuses = self
            .client
            .subscribe(TOPIC_SCRIPTHASH, vec![json!(wallet.address.script_hash())])
            .await?;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                this.on_address_status(status).await;
            }
        });

        if let Some(previous) = self.address_subscription.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn on_address_status(&self, status: Value) {
        if !self.session.update_address_status(status.clone()) {
            return;
        }
        debug!("Status received {status}");
        self.refresh_logged().await;
    }

    /// Switch mining to another contract
    ///
    /// 1. Drop the previous contract's subscription
    /// 2. Resolve the new reference; publish not-found, minted-out or loaded
    /// 3. Subscribe to the contract's singleton to follow relocations
    pub async fn change_token(self: &Arc<Self>, contract_ref: &str) -> Result<Option<Token>> {
        self.session.set_loading_contract(true);

        let current = self.contract_subscription.lock().take();
        if let Some((previous, handle)) = current {
            handle.abort();
            debug!("Unsubscribing from current contract {previous}");
            let params = vec![json!(script_hash(&previous.to_le_bytes()))];
            // Must complete before a resubscription to the same singleton
            if let Err(err) = self.client.unsubscribe(TOPIC_SCRIPTHASH, params).await {
                warn!("Unsubscribe from {previous} failed: {err}");
            }
        }

        let resolved = self.resolver.resolve(contract_ref).await;
        self.session.set_loading_contract(false);

        let token = match resolved {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.session.emit(Event::NotFound { contract_ref: contract_ref.to_string() });
                return Ok(None);
            }
            Err(err) => {
                self.session.emit(Event::NotFound { contract_ref: contract_ref.to_string() });
                return Err(err);
            }
        };

        let contract = token.contract.clone();
        let balance = {
            let mut ledger = self.session.ledger().await;
            if ledger.work.as_ref().is_some_and(|w| w.contract_ref != contract.contract_ref) {
                ledger.work = None;
            }
            ledger.contract = Some(contract.clone());
            ledger.glyph = Some(token.glyph.clone());
            ledger.utxos.balance()
        };

        if contract.is_minted_out() {
            self.session.emit(Event::MintedOut { contract_ref: contract.contract_ref });
            return Ok(Some(token));
        }

        info!("Loaded contract {}", contract.contract_ref);
        self.session.emit(Event::Loaded { contract_ref: contract.contract_ref, msg: contract.message.clone() });

        if balance < LOW_BALANCE_ON_LOAD {
            self.session.emit(Event::General { msg: "Balance is low. Please fund wallet to start mining.".to_string() });
        }

        if self.session.status() == MiningStatus::Mining {
            self.session.set_status(MiningStatus::Change);
        }

        self.subscribe_to_contract(contract.contract_ref).await?;
        Ok(Some(token))
    }

    async fn subscribe_to_contract(self: &Arc<Self>, contract_ref: ContractRef) -> Result<()> {
        self.session.reset_contract_status();
        let params = vec![json!(script_hash(&contract_ref.to_le_bytes()))];
        let mut statuses = self.client.subscribe(TOPIC_SCRIPTHASH, params).await?;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                if let Err(err) = this.on_contract_status(contract_ref, status).await {
                    warn!("Failed to follow contract {contract_ref}: {err}");
                }
            }
        });

        if let Some((_, previous)) = self.contract_subscription.lock().replace((contract_ref, handle)) {
            previous.abort();
        }
        Ok(())
    }

    /// Relocation: follow the contract to its latest on-chain location
    pub async fn on_contract_status(&self, contract_ref: ContractRef, status: Value) -> Result<()> {
        if !self.session.update_contract_status(status) {
            return Ok(());
        }

        let Some((_, latest)) = self.resolver.fetch_ref(&contract_ref).await? else {
            return Ok(());
        };

        let mut ledger = self.session.ledger().await;
        let Some(tracked) = ledger.contract.as_mut() else {
            return Ok(());
        };
        if tracked.contract_ref != contract_ref || tracked.location == latest {
            return Ok(());
        }
        debug!("New contract location {latest}");

        let parsed = self.resolver.parse_location(&latest, &contract_ref).await?;
        if let Some(parsed) = &parsed {
            if !parsed.message().is_empty() {
                self.session.emit(Event::NewLocation { txid: latest, msg: parsed.message().to_string() });
            }
        }

        match parsed {
            Some(ParsedContractTx::Active(contract)) => {
                *tracked = contract;
                if self.session.status() == MiningStatus::Mining {
                    self.session.set_status(MiningStatus::Change);
                }
            }
            Some(ParsedContractTx::Burn { .. }) => {
                self.session.set_status(MiningStatus::Stop);
                self.session.emit(Event::MintedOut { contract_ref });
                tracked.height = tracked.max_height.clone();
            }
            None => debug!("No contract state at {latest}"),
        }
        Ok(())
    }

    /// One-shot estimate of the time to mint, published once mining has
    /// run uninterrupted for the configured delay
    pub fn spawn_mint_time_estimator(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut status = self.session.subscribe_status();
        let delay = self.mint_time_delay;

        tokio::spawn(async move {
            loop {
                if !wait_for_mining(&mut status).await {
                    return;
                }

                let elapsed = tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    changed = status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        false
                    }
                };
                if !elapsed {
                    continue;
                }

                if let Some(seconds) = this.estimate_mint_time().await {
                    this.session.emit(Event::MintTime { seconds });
                    return;
                }
                // Nothing to estimate yet; wait for mining to restart
                if status.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    async fn estimate_mint_time(&self) -> Option<f64> {
        let contract = self.session.contract().await?;
        calc_time_to_mine(&contract.target, self.session.hashrate())
    }

    /// Send every funding output to the mine-to address
    pub async fn sweep_wallet(&self) -> Result<Txid> {
        let (Some(wallet), Some(to)) = (self.session.wallet(), self.session.mine_to()) else {
            return Err(DmintError::MissingState("wallet"));
        };
        let ledger = self.session.ledger().await;
        claim::sweep_wallet(self.client.as_ref(), &wallet, &to, &ledger.utxos.utxos, self.fee_per_kb).await
    }
}

/// False once the status sender is gone
async fn wait_for_mining(status: &mut watch::Receiver<MiningStatus>) -> bool {
    loop {
        let current = *status.borrow_and_update();
        if current == MiningStatus::Mining {
            return true;
        }
        if status.changed().await.is_err() {
            return false;
        }
    }
}
