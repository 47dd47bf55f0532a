//! Contract resolution: reference history → current contract state

use crate::cache::{get_as, set_as, DynCache};
use crate::chain::{self, DynChainClient};
use crate::constants::*;
use crate::error::{DmintError, Result};
use crate::glyph::decode_glyph;
use crate::script::{decode_burn, decode_message, decode_state};
use crate::types::*;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What a transaction says about one contract reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedContractTx {
    Active(Contract),
    Burn { contract_ref: ContractRef, output_index: u32, message: String },
}

impl ParsedContractTx {
    pub fn message(&self) -> &str {
        match self {
            ParsedContractTx::Active(contract) => &contract.message,
            ParsedContractTx::Burn { message, .. } => message,
        }
    }
}

/// ParseContractTx: 𝒯𝒳 × Ref → Active ∪ Burn ∪ {none}
///
/// 1. Each output is tried as a state script, then a burn, then a message
/// 2. Only the first message is kept
/// 3. The first state script holding `contract_ref` wins
/// 4. Without one, a burn of `contract_ref` marks the contract terminal
pub fn parse_contract_tx(tx: &Transaction, txid: Txid, contract_ref: &ContractRef) -> Option<ParsedContractTx> {
    let mut states = Vec::new();
    let mut burn_index = None;
    let mut message = None;

    for (index, output) in tx.outputs.iter().enumerate() {
        let index = index as u32;
        let script = &output.script_pubkey;

        if let Some(state) = decode_state(script) {
            states.push((index, state, script));
        } else if let Some(burned) = decode_burn(script) {
            if burned == *contract_ref && burn_index.is_none() {
                burn_index = Some(index);
            }
        } else if message.is_none() {
            message = decode_message(script);
        }
    }

    let message = message.unwrap_or_default();

    let active = states.into_iter().find(|(_, state, _)| state.contract_ref == *contract_ref);
    if let Some((output_index, state, script)) = active {
        return Some(ParsedContractTx::Active(Contract {
            location: txid,
            output_index,
            height: state.height,
            contract_ref: state.contract_ref,
            token_ref: state.token_ref,
            max_height: state.max_height,
            reward: state.reward,
            target: state.target,
            script: script.clone(),
            message,
        }));
    }

    match burn_index {
        Some(output_index) => Some(ParsedContractTx::Burn { contract_ref: *contract_ref, output_index, message }),
        None => {
            debug!("dmint contract {contract_ref} not found in {txid}");
            None
        }
    }
}

/// A curated deployment: `txid_vouthex` of the first contract and the
/// number of contracts deployed at consecutive output indexes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment(pub String, pub u32);

impl Deployment {
    /// Refs of every contract in the deployment, with the first output index
    pub fn expand(&self) -> Result<(u32, Vec<ContractRef>)> {
        let Deployment(singleton, count) = self;
        let (txid, vout) = singleton
            .get(..64)
            .zip(singleton.get(65..))
            .ok_or_else(|| DmintError::InvalidReference(format!("malformed deployment {singleton}")))?;
        let txid = Txid::from_hex(txid)?;
        let first_vout =
            u32::from_str_radix(vout, 16).map_err(|e| DmintError::InvalidReference(format!("{singleton}: {e}")))?;

        let refs = (0..*count)
            .map(|i| first_vout.checked_add(i).map(|vout| ContractRef::new(txid, vout)))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DmintError::InvalidReference(format!("{singleton}: output index overflow")))?;
        Ok((first_vout, refs))
    }
}

#[async_trait]
pub trait DeploymentSource: Send + Sync {
    async fn deployments(&self) -> Result<Vec<Deployment>>;
}

/// One page of resolved deployments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPage {
    pub contract_groups: Vec<ContractGroup>,
    pub pages: usize,
}

const ALL_DEPLOYMENTS_KEY: &str = "tokens";

fn page_key(page: usize) -> String {
    format!("tokens-{page}")
}

fn group_key(first_ref: &str) -> String {
    format!("contractGroup.{first_ref}")
}

pub struct Resolver {
    client: Arc<DynChainClient>,
    cache: Arc<DynCache>,
    results_per_page: usize,
    batch_size: usize,
}

impl Resolver {
    pub fn new(client: Arc<DynChainClient>, cache: Arc<DynCache>) -> Self {
        Self { client, cache, results_per_page: RESULTS_PER_PAGE, batch_size: RESOLVE_BATCH_SIZE }
    }

    pub fn with_paging(mut self, results_per_page: usize, batch_size: usize) -> Self {
        self.results_per_page = results_per_page.max(1);
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn client(&self) -> &Arc<DynChainClient> {
        &self.client
    }

    /// Fetch a transaction; `fresh` skips the cache lookup but still stores
    pub async fn fetch_tx(&self, txid: &Txid, fresh: bool) -> Result<Transaction> {
        let key = txid.to_hex();
        if !fresh {
            if let Some(hex) = get_as::<String>(self.cache.as_ref(), &key) {
                return Transaction::from_hex(&hex);
            }
        }

        let hex = chain::get_transaction(self.client.as_ref(), txid).await?;
        let tx = Transaction::from_hex(&hex)?;
        self.cache.set(&key, serde_json::Value::String(hex));
        Ok(tx)
    }

    /// Genesis and most recent transaction ids holding `contract_ref`
    pub async fn fetch_ref(&self, contract_ref: &ContractRef) -> Result<Option<(Txid, Txid)>> {
        let entries = chain::get_ref(self.client.as_ref(), contract_ref).await?;
        match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => Ok(Some((first.tx_hash, last.tx_hash))),
            _ => Ok(None),
        }
    }

    /// Re-read the contract at `location`, bypassing the cache
    pub async fn parse_location(&self, location: &Txid, contract_ref: &ContractRef) -> Result<Option<ParsedContractTx>> {
        let tx = self.fetch_tx(location, true).await?;
        Ok(parse_contract_tx(&tx, *location, contract_ref))
    }

    /// Resolve a big-endian hex reference. Malformed input is not an error.
    pub async fn resolve(&self, contract_ref: &str) -> Result<Option<Token>> {
        match ContractRef::from_be_hex(contract_ref) {
            Ok(r) => self.resolve_ref(&r).await,
            Err(_) => {
                debug!("Not a ref: {contract_ref}");
                Ok(None)
            }
        }
    }

    /// Resolve: Ref → Token ∪ {none}
    ///
    /// 1. Walk the reference history to its genesis and latest transactions
    /// 2. The genesis must reveal an active state script for the ref
    /// 3. A burned latest location yields a terminal contract at `max_height`
    /// 4. The genesis input spending `token_ref` carries the glyph
    pub async fn resolve_ref(&self, contract_ref: &ContractRef) -> Result<Option<Token>> {
        debug!("Fetching {contract_ref}");

        let Some((reveal_txid, latest_txid)) = self.fetch_ref(contract_ref).await? else {
            debug!("Ref not found: {contract_ref}");
            return Ok(None);
        };

        let reveal_tx = self.fetch_tx(&reveal_txid, false).await?;
        let reveal = match parse_contract_tx(&reveal_tx, reveal_txid, contract_ref) {
            Some(ParsedContractTx::Active(contract)) => contract,
            _ => return Ok(None),
        };

        let current = if latest_txid == reveal_txid {
            reveal
        } else {
            match self.parse_location(&latest_txid, contract_ref).await? {
                Some(ParsedContractTx::Active(contract)) => contract,
                Some(ParsedContractTx::Burn { output_index, message, .. }) => Contract {
                    location: latest_txid,
                    output_index,
                    height: reveal.max_height.clone(),
                    message,
                    ..reveal
                },
                None => return Ok(None),
            }
        };

        let token_outpoint = current.token_ref.outpoint();
        let Some(input) = reveal_tx.inputs.iter().find(|i| i.prevout == token_outpoint) else {
            debug!("Glyph script not found for {contract_ref}");
            return Ok(None);
        };

        let Some(glyph) = decode_glyph(&input.script_sig) else {
            debug!("Invalid glyph script for {contract_ref}");
            return Ok(None);
        };

        Ok(Some(Token { glyph, contract: current }))
    }

    async fn resolve_cached(&self, contract_ref: ContractRef) -> Option<Token> {
        let key = contract_ref.to_be_hex();
        if let Some(token) = get_as::<Token>(self.cache.as_ref(), &key) {
            return Some(token);
        }

        match self.resolve_ref(&contract_ref).await {
            Ok(Some(token)) => {
                set_as(self.cache.as_ref(), &key, &token);
                Some(token)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to resolve {contract_ref}: {err}");
                None
            }
        }
    }

    pub fn cached_contract_group(&self, first_ref: &str) -> Option<ContractGroup> {
        get_as(self.cache.as_ref(), &group_key(first_ref))
    }

    /// FetchDeployments: Source × ℕ → ContractGroup* × ℕ
    ///
    /// 1. A cached page returns its cached groups without touching the chain
    /// 2. Otherwise the page's deployments are expanded into contract refs
    /// 3. Refs are resolved in parallel batches, cached tokens first
    /// 4. Tokens are grouped by the ref of the deployment's first contract
    pub async fn fetch_deployments(
        &self,
        source: &dyn DeploymentSource,
        page: usize,
        refresh: bool,
        progress: &mut (dyn FnMut(f64) + Send),
    ) -> Result<DeploymentPage> {
        if refresh {
            self.cache.clear();
        }

        let cache = self.cache.as_ref();
        let page_count = |total: usize| total.div_ceil(self.results_per_page);

        if let Some(first_refs) = get_as::<Vec<String>>(cache, &page_key(page)) {
            let all = get_as::<Vec<Deployment>>(cache, ALL_DEPLOYMENTS_KEY).unwrap_or_default();
            if !all.is_empty() {
                let contract_groups = first_refs.iter().filter_map(|r| self.cached_contract_group(r)).collect();
                return Ok(DeploymentPage { contract_groups, pages: page_count(all.len()) });
            }
        }

        let all = match get_as::<Vec<Deployment>>(cache, ALL_DEPLOYMENTS_KEY) {
            Some(all) => all,
            None => {
                let all = source.deployments().await.unwrap_or_else(|err| {
                    warn!("Failed to fetch deployments: {err}");
                    Vec::new()
                });
                if !all.is_empty() {
                    set_as(cache, ALL_DEPLOYMENTS_KEY, &all);
                }
                all
            }
        };

        let expanded: Vec<(u32, ContractRef)> = all
            .iter()
            .skip(page * self.results_per_page)
            .take(self.results_per_page)
            .filter_map(|d| match d.expand() {
                Ok((first_vout, refs)) => Some(refs.into_iter().map(move |r| (first_vout, r))),
                Err(err) => {
                    warn!("Skipping deployment: {err}");
                    None
                }
            })
            .flatten()
            .collect();

        let mut tokens = Vec::new();
        let mut done = 0usize;
        for batch in expanded.chunks(self.batch_size) {
            let resolved = join_all(batch.iter().map(|(_, r)| self.resolve_cached(*r))).await;
            for ((first_vout, _), token) in batch.iter().zip(resolved) {
                done += 1;
                progress(done as f64 / expanded.len() as f64 * 100.0);
                if let Some(token) = token {
                    tokens.push((*first_vout, token));
                }
            }
        }

        let mut order = Vec::new();
        let mut groups: HashMap<String, ContractGroup> = HashMap::new();
        for (first_vout, token) in tokens {
            let first_ref = ContractRef::new(token.contract.contract_ref.txid, first_vout).to_be_hex();
            let group = groups.entry(first_ref.clone()).or_insert_with(|| {
                order.push(first_ref);
                ContractGroup::new(token.glyph.clone())
            });
            group.push(token.contract);
        }

        for first_ref in &order {
            set_as(cache, &group_key(first_ref), &groups[first_ref]);
        }
        set_as(cache, &page_key(page), &order);

        let contract_groups = order.iter().filter_map(|r| groups.remove(r)).collect();
        Ok(DeploymentPage { contract_groups, pages: page_count(all.len()) })
    }
}
