//! Chain client boundary
//!
//! The core only issues requests and consumes status streams; transport,
//! retries and reconnection belong to the implementor.

use crate::constants::*;
use crate::error::{DmintError, Result};
use crate::types::*;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Stream of subscription status values, one per notification
pub type StatusReceiver = mpsc::UnboundedReceiver<Value>;

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value>;

    async fn subscribe(&self, method: &str, params: Vec<Value>) -> Result<StatusReceiver>;

    async fn unsubscribe(&self, method: &str, params: Vec<Value>) -> Result<()>;
}

pub type DynChainClient = dyn ChainClient;

/// One transaction that has held a reference
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefEntry {
    pub tx_hash: Txid,
    #[serde(default)]
    pub height: Option<i64>,
}

pub async fn list_unspent(client: &DynChainClient, script_hash: &str) -> Result<Vec<Utxo>> {
    let response = client.request(METHOD_LIST_UNSPENT, vec![json!(script_hash)]).await?;
    if response.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(response)?)
}

pub async fn get_transaction(client: &DynChainClient, txid: &Txid) -> Result<String> {
    let response = client.request(METHOD_GET_TRANSACTION, vec![json!(txid.to_hex())]).await?;
    response
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| DmintError::Chain(format!("transaction {txid} returned non-string payload")))
}

/// Submit raw transaction hex; the returned error carries the node's message
pub async fn broadcast(client: &DynChainClient, tx_hex: &str) -> Result<Txid> {
    let response = client.request(METHOD_BROADCAST, vec![json!(tx_hex)]).await?;
    let txid = response
        .as_str()
        .ok_or_else(|| DmintError::Chain("broadcast returned non-string txid".to_string()))?;
    Txid::from_hex(txid)
}

/// All transactions that have held `contract_ref`, genesis first
pub async fn get_ref(client: &DynChainClient, contract_ref: &ContractRef) -> Result<Vec<RefEntry>> {
    let response = client.request(METHOD_GET_REF, vec![json!(contract_ref.to_be_hex())]).await?;
    if response.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(response)?)
}
