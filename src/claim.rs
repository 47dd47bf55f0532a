//! Claim transaction construction, signing and broadcast
//!
//! A claim spends the contract output with the miner's nonce, advances the
//! contract (or burns it on the last mint), pays the reward as a fungible
//! token output and consolidates every funding output into the change.

use crate::chain::{self, DynChainClient};
use crate::constants::*;
use crate::error::{DmintError, Result};
use crate::script::{encode_burn, encode_state, push_data, token_transfer_script, DmintState};
use crate::transaction::{calculate_fee, sha256d, sign_p2pkh_input, P2PKH_SCRIPT_SIG_SIZE};
use crate::types::*;
use crate::wallet::{Address, Wallet};
use log::debug;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a claim was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    MissingInputs,
    FeeNotMet,
    MempoolConflict,
    ContractExecutionFailed,
    Unknown,
}

impl FailureReason {
    /// Classify a node rejection message by case-insensitive substring
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("missing inputs") {
            FailureReason::MissingInputs
        } else if msg.contains("min relay fee not met") || msg.contains("bad-txns-in-belowout") {
            FailureReason::FeeNotMet
        } else if msg.contains("txn-mempool-conflict") {
            FailureReason::MempoolConflict
        } else if msg.contains("mandatory-script-verify-flag-failed") {
            FailureReason::ContractExecutionFailed
        } else {
            FailureReason::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MissingInputs => "missing-inputs",
            FailureReason::FeeNotMet => "fee-not-met",
            FailureReason::MempoolConflict => "mempool-conflict",
            FailureReason::ContractExecutionFailed => "contract-execution-failed",
            FailureReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed rejection; carries the underlying message for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRejection {
    pub reason: FailureReason,
    pub message: String,
}

impl fmt::Display for ClaimRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for ClaimRejection {}

impl From<DmintError> for ClaimRejection {
    fn from(err: DmintError) -> Self {
        let reason = match &err {
            DmintError::InsufficientFunds { .. } => FailureReason::FeeNotMet,
            DmintError::Chain(message) => FailureReason::classify(message),
            _ => FailureReason::Unknown,
        };
        ClaimRejection { reason, message: err.to_string() }
    }
}

/// Everything a claim needs; borrowed from the caller's ledger
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    pub contract: &'a Contract,
    pub work: &'a Work,
    pub nonce: &'a Nonce,
    pub wallet: &'a Wallet,
    pub mine_to: &'a Address,
    pub utxos: &'a [Utxo],
    pub fee_per_kb: u64,
}

/// A signed claim ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedClaim {
    pub tx: Transaction,
    /// Index and value of the change output, when one was added
    pub change: Option<(u32, u64)>,
    pub last_mint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSuccess {
    pub txid: Txid,
    pub change: Option<Utxo>,
}

/// `push(nonce) push(H(inputScript)) push(H(outputScript)) OP_0`
pub fn contract_unlocking_script(nonce: &Nonce, work: &Work) -> ByteString {
    let mut script = push_data(&nonce.0);
    script.extend(push_data(&sha256d(&work.input_script)));
    script.extend(push_data(&sha256d(&work.output_script)));
    script.push(OP_0);
    script
}

fn funding_input(utxo: &Utxo) -> TransactionInput {
    TransactionInput {
        prevout: OutPoint { hash: utxo.tx_hash, index: utxo.tx_pos },
        script_sig: Vec::new(),
        sequence: SEQUENCE_FINAL,
    }
}

/// Append a change output to `tx` paying `change_script`, sized for signed
/// funding inputs starting at `first_funding`. Returns the change output.
fn add_change(
    tx: &mut Transaction,
    first_funding: usize,
    input_value: u64,
    change_script: ByteString,
    fee_per_kb: u64,
) -> Result<Option<(u32, u64)>> {
    let mut estimate = tx.clone();
    for input in estimate.inputs.iter_mut().skip(first_funding) {
        input.script_sig = vec![0; P2PKH_SCRIPT_SIG_SIZE];
    }
    estimate.outputs.push(TransactionOutput { value: 0, script_pubkey: change_script.clone() });

    let fee = calculate_fee(estimate.size(), fee_per_kb);
    let needed = tx.output_value().saturating_add(fee);
    if input_value < needed {
        return Err(DmintError::InsufficientFunds { needed, available: input_value });
    }

    let change = input_value - needed;
    if change < DUST_LIMIT {
        debug!("Change of {change} below dust, left to fee");
        return Ok(None);
    }

    tx.outputs.push(TransactionOutput { value: change, script_pubkey: change_script });
    Ok(Some((tx.outputs.len() as u32 - 1, change)))
}

/// BuildClaim: Contract × Work × Nonce → signed transaction
///
/// 1. Input 0 spends the contract with the nonce unlocking script
/// 2. Every funding output follows as a P2PKH input
/// 3. Outputs: next state (or burn), token reward, work payload, change
pub fn build_claim_transaction(request: &ClaimRequest<'_>) -> Result<SignedClaim> {
    let ClaimRequest { contract, work, nonce, wallet, mine_to, utxos, fee_per_kb } = *request;

    if contract.is_minted_out() {
        return Err(DmintError::InvariantViolation(format!(
            "contract {} already at max height {}",
            contract.contract_ref, contract.max_height
        )));
    }
    if nonce.0.is_empty() {
        return Err(DmintError::InvariantViolation("empty nonce".to_string()));
    }
    let reward = contract
        .reward
        .to_u64()
        .ok_or_else(|| DmintError::InvariantViolation(format!("reward {} exceeds amount range", contract.reward)))?;

    let next_height = &contract.height + 1u32;
    let last_mint = next_height == contract.max_height;

    let mut inputs = vec![TransactionInput {
        prevout: OutPoint { hash: contract.location, index: contract.output_index },
        script_sig: contract_unlocking_script(nonce, work),
        sequence: SEQUENCE_FINAL,
    }];
    inputs.extend(utxos.iter().map(funding_input));

    let contract_output = if last_mint {
        TransactionOutput { value: 0, script_pubkey: encode_burn(&contract.contract_ref) }
    } else {
        let state = DmintState { height: next_height, ..DmintState::from(contract) };
        TransactionOutput { value: CONTRACT_OUTPUT_VALUE, script_pubkey: encode_state(&state) }
    };

    let outputs = vec![
        contract_output,
        TransactionOutput {
            value: reward,
            script_pubkey: token_transfer_script(&mine_to.script_pubkey(), &contract.token_ref),
        },
        TransactionOutput { value: 0, script_pubkey: work.output_script.clone() },
    ];

    let mut tx = Transaction { version: TX_VERSION, inputs, outputs, lock_time: 0 };

    let funding: u64 = utxos.iter().map(|u| u.value).sum();
    let input_value = funding.saturating_add(CONTRACT_OUTPUT_VALUE);
    let funding_script = wallet.address.script_pubkey();
    let change = add_change(&mut tx, 1, input_value, funding_script.clone(), fee_per_kb)?;

    for (i, utxo) in utxos.iter().enumerate() {
        sign_p2pkh_input(&mut tx, i + 1, &wallet.secret_key, &funding_script, utxo.value)?;
    }

    Ok(SignedClaim { tx, change, last_mint })
}

/// ClaimTokens: build, sign and broadcast; every failure is a rejection
pub async fn claim_tokens(
    client: &DynChainClient,
    request: &ClaimRequest<'_>,
) -> std::result::Result<ClaimSuccess, ClaimRejection> {
    let signed = build_claim_transaction(request)?;
    let hex = signed.tx.to_hex();

    debug!("Broadcasting {hex}");
    let txid = chain::broadcast(client, &hex).await.map_err(|err| {
        debug!("Broadcast failed: {err}");
        ClaimRejection::from(err)
    })?;
    debug!("txid {txid}");

    let change = signed.change.map(|(tx_pos, value)| Utxo { tx_hash: txid, tx_pos, value });
    Ok(ClaimSuccess { txid, change })
}

pub fn build_sweep_transaction(wallet: &Wallet, to: &Address, utxos: &[Utxo], fee_per_kb: u64) -> Result<Transaction> {
    if utxos.is_empty() {
        return Err(DmintError::InsufficientFunds { needed: DUST_LIMIT, available: 0 });
    }

    let mut tx = Transaction {
        version: TX_VERSION,
        inputs: utxos.iter().map(funding_input).collect(),
        outputs: Vec::new(),
        lock_time: 0,
    };

    let funding: u64 = utxos.iter().map(|u| u.value).sum();
    if add_change(&mut tx, 0, funding, to.script_pubkey(), fee_per_kb)?.is_none() {
        return Err(DmintError::InsufficientFunds { needed: DUST_LIMIT, available: funding });
    }

    let funding_script = wallet.address.script_pubkey();
    for (i, utxo) in utxos.iter().enumerate() {
        sign_p2pkh_input(&mut tx, i, &wallet.secret_key, &funding_script, utxo.value)?;
    }
    Ok(tx)
}

/// Send every funding output to `to`. A failed broadcast keeps the node's message.
pub async fn sweep_wallet(
    client: &DynChainClient,
    wallet: &Wallet,
    to: &Address,
    utxos: &[Utxo],
    fee_per_kb: u64,
) -> Result<Txid> {
    debug!("Sweeping {} to {to}", wallet.address);
    let tx = build_sweep_transaction(wallet, to, utxos, fee_per_kb)?;
    chain::broadcast(client, &tx.to_hex()).await
}
