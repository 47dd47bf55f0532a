//! Core types for dmint contract resolution and claiming

use crate::constants::REF_LEN;
use crate::error::{DmintError, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Transaction id, stored in internal (hashing) byte order.
///
/// Hex conversions use display order, i.e. the byte-reversed form shown by
/// explorers and returned by the chain client.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid(pub Hash);

impl Txid {
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes: Hash = hex::decode(s)?
            .try_into()
            .map_err(|_| DmintError::TransactionDecode(format!("txid must be 32 bytes: {s}")))?;
        bytes.reverse();
        Ok(Txid(bytes))
    }

    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self.to_hex())
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Txid::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A 36-byte reference to an outpoint lineage.
///
/// Two encodings exist and are never mixed implicitly:
/// - big-endian (display/storage): display-order txid ‖ output index as u32 BE
/// - little-endian (script): internal-order txid ‖ output index as u32 LE
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractRef {
    pub txid: Txid,
    pub vout: u32,
}

impl ContractRef {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Parse the big-endian display form (72 hex chars)
    pub fn from_be_hex(s: &str) -> Result<Self> {
        if s.len() != REF_LEN * 2 {
            return Err(DmintError::InvalidReference(format!("expected 72 hex chars, got {}", s.len())));
        }
        let bytes = hex::decode(s).map_err(|e| DmintError::InvalidReference(e.to_string()))?;
        let mut txid: Hash = [0; 32];
        txid.copy_from_slice(&bytes[..32]);
        txid.reverse();
        let vout = u32::from_be_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        Ok(Self { txid: Txid(txid), vout })
    }

    pub fn to_be_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(REF_LEN);
        let mut txid = self.txid.0;
        txid.reverse();
        bytes.extend_from_slice(&txid);
        bytes.extend_from_slice(&self.vout.to_be_bytes());
        hex::encode(bytes)
    }

    /// Parse the little-endian script form
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != REF_LEN {
            return None;
        }
        let mut txid: Hash = [0; 32];
        txid.copy_from_slice(&bytes[..32]);
        let vout = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        Some(Self { txid: Txid(txid), vout })
    }

    pub fn to_le_bytes(&self) -> [u8; REF_LEN] {
        let mut bytes = [0u8; REF_LEN];
        bytes[..32].copy_from_slice(&self.txid.0);
        bytes[32..].copy_from_slice(&self.vout.to_le_bytes());
        bytes
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint { hash: self.txid, index: self.vout }
    }
}

impl FromStr for ContractRef {
    type Err = DmintError;

    fn from_str(s: &str) -> Result<Self> {
        ContractRef::from_be_hex(s)
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_be_hex())
    }
}

impl fmt::Debug for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractRef({})", self.to_be_hex())
    }
}

impl Serialize for ContractRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_be_hex())
    }
}

impl<'de> Deserialize<'de> for ContractRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContractRef::from_be_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// OutPoint: txid × output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Txid,
    pub index: u32,
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    #[serde(with = "hex")]
    pub script_sig: ByteString,
    pub sequence: u32,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    #[serde(with = "hex")]
    pub script_pubkey: ByteString,
}

/// Transaction in legacy wire layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

/// Unspent output as reported by `blockchain.scripthash.listunspent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    pub value: u64,
}

/// Funding outputs tracked for the wallet.
///
/// After a successful claim the set holds only the claim's change output and
/// is marked provisional: the transaction may still be replaced. Only a
/// refresh from the chain client reconciles it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    pub utxos: Vec<Utxo>,
    pub provisional: bool,
}

impl UtxoSet {
    pub fn confirmed(utxos: Vec<Utxo>) -> Self {
        Self { utxos, provisional: false }
    }

    pub fn provisional(utxos: Vec<Utxo>) -> Self {
        Self { utxos, provisional: true }
    }

    pub fn balance(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).sum()
    }
}

/// A live (or terminal) dmint contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub location: Txid,
    pub output_index: u32,
    pub height: BigUint,
    pub contract_ref: ContractRef,
    pub token_ref: ContractRef,
    pub max_height: BigUint,
    pub reward: BigUint,
    pub target: BigUint,
    #[serde(with = "hex")]
    pub script: ByteString,
    pub message: String,
}

impl Contract {
    pub fn is_minted_out(&self) -> bool {
        self.height >= self.max_height
    }
}

/// Work produced by the external miner for the current contract location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    #[serde(with = "hex")]
    pub input_script: ByteString,
    #[serde(with = "hex")]
    pub output_script: ByteString,
    pub contract_ref: ContractRef,
}

/// Candidate nonce found by the miner
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Nonce(pub ByteString);

impl Nonce {
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Nonce(hex::decode(s)?))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({self})")
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

/// Token-definition payload carried by the reveal input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glyph {
    #[serde(with = "hex")]
    pub payload: ByteString,
}

/// Decoded token metadata paired with its contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub glyph: Glyph,
    pub contract: Contract,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub num_contracts: usize,
    pub total_supply: BigUint,
    pub minted_supply: BigUint,
}

/// All contracts deployed under one genesis reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractGroup {
    pub glyph: Glyph,
    pub summary: ContractSummary,
    pub contracts: Vec<Contract>,
}

impl ContractGroup {
    pub fn new(glyph: Glyph) -> Self {
        Self { glyph, summary: ContractSummary::default(), contracts: Vec::new() }
    }

    pub fn push(&mut self, contract: Contract) {
        self.summary.num_contracts += 1;
        self.summary.total_supply += &contract.max_height * &contract.reward;
        self.summary.minted_supply += &contract.height * &contract.reward;
        self.contracts.push(contract);
    }
}

/// State reported to the external miner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MiningStatus {
    Ready,
    Mining,
    /// Work must be re-derived against a new contract location
    Change,
    Stop,
}
