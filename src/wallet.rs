//! P2PKH addresses and the signing wallet supplied by key storage

use crate::constants::P2PKH_ADDRESS_VERSION;
use crate::error::{DmintError, Result};
use crate::script::{hash160, p2pkh, script_hash};
use crate::types::ByteString;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::fmt;
use std::str::FromStr;

/// Base58check pay-to-public-key-hash address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub version: u8,
    pub pubkey_hash: [u8; 20],
}

impl Address {
    pub fn from_public_key(public_key: &PublicKey, version: u8) -> Self {
        Self { version, pubkey_hash: hash160(&public_key.serialize()) }
    }

    pub fn script_pubkey(&self) -> ByteString {
        p2pkh(&self.pubkey_hash)
    }

    /// Fingerprint used for `blockchain.scripthash` requests
    pub fn script_hash(&self) -> String {
        script_hash(&self.script_pubkey())
    }
}

impl FromStr for Address {
    type Err = DmintError;

    fn from_str(s: &str) -> Result<Self> {
        let data = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| DmintError::InvalidAddress(format!("{s}: {e}")))?;

        let [version, hash @ ..] = data.as_slice() else {
            return Err(DmintError::InvalidAddress(format!("{s}: empty payload")));
        };
        let pubkey_hash: [u8; 20] = hash
            .try_into()
            .map_err(|_| DmintError::InvalidAddress(format!("{s}: expected 20-byte hash, got {}", hash.len())))?;

        Ok(Self { version: *version, pubkey_hash })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = Vec::with_capacity(21);
        data.push(self.version);
        data.extend_from_slice(&self.pubkey_hash);
        f.write_str(&bs58::encode(data).with_check().into_string())
    }
}

/// Key material for funding and change
#[derive(Clone)]
pub struct Wallet {
    pub secret_key: SecretKey,
    pub address: Address,
}

impl Wallet {
    pub fn new(secret_key: SecretKey) -> Self {
        Self::with_version(secret_key, P2PKH_ADDRESS_VERSION)
    }

    pub fn with_version(secret_key: SecretKey, version: u8) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self { secret_key, address: Address::from_public_key(&public_key, version) }
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet").field("address", &self.address.to_string()).finish_non_exhaustive()
    }
}
