//! Transaction wire format, signature hashing and signing

use crate::constants::*;
use crate::error::{DmintError, Result};
use crate::script::{parse_instructions, push_data, Instruction};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// Size of a signed P2PKH unlocking script: max DER signature + sighash byte
/// and a compressed public key, each with a one-byte push
pub const P2PKH_SCRIPT_SIG_SIZE: usize = 1 + 72 + 1 + 33;

/// Double SHA-256
pub fn sha256d(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn write_outpoint(out: &mut Vec<u8>, outpoint: &OutPoint) {
    out.extend_from_slice(outpoint.hash.as_bytes());
    out.extend_from_slice(&outpoint.index.to_le_bytes());
}

fn write_output(out: &mut Vec<u8>, output: &TransactionOutput) {
    out.extend_from_slice(&output.value.to_le_bytes());
    write_bytes(out, &output.script_pubkey);
}

/// Serialize: version ‖ inputs ‖ outputs ‖ lock_time
pub fn serialize_transaction(tx: &Transaction) -> ByteString {
    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());

    write_varint(&mut out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        write_outpoint(&mut out, &input.prevout);
        write_bytes(&mut out, &input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_varint(&mut out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        write_output(&mut out, output);
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| DmintError::TransactionDecode(format!("unexpected end of data at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn varint(&mut self) -> Result<u64> {
        let first = self.take(1)?[0];
        Ok(match first {
            0xfd => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as u64
            }
            0xfe => self.u32()? as u64,
            0xff => self.u64()?,
            n => n as u64,
        })
    }

    fn bytes(&mut self) -> Result<ByteString> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| DmintError::TransactionDecode(format!("length {len} too large")))?;
        Ok(self.take(len)?.to_vec())
    }
}

/// Parse a transaction from wire bytes. Trailing bytes are an error.
pub fn deserialize_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut reader = Reader { bytes, pos: 0 };
    let version = reader.u32()?;

    let input_count = reader.varint()?;
    let mut inputs = Vec::new();
    for _ in 0..input_count {
        let mut hash: Hash = [0; 32];
        hash.copy_from_slice(reader.take(32)?);
        let index = reader.u32()?;
        let script_sig = reader.bytes()?;
        let sequence = reader.u32()?;
        inputs.push(TransactionInput { prevout: OutPoint { hash: Txid(hash), index }, script_sig, sequence });
    }

    let output_count = reader.varint()?;
    let mut outputs = Vec::new();
    for _ in 0..output_count {
        let value = reader.u64()?;
        let script_pubkey = reader.bytes()?;
        outputs.push(TransactionOutput { value, script_pubkey });
    }

    let lock_time = reader.u32()?;
    if reader.pos != bytes.len() {
        return Err(DmintError::TransactionDecode(format!(
            "{} trailing bytes after transaction",
            bytes.len() - reader.pos
        )));
    }

    Ok(Transaction { version, inputs, outputs, lock_time })
}

impl Transaction {
    pub fn from_hex(s: &str) -> Result<Self> {
        deserialize_transaction(&hex::decode(s)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(serialize_transaction(self))
    }

    /// TxId = SHA256d(Serialize(tx))
    pub fn txid(&self) -> Txid {
        Txid(sha256d(&serialize_transaction(self)))
    }

    pub fn size(&self) -> usize {
        serialize_transaction(self).len()
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

/// Fee for a transaction of `size` bytes, rounded up
pub fn calculate_fee(size: usize, fee_per_kb: u64) -> u64 {
    (size as u64 * fee_per_kb + 999) / 1000
}

/// Push references committed by an output script, sorted and deduplicated
fn output_push_refs(script: &[u8]) -> Vec<[u8; REF_LEN]> {
    let mut refs: Vec<[u8; REF_LEN]> = parse_instructions(script)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|i| match i {
            Instruction::Push { opcode: OP_PUSHINPUTREF | OP_PUSHINPUTREFSINGLETON, data } => data.try_into().ok(),
            _ => None,
        })
        .collect();
    refs.sort_unstable();
    refs.dedup();
    refs
}

/// Commitment to every output's value, script hash and pushed references
fn hash_output_hashes(tx: &Transaction) -> Hash {
    let mut engine = sha256d::Hash::engine();
    for output in &tx.outputs {
        engine.input(&output.value.to_le_bytes());
        engine.input(&sha256d(&output.script_pubkey));

        let refs = output_push_refs(&output.script_pubkey);
        engine.input(&(refs.len() as u32).to_le_bytes());
        if refs.is_empty() {
            engine.input(&[0u8; 32]);
        } else {
            engine.input(&sha256d(&refs.concat()));
        }
    }
    sha256d::Hash::from_engine(engine).into_inner()
}

/// SignatureHash for SIGHASH_ALL | SIGHASH_FORKID
///
/// preimage = version ‖ H(prevouts) ‖ H(sequences) ‖ outpoint ‖ scriptCode ‖
///            value ‖ sequence ‖ H(output hashes) ‖ H(outputs) ‖ lock_time ‖ type
pub fn signature_hash(tx: &Transaction, input_index: usize, script_code: &[u8], value: u64) -> Result<Hash> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or_else(|| DmintError::Signing(format!("input {input_index} out of range")))?;

    let mut prevouts = Vec::with_capacity(tx.inputs.len() * 36);
    let mut sequences = Vec::with_capacity(tx.inputs.len() * 4);
    for i in &tx.inputs {
        write_outpoint(&mut prevouts, &i.prevout);
        sequences.extend_from_slice(&i.sequence.to_le_bytes());
    }

    let mut outputs = Vec::new();
    for o in &tx.outputs {
        write_output(&mut outputs, o);
    }

    let mut preimage = Vec::new();
    preimage.extend_from_slice(&tx.version.to_le_bytes());
    preimage.extend_from_slice(&sha256d(&prevouts));
    preimage.extend_from_slice(&sha256d(&sequences));
    write_outpoint(&mut preimage, &input.prevout);
    write_bytes(&mut preimage, script_code);
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&hash_output_hashes(tx));
    preimage.extend_from_slice(&sha256d(&outputs));
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&SIGHASH_ALL_FORKID.to_le_bytes());

    Ok(sha256d(&preimage))
}

/// Sign a P2PKH input in place: `<sig ‖ sighash type> <pubkey>`
pub fn sign_p2pkh_input(
    tx: &mut Transaction,
    input_index: usize,
    secret_key: &SecretKey,
    prev_script: &[u8],
    prev_value: u64,
) -> Result<()> {
    let secp = Secp256k1::signing_only();
    let digest = signature_hash(tx, input_index, prev_script, prev_value)?;
    let message = Message::from_digest_slice(&digest)?;
    let signature = secp.sign_ecdsa(&message, secret_key);

    let mut sig = signature.serialize_der().to_vec();
    sig.push(SIGHASH_ALL_FORKID as u8);
    let pubkey = PublicKey::from_secret_key(&secp, secret_key).serialize();

    let mut script_sig = push_data(&sig);
    script_sig.extend(push_data(&pubkey));
    tx.inputs[input_index].script_sig = script_sig;
    Ok(())
}
