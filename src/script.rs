//! dmint script templates: state, burn and message scripts
//!
//! Contract scripts come from a single known template, so recognition is an
//! exact byte-window comparison against the template constants. Variable
//! fields are read with an explicit push decoder. Any divergence in a state or
//! burn script yields `None`. A message script is only read up to its first push.

use crate::constants::*;
use crate::types::*;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, ToPrimitive, Zero};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// A single script instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Data push (direct, PUSHDATA1/2/4) or a 36-byte reference operand
    Push { opcode: u8, data: &'a [u8] },
    Op(u8),
}

impl<'a> Instruction<'a> {
    pub fn push_data(&self) -> Option<&'a [u8]> {
        match self {
            Instruction::Push { opcode, data } if *opcode <= OP_PUSHDATA4 => Some(data),
            _ => None,
        }
    }
}

/// Opcodes that carry an inline 36-byte reference operand
fn is_ref_opcode(opcode: u8) -> bool {
    matches!(opcode, 0xd0..=0xd3 | OP_PUSHINPUTREFSINGLETON)
}

/// Split a script into instructions.
///
/// Returns `None` when a push runs past the end of the script.
pub fn parse_instructions(script: &[u8]) -> Option<Vec<Instruction<'_>>> {
    let mut instructions = Vec::new();
    let mut pos = 0;

    while pos < script.len() {
        instructions.push(read_instruction(script, &mut pos)?);
    }

    Some(instructions)
}

/// Decode the instruction at `pos` and advance past it
pub fn read_instruction<'a>(script: &'a [u8], pos: &mut usize) -> Option<Instruction<'a>> {
    let opcode = *script.get(*pos)?;
    *pos += 1;

    let len = match opcode {
        0x01..=0x4b => opcode as usize,
        OP_PUSHDATA1 => {
            let n = *script.get(*pos)? as usize;
            *pos += 1;
            n
        }
        OP_PUSHDATA2 => {
            let b = script.get(*pos..*pos + 2)?;
            *pos += 2;
            u16::from_le_bytes([b[0], b[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let b = script.get(*pos..*pos + 4)?;
            *pos += 4;
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
        }
        op if is_ref_opcode(op) => REF_LEN,
        op => return Some(Instruction::Op(op)),
    };

    let data = script.get(*pos..pos.checked_add(len)?)?;
    *pos += len;
    Some(Instruction::Push { opcode, data })
}

/// Length-prefixed data push using the shortest push opcode for its size
pub fn push_data(data: &[u8]) -> ByteString {
    let mut out = Vec::with_capacity(data.len() + 5);
    match data.len() {
        0 => out.push(OP_0),
        n if n < OP_PUSHDATA1 as usize => out.push(n as u8),
        n if n <= 0xff => {
            out.push(OP_PUSHDATA1);
            out.push(n as u8);
        }
        n if n <= 0xffff => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        n => {
            out.push(OP_PUSHDATA4);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
    }
    out.extend_from_slice(data);
    out
}

/// Encode an integer as a script number: little-endian magnitude with the
/// sign carried in the top bit of the last byte. Zero is the empty string.
pub fn encode_script_num(n: &BigInt) -> ByteString {
    if n.is_zero() {
        return Vec::new();
    }

    let (_, mut bytes) = n.abs().to_bytes_le();
    let negative = n.is_negative();

    // The top bit is taken, so the sign needs its own byte
    if bytes.last().map_or(false, |b| b & 0x80 != 0) {
        bytes.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        if let Some(last) = bytes.last_mut() {
            *last |= 0x80;
        }
    }

    bytes
}

/// Decode a script number. Non-minimal encodings are accepted.
pub fn decode_script_num(bytes: &[u8]) -> BigInt {
    let Some((&last, _)) = bytes.split_last() else {
        return BigInt::zero();
    };

    let mut magnitude = bytes.to_vec();
    let negative = last & 0x80 != 0;
    if let Some(msb) = magnitude.last_mut() {
        *msb &= 0x7f;
    }

    let sign = if negative { Sign::Minus } else { Sign::Plus };
    BigInt::from_bytes_le(sign, &magnitude)
}

/// PushMinimal: ℤ → 𝕊
///
/// Minimal push of a script number:
/// 1. 0 → OP_0
/// 2. -1 → OP_1NEGATE
/// 3. 1..16 → OP_1..OP_16
/// 4. otherwise a data push of the minimal script-number bytes
pub fn push_minimal(n: &BigInt) -> ByteString {
    let bytes = encode_script_num(n);
    match bytes.as_slice() {
        [] => vec![OP_0],
        [0x81] => vec![OP_1NEGATE],
        [b @ 1..=16] => vec![OP_1 + b - 1],
        _ => push_data(&bytes),
    }
}

/// Inverse of [`push_minimal`] for a single instruction
pub fn decode_minimal(instruction: &Instruction<'_>) -> Option<BigInt> {
    match *instruction {
        Instruction::Op(OP_0) => Some(BigInt::zero()),
        Instruction::Op(OP_1NEGATE) => Some(BigInt::from(-1)),
        Instruction::Op(op @ OP_1..=OP_16) => Some(BigInt::from(op - OP_1 + 1)),
        Instruction::Push { opcode, data } if opcode <= OP_PUSHDATA4 => Some(decode_script_num(data)),
        _ => None,
    }
}

/// Fixed 4-byte little-endian push, clamped to the u32 range
pub fn push_4le(n: u64) -> [u8; 5] {
    let clamped = n.min(u32::MAX as u64) as u32;
    let mut out = [0u8; 5];
    out[0] = 0x04;
    out[1..].copy_from_slice(&clamped.to_le_bytes());
    out
}

/// Decoded fields of a dmint state script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmintState {
    pub height: BigUint,
    pub contract_ref: ContractRef,
    pub token_ref: ContractRef,
    pub max_height: BigUint,
    pub reward: BigUint,
    pub target: BigUint,
}

impl From<&Contract> for DmintState {
    fn from(c: &Contract) -> Self {
        Self {
            height: c.height.clone(),
            contract_ref: c.contract_ref,
            token_ref: c.token_ref,
            max_height: c.max_height.clone(),
            reward: c.reward.clone(),
            target: c.target.clone(),
        }
    }
}

/// EncodeState: height, refs and issuance parameters followed by the skeleton
pub fn encode_state(state: &DmintState) -> ByteString {
    let mut script = Vec::with_capacity(5 + 2 * (REF_LEN + 1) + 24 + DMINT_SKELETON.len());
    script.extend_from_slice(&push_4le(state.height.to_u64().unwrap_or(u64::MAX)));
    script.push(OP_PUSHINPUTREFSINGLETON);
    script.extend_from_slice(&state.contract_ref.to_le_bytes());
    script.push(OP_PUSHINPUTREF);
    script.extend_from_slice(&state.token_ref.to_le_bytes());
    script.extend(push_minimal(&BigInt::from(state.max_height.clone())));
    script.extend(push_minimal(&BigInt::from(state.reward.clone())));
    script.extend(push_minimal(&BigInt::from(state.target.clone())));
    script.extend_from_slice(&DMINT_SKELETON);
    script
}

/// DecodeState: 𝕊 → DmintState ∪ {none}
///
/// Layout: `04 <height:4> d8 <contractRef:36> d0 <tokenRef:36> <n> <n> <n> <skeleton>`
/// where each `<n>` is a non-negative script number push.
pub fn decode_state(script: &[u8]) -> Option<DmintState> {
    const HEIGHT_END: usize = 5;
    const CONTRACT_REF_END: usize = HEIGHT_END + 1 + REF_LEN;
    const TOKEN_REF_END: usize = CONTRACT_REF_END + 1 + REF_LEN;

    let prefix = script.strip_suffix(DMINT_SKELETON.as_slice())?;
    if prefix.len() < TOKEN_REF_END {
        return None;
    }

    if prefix[0] != 0x04 {
        return None;
    }
    let height = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);

    if prefix[HEIGHT_END] != OP_PUSHINPUTREFSINGLETON || prefix[CONTRACT_REF_END] != OP_PUSHINPUTREF {
        return None;
    }
    let contract_ref = ContractRef::from_le_bytes(&prefix[HEIGHT_END + 1..CONTRACT_REF_END])?;
    let token_ref = ContractRef::from_le_bytes(&prefix[CONTRACT_REF_END + 1..TOKEN_REF_END])?;

    let numbers = parse_instructions(&prefix[TOKEN_REF_END..])?;
    let [max_height, reward, target] = numbers.as_slice() else {
        return None;
    };
    let to_unsigned = |i: &Instruction<'_>| decode_minimal(i).and_then(|n| n.to_biguint());

    let state = DmintState {
        height: BigUint::from(height),
        contract_ref,
        token_ref,
        max_height: to_unsigned(max_height)?,
        reward: to_unsigned(reward)?,
        target: to_unsigned(target)?,
    };

    if state.height > state.max_height {
        return None;
    }
    Some(state)
}

/// EncodeBurn: `d8 <ref> 6a`
pub fn encode_burn(contract_ref: &ContractRef) -> ByteString {
    let mut script = Vec::with_capacity(REF_LEN + 2);
    script.push(OP_PUSHINPUTREFSINGLETON);
    script.extend_from_slice(&contract_ref.to_le_bytes());
    script.push(OP_RETURN);
    script
}

pub fn decode_burn(script: &[u8]) -> Option<ContractRef> {
    match script {
        [OP_PUSHINPUTREFSINGLETON, body @ .., OP_RETURN] => ContractRef::from_le_bytes(body),
        _ => None,
    }
}

/// DecodeMessage: `6a 03 "msg" <payload> ...` → first payload as text
pub fn decode_message(script: &[u8]) -> Option<String> {
    let body = script.strip_prefix(&[OP_RETURN, MESSAGE_TAG.len() as u8])?;
    let rest = body.strip_prefix(MESSAGE_TAG.as_slice())?;

    // Only the first push carries the message; whatever follows is ignored
    let payload = read_instruction(rest, &mut 0)?.push_data()?;
    if payload.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(payload);
    Some(text.chars().take(MAX_MESSAGE_CHARS).collect())
}

/// HASH160: RIPEMD160(SHA256(x))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = Sha256::digest(data);
    Ripemd160::digest(sha256_hash).into()
}

/// Pay-to-public-key-hash locking script
pub fn p2pkh(pubkey_hash: &[u8; 20]) -> ByteString {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// Fungible token transfer output: P2PKH ‖ `bd d0 <tokenRef>` ‖ FT suffix
pub fn token_transfer_script(owner_script: &[u8], token_ref: &ContractRef) -> ByteString {
    let mut script = owner_script.to_vec();
    script.push(OP_STATESEPARATOR);
    script.push(OP_PUSHINPUTREF);
    script.extend_from_slice(&token_ref.to_le_bytes());
    script.extend_from_slice(&FT_SCRIPT_SUFFIX);
    script
}

/// Electrum-style script fingerprint: byte-reversed SHA-256, hex encoded
pub fn script_hash(script: &[u8]) -> String {
    let mut digest: [u8; 32] = Sha256::digest(script).into();
    digest.reverse();
    hex::encode(digest)
}
