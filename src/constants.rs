//! dmint protocol constants

use std::time::Duration;

/// Trailing covenant code shared by every dmint state script.
///
/// Byte-for-byte identical to the code deployed on chain; a state script is
/// `<height> d8 <contractRef> d0 <tokenRef> <maxHeight> <reward> <target>`
/// followed by these bytes.
pub const DMINT_SKELETON: [u8; 145] = [
    0xbd, 0x51, 0x75, 0xc0, 0xc8, 0x55, 0x79, 0x7e, 0xa8, 0x59, 0x79, 0x59, 0x79, 0x7e, 0xa8, 0x7e,
    0x5a, 0x7a, 0x7e, 0xaa, 0xbc, 0x01, 0x14, 0x7f, 0x77, 0x58, 0x7f, 0x04, 0x00, 0x00, 0x00, 0x00,
    0x88, 0x81, 0x76, 0x00, 0xa2, 0x69, 0xa2, 0x69, 0x57, 0x7a, 0xe5, 0x00, 0xa0, 0x69, 0x56, 0x7a,
    0xe6, 0x00, 0xa0, 0x69, 0x01, 0xd0, 0x53, 0x79, 0x7e, 0x0c, 0xde, 0xc0, 0xe9, 0xaa, 0x76, 0xe3,
    0x78, 0xe4, 0xa2, 0x69, 0xe6, 0x9d, 0x7e, 0xaa, 0x76, 0xe4, 0x7b, 0x9d, 0x54, 0x7a, 0x81, 0x8b,
    0x76, 0x53, 0x7a, 0x9c, 0x53, 0x7a, 0xde, 0x78, 0x91, 0x81, 0x54, 0x7a, 0xe6, 0x93, 0x9d, 0x63,
    0x52, 0x79, 0xcd, 0x01, 0xd8, 0x53, 0x79, 0x7e, 0x01, 0x6a, 0x7e, 0x88, 0x67, 0x78, 0xde, 0x51,
    0x9d, 0x54, 0x78, 0x54, 0x80, 0x7e, 0xc0, 0xeb, 0x55, 0x7f, 0x77, 0x7e, 0x53, 0x79, 0xec, 0x78,
    0x88, 0x53, 0x79, 0xea, 0xc0, 0xe9, 0x88, 0x53, 0x79, 0xcc, 0x51, 0x9d, 0x75, 0x68, 0x6d, 0x75,
    0x51,
];

/// Suffix appended to a P2PKH script to form a fungible token transfer output.
pub const FT_SCRIPT_SUFFIX: [u8; 12] = [
    0xde, 0xc0, 0xe9, 0xaa, 0x76, 0xe3, 0x78, 0xe4, 0xa2, 0x69, 0xe6, 0x9d,
];

/// Tag pushed after OP_RETURN in a mint message output
pub const MESSAGE_TAG: &[u8; 3] = b"msg";

/// Marker push preceding the token-definition payload in a reveal input
pub const GLYPH_MARKER: &[u8; 3] = b"gly";

/// Maximum number of characters kept from a mint message
pub const MAX_MESSAGE_CHARS: usize = 80;

/// Length of a serialized reference: 32-byte txid + 4-byte output index
pub const REF_LEN: usize = 36;

// Opcodes used by the dmint templates
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_STATESEPARATOR: u8 = 0xbd;
pub const OP_PUSHINPUTREF: u8 = 0xd0;
pub const OP_PUSHINPUTREFSINGLETON: u8 = 0xd8;

/// Fee rate in photons per kilobyte
pub const FEE_PER_KB: u64 = 2_000_000;

/// Value carried by a continuing contract output
pub const CONTRACT_OUTPUT_VALUE: u64 = 1;

/// Outputs below this value are not worth creating as change
pub const DUST_LIMIT: u64 = 546;

/// Photons per coin
pub const PHOTONS_PER_COIN: u64 = 100_000_000;

/// After a claim, balance below `LOW_BALANCE_MARGIN + reward` stops mining
pub const LOW_BALANCE_MARGIN: u64 = 10_000;

/// Balance below which a freshly loaded contract prompts for funding
pub const LOW_BALANCE_ON_LOAD: u64 = 1_000_000;

/// Sequence number for final inputs
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// SIGHASH_ALL | SIGHASH_FORKID
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

/// Transaction version emitted by the claim engine
pub const TX_VERSION: u32 = 1;

/// Base58 version byte of a mainnet P2PKH address
pub const P2PKH_ADDRESS_VERSION: u8 = 0x00;

/// Upper bound of a dmint target
pub const MAX_TARGET: u64 = 0x7fff_ffff_ffff_ffff;

/// Wait for a subscription status before refreshing unspent outputs
pub const SUBSCRIPTION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Mining time before the one-shot time-to-mint estimate
pub const MINT_TIME_DELAY: Duration = Duration::from_secs(10);

/// Deployments listed per page
pub const RESULTS_PER_PAGE: usize = 10;

/// Contracts resolved concurrently while listing deployments
pub const RESOLVE_BATCH_SIZE: usize = 4;

// Chain RPC methods
pub const METHOD_LIST_UNSPENT: &str = "blockchain.scripthash.listunspent";
pub const METHOD_GET_TRANSACTION: &str = "blockchain.transaction.get";
pub const METHOD_BROADCAST: &str = "blockchain.transaction.broadcast";
pub const METHOD_GET_REF: &str = "blockchain.ref.get";
pub const TOPIC_SCRIPTHASH: &str = "blockchain.scripthash";
