//! Token-definition payload embedded in a reveal input
//!
//! The payload format is owned by the token standard; this crate only
//! locates it: the push immediately following the `gly` marker push.

use crate::constants::GLYPH_MARKER;
use crate::script::parse_instructions;
use crate::types::Glyph;

pub fn decode_glyph(script_sig: &[u8]) -> Option<Glyph> {
    let instructions = parse_instructions(script_sig)?;
    let marker = instructions
        .iter()
        .position(|i| i.push_data() == Some(GLYPH_MARKER.as_slice()))?;

    let payload = instructions.get(marker + 1)?.push_data()?;
    if payload.is_empty() {
        return None;
    }
    Some(Glyph { payload: payload.to_vec() })
}
