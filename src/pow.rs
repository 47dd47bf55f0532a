//! Proof-of-work difficulty and expected mint time

use crate::constants::MAX_TARGET;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

/// Difficulty: ⌊MAX_TARGET / target⌋
pub fn difficulty(target: &BigUint) -> Option<BigUint> {
    if target.is_zero() {
        return None;
    }
    Some(BigUint::from(MAX_TARGET) / target)
}

/// CalcTimeToMine: target × hashrate → seconds
///
/// Expected hashes per solution are difficulty × 2³², divided by the
/// reported hashrate (hashes per second).
pub fn calc_time_to_mine(target: &BigUint, hashrate: f64) -> Option<f64> {
    if hashrate.is_nan() || hashrate <= 0.0 || hashrate.is_infinite() {
        return None;
    }
    let difficulty = difficulty(target)?.to_f64()?;
    Some(difficulty * 4_294_967_296.0 / hashrate)
}
