//! Difficulty/target arithmetic.
//!
//! The pool expresses proof-of-work acceptance as a 256-bit big-endian
//! unsigned comparison between a block header hash and a target derived
//! from the session's (or the network's) difficulty. We lean on the `uint`
//! crate's `U256` for the division rather than hand-rolling 256-bit long
//! division.

use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

/// The difficulty-1 target: the target a share of difficulty 1.0 must meet.
/// This is the same constant every Bitcoin-family pool uses:
/// `0x00000000ffff0000000000000000000000000000000000000000000000000000`
/// truncated to 256 bits, i.e. `0x00000000ffff0000...0000` (32 bytes).
const DIFF1_TARGET_BYTES: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

fn diff1_target() -> U256 {
    U256::from_big_endian(&DIFF1_TARGET_BYTES)
}

/// `target = floor(diff1_target / difficulty)`. Difficulty below 1.0 is
/// scaled up to a fixed-point numerator/denominator pair before the
/// division so fractional difficulties (the configured minimum is 0.001)
/// don't collapse to zero.
pub fn difficulty_to_target(difficulty: f64) -> [u8; 32] {
    debug_assert!(difficulty > 0.0, "difficulty must be positive");

    const SCALE: u64 = 1_000_000;
    let scaled_difficulty = (difficulty * SCALE as f64).round().max(1.0) as u64;

    let numerator = diff1_target() * U256::from(SCALE);
    let target = numerator / U256::from(scaled_difficulty);

    let mut out = [0u8; 32];
    target.to_big_endian(&mut out);
    out
}

/// Big-endian unsigned comparison: does `hash <= target`?
pub fn hash_meets_target(hash: &[u8; 32], target: &[u8; 32]) -> bool {
    U256::from_big_endian(hash) <= U256::from_big_endian(target)
}
