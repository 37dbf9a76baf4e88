//! Session Randomness
//!
//! The session draws terrain shapes and per-turn wind from a [`RandomSource`].
//! Only the acting peer draws; the other peer receives the outcome inside the
//! turn resolution, so the source never has to be mirrored across peers.
//! [`DeterministicRng`] is the default and makes tests and replays repeatable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SEED_DOMAIN: &[u8] = b"DUEL_SYNC_SEED_V1";

/// Injectable randomness for the session.
pub trait RandomSource {
    fn next_u64(&mut self) -> u64;

    /// Uniform float in [0, 1) from the top 53 bits.
    fn next_f64(&mut self) -> f64 {
        const SCALE: f64 = 1.0 / (1u64 << 53) as f64;
        (self.next_u64() >> 11) as f64 * SCALE
    }

    /// Uniform float in [min, max). An empty or inverted range yields `min`.
    fn next_range(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            min
        } else {
            min + self.next_f64() * (max - min)
        }
    }

    /// Integer in [0, bound), or 0 when `bound` is 0.
    fn next_int(&mut self, bound: u32) -> u32 {
        match u64::from(bound) {
            0 => 0,
            b => (self.next_u64() % b) as u32,
        }
    }
}

/// Xorshift128+ generator, seeded through SplitMix64.
///
/// Serializable, so a session can be checkpointed together with its source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    lo: u64,
    hi: u64,
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        let mut mixer = SplitMix(seed);
        match (mixer.next(), mixer.next()) {
            // all-zero state is a fixed point of xorshift
            (0, 0) => Self { lo: 1, hi: 1 },
            (lo, hi) => Self { lo, hi },
        }
    }

    /// Source for one match, keyed by its id and the player names.
    pub fn for_match(match_id: &[u8; 16], player_names: &[&str]) -> Self {
        Self::new(derive_match_seed(match_id, player_names))
    }
}

impl RandomSource for DeterministicRng {
    #[inline]
    fn next_u64(&mut self) -> u64 {
        let (s0, s1) = (self.lo, self.hi ^ self.lo);
        let out = self.lo.wrapping_add(self.hi);
        self.lo = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.hi = s1.rotate_left(37);
        out
    }
}

struct SplitMix(u64);

impl SplitMix {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Seed for a match. Names are length-prefixed and hashed in the order
/// given; the host passes its own name first.
pub fn derive_match_seed(match_id: &[u8; 16], player_names: &[&str]) -> u64 {
    let mut digest = Sha256::new();
    digest.update(SEED_DOMAIN);
    digest.update(match_id);
    for name in player_names {
        digest.update((name.len() as u32).to_le_bytes());
        digest.update(name.as_bytes());
    }
    let out = digest.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&out[..8]);
    u64::from_le_bytes(head)
}
