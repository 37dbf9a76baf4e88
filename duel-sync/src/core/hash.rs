//! Snapshot Hashing
//!
//! Every turn resolution carries the SHA-256 of the snapshot it was built
//! from, so a receiving peer can tell a corrupted or truncated snapshot from
//! a plausible one before looking at anything else.
//!
//! Fields are fed in a fixed order with fixed widths (little-endian integers,
//! floats by IEEE-754 bits). Variable-length data is length-prefixed.

use sha2::{Digest, Sha256};

use super::vec2::Vec2;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

const SNAPSHOT_DOMAIN: &[u8] = b"DUEL_SYNC_SNAPSHOT_V1";

/// A value with a canonical byte encoding for hashing.
pub trait HashField {
    fn feed(&self, digest: &mut Sha256);
}

macro_rules! le_field {
    ($($t:ty),*) => {
        $(impl HashField for $t {
            #[inline]
            fn feed(&self, digest: &mut Sha256) {
                digest.update(self.to_le_bytes());
            }
        })*
    };
}

le_field!(u8, u16, u32, u64, i32);

impl HashField for bool {
    #[inline]
    fn feed(&self, digest: &mut Sha256) {
        digest.update([u8::from(*self)]);
    }
}

impl HashField for f64 {
    /// By bit pattern: `-0.0` and `0.0` are different snapshots.
    #[inline]
    fn feed(&self, digest: &mut Sha256) {
        self.to_bits().feed(digest);
    }
}

impl HashField for Vec2 {
    #[inline]
    fn feed(&self, digest: &mut Sha256) {
        self.x.feed(digest);
        self.y.feed(digest);
    }
}

/// Domain-separated SHA-256 accumulator.
pub struct StateHasher {
    digest: Sha256,
}

impl StateHasher {
    pub fn new(domain: &[u8]) -> Self {
        let mut digest = Sha256::new();
        digest.update(domain);
        Self { digest }
    }

    /// Hasher for a match snapshot, seeded with its turn index and
    /// simulation time.
    pub fn snapshot(turn_index: u32, time_ms: u64) -> Self {
        let mut hasher = Self::new(SNAPSHOT_DOMAIN);
        hasher.put(turn_index).put(time_ms);
        hasher
    }

    #[inline]
    pub fn put<T: HashField>(&mut self, value: T) -> &mut Self {
        value.feed(&mut self.digest);
        self
    }

    /// Length-prefixed raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put(bytes.len() as u64);
        self.digest.update(bytes);
        self
    }

    pub fn finish(self) -> StateHash {
        self.digest.finalize().into()
    }
}

/// Short hex prefix of a hash, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..6])
}
