//! Core primitives.
//!
//! Vector math, injectable randomness and clocks, and the snapshot hasher.
//! Nothing in here knows about turns or the network.

pub mod vec2;
pub mod rng;
pub mod hash;
pub mod clock;

// Re-export core types
pub use vec2::{Vec2, normalize_angle, angle_delta};
pub use rng::{DeterministicRng, RandomSource};
pub use hash::{HashField, StateHash, StateHasher};
pub use clock::{Clock, ManualClock, SystemClock};
