//! # Duel Sync
//!
//! Peer-to-peer turn synchronization for two-sided artillery duels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DUEL SYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec2.rs     - 2D vector and angle helpers               │
//! │  ├── rng.rs      - Injectable Xorshift128+ randomness        │
//! │  ├── clock.rs    - Injectable wall clock                     │
//! │  └── hash.rs     - Snapshot hashing                          │
//! │                                                              │
//! │  game/           - Artillery simulation (deterministic)      │
//! │  ├── state.rs    - Sides, units, projectiles, WorldState     │
//! │  ├── map.rs      - Destructible terrain mask                 │
//! │  ├── tick.rs     - Fixed-step physics, walking, firing       │
//! │  └── events.rs   - Engine events                             │
//! │                                                              │
//! │  turn/           - Turn synchronization core                 │
//! │  ├── session.rs  - Orchestrator: tick, record, resolve       │
//! │  ├── validate.rs - Checks before adopting a resolution       │
//! │  ├── driver.rs   - Local / remote / AI drivers               │
//! │  └── throttle.rs - Aim and movement rate limiting            │
//! │                                                              │
//! │  network/        - Peer link (non-deterministic)             │
//! │  ├── protocol.rs - Message types and codecs                  │
//! │  ├── bridge.rs   - Session <-> channel glue                  │
//! │  └── ws.rs       - WebSocket channel                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Turn Model
//!
//! Exactly one side acts per turn. The peer that drives the acting side
//! simulates the turn, then sends a `turn_resolution`: the applied command
//! log, the engine events and a full snapshot with its hash. The other peer
//! validates it against what it saw at turn start and adopts the snapshot.
//! A rejected resolution desynchronizes the session until the host sends a
//! fresh `match_init`.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod turn;
pub mod network;

// Re-export commonly used types
pub use config::{DuelConfig, SessionConfig};
pub use core::rng::DeterministicRng;
pub use game::state::{SideId, WorldState};
pub use turn::{Command, MatchSnapshot, Session, SessionError, SessionOutput, TurnDriver, TurnResolution};
pub use network::{NetMessage, NetworkBridge, PeerRole};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
