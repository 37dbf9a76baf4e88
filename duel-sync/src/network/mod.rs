//! Network Layer
//!
//! Peer-to-peer link between the two sides of a match.
//! This layer is **non-deterministic**: it only moves messages. Everything
//! that decides game state lives in `game/` and `turn/`.

pub mod protocol;
pub mod effects;
pub mod transport;
pub mod ws;
pub mod bridge;

pub use protocol::{NetMessage, PeerRole, ProtocolError, TerrainOperation, TurnEffects, WireFormat};
pub use effects::EffectsBatcher;
pub use transport::{LoopbackChannel, MessageChannel, TransportError};
pub use ws::WsChannel;
pub use bridge::{BridgeError, BridgeStats, InboundEvent, NetworkBridge};
