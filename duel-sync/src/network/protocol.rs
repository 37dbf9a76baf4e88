//! Protocol Messages
//!
//! Wire format between the two peers of a match. Every message goes over an
//! ordered, reliable channel. JSON is kept for debugging; bincode is the
//! production encoding. The enum is externally tagged so both work.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::events::HealthChange;
use crate::game::state::SideId;
use crate::turn::command::Command;
use crate::turn::resolution::{MatchSnapshot, TurnResolution};

// =============================================================================
// MESSAGES
// =============================================================================

/// Which end of the match a peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Authoritative for match setup and restarts; plays side A
    Host,
    /// Plays side B
    Guest,
}

impl PeerRole {
    /// The side this role plays.
    pub fn side(self) -> SideId {
        match self {
            PeerRole::Host => SideId::A,
            PeerRole::Guest => SideId::B,
        }
    }
}

/// Messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetMessage {
    /// Host to guest: full state to start (or restart) from.
    MatchInit {
        snapshot: Box<MatchSnapshot>,
    },

    /// Identity, sent once after connecting.
    PlayerHello {
        name: String,
        role: PeerRole,
    },

    /// A live command of the acting side, for spectating.
    TurnCommand {
        turn_index: u32,
        side_id: SideId,
        command: Command,
    },

    /// Advisory terrain and health changes, batched.
    TurnEffects(TurnEffects),

    /// Authoritative record of a completed turn. Always sent.
    TurnResolution {
        payload: Box<TurnResolution>,
    },

    /// Guest asks the host for a fresh `match_init`.
    MatchRestartRequest,
}

impl NetMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NetMessage::MatchInit { .. } => "match_init",
            NetMessage::PlayerHello { .. } => "player_hello",
            NetMessage::TurnCommand { .. } => "turn_command",
            NetMessage::TurnEffects(_) => "turn_effects",
            NetMessage::TurnResolution { .. } => "turn_resolution",
            NetMessage::MatchRestartRequest => "match_restart_request",
        }
    }
}

/// One terrain carve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainOperation {
    pub position: Vec2,
    pub radius: f64,
}

/// Coalesced side effects of a turn in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEffects {
    pub turn_index: u32,
    pub side_id: SideId,
    pub terrain_operations: Vec<TerrainOperation>,
    pub unit_health: Vec<HealthChange>,
}

impl TurnEffects {
    pub fn new(turn_index: u32, side_id: SideId) -> Self {
        Self {
            turn_index,
            side_id,
            terrain_operations: Vec::new(),
            unit_health: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.terrain_operations.len() + self.unit_health.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Message encoding on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Json,
    #[default]
    Binary,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),
}

impl NetMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, ProtocolError> {
        Ok(match format {
            WireFormat::Json => self.to_json()?.into_bytes(),
            WireFormat::Binary => self.to_bytes()?,
        })
    }

    pub fn decode(data: &[u8], format: WireFormat) -> Result<Self, ProtocolError> {
        Ok(match format {
            WireFormat::Json => serde_json::from_slice(data)?,
            WireFormat::Binary => Self::from_bytes(data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::game::events::{EngineEventData, HealthCause};
    use crate::game::map::TerrainMask;
    use crate::game::state::{UnitRef, WorldState};
    use crate::game::weapon::Weapon;
    use crate::turn::command::TurnCommand;
    use crate::turn::log::{TurnLog, TurnStart};
    use uuid::Uuid;

    fn resolution() -> TurnResolution {
        let config = WorldConfig { width: 100, height: 80, units_per_side: 1, ..WorldConfig::default() };
        let terrain = TerrainMask::from_heights(100, 80, &[50; 100]);
        let world = WorldState::new(config, terrain, [vec![Vec2::new(20.5, 43.5)], vec![Vec2::new(80.5, 43.5)]], -0.3);

        let mut log = TurnLog::new(TurnStart { turn_index: 4, side: SideId::B, unit: 0, wind: 0.1, start_ms: 9_000 });
        log.push_command(TurnCommand::new(10, Command::fire(Weapon::Grenade, 0.8, -2.0)));
        log.push_events(900, [
            EngineEventData::TerrainCarved { position: Vec2::new(30.0, 50.0), radius: 30.0 },
            EngineEventData::UnitHealthChanged(HealthChange::new(
                UnitRef::new(SideId::A, 0),
                100,
                62,
                HealthCause::Explosion { projectile: 0 },
                true,
            )),
        ]);
        let snapshot = MatchSnapshot { match_id: Uuid::from_u128(42), turn_index: 4, world };
        TurnResolution::build(log, snapshot)
    }

    fn all_messages() -> Vec<NetMessage> {
        let res = resolution();
        vec![
            NetMessage::MatchInit { snapshot: Box::new(res.snapshot.clone()) },
            NetMessage::PlayerHello { name: "ada".into(), role: PeerRole::Guest },
            NetMessage::TurnCommand {
                turn_index: 4,
                side_id: SideId::B,
                command: Command::Aim { angle: -1.1, target: Vec2::new(3.0, 4.0) },
            },
            NetMessage::TurnEffects(TurnEffects {
                turn_index: 4,
                side_id: SideId::B,
                terrain_operations: vec![TerrainOperation { position: Vec2::new(1.0, 2.0), radius: 28.0 }],
                unit_health: res.health_changes().copied().collect(),
            }),
            NetMessage::TurnResolution { payload: Box::new(res) },
            NetMessage::MatchRestartRequest,
        ]
    }

    #[test]
    fn test_every_message_survives_both_codecs() {
        for msg in all_messages() {
            for format in [WireFormat::Json, WireFormat::Binary] {
                let bytes = msg.encode(format).unwrap();
                let back = NetMessage::decode(&bytes, format).unwrap();
                assert_eq!(back, msg, "{} via {format:?}", msg.kind());
            }
        }
    }

    #[test]
    fn test_json_tags() {
        let json = NetMessage::MatchRestartRequest.to_json().unwrap();
        assert_eq!(json, r#""match_restart_request""#);

        let hello = NetMessage::PlayerHello { name: "bo".into(), role: PeerRole::Host }.to_json().unwrap();
        assert_eq!(hello, r#"{"player_hello":{"name":"bo","role":"host"}}"#);
    }

    #[test]
    fn test_resolution_hash_survives_transport() {
        let msg = NetMessage::TurnResolution { payload: Box::new(resolution()) };
        let bytes = msg.to_bytes().unwrap();
        match NetMessage::from_bytes(&bytes).unwrap() {
            NetMessage::TurnResolution { payload } => {
                assert_eq!(payload.snapshot.compute_hash(), payload.state_hash);
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(NetMessage::decode(b"{nope", WireFormat::Json), Err(ProtocolError::Json(_))));
        assert!(matches!(NetMessage::decode(&[0xff; 3], WireFormat::Binary), Err(ProtocolError::Binary(_))));
    }

    #[test]
    fn test_roles_map_to_sides() {
        assert_eq!(PeerRole::Host.side(), SideId::A);
        assert_eq!(PeerRole::Guest.side(), SideId::B);
        assert!(TurnEffects::new(1, SideId::A).is_empty());
    }
}
