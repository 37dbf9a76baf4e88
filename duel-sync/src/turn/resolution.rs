//! Turn Resolution
//!
//! The authoritative, transmittable record that closes a turn: the folded
//! turn log plus a full post-turn snapshot and its hash.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::hash::StateHash;
use crate::core::vec2::Vec2;
use crate::game::events::{EngineEvent, HealthChange};
use crate::game::state::{SideId, WorldState};
use crate::turn::command::TurnCommand;
use crate::turn::log::{TurnLog, TurnStart};

/// Full serialisable world state plus the number of completed turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    pub turn_index: u32,
    pub world: WorldState,
}

impl MatchSnapshot {
    pub fn compute_hash(&self) -> StateHash {
        self.world.compute_hash(self.turn_index)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResolution {
    pub turn_index: u32,
    pub start: TurnStart,
    pub commands: Vec<TurnCommand>,
    pub events: Vec<EngineEvent>,
    /// State after the turn, with next-turn pointers and wind already drawn
    pub snapshot: MatchSnapshot,
    /// Hash of `snapshot`
    pub state_hash: StateHash,
}

impl TurnResolution {
    /// Fold a completed log and the post-turn snapshot.
    pub fn build(log: TurnLog, snapshot: MatchSnapshot) -> Self {
        let (start, commands, events) = log.into_parts();
        let state_hash = snapshot.compute_hash();
        Self {
            turn_index: start.turn_index,
            start,
            commands,
            events,
            snapshot,
            state_hash,
        }
    }

    pub fn acting_side(&self) -> SideId {
        self.start.side
    }

    pub fn health_changes(&self) -> impl Iterator<Item = &HealthChange> {
        self.events.iter().filter_map(EngineEvent::health_change)
    }

    /// Every carve as `(centre, radius)`, in event order.
    pub fn terrain_operations(&self) -> impl Iterator<Item = (Vec2, f64)> + '_ {
        self.events.iter().filter_map(EngineEvent::carve)
    }

    pub fn wind_after(&self) -> f64 {
        self.snapshot.world.wind
    }
}
