//! Engine Events
//!
//! Facts emitted by the simulation. The turn log records them in emission
//! order; the receiving peer uses the health changes to cross-check a
//! resolution before accepting its snapshot.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::state::UnitRef;
use crate::game::weapon::Weapon;

/// Why a projectile left the world without exploding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireReason {
    /// Fell below the kill line
    Water,
    /// Left the padded world bounds
    OutOfWorld,
    /// Flew longer than the projectile lifetime
    Lifetime,
}

/// What changed a unit's health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCause {
    Explosion { projectile: u16 },
    Drowned,
    OutOfWorld,
}

/// One unit's health transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChange {
    pub unit: UnitRef,
    pub before: i32,
    pub after: i32,
    pub delta: i32,
    pub cause: HealthCause,
    pub alive_before: bool,
    pub alive_after: bool,
}

impl HealthChange {
    /// Build a transition from the old health to the new one.
    pub fn new(unit: UnitRef, before: i32, after: i32, cause: HealthCause, alive_before: bool) -> Self {
        Self {
            unit,
            before,
            after,
            delta: after - before,
            cause,
            alive_before,
            alive_after: after > 0,
        }
    }

    /// `before + delta == after` and the alive flag agrees with `after`.
    pub fn is_consistent(&self) -> bool {
        self.before.checked_add(self.delta) == Some(self.after) && self.alive_after == (self.after > 0)
    }

    pub fn is_lethal(&self) -> bool {
        self.alive_before && !self.alive_after
    }
}

/// Engine event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventData {
    ProjectileSpawned {
        projectile: u16,
        weapon: Weapon,
        position: Vec2,
        velocity: Vec2,
    },

    ProjectileExploded {
        projectile: u16,
        position: Vec2,
        radius: f64,
    },

    ProjectileExpired {
        projectile: u16,
        reason: ExpireReason,
        position: Vec2,
    },

    TerrainCarved {
        position: Vec2,
        radius: f64,
    },

    UnitHealthChanged(HealthChange),
}

/// An engine event stamped with turn-relative time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Milliseconds since the turn started
    pub at_ms: u32,

    /// Event data
    pub data: EngineEventData,
}

impl EngineEvent {
    pub fn new(at_ms: u32, data: EngineEventData) -> Self {
        Self { at_ms, data }
    }

    pub fn health_change(&self) -> Option<&HealthChange> {
        match &self.data {
            EngineEventData::UnitHealthChanged(change) => Some(change),
            _ => None,
        }
    }

    /// Centre and radius when this event carved terrain.
    pub fn carve(&self) -> Option<(Vec2, f64)> {
        match self.data {
            EngineEventData::TerrainCarved { position, radius } => Some((position, radius)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.data {
            EngineEventData::ProjectileSpawned { .. } => "projectile_spawned",
            EngineEventData::ProjectileExploded { .. } => "projectile_exploded",
            EngineEventData::ProjectileExpired { .. } => "projectile_expired",
            EngineEventData::TerrainCarved { .. } => "terrain_carved",
            EngineEventData::UnitHealthChanged(_) => "unit_health_changed",
        }
    }
}
