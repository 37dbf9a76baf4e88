//! Turn Commands
//!
//! Replayable units of player or AI intent. A command is stamped with the
//! milliseconds elapsed since its turn started.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::weapon::Weapon;

/// Command payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    SetWeapon {
        weapon: Weapon,
    },

    /// `angle` is in radians, y-down, normalised to (-PI, PI] once applied
    Aim {
        angle: f64,
        target: Vec2,
    },

    /// Walk for `elapsed_ms`; `direction` is -1, 0 or 1
    Move {
        direction: i8,
        jump: bool,
        elapsed_ms: u32,
    },

    StartCharge,

    CancelCharge,

    /// `projectiles` is filled in by the engine with the spawned ids
    FireChargedWeapon {
        weapon: Weapon,
        power: f64,
        angle: f64,
        projectiles: Vec<u16>,
    },
}

impl Command {
    /// Fire request with no projectile ids yet.
    pub fn fire(weapon: Weapon, power: f64, angle: f64) -> Self {
        Command::FireChargedWeapon { weapon, power, angle, projectiles: Vec::new() }
    }

    pub fn walk(direction: i8, elapsed_ms: u32) -> Self {
        Command::Move { direction, jump: false, elapsed_ms }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::SetWeapon { .. } => "set_weapon",
            Command::Aim { .. } => "aim",
            Command::Move { .. } => "move",
            Command::StartCharge => "start_charge",
            Command::CancelCharge => "cancel_charge",
            Command::FireChargedWeapon { .. } => "fire",
        }
    }

    /// Aim and movement arrive as high-rate streams the network throttles.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Command::Aim { .. } | Command::Move { .. })
    }
}

/// A command with its turn-relative timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnCommand {
    /// Milliseconds since the turn started
    pub at_ms: u32,
    pub command: Command,
}

impl TurnCommand {
    pub fn new(at_ms: u32, command: Command) -> Self {
        Self { at_ms, command }
    }
}
