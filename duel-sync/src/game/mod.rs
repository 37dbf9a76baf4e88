//! Simulation Module
//!
//! The deterministic artillery simulation the turn core drives. Commands go
//! in through `tick::walk_unit` / `tick::fire`, time advances through
//! `tick::step`, and facts come out as [`EngineEventData`].
//!
//! ## Module Structure
//!
//! - `state`: Sides, units, projectiles, the snapshot-able `WorldState`
//! - `map`: Destructible 1-bit terrain mask
//! - `weapon`: Weapon ballistics
//! - `collision`: Disc sweeps and projectile contacts
//! - `tick`: Fixed-step physics, walking, firing, shot tracing
//! - `events`: Engine events for the turn log

pub mod state;
pub mod map;
pub mod weapon;
pub mod collision;
pub mod tick;
pub mod events;

// Re-export key types
pub use state::{Facing, MatchPhase, Projectile, Side, SideId, Unit, UnitRef, WorldState};
pub use map::TerrainMask;
pub use weapon::{Weapon, WeaponSpec};
pub use events::{EngineEvent, EngineEventData, ExpireReason, HealthCause, HealthChange};
