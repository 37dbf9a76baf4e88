//! Resolution Validation
//!
//! Plausibility checks a receiving peer runs before it replaces its world
//! with a resolution's snapshot. The host is trusted up to these checks;
//! any failure is fatal to the session.
//!
//! Order:
//! 1. turn-start agreement (index, side, unit, wind, start time)
//! 2. internal integrity (indices agree, snapshot hash, snapshot shape)
//! 3. health transitions against the turn-start baseline
//! 4. finite, in-bounds carve and unit positions

use std::collections::BTreeMap;

use crate::config::WorldConfig;
use crate::core::vec2::Vec2;
use crate::game::state::{Side, UnitRef};
use crate::turn::log::TurnStart;
use crate::turn::resolution::TurnResolution;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("turn start mismatch on {field}: expected {expected}, received {received}")]
    TurnStartMismatch {
        field: &'static str,
        expected: String,
        received: String,
    },

    #[error("resolution is internally inconsistent: {0}")]
    Malformed(String),

    #[error("snapshot hash does not match its contents")]
    SnapshotHashMismatch,

    #[error("snapshot shape differs from the local world: {0}")]
    ShapeMismatch(String),

    #[error("health change references unknown unit {0}")]
    UnknownUnit(UnitRef),

    #[error("health change for {unit} starts from {recorded_health} (alive={recorded_alive}), local state is {local_health} (alive={local_alive})")]
    HealthBaseline {
        unit: UnitRef,
        recorded_health: i32,
        recorded_alive: bool,
        local_health: i32,
        local_alive: bool,
    },

    #[error("health change for {unit} does not add up: {before} + {delta} != {after}")]
    HealthArithmetic {
        unit: UnitRef,
        before: i32,
        delta: i32,
        after: i32,
    },

    #[error("health change for {unit} records alive={alive_after} at health {after}")]
    AliveFlag {
        unit: UnitRef,
        after: i32,
        alive_after: bool,
    },

    #[error("{what} has non-finite coordinates")]
    NonFinite { what: String },

    #[error("{what} at ({x:.1}, {y:.1}) lies outside world bounds")]
    OutOfBounds { what: String, x: f64, y: f64 },
}

/// Padded plausibility bounds of a world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl WorldBounds {
    pub fn of(config: &WorldConfig) -> Self {
        Self {
            min_x: -config.padding,
            max_x: config.width as f64 + config.padding,
            min_y: -config.padding,
            max_y: config.height as f64 + config.padding,
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

/// Run every check against the local expectation.
///
/// `baseline` is the local side rosters captured when the turn started;
/// `config` is the local world geometry.
pub fn validate_resolution(
    resolution: &TurnResolution,
    expected: &TurnStart,
    baseline: &[Side; 2],
    config: &WorldConfig,
) -> Result<(), ResolutionError> {
    check_turn_start(&resolution.start, expected)?;
    check_integrity(resolution, baseline, config)?;
    check_health_changes(resolution, baseline)?;
    check_positions(resolution, config)?;
    Ok(())
}

fn mismatch(field: &'static str, expected: impl ToString, received: impl ToString) -> ResolutionError {
    ResolutionError::TurnStartMismatch {
        field,
        expected: expected.to_string(),
        received: received.to_string(),
    }
}

fn check_turn_start(received: &TurnStart, expected: &TurnStart) -> Result<(), ResolutionError> {
    if received.turn_index != expected.turn_index {
        return Err(mismatch("turn_index", expected.turn_index, received.turn_index));
    }
    if received.side != expected.side {
        return Err(mismatch("side", expected.side, received.side));
    }
    if received.unit != expected.unit {
        return Err(mismatch("unit", expected.unit, received.unit));
    }
    // Exact: wind travels bit-for-bit in the previous snapshot
    if received.wind.to_bits() != expected.wind.to_bits() {
        return Err(mismatch("wind", expected.wind, received.wind));
    }
    if received.start_ms != expected.start_ms {
        return Err(mismatch("start_ms", expected.start_ms, received.start_ms));
    }
    Ok(())
}

fn check_integrity(resolution: &TurnResolution, baseline: &[Side; 2], config: &WorldConfig) -> Result<(), ResolutionError> {
    if resolution.turn_index != resolution.start.turn_index || resolution.turn_index != resolution.snapshot.turn_index {
        return Err(ResolutionError::Malformed(format!(
            "turn index {} disagrees with start {} / snapshot {}",
            resolution.turn_index, resolution.start.turn_index, resolution.snapshot.turn_index
        )));
    }
    if resolution.snapshot.compute_hash() != resolution.state_hash {
        return Err(ResolutionError::SnapshotHashMismatch);
    }

    let world = &resolution.snapshot.world;
    if &world.config != config {
        return Err(ResolutionError::ShapeMismatch("world configuration differs".into()));
    }
    if world.terrain.width() != config.width || world.terrain.height() != config.height || !world.terrain.is_well_formed() {
        return Err(ResolutionError::ShapeMismatch("terrain mask dimensions".into()));
    }
    for (local, remote) in baseline.iter().zip(world.sides.iter()) {
        if local.id != remote.id || local.units.len() != remote.units.len() {
            return Err(ResolutionError::ShapeMismatch(format!("roster of side {}", local.id)));
        }
    }
    if world.unit(world.active_unit_ref()).is_none() {
        return Err(ResolutionError::ShapeMismatch(format!(
            "active unit {} does not exist",
            world.active_unit_ref()
        )));
    }
    Ok(())
}

fn check_health_changes(resolution: &TurnResolution, baseline: &[Side; 2]) -> Result<(), ResolutionError> {
    // Running (health, alive) per unit, seeded from the turn-start baseline
    let mut running: BTreeMap<UnitRef, (i32, bool)> = BTreeMap::new();

    for change in resolution.health_changes() {
        let unit = change.unit;
        let local = match running.get(&unit) {
            Some(state) => *state,
            None => {
                let u = baseline[unit.side.index()]
                    .units
                    .get(unit.index as usize)
                    .ok_or(ResolutionError::UnknownUnit(unit))?;
                (u.health, u.alive)
            }
        };

        if local != (change.before, change.alive_before) {
            return Err(ResolutionError::HealthBaseline {
                unit,
                recorded_health: change.before,
                recorded_alive: change.alive_before,
                local_health: local.0,
                local_alive: local.1,
            });
        }
        if change.before.checked_add(change.delta) != Some(change.after) {
            return Err(ResolutionError::HealthArithmetic {
                unit,
                before: change.before,
                delta: change.delta,
                after: change.after,
            });
        }
        if change.alive_after != (change.after > 0) {
            return Err(ResolutionError::AliveFlag {
                unit,
                after: change.after,
                alive_after: change.alive_after,
            });
        }

        running.insert(unit, (change.after, change.alive_after));
    }
    Ok(())
}

fn check_point(what: impl FnOnce() -> String, p: Vec2, bounds: &WorldBounds) -> Result<(), ResolutionError> {
    if !p.is_finite() {
        return Err(ResolutionError::NonFinite { what: what() });
    }
    if !bounds.contains(p) {
        return Err(ResolutionError::OutOfBounds { what: what(), x: p.x, y: p.y });
    }
    Ok(())
}

fn check_positions(resolution: &TurnResolution, config: &WorldConfig) -> Result<(), ResolutionError> {
    let bounds = WorldBounds::of(config);

    for (i, (centre, radius)) in resolution.terrain_operations().enumerate() {
        check_point(|| format!("terrain carve #{i}"), centre, &bounds)?;
        if !radius.is_finite() {
            return Err(ResolutionError::NonFinite { what: format!("terrain carve #{i} radius") });
        }
    }

    for (unit_ref, unit) in resolution.snapshot.world.units() {
        check_point(|| format!("unit {unit_ref}"), unit.position, &bounds)?;
        if !unit.velocity.is_finite() {
            return Err(ResolutionError::NonFinite { what: format!("unit {unit_ref} velocity") });
        }
    }

    if !resolution.snapshot.world.wind.is_finite() {
        return Err(ResolutionError::NonFinite { what: "wind".into() });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
