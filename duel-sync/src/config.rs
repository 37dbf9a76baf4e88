//! Configuration
//!
//! Every tunable lives in a plain struct with a `Default` and serde support,
//! so a partial JSON document only overrides what it names. The binary loads
//! an optional file pointed to by `DUEL_CONFIG`.

use std::env;
use std::fs;
use serde::{Serialize, Deserialize};

// =============================================================================
// WORLD & PHYSICS
// =============================================================================

/// Static world geometry and unit roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// World width in units (one terrain cell per unit)
    pub width: u32,
    /// World height in units
    pub height: u32,
    /// Plausibility margin left, right and above the world
    pub padding: f64,
    /// Depth of the water band at the bottom of the world
    pub water_depth: f64,
    /// Units fielded by each side
    pub units_per_side: u16,
    /// Starting (and maximum) unit health
    pub unit_health: i32,
    /// Unit collision radius
    pub unit_radius: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 400,
            padding: 64.0,
            water_depth: 24.0,
            units_per_side: 3,
            unit_health: 100,
            unit_radius: 6.0,
        }
    }
}

impl WorldConfig {
    /// Y coordinate of the water surface. Crossing it drowns.
    #[inline]
    pub fn kill_line(&self) -> f64 {
        self.height as f64 - self.water_depth
    }
}

/// Physics constants. Speeds are units/second, accelerations units/second².
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Fixed physics step length
    pub step_ms: u32,
    pub gravity: f64,
    pub walk_speed: f64,
    /// Highest step a walking unit climbs without jumping (cells)
    pub max_climb: u32,
    pub jump_speed_x: f64,
    pub jump_speed_y: f64,
    /// Horizontal acceleration per unit of wind on wind-affected projectiles
    pub wind_accel: f64,
    /// Knockback speed at the blast centre
    pub knockback: f64,
    /// Velocity kept by a grenade after a bounce
    pub restitution: f64,
    pub projectile_radius: f64,
    pub projectile_lifetime_ms: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            step_ms: 16,
            gravity: 400.0,
            walk_speed: 40.0,
            max_climb: 4,
            jump_speed_x: 60.0,
            jump_speed_y: 160.0,
            wind_accel: 60.0,
            knockback: 180.0,
            restitution: 0.45,
            projectile_radius: 2.0,
            projectile_lifetime_ms: 12_000,
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Everything a [`Session`](crate::turn::Session) needs to run a match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub world: WorldConfig,
    pub physics: PhysicsConfig,
    /// Simulation time the active unit has in the aim phase
    pub turn_duration_ms: u64,
    /// Settling delay between the shot resolving and the turn closing
    pub post_shot_delay_ms: u64,
    /// Cap on projectile flight and post-shot settling
    pub max_projectile_phase_ms: u64,
    /// Hold time for a full-power shot
    pub max_charge_ms: u64,
    /// Wind is drawn uniformly from [-max_wind, max_wind]
    pub max_wind: f64,
    /// Physics steps run per tick at most; backlog beyond that is dropped
    pub max_steps_per_tick: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            physics: PhysicsConfig::default(),
            turn_duration_ms: 30_000,
            post_shot_delay_ms: 1_500,
            max_projectile_phase_ms: 15_000,
            max_charge_ms: 2_000,
            max_wind: 1.0,
            max_steps_per_tick: 8,
        }
    }
}

impl SessionConfig {
    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.world;
        if !(64..=4096).contains(&w.width) || !(64..=4096).contains(&w.height) {
            return Err(ConfigError::Invalid("world size must be within 64..=4096"));
        }
        if !(w.padding >= 0.0 && w.padding.is_finite()) {
            return Err(ConfigError::Invalid("padding must be finite and non-negative"));
        }
        if !(w.water_depth >= 0.0 && w.water_depth < w.height as f64) {
            return Err(ConfigError::Invalid("water depth must lie inside the world"));
        }
        if !(1..=8).contains(&w.units_per_side) {
            return Err(ConfigError::Invalid("units per side must be within 1..=8"));
        }
        if w.unit_health <= 0 || !(w.unit_radius > 0.0) {
            return Err(ConfigError::Invalid("unit health and radius must be positive"));
        }
        let p = &self.physics;
        if p.step_ms == 0 || !(p.gravity > 0.0 && p.gravity.is_finite()) {
            return Err(ConfigError::Invalid("physics step and gravity must be positive"));
        }
        if !(0.0..=1.0).contains(&p.restitution) {
            return Err(ConfigError::Invalid("restitution must be within [0, 1]"));
        }
        if self.max_charge_ms == 0 || self.max_steps_per_tick == 0 {
            return Err(ConfigError::Invalid("max charge and steps per tick must be positive"));
        }
        if !(self.max_wind >= 0.0 && self.max_wind.is_finite()) {
            return Err(ConfigError::Invalid("max wind must be finite and non-negative"));
        }
        Ok(())
    }
}

// =============================================================================
// NETWORK-FACING POLICIES
// =============================================================================

/// Aim throttle tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AimThrottleConfig {
    pub min_interval_ms: u64,
    /// Heartbeat: a changed aim is sent at least this often
    pub max_interval_ms: u64,
    /// Radians
    pub angle_threshold: f64,
    /// Relative change of the unit-to-target vector
    pub relative_threshold: f64,
}

impl Default for AimThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            max_interval_ms: 250,
            angle_threshold: 0.02,
            relative_threshold: 0.03,
        }
    }
}

/// Movement throttle tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveThrottleConfig {
    pub min_interval_ms: u64,
    /// Drop samples with no direction and no jump
    pub suppress_idle: bool,
}

impl Default for MoveThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 100,
            suppress_idle: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub aim: AimThrottleConfig,
    pub movement: MoveThrottleConfig,
}

/// Advisory `turn_effects` batching.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub flush_interval_ms: u64,
    pub max_items: usize,
    /// Carves at least this large flush at once
    pub immediate_carve_radius: f64,
    /// Health changes at least this large flush at once
    pub immediate_damage: i32,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1_000,
            max_items: 24,
            immediate_carve_radius: 24.0,
            immediate_damage: 30,
        }
    }
}

/// Computer opponent tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Simulation time spent "thinking" before the first aim
    pub think_ms: u32,
    /// Angle search resolution in degrees
    pub angle_step_deg: f64,
    /// Power search resolution
    pub power_step: f64,
    pub min_power: f64,
    /// Extra cost for shots landing near a friendly unit
    pub friendly_penalty: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            think_ms: 400,
            angle_step_deg: 4.0,
            power_step: 0.1,
            min_power: 0.3,
            friendly_penalty: 200.0,
        }
    }
}

// =============================================================================
// APPLICATION CONFIG
// =============================================================================

/// All configuration for one peer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuelConfig {
    pub session: SessionConfig,
    pub throttle: ThrottleConfig,
    pub effects: EffectsConfig,
    pub ai: AiConfig,
}

impl DuelConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `DUEL_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var("DUEL_CONFIG") {
            Ok(path) => {
                let text = fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Self::from_json_str(&text)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        let aim = &self.throttle.aim;
        if aim.min_interval_ms > aim.max_interval_ms {
            return Err(ConfigError::Invalid("aim min interval exceeds max interval"));
        }
        if self.effects.max_items == 0 {
            return Err(ConfigError::Invalid("effects batch size must be positive"));
        }
        if !(self.ai.angle_step_deg > 0.0 && self.ai.power_step > 0.0) {
            return Err(ConfigError::Invalid("ai search steps must be positive"));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
