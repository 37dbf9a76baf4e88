//! Computer Opponent
//!
//! Deterministic, non-networked driver. It picks the nearest living enemy,
//! searches weapon, angle and power by tracing shots against the current
//! world, and then plays the result through `record_command` with human
//! pacing: think, aim, charge, fire. Its commands are indistinguishable
//! from a player's in the turn log.

use std::f64::consts::FRAC_PI_4;

use tracing::{debug, info};

use crate::config::{AiConfig, PhysicsConfig};
use crate::core::vec2::Vec2;
use crate::game::state::{SideId, UnitRef, WorldState};
use crate::game::tick::trace_shot;
use crate::game::weapon::Weapon;
use crate::turn::command::Command;
use crate::turn::log::TurnStart;
use crate::turn::session::Session;

/// Weapons the planner considers.
const CANDIDATE_WEAPONS: [Weapon; 2] = [Weapon::Bazooka, Weapon::Grenade];

/// Search range for shot angles, degrees (y-down, so upward is negative).
const MIN_ANGLE_DEG: f64 = -170.0;
const MAX_ANGLE_DEG: f64 = -10.0;

/// Distance of the recorded crosshair from the shooter.
const CROSSHAIR_DISTANCE: f64 = 60.0;

/// A planned shot and its cost (lower is better).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShotPlan {
    pub weapon: Weapon,
    pub angle: f64,
    pub power: f64,
    pub target: UnitRef,
    pub score: f64,
}

/// Plan a shot for `shooter`. `None` if the shooter is dead or no enemy
/// is alive.
pub fn plan_shot(world: &WorldState, shooter: UnitRef, physics: &PhysicsConfig, config: &AiConfig) -> Option<ShotPlan> {
    let origin = world.unit(shooter).filter(|u| u.alive)?.position;

    let (target, target_pos) = world
        .units()
        .filter(|(r, u)| r.side != shooter.side && u.alive)
        .map(|(r, u)| (r, u.position))
        .min_by(|a, b| origin.distance_squared(a.1).total_cmp(&origin.distance_squared(b.1)))?;

    let friends: Vec<Vec2> = world
        .units()
        .filter(|(r, u)| r.side == shooter.side && u.alive)
        .map(|(_, u)| u.position)
        .collect();

    let angle_steps = ((MAX_ANGLE_DEG - MIN_ANGLE_DEG) / config.angle_step_deg).floor() as u32;
    let power_steps = ((1.0 - config.min_power) / config.power_step).round().max(0.0) as u32;

    let mut best: Option<ShotPlan> = None;
    for weapon in CANDIDATE_WEAPONS {
        let reach = weapon.spec().blast_radius + world.config.unit_radius;
        for a in 0..=angle_steps {
            let angle = (MIN_ANGLE_DEG + a as f64 * config.angle_step_deg).to_radians();
            for p in 0..=power_steps {
                let power = (config.min_power + p as f64 * config.power_step).min(1.0);
                let Some(hit) = trace_shot(world, shooter, weapon, power, angle, physics) else {
                    continue;
                };
                let friendly = friends.iter().filter(|f| f.distance(hit) < reach).count();
                let score = hit.distance(target_pos) + config.friendly_penalty * friendly as f64;
                if best.map_or(true, |b| score < b.score) {
                    best = Some(ShotPlan { weapon, angle, power, target, score });
                }
            }
        }
    }

    // Nothing lands: lob toward the target and hope
    Some(best.unwrap_or_else(|| {
        let angle = if target_pos.x < origin.x { -3.0 * FRAC_PI_4 } else { -FRAC_PI_4 };
        ShotPlan {
            weapon: Weapon::Bazooka,
            angle,
            power: 0.7,
            target,
            score: f64::INFINITY,
        }
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiStage {
    Idle,
    Thinking,
    Aimed,
    Charging,
    Done,
}

#[derive(Debug)]
pub struct AiDriver {
    side: SideId,
    config: AiConfig,
    stage: AiStage,
    plan: Option<ShotPlan>,
}

impl AiDriver {
    pub fn new(side: SideId, config: AiConfig) -> Self {
        Self {
            side,
            config,
            stage: AiStage::Idle,
            plan: None,
        }
    }

    pub fn side(&self) -> SideId {
        self.side
    }

    pub fn stage(&self) -> AiStage {
        self.stage
    }

    pub fn plan(&self) -> Option<&ShotPlan> {
        self.plan.as_ref()
    }

    pub(crate) fn begin_turn(&mut self, start: &TurnStart) {
        self.plan = None;
        self.stage = if start.side == self.side { AiStage::Thinking } else { AiStage::Idle };
    }

    pub(crate) fn end_turn(&mut self) {
        self.stage = AiStage::Idle;
        self.plan = None;
    }

    pub(crate) fn tick(&mut self, session: &mut Session) {
        let elapsed = session.turn_elapsed_ms();
        let think = self.config.think_ms;

        match self.stage {
            AiStage::Idle | AiStage::Done => {}

            AiStage::Thinking if elapsed >= think => {
                let world = session.world();
                let shooter = world.active_unit_ref();
                let Some(plan) = plan_shot(world, shooter, &session.config().physics, &self.config) else {
                    debug!(side = %self.side, "no shot to plan");
                    self.stage = AiStage::Done;
                    return;
                };
                info!(
                    side = %self.side,
                    target = %plan.target,
                    weapon = %plan.weapon,
                    angle = plan.angle,
                    power = plan.power,
                    "ai planned shot"
                );

                let target = world
                    .unit(shooter)
                    .map(|u| u.position + Vec2::from_angle(plan.angle).scale(CROSSHAIR_DISTANCE))
                    .unwrap_or(Vec2::ZERO);
                session.record_command(self.side, Command::SetWeapon { weapon: plan.weapon });
                session.record_command(self.side, Command::Aim { angle: plan.angle, target });
                self.plan = Some(plan);
                self.stage = AiStage::Aimed;
            }

            AiStage::Aimed if elapsed >= think + think / 2 => {
                session.record_command(self.side, Command::StartCharge);
                self.stage = AiStage::Charging;
            }

            AiStage::Charging => {
                let Some(plan) = self.plan else {
                    self.stage = AiStage::Done;
                    return;
                };
                let needed = (plan.power * session.config().max_charge_ms as f64) as u64;
                if !session.is_charging() || session.charge_elapsed_ms() >= needed {
                    session.record_command(self.side, Command::fire(plan.weapon, plan.power, plan.angle));
                    self.stage = AiStage::Done;
                }
            }

            _ => {}
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::game::map::TerrainMask;

    fn duel(a: Vec<Vec2>, b: Vec<Vec2>) -> WorldState {
        let config = WorldConfig { width: 300, height: 200, ..WorldConfig::default() };
        let terrain = TerrainMask::from_heights(300, 200, &[80; 300]);
        WorldState::new(config, terrain, [a, b], 0.0)
    }

    fn coarse() -> AiConfig {
        AiConfig { angle_step_deg: 10.0, power_step: 0.2, ..AiConfig::default() }
    }

    #[test]
    fn test_plan_targets_nearest_enemy() {
        let world = duel(
            vec![Vec2::new(60.5, 73.5)],
            vec![Vec2::new(150.5, 73.5), Vec2::new(260.5, 73.5)],
        );
        let plan = plan_shot(&world, UnitRef::new(SideId::A, 0), &PhysicsConfig::default(), &coarse()).unwrap();

        assert_eq!(plan.target, UnitRef::new(SideId::B, 0));
        assert!(plan.angle < 0.0, "shot should go upward");
        assert!(plan.power >= 0.3 && plan.power <= 1.0);
        assert!(plan.score.is_finite());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let world = duel(vec![Vec2::new(60.5, 73.5)], vec![Vec2::new(200.5, 73.5)]);
        let physics = PhysicsConfig::default();
        let shooter = UnitRef::new(SideId::A, 0);

        let a = plan_shot(&world, shooter, &physics, &coarse());
        let b = plan_shot(&world, shooter, &physics, &coarse());
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_plan_without_enemies() {
        let mut world = duel(vec![Vec2::new(60.5, 73.5)], vec![Vec2::new(200.5, 73.5)]);
        world.sides[1].units[0].alive = false;
        assert!(plan_shot(&world, UnitRef::new(SideId::A, 0), &PhysicsConfig::default(), &coarse()).is_none());
    }

    #[test]
    fn test_stage_follows_turns() {
        let mut ai = AiDriver::new(SideId::B, coarse());
        ai.begin_turn(&TurnStart { turn_index: 1, side: SideId::A, unit: 0, wind: 0.0, start_ms: 0 });
        assert_eq!(ai.stage(), AiStage::Idle);

        ai.begin_turn(&TurnStart { turn_index: 2, side: SideId::B, unit: 0, wind: 0.0, start_ms: 0 });
        assert_eq!(ai.stage(), AiStage::Thinking);

        ai.end_turn();
        assert_eq!(ai.stage(), AiStage::Idle);
    }
}
