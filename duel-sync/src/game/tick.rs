//! Physics Step
//!
//! Fixed-step simulation: unit gravity and landing, projectile flight,
//! explosions, drowning. Plus the two command-driven entry points, walking
//! (integrated in 1 ms substeps) and firing.
//!
//! Every function appends the facts it produces to an event buffer in
//! emission order; the session stamps them with turn time.

use crate::config::PhysicsConfig;
use crate::core::vec2::Vec2;
use crate::game::collision::{is_grounded, projectile_contact, sweep_circle, Contact};
use crate::game::events::{EngineEventData, ExpireReason, HealthCause, HealthChange};
use crate::game::state::{Facing, Projectile, SideId, UnitRef, WorldState};
use crate::game::weapon::Weapon;

/// Longest projectile move before a contact test.
const PROJECTILE_STEP: f64 = 1.0;

/// Distance from a unit's centre to the muzzle, beyond its radius.
const MUZZLE_OFFSET: f64 = 4.0;

/// Outcome of advancing one projectile by one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Flight {
    Flying,
    Detonate(Vec2),
    Expired(ExpireReason),
}

/// Run one physics step of `config.step_ms`.
pub fn step(world: &mut WorldState, config: &PhysicsConfig, events: &mut Vec<EngineEventData>) {
    world.time_ms += config.step_ms as u64;
    let dt = config.step_ms as f64 / 1000.0;

    step_units(world, config, dt, events);
    step_projectiles(world, config, dt, events);
}

fn step_units(world: &mut WorldState, config: &PhysicsConfig, dt: f64, events: &mut Vec<EngineEventData>) {
    let radius = world.config.unit_radius;
    let kill_line = world.config.kill_line();
    let padding = world.config.padding;
    let max_x = world.config.width as f64 + padding;
    let max_y = world.config.height as f64 + padding;

    for side_id in SideId::ALL {
        let terrain = &world.terrain;
        let side = &mut world.sides[side_id.index()];
        for (i, unit) in side.units.iter_mut().enumerate() {
            if !unit.alive {
                continue;
            }
            let unit_ref = UnitRef::new(side_id, i as u16);

            if unit.grounded && unit.velocity == Vec2::ZERO {
                if is_grounded(terrain, unit.position, radius) {
                    continue;
                }
                // Ground was carved away
                unit.grounded = false;
            }

            unit.velocity.y += config.gravity * dt;
            let target = unit.position + unit.velocity.scale(dt);
            let (reached, blocked) = sweep_circle(terrain, unit.position, target, radius);
            unit.position = reached;

            if blocked {
                if unit.velocity.y >= 0.0 && is_grounded(terrain, reached, radius) {
                    unit.velocity = Vec2::ZERO;
                    unit.grounded = true;
                } else {
                    // Wall or ceiling
                    unit.velocity.x = 0.0;
                    unit.velocity.y = unit.velocity.y.max(0.0);
                }
            }

            let cause = if unit.position.y > kill_line {
                Some(HealthCause::Drowned)
            } else if unit.position.x < -padding || unit.position.x > max_x || unit.position.y > max_y {
                unit.position.x = unit.position.x.clamp(-padding, max_x);
                unit.position.y = unit.position.y.min(max_y);
                Some(HealthCause::OutOfWorld)
            } else {
                if unit.position.y < -padding {
                    unit.position.y = -padding;
                    unit.velocity.y = unit.velocity.y.max(0.0);
                }
                None
            };

            if let Some(cause) = cause {
                let before = unit.health;
                unit.health = 0;
                unit.alive = false;
                unit.grounded = false;
                unit.velocity = Vec2::ZERO;
                events.push(EngineEventData::UnitHealthChanged(HealthChange::new(
                    unit_ref, before, 0, cause, true,
                )));
            }
        }
    }
}

fn step_projectiles(world: &mut WorldState, config: &PhysicsConfig, dt: f64, events: &mut Vec<EngineEventData>) {
    let in_flight = std::mem::take(&mut world.projectiles);
    let mut remaining = Vec::with_capacity(in_flight.len());
    let mut detonations = Vec::new();

    for mut projectile in in_flight {
        match advance_projectile(world, &mut projectile, config, dt) {
            Flight::Flying => remaining.push(projectile),
            Flight::Detonate(at) => detonations.push((projectile.id, projectile.weapon, at)),
            Flight::Expired(reason) => events.push(EngineEventData::ProjectileExpired {
                projectile: projectile.id,
                reason,
                position: projectile.position,
            }),
        }
    }
    world.projectiles = remaining;

    for (id, weapon, at) in detonations {
        explode(world, id, weapon, at, config, events);
    }
}

/// Advance one projectile by one step against a read-only world.
pub fn advance_projectile(world: &WorldState, p: &mut Projectile, config: &PhysicsConfig, dt: f64) -> Flight {
    let spec = p.weapon.spec();
    let padding = world.config.padding;
    let max_x = world.config.width as f64 + padding;

    p.age_ms += config.step_ms;
    if let Some(fuse) = spec.fuse_ms {
        if p.age_ms >= fuse {
            let inside = p.position.x >= -padding && p.position.x <= max_x && p.position.y >= -padding;
            return if inside { Flight::Detonate(p.position) } else { Flight::Expired(ExpireReason::OutOfWorld) };
        }
    }
    if p.age_ms > config.projectile_lifetime_ms {
        return Flight::Expired(ExpireReason::Lifetime);
    }

    p.velocity.x += world.wind * config.wind_accel * spec.wind_factor * dt;
    p.velocity.y += config.gravity * dt;

    let delta = p.velocity.scale(dt);
    let steps = (delta.length() / PROJECTILE_STEP).ceil().max(1.0) as u32;
    let inc = delta.scale(1.0 / steps as f64);

    for _ in 0..steps {
        let next = p.position + inc;
        match projectile_contact(world, next, config.projectile_radius) {
            None => p.position = next,
            Some(contact) if spec.bounces => {
                bounce(world, p, next, contact, config.restitution);
                break;
            }
            Some(_) => return Flight::Detonate(next),
        }
    }

    if p.position.y > world.config.kill_line() {
        Flight::Expired(ExpireReason::Water)
    } else if p.position.x < -padding || p.position.x > max_x {
        Flight::Expired(ExpireReason::OutOfWorld)
    } else {
        Flight::Flying
    }
}

/// Reflect the velocity off whichever axis hit terrain.
fn bounce(world: &WorldState, p: &mut Projectile, next: Vec2, contact: Contact, restitution: f64) {
    match contact {
        Contact::Terrain => {
            let hit_x = world.terrain.is_solid_at(Vec2::new(next.x, p.position.y));
            let hit_y = world.terrain.is_solid_at(Vec2::new(p.position.x, next.y));
            if hit_x {
                p.velocity.x = -p.velocity.x * restitution;
            }
            if hit_y || !hit_x {
                p.velocity.y = -p.velocity.y * restitution;
                p.velocity.x *= restitution;
            }
        }
        Contact::Unit(_) => p.velocity = -p.velocity.scale(restitution),
    }
}

/// Blow up at `at`: carve, then damage and push every living unit in reach.
pub fn explode(
    world: &mut WorldState,
    projectile: u16,
    weapon: Weapon,
    at: Vec2,
    config: &PhysicsConfig,
    events: &mut Vec<EngineEventData>,
) {
    let spec = weapon.spec();
    events.push(EngineEventData::ProjectileExploded {
        projectile,
        position: at,
        radius: spec.blast_radius,
    });

    world.terrain.carve(at, spec.blast_radius);
    events.push(EngineEventData::TerrainCarved {
        position: at,
        radius: spec.blast_radius,
    });

    let reach = spec.blast_radius + world.config.unit_radius;
    for side_id in SideId::ALL {
        for (i, unit) in world.sides[side_id.index()].units.iter_mut().enumerate() {
            if !unit.alive {
                continue;
            }
            let offset = unit.position - at;
            let dist = offset.length();
            if dist >= reach {
                continue;
            }
            let falloff = 1.0 - dist / reach;

            let away = if dist > 1e-6 { offset.scale(1.0 / dist) } else { Vec2::UP };
            let push = (away + Vec2::UP.scale(0.5)).normalize();
            unit.velocity += push.scale(config.knockback * falloff);
            unit.grounded = false;

            let damage = (spec.max_damage as f64 * falloff).round() as i32;
            if damage <= 0 {
                continue;
            }
            let before = unit.health;
            let after = (before - damage).max(0);
            unit.health = after;
            if after == 0 {
                unit.alive = false;
                unit.velocity = Vec2::ZERO;
            }
            events.push(EngineEventData::UnitHealthChanged(HealthChange::new(
                UnitRef::new(side_id, i as u16),
                before,
                after,
                HealthCause::Explosion { projectile },
                true,
            )));
        }
    }
}

/// Launch a weapon from a unit. Returns the spawned projectile ids.
pub fn fire(
    world: &mut WorldState,
    shooter: UnitRef,
    weapon: Weapon,
    power: f64,
    angle: f64,
    events: &mut Vec<EngineEventData>,
) -> Vec<u16> {
    let Some(unit) = world.unit_mut(shooter) else {
        return Vec::new();
    };
    unit.facing = Facing::from_angle(angle);
    let origin = unit.position;

    let spec = weapon.spec();
    let muzzle = world.config.unit_radius + MUZZLE_OFFSET;
    let centre = (spec.pellets as i32 - 1) as f64 / 2.0;

    let mut ids = Vec::with_capacity(spec.pellets as usize);
    for k in 0..spec.pellets {
        let dir = Vec2::from_angle(angle + (k as f64 - centre) * spec.spread);
        let id = world.next_projectile_id;
        world.next_projectile_id = world.next_projectile_id.wrapping_add(1);

        let position = origin + dir.scale(muzzle);
        let velocity = dir.scale(spec.muzzle_speed * power);
        world.projectiles.push(Projectile { id, weapon, position, velocity, age_ms: 0 });
        events.push(EngineEventData::ProjectileSpawned { projectile: id, weapon, position, velocity });
        ids.push(id);
    }
    ids
}

/// Walk a grounded unit for `elapsed_ms`, one millisecond at a time, then
/// jump if asked. Climbs steps up to `max_climb` cells and follows slopes
/// down; walking off a ledge hands the unit to gravity.
pub fn walk_unit(
    world: &mut WorldState,
    unit_ref: UnitRef,
    direction: i8,
    jump: bool,
    elapsed_ms: u32,
    config: &PhysicsConfig,
) {
    let radius = world.config.unit_radius;
    let terrain = &world.terrain;
    let Some(unit) = world.sides[unit_ref.side.index()].units.get_mut(unit_ref.index as usize) else {
        return;
    };
    if !unit.alive {
        return;
    }

    let direction = direction.signum();
    if direction != 0 {
        unit.facing = if direction > 0 { Facing::Right } else { Facing::Left };

        let per_ms = config.walk_speed / 1000.0 * direction as f64;
        for _ in 0..elapsed_ms {
            if !unit.grounded {
                break;
            }
            let ahead = Vec2::new(unit.position.x + per_ms, unit.position.y);
            let Some(mut next) = (0..=config.max_climb)
                .map(|climb| Vec2::new(ahead.x, ahead.y - climb as f64))
                .find(|p| !terrain.overlaps_circle(*p, radius))
            else {
                // Wall too tall to climb; the rest of the walk is blocked too
                break;
            };

            if !is_grounded(terrain, next, radius) {
                let below = (1..=config.max_climb)
                    .map(|drop| Vec2::new(next.x, next.y + drop as f64))
                    .find(|p| !terrain.overlaps_circle(*p, radius) && is_grounded(terrain, *p, radius));
                match below {
                    Some(p) => next = p,
                    None => unit.grounded = false,
                }
            }
            unit.position = next;
        }
    }

    if jump && unit.grounded {
        unit.velocity = Vec2::new(unit.facing.sign() * config.jump_speed_x, -config.jump_speed_y);
        unit.grounded = false;
    }
}

/// Where a shot would detonate if fired now, without touching the world.
/// `None` when it would be lost to water, the edges or its lifetime.
pub fn trace_shot(
    world: &WorldState,
    shooter: UnitRef,
    weapon: Weapon,
    power: f64,
    angle: f64,
    config: &PhysicsConfig,
) -> Option<Vec2> {
    let origin = world.unit(shooter)?.position;
    let dir = Vec2::from_angle(angle);
    let mut p = Projectile {
        id: 0,
        weapon,
        position: origin + dir.scale(world.config.unit_radius + MUZZLE_OFFSET),
        velocity: dir.scale(weapon.spec().muzzle_speed * power),
        age_ms: 0,
    };
    let dt = config.step_ms as f64 / 1000.0;

    loop {
        match advance_projectile(world, &mut p, config, dt) {
            Flight::Flying => continue,
            Flight::Detonate(at) => return Some(at),
            Flight::Expired(_) => return None,
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
    use crate::game::events::EngineEventData as E;
    use crate::game::map::TerrainMask;
    use crate::game::state::MatchPhase;
    use std::f64::consts::FRAC_PI_2;

    fn world_with(surface: Vec<u32>, a: Vec<Vec2>, b: Vec<Vec2>) -> WorldState {
        let config = WorldConfig { width: surface.len() as u32, height: 200, ..WorldConfig::default() };
        let terrain = TerrainMask::from_heights(config.width, config.height, &surface);
        WorldState::new(config, terrain, [a, b], 0.0)
    }

    fn flat(a: Vec<Vec2>, b: Vec<Vec2>) -> WorldState {
        world_with(vec![80; 300], a, b)
    }

    fn settle(world: &mut WorldState, config: &PhysicsConfig, events: &mut Vec<EngineEventData>) {
        for _ in 0..2_000 {
            step(world, config, events);
            if world.is_settled() {
                return;
            }
        }
        panic!("world did not settle");
    }

    #[test]
    fn test_step_advances_clock() {
        let mut world = flat(vec![Vec2::new(50.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let mut events = Vec::new();

        step(&mut world, &config, &mut events);

        assert_eq!(world.time_ms, 16);
        assert!(events.is_empty());
        assert!(world.is_settled());
    }

    #[test]
    fn test_unit_falls_and_lands() {
        let mut world = flat(vec![Vec2::new(50.5, 20.0)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let mut events = Vec::new();

        settle(&mut world, &config, &mut events);

        let unit = &world.sides[0].units[0];
        assert!(unit.grounded);
        assert!(unit.alive);
        assert!(unit.position.y > 70.0 && unit.position.y < 75.0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_unit_drowns_below_kill_line() {
        // Column gap (surface == height) lets the unit fall into the water
        let mut surface = vec![80; 300];
        for s in surface.iter_mut().take(60).skip(30) {
            *s = 200;
        }
        let mut world = world_with(surface, vec![Vec2::new(45.5, 40.0)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let mut events = Vec::new();

        settle(&mut world, &config, &mut events);

        let unit = &world.sides[0].units[0];
        assert!(!unit.alive);
        assert_eq!(unit.health, 0);
        assert_eq!(events.len(), 1);
        match &events[0] {
            E::UnitHealthChanged(change) => {
                assert_eq!(change.cause, HealthCause::Drowned);
                assert_eq!(change.before, 100);
                assert_eq!(change.after, 0);
                assert!(change.is_consistent());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_walk_on_flat_ground() {
        let mut world = flat(vec![Vec2::new(50.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let a0 = UnitRef::new(SideId::A, 0);

        walk_unit(&mut world, a0, 1, false, 500, &config);

        let unit = world.unit(a0).unwrap();
        assert!((unit.position.x - 70.5).abs() < 1e-6);
        assert_eq!(unit.position.y, 73.5);
        assert_eq!(unit.facing, Facing::Right);
        assert!(unit.grounded);
    }

    #[test]
    fn test_walk_climbs_small_step_but_not_wall() {
        let mut surface = vec![80; 300];
        for s in surface.iter_mut().skip(60).take(40) {
            *s = 78;
        }
        for s in surface.iter_mut().skip(140) {
            *s = 40;
        }
        let mut world = world_with(surface, vec![Vec2::new(50.5, 73.5)], vec![Vec2::new(250.5, 33.5)]);
        let config = PhysicsConfig::default();
        let a0 = UnitRef::new(SideId::A, 0);

        walk_unit(&mut world, a0, 1, false, 1_000, &config);
        let unit = world.unit(a0).unwrap();
        assert!(unit.position.y < 73.0, "unit should have climbed the 2-cell step");

        walk_unit(&mut world, a0, 1, false, 5_000, &config);
        let unit = world.unit(a0).unwrap();
        assert!(unit.position.x < 140.0 - 5.0, "unit should be stopped by the cliff");
        assert!(unit.grounded);
    }

    #[test]
    fn test_walk_stops_at_cliff_even_when_unbounded() {
        let mut surface = vec![80; 300];
        for s in surface.iter_mut().skip(70) {
            *s = 20;
        }
        let mut world = world_with(surface, vec![Vec2::new(55.5, 73.5)], vec![Vec2::new(250.5, 13.5)]);
        let config = PhysicsConfig::default();
        let a0 = UnitRef::new(SideId::A, 0);

        let started = std::time::Instant::now();
        walk_unit(&mut world, a0, 1, false, u32::MAX, &config);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        let unit = world.unit(a0).unwrap();
        assert!(unit.position.x > 55.5 && unit.position.x < 70.0);
        assert!(unit.grounded);
    }

    #[test]
    fn test_jump_requires_ground() {
        let mut world = flat(vec![Vec2::new(50.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let a0 = UnitRef::new(SideId::A, 0);

        walk_unit(&mut world, a0, -1, true, 0, &config);
        let unit = world.unit(a0).unwrap();
        assert!(!unit.grounded);
        assert_eq!(unit.velocity, Vec2::new(-config.jump_speed_x, -config.jump_speed_y));

        // Airborne: a second jump changes nothing
        walk_unit(&mut world, a0, 0, true, 10, &config);
        assert_eq!(world.unit(a0).unwrap().velocity, Vec2::new(-config.jump_speed_x, -config.jump_speed_y));
    }

    #[test]
    fn test_split_walk_matches_single_walk() {
        let config = PhysicsConfig::default();
        let a0 = UnitRef::new(SideId::A, 0);
        let mut one = flat(vec![Vec2::new(50.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let mut many = one.clone();

        walk_unit(&mut one, a0, 1, false, 64, &config);
        for _ in 0..8 {
            walk_unit(&mut many, a0, 1, false, 8, &config);
        }

        assert_eq!(one, many);
    }

    #[test]
    fn test_downward_shot_damages_both_neighbours() {
        let mut world = flat(vec![Vec2::new(100.5, 73.5)], vec![Vec2::new(112.5, 73.5)]);
        let config = PhysicsConfig::default();
        let mut events = Vec::new();
        let a0 = UnitRef::new(SideId::A, 0);

        let ids = fire(&mut world, a0, Weapon::Bazooka, 0.5, FRAC_PI_2, &mut events);
        assert_eq!(ids, vec![0]);
        world.phase = MatchPhase::Projectile;

        settle(&mut world, &config, &mut events);

        let hits: Vec<&HealthChange> = events
            .iter()
            .filter_map(|e| match e {
                E::UnitHealthChanged(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].unit, a0);
        assert_eq!(hits[1].unit, UnitRef::new(SideId::B, 0));
        for hit in hits {
            assert!(hit.is_consistent());
            assert!(hit.delta < 0);
            assert_eq!(hit.cause, HealthCause::Explosion { projectile: 0 });
        }
        assert!(events.iter().any(|e| matches!(e, E::TerrainCarved { .. })));
    }

    #[test]
    fn test_cluster_spawns_three_ids() {
        let mut world = flat(vec![Vec2::new(100.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let mut events = Vec::new();

        let ids = fire(&mut world, UnitRef::new(SideId::A, 0), Weapon::Cluster, 1.0, -1.0, &mut events);

        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(world.projectiles.len(), 3);
        assert_eq!(world.next_projectile_id, 3);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_shot_into_the_sea_expires() {
        let mut world = flat(vec![Vec2::new(280.5, 73.5)], vec![Vec2::new(20.5, 73.5)]);
        let config = PhysicsConfig::default();
        let mut events = Vec::new();

        // Low and to the right, off the edge of the map
        fire(&mut world, UnitRef::new(SideId::A, 0), Weapon::Bazooka, 1.0, -0.3, &mut events);
        settle(&mut world, &config, &mut events);

        assert!(events.iter().any(|e| matches!(e, E::ProjectileExpired { .. })));
        assert!(!events.iter().any(|e| matches!(e, E::ProjectileExploded { .. })));
    }

    #[test]
    fn test_grenade_waits_for_fuse() {
        let mut world = flat(vec![Vec2::new(100.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let mut events = Vec::new();

        fire(&mut world, UnitRef::new(SideId::A, 0), Weapon::Grenade, 0.3, -1.2, &mut events);
        for _ in 0..(2_900 / config.step_ms) {
            step(&mut world, &config, &mut events);
        }
        assert_eq!(world.projectiles.len(), 1);

        settle(&mut world, &config, &mut events);
        assert!(events.iter().any(|e| matches!(e, E::ProjectileExploded { projectile: 0, .. })));
    }

    #[test]
    fn test_trace_shot_matches_real_flight() {
        let world = flat(vec![Vec2::new(50.5, 73.5)], vec![Vec2::new(250.5, 73.5)]);
        let config = PhysicsConfig::default();
        let a0 = UnitRef::new(SideId::A, 0);

        let predicted = trace_shot(&world, a0, Weapon::Bazooka, 0.6, -0.8, &config);

        let mut live = world.clone();
        let mut events = Vec::new();
        fire(&mut live, a0, Weapon::Bazooka, 0.6, -0.8, &mut events);
        while !live.projectiles.is_empty() {
            step(&mut live, &config, &mut events);
        }
        let actual = events.iter().find_map(|e| match e {
            E::ProjectileExploded { position, .. } => Some(*position),
            _ => None,
        });

        assert_eq!(predicted, actual);
    }
}
