//! Collision Detection
//!
//! Disc-versus-terrain sweeps for units and point contacts for projectiles.

use crate::core::vec2::Vec2;
use crate::game::map::TerrainMask;
use crate::game::state::{UnitRef, WorldState};

/// Longest unit sweep increment before a terrain test.
const SWEEP_STEP: f64 = 0.5;

/// Refinement slices used once a sweep increment collides.
const REFINE_SLICES: u32 = 5;

/// What a projectile touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Contact {
    Terrain,
    Unit(UnitRef),
}

/// How far below a disc the ground probe reaches.
const GROUND_PROBE: f64 = 1.5;

/// Is there terrain just below the disc?
#[inline]
pub fn is_grounded(terrain: &TerrainMask, center: Vec2, radius: f64) -> bool {
    terrain.overlaps_circle(center + Vec2::new(0.0, GROUND_PROBE), radius)
}

/// Move a disc from `from` towards `to`, stopping just before terrain.
///
/// Returns the reached position and whether terrain blocked the move.
pub fn sweep_circle(terrain: &TerrainMask, from: Vec2, to: Vec2, radius: f64) -> (Vec2, bool) {
    let delta = to - from;
    let steps = (delta.length() / SWEEP_STEP).ceil().max(1.0) as u32;
    let inc = delta.scale(1.0 / steps as f64);

    let mut pos = from;
    for _ in 0..steps {
        let next = pos + inc;
        if terrain.overlaps_circle(next, radius) {
            // Creep the rest of the way in finer slices
            let mut reached = pos;
            for k in 1..REFINE_SLICES {
                let probe = pos + inc.scale(k as f64 / REFINE_SLICES as f64);
                if terrain.overlaps_circle(probe, radius) {
                    break;
                }
                reached = probe;
            }
            return (reached, true);
        }
        pos = next;
    }
    (pos, false)
}

/// First thing a projectile of `radius` at `point` touches: terrain first,
/// then living units in side/index order.
pub fn projectile_contact(world: &WorldState, point: Vec2, radius: f64) -> Option<Contact> {
    if world.terrain.is_solid_at(point) {
        return Some(Contact::Terrain);
    }
    let reach = world.config.unit_radius + radius;
    world
        .units()
        .find(|(_, u)| u.alive && u.position.distance_squared(point) <= reach * reach)
        .map(|(r, _)| Contact::Unit(r))
}
