//! World State Definitions
//!
//! Everything the simulation owns. `WorldState` is also the snapshot
//! payload of a turn resolution, so every field here travels between peers
//! and feeds the snapshot hash.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::config::WorldConfig;
use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::RandomSource;
use crate::core::vec2::Vec2;
use crate::game::collision::is_grounded;
use crate::game::map::TerrainMask;
use crate::game::weapon::Weapon;

// =============================================================================
// SIDES & UNITS
// =============================================================================

/// One of the two competing parties. Side `A` belongs to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SideId {
    A,
    B,
}

impl SideId {
    pub const ALL: [SideId; 2] = [SideId::A, SideId::B];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            SideId::A => 0,
            SideId::B => 1,
        }
    }

    #[inline]
    pub fn other(self) -> Self {
        match self {
            SideId::A => SideId::B,
            SideId::B => SideId::A,
        }
    }
}

impl fmt::Display for SideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideId::A => f.write_str("A"),
            SideId::B => f.write_str("B"),
        }
    }
}

/// Stable address of a unit: `(side, index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub side: SideId,
    pub index: u16,
}

impl UnitRef {
    pub const fn new(side: SideId, index: u16) -> Self {
        Self { side, index }
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.side, self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Facing {
    Left,
    #[default]
    Right,
}

impl Facing {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Facing::Left => -1.0,
            Facing::Right => 1.0,
        }
    }

    /// Facing that looks along an aim angle.
    pub fn from_angle(angle: f64) -> Self {
        if angle.cos() < 0.0 {
            Facing::Left
        } else {
            Facing::Right
        }
    }
}

/// A single combat unit. Never removed; death clears `alive`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Centre of the unit's collision disc
    pub position: Vec2,

    pub velocity: Vec2,

    pub health: i32,

    pub alive: bool,

    pub facing: Facing,

    /// Resting on terrain (may walk and jump)
    pub grounded: bool,

    /// Turns survived
    pub age: u32,
}

impl Unit {
    pub fn new(position: Vec2, health: i32) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            health,
            alive: health > 0,
            facing: Facing::default(),
            grounded: false,
            age: 0,
        }
    }

    /// At rest: no velocity and on the ground (or dead).
    pub fn is_settled(&self) -> bool {
        !self.alive || (self.grounded && self.velocity == Vec2::ZERO)
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher
            .put(self.position)
            .put(self.velocity)
            .put(self.health)
            .put(self.alive)
            .put(self.facing as u8)
            .put(self.grounded)
            .put(self.age);
    }
}

/// One side's roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Side {
    pub id: SideId,
    pub units: Vec<Unit>,
    /// Index of the unit that acted last for this side
    pub cursor: u16,
}

impl Side {
    pub fn alive_count(&self) -> usize {
        self.units.iter().filter(|u| u.alive).count()
    }

    pub fn total_health(&self) -> i32 {
        self.units.iter().filter(|u| u.alive).map(|u| u.health).sum()
    }

    /// First living unit after the cursor, wrapping around.
    pub fn next_alive(&self) -> Option<u16> {
        let n = self.units.len();
        (1..=n)
            .map(|k| (self.cursor as usize + k) % n)
            .find(|&i| self.units[i].alive)
            .map(|i| i as u16)
    }
}

// =============================================================================
// PROJECTILES & PHASE
// =============================================================================

/// A projectile in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    /// Per-turn id, assigned in spawn order starting at 0
    pub id: u16,
    pub weapon: Weapon,
    pub position: Vec2,
    pub velocity: Vec2,
    pub age_ms: u32,
}

/// Match phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// The active unit may move, aim, charge and fire
    Aim,
    /// A shot is in flight
    Projectile,
    /// Shot resolved; settling before the turn closes
    Post,
    /// One side has no living units
    GameOver,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchPhase::Aim => "aim",
            MatchPhase::Projectile => "projectile",
            MatchPhase::Post => "post",
            MatchPhase::GameOver => "game_over",
        };
        f.write_str(name)
    }
}

// =============================================================================
// WORLD STATE
// =============================================================================

/// Full simulation state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Geometry the world was built with
    pub config: WorldConfig,

    pub terrain: TerrainMask,

    /// Indexed by `SideId::index()`
    pub sides: [Side; 2],

    pub projectiles: Vec<Projectile>,

    /// Next per-turn projectile id
    pub next_projectile_id: u16,

    pub phase: MatchPhase,

    pub active_side: SideId,

    pub active_unit: u16,

    /// Horizontal wind in [-max_wind, max_wind]
    pub wind: f64,

    /// Simulation clock (advances only with physics steps)
    pub time_ms: u64,

    /// Set when the phase becomes `GameOver`; `None` for a draw
    pub winner: Option<SideId>,
}

impl WorldState {
    /// Assemble a world from explicit parts. Side A's first unit acts first.
    pub fn new(config: WorldConfig, terrain: TerrainMask, placements: [Vec<Vec2>; 2], wind: f64) -> Self {
        let [a, b] = placements;
        let health = config.unit_health;
        let side = |id: SideId, positions: Vec<Vec2>| {
            let cursor = positions.len().saturating_sub(1) as u16;
            Side {
                id,
                units: positions.into_iter().map(|p| Unit::new(p, health)).collect(),
                cursor,
            }
        };

        let mut world = Self {
            config,
            terrain,
            sides: [side(SideId::A, a), side(SideId::B, b)],
            projectiles: Vec::new(),
            next_projectile_id: 0,
            phase: MatchPhase::Aim,
            active_side: SideId::A,
            active_unit: 0,
            wind,
            time_ms: 0,
            winner: None,
        };
        world.sides[0].cursor = 0;
        world.refresh_grounded();
        world.face_each_other();
        world
    }

    /// Generate terrain and place units: side A on the left half, side B on
    /// the right half, each unit resting on dry ground.
    pub fn generate(config: &WorldConfig, max_wind: f64, rng: &mut dyn RandomSource) -> Self {
        let terrain = TerrainMask::generate(config.width, config.height, rng);
        let n = config.units_per_side as usize;
        let half = config.width as f64 / 2.0;
        let slot = half / n as f64;

        let mut placements = [Vec::with_capacity(n), Vec::with_capacity(n)];
        for (side_index, positions) in placements.iter_mut().enumerate() {
            let origin = side_index as f64 * half;
            for i in 0..n {
                let lo = origin + slot * i as f64 + slot * 0.2;
                let hi = origin + slot * (i + 1) as f64 - slot * 0.2;
                positions.push(spawn_point(&terrain, config, lo, hi, rng));
            }
        }

        let wind = rng.next_range(-max_wind, max_wind);
        Self::new(config.clone(), terrain, placements, wind)
    }

    #[inline]
    pub fn side(&self, id: SideId) -> &Side {
        &self.sides[id.index()]
    }

    #[inline]
    pub fn unit(&self, unit: UnitRef) -> Option<&Unit> {
        self.sides[unit.side.index()].units.get(unit.index as usize)
    }

    #[inline]
    pub fn unit_mut(&mut self, unit: UnitRef) -> Option<&mut Unit> {
        self.sides[unit.side.index()].units.get_mut(unit.index as usize)
    }

    pub fn active_unit_ref(&self) -> UnitRef {
        UnitRef::new(self.active_side, self.active_unit)
    }

    /// All units with their addresses, side A first.
    pub fn units(&self) -> impl Iterator<Item = (UnitRef, &Unit)> {
        self.sides.iter().flat_map(|side| {
            side.units
                .iter()
                .enumerate()
                .map(move |(i, unit)| (UnitRef::new(side.id, i as u16), unit))
        })
    }

    /// No projectiles in flight and every living unit at rest.
    pub fn is_settled(&self) -> bool {
        self.projectiles.is_empty() && self.units().all(|(_, u)| u.is_settled())
    }

    /// Recompute `grounded` for every living unit against the terrain.
    pub fn refresh_grounded(&mut self) {
        let radius = self.config.unit_radius;
        for side in self.sides.iter_mut() {
            for unit in side.units.iter_mut().filter(|u| u.alive) {
                unit.grounded = is_grounded(&self.terrain, unit.position, radius);
            }
        }
    }

    fn face_each_other(&mut self) {
        for unit in self.sides[0].units.iter_mut() {
            unit.facing = Facing::Right;
        }
        for unit in self.sides[1].units.iter_mut() {
            unit.facing = Facing::Left;
        }
    }

    /// Close the current turn: age survivors, clear projectiles, hand the
    /// turn to the other side's next living unit with fresh wind, or end
    /// the match when a side has been wiped out.
    pub fn advance_turn(&mut self, max_wind: f64, rng: &mut dyn RandomSource) {
        for side in self.sides.iter_mut() {
            for unit in side.units.iter_mut().filter(|u| u.alive) {
                unit.age += 1;
            }
        }
        self.projectiles.clear();
        self.next_projectile_id = 0;

        let alive = [self.sides[0].alive_count(), self.sides[1].alive_count()];
        if alive[0] == 0 || alive[1] == 0 {
            self.phase = MatchPhase::GameOver;
            self.winner = match alive {
                [0, 0] => None,
                [0, _] => Some(SideId::B),
                _ => Some(SideId::A),
            };
            return;
        }

        let next = self.active_side.other();
        let side = &mut self.sides[next.index()];
        // alive_count > 0 guarantees a unit
        let unit = side.next_alive().unwrap_or(side.cursor);
        side.cursor = unit;

        self.active_side = next;
        self.active_unit = unit;
        self.wind = rng.next_range(-max_wind, max_wind);
        self.phase = MatchPhase::Aim;
    }

    /// Snapshot hash for a given turn index.
    pub fn compute_hash(&self, turn_index: u32) -> StateHash {
        let mut hasher = StateHasher::snapshot(turn_index, self.time_ms);
        self.terrain.hash_into(&mut hasher);
        for side in &self.sides {
            hasher.put(side.id.index() as u8).put(side.cursor).put(side.units.len() as u32);
            for unit in &side.units {
                unit.hash_into(&mut hasher);
            }
        }
        hasher.put(self.projectiles.len() as u32);
        for p in &self.projectiles {
            hasher.put(p.id).put(p.weapon as u8).put(p.position).put(p.velocity).put(p.age_ms);
        }
        hasher
            .put(self.next_projectile_id)
            .put(self.phase as u8)
            .put(self.active_side.index() as u8)
            .put(self.active_unit)
            .put(self.wind)
            .put(self.winner.map_or(0u8, |w| w.index() as u8 + 1))
            .put(self.config.width)
            .put(self.config.height)
            .put(self.config.padding)
            .put(self.config.water_depth);
        hasher.finish()
    }
}

/// Pick a dry spot in `[lo, hi)` and rest a unit on it.
fn spawn_point(terrain: &TerrainMask, config: &WorldConfig, lo: f64, hi: f64, rng: &mut dyn RandomSource) -> Vec2 {
    let kill_line = config.kill_line();
    let radius = config.unit_radius;
    let rest = |x: f64| {
        terrain
            .surface_y(x.floor() as i64)
            .filter(|&y| (y as f64) < kill_line - radius)
            .map(|y| {
                let mut p = Vec2::new(x.floor() + 0.5, y as f64 - radius - 0.5);
                // Neighbouring columns may stand taller on a slope
                while terrain.overlaps_circle(p, radius) && p.y > radius {
                    p.y -= 1.0;
                }
                p
            })
    };

    for _ in 0..16 {
        let x = rng.next_range(lo, hi);
        if let Some(p) = rest(x) {
            return p;
        }
    }
    // Scan the slot, then give up and drop the unit from the sky.
    let mut x = lo.floor();
    while x < hi {
        if let Some(p) = rest(x) {
            return p;
        }
        x += 1.0;
    }
    Vec2::new(((lo + hi) / 2.0).floor() + 0.5, radius + 1.0)
}
