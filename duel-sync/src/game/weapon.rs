//! Weapons
//!
//! Static ballistics per weapon. Power scales muzzle speed; everything else
//! is fixed per weapon.

use std::fmt;
use serde::{Serialize, Deserialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weapon {
    /// Explodes on impact, pushed by wind
    #[default]
    Bazooka,
    /// Bounces until its fuse runs out, ignores wind
    Grenade,
    /// Three impact bomblets fanned around the aim
    Cluster,
}

/// Ballistic and blast parameters of a weapon.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeaponSpec {
    /// Launch speed at full power (units/s)
    pub muzzle_speed: f64,
    pub blast_radius: f64,
    /// Damage at the blast centre; falls off linearly to zero at the edge
    pub max_damage: i32,
    /// Multiplier on wind acceleration
    pub wind_factor: f64,
    /// Detonation time; `None` means impact-fused
    pub fuse_ms: Option<u32>,
    pub bounces: bool,
    pub pellets: u8,
    /// Angle between neighbouring pellets (radians)
    pub spread: f64,
}

impl Weapon {
    pub const ALL: [Weapon; 3] = [Weapon::Bazooka, Weapon::Grenade, Weapon::Cluster];

    pub fn spec(self) -> WeaponSpec {
        match self {
            Weapon::Bazooka => WeaponSpec {
                muzzle_speed: 420.0,
                blast_radius: 28.0,
                max_damage: 45,
                wind_factor: 1.0,
                fuse_ms: None,
                bounces: false,
                pellets: 1,
                spread: 0.0,
            },
            Weapon::Grenade => WeaponSpec {
                muzzle_speed: 300.0,
                blast_radius: 30.0,
                max_damage: 50,
                wind_factor: 0.0,
                fuse_ms: Some(3_000),
                bounces: true,
                pellets: 1,
                spread: 0.0,
            },
            Weapon::Cluster => WeaponSpec {
                muzzle_speed: 380.0,
                blast_radius: 16.0,
                max_damage: 20,
                wind_factor: 1.0,
                fuse_ms: None,
                bounces: false,
                pellets: 3,
                spread: 0.12,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Weapon::Bazooka => "bazooka",
            Weapon::Grenade => "grenade",
            Weapon::Cluster => "cluster",
        }
    }
}

impl fmt::Display for Weapon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
