//! Destructible Terrain
//!
//! A packed 1-bit-per-cell grid, one cell per world unit. Row 0 is the top
//! of the world. Cells outside the grid are empty: the sides are open and
//! everything below the grid is water.

use std::f64::consts::TAU;
use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::core::rng::RandomSource;
use crate::core::vec2::Vec2;

/// Number of sine octaves summed into a generated skyline.
const OCTAVES: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainMask {
    width: u32,
    height: u32,
    /// Row-major bits, least significant bit first
    bits: Vec<u8>,
}

impl TerrainMask {
    /// All-empty mask.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Build from a per-column surface row: column `x` is solid from
    /// `surface[x]` down to the bottom. Missing columns stay empty.
    pub fn from_heights(width: u32, height: u32, surface: &[u32]) -> Self {
        let mut mask = Self::empty(width, height);
        for (x, &top) in surface.iter().enumerate().take(width as usize) {
            for y in top.min(height)..height {
                mask.set(x as i64, y as i64, true);
            }
        }
        mask
    }

    /// Rolling hills from a sum of sines with random phases.
    pub fn generate(width: u32, height: u32, rng: &mut dyn RandomSource) -> Self {
        let h = height as f64;
        let base = h * 0.55;

        let waves: Vec<(f64, f64, f64)> = (0..OCTAVES)
            .map(|octave| {
                let k = (octave + 1) as f64;
                let amplitude = h * 0.12 / k;
                let cycles = k + rng.next_int(2) as f64;
                let frequency = TAU * cycles / width as f64;
                let phase = rng.next_range(0.0, TAU);
                (amplitude, frequency, phase)
            })
            .collect();

        let surface: Vec<u32> = (0..width)
            .map(|x| {
                let offset: f64 = waves
                    .iter()
                    .map(|(amp, freq, phase)| amp * (freq * x as f64 + phase).sin())
                    .sum();
                (base + offset).clamp(h * 0.2, h - 1.0) as u32
            })
            .collect();

        Self::from_heights(width, height, &surface)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw packed bits (for hashing and debugging).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// True when the bit buffer matches the declared dimensions.
    /// Only a deserialized mask can violate this.
    pub fn is_well_formed(&self) -> bool {
        self.bits.len() == Self::byte_len(self.width, self.height)
    }

    fn byte_len(width: u32, height: u32) -> usize {
        (width as usize * height as usize).div_ceil(8)
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Is the cell at integer coordinates solid?
    #[inline]
    pub fn is_solid(&self, x: i64, y: i64) -> bool {
        self.index(x, y)
            .and_then(|i| self.bits.get(i / 8).map(|byte| byte & (1 << (i % 8)) != 0))
            .unwrap_or(false)
    }

    /// Is the cell containing a world point solid?
    #[inline]
    pub fn is_solid_at(&self, point: Vec2) -> bool {
        if !point.is_finite() {
            return false;
        }
        self.is_solid(point.x.floor() as i64, point.y.floor() as i64)
    }

    pub fn set(&mut self, x: i64, y: i64, solid: bool) {
        let Some(i) = self.index(x, y) else {
            return;
        };
        if let Some(byte) = self.bits.get_mut(i / 8) {
            if solid {
                *byte |= 1 << (i % 8);
            } else {
                *byte &= !(1 << (i % 8));
            }
        }
    }

    /// Clear every cell whose centre lies within `radius` of `center`.
    ///
    /// Returns the number of cells that were solid.
    pub fn carve(&mut self, center: Vec2, radius: f64) -> u32 {
        if !center.is_finite() || !(radius > 0.0) {
            return 0;
        }
        let r2 = radius * radius;
        let x0 = (center.x - radius).floor() as i64;
        let x1 = (center.x + radius).ceil() as i64;
        let y0 = (center.y - radius).floor() as i64;
        let y1 = (center.y + radius).ceil() as i64;

        let mut cleared = 0;
        for y in y0.max(0)..=y1.min(self.height as i64 - 1) {
            for x in x0.max(0)..=x1.min(self.width as i64 - 1) {
                let cell = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
                if cell.distance_squared(center) <= r2 && self.is_solid(x, y) {
                    self.set(x, y, false);
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Does a disc overlap any solid cell centre?
    pub fn overlaps_circle(&self, center: Vec2, radius: f64) -> bool {
        if !center.is_finite() {
            return false;
        }
        let r2 = radius * radius;
        let x0 = (center.x - radius).floor() as i64;
        let x1 = (center.x + radius).floor() as i64;
        let y0 = (center.y - radius).floor() as i64;
        let y1 = (center.y + radius).floor() as i64;

        for y in y0.max(0)..=y1.min(self.height as i64 - 1) {
            for x in x0.max(0)..=x1.min(self.width as i64 - 1) {
                if !self.is_solid(x, y) {
                    continue;
                }
                let cell = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
                if cell.distance_squared(center) <= r2 {
                    return true;
                }
            }
        }
        false
    }

    /// Topmost solid row of a column.
    pub fn surface_y(&self, x: i64) -> Option<i64> {
        (0..self.height as i64).find(|&y| self.is_solid(x, y))
    }

    pub fn solid_count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub(crate) fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.put(self.width).put(self.height).put_bytes(&self.bits);
    }
}
