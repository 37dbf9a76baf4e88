//! Effects Batcher
//!
//! Coalesces terrain carves and health changes of the turn in progress into
//! `turn_effects` messages. Big events go out at once; the rest waits for
//! the flush timer or a full batch. Effects are advisory: the resolution
//! still carries the authoritative state.

use crate::config::EffectsConfig;
use crate::game::events::{EngineEvent, EngineEventData};
use crate::game::state::SideId;
use crate::network::protocol::{TerrainOperation, TurnEffects};

#[derive(Debug)]
pub struct EffectsBatcher {
    config: EffectsConfig,
    pending: Option<TurnEffects>,
    /// When the oldest pending item arrived
    opened_ms: u64,
}

impl EffectsBatcher {
    pub fn new(config: EffectsConfig) -> Self {
        Self {
            config,
            pending: None,
            opened_ms: 0,
        }
    }

    /// Add one engine event. Returns batches that must go out now.
    pub fn push(&mut self, turn_index: u32, side: SideId, event: &EngineEvent, now_ms: u64) -> Vec<TurnEffects> {
        let mut out = Vec::new();

        let urgent = match &event.data {
            EngineEventData::TerrainCarved { radius, .. } => *radius >= self.config.immediate_carve_radius,
            EngineEventData::UnitHealthChanged(change) => {
                change.is_lethal() || change.delta.abs() >= self.config.immediate_damage
            }
            _ => return out,
        };

        let belongs = self
            .pending
            .as_ref()
            .is_some_and(|p| p.turn_index == turn_index && p.side_id == side);
        if !belongs {
            out.extend(self.flush());
            self.pending = Some(TurnEffects::new(turn_index, side));
            self.opened_ms = now_ms;
        }

        if let Some(batch) = self.pending.as_mut() {
            match &event.data {
                EngineEventData::TerrainCarved { position, radius } => {
                    batch.terrain_operations.push(TerrainOperation { position: *position, radius: *radius });
                }
                EngineEventData::UnitHealthChanged(change) => batch.unit_health.push(*change),
                _ => {}
            }
        }

        let full = self.pending.as_ref().is_some_and(|p| p.len() >= self.config.max_items);
        if urgent || full {
            out.extend(self.flush());
        }
        out
    }

    /// Timer-driven flush.
    pub fn poll(&mut self, now_ms: u64) -> Option<TurnEffects> {
        if self.pending.is_some() && now_ms.saturating_sub(self.opened_ms) >= self.config.flush_interval_ms {
            return self.flush();
        }
        None
    }

    /// Send whatever is pending.
    pub fn flush(&mut self) -> Option<TurnEffects> {
        self.pending.take().filter(|p| !p.is_empty())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, TurnEffects::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::events::{HealthCause, HealthChange};
    use crate::game::state::UnitRef;

    fn carve(radius: f64) -> EngineEvent {
        EngineEvent::new(10, EngineEventData::TerrainCarved { position: Vec2::new(5.0, 5.0), radius })
    }

    fn hit(before: i32, after: i32) -> EngineEvent {
        EngineEvent::new(
            20,
            EngineEventData::UnitHealthChanged(HealthChange::new(
                UnitRef::new(SideId::B, 1),
                before,
                after,
                HealthCause::Explosion { projectile: 0 },
                true,
            )),
        )
    }

    #[test]
    fn test_small_effects_wait_for_timer() {
        let mut b = EffectsBatcher::new(EffectsConfig::default());
        assert!(b.push(1, SideId::A, &carve(10.0), 0).is_empty());
        assert!(b.push(1, SideId::A, &hit(100, 90), 100).is_empty());
        assert_eq!(b.pending_len(), 2);

        assert_eq!(b.poll(999), None);
        let batch = b.poll(1_000).unwrap();
        assert_eq!(batch.terrain_operations.len(), 1);
        assert_eq!(batch.unit_health.len(), 1);
        assert_eq!(b.pending_len(), 0);
    }

    #[test]
    fn test_big_carve_flushes_immediately() {
        let mut b = EffectsBatcher::new(EffectsConfig::default());
        b.push(1, SideId::A, &carve(10.0), 0);

        let out = b.push(1, SideId::A, &carve(28.0), 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].terrain_operations.len(), 2);
    }

    #[test]
    fn test_lethal_or_heavy_damage_flushes() {
        let mut b = EffectsBatcher::new(EffectsConfig::default());
        assert_eq!(b.push(1, SideId::A, &hit(20, 0), 0).len(), 1);
        assert_eq!(b.push(1, SideId::A, &hit(100, 60), 0).len(), 1);
        assert!(b.push(1, SideId::A, &hit(60, 50), 0).is_empty());
    }

    #[test]
    fn test_full_batch_flushes() {
        let config = EffectsConfig { max_items: 3, ..EffectsConfig::default() };
        let mut b = EffectsBatcher::new(config);
        assert!(b.push(1, SideId::A, &carve(1.0), 0).is_empty());
        assert!(b.push(1, SideId::A, &carve(1.0), 0).is_empty());
        assert_eq!(b.push(1, SideId::A, &carve(1.0), 0).len(), 1);
    }

    #[test]
    fn test_new_turn_closes_old_batch() {
        let mut b = EffectsBatcher::new(EffectsConfig::default());
        b.push(1, SideId::A, &carve(1.0), 0);
        let out = b.push(2, SideId::B, &carve(1.0), 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].turn_index, 1);
        assert_eq!(b.pending_len(), 1);
    }

    #[test]
    fn test_other_events_are_ignored() {
        let mut b = EffectsBatcher::new(EffectsConfig::default());
        let spawn = EngineEvent::new(0, EngineEventData::ProjectileExpired {
            projectile: 0,
            reason: crate::game::events::ExpireReason::Water,
            position: Vec2::ZERO,
        });
        assert!(b.push(1, SideId::A, &spawn, 0).is_empty());
        assert_eq!(b.flush(), None);
    }
}
