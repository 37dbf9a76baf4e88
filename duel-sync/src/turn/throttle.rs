//! Continuous-Input Throttles
//!
//! Aim and movement arrive every tick while a player holds a key or drags
//! the crosshair. Both throttles are pure per-call transforms: feed them a
//! sample and the current time, get back what (if anything) to transmit.
//!
//! Neither throttle affects the authoritative outcome; the resolution
//! carries the real state. They only shape what the spectating peer sees
//! in between.

use crate::config::{AimThrottleConfig, MoveThrottleConfig};
use crate::core::vec2::{angle_delta, Vec2};
use crate::game::state::SideId;
use crate::turn::command::Command;

/// Below this length the unit-to-target vector is treated as zero.
const MIN_AIM_LENGTH: f64 = 1e-6;

// =============================================================================
// AIM
// =============================================================================

/// One aim reading: the active unit, where it aims, and the resulting angle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AimSample {
    pub turn_index: u32,
    pub side: SideId,
    /// Unit position when the sample was taken
    pub origin: Vec2,
    pub target: Vec2,
    pub angle: f64,
}

impl AimSample {
    fn vector(&self) -> Vec2 {
        self.target - self.origin
    }
}

/// Why an aim sample was let through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AimTrigger {
    FirstOfTurn,
    TurnChanged,
    Magnitude,
    Angle,
    Heartbeat,
}

#[derive(Clone, Copy, Debug)]
struct AimBaseline {
    turn_index: u32,
    side: SideId,
    vector: Vec2,
    angle: f64,
    sent_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AimThrottle {
    config: AimThrottleConfig,
    last: Option<AimBaseline>,
    /// Latest sample held back since the last send
    suppressed: Option<AimSample>,
}

impl AimThrottle {
    pub fn new(config: AimThrottleConfig) -> Self {
        Self { config, last: None, suppressed: None }
    }

    /// Decide whether `sample` goes out. A suppressed sample leaves the
    /// baseline where it was, so slow drifts still accumulate into a send.
    pub fn offer(&mut self, sample: &AimSample, now_ms: u64) -> Option<AimTrigger> {
        let trigger = match &self.last {
            None => AimTrigger::FirstOfTurn,
            Some(last) if last.turn_index != sample.turn_index || last.side != sample.side => AimTrigger::TurnChanged,
            Some(last) => {
                let elapsed = now_ms.saturating_sub(last.sent_ms);
                let trigger = if elapsed < self.config.min_interval_ms {
                    None
                } else if angle_delta(last.angle, sample.angle).abs() >= self.config.angle_threshold {
                    Some(AimTrigger::Angle)
                } else if relative_change(last.vector, sample.vector()) >= self.config.relative_threshold {
                    Some(AimTrigger::Magnitude)
                } else if elapsed >= self.config.max_interval_ms {
                    Some(AimTrigger::Heartbeat)
                } else {
                    None
                };
                match trigger {
                    Some(trigger) => trigger,
                    None => {
                        self.suppressed = Some(*sample);
                        return None;
                    }
                }
            }
        };

        self.mark_sent(sample, now_ms);
        Some(trigger)
    }

    /// Timer side of the heartbeat: hand back the last held-back sample
    /// once `max_interval_ms` has passed since the previous send, so an aim
    /// that stops changing still reaches the peer.
    pub fn poll(&mut self, now_ms: u64) -> Option<AimSample> {
        let last = self.last.as_ref()?;
        if now_ms.saturating_sub(last.sent_ms) < self.config.max_interval_ms.max(self.config.min_interval_ms) {
            return None;
        }
        let sample = self.suppressed.take()?;
        self.mark_sent(&sample, now_ms);
        Some(sample)
    }

    pub fn has_suppressed(&self) -> bool {
        self.suppressed.is_some()
    }

    /// Forget the baseline; the next sample sends.
    pub fn reset(&mut self) {
        self.last = None;
        self.suppressed = None;
    }

    fn mark_sent(&mut self, sample: &AimSample, now_ms: u64) {
        self.suppressed = None;
        self.last = Some(AimBaseline {
            turn_index: sample.turn_index,
            side: sample.side,
            vector: sample.vector(),
            angle: sample.angle,
            sent_ms: now_ms,
        });
    }
}

/// `|current - base| / |base|`: catches sideways swings as well as
/// lengthening or shortening.
fn relative_change(base: Vec2, current: Vec2) -> f64 {
    let base_len = base.length();
    if base_len < MIN_AIM_LENGTH {
        return if current.length() < MIN_AIM_LENGTH { 0.0 } else { f64::INFINITY };
    }
    (current - base).length() / base_len
}

// =============================================================================
// MOVEMENT
// =============================================================================

/// One tick of walk input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveSample {
    pub turn_index: u32,
    pub side: SideId,
    pub direction: i8,
    pub jump: bool,
    pub elapsed_ms: u32,
}

impl MoveSample {
    fn is_idle(&self) -> bool {
        self.direction == 0 && !self.jump
    }
}

/// Coalesced movement ready to transmit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveBatch {
    pub turn_index: u32,
    pub side: SideId,
    pub direction: i8,
    pub jump: bool,
    pub elapsed_ms: u32,
}

impl MoveBatch {
    pub fn command(&self) -> Command {
        Command::Move {
            direction: self.direction,
            jump: self.jump,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

impl From<&MoveSample> for MoveBatch {
    fn from(s: &MoveSample) -> Self {
        Self {
            turn_index: s.turn_index,
            side: s.side,
            direction: s.direction,
            jump: s.jump,
            elapsed_ms: s.elapsed_ms,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MoveThrottle {
    config: MoveThrottleConfig,
    pending: Option<MoveBatch>,
    last_flush_ms: Option<u64>,
}

impl MoveThrottle {
    pub fn new(config: MoveThrottleConfig) -> Self {
        Self {
            config,
            pending: None,
            last_flush_ms: None,
        }
    }

    /// Feed one sample; returns the batches to send now, in order.
    ///
    /// Same-direction samples merge by summing `elapsed_ms`. A direction
    /// change or a jump flushes what was pending; jumps go out on their own.
    pub fn offer(&mut self, sample: &MoveSample, now_ms: u64) -> Vec<MoveBatch> {
        let mut out = Vec::new();

        let stale = self
            .pending
            .as_ref()
            .is_some_and(|p| p.turn_index != sample.turn_index || p.side != sample.side);
        if stale {
            self.flush_into(&mut out, now_ms);
            self.last_flush_ms = None;
        }

        if sample.is_idle() && self.config.suppress_idle {
            self.flush_into(&mut out, now_ms);
            return out;
        }

        if sample.jump {
            self.flush_into(&mut out, now_ms);
            self.pending = Some(MoveBatch::from(sample));
            self.flush_into(&mut out, now_ms);
            return out;
        }

        match self.pending.as_mut() {
            Some(p) if p.direction == sample.direction => {
                p.elapsed_ms = p.elapsed_ms.saturating_add(sample.elapsed_ms);
            }
            _ => {
                self.flush_into(&mut out, now_ms);
                self.pending = Some(MoveBatch::from(sample));
            }
        }

        if self.interval_elapsed(now_ms) {
            self.flush_into(&mut out, now_ms);
        }
        out
    }

    /// Time-based flush for when samples stop arriving.
    pub fn poll(&mut self, now_ms: u64) -> Option<MoveBatch> {
        if self.pending.is_some() && self.interval_elapsed(now_ms) {
            return self.flush(now_ms);
        }
        None
    }

    /// Force out pending movement (turn boundaries, before discrete commands).
    pub fn flush(&mut self, now_ms: u64) -> Option<MoveBatch> {
        let batch = self.pending.take()?;
        self.last_flush_ms = Some(now_ms);
        Some(batch)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop pending movement and timing.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_flush_ms = None;
    }

    fn interval_elapsed(&self, now_ms: u64) -> bool {
        match self.last_flush_ms {
            None => true,
            Some(t) => now_ms.saturating_sub(t) >= self.config.min_interval_ms,
        }
    }

    fn flush_into(&mut self, out: &mut Vec<MoveBatch>, now_ms: u64) {
        out.extend(self.flush(now_ms));
    }
}

// =============================================================================
// TESTS
// =============================================================================
