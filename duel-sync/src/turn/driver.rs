//! Turn Drivers
//!
//! A driver decides, tick by tick, how its side's turn is played. Each side
//! of a session has one, selected per match and swappable at runtime:
//!
//! - `Local`: forwards captured player input into `Session::record_command`
//! - `Remote`: feeds the peer's commands and resolution into the session
//! - `Ai`: plans a shot and records it like a player would
//!
//! Drivers never touch the world directly. Everything goes through the
//! session's command and resolution APIs.

use std::fmt;

use tracing::debug;

use crate::core::vec2::Vec2;
use crate::game::state::SideId;
use crate::game::weapon::Weapon;
use crate::turn::ai::AiDriver;
use crate::turn::command::Command;
use crate::turn::log::TurnStart;
use crate::turn::remote::RemoteDriver;
use crate::turn::session::{Session, SessionError};

// =============================================================================
// DRIVER ENUM
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    Local,
    Remote,
    Ai,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Local => f.write_str("local"),
            DriverKind::Remote => f.write_str("remote"),
            DriverKind::Ai => f.write_str("ai"),
        }
    }
}

#[derive(Debug)]
pub enum TurnDriver {
    Local(LocalDriver),
    Remote(RemoteDriver),
    Ai(AiDriver),
}

impl TurnDriver {
    pub fn kind(&self) -> DriverKind {
        match self {
            TurnDriver::Local(_) => DriverKind::Local,
            TurnDriver::Remote(_) => DriverKind::Remote,
            TurnDriver::Ai(_) => DriverKind::Ai,
        }
    }

    pub fn side(&self) -> SideId {
        match self {
            TurnDriver::Local(d) => d.side(),
            TurnDriver::Remote(d) => d.side(),
            TurnDriver::Ai(d) => d.side(),
        }
    }

    /// A turn started (for either side).
    pub fn begin_turn(&mut self, start: &TurnStart) {
        match self {
            TurnDriver::Local(d) => d.begin_turn(start),
            TurnDriver::Remote(d) => d.begin_turn(start),
            TurnDriver::Ai(d) => d.begin_turn(start),
        }
    }

    /// The turn with this index closed.
    pub fn end_turn(&mut self, turn_index: u32) {
        match self {
            TurnDriver::Local(d) => d.end_turn(),
            TurnDriver::Remote(d) => d.end_turn(turn_index),
            TurnDriver::Ai(d) => d.end_turn(),
        }
    }

    /// Drive the active turn. Only called for the active side's driver.
    pub fn tick(&mut self, session: &mut Session, dt_ms: f64, input: &LocalInput, allow_input: bool) -> Result<(), SessionError> {
        match self {
            TurnDriver::Local(d) => {
                d.tick(session, dt_ms, input, allow_input);
                Ok(())
            }
            TurnDriver::Remote(d) => d.pump(session),
            TurnDriver::Ai(d) => {
                d.tick(session);
                Ok(())
            }
        }
    }
}

// =============================================================================
// LOCAL DRIVER
// =============================================================================

/// Player input captured for one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalInput {
    /// -1, 0 or 1
    pub direction: i8,
    pub jump: bool,
    /// World-space crosshair, if the pointer is over the world
    pub aim_target: Option<Vec2>,
    /// Fire button held; press starts a charge, release fires
    pub fire_held: bool,
    pub cancel_charge: bool,
    pub select_weapon: Option<Weapon>,
}

#[derive(Debug)]
pub struct LocalDriver {
    side: SideId,
    active: bool,
    /// Sub-millisecond walk time carried between ticks
    move_carry_ms: f64,
    fire_was_held: bool,
    last_aim_target: Option<Vec2>,
}

impl LocalDriver {
    pub fn new(side: SideId) -> Self {
        Self {
            side,
            active: false,
            move_carry_ms: 0.0,
            fire_was_held: false,
            last_aim_target: None,
        }
    }

    pub fn side(&self) -> SideId {
        self.side
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn begin_turn(&mut self, start: &TurnStart) {
        self.active = start.side == self.side;
        self.move_carry_ms = 0.0;
        self.fire_was_held = false;
        self.last_aim_target = None;
    }

    fn end_turn(&mut self) {
        self.active = false;
        self.move_carry_ms = 0.0;
    }

    fn tick(&mut self, session: &mut Session, dt_ms: f64, input: &LocalInput, allow_input: bool) {
        if !self.active || !allow_input {
            self.move_carry_ms = 0.0;
            return;
        }
        let side = self.side;

        if let Some(weapon) = input.select_weapon {
            session.record_command(side, Command::SetWeapon { weapon });
        }

        if let Some(target) = input.aim_target {
            if self.last_aim_target != Some(target) {
                if let Some(origin) = session.active_unit_position() {
                    let angle = (target - origin).angle();
                    session.record_command(side, Command::Aim { angle, target });
                }
                self.last_aim_target = Some(target);
            }
        }

        if input.direction != 0 || input.jump {
            self.move_carry_ms += dt_ms;
            let whole = self.move_carry_ms.floor();
            self.move_carry_ms -= whole;
            let elapsed_ms = whole as u32;
            if elapsed_ms > 0 || input.jump {
                session.record_command(side, Command::Move {
                    direction: input.direction.signum(),
                    jump: input.jump,
                    elapsed_ms,
                });
            }
        } else {
            self.move_carry_ms = 0.0;
        }

        if input.cancel_charge && session.is_charging() {
            session.record_command(side, Command::CancelCharge);
        }

        if input.fire_held && !self.fire_was_held && !input.cancel_charge {
            session.record_command(side, Command::StartCharge);
        }

        if session.is_charging() {
            let max_charge = session.config().max_charge_ms.max(1);
            let held = session.charge_elapsed_ms();
            let released = self.fire_was_held && !input.fire_held;
            if released || held >= max_charge {
                let power = (held as f64 / max_charge as f64).min(1.0);
                let fire = Command::fire(session.current_weapon(), power, session.aim_angle());
                debug!(side = %side, power, "releasing charge");
                session.record_command(side, fire);
            }
        }

        self.fire_was_held = input.fire_held;
    }
}

// =============================================================================
// TESTS
// =============================================================================
