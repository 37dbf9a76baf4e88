//! Match Session
//!
//! Orchestrates a match on one peer. The session owns the world, the phase
//! and turn pointers, the current turn log and both sides' drivers. Local
//! and AI drivers record commands through [`Session::record_command`]; the
//! remote driver feeds the peer's traffic through
//! [`Session::apply_remote_turn_command`] and
//! [`Session::apply_turn_resolution`].
//!
//! ## Turn Flow
//!
//! ```text
//! begin_turn ─▶ Aim ──fire──▶ Projectile ──resolved──▶ Post ──delay──▶ finalize_turn
//!                │                                      ▲                    │
//!                └─────timeout / active unit lost───────┘                    ▼
//!                                                             resolution ─▶ outbox
//! ```
//!
//! Physics only advances while the active side is played on this peer.
//! While a remote side is active the session waits for its resolution.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::clock::Clock;
use crate::core::hash::{short_hex, StateHash};
use crate::core::rng::RandomSource;
use crate::core::vec2::{normalize_angle, Vec2};
use crate::game::events::{EngineEvent, EngineEventData, ExpireReason};
use crate::game::state::{Facing, MatchPhase, Side, SideId, WorldState};
use crate::game::tick;
use crate::game::weapon::Weapon;
use crate::turn::command::{Command, TurnCommand};
use crate::turn::driver::{DriverKind, LocalInput, TurnDriver};
use crate::turn::log::{TurnLog, TurnStart};
use crate::turn::remote::RemoteMessage;
use crate::turn::resolution::{MatchSnapshot, TurnResolution};
use crate::turn::validate::{validate_resolution, ResolutionError};

// =============================================================================
// ERRORS & OUTPUT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("turn is not complete yet")]
    TurnNotComplete,

    #[error("no turn is in progress")]
    NoActiveTurn,

    #[error("resolution rejected: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("session is desynchronized and needs a fresh match_init")]
    Desynchronized,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("peer sent a resolution for side {0}, which this peer plays")]
    ResolutionForLocalSide(SideId),
}

/// What the session produced for the network, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutput {
    /// An as-applied command from a locally played side
    Command {
        turn_index: u32,
        side: SideId,
        /// Active unit position after the command
        unit_position: Vec2,
        command: Command,
    },

    /// Engine events stamped with turn time
    Events {
        turn_index: u32,
        side: SideId,
        events: Vec<EngineEvent>,
    },

    Resolution(Box<TurnResolution>),
}

// =============================================================================
// ACTIVE TURN
// =============================================================================

/// Per-turn state that is not part of the world snapshot.
#[derive(Clone, Debug)]
struct ActiveTurn {
    log: TurnLog,
    /// Side rosters at turn start; the validation baseline
    baseline: [Side; 2],
    aim_angle: f64,
    aim_target: Option<Vec2>,
    weapon: Weapon,
    /// Turn time the charge started at
    charge_started_ms: Option<u32>,
    /// Simulation time the current phase was entered
    phase_entered_ms: u64,
    /// Wall time the turn started (diagnostics only)
    wall_started_ms: u64,
    complete: bool,
}

impl ActiveTurn {
    fn new(start: TurnStart, world: &WorldState, wall_ms: u64) -> Self {
        let facing = world.unit(start.unit_ref()).map(|u| u.facing).unwrap_or_default();
        let aim_angle = match facing {
            Facing::Right => -std::f64::consts::FRAC_PI_4,
            Facing::Left => -3.0 * std::f64::consts::FRAC_PI_4,
        };
        Self {
            log: TurnLog::new(start),
            baseline: world.sides.clone(),
            aim_angle,
            aim_target: None,
            weapon: Weapon::default(),
            charge_started_ms: None,
            phase_entered_ms: world.time_ms,
            wall_started_ms: wall_ms,
            complete: false,
        }
    }
}

/// Driver notifications raised while that driver was lent out.
#[derive(Clone, Copy, Debug)]
enum DriverNotice {
    Began(TurnStart),
    Ended(u32),
}

impl DriverNotice {
    fn deliver(self, driver: &mut TurnDriver) {
        match self {
            DriverNotice::Began(start) => driver.begin_turn(&start),
            DriverNotice::Ended(turn_index) => driver.end_turn(turn_index),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    config: SessionConfig,
    match_id: Uuid,
    world: WorldState,
    /// Completed turns
    turn_index: u32,
    turn: Option<ActiveTurn>,
    /// `None` only while a driver is lent out by `with_driver`
    drivers: [Option<TurnDriver>; 2],
    driver_kinds: [DriverKind; 2],
    deferred: [Vec<DriverNotice>; 2],
    rng: Box<dyn RandomSource>,
    clock: Box<dyn Clock>,
    outbox: Vec<SessionOutput>,
    step_accumulator_ms: f64,
    desynced: bool,
    resolved_hashes: BTreeMap<u32, StateHash>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("match_id", &self.match_id)
            .field("turn_index", &self.turn_index)
            .field("phase", &self.world.phase)
            .field("active_side", &self.world.active_side)
            .field("drivers", &self.driver_kinds)
            .field("desynced", &self.desynced)
            .finish()
    }
}

impl Session {
    /// Start a fresh match on a generated world.
    pub fn new_match(
        config: SessionConfig,
        match_id: Uuid,
        mut rng: Box<dyn RandomSource>,
        clock: Box<dyn Clock>,
        drivers: [TurnDriver; 2],
    ) -> Self {
        let world = WorldState::generate(&config.world, config.max_wind, rng.as_mut());
        let mut session = Self::assemble(config, match_id, world, 0, rng, clock, drivers);
        info!(match_id = %match_id, hash = %short_hex(&session.state_hash()), "match created");
        session.begin_turn();
        session
    }

    /// Join or resume a match from a snapshot (the guest's `match_init`).
    pub fn from_snapshot(
        config: SessionConfig,
        snapshot: MatchSnapshot,
        rng: Box<dyn RandomSource>,
        clock: Box<dyn Clock>,
        drivers: [TurnDriver; 2],
    ) -> Result<Self, SessionError> {
        check_snapshot(&config, &snapshot)?;
        let MatchSnapshot { match_id, turn_index, world } = snapshot;
        let mut session = Self::assemble(config, match_id, world, turn_index, rng, clock, drivers);
        info!(match_id = %match_id, turn_index, hash = %short_hex(&session.state_hash()), "match loaded from snapshot");
        session.begin_turn();
        Ok(session)
    }

    fn assemble(
        config: SessionConfig,
        match_id: Uuid,
        world: WorldState,
        turn_index: u32,
        rng: Box<dyn RandomSource>,
        clock: Box<dyn Clock>,
        drivers: [TurnDriver; 2],
    ) -> Self {
        let mut slots: [Option<TurnDriver>; 2] = [None, None];
        let mut kinds = [DriverKind::Local; 2];
        for driver in drivers {
            let i = driver.side().index();
            kinds[i] = driver.kind();
            slots[i] = Some(driver);
        }
        Self {
            config,
            match_id,
            world,
            turn_index,
            turn: None,
            drivers: slots,
            driver_kinds: kinds,
            deferred: [Vec::new(), Vec::new()],
            rng,
            clock,
            outbox: Vec::new(),
            step_accumulator_ms: 0.0,
            desynced: false,
            resolved_hashes: BTreeMap::new(),
        }
    }

    /// Throw the current match away and continue from `snapshot`.
    pub fn restart_from(&mut self, snapshot: MatchSnapshot) -> Result<(), SessionError> {
        check_snapshot(&self.config, &snapshot)?;
        if let Some(turn) = self.turn.take() {
            self.notify_all(DriverNotice::Ended(turn.log.start().turn_index));
        }
        self.match_id = snapshot.match_id;
        self.turn_index = snapshot.turn_index;
        self.world = snapshot.world;
        self.outbox.clear();
        self.resolved_hashes.clear();
        self.desynced = false;
        info!(match_id = %self.match_id, turn_index = self.turn_index, "match restarted");
        self.begin_turn();
        Ok(())
    }

    /// Swap the driver of the driver's side.
    pub fn set_driver(&mut self, mut driver: TurnDriver) {
        let side = driver.side();
        if let Some(start) = self.current_turn() {
            driver.begin_turn(start);
        }
        info!(side = %side, driver = %driver.kind(), "driver set");
        self.driver_kinds[side.index()] = driver.kind();
        self.drivers[side.index()] = Some(driver);
        self.deferred[side.index()].clear();
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance one frame: let the active driver act, then step physics
    /// unless waiting for the remote peer. A completed turn is finalized.
    pub fn tick(&mut self, dt_ms: f64, input: &LocalInput, allow_input: bool) -> Result<(), SessionError> {
        self.ensure_synchronized()?;
        let dt_ms = if dt_ms.is_finite() { dt_ms.max(0.0) } else { 0.0 };
        let Some(side) = self.current_turn().map(|s| s.side) else {
            return Ok(());
        };

        if let Some(result) = self.with_driver(side, |driver, session| driver.tick(session, dt_ms, input, allow_input)) {
            result?;
        }

        if self.turn.is_none() || self.is_waiting_for_remote_resolution() {
            self.step_accumulator_ms = 0.0;
            return Ok(());
        }

        self.advance_physics(dt_ms);
        if self.is_turn_complete() {
            self.finalize_turn()?;
        }
        Ok(())
    }

    fn advance_physics(&mut self, dt_ms: f64) {
        let step_ms = self.config.physics.step_ms.max(1) as f64;
        self.step_accumulator_ms += dt_ms;

        let mut steps = 0;
        let mut produced = Vec::new();
        while self.step_accumulator_ms >= step_ms {
            if steps == self.config.max_steps_per_tick {
                debug!(backlog_ms = self.step_accumulator_ms, "dropping physics backlog");
                self.step_accumulator_ms = 0.0;
                break;
            }
            self.step_accumulator_ms -= step_ms;
            steps += 1;

            let mut events = Vec::new();
            tick::step(&mut self.world, &self.config.physics, &mut events);
            events.extend(self.update_phase());

            #[cfg(feature = "debug-tracing")]
            tracing::trace!(
                time_ms = self.world.time_ms,
                phase = ?self.world.phase,
                hash = %short_hex(&self.state_hash()),
                "physics step"
            );

            if !events.is_empty() {
                let at_ms = self.turn_elapsed_ms();
                produced.extend(events.iter().cloned().map(|data| EngineEvent::new(at_ms, data)));
                if let Some(turn) = self.turn.as_mut() {
                    turn.log.push_events(at_ms, events);
                }
            }

            if self.is_turn_complete() {
                self.step_accumulator_ms = 0.0;
                break;
            }
        }

        self.emit_events(produced);
    }

    /// Phase transitions after a physics step. Returns events the
    /// transitions themselves produced.
    fn update_phase(&mut self) -> Vec<EngineEventData> {
        let mut events = Vec::new();
        let Some(turn) = self.turn.as_mut() else {
            return events;
        };
        let config = &self.config;
        let now = self.world.time_ms;
        let in_phase = now.saturating_sub(turn.phase_entered_ms);

        let enter_post = match self.world.phase {
            MatchPhase::Aim => {
                let active = self.world.active_unit_ref();
                let alive = self.world.unit(active).is_some_and(|u| u.alive);
                let timed_out = now.saturating_sub(turn.log.start().start_ms) >= config.turn_duration_ms;
                if !alive {
                    info!(unit = %active, "active unit lost during aim");
                } else if timed_out {
                    info!(unit = %active, "turn timed out");
                }
                !alive || timed_out
            }
            MatchPhase::Projectile => {
                if self.world.projectiles.is_empty() {
                    true
                } else if in_phase >= config.max_projectile_phase_ms {
                    warn!(remaining = self.world.projectiles.len(), "projectile phase cap reached");
                    for p in self.world.projectiles.drain(..) {
                        events.push(EngineEventData::ProjectileExpired {
                            projectile: p.id,
                            reason: ExpireReason::Lifetime,
                            position: p.position,
                        });
                    }
                    true
                } else {
                    false
                }
            }
            MatchPhase::Post => {
                let settled = self.world.is_settled();
                let delay = config.post_shot_delay_ms;
                if (settled && in_phase >= delay) || in_phase >= delay + config.max_projectile_phase_ms {
                    turn.complete = true;
                }
                false
            }
            MatchPhase::GameOver => {
                turn.complete = true;
                false
            }
        };

        if enter_post {
            turn.charge_started_ms = None;
            turn.phase_entered_ms = now;
            self.world.phase = MatchPhase::Post;
        }
        events
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Apply a command for a locally played side and log it as applied.
    /// Returns `None` when a precondition fails; the command is dropped.
    pub fn record_command(&mut self, side: SideId, command: Command) -> Option<TurnCommand> {
        if self.desynced {
            return None;
        }
        if self.driver_kinds[side.index()] == DriverKind::Remote {
            debug!(side = %side, kind = command.kind(), "dropping command for a remote-driven side");
            return None;
        }

        let at_ms = self.turn_elapsed_ms();
        let mut events = Vec::new();
        let kind = command.kind();
        let Some(applied) = self.apply_command(side, command, at_ms, &mut events) else {
            debug!(side = %side, kind, at_ms, "command dropped");
            return None;
        };

        let unit_position = self.active_unit_position().unwrap_or(Vec2::ZERO);
        let turn = self.turn.as_mut()?;
        let turn_index = turn.log.start().turn_index;
        let record = TurnCommand::new(at_ms, applied);
        turn.log.push_command(record.clone());
        let stamped: Vec<EngineEvent> = events.iter().cloned().map(|data| EngineEvent::new(at_ms, data)).collect();
        turn.log.push_events(at_ms, events);

        self.outbox.push(SessionOutput::Command {
            turn_index,
            side,
            unit_position,
            command: record.command.clone(),
        });
        self.emit_events(stamped);
        Some(record)
    }

    /// Apply a live command of the remote side for spectating. It is not
    /// logged; the resolution is authoritative.
    pub fn apply_remote_turn_command(&mut self, side: SideId, turn_index: u32, command: Command) -> bool {
        if self.desynced || self.driver_kinds[side.index()] != DriverKind::Remote {
            return false;
        }
        let Some(start) = self.current_turn() else {
            return false;
        };
        if start.turn_index != turn_index || start.side != side {
            debug!(side = %side, turn_index, "remote command does not match the current turn");
            return false;
        }
        let at_ms = self.turn_elapsed_ms();
        let mut spectated = Vec::new();
        self.apply_command(side, command, at_ms, &mut spectated).is_some()
    }

    /// Shared command semantics. Returns the command as applied.
    fn apply_command(&mut self, side: SideId, command: Command, at_ms: u32, events: &mut Vec<EngineEventData>) -> Option<Command> {
        let turn = self.turn.as_mut()?;
        if self.world.phase != MatchPhase::Aim || side != self.world.active_side {
            return None;
        }
        let shooter = self.world.active_unit_ref();
        if !self.world.unit(shooter).is_some_and(|u| u.alive) {
            return None;
        }
        let charging = turn.charge_started_ms.is_some();

        match command {
            Command::SetWeapon { weapon } => {
                if charging {
                    return None;
                }
                turn.weapon = weapon;
                Some(Command::SetWeapon { weapon })
            }

            Command::Aim { angle, target } => {
                if !angle.is_finite() || !target.is_finite() {
                    return None;
                }
                let angle = normalize_angle(angle);
                turn.aim_angle = angle;
                turn.aim_target = Some(target);
                if let Some(unit) = self.world.unit_mut(shooter) {
                    unit.facing = Facing::from_angle(angle);
                }
                Some(Command::Aim { angle, target })
            }

            Command::Move { direction, jump, elapsed_ms } => {
                let direction = direction.signum();
                // Walking never outlasts the turn clock
                let left = self.config.turn_duration_ms.saturating_sub(u64::from(at_ms));
                let elapsed_ms = elapsed_ms.min(u32::try_from(left).unwrap_or(u32::MAX));
                if charging || left == 0 || (!jump && (direction == 0 || elapsed_ms == 0)) {
                    return None;
                }
                tick::walk_unit(&mut self.world, shooter, direction, jump, elapsed_ms, &self.config.physics);
                Some(Command::Move { direction, jump, elapsed_ms })
            }

            Command::StartCharge => {
                if charging {
                    return None;
                }
                turn.charge_started_ms = Some(at_ms);
                Some(Command::StartCharge)
            }

            Command::CancelCharge => {
                if !charging {
                    return None;
                }
                turn.charge_started_ms = None;
                Some(Command::CancelCharge)
            }

            Command::FireChargedWeapon { weapon, power, angle, .. } => {
                if !power.is_finite() || !angle.is_finite() {
                    return None;
                }
                let power = power.clamp(0.0, 1.0);
                let angle = normalize_angle(angle);
                let projectiles = tick::fire(&mut self.world, shooter, weapon, power, angle, events);

                turn.weapon = weapon;
                turn.aim_angle = angle;
                turn.charge_started_ms = None;
                turn.phase_entered_ms = self.world.time_ms;
                self.world.phase = MatchPhase::Projectile;
                info!(side = %side, unit = %shooter, weapon = %weapon, power, angle, ?projectiles, "fired");
                Some(Command::FireChargedWeapon { weapon, power, angle, projectiles })
            }
        }
    }

    // =========================================================================
    // TURN BOUNDARIES
    // =========================================================================

    fn begin_turn(&mut self) {
        self.step_accumulator_ms = 0.0;
        if self.world.phase == MatchPhase::GameOver {
            self.turn = None;
            match self.world.winner {
                Some(winner) => info!(winner = %winner, turn_index = self.turn_index, "match over"),
                None => info!(turn_index = self.turn_index, "match over in a draw"),
            }
            return;
        }

        let start = TurnStart {
            turn_index: self.turn_index + 1,
            side: self.world.active_side,
            unit: self.world.active_unit,
            wind: self.world.wind,
            start_ms: self.world.time_ms,
        };
        self.turn = Some(ActiveTurn::new(start, &self.world, self.clock.now_ms()));
        info!(
            turn = start.turn_index,
            side = %start.side,
            unit = start.unit,
            wind = start.wind,
            driver = %self.driver_kinds[start.side.index()],
            "turn started"
        );
        self.notify_all(DriverNotice::Began(start));
    }

    /// Close the completed turn: advance pointers and wind, fold the log
    /// and snapshot into a resolution, queue it for the network and start
    /// the next turn.
    pub fn finalize_turn(&mut self) -> Result<TurnResolution, SessionError> {
        self.ensure_synchronized()?;
        match &self.turn {
            None => return Err(SessionError::NoActiveTurn),
            Some(turn) if !turn.complete => return Err(SessionError::TurnNotComplete),
            Some(_) => {}
        }
        let Some(turn) = self.turn.take() else {
            return Err(SessionError::NoActiveTurn);
        };
        let start = *turn.log.start();

        self.world.advance_turn(self.config.max_wind, self.rng.as_mut());
        self.turn_index = start.turn_index;

        let resolution = TurnResolution::build(turn.log, self.snapshot());
        self.resolved_hashes.insert(resolution.turn_index, resolution.state_hash);
        info!(
            turn = resolution.turn_index,
            side = %start.side,
            commands = resolution.commands.len(),
            events = resolution.events.len(),
            wall_ms = self.clock.now_ms().saturating_sub(turn.wall_started_ms),
            hash = %short_hex(&resolution.state_hash),
            "turn resolved"
        );

        self.outbox.push(SessionOutput::Resolution(Box::new(resolution.clone())));
        self.notify_all(DriverNotice::Ended(start.turn_index));
        self.begin_turn();
        Ok(resolution)
    }

    /// Validate the peer's resolution against local expectation and, only
    /// if every check passes, adopt its snapshot. Failure is fatal.
    pub fn apply_turn_resolution(&mut self, resolution: &TurnResolution) -> Result<(), SessionError> {
        self.ensure_synchronized()?;
        let turn = self.turn.as_ref().ok_or(SessionError::NoActiveTurn)?;

        let checked = if resolution.snapshot.match_id != self.match_id {
            Err(ResolutionError::ShapeMismatch(format!(
                "match id {} differs from {}",
                resolution.snapshot.match_id, self.match_id
            )))
        } else {
            validate_resolution(resolution, turn.log.start(), &turn.baseline, &self.world.config)
        };
        if let Err(e) = checked {
            error!(turn = resolution.turn_index, error = %e, "rejecting turn resolution");
            self.desynced = true;
            return Err(e.into());
        }

        let ended = resolution.turn_index;
        self.turn = None;
        self.world = resolution.snapshot.world.clone();
        self.turn_index = ended;
        self.resolved_hashes.insert(ended, resolution.state_hash);
        info!(turn = ended, hash = %short_hex(&resolution.state_hash), "applied turn resolution");

        self.notify_all(DriverNotice::Ended(ended));
        self.begin_turn();
        Ok(())
    }

    /// Route inbound peer traffic to the remote driver of its side.
    pub fn deliver_remote(&mut self, message: RemoteMessage) -> Result<(), SessionError> {
        self.ensure_synchronized()?;
        let side = message.side();
        let local_turn = self.turn_index + 1;
        let routed = self.with_driver(side, |driver, session| match driver {
            TurnDriver::Remote(remote) => {
                remote.receive(message, local_turn);
                remote.pump(session)
            }
            other => match message {
                RemoteMessage::Resolution(_) => {
                    error!(side = %side, driver = %other.kind(), "resolution for a side played on this peer");
                    Err(SessionError::ResolutionForLocalSide(side))
                }
                RemoteMessage::Command { .. } => {
                    warn!(side = %side, driver = %other.kind(), "remote command for a side played on this peer");
                    Ok(())
                }
            },
        });
        routed.unwrap_or(Ok(()))
    }

    // =========================================================================
    // DRIVER PLUMBING
    // =========================================================================

    /// Lend a side's driver out together with the session. Notices raised
    /// meanwhile are delivered when it comes back.
    fn with_driver<R>(&mut self, side: SideId, f: impl FnOnce(&mut TurnDriver, &mut Session) -> R) -> Option<R> {
        let i = side.index();
        let mut driver = self.drivers[i].take()?;
        let result = f(&mut driver, self);
        for notice in std::mem::take(&mut self.deferred[i]) {
            notice.deliver(&mut driver);
        }
        if self.drivers[i].is_none() {
            self.drivers[i] = Some(driver);
        }
        Some(result)
    }

    fn notify_all(&mut self, notice: DriverNotice) {
        for side in SideId::ALL {
            let i = side.index();
            match self.drivers[i].as_mut() {
                Some(driver) => notice.deliver(driver),
                None => self.deferred[i].push(notice),
            }
        }
    }

    fn emit_events(&mut self, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(start) = self.current_turn() {
            let (turn_index, side) = (start.turn_index, start.side);
            self.outbox.push(SessionOutput::Events { turn_index, side, events });
        }
    }

    fn ensure_synchronized(&self) -> Result<(), SessionError> {
        if self.desynced {
            Err(SessionError::Desynchronized)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Take everything produced since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<SessionOutput> {
        std::mem::take(&mut self.outbox)
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            match_id: self.match_id,
            turn_index: self.turn_index,
            world: self.world.clone(),
        }
    }

    pub fn state_hash(&self) -> StateHash {
        self.world.compute_hash(self.turn_index)
    }

    /// True while a remote-driven side is active; physics is withheld.
    pub fn is_waiting_for_remote_resolution(&self) -> bool {
        self.current_turn()
            .is_some_and(|s| self.driver_kinds[s.side.index()] == DriverKind::Remote)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn.as_ref().is_some_and(|t| t.complete)
    }

    pub fn is_game_over(&self) -> bool {
        self.world.phase == MatchPhase::GameOver
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desynced
    }

    pub fn winner(&self) -> Option<SideId> {
        self.world.winner
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn phase(&self) -> MatchPhase {
        self.world.phase
    }

    /// Number of completed turns.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }

    pub fn current_turn(&self) -> Option<&TurnStart> {
        self.turn.as_ref().map(|t| t.log.start())
    }

    /// Commands logged so far in the current turn.
    pub fn current_commands(&self) -> &[TurnCommand] {
        self.turn.as_ref().map_or(&[], |t| t.log.commands())
    }

    /// Wall-clock milliseconds from the session clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Simulation time since the current turn started.
    pub fn turn_elapsed_ms(&self) -> u32 {
        self.current_turn()
            .map(|s| u32::try_from(self.world.time_ms.saturating_sub(s.start_ms)).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    pub fn active_unit_position(&self) -> Option<Vec2> {
        self.world.unit(self.world.active_unit_ref()).map(|u| u.position)
    }

    pub fn is_charging(&self) -> bool {
        self.turn.as_ref().is_some_and(|t| t.charge_started_ms.is_some())
    }

    pub fn charge_elapsed_ms(&self) -> u64 {
        self.turn
            .as_ref()
            .and_then(|t| t.charge_started_ms)
            .map_or(0, |started| self.turn_elapsed_ms().saturating_sub(started) as u64)
    }

    pub fn current_weapon(&self) -> Weapon {
        self.turn.as_ref().map(|t| t.weapon).unwrap_or_default()
    }

    pub fn aim_angle(&self) -> f64 {
        self.turn.as_ref().map_or(0.0, |t| t.aim_angle)
    }

    pub fn aim_target(&self) -> Option<Vec2> {
        self.turn.as_ref().and_then(|t| t.aim_target)
    }

    pub fn driver_kind(&self, side: SideId) -> DriverKind {
        self.driver_kinds[side.index()]
    }

    pub fn driver(&self, side: SideId) -> Option<&TurnDriver> {
        self.drivers[side.index()].as_ref()
    }

    /// State hash recorded when a turn was resolved or applied.
    pub fn resolved_hash(&self, turn_index: u32) -> Option<StateHash> {
        self.resolved_hashes.get(&turn_index).copied()
    }

    pub fn resolved_hashes(&self) -> &BTreeMap<u32, StateHash> {
        &self.resolved_hashes
    }
}

/// Reject snapshots this session cannot continue from.
fn check_snapshot(config: &SessionConfig, snapshot: &MatchSnapshot) -> Result<(), SessionError> {
    let world = &snapshot.world;
    let invalid = |msg: &str| Err(SessionError::InvalidSnapshot(msg.to_string()));

    if world.config != config.world {
        return invalid("world configuration differs from the session's");
    }
    if world.terrain.width() != world.config.width
        || world.terrain.height() != world.config.height
        || !world.terrain.is_well_formed()
    {
        return invalid("terrain mask does not match the world size");
    }
    if world.sides[0].id != SideId::A || world.sides[1].id != SideId::B {
        return invalid("sides are out of order");
    }
    if world.sides.iter().any(|s| s.units.is_empty()) {
        return invalid("a side has no units");
    }
    if !matches!(world.phase, MatchPhase::Aim | MatchPhase::GameOver) {
        return invalid("snapshot was not taken at a turn boundary");
    }
    if world.unit(world.active_unit_ref()).is_none() {
        return invalid("active unit does not exist");
    }
    if !world.wind.is_finite() || world.units().any(|(_, u)| !u.position.is_finite()) {
        return invalid("non-finite values");
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, WorldConfig};
    use crate::core::clock::ManualClock;
    use crate::core::rng::DeterministicRng;
    use crate::game::events::HealthCause;
    use crate::game::map::TerrainMask;
    use crate::game::state::UnitRef;
    use crate::turn::ai::AiDriver;
    use crate::turn::driver::LocalDriver;
    use crate::turn::remote::RemoteDriver;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::{FRAC_PI_2, PI};

    const TICK: f64 = 16.0;

    fn world_config() -> WorldConfig {
        WorldConfig { width: 300, height: 200, units_per_side: 2, ..WorldConfig::default() }
    }

    fn config() -> SessionConfig {
        SessionConfig { world: world_config(), ..SessionConfig::default() }
    }

    fn snapshot_with(surface: Vec<u32>, a: Vec<Vec2>, b: Vec<Vec2>) -> MatchSnapshot {
        let wc = world_config();
        let terrain = TerrainMask::from_heights(wc.width, wc.height, &surface);
        MatchSnapshot {
            match_id: Uuid::from_u128(0xD0E1),
            turn_index: 0,
            world: WorldState::new(wc, terrain, [a, b], 0.25),
        }
    }

    fn arena() -> MatchSnapshot {
        snapshot_with(
            vec![80; 300],
            vec![Vec2::new(60.5, 73.5), Vec2::new(100.5, 73.5)],
            vec![Vec2::new(200.5, 73.5), Vec2::new(240.5, 73.5)],
        )
    }

    fn session(snapshot: MatchSnapshot, drivers: [TurnDriver; 2]) -> Session {
        Session::from_snapshot(
            config(),
            snapshot,
            Box::new(DeterministicRng::new(7)),
            Box::new(ManualClock::new(0)),
            drivers,
        )
        .unwrap()
    }

    /// Host plays A locally, B is the remote guest.
    fn host(snapshot: MatchSnapshot) -> Session {
        session(snapshot, [TurnDriver::Local(LocalDriver::new(SideId::A)), TurnDriver::Remote(RemoteDriver::new(SideId::B))])
    }

    /// Guest plays B locally, A is the remote host.
    fn guest(snapshot: MatchSnapshot) -> Session {
        session(snapshot, [TurnDriver::Remote(RemoteDriver::new(SideId::A)), TurnDriver::Local(LocalDriver::new(SideId::B))])
    }

    fn run_until_resolved(session: &mut Session) -> TurnResolution {
        for _ in 0..5_000 {
            session.tick(TICK, &LocalInput::default(), false).unwrap();
            for out in session.drain_outbox() {
                if let SessionOutput::Resolution(resolution) = out {
                    return *resolution;
                }
            }
        }
        panic!("turn never resolved");
    }

    fn assert_converged(a: &Session, b: &Session) {
        assert_eq!(a.turn_index(), b.turn_index());
        assert_eq!(a.state_hash(), b.state_hash());
        let bytes_a = bincode::serialize(&a.snapshot()).unwrap();
        let bytes_b = bincode::serialize(&b.snapshot()).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn test_new_match_starts_first_turn() {
        let session = Session::new_match(
            config(),
            Uuid::nil(),
            Box::new(DeterministicRng::new(1)),
            Box::new(ManualClock::new(0)),
            [TurnDriver::Local(LocalDriver::new(SideId::A)), TurnDriver::Local(LocalDriver::new(SideId::B))],
        );

        let start = session.current_turn().unwrap();
        assert_eq!(start.turn_index, 1);
        assert_eq!(start.side, SideId::A);
        assert_eq!(session.turn_index(), 0);
        assert!(!session.is_waiting_for_remote_resolution());
    }

    #[test]
    fn test_finalize_before_complete_is_an_error() {
        let mut s = host(arena());
        assert_eq!(s.finalize_turn().unwrap_err(), SessionError::TurnNotComplete);
    }

    #[test]
    fn test_remote_side_waits() {
        let g = guest(arena());
        assert!(g.is_waiting_for_remote_resolution());
        assert_eq!(g.driver_kind(SideId::A), DriverKind::Remote);
    }

    #[test]
    fn test_preconditions_drop_commands() {
        let mut s = host(arena());

        // Wrong side
        assert!(s.record_command(SideId::B, Command::StartCharge).is_none());
        // Nothing to cancel
        assert!(s.record_command(SideId::A, Command::CancelCharge).is_none());
        // No-op move
        assert!(s.record_command(SideId::A, Command::walk(0, 50)).is_none());
        assert!(s.record_command(SideId::A, Command::walk(1, 0)).is_none());

        assert!(s.record_command(SideId::A, Command::StartCharge).is_some());
        assert!(s.record_command(SideId::A, Command::StartCharge).is_none());
        assert!(s.record_command(SideId::A, Command::walk(1, 16)).is_none());
        assert!(s.record_command(SideId::A, Command::SetWeapon { weapon: Weapon::Grenade }).is_none());
        assert!(s.record_command(SideId::A, Command::CancelCharge).is_some());
        assert!(s.record_command(SideId::A, Command::walk(1, 16)).is_some());

        let kinds: Vec<_> = s.current_commands().iter().map(|c| c.command.kind()).collect();
        assert_eq!(kinds, ["start_charge", "cancel_charge", "move"]);
    }

    #[test]
    fn test_commands_record_normalised_values() {
        let mut s = host(arena());

        let aim = s
            .record_command(SideId::A, Command::Aim { angle: 1.5 * PI, target: Vec2::new(60.0, 0.0) })
            .unwrap();
        match aim.command {
            Command::Aim { angle, .. } => assert!((angle + FRAC_PI_2).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }

        let fire = s.record_command(SideId::A, Command::fire(Weapon::Cluster, 1.7, -1.0)).unwrap();
        assert_eq!(fire.command, Command::FireChargedWeapon {
            weapon: Weapon::Cluster,
            power: 1.0,
            angle: -1.0,
            projectiles: vec![0, 1, 2],
        });
        assert_eq!(s.phase(), MatchPhase::Projectile);

        // Nothing is accepted once the shot is away
        assert!(s.record_command(SideId::A, Command::walk(1, 16)).is_none());
    }

    #[test]
    fn test_outbox_carries_commands_and_events() {
        let mut s = host(arena());
        s.record_command(SideId::A, Command::fire(Weapon::Bazooka, 0.5, -1.0));

        let out = s.drain_outbox();
        assert!(matches!(&out[0], SessionOutput::Command { turn_index: 1, side: SideId::A, command: Command::FireChargedWeapon { .. }, .. }));
        assert!(matches!(&out[1], SessionOutput::Events { events, .. } if events.len() == 1));
        assert!(s.drain_outbox().is_empty());
    }

    #[test]
    fn test_record_resolve_apply_converges() {
        let mut h = host(arena());
        let mut g = guest(arena());
        assert_converged(&h, &g);

        h.record_command(SideId::A, Command::walk(1, 250));
        h.record_command(SideId::A, Command::Aim { angle: -0.9, target: Vec2::new(150.0, 10.0) });
        h.record_command(SideId::A, Command::StartCharge);
        h.tick(TICK, &LocalInput::default(), false).unwrap();
        h.record_command(SideId::A, Command::fire(Weapon::Bazooka, 0.7, -0.9));

        let resolution = run_until_resolved(&mut h);
        assert_eq!(resolution.turn_index, 1);
        assert_eq!(resolution.commands.len(), 4);

        g.apply_turn_resolution(&resolution).unwrap();
        assert_converged(&h, &g);
        assert_eq!(g.current_turn().unwrap().side, SideId::B);
        assert!(!g.is_waiting_for_remote_resolution());
        assert!(h.is_waiting_for_remote_resolution());
    }

    #[test]
    fn test_applying_twice_fails() {
        let mut h = host(arena());
        let mut g = guest(arena());
        h.record_command(SideId::A, Command::fire(Weapon::Bazooka, 0.6, -1.2));
        let resolution = run_until_resolved(&mut h);

        g.apply_turn_resolution(&resolution).unwrap();
        let err = g.apply_turn_resolution(&resolution).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Resolution(ResolutionError::TurnStartMismatch { field: "turn_index", .. })
        ));
        assert!(g.is_desynchronized());
        assert_eq!(g.tick(TICK, &LocalInput::default(), true), Err(SessionError::Desynchronized));
    }

    #[test]
    fn test_drowning_ends_turn_after_post_delay() {
        let mut surface = vec![80; 300];
        for s in surface.iter_mut().take(60).skip(30) {
            *s = 200;
        }
        let snap = snapshot_with(
            surface,
            vec![Vec2::new(45.5, 40.0), Vec2::new(100.5, 73.5)],
            vec![Vec2::new(200.5, 73.5), Vec2::new(240.5, 73.5)],
        );
        let mut h = host(snap.clone());
        let mut g = guest(snap);

        let resolution = run_until_resolved(&mut h);
        assert_eq!(resolution.turn_index, 1);

        let drowned = resolution
            .events
            .iter()
            .find(|e| matches!(e.health_change(), Some(c) if c.cause == HealthCause::Drowned))
            .expect("drowning recorded");
        let change = drowned.health_change().unwrap();
        assert_eq!(change.unit, UnitRef::new(SideId::A, 0));
        assert!(!change.alive_after);

        let elapsed = resolution.snapshot.world.time_ms - resolution.start.start_ms;
        assert!(elapsed >= drowned.at_ms as u64 + config().post_shot_delay_ms);

        g.apply_turn_resolution(&resolution).unwrap();
        assert_eq!(g.world().active_side, SideId::B);
        assert!(!g.is_waiting_for_remote_resolution());
        assert_converged(&h, &g);
    }

    #[test]
    fn test_explosion_hits_enemy_and_friend() {
        let snap = snapshot_with(
            vec![80; 300],
            vec![Vec2::new(100.5, 73.5), Vec2::new(40.5, 73.5)],
            vec![Vec2::new(112.5, 73.5), Vec2::new(260.5, 73.5)],
        );
        let mut h = host(snap.clone());
        let mut g = guest(snap);

        h.record_command(SideId::A, Command::fire(Weapon::Bazooka, 0.5, FRAC_PI_2));
        let resolution = run_until_resolved(&mut h);

        let changes: Vec<_> = resolution.health_changes().collect();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].unit, UnitRef::new(SideId::A, 0));
        assert_eq!(changes[1].unit, UnitRef::new(SideId::B, 0));
        for c in changes {
            assert_eq!(c.before + c.delta, c.after);
            assert_eq!(c.alive_after, c.after > 0);
            assert!(c.delta < 0);
        }

        g.apply_turn_resolution(&resolution).unwrap();
        assert_converged(&h, &g);
    }

    #[test]
    fn test_remote_delivery_queues_and_discards() {
        // Host plays both sides locally so it can produce two turns in a row
        let both = |s| session(s, [TurnDriver::Local(LocalDriver::new(SideId::A)), TurnDriver::Local(LocalDriver::new(SideId::B))]);
        let mut h = both(arena());
        let mut g = session(arena(), [
            TurnDriver::Remote(RemoteDriver::new(SideId::A)),
            TurnDriver::Remote(RemoteDriver::new(SideId::B)),
        ]);

        h.record_command(SideId::A, Command::fire(Weapon::Bazooka, 0.6, -1.0));
        let first = run_until_resolved(&mut h);
        h.record_command(SideId::B, Command::fire(Weapon::Bazooka, 0.6, -2.0));
        let second = run_until_resolved(&mut h);

        // Early resolution waits in the queue
        g.deliver_remote(RemoteMessage::Resolution(Box::new(second.clone()))).unwrap();
        assert_eq!(g.turn_index(), 0);

        g.deliver_remote(RemoteMessage::Resolution(Box::new(first.clone()))).unwrap();
        assert_eq!(g.turn_index(), 1);

        g.tick(TICK, &LocalInput::default(), false).unwrap();
        assert_eq!(g.turn_index(), 2);
        assert_converged(&h, &g);

        // Late duplicate is ignored, not fatal
        g.deliver_remote(RemoteMessage::Resolution(Box::new(first))).unwrap();
        assert!(!g.is_desynchronized());
        assert_eq!(g.turn_index(), 2);
    }

    #[test]
    fn test_remote_commands_are_spectated() {
        let mut g = guest(arena());
        let before = g.world().sides[0].units[0].position;

        g.deliver_remote(RemoteMessage::Command { turn_index: 1, side: SideId::A, command: Command::walk(1, 250) })
            .unwrap();
        assert!(g.world().sides[0].units[0].position.x > before.x);
        assert!(g.current_commands().is_empty());

        // Commands for a side played locally are refused
        assert!(!g.apply_remote_turn_command(SideId::B, 1, Command::StartCharge));
    }

    #[test]
    fn test_resolution_for_local_side_is_an_error() {
        let mut h = host(arena());
        h.record_command(SideId::A, Command::fire(Weapon::Bazooka, 0.6, -1.0));
        let resolution = run_until_resolved(&mut h);

        // The host plays A itself; a peer resolution for A is a protocol violation
        let mut other = host(arena());
        let err = other.deliver_remote(RemoteMessage::Resolution(Box::new(resolution))).unwrap_err();
        assert_eq!(err, SessionError::ResolutionForLocalSide(SideId::A));
        assert_eq!(other.turn_index(), 0);

        // Stray commands for a local side stay harmless
        other
            .deliver_remote(RemoteMessage::Command { turn_index: 1, side: SideId::A, command: Command::StartCharge })
            .unwrap();
        assert!(!other.is_charging());
    }

    #[test]
    fn test_walk_is_clamped_to_turn_time() {
        let turn_ms = config().turn_duration_ms;
        let walk_speed = config().physics.walk_speed;

        let mut g = guest(arena());
        let before = g.world().sides[0].units[0].position;
        let started = std::time::Instant::now();
        assert!(g.apply_remote_turn_command(SideId::A, 1, Command::walk(1, u32::MAX)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        let walked = g.world().sides[0].units[0].position.x - before.x;
        assert!(walked > 0.0);
        assert!(walked <= walk_speed * turn_ms as f64 / 1000.0 + 1e-6);

        let mut h = host(arena());
        let applied = h.record_command(SideId::A, Command::walk(-1, u32::MAX)).unwrap();
        assert_eq!(applied.command, Command::walk(-1, turn_ms as u32));
    }

    #[test]
    fn test_local_driver_charges_and_fires() {
        let mut h = host(arena());
        let held = LocalInput { fire_held: true, aim_target: Some(Vec2::new(160.0, 20.0)), ..LocalInput::default() };

        for _ in 0..11 {
            h.tick(TICK, &held, true).unwrap();
        }
        assert!(h.is_charging());

        h.tick(TICK, &LocalInput::default(), true).unwrap();
        assert_eq!(h.phase(), MatchPhase::Projectile);

        let kinds: Vec<_> = h.current_commands().iter().map(|c| c.command.kind()).collect();
        assert_eq!(kinds, ["aim", "start_charge", "fire"]);
        match &h.current_commands()[2].command {
            Command::FireChargedWeapon { power, .. } => assert!((power - 176.0 / 2000.0).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ai_turn_replays_on_guest() {
        let coarse = AiConfig { angle_step_deg: 20.0, power_step: 0.35, ..AiConfig::default() };
        let mut h = session(arena(), [TurnDriver::Ai(AiDriver::new(SideId::A, coarse)), TurnDriver::Remote(RemoteDriver::new(SideId::B))]);
        let mut g = guest(arena());

        let resolution = run_until_resolved(&mut h);
        let kinds: Vec<_> = resolution.commands.iter().map(|c| c.command.kind()).collect();
        assert_eq!(kinds, ["set_weapon", "aim", "start_charge", "fire"]);

        g.apply_turn_resolution(&resolution).unwrap();
        assert_converged(&h, &g);
    }

    #[test]
    fn test_restart_from_snapshot() {
        let mut g = guest(arena());
        g.deliver_remote(RemoteMessage::Command { turn_index: 1, side: SideId::A, command: Command::walk(1, 250) })
            .unwrap();

        g.restart_from(arena()).unwrap();
        assert_eq!(g.snapshot(), arena());
        assert!(g.is_waiting_for_remote_resolution());

        let mut bad = arena();
        bad.world.phase = MatchPhase::Projectile;
        assert!(matches!(g.restart_from(bad), Err(SessionError::InvalidSnapshot(_))));
    }

    #[test]
    fn test_random_command_sequences_replay() {
        for seed in 0..4u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut h = host(arena());
            let mut g = guest(arena());

            for _ in 0..rng.gen_range(1..8) {
                let command = match rng.gen_range(0..3) {
                    0 => Command::Move { direction: rng.gen_range(-1..=1), jump: rng.gen_bool(0.2), elapsed_ms: rng.gen_range(0..200) },
                    1 => Command::Aim { angle: rng.gen_range(-PI..PI), target: Vec2::new(rng.gen_range(0.0..300.0), 20.0) },
                    _ => Command::SetWeapon { weapon: Weapon::ALL[rng.gen_range(0..3)] },
                };
                h.record_command(SideId::A, command);
                h.tick(TICK, &LocalInput::default(), false).unwrap();
            }
            let angle = rng.gen_range(-2.8..-0.3);
            let power = rng.gen_range(0.2..1.0);
            h.record_command(SideId::A, Command::fire(h.current_weapon(), power, angle));

            let resolution = run_until_resolved(&mut h);
            g.apply_turn_resolution(&resolution).unwrap();
            assert_converged(&h, &g);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_replay_converges(
            walks in prop::collection::vec((-1i8..=1, 1u32..120), 0..6),
            angle in -2.8f64..-0.3,
            power in 0.2f64..1.0,
        ) {
            let mut h = host(arena());
            let mut g = guest(arena());

            for (direction, elapsed_ms) in walks {
                h.record_command(SideId::A, Command::Move { direction, jump: false, elapsed_ms });
                h.tick(TICK, &LocalInput::default(), false).unwrap();
            }
            h.record_command(SideId::A, Command::fire(Weapon::Bazooka, power, angle));
            let resolution = run_until_resolved(&mut h);

            prop_assert!(g.apply_turn_resolution(&resolution).is_ok());
            prop_assert_eq!(h.state_hash(), g.state_hash());
            prop_assert_eq!(h.snapshot(), g.snapshot());
        }
    }
}
