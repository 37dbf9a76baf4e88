//! Remote Turn Driver
//!
//! Plays the peer's side. Live commands are applied for spectating; the
//! resolution is the authoritative catch-up. While this driver's side is
//! active the session withholds physics.
//!
//! ```text
//! Idle ──begin_turn──▶ Awaiting ──command──▶ DrainingCommands
//!   ▲                     │                        │
//!   │                     └──────resolution────────┴──▶ Resolved
//!   └──────────────────────end_turn──────────────────────────┘
//! ```
//!
//! Messages for a later turn wait in a queue keyed by turn index; messages
//! for an earlier turn are dropped.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::game::state::SideId;
use crate::turn::command::Command;
use crate::turn::log::TurnStart;
use crate::turn::resolution::TurnResolution;
use crate::turn::session::{Session, SessionError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteState {
    Idle,
    Awaiting,
    DrainingCommands,
    Resolved,
}

/// Inbound traffic for a remote-driven side.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteMessage {
    Command {
        turn_index: u32,
        side: SideId,
        command: Command,
    },
    Resolution(Box<TurnResolution>),
}

impl RemoteMessage {
    pub fn turn_index(&self) -> u32 {
        match self {
            RemoteMessage::Command { turn_index, .. } => *turn_index,
            RemoteMessage::Resolution(r) => r.turn_index,
        }
    }

    pub fn side(&self) -> SideId {
        match self {
            RemoteMessage::Command { side, .. } => *side,
            RemoteMessage::Resolution(r) => r.acting_side(),
        }
    }
}

#[derive(Debug, Default)]
struct PendingTurn {
    commands: Vec<Command>,
    resolution: Option<Box<TurnResolution>>,
}

#[derive(Debug)]
pub struct RemoteDriver {
    side: SideId,
    state: RemoteState,
    /// Turn being awaited while this side is active
    current: Option<u32>,
    queue: BTreeMap<u32, PendingTurn>,
    commands_applied: u64,
    resolutions_applied: u64,
}

impl RemoteDriver {
    pub fn new(side: SideId) -> Self {
        Self {
            side,
            state: RemoteState::Idle,
            current: None,
            queue: BTreeMap::new(),
            commands_applied: 0,
            resolutions_applied: 0,
        }
    }

    pub fn side(&self) -> SideId {
        self.side
    }

    pub fn state(&self) -> RemoteState {
        self.state
    }

    /// Number of turns with queued traffic.
    pub fn queued_turns(&self) -> usize {
        self.queue.len()
    }

    pub fn commands_applied(&self) -> u64 {
        self.commands_applied
    }

    pub fn resolutions_applied(&self) -> u64 {
        self.resolutions_applied
    }

    pub(crate) fn begin_turn(&mut self, start: &TurnStart) {
        let stale: Vec<u32> = self.queue.range(..start.turn_index).map(|(&k, _)| k).collect();
        for turn in stale {
            debug!(side = %self.side, turn, "dropping queued traffic for a past turn");
            self.queue.remove(&turn);
        }

        if start.side == self.side {
            self.current = Some(start.turn_index);
            self.state = RemoteState::Awaiting;
        } else {
            self.current = None;
            self.state = RemoteState::Idle;
        }
    }

    pub(crate) fn end_turn(&mut self, turn_index: u32) {
        if self.current == Some(turn_index) {
            self.current = None;
        }
        self.state = RemoteState::Idle;
    }

    /// Queue a message. `local_turn` is the turn the session is playing.
    pub fn receive(&mut self, message: RemoteMessage, local_turn: u32) {
        let turn = message.turn_index();
        if turn < local_turn {
            debug!(side = %self.side, turn, local_turn, "discarding stale remote message");
            return;
        }
        if turn > local_turn {
            debug!(side = %self.side, turn, local_turn, "queueing early remote message");
        }

        let pending = self.queue.entry(turn).or_default();
        match message {
            RemoteMessage::Command { command, .. } => pending.commands.push(command),
            RemoteMessage::Resolution(resolution) => {
                if pending.resolution.is_some() {
                    debug!(side = %self.side, turn, "replacing duplicate resolution");
                }
                pending.resolution = Some(resolution);
            }
        }
    }

    /// Apply whatever is queued for the awaited turn.
    pub(crate) fn pump(&mut self, session: &mut Session) -> Result<(), SessionError> {
        let Some(turn) = self.current else {
            return Ok(());
        };
        if self.state == RemoteState::Resolved {
            return Ok(());
        }
        let Some(pending) = self.queue.get_mut(&turn) else {
            return Ok(());
        };

        for command in pending.commands.drain(..) {
            if session.apply_remote_turn_command(self.side, turn, command) {
                self.commands_applied += 1;
            }
            self.state = RemoteState::DrainingCommands;
        }

        if let Some(resolution) = pending.resolution.take() {
            self.queue.remove(&turn);
            self.state = RemoteState::Resolved;
            session.apply_turn_resolution(&resolution)?;
            self.resolutions_applied += 1;
            info!(side = %self.side, turn, "remote turn resolved");
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
