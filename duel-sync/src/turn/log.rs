//! Turn Log
//!
//! Per-turn accumulator of as-applied commands and engine events. Created
//! empty when a turn starts and consumed once when the turn is finalized.

use serde::{Serialize, Deserialize};

use crate::game::events::{EngineEvent, EngineEventData, HealthChange};
use crate::game::state::{SideId, UnitRef};
use crate::turn::command::TurnCommand;

/// The expectation both peers share about who acts in a turn and under
/// which conditions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnStart {
    /// 1-based index of the turn being played
    pub turn_index: u32,
    pub side: SideId,
    pub unit: u16,
    /// Wind at turn start
    pub wind: f64,
    /// Simulation clock at turn start
    pub start_ms: u64,
}

impl TurnStart {
    pub fn unit_ref(&self) -> UnitRef {
        UnitRef::new(self.side, self.unit)
    }
}

#[derive(Clone, Debug)]
pub struct TurnLog {
    start: TurnStart,
    commands: Vec<TurnCommand>,
    events: Vec<EngineEvent>,
}

impl TurnLog {
    pub fn new(start: TurnStart) -> Self {
        Self {
            start,
            commands: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn start(&self) -> &TurnStart {
        &self.start
    }

    pub fn push_command(&mut self, command: TurnCommand) {
        self.commands.push(command);
    }

    /// Stamp and append events in emission order.
    pub fn push_events(&mut self, at_ms: u32, events: impl IntoIterator<Item = EngineEventData>) {
        self.events.extend(events.into_iter().map(|data| EngineEvent::new(at_ms, data)));
    }

    pub fn commands(&self) -> &[TurnCommand] {
        &self.commands
    }

    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    pub fn health_changes(&self) -> impl Iterator<Item = &HealthChange> {
        self.events.iter().filter_map(EngineEvent::health_change)
    }

    pub fn into_parts(self) -> (TurnStart, Vec<TurnCommand>, Vec<EngineEvent>) {
        (self.start, self.commands, self.events)
    }
}
