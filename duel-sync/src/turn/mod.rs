//! Turn Synchronization Core
//!
//! Everything that keeps two peers' simulations identical turn by turn:
//!
//! - `command`: Replayable player/AI intent
//! - `log`: Per-turn command and event accumulator
//! - `resolution`: The transmittable record that closes a turn
//! - `validate`: Plausibility checks before adopting a peer's resolution
//! - `throttle`: Outbound rate limiting of aim and movement
//! - `driver`, `remote`, `ai`: Who plays each side
//! - `session`: The orchestrator

pub mod command;
pub mod log;
pub mod resolution;
pub mod validate;
pub mod throttle;
pub mod driver;
pub mod remote;
pub mod ai;
pub mod session;

pub use command::{Command, TurnCommand};
pub use log::{TurnLog, TurnStart};
pub use resolution::{MatchSnapshot, TurnResolution};
pub use validate::{validate_resolution, ResolutionError};
pub use throttle::{AimSample, AimThrottle, AimTrigger, MoveBatch, MoveSample, MoveThrottle};
pub use driver::{DriverKind, LocalDriver, LocalInput, TurnDriver};
pub use remote::{RemoteDriver, RemoteMessage, RemoteState};
pub use ai::{plan_shot, AiDriver, ShotPlan};
pub use session::{Session, SessionError, SessionOutput};
