//! Network Bridge
//!
//! Glue between a [`Session`] and a [`MessageChannel`]. Outbound, it drains
//! the session outbox through the aim and movement throttles and the
//! effects batcher; resolutions always go out, after anything pending for
//! their turn. Inbound, turn traffic is routed to the session's remote
//! driver and the rest is surfaced to the application as [`InboundEvent`]s.

use tracing::{debug, info, trace, warn};

use crate::config::{EffectsConfig, ThrottleConfig};
use crate::core::hash::short_hex;
use crate::network::effects::EffectsBatcher;
use crate::network::protocol::{NetMessage, PeerRole, TurnEffects};
use crate::network::transport::{MessageChannel, TransportError};
use crate::turn::command::Command;
use crate::turn::remote::RemoteMessage;
use crate::turn::resolution::MatchSnapshot;
use crate::turn::session::{Session, SessionError, SessionOutput};
use crate::turn::throttle::{AimSample, AimThrottle, MoveBatch, MoveSample, MoveThrottle};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Inbound traffic the application has to act on.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    Hello { name: String, role: PeerRole },
    /// Start or restart from this snapshot (guest only)
    MatchInit(Box<MatchSnapshot>),
    /// The guest wants a fresh `match_init` (host only)
    RestartRequested,
    /// Advisory effects of the peer's turn in progress
    Effects(TurnEffects),
}

/// Traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub aim_sent: u64,
    pub aim_suppressed: u64,
    pub move_batches_sent: u64,
    pub effects_sent: u64,
    pub resolutions_sent: u64,
    pub resolutions_received: u64,
}

#[derive(Debug)]
pub struct NetworkBridge {
    role: PeerRole,
    name: String,
    peer: Option<(String, PeerRole)>,
    aim: AimThrottle,
    movement: MoveThrottle,
    effects: EffectsBatcher,
    stats: BridgeStats,
}

impl NetworkBridge {
    pub fn new(role: PeerRole, name: impl Into<String>, throttle: ThrottleConfig, effects: EffectsConfig) -> Self {
        Self {
            role,
            name: name.into(),
            peer: None,
            aim: AimThrottle::new(throttle.aim),
            movement: MoveThrottle::new(throttle.movement),
            effects: EffectsBatcher::new(effects),
            stats: BridgeStats::default(),
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Name and role the peer introduced itself with.
    pub fn peer(&self) -> Option<(&str, PeerRole)> {
        self.peer.as_ref().map(|(name, role)| (name.as_str(), *role))
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn hello(&self) -> NetMessage {
        NetMessage::PlayerHello { name: self.name.clone(), role: self.role }
    }

    pub fn match_init(session: &Session) -> NetMessage {
        NetMessage::MatchInit { snapshot: Box::new(session.snapshot()) }
    }

    /// Host: send the current match state to the guest, dropping anything
    /// still batched for the old timeline.
    pub fn send_match_init(&mut self, session: &Session, channel: &mut dyn MessageChannel) -> Result<(), BridgeError> {
        self.reset_outbound();
        info!(match_id = %session.match_id(), turn_index = session.turn_index(), "sending match_init");
        self.send(channel, &Self::match_init(session))
    }

    /// Guest: ask the host for a fresh `match_init`.
    pub fn request_restart(&mut self, channel: &mut dyn MessageChannel) -> Result<(), BridgeError> {
        if self.role == PeerRole::Host {
            warn!("host asked to request a restart; ignoring");
            return Ok(());
        }
        self.reset_outbound();
        self.send(channel, &NetMessage::MatchRestartRequest)
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Drain the session outbox onto the channel and run timer flushes.
    pub fn outbound(&mut self, session: &mut Session, channel: &mut dyn MessageChannel) -> Result<(), BridgeError> {
        let now = session.now_ms();

        for output in session.drain_outbox() {
            match output {
                SessionOutput::Command { turn_index, side, unit_position, command } => match command {
                    Command::Aim { angle, target } => {
                        let sample = AimSample { turn_index, side, origin: unit_position, target, angle };
                        match self.aim.offer(&sample, now) {
                            Some(trigger) => {
                                trace!(turn_index, side = %side, ?trigger, "aim sent");
                                self.stats.aim_sent += 1;
                                self.send(channel, &NetMessage::TurnCommand { turn_index, side_id: side, command })?;
                            }
                            None => self.stats.aim_suppressed += 1,
                        }
                    }
                    Command::Move { direction, jump, elapsed_ms } => {
                        let sample = MoveSample { turn_index, side, direction, jump, elapsed_ms };
                        for batch in self.movement.offer(&sample, now) {
                            self.send_move(channel, &batch)?;
                        }
                    }
                    command => {
                        // Discrete commands must not overtake buffered movement
                        if let Some(batch) = self.movement.flush(now) {
                            self.send_move(channel, &batch)?;
                        }
                        self.send(channel, &NetMessage::TurnCommand { turn_index, side_id: side, command })?;
                    }
                },

                SessionOutput::Events { turn_index, side, events } => {
                    for event in &events {
                        for batch in self.effects.push(turn_index, side, event, now) {
                            self.send_effects(channel, batch)?;
                        }
                    }
                }

                SessionOutput::Resolution(resolution) => {
                    if let Some(batch) = self.movement.flush(now) {
                        self.send_move(channel, &batch)?;
                    }
                    if let Some(batch) = self.effects.flush() {
                        self.send_effects(channel, batch)?;
                    }
                    debug!(
                        turn = resolution.turn_index,
                        hash = %short_hex(&resolution.state_hash),
                        "sending turn_resolution"
                    );
                    self.stats.resolutions_sent += 1;
                    self.send(channel, &NetMessage::TurnResolution { payload: resolution })?;
                    self.aim.reset();
                    self.movement.reset();
                }
            }
        }

        if let Some(batch) = self.movement.poll(now) {
            self.send_move(channel, &batch)?;
        }
        if let Some(sample) = self.aim.poll(now) {
            trace!(turn_index = sample.turn_index, side = %sample.side, "held-back aim sent");
            self.stats.aim_sent += 1;
            let command = Command::Aim { angle: sample.angle, target: sample.target };
            self.send(channel, &NetMessage::TurnCommand { turn_index: sample.turn_index, side_id: sample.side, command })?;
        }
        if let Some(batch) = self.effects.poll(now) {
            self.send_effects(channel, batch)?;
        }
        Ok(())
    }

    fn send(&mut self, channel: &mut dyn MessageChannel, message: &NetMessage) -> Result<(), BridgeError> {
        channel.send(message)?;
        self.stats.messages_sent += 1;
        Ok(())
    }

    fn send_move(&mut self, channel: &mut dyn MessageChannel, batch: &MoveBatch) -> Result<(), BridgeError> {
        self.stats.move_batches_sent += 1;
        let message = NetMessage::TurnCommand {
            turn_index: batch.turn_index,
            side_id: batch.side,
            command: batch.command(),
        };
        self.send(channel, &message)
    }

    fn send_effects(&mut self, channel: &mut dyn MessageChannel, batch: TurnEffects) -> Result<(), BridgeError> {
        self.stats.effects_sent += 1;
        self.send(channel, &NetMessage::TurnEffects(batch))
    }

    fn reset_outbound(&mut self) {
        self.aim.reset();
        self.movement.reset();
        let _ = self.effects.flush();
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Route one inbound message. Turn traffic goes to the session; the
    /// rest is returned for the application.
    pub fn handle_inbound(&mut self, message: NetMessage, session: &mut Session) -> Result<Option<InboundEvent>, BridgeError> {
        self.stats.messages_received += 1;

        match message {
            NetMessage::PlayerHello { name, role } => Ok(self.on_hello(name, role)),

            NetMessage::MatchInit { snapshot } => {
                if self.role == PeerRole::Host {
                    warn!("guest sent match_init; ignoring");
                    return Ok(None);
                }
                Ok(Some(InboundEvent::MatchInit(snapshot)))
            }

            NetMessage::TurnCommand { turn_index, side_id, command } => {
                if session.is_desynchronized() {
                    debug!(turn_index, "dropping turn_command while desynchronized");
                    return Ok(None);
                }
                session.deliver_remote(RemoteMessage::Command { turn_index, side: side_id, command })?;
                Ok(None)
            }

            NetMessage::TurnResolution { payload } => {
                if session.is_desynchronized() {
                    debug!(turn = payload.turn_index, "dropping turn_resolution while desynchronized");
                    return Ok(None);
                }
                self.stats.resolutions_received += 1;
                session.deliver_remote(RemoteMessage::Resolution(payload))?;
                Ok(None)
            }

            NetMessage::TurnEffects(effects) => Ok(Some(InboundEvent::Effects(effects))),

            NetMessage::MatchRestartRequest => {
                if self.role == PeerRole::Guest {
                    warn!("host sent match_restart_request; ignoring");
                    return Ok(None);
                }
                info!("guest requested a restart");
                Ok(Some(InboundEvent::RestartRequested))
            }
        }
    }

    fn on_hello(&mut self, name: String, role: PeerRole) -> Option<InboundEvent> {
        if role == self.role {
            warn!(peer = %name, ?role, "peer claims our own role");
        }
        info!(peer = %name, ?role, "peer said hello");
        self.peer = Some((name.clone(), role));
        Some(InboundEvent::Hello { name, role })
    }

    /// One frame of networking: flush outbound, then handle everything
    /// waiting on the channel.
    pub fn pump(&mut self, session: &mut Session, channel: &mut dyn MessageChannel) -> Result<Vec<InboundEvent>, BridgeError> {
        self.outbound(session, channel)?;
        let mut events = Vec::new();
        while let Some(message) = channel.try_recv()? {
            trace!(kind = message.kind(), "received");
            if let Some(event) = self.handle_inbound(message, session)? {
                events.push(event);
            }
        }
        // Applying a resolution can start a local turn that already produced output
        self.outbound(session, channel)?;
        Ok(events)
    }

    /// Guest, before a session exists: read until the host's `match_init`.
    /// Anything else but a hello is dropped.
    pub fn poll_bootstrap(&mut self, channel: &mut dyn MessageChannel) -> Result<Option<MatchSnapshot>, BridgeError> {
        while let Some(message) = channel.try_recv()? {
            self.stats.messages_received += 1;
            match message {
                NetMessage::PlayerHello { name, role } => {
                    self.on_hello(name, role);
                }
                NetMessage::MatchInit { snapshot } => {
                    info!(match_id = %snapshot.match_id, turn_index = snapshot.turn_index, "received match_init");
                    return Ok(Some(*snapshot));
                }
                other => debug!(kind = other.kind(), "dropping message before match_init"),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, SessionConfig, WorldConfig};
    use crate::core::clock::ManualClock;
    use crate::core::rng::DeterministicRng;
    use crate::core::vec2::Vec2;
    use crate::game::state::SideId;
    use crate::game::weapon::Weapon;
    use crate::network::protocol::WireFormat;
    use crate::network::transport::LoopbackChannel;
    use crate::turn::ai::AiDriver;
    use crate::turn::driver::{LocalDriver, LocalInput, TurnDriver};
    use crate::turn::remote::RemoteDriver;
    use uuid::Uuid;

    const TICK: f64 = 16.0;

    fn config() -> SessionConfig {
        let world = WorldConfig { width: 300, height: 200, units_per_side: 2, ..WorldConfig::default() };
        SessionConfig { world, ..SessionConfig::default() }
    }

    fn ai() -> AiConfig {
        AiConfig { angle_step_deg: 10.0, power_step: 0.2, ..AiConfig::default() }
    }

    fn bridge(role: PeerRole) -> NetworkBridge {
        NetworkBridge::new(role, format!("{role:?}"), ThrottleConfig::default(), EffectsConfig::default())
    }

    fn host_session(clock: &ManualClock, a: TurnDriver) -> Session {
        Session::new_match(
            config(),
            Uuid::from_u128(0xB41D),
            Box::new(DeterministicRng::new(11)),
            Box::new(clock.clone()),
            [a, TurnDriver::Remote(RemoteDriver::new(SideId::B))],
        )
    }

    fn guest_session(clock: &ManualClock, snapshot: MatchSnapshot, b: TurnDriver) -> Session {
        Session::from_snapshot(
            config(),
            snapshot,
            Box::new(DeterministicRng::new(22)),
            Box::new(clock.clone()),
            [TurnDriver::Remote(RemoteDriver::new(SideId::A)), b],
        )
        .unwrap()
    }

    /// Host and guest connected through a loopback pair, guest bootstrapped.
    fn connected(a: TurnDriver, b: TurnDriver) -> (ManualClock, Session, Session, NetworkBridge, NetworkBridge, LoopbackChannel, LoopbackChannel) {
        let clock = ManualClock::new(0);
        let (mut host_ch, mut guest_ch) = LoopbackChannel::pair(WireFormat::Binary);
        let mut host_bridge = bridge(PeerRole::Host);
        let mut guest_bridge = bridge(PeerRole::Guest);

        let host = host_session(&clock, a);
        host_ch.send(&host_bridge.hello()).unwrap();
        host_bridge.send_match_init(&host, &mut host_ch).unwrap();
        guest_ch.send(&guest_bridge.hello()).unwrap();

        let snapshot = guest_bridge.poll_bootstrap(&mut guest_ch).unwrap().unwrap();
        assert_eq!(guest_bridge.peer(), Some(("Host", PeerRole::Host)));
        let guest = guest_session(&clock, snapshot, b);
        assert_eq!(guest.state_hash(), host.state_hash());

        (clock, host, guest, host_bridge, guest_bridge, host_ch, guest_ch)
    }

    #[test]
    fn test_ai_duel_stays_in_sync_over_loopback() {
        let (clock, mut host, mut guest, mut hb, mut gb, mut hc, mut gc) = connected(
            TurnDriver::Ai(AiDriver::new(SideId::A, ai())),
            TurnDriver::Ai(AiDriver::new(SideId::B, ai())),
        );
        let input = LocalInput::default();

        let events = hb.pump(&mut host, &mut hc).unwrap();
        assert!(matches!(events.as_slice(), [InboundEvent::Hello { role: PeerRole::Guest, .. }]));

        for _ in 0..20_000 {
            if host.is_game_over() || host.turn_index() >= 4 {
                break;
            }
            clock.advance(TICK as u64);
            host.tick(TICK, &input, true).unwrap();
            guest.tick(TICK, &input, true).unwrap();
            hb.pump(&mut host, &mut hc).unwrap();
            gb.pump(&mut guest, &mut gc).unwrap();
        }
        // Let the last resolution land
        hb.pump(&mut host, &mut hc).unwrap();
        gb.pump(&mut guest, &mut gc).unwrap();

        assert!(host.turn_index() >= 2 || host.is_game_over());
        assert_eq!(host.turn_index(), guest.turn_index());
        assert_eq!(host.resolved_hashes(), guest.resolved_hashes());
        assert_eq!(host.state_hash(), guest.state_hash());
        assert!(!host.is_desynchronized() && !guest.is_desynchronized());

        let stats = hb.stats();
        assert!(stats.resolutions_sent >= 1);
        assert!(stats.resolutions_received >= 1);
        assert_eq!(stats.resolutions_sent + gb.stats().resolutions_sent, u64::from(host.turn_index()));
    }

    #[test]
    fn test_aim_stream_is_throttled() {
        let (clock, mut host, _guest, mut hb, _gb, mut hc, mut gc) = connected(
            TurnDriver::Local(LocalDriver::new(SideId::A)),
            TurnDriver::Local(LocalDriver::new(SideId::B)),
        );
        let origin = host.active_unit_position().unwrap();

        // Tiny wiggles every frame
        for i in 0..30 {
            clock.advance(TICK as u64);
            let wiggle = if i % 2 == 0 { 0.0 } else { 0.001 };
            let input = LocalInput { aim_target: Some(origin + Vec2::new(40.0, -40.0 + wiggle)), ..LocalInput::default() };
            host.tick(TICK, &input, true).unwrap();
            hb.outbound(&mut host, &mut hc).unwrap();
        }

        let stats = hb.stats();
        assert!(stats.aim_sent >= 1);
        assert!(stats.aim_suppressed > stats.aim_sent);
        let mut aims = 0;
        while let Some(msg) = gc.try_recv().unwrap() {
            if matches!(msg, NetMessage::TurnCommand { command: Command::Aim { .. }, .. }) {
                aims += 1;
            }
        }
        assert_eq!(aims, stats.aim_sent);
    }

    #[test]
    fn test_settled_aim_reaches_peer() {
        let (clock, mut host, mut guest, mut hb, mut gb, mut hc, mut gc) = connected(
            TurnDriver::Local(LocalDriver::new(SideId::A)),
            TurnDriver::Local(LocalDriver::new(SideId::B)),
        );
        let origin = host.active_unit_position().unwrap();
        let first = origin + Vec2::new(35.0, -27.0);
        let settled = first + Vec2::new(0.3, 0.0);
        let idle = LocalInput::default();

        for target in [first, settled] {
            clock.advance(TICK as u64);
            host.tick(TICK, &LocalInput { aim_target: Some(target), ..LocalInput::default() }, true).unwrap();
            hb.pump(&mut host, &mut hc).unwrap();
            gb.pump(&mut guest, &mut gc).unwrap();
        }
        assert_eq!(hb.stats().aim_suppressed, 1);

        // The player holds still; no new aim samples are produced
        for _ in 0..125 {
            clock.advance(TICK as u64);
            host.tick(TICK, &idle, true).unwrap();
            hb.pump(&mut host, &mut hc).unwrap();
            gb.pump(&mut guest, &mut gc).unwrap();
        }

        assert_eq!(hb.stats().aim_sent, 2);
        let host_aim = host.current_commands().iter().rev().find_map(|c| match c.command {
            Command::Aim { target, .. } => Some(target),
            _ => None,
        });
        assert_eq!(host_aim, Some(settled));
        assert_eq!(guest.aim_target(), Some(settled));
    }

    #[test]
    fn test_movement_is_flushed_before_discrete_commands() {
        let (clock, mut host, _guest, mut hb, _gb, mut hc, mut gc) = connected(
            TurnDriver::Local(LocalDriver::new(SideId::A)),
            TurnDriver::Local(LocalDriver::new(SideId::B)),
        );

        let walk = LocalInput { direction: 1, ..LocalInput::default() };
        for _ in 0..3 {
            clock.advance(TICK as u64);
            host.tick(TICK, &walk, true).unwrap();
            hb.outbound(&mut host, &mut hc).unwrap();
        }
        clock.advance(TICK as u64);
        let select = LocalInput { select_weapon: Some(Weapon::Grenade), ..LocalInput::default() };
        host.tick(TICK, &select, true).unwrap();
        hb.outbound(&mut host, &mut hc).unwrap();

        let mut kinds = Vec::new();
        let mut walked = 0;
        while let Some(msg) = gc.try_recv().unwrap() {
            if let NetMessage::TurnCommand { command, .. } = msg {
                if let Command::Move { elapsed_ms, .. } = command {
                    walked += elapsed_ms;
                }
                kinds.push(command.kind());
            }
        }
        assert_eq!(kinds.last(), Some(&"set_weapon"));
        assert!(kinds[..kinds.len() - 1].iter().all(|k| *k == "move"));
        assert_eq!(walked, 48);
    }

    #[test]
    fn test_restart_request_flow() {
        let (_clock, mut host, mut guest, mut hb, mut gb, mut hc, mut gc) = connected(
            TurnDriver::Local(LocalDriver::new(SideId::A)),
            TurnDriver::Local(LocalDriver::new(SideId::B)),
        );
        hb.pump(&mut host, &mut hc).unwrap();

        gb.request_restart(&mut gc).unwrap();
        let events = hb.pump(&mut host, &mut hc).unwrap();
        assert_eq!(events, vec![InboundEvent::RestartRequested]);

        hb.send_match_init(&host, &mut hc).unwrap();
        let events = gb.pump(&mut guest, &mut gc).unwrap();
        match events.as_slice() {
            [InboundEvent::MatchInit(snapshot)] => {
                guest.restart_from((**snapshot).clone()).unwrap();
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(guest.state_hash(), host.state_hash());

        // Roles are enforced
        assert_eq!(gb.handle_inbound(NetMessage::MatchRestartRequest, &mut guest).unwrap(), None);
        let init = NetworkBridge::match_init(&guest);
        assert_eq!(hb.handle_inbound(init, &mut host).unwrap(), None);
    }
}
