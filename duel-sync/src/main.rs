//! Duel Sync Peer
//!
//! Runs one end of an AI-vs-AI duel, or both ends in-process.
//!
//! ```text
//! duel-sync demo                 # host and guest over a loopback channel
//! duel-sync host [addr]          # listen, default 127.0.0.1:9050
//! duel-sync join [url]           # connect, default ws://127.0.0.1:9050
//! ```
//!
//! `DUEL_CONFIG` may name a JSON file overriding any configuration value.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use duel_sync::{
    VERSION,
    config::DuelConfig,
    core::{clock::{Clock, ManualClock, SystemClock}, rng::DeterministicRng},
    game::state::SideId,
    network::{
        BridgeError, InboundEvent, LoopbackChannel, MessageChannel, NetMessage, NetworkBridge, PeerRole,
        WireFormat, WsChannel,
    },
    turn::{AiDriver, LocalInput, RemoteDriver, Session, TurnDriver},
};

/// Frame length in milliseconds
const FRAME_MS: u64 = 16;

/// Turns the loopback demo plays at most
const DEMO_TURNS: u32 = 12;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DuelConfig::from_env().context("loading configuration")?;
    info!("Duel Sync v{}", VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("demo") => demo(&config),
        Some("host") => host(&config, args.get(1).map_or("127.0.0.1:9050", String::as_str)).await,
        Some("join") => join(&config, args.get(1).map_or("ws://127.0.0.1:9050", String::as_str)).await,
        Some(other) => bail!("unknown mode {other:?}; expected demo, host or join"),
    }
}

fn ai(side: SideId, config: &DuelConfig) -> TurnDriver {
    TurnDriver::Ai(AiDriver::new(side, config.ai))
}

fn remote(side: SideId) -> TurnDriver {
    TurnDriver::Remote(RemoteDriver::new(side))
}

fn host_session(config: &DuelConfig, name: &str, clock: Box<dyn Clock>) -> Session {
    let match_id = Uuid::new_v4();
    info!("Match ID: {}", hex::encode(match_id.as_bytes()));
    Session::new_match(
        config.session.clone(),
        match_id,
        Box::new(DeterministicRng::for_match(match_id.as_bytes(), &[name])),
        clock,
        [ai(SideId::A, config), remote(SideId::B)],
    )
}

// =============================================================================
// DEMO
// =============================================================================

/// Both peers in one process, driven by one manual clock.
fn demo(config: &DuelConfig) -> Result<()> {
    info!("=== Loopback Demo ===");
    let clock = ManualClock::new(0);
    let (mut host_ch, mut guest_ch) = LoopbackChannel::pair(WireFormat::Binary);
    let mut host_bridge = NetworkBridge::new(PeerRole::Host, "host", config.throttle, config.effects);
    let mut guest_bridge = NetworkBridge::new(PeerRole::Guest, "guest", config.throttle, config.effects);

    let mut host = host_session(config, "host", Box::new(clock.clone()));
    host_ch.send(&host_bridge.hello())?;
    host_bridge.send_match_init(&host, &mut host_ch)?;
    guest_ch.send(&guest_bridge.hello())?;

    let snapshot = guest_bridge
        .poll_bootstrap(&mut guest_ch)?
        .context("host did not send match_init")?;
    let mut guest = Session::from_snapshot(
        config.session.clone(),
        snapshot,
        Box::new(DeterministicRng::for_match(host.match_id().as_bytes(), &["guest"])),
        Box::new(clock.clone()),
        [remote(SideId::A), ai(SideId::B, config)],
    )?;

    let input = LocalInput::default();
    let frame = FRAME_MS as f64;
    while !host.is_game_over() && host.turn_index() < DEMO_TURNS {
        clock.advance(FRAME_MS);
        host.tick(frame, &input, false)?;
        guest.tick(frame, &input, false)?;
        host_bridge.pump(&mut host, &mut host_ch)?;
        guest_bridge.pump(&mut guest, &mut guest_ch)?;
    }
    host_bridge.pump(&mut host, &mut host_ch)?;
    guest_bridge.pump(&mut guest, &mut guest_ch)?;

    info!("=== Results ===");
    for (turn, hash) in host.resolved_hashes() {
        let theirs = guest.resolved_hash(*turn).map(hex::encode).unwrap_or_else(|| "missing".into());
        info!("Turn {:>3}: host {} guest {}", turn, hex::encode(hash), theirs);
    }
    info!("Simulated {} ms, {} messages from host, {} from guest",
          clock.now_ms(), host_bridge.stats().messages_sent, guest_bridge.stats().messages_sent);
    if let Some(winner) = host.winner() {
        info!("Winner: side {}", winner);
    }

    if host.resolved_hashes() == guest.resolved_hashes() && host.state_hash() == guest.state_hash() {
        info!("TURN SYNC VERIFIED: {} turns, hashes match", host.turn_index());
        Ok(())
    } else {
        bail!("TURN SYNC FAILURE: hashes differ")
    }
}

// =============================================================================
// NETWORK PEERS
// =============================================================================

async fn host(config: &DuelConfig, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!("Waiting for a guest on {}", addr);
    let (mut channel, peer) = WsChannel::accept(&listener, WireFormat::Binary).await?;
    info!("Guest connected from {}", peer);

    let mut bridge = NetworkBridge::new(PeerRole::Host, "host", config.throttle, config.effects);
    let mut session = host_session(config, "host", Box::new(SystemClock::new()));
    channel.send(&bridge.hello())?;
    bridge.send_match_init(&session, &mut channel)?;

    run(&mut session, &mut bridge, &mut channel).await
}

async fn join(config: &DuelConfig, url: &str) -> Result<()> {
    let mut channel = WsChannel::connect(url, WireFormat::Binary).await?;
    let mut bridge = NetworkBridge::new(PeerRole::Guest, "guest", config.throttle, config.effects);
    channel.send(&bridge.hello())?;

    let snapshot = loop {
        match channel.recv().await? {
            NetMessage::MatchInit { snapshot } => break *snapshot,
            NetMessage::PlayerHello { name, role } => info!("Peer {} is {:?}", name, role),
            other => debug!(kind = other.kind(), "waiting for match_init"),
        }
    };
    info!("Joined match {} at turn {}", hex::encode(snapshot.match_id.as_bytes()), snapshot.turn_index);

    let seed_id = *snapshot.match_id.as_bytes();
    let mut session = Session::from_snapshot(
        config.session.clone(),
        snapshot,
        Box::new(DeterministicRng::for_match(&seed_id, &["guest"])),
        Box::new(SystemClock::new()),
        [remote(SideId::A), ai(SideId::B, config)],
    )?;

    run(&mut session, &mut bridge, &mut channel).await
}

/// Frame loop shared by both network roles.
async fn run(session: &mut Session, bridge: &mut NetworkBridge, channel: &mut WsChannel) -> Result<()> {
    let mut frames = interval(Duration::from_millis(FRAME_MS));
    let mut last_ms = session.now_ms();
    let input = LocalInput::default();

    while !session.is_game_over() {
        frames.tick().await;
        let now = session.now_ms();
        let dt = now.saturating_sub(last_ms) as f64;
        last_ms = now;

        if !session.is_desynchronized() {
            if let Err(e) = session.tick(dt, &input, false) {
                warn!("Tick failed: {}", e);
            }
        }

        let events = match bridge.pump(session, channel) {
            Ok(events) => events,
            Err(BridgeError::Session(e)) => {
                error!("Session error: {}", e);
                if session.is_desynchronized() {
                    match bridge.role() {
                        PeerRole::Guest => bridge.request_restart(channel)?,
                        PeerRole::Host => {
                            // Host state is the reference; push it again
                            let snapshot = session.snapshot();
                            session.restart_from(snapshot)?;
                            bridge.send_match_init(session, channel)?;
                        }
                    }
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for event in events {
            match event {
                InboundEvent::Hello { name, role } => info!("Peer {} joined as {:?}", name, role),
                InboundEvent::RestartRequested => bridge.send_match_init(session, channel)?,
                InboundEvent::MatchInit(snapshot) => {
                    session.restart_from(*snapshot)?;
                    info!("Restarted from host snapshot");
                }
                InboundEvent::Effects(effects) => {
                    debug!(
                        turn = effects.turn_index,
                        carves = effects.terrain_operations.len(),
                        hits = effects.unit_health.len(),
                        "peer effects"
                    );
                }
            }
        }
    }

    match session.winner() {
        Some(winner) => info!("Match over, side {} wins", winner),
        None => info!("Match over in a draw"),
    }
    info!("Final State Hash: {}", hex::encode(session.state_hash()));
    Ok(())
}
