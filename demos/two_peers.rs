//! # Two Peers Example
//!
//! Runs two sessions against the in-process loopback relay:
//!
//! 1. Both peers auto-join "dev-room"; the first one becomes master client
//! 2. Each peer claims a spawn slot and instantiates its player
//! 3. Both greet each other over RPC and over a custom event
//! 4. Alice damages her own player until it dies; Bob watches the health
//!    replicate
//! 5. Both shut down gracefully
//!
//! ## Running
//!
//! ```sh
//! cargo run --example two_peers
//!
//! # Verbose session logs:
//! RUST_LOG=relay_session=debug cargo run --example two_peers
//! ```

use std::time::Duration;

use relay_session::diagnostics::log_identity;
use relay_session::protocol::{ObjectRef, Quat, Vec3};
use relay_session::{
    AutoJoin, AutoJoinConfig, Health, LoopbackRelay, PingProbe, Session, SessionConfig,
    SessionEvent, SlotPool, SpawnArbiter, SpawnConfig, SpawnSlot,
};
use tokio::sync::mpsc;

/// Scene object both peers attach the ping probe to.
const PROBE_VIEW_ID: u32 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Relay and spawn points ──────────────────────────────────────
    let relay = LoopbackRelay::new();
    let slots = SlotPool::new([
        SpawnSlot::new(Vec3::new(-4.0, 0.0, 0.0), Quat::IDENTITY),
        SpawnSlot::new(Vec3::new(0.0, 0.0, 4.0), Quat::IDENTITY),
        SpawnSlot::new(Vec3::new(4.0, 0.0, 0.0), Quat::IDENTITY),
    ]);

    // ── Sessions ────────────────────────────────────────────────────
    let mut alice_rt = Session::start(relay.transport(), SessionConfig::new("Alice"));
    let mut bob_rt = Session::start(relay.transport(), SessionConfig::new("Bob"));
    let alice = alice_rt.session();
    let bob = bob_rt.session();
    let mut alice_events = alice.subscribe_events(64);
    let mut bob_events = bob.subscribe_events(64);

    let alice_spawn = SpawnArbiter::attach(&alice, slots.clone(), SpawnConfig::new())?;
    let bob_spawn = SpawnArbiter::attach(&bob, slots.clone(), SpawnConfig::new())?;

    let _alice_join = AutoJoin::start(&alice, AutoJoinConfig::default())?;
    wait_until(&mut alice_events, |e| *e == SessionEvent::JoinedRoom).await?;
    let _bob_join = AutoJoin::start(&bob, AutoJoinConfig::default())?;
    wait_until(&mut bob_events, |e| *e == SessionEvent::JoinedRoom).await?;

    // ── Spawning ────────────────────────────────────────────────────
    let (alice_player, _) = spawned(&alice_spawn).await?;
    let (bob_player, _) = spawned(&bob_spawn).await?;
    wait_until(&mut bob_events, |e| {
        matches!(e, SessionEvent::ObjectInstantiated(d) if d.object == alice_player)
    })
    .await?;
    log_identity(&alice, alice_player);
    log_identity(&bob, alice_player);
    log_identity(&bob, bob_player);

    // ── Greetings ───────────────────────────────────────────────────
    let probe = alice.attach_scene_object(PROBE_VIEW_ID)?;
    bob.attach_scene_object(PROBE_VIEW_ID)?;
    let alice_probe = PingProbe::attach(&alice, probe)?;
    let bob_probe = PingProbe::attach(&bob, probe)?;
    alice_probe.rpc_ping()?;
    bob_probe.event_ping()?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Alice heard: {:?}", alice_probe.received());
    tracing::info!("Bob heard: {:?}", bob_probe.received());

    // ── Replicated health ───────────────────────────────────────────
    let alice_view = Health::attach(&alice, alice_player)?;
    let bob_view = Health::attach(&bob, alice_player)?;
    bob_view.on_death(|object| tracing::info!("Bob saw {object} die"));

    for _ in 0..4 {
        alice_view.take_damage(30)?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracing::info!(
            "health of {alice_player}: Alice sees {}, Bob sees {}",
            alice_view.health(),
            bob_view.health()
        );
    }
    if let Err(e) = bob_view.take_damage(10) {
        tracing::info!("Bob cannot damage Alice's player: {e}");
    }

    // ── Shutdown ────────────────────────────────────────────────────
    drop((alice_probe, bob_probe, alice_view, bob_view));
    alice_spawn.shutdown();
    bob_spawn.shutdown();
    alice_rt.shutdown().await;
    bob_rt.shutdown().await;
    tracing::info!("Done");

    Ok(())
}

/// Wait up to five seconds for an event matching `pred`.
async fn wait_until<F>(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: F,
) -> Result<SessionEvent, Box<dyn std::error::Error>>
where
    F: Fn(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await?;
    found.ok_or_else(|| "session event channel closed".into())
}

/// Poll until the arbiter has spawned its player.
async fn spawned(
    arbiter: &SpawnArbiter,
) -> Result<(ObjectRef, relay_session::SlotId), Box<dyn std::error::Error>> {
    for _ in 0..100 {
        if let Some(spawned) = arbiter.spawned() {
            return Ok(spawned);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err("player was not spawned in time".into())
}
