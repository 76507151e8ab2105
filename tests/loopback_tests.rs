#![cfg(feature = "transport-loopback")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Several sessions talking through one in-process relay.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_session::protocol::{ClientState, ObjectRef, PeerId, Quat, RoomOptions, Vec3};
use relay_session::{
    AutoJoin, AutoJoinConfig, Health, LoopbackRelay, PingProbe, Session, SessionConfig,
    SessionError, SessionEvent, SessionRuntime, SlotPool, SpawnArbiter, SpawnConfig, SpawnSlot,
};
use tokio::sync::mpsc;

use common::{eventually, wait_for};

struct Peer {
    runtime: SessionRuntime,
    session: Session,
    events: mpsc::Receiver<SessionEvent>,
}

fn start(relay: &LoopbackRelay, nick: &str) -> Peer {
    let runtime = Session::start(relay.transport(), SessionConfig::new(nick));
    let session = runtime.session();
    let events = session.subscribe_events(256);
    Peer {
        runtime,
        session,
        events,
    }
}

/// Connect and join (or create) "dev-room".
async fn join(relay: &LoopbackRelay, nick: &str) -> Peer {
    let mut peer = start(relay, nick);
    peer.session.connect().unwrap();
    wait_for(&mut peer.events, |e| *e == SessionEvent::ConnectedToMaster).await;
    peer.session
        .create_or_join_room("dev-room", RoomOptions::default().with_max_peers(8), None, &[])
        .unwrap();
    wait_for(&mut peer.events, |e| *e == SessionEvent::JoinedRoom).await;
    peer
}

async fn next_instantiation(events: &mut mpsc::Receiver<SessionEvent>) -> ObjectRef {
    match wait_for(events, |e| matches!(e, SessionEvent::ObjectInstantiated(_))).await {
        SessionEvent::ObjectInstantiated(data) => data.object,
        other => panic!("unexpected event {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Rooms
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn auto_join_brings_two_peers_together() {
    let relay = LoopbackRelay::new();
    let mut alice = start(&relay, "Alice");
    let mut bob = start(&relay, "Bob");

    let _alice_join = AutoJoin::start(&alice.session, AutoJoinConfig::default()).unwrap();
    wait_for(&mut alice.events, |e| *e == SessionEvent::JoinedRoom).await;
    let _bob_join = AutoJoin::start(&bob.session, AutoJoinConfig::default()).unwrap();
    wait_for(&mut bob.events, |e| *e == SessionEvent::JoinedRoom).await;

    let entered = wait_for(&mut alice.events, |e| {
        matches!(e, SessionEvent::PeerEntered(_))
    })
    .await;
    assert!(matches!(entered, SessionEvent::PeerEntered(p) if p.nick_name == "Bob"));

    assert_eq!(alice.session.state(), ClientState::InRoom);
    assert!(alice.session.is_master_client());
    assert!(!bob.session.is_master_client());
    assert_eq!(alice.session.peer_count(), 2);
    assert_eq!(bob.session.peer_count(), 2);
    assert_eq!(relay.room_peer_count("dev-room"), Some(2));

    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}

#[tokio::test]
async fn late_joiner_sees_existing_objects() {
    let relay = LoopbackRelay::new();
    let mut alice = join(&relay, "Alice").await;
    let object = alice
        .session
        .instantiate_networked("Player", Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, 0, None)
        .unwrap();
    eventually(|| relay.room_object_count("dev-room") == Some(1)).await;

    let mut bob = join(&relay, "Bob").await;
    eventually(|| bob.session.object(object).is_some()).await;
    assert!(!bob.session.is_mine(object));
    assert_eq!(bob.session.object(object).unwrap().owner, Some(PeerId(1)));

    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}

#[tokio::test]
async fn leaving_destroys_owned_objects_and_promotes_the_next_master() {
    let relay = LoopbackRelay::new();
    let mut alice = join(&relay, "Alice").await;
    let mut bob = join(&relay, "Bob").await;

    let player = alice
        .session
        .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None)
        .unwrap();
    let crate_object = alice
        .session
        .instantiate_room_object("Crate", Vec3::ZERO, Quat::IDENTITY, 0, None)
        .unwrap();
    eventually(|| bob.session.object_count() == 2).await;

    alice.session.leave_room(false).unwrap();
    wait_for(&mut alice.events, |e| *e == SessionEvent::LeftRoom).await;
    wait_for(&mut bob.events, |e| *e == SessionEvent::ObjectDestroyed(player)).await;
    wait_for(&mut bob.events, |e| {
        matches!(e, SessionEvent::MasterClientSwitched(_))
    })
    .await;

    assert!(bob.session.is_master_client());
    assert!(bob.session.object(player).is_none());
    assert!(bob.session.is_mine(crate_object));
    assert_eq!(bob.session.peer_count(), 1);
    assert!(!alice.session.in_room());
    eventually(|| alice.session.state() == ClientState::ConnectedToMaster).await;

    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}

#[tokio::test]
async fn master_can_close_a_connection() {
    let relay = LoopbackRelay::new();
    let mut alice = join(&relay, "Alice").await;
    let mut bob = join(&relay, "Bob").await;
    let bob_id = bob.session.local_peer_id().unwrap();

    let refused = tokio_test::assert_err!(bob.session.close_connection(PeerId(1)));
    assert!(matches!(refused, SessionError::NotMasterClient(_)));
    tokio_test::assert_ok!(alice.session.close_connection(bob_id));
    wait_for(&mut bob.events, |e| {
        matches!(e, SessionEvent::Disconnected { .. })
    })
    .await;
    wait_for(&mut alice.events, |e| matches!(e, SessionEvent::PeerLeft(_))).await;
    assert_eq!(alice.session.peer_count(), 1);

    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// RPC and events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ping_probe_reaches_every_peer() {
    let relay = LoopbackRelay::new();
    let mut alice = join(&relay, "Alice").await;
    let mut bob = join(&relay, "Bob").await;

    let scene = alice.session.attach_scene_object(1).unwrap();
    bob.session.attach_scene_object(1).unwrap();
    let alice_probe = PingProbe::attach(&alice.session, scene).unwrap();
    let bob_probe = PingProbe::attach(&bob.session, scene).unwrap();

    assert!(alice_probe.rpc_ping().unwrap());
    assert!(bob_probe.event_ping().unwrap());

    eventually(|| alice_probe.received().len() == 2 && bob_probe.received().len() == 2).await;
    for probe in [&alice_probe, &bob_probe] {
        let received = probe.received();
        assert!(received.contains(&"RPC says hi from Alice".to_string()));
        assert!(received.contains(&"EVENT says hi from Bob".to_string()));
    }

    drop(alice_probe);
    drop(bob_probe);
    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}

#[tokio::test]
async fn probe_outside_a_room_is_a_no_op() {
    let relay = LoopbackRelay::new();
    let mut alice = start(&relay, "Alice");
    let scene = alice.session.attach_scene_object(5).unwrap();
    let probe = PingProbe::attach(&alice.session, scene).unwrap();
    assert!(!probe.rpc_ping().unwrap());
    assert!(!probe.event_ping().unwrap());
    assert!(probe.received().is_empty());
    drop(probe);
    alice.runtime.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Replicated health
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_follows_the_owner() {
    let relay = LoopbackRelay::new();
    let mut alice = join(&relay, "Alice").await;
    let mut bob = join(&relay, "Bob").await;

    let object = alice
        .session
        .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None)
        .unwrap();
    assert_eq!(next_instantiation(&mut bob.events).await, object);

    let owner_view = Health::attach(&alice.session, object).unwrap();
    let remote_view = Health::attach(&bob.session, object).unwrap();
    let deaths = Arc::new(AtomicUsize::new(0));
    for health in [&owner_view, &remote_view] {
        let deaths = Arc::clone(&deaths);
        health.on_death(move |_| {
            deaths.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(owner_view.take_damage(30).unwrap());
    eventually(|| remote_view.health() == 70).await;

    assert!(matches!(
        remote_view.take_damage(10),
        Err(SessionError::NotOwner { .. })
    ));
    assert_eq!(remote_view.health(), 70);

    assert!(owner_view.take_damage(1000).unwrap());
    eventually(|| remote_view.is_dead() && deaths.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(deaths.load(Ordering::SeqCst), 2, "one death per view");

    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Spawning
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn peers_spawn_in_distinct_slots_and_see_each_other() {
    let relay = LoopbackRelay::new();
    let mut alice = join(&relay, "Alice").await;
    let mut bob = join(&relay, "Bob").await;

    let slots = SlotPool::new((0..3).map(|i| {
        SpawnSlot::new(Vec3::new(i as f32, 0.0, 0.0), Quat::IDENTITY)
    }));
    let config = SpawnConfig::new()
        .with_jitter(Duration::from_millis(5)..Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(10));
    let alice_spawn =
        SpawnArbiter::attach(&alice.session, slots.clone(), config.clone().with_seed(1)).unwrap();
    let bob_spawn = SpawnArbiter::attach(&bob.session, slots.clone(), config.with_seed(2)).unwrap();

    eventually(|| alice_spawn.has_spawned() && bob_spawn.has_spawned()).await;
    let (alice_object, alice_slot) = alice_spawn.spawned().unwrap();
    let (bob_object, bob_slot) = bob_spawn.spawned().unwrap();
    assert_ne!(alice_slot, bob_slot);
    assert_eq!(slots.available_count(), 1);

    assert_eq!(next_instantiation(&mut alice.events).await, bob_object);
    assert_eq!(next_instantiation(&mut bob.events).await, alice_object);
    assert_eq!(
        bob.session.object(alice_object).unwrap().data,
        vec![serde_json::json!("Alice")]
    );

    alice.runtime.shutdown().await;
    bob.runtime.shutdown().await;
}
