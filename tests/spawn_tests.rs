#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Spawn arbitration against scripted sessions.
//!
//! Runs on a paused clock so the stagger and poll delays elapse instantly.

mod common;

use std::time::Duration;

use relay_session::protocol::{Quat, TransportCallback, Vec3};
use relay_session::{SessionError, SessionEvent, SlotId, SlotPool, SpawnArbiter, SpawnConfig, SpawnSlot};
use serde_json::json;

use common::{eventually, joined_room, peer, start, start_in_room, wait_for, Harness};

fn pool(n: usize) -> SlotPool {
    SlotPool::new((0..n).map(|i| {
        SpawnSlot::new(Vec3::new(i as f32 * 2.0, 0.0, 0.0), Quat::IDENTITY)
    }))
}

fn config(seed: u64) -> SpawnConfig {
    SpawnConfig::new().with_seed(seed)
}

/// Well past the longest stagger.
async fn past_stagger() {
    tokio::time::sleep(Duration::from_secs(2)).await;
}

async fn start_as(actor: i32, name: &str) -> Harness {
    let mut h = start(vec![
        Some(Ok(TransportCallback::ConnectedToMaster)),
        Some(Ok(joined_room(peer(actor, name, actor == 1), vec![]))),
    ]);
    wait_for(&mut h.events, |e| *e == SessionEvent::JoinedRoom).await;
    h
}

#[tokio::test(start_paused = true)]
async fn spawns_once_after_joining_with_nick_name() {
    let mut h = start_in_room().await;
    let slots = pool(3);
    let arbiter = SpawnArbiter::attach(&h.session, slots.clone(), config(1)).unwrap();
    assert!(arbiter.is_pending());

    eventually(|| arbiter.has_spawned()).await;
    let (object, slot) = arbiter.spawned().unwrap();
    assert!(!slots.is_available(slot));
    assert_eq!(slots.available_count(), 2);
    assert!(!arbiter.is_pending());

    let sent = h.mock.instantiations();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].object, object);
    assert_eq!(sent[0].prefab, "Player");
    assert_eq!(sent[0].data, vec![json!("Alice")]);
    assert_eq!(sent[0].position, slots.slot(slot).unwrap().position);
    assert!(h.session.is_mine(object));

    past_stagger().await;
    assert_eq!(h.mock.instantiations().len(), 1);
    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn waits_for_a_free_slot() {
    let mut h = start_in_room().await;
    let slots = pool(1);
    let occupancy = relay_session::SlotOccupancy::new(slots.clone(), Default::default());
    assert!(occupancy.occupant_entered(SlotId(0), "Damageable"));

    let arbiter = SpawnArbiter::attach(&h.session, slots.clone(), config(2)).unwrap();
    past_stagger().await;
    assert!(!arbiter.has_spawned());
    assert!(arbiter.is_pending());
    assert!(h.mock.instantiations().is_empty());

    assert!(occupancy.occupant_exited(SlotId(0), "Damageable"));
    eventually(|| arbiter.has_spawned()).await;
    assert_eq!(arbiter.spawned().unwrap().1, SlotId(0));
    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn leaving_before_the_stagger_cancels_the_attempt() {
    let mut h = start_in_room().await;
    let slots = pool(1);
    let arbiter = SpawnArbiter::attach(
        &h.session,
        slots.clone(),
        config(3).with_jitter(Duration::from_millis(500)..Duration::from_millis(600)),
    )
    .unwrap();

    h.mock.push(TransportCallback::LeftRoom);
    wait_for(&mut h.events, |e| *e == SessionEvent::LeftRoom).await;
    past_stagger().await;

    assert!(!arbiter.has_spawned());
    assert!(!arbiter.is_pending());
    assert!(slots.is_available(SlotId(0)));
    assert!(h.mock.instantiations().is_empty());
    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn leaving_releases_the_slot_and_rejoining_spawns_again() {
    let mut h = start_in_room().await;
    let slots = pool(1);
    let arbiter = SpawnArbiter::attach(&h.session, slots.clone(), config(4)).unwrap();
    eventually(|| arbiter.has_spawned()).await;
    assert_eq!(slots.available_count(), 0);

    h.mock.push(TransportCallback::LeftRoom);
    wait_for(&mut h.events, |e| *e == SessionEvent::LeftRoom).await;
    assert!(!arbiter.has_spawned());
    assert!(slots.is_available(SlotId(0)));

    h.mock.push(joined_room(peer(1, "Alice", true), vec![]));
    wait_for(&mut h.events, |e| *e == SessionEvent::JoinedRoom).await;
    eventually(|| arbiter.has_spawned()).await;
    assert_eq!(h.mock.instantiations().len(), 2);
    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn four_peers_three_slots() {
    let slots = pool(3);
    let mut peers = Vec::new();
    for (actor, name) in [(1, "Ann"), (2, "Ben"), (3, "Cal"), (4, "Dee")] {
        let h = start_as(actor, name).await;
        let arbiter =
            SpawnArbiter::attach(&h.session, slots.clone(), config(actor as u64)).unwrap();
        peers.push((h, arbiter));
    }

    past_stagger().await;
    let spawned: Vec<SlotId> = peers
        .iter()
        .filter_map(|(_, arbiter)| arbiter.spawned().map(|(_, slot)| slot))
        .collect();
    assert_eq!(spawned.len(), 3);
    let mut distinct = spawned.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 3, "no two peers share a slot");
    assert_eq!(peers.iter().filter(|(_, a)| a.is_pending()).count(), 1);

    // The first spawned peer leaves; the waiting one takes its slot.
    let leaver = peers.iter().position(|(_, a)| a.has_spawned()).unwrap();
    let waiting = peers.iter().position(|(_, a)| a.is_pending()).unwrap();
    let freed = peers[leaver].1.spawned().unwrap().1;
    peers[leaver].0.mock.push(TransportCallback::LeftRoom);
    wait_for(&mut peers[leaver].0.events, |e| *e == SessionEvent::LeftRoom).await;
    assert!(!peers[leaver].1.has_spawned());

    eventually(|| peers[waiting].1.has_spawned()).await;
    assert_eq!(peers[waiting].1.spawned().unwrap().1, freed);
    assert_eq!(slots.available_count(), 0);
    assert_eq!(peers.iter().filter(|(_, a)| a.has_spawned()).count(), 3);

    for (h, _) in &mut peers {
        h.runtime.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_pending_attempts() {
    let mut h = start_in_room().await;
    let slots = pool(2);
    let arbiter = SpawnArbiter::attach(&h.session, slots.clone(), config(5)).unwrap();
    let listeners = h.session.listener_count();
    arbiter.shutdown();
    arbiter.shutdown();
    assert_eq!(h.session.listener_count(), listeners - 1);

    past_stagger().await;
    assert!(!arbiter.has_spawned());
    assert_eq!(slots.available_count(), 2);
    h.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_is_rejected() {
    let mut h = start_in_room().await;
    assert!(matches!(
        SpawnArbiter::attach(&h.session, pool(1), SpawnConfig::new().with_prefab(" ")),
        Err(SessionError::InvalidArgument { name: "prefab", .. })
    ));
    assert!(SpawnArbiter::attach(
        &h.session,
        pool(1),
        SpawnConfig::new().with_poll_interval(Duration::ZERO)
    )
    .is_err());
    h.runtime.shutdown().await;
}
