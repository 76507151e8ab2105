//! Race-free spawn slot arbitration.
//!
//! After joining a room every peer waits a random stagger, then claims a
//! free spawn slot and instantiates its player object there. The stagger
//! spreads peers that join together so each one sees the others' occupancy
//! before choosing. A claim reads the free slots and marks the chosen one
//! taken inside one lock section, so two claimants never get the same slot.
//!
//! Slot availability is also driven from outside through [`SlotOccupancy`],
//! which forwards "something entered / left this slot" signals from the
//! host's geometry.

use std::ops::Range;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HandlerResult, Result, SessionError};
use crate::listener::SessionListener;
use crate::lock;
use crate::protocol::{DisconnectCause, ObjectRef, Quat, Vec3};
use crate::session::Session;

const DEFAULT_PREFAB: &str = "Player";
const DEFAULT_JITTER: Range<Duration> = Duration::from_millis(100)..Duration::from_millis(1000);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_OCCUPANT_CATEGORY: &str = "Damageable";

// ── Slots ───────────────────────────────────────────────────────────

/// Index of a slot in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Where a spawned object appears.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpawnSlot {
    pub position: Vec3,
    pub rotation: Quat,
}

impl SpawnSlot {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

#[derive(Debug)]
struct SlotEntry {
    slot: SpawnSlot,
    available: bool,
}

/// A fixed table of spawn slots with availability flags.
///
/// Cloning is cheap; clones share the same table. Every slot starts available.
#[derive(Debug, Clone)]
pub struct SlotPool {
    slots: Arc<Mutex<Vec<SlotEntry>>>,
}

impl SlotPool {
    pub fn new(slots: impl IntoIterator<Item = SpawnSlot>) -> Self {
        let slots = slots
            .into_iter()
            .map(|slot| SlotEntry {
                slot,
                available: true,
            })
            .collect();
        Self {
            slots: Arc::new(Mutex::new(slots)),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }

    /// Pick a free slot uniformly at random and mark it taken.
    ///
    /// Returns `None` when every slot is taken.
    pub fn try_claim<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(SlotId, SpawnSlot)> {
        let mut slots = lock(&self.slots);
        let free: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.available)
            .map(|(index, _)| index)
            .collect();
        if free.is_empty() {
            return None;
        }
        let index = *free.get(rng.random_range(0..free.len()))?;
        let entry = slots.get_mut(index)?;
        entry.available = false;
        Some((SlotId(index), entry.slot))
    }

    /// Mark a slot free or taken. Returns `false` for an unknown id.
    pub fn set_availability(&self, id: SlotId, available: bool) -> bool {
        match lock(&self.slots).get_mut(id.0) {
            Some(entry) => {
                entry.available = available;
                true
            }
            None => false,
        }
    }

    /// Mark a slot free again.
    pub fn release(&self, id: SlotId) -> bool {
        self.set_availability(id, true)
    }

    pub fn is_available(&self, id: SlotId) -> bool {
        lock(&self.slots).get(id.0).is_some_and(|e| e.available)
    }

    pub fn available_count(&self) -> usize {
        lock(&self.slots).iter().filter(|e| e.available).count()
    }

    pub fn slot(&self, id: SlotId) -> Option<SpawnSlot> {
        lock(&self.slots).get(id.0).map(|e| e.slot)
    }
}

// ── Occupancy ───────────────────────────────────────────────────────

/// The kind of occupant that blocks a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccupantCategory(String);

impl OccupantCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OccupantCategory {
    fn default() -> Self {
        Self::new(DEFAULT_OCCUPANT_CATEGORY)
    }
}

/// Feeds geometry overlap signals into a [`SlotPool`].
///
/// Only occupants of the configured category count; everything else is
/// ignored.
#[derive(Debug, Clone)]
pub struct SlotOccupancy {
    pool: SlotPool,
    category: OccupantCategory,
}

impl SlotOccupancy {
    pub fn new(pool: SlotPool, category: OccupantCategory) -> Self {
        Self { pool, category }
    }

    /// An occupant is inside `slot`. May be reported repeatedly.
    ///
    /// Returns `false` if the category is ignored or the slot is unknown.
    pub fn occupant_entered(&self, slot: SlotId, category: &str) -> bool {
        self.matches(category) && self.pool.set_availability(slot, false)
    }

    /// An occupant left `slot`.
    pub fn occupant_exited(&self, slot: SlotId, category: &str) -> bool {
        self.matches(category) && self.pool.set_availability(slot, true)
    }

    fn matches(&self, category: &str) -> bool {
        self.category.as_str() == category
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SpawnArbiter`].
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Prefab instantiated in the claimed slot. Defaults to `"Player"`.
    pub prefab: String,
    /// Range of the initial stagger. Defaults to 100..1000 ms.
    pub jitter: Range<Duration>,
    /// Wait between claim attempts while every slot is taken. Defaults to 250 ms.
    pub poll_interval: Duration,
    /// Occupants that block a slot. Defaults to `"Damageable"`.
    pub occupant_category: OccupantCategory,
    /// Seed for slot and stagger choice; `None` seeds from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            prefab: DEFAULT_PREFAB.to_string(),
            jitter: DEFAULT_JITTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            occupant_category: OccupantCategory::default(),
            seed: None,
        }
    }
}

impl SpawnConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefab(mut self, prefab: impl Into<String>) -> Self {
        self.prefab = prefab.into();
        self
    }

    /// Set the stagger range. An empty range means a fixed delay of `start`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Range<Duration>) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_occupant_category(mut self, category: OccupantCategory) -> Self {
        self.occupant_category = category;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.prefab.trim().is_empty() {
            return Err(SessionError::invalid("prefab", "must be non-empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(SessionError::invalid("poll_interval", "must be positive"));
        }
        Ok(())
    }
}

// ── Arbiter ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Spawned {
    object: ObjectRef,
    slot: SlotId,
}

#[derive(Debug, Default)]
struct ArbiterState {
    spawned: Option<Spawned>,
    pending: Option<CancellationToken>,
    /// Bumped on every reset; attempts from an older generation are stale.
    generation: u64,
}

struct ArbiterInner {
    pool: SlotPool,
    config: SpawnConfig,
    rng: Mutex<StdRng>,
    state: Mutex<ArbiterState>,
    root: CancellationToken,
}

/// Spawns the local player object once per room.
///
/// Dropping the arbiter (or calling [`shutdown`](SpawnArbiter::shutdown))
/// cancels any pending attempt and detaches it from the session.
pub struct SpawnArbiter {
    session: Session,
    inner: Arc<ArbiterInner>,
    listener: Arc<dyn SessionListener>,
}

impl SpawnArbiter {
    /// Attach to `session`. If it is already in a room, arbitration begins
    /// immediately. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] for an empty prefab or a
    /// zero poll interval.
    pub fn attach(session: &Session, pool: SlotPool, config: SpawnConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let inner = Arc::new(ArbiterInner {
            pool,
            config,
            rng: Mutex::new(rng),
            state: Mutex::new(ArbiterState::default()),
            root: CancellationToken::new(),
        });
        let listener: Arc<dyn SessionListener> = Arc::new(ArbiterListener {
            inner: Arc::downgrade(&inner),
        });
        session.add_listener(Arc::clone(&listener));

        if session.in_room() {
            inner.begin(session);
        }

        Ok(Self {
            session: session.clone(),
            inner,
            listener,
        })
    }

    /// Returns `true` once the player object exists in the current room.
    pub fn has_spawned(&self) -> bool {
        lock(&self.inner.state).spawned.is_some()
    }

    /// The spawned object and the slot it took.
    pub fn spawned(&self) -> Option<(ObjectRef, SlotId)> {
        lock(&self.inner.state)
            .spawned
            .map(|s| (s.object, s.slot))
    }

    /// Returns `true` while an attempt is waiting or polling.
    pub fn is_pending(&self) -> bool {
        lock(&self.inner.state).pending.is_some()
    }

    pub fn pool(&self) -> &SlotPool {
        &self.inner.pool
    }

    /// An occupancy feed for this arbiter's pool, filtering on the
    /// configured occupant category.
    pub fn occupancy(&self) -> SlotOccupancy {
        SlotOccupancy::new(
            self.inner.pool.clone(),
            self.inner.config.occupant_category.clone(),
        )
    }

    /// Cancel every attempt and detach from the session. Idempotent.
    pub fn shutdown(&self) {
        self.inner.root.cancel();
        self.session.remove_listener(&self.listener);
    }
}

impl std::fmt::Debug for SpawnArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnArbiter")
            .field("spawned", &self.spawned())
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Drop for SpawnArbiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ArbiterInner {
    fn begin(self: &Arc<Self>, session: &Session) {
        let (token, generation) = {
            let mut state = lock(&self.state);
            if state.spawned.is_some() || state.pending.is_some() {
                debug!("spawn already done or in progress");
                return;
            }
            if self.root.is_cancelled() {
                return;
            }
            let token = self.root.child_token();
            state.pending = Some(token.clone());
            (token, state.generation)
        };

        let inner = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            inner.run(session, token, generation).await;
        });
    }

    /// Forget the current spawn and cancel the pending attempt.
    fn reset(&self) {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        if let Some(token) = state.pending.take() {
            token.cancel();
        }
        if let Some(spawned) = state.spawned.take() {
            self.pool.release(spawned.slot);
        }
    }

    async fn run(&self, session: Session, token: CancellationToken, generation: u64) {
        let stagger = self.stagger();
        debug!("spawn stagger {stagger:?}");
        if !sleep_or_cancel(stagger, &token).await {
            return;
        }

        loop {
            let claimed = {
                // Holding the state lock orders the claim against `reset`.
                let state = lock(&self.state);
                if token.is_cancelled() || state.generation != generation {
                    return;
                }
                self.pool.try_claim(&mut *lock(&self.rng))
            };

            let Some((slot_id, slot)) = claimed else {
                debug!("no free spawn slot, retrying in {:?}", self.config.poll_interval);
                if !sleep_or_cancel(self.config.poll_interval, &token).await {
                    return;
                }
                continue;
            };

            let nick_name = session
                .local_peer()
                .map(|p| p.nick_name)
                .unwrap_or_else(|| session.nick_name().to_string());
            let result = session.instantiate_networked(
                &self.config.prefab,
                slot.position,
                slot.rotation,
                0,
                Some(vec![json!(nick_name)]),
            );

            let mut state = lock(&self.state);
            let current = state.generation == generation;
            match result {
                Ok(object) if current => {
                    info!("spawned {} as {object} at {slot_id}", self.config.prefab);
                    state.pending = None;
                    state.spawned = Some(Spawned {
                        object,
                        slot: slot_id,
                    });
                }
                Ok(object) => {
                    debug!("spawn of {object} outlived its room, releasing {slot_id}");
                    self.pool.release(slot_id);
                }
                Err(e) => {
                    warn!("spawn instantiation failed: {e}");
                    self.pool.release(slot_id);
                    if current {
                        state.pending = None;
                    }
                }
            }
            return;
        }
    }

    fn stagger(&self) -> Duration {
        let jitter = &self.config.jitter;
        if jitter.is_empty() {
            return jitter.start;
        }
        lock(&self.rng).random_range(jitter.clone())
    }
}

async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Session-facing half of the arbiter; holds it weakly.
struct ArbiterListener {
    inner: Weak<ArbiterInner>,
}

impl SessionListener for ArbiterListener {
    fn on_joined_room(&self, session: &Session) -> HandlerResult {
        if let Some(inner) = self.inner.upgrade() {
            inner.begin(session);
        }
        Ok(())
    }

    fn on_left_room(&self, _session: &Session) -> HandlerResult {
        if let Some(inner) = self.inner.upgrade() {
            inner.reset();
        }
        Ok(())
    }

    fn on_disconnected(&self, _session: &Session, _cause: DisconnectCause) -> HandlerResult {
        if let Some(inner) = self.inner.upgrade() {
            inner.reset();
        }
        Ok(())
    }
}
