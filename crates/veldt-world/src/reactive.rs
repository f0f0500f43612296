//! Change-driven systems: watch sets, batching, and rate-limited delivery.
//!
//! A [`ReactiveSystem`] declares which component kinds it wants to hear
//! about, per change kind, inside [`configure`](ReactiveSystem::configure).
//! Every matching [`ChangeRecord`] then reaches the system one of two ways:
//!
//! - **batch mode** (the default): records buffer up and replay one by one at
//!   the next scheduled update, so two modifications inside one interval make
//!   two hook calls, never one coalesced call;
//! - **immediate mode**: the hook fires synchronously from the mutation that
//!   produced the record.
//!
//! Updates are rate-limited per system: `reactive_update` and any buffered
//! replay run only once the system's interval (default 60 Hz) has elapsed on
//! the world clock. A panicking hook is caught at the dispatch boundary,
//! logged, and delivery continues with the next record and system.
//!
//! Hooks and `reactive_update` run with no manager or entry lock held, so a
//! system may mutate the world freely, including components it watches. The
//! records its own mutations produce are buffered and reach it at its next
//! interval; other systems hear them on their usual schedule.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use veldt_ecs::change::panic_message;
use veldt_ecs::prelude::{ChangeKind, ChangeRecord, ComponentId, ComponentMask, Entity};

use crate::world::World;

/// Default delivery interval: 60 Hz.
const DEFAULT_INTERVAL_MS: u64 = 1000 / 60;

// ---------------------------------------------------------------------------
// ReactiveSystem
// ---------------------------------------------------------------------------

/// A system driven by component changes rather than the tick loop.
pub trait ReactiveSystem: Send {
    /// Declare watch sets, delivery frequency, and batch mode. Called once
    /// at registration.
    fn configure(&mut self, config: &mut ReactiveConfig<'_>);

    /// A watched component was attached to an entity.
    fn on_component_added(&mut self, _entity: Entity, _component: ComponentId) {}

    /// A watched component was modified in place.
    fn on_component_modified(&mut self, _entity: Entity, _component: ComponentId) {}

    /// A watched component was detached from an entity.
    fn on_component_removed(&mut self, _entity: Entity, _component: ComponentId) {}

    /// Runs after buffered records replay, once per elapsed interval.
    fn reactive_update(&mut self, _world: &World, _dt: f32) {}
}

// ---------------------------------------------------------------------------
// ReactiveConfig
// ---------------------------------------------------------------------------

/// Watch-set builder handed to [`ReactiveSystem::configure`].
pub struct ReactiveConfig<'w> {
    world: &'w World,
    watch_added: ComponentMask,
    watch_modified: ComponentMask,
    watch_removed: ComponentMask,
    interval_ms: u64,
    batch: bool,
}

impl<'w> ReactiveConfig<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            watch_added: ComponentMask::EMPTY,
            watch_modified: ComponentMask::EMPTY,
            watch_removed: ComponentMask::EMPTY,
            interval_ms: DEFAULT_INTERVAL_MS,
            batch: true,
        }
    }

    /// Receive [`ChangeKind::Added`] records for component `T`.
    pub fn watch_component_added<T: Send + Sync + 'static>(&mut self) -> &mut Self {
        if let Some(id) = self.resolve::<T>() {
            self.watch_added.set(id);
        }
        self
    }

    /// Receive [`ChangeKind::Modified`] records for component `T`.
    pub fn watch_component_modified<T: Send + Sync + 'static>(&mut self) -> &mut Self {
        if let Some(id) = self.resolve::<T>() {
            self.watch_modified.set(id);
        }
        self
    }

    /// Receive [`ChangeKind::Removed`] records for component `T`.
    pub fn watch_component_removed<T: Send + Sync + 'static>(&mut self) -> &mut Self {
        if let Some(id) = self.resolve::<T>() {
            self.watch_removed.set(id);
        }
        self
    }

    /// Receive records of `kind` for an already registered component id.
    pub fn watch_id(&mut self, kind: ChangeKind, id: ComponentId) -> &mut Self {
        match kind {
            ChangeKind::Added => self.watch_added.set(id),
            ChangeKind::Modified => self.watch_modified.set(id),
            ChangeKind::Removed => self.watch_removed.set(id),
        }
        self
    }

    /// Deliver at most `hz` times per second (default 60).
    ///
    /// # Panics
    ///
    /// Panics when `hz` is not positive and finite.
    pub fn set_update_frequency(&mut self, hz: f32) -> &mut Self {
        assert!(
            hz > 0.0 && hz.is_finite(),
            "update frequency must be positive and finite, got {hz}"
        );
        self.interval_ms = (1000.0 / hz) as u64;
        self
    }

    /// Buffer records until the next scheduled update (default), or fire
    /// hooks synchronously from the mutation site.
    pub fn set_batch_mode(&mut self, batch: bool) -> &mut Self {
        self.batch = batch;
        self
    }

    fn resolve<T: Send + Sync + 'static>(&mut self) -> Option<ComponentId> {
        match self.world.register_component::<T>() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    component = veldt_ecs::component::short_type_name::<T>(),
                    error = %e,
                    "cannot watch component"
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReactiveManager
// ---------------------------------------------------------------------------

/// Token returned by [`ReactiveManager::register`]. Present it to
/// [`unregister`](ReactiveManager::unregister) to release the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactiveHandle(u64);

struct EntryState {
    /// `None` while the system is out running a hook or update; records
    /// arriving in that window buffer in `pending`.
    system: Option<Box<dyn ReactiveSystem>>,
    pending: Vec<ChangeRecord>,
    last_update_ms: u64,
}

struct ReactiveEntry {
    name: &'static str,
    watch_added: ComponentMask,
    watch_modified: ComponentMask,
    watch_removed: ComponentMask,
    interval_ms: u64,
    batch: bool,
    state: Mutex<EntryState>,
}

impl ReactiveEntry {
    fn watches(&self, record: &ChangeRecord) -> bool {
        let mask = match record.kind {
            ChangeKind::Added => self.watch_added,
            ChangeKind::Modified => self.watch_modified,
            ChangeKind::Removed => self.watch_removed,
        };
        mask.contains(record.component)
    }
}

/// Owns every registered reactive system and routes change records to them.
///
/// Entries are held behind `Arc` so dispatch can snapshot the registry and
/// run user hooks without keeping the registry locked; a hook may register
/// or unregister systems freely.
#[derive(Default)]
pub struct ReactiveManager {
    entries: RwLock<IndexMap<u64, Arc<ReactiveEntry>>>,
    next_handle: AtomicU64,
}

impl ReactiveManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure and register a system. `now_ms` seeds the rate limiter so
    /// the first delivery waits one full interval.
    pub fn register(
        &self,
        world: &World,
        name: &'static str,
        mut system: Box<dyn ReactiveSystem>,
        now_ms: u64,
    ) -> ReactiveHandle {
        let mut config = ReactiveConfig::new(world);
        system.configure(&mut config);

        let entry = Arc::new(ReactiveEntry {
            name,
            watch_added: config.watch_added,
            watch_modified: config.watch_modified,
            watch_removed: config.watch_removed,
            interval_ms: config.interval_ms,
            batch: config.batch,
            state: Mutex::new(EntryState {
                system: Some(system),
                pending: Vec::new(),
                last_update_ms: now_ms,
            }),
        });

        let handle = ReactiveHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entries.write().insert(handle.0, entry);
        handle
    }

    /// Release the system behind `handle`. Returns whether it was registered.
    pub fn unregister(&self, handle: ReactiveHandle) -> bool {
        self.entries.write().shift_remove(&handle.0).is_some()
    }

    /// Route one change record: buffer it for batching entries, fire hooks
    /// immediately for the rest.
    pub fn dispatch(&self, record: &ChangeRecord) {
        for entry in self.snapshot() {
            if !entry.watches(record) {
                continue;
            }
            let mut state = entry.state.lock();
            if entry.batch {
                state.pending.push(*record);
                continue;
            }
            match state.system.take() {
                Some(mut system) => {
                    drop(state);
                    deliver(&entry, system.as_mut(), record);
                    entry.state.lock().system = Some(system);
                }
                // The system is out running its own hook or update; this
                // record is one of its own mutations. Buffer it for the
                // next interval.
                None => state.pending.push(*record),
            }
        }
    }

    /// Replay buffered records and run `reactive_update` for every entry
    /// whose interval has elapsed at `now_ms`.
    pub fn update(&self, world: &World, dt: f32, now_ms: u64) {
        for entry in self.snapshot() {
            let (mut system, pending) = {
                let mut state = entry.state.lock();
                if now_ms.saturating_sub(state.last_update_ms) < entry.interval_ms {
                    continue;
                }
                let Some(system) = state.system.take() else {
                    continue;
                };
                state.last_update_ms = now_ms;
                (system, std::mem::take(&mut state.pending))
            };

            // Records the replay itself produces buffer up for the next
            // interval.
            for record in &pending {
                deliver(&entry, system.as_mut(), record);
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                system.reactive_update(world, dt);
            }));
            if let Err(payload) = outcome {
                tracing::warn!(
                    system = entry.name,
                    "reactive update panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
            entry.state.lock().system = Some(system);
        }
    }

    /// Number of registered reactive systems.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no reactive systems are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<ReactiveEntry>> {
        self.entries.read().values().cloned().collect()
    }
}

/// Fire the hook matching `record.kind`, catching panics at the boundary.
fn deliver(entry: &ReactiveEntry, system: &mut dyn ReactiveSystem, record: &ChangeRecord) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match record.kind {
        ChangeKind::Added => system.on_component_added(record.entity, record.component),
        ChangeKind::Modified => system.on_component_modified(record.entity, record.component),
        ChangeKind::Removed => system.on_component_removed(record.entity, record.component),
    }));
    if let Err(payload) = outcome {
        tracing::warn!(
            system = entry.name,
            entity = %record.entity,
            component = %record.component,
            "reactive hook panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
