//! The world facade: one object owning every table and manager.
//!
//! A [`World`] is an explicitly constructed context; two worlds never share
//! state, so test suites and embedders can run as many as they like side by
//! side. Every operation takes `&self`: each table sits behind its own
//! reader/writer lock, giving unlimited concurrent readers and exclusive
//! writers per table.
//!
//! # Lock boundaries
//!
//! Within one table, operations are linearizable. Across tables there is no
//! ordering guarantee: an operation touching several tables (say, attaching
//! a component, which writes the component array, the archetype table, and
//! the change history) may be observed partially applied by a concurrent
//! reader or a change subscriber. Callbacks run with no table locks held, so
//! they may freely read the world; what they observe is each table's own
//! latest state, not a cross-table snapshot.
//!
//! # Time
//!
//! The world keeps a logical clock in milliseconds, advanced by
//! [`update`](World::update) from the `dt` it is handed. Change-record
//! timestamps, LOD refresh, and reactive rate limiting all read this clock,
//! which makes time-dependent behavior fully deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use veldt_ecs::archetype::{ArchetypeManager, ArchetypeStats, ComponentMask};
use veldt_ecs::change::{ChangeKind, ChangeRecord, ChangeTracker, SubscriptionId};
use veldt_ecs::component::{
    short_type_name, ComponentArray, ComponentId, ComponentRegistry, ComponentStore,
    ComponentTables, TypedStore,
};
use veldt_ecs::dependency::ComponentDependencyManager;
use veldt_ecs::entity::{Entity, EntityManager};
use veldt_ecs::pool::{BlockPool, MemoryStats, PoolManager, PoolStats};
use veldt_ecs::relation::RelationshipTable;
use veldt_ecs::EcsError;

use crate::config::WorldConfig;
use crate::lod::{LodLevel, LodManager};
use crate::query::EntityQuery;
use crate::reactive::{ReactiveHandle, ReactiveManager, ReactiveSystem};
use crate::region::{RegionCoords, SpatialTable, Vec3};
use crate::system::{System, SystemScheduler, SystemStats};
use crate::WorldError;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entities, components, archetypes, spatial regions, LOD, change tracking,
/// systems, and memory pools under one roof.
pub struct World {
    config: WorldConfig,
    entities: RwLock<EntityManager>,
    registry: RwLock<ComponentRegistry>,
    tables: RwLock<ComponentTables>,
    archetypes: RwLock<ArchetypeManager>,
    dependencies: RwLock<ComponentDependencyManager>,
    relations: RwLock<RelationshipTable>,
    spatial: RwLock<SpatialTable>,
    lod: RwLock<LodManager>,
    tracker: ChangeTracker,
    reactive: ReactiveManager,
    scheduler: RwLock<SystemScheduler>,
    pools: PoolManager,
    clock_ms: AtomicU64,
}

impl World {
    /// Create a world with [`WorldConfig::default`].
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world from `config`.
    ///
    /// # Panics
    ///
    /// Panics when the config fails [`WorldConfig::validate`].
    pub fn with_config(config: WorldConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid world config: {e}");
        }
        Self {
            entities: RwLock::new(EntityManager::with_capacity(config.max_entities)),
            registry: RwLock::new(ComponentRegistry::new()),
            tables: RwLock::new(ComponentTables::new()),
            archetypes: RwLock::new(ArchetypeManager::new()),
            dependencies: RwLock::new(ComponentDependencyManager::new()),
            relations: RwLock::new(RelationshipTable::new()),
            spatial: RwLock::new(SpatialTable::new(
                config.region_cell_size,
                config.active_bounds_min,
                config.active_bounds_max,
            )),
            lod: RwLock::new(LodManager::new(
                config.lod_high_distance,
                config.lod_medium_distance,
                config.lod_low_distance,
                config.lod_refresh_hz,
            )),
            tracker: ChangeTracker::with_capacity(config.change_history_capacity),
            reactive: ReactiveManager::new(),
            scheduler: RwLock::new(SystemScheduler::new()),
            pools: PoolManager::with_blocks_per_chunk(config.blocks_per_chunk),
            clock_ms: AtomicU64::new(0),
            config,
        }
    }

    /// The configuration this world was built from.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Milliseconds of simulated time elapsed so far.
    pub fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::Relaxed)
    }

    // -- entities ---------------------------------------------------------------

    /// Create a fresh entity with no components.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityCapacityExceeded`] once `max_entities` are live.
    pub fn create_entity(&self) -> Result<Entity, WorldError> {
        let entity = self.entities.write().create().map_err(|e| {
            tracing::warn!(capacity = self.config.max_entities, "entity capacity exceeded");
            e
        })?;
        self.archetypes.write().track(entity);
        Ok(entity)
    }

    /// Destroy `entity`: detach its components dependents-first, clear its
    /// archetype, relationships, position, and LOD entries, then retire the
    /// handle. Returns `false` for a stale handle (idempotent).
    pub fn destroy_entity(&self, entity: Entity) -> bool {
        if !self.entities.read().is_valid(entity) {
            return false;
        }

        let mask = self
            .archetypes
            .read()
            .mask_of(entity)
            .unwrap_or(ComponentMask::EMPTY);
        let order = self.dependencies.read().removal_order(mask);
        let mut detached: Vec<ComponentId> = Vec::with_capacity(order.len());
        for id in order {
            let store = self.tables.read().get(id);
            if let Some(store) = store {
                if store.remove_entity(entity) {
                    detached.push(id);
                }
            }
        }

        self.archetypes.write().untrack(entity);
        self.relations.write().sever_all(entity);
        self.spatial.write().remove_entity(entity);
        self.lod.write().invalidate(entity);
        self.entities.write().destroy(entity);

        let now = self.now_ms();
        for id in detached {
            self.emit(entity, id, ChangeKind::Removed, now);
        }
        true
    }

    /// Whether `entity` is live and its generation current.
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.entities.read().is_valid(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Snapshot of every live entity handle.
    pub fn live_entities(&self) -> Vec<Entity> {
        self.entities.read().live_entities().collect()
    }

    // -- components ----------------------------------------------------------------

    /// Register component type `T`, creating its store on first use.
    /// Idempotent: re-registering returns the existing id.
    ///
    /// # Errors
    ///
    /// [`EcsError::ComponentLimitExceeded`] past the mask width.
    pub fn register_component<T: Send + Sync + 'static>(&self) -> Result<ComponentId, WorldError> {
        let id = self.registry.write().register::<T>()?;
        self.tables.write().get_or_create::<T>(id);
        Ok(id)
    }

    /// The id registered for `T`, if any.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.registry.read().lookup::<T>()
    }

    /// The short type name registered for `id`, if any.
    pub fn component_name(&self, id: ComponentId) -> Option<&'static str> {
        self.registry.read().info(id).map(|info| info.name)
    }

    /// Attach `value` to `entity`, registering `T` on first use.
    ///
    /// A first attach moves the entity to the archetype including `T` and
    /// records `Added`; overwriting an existing value records `Modified`.
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleEntity`] for a dead handle,
    /// [`EcsError::ComponentLimitExceeded`] past the mask width.
    pub fn add_component<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        if !self.is_valid(entity) {
            return Err(EcsError::StaleEntity(entity).into());
        }
        let id = self.register_component::<T>()?;
        let store = self.tables.write().get_or_create::<T>(id);
        let replaced = typed::<T>(store.as_ref()).write().insert(entity, value);

        let kind = if replaced.is_none() {
            self.archetypes.write().component_added(entity, id);
            ChangeKind::Added
        } else {
            ChangeKind::Modified
        };
        self.emit(entity, id, kind, self.now_ms());
        Ok(())
    }

    /// A clone of `entity`'s `T`.
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleEntity`] for a dead handle,
    /// [`EcsError::MissingComponent`] when the entity does not carry `T`.
    pub fn get_component<T: Clone + Send + Sync + 'static>(
        &self,
        entity: Entity,
    ) -> Result<T, WorldError> {
        self.read_component(entity, |value: &T| value.clone())
    }

    /// Run `f` over a shared borrow of `entity`'s `T`, under the array lock.
    ///
    /// # Errors
    ///
    /// Same conditions as [`get_component`](Self::get_component).
    pub fn read_component<T: Send + Sync + 'static, R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, WorldError> {
        if !self.is_valid(entity) {
            return Err(EcsError::StaleEntity(entity).into());
        }
        let id = self
            .component_id::<T>()
            .ok_or_else(|| missing::<T>(entity))?;
        let store = self
            .tables
            .read()
            .get(id)
            .ok_or_else(|| missing::<T>(entity))?;
        let array = typed::<T>(store.as_ref()).read();
        let value = array.get(entity).ok_or_else(|| missing::<T>(entity))?;
        Ok(f(value))
    }

    /// Run `f` over an exclusive borrow of `entity`'s `T` and record
    /// `Modified` once `f` returns.
    ///
    /// # Errors
    ///
    /// Same conditions as [`get_component`](Self::get_component).
    pub fn write_component<T: Send + Sync + 'static, R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, WorldError> {
        if !self.is_valid(entity) {
            return Err(EcsError::StaleEntity(entity).into());
        }
        let id = self
            .component_id::<T>()
            .ok_or_else(|| missing::<T>(entity))?;
        let store = self
            .tables
            .read()
            .get(id)
            .ok_or_else(|| missing::<T>(entity))?;
        let result = {
            let typed = typed::<T>(store.as_ref());
            let mut array = typed.write();
            let value = array.get_mut(entity).ok_or_else(|| missing::<T>(entity))?;
            f(value)
        };
        self.emit(entity, id, ChangeKind::Modified, self.now_ms());
        Ok(result)
    }

    /// Detach `T` from `entity`, moving it to the archetype without `T` and
    /// recording `Removed`. Returns `false` when the entity is stale or does
    /// not carry `T` (idempotent).
    ///
    /// # Errors
    ///
    /// [`EcsError::DependencyViolation`] when a component still on the
    /// entity declares a requirement on `T`.
    pub fn remove_component<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
    ) -> Result<bool, WorldError> {
        if !self.is_valid(entity) {
            return Ok(false);
        }
        let Some(id) = self.component_id::<T>() else {
            return Ok(false);
        };
        let mask = self
            .archetypes
            .read()
            .mask_of(entity)
            .unwrap_or(ComponentMask::EMPTY);
        if !mask.contains(id) {
            return Ok(false);
        }
        {
            let registry = self.registry.read();
            self.dependencies
                .read()
                .check_removal(entity, id, mask, &registry)?;
        }

        let Some(store) = self.tables.read().get(id) else {
            return Ok(false);
        };
        if !store.remove_entity(entity) {
            return Ok(false);
        }
        self.archetypes.write().component_removed(entity, id);
        self.emit(entity, id, ChangeKind::Removed, self.now_ms());
        Ok(true)
    }

    /// Whether `entity` currently carries `T`.
    pub fn has_component<T: 'static>(&self, entity: Entity) -> bool {
        match self.component_id::<T>() {
            Some(id) => self
                .archetypes
                .read()
                .mask_of(entity)
                .is_some_and(|mask| mask.contains(id)),
            None => false,
        }
    }

    /// The ids of every component `entity` carries, ascending.
    pub fn component_ids_of(&self, entity: Entity) -> Vec<ComponentId> {
        self.archetypes
            .read()
            .mask_of(entity)
            .map(|mask| mask.iter().collect())
            .unwrap_or_default()
    }

    /// Record `Modified` for an in-place mutation done outside
    /// [`write_component`](Self::write_component), e.g. through
    /// [`for_each_mut`](Self::for_each_mut).
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleEntity`] for a dead handle,
    /// [`EcsError::MissingComponent`] when the entity does not carry `T`.
    pub fn notify_component_modified<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
    ) -> Result<(), WorldError> {
        if !self.is_valid(entity) {
            return Err(EcsError::StaleEntity(entity).into());
        }
        let id = self
            .component_id::<T>()
            .filter(|_| self.has_component::<T>(entity))
            .ok_or_else(|| missing::<T>(entity))?;
        self.emit(entity, id, ChangeKind::Modified, self.now_ms());
        Ok(())
    }

    // -- component dependencies -------------------------------------------------------

    /// Declare that component `T` requires component `D` on the same entity.
    /// Removal of `D` is refused while `T` is present, and entity teardown
    /// detaches `T` first.
    ///
    /// # Errors
    ///
    /// [`EcsError::DependencyCycle`] when the declaration closes a loop; the
    /// graph is left unchanged.
    pub fn declare_component_dependency<T, D>(&self) -> Result<(), WorldError>
    where
        T: Send + Sync + 'static,
        D: Send + Sync + 'static,
    {
        let dependent = self.register_component::<T>()?;
        let dependency = self.register_component::<D>()?;
        let registry = self.registry.read();
        self.dependencies
            .write()
            .declare(dependent, dependency, &registry)?;
        Ok(())
    }

    /// Retract a declared requirement. Returns whether it existed.
    pub fn undeclare_component_dependency<T: 'static, D: 'static>(&self) -> bool {
        let (Some(dependent), Some(dependency)) =
            (self.component_id::<T>(), self.component_id::<D>())
        else {
            return false;
        };
        self.dependencies.write().undeclare(dependent, dependency)
    }

    /// Declared components ordered dependencies-first.
    ///
    /// # Errors
    ///
    /// [`EcsError::DependencyCycle`] when the graph holds a cycle.
    pub fn component_update_order(&self) -> Result<Vec<ComponentId>, WorldError> {
        let registry = self.registry.read();
        Ok(self.dependencies.read().get_update_order(&registry)?)
    }

    // -- iteration ----------------------------------------------------------------

    /// Visit every `(entity, &T)` pair. Bulk iteration records no changes.
    ///
    /// `f` runs under the `T` array lock; re-entering the same table through
    /// the world from inside `f` deadlocks.
    pub fn for_each<T: Send + Sync + 'static>(&self, mut f: impl FnMut(Entity, &T)) {
        let Some(store) = self.store_of::<T>() else {
            return;
        };
        let array = typed::<T>(store.as_ref()).read();
        for (entity, value) in array.iter() {
            f(entity, value);
        }
    }

    /// Visit every `(entity, &mut T)` pair. Bulk iteration records no
    /// changes; call [`notify_component_modified`](Self::notify_component_modified)
    /// for entities that need one. The same lock rule as
    /// [`for_each`](Self::for_each) applies, with the array locked
    /// exclusively.
    pub fn for_each_mut<T: Send + Sync + 'static>(&self, mut f: impl FnMut(Entity, &mut T)) {
        let Some(store) = self.store_of::<T>() else {
            return;
        };
        let typed = typed::<T>(store.as_ref());
        let mut array = typed.write();
        for (entity, value) in array.iter_mut() {
            f(entity, value);
        }
    }

    /// Visit every entity carrying both `A` and `B`. Both array locks are
    /// held while `f` runs.
    pub fn for_each2<A, B>(&self, mut f: impl FnMut(Entity, &A, &B))
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let (Some(a_store), Some(b_store)) = (self.store_of::<A>(), self.store_of::<B>()) else {
            return;
        };
        let a_typed = typed::<A>(a_store.as_ref());
        let b_typed = typed::<B>(b_store.as_ref());
        // Array locks nest in component-id order so concurrent pair
        // iterations cannot deadlock each other.
        if a_typed.component_id().bit() <= b_typed.component_id().bit() {
            let a = a_typed.read();
            let b = b_typed.read();
            iter_pairs(&a, &b, |entity, va, vb| f(entity, va, vb));
        } else {
            let b = b_typed.read();
            let a = a_typed.read();
            iter_pairs(&a, &b, |entity, va, vb| f(entity, va, vb));
        }
    }

    /// Visit every entity carrying both `A` and `B`, with `A` borrowed
    /// exclusively. Records no changes.
    pub fn for_each2_mut<A, B>(&self, mut f: impl FnMut(Entity, &mut A, &B))
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let (Some(a_store), Some(b_store)) = (self.store_of::<A>(), self.store_of::<B>()) else {
            return;
        };
        let a_typed = typed::<A>(a_store.as_ref());
        let b_typed = typed::<B>(b_store.as_ref());
        if a_typed.component_id().bit() <= b_typed.component_id().bit() {
            let mut a = a_typed.write();
            let b = b_typed.read();
            iter_pairs_mut(&mut a, &b, |entity, va, vb| f(entity, va, vb));
        } else {
            let b = b_typed.read();
            let mut a = a_typed.write();
            iter_pairs_mut(&mut a, &b, |entity, va, vb| f(entity, va, vb));
        }
    }

    fn store_of<T: 'static>(&self) -> Option<Arc<dyn ComponentStore>> {
        let id = self.component_id::<T>()?;
        self.tables.read().get(id)
    }

    // -- queries ---------------------------------------------------------------------

    /// Start building a filtered entity query over this world.
    pub fn create_query(&self) -> EntityQuery<'_> {
        EntityQuery::new(self)
    }

    /// The component mask of `entity`'s archetype.
    pub fn mask_of(&self, entity: Entity) -> Option<ComponentMask> {
        self.archetypes.read().mask_of(entity)
    }

    // -- systems ------------------------------------------------------------------------

    /// Register `system` under its concrete type and run its `init`.
    ///
    /// # Errors
    ///
    /// [`WorldError::DuplicateSystem`] when a system of the same type is
    /// already registered.
    pub fn add_system<S: System + 'static>(&self, system: S) -> Result<(), WorldError> {
        let id = self.scheduler.write().register(system)?;
        self.scheduler.read().init_one(id, self);
        Ok(())
    }

    /// Declare that system `S` runs after system `D` each tick.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownSystem`] when either side is unregistered;
    /// [`WorldError::SystemCycle`] when the edge would close a loop.
    pub fn add_system_dependency<S: 'static, D: 'static>(&self) -> Result<(), WorldError> {
        self.scheduler.write().add_dependency::<S, D>()
    }

    /// Remove the system of type `S`, running its `shutdown`. Returns
    /// whether it was registered.
    pub fn remove_system<S: 'static>(&self) -> bool {
        let removed = self.scheduler.write().remove::<S>();
        match removed {
            Some(mut system) => {
                system.shutdown(self);
                true
            }
            None => false,
        }
    }

    /// Whether a system of type `S` is registered.
    pub fn has_system<S: 'static>(&self) -> bool {
        self.scheduler.read().contains::<S>()
    }

    /// One tick: advance the world clock by `dt` seconds, run every system
    /// in dependency order, then give reactive systems their scheduled
    /// updates. One clock sample covers the whole tick.
    ///
    /// # Panics
    ///
    /// Panics when `dt` is negative or not finite.
    pub fn update(&self, dt: f32) {
        let now = self.advance_clock(dt);
        self.scheduler.read().update_all(self, dt);
        self.reactive.update(self, dt, now);
    }

    /// One tick with systems split over up to `thread_count` workers.
    ///
    /// The ordered system list is cut into contiguous slices; slices run
    /// concurrently and are not checked for independence. See
    /// [`SystemScheduler::update_parallel`].
    ///
    /// # Panics
    ///
    /// Panics when `dt` is negative or not finite.
    pub fn update_parallel(&self, dt: f32, thread_count: usize) {
        let now = self.advance_clock(dt);
        self.scheduler
            .read()
            .update_parallel(self, dt, thread_count);
        self.reactive.update(self, dt, now);
    }

    /// Run `shutdown` for every system in reverse execution order and drop
    /// them all.
    pub fn shutdown(&self) {
        let drained = self.scheduler.write().drain_reversed();
        for mut system in drained {
            system.shutdown(self);
        }
    }

    /// Timing stats per system, in execution order.
    pub fn system_stats(&self) -> Vec<(&'static str, SystemStats)> {
        self.scheduler.read().system_stats()
    }

    fn advance_clock(&self, dt: f32) -> u64 {
        assert!(
            dt >= 0.0 && dt.is_finite(),
            "dt must be non-negative and finite, got {dt}"
        );
        let dt_ms = (f64::from(dt) * 1000.0).round() as u64;
        self.clock_ms.fetch_add(dt_ms, Ordering::Relaxed) + dt_ms
    }

    // -- reactive systems --------------------------------------------------------------

    /// Configure and register a reactive system. The returned handle is the
    /// only way to release it.
    pub fn add_reactive_system<S: ReactiveSystem + 'static>(&self, system: S) -> ReactiveHandle {
        self.reactive
            .register(self, short_type_name::<S>(), Box::new(system), self.now_ms())
    }

    /// Release a reactive system. Returns whether the handle was live.
    pub fn remove_reactive_system(&self, handle: ReactiveHandle) -> bool {
        self.reactive.unregister(handle)
    }

    /// Number of registered reactive systems.
    pub fn reactive_system_count(&self) -> usize {
        self.reactive.len()
    }

    // -- change tracking -----------------------------------------------------------------

    /// Subscribe a callback to change records, optionally filtered to one
    /// component. The callback runs synchronously at the mutation site with
    /// no table locks held.
    pub fn subscribe_changes<F>(&self, filter: Option<ComponentId>, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeRecord) + Send + Sync + 'static,
    {
        self.tracker.subscribe(filter, callback)
    }

    /// Release a change subscription. Returns whether the token was live.
    pub fn unsubscribe_changes(&self, id: SubscriptionId) -> bool {
        self.tracker.unsubscribe(id)
    }

    /// Number of change records currently retained.
    pub fn change_history_len(&self) -> usize {
        self.tracker.history_len()
    }

    /// The most recent `n` change records, oldest first.
    pub fn recent_changes(&self, n: usize) -> Vec<ChangeRecord> {
        self.tracker.recent(n)
    }

    /// Every retained record touching `entity`, oldest first.
    pub fn changes_for_entity(&self, entity: Entity) -> Vec<ChangeRecord> {
        self.tracker.records_for(entity)
    }

    /// Every retained record for component `id`, oldest first.
    pub fn changes_for_component(&self, id: ComponentId) -> Vec<ChangeRecord> {
        self.tracker.records_for_component(id)
    }

    /// Every retained record stamped at or after `timestamp_ms`.
    pub fn changes_since(&self, timestamp_ms: u64) -> Vec<ChangeRecord> {
        self.tracker.changes_since(timestamp_ms)
    }

    /// Drop the retained history. Subscriptions are unaffected.
    pub fn clear_change_history(&self) {
        self.tracker.clear_history()
    }

    fn emit(&self, entity: Entity, component: ComponentId, kind: ChangeKind, now_ms: u64) {
        let record = ChangeRecord {
            entity,
            component,
            kind,
            timestamp_ms: now_ms,
        };
        self.tracker.record(record);
        self.reactive.dispatch(&record);
    }

    // -- spatial ------------------------------------------------------------------------

    /// Place `entity` at `pos`, updating its region membership. Returns the
    /// region it now occupies.
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleEntity`] for a dead handle.
    pub fn set_entity_position(&self, entity: Entity, pos: Vec3) -> Result<RegionCoords, WorldError> {
        if !self.is_valid(entity) {
            return Err(EcsError::StaleEntity(entity).into());
        }
        Ok(self.spatial.write().set_entity_position(entity, pos))
    }

    /// The last position given to [`set_entity_position`](Self::set_entity_position).
    pub fn entity_position(&self, entity: Entity) -> Option<Vec3> {
        self.spatial.read().position_of(entity)
    }

    /// The region currently holding `entity`.
    pub fn entity_region(&self, entity: Entity) -> Option<RegionCoords> {
        self.spatial.read().region_coords_of(entity)
    }

    /// The entities occupying the region at `(x, y, z)` grid coordinates.
    pub fn entities_in_region(&self, x: i32, y: i32, z: i32) -> Vec<Entity> {
        self.spatial
            .read()
            .entities_in(RegionCoords::new(x, y, z))
            .collect()
    }

    /// Number of regions currently materialized.
    pub fn region_count(&self) -> usize {
        self.spatial.read().region_count()
    }

    /// Number of materialized regions inside the active bounds.
    pub fn active_region_count(&self) -> usize {
        self.spatial.read().active_region_count()
    }

    /// Replace the active bounds. Takes effect at the next cleanup pass.
    ///
    /// # Panics
    ///
    /// Panics when the bounds are inverted on any axis.
    pub fn set_active_region_bounds(&self, min: Vec3, max: Vec3) {
        self.spatial.write().set_active_bounds(min, max);
    }

    /// Reconcile regions against the active bounds: delete empty
    /// out-of-bounds regions, deactivate occupied ones, reactivate the rest.
    /// Returns `(removed, deactivated)` counts.
    pub fn cleanup_inactive_regions(&self) -> (usize, usize) {
        self.spatial.write().cleanup_inactive_regions()
    }

    // -- level of detail -------------------------------------------------------------------

    /// Move the observer that LOD distances are measured from. Invalidates
    /// every cached classification.
    pub fn set_observer_position(&self, pos: Vec3) {
        self.lod.write().set_observer_position(pos);
    }

    /// Current observer position.
    pub fn observer_position(&self) -> Vec3 {
        self.lod.read().observer_position()
    }

    /// Replace the LOD thresholds.
    ///
    /// # Errors
    ///
    /// [`WorldError::InvalidLodDistances`] when the triple is not strictly
    /// ascending from zero.
    pub fn set_lod_distances(&self, high: f32, medium: f32, low: f32) -> Result<(), WorldError> {
        self.lod.write().set_distances(high, medium, low)
    }

    /// Classify `entity` against the observer at the current clock. `None`
    /// for entities without a tracked position.
    pub fn lod_of(&self, entity: Entity) -> Option<LodLevel> {
        let pos = self.spatial.read().position_of(entity)?;
        Some(self.lod.write().calculate_lod(entity, pos, self.now_ms()))
    }

    // -- relationships -----------------------------------------------------------------------

    /// Make `parent` the single parent of `child`, replacing any previous
    /// link. Returns `false` when `child == parent` (refused).
    ///
    /// # Errors
    ///
    /// [`EcsError::StaleEntity`] when either handle is dead.
    pub fn set_parent(&self, child: Entity, parent: Entity) -> Result<bool, WorldError> {
        for handle in [child, parent] {
            if !self.is_valid(handle) {
                return Err(EcsError::StaleEntity(handle).into());
            }
        }
        Ok(self.relations.write().set_parent(child, parent))
    }

    /// Unlink `child` from its parent, returning the former parent.
    pub fn remove_parent(&self, child: Entity) -> Option<Entity> {
        self.relations.write().remove_parent(child)
    }

    /// The parent of `entity`, if linked.
    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        self.relations.read().parent_of(entity)
    }

    /// The children of `entity`, in link order.
    pub fn children_of(&self, entity: Entity) -> Vec<Entity> {
        self.relations.read().children_of(entity).collect()
    }

    // -- memory pools ----------------------------------------------------------------------------

    /// The pool serving blocks sized and aligned for `T`.
    pub fn pool_of<T>(&self) -> Arc<Mutex<BlockPool>> {
        self.pools.pool_of::<T>()
    }

    /// The pool serving blocks of the given `size` and `align`.
    pub fn pool_for(&self, size: usize, align: usize) -> Arc<Mutex<BlockPool>> {
        self.pools.pool_for(size, align)
    }

    /// Release every fully free chunk across all pools. Returns the number
    /// of chunks released.
    pub fn compact_pools(&self) -> usize {
        self.pools.compact_all()
    }

    /// Aggregate block and byte counts across all pools.
    pub fn memory_stats(&self) -> MemoryStats {
        self.pools.memory_stats()
    }

    /// Per-pool stats, sorted by block size.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.pool_stats()
    }

    // -- archetype diagnostics --------------------------------------------------------------------

    /// Number of distinct archetypes, including empty ones.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.read().len()
    }

    /// Number of entities in the archetype for `mask`, if it has ever been
    /// instantiated.
    pub fn archetype_population(&self, mask: ComponentMask) -> Option<usize> {
        self.archetypes.read().archetype(mask).map(|a| a.len())
    }

    /// Archetype population counters.
    pub fn archetype_stats(&self) -> ArchetypeStats {
        self.archetypes.read().stats()
    }

    /// Non-empty archetypes per live entity; 0 is perfectly packed.
    pub fn archetype_fragmentation(&self) -> f64 {
        self.archetypes.read().fragmentation()
    }

    /// Drop archetypes with no entities. Returns how many were dropped.
    pub fn remove_empty_archetypes(&self) -> usize {
        self.archetypes.write().prune_empty()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Downcast a store to its typed form. The registry maps each Rust type to
/// exactly one id, so a mismatch is unreachable.
fn typed<T: Send + Sync + 'static>(store: &dyn ComponentStore) -> &TypedStore<T> {
    store
        .as_any()
        .downcast_ref::<TypedStore<T>>()
        .expect("component store type mismatch")
}

fn missing<T>(entity: Entity) -> WorldError {
    EcsError::MissingComponent {
        entity,
        component: short_type_name::<T>(),
    }
    .into()
}

fn iter_pairs<A, B>(a: &ComponentArray<A>, b: &ComponentArray<B>, mut f: impl FnMut(Entity, &A, &B)) {
    for (entity, va) in a.iter() {
        if let Some(vb) = b.get(entity) {
            f(entity, va, vb);
        }
    }
}

fn iter_pairs_mut<A, B>(
    a: &mut ComponentArray<A>,
    b: &ComponentArray<B>,
    mut f: impl FnMut(Entity, &mut A, &B),
) {
    for (entity, va) in a.iter_mut() {
        if let Some(vb) = b.get(entity) {
            f(entity, va, vb);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
