//! Component type registration and typed storage.
//!
//! Every component type used in the runtime is registered in a
//! [`ComponentRegistry`], which hands out a [`ComponentId`]. The id doubles
//! as the component's bit position in an archetype mask, so at most
//! [`MAX_COMPONENT_KINDS`] distinct component types can exist per world.
//!
//! Storage is one [`ComponentArray<T>`] per component type: a dense value
//! vector plus a parallel entity vector, with a sparse entity-index → slot
//! map. Removal swaps the last slot into the hole, so the dense vectors never
//! contain dead gaps and iteration touches live data only.
//!
//! Arrays are type-erased behind the [`ComponentStore`] trait so that tables
//! holding "every component array" can sweep an entity out of all of them
//! without knowing the concrete types. Typed access goes through a checked
//! [`Any`] downcast at the trait seam; there are no raw-pointer casts.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entity::Entity;
use crate::EcsError;

/// Maximum number of distinct component kinds per world.
///
/// Component ids are bit positions in a 128-bit archetype mask.
pub const MAX_COMPONENT_KINDS: usize = 128;

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
///
/// The inner value is the component's bit position in a
/// [`ComponentMask`](crate::archetype::ComponentMask).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    /// The mask bit position for this component.
    #[inline]
    pub fn bit(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique ID assigned at registration time.
    pub id: ComponentId,
    /// Short type name, captured for logs and diagnostics.
    pub name: &'static str,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
}

/// The unqualified name of `T` (`foo::bar::Position` -> `Position`).
pub fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentId`]s and their metadata.
///
/// Registration is get-or-register: registering the same Rust type twice
/// returns the existing id. Ids are assigned sequentially so they stay dense
/// and usable as mask bit positions.
#[derive(Debug)]
pub struct ComponentRegistry {
    /// TypeId -> ComponentId for dedup.
    by_type: HashMap<TypeId, ComponentId>,
    /// Indexed by ComponentId.0.
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            infos: Vec::new(),
        }
    }

    /// Register a component type, or fetch its existing id.
    ///
    /// # Errors
    ///
    /// [`EcsError::ComponentLimitExceeded`] once [`MAX_COMPONENT_KINDS`]
    /// distinct types have been registered.
    pub fn register<T: Send + Sync + 'static>(&mut self) -> Result<ComponentId, EcsError> {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            return Ok(existing);
        }
        if self.infos.len() >= MAX_COMPONENT_KINDS {
            return Err(EcsError::ComponentLimitExceeded {
                limit: MAX_COMPONENT_KINDS,
            });
        }

        let id = ComponentId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: short_type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: rust_type_id,
        });
        self.by_type.insert(rust_type_id, id);
        Ok(id)
    }

    /// Look up a component type by its Rust `TypeId`.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Get the [`ComponentInfo`] for a registered id.
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.0 as usize)
    }

    /// Iterate over all registered component infos in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ComponentArray
// ---------------------------------------------------------------------------

/// Dense storage for one component type.
///
/// `data[i]` belongs to `entities[i]`; `sparse` maps an entity *index* to its
/// dense slot. Entities without this component simply have no sparse entry.
/// The stored handle (not just the index) is compared on access, so a handle
/// left over from a destroyed-and-recycled slot never reads another entity's
/// data.
#[derive(Debug)]
pub struct ComponentArray<T> {
    /// Dense component values.
    data: Vec<T>,
    /// Owning entity per dense slot, parallel to `data`.
    entities: Vec<Entity>,
    /// Entity index -> dense slot.
    sparse: HashMap<u32, usize>,
}

impl<T> ComponentArray<T> {
    /// Create an empty array.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            entities: Vec::new(),
            sparse: HashMap::new(),
        }
    }

    /// Insert or replace `entity`'s component.
    ///
    /// Returns the previous value when `entity` already had one. A slot still
    /// occupied by a stale handle with the same index (a destroyed entity
    /// that was never swept) is reclaimed and its value dropped; `None` is
    /// returned in that case since the caller's entity had no component.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        if let Some(&slot) = self.sparse.get(&entity.index()) {
            let replaced = self.entities[slot] == entity;
            self.entities[slot] = entity;
            let old = std::mem::replace(&mut self.data[slot], value);
            return replaced.then_some(old);
        }
        let slot = self.data.len();
        self.data.push(value);
        self.entities.push(entity);
        self.sparse.insert(entity.index(), slot);
        None
    }

    /// Remove `entity`'s component, swapping the last dense slot into the
    /// hole and fixing the moved entity's sparse entry.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = *self.sparse.get(&entity.index())?;
        if self.entities[slot] != entity {
            return None;
        }
        self.sparse.remove(&entity.index());
        let value = self.data.swap_remove(slot);
        self.entities.swap_remove(slot);
        if slot < self.entities.len() {
            // The previously-last entry now lives at `slot`.
            let moved = self.entities[slot];
            self.sparse.insert(moved.index(), slot);
        }
        Some(value)
    }

    /// Shared access to `entity`'s component.
    pub fn get(&self, entity: Entity) -> Option<&T> {
        let slot = *self.sparse.get(&entity.index())?;
        (self.entities[slot] == entity).then(|| &self.data[slot])
    }

    /// Mutable access to `entity`'s component.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = *self.sparse.get(&entity.index())?;
        (self.entities[slot] == entity).then(|| &mut self.data[slot])
    }

    /// Whether `entity` currently has this component.
    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Number of stored components.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate `(entity, &component)` over the dense storage.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.data.iter())
    }

    /// Iterate `(entity, &mut component)` over the dense storage.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.data.iter_mut())
    }

    /// Drop every stored component.
    pub fn clear(&mut self) {
        self.data.clear();
        self.entities.clear();
        self.sparse.clear();
    }
}

impl<T> Default for ComponentArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ComponentStore -- type-erased array handle
// ---------------------------------------------------------------------------

/// Type-erased view of a [`TypedStore`], for uniform operations over "all
/// component arrays": the destroy sweep, length stats, and presence checks.
///
/// Typed access downcasts through [`as_any`](Self::as_any) to the concrete
/// [`TypedStore<T>`].
pub trait ComponentStore: Send + Sync {
    /// The registered id of the stored component type.
    fn component_id(&self) -> ComponentId;
    /// Short type name for diagnostics.
    fn name(&self) -> &'static str;
    /// Number of entities holding this component.
    fn len(&self) -> usize;
    /// Whether `entity` has this component.
    fn contains(&self, entity: Entity) -> bool;
    /// Detach `entity`'s component if present. Returns whether one existed.
    fn remove_entity(&self, entity: Entity) -> bool;
    /// Drop all stored components.
    fn clear(&self);
    /// Downcast seam for typed access.
    fn as_any(&self) -> &dyn Any;
}

/// The concrete store for component type `T`: a [`ComponentArray<T>`] behind
/// its own reader/writer lock, per the lock-per-table discipline.
pub struct TypedStore<T> {
    id: ComponentId,
    name: &'static str,
    array: RwLock<ComponentArray<T>>,
}

impl<T: Send + Sync + 'static> TypedStore<T> {
    /// Create an empty store for a registered component type.
    pub fn new(id: ComponentId) -> Self {
        Self {
            id,
            name: short_type_name::<T>(),
            array: RwLock::new(ComponentArray::new()),
        }
    }

    /// Lock the array for shared access.
    pub fn read(&self) -> RwLockReadGuard<'_, ComponentArray<T>> {
        self.array.read()
    }

    /// Lock the array for exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, ComponentArray<T>> {
        self.array.write()
    }
}

impl<T: Send + Sync + 'static> ComponentStore for TypedStore<T> {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.array.read().len()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.array.read().contains(entity)
    }

    fn remove_entity(&self, entity: Entity) -> bool {
        self.array.write().remove(entity).is_some()
    }

    fn clear(&self) {
        self.array.write().clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> fmt::Debug for TypedStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("len", &self.array.read().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentTables
// ---------------------------------------------------------------------------

/// The set of all component stores, keyed by [`ComponentId`].
///
/// Stores are shared (`Arc`) so a caller can clone one out, release the table
/// lock, and then lock the individual array it needs.
#[derive(Default)]
pub struct ComponentTables {
    stores: HashMap<ComponentId, std::sync::Arc<dyn ComponentStore>>,
}

impl ComponentTables {
    /// Create an empty table set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store for `id`, creating a typed store for `T` on first use.
    pub fn get_or_create<T: Send + Sync + 'static>(
        &mut self,
        id: ComponentId,
    ) -> std::sync::Arc<dyn ComponentStore> {
        self.stores
            .entry(id)
            .or_insert_with(|| std::sync::Arc::new(TypedStore::<T>::new(id)))
            .clone()
    }

    /// Get the store for `id` if one exists.
    pub fn get(&self, id: ComponentId) -> Option<std::sync::Arc<dyn ComponentStore>> {
        self.stores.get(&id).cloned()
    }

    /// Snapshot of every store, for sweeps over all arrays.
    pub fn all(&self) -> Vec<std::sync::Arc<dyn ComponentStore>> {
        self.stores.values().cloned().collect()
    }

    /// Number of component types with a store.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no stores exist yet.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl fmt::Debug for ComponentTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentTables")
            .field("stores", &self.stores.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    fn e(index: u32, generation: u32) -> Entity {
        Entity::new(index, generation)
    }

    // -- 1. Registry ----------------------------------------------------------

    #[test]
    fn register_and_lookup() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Pos>().unwrap();
        assert_eq!(reg.lookup::<Pos>(), Some(id));
        assert_eq!(reg.lookup::<Vel>(), None);
    }

    #[test]
    fn same_type_same_id() {
        let mut reg = ComponentRegistry::new();
        let id1 = reg.register::<Pos>().unwrap();
        let id2 = reg.register::<Pos>().unwrap();
        assert_eq!(id1, id2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn different_types_different_sequential_ids() {
        let mut reg = ComponentRegistry::new();
        let p = reg.register::<Pos>().unwrap();
        let v = reg.register::<Vel>().unwrap();
        assert_ne!(p, v);
        assert_eq!(p.bit(), 0);
        assert_eq!(v.bit(), 1);
    }

    #[test]
    fn info_correctness() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Pos>().unwrap();
        let info = reg.info(id).unwrap();
        assert_eq!(info.name, "Pos");
        assert_eq!(info.size, std::mem::size_of::<Pos>());
        assert_eq!(info.align, std::mem::align_of::<Pos>());
        assert_eq!(info.type_id, TypeId::of::<Pos>());
    }

    #[test]
    fn kind_limit_is_enforced() {
        // Registering one Rust type per kind would need 128 distinct types;
        // fill the info table directly and check the guard on the 129th.
        let mut reg = ComponentRegistry::new();
        for n in 0..MAX_COMPONENT_KINDS {
            reg.infos.push(ComponentInfo {
                id: ComponentId(n as u32),
                name: "synthetic",
                size: 0,
                align: 1,
                type_id: TypeId::of::<()>(),
            });
        }
        let err = reg.register::<Pos>().unwrap_err();
        assert!(matches!(
            err,
            EcsError::ComponentLimitExceeded {
                limit: MAX_COMPONENT_KINDS
            }
        ));
    }

    // -- 2. ComponentArray: insert / replace ----------------------------------

    #[test]
    fn insert_then_get() {
        let mut arr = ComponentArray::new();
        let a = e(0, 0);
        assert!(arr.insert(a, Pos { x: 1.0, y: 2.0 }).is_none());
        assert_eq!(arr.get(a), Some(&Pos { x: 1.0, y: 2.0 }));
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn insert_replaces_and_returns_old_value() {
        let mut arr = ComponentArray::new();
        let a = e(3, 1);
        arr.insert(a, Pos { x: 1.0, y: 1.0 });
        let old = arr.insert(a, Pos { x: 9.0, y: 9.0 });
        assert_eq!(old, Some(Pos { x: 1.0, y: 1.0 }));
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.get(a), Some(&Pos { x: 9.0, y: 9.0 }));
    }

    #[test]
    fn stale_occupant_is_reclaimed_not_reported_as_replace() {
        let mut arr = ComponentArray::new();
        let dead = e(5, 0);
        let recycled = e(5, 1); // same index, newer generation
        arr.insert(dead, Pos { x: 1.0, y: 1.0 });

        let old = arr.insert(recycled, Pos { x: 2.0, y: 2.0 });
        assert_eq!(old, None, "the stale occupant's value is not a replace");
        assert_eq!(arr.get(recycled), Some(&Pos { x: 2.0, y: 2.0 }));
        assert_eq!(arr.get(dead), None);
        assert_eq!(arr.len(), 1);
    }

    // -- 3. ComponentArray: remove / swap bookkeeping --------------------------

    #[test]
    fn remove_swaps_last_into_hole() {
        let mut arr = ComponentArray::new();
        let a = e(0, 0);
        let b = e(1, 0);
        let c = e(2, 0);
        arr.insert(a, Pos { x: 0.0, y: 0.0 });
        arr.insert(b, Pos { x: 1.0, y: 0.0 });
        arr.insert(c, Pos { x: 2.0, y: 0.0 });

        assert_eq!(arr.remove(a), Some(Pos { x: 0.0, y: 0.0 }));
        assert_eq!(arr.len(), 2);
        // The moved entity (c) is still reachable after taking a's slot.
        assert_eq!(arr.get(c), Some(&Pos { x: 2.0, y: 0.0 }));
        assert_eq!(arr.get(b), Some(&Pos { x: 1.0, y: 0.0 }));
        assert_eq!(arr.get(a), None);
    }

    #[test]
    fn remove_missing_returns_none() {
        let mut arr: ComponentArray<Pos> = ComponentArray::new();
        assert_eq!(arr.remove(e(0, 0)), None);
    }

    #[test]
    fn remove_with_stale_generation_is_refused() {
        let mut arr = ComponentArray::new();
        let live = e(4, 2);
        arr.insert(live, Pos { x: 1.0, y: 1.0 });
        assert_eq!(arr.remove(e(4, 1)), None);
        assert_eq!(arr.get(live), Some(&Pos { x: 1.0, y: 1.0 }));
    }

    #[test]
    fn iteration_touches_only_live_slots() {
        let mut arr = ComponentArray::new();
        let handles: Vec<Entity> = (0..10).map(|i| e(i, 0)).collect();
        for (i, &h) in handles.iter().enumerate() {
            arr.insert(h, Pos { x: i as f32, y: 0.0 });
        }
        for h in handles.iter().step_by(2) {
            arr.remove(*h);
        }
        let seen: Vec<Entity> = arr.iter().map(|(ent, _)| ent).collect();
        assert_eq!(seen.len(), 5);
        for (ent, pos) in arr.iter() {
            assert_eq!(pos.x, ent.index() as f32);
            assert_eq!(ent.index() % 2, 1);
        }
    }

    #[test]
    fn get_mut_mutates_in_place() {
        let mut arr = ComponentArray::new();
        let a = e(0, 0);
        arr.insert(a, Pos { x: 0.0, y: 0.0 });
        arr.get_mut(a).unwrap().x = 7.0;
        assert_eq!(arr.get(a), Some(&Pos { x: 7.0, y: 0.0 }));
    }

    // -- 4. Type-erased stores --------------------------------------------------

    #[test]
    fn store_sweep_removes_entity_from_all_arrays() {
        let mut tables = ComponentTables::new();
        let pos_id = ComponentId(0);
        let vel_id = ComponentId(1);
        let pos = tables.get_or_create::<Pos>(pos_id);
        let vel = tables.get_or_create::<Vel>(vel_id);

        let a = e(0, 0);
        pos.as_any()
            .downcast_ref::<TypedStore<Pos>>()
            .unwrap()
            .write()
            .insert(a, Pos { x: 1.0, y: 1.0 });
        vel.as_any()
            .downcast_ref::<TypedStore<Vel>>()
            .unwrap()
            .write()
            .insert(a, Vel { dx: 0.5, dy: 0.5 });

        let mut removed = 0;
        for store in tables.all() {
            if store.remove_entity(a) {
                removed += 1;
            }
        }
        assert_eq!(removed, 2);
        assert!(!pos.contains(a));
        assert!(!vel.contains(a));
    }

    #[test]
    fn get_or_create_returns_the_same_store() {
        let mut tables = ComponentTables::new();
        let id = ComponentId(0);
        let first = tables.get_or_create::<Pos>(id);
        let second = tables.get_or_create::<Pos>(id);
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn typed_downcast_rejects_wrong_type() {
        let mut tables = ComponentTables::new();
        let id = ComponentId(0);
        let store = tables.get_or_create::<Pos>(id);
        assert!(store.as_any().downcast_ref::<TypedStore<Vel>>().is_none());
        assert!(store.as_any().downcast_ref::<TypedStore<Pos>>().is_some());
    }
}
