//! Archetype bookkeeping for the ECS.
//!
//! An [`Archetype`] groups all entities that share the exact same set of
//! component types, identified by a [`ComponentMask`]. Component *values*
//! live in the typed arrays (see [`component`](crate::component)); the
//! archetype tracks membership only, so queries can skip entities whose mask
//! cannot match and so storage fragmentation can be measured.
//!
//! The [`ArchetypeManager`] owns the canonical archetype instances: there is
//! exactly one archetype per distinct mask, entities migrate between them as
//! components are added and removed, and removal swaps the last member into
//! the hole to keep the membership lists dense.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::component::ComponentId;
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// ComponentMask
// ---------------------------------------------------------------------------

/// Fixed-width bitset over component kinds.
///
/// Bit `i` is set when the entity has the component whose
/// [`ComponentId::bit`] is `i`. Width matches
/// [`MAX_COMPONENT_KINDS`](crate::component::MAX_COMPONENT_KINDS).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ComponentMask(u128);

impl ComponentMask {
    /// The mask with no bits set.
    pub const EMPTY: ComponentMask = ComponentMask(0);

    /// Build a mask from a set of component ids.
    pub fn from_components<I: IntoIterator<Item = ComponentId>>(ids: I) -> Self {
        let mut mask = Self::EMPTY;
        for id in ids {
            mask.set(id);
        }
        mask
    }

    /// Set the bit for `id`.
    #[inline]
    pub fn set(&mut self, id: ComponentId) {
        self.0 |= 1u128 << id.bit();
    }

    /// Clear the bit for `id`.
    #[inline]
    pub fn clear(&mut self, id: ComponentId) {
        self.0 &= !(1u128 << id.bit());
    }

    /// Whether the bit for `id` is set.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.0 & (1u128 << id.bit()) != 0
    }

    /// Whether every bit of `other` is also set in `self`.
    #[inline]
    pub fn contains_all(&self, other: ComponentMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `self` and `other` share any set bit.
    #[inline]
    pub fn intersects(&self, other: ComponentMask) -> bool {
        self.0 & other.0 != 0
    }

    /// A copy of `self` with `id`'s bit set.
    #[inline]
    pub fn with(mut self, id: ComponentId) -> Self {
        self.set(id);
        self
    }

    /// A copy of `self` with `id`'s bit cleared.
    #[inline]
    pub fn without(mut self, id: ComponentId) -> Self {
        self.clear(id);
        self
    }

    /// Number of set bits.
    #[inline]
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Whether no bits are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the set bits as [`ComponentId`]s, lowest bit first.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let bit = bits.trailing_zeros();
            bits &= bits - 1;
            Some(ComponentId(bit))
        })
    }

    /// The raw bit pattern.
    #[inline]
    pub fn bits(&self) -> u128 {
        self.0
    }
}

impl fmt::Debug for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentMask[")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id.bit())?;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// The set of entities sharing one exact component mask.
///
/// Membership is a dense `Vec<Entity>` plus an entity -> slot map; removal
/// swap-removes and fixes the moved member's slot.
#[derive(Debug)]
pub struct Archetype {
    mask: ComponentMask,
    entities: Vec<Entity>,
    slots: HashMap<Entity, usize>,
}

impl Archetype {
    fn new(mask: ComponentMask) -> Self {
        Self {
            mask,
            entities: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// The mask shared by every member.
    #[inline]
    pub fn mask(&self) -> ComponentMask {
        self.mask
    }

    /// Number of member entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The member entities, in storage order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Whether `entity` is a member.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.slots.contains_key(&entity)
    }

    fn insert(&mut self, entity: Entity) {
        if self.slots.contains_key(&entity) {
            return;
        }
        self.slots.insert(entity, self.entities.len());
        self.entities.push(entity);
    }

    fn remove(&mut self, entity: Entity) -> bool {
        let Some(slot) = self.slots.remove(&entity) else {
            return false;
        };
        self.entities.swap_remove(slot);
        if slot < self.entities.len() {
            let moved = self.entities[slot];
            self.slots.insert(moved, slot);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// ArchetypeManager
// ---------------------------------------------------------------------------

/// Aggregate counters over all archetypes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ArchetypeStats {
    /// Archetypes currently instantiated, including empty ones.
    pub archetype_count: usize,
    /// Archetypes with at least one member.
    pub non_empty_count: usize,
    /// Entities tracked across all archetypes.
    pub entity_count: usize,
    /// `non_empty_count / entity_count`, `0.0` when no entities exist.
    pub fragmentation: f64,
}

/// Owner of the canonical archetype instances.
///
/// One archetype exists per distinct mask. Entities enter the empty-mask
/// archetype at spawn and migrate as their component set changes, so every
/// tracked entity is a member of exactly one archetype at all times.
#[derive(Debug, Default)]
pub struct ArchetypeManager {
    /// Mask -> canonical archetype. Insertion-ordered so iteration and
    /// fragmentation reports are deterministic across runs.
    archetypes: IndexMap<ComponentMask, Archetype>,
    /// Entity -> its current mask.
    masks: HashMap<Entity, ComponentMask>,
}

impl ArchetypeManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking `entity` with no components (the empty-mask archetype).
    pub fn track(&mut self, entity: Entity) {
        self.place(entity, ComponentMask::EMPTY);
    }

    /// Stop tracking `entity`, removing it from its archetype.
    ///
    /// Returns the mask it held, or `None` if it was not tracked.
    pub fn untrack(&mut self, entity: Entity) -> Option<ComponentMask> {
        let mask = self.masks.remove(&entity)?;
        if let Some(arch) = self.archetypes.get_mut(&mask) {
            arch.remove(entity);
        }
        Some(mask)
    }

    /// The mask `entity` currently holds.
    pub fn mask_of(&self, entity: Entity) -> Option<ComponentMask> {
        self.masks.get(&entity).copied()
    }

    /// Record that `entity` gained component `id`, migrating it to the
    /// matching archetype. Untracked entities start from the empty mask.
    pub fn component_added(&mut self, entity: Entity, id: ComponentId) -> ComponentMask {
        let current = self.masks.get(&entity).copied().unwrap_or(ComponentMask::EMPTY);
        let next = current.with(id);
        if next != current {
            self.migrate(entity, current, next);
        }
        next
    }

    /// Record that `entity` lost component `id`.
    pub fn component_removed(&mut self, entity: Entity, id: ComponentId) -> ComponentMask {
        let current = self.masks.get(&entity).copied().unwrap_or(ComponentMask::EMPTY);
        let next = current.without(id);
        if next != current {
            self.migrate(entity, current, next);
        }
        next
    }

    fn migrate(&mut self, entity: Entity, from: ComponentMask, to: ComponentMask) {
        if let Some(arch) = self.archetypes.get_mut(&from) {
            arch.remove(entity);
        }
        self.place(entity, to);
    }

    fn place(&mut self, entity: Entity, mask: ComponentMask) {
        self.archetypes
            .entry(mask)
            .or_insert_with(|| Archetype::new(mask))
            .insert(entity);
        self.masks.insert(entity, mask);
    }

    /// The canonical archetype for `mask`, if one has been instantiated.
    pub fn archetype(&self, mask: ComponentMask) -> Option<&Archetype> {
        self.archetypes.get(&mask)
    }

    /// Iterate all archetypes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.values()
    }

    /// Iterate the archetypes whose mask contains every bit of `required`.
    pub fn matching(&self, required: ComponentMask) -> impl Iterator<Item = &Archetype> {
        self.archetypes
            .values()
            .filter(move |arch| arch.mask.contains_all(required))
    }

    /// Number of instantiated archetypes, empty ones included.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Whether no archetypes exist.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Number of tracked entities.
    pub fn entity_count(&self) -> usize {
        self.masks.len()
    }

    /// Storage fragmentation: non-empty archetypes per tracked entity.
    ///
    /// `0.0` for an empty world; approaches `1.0` when every entity has its
    /// own distinct component set.
    pub fn fragmentation(&self) -> f64 {
        if self.masks.is_empty() {
            return 0.0;
        }
        let non_empty = self.archetypes.values().filter(|a| !a.is_empty()).count();
        non_empty as f64 / self.masks.len() as f64
    }

    /// Aggregate counters for diagnostics.
    pub fn stats(&self) -> ArchetypeStats {
        let non_empty = self.archetypes.values().filter(|a| !a.is_empty()).count();
        ArchetypeStats {
            archetype_count: self.archetypes.len(),
            non_empty_count: non_empty,
            entity_count: self.masks.len(),
            fragmentation: self.fragmentation(),
        }
    }

    /// Drop archetypes that no longer have members. Returns how many were
    /// removed. Canonical instances are recreated on demand, so pruning is
    /// safe at any point.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.archetypes.len();
        self.archetypes.retain(|_, arch| !arch.is_empty());
        before - self.archetypes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
