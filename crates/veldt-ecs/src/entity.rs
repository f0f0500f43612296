//! Entity identifiers and the generational slot arena.
//!
//! An [`Entity`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and an *index* in the low 32 bits. A handle is valid only
//! while the slot at its index is alive and still carries the same
//! generation, so destroying an entity invalidates every outstanding handle
//! to it in O(1) without any scanning.
//!
//! The generation for an index is bumped when the index is *reused*, not when
//! the entity is destroyed: a destroyed slot fails the alive check, and a
//! recycled slot fails the generation check.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    /// Construct an `Entity` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Allocates and recycles [`Entity`] handles with generational tracking.
///
/// This is the single source of truth for entity identity: every other table
/// relies on [`is_valid`](Self::is_valid) before touching per-entity state.
///
/// Free indices are kept in a FIFO queue so that generations are spread out
/// over time rather than concentrated on a hot index. The index space is
/// bounded by a hard capacity; once every index has been handed out and none
/// are free, creation fails rather than growing without limit.
#[derive(Debug)]
pub struct EntityManager {
    /// Current generation for each index slot.
    generations: Vec<u32>,
    /// Whether the slot is currently alive.
    alive: Vec<bool>,
    /// Free-list of recyclable indices (FIFO queue).
    free_indices: VecDeque<u32>,
    /// Hard limit on the index space.
    capacity: u32,
    /// Number of currently alive entities.
    live: usize,
}

impl EntityManager {
    /// Create a manager with the given hard capacity on the index space.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: u32) -> Self {
        assert!(capacity > 0, "entity capacity must be at least 1");
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free_indices: VecDeque::new(),
            capacity,
            live: 0,
        }
    }

    /// Allocate a fresh [`Entity`].
    ///
    /// A recycled index is reused with an incremented generation; otherwise a
    /// brand-new index is created, up to the hard capacity.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityCapacityExceeded`] once the index space is exhausted
    /// and no destroyed slot is available for reuse. No entity is created in
    /// that case.
    pub fn create(&mut self) -> Result<Entity, EcsError> {
        if let Some(index) = self.free_indices.pop_front() {
            // Reuse: the generation bump happens here, invalidating every
            // handle minted for the previous occupant of this slot.
            let idx = index as usize;
            self.generations[idx] = self.generations[idx].wrapping_add(1);
            self.alive[idx] = true;
            self.live += 1;
            return Ok(Entity::new(index, self.generations[idx]));
        }
        if self.generations.len() as u32 >= self.capacity {
            return Err(EcsError::EntityCapacityExceeded {
                capacity: self.capacity,
            });
        }
        let index = self.generations.len() as u32;
        self.generations.push(0);
        self.alive.push(true);
        self.live += 1;
        Ok(Entity::new(index, 0))
    }

    /// Destroy an entity, returning its index to the free list.
    ///
    /// Returns `true` if the entity was alive and is now destroyed, `false`
    /// (a silent no-op) if the handle was already stale. The stored
    /// generation is left untouched; it is bumped on the next reuse.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_valid(entity) {
            return false;
        }
        let idx = entity.index() as usize;
        self.alive[idx] = false;
        self.free_indices.push_back(entity.index());
        self.live -= 1;
        true
    }

    /// Returns `true` if `entity` refers to a currently alive slot whose
    /// generation matches the handle. O(1).
    pub fn is_valid(&self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        if idx >= self.generations.len() {
            return false;
        }
        self.alive[idx] && self.generations[idx] == entity.generation()
    }

    /// Number of currently alive entities.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entities are alive.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// The hard capacity of the index space.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Iterate over the handles of all currently alive entities, in index
    /// order.
    pub fn live_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, &alive)| alive)
            .map(|(idx, _)| Entity::new(idx as u32, self.generations[idx]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
