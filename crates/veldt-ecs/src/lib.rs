//! Veldt ECS -- generational entities, typed component storage, and archetype
//! bookkeeping.
//!
//! This crate is the storage core of the Veldt runtime. Entity handles carry
//! a generation so stale references are detected in O(1). Component values
//! live in one dense array per type behind a type-erased store trait, and
//! archetypes group entities by component mask for query acceleration. On top
//! of the storage sit the component dependency graph, the bounded change
//! history, parent/child relationships, and the fixed-block memory pools.
//!
//! The world facade that ties these together into a tick loop lives in the
//! `veldt-world` crate.
//!
//! # Quick Start
//!
//! ```
//! use veldt_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! fn main() -> Result<(), EcsError> {
//!     let mut entities = EntityManager::with_capacity(1024);
//!     let mut registry = ComponentRegistry::new();
//!     let mut archetypes = ArchetypeManager::new();
//!
//!     let entity = entities.create()?;
//!     let position = registry.register::<Position>()?;
//!     archetypes.track(entity);
//!
//!     let mut store = ComponentArray::new();
//!     store.insert(entity, Position { x: 0.0, y: 0.0 });
//!     archetypes.component_added(entity, position);
//!
//!     assert_eq!(store.get(entity), Some(&Position { x: 0.0, y: 0.0 }));
//!     assert!(entities.is_valid(entity));
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod change;
pub mod component;
pub mod dependency;
pub mod entity;
#[allow(unsafe_code)]
pub mod pool;
pub mod relation;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity index space is exhausted; no entity was created.
    #[error("entity capacity exceeded ({capacity} slots)")]
    EntityCapacityExceeded { capacity: u32 },

    /// The handle's generation no longer matches its slot.
    #[error("stale entity handle {0}")]
    StaleEntity(entity::Entity),

    /// Too many distinct component types for the archetype mask width.
    #[error("component kind limit exceeded ({limit} kinds)")]
    ComponentLimitExceeded { limit: usize },

    /// The entity does not carry the requested component.
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    /// A dependency declaration would close a requirement loop.
    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// A component removal is blocked by declared dependents.
    #[error("cannot remove {component} from {entity}: required by [{}]", dependents.join(", "))]
    DependencyViolation {
        entity: entity::Entity,
        component: String,
        dependents: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeManager, ArchetypeStats, ComponentMask};
    pub use crate::change::{
        ChangeKind, ChangeRecord, ChangeTracker, SubscriptionId, DEFAULT_HISTORY_CAPACITY,
    };
    pub use crate::component::{
        ComponentArray, ComponentId, ComponentInfo, ComponentRegistry, ComponentStore,
        ComponentTables, TypedStore, MAX_COMPONENT_KINDS,
    };
    pub use crate::dependency::{ComponentDependencyManager, DependencyGraph};
    pub use crate::entity::{Entity, EntityManager};
    pub use crate::pool::{
        BlockPool, MemoryStats, PoolManager, PoolStats, DEFAULT_BLOCKS_PER_CHUNK,
    };
    pub use crate::relation::RelationshipTable;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
