//! Veldt World -- the runtime facade over the Veldt ECS storage core.
//!
//! A [`World`](world::World) owns entities, component tables, archetypes,
//! the change history, spatial regions, LOD classification, relationships,
//! memory pools, and two kinds of systems: per-tick [`System`](system::System)s
//! run in dependency order, and [`ReactiveSystem`](reactive::ReactiveSystem)s
//! driven by component change records. Every world is an isolated context;
//! nothing is process-global.
//!
//! # Quick Start
//!
//! ```
//! use veldt_world::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Position { x: f32, y: f32 }
//! #[derive(Debug, Clone)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! struct Movement;
//!
//! impl System for Movement {
//!     fn update(&mut self, world: &World, dt: f32) {
//!         world.for_each2_mut(|_, pos: &mut Position, vel: &Velocity| {
//!             pos.x += vel.dx * dt;
//!             pos.y += vel.dy * dt;
//!         });
//!     }
//! }
//!
//! fn main() -> Result<(), WorldError> {
//!     let world = World::new();
//!     let e = world.create_entity()?;
//!     world.add_component(e, Position { x: 0.0, y: 0.0 })?;
//!     world.add_component(e, Velocity { dx: 10.0, dy: 0.0 })?;
//!
//!     world.add_system(Movement)?;
//!     world.update(0.5);
//!
//!     let moved = world.get_component::<Position>(e)?;
//!     assert_eq!(moved.x, 5.0);
//!
//!     world.shutdown();
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod lod;
pub mod query;
pub mod reactive;
pub mod region;
pub mod system;
pub mod world;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the storage core for convenience.
pub use veldt_ecs;

use veldt_ecs::EcsError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A storage-layer failure, passed through unchanged.
    #[error(transparent)]
    Ecs(#[from] EcsError),

    /// A system of this type is already in the scheduler.
    #[error("system `{name}` is already registered")]
    DuplicateSystem { name: &'static str },

    /// A dependency names a system that was never registered.
    #[error("system `{name}` is not registered")]
    UnknownSystem { name: &'static str },

    /// A system dependency declaration would close a loop.
    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    SystemCycle { cycle: Vec<String> },

    /// A cached read on a query whose cache is empty or invalidated.
    #[error("query results have not been cached; call cache_results first")]
    QueryCacheInvalid,

    /// LOD thresholds that are not strictly ascending from zero.
    #[error("LOD distances must be ascending: {high} < {medium} < {low}")]
    InvalidLodDistances { high: f32, medium: f32, low: f32 },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    // Re-export everything from the storage-core prelude.
    pub use veldt_ecs::prelude::*;

    // World-specific exports.
    pub use crate::config::WorldConfig;
    pub use crate::lod::{LodLevel, LodManager};
    pub use crate::query::EntityQuery;
    pub use crate::reactive::{ReactiveConfig, ReactiveHandle, ReactiveSystem};
    pub use crate::region::{RegionCoords, SpatialTable, Vec3, WorldRegion};
    pub use crate::system::{System, SystemScheduler, SystemStats};
    pub use crate::world::World;
    pub use crate::WorldError;
}
