//! Filtered entity queries.
//!
//! An [`EntityQuery`] is built up from component, region, LOD, and
//! relationship filters, then executed against the world. Execution scans
//! all live entities rather than walking matching archetypes, so cost is
//! proportional to the live population; results can be cached on the query
//! for repeated reads, and any later filter change invalidates the cache.

use std::time::{Duration, Instant};

use veldt_ecs::archetype::ComponentMask;
use veldt_ecs::entity::Entity;

use crate::lod::LodLevel;
use crate::region::RegionCoords;
use crate::world::World;
use crate::WorldError;

// ---------------------------------------------------------------------------
// EntityQuery
// ---------------------------------------------------------------------------

/// A reusable, cacheable filter over a world's live entities.
///
/// Builder calls consume and return the query, so filters chain:
///
/// ```
/// # use veldt_world::prelude::*;
/// # struct Position;
/// # struct Frozen;
/// # let world = World::new();
/// let movers = world
///     .create_query()
///     .with_component::<Position>()
///     .without_component::<Frozen>()
///     .execute();
/// # assert!(movers.is_empty());
/// ```
pub struct EntityQuery<'w> {
    world: &'w World,
    required: ComponentMask,
    excluded: ComponentMask,
    region: Option<RegionCoords>,
    lod: Option<LodLevel>,
    relationship: Option<(Entity, bool)>,
    cached: Option<Vec<Entity>>,
    last_count: usize,
    last_duration: Option<Duration>,
    // Set when a required component type was never registered: nothing can
    // match, and there is no id to put in the mask.
    unsatisfiable: bool,
}

impl<'w> EntityQuery<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            required: ComponentMask::EMPTY,
            excluded: ComponentMask::EMPTY,
            region: None,
            lod: None,
            relationship: None,
            cached: None,
            last_count: 0,
            last_duration: None,
            unsatisfiable: false,
        }
    }

    // -- filters ----------------------------------------------------------------

    /// Keep entities carrying component `T`. A type never registered in
    /// this world makes the query match nothing.
    pub fn with_component<T: 'static>(mut self) -> Self {
        self.cached = None;
        match self.world.component_id::<T>() {
            Some(id) => self.required.set(id),
            None => self.unsatisfiable = true,
        }
        self
    }

    /// Drop entities carrying component `T`. A type never registered in
    /// this world excludes nothing.
    pub fn without_component<T: 'static>(mut self) -> Self {
        self.cached = None;
        if let Some(id) = self.world.component_id::<T>() {
            self.excluded.set(id);
        }
        self
    }

    /// Keep entities carrying the component registered as `id`.
    pub fn with_component_id(mut self, id: veldt_ecs::component::ComponentId) -> Self {
        self.cached = None;
        self.required.set(id);
        self
    }

    /// Drop entities carrying the component registered as `id`.
    pub fn without_component_id(mut self, id: veldt_ecs::component::ComponentId) -> Self {
        self.cached = None;
        self.excluded.set(id);
        self
    }

    /// Keep entities whose tracked position falls in the region at the
    /// given grid coordinates. Entities without a position never match.
    pub fn in_region(mut self, x: i32, y: i32, z: i32) -> Self {
        self.cached = None;
        self.region = Some(RegionCoords::new(x, y, z));
        self
    }

    /// Keep entities currently classified at `level`. Entities without a
    /// position have no classification and never match.
    pub fn with_lod(mut self, level: LodLevel) -> Self {
        self.cached = None;
        self.lod = Some(level);
        self
    }

    /// Keep entities linked to `target`: with `target_is_parent`, entities
    /// whose parent is `target`; otherwise the entity that is `target`'s
    /// parent.
    pub fn with_relationship(mut self, target: Entity, target_is_parent: bool) -> Self {
        self.cached = None;
        self.relationship = Some((target, target_is_parent));
        self
    }

    // -- execution ---------------------------------------------------------------

    /// Scan the world and return every matching entity. Also refreshes
    /// [`get_result_count`](Self::get_result_count) and
    /// [`get_last_execution_time`](Self::get_last_execution_time).
    pub fn execute(&mut self) -> Vec<Entity> {
        let started = Instant::now();
        let results = self.scan();
        self.last_count = results.len();
        self.last_duration = Some(started.elapsed());
        results
    }

    /// Execute and retain the results on the query. The cache stays valid
    /// until the next filter change; it does not follow later world
    /// mutations.
    pub fn cache_results(&mut self) -> &[Entity] {
        let results = self.execute();
        self.cached.insert(results)
    }

    /// The cached results.
    ///
    /// # Errors
    ///
    /// [`WorldError::QueryCacheInvalid`] when nothing is cached, either
    /// because [`cache_results`](Self::cache_results) was never called or
    /// because a filter changed since.
    pub fn get_cached_results(&self) -> Result<&[Entity], WorldError> {
        self.cached.as_deref().ok_or(WorldError::QueryCacheInvalid)
    }

    /// Number of matches from the most recent execution.
    pub fn get_result_count(&self) -> usize {
        self.last_count
    }

    /// Wall time of the most recent execution.
    pub fn get_last_execution_time(&self) -> Option<Duration> {
        self.last_duration
    }

    fn scan(&self) -> Vec<Entity> {
        if self.unsatisfiable {
            return Vec::new();
        }
        self.world
            .live_entities()
            .into_iter()
            .filter(|&entity| self.matches(entity))
            .collect()
    }

    fn matches(&self, entity: Entity) -> bool {
        let mask = self
            .world
            .mask_of(entity)
            .unwrap_or(ComponentMask::EMPTY);
        if !mask.contains_all(self.required) || mask.intersects(self.excluded) {
            return false;
        }
        if let Some(region) = self.region {
            if self.world.entity_region(entity) != Some(region) {
                return false;
            }
        }
        if let Some(level) = self.lod {
            if self.world.lod_of(entity) != Some(level) {
                return false;
            }
        }
        if let Some((target, target_is_parent)) = self.relationship {
            let linked = if target_is_parent {
                self.world.parent_of(entity) == Some(target)
            } else {
                self.world.parent_of(target) == Some(entity)
            };
            if !linked {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
