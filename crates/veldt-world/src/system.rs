//! System registration, ordering, and per-tick execution.
//!
//! Systems are keyed by their concrete type: one instance of each type per
//! scheduler. Execution order is registration order, bent by declared
//! dependencies ("S runs after D"); the order is recomputed on every
//! registration change so [`update_all`](SystemScheduler::update_all) just
//! walks a precomputed list. Each run is timed, feeding a per-system running
//! average.
//!
//! [`update_parallel`](SystemScheduler::update_parallel) splits the ordered
//! list into contiguous slices and runs each slice on its own worker. The
//! split does not verify that slices are mutually independent; callers own
//! that guarantee, and the ordering within each slice is the only ordering
//! preserved.

use std::any::TypeId;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use veldt_ecs::component::short_type_name;
use veldt_ecs::dependency::DependencyGraph;

use crate::world::World;
use crate::WorldError;

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A unit of per-tick logic.
///
/// `init` runs once at registration, `update` every tick, and `shutdown`
/// once when the system is removed or the world shuts down. Systems must not
/// register or remove systems from inside `init` or `update`; the scheduler
/// is locked while they run. World state (entities, components, queries) is
/// fair game.
pub trait System: Send {
    /// Called once when the system is added to a world.
    fn init(&mut self, _world: &World) {}

    /// Called every tick in dependency order.
    fn update(&mut self, world: &World, dt: f32);

    /// Called once when the system is removed or the world shuts down.
    fn shutdown(&mut self, _world: &World) {}
}

// ---------------------------------------------------------------------------
// SystemStats
// ---------------------------------------------------------------------------

/// Timing bookkeeping for one system.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SystemStats {
    /// Wall-clock duration of the most recent run.
    pub last: Duration,
    /// Running average over all runs: `avg = (avg * (n - 1) + t) / n`.
    pub average: Duration,
    /// Number of completed runs.
    pub runs: u64,
}

// ---------------------------------------------------------------------------
// SystemScheduler
// ---------------------------------------------------------------------------

struct SystemEntry {
    name: &'static str,
    system: Mutex<Box<dyn System>>,
    stats: Mutex<SystemStats>,
}

/// Owns every registered system and the order they execute in.
#[derive(Default)]
pub struct SystemScheduler {
    systems: IndexMap<TypeId, SystemEntry>,
    graph: DependencyGraph<TypeId>,
    order: Vec<TypeId>,
}

impl SystemScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `system` under its concrete type. `init` is not called here;
    /// the world runs it once the scheduler lock is released.
    ///
    /// # Errors
    ///
    /// [`WorldError::DuplicateSystem`] when a system of the same type is
    /// already registered.
    pub fn register<S: System + 'static>(&mut self, system: S) -> Result<TypeId, WorldError> {
        let id = TypeId::of::<S>();
        let name = short_type_name::<S>();
        if self.systems.contains_key(&id) {
            return Err(WorldError::DuplicateSystem { name });
        }
        self.systems.insert(
            id,
            SystemEntry {
                name,
                system: Mutex::new(Box::new(system)),
                stats: Mutex::new(SystemStats::default()),
            },
        );
        self.recompute_order();
        Ok(id)
    }

    /// Run `init` for the system registered as `id`.
    pub fn init_one(&self, id: TypeId, world: &World) {
        if let Some(entry) = self.systems.get(&id) {
            entry.system.lock().init(world);
        }
    }

    /// Declare that `S` runs after `D` and recompute the execution order.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownSystem`] when either side is unregistered;
    /// [`WorldError::SystemCycle`] when the edge would close a loop, in which
    /// case the graph is left unchanged.
    pub fn add_dependency<S: 'static, D: 'static>(&mut self) -> Result<(), WorldError> {
        let dependent = TypeId::of::<S>();
        let dependency = TypeId::of::<D>();
        if !self.systems.contains_key(&dependent) {
            return Err(WorldError::UnknownSystem {
                name: short_type_name::<S>(),
            });
        }
        if !self.systems.contains_key(&dependency) {
            return Err(WorldError::UnknownSystem {
                name: short_type_name::<D>(),
            });
        }
        self.graph
            .add_edge(dependent, dependency)
            .map_err(|cycle| WorldError::SystemCycle {
                cycle: cycle.iter().map(|&id| self.name_of(id)).collect(),
            })?;
        self.recompute_order();
        Ok(())
    }

    /// Drop the system of type `S`, returning it so the caller can run
    /// `shutdown` outside the scheduler lock.
    pub fn remove<S: 'static>(&mut self) -> Option<Box<dyn System>> {
        let id = TypeId::of::<S>();
        let entry = self.systems.shift_remove(&id)?;
        self.graph.remove_node(id);
        self.recompute_order();
        Some(entry.system.into_inner())
    }

    /// Drain every system in reverse execution order, for shutdown.
    pub fn drain_reversed(&mut self) -> Vec<Box<dyn System>> {
        let mut drained = Vec::with_capacity(self.order.len());
        for &id in self.order.iter().rev() {
            if let Some(entry) = self.systems.shift_remove(&id) {
                drained.push(entry.system.into_inner());
            }
        }
        self.systems.clear();
        self.graph = DependencyGraph::new();
        self.order.clear();
        drained
    }

    /// Run every system once, in execution order.
    pub fn update_all(&self, world: &World, dt: f32) {
        for &id in &self.order {
            self.run_system(&self.systems[&id], world, dt);
        }
    }

    /// Run every system once, splitting the execution order into up to
    /// `thread_count` contiguous slices dispatched to separate workers.
    ///
    /// Only the ordering within each slice is preserved; systems in different
    /// slices run concurrently. The split does not check that the slices are
    /// independent, so callers must only enable this when every system in one
    /// slice is safe to run alongside every system in the others.
    pub fn update_parallel(&self, world: &World, dt: f32, thread_count: usize) {
        if self.order.is_empty() {
            return;
        }
        let threads = thread_count.clamp(1, self.order.len());
        if threads == 1 {
            self.update_all(world, dt);
            return;
        }
        let chunk = self.order.len().div_ceil(threads);
        rayon::scope(|scope| {
            for slice in self.order.chunks(chunk) {
                scope.spawn(move |_| {
                    for &id in slice {
                        self.run_system(&self.systems[&id], world, dt);
                    }
                });
            }
        });
    }

    fn run_system(&self, entry: &SystemEntry, world: &World, dt: f32) {
        let started = Instant::now();
        entry.system.lock().update(world, dt);
        let elapsed = started.elapsed();

        let mut stats = entry.stats.lock();
        stats.runs += 1;
        stats.last = elapsed;
        stats.average = fold_average(stats.average, stats.runs, elapsed);
    }

    /// Registration order bent by dependencies: a system appears after every
    /// system it was declared to run after, and otherwise keeps its slot.
    fn recompute_order(&mut self) {
        let mut placed: IndexSet<TypeId> = IndexSet::with_capacity(self.systems.len());
        let mut order: Vec<TypeId> = Vec::with_capacity(self.systems.len());
        while order.len() < self.systems.len() {
            let mut progressed = false;
            for &id in self.systems.keys() {
                if placed.contains(&id) {
                    continue;
                }
                if self.graph.dependencies_of(id).all(|dep| placed.contains(&dep)) {
                    placed.insert(id);
                    order.push(id);
                    progressed = true;
                }
            }
            // Declared edges are cycle-checked, so every pass places at
            // least one system.
            debug_assert!(progressed, "system graph holds a cycle");
            if !progressed {
                break;
            }
        }
        self.order = order;
    }

    fn name_of(&self, id: TypeId) -> String {
        self.systems
            .get(&id)
            .map(|entry| entry.name.to_string())
            .unwrap_or_else(|| "unregistered system".to_string())
    }

    /// System names in execution order.
    pub fn execution_order(&self) -> Vec<&'static str> {
        self.order.iter().map(|id| self.systems[id].name).collect()
    }

    /// Timing stats per system, in execution order.
    pub fn system_stats(&self) -> Vec<(&'static str, SystemStats)> {
        self.order
            .iter()
            .map(|id| {
                let entry = &self.systems[id];
                (entry.name, entry.stats.lock().clone())
            })
            .collect()
    }

    /// Whether a system of type `S` is registered.
    pub fn contains<S: 'static>(&self) -> bool {
        self.systems.contains_key(&TypeId::of::<S>())
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether no systems are registered.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

/// One step of the running average with `sample` as run number `runs`.
fn fold_average(average: Duration, runs: u64, sample: Duration) -> Duration {
    let n = runs as f64;
    Duration::from_secs_f64((average.as_secs_f64() * (n - 1.0) + sample.as_secs_f64()) / n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
