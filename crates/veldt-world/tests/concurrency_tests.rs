//! Thread-safety through the world facade: shared references across threads,
//! per-table read consistency, subscriber delivery under contention, and
//! parallel ticks.
//!
//! Cross-table reads are explicitly not a transaction; what these tests pin
//! down is that each individual table hands out complete snapshots and that
//! nothing panics, leaks records, or double-runs under load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use veldt_world::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Position(i32);

#[derive(Debug, Clone, PartialEq)]
struct Velocity(i32);

#[derive(Debug, Clone, PartialEq)]
struct Extent {
    x: i64,
    y: i64,
}

// -- 1. Per-table snapshot consistency ----------------------------------------------

#[test]
fn component_reads_are_never_torn() {
    let world = World::new();
    let e = world.create_entity().unwrap();
    world.add_component(e, Extent { x: 0, y: 0 }).unwrap();

    let world = &world;
    std::thread::scope(|s| {
        s.spawn(move || {
            for i in 1..=20_000i64 {
                world
                    .write_component(e, |ext: &mut Extent| {
                        ext.x = i;
                        ext.y = 2 * i;
                    })
                    .unwrap();
            }
        });
        for _ in 0..3 {
            s.spawn(move || {
                for _ in 0..20_000 {
                    let ext: Extent = world.get_component(e).unwrap();
                    assert_eq!(ext.y, 2 * ext.x, "torn component read");
                }
            });
        }
    });
}

// -- 2. Concurrent churn ----------------------------------------------------------------

#[test]
fn churn_and_queries_from_many_threads_settle_consistently() {
    let world = World::new();
    let survivors: Mutex<Vec<Entity>> = Mutex::new(Vec::new());

    let world = &world;
    let survivors = &survivors;
    std::thread::scope(|s| {
        for t in 0..4usize {
            s.spawn(move || {
                let mut mine = Vec::with_capacity(200);
                for i in 0..200 {
                    let e = world.create_entity().unwrap();
                    world.add_component(e, Position(i)).unwrap();
                    if i % 2 == 0 {
                        world.add_component(e, Velocity(t as i32)).unwrap();
                    }
                    mine.push(e);
                }
                let mut keep = Vec::new();
                for (i, e) in mine.into_iter().enumerate() {
                    if i % 4 == 3 {
                        world.destroy_entity(e);
                    } else {
                        keep.push(e);
                    }
                }
                survivors.lock().extend(keep);
            });
        }

        // Readers race the writers; their snapshots may go stale between the
        // scan and the lookup, which must surface as a clean error.
        for _ in 0..2 {
            s.spawn(move || {
                for _ in 0..100 {
                    let mut query = world.create_query().with_component::<Position>();
                    for e in query.execute() {
                        let _ = world.get_component::<Position>(e);
                    }
                }
            });
        }
    });

    let survivors = survivors.lock();
    assert_eq!(survivors.len(), 600);
    assert_eq!(world.entity_count(), 600);
    for &e in survivors.iter() {
        assert!(world.is_valid(e));
        assert!(world.has_component::<Position>(e));
    }

    let mut query = world.create_query().with_component::<Position>();
    assert_eq!(query.execute().len(), 600);
}

// -- 3. Subscriber delivery under contention ----------------------------------------

#[test]
fn every_mutation_reaches_subscribers_under_contention() {
    let world = World::new();
    let position = world.register_component::<Position>().unwrap();

    let modified = Arc::new(AtomicUsize::new(0));
    let counter = modified.clone();
    world.subscribe_changes(Some(position), move |record| {
        if record.kind == ChangeKind::Modified {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let world = &world;
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(move || {
                let e = world.create_entity().unwrap();
                world.add_component(e, Position(0)).unwrap();
                for i in 0..500 {
                    world.write_component(e, |p: &mut Position| p.0 = i).unwrap();
                }
            });
        }
    });

    assert_eq!(modified.load(Ordering::SeqCst), 2_000);
    // Four attaches plus two thousand in-place writes, all retained.
    assert_eq!(world.changes_for_component(position).len(), 2_004);
}

// -- 4. Notification boundary --------------------------------------------------------------

/// Change records are delivered after every table lock is released, so a
/// callback always sees the state a record describes already applied, and a
/// teardown's records arrive only once the whole teardown is done. There is
/// no per-record transactional view.
#[test]
fn notifications_trail_the_state_they_describe() {
    type Observation = (ComponentId, ChangeKind, bool, bool, bool);

    let world = Arc::new(World::new());
    let observed: Arc<Mutex<Vec<Observation>>> = Arc::new(Mutex::new(Vec::new()));

    let w = Arc::clone(&world);
    let log = Arc::clone(&observed);
    world.subscribe_changes(None, move |record| {
        log.lock().push((
            record.component,
            record.kind,
            w.is_valid(record.entity),
            w.has_component::<Position>(record.entity),
            w.has_component::<Velocity>(record.entity),
        ));
    });

    let e = world.create_entity().unwrap();
    world.add_component(e, Position(1)).unwrap();
    world.add_component(e, Velocity(2)).unwrap();
    world.destroy_entity(e);

    let position = world.component_id::<Position>().unwrap();
    let velocity = world.component_id::<Velocity>().unwrap();
    let observed = observed.lock();

    assert_eq!(observed[0], (position, ChangeKind::Added, true, true, false));
    assert_eq!(observed[1], (velocity, ChangeKind::Added, true, true, true));

    // Both Removed callbacks already see a dead handle with nothing attached.
    assert_eq!(observed.len(), 4);
    for &(component, kind, valid, has_pos, has_vel) in &observed[2..] {
        assert_eq!(kind, ChangeKind::Removed);
        assert!(!valid && !has_pos && !has_vel);
        assert!(component == position || component == velocity);
    }
}

// -- 5. Parallel ticks --------------------------------------------------------------------

macro_rules! counting_system {
    ($name:ident) => {
        struct $name {
            hits: Arc<AtomicUsize>,
        }

        impl System for $name {
            fn update(&mut self, _world: &World, _dt: f32) {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
        }
    };
}

counting_system!(Integrate);
counting_system!(Resolve);
counting_system!(Present);

#[test]
fn parallel_ticks_run_every_system_exactly_once() {
    let world = World::new();
    let integrate = Arc::new(AtomicUsize::new(0));
    let resolve = Arc::new(AtomicUsize::new(0));
    let present = Arc::new(AtomicUsize::new(0));

    world.add_system(Integrate { hits: integrate.clone() }).unwrap();
    world.add_system(Resolve { hits: resolve.clone() }).unwrap();
    world.add_system(Present { hits: present.clone() }).unwrap();
    world.add_system_dependency::<Resolve, Integrate>().unwrap();
    world.add_system_dependency::<Present, Resolve>().unwrap();

    // More workers than systems, then the degenerate single worker.
    world.update_parallel(1.0 / 60.0, 8);
    for hits in [&integrate, &resolve, &present] {
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    world.update_parallel(1.0 / 60.0, 1);
    for hits in [&integrate, &resolve, &present] {
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    for (_, stats) in world.system_stats() {
        assert_eq!(stats.runs, 2);
    }
}
