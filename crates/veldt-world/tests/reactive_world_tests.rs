//! Reactive systems driven through the world: watch fidelity, batch replay
//! on the logical clock, self-mutation, and panic isolation.

use std::sync::Arc;

use parking_lot::Mutex;
use veldt_world::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Health(f32);
#[derive(Debug, Clone, PartialEq)]
struct Armor(f32);

/// Events a watcher saw: (hook, entity, component).
type Seen = Arc<Mutex<Vec<(&'static str, Entity, ComponentId)>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("veldt_world=debug")
        .try_init();
}

/// Watches `Modified` on `Health` at 10 Hz, batching (the default).
struct HealthWatcher {
    seen: Seen,
    updates: Arc<Mutex<u32>>,
}

impl ReactiveSystem for HealthWatcher {
    fn configure(&mut self, config: &mut ReactiveConfig<'_>) {
        config
            .watch_component_modified::<Health>()
            .set_update_frequency(10.0);
    }

    fn on_component_added(&mut self, entity: Entity, component: ComponentId) {
        self.seen.lock().push(("added", entity, component));
    }

    fn on_component_modified(&mut self, entity: Entity, component: ComponentId) {
        self.seen.lock().push(("modified", entity, component));
    }

    fn on_component_removed(&mut self, entity: Entity, component: ComponentId) {
        self.seen.lock().push(("removed", entity, component));
    }

    fn reactive_update(&mut self, _world: &World, _dt: f32) {
        *self.updates.lock() += 1;
    }
}

// -- 1. Batch replay on the logical clock ---------------------------------------

#[test]
fn buffered_records_replay_one_call_each_at_the_next_scheduled_update() {
    let world = World::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(Mutex::new(0));
    world.add_reactive_system(HealthWatcher {
        seen: seen.clone(),
        updates: updates.clone(),
    });

    let e = world.create_entity().unwrap();
    world.add_component(e, Health(100.0)).unwrap();
    let health = world.component_id::<Health>().unwrap();

    // Two modifications inside one 100 ms interval.
    world.write_component(e, |h: &mut Health| h.0 -= 10.0).unwrap();
    world.write_component(e, |h: &mut Health| h.0 -= 10.0).unwrap();
    assert!(seen.lock().is_empty(), "batching must not fire inline");

    // 50 ms of simulated time: not due yet.
    world.update(0.05);
    assert!(seen.lock().is_empty());
    assert_eq!(*updates.lock(), 0);

    // 100 ms: both records replay, one hook call each, never coalesced.
    world.update(0.05);
    assert_eq!(
        *seen.lock(),
        vec![("modified", e, health), ("modified", e, health)]
    );
    assert_eq!(*updates.lock(), 1);
}

#[test]
fn delivery_keeps_pace_with_the_configured_frequency() {
    let world = World::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(Mutex::new(0));
    world.add_reactive_system(HealthWatcher {
        seen: seen.clone(),
        updates: updates.clone(),
    });

    // 60 Hz frames advance the clock 17 ms at a time. The first 100 ms
    // interval elapses on the sixth frame, at 102 ms.
    for _ in 0..10 {
        world.update(1.0 / 60.0);
    }
    assert_eq!(*updates.lock(), 1);

    // The limiter re-arms from each delivery: 102, 204, 306.
    for _ in 0..10 {
        world.update(1.0 / 60.0);
    }
    assert_eq!(*updates.lock(), 3);
}

// -- 2. Watch-set fidelity ----------------------------------------------------------

#[test]
fn a_modified_watcher_never_hears_added_removed_or_other_components() {
    let world = World::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(Mutex::new(0));
    world.add_reactive_system(HealthWatcher {
        seen: seen.clone(),
        updates,
    });

    let e = world.create_entity().unwrap();
    world.add_component(e, Health(100.0)).unwrap(); // Added: filtered
    world.write_component(e, |h: &mut Health| h.0 = 80.0).unwrap(); // Modified: watched
    world.add_component(e, Armor(5.0)).unwrap(); // other component
    world.write_component(e, |a: &mut Armor| a.0 = 6.0).unwrap(); // other component
    world.remove_component::<Health>(e).unwrap(); // Removed: filtered

    world.update(0.2);

    let health = world.component_id::<Health>().unwrap();
    assert_eq!(*seen.lock(), vec![("modified", e, health)]);
}

#[test]
fn added_and_removed_watchers_hear_attach_detach_and_teardown() {
    struct LifecycleWatcher {
        seen: Seen,
    }
    impl ReactiveSystem for LifecycleWatcher {
        fn configure(&mut self, config: &mut ReactiveConfig<'_>) {
            config
                .watch_component_added::<Health>()
                .watch_component_removed::<Health>()
                .set_batch_mode(false);
        }
        fn on_component_added(&mut self, entity: Entity, component: ComponentId) {
            self.seen.lock().push(("added", entity, component));
        }
        fn on_component_removed(&mut self, entity: Entity, component: ComponentId) {
            self.seen.lock().push(("removed", entity, component));
        }
    }

    let world = World::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    world.add_reactive_system(LifecycleWatcher { seen: seen.clone() });

    let a = world.create_entity().unwrap();
    let b = world.create_entity().unwrap();
    world.add_component(a, Health(1.0)).unwrap();
    world.add_component(b, Health(2.0)).unwrap();
    world.remove_component::<Health>(a).unwrap();
    world.destroy_entity(b); // teardown detaches Health too

    let health = world.component_id::<Health>().unwrap();
    assert_eq!(
        *seen.lock(),
        vec![
            ("added", a, health),
            ("added", b, health),
            ("removed", a, health),
            ("removed", b, health),
        ]
    );
}

// -- 3. Self-mutation from reactive_update --------------------------------------------

/// Heals every entity whose Health was modified, from `reactive_update`.
struct Regen {
    damaged: Vec<Entity>,
}

impl ReactiveSystem for Regen {
    fn configure(&mut self, config: &mut ReactiveConfig<'_>) {
        config
            .watch_component_modified::<Health>()
            .set_update_frequency(10.0);
    }

    fn on_component_modified(&mut self, entity: Entity, _component: ComponentId) {
        self.damaged.push(entity);
    }

    fn reactive_update(&mut self, world: &World, _dt: f32) {
        for entity in self.damaged.drain(..) {
            let _ = world.write_component(entity, |h: &mut Health| h.0 += 5.0);
        }
    }
}

#[test]
fn a_reactive_system_may_mutate_the_component_it_watches() {
    let world = World::new();
    world.add_reactive_system(Regen { damaged: Vec::new() });

    let e = world.create_entity().unwrap();
    world.add_component(e, Health(50.0)).unwrap();
    world.write_component(e, |h: &mut Health| h.0 = 40.0).unwrap();

    // First interval: the damage record replays and regen applies. The
    // write regen itself makes is buffered, not delivered inline.
    world.update(0.1);
    assert_eq!(world.get_component::<Health>(e).unwrap(), Health(45.0));

    // Second interval: regen's own modification replays and heals again.
    world.update(0.1);
    assert_eq!(world.get_component::<Health>(e).unwrap(), Health(50.0));
}

// -- 4. Registration tokens and panic isolation -----------------------------------------

#[test]
fn removing_a_reactive_system_stops_delivery() {
    let world = World::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(Mutex::new(0));
    let handle = world.add_reactive_system(HealthWatcher {
        seen: seen.clone(),
        updates,
    });
    let e = world.create_entity().unwrap();
    world.add_component(e, Health(1.0)).unwrap();

    assert_eq!(world.reactive_system_count(), 1);
    assert!(world.remove_reactive_system(handle));
    assert!(!world.remove_reactive_system(handle));
    assert_eq!(world.reactive_system_count(), 0);

    world.write_component(e, |h: &mut Health| h.0 = 0.0).unwrap();
    world.update(0.2);
    assert!(seen.lock().is_empty());
}

#[test]
fn a_panicking_observer_does_not_starve_the_others() {
    init_tracing();

    struct Panicking;
    impl ReactiveSystem for Panicking {
        fn configure(&mut self, config: &mut ReactiveConfig<'_>) {
            config.watch_component_modified::<Health>().set_batch_mode(false);
        }
        fn on_component_modified(&mut self, _entity: Entity, _component: ComponentId) {
            panic!("observer failure");
        }
    }

    let world = World::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let updates = Arc::new(Mutex::new(0));
    world.add_reactive_system(Panicking);
    world.add_reactive_system(HealthWatcher {
        seen: seen.clone(),
        updates,
    });

    let e = world.create_entity().unwrap();
    world.add_component(e, Health(1.0)).unwrap();
    world.write_component(e, |h: &mut Health| h.0 = 0.5).unwrap();
    world.update(0.2);

    assert_eq!(seen.lock().len(), 1, "the healthy watcher still heard it");
}
