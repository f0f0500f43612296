//! Dependency graphs at both levels: component requirements ordering
//! removals and teardown, and system dependencies ordering the tick.

use std::sync::Arc;

use parking_lot::Mutex;
use veldt_world::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Transform(f32);
#[derive(Debug, Clone, PartialEq)]
struct Rigidbody(f32);
#[derive(Debug, Clone, PartialEq)]
struct Collider(f32);

// -- 1. Component update order ------------------------------------------------

#[test]
fn update_order_lists_dependencies_before_dependents() {
    let world = World::new();
    // Rigidbody requires Transform; Collider requires Rigidbody.
    world
        .declare_component_dependency::<Rigidbody, Transform>()
        .unwrap();
    world
        .declare_component_dependency::<Collider, Rigidbody>()
        .unwrap();

    let order = world.component_update_order().unwrap();
    let transform = world.component_id::<Transform>().unwrap();
    let rigidbody = world.component_id::<Rigidbody>().unwrap();
    let collider = world.component_id::<Collider>().unwrap();
    assert_eq!(order, vec![transform, rigidbody, collider]);
}

#[test]
fn a_cycle_is_rejected_at_declaration_and_the_order_survives() {
    let world = World::new();
    world
        .declare_component_dependency::<Rigidbody, Transform>()
        .unwrap();
    world
        .declare_component_dependency::<Collider, Rigidbody>()
        .unwrap();

    // Transform -> Collider would close the loop.
    let err = world
        .declare_component_dependency::<Transform, Collider>()
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("circular dependency detected"), "{msg}");
    assert!(
        msg.contains("Transform") && msg.contains("Rigidbody") && msg.contains("Collider"),
        "cycle participants must be named: {msg}"
    );

    // The rejected edge never entered the graph.
    let order = world.component_update_order().unwrap();
    assert_eq!(order.len(), 3);
    let transform = world.component_id::<Transform>().unwrap();
    let collider = world.component_id::<Collider>().unwrap();
    assert_eq!(order.first(), Some(&transform));
    assert_eq!(order.last(), Some(&collider));
}

// -- 2. Removal blocking ----------------------------------------------------------

#[test]
fn removal_of_a_required_component_is_blocked_while_dependents_remain() {
    let world = World::new();
    world
        .declare_component_dependency::<Rigidbody, Transform>()
        .unwrap();

    let e = world.create_entity().unwrap();
    world.add_component(e, Transform(0.0)).unwrap();
    world.add_component(e, Rigidbody(1.0)).unwrap();

    let err = world.remove_component::<Transform>(e).unwrap_err();
    match err {
        WorldError::Ecs(EcsError::DependencyViolation {
            entity,
            component,
            dependents,
        }) => {
            assert_eq!(entity, e);
            assert_eq!(component, "Transform");
            assert_eq!(dependents, vec!["Rigidbody".to_string()]);
        }
        other => panic!("expected a dependency violation, got {other}"),
    }

    // The blocked removal left the component in place.
    assert!(world.has_component::<Transform>(e));

    world.remove_component::<Rigidbody>(e).unwrap();
    assert!(world.remove_component::<Transform>(e).unwrap());
}

#[test]
fn undeclaring_releases_the_requirement() {
    let world = World::new();
    world
        .declare_component_dependency::<Rigidbody, Transform>()
        .unwrap();
    let e = world.create_entity().unwrap();
    world.add_component(e, Transform(0.0)).unwrap();
    world.add_component(e, Rigidbody(1.0)).unwrap();

    assert!(world.undeclare_component_dependency::<Rigidbody, Transform>());
    assert!(!world.undeclare_component_dependency::<Rigidbody, Transform>());
    assert!(world.remove_component::<Transform>(e).unwrap());
}

#[test]
fn teardown_detaches_the_whole_chain_dependents_first() {
    let world = World::new();
    world
        .declare_component_dependency::<Rigidbody, Transform>()
        .unwrap();
    world
        .declare_component_dependency::<Collider, Rigidbody>()
        .unwrap();

    let e = world.create_entity().unwrap();
    world.add_component(e, Transform(0.0)).unwrap();
    world.add_component(e, Rigidbody(1.0)).unwrap();
    world.add_component(e, Collider(2.0)).unwrap();

    assert!(world.destroy_entity(e));

    let removed: Vec<ComponentId> = world
        .changes_for_entity(e)
        .iter()
        .filter(|r| r.kind == ChangeKind::Removed)
        .map(|r| r.component)
        .collect();
    let transform = world.component_id::<Transform>().unwrap();
    let rigidbody = world.component_id::<Rigidbody>().unwrap();
    let collider = world.component_id::<Collider>().unwrap();
    assert_eq!(removed, vec![collider, rigidbody, transform]);
}

// -- 3. System scheduling through the world ------------------------------------------

type TickLog = Arc<Mutex<Vec<&'static str>>>;

struct Input {
    log: TickLog,
}
struct Physics {
    log: TickLog,
}
struct Render {
    log: TickLog,
}

impl System for Input {
    fn update(&mut self, _world: &World, _dt: f32) {
        self.log.lock().push("input");
    }
}
impl System for Physics {
    fn update(&mut self, _world: &World, _dt: f32) {
        self.log.lock().push("physics");
    }
}
impl System for Render {
    fn init(&mut self, _world: &World) {
        self.log.lock().push("render:init");
    }
    fn update(&mut self, _world: &World, _dt: f32) {
        self.log.lock().push("render");
    }
    fn shutdown(&mut self, _world: &World) {
        self.log.lock().push("render:shutdown");
    }
}

#[test]
fn systems_run_in_dependency_order_every_tick() {
    let world = World::new();
    let log: TickLog = Arc::new(Mutex::new(Vec::new()));

    world.add_system(Render { log: log.clone() }).unwrap();
    world.add_system(Physics { log: log.clone() }).unwrap();
    world.add_system(Input { log: log.clone() }).unwrap();
    // Render after Physics, Physics after Input.
    world.add_system_dependency::<Render, Physics>().unwrap();
    world.add_system_dependency::<Physics, Input>().unwrap();

    log.lock().clear();
    world.update(0.016);
    world.update(0.016);
    assert_eq!(
        *log.lock(),
        vec!["input", "physics", "render", "input", "physics", "render"]
    );
}

#[test]
fn system_cycles_are_fatal_and_leave_the_schedule_usable() {
    let world = World::new();
    let log: TickLog = Arc::new(Mutex::new(Vec::new()));
    world.add_system(Input { log: log.clone() }).unwrap();
    world.add_system(Physics { log: log.clone() }).unwrap();
    world.add_system_dependency::<Physics, Input>().unwrap();

    let err = world.add_system_dependency::<Input, Physics>().unwrap_err();
    assert!(matches!(err, WorldError::SystemCycle { .. }));
    assert!(err.to_string().contains("circular dependency detected"));

    world.update(0.016);
    assert_eq!(*log.lock(), vec!["input", "physics"]);
}

#[test]
fn lifecycle_hooks_fire_at_registration_removal_and_shutdown() {
    let world = World::new();
    let log: TickLog = Arc::new(Mutex::new(Vec::new()));

    world.add_system(Render { log: log.clone() }).unwrap();
    assert!(world.has_system::<Render>());
    world.update(0.016);

    assert!(world.remove_system::<Render>());
    assert!(!world.remove_system::<Render>());
    assert!(!world.has_system::<Render>());

    world.update(0.016);
    assert_eq!(*log.lock(), vec!["render:init", "render", "render:shutdown"]);
}

#[test]
fn world_shutdown_drains_in_reverse_order() {
    let world = World::new();
    let log: TickLog = Arc::new(Mutex::new(Vec::new()));
    world.add_system(Input { log: log.clone() }).unwrap();
    world.add_system(Render { log: log.clone() }).unwrap();

    log.lock().clear();
    world.shutdown();
    // Render registered last, shuts down first; Input has no hook.
    assert_eq!(*log.lock(), vec!["render:shutdown"]);
    world.update(0.016);
    assert!(log.lock().is_empty());
}

#[test]
fn duplicate_systems_are_rejected() {
    let world = World::new();
    let log: TickLog = Arc::new(Mutex::new(Vec::new()));
    world.add_system(Input { log: log.clone() }).unwrap();
    let err = world.add_system(Input { log }).unwrap_err();
    assert!(matches!(err, WorldError::DuplicateSystem { name: "Input" }));
}

#[test]
fn system_stats_accumulate_per_tick() {
    let world = World::new();
    let log: TickLog = Arc::new(Mutex::new(Vec::new()));
    world.add_system(Physics { log }).unwrap();

    for _ in 0..5 {
        world.update(0.016);
    }
    let stats = world.system_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].0, "Physics");
    assert_eq!(stats[0].1.runs, 5);
}
