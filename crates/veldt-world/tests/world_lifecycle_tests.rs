//! Entity lifecycle through the world facade: generational reuse, archetype
//! migration, capacity limits, and teardown sweeps.

use veldt_world::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
    dz: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Health(f32);

fn small_world() -> World {
    World::with_config(WorldConfig {
        max_entities: 64,
        ..WorldConfig::default()
    })
}

// -- 1. Generational reuse ----------------------------------------------------

#[test]
fn destroyed_slots_are_reused_with_a_bumped_generation() {
    let world = small_world();
    let a = world.create_entity().unwrap();
    let b = world.create_entity().unwrap();
    let c = world.create_entity().unwrap();

    assert!(world.destroy_entity(b));
    let d = world.create_entity().unwrap();

    assert_eq!(d.index(), b.index());
    assert_eq!(d.generation(), b.generation() + 1);
    assert!(!world.is_valid(b));
    assert!(world.is_valid(a));
    assert!(world.is_valid(c));
    assert!(world.is_valid(d));
}

#[test]
fn handles_minted_before_destruction_stay_dead_after_reuse() {
    let world = small_world();
    let original = world.create_entity().unwrap();
    world.add_component(original, Health(75.0)).unwrap();

    world.destroy_entity(original);
    let replacement = world.create_entity().unwrap();
    assert_eq!(replacement.index(), original.index());

    // The stale handle neither reads nor writes the replacement's state.
    assert!(!world.is_valid(original));
    assert!(matches!(
        world.get_component::<Health>(original),
        Err(WorldError::Ecs(EcsError::StaleEntity(_)))
    ));
    assert!(matches!(
        world.add_component(original, Health(1.0)),
        Err(WorldError::Ecs(EcsError::StaleEntity(_)))
    ));
    assert!(!world.has_component::<Health>(replacement));
}

#[test]
fn destroy_is_a_silent_no_op_on_stale_handles() {
    let world = small_world();
    let e = world.create_entity().unwrap();
    assert!(world.destroy_entity(e));
    assert!(!world.destroy_entity(e));
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn creation_past_capacity_fails_without_creating() {
    let world = World::with_config(WorldConfig {
        max_entities: 2,
        ..WorldConfig::default()
    });
    world.create_entity().unwrap();
    world.create_entity().unwrap();

    let err = world.create_entity().unwrap_err();
    assert!(matches!(
        err,
        WorldError::Ecs(EcsError::EntityCapacityExceeded { capacity: 2 })
    ));
    assert_eq!(world.entity_count(), 2);

    // Destroying frees a slot for reuse.
    let survivor = world.live_entities()[0];
    world.destroy_entity(survivor);
    world.create_entity().unwrap();
}

// -- 2. Archetype migration ------------------------------------------------------

#[test]
fn component_changes_move_entities_between_archetype_populations() {
    let world = small_world();
    let e = world.create_entity().unwrap();
    world
        .add_component(e, Position { x: 0.0, y: 0.0, z: 0.0 })
        .unwrap();

    let position = world.component_id::<Position>().unwrap();
    let pos_only = ComponentMask::from_components([position]);
    assert_eq!(world.archetype_population(pos_only), Some(1));

    world
        .add_component(e, Velocity { dx: 1.0, dy: 0.0, dz: 0.0 })
        .unwrap();
    let velocity = world.component_id::<Velocity>().unwrap();
    let pos_vel = ComponentMask::from_components([position, velocity]);

    assert_eq!(world.archetype_population(pos_only), Some(0));
    assert_eq!(world.archetype_population(pos_vel), Some(1));
    assert_eq!(world.mask_of(e), Some(pos_vel));
}

#[test]
fn entities_with_identical_component_sets_share_an_archetype() {
    let world = small_world();
    let mut members = Vec::new();
    for i in 0..8 {
        let e = world.create_entity().unwrap();
        world
            .add_component(e, Position { x: i as f32, y: 0.0, z: 0.0 })
            .unwrap();
        world
            .add_component(e, Velocity { dx: 0.0, dy: 1.0, dz: 0.0 })
            .unwrap();
        members.push(e);
    }

    let mask = world.mask_of(members[0]).unwrap();
    for &e in &members[1..] {
        assert_eq!(world.mask_of(e), Some(mask));
    }
    assert_eq!(world.archetype_population(mask), Some(8));

    // Empty-mask plus {Position} plus {Position, Velocity}.
    assert_eq!(world.archetype_count(), 3);
    world.remove_empty_archetypes();
    assert_eq!(world.archetype_count(), 1);
}

// -- 3. Teardown sweeps ----------------------------------------------------------

#[test]
fn destroying_an_entity_clears_every_table_it_touched() {
    let world = small_world();
    let parent = world.create_entity().unwrap();
    let e = world.create_entity().unwrap();
    world
        .add_component(e, Position { x: 1.0, y: 2.0, z: 3.0 })
        .unwrap();
    world.add_component(e, Health(10.0)).unwrap();
    world.set_entity_position(e, Vec3::new(1.0, 2.0, 3.0)).unwrap();
    world.set_parent(e, parent).unwrap();

    assert!(world.destroy_entity(e));

    assert_eq!(world.entity_count(), 1);
    assert!(world.entity_position(e).is_none());
    assert!(world.entity_region(e).is_none());
    assert!(world.children_of(parent).is_empty());
    assert!(world.mask_of(e).is_none());

    // Removal records exist for both components.
    let removed = world
        .changes_for_entity(e)
        .iter()
        .filter(|r| r.kind == ChangeKind::Removed)
        .count();
    assert_eq!(removed, 2);
}

#[test]
fn component_values_survive_unrelated_churn() {
    let world = small_world();
    let keeper = world.create_entity().unwrap();
    world.add_component(keeper, Health(123.0)).unwrap();

    for _ in 0..16 {
        let e = world.create_entity().unwrap();
        world.add_component(e, Health(1.0)).unwrap();
        world.destroy_entity(e);
    }

    assert_eq!(world.get_component::<Health>(keeper).unwrap(), Health(123.0));
    assert_eq!(world.entity_count(), 1);
}

// -- 4. World isolation ------------------------------------------------------------

#[test]
fn two_worlds_never_share_registries_or_state() {
    let a = small_world();
    let b = small_world();

    let ea = a.create_entity().unwrap();
    a.add_component(ea, Health(9.0)).unwrap();
    a.set_entity_position(ea, Vec3::ZERO).unwrap();

    assert_eq!(b.entity_count(), 0);
    assert!(b.component_id::<Health>().is_none());
    assert_eq!(b.region_count(), 0);
    assert_eq!(b.change_history_len(), 0);

    // Handles are meaningless across worlds: same index, different world.
    let eb = b.create_entity().unwrap();
    assert_eq!(eb.index(), ea.index());
    assert!(!b.has_component::<Health>(eb));
}
