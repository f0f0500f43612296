//! Spatial partitioning: region coordinates, packed region keys, and the
//! table that tracks which entities occupy which cell.
//!
//! Space is divided into a uniform grid of cubic cells (`cell_size` world
//! units per side). A cell is identified by its integer [`RegionCoords`],
//! which pack into a single `u64` key (21 bits for x, 21 for y, 22 for z,
//! two's complement). Regions are created lazily the first time an entity
//! lands in them and carry an `active` flag driven by the active bounds:
//! [`SpatialTable::cleanup_inactive_regions`] deletes out-of-bounds regions
//! that are empty and merely deactivates those that still hold entities.

use std::collections::HashMap;

use indexmap::IndexSet;
use veldt_ecs::prelude::Entity;

// ---------------------------------------------------------------------------
// Vec3
// ---------------------------------------------------------------------------

/// A world-space position.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// The origin.
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    /// Construct from components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared Euclidean distance to `other`.
    pub fn distance_squared(self, other: Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Vec3) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

// ---------------------------------------------------------------------------
// RegionCoords
// ---------------------------------------------------------------------------

const X_BITS: u32 = 21;
const Y_BITS: u32 = 21;
const Z_BITS: u32 = 22;

const fn field_mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

fn sign_extend(value: u64, bits: u32) -> i32 {
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as i32
}

/// Integer grid coordinates of one region cell.
///
/// Coordinates pack into a `u64` key: x and y each occupy 21 bits
/// (`-1_048_576 ..= 1_048_575`), z occupies 22 (`-2_097_152 ..= 2_097_151`).
/// Values outside a field's range wrap modulo the field width.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct RegionCoords {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl RegionCoords {
    /// Construct from grid coordinates.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The cell containing `pos`, with each axis floored to the grid.
    pub fn from_position(pos: Vec3, cell_size: f32) -> Self {
        Self {
            x: (pos.x / cell_size).floor() as i32,
            y: (pos.y / cell_size).floor() as i32,
            z: (pos.z / cell_size).floor() as i32,
        }
    }

    /// Pack into the 21/21/22-bit key.
    pub fn key(self) -> u64 {
        let x = (self.x as u64) & field_mask(X_BITS);
        let y = (self.y as u64) & field_mask(Y_BITS);
        let z = (self.z as u64) & field_mask(Z_BITS);
        (x << (Y_BITS + Z_BITS)) | (y << Z_BITS) | z
    }

    /// Unpack a key produced by [`key`](Self::key), sign-extending each field.
    pub fn from_key(key: u64) -> Self {
        Self {
            x: sign_extend((key >> (Y_BITS + Z_BITS)) & field_mask(X_BITS), X_BITS),
            y: sign_extend((key >> Z_BITS) & field_mask(Y_BITS), Y_BITS),
            z: sign_extend(key & field_mask(Z_BITS), Z_BITS),
        }
    }

    /// World position of the cell's minimum corner.
    pub fn origin(self, cell_size: f32) -> Vec3 {
        Vec3::new(
            self.x as f32 * cell_size,
            self.y as f32 * cell_size,
            self.z as f32 * cell_size,
        )
    }
}

// ---------------------------------------------------------------------------
// WorldRegion
// ---------------------------------------------------------------------------

/// One grid cell: its coordinates, the entities currently inside it, and
/// whether it lies within the active bounds.
#[derive(Debug)]
pub struct WorldRegion {
    coords: RegionCoords,
    entities: IndexSet<Entity>,
    active: bool,
}

impl WorldRegion {
    fn new(coords: RegionCoords, active: bool) -> Self {
        Self {
            coords,
            entities: IndexSet::new(),
            active,
        }
    }

    /// Grid coordinates of this region.
    pub fn coords(&self) -> RegionCoords {
        self.coords
    }

    /// Number of entities in this region.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entities occupy this region.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether `entity` occupies this region.
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(&entity)
    }

    /// Whether the region lies within the active bounds.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The entities in this region, in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// SpatialTable
// ---------------------------------------------------------------------------

/// Entity positions and the lazily created regions they map onto.
#[derive(Debug)]
pub struct SpatialTable {
    cell_size: f32,
    bounds_min: Vec3,
    bounds_max: Vec3,
    regions: HashMap<u64, WorldRegion>,
    /// Per-entity position plus the key of the region currently holding it.
    positions: HashMap<Entity, (Vec3, u64)>,
}

impl SpatialTable {
    /// Create an empty table.
    ///
    /// # Panics
    ///
    /// Panics when `cell_size` is not positive and finite, or when the bounds
    /// are inverted on any axis.
    pub fn new(cell_size: f32, bounds_min: Vec3, bounds_max: Vec3) -> Self {
        assert!(
            cell_size > 0.0 && cell_size.is_finite(),
            "cell_size must be positive and finite, got {cell_size}"
        );
        assert_bounds(bounds_min, bounds_max);
        Self {
            cell_size,
            bounds_min,
            bounds_max,
            regions: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    /// Side length of one cell in world units.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Place `entity` at `pos`, moving its region membership when the
    /// position crosses a cell boundary. Returns the cell it now occupies.
    pub fn set_entity_position(&mut self, entity: Entity, pos: Vec3) -> RegionCoords {
        let coords = RegionCoords::from_position(pos, self.cell_size);
        let key = coords.key();

        if let Some(&(_, old_key)) = self.positions.get(&entity) {
            if old_key != key {
                if let Some(region) = self.regions.get_mut(&old_key) {
                    region.entities.shift_remove(&entity);
                }
            }
        }

        let active = self.is_in_bounds(coords.origin(self.cell_size));
        self.regions
            .entry(key)
            .or_insert_with(|| WorldRegion::new(coords, active))
            .entities
            .insert(entity);
        self.positions.insert(entity, (pos, key));
        coords
    }

    /// The last position given to [`set_entity_position`](Self::set_entity_position).
    pub fn position_of(&self, entity: Entity) -> Option<Vec3> {
        self.positions.get(&entity).map(|&(pos, _)| pos)
    }

    /// The cell currently holding `entity`.
    pub fn region_coords_of(&self, entity: Entity) -> Option<RegionCoords> {
        self.positions
            .get(&entity)
            .map(|&(_, key)| RegionCoords::from_key(key))
    }

    /// Drop `entity`'s position and region membership. Returns whether the
    /// entity was tracked.
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        match self.positions.remove(&entity) {
            Some((_, key)) => {
                if let Some(region) = self.regions.get_mut(&key) {
                    region.entities.shift_remove(&entity);
                }
                true
            }
            None => false,
        }
    }

    /// The region at `coords`, if one has been created.
    pub fn region(&self, coords: RegionCoords) -> Option<&WorldRegion> {
        self.regions.get(&coords.key())
    }

    /// The entities occupying the cell at `coords`.
    pub fn entities_in(&self, coords: RegionCoords) -> impl Iterator<Item = Entity> + '_ {
        self.regions
            .get(&coords.key())
            .into_iter()
            .flat_map(|region| region.entities())
    }

    /// Replace the active bounds. Flags are reconciled by the next
    /// [`cleanup_inactive_regions`](Self::cleanup_inactive_regions) pass.
    ///
    /// # Panics
    ///
    /// Panics when the bounds are inverted on any axis.
    pub fn set_active_bounds(&mut self, min: Vec3, max: Vec3) {
        assert_bounds(min, max);
        self.bounds_min = min;
        self.bounds_max = max;
    }

    /// Reconcile every region against the active bounds.
    ///
    /// Out-of-bounds regions are deleted when empty and deactivated when they
    /// still hold entities; in-bounds regions are (re)activated. Returns
    /// `(removed, deactivated)` counts.
    pub fn cleanup_inactive_regions(&mut self) -> (usize, usize) {
        let mut removed = 0;
        let mut deactivated = 0;

        self.regions.retain(|_, region| {
            let in_bounds = in_bounds(
                region.coords.origin(self.cell_size),
                self.bounds_min,
                self.bounds_max,
            );
            if in_bounds {
                region.active = true;
                return true;
            }
            if region.is_empty() {
                removed += 1;
                return false;
            }
            if region.active {
                deactivated += 1;
                region.active = false;
            }
            true
        });

        if removed > 0 || deactivated > 0 {
            tracing::debug!(removed, deactivated, "region cleanup");
        }
        (removed, deactivated)
    }

    /// Whether a world position falls inside the active bounds (inclusive).
    pub fn is_in_bounds(&self, pos: Vec3) -> bool {
        in_bounds(pos, self.bounds_min, self.bounds_max)
    }

    /// Number of regions currently materialized.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Number of materialized regions inside the active bounds.
    pub fn active_region_count(&self) -> usize {
        self.regions.values().filter(|r| r.active).count()
    }

    /// Number of entities with a tracked position.
    pub fn tracked_entities(&self) -> usize {
        self.positions.len()
    }

    /// All materialized regions, in no particular order.
    pub fn regions(&self) -> impl Iterator<Item = &WorldRegion> {
        self.regions.values()
    }
}

fn in_bounds(pos: Vec3, min: Vec3, max: Vec3) -> bool {
    pos.x >= min.x
        && pos.x <= max.x
        && pos.y >= min.y
        && pos.y <= max.y
        && pos.z >= min.z
        && pos.z <= max.z
}

fn assert_bounds(min: Vec3, max: Vec3) {
    assert!(
        min.x <= max.x && min.y <= max.y && min.z <= max.z,
        "active bounds are inverted: min {min:?}, max {max:?}"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
