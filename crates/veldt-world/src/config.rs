//! World construction parameters.
//!
//! [`WorldConfig`] gathers every tunable the world needs up front: entity
//! capacity, change-history depth, spatial grid geometry, LOD distances and
//! refresh rate, and pool chunk sizing. All fields have serde defaults, so a
//! JSON config may specify only the handful it cares about:
//!
//! ```
//! use veldt_world::config::WorldConfig;
//!
//! let config = WorldConfig::from_json(r#"{ "max_entities": 4096 }"#).unwrap();
//! assert_eq!(config.max_entities, 4096);
//! assert_eq!(config.region_cell_size, 1000.0);
//! ```

use std::path::Path;

use crate::region::Vec3;

// ---------------------------------------------------------------------------
// WorldConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`World`](crate::world::World).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Maximum number of live entities. Creation past this fails.
    pub max_entities: u32,
    /// Number of change records retained before the oldest are evicted.
    pub change_history_capacity: usize,
    /// Side length of one spatial region cell, in world units.
    pub region_cell_size: f32,
    /// Minimum corner of the initially active region bounds.
    pub active_bounds_min: Vec3,
    /// Maximum corner of the initially active region bounds.
    pub active_bounds_max: Vec3,
    /// Distance up to which entities render at full detail.
    pub lod_high_distance: f32,
    /// Distance up to which entities render at medium detail.
    pub lod_medium_distance: f32,
    /// Distance up to which entities render at low detail; beyond is culled.
    pub lod_low_distance: f32,
    /// How often cached LOD classifications are recomputed, in Hz.
    pub lod_refresh_hz: f32,
    /// Blocks per chunk for the fixed-block memory pools.
    pub blocks_per_chunk: usize,
}

impl Default for WorldConfig {
    /// One million entities, 10k history records, 1000-unit cells bounded at
    /// ±5000, LOD bands at 100/500/1000 refreshed at 10 Hz, 256-block chunks.
    fn default() -> Self {
        Self {
            max_entities: 1_000_000,
            change_history_capacity: 10_000,
            region_cell_size: 1000.0,
            active_bounds_min: Vec3::new(-5000.0, -5000.0, -5000.0),
            active_bounds_max: Vec3::new(5000.0, 5000.0, 5000.0),
            lod_high_distance: 100.0,
            lod_medium_distance: 500.0,
            lod_low_distance: 1000.0,
            lod_refresh_hz: 10.0,
            blocks_per_chunk: 256,
        }
    }
}

impl WorldConfig {
    /// Parse a config from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        let config: WorldConfig = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("failed to parse world config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read world config {}: {e}", path.display()))?;
        Self::from_json(&text)
    }

    /// Check every field for internal consistency.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_entities == 0 {
            return Err(anyhow::anyhow!("max_entities must be at least 1"));
        }
        if self.change_history_capacity == 0 {
            return Err(anyhow::anyhow!("change_history_capacity must be at least 1"));
        }
        if !(self.region_cell_size > 0.0 && self.region_cell_size.is_finite()) {
            return Err(anyhow::anyhow!(
                "region_cell_size must be positive and finite, got {}",
                self.region_cell_size
            ));
        }
        let (min, max) = (self.active_bounds_min, self.active_bounds_max);
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(anyhow::anyhow!(
                "active bounds are inverted: min {min:?}, max {max:?}"
            ));
        }
        if !(0.0 < self.lod_high_distance
            && self.lod_high_distance < self.lod_medium_distance
            && self.lod_medium_distance < self.lod_low_distance
            && self.lod_low_distance.is_finite())
        {
            return Err(anyhow::anyhow!(
                "LOD distances must be ascending: {} < {} < {}",
                self.lod_high_distance,
                self.lod_medium_distance,
                self.lod_low_distance
            ));
        }
        if !(self.lod_refresh_hz > 0.0 && self.lod_refresh_hz.is_finite()) {
            return Err(anyhow::anyhow!(
                "lod_refresh_hz must be positive and finite, got {}",
                self.lod_refresh_hz
            ));
        }
        if self.blocks_per_chunk == 0 {
            return Err(anyhow::anyhow!("blocks_per_chunk must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
