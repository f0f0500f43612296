//! Level-of-detail classification against a single observer.
//!
//! Every positioned entity falls into one of four bands by Euclidean distance
//! to the observer: [`LodLevel::High`] out to the high threshold,
//! [`LodLevel::Medium`] and [`LodLevel::Low`] out to theirs, and
//! [`LodLevel::Culled`] beyond. Classifications are cached per entity and
//! recomputed only once the refresh interval has elapsed, so a stationary
//! scene costs one distance calculation per entity per interval rather than
//! per frame. Moving the observer throws the whole cache away.

use std::collections::HashMap;

use veldt_ecs::prelude::Entity;

use crate::region::Vec3;
use crate::WorldError;

// ---------------------------------------------------------------------------
// LodLevel
// ---------------------------------------------------------------------------

/// Detail band for one entity, nearest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LodLevel {
    /// Full detail, within the high-distance threshold.
    High,
    /// Reduced detail.
    Medium,
    /// Minimal detail.
    Low,
    /// Beyond the low-distance threshold; skip entirely.
    Culled,
}

// ---------------------------------------------------------------------------
// LodManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CachedLod {
    level: LodLevel,
    computed_at_ms: u64,
}

/// Observer position, distance thresholds, and the per-entity cache.
#[derive(Debug)]
pub struct LodManager {
    observer: Vec3,
    high: f32,
    medium: f32,
    low: f32,
    refresh_interval_ms: u64,
    cache: HashMap<Entity, CachedLod>,
}

impl LodManager {
    /// Create a manager with ascending thresholds and a refresh rate in Hz.
    ///
    /// # Panics
    ///
    /// Panics when the thresholds are not strictly ascending from zero or the
    /// refresh rate is not positive and finite.
    pub fn new(high: f32, medium: f32, low: f32, refresh_hz: f32) -> Self {
        assert!(
            ascending(high, medium, low),
            "LOD distances must be ascending: {high} < {medium} < {low}"
        );
        assert!(
            refresh_hz > 0.0 && refresh_hz.is_finite(),
            "LOD refresh rate must be positive and finite, got {refresh_hz}"
        );
        Self {
            observer: Vec3::ZERO,
            high,
            medium,
            low,
            refresh_interval_ms: (1000.0 / refresh_hz) as u64,
            cache: HashMap::new(),
        }
    }

    /// Classify `entity` at `pos`, reusing the cached band until the refresh
    /// interval has elapsed.
    pub fn calculate_lod(&mut self, entity: Entity, pos: Vec3, now_ms: u64) -> LodLevel {
        if let Some(cached) = self.cache.get(&entity) {
            if now_ms.saturating_sub(cached.computed_at_ms) < self.refresh_interval_ms {
                return cached.level;
            }
        }
        let level = self.classify(self.observer.distance(pos));
        self.cache.insert(
            entity,
            CachedLod {
                level,
                computed_at_ms: now_ms,
            },
        );
        level
    }

    /// The band a distance falls into; thresholds are inclusive.
    pub fn classify(&self, distance: f32) -> LodLevel {
        if distance <= self.high {
            LodLevel::High
        } else if distance <= self.medium {
            LodLevel::Medium
        } else if distance <= self.low {
            LodLevel::Low
        } else {
            LodLevel::Culled
        }
    }

    /// The cached band for `entity`, without recomputing.
    pub fn cached_lod(&self, entity: Entity) -> Option<LodLevel> {
        self.cache.get(&entity).map(|c| c.level)
    }

    /// Move the observer and invalidate every cached classification.
    pub fn set_observer_position(&mut self, pos: Vec3) {
        self.observer = pos;
        self.cache.clear();
    }

    /// Current observer position.
    pub fn observer_position(&self) -> Vec3 {
        self.observer
    }

    /// Replace the thresholds and invalidate the cache.
    ///
    /// # Errors
    ///
    /// [`WorldError::InvalidLodDistances`] when the triple is not strictly
    /// ascending from zero.
    pub fn set_distances(&mut self, high: f32, medium: f32, low: f32) -> Result<(), WorldError> {
        if !ascending(high, medium, low) {
            return Err(WorldError::InvalidLodDistances { high, medium, low });
        }
        self.high = high;
        self.medium = medium;
        self.low = low;
        self.cache.clear();
        Ok(())
    }

    /// The current `(high, medium, low)` thresholds.
    pub fn distances(&self) -> (f32, f32, f32) {
        (self.high, self.medium, self.low)
    }

    /// Milliseconds between recomputations of one entity's band.
    pub fn refresh_interval_ms(&self) -> u64 {
        self.refresh_interval_ms
    }

    /// Drop one entity's cached classification.
    pub fn invalidate(&mut self, entity: Entity) {
        self.cache.remove(&entity);
    }

    /// Number of entities with a cached classification.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

fn ascending(high: f32, medium: f32, low: f32) -> bool {
    0.0 < high && high < medium && medium < low && low.is_finite()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
