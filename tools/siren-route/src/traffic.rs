//! Simulated traffic multipliers
//!
//! The live state is an `Arc<TrafficSnapshot>` behind a lock. Searches clone
//! the `Arc` once and never see a later resample; a resample builds a whole new
//! snapshot and swaps it in.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use siren_common::{Error, Result};
use std::sync::Arc;

use crate::graph::RoadSegment;
use crate::profiles::VehicleProfile;

/// `[traffic]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    /// Fixed seed for reproducible runs; entropy when absent
    pub seed: Option<u64>,
    /// Draw fresh multipliers before every route request
    pub resample_per_request: bool,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            min_multiplier: 1.0,
            max_multiplier: 2.0,
            seed: None,
            resample_per_request: false,
        }
    }
}

impl TrafficConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_multiplier.is_finite() || self.min_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "traffic.min_multiplier must be >= 1.0, got {}",
                self.min_multiplier
            )));
        }
        if !self.max_multiplier.is_finite() || self.max_multiplier < self.min_multiplier {
            return Err(Error::Config(format!(
                "traffic.max_multiplier must be >= min_multiplier ({}), got {}",
                self.min_multiplier, self.max_multiplier
            )));
        }
        Ok(())
    }
}

/// Immutable multipliers for one traffic version
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSnapshot {
    version: u64,
    /// Segment set the multipliers are indexed for; bumped by `rebind`
    binding: u64,
    multipliers: Vec<f64>,
}

impl TrafficSnapshot {
    /// Free-flow traffic (every multiplier 1.0)
    pub fn free_flow(n_segments: usize) -> Self {
        Self {
            version: 0,
            binding: 0,
            multipliers: vec![1.0; n_segments],
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn binding(&self) -> u64 {
        self.binding
    }

    /// Multiplier for a segment index; unknown segments are free-flowing
    pub fn multiplier(&self, seg: u32) -> f64 {
        self.multipliers.get(seg as usize).copied().unwrap_or(1.0)
    }

    pub fn len(&self) -> usize {
        self.multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }
}

/// Base travel time scaled by congestion as this vehicle feels it
pub fn effective_cost(segment: &RoadSegment, multiplier: f64, profile: &VehicleProfile) -> f64 {
    segment.base_travel_time_s() * (1.0 + (multiplier - 1.0) * profile.traffic_sensitivity)
}

#[derive(Debug)]
pub struct TrafficSimulator {
    config: TrafficConfig,
    current: RwLock<Arc<TrafficSnapshot>>,
    rng: Mutex<StdRng>,
}

impl TrafficSimulator {
    /// Create a simulator for `n_segments` and draw the first snapshot
    pub fn new(n_segments: usize, config: TrafficConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let sim = Self {
            config,
            current: RwLock::new(Arc::new(TrafficSnapshot::free_flow(n_segments))),
            rng: Mutex::new(rng),
        };
        sim.resample(None);
        sim
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    /// Current immutable view; cheap `Arc` clone
    pub fn snapshot(&self) -> Arc<TrafficSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Draw new multipliers for every segment and publish them atomically.
    ///
    /// With `seed`, the draw is reproducible and independent of earlier draws.
    pub fn resample(&self, seed: Option<u64>) -> Arc<TrafficSnapshot> {
        let mut current = self.current.write();
        let (n_segments, binding) = (current.len(), current.binding);
        self.publish_with(&mut current, n_segments, binding, seed)
    }

    /// Resize to a new segment set (graph replacement) and resample. The
    /// returned snapshot carries a new binding.
    pub fn rebind(&self, n_segments: usize) -> Arc<TrafficSnapshot> {
        let mut current = self.current.write();
        let binding = current.binding + 1;
        self.publish_with(&mut current, n_segments, binding, None)
    }

    /// Publish explicit multipliers, e.g. from an external feed
    pub fn set_multipliers(&self, multipliers: Vec<f64>) -> Result<Arc<TrafficSnapshot>> {
        if let Some(bad) = multipliers.iter().find(|m| !m.is_finite() || **m < 1.0) {
            return Err(Error::InvalidRequest(format!(
                "traffic multipliers must be finite and >= 1.0, got {bad}"
            )));
        }
        let mut current = self.current.write();
        let binding = current.binding;
        Ok(publish(&mut current, multipliers, binding))
    }

    // Callers hold the write lock from reading the segment count to the swap,
    // so a draw can never land on a segment set it was not sized for.
    fn publish_with(
        &self,
        current: &mut Arc<TrafficSnapshot>,
        n_segments: usize,
        binding: u64,
        seed: Option<u64>,
    ) -> Arc<TrafficSnapshot> {
        let (lo, hi) = (self.config.min_multiplier, self.config.max_multiplier);
        let multipliers = match seed {
            Some(seed) => draw(&mut StdRng::seed_from_u64(seed), n_segments, lo, hi),
            None => draw(&mut *self.rng.lock(), n_segments, lo, hi),
        };
        publish(current, multipliers, binding)
    }
}

fn publish(
    current: &mut Arc<TrafficSnapshot>,
    multipliers: Vec<f64>,
    binding: u64,
) -> Arc<TrafficSnapshot> {
    let snapshot = Arc::new(TrafficSnapshot {
        version: current.version + 1,
        binding,
        multipliers,
    });
    *current = Arc::clone(&snapshot);
    tracing::debug!(
        version = snapshot.version,
        binding,
        segments = snapshot.len(),
        "traffic snapshot published"
    );
    snapshot
}

fn draw<R: Rng>(rng: &mut R, n: usize, lo: f64, hi: f64) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let m: f64 = rng.random_range(lo..=hi);
            // two decimals keep logged snapshots readable
            ((m * 100.0).round() / 100.0).clamp(lo, hi)
        })
        .collect()
}
