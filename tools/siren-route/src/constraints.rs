//! Leveled feasibility predicate
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. closed road vs. `closed_road_allowed` (every level)
//! 2. clearance and weight limit (every level, never relaxed)
//! 3. lane count (levels 0-1)
//! 4. preferred road type and congestion (level 0)
//!
//! Each level drops checks and never adds one, so feasible(0) ⊆ ... ⊆ feasible(3).

use serde::{Deserialize, Serialize};

use crate::graph::RoadSegment;
use crate::profiles::VehicleProfile;

/// Relaxation level, 0 = all checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConstraintLevel {
    Full = 0,
    NoPreferences = 1,
    NoLanes = 2,
    ClosedOnly = 3,
}

impl ConstraintLevel {
    pub const ALL: [ConstraintLevel; 4] = [
        ConstraintLevel::Full,
        ConstraintLevel::NoPreferences,
        ConstraintLevel::NoLanes,
        ConstraintLevel::ClosedOnly,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self as usize + 1).copied()
    }

    pub fn checks_lanes(self) -> bool {
        self <= ConstraintLevel::NoPreferences
    }

    pub fn checks_preferences(self) -> bool {
        self == ConstraintLevel::Full
    }
}

impl From<ConstraintLevel> for u8 {
    fn from(level: ConstraintLevel) -> Self {
        level.as_u8()
    }
}

impl TryFrom<u8> for ConstraintLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| format!("constraint level must be 0..=3, got {value}"))
    }
}

impl std::fmt::Display for ConstraintLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// First check a segment fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    Closed,
    Height,
    Weight,
    Lanes,
    RoadType,
    Congestion,
}

impl Violation {
    /// Height and weight are physical and survive every relaxation
    pub fn is_physical(self) -> bool {
        matches!(self, Violation::Height | Violation::Weight)
    }
}

/// Scaled congestion the vehicle would experience on a segment
pub fn scaled_congestion(multiplier: f64, profile: &VehicleProfile) -> f64 {
    (multiplier - 1.0).max(0.0) * profile.traffic_sensitivity
}

/// Clearance and weight limit only
pub fn physical_violation(segment: &RoadSegment, profile: &VehicleProfile) -> Option<Violation> {
    if segment.max_height_m.is_some_and(|clearance| profile.max_height_m > clearance) {
        return Some(Violation::Height);
    }
    if segment.max_weight_t.is_some_and(|limit| profile.max_weight_t > limit) {
        return Some(Violation::Weight);
    }
    None
}

pub fn check(
    segment: &RoadSegment,
    multiplier: f64,
    profile: &VehicleProfile,
    level: ConstraintLevel,
) -> Option<Violation> {
    if segment.closed && !profile.closed_road_allowed {
        return Some(Violation::Closed);
    }
    if let Some(v) = physical_violation(segment, profile) {
        return Some(v);
    }
    if level.checks_lanes() && segment.lanes.is_some_and(|lanes| lanes < profile.min_lanes) {
        return Some(Violation::Lanes);
    }
    if level.checks_preferences() {
        if !profile.preferred_road_types.contains(segment.road_type) {
            return Some(Violation::RoadType);
        }
        if scaled_congestion(multiplier, profile) > profile.congestion_limit {
            return Some(Violation::Congestion);
        }
    }
    None
}

/// Whether `profile` may use `segment` at `level` given its traffic multiplier
pub fn is_traversable(
    segment: &RoadSegment,
    multiplier: f64,
    profile: &VehicleProfile,
    level: ConstraintLevel,
) -> bool {
    check(segment, multiplier, profile, level).is_none()
}
