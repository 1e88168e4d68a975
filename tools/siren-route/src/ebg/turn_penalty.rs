///! Turn penalty cost model - angle-class based turn costs
///!
///! The deviation between the incoming and outgoing bearing picks a class:
///! - straight (<= 15°) ~ 0s
///! - slight   (<= 45°) small
///! - moderate (<= 90°) medium
///! - sharp    (<= 135°) large
///! - U-turn   (> 135°) very large, taken only when nothing else is usable
///!
///! Thresholds and penalties are tunables; the defaults below are a starting
///! point, not calibrated values.

use serde::{Deserialize, Serialize};
use siren_common::{Error, Result};

use crate::geo::turn_angle;

/// Turn classification by absolute deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnClass {
    Straight,
    Slight,
    Moderate,
    Sharp,
    UTurn,
}

impl TurnClass {
    pub fn name(&self) -> &'static str {
        match self {
            TurnClass::Straight => "straight",
            TurnClass::Slight => "slight",
            TurnClass::Moderate => "moderate",
            TurnClass::Sharp => "sharp",
            TurnClass::UTurn => "u-turn",
        }
    }
}

/// Turn geometry for a single turn (a → b at intersection)
#[derive(Debug, Clone, Copy)]
pub struct TurnGeometry {
    /// Signed turn angle (-180, 180], positive = right
    pub angle_deg: f64,
    pub class: TurnClass,
}

impl TurnGeometry {
    /// Compute turn geometry from the bearings of the two segments.
    ///
    /// A missing bearing (zero-length segment, self-loop) counts as straight.
    pub fn compute(
        from_bearing: Option<f64>,
        to_bearing: Option<f64>,
        config: &TurnPenaltyConfig,
    ) -> Self {
        let angle_deg = match (from_bearing, to_bearing) {
            (Some(from), Some(to)) => turn_angle(from, to),
            _ => 0.0,
        };
        Self {
            angle_deg,
            class: config.classify(angle_deg.abs()),
        }
    }

    pub fn is_left(&self) -> bool {
        self.angle_deg < 0.0
    }

    pub fn is_uturn(&self) -> bool {
        self.class == TurnClass::UTurn
    }
}

/// Turn penalty configuration, in degrees and seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnPenaltyConfig {
    pub straight_max_deg: f64,
    pub slight_max_deg: f64,
    pub moderate_max_deg: f64,
    pub sharp_max_deg: f64,

    pub straight_s: f64,
    pub slight_s: f64,
    pub moderate_s: f64,
    pub sharp_s: f64,
    pub u_turn_s: f64,

    /// Multiplier on left-turn penalties (crossing oncoming traffic).
    /// 1.0 keeps costs symmetric.
    pub left_turn_factor: f64,
}

impl Default for TurnPenaltyConfig {
    fn default() -> Self {
        Self {
            straight_max_deg: 15.0,
            slight_max_deg: 45.0,
            moderate_max_deg: 90.0,
            sharp_max_deg: 135.0,
            straight_s: 0.0,
            slight_s: 2.0,
            moderate_s: 5.0,
            sharp_s: 10.0,
            u_turn_s: 30.0,
            left_turn_factor: 1.0,
        }
    }
}

impl TurnPenaltyConfig {
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            self.straight_max_deg,
            self.slight_max_deg,
            self.moderate_max_deg,
            self.sharp_max_deg,
        ];
        if thresholds[0] < 0.0
            || thresholds[3] > 180.0
            || thresholds.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(Error::Config(format!(
                "turn thresholds must increase strictly within [0, 180], got {thresholds:?}"
            )));
        }

        let penalties = [
            self.straight_s,
            self.slight_s,
            self.moderate_s,
            self.sharp_s,
            self.u_turn_s,
        ];
        if penalties.iter().any(|p| !p.is_finite() || *p < 0.0)
            || penalties.windows(2).any(|w| w[0] > w[1])
        {
            return Err(Error::Config(format!(
                "turn penalties must be non-negative and non-decreasing, got {penalties:?}"
            )));
        }

        if !self.left_turn_factor.is_finite() || self.left_turn_factor < 1.0 {
            return Err(Error::Config(format!(
                "left_turn_factor must be >= 1.0, got {}",
                self.left_turn_factor
            )));
        }
        Ok(())
    }

    /// Classify an absolute deviation in degrees
    pub fn classify(&self, deviation_deg: f64) -> TurnClass {
        if deviation_deg <= self.straight_max_deg {
            TurnClass::Straight
        } else if deviation_deg <= self.slight_max_deg {
            TurnClass::Slight
        } else if deviation_deg <= self.moderate_max_deg {
            TurnClass::Moderate
        } else if deviation_deg <= self.sharp_max_deg {
            TurnClass::Sharp
        } else {
            TurnClass::UTurn
        }
    }

    fn class_penalty(&self, class: TurnClass) -> f64 {
        match class {
            TurnClass::Straight => self.straight_s,
            TurnClass::Slight => self.slight_s,
            TurnClass::Moderate => self.moderate_s,
            TurnClass::Sharp => self.sharp_s,
            TurnClass::UTurn => self.u_turn_s,
        }
    }
}

/// Additive turn cost in seconds; never negative
pub fn compute_turn_penalty(geom: &TurnGeometry, config: &TurnPenaltyConfig) -> f64 {
    let base = config.class_penalty(geom.class);
    if geom.is_left() && !geom.is_uturn() {
        base * config.left_turn_factor
    } else {
        base
    }
}
