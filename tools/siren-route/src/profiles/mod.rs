///! Vehicle profiles - physical limits and routing preferences per vehicle type
///!
///! The set of vehicle types is closed. Profiles carry data only; feasibility
///! is decided by `constraints::is_traversable` over (segment, profile, level).

use serde::{Deserialize, Serialize};
use siren_common::{Error, Result};

use crate::graph::RoadType;

/// Emergency vehicle type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Ambulance,
    FireEngine,
    Police,
}

impl VehicleKind {
    pub fn all() -> &'static [VehicleKind] {
        &[VehicleKind::Ambulance, VehicleKind::FireEngine, VehicleKind::Police]
    }

    pub fn name(&self) -> &'static str {
        match self {
            VehicleKind::Ambulance => "ambulance",
            VehicleKind::FireEngine => "fire_engine",
            VehicleKind::Police => "police",
        }
    }

    /// Accepted alternative spellings
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            VehicleKind::Ambulance => &[],
            VehicleKind::FireEngine => &["fire"],
            VehicleKind::Police => &["police_units"],
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let needle = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == needle || kind.aliases().contains(&needle.as_str()))
    }

    /// Parse a vehicle type, suggesting the closest known name on failure
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_name(name).ok_or_else(|| Error::unknown_vehicle(name, &Self::known_names()))
    }

    /// Canonical names followed by aliases
    pub fn known_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Self::all().iter().map(|k| k.name()).collect();
        names.extend(Self::all().iter().flat_map(|k| k.aliases().iter().copied()));
        names
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of road classes, one bit per `RoadType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<RoadType>", into = "Vec<RoadType>")]
pub struct RoadTypeSet(u8);

impl RoadTypeSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, road_type: RoadType) -> bool {
        self.0 & road_type.bit() != 0
    }

    pub fn insert(&mut self, road_type: RoadType) {
        self.0 |= road_type.bit();
    }

    pub fn iter(&self) -> impl Iterator<Item = RoadType> + '_ {
        RoadType::all().iter().copied().filter(move |rt| self.contains(*rt))
    }
}

impl FromIterator<RoadType> for RoadTypeSet {
    fn from_iter<I: IntoIterator<Item = RoadType>>(iter: I) -> Self {
        let mut set = Self::empty();
        for road_type in iter {
            set.insert(road_type);
        }
        set
    }
}

impl From<Vec<RoadType>> for RoadTypeSet {
    fn from(types: Vec<RoadType>) -> Self {
        types.into_iter().collect()
    }
}

impl From<RoadTypeSet> for Vec<RoadType> {
    fn from(set: RoadTypeSet) -> Self {
        set.iter().collect()
    }
}

/// Per-vehicle limits and preferences
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleProfile {
    pub kind: VehicleKind,
    /// Vehicle height in meters; segments with lower clearance are impassable
    pub max_height_m: f64,
    /// Vehicle weight in tonnes
    pub max_weight_t: f64,
    pub min_lanes: u32,
    /// Scales how strongly congestion slows this vehicle
    pub traffic_sensitivity: f64,
    pub closed_road_allowed: bool,
    pub preferred_road_types: RoadTypeSet,
    /// Largest scaled congestion `(multiplier - 1) * sensitivity` accepted at level 0
    pub congestion_limit: f64,
}

impl VehicleProfile {
    pub fn builtin(kind: VehicleKind) -> Self {
        let urban: RoadTypeSet = [
            RoadType::Primary,
            RoadType::Secondary,
            RoadType::Tertiary,
            RoadType::Residential,
        ]
        .into_iter()
        .collect();

        match kind {
            VehicleKind::Ambulance => Self {
                kind,
                max_height_m: 3.0,
                max_weight_t: 4.0,
                min_lanes: 1,
                traffic_sensitivity: 1.0,
                closed_road_allowed: false,
                preferred_road_types: urban,
                congestion_limit: 0.6,
            },
            VehicleKind::FireEngine => Self {
                kind,
                max_height_m: 3.5,
                max_weight_t: 12.0,
                min_lanes: 2,
                traffic_sensitivity: 2.0,
                closed_road_allowed: false,
                preferred_road_types: urban,
                congestion_limit: 0.6,
            },
            VehicleKind::Police => Self {
                kind,
                max_height_m: 2.5,
                max_weight_t: 2.5,
                min_lanes: 1,
                traffic_sensitivity: 2.0,
                closed_road_allowed: true,
                preferred_road_types: urban,
                congestion_limit: 0.6,
            },
        }
    }

    /// Layer configured overrides on top of this profile
    pub fn with_overrides(mut self, ov: &ProfileOverride) -> Self {
        if let Some(v) = ov.max_height_m {
            self.max_height_m = v;
        }
        if let Some(v) = ov.max_weight_t {
            self.max_weight_t = v;
        }
        if let Some(v) = ov.min_lanes {
            self.min_lanes = v;
        }
        if let Some(v) = ov.traffic_sensitivity {
            self.traffic_sensitivity = v;
        }
        if let Some(v) = ov.closed_road_allowed {
            self.closed_road_allowed = v;
        }
        if let Some(types) = &ov.preferred_road_types {
            self.preferred_road_types = types.iter().map(|t| RoadType::from_tag(t)).collect();
        }
        if let Some(v) = ov.congestion_limit {
            self.congestion_limit = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_height_m", self.max_height_m),
            ("max_weight_t", self.max_weight_t),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config(format!(
                    "profile {}: {field} must be positive, got {value}",
                    self.kind
                )));
            }
        }
        let non_negative = [
            ("traffic_sensitivity", self.traffic_sensitivity),
            ("congestion_limit", self.congestion_limit),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "profile {}: {field} must be non-negative, got {value}",
                    self.kind
                )));
            }
        }
        Ok(())
    }
}

/// Optional per-field profile overrides from `[profiles.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverride {
    pub max_height_m: Option<f64>,
    pub max_weight_t: Option<f64>,
    pub min_lanes: Option<u32>,
    pub traffic_sensitivity: Option<f64>,
    pub closed_road_allowed: Option<bool>,
    /// OSM highway values or class names
    pub preferred_road_types: Option<Vec<String>>,
    pub congestion_limit: Option<f64>,
}

/// One profile per vehicle type, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSet {
    profiles: Vec<VehicleProfile>,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self {
            profiles: VehicleKind::all().iter().map(|&k| VehicleProfile::builtin(k)).collect(),
        }
    }
}

impl ProfileSet {
    /// Built-in profiles with overrides keyed by vehicle name or alias
    pub fn with_overrides<'a, I>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a ProfileOverride)>,
    {
        let mut set = Self::default();
        for (name, ov) in overrides {
            let kind = VehicleKind::parse(name)?;
            let idx = kind.index();
            set.profiles[idx] = set.profiles[idx].clone().with_overrides(ov);
        }
        for profile in &set.profiles {
            profile.validate()?;
        }
        Ok(set)
    }

    pub fn get(&self, kind: VehicleKind) -> &VehicleProfile {
        &self.profiles[kind.index()]
    }

    /// Look up by name; unknown names yield `UnknownVehicle` with a suggestion
    pub fn resolve(&self, name: &str) -> Result<&VehicleProfile> {
        VehicleKind::parse(name).map(|kind| self.get(kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleProfile> {
        self.profiles.iter()
    }
}
