//! Router configuration (TOML)
//!
//! Every section and field has a default, so an empty file is a valid config.
//! Values are validated once after loading; construction fails on bad input.

use serde::{Deserialize, Serialize};
use siren_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::ebg::TurnPenaltyConfig;
use crate::profiles::{ProfileOverride, ProfileSet};
use crate::search::SearchConfig;
use crate::traffic::TrafficConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub turns: TurnPenaltyConfig,
    pub traffic: TrafficConfig,
    pub search: SearchConfig,
    /// Overrides keyed by vehicle name or alias
    pub profiles: BTreeMap<String, ProfileOverride>,
}

impl RouterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failure reading {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "router configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RouterConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.turns.validate()?;
        self.traffic.validate()?;
        self.search.validate()?;
        self.profile_set().map(|_| ())
    }

    /// Built-in profiles with the configured overrides applied
    pub fn profile_set(&self) -> Result<ProfileSet> {
        ProfileSet::with_overrides(&self.profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::VehicleKind;
    use crate::search::AlgorithmChoice;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = RouterConfig::from_toml_str("").unwrap();
        assert_eq!(config, RouterConfig::default());
        assert_eq!(config.turns.u_turn_s, 30.0);
        assert_eq!(config.search.max_speed_kph, 130.0);
    }

    #[test]
    fn test_sections_and_profile_overrides() {
        let text = r#"
            [turns]
            sharp_s = 12.0
            left_turn_factor = 1.2

            [traffic]
            seed = 42
            max_multiplier = 1.5

            [search]
            algorithm = "best"

            [profiles.fire]
            min_lanes = 1
            preferred_road_types = ["primary", "secondary"]
        "#;
        let config = RouterConfig::from_toml_str(text).unwrap();
        assert_eq!(config.turns.sharp_s, 12.0);
        assert_eq!(config.turns.slight_s, 2.0);
        assert_eq!(config.traffic.seed, Some(42));
        assert_eq!(config.search.algorithm, AlgorithmChoice::Best);

        let profiles = config.profile_set().unwrap();
        assert_eq!(profiles.get(VehicleKind::FireEngine).min_lanes, 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RouterConfig::from_toml_str("[turns]\nslight_max_deg = 10.0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");

        assert!(RouterConfig::from_toml_str("[traffic]\nmin_multiplier = 0.5\n").is_err());
        assert!(RouterConfig::from_toml_str("[search]\nalgorithm = \"greedy\"\n").is_err());
        assert!(RouterConfig::from_toml_str("[unknown]\nx = 1\n").is_err());

        let err = RouterConfig::from_toml_str("[profiles.ambulanse]\nmin_lanes = 2\n").unwrap_err();
        assert!(err.to_string().contains("did you mean 'ambulance'"), "got: {err}");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[search]\nnon_preferred_penalty_s = 5.0").unwrap();
        let config = RouterConfig::load(file.path()).unwrap();
        assert_eq!(config.search.non_preferred_penalty_s, 5.0);

        assert!(RouterConfig::load("/nonexistent/siren.toml").is_err());
    }
}
