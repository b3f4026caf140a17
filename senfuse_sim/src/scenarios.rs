//! Fusion scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SF-001: one accurate sensor, plain running average
    SingleSensor,

    /// SF-002: two sensors fused with the oracle sensor weighting
    DualSensor,

    /// SF-003: short outliers carved back by empty-space evidence
    Carving,

    /// SF-004: active set built from surface and empty-space voxels
    BorderTraining,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SingleSensor,
            ScenarioId::DualSensor,
            ScenarioId::Carving,
            ScenarioId::BorderTraining,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SingleSensor => "single_sensor",
            ScenarioId::DualSensor => "dual_sensor",
            ScenarioId::Carving => "carving",
            ScenarioId::BorderTraining => "border_training",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SingleSensor => "ToF orbit over two scenes, mean distance error below truncation",
            ScenarioId::DualSensor => "ToF + stereo with proxy weighting, fused error below truncation",
            ScenarioId::Carving => "10% short outliers, empty-space updates restore free space",
            ScenarioId::BorderTraining => "train_on_border_voxels exposes a tenth of the empty-space set",
        }
    }

    /// Sensors the scenario runs with.
    pub fn sensors(&self) -> &'static [&'static str] {
        match self {
            ScenarioId::DualSensor => &["tof", "stereo"],
            _ => &["tof"],
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_sensor" | "single" | "sf-001" => Ok(ScenarioId::SingleSensor),
            "dual_sensor" | "dual" | "sf-002" => Ok(ScenarioId::DualSensor),
            "carving" | "sf-003" => Ok(ScenarioId::Carving),
            "border_training" | "border" | "sf-004" => Ok(ScenarioId::BorderTraining),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("flash_mob".parse::<ScenarioId>().is_err());
    }
}
