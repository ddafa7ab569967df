// ─────────────────────────────────────────────────────────────────────
// Anulum Hydro Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_IA_RATIO, DEFAULT_PCT_HIGH, DEFAULT_PCT_LOW, DEFAULT_RISK_BALANCE, MASS_TOLERANCE_REL,
};
use crate::error::{HydroError, HydroResult};

/// Top-level simulation configuration loaded from a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub rain: RainConfig,
    pub time: TimeConfig,
    #[serde(default)]
    pub runoff: RunoffConfig,
    pub routing: RoutingConfig,
    pub particles: ParticleConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Path to the domain container (dem, d8, cn, optional channel_mask).
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainConfig {
    pub sources: Vec<RainSourceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RainSourceKind {
    Container,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RainMode {
    #[serde(rename = "intensity_mmph")]
    IntensityMmPerHour,
    #[serde(rename = "depth_mm_per_step")]
    DepthMmPerStep,
}

impl Default for RainMode {
    fn default() -> Self {
        RainMode::IntensityMmPerHour
    }
}

/// One weighted rainfall source; sources blend additively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainSourceConfig {
    pub name: String,
    pub kind: RainSourceKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub mode: RainMode,
    /// Container path (kind = container).
    #[serde(default)]
    pub path: Option<String>,
    /// Constant rate or depth (kind = constant).
    #[serde(default)]
    pub value: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Step length [s].
    pub dt_s: f64,
    /// Number of steps in the run window.
    pub n_steps: usize,
    /// Simulation start offset [s] relative to the rainfall time axis.
    #[serde(default)]
    pub start_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunoffConfig {
    /// Initial-abstraction ratio alpha of SCS-CN.
    pub ia_ratio: f64,
}

impl Default for RunoffConfig {
    fn default() -> Self {
        Self {
            ia_ratio: DEFAULT_IA_RATIO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Hillslope per-hop travel time [s].
    pub travel_time_hillslope_s: f64,
    /// Channel per-hop travel time [s]; channel acceleration means
    /// travel_time_channel_s <= travel_time_hillslope_s.
    pub travel_time_channel_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleConfig {
    /// Nominal particle volume V_target [m^3].
    pub target_volume_m3: f64,
    /// Minimum spawnable volume V_min [m^3]; smaller increments accrue
    /// in the per-cell residual.
    pub min_volume_m3: f64,
    /// Cap on particles spawned per cell per step.
    pub max_per_cell: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Balance beta between normalized runoff and flow accumulation.
    pub balance: f64,
    pub pct_low: f64,
    pub pct_high: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            balance: DEFAULT_RISK_BALANCE,
            pct_low: DEFAULT_PCT_LOW,
            pct_high: DEFAULT_PCT_HIGH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Results container path (flood_depth, risk_index).
    pub path: String,
    /// Aggregation interval K [steps].
    pub aggregation_interval_steps: usize,
    /// Checkpoint cadence [steps]; 0 disables periodic checkpoints.
    #[serde(default)]
    pub checkpoint_interval_steps: usize,
    #[serde(default)]
    pub checkpoint_path: Option<String>,
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "Anulum Hydro Core results".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Relative mass-balance drift that triggers a warning; a drift of
    /// 1000x this value is fatal.
    pub mass_tolerance_rel: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            mass_tolerance_rel: MASS_TOLERANCE_REL,
        }
    }
}

impl SimulationConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: &str) -> HydroResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unknown or out-of-range parameters before the engine starts.
    pub fn validate(&self) -> HydroResult<()> {
        if !self.time.dt_s.is_finite() || self.time.dt_s <= 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "time.dt_s must be finite and > 0, got {}",
                self.time.dt_s
            )));
        }
        if self.time.n_steps == 0 {
            return Err(HydroError::ConfigurationInvalid(
                "time.n_steps must be >= 1".to_string(),
            ));
        }
        if !self.time.start_s.is_finite() || self.time.start_s < 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "time.start_s must be finite and >= 0, got {}",
                self.time.start_s
            )));
        }
        if !self.runoff.ia_ratio.is_finite() || !(0.0..=1.0).contains(&self.runoff.ia_ratio) {
            return Err(HydroError::ConfigurationInvalid(format!(
                "runoff.ia_ratio must be in [0, 1], got {}",
                self.runoff.ia_ratio
            )));
        }
        for (label, value) in [
            (
                "routing.travel_time_hillslope_s",
                self.routing.travel_time_hillslope_s,
            ),
            (
                "routing.travel_time_channel_s",
                self.routing.travel_time_channel_s,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(HydroError::ConfigurationInvalid(format!(
                    "{label} must be finite and >= 0, got {value}"
                )));
            }
        }
        if !self.particles.target_volume_m3.is_finite() || self.particles.target_volume_m3 <= 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "particles.target_volume_m3 must be finite and > 0, got {}",
                self.particles.target_volume_m3
            )));
        }
        if !self.particles.min_volume_m3.is_finite() || self.particles.min_volume_m3 < 0.0 {
            return Err(HydroError::ConfigurationInvalid(format!(
                "particles.min_volume_m3 must be finite and >= 0, got {}",
                self.particles.min_volume_m3
            )));
        }
        if self.particles.max_per_cell == 0 {
            return Err(HydroError::ConfigurationInvalid(
                "particles.max_per_cell must be >= 1".to_string(),
            ));
        }
        if !self.risk.balance.is_finite() || !(0.0..=1.0).contains(&self.risk.balance) {
            return Err(HydroError::ConfigurationInvalid(format!(
                "risk.balance must be in [0, 1], got {}",
                self.risk.balance
            )));
        }
        if !self.risk.pct_low.is_finite()
            || !self.risk.pct_high.is_finite()
            || self.risk.pct_low < 0.0
            || self.risk.pct_high > 100.0
            || self.risk.pct_low >= self.risk.pct_high
        {
            return Err(HydroError::ConfigurationInvalid(format!(
                "risk percentiles must satisfy 0 <= pct_low < pct_high <= 100, got {} and {}",
                self.risk.pct_low, self.risk.pct_high
            )));
        }
        if self.output.aggregation_interval_steps == 0 {
            return Err(HydroError::ConfigurationInvalid(
                "output.aggregation_interval_steps must be >= 1".to_string(),
            ));
        }
        if self.output.checkpoint_interval_steps > 0 && self.output.checkpoint_path.is_none() {
            return Err(HydroError::ConfigurationInvalid(
                "output.checkpoint_path required when checkpoint_interval_steps > 0".to_string(),
            ));
        }
        if !self.diagnostics.mass_tolerance_rel.is_finite()
            || self.diagnostics.mass_tolerance_rel <= 0.0
        {
            return Err(HydroError::ConfigurationInvalid(format!(
                "diagnostics.mass_tolerance_rel must be finite and > 0, got {}",
                self.diagnostics.mass_tolerance_rel
            )));
        }
        for source in &self.rain.sources {
            if !source.weight.is_finite() || source.weight < 0.0 {
                return Err(HydroError::ConfigurationInvalid(format!(
                    "rain source '{}' weight must be finite and >= 0",
                    source.name
                )));
            }
            match source.kind {
                RainSourceKind::Container => {
                    if source.path.is_none() {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{}' of kind container requires 'path'",
                            source.name
                        )));
                    }
                }
                RainSourceKind::Constant => {
                    let Some(value) = source.value else {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{}' of kind constant requires 'value'",
                            source.name
                        )));
                    };
                    if !value.is_finite() || value < 0.0 {
                        return Err(HydroError::ConfigurationInvalid(format!(
                            "rain source '{}' value must be finite and >= 0, got {value}",
                            source.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
