use super::evaluation::ObjectiveWeights;
use super::selection::MoveSelection;
use crate::core::io::{LoadError, read_toml};
use crate::core::models::station::IntensityLimits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_STEP_INTENSITY: i32 = 2;
pub const DEFAULT_SETUP_COST: f64 = 6.0;
pub const DEFAULT_UNDO_DEPTH: usize = 1;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },

    #[error(
        "Objective vectors must have equal length (w: {w}, z_min: {z_min}, z_max: {z_max})"
    )]
    LengthMismatch { w: usize, z_min: usize, z_max: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanParameters {
    pub max_apertures: usize,
    pub max_intensity: i32,
    pub initial_intensity: i32,
    pub step_intensity: i32,
    /// Apertures open at start; `None` opens all `max_apertures`.
    pub open_apertures: Option<usize>,
    pub setup: f64,
    pub undo_depth: usize,
    pub move_selection: MoveSelection,
}

impl PlanParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate(self)
    }

    pub fn limits(&self) -> IntensityLimits {
        IntensityLimits {
            max_apertures: self.max_apertures,
            max_intensity: self.max_intensity,
            step_intensity: self.step_intensity,
        }
    }

    /// Every open aperture starts fully open at `initial_intensity`, so a
    /// beamlet receives the sum of them, clamped to the maximum and rounded
    /// down to the intensity step.
    pub fn initial_beamlet_intensity(&self) -> i32 {
        let open = self
            .open_apertures
            .unwrap_or(self.max_apertures)
            .min(self.max_apertures);
        let open = i32::try_from(open).unwrap_or(i32::MAX);
        let raw = self
            .initial_intensity
            .saturating_mul(open)
            .min(self.max_intensity);
        raw - raw % self.step_intensity
    }
}

#[derive(Default)]
pub struct PlanParametersBuilder {
    max_apertures: Option<usize>,
    max_intensity: Option<i32>,
    initial_intensity: Option<i32>,
    step_intensity: Option<i32>,
    open_apertures: Option<usize>,
    setup: Option<f64>,
    undo_depth: Option<usize>,
    move_selection: Option<MoveSelection>,
}

impl PlanParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_apertures(mut self, n: usize) -> Self {
        self.max_apertures = Some(n);
        self
    }
    pub fn max_intensity(mut self, value: i32) -> Self {
        self.max_intensity = Some(value);
        self
    }
    pub fn initial_intensity(mut self, value: i32) -> Self {
        self.initial_intensity = Some(value);
        self
    }
    pub fn step_intensity(mut self, value: i32) -> Self {
        self.step_intensity = Some(value);
        self
    }
    pub fn open_apertures(mut self, n: usize) -> Self {
        self.open_apertures = Some(n);
        self
    }
    pub fn setup(mut self, cost: f64) -> Self {
        self.setup = Some(cost);
        self
    }
    pub fn undo_depth(mut self, depth: usize) -> Self {
        self.undo_depth = Some(depth);
        self
    }
    pub fn move_selection(mut self, selection: MoveSelection) -> Self {
        self.move_selection = Some(selection);
        self
    }

    pub fn build(self) -> Result<PlanParameters, ConfigError> {
        let params = PlanParameters {
            max_apertures: self
                .max_apertures
                .ok_or(ConfigError::MissingParameter("max_apertures"))?,
            max_intensity: self
                .max_intensity
                .ok_or(ConfigError::MissingParameter("max_intensity"))?,
            initial_intensity: self
                .initial_intensity
                .ok_or(ConfigError::MissingParameter("initial_intensity"))?,
            step_intensity: self.step_intensity.unwrap_or(DEFAULT_STEP_INTENSITY),
            open_apertures: self.open_apertures,
            setup: self.setup.unwrap_or(DEFAULT_SETUP_COST),
            undo_depth: self.undo_depth.unwrap_or(DEFAULT_UNDO_DEPTH),
            move_selection: self.move_selection.unwrap_or_default(),
        };
        validate(&params)?;
        Ok(params)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PlanConfig {
    pub collimator: PathBuf,
    pub volumes: PathBuf,
    #[serde(default)]
    pub weights: Option<WeightsConfig>,
    #[serde(default)]
    pub parameters: ParametersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct WeightsConfig {
    pub w: Vec<f64>,
    pub z_min: Vec<f64>,
    pub z_max: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ParametersConfig {
    pub max_apertures: Option<usize>,
    pub max_intensity: Option<i32>,
    pub initial_intensity: Option<i32>,
    pub step_intensity: Option<i32>,
    pub open_apertures: Option<usize>,
    pub setup: Option<f64>,
    pub undo_depth: Option<usize>,
    pub move_selection: Option<MoveSelection>,
}

impl PlanConfig {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        read_toml(path)
    }
}

impl WeightsConfig {
    pub fn to_weights(&self) -> Result<ObjectiveWeights, ConfigError> {
        ObjectiveWeights::new(self.w.clone(), self.z_min.clone(), self.z_max.clone())
    }
}

impl ParametersConfig {
    pub fn to_parameters(&self) -> Result<PlanParameters, ConfigError> {
        let mut builder = PlanParametersBuilder::new();
        if let Some(n) = self.max_apertures {
            builder = builder.max_apertures(n);
        }
        if let Some(value) = self.max_intensity {
            builder = builder.max_intensity(value);
        }
        if let Some(value) = self.initial_intensity {
            builder = builder.initial_intensity(value);
        }
        if let Some(value) = self.step_intensity {
            builder = builder.step_intensity(value);
        }
        if let Some(n) = self.open_apertures {
            builder = builder.open_apertures(n);
        }
        if let Some(cost) = self.setup {
            builder = builder.setup(cost);
        }
        if let Some(depth) = self.undo_depth {
            builder = builder.undo_depth(depth);
        }
        if let Some(selection) = self.move_selection {
            builder = builder.move_selection(selection);
        }
        builder.build()
    }
}

fn validate(params: &PlanParameters) -> Result<(), ConfigError> {
    let invalid = |parameter: &'static str, reason: String| -> Result<(), ConfigError> {
        Err(ConfigError::InvalidValue { parameter, reason })
    };

    if params.max_apertures == 0 {
        return invalid("max_apertures", "must be at least 1".to_string());
    }
    if params.max_intensity <= 0 {
        return invalid(
            "max_intensity",
            format!("must be positive, got {}", params.max_intensity),
        );
    }
    if params.step_intensity <= 0 {
        return invalid(
            "step_intensity",
            format!("must be positive, got {}", params.step_intensity),
        );
    }
    if params.step_intensity > params.max_intensity {
        return invalid(
            "step_intensity",
            format!(
                "step {} exceeds max_intensity {}",
                params.step_intensity, params.max_intensity
            ),
        );
    }
    if params.initial_intensity < 0 {
        return invalid(
            "initial_intensity",
            format!("must not be negative, got {}", params.initial_intensity),
        );
    }
    if let Some(open) = params.open_apertures {
        if open > params.max_apertures {
            return invalid(
                "open_apertures",
                format!("{} exceeds max_apertures {}", open, params.max_apertures),
            );
        }
    }
    if !params.setup.is_finite() || params.setup < 0.0 {
        return invalid(
            "setup",
            format!("must be a finite non-negative cost, got {}", params.setup),
        );
    }
    Ok(())
}
