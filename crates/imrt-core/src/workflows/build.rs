use crate::core::io::volumes::load_volumes;
use crate::core::io::{LoadError, resolve_relative};
use crate::core::models::collimator::Collimator;
use crate::engine::config::{ConfigError, PlanConfig};
use crate::engine::dose::{DoseEvaluator, target_weights};
use crate::engine::error::PlanError;
use crate::engine::plan::Plan;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Failed to load input: {0}")]
    Load(#[from] LoadError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build plan: {0}")]
    Plan(#[from] PlanError),
}

/// Loads the plan file at `path` and everything it references, then builds
/// and fully evaluates the plan.
#[instrument(skip_all, name = "build_workflow", fields(path = %path.display()))]
pub fn run(path: &Path) -> Result<Plan<DoseEvaluator>, WorkflowError> {
    info!("Loading plan configuration.");
    let config = PlanConfig::load(path)?;
    let params = config.parameters.to_parameters()?;

    let collimator = Collimator::load(&resolve_relative(path, &config.collimator))?;
    let volumes = load_volumes(&resolve_relative(path, &config.volumes))?;

    let weights = match &config.weights {
        Some(weights) => weights.to_weights()?,
        None => target_weights(&volumes),
    };

    let plan = Plan::from_parameters(weights, &collimator, volumes, &params)?;
    info!(
        stations = plan.stations().len(),
        volumes = plan.evaluation_function().volumes().len(),
        "Plan ready for optimization."
    );
    Ok(plan)
}
