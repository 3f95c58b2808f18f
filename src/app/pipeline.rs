//! Shared "fit pipeline" logic used by the CLI and the integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! dataset load -> model construction -> multi-voxel fit -> residuals -> ranking

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::{IvimKurtosisModel, IvimOptions, MultiVoxelFit};
use crate::io::{LoadedDataset, read_dataset_json};
use crate::report::{VoxelResidual, compute_residuals, rank_worst};

/// All computed outputs of a single `ivimk fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub dataset: LoadedDataset,
    pub model: IvimKurtosisModel,
    pub fit: MultiVoxelFit,
    pub residuals: Vec<VoxelResidual>,
    pub worst: Vec<VoxelResidual>,
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let dataset = read_dataset_json(&config.input)?.into_dataset()?;
    run_fit_with_dataset(config, dataset)
}

/// Execute the fitting pipeline on an already loaded dataset.
pub fn run_fit_with_dataset(config: &FitConfig, dataset: LoadedDataset) -> Result<RunOutput, AppError> {
    let options = IvimOptions {
        split_b_d: config.split_b_d,
        split_b_s0: config.split_b_s0,
        bounds: config.bounds,
        two_stage: config.two_stage,
        maxiter: config.maxiter,
        ..IvimOptions::default()
    };
    let model = IvimKurtosisModel::new(dataset.gtab.clone(), options)?;

    let mask = if config.ignore_mask { None } else { dataset.mask.as_ref() };
    if mask.is_some_and(|m| !m.values().iter().any(|&v| v)) {
        return Err(AppError::new(3, "Mask selects no voxels; nothing to fit."));
    }

    let progress = if config.progress {
        progress_bar()
    } else {
        ProgressBar::hidden()
    };
    let fit = model.fit_masked(&dataset.signals, &dataset.kurtosis, mask, progress)?;
    info!(fitted = fit.fitted_count(), "fit complete");

    let residuals = compute_residuals(&dataset.signals, &fit, &dataset.gtab)?;
    let worst = rank_worst(&residuals, config.top_n);

    Ok(RunOutput {
        dataset,
        model,
        fit,
        residuals,
        worst,
    })
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{spinner} fitting [{bar:40}] {pos}/{len} voxels ({eta})") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}
