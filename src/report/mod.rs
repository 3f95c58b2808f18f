//! Reporting utilities: residuals, rankings, summaries and formatted terminal output.

use crate::domain::{FitStatus, GradientTable, IvimParams, SignalVolume, unravel_index};
use crate::error::AppError;
use crate::fit::{IvimFit, MultiVoxelFit};

pub mod format;

pub use format::*;

/// Goodness of fit for one fitted voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelResidual {
    pub index: usize,
    /// Grid coordinates of `index` (row-major).
    pub coords: Vec<usize>,
    pub params: IvimParams,
    pub kurtosis: f64,
    pub status: FitStatus,
    /// Root mean square of `observed - predicted` over all b-values.
    pub rmse: f64,
}

/// Distribution of one parameter over the fitted voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSummary {
    pub name: &'static str,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
}

/// Mean absolute error of the fitted parameters against known ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthComparison {
    pub n: usize,
    pub s0: f64,
    pub f: f64,
    pub d_star: f64,
    pub d: f64,
}

/// Compute the residual RMSE of every fitted voxel, in voxel order.
pub fn compute_residuals(
    data: &SignalVolume,
    fit: &MultiVoxelFit,
    gtab: &GradientTable,
) -> Result<Vec<VoxelResidual>, AppError> {
    let mut out = Vec::with_capacity(fit.fitted_count());
    for (index, voxel_fit) in fit.fits().iter().enumerate() {
        let Some(voxel_fit) = voxel_fit else { continue };

        let predicted = voxel_fit.predict(gtab);
        let observed = data.voxel(index);
        let sse: f64 = observed
            .iter()
            .zip(&predicted)
            .map(|(o, p)| (o - p) * (o - p))
            .sum();
        let rmse = (sse / observed.len().max(1) as f64).sqrt();
        if !rmse.is_finite() {
            return Err(AppError::new(
                4,
                format!("Non-finite model prediction for voxel {index} during residual computation."),
            ));
        }

        out.push(VoxelResidual {
            index,
            coords: unravel_index(index, fit.shape()),
            params: voxel_fit.params,
            kurtosis: voxel_fit.kurtosis,
            status: voxel_fit.status,
            rmse,
        });
    }
    Ok(out)
}

/// The `top_n` voxels with the largest RMSE, worst first. Ties keep voxel order.
pub fn rank_worst(residuals: &[VoxelResidual], top_n: usize) -> Vec<VoxelResidual> {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.rmse.partial_cmp(&a.rmse).unwrap_or(std::cmp::Ordering::Equal));
    sorted.truncate(top_n);
    sorted
}

/// Summaries of `S0`, `f`, `D*` and `D` over the fitted voxels.
///
/// Empty when nothing was fitted.
pub fn summarize_params(fit: &MultiVoxelFit) -> Vec<ParamSummary> {
    let columns: [(&'static str, fn(&IvimFit) -> f64); 4] = [
        ("S0", IvimFit::s0_predicted),
        ("f", IvimFit::perfusion_fraction),
        ("D*", IvimFit::d_star),
        ("D", IvimFit::d),
    ];

    columns
        .into_iter()
        .filter_map(|(name, value)| {
            let values: Vec<f64> = fit.fits().iter().flatten().map(value).collect();
            summarize(name, values)
        })
        .collect()
}

fn summarize(name: &'static str, mut values: Vec<f64>) -> Option<ParamSummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = values.len();
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    };
    let mean = values.iter().sum::<f64>() / n as f64;

    Some(ParamSummary {
        name,
        min: values[0],
        median,
        mean,
        max: values[n - 1],
    })
}

/// Compare fitted voxels with ground truth (one entry per voxel, masked voxels skipped).
///
/// Returns `None` when the lengths disagree or no voxel was fitted.
pub fn compare_truth(fit: &MultiVoxelFit, truth: &[IvimParams]) -> Option<TruthComparison> {
    if truth.len() != fit.fits().len() {
        return None;
    }

    let mut acc = [0.0; 4];
    let mut n = 0usize;
    for (voxel_fit, expected) in fit.fits().iter().zip(truth) {
        let Some(voxel_fit) = voxel_fit else { continue };
        let got = voxel_fit.params.to_array();
        let want = expected.to_array();
        for i in 0..IvimParams::LEN {
            acc[i] += (got[i] - want[i]).abs();
        }
        n += 1;
    }
    if n == 0 {
        return None;
    }

    let n_f = n as f64;
    Some(TruthComparison {
        n,
        s0: acc[0] / n_f,
        f: acc[1] / n_f,
        d_star: acc[2] / n_f,
        d: acc[3] / n_f,
    })
}
