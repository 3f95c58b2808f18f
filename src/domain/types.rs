//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for plotting or comparisons

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// IVIM parameters of one voxel, ordered `[S0, f, D*, D]` when flattened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvimParams {
    /// Signal at `b = 0`.
    pub s0: f64,
    /// Perfusion fraction.
    pub f: f64,
    /// Pseudo-diffusion coefficient (mm²/s).
    pub d_star: f64,
    /// Tissue diffusion coefficient (mm²/s).
    pub d: f64,
}

impl IvimParams {
    pub const LEN: usize = 4;

    pub fn to_array(self) -> [f64; 4] {
        [self.s0, self.f, self.d_star, self.d]
    }

    /// Build from `[S0, f, D*, D]`.
    ///
    /// # Panics
    /// Panics if `values` has fewer than four elements.
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            s0: values[0],
            f: values[1],
            d_star: values[2],
            d: values[3],
        }
    }
}

/// Box constraints on `[S0, f, D*, D]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub lower: [f64; 4],
    pub upper: [f64; 4],
}

impl ParamBounds {
    /// Bounds set from experiments and literature survey.
    pub const LITERATURE: ParamBounds = ParamBounds {
        lower: [0.0, 0.0, 0.0, 0.0],
        upper: [f64::INFINITY, 0.3, 1.0, 1.0],
    };

    pub fn contains(&self, params: &IvimParams) -> bool {
        params
            .to_array()
            .iter()
            .enumerate()
            .all(|(i, &v)| v >= self.lower[i] && v <= self.upper[i])
    }
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self::LITERATURE
    }
}

/// How a voxel's parameters were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Two-stage refinement disabled; linear estimate returned.
    Linear,
    /// Non-linear refinement accepted.
    TwoStage,
    /// Refinement left the bounds; linear estimate returned.
    BoundsFallback,
    /// Linear estimate was outside the bounds so refinement could not start.
    InfeasibleFallback,
}

impl FitStatus {
    pub const ALL: [FitStatus; 4] = [
        FitStatus::Linear,
        FitStatus::TwoStage,
        FitStatus::BoundsFallback,
        FitStatus::InfeasibleFallback,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FitStatus::Linear => "linear",
            FitStatus::TwoStage => "two_stage",
            FitStatus::BoundsFallback => "bounds_fallback",
            FitStatus::InfeasibleFallback => "infeasible_fallback",
        }
    }
}

/// A full `ivimk fit` run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub input: PathBuf,
    /// Ignore any mask stored in the dataset.
    pub ignore_mask: bool,

    pub split_b_d: f64,
    pub split_b_s0: f64,
    pub two_stage: bool,
    pub maxiter: usize,
    /// Explicit bounds; `None` uses the literature defaults.
    pub bounds: Option<ParamBounds>,

    pub top_n: usize,
    pub plot_voxel: Option<usize>,
    pub plot_width: usize,
    pub plot_height: usize,
    pub progress: bool,

    pub export_params: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip_through_array_order() {
        let p = IvimParams {
            s0: 1000.0,
            f: 0.1,
            d_star: 0.01,
            d: 0.001,
        };
        assert_eq!(IvimParams::from_slice(&p.to_array()), p);
    }

    #[test]
    fn literature_bounds_cap_perfusion_fraction() {
        let mut p = IvimParams {
            s0: 5000.0,
            f: 0.25,
            d_star: 0.02,
            d: 0.0008,
        };
        assert!(ParamBounds::LITERATURE.contains(&p));
        p.f = 0.35;
        assert!(!ParamBounds::LITERATURE.contains(&p));
        p.f = -0.01;
        assert!(!ParamBounds::LITERATURE.contains(&p));
    }
}
