//! Command-line parsing for the IVIM-Kurtosis fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "ivimk", version, about = "IVIM model fitting with a kurtosis correction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a synthetic phantom dataset with known parameters.
    Simulate(SimulateArgs),
    /// Fit a dataset, print diagnostics and optionally plot/export.
    Fit(FitArgs),
    /// Plot a voxel from a previously exported params JSON.
    Plot(PlotArgs),
}

/// Options for phantom generation.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Voxel grid shape, comma separated (e.g. 4,4,2).
    #[arg(long, default_value = "4,4,2")]
    pub shape: String,

    /// Signal-to-noise ratio at b=0 (Rician noise).
    #[arg(long, default_value_t = 50.0)]
    pub snr: f64,

    /// Generate noise-free signals.
    #[arg(long, conflicts_with = "snr")]
    pub noise_free: bool,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Signal at b=0.
    #[arg(long, default_value_t = 1000.0)]
    pub s0: f64,

    /// b-values, comma separated (defaults to the 21-shell IVIM protocol).
    #[arg(long)]
    pub bvals: Option<String>,

    /// Output dataset JSON.
    #[arg(short, long, value_name = "JSON")]
    pub output: PathBuf,
}

/// Options for fitting a dataset.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Dataset JSON (see `ivimk simulate`).
    #[arg(short, long, value_name = "JSON")]
    pub input: PathBuf,

    /// Fit every voxel, ignoring the dataset's mask.
    #[arg(long)]
    pub no_mask: bool,

    /// b-value at and above which the signal is treated as mono-exponential.
    #[arg(long, default_value_t = 400.0)]
    pub split_b_d: f64,

    /// b-value at and below which the perfusion effect dominates.
    #[arg(long, default_value_t = 200.0)]
    pub split_b_s0: f64,

    /// Skip the final non-linear refinement.
    #[arg(long)]
    pub single_stage: bool,

    /// Residual evaluation budget per optimizer run.
    #[arg(long, default_value_t = 1000)]
    pub maxiter: usize,

    /// Lower bounds for S0,f,D*,D.
    #[arg(long, requires = "bounds_upper", allow_hyphen_values = true)]
    pub bounds_lower: Option<String>,

    /// Upper bounds for S0,f,D*,D ("inf" allowed).
    #[arg(long, requires = "bounds_lower")]
    pub bounds_upper: Option<String>,

    /// Show the top-N worst-fit voxels.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Plot observed signal and fitted curve for this voxel index.
    #[arg(long)]
    pub plot_voxel: Option<usize>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,

    /// Show a progress bar while fitting.
    #[arg(long)]
    pub progress: bool,

    /// Export fitted parameters to JSON.
    #[arg(long, value_name = "JSON")]
    pub export_params: Option<PathBuf>,

    /// Export per-voxel results to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,
}

/// Options for plotting a saved fit.
#[derive(Debug, Parser)]
pub struct PlotArgs {
    /// Params JSON file produced by `ivimk fit --export-params`.
    #[arg(long, value_name = "JSON")]
    pub params: PathBuf,

    /// Voxel index (row-major).
    #[arg(long)]
    pub voxel: usize,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_with_bounds() {
        let cli = Cli::try_parse_from([
            "ivimk",
            "fit",
            "--input",
            "data.json",
            "--bounds-lower",
            "0,0,0,0",
            "--bounds-upper",
            "5000,0.25,0.05,0.004",
            "--single-stage",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.bounds_upper.as_deref(), Some("5000,0.25,0.05,0.004"));
        assert!(args.single_stage);
        assert_eq!(args.split_b_d, 400.0);
    }

    #[test]
    fn bounds_must_come_in_pairs() {
        let res = Cli::try_parse_from(["ivimk", "fit", "--input", "d.json", "--bounds-lower", "0,0,0,0"]);
        assert!(res.is_err());
    }
}
