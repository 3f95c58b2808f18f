//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - generates synthetic phantoms
//! - runs the multi-voxel fit
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;
use tracing::info;

use crate::cli::{Command, FitArgs, PlotArgs, SimulateArgs};
use crate::data::{DEFAULT_BVALS, PhantomConfig, generate_phantom};
use crate::domain::{FitConfig, IvimParams, ParamBounds};
use crate::error::AppError;
use crate::io::DatasetFile;

pub mod pipeline;

/// Entry point for the `ivimk` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Fit(args) => handle_fit(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = phantom_config_from_args(&args)?;
    let phantom = generate_phantom(&config)?;
    let dataset = DatasetFile::from_phantom(&phantom);
    crate::io::write_dataset_json(&args.output, &dataset)?;

    info!(path = %args.output.display(), voxels = phantom.truth.len(), "phantom written");
    println!(
        "Wrote {} voxels x {} b-values to {}",
        phantom.truth.len(),
        phantom.gtab.len(),
        args.output.display()
    );
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let run = pipeline::run_fit(&config)?;

    let summaries = crate::report::summarize_params(&run.fit);
    let truth = run
        .dataset
        .truth
        .as_deref()
        .and_then(|t| crate::report::compare_truth(&run.fit, t));
    println!(
        "{}",
        crate::report::format_run_summary(&run.model, &run.fit, &summaries, truth.as_ref(), &config)
    );
    println!("{}", crate::report::format_worst(&run.worst));

    if let Some(index) = config.plot_voxel {
        let Some(voxel_fit) = run.fit.get(index) else {
            return Err(AppError::new(
                2,
                format!("Voxel {index} was not fitted (out of range or masked)."),
            ));
        };
        let plot = crate::plot::render_signal_plot(
            run.dataset.gtab.bvals(),
            Some(run.dataset.signals.voxel(index)),
            &voxel_fit.params,
            voxel_fit.kurtosis,
            config.plot_width,
            config.plot_height,
        );
        println!("Voxel {index}:");
        println!("{plot}");
    }

    // Optional exports.
    if let Some(path) = &config.export_params {
        crate::io::write_params_json(path, &run.fit, &run.dataset.gtab)?;
    }
    if let Some(path) = &config.export_csv {
        crate::io::write_results_csv(path, &run.residuals)?;
    }

    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let params = crate::io::read_params_json(&args.params)?;

    let Some(slot) = params.voxels.get(args.voxel) else {
        return Err(AppError::new(
            2,
            format!("Voxel {} is out of range ({} voxels).", args.voxel, params.voxels.len()),
        ));
    };
    let Some(voxel) = slot else {
        return Err(AppError::new(3, format!("Voxel {} was masked out of the fit.", args.voxel)));
    };

    let plot = crate::plot::render_signal_plot(
        &params.bvals,
        None,
        &voxel.params,
        voxel.kurtosis,
        args.width,
        args.height,
    );
    println!(
        "Voxel {} ({}): S0={:.2} f={:.4} D*={:.6} D={:.6} K={:.3}",
        args.voxel,
        voxel.status.label(),
        voxel.params.s0,
        voxel.params.f,
        voxel.params.d_star,
        voxel.params.d,
        voxel.kurtosis
    );
    println!("{plot}");
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let bounds = match (&args.bounds_lower, &args.bounds_upper) {
        (Some(lower), Some(upper)) => Some(ParamBounds {
            lower: parse_param_list(lower, "--bounds-lower")?,
            upper: parse_param_list(upper, "--bounds-upper")?,
        }),
        (None, None) => None,
        _ => {
            return Err(AppError::new(
                2,
                "--bounds-lower and --bounds-upper must be given together.",
            ));
        }
    };

    Ok(FitConfig {
        input: args.input.clone(),
        ignore_mask: args.no_mask,
        split_b_d: args.split_b_d,
        split_b_s0: args.split_b_s0,
        two_stage: !args.single_stage,
        maxiter: args.maxiter,
        bounds,
        top_n: args.top,
        plot_voxel: args.plot_voxel,
        plot_width: args.width,
        plot_height: args.height,
        progress: args.progress,
        export_params: args.export_params.clone(),
        export_csv: args.export_csv.clone(),
    })
}

pub fn phantom_config_from_args(args: &SimulateArgs) -> Result<PhantomConfig, AppError> {
    let shape = parse_list::<usize>(&args.shape, "--shape")?;
    let bvals = match &args.bvals {
        Some(list) => parse_list::<f64>(list, "--bvals")?,
        None => DEFAULT_BVALS.to_vec(),
    };

    Ok(PhantomConfig {
        shape,
        bvals,
        s0: args.s0,
        snr: if args.noise_free { None } else { Some(args.snr) },
        seed: args.seed,
        ..PhantomConfig::default()
    })
}

fn parse_param_list(raw: &str, flag: &str) -> Result<[f64; IvimParams::LEN], AppError> {
    let values = parse_list::<f64>(raw, flag)?;
    values.try_into().map_err(|v: Vec<f64>| {
        AppError::new(
            2,
            format!("{flag} expects {} values (S0,f,D*,D), got {}.", IvimParams::LEN, v.len()),
        )
    })
}

/// Parse a comma-separated list such as `4,4,2` or `0,0.5,inf`.
fn parse_list<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<Vec<T>, AppError> {
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<T>()
                .map_err(|_| AppError::new(2, format!("Invalid value '{part}' for {flag}.")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fit_args() -> FitArgs {
        FitArgs {
            input: PathBuf::from("phantom.json"),
            no_mask: false,
            split_b_d: 400.0,
            split_b_s0: 200.0,
            single_stage: false,
            maxiter: 1000,
            bounds_lower: None,
            bounds_upper: None,
            top: 10,
            plot_voxel: None,
            width: 80,
            height: 20,
            progress: false,
            export_params: None,
            export_csv: None,
        }
    }

    #[test]
    fn bounds_parse_including_infinity() {
        let args = FitArgs {
            bounds_lower: Some("0, 0, 0, 0".into()),
            bounds_upper: Some("inf,0.3,1,1".into()),
            ..fit_args()
        };
        let config = fit_config_from_args(&args).unwrap();
        assert_eq!(config.bounds, Some(ParamBounds::LITERATURE));
        assert!(config.two_stage);
    }

    #[test]
    fn bounds_need_four_values() {
        let args = FitArgs {
            bounds_lower: Some("0,0,0".into()),
            bounds_upper: Some("1,1,1".into()),
            ..fit_args()
        };
        let err = fit_config_from_args(&args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("expects 4 values"));
    }

    #[test]
    fn simulate_args_map_to_phantom_config() {
        let args = SimulateArgs {
            shape: "3,2".into(),
            snr: 20.0,
            noise_free: true,
            seed: 9,
            s0: 500.0,
            bvals: Some("0,100,500,1000".into()),
            output: PathBuf::from("out.json"),
        };
        let config = phantom_config_from_args(&args).unwrap();
        assert_eq!(config.shape, vec![3, 2]);
        assert_eq!(config.bvals, vec![0.0, 100.0, 500.0, 1000.0]);
        assert_eq!(config.snr, None);
        assert_eq!(config.seed, 9);

        let bad = SimulateArgs {
            shape: "3,x".into(),
            ..args
        };
        assert!(phantom_config_from_args(&bad).is_err());
    }
}
