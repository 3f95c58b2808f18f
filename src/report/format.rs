//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (important for snapshot tests)

use crate::domain::{FitConfig, FitStatus, GradientTable};
use crate::fit::{IvimKurtosisModel, MultiVoxelFit};
use crate::report::{ParamSummary, TruthComparison, VoxelResidual};

/// Format the run summary (acquisition, options, status counts, parameter summaries).
pub fn format_run_summary(
    model: &IvimKurtosisModel,
    fit: &MultiVoxelFit,
    summaries: &[ParamSummary],
    truth: Option<&TruthComparison>,
    config: &FitConfig,
) -> String {
    let mut out = String::new();
    let gtab = model.gtab();

    out.push_str("=== ivimk - IVIM-Kurtosis fit ===\n");
    out.push_str(&format!("Input: {}\n", config.input.display()));
    out.push_str(&format!("Acquisition: {}\n", format_acquisition(gtab)));
    out.push_str(&format!(
        "Voxels: grid={} | total={} | fitted={}\n",
        fmt_shape(fit.shape()),
        fit.fits().len(),
        fit.fitted_count(),
    ));

    let options = model.options();
    let bounds = model.bounds();
    out.push_str(&format!(
        "Options: split_b_d={} split_b_s0={} two_stage={} maxiter={}\n",
        options.split_b_d, options.split_b_s0, options.two_stage, options.maxiter,
    ));
    out.push_str(&format!(
        "Bounds: lower={} upper={}\n",
        fmt_vec(&bounds.lower),
        fmt_vec(&bounds.upper)
    ));

    out.push_str("\nFit status:\n");
    for status in FitStatus::ALL {
        out.push_str(&format!("  {:<20} {}\n", status.label(), fit.status_count(status)));
    }
    out.push_str(&format!("  {:<20} {}\n", "not converged", fit.unconverged_count()));

    if !summaries.is_empty() {
        out.push('\n');
        out.push_str(&format_param_summaries(summaries));
    }

    if let Some(t) = truth {
        out.push_str(&format!("\nMean absolute error vs truth (n={}):\n", t.n));
        out.push_str(&format!("  S0={:.4} f={:.6} D*={:.6e} D={:.6e}\n", t.s0, t.f, t.d_star, t.d));
    }

    out
}

fn format_acquisition(gtab: &GradientTable) -> String {
    let bvals = gtab.bvals();
    let b_min = bvals.iter().copied().fold(f64::INFINITY, f64::min);
    let b_max = bvals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let n_b0 = gtab.b0s_mask().iter().filter(|&&b0| b0).count();
    format!("n={} | b=[{b_min:.0}, {b_max:.0}] s/mm^2 | b0 volumes={n_b0}", bvals.len())
}

/// Format the parameter summary table.
pub fn format_param_summaries(summaries: &[ParamSummary]) -> String {
    let mut out = String::new();
    out.push_str("Parameters:\n");
    out.push_str(&format!(
        "{:<4} {:>12} {:>12} {:>12} {:>12}\n",
        "", "min", "median", "mean", "max"
    ));
    for s in summaries {
        out.push_str(&format!(
            "{:<4} {:>12} {:>12} {:>12} {:>12}\n",
            s.name,
            fmt_param(s.min),
            fmt_param(s.median),
            fmt_param(s.mean),
            fmt_param(s.max),
        ));
    }
    out
}

/// Format the worst-fit voxel table.
pub fn format_worst(rows: &[VoxelResidual]) -> String {
    let mut out = String::new();

    out.push_str("Worst-fit voxels (largest residual RMSE):\n");
    out.push_str(
        format!(
            "{:>6} {:<12} {:>10} {:>10} {:>8} {:>10} {:>10} {:>6} {:<20}\n",
            "voxel", "coords", "rmse", "s0", "f", "d_star", "d", "k", "status"
        )
        .trim_end(),
    );
    out.push('\n');

    out.push_str(
        format!(
            "{:-<6} {:-<12} {:-<10} {:-<10} {:-<8} {:-<10} {:-<10} {:-<6} {:-<20}\n",
            "", "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:>6} {:<12} {:>10.3} {:>10.2} {:>8.4} {:>10.6} {:>10.6} {:>6.3} {:<20}\n",
                r.index,
                truncate(&fmt_shape(&r.coords), 12),
                r.rmse,
                r.params.s0,
                r.params.f,
                r.params.d_star,
                r.params.d,
                r.kurtosis,
                r.status.label(),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn fmt_param(v: f64) -> String {
    if v != 0.0 && v.abs() < 0.01 {
        format!("{v:.4e}")
    } else {
        format!("{v:.4}")
    }
}

fn fmt_shape(v: &[usize]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("({})", parts.join(","))
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IvimParams;

    fn row(index: usize, coords: Vec<usize>, rmse: f64) -> VoxelResidual {
        VoxelResidual {
            index,
            coords,
            params: IvimParams {
                s0: 1000.0,
                f: 0.1,
                d_star: 0.01,
                d: 0.001,
            },
            kurtosis: 0.5,
            status: FitStatus::TwoStage,
            rmse,
        }
    }

    #[test]
    fn worst_table_lists_rows_in_order() {
        let txt = format_worst(&[row(5, vec![1, 0, 1], 12.5), row(0, vec![0, 0, 0], 3.25)]);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with(" voxel coords"));
        assert!(lines[3].starts_with("     5 (1,0,1)"));
        assert!(lines[3].contains("12.500"));
        assert!(lines[3].ends_with("two_stage"));
        assert!(lines[4].starts_with("     0 (0,0,0)"));
    }

    #[test]
    fn small_parameters_use_scientific_notation() {
        assert_eq!(fmt_param(0.00084), "8.4000e-4");
        assert_eq!(fmt_param(0.132), "0.1320");
        assert_eq!(fmt_param(0.0), "0.0000");
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("(10,20,30,40)", 12), "(10,20,30,4.");
        assert_eq!(truncate("(1,2)", 12), "(1,2)");
    }
}
