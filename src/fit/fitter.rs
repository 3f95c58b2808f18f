//! Single-voxel IVIM-Kurtosis fitting.
//!
//! Given a voxel's signal series and its kurtosis value, the fit runs in stages:
//!
//! 1. linear fit of `-ln S` on `b ≥ split_b_d` → `S0'`, `D`
//! 2. linear fit of `-ln S` on `b ≤ split_b_s0` → `S0`, `D*'`
//! 3. `f = 1 - S0'/S0`, then a bounded non-linear fit of `(f, D*)` with `S0`
//!    and `D` held fixed
//! 4. optionally (`two_stage`), a bounded non-linear fit of all four parameters
//!    with the kurtosis term, started from the linear estimate
//!
//! If the final fit leaves the bounds, or cannot start because the linear estimate
//! is infeasible, the linear estimate is returned and the outcome is recorded in
//! [`FitStatus`].

use tracing::{debug, warn};

use crate::domain::{FitStatus, GradientTable, IvimParams, ParamBounds};
use crate::error::ModelError;
use crate::math::{LsqError, LsqOptions, fit_line, least_squares};
use crate::models::{IvimResidual, PerfusionResidual, predict};

/// Fitting options for [`IvimKurtosisModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct IvimOptions {
    /// b-value at and above which the signal is treated as mono-exponential
    /// (estimate of `D`).
    pub split_b_d: f64,
    /// b-value at and below which the perfusion effect dominates (estimate of
    /// `S0` and the initial `D*`).
    pub split_b_s0: f64,
    /// Box constraints on `[S0, f, D*, D]`; `None` uses [`ParamBounds::LITERATURE`].
    pub bounds: Option<ParamBounds>,
    /// Refine the linear estimate with a full non-linear fit.
    pub two_stage: bool,
    /// Step tolerance of the optimizer.
    pub tol: f64,
    /// Parameter scaling for the final fit.
    pub x_scale: [f64; 4],
    /// Gradient tolerance.
    pub gtol: f64,
    /// Cost-change tolerance.
    pub ftol: f64,
    /// Residual evaluation budget per optimizer run.
    pub maxiter: usize,
}

impl Default for IvimOptions {
    fn default() -> Self {
        Self {
            split_b_d: 400.0,
            split_b_s0: 200.0,
            bounds: None,
            two_stage: true,
            tol: 1e-15,
            x_scale: [1000.0, 0.1, 0.001, 0.0001],
            gtol: 1e-15,
            ftol: 1e-15,
            maxiter: 1000,
        }
    }
}

impl IvimOptions {
    fn validate(&self) -> Result<(), ModelError> {
        for (name, v) in [("split_b_d", self.split_b_d), ("split_b_s0", self.split_b_s0)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(ModelError::InvalidOption(format!("{name} must be finite and >= 0, got {v}")));
            }
        }
        for (name, v) in [("tol", self.tol), ("gtol", self.gtol), ("ftol", self.ftol)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(ModelError::InvalidOption(format!("{name} must be finite and >= 0, got {v}")));
            }
        }
        if self.x_scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(ModelError::InvalidOption(format!(
                "x_scale must be finite and > 0, got {:?}",
                self.x_scale
            )));
        }
        if self.maxiter == 0 {
            return Err(ModelError::InvalidOption("maxiter must be > 0".into()));
        }
        if let Some(bounds) = &self.bounds {
            for i in 0..IvimParams::LEN {
                if !(bounds.lower[i] < bounds.upper[i]) {
                    return Err(ModelError::InvalidOption(format!(
                        "bound {i}: lower {} must be below upper {}",
                        bounds.lower[i], bounds.upper[i]
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Fit result for a single voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct IvimFit {
    pub params: IvimParams,
    /// Kurtosis value the voxel was fitted with.
    pub kurtosis: f64,
    pub status: FitStatus,
    /// `false` when the non-linear refinement that produced `params` stopped on
    /// its evaluation budget or a numerical failure rather than a tolerance.
    pub converged: bool,
}

impl IvimFit {
    pub fn s0_predicted(&self) -> f64 {
        self.params.s0
    }

    pub fn perfusion_fraction(&self) -> f64 {
        self.params.f
    }

    pub fn d_star(&self) -> f64 {
        self.params.d_star
    }

    pub fn d(&self) -> f64 {
        self.params.d
    }

    /// Predict the signal on `gtab` with the fitted parameters.
    pub fn predict(&self, gtab: &GradientTable) -> Vec<f64> {
        predict(&self.params, self.kurtosis, gtab.bvals())
    }
}

/// IVIM model with a per-voxel kurtosis correction of the tissue compartment.
#[derive(Debug, Clone)]
pub struct IvimKurtosisModel {
    gtab: GradientTable,
    options: IvimOptions,
    bounds: ParamBounds,
}

impl IvimKurtosisModel {
    /// Build a model for the given acquisition.
    ///
    /// The acquisition must contain at least one `b = 0` volume and the table's
    /// `b0_threshold` must be 0, otherwise low b-values would be folded into the
    /// b0 signal.
    ///
    /// There is a single fitting method: the staged linear estimate followed by a
    /// bounded trust-region refinement (see the module docs). `two_stage = false`
    /// in `options` stops after the linear estimate; no other method is selectable.
    pub fn new(gtab: GradientTable, options: IvimOptions) -> Result<Self, ModelError> {
        if !gtab.b0s_mask().iter().any(|&b0| b0) {
            return Err(ModelError::MissingB0);
        }
        if gtab.b0_threshold() > 0.0 {
            return Err(ModelError::B0Threshold(gtab.b0_threshold()));
        }
        options.validate()?;

        let bounds = match options.bounds {
            Some(bounds) => bounds,
            None => {
                warn!(
                    "Bounds for this fit have been set from experiments and literature survey. \
                     To change the bounds, pass bounds in the model options."
                );
                ParamBounds::LITERATURE
            }
        };

        Ok(Self { gtab, options, bounds })
    }

    pub fn gtab(&self) -> &GradientTable {
        &self.gtab
    }

    pub fn options(&self) -> &IvimOptions {
        &self.options
    }

    /// Bounds in effect (explicit or literature defaults).
    pub fn bounds(&self) -> &ParamBounds {
        &self.bounds
    }

    /// Predict the signal on the model's gradient table.
    pub fn predict(&self, params: &IvimParams, kurtosis: f64) -> Vec<f64> {
        predict(params, kurtosis, self.gtab.bvals())
    }

    /// Fit one voxel's signal series.
    pub fn fit_voxel(&self, signal: &[f64], kurtosis: f64) -> Result<IvimFit, ModelError> {
        if signal.len() != self.gtab.len() {
            return Err(ModelError::SignalLength {
                expected: self.gtab.len(),
                found: signal.len(),
            });
        }

        let (s0_prime, d) = self.estimate_linear_fit(signal, self.options.split_b_d, false)?;
        let (s0, d_star_prime) = self.estimate_linear_fit(signal, self.options.split_b_s0, true)?;
        let f_guess = 1.0 - s0_prime / s0;

        let (f, d_star) = self.estimate_f_d_star([f_guess, d_star_prime], signal, s0, d);
        let linear = IvimParams { s0, f, d_star, d };

        if !self.options.two_stage {
            return Ok(IvimFit {
                params: linear,
                kurtosis,
                status: FitStatus::Linear,
                converged: true,
            });
        }

        let (params, status, converged) = match self.refine(signal, kurtosis, linear) {
            Ok((refined, converged)) if self.bounds.contains(&refined) => {
                (refined, FitStatus::TwoStage, converged)
            }
            Ok((refined, _)) => {
                warn!(
                    ?refined,
                    "Bounds are violated for leastsq fitting. Returning parameters from linear fit"
                );
                (linear, FitStatus::BoundsFallback, true)
            }
            Err(err) => {
                warn!(%err, "x0 is unfeasible for leastsq fitting. Returning x0 values from the linear fit.");
                (linear, FitStatus::InfeasibleFallback, true)
            }
        };
        debug!(?params, kurtosis, status = status.label(), converged, "voxel fitted");

        Ok(IvimFit {
            params,
            kurtosis,
            status,
            converged,
        })
    }

    /// Fit `-ln S = D·b - ln S0` on the b-values at or below (`less_than`) or at
    /// or above `split_b`, returning `(S0, D)`.
    pub fn estimate_linear_fit(
        &self,
        signal: &[f64],
        split_b: f64,
        less_than: bool,
    ) -> Result<(f64, f64), ModelError> {
        let mut b_sel = Vec::new();
        let mut y_sel = Vec::new();
        for (&b, &s) in self.gtab.bvals().iter().zip(signal) {
            let keep = if less_than { b <= split_b } else { b >= split_b };
            if !keep {
                continue;
            }
            if !(s.is_finite() && s > 0.0) {
                return Err(ModelError::LinearFit(format!(
                    "non-positive signal {s} at b={b} cannot be log-transformed"
                )));
            }
            b_sel.push(b);
            y_sel.push(-s.ln());
        }

        let side = if less_than { "<=" } else { ">=" };
        let Some((d, neg_log_s0)) = fit_line(&b_sel, &y_sel) else {
            return Err(ModelError::LinearFit(format!(
                "need at least two distinct b-values {side} {split_b}, found {}",
                b_sel.len()
            )));
        };

        Ok(((-neg_log_s0).exp(), d))
    }

    /// Refine `(f, D*)` with `S0` and `D` held at their linear estimates.
    fn estimate_f_d_star(&self, guess: [f64; 2], signal: &[f64], s0: f64, d: f64) -> (f64, f64) {
        let bvals = self.gtab.bvals();
        let lower = [0.0, 0.0];
        let upper = [self.bounds.upper[1], self.bounds.upper[2]];
        let opts = LsqOptions {
            ftol: self.options.ftol,
            xtol: self.options.tol,
            gtol: self.options.gtol,
            max_nfev: self.options.maxiter,
            x_scale: None,
        };

        let residual = PerfusionResidual { bvals, signal, s0, d };
        match least_squares(&residual, &guess, &lower, &upper, &opts) {
            Ok(report) => (report.x[0], report.x[1]),
            Err(err) => {
                warn!(
                    %err,
                    "x0 obtained from linear fitting is not feasible as initial guess for leastsq \
                     while estimating f and D_star. Using parameters from the linear fit."
                );
                (guess[0], guess[1])
            }
        }
    }

    /// Full four-parameter fit from `x0`; also reports whether a tolerance was met.
    fn refine(&self, signal: &[f64], kurtosis: f64, x0: IvimParams) -> Result<(IvimParams, bool), LsqError> {
        let bvals = self.gtab.bvals();
        let opts = LsqOptions {
            ftol: self.options.ftol,
            xtol: self.options.tol,
            gtol: self.options.gtol,
            max_nfev: self.options.maxiter,
            x_scale: Some(self.options.x_scale.to_vec()),
        };

        let residual = IvimResidual {
            bvals,
            signal,
            kurtosis,
        };
        let report = least_squares(
            &residual,
            &x0.to_array(),
            &self.bounds.lower,
            &self.bounds.upper,
            &opts,
        )?;
        debug!(
            nfev = report.nfev,
            cost = report.cost,
            termination = ?report.termination,
            "non-linear refinement finished"
        );
        Ok((IvimParams::from_slice(&report.x), report.converged()))
    }
}
