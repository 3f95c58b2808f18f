//! Forward model evaluation for IVIM-Kurtosis.
//!
//! ```text
//! S(b) = S0 · [ f · exp(-b·D*) + (1 - f) · exp(-b·D + (b·D)²·K / 6) ]
//! ```
//!
//! The kurtosis value `K` is not a fitted parameter: it comes from a precomputed
//! map and is held fixed for the voxel. With `K = 0` the equation reduces to the
//! bi-exponential IVIM model.
//!
//! The tissue term was first written as `exp(-b·D + (b·D²)·K / 6)`, which mixes
//! units of `b`. This crate uses the cumulant form `(b·D)²·K / 6` on purpose; the
//! two agree only at `K = 0`.
//!
//! The fitter relies on two residual models:
//! - [`IvimResidual`]: all four parameters (final non-linear stage)
//! - [`PerfusionResidual`]: `(f, D*)` with `S0` and `D` fixed and no kurtosis
//!   term (initial-guess refinement)

use nalgebra::{DMatrix, DVector};

use crate::domain::IvimParams;
use crate::math::{ResidualModel, kurtosis_decay, mono_exp};

/// Signal at a single b-value.
pub fn signal_at(params: &IvimParams, kurtosis: f64, b: f64) -> f64 {
    params.s0
        * (params.f * mono_exp(b, params.d_star)
            + (1.0 - params.f) * kurtosis_decay(b, params.d, kurtosis))
}

/// Predict the signal series for the given b-values.
pub fn predict(params: &IvimParams, kurtosis: f64, bvals: &[f64]) -> Vec<f64> {
    bvals.iter().map(|&b| signal_at(params, kurtosis, b)).collect()
}

/// `∂S/∂[S0, f, D*, D]` at a single b-value.
pub fn signal_gradient(params: &IvimParams, kurtosis: f64, b: f64) -> [f64; 4] {
    let IvimParams { s0, f, d_star, d } = *params;
    let e1 = mono_exp(b, d_star);
    let e2 = kurtosis_decay(b, d, kurtosis);
    [
        f * e1 + (1.0 - f) * e2,
        s0 * (e1 - e2),
        -s0 * f * b * e1,
        s0 * (1.0 - f) * e2 * (-b + b * b * d * kurtosis / 3.0),
    ]
}

/// `signal - prediction` over `[S0, f, D*, D]` at a fixed kurtosis.
#[derive(Debug, Clone, Copy)]
pub struct IvimResidual<'a> {
    pub bvals: &'a [f64],
    pub signal: &'a [f64],
    pub kurtosis: f64,
}

impl ResidualModel for IvimResidual<'_> {
    fn residuals(&self, x: &[f64]) -> DVector<f64> {
        let params = IvimParams::from_slice(x);
        DVector::from_iterator(
            self.bvals.len(),
            self.bvals
                .iter()
                .zip(self.signal)
                .map(|(&b, &s)| s - signal_at(&params, self.kurtosis, b)),
        )
    }

    fn jacobian(&self, x: &[f64]) -> DMatrix<f64> {
        let params = IvimParams::from_slice(x);
        let mut jac = DMatrix::zeros(self.bvals.len(), IvimParams::LEN);
        for (i, &b) in self.bvals.iter().enumerate() {
            for (j, g) in signal_gradient(&params, self.kurtosis, b).into_iter().enumerate() {
                jac[(i, j)] = -g;
            }
        }
        jac
    }
}

/// `signal - prediction` over `[f, D*]` with `S0` and `D` held fixed and no
/// kurtosis term.
#[derive(Debug, Clone, Copy)]
pub struct PerfusionResidual<'a> {
    pub bvals: &'a [f64],
    pub signal: &'a [f64],
    pub s0: f64,
    pub d: f64,
}

impl PerfusionResidual<'_> {
    fn params(&self, x: &[f64]) -> IvimParams {
        IvimParams {
            s0: self.s0,
            f: x[0],
            d_star: x[1],
            d: self.d,
        }
    }
}

impl ResidualModel for PerfusionResidual<'_> {
    fn residuals(&self, x: &[f64]) -> DVector<f64> {
        let params = self.params(x);
        DVector::from_iterator(
            self.bvals.len(),
            self.bvals
                .iter()
                .zip(self.signal)
                .map(|(&b, &s)| s - signal_at(&params, 0.0, b)),
        )
    }

    fn jacobian(&self, x: &[f64]) -> DMatrix<f64> {
        let params = self.params(x);
        DMatrix::from_fn(self.bvals.len(), 2, |i, j| {
            let g = signal_gradient(&params, 0.0, self.bvals[i]);
            -g[j + 1]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: IvimParams = IvimParams {
        s0: 1000.0,
        f: 0.12,
        d_star: 0.015,
        d: 0.0009,
    };

    const BVALS: [f64; 6] = [0.0, 20.0, 100.0, 300.0, 600.0, 1000.0];

    #[test]
    fn zero_kurtosis_is_biexponential() {
        for &b in &[0.0, 50.0, 200.0, 800.0] {
            let expected = PARAMS.s0
                * (PARAMS.f * (-b * PARAMS.d_star).exp() + (1.0 - PARAMS.f) * (-b * PARAMS.d).exp());
            assert!((signal_at(&PARAMS, 0.0, b) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn b0_signal_is_s0() {
        assert!((signal_at(&PARAMS, 0.7, 0.0) - PARAMS.s0).abs() < 1e-12);
    }

    #[test]
    fn tissue_term_uses_squared_bd() {
        // (b·D)²·K/6 at b=1000, D=0.0009, K=0.6 is 0.081.
        let b = 1000.0;
        let pure_tissue = IvimParams { f: 0.0, ..PARAMS };
        let log_ratio = (signal_at(&pure_tissue, 0.6, b) / signal_at(&pure_tissue, 0.0, b)).ln();
        assert!((log_ratio - 0.081).abs() < 1e-12);
    }

    #[test]
    fn residuals_vanish_on_model_data() {
        let signal = predict(&PARAMS, 0.8, &BVALS);
        let full = IvimResidual {
            bvals: &BVALS,
            signal: &signal,
            kurtosis: 0.8,
        };
        assert!(full.residuals(&PARAMS.to_array()).amax() < 1e-9);

        let plain = predict(&PARAMS, 0.0, &BVALS);
        let perfusion = PerfusionResidual {
            bvals: &BVALS,
            signal: &plain,
            s0: PARAMS.s0,
            d: PARAMS.d,
        };
        assert!(perfusion.residuals(&[PARAMS.f, PARAMS.d_star]).amax() < 1e-9);
    }

    /// Central differences of the residuals, column by column.
    fn numeric_jacobian<R: ResidualModel>(model: &R, x: &[f64]) -> DMatrix<f64> {
        let m = model.residuals(x).len();
        let mut jac = DMatrix::zeros(m, x.len());
        for j in 0..x.len() {
            let h = 1e-6 * x[j].abs().max(1e-8);
            let mut up = x.to_vec();
            let mut down = x.to_vec();
            up[j] += h;
            down[j] -= h;
            let col = (model.residuals(&up) - model.residuals(&down)) / (2.0 * h);
            jac.set_column(j, &col);
        }
        jac
    }

    fn assert_jacobians_agree(analytic: &DMatrix<f64>, numeric: &DMatrix<f64>) {
        assert_eq!(analytic.shape(), numeric.shape());
        for j in 0..analytic.ncols() {
            let scale = numeric.column(j).amax().max(1e-12);
            for i in 0..analytic.nrows() {
                let (a, n) = (analytic[(i, j)], numeric[(i, j)]);
                assert!((a - n).abs() <= 1e-5 * scale, "({i}, {j}): {a} vs {n}");
            }
        }
    }

    #[test]
    fn analytic_jacobians_match_finite_differences() {
        let signal = predict(&PARAMS, 0.8, &BVALS);
        let x = [950.0, 0.1, 0.02, 0.0011];

        let full = IvimResidual {
            bvals: &BVALS,
            signal: &signal,
            kurtosis: 0.8,
        };
        assert_jacobians_agree(&full.jacobian(&x), &numeric_jacobian(&full, &x));

        let perfusion = PerfusionResidual {
            bvals: &BVALS,
            signal: &signal,
            s0: PARAMS.s0,
            d: PARAMS.d,
        };
        let x = [0.1, 0.02];
        assert_jacobians_agree(&perfusion.jacobian(&x), &numeric_jacobian(&perfusion, &x));
    }
}
