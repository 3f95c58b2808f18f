//! Bounded non-linear least squares on top of `levenberg-marquardt`.
//!
//! The solver is unconstrained, so box constraints are enforced by
//! reparameterization. Each parameter is optimized through a smooth map from ℝ
//! onto its admissible range:
//!
//! - `[lo, hi]`: `lo + (hi - lo)·sigmoid(u)`
//! - `[lo, ∞)`: `lo + s·softplus(u)`
//! - `(-∞, hi]`: `hi - s·softplus(u)`
//! - unbounded: `s·u`
//!
//! where `s` is the parameter's `x_scale` entry. Residual models supply analytic
//! Jacobians in their own parameters; the chain rule through the maps is applied
//! here. The starting point must lie inside the box; points on a bound are moved
//! a negligible distance inward.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use thiserror::Error;

pub use levenberg_marquardt::TerminationReason;

/// Relative distance kept from a bound when mapping the start point.
const EDGE: f64 = 1e-9;

/// A residual vector with its Jacobian.
pub trait ResidualModel {
    /// Residuals at `x`; the length must not depend on `x`.
    fn residuals(&self, x: &[f64]) -> DVector<f64>;

    /// `∂r_i/∂x_j`, one row per residual.
    fn jacobian(&self, x: &[f64]) -> DMatrix<f64>;
}

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LsqOptions {
    /// Relative reduction of the cost.
    pub ftol: f64,
    /// Relative change of the (mapped) parameters.
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns.
    pub gtol: f64,
    /// Residual evaluation budget.
    pub max_nfev: usize,
    /// Characteristic magnitude per parameter, used for components without a
    /// finite range; `None` means all ones.
    pub x_scale: Option<Vec<f64>>,
}

impl Default for LsqOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            max_nfev: 1000,
            x_scale: None,
        }
    }
}

#[derive(Debug)]
pub struct LsqReport {
    pub x: Vec<f64>,
    /// `½‖r(x)‖²`
    pub cost: f64,
    pub nfev: usize,
    pub termination: TerminationReason,
}

impl LsqReport {
    /// A tolerance stopped the iteration, including tolerances tighter than
    /// machine precision. `false` for an exhausted budget or a numerical failure.
    pub fn converged(&self) -> bool {
        self.termination.was_successful()
            || matches!(self.termination, TerminationReason::NoImprovementPossible(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LsqError {
    #[error("x0 is infeasible: component {index} = {value} outside [{lower}, {upper}]")]
    InfeasibleStart {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("Invalid least squares input: {0}")]
    InvalidInput(String),

    #[error("Residuals are not finite at the starting point")]
    NonFiniteStart,
}

/// Map from an unconstrained variable onto one parameter's range.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BoundMap {
    Interval { lower: f64, width: f64 },
    Lower { lower: f64, scale: f64 },
    Upper { upper: f64, scale: f64 },
    Free { scale: f64 },
}

impl BoundMap {
    fn new(lower: f64, upper: f64, scale: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (true, true) => BoundMap::Interval {
                lower,
                width: upper - lower,
            },
            (true, false) => BoundMap::Lower { lower, scale },
            (false, true) => BoundMap::Upper { upper, scale },
            (false, false) => BoundMap::Free { scale },
        }
    }

    fn to_bounded(self, u: f64) -> f64 {
        match self {
            BoundMap::Interval { lower, width } => lower + width * sigmoid(u),
            BoundMap::Lower { lower, scale } => lower + scale * softplus(u),
            BoundMap::Upper { upper, scale } => upper - scale * softplus(u),
            BoundMap::Free { scale } => scale * u,
        }
    }

    /// `d to_bounded / du`
    fn derivative(self, u: f64) -> f64 {
        match self {
            BoundMap::Interval { width, .. } => {
                let s = sigmoid(u);
                width * s * (1.0 - s)
            }
            BoundMap::Lower { scale, .. } => scale * sigmoid(u),
            BoundMap::Upper { scale, .. } => -scale * sigmoid(u),
            BoundMap::Free { scale } => scale,
        }
    }

    fn to_free(self, x: f64) -> f64 {
        match self {
            BoundMap::Interval { lower, width } => {
                let t = ((x - lower) / width).clamp(EDGE, 1.0 - EDGE);
                (t / (1.0 - t)).ln()
            }
            BoundMap::Lower { lower, scale } => softplus_inv(((x - lower) / scale).max(EDGE)),
            BoundMap::Upper { upper, scale } => softplus_inv(((upper - x) / scale).max(EDGE)),
            BoundMap::Free { scale } => x / scale,
        }
    }
}

fn sigmoid(u: f64) -> f64 {
    if u >= 0.0 {
        1.0 / (1.0 + (-u).exp())
    } else {
        let e = u.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + exp(u))` without overflow.
fn softplus(u: f64) -> f64 {
    if u > 20.0 { u } else { u.exp().ln_1p() }
}

/// Inverse of [`softplus`] on `(0, ∞)`.
fn softplus_inv(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp_m1().ln() }
}

/// A residual model seen through the bound maps.
struct BoxedProblem<'a, R> {
    model: &'a R,
    maps: Vec<BoundMap>,
    u: DVector<f64>,
}

impl<R: ResidualModel> BoxedProblem<'_, R> {
    fn point(&self) -> Vec<f64> {
        self.maps
            .iter()
            .zip(self.u.iter())
            .map(|(map, &u)| map.to_bounded(u))
            .collect()
    }
}

impl<R: ResidualModel> LeastSquaresProblem<f64, Dyn, Dyn> for BoxedProblem<'_, R> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, u: &DVector<f64>) {
        self.u.copy_from(u);
    }

    fn params(&self) -> DVector<f64> {
        self.u.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.model.residuals(&self.point());
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jac = self.model.jacobian(&self.point());
        for (j, (map, &u)) in self.maps.iter().zip(self.u.iter()).enumerate() {
            jac.column_mut(j).scale_mut(map.derivative(u));
        }
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}

/// Solve `min ½‖r(x)‖²` subject to `lower ≤ x ≤ upper`.
pub fn least_squares<R: ResidualModel>(
    model: &R,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    opts: &LsqOptions,
) -> Result<LsqReport, LsqError> {
    let n = x0.len();
    if n == 0 {
        return Err(LsqError::InvalidInput("empty parameter vector".into()));
    }
    if lower.len() != n || upper.len() != n {
        return Err(LsqError::InvalidInput(format!(
            "bounds have lengths {}/{} but x0 has {n}",
            lower.len(),
            upper.len()
        )));
    }
    for i in 0..n {
        if !(lower[i] < upper[i]) {
            return Err(LsqError::InvalidInput(format!(
                "lower bound {} must be below upper bound {} (component {i})",
                lower[i], upper[i]
            )));
        }
    }
    for i in 0..n {
        if !(x0[i].is_finite() && lower[i] <= x0[i] && x0[i] <= upper[i]) {
            return Err(LsqError::InfeasibleStart {
                index: i,
                value: x0[i],
                lower: lower[i],
                upper: upper[i],
            });
        }
    }
    for (name, tol) in [("ftol", opts.ftol), ("xtol", opts.xtol), ("gtol", opts.gtol)] {
        if !(tol.is_finite() && tol >= 0.0) {
            return Err(LsqError::InvalidInput(format!("{name} must be finite and >= 0, got {tol}")));
        }
    }
    if opts.max_nfev == 0 {
        return Err(LsqError::InvalidInput("max_nfev must be > 0".into()));
    }
    let scale = match &opts.x_scale {
        Some(s) if s.len() != n || s.iter().any(|v| !(v.is_finite() && *v > 0.0)) => {
            return Err(LsqError::InvalidInput(
                "x_scale must hold one finite positive value per parameter".into(),
            ));
        }
        Some(s) => s.clone(),
        None => vec![1.0; n],
    };

    let maps: Vec<BoundMap> = (0..n).map(|i| BoundMap::new(lower[i], upper[i], scale[i])).collect();
    let u0 = DVector::from_iterator(n, maps.iter().zip(x0).map(|(map, &x)| map.to_free(x)));
    let problem = BoxedProblem { model, maps, u: u0 };

    match problem.residuals() {
        None => return Err(LsqError::NonFiniteStart),
        Some(r) if r.len() < n => {
            return Err(LsqError::InvalidInput(format!(
                "{} residuals cannot determine {n} parameters",
                r.len()
            )));
        }
        Some(_) => {}
    }

    // The solver's budget is `patience · (n + 1)` evaluations.
    let patience = (opts.max_nfev / (n + 1)).max(1);
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(patience)
        .minimize(problem);

    let x = problem.point();
    let cost = 0.5 * model.residuals(&x).norm_squared();
    Ok(LsqReport {
        x,
        cost,
        nfev: report.number_of_evaluations,
        termination: report.termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `y = a·exp(-k·t)` sampled on a fixed grid.
    struct ExpDecay {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl ExpDecay {
        fn new(a: f64, k: f64) -> Self {
            let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
            let y = t.iter().map(|&ti| a * (-k * ti).exp()).collect();
            Self { t, y }
        }
    }

    impl ResidualModel for ExpDecay {
        fn residuals(&self, p: &[f64]) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t.iter().zip(&self.y).map(|(&ti, &yi)| yi - p[0] * (-p[1] * ti).exp()),
            )
        }

        fn jacobian(&self, p: &[f64]) -> DMatrix<f64> {
            DMatrix::from_fn(self.t.len(), 2, |i, j| {
                let e = (-p[1] * self.t[i]).exp();
                if j == 0 { -e } else { p[0] * self.t[i] * e }
            })
        }
    }

    fn tight() -> LsqOptions {
        LsqOptions {
            ftol: 1e-15,
            xtol: 1e-15,
            gtol: 1e-15,
            ..LsqOptions::default()
        }
    }

    #[test]
    fn solves_exponential_decay() {
        let model = ExpDecay::new(2.0, 0.5);
        let report = least_squares(&model, &[1.0, 0.1], &[0.0, 0.0], &[10.0, 5.0], &tight()).unwrap();

        assert!((report.x[0] - 2.0).abs() < 1e-6, "a = {}", report.x[0]);
        assert!((report.x[1] - 0.5).abs() < 1e-6, "k = {}", report.x[1]);
        assert!(report.cost < 1e-12);
        assert!(report.converged(), "{:?}", report.termination);
    }

    #[test]
    fn half_open_and_free_ranges_are_supported() {
        let model = ExpDecay::new(2.0, 0.5);
        let opts = LsqOptions {
            x_scale: Some(vec![1.0, 0.1]),
            ..tight()
        };
        let report = least_squares(
            &model,
            &[1.0, 0.1],
            &[0.0, f64::NEG_INFINITY],
            &[f64::INFINITY, f64::INFINITY],
            &opts,
        )
        .unwrap();
        assert!((report.x[0] - 2.0).abs() < 1e-6);
        assert!((report.x[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn solution_stays_inside_active_bound() {
        // Unconstrained optimum k = 0.5 lies above the upper bound.
        let model = ExpDecay::new(2.0, 0.5);
        let report = least_squares(&model, &[1.0, 0.1], &[0.0, 0.0], &[10.0, 0.3], &tight()).unwrap();
        assert!(report.x[1] <= 0.3);
        assert!(report.x[1] > 0.29, "k = {}", report.x[1]);
    }

    #[test]
    fn start_on_a_bound_is_accepted() {
        let model = ExpDecay::new(2.0, 0.5);
        let initial = 0.5 * model.residuals(&[1.0, 0.0]).norm_squared();
        let report = least_squares(&model, &[1.0, 0.0], &[0.0, 0.0], &[10.0, 5.0], &tight()).unwrap();
        assert!(report.x[1] > 0.0 && report.x[1] < 5.0);
        assert!(report.cost < initial);
    }

    #[test]
    fn rejects_infeasible_start() {
        let model = ExpDecay::new(2.0, 0.5);
        let err = least_squares(&model, &[-0.5, 0.1], &[0.0, 0.0], &[1.0, 1.0], &LsqOptions::default())
            .unwrap_err();
        assert!(matches!(err, LsqError::InfeasibleStart { index: 0, .. }));
    }

    #[test]
    fn rejects_inverted_bounds_and_bad_options() {
        let model = ExpDecay::new(2.0, 0.5);
        let err = least_squares(&model, &[0.5, 0.1], &[1.0, 0.0], &[0.0, 1.0], &LsqOptions::default())
            .unwrap_err();
        assert!(matches!(err, LsqError::InvalidInput(_)));

        let opts = LsqOptions {
            x_scale: Some(vec![0.0, 1.0]),
            ..LsqOptions::default()
        };
        let err = least_squares(&model, &[0.5, 0.1], &[0.0, 0.0], &[1.0, 1.0], &opts).unwrap_err();
        assert!(matches!(err, LsqError::InvalidInput(_)));

        let opts = LsqOptions {
            ftol: -1.0,
            ..LsqOptions::default()
        };
        let err = least_squares(&model, &[0.5, 0.1], &[0.0, 0.0], &[1.0, 1.0], &opts).unwrap_err();
        assert!(matches!(err, LsqError::InvalidInput(_)));
    }

    #[test]
    fn exhausted_budget_is_not_converged() {
        let model = ExpDecay::new(2.0, 0.5);
        let opts = LsqOptions {
            max_nfev: 3,
            ..tight()
        };
        let report = least_squares(&model, &[1.0, 0.1], &[0.0, 0.0], &[10.0, 5.0], &opts).unwrap();
        assert!(matches!(report.termination, TerminationReason::LostPatience));
        assert!(!report.converged());
    }

    #[test]
    fn jacobian_includes_bound_map_chain_rule() {
        let model = ExpDecay::new(2.0, 0.5);
        let maps = vec![
            BoundMap::new(0.0, 10.0, 1.0),
            BoundMap::new(0.0, f64::INFINITY, 0.5),
        ];
        let u = DVector::from_vec(vec![maps[0].to_free(1.5), maps[1].to_free(0.4)]);
        let mut problem = BoxedProblem {
            model: &model,
            maps,
            u,
        };

        let analytic = problem.jacobian().unwrap();
        let numeric = levenberg_marquardt::differentiate_numerically(&mut problem).unwrap();
        for (a, b) in analytic.iter().zip(numeric.iter()) {
            assert!((a - b).abs() <= 1e-5 * (1.0 + b.abs()), "{a} vs {b}");
        }
    }

    #[test]
    fn bound_maps_invert() {
        for map in [
            BoundMap::new(0.0, 0.3, 1.0),
            BoundMap::new(0.0, f64::INFINITY, 1000.0),
            BoundMap::new(f64::NEG_INFINITY, 2.0, 1.0),
            BoundMap::new(f64::NEG_INFINITY, f64::INFINITY, 0.01),
        ] {
            let x = match map {
                BoundMap::Interval { .. } => 0.12,
                BoundMap::Lower { .. } => 950.0,
                BoundMap::Upper { .. } => -3.0,
                BoundMap::Free { .. } => 0.004,
            };
            let back = map.to_bounded(map.to_free(x));
            assert!((back - x).abs() <= 1e-9 * x.abs().max(1.0), "{map:?}: {back} vs {x}");
        }
    }
}
