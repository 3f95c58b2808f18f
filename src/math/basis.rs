//! Attenuation building blocks for the IVIM-Kurtosis signal equation.
//!
//! - `mono_exp(b, D) = exp(-b·D)`
//! - `kurtosis_decay(b, D, K) = exp(-b·D + (b·D)²·K / 6)`
//!
//! The second form is the second-order cumulant (DKI) expansion of the log
//! signal. With `K = 0` it is identical to `mono_exp`.
//!
//! Earlier IVIM-Kurtosis code wrote the correction as `(b·D²)·K / 6`, which is
//! not dimensionless. The squared product `(b·D)²` is a deliberate departure;
//! both forms coincide only at `K = 0`.

/// Mono-exponential attenuation `exp(-b·D)`.
pub fn mono_exp(b: f64, d: f64) -> f64 {
    (-b * d).exp()
}

/// Kurtosis-corrected attenuation `exp(-b·D + (b·D)²·K / 6)`.
pub fn kurtosis_decay(b: f64, d: f64, k: f64) -> f64 {
    let bd = b * d;
    (-bd + bd * bd * k / 6.0).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_kurtosis_matches_mono_exponential() {
        for &b in &[0.0, 10.0, 200.0, 1000.0] {
            for &d in &[0.0, 0.0007, 0.003] {
                assert_eq!(kurtosis_decay(b, d, 0.0), mono_exp(b, d));
            }
        }
    }

    #[test]
    fn attenuation_is_one_at_b0() {
        assert_eq!(mono_exp(0.0, 0.002), 1.0);
        assert_eq!(kurtosis_decay(0.0, 0.002, 1.2), 1.0);
    }

    #[test]
    fn positive_kurtosis_slows_decay() {
        let plain = kurtosis_decay(1000.0, 0.001, 0.0);
        let kurt = kurtosis_decay(1000.0, 0.001, 1.0);
        assert!(kurt > plain);
        assert!(((kurt / plain).ln() - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn correction_is_dimensionless_in_b_times_d() {
        // Same b·D product, different units split: identical attenuation.
        let a = kurtosis_decay(1000.0, 0.001, 0.8);
        let b = kurtosis_decay(1.0, 1.0, 0.8);
        assert!((a - b).abs() < 1e-12);
    }
}
