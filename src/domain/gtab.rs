//! Gradient table value type.
//!
//! Only what the IVIM fit needs: b-values, directions and the b0 threshold, with
//! construction-time validation. Reading bval/bvec files is left to callers.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Directions with `b > b0_threshold` must have unit norm within this tolerance.
const UNIT_ATOL: f64 = 1e-2;

/// Deserialization goes through [`GradientTable::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GradientTableParts")]
pub struct GradientTable {
    bvals: Vec<f64>,
    bvecs: Vec<[f64; 3]>,
    b0_threshold: f64,
}

#[derive(Deserialize)]
struct GradientTableParts {
    bvals: Vec<f64>,
    bvecs: Vec<[f64; 3]>,
    b0_threshold: f64,
}

impl TryFrom<GradientTableParts> for GradientTable {
    type Error = ModelError;

    fn try_from(parts: GradientTableParts) -> Result<Self, Self::Error> {
        Self::new(parts.bvals, parts.bvecs, parts.b0_threshold)
    }
}

impl GradientTable {
    pub fn new(bvals: Vec<f64>, bvecs: Vec<[f64; 3]>, b0_threshold: f64) -> Result<Self, ModelError> {
        if bvals.is_empty() {
            return Err(ModelError::InvalidGradientTable("no b-values".into()));
        }
        if bvals.len() != bvecs.len() {
            return Err(ModelError::InvalidGradientTable(format!(
                "{} b-values but {} directions",
                bvals.len(),
                bvecs.len()
            )));
        }
        if !(b0_threshold.is_finite() && b0_threshold >= 0.0) {
            return Err(ModelError::InvalidGradientTable(format!(
                "b0_threshold must be finite and >= 0, got {b0_threshold}"
            )));
        }
        for (i, (&b, v)) in bvals.iter().zip(&bvecs).enumerate() {
            if !(b.is_finite() && b >= 0.0) {
                return Err(ModelError::InvalidGradientTable(format!(
                    "b-value {i} must be finite and >= 0, got {b}"
                )));
            }
            if b > b0_threshold {
                let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
                if (norm - 1.0).abs() > UNIT_ATOL {
                    return Err(ModelError::InvalidGradientTable(format!(
                        "direction {i} has norm {norm:.4}; diffusion-weighted directions must be unit vectors"
                    )));
                }
            }
        }

        Ok(Self {
            bvals,
            bvecs,
            b0_threshold,
        })
    }

    /// Build a table for a single-axis acquisition: b0 volumes get a zero
    /// direction and every weighted volume is encoded along `z`.
    pub fn from_bvals(bvals: Vec<f64>, b0_threshold: f64) -> Result<Self, ModelError> {
        let bvecs = bvals
            .iter()
            .map(|&b| if b > b0_threshold { [0.0, 0.0, 1.0] } else { [0.0; 3] })
            .collect();
        Self::new(bvals, bvecs, b0_threshold)
    }

    pub fn bvals(&self) -> &[f64] {
        &self.bvals
    }

    pub fn bvecs(&self) -> &[[f64; 3]] {
        &self.bvecs
    }

    pub fn b0_threshold(&self) -> f64 {
        self.b0_threshold
    }

    pub fn len(&self) -> usize {
        self.bvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvals.is_empty()
    }

    /// `true` for every volume with `b <= b0_threshold`.
    pub fn b0s_mask(&self) -> Vec<bool> {
        self.bvals.iter().map(|&b| b <= self.b0_threshold).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b0_mask_follows_threshold() {
        let gtab = GradientTable::from_bvals(vec![0.0, 20.0, 50.0, 800.0], 50.0).unwrap();
        assert_eq!(gtab.b0s_mask(), vec![true, true, true, false]);
        assert_eq!(gtab.bvecs()[1], [0.0; 3]);
        assert_eq!(gtab.bvecs()[3], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_non_unit_weighted_direction() {
        let err = GradientTable::new(vec![0.0, 500.0], vec![[0.0; 3], [0.5, 0.0, 0.0]], 0.0).unwrap_err();
        assert!(matches!(err, ModelError::InvalidGradientTable(_)));
    }

    #[test]
    fn rejects_length_mismatch_and_negative_bvalues() {
        assert!(GradientTable::new(vec![0.0, 500.0], vec![[0.0; 3]], 0.0).is_err());
        assert!(GradientTable::from_bvals(vec![0.0, -10.0], 0.0).is_err());
        assert!(GradientTable::from_bvals(vec![], 0.0).is_err());
    }

    #[test]
    fn deserialization_validates_table() {
        let bad = r#"{"bvals":[-5.0,300.0],"bvecs":[[0,0,0],[9,9,9]],"b0_threshold":0.0}"#;
        assert!(serde_json::from_str::<GradientTable>(bad).is_err());

        let good = r#"{"bvals":[0.0,300.0],"bvecs":[[0,0,0],[0,1,0]],"b0_threshold":0.0}"#;
        let gtab: GradientTable = serde_json::from_str(good).unwrap();
        assert_eq!(gtab.bvals(), &[0.0, 300.0]);
    }
}
