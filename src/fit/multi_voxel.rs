//! Multi-voxel fitting.
//!
//! Every voxel is fitted independently with [`IvimKurtosisModel::fit_voxel`]. The
//! voxel loop is parallel (rayon) and collects results in voxel order, so the
//! output does not depend on thread scheduling. When several voxels fail, the
//! error of the lowest voxel index is returned.

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{FitStatus, GradientTable, ScalarMap, SignalVolume, VoxelMask};
use crate::error::ModelError;
use crate::fit::fitter::{IvimFit, IvimKurtosisModel};

/// Fit results over a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVoxelFit {
    shape: Vec<usize>,
    fits: Vec<Option<IvimFit>>,
}

impl MultiVoxelFit {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Per-voxel fits; `None` where the mask excluded the voxel.
    pub fn fits(&self) -> &[Option<IvimFit>] {
        &self.fits
    }

    pub fn get(&self, index: usize) -> Option<&IvimFit> {
        self.fits.get(index).and_then(Option::as_ref)
    }

    /// Which voxels were fitted.
    pub fn mask(&self) -> VoxelMask {
        VoxelMask::from_parts(self.shape.clone(), self.fits.iter().map(Option::is_some).collect())
    }

    pub fn fitted_count(&self) -> usize {
        self.fits.iter().filter(|f| f.is_some()).count()
    }

    /// Number of fitted voxels with the given status.
    pub fn status_count(&self, status: FitStatus) -> usize {
        self.fits.iter().flatten().filter(|f| f.status == status).count()
    }

    /// Fitted voxels whose refinement ran out of budget or failed numerically.
    pub fn unconverged_count(&self) -> usize {
        self.fits.iter().flatten().filter(|f| !f.converged).count()
    }

    /// Map a per-voxel quantity; voxels without a fit get `0.0`.
    pub fn param_map(&self, value: impl Fn(&IvimFit) -> f64) -> ScalarMap {
        let data = self.fits.iter().map(|f| f.as_ref().map_or(0.0, &value)).collect();
        ScalarMap::from_parts(self.shape.clone(), data)
    }

    pub fn s0_map(&self) -> ScalarMap {
        self.param_map(IvimFit::s0_predicted)
    }

    pub fn perfusion_fraction_map(&self) -> ScalarMap {
        self.param_map(IvimFit::perfusion_fraction)
    }

    pub fn d_star_map(&self) -> ScalarMap {
        self.param_map(IvimFit::d_star)
    }

    pub fn d_map(&self) -> ScalarMap {
        self.param_map(IvimFit::d)
    }

    /// Predicted signal for every voxel (zeros where no fit exists).
    pub fn predict(&self, gtab: &GradientTable) -> SignalVolume {
        let n_samples = gtab.len();
        let mut data = Vec::with_capacity(self.fits.len() * n_samples);
        for fit in &self.fits {
            match fit {
                Some(fit) => data.extend(fit.predict(gtab)),
                None => data.extend(std::iter::repeat_n(0.0, n_samples)),
            }
        }
        SignalVolume::from_parts(self.shape.clone(), n_samples, data)
    }
}

impl IvimKurtosisModel {
    /// Fit every voxel of `data` using the matching value of `kurtosis`.
    pub fn fit(&self, data: &SignalVolume, kurtosis: &ScalarMap) -> Result<MultiVoxelFit, ModelError> {
        self.fit_masked(data, kurtosis, None, ProgressBar::hidden())
    }

    /// Fit the voxels selected by `mask` (all voxels when `None`), reporting
    /// progress on `progress`.
    pub fn fit_masked(
        &self,
        data: &SignalVolume,
        kurtosis: &ScalarMap,
        mask: Option<&VoxelMask>,
        progress: ProgressBar,
    ) -> Result<MultiVoxelFit, ModelError> {
        if kurtosis.shape() != data.shape() {
            return Err(ModelError::ShapeMismatch {
                what: "kurtosis map",
                expected: data.shape().to_vec(),
                found: kurtosis.shape().to_vec(),
            });
        }
        if let Some(mask) = mask {
            if mask.shape() != data.shape() {
                return Err(ModelError::ShapeMismatch {
                    what: "mask",
                    expected: data.shape().to_vec(),
                    found: mask.shape().to_vec(),
                });
            }
        }
        if kurtosis.len() != data.voxel_count() {
            return Err(ModelError::VoxelCount {
                what: "kurtosis map",
                expected: data.voxel_count(),
                found: kurtosis.len(),
            });
        }
        if let Some(mask) = mask.filter(|m| m.len() != data.voxel_count()) {
            return Err(ModelError::VoxelCount {
                what: "mask",
                expected: data.voxel_count(),
                found: mask.len(),
            });
        }
        if data.n_samples() != self.gtab().len() {
            return Err(ModelError::SignalLength {
                expected: self.gtab().len(),
                found: data.n_samples(),
            });
        }

        let n = data.voxel_count();
        let selected = |i: usize| mask.is_none_or(|m| m.values()[i]);
        progress.set_length((0..n).filter(|&i| selected(i)).count() as u64);

        let results: Vec<Result<Option<IvimFit>, ModelError>> = (0..n)
            .into_par_iter()
            .map(|i| {
                if !selected(i) {
                    return Ok(None);
                }
                let fit = self.fit_voxel(data.voxel(i), kurtosis.values()[i]);
                progress.inc(1);
                fit.map(Some)
            })
            .collect();
        progress.finish_and_clear();

        let fits = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        let out = MultiVoxelFit {
            shape: data.shape().to_vec(),
            fits,
        };

        let fallbacks =
            out.status_count(FitStatus::BoundsFallback) + out.status_count(FitStatus::InfeasibleFallback);
        let unconverged = out.unconverged_count();
        if fallbacks > 0 || unconverged > 0 {
            warn!(
                fallbacks,
                unconverged,
                fitted = out.fitted_count(),
                "some voxels fell back to the linear estimate or stopped before converging"
            );
        }
        info!(voxels = n, fitted = out.fitted_count(), "multi-voxel fit finished");

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IvimParams, ParamBounds};
    use crate::fit::IvimOptions;
    use crate::models::predict;

    fn model() -> IvimKurtosisModel {
        let bvals = vec![
            0.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0, 150.0, 200.0, 400.0, 600.0, 800.0, 1000.0,
        ];
        let gtab = GradientTable::from_bvals(bvals, 0.0).unwrap();
        let options = IvimOptions {
            bounds: Some(ParamBounds::LITERATURE),
            ..IvimOptions::default()
        };
        IvimKurtosisModel::new(gtab, options).unwrap()
    }

    fn volume(model: &IvimKurtosisModel, shape: Vec<usize>, ks: &[f64]) -> SignalVolume {
        let params = IvimParams {
            s0: 900.0,
            f: 0.1,
            d_star: 0.012,
            d: 0.0009,
        };
        let mut data = Vec::new();
        for &k in ks {
            data.extend(predict(&params, k, model.gtab().bvals()));
        }
        SignalVolume::new(shape, model.gtab().len(), data).unwrap()
    }

    #[test]
    fn masked_voxels_are_skipped_and_zero_in_maps() {
        let model = model();
        let ks = [0.0, 0.5, 1.0, 0.2];
        let data = volume(&model, vec![2, 2], &ks);
        let kurtosis = ScalarMap::new(vec![2, 2], ks.to_vec()).unwrap();
        let mask = VoxelMask::new(vec![2, 2], vec![true, false, true, true]).unwrap();

        let fit = model
            .fit_masked(&data, &kurtosis, Some(&mask), ProgressBar::hidden())
            .unwrap();
        assert_eq!(fit.fitted_count(), 3);
        assert!(fit.get(1).is_none());
        assert_eq!(fit.d_map().values()[1], 0.0);
        assert!(fit.d_map().values()[0] > 0.0);
        assert_eq!(fit.mask(), mask);
        assert_eq!(fit.get(2).map(|f| f.kurtosis), Some(1.0));

        let predicted = fit.predict(model.gtab());
        assert!(predicted.voxel(1).iter().all(|&v| v == 0.0));
        assert!(predicted.voxel(0)[0] > 0.0);
    }

    #[test]
    fn mask_shape_must_match() {
        let model = model();
        let data = volume(&model, vec![2], &[0.0, 0.0]);
        let kurtosis = ScalarMap::filled(vec![2], 0.0);
        let mask = VoxelMask::filled(vec![3], true);
        let err = model
            .fit_masked(&data, &kurtosis, Some(&mask), ProgressBar::hidden())
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { what: "mask", .. }));
    }

    #[test]
    fn unconverged_refinements_are_counted() {
        let ks = [0.3, 0.6, 0.9];
        let model = model();
        let data = volume(&model, vec![3], &ks);
        let kurtosis = ScalarMap::new(vec![3], ks.to_vec()).unwrap();

        let fit = model.fit(&data, &kurtosis).unwrap();
        assert_eq!(fit.unconverged_count(), 0);

        let starved = IvimKurtosisModel::new(
            model.gtab().clone(),
            IvimOptions {
                maxiter: 1,
                ..model.options().clone()
            },
        )
        .unwrap();
        let fit = starved.fit(&data, &kurtosis).unwrap();
        assert_eq!(fit.unconverged_count(), 3);
        assert!(fit.fits().iter().flatten().all(|f| f.status == FitStatus::TwoStage));
    }

    #[test]
    fn first_failing_voxel_is_reported() {
        let model = model();
        let n = model.gtab().len();
        let mut data = volume(&model, vec![3], &[0.0, 0.0, 0.0]).into_vec();
        for v in &mut data[n..] {
            *v = 0.0;
        }
        let data = SignalVolume::new(vec![3], n, data).unwrap();
        let kurtosis = ScalarMap::filled(vec![3], 0.0);
        assert!(matches!(model.fit(&data, &kurtosis), Err(ModelError::LinearFit(_))));
    }
}
