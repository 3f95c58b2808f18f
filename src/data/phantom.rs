//! Synthetic IVIM-Kurtosis phantom generation.
//!
//! Each voxel draws `f`, `D*`, `D` and `K` uniformly from configured ranges,
//! evaluates the forward model on the acquisition and optionally adds Rician
//! noise. Generation is fully determined by the seed.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{GradientTable, IvimParams, ScalarMap, SignalVolume, voxel_count};
use crate::error::AppError;
use crate::models::predict;

/// The 21-shell IVIM protocol (s/mm²).
pub const DEFAULT_BVALS: [f64; 21] = [
    0.0, 10.0, 20.0, 30.0, 40.0, 60.0, 80.0, 100.0, 120.0, 140.0, 160.0, 180.0, 200.0, 300.0, 400.0,
    500.0, 600.0, 700.0, 800.0, 900.0, 1000.0,
];

#[derive(Debug, Clone)]
pub struct PhantomConfig {
    pub shape: Vec<usize>,
    pub bvals: Vec<f64>,
    pub s0: f64,
    pub f_range: (f64, f64),
    pub d_star_range: (f64, f64),
    pub d_range: (f64, f64),
    pub kurtosis_range: (f64, f64),
    /// `None` generates noise-free data.
    pub snr: Option<f64>,
    pub seed: u64,
}

impl Default for PhantomConfig {
    fn default() -> Self {
        Self {
            shape: vec![4, 4, 2],
            bvals: DEFAULT_BVALS.to_vec(),
            s0: 1000.0,
            f_range: (0.05, 0.2),
            d_star_range: (0.005, 0.03),
            d_range: (0.0005, 0.0012),
            kurtosis_range: (0.3, 1.0),
            snr: Some(50.0),
            seed: 42,
        }
    }
}

/// Generated acquisition, signals, kurtosis map and ground truth.
#[derive(Debug, Clone)]
pub struct Phantom {
    pub gtab: GradientTable,
    pub signals: SignalVolume,
    pub kurtosis: ScalarMap,
    pub truth: Vec<IvimParams>,
}

pub fn generate_phantom(config: &PhantomConfig) -> Result<Phantom, AppError> {
    let n_voxels = voxel_count(&config.shape);
    if n_voxels == 0 {
        return Err(AppError::new(2, "Phantom shape must contain at least one voxel."));
    }
    if !(config.s0.is_finite() && config.s0 > 0.0) {
        return Err(AppError::new(2, "Phantom S0 must be finite and > 0."));
    }
    for (name, (lo, hi)) in [
        ("f", config.f_range),
        ("D*", config.d_star_range),
        ("D", config.d_range),
        ("K", config.kurtosis_range),
    ] {
        if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
            return Err(AppError::new(2, format!("Invalid {name} range: [{lo}, {hi}].")));
        }
    }
    if let Some(snr) = config.snr {
        if !(snr.is_finite() && snr > 0.0) {
            return Err(AppError::new(2, format!("SNR must be finite and > 0, got {snr}.")));
        }
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let bvecs = config
        .bvals
        .iter()
        .map(|&b| if b > 0.0 { random_direction(&mut rng, &normal) } else { [0.0; 3] })
        .collect();
    let gtab = GradientTable::new(config.bvals.clone(), bvecs, 0.0)?;

    let sigma = config.snr.map(|snr| config.s0 / snr);
    let mut truth = Vec::with_capacity(n_voxels);
    let mut kurtosis = Vec::with_capacity(n_voxels);
    let mut data = Vec::with_capacity(n_voxels * gtab.len());

    for _ in 0..n_voxels {
        let params = IvimParams {
            s0: config.s0,
            f: uniform(&mut rng, config.f_range),
            d_star: uniform(&mut rng, config.d_star_range),
            d: uniform(&mut rng, config.d_range),
        };
        let k = uniform(&mut rng, config.kurtosis_range);

        for s in predict(&params, k, gtab.bvals()) {
            let value = match sigma {
                // Rician: magnitude of the signal with Gaussian noise on both channels.
                Some(sigma) => {
                    let re = s + sigma * normal.sample(&mut rng);
                    let im = sigma * normal.sample(&mut rng);
                    (re * re + im * im).sqrt()
                }
                None => s,
            };
            data.push(value);
        }
        truth.push(params);
        kurtosis.push(k);
    }

    let signals = SignalVolume::new(config.shape.clone(), gtab.len(), data)?;
    let kurtosis = ScalarMap::new(config.shape.clone(), kurtosis)?;

    Ok(Phantom {
        gtab,
        signals,
        kurtosis,
        truth,
    })
}

fn uniform(rng: &mut StdRng, (lo, hi): (f64, f64)) -> f64 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

fn random_direction(rng: &mut StdRng, normal: &Normal<f64>) -> [f64; 3] {
    loop {
        let v = [normal.sample(rng), normal.sample(rng), normal.sample(rng)];
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if norm > 1e-6 {
            return [v[0] / norm, v[1] / norm, v[2] / norm];
        }
    }
}
