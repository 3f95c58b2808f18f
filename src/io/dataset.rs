//! Read/write dataset JSON files.
//!
//! A dataset bundles everything a fit needs in one portable file:
//! - acquisition (b-values, directions)
//! - voxel grid shape and voxel-major signal series
//! - the precomputed kurtosis map
//! - optional mask and ground-truth parameters (synthetic phantoms)

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::Phantom;
use crate::domain::{GradientTable, IvimParams, ScalarMap, SignalVolume, VoxelMask, voxel_count};
use crate::error::AppError;

/// On-disk dataset schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetFile {
    pub tool: String,
    pub shape: Vec<usize>,
    pub bvals: Vec<f64>,
    pub bvecs: Vec<[f64; 3]>,
    /// Voxel-major: `signals[v * bvals.len() + j]`.
    pub signals: Vec<f64>,
    pub kurtosis: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truth: Option<Vec<IvimParams>>,
}

/// A validated dataset ready for fitting.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub gtab: GradientTable,
    pub signals: SignalVolume,
    pub kurtosis: ScalarMap,
    pub mask: Option<VoxelMask>,
    pub truth: Option<Vec<IvimParams>>,
}

impl DatasetFile {
    pub fn from_phantom(phantom: &Phantom) -> Self {
        Self {
            tool: "ivimk".to_string(),
            shape: phantom.signals.shape().to_vec(),
            bvals: phantom.gtab.bvals().to_vec(),
            bvecs: phantom.gtab.bvecs().to_vec(),
            signals: phantom.signals.as_slice().to_vec(),
            kurtosis: phantom.kurtosis.values().to_vec(),
            mask: None,
            truth: Some(phantom.truth.clone()),
        }
    }

    /// Validate the raw arrays and build the in-memory inputs.
    ///
    /// The kurtosis map and mask lengths are checked against the voxel grid here;
    /// the fit itself checks shapes again.
    pub fn into_dataset(self) -> Result<LoadedDataset, AppError> {
        let n_voxels = voxel_count(&self.shape);
        if n_voxels == 0 {
            return Err(AppError::new(3, "Dataset contains no voxels."));
        }
        if let Some(truth) = &self.truth {
            if truth.len() != n_voxels {
                return Err(AppError::new(
                    2,
                    format!("Dataset truth has {} entries, expected {n_voxels}.", truth.len()),
                ));
            }
        }

        let gtab = GradientTable::new(self.bvals, self.bvecs, 0.0)?;
        let signals = SignalVolume::new(self.shape.clone(), gtab.len(), self.signals)?;
        let kurtosis = ScalarMap::new(self.shape.clone(), self.kurtosis)?;
        let mask = self
            .mask
            .map(|m| VoxelMask::new(self.shape.clone(), m))
            .transpose()?;

        Ok(LoadedDataset {
            gtab,
            signals,
            kurtosis,
            mask,
            truth: self.truth,
        })
    }
}

/// Write a dataset JSON file.
pub fn write_dataset_json(path: &Path, dataset: &DatasetFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create dataset JSON '{}': {e}", path.display())))?;
    serde_json::to_writer(BufWriter::new(file), dataset)
        .map_err(|e| AppError::new(2, format!("Failed to write dataset JSON: {e}")))?;
    Ok(())
}

/// Read a dataset JSON file.
pub fn read_dataset_json(path: &Path) -> Result<DatasetFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open dataset JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid dataset JSON: {e}")))
}
