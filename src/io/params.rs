//! Read/write fitted-parameter JSON files.
//!
//! The params file is the portable representation of a multi-voxel fit:
//! - voxel grid shape and the b-values it was fitted on
//! - per-voxel parameters, kurtosis value and fit status (`null` for masked voxels)
//!
//! It carries enough to re-evaluate any voxel's fitted curve for plotting.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{FitStatus, GradientTable, IvimParams};
use crate::error::AppError;
use crate::fit::MultiVoxelFit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelParams {
    pub params: IvimParams,
    pub kurtosis: f64,
    pub status: FitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsFile {
    pub tool: String,
    pub shape: Vec<usize>,
    pub bvals: Vec<f64>,
    pub voxels: Vec<Option<VoxelParams>>,
}

impl ParamsFile {
    pub fn from_fit(fit: &MultiVoxelFit, gtab: &GradientTable) -> Self {
        let voxels = fit
            .fits()
            .iter()
            .map(|f| {
                f.as_ref().map(|f| VoxelParams {
                    params: f.params,
                    kurtosis: f.kurtosis,
                    status: f.status,
                })
            })
            .collect();

        Self {
            tool: "ivimk".to_string(),
            shape: fit.shape().to_vec(),
            bvals: gtab.bvals().to_vec(),
            voxels,
        }
    }
}

/// Write a params JSON file.
pub fn write_params_json(path: &Path, fit: &MultiVoxelFit, gtab: &GradientTable) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create params JSON '{}': {e}", path.display())))?;

    let params = ParamsFile::from_fit(fit, gtab);
    serde_json::to_writer_pretty(BufWriter::new(file), &params)
        .map_err(|e| AppError::new(2, format!("Failed to write params JSON: {e}")))?;

    Ok(())
}

/// Read a params JSON file.
pub fn read_params_json(path: &Path) -> Result<ParamsFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open params JSON '{}': {e}", path.display())))?;
    let params: ParamsFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid params JSON: {e}")))?;
    Ok(params)
}
