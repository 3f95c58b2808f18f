//! In-memory voxel arrays.
//!
//! Shapes describe the voxel grid only (`[]` is a single voxel, `[nx, ny, nz]` a
//! volume). Voxels are stored in row-major order; signal series are voxel-major so
//! each voxel's samples are contiguous.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of voxels in a grid of the given shape.
pub fn voxel_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major grid coordinates of a flat voxel index.
pub fn unravel_index(mut index: usize, shape: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; shape.len()];
    for (axis, &dim) in shape.iter().enumerate().rev() {
        if dim == 0 {
            continue;
        }
        coords[axis] = index % dim;
        index /= dim;
    }
    coords
}

/// Diffusion-weighted signal series for every voxel of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalVolume {
    shape: Vec<usize>,
    n_samples: usize,
    data: Vec<f64>,
}

impl SignalVolume {
    pub fn new(shape: Vec<usize>, n_samples: usize, data: Vec<f64>) -> Result<Self, ModelError> {
        let expected = voxel_count(&shape) * n_samples;
        if data.len() != expected {
            return Err(ModelError::InvalidOption(format!(
                "signal buffer has {} values, expected {expected} for shape {shape:?} x {n_samples} samples",
                data.len()
            )));
        }
        Ok(Self {
            shape,
            n_samples,
            data,
        })
    }

    /// Caller guarantees `data.len() == voxel_count(&shape) * n_samples`.
    pub(crate) fn from_parts(shape: Vec<usize>, n_samples: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), voxel_count(&shape) * n_samples);
        Self {
            shape,
            n_samples,
            data,
        }
    }

    /// A single voxel (shape `[]`).
    pub fn single(series: Vec<f64>) -> Self {
        Self {
            shape: Vec::new(),
            n_samples: series.len(),
            data: series,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn voxel_count(&self) -> usize {
        voxel_count(&self.shape)
    }

    /// Signal series of voxel `index`.
    pub fn voxel(&self, index: usize) -> &[f64] {
        let start = index * self.n_samples;
        &self.data[start..start + self.n_samples]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

/// One value per voxel (kurtosis map, mask, fitted parameter map).
///
/// Deserialization goes through [`VoxelMap::new`], so the value count always
/// matches the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "VoxelMapParts<T>",
    bound(deserialize = "T: Clone + Deserialize<'de>")
)]
pub struct VoxelMap<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

/// Unvalidated on-disk form of a [`VoxelMap`].
#[derive(Deserialize)]
struct VoxelMapParts<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Clone> TryFrom<VoxelMapParts<T>> for VoxelMap<T> {
    type Error = ModelError;

    fn try_from(parts: VoxelMapParts<T>) -> Result<Self, Self::Error> {
        Self::new(parts.shape, parts.data)
    }
}

pub type ScalarMap = VoxelMap<f64>;
pub type VoxelMask = VoxelMap<bool>;

impl<T: Clone> VoxelMap<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self, ModelError> {
        let expected = voxel_count(&shape);
        if data.len() != expected {
            return Err(ModelError::InvalidOption(format!(
                "voxel map has {} values, expected {expected} for shape {shape:?}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub(crate) fn from_parts(shape: Vec<usize>, data: Vec<T>) -> Self {
        debug_assert_eq!(data.len(), voxel_count(&shape));
        Self { shape, data }
    }

    pub fn filled(shape: Vec<usize>, value: T) -> Self {
        let n = voxel_count(&shape);
        Self {
            shape,
            data: vec![value; n],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.data
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }
}
