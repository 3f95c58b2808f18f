//! Model fitting.
//!
//! Responsibilities:
//!
//! - construct and validate the IVIM-Kurtosis model (`fitter`)
//! - fit a single voxel: linear estimates, `(f, D*)` refinement, final bounded
//!   non-linear fit (`fitter`)
//! - fit a voxel grid in parallel with an optional mask (`multi_voxel`)

pub mod fitter;
pub mod multi_voxel;

pub use fitter::*;
pub use multi_voxel::*;
