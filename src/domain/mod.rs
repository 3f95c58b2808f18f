//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the acquisition description (`GradientTable`)
//! - voxel arrays (`SignalVolume`, `VoxelMap`, `ScalarMap`, `VoxelMask`)
//! - model parameters and fit outcomes (`IvimParams`, `ParamBounds`, `FitStatus`)
//! - the CLI-derived run configuration (`FitConfig`)

pub mod gtab;
pub mod types;
pub mod volume;

pub use gtab::*;
pub use types::*;
pub use volume::*;
