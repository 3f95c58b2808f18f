//! Input/output helpers.
//!
//! - dataset JSON read/write (`dataset`)
//! - fitted-parameter JSON read/write (`params`)
//! - per-voxel CSV export (`export`)

pub mod dataset;
pub mod export;
pub mod params;

pub use dataset::*;
pub use export::*;
pub use params::*;
