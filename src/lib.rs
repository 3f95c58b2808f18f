//! `ivim-kurtosis` library crate.
//!
//! Fits the intravoxel incoherent motion (IVIM) model with a per-voxel kurtosis
//! correction of the tissue compartment to diffusion-weighted signals.
//!
//! The binary (`ivimk`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the model and the optimizer are reusable on their own

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
