//! Mathematical utilities: attenuation terms, linear and bounded non-linear
//! least squares.

pub mod basis;
pub mod lsq;
pub mod ols;

pub use basis::*;
pub use lsq::*;
pub use ols::*;
