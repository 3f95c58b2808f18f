use thiserror::Error;

/// Errors raised by the model layer: gradient tables, options, array shapes and
/// the linear stage of the fit.
///
/// These propagate unchanged out of [`crate::fit::IvimKurtosisModel::fit`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Invalid gradient table: {0}")]
    InvalidGradientTable(String),

    #[error("No measured signal at b-value == 0. The IVIM model requires signal measured at b=0.")]
    MissingB0,

    #[error(
        "The IVIM model requires a measurement at b==0; build the gradient table with b0_threshold=0 (got {0})."
    )]
    B0Threshold(f64),

    #[error("Invalid model option: {0}")]
    InvalidOption(String),

    #[error("{what} shape {found:?} does not match data voxel grid {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{what} holds {found} values but the data has {expected} voxels")]
    VoxelCount {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Signal length {found} does not match gradient table length {expected}")]
    SignalLength { expected: usize, found: usize },

    #[error("Linear fit failed: {0}")]
    LinearFit(String),
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        let exit_code = match err {
            ModelError::LinearFit(_) => 4,
            _ => 2,
        };
        AppError::new(exit_code, err.to_string())
    }
}
