//! Error types for model checking queries.

use thiserror::Error;

/// A specialized result type for model checking operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy surfaced by the checker.
///
/// All errors are scoped to the query that raised them; the checker carries
/// no state across queries and is reentrant after any failure.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An argument violated a documented precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Two containers that must agree in length did not.
    #[error("dimension mismatch: expected length {expected}, got {actual}")]
    DimensionMismatch {
        /// The length required by the operation.
        expected: usize,
        /// The length that was actually passed.
        actual: usize,
    },
    /// The formula has a shape the engine does not handle.
    #[error("unsupported formula: {0}")]
    UnsupportedFormula(String),
    /// A reward operator referenced a reward model the model does not have,
    /// or omitted the name while several models exist.
    #[error("missing reward model: {0}")]
    MissingRewardModel(String),
    /// An iterative solver hit its iteration cap before meeting the
    /// requested precision. The last iterate is attached so callers can
    /// inspect how far the solve got.
    #[error("solver did not converge within {iterations} iterations")]
    NotConverged {
        /// Number of iterations performed.
        iterations: u64,
        /// The iterate at the point the cap was hit.
        last_iterate: Vec<f64>,
    },
    /// The multi-objective refinement loop hit its step cap before the
    /// approximations were close enough. The best bounds obtained so far
    /// are attached.
    #[error("precision {precision} not reached after {steps} refinement steps")]
    PrecisionNotReached {
        /// The requested precision.
        precision: f64,
        /// Refinement steps performed.
        steps: u64,
        /// Best lower bound point found, if any.
        lower: Option<Vec<f64>>,
        /// Best upper bound point found, if any.
        upper: Option<Vec<f64>>,
    },
    /// An external linear-equation or LP backend reported a failure.
    #[error("solver backend failure: {0}")]
    BackendFailure(String),
    /// The caller's cancellation flag was raised.
    #[error("query cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::UnsupportedFormula(msg.into())
    }
}
