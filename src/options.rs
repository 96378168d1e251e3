//! Options for model checking queries.

use std::fmt;
use std::path::PathBuf;

use crate::solver::CancellationFlag;

/// The algorithm used for min/max equation systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverTechnique {
    /// Iterate `x ← opt (A·x + b)` until two consecutive iterates agree up
    /// to the requested precision. Needs only approximate arithmetic.
    ValueIteration,
    /// Alternate policy evaluation through the linear-equation backend and
    /// greedy policy improvement. Converges in finitely many improvements
    /// with exact arithmetic.
    PolicyIteration,
    /// Encode the equation system as a linear program and delegate to the
    /// LP backend. Requires an LP solver factory.
    LinearProgramming,
}

impl Default for SolverTechnique {
    fn default() -> Self {
        Self::ValueIteration
    }
}

impl fmt::Display for SolverTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Self::ValueIteration => "value-iteration",
            Self::PolicyIteration => "policy-iteration",
            Self::LinearProgramming => "linear-programming",
        };
        write!(f, "{}", string)
    }
}

/// Options controlling a model checking query.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Convergence threshold for iterative solvers and the multi-objective
    /// refinement loop.
    pub precision: f64,
    /// Whether the threshold is relative to the magnitude of the iterate.
    pub relative: bool,
    /// Cap on solver iterations.
    pub max_iterations: u64,
    /// Cap on multi-objective refinement steps.
    pub multi_objective_max_steps: u64,
    /// The solver back-end for min/max equation systems.
    pub technique: SolverTechnique,
    /// Whether to synthesize and return an optimizing scheduler.
    pub produce_scheduler: bool,
    /// Answer from qualitative preprocessing alone, skipping numeric
    /// solves; maybe-states are reported with value one half.
    pub qualitative_only: bool,
    /// Destination directory for two-objective Pareto plot data. Nothing is
    /// written when unset.
    pub plot_directory: Option<PathBuf>,
    /// Cooperative cancellation flag, observed between solver sweeps and
    /// refinement steps.
    pub cancellation: Option<CancellationFlag>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            precision: 1e-6,
            relative: false,
            max_iterations: 1_000_000,
            multi_objective_max_steps: 1_000,
            technique: SolverTechnique::default(),
            produce_scheduler: false,
            qualitative_only: false,
            plot_directory: None,
            cancellation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CheckOptions::default();
        assert_eq!(options.technique, SolverTechnique::ValueIteration);
        assert_eq!(format!("{}", options.technique), "value-iteration");
        assert!(!options.produce_scheduler);
    }
}
