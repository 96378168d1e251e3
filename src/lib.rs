//! Tyto library crate for probabilistic model checking of Markov decision
//! processes.
//!
//! Given a sparse MDP and a temporal-logic property, the checker computes
//! the extremal probability or expected reward over all schedulers, the
//! long-run average, conditional probabilities, or a Pareto approximation
//! of the achievable value vectors of a multi-objective query.
//!
//! # Examples
//!
//! ```
//! use tyto::formula::{PathFormula, StateFormula};
//! use tyto::storage::{BitSet, SparseMatrixBuilder};
//! use tyto::{check, Mdp, OptimizationDirection};
//!
//! // a coin flip that either stays or reaches the target state
//! let mut builder = SparseMatrixBuilder::new(2);
//! builder.new_row_group();
//! builder.new_row();
//! builder.push_entry(0, 0.5);
//! builder.push_entry(1, 0.5);
//! builder.new_row_group();
//! builder.new_row();
//! builder.push_entry(1, 1.0);
//!
//! let mut model = Mdp::new(builder.build(), BitSet::from_indices(2, vec![0])).unwrap();
//! model.add_label("target", BitSet::from_indices(2, vec![1])).unwrap();
//!
//! let formula = StateFormula::probability(
//!     OptimizationDirection::Maximize,
//!     PathFormula::eventually(StateFormula::label("target")),
//! );
//! let result = check(&model, &formula).unwrap();
//! assert!((result.values().unwrap()[0] - 1.0).abs() < 1e-6);
//! ```

pub mod checker;
mod error;
mod export;
pub mod graph;
mod model;
mod numeric;
pub mod options;
pub mod solver;
pub mod storage;
pub mod vector;

pub use checker::formula;
pub use checker::{CheckResult, ModelChecker};
pub use error::{Error, Result};
pub use model::{Mdp, RewardModel};
pub use numeric::Value;
pub use options::{CheckOptions, SolverTechnique};
pub use solver::{CancellationFlag, OptimizationDirection, Scheduler, SolverEnvironment};

use formula::StateFormula;

/// Checks a formula against a model with default options.
pub fn check<T: Value>(model: &Mdp<T>, formula: &StateFormula) -> Result<CheckResult<T>> {
    ModelChecker::new(model).check(formula)
}

/// Checks a formula against a model with the given options.
pub fn check_with<T: Value>(
    model: &Mdp<T>,
    formula: &StateFormula,
    options: CheckOptions,
) -> Result<CheckResult<T>> {
    ModelChecker::new(model).with_options(options).check(formula)
}
