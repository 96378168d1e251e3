//! Solvers for the min/max fixed-point equation systems of MDP model
//! checking, together with the abstract interfaces for external
//! linear-equation and LP backends.

mod linear_equation;
mod linear_program;
mod policy_iteration;
mod value_iteration;

use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::numeric::Value;
use crate::options::SolverTechnique;
use crate::storage::{BitSet, SparseMatrix};

pub use linear_equation::{
    GaussSeidelLinearEquationSolver, GaussSeidelLinearEquationSolverFactory, LinearEquationSolver,
    LinearEquationSolverFactory,
};
pub use linear_program::{
    ConstraintSense, LpSolver, LpSolverFactory, LpStatus, LpVariable,
};
pub use policy_iteration::PolicyIterationSolver;
pub use value_iteration::ValueIterationSolver;

/// The direction in which the nondeterminism of a model is resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OptimizationDirection {
    /// Resolve nondeterminism to minimize the value.
    Minimize,
    /// Resolve nondeterminism to maximize the value.
    Maximize,
}

impl std::ops::Not for OptimizationDirection {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Minimize => Self::Maximize,
            Self::Maximize => Self::Minimize,
        }
    }
}

impl fmt::Display for OptimizationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Self::Minimize => "min",
            Self::Maximize => "max",
        };
        write!(f, "{}", string)
    }
}

impl OptimizationDirection {
    /// Whether `challenger` improves on `incumbent` in this direction.
    pub fn improves<T: Value>(self, challenger: T, incumbent: T) -> bool {
        match self {
            Self::Minimize => challenger < incumbent,
            Self::Maximize => challenger > incumbent,
        }
    }

    /// The better of the two values in this direction.
    pub fn better<T: Value>(self, a: T, b: T) -> T {
        if self.improves(b, a) {
            b
        } else {
            a
        }
    }
}

/// A memoryless deterministic scheduler: for every state, the local index of
/// the chosen choice within the state's row group.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Scheduler {
    choices: Vec<u64>,
}

impl Scheduler {
    /// A scheduler over `num_states` states, initially choosing local
    /// index 0 everywhere.
    pub fn new(num_states: usize) -> Self {
        Self {
            choices: vec![0; num_states],
        }
    }

    pub fn from_choices(choices: Vec<u64>) -> Self {
        Self { choices }
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// The flat array of local choice indices.
    pub fn choices(&self) -> &[u64] {
        &self.choices
    }

    pub(crate) fn choices_mut(&mut self) -> &mut [u64] {
        &mut self.choices
    }
}

impl Index<usize> for Scheduler {
    type Output = u64;

    fn index(&self, state: usize) -> &Self::Output {
        &self.choices[state]
    }
}

impl IndexMut<usize> for Scheduler {
    fn index_mut(&mut self, state: usize) -> &mut Self::Output {
        &mut self.choices[state]
    }
}

/// A shared flag for cooperative cancellation, observed between
/// value-iteration sweeps and between multi-objective refinement steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Safe to call from another thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A condition that stops an iterative solver early, checked after every
/// sweep. When it signals, the current iterate is returned regardless of the
/// residual.
pub trait TerminationCondition<T: Value> {
    fn terminate_now(&self, values: &[T]) -> bool;
}

/// Terminates once the sum of the iterate over `filter` passes `threshold`.
pub struct TerminateIfFilteredSumExceedsThreshold<T> {
    pub filter: BitSet,
    pub threshold: T,
    pub strict: bool,
}

impl<T: Value> TerminationCondition<T> for TerminateIfFilteredSumExceedsThreshold<T> {
    fn terminate_now(&self, values: &[T]) -> bool {
        let mut sum = T::zero();
        for i in self.filter.ones() {
            sum += values[i];
        }
        if self.strict {
            sum > self.threshold
        } else {
            sum >= self.threshold
        }
    }
}

/// Terminates once the extremum of the iterate over `filter` passes
/// `threshold`.
pub struct TerminateIfFilteredExtremumExceedsThreshold<T> {
    pub filter: BitSet,
    pub threshold: T,
    pub strict: bool,
    pub use_minimum: bool,
}

impl<T: Value> TerminationCondition<T> for TerminateIfFilteredExtremumExceedsThreshold<T> {
    fn terminate_now(&self, values: &[T]) -> bool {
        let mut extremum: Option<T> = None;
        for i in self.filter.ones() {
            let value = values[i];
            extremum = Some(match extremum {
                None => value,
                Some(current) if self.use_minimum => current.min_of(value),
                Some(current) => current.max_of(value),
            });
        }
        match extremum {
            None => false,
            Some(extremum) if self.strict => extremum > self.threshold,
            Some(extremum) => extremum >= self.threshold,
        }
    }
}

/// Per-solve parameters shared by all solver back-ends.
pub struct SolveContext<'a, T: Value> {
    /// Convergence threshold for iterative techniques.
    pub precision: T,
    /// Whether the threshold is relative to the magnitude of the iterate.
    pub relative: bool,
    /// Cap on sweeps / policy improvements.
    pub max_iterations: u64,
    /// Whether to extract the optimizing scheduler.
    pub track_scheduler: bool,
    /// Scheduler seeding the initial iterate.
    pub hint_scheduler: Option<&'a Scheduler>,
    /// Early-termination condition, checked after every sweep.
    pub termination: Option<&'a dyn TerminationCondition<T>>,
    /// Cooperative cancellation flag.
    pub cancellation: Option<&'a CancellationFlag>,
    /// Known lower bound on the solution, passed to LP backends as a
    /// variable bound.
    pub lower_bound: Option<T>,
    /// Known upper bound on the solution.
    pub upper_bound: Option<T>,
}

impl<'a, T: Value> SolveContext<'a, T> {
    pub fn new(precision: T, relative: bool, max_iterations: u64) -> Self {
        Self {
            precision,
            relative,
            max_iterations,
            track_scheduler: false,
            hint_scheduler: None,
            termination: None,
            cancellation: None,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn with_scheduler(mut self, track: bool) -> Self {
        self.track_scheduler = track;
        self
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match self.cancellation {
            Some(flag) if flag.is_cancelled() => Err(crate::error::Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// A solver for `x[s] = opt_{r ∈ group s} (Σ_c A(r, c)·x[c] + b[r])`.
///
/// `matrix` must be substochastic and `b` choice-indexed. `x` carries the
/// initial iterate in and the solution out. The equation system must have a
/// unique fixed point over the given states; the PCTL engine guarantees this
/// by qualitative preprocessing, direct callers must do so themselves.
pub trait MinMaxSolver<T: Value> {
    fn solve(
        &mut self,
        direction: OptimizationDirection,
        matrix: &SparseMatrix<T>,
        x: &mut Vec<T>,
        b: &[T],
        context: &SolveContext<'_, T>,
    ) -> Result<Option<Scheduler>>;
}

/// The solver back-ends available to a query, selected by
/// [`SolverTechnique`] and backed by the abstract factories for external
/// solvers.
pub struct SolverEnvironment<T: Value> {
    linear_equation_factory: Box<dyn LinearEquationSolverFactory<T>>,
    lp_factory: Option<Box<dyn LpSolverFactory<T>>>,
}

impl<T: Value> Default for SolverEnvironment<T> {
    fn default() -> Self {
        Self {
            linear_equation_factory: Box::new(GaussSeidelLinearEquationSolverFactory::default()),
            lp_factory: None,
        }
    }
}

impl<T: Value> SolverEnvironment<T> {
    /// Replaces the linear-equation backend used by policy iteration.
    pub fn with_linear_equation_factory(
        mut self,
        factory: Box<dyn LinearEquationSolverFactory<T>>,
    ) -> Self {
        self.linear_equation_factory = factory;
        self
    }

    /// Supplies an LP backend, enabling the linear-programming technique.
    pub fn with_lp_factory(mut self, factory: Box<dyn LpSolverFactory<T>>) -> Self {
        self.lp_factory = Some(factory);
        self
    }

    pub fn linear_equation_factory(&self) -> &dyn LinearEquationSolverFactory<T> {
        self.linear_equation_factory.as_ref()
    }

    pub fn lp_factory(&self) -> Option<&dyn LpSolverFactory<T>> {
        self.lp_factory.as_deref()
    }

    /// Creates the min/max solver for the selected technique.
    pub fn minmax_solver(&self, technique: SolverTechnique) -> Box<dyn MinMaxSolver<T> + '_> {
        match technique {
            SolverTechnique::ValueIteration => Box::new(ValueIterationSolver::new()),
            SolverTechnique::PolicyIteration => {
                Box::new(PolicyIterationSolver::new(self.linear_equation_factory()))
            }
            SolverTechnique::LinearProgramming => {
                Box::new(linear_program::LpMinMaxSolver::new(self.lp_factory()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction() {
        let max = OptimizationDirection::Maximize;
        assert_eq!(!max, OptimizationDirection::Minimize);
        assert!(max.improves(2.0, 1.0));
        assert!(!max.improves(1.0, 1.0));
        assert_eq!((!max).better(2.0, 1.0), 1.0);
    }

    #[test]
    fn test_termination_conditions() {
        let filter = BitSet::from_indices(3, vec![0, 2]);
        let sum = TerminateIfFilteredSumExceedsThreshold {
            filter: filter.clone(),
            threshold: 1.0,
            strict: false,
        };
        assert!(sum.terminate_now(&[0.5, 9.0, 0.5]));
        assert!(!sum.terminate_now(&[0.5, 9.0, 0.4]));

        let extremum = TerminateIfFilteredExtremumExceedsThreshold {
            filter,
            threshold: 0.6,
            strict: true,
            use_minimum: true,
        };
        assert!(extremum.terminate_now(&[0.7, 0.0, 0.8]));
        assert!(!extremum.terminate_now(&[0.7, 0.0, 0.6]));
    }
}
