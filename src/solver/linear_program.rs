//! The abstract LP backend interface and the LP encoding of min/max
//! equation systems.
//!
//! No LP implementation ships with this crate; callers supply a factory
//! wrapping an external solver. Backend timeouts are a setting of the
//! backend itself and pass through untouched.

use crate::error::{Error, Result};
use crate::numeric::Value;
use crate::solver::{MinMaxSolver, OptimizationDirection, Scheduler, SolveContext};
use crate::storage::SparseMatrix;
use crate::vector;

/// Handle to a variable of an [`LpSolver`] instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LpVariable(pub usize);

/// The relation of a linear constraint.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConstraintSense {
    LessEqual,
    Equal,
    GreaterEqual,
}

/// Outcome of an LP optimization.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
}

/// A linear-programming backend. Instances are thread-compatible but not
/// thread-safe; the checker uses each instance from one thread only.
pub trait LpSolver<T: Value> {
    /// Adds a continuous variable with the given bounds and objective
    /// coefficient.
    fn add_variable(&mut self, lower: Option<T>, upper: Option<T>, objective: T) -> LpVariable;
    /// Adds the constraint `Σ coefficient·variable  sense  rhs`.
    fn add_constraint(&mut self, terms: &[(LpVariable, T)], sense: ConstraintSense, rhs: T);
    /// Runs the optimization in the given objective direction.
    fn optimize(&mut self, direction: OptimizationDirection) -> Result<LpStatus>;
    fn objective_value(&self) -> Result<T>;
    fn variable_value(&self, variable: LpVariable) -> Result<T>;
}

/// Constructor interface for LP backends.
pub trait LpSolverFactory<T: Value> {
    fn create(&self) -> Result<Box<dyn LpSolver<T>>>;
}

/// Encodes the min/max fixed point as a linear program and delegates to the
/// external backend.
///
/// For the maximizing direction the encoding minimizes `Σ_s x[s]` subject to
/// `x[s] ≥ Σ_c A(r, c)·x[c] + b[r]` for every choice `r`; the minimizing
/// direction is the dual with reversed constraints.
pub(crate) struct LpMinMaxSolver<'a, T: Value> {
    factory: Option<&'a dyn LpSolverFactory<T>>,
}

impl<'a, T: Value> LpMinMaxSolver<'a, T> {
    pub(crate) fn new(factory: Option<&'a dyn LpSolverFactory<T>>) -> Self {
        Self { factory }
    }
}

impl<'a, T: Value> MinMaxSolver<T> for LpMinMaxSolver<'a, T> {
    fn solve(
        &mut self,
        direction: OptimizationDirection,
        matrix: &SparseMatrix<T>,
        x: &mut Vec<T>,
        b: &[T],
        context: &SolveContext<'_, T>,
    ) -> Result<Option<Scheduler>> {
        let factory = self
            .factory
            .ok_or_else(|| Error::BackendFailure("no LP solver backend available".into()))?;
        let num_states = matrix.num_groups();
        if x.len() != num_states {
            return Err(Error::DimensionMismatch {
                expected: num_states,
                actual: x.len(),
            });
        }

        let mut lp = factory.create()?;
        let variables: Vec<LpVariable> = (0..num_states)
            .map(|_| lp.add_variable(context.lower_bound, context.upper_bound, T::one()))
            .collect();

        let sense = match direction {
            OptimizationDirection::Maximize => ConstraintSense::GreaterEqual,
            OptimizationDirection::Minimize => ConstraintSense::LessEqual,
        };
        let mut terms = Vec::new();
        for state in 0..num_states {
            for row in matrix.rows_of_group(state) {
                terms.clear();
                let mut state_coefficient = T::one();
                for (column, value) in matrix.row(row) {
                    if column == state {
                        state_coefficient -= value;
                    } else {
                        terms.push((variables[column], -value));
                    }
                }
                terms.push((variables[state], state_coefficient));
                lp.add_constraint(&terms, sense, b[row]);
            }
        }

        let objective_direction = !direction;
        match lp.optimize(objective_direction)? {
            LpStatus::Optimal => (),
            LpStatus::Infeasible => {
                return Err(Error::BackendFailure("LP encoding is infeasible".into()))
            }
            LpStatus::Unbounded => {
                return Err(Error::BackendFailure(match direction {
                    OptimizationDirection::Maximize => "LP is unbounded from below".into(),
                    OptimizationDirection::Minimize => "LP is unbounded from above".into(),
                }))
            }
        }
        for (state, variable) in variables.iter().enumerate() {
            x[state] = lp.variable_value(*variable)?;
        }

        if context.track_scheduler {
            let mut choice_values = vec![T::zero(); matrix.num_rows()];
            matrix.multiply(x, Some(b), &mut choice_values)?;
            let mut scheduler = Scheduler::new(num_states);
            let mut reduced = vec![T::zero(); num_states];
            vector::reduce_by_group(
                &choice_values,
                matrix.group_starts(),
                direction,
                &mut reduced,
                Some(scheduler.choices_mut()),
            );
            Ok(Some(scheduler))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseMatrixBuilder;

    #[test]
    fn test_missing_backend() {
        let mut builder = SparseMatrixBuilder::<f64>::new(1);
        builder.new_row_group();
        builder.new_row();
        let matrix = builder.build();

        let mut solver: LpMinMaxSolver<'_, f64> = LpMinMaxSolver::new(None);
        let context = SolveContext::new(1e-6, false, 100);
        let mut x = vec![0.0];
        let result = solver.solve(
            OptimizationDirection::Maximize,
            &matrix,
            &mut x,
            &[1.0],
            &context,
        );
        assert!(matches!(result, Err(Error::BackendFailure(_))));
    }
}
