//! Value iteration for min/max equation systems.

use log::debug;

use crate::error::{Error, Result};
use crate::numeric::Value;
use crate::solver::{MinMaxSolver, OptimizationDirection, Scheduler, SolveContext};
use crate::storage::SparseMatrix;
use crate::vector;

/// Solves the min/max fixed point by repeated sweeps
/// `x ← opt (A·x + b)` until two consecutive iterates agree up to the
/// requested precision.
pub struct ValueIterationSolver;

impl ValueIterationSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ValueIterationSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Value> MinMaxSolver<T> for ValueIterationSolver {
    fn solve(
        &mut self,
        direction: OptimizationDirection,
        matrix: &SparseMatrix<T>,
        x: &mut Vec<T>,
        b: &[T],
        context: &SolveContext<'_, T>,
    ) -> Result<Option<Scheduler>> {
        let num_states = matrix.num_groups();
        let num_rows = matrix.num_rows();
        if x.len() != num_states {
            return Err(Error::DimensionMismatch {
                expected: num_states,
                actual: x.len(),
            });
        }
        if b.len() != num_rows {
            return Err(Error::DimensionMismatch {
                expected: num_rows,
                actual: b.len(),
            });
        }

        let mut choice_values = vec![T::zero(); num_rows];

        // A scheduler hint only seeds the initial iterate with the values of
        // its chosen rows.
        if let Some(hint) = context.hint_scheduler {
            matrix.multiply(x, Some(b), &mut choice_values)?;
            for state in 0..num_states {
                let row = matrix.rows_of_group(state).start + hint[state] as usize;
                x[state] = choice_values[row];
            }
        }

        let mut new_x = vec![T::zero(); num_states];
        let mut iterations = 0u64;
        loop {
            context.check_cancelled()?;
            matrix.multiply(x, Some(b), &mut choice_values)?;
            vector::reduce_by_group(
                &choice_values,
                matrix.group_starts(),
                direction,
                &mut new_x,
                None,
            );
            iterations += 1;
            let converged =
                vector::equal_modulo_precision(&new_x, x, context.precision, context.relative);
            std::mem::swap(x, &mut new_x);
            if converged {
                break;
            }
            if let Some(condition) = context.termination {
                if condition.terminate_now(x) {
                    debug!(
                        "Value iteration stopped by termination condition after {} sweeps",
                        iterations
                    );
                    break;
                }
            }
            if iterations >= context.max_iterations {
                return Err(Error::NotConverged {
                    iterations,
                    last_iterate: x.iter().map(|v| v.to_f64()).collect(),
                });
            }
        }
        debug!(
            "Value iteration ({}) converged after {} sweeps over {} states",
            direction, iterations, num_states
        );

        if context.track_scheduler {
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

    /// Gambler's ruin on {0, 1}: from state 0 a fair coin either wins
    /// (leaves the submatrix toward the target) or moves to the losing
    /// self-loop state 1.
    #[test]
    fn test_simple_fixed_point() {
        let mut builder = SparseMatrixBuilder::new(2);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 0.5);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        let matrix = builder.build();

        // b gives 0.5 chance of immediate success from state 0
        let b = vec![0.5, 0.0];
        let mut x = vec![0.0, 0.0];
        let context = SolveContext::new(1e-10, false, 10_000);
        let mut solver = ValueIterationSolver::new();
        solver
            .solve(OptimizationDirection::Maximize, &matrix, &mut x, &b, &context)
            .unwrap();
        assert!((x[0] - 0.5).abs() < 1e-6);
        assert!(x[1].abs() < 1e-6);
    }

    #[test]
    fn test_scheduler_extraction() {
        // state 0 chooses between a 0.9-success row and a certain row
        let mut builder = SparseMatrixBuilder::new(1);
        builder.new_row_group();
        builder.new_row();
        builder.new_row();
        let matrix = builder.build();

        let b = vec![0.9, 1.0];
        let mut x = vec![0.0];
        let context = SolveContext::new(1e-10, false, 10).with_scheduler(true);
        let mut solver = ValueIterationSolver::new();
        let scheduler = solver
            .solve(OptimizationDirection::Maximize, &matrix, &mut x, &b, &context)
            .unwrap()
            .unwrap();
        assert_eq!(scheduler[0], 1);
        assert!((x[0] - 1.0).abs() < 1e-9);

        let scheduler = solver
            .solve(OptimizationDirection::Minimize, &matrix, &mut x, &b, &context)
            .unwrap()
            .unwrap();
        assert_eq!(scheduler[0], 0);
        assert!((x[0] - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_iteration_cap() {
        let mut builder = SparseMatrixBuilder::new(1);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.999);
        let matrix = builder.build();

        let b = vec![0.001];
        let mut x = vec![0.0];
        let context = SolveContext::new(1e-12, false, 3);
        let mut solver = ValueIterationSolver::new();
        let result = solver.solve(
            OptimizationDirection::Maximize,
            &matrix,
            &mut x,
            &b,
            &context,
        );
        assert!(matches!(result, Err(Error::NotConverged { iterations: 3, .. })));
    }
}
