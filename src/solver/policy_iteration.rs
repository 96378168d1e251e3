//! Policy iteration for min/max equation systems.

use log::debug;

use crate::error::{Error, Result};
use crate::numeric::Value;
use crate::solver::{
    LinearEquationSolverFactory, MinMaxSolver, OptimizationDirection, Scheduler, SolveContext,
};
use crate::storage::SparseMatrix;
use crate::vector;

/// Solves the min/max fixed point by alternating policy evaluation (a
/// deterministic linear system under the current scheduler, delegated to the
/// linear-equation backend) and greedy policy improvement.
pub struct PolicyIterationSolver<'a, T: Value> {
    factory: &'a dyn LinearEquationSolverFactory<T>,
}

impl<'a, T: Value> PolicyIterationSolver<'a, T> {
    pub fn new(factory: &'a dyn LinearEquationSolverFactory<T>) -> Self {
        Self { factory }
    }
}

impl<'a, T: Value> MinMaxSolver<T> for PolicyIterationSolver<'a, T> {
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

        // Initial scheduler: the hint, or one greedy step from the initial
        // iterate.
        let mut scheduler = match context.hint_scheduler {
            Some(hint) => hint.clone(),
            None => {
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
                scheduler
            }
        };

        let solver = self.factory.create();
        let mut b_induced = vec![T::zero(); num_states];
        let mut iterations = 0u64;
        loop {
            context.check_cancelled()?;
            // Policy evaluation: x = A_σ·x + b_σ.
            let induced = matrix.restrict_to_scheduler(&scheduler, false)?;
            for state in 0..num_states {
                let row = matrix.rows_of_group(state).start + scheduler[state] as usize;
                b_induced[state] = b[row];
            }
            solver.solve_fixed_point(&induced, x, &b_induced)?;
            iterations += 1;

            // Greedy improvement with tie-break toward the incumbent choice.
            matrix.multiply(x, Some(b), &mut choice_values)?;
            let mut changed = false;
            for state in 0..num_states {
                let rows = matrix.rows_of_group(state);
                let incumbent_value = choice_values[rows.start + scheduler[state] as usize];
                let mut best = choice_values[rows.start];
                let mut best_local = 0u64;
                for (local, row) in rows.enumerate().skip(1) {
                    if direction.improves(choice_values[row], best) {
                        best = choice_values[row];
                        best_local = local as u64;
                    }
                }
                if direction.improves(best, incumbent_value) {
                    scheduler[state] = best_local;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            if iterations >= context.max_iterations {
                return Err(Error::NotConverged {
                    iterations,
                    last_iterate: x.iter().map(|v| v.to_f64()).collect(),
                });
            }
        }
        debug!(
            "Policy iteration ({}) converged after {} improvement rounds",
            direction, iterations
        );

        Ok(context.track_scheduler.then(|| scheduler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::GaussSeidelLinearEquationSolverFactory;
    use crate::storage::SparseMatrixBuilder;

    #[test]
    fn test_policy_iteration() {
        // state 0: a retrying row reaching the target half the time, or a
        // one-shot row reaching it with 0.3; state 1 defers to state 0
        let mut builder = SparseMatrixBuilder::new(2);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.5);
        builder.new_row();
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.5);
        let matrix = builder.build();

        let b = vec![0.5, 0.3, 0.0];
        let factory = GaussSeidelLinearEquationSolverFactory;
        let mut solver = PolicyIterationSolver::new(&factory);
        let context = SolveContext::new(1e-10, false, 100).with_scheduler(true);

        let mut x = vec![0.0, 0.0];
        let scheduler = solver
            .solve(OptimizationDirection::Maximize, &matrix, &mut x, &b, &context)
            .unwrap()
            .unwrap();
        // retrying forever wins: x0 = 0.5·x0 + 0.5 = 1
        assert!((x[0] - 1.0).abs() < 1e-8);
        assert!((x[1] - 0.5).abs() < 1e-8);
        assert_eq!(scheduler[0], 0);

        let mut x = vec![0.0, 0.0];
        let scheduler = solver
            .solve(OptimizationDirection::Minimize, &matrix, &mut x, &b, &context)
            .unwrap()
            .unwrap();
        // the one-shot row caps the value at 0.3
        assert!((x[0] - 0.3).abs() < 1e-8);
        assert_eq!(scheduler[0], 1);
    }
}
