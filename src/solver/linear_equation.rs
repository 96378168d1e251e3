//! The abstract linear-equation backend interface and the built-in
//! Gauss-Seidel solver.

use crate::error::{Error, Result};
use crate::numeric::Value;
use crate::storage::SparseMatrix;

/// A solver for the deterministic fixed-point system `x = A·x + b`, where
/// `A` is trivially grouped, square and substochastic.
///
/// External backends that solve `(I − A)x = b` instead can obtain that form
/// through [`SparseMatrix::convert_to_equation_system`].
pub trait LinearEquationSolver<T: Value> {
    fn solve_fixed_point(&self, matrix: &SparseMatrix<T>, x: &mut [T], b: &[T]) -> Result<()>;
}

/// Constructor interface for linear-equation backends; one solver instance
/// is used from one thread only.
pub trait LinearEquationSolverFactory<T: Value> {
    fn create(&self) -> Box<dyn LinearEquationSolver<T>>;
}

/// The built-in iterative backend: Gauss-Seidel sweeps with the diagonal
/// entry solved exactly per row.
pub struct GaussSeidelLinearEquationSolver<T> {
    pub precision: T,
    pub max_iterations: u64,
}

impl<T: Value> Default for GaussSeidelLinearEquationSolver<T> {
    fn default() -> Self {
        Self {
            precision: T::from_f64(1e-10),
            max_iterations: 1_000_000,
        }
    }
}

impl<T: Value> LinearEquationSolver<T> for GaussSeidelLinearEquationSolver<T> {
    fn solve_fixed_point(&self, matrix: &SparseMatrix<T>, x: &mut [T], b: &[T]) -> Result<()> {
        let n = matrix.num_rows();
        if !matrix.has_trivial_grouping() || matrix.num_columns() != n {
            return Err(Error::invalid_argument(
                "fixed-point solve requires a trivially grouped square matrix",
            ));
        }
        if x.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: x.len(),
            });
        }
        if b.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: b.len(),
            });
        }

        let one = T::one();
        for iteration in 0..self.max_iterations {
            let mut residual = T::zero();
            for i in 0..n {
                let mut sum = b[i];
                let mut diagonal = T::zero();
                for (column, value) in matrix.row(i) {
                    if column == i {
                        diagonal = value;
                    } else {
                        sum += value * x[column];
                    }
                }
                if one - diagonal <= T::zero() {
                    return Err(Error::invalid_argument(
                        "fixed-point system is singular: diagonal entry not below one",
                    ));
                }
                let updated = sum / (one - diagonal);
                residual = residual.max_of((updated - x[i]).abs());
                x[i] = updated;
            }
            if residual <= self.precision {
                log::trace!("Gauss-Seidel converged after {} sweeps", iteration + 1);
                return Ok(());
            }
        }
        Err(Error::NotConverged {
            iterations: self.max_iterations,
            last_iterate: x.iter().map(|v| v.to_f64()).collect(),
        })
    }
}

/// Factory for the built-in Gauss-Seidel backend.
#[derive(Default)]
pub struct GaussSeidelLinearEquationSolverFactory;

impl<T: Value> LinearEquationSolverFactory<T> for GaussSeidelLinearEquationSolverFactory {
    fn create(&self) -> Box<dyn LinearEquationSolver<T>> {
        Box::new(GaussSeidelLinearEquationSolver::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseMatrixBuilder;

    #[test]
    fn test_gauss_seidel() {
        // x0 = 0.5·x1 + 1, x1 = 0.5·x0, unique fixed point (4/3, 2/3)
        let mut builder = SparseMatrixBuilder::new(2);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 0.5);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.5);
        let matrix = builder.build();

        let solver = GaussSeidelLinearEquationSolver::default();
        let mut x = vec![0.0, 0.0];
        solver.solve_fixed_point(&matrix, &mut x, &[1.0, 0.0]).unwrap();
        assert!((x[0] - 4.0 / 3.0).abs() < 1e-8);
        assert!((x[1] - 2.0 / 3.0).abs() < 1e-8);
    }

    #[test]
    fn test_self_loop_row() {
        // x0 = 0.9·x0 + 0.1 has the unique solution 1
        let mut builder = SparseMatrixBuilder::new(1);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.9);
        let matrix = builder.build();

        let solver = GaussSeidelLinearEquationSolver::default();
        let mut x = vec![0.0];
        solver.solve_fixed_point(&matrix, &mut x, &[0.1]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_system() {
        let mut builder = SparseMatrixBuilder::new(1);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 1.0);
        let matrix = builder.build();

        let solver = GaussSeidelLinearEquationSolver::<f64>::default();
        let mut x = vec![0.0];
        assert!(matches!(
            solver.solve_fixed_point(&matrix, &mut x, &[0.0]),
            Err(Error::InvalidArgument(_))
        ));
    }
}
