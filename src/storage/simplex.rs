//! A small dense two-phase simplex used by the polytope geometry.
//!
//! The multi-objective engine needs tiny linear programs over the objective
//! space: hull membership, separating directions and polytope projections.
//! These never involve the model itself, so they are solved here instead of
//! the external LP backend, with Bland's rule for deterministic,
//! cycle-free pivoting.

const EPSILON: f64 = 1e-9;

/// Outcome of a simplex run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SimplexOutcome {
    Optimal {
        objective: f64,
        solution: Vec<f64>,
    },
    Infeasible,
    Unbounded,
}

/// Solves `maximize c·y subject to A·y ≤ b, y ≥ 0`.
pub(crate) fn maximize(c: &[f64], a: &[Vec<f64>], b: &[f64]) -> SimplexOutcome {
    let num_vars = c.len();
    let num_rows = a.len();
    debug_assert!(a.iter().all(|row| row.len() == num_vars));
    debug_assert_eq!(b.len(), num_rows);

    // columns: structural, slack, artificial, right-hand side
    let num_artificial = b.iter().filter(|&&rhs| rhs < 0.0).count();
    let num_columns = num_vars + num_rows + num_artificial + 1;
    let rhs_column = num_columns - 1;
    let mut tableau = vec![vec![0.0; num_columns]; num_rows + 1];
    let mut basis = vec![0usize; num_rows];

    let mut next_artificial = num_vars + num_rows;
    for i in 0..num_rows {
        let negate = b[i] < 0.0;
        let sign = if negate { -1.0 } else { 1.0 };
        for j in 0..num_vars {
            tableau[i][j] = sign * a[i][j];
        }
        tableau[i][num_vars + i] = sign;
        tableau[i][rhs_column] = sign * b[i];
        if negate {
            tableau[i][next_artificial] = 1.0;
            basis[i] = next_artificial;
            next_artificial += 1;
        } else {
            basis[i] = num_vars + i;
        }
    }

    let artificial_start = num_vars + num_rows;
    if num_artificial > 0 {
        // phase 1: maximize −Σ artificials, starting from the objective row
        // with the basic artificial columns priced out
        for j in artificial_start..rhs_column {
            tableau[num_rows][j] = 1.0;
        }
        for i in 0..num_rows {
            if basis[i] >= artificial_start {
                let row = tableau[i].clone();
                for (slot, value) in tableau[num_rows].iter_mut().zip(row) {
                    *slot -= value;
                }
            }
        }
        run_simplex(&mut tableau, &mut basis, rhs_column, rhs_column);
        if tableau[num_rows][rhs_column] < -EPSILON {
            return SimplexOutcome::Infeasible;
        }
        // drive leftover artificials out of the basis where possible
        for i in 0..num_rows {
            if basis[i] >= artificial_start {
                if let Some(j) = (0..artificial_start)
                    .find(|&j| tableau[i][j].abs() > EPSILON)
                {
                    pivot(&mut tableau, &mut basis, i, j);
                }
            }
        }
    }

    // phase 2: the real objective, with artificial columns barred
    for j in 0..num_columns {
        tableau[num_rows][j] = 0.0;
    }
    for j in 0..num_vars {
        tableau[num_rows][j] = -c[j];
    }
    for i in 0..num_rows {
        let factor = tableau[num_rows][basis[i]];
        if factor.abs() > EPSILON {
            let row = tableau[i].clone();
            for (slot, value) in tableau[num_rows].iter_mut().zip(row) {
                *slot -= factor * value;
            }
        }
    }
    if !run_simplex(&mut tableau, &mut basis, artificial_start, rhs_column) {
        return SimplexOutcome::Unbounded;
    }

    let mut solution = vec![0.0; num_vars];
    for i in 0..num_rows {
        if basis[i] < num_vars {
            solution[basis[i]] = tableau[i][rhs_column];
        }
    }
    SimplexOutcome::Optimal {
        objective: tableau[num_rows][rhs_column],
        solution,
    }
}

/// Primal simplex sweeps with Bland's rule. Only columns below
/// `entering_limit` may enter the basis. Returns `false` on unboundedness.
fn run_simplex(
    tableau: &mut [Vec<f64>],
    basis: &mut [usize],
    entering_limit: usize,
    rhs_column: usize,
) -> bool {
    let num_rows = tableau.len() - 1;
    loop {
        let entering = (0..entering_limit).find(|&j| tableau[num_rows][j] < -EPSILON);
        let entering = match entering {
            Some(j) => j,
            None => return true,
        };
        let mut leaving: Option<usize> = None;
        let mut best_ratio = f64::INFINITY;
        for i in 0..num_rows {
            if tableau[i][entering] > EPSILON {
                let ratio = tableau[i][rhs_column] / tableau[i][entering];
                let tighter = ratio < best_ratio - EPSILON
                    || (ratio < best_ratio + EPSILON
                        && leaving.map_or(true, |l| basis[i] < basis[l]));
                if tighter {
                    best_ratio = ratio;
                    leaving = Some(i);
                }
            }
        }
        match leaving {
            Some(row) => pivot(tableau, basis, row, entering),
            None => return false,
        }
    }
}

fn pivot(tableau: &mut [Vec<f64>], basis: &mut [usize], row: usize, column: usize) {
    let factor = tableau[row][column];
    for value in tableau[row].iter_mut() {
        *value /= factor;
    }
    let pivot_row = tableau[row].clone();
    for (i, other) in tableau.iter_mut().enumerate() {
        if i != row {
            let scale = other[column];
            if scale.abs() > 0.0 {
                for (slot, value) in other.iter_mut().zip(&pivot_row) {
                    *slot -= scale * value;
                }
            }
        }
    }
    basis[row] = column;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_maximization() {
        // maximize x + y subject to x ≤ 2, y ≤ 3, x + y ≤ 4
        let outcome = maximize(
            &[1.0, 1.0],
            &[
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 1.0],
            ],
            &[2.0, 3.0, 4.0],
        );
        match outcome {
            SimplexOutcome::Optimal { objective, .. } => assert!((objective - 4.0).abs() < 1e-9),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_phase_one() {
        // feasibility needs the artificial phase: x ≥ 1 (as −x ≤ −1), x ≤ 2
        let outcome = maximize(&[-1.0], &[vec![-1.0], vec![1.0]], &[-1.0, 2.0]);
        match outcome {
            SimplexOutcome::Optimal {
                objective,
                solution,
            } => {
                assert!((objective + 1.0).abs() < 1e-9);
                assert!((solution[0] - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_infeasible() {
        // x ≤ 1 and x ≥ 2
        let outcome = maximize(&[1.0], &[vec![1.0], vec![-1.0]], &[1.0, -2.0]);
        assert_eq!(outcome, SimplexOutcome::Infeasible);
    }

    #[test]
    fn test_unbounded() {
        let outcome = maximize(&[1.0], &[vec![-1.0]], &[0.0]);
        assert_eq!(outcome, SimplexOutcome::Unbounded);
    }
}
