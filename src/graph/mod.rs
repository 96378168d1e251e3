//! Qualitative graph analysis of MDPs: reachability, Prob0/Prob1 sets, and
//! end-component structure.
//!
//! All functions work on a row-grouped transition matrix together with its
//! row-indexed transpose (`matrix.transpose(false)`): the transpose row of a
//! state `t` lists the *choices* entering `t`, and the owning state of a
//! choice is recovered through the forward matrix. Within one frontier
//! layer, states are processed in ascending index so results and derived
//! schedulers are deterministic.

mod elimination;
mod mec;
mod scc;

use std::collections::VecDeque;

use crate::numeric::Value;
use crate::storage::{BitSet, SparseMatrix};

pub use elimination::{eliminate_end_components, EliminationResult};
pub use mec::{maximal_end_components, MaximalEndComponent};
pub use scc::{bottom_scc_representatives, strongly_connected_components, SccDecomposition};

/// Forward search from `initial` through `allowed` states. States in `stop`
/// are included when reached but their successors are not explored.
pub fn reachable_states<T: Value>(
    matrix: &SparseMatrix<T>,
    initial: &BitSet,
    allowed: &BitSet,
    stop: Option<&BitSet>,
) -> BitSet {
    let num_states = matrix.num_groups();
    let mut reachable = BitSet::new(num_states);
    let mut queue = VecDeque::new();
    for state in initial.ones() {
        if allowed.get(state) {
            reachable.insert(state);
            queue.push_back(state);
        }
    }
    while let Some(state) = queue.pop_front() {
        if stop.map_or(false, |stop| stop.get(state)) {
            continue;
        }
        for row in matrix.rows_of_group(state) {
            for (successor, _) in matrix.row(row) {
                if allowed.get(successor) && !reachable.get(successor) {
                    reachable.insert(successor);
                    queue.push_back(successor);
                }
            }
        }
    }
    reachable
}

/// States from which *some* scheduler reaches `psi` through `phi` with
/// positive probability, within `step_bound` steps if given.
pub fn prob_greater_0_e<T: Value>(
    matrix: &SparseMatrix<T>,
    backward: &SparseMatrix<T>,
    phi: &BitSet,
    psi: &BitSet,
    step_bound: Option<u64>,
) -> BitSet {
    let num_states = matrix.num_groups();
    let mut result = psi.clone();
    let mut frontier: Vec<usize> = psi.ones().collect();
    let mut remaining = step_bound;
    while !frontier.is_empty() {
        if let Some(steps) = remaining.as_mut() {
            if *steps == 0 {
                break;
            }
            *steps -= 1;
        }
        let mut next = BitSet::new(num_states);
        for &target in &frontier {
            for (row, _) in backward.row(target) {
                let predecessor = matrix.group_of_row(row);
                if phi.get(predecessor) && !result.get(predecessor) {
                    next.insert(predecessor);
                }
            }
        }
        for state in next.ones() {
            result.insert(state);
        }
        frontier = next.ones().collect();
    }
    result
}

/// States from which *every* scheduler reaches `psi` through `phi` with
/// positive probability, within `step_bound` steps if given.
///
/// Runs the counting backward fixed point: a choice is satisfied once some
/// successor lies in the current set; a state joins once all its choices
/// are satisfied.
pub fn prob_greater_0_a<T: Value>(
    matrix: &SparseMatrix<T>,
    backward: &SparseMatrix<T>,
    phi: &BitSet,
    psi: &BitSet,
    step_bound: Option<u64>,
) -> BitSet {
    let num_states = matrix.num_groups();
    let mut result = psi.clone();
    let mut row_satisfied = BitSet::new(matrix.num_rows());
    let mut satisfied_rows_of = vec![0usize; num_states];
    let mut frontier: Vec<usize> = psi.ones().collect();
    let mut remaining = step_bound;
    while !frontier.is_empty() {
        if let Some(steps) = remaining.as_mut() {
            if *steps == 0 {
                break;
            }
            *steps -= 1;
        }
        let mut next = BitSet::new(num_states);
        for &target in &frontier {
            for (row, _) in backward.row(target) {
                if row_satisfied.get(row) {
                    continue;
                }
                row_satisfied.insert(row);
                let predecessor = matrix.group_of_row(row);
                satisfied_rows_of[predecessor] += 1;
                let group_size = matrix.rows_of_group(predecessor).len();
                if satisfied_rows_of[predecessor] == group_size
                    && phi.get(predecessor)
                    && !result.get(predecessor)
                {
                    next.insert(predecessor);
                }
            }
        }
        for state in next.ones() {
            result.insert(state);
        }
        frontier = next.ones().collect();
    }
    result
}

/// States where every scheduler avoids `psi` (through `phi`) almost surely.
pub fn prob_0_a<T: Value>(
    matrix: &SparseMatrix<T>,
    backward: &SparseMatrix<T>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    !&prob_greater_0_e(matrix, backward, phi, psi, None)
}

/// States where some scheduler avoids `psi` (through `phi`) almost surely.
pub fn prob_0_e<T: Value>(
    matrix: &SparseMatrix<T>,
    backward: &SparseMatrix<T>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    !&prob_greater_0_a(matrix, backward, phi, psi, None)
}

/// States from which some scheduler reaches `psi` through `phi` with
/// probability one.
///
/// Greatest fixed point: repeatedly restrict the candidate set to states
/// that can reach `psi` via choices whose successors stay within the
/// candidates.
pub fn prob_1_e<T: Value>(
    matrix: &SparseMatrix<T>,
    backward: &SparseMatrix<T>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    let num_states = matrix.num_groups();
    let mut current = BitSet::full(num_states);
    loop {
        // least fixed point inside: backward closure from psi using choices
        // that stay within the current candidates
        let mut next = psi.clone();
        let mut frontier: Vec<usize> = psi.ones().collect();
        while !frontier.is_empty() {
            let mut added = BitSet::new(num_states);
            for &target in &frontier {
                for (row, _) in backward.row(target) {
                    let predecessor = matrix.group_of_row(row);
                    if !phi.get(predecessor)
                        || next.get(predecessor)
                        || added.get(predecessor)
                    {
                        continue;
                    }
                    let stays = matrix
                        .row(row)
                        .all(|(successor, _)| current.get(successor));
                    let hits = matrix.row(row).any(|(successor, _)| next.get(successor));
                    if stays && hits {
                        added.insert(predecessor);
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            for state in added.ones() {
                next.insert(state);
            }
            frontier = added.ones().collect();
        }
        if next == current {
            return current;
        }
        current = next;
    }
}

/// States from which every scheduler reaches `psi` through `phi` with
/// probability one.
pub fn prob_1_a<T: Value>(
    matrix: &SparseMatrix<T>,
    backward: &SparseMatrix<T>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    let num_states = matrix.num_groups();
    let mut current = BitSet::full(num_states);
    loop {
        let mut next = psi.clone();
        let mut frontier: Vec<usize> = psi.ones().collect();
        while !frontier.is_empty() {
            let mut added = BitSet::new(num_states);
            for &target in &frontier {
                for (row, _) in backward.row(target) {
                    let predecessor = matrix.group_of_row(row);
                    if !phi.get(predecessor)
                        || next.get(predecessor)
                        || added.get(predecessor)
                    {
                        continue;
                    }
                    // all choices must stay within the candidates and have a
                    // chance of progressing toward psi
                    let all_good = matrix.rows_of_group(predecessor).all(|r| {
                        matrix.row(r).all(|(successor, _)| current.get(successor))
                            && matrix.row(r).any(|(successor, _)| next.get(successor))
                    });
                    if all_good {
                        added.insert(predecessor);
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            for state in added.ones() {
                next.insert(state);
            }
            frontier = added.ones().collect();
        }
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseMatrixBuilder;

    /// The three-state MDP: state 0 chooses between a coin flip over
    /// {0, 1} and a sure step to 2; states 1 and 2 are absorbing.
    fn three_state_matrix() -> SparseMatrix<f64> {
        let mut builder = SparseMatrixBuilder::new(3);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.5);
        builder.push_entry(1, 0.5);
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.build()
    }

    #[test]
    fn test_reachable_states() {
        let matrix = three_state_matrix();
        let initial = BitSet::from_indices(3, vec![0]);
        let all = BitSet::full(3);
        assert_eq!(
            reachable_states(&matrix, &initial, &all, None),
            BitSet::full(3)
        );
        let without_two = BitSet::from_indices(3, vec![0, 1]);
        assert_eq!(
            reachable_states(&matrix, &initial, &without_two, None),
            BitSet::from_indices(3, vec![0, 1])
        );
        let stop = BitSet::from_indices(3, vec![0]);
        assert_eq!(
            reachable_states(&matrix, &initial, &all, Some(&stop)),
            BitSet::from_indices(3, vec![0])
        );
    }

    #[test]
    fn test_qualitative_sets() {
        let matrix = three_state_matrix();
        let backward = matrix.transpose(false);
        let phi = BitSet::full(3);
        let psi = BitSet::from_indices(3, vec![2]);

        // some scheduler reaches 2 only from 0 and 2
        assert_eq!(
            prob_greater_0_e(&matrix, &backward, &phi, &psi, None),
            BitSet::from_indices(3, vec![0, 2])
        );
        // the coin-flip choice never reaches 2, so state 0 drops out
        assert_eq!(
            prob_greater_0_a(&matrix, &backward, &phi, &psi, None),
            BitSet::from_indices(3, vec![2])
        );
        assert_eq!(
            prob_0_a(&matrix, &backward, &phi, &psi),
            BitSet::from_indices(3, vec![1])
        );
        assert_eq!(
            prob_0_e(&matrix, &backward, &phi, &psi),
            BitSet::from_indices(3, vec![0, 1])
        );
        // the sure step makes state 0 almost-surely winning for some
        // scheduler
        assert_eq!(
            prob_1_e(&matrix, &backward, &phi, &psi),
            BitSet::from_indices(3, vec![0, 2])
        );
        assert_eq!(
            prob_1_a(&matrix, &backward, &phi, &psi),
            BitSet::from_indices(3, vec![2])
        );

        // Prob0 and Prob1 are disjoint and partition with the maybe set
        let zero = prob_0_e(&matrix, &backward, &phi, &psi);
        let one = prob_1_e(&matrix, &backward, &phi, &psi);
        assert!(zero.is_disjoint_from(&one));
    }

    #[test]
    fn test_bounded_layers() {
        // chain 0 → 1 → 2
        let mut builder = SparseMatrixBuilder::new(3);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        let matrix = builder.build();
        let backward = matrix.transpose(false);
        let phi = BitSet::full(3);
        let psi = BitSet::from_indices(3, vec![2]);

        assert_eq!(
            prob_greater_0_e(&matrix, &backward, &phi, &psi, Some(1)),
            BitSet::from_indices(3, vec![1, 2])
        );
        assert_eq!(
            prob_greater_0_e(&matrix, &backward, &phi, &psi, Some(2)),
            BitSet::full(3)
        );
    }
}
