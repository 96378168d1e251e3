//! Maximal end component decomposition.

use log::debug;

use crate::graph::scc::strongly_connected_components;
use crate::numeric::Value;
use crate::storage::{BitSet, SparseMatrix};

/// A maximal end component: a set of states together with the choices that
/// remain inside it. For every member state at least one of its choices has
/// all successors inside the component.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MaximalEndComponent {
    pub states: BitSet,
    pub choices: BitSet,
}

impl MaximalEndComponent {
    /// The smallest state index of the component.
    pub fn smallest_state(&self) -> usize {
        self.states.first_set().expect("end component is nonempty")
    }
}

/// Decomposes the subsystem given by `states` and `choices` into its maximal
/// end components, reported in ascending order of their smallest state.
///
/// Iterative refinement: compute the strongly connected components of the
/// digraph induced by choices whose successors all stay inside the current
/// candidate, drop states that lose every such choice, and repeat on each
/// component until stable.
pub fn maximal_end_components<T: Value>(
    matrix: &SparseMatrix<T>,
    states: &BitSet,
    choices: &BitSet,
) -> Vec<MaximalEndComponent> {
    let mut result = Vec::new();
    let mut worklist = vec![states.clone()];

    while let Some(mut candidate) = worklist.pop() {
        // stabilize: keep choices contained in the candidate, drop states
        // without any
        let kept = loop {
            let kept = contained_choices(matrix, &candidate, choices);
            let mut removed = false;
            for state in candidate.clone().ones() {
                let has_choice = matrix.rows_of_group(state).any(|row| kept.get(row));
                if !has_choice {
                    candidate.remove(state);
                    removed = true;
                }
            }
            if !removed {
                break kept;
            }
        };
        if candidate.is_empty() {
            continue;
        }

        let decomposition = strongly_connected_components(matrix, &candidate, &kept);
        let components = decomposition.component_states(matrix.num_groups());
        if components.len() == 1 && components[0] == candidate {
            // stable and strongly connected through its contained choices
            result.push(MaximalEndComponent {
                states: candidate,
                choices: kept,
            });
            continue;
        }
        for component in components {
            if !component.is_empty() {
                worklist.push(component);
            }
        }
    }

    result.sort_by_key(MaximalEndComponent::smallest_state);
    debug!("MEC decomposition found {} components", result.len());
    result
}

/// The choices of candidate states whose successors all lie inside the
/// candidate set.
fn contained_choices<T: Value>(
    matrix: &SparseMatrix<T>,
    candidate: &BitSet,
    choices: &BitSet,
) -> BitSet {
    let mut kept = BitSet::new(matrix.num_rows());
    for state in candidate.ones() {
        for row in matrix.rows_of_group(state) {
            if !choices.get(row) {
                continue;
            }
            if matrix.row(row).all(|(successor, _)| candidate.get(successor)) {
                kept.insert(row);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseMatrixBuilder;

    #[test]
    fn test_two_components() {
        // 0 and 1 cycle through each other; 2 is absorbing; 3 can only
        // leave toward 2, so it belongs to no end component
        let mut builder = SparseMatrixBuilder::new(4);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        let matrix = builder.build();

        let mecs = maximal_end_components(
            &matrix,
            &BitSet::full(4),
            &BitSet::full(matrix.num_rows()),
        );
        assert_eq!(mecs.len(), 2);
        assert_eq!(mecs[0].states, BitSet::from_indices(4, vec![0, 1]));
        assert_eq!(mecs[0].choices, BitSet::from_indices(4, vec![0, 1]));
        assert_eq!(mecs[1].states, BitSet::from_indices(4, vec![2]));
    }

    #[test]
    fn test_leaving_choice_dropped() {
        // state 0 loops on itself with one choice and may leave to the
        // absorbing state 1 with another; both states form singleton MECs
        let mut builder = SparseMatrixBuilder::new(2);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 1.0);
        builder.new_row();
        builder.push_entry(0, 0.5);
        builder.push_entry(1, 0.5);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        let matrix = builder.build();

        let mecs = maximal_end_components(
            &matrix,
            &BitSet::full(2),
            &BitSet::full(matrix.num_rows()),
        );
        assert_eq!(mecs.len(), 2);
        assert_eq!(mecs[0].states, BitSet::from_indices(2, vec![0]));
        // only the pure self-loop stays inside
        assert_eq!(mecs[0].choices, BitSet::from_indices(3, vec![0]));
        assert_eq!(mecs[1].states, BitSet::from_indices(2, vec![1]));
        assert_eq!(mecs[1].choices, BitSet::from_indices(3, vec![2]));
    }

    #[test]
    fn test_nested_refinement() {
        // 0 ↔ 1 cycle, but 1 can also go to 2 which cycles with 3 only
        // through a choice leaving to the sink 4; {0, 1} is the only MEC
        // besides the sink
        let mut builder = SparseMatrixBuilder::new(5);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 1.0);
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(3, 0.5);
        builder.push_entry(4, 0.5);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(4, 1.0);
        let matrix = builder.build();

        let mecs = maximal_end_components(
            &matrix,
            &BitSet::full(5),
            &BitSet::full(matrix.num_rows()),
        );
        assert_eq!(mecs.len(), 2);
        assert_eq!(mecs[0].states, BitSet::from_indices(5, vec![0, 1]));
        assert_eq!(mecs[1].states, BitSet::from_indices(5, vec![4]));
    }
}
