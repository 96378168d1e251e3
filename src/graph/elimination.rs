//! End-component elimination.
//!
//! Collapsing a zero-reward end component into a single state preserves
//! extremal expected rewards: all choices inside the component accrue
//! nothing, so an optimal scheduler only cares about how the component is
//! eventually left. The weighted-sum checker of the multi-objective engine
//! relies on this to make its equation systems contracting.

use std::collections::BTreeMap;

use log::debug;

use crate::error::Result;
use crate::graph::mec::maximal_end_components;
use crate::numeric::Value;
use crate::storage::{BitSet, SparseMatrix, SparseMatrixBuilder};

/// The outcome of an elimination: the rebuilt matrix and the translation
/// maps between old and new index spaces.
#[derive(Debug)]
pub struct EliminationResult<T> {
    /// The matrix over the reduced state space, one extra state per
    /// collapsed component.
    pub matrix: SparseMatrix<T>,
    /// For each row of the new matrix, the row of the original matrix it
    /// came from; `None` marks the synthetic stay-inside self-loop of a
    /// component without leaving choices.
    pub new_to_old_row: Vec<Option<usize>>,
    /// For each original state in the subsystem, its state in the new
    /// matrix. States outside the subsystem keep `usize::MAX`.
    pub old_to_new_state: Vec<usize>,
}

/// Collapses the end components of the subgraph over
/// `subsystem ∩ possibly_recurrent` restricted to `eligible_choices` into
/// single states.
///
/// Choices leaving a collapsed component are relocated to its representative
/// state; choices internal to a component are dropped. States outside every
/// component map one-to-one; transition mass leaving the subsystem is
/// dropped, so the result may be substochastic.
pub fn eliminate_end_components<T: Value>(
    matrix: &SparseMatrix<T>,
    subsystem: &BitSet,
    eligible_choices: &BitSet,
    possibly_recurrent: &BitSet,
) -> Result<EliminationResult<T>> {
    let num_states = matrix.num_groups();
    let component_candidates = subsystem & possibly_recurrent;
    let mecs = maximal_end_components(matrix, &component_candidates, eligible_choices);
    debug!(
        "Eliminating {} end components from a subsystem of {} states",
        mecs.len(),
        subsystem.count()
    );

    // assign new state indices: untouched subsystem states in ascending
    // order, then one representative per component
    let mut in_component = BitSet::new(num_states);
    for mec in &mecs {
        in_component.union_with(&mec.states);
    }
    let mut old_to_new_state = vec![usize::MAX; num_states];
    let mut next_state = 0;
    for state in subsystem.ones() {
        if !in_component.get(state) {
            old_to_new_state[state] = next_state;
            next_state += 1;
        }
    }
    for mec in &mecs {
        for state in mec.states.ones() {
            old_to_new_state[state] = next_state;
        }
        next_state += 1;
    }
    let num_new_states = next_state;

    let mut builder = SparseMatrixBuilder::new(num_new_states);
    let mut new_to_old_row = Vec::new();
    let mut push_translated_row = |builder: &mut SparseMatrixBuilder<T>,
                                   new_to_old_row: &mut Vec<Option<usize>>,
                                   row: usize| {
        builder.new_row();
        new_to_old_row.push(Some(row));
        let mut entries: BTreeMap<usize, T> = BTreeMap::new();
        for (successor, value) in matrix.row(row) {
            let new_successor = old_to_new_state[successor];
            if new_successor != usize::MAX {
                let slot = entries.entry(new_successor).or_insert_with(T::zero);
                *slot += value;
            }
        }
        for (column, value) in entries {
            builder.push_entry(column, value);
        }
    };

    for state in subsystem.ones() {
        if in_component.get(state) {
            continue;
        }
        builder.new_row_group();
        for row in matrix.rows_of_group(state) {
            push_translated_row(&mut builder, &mut new_to_old_row, row);
        }
    }
    for mec in &mecs {
        builder.new_row_group();
        let mut has_row = false;
        for state in mec.states.ones() {
            for row in matrix.rows_of_group(state) {
                if mec.choices.get(row) {
                    continue;
                }
                push_translated_row(&mut builder, &mut new_to_old_row, row);
                has_row = true;
            }
        }
        if !has_row {
            // the component cannot be left; give its representative a
            // synthetic self-loop
            builder.new_row();
            new_to_old_row.push(None);
            let representative = old_to_new_state[mec.smallest_state()];
            builder.push_entry(representative, T::one());
        }
    }
    Ok(EliminationResult {
        matrix: builder.build(),
        new_to_old_row,
        old_to_new_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_cycle() {
        // states 0 and 1 cycle through zero-reward choices; state 1 can
        // also leave toward the absorbing state 2
        let mut builder = SparseMatrixBuilder::new(3);
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
        builder.push_entry(2, 1.0);
        let matrix = builder.build();

        let subsystem = BitSet::full(3);
        // the leaving choice (row 2) and the absorbing loop carry reward,
        // the cycle choices do not
        let eligible = BitSet::from_indices(4, vec![0, 1]);
        let recurrent = BitSet::full(3);
        let result = eliminate_end_components(&matrix, &subsystem, &eligible, &recurrent).unwrap();

        // state 2 stays, the cycle {0, 1} collapses into one state
        assert_eq!(result.matrix.num_groups(), 2);
        assert_eq!(result.old_to_new_state[2], 0);
        assert_eq!(result.old_to_new_state[0], 1);
        assert_eq!(result.old_to_new_state[1], 1);
        // the representative keeps exactly the leaving choice
        assert_eq!(result.matrix.rows_of_group(1).len(), 1);
        let leaving_row = result.matrix.rows_of_group(1).start;
        assert_eq!(result.new_to_old_row[leaving_row], Some(2));
        assert_eq!(
            result.matrix.row(leaving_row).collect::<Vec<_>>(),
            vec![(0, 1.0)]
        );
    }

    #[test]
    fn test_trapped_component_gets_self_loop() {
        // a two-state cycle with no way out
        let mut builder = SparseMatrixBuilder::new(2);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 1.0);
        let matrix = builder.build();

        let subsystem = BitSet::full(2);
        let eligible = BitSet::full(2);
        let recurrent = BitSet::full(2);
        let result = eliminate_end_components(&matrix, &subsystem, &eligible, &recurrent).unwrap();

        assert_eq!(result.matrix.num_groups(), 1);
        assert_eq!(result.new_to_old_row, vec![None]);
        assert_eq!(result.matrix.row(0).collect::<Vec<_>>(), vec![(0, 1.0)]);
    }
}
