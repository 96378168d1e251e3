//! Strongly connected components of the state digraph.

use crate::numeric::Value;
use crate::storage::{BitSet, SparseMatrix};

/// A partition of a state subset into strongly connected components.
///
/// Components are numbered `0..num_components` in the order their roots
/// finish in an ascending-index depth-first search, which makes the
/// decomposition deterministic.
#[derive(Debug)]
pub struct SccDecomposition {
    /// Component index per state; `None` outside the analyzed subset.
    pub component_of: Vec<Option<usize>>,
    pub num_components: usize,
}

impl SccDecomposition {
    /// The states of each component, as bit sets indexed by component.
    pub fn component_states(&self, num_states: usize) -> Vec<BitSet> {
        let mut components = vec![BitSet::new(num_states); self.num_components];
        for (state, component) in self.component_of.iter().enumerate() {
            if let Some(component) = component {
                components[*component].insert(state);
            }
        }
        components
    }
}

/// Computes the strongly connected components of the digraph over `states`
/// induced by the rows in `choices`: there is an edge `s → t` whenever some
/// enabled choice of `s` has a positive-probability transition to `t` and
/// both endpoints lie in `states`.
///
/// Iterative Tarjan with ascending-index root order.
pub fn strongly_connected_components<T: Value>(
    matrix: &SparseMatrix<T>,
    states: &BitSet,
    choices: &BitSet,
) -> SccDecomposition {
    let num_states = matrix.num_groups();
    let successors = collect_successors(matrix, states, choices);

    let mut component_of = vec![None; num_states];
    let mut num_components = 0;
    let mut index = vec![usize::MAX; num_states];
    let mut lowlink = vec![usize::MAX; num_states];
    let mut on_stack = BitSet::new(num_states);
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0;

    // explicit DFS frames: (state, next successor position)
    let mut frames: Vec<(usize, usize)> = Vec::new();
    for root in states.ones() {
        if index[root] != usize::MAX {
            continue;
        }
        frames.push((root, 0));
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack.insert(root);

        while let Some(&mut (v, ref mut position)) = frames.last_mut() {
            if *position < successors[v].len() {
                let w = successors[v][*position];
                *position += 1;
                if index[w] == usize::MAX {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack.insert(w);
                    frames.push((w, 0));
                } else if on_stack.get(w) {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    loop {
                        let w = stack.pop().unwrap();
                        on_stack.remove(w);
                        component_of[w] = Some(num_components);
                        if w == v {
                            break;
                        }
                    }
                    num_components += 1;
                }
            }
        }
    }

    SccDecomposition {
        component_of,
        num_components,
    }
}

/// Representative states, one per bottom component of the digraph: the
/// smallest state of every component without outgoing edges.
pub fn bottom_scc_representatives<T: Value>(matrix: &SparseMatrix<T>) -> Vec<usize> {
    let num_states = matrix.num_groups();
    let all_states = BitSet::full(num_states);
    let all_choices = BitSet::full(matrix.num_rows());
    let decomposition = strongly_connected_components(matrix, &all_states, &all_choices);

    let mut has_exit = vec![false; decomposition.num_components];
    for state in 0..num_states {
        let component = decomposition.component_of[state].unwrap();
        for row in matrix.rows_of_group(state) {
            for (successor, _) in matrix.row(row) {
                if decomposition.component_of[successor] != Some(component) {
                    has_exit[component] = true;
                }
            }
        }
    }
    let mut representative = vec![None; decomposition.num_components];
    for state in 0..num_states {
        let component = decomposition.component_of[state].unwrap();
        if !has_exit[component] && representative[component].is_none() {
            representative[component] = Some(state);
        }
    }
    representative.into_iter().flatten().collect()
}

fn collect_successors<T: Value>(
    matrix: &SparseMatrix<T>,
    states: &BitSet,
    choices: &BitSet,
) -> Vec<Vec<usize>> {
    let mut successors = vec![Vec::new(); matrix.num_groups()];
    for state in states.ones() {
        let list = &mut successors[state];
        for row in matrix.rows_of_group(state) {
            if !choices.get(row) {
                continue;
            }
            for (successor, _) in matrix.row(row) {
                if states.get(successor) {
                    list.push(successor);
                }
            }
        }
        list.sort_unstable();
        list.dedup();
    }
    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseMatrixBuilder;

    fn chain_with_cycle() -> SparseMatrix<f64> {
        // 0 → 1, 1 → 2, 2 → 1 (cycle {1, 2}), 3 self-loop
        let mut builder = SparseMatrixBuilder::new(4);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(3, 1.0);
        builder.build()
    }

    #[test]
    fn test_scc_decomposition() {
        let matrix = chain_with_cycle();
        let states = BitSet::full(4);
        let choices = BitSet::full(4);
        let decomposition = strongly_connected_components(&matrix, &states, &choices);
        assert_eq!(decomposition.num_components, 3);
        // {1, 2} share a component, 0 and 3 are trivial
        assert_eq!(
            decomposition.component_of[1],
            decomposition.component_of[2]
        );
        assert_ne!(
            decomposition.component_of[0],
            decomposition.component_of[1]
        );
        assert_ne!(
            decomposition.component_of[0],
            decomposition.component_of[3]
        );
    }

    #[test]
    fn test_bottom_sccs() {
        let matrix = chain_with_cycle();
        assert_eq!(bottom_scc_representatives(&matrix), vec![1, 3]);
    }
}
