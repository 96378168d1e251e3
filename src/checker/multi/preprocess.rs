//! Preprocessing of multi-objective formulas.
//!
//! Every sub-objective becomes a total-reward objective on a shared
//! preprocessed model, normalized so the driver always maximizes: once the
//! event of a probability objective resolves, the run moves to a duplicated
//! second copy of the state space where no further reward accrues.
//! Minimizing objectives are negated, globally objectives complemented; the
//! affine `(factor, offset)` per objective maps driver-space values back to
//! user-space values.

use std::collections::VecDeque;

use log::info;

use crate::checker::formula::{PathFormula, RewardPathFormula, StateFormula};
use crate::checker::QueryContext;
use crate::error::{Error, Result};
use crate::graph;
use crate::model::Mdp;
use crate::numeric::Value;
use crate::solver::OptimizationDirection;
use crate::storage::{BitSet, SparseMatrix, SparseMatrixBuilder};

/// One normalized objective over the preprocessed model.
#[derive(Debug)]
pub(crate) struct PreparedObjective<T> {
    /// Per-choice rewards on the preprocessed model, signed so the driver
    /// maximizes.
    pub choice_rewards: Vec<T>,
    /// Affine map back to user space: `user = factor·driver + offset`.
    pub factor: f64,
    pub offset: f64,
    /// Driver-space threshold `driver ≥ t` for achievability, with its
    /// strictness.
    pub threshold: Option<(f64, bool)>,
}

impl<T: Value> PreparedObjective<T> {
    /// Maps a driver-space value back to the user-space value.
    pub fn to_user_space(&self, driver_value: f64) -> f64 {
        self.factor * driver_value + self.offset
    }
}

/// The shared preprocessed model with its normalized objectives.
#[derive(Debug)]
pub(crate) struct PreprocessedQuery<T> {
    pub model: Mdp<T>,
    pub objectives: Vec<PreparedObjective<T>>,
    pub initial_state: usize,
}

/// The state-duplication transformer: runs start in the first copy and move
/// to the second copy upon entering a gate state, so rewards attached to
/// first-copy choices stop accruing once the gate is passed.
struct Duplication<T> {
    matrix: SparseMatrix<T>,
    /// For each new state, the state of the source model it copies.
    new_to_old_state: Vec<usize>,
    /// For each new row, the source row it copies.
    new_to_old_row: Vec<usize>,
    /// New states belonging to the first copy.
    first_copy: BitSet,
    initial_state: usize,
}

fn duplicate<T: Value>(
    matrix: &SparseMatrix<T>,
    initial_state: usize,
    gate: &BitSet,
) -> Duplication<T> {
    // discover (state, copy) pairs breadth-first from the initial state;
    // entering a gate state switches to the second copy
    let mut index_of = std::collections::HashMap::new();
    let mut order: Vec<(usize, bool)> = Vec::new();
    let mut queue = VecDeque::new();
    let initial_pair = (initial_state, gate.get(initial_state));
    index_of.insert(initial_pair, 0);
    order.push(initial_pair);
    queue.push_back(initial_pair);
    while let Some((state, second)) = queue.pop_front() {
        for row in matrix.rows_of_group(state) {
            for (successor, _) in matrix.row(row) {
                let successor_pair = (successor, second || gate.get(successor));
                if !index_of.contains_key(&successor_pair) {
                    index_of.insert(successor_pair, order.len());
                    order.push(successor_pair);
                    queue.push_back(successor_pair);
                }
            }
        }
    }

    let num_new_states = order.len();
    let mut builder = SparseMatrixBuilder::new(num_new_states);
    let mut new_to_old_state = Vec::with_capacity(num_new_states);
    let mut new_to_old_row = Vec::new();
    let mut first_copy = BitSet::new(num_new_states);
    for (new_state, &(state, second)) in order.iter().enumerate() {
        new_to_old_state.push(state);
        if !second {
            first_copy.insert(new_state);
        }
        builder.new_row_group();
        for row in matrix.rows_of_group(state) {
            builder.new_row();
            new_to_old_row.push(row);
            let mut entries: Vec<(usize, T)> = matrix
                .row(row)
                .map(|(successor, value)| {
                    (index_of[&(successor, second || gate.get(successor))], value)
                })
                .collect();
            entries.sort_by_key(|&(column, _)| column);
            for (column, value) in entries {
                builder.push_entry(column, value);
            }
        }
    }
    Duplication {
        matrix: builder.build(),
        new_to_old_state,
        new_to_old_row,
        first_copy,
        initial_state: 0,
    }
}

/// The normalized flavor of one sub-objective before model transformation.
struct ObjectiveShape {
    /// Probability mass collected when entering this set resolves the event
    /// positively (`None` for reward objectives).
    event: Option<EventShape>,
    /// Reward-model name for reward objectives.
    reward_model: Option<String>,
    reward_reachability_target: Option<StateFormula>,
    negate: bool,
    factor: f64,
    offset: f64,
    /// The user-space bound, converted to driver space only once the affine
    /// map is final.
    bound: Option<crate::checker::formula::Bound>,
}

struct EventShape {
    phi: StateFormula,
    psi: StateFormula,
}

impl<'a, T: Value> QueryContext<'a, T> {
    /// Normalizes the sub-objectives and builds the shared preprocessed
    /// model by cascading state duplications.
    pub(crate) fn preprocess_multi_objective(
        &self,
        objectives: &[StateFormula],
    ) -> Result<PreprocessedQuery<T>> {
        if objectives.len() < 2 {
            return Err(Error::unsupported(
                "multi-objective queries need at least two objectives",
            ));
        }
        let initial_state = match (
            self.model.initial_states().first_set(),
            self.model.initial_states().count(),
        ) {
            (Some(state), 1) => state,
            _ => {
                return Err(Error::invalid_argument(
                    "multi-objective queries need a unique initial state",
                ))
            }
        };

        let shapes: Vec<ObjectiveShape> = objectives
            .iter()
            .map(|objective| self.normalize_objective(objective))
            .collect::<Result<_>>()?;

        // cascade the duplications, lifting earlier reward vectors and the
        // original-index maps through each round
        let mut matrix = self.model.transitions().clone();
        let mut current_initial = initial_state;
        let mut to_original: Vec<usize> = (0..self.model.num_states()).collect();
        let mut to_original_row: Vec<usize> = (0..self.model.num_choices()).collect();
        let mut prepared: Vec<PreparedObjective<T>> = Vec::new();

        for shape in &shapes {
            let mut factor = shape.factor;
            let mut offset = shape.offset;
            let choice_rewards;
            match &shape.event {
                Some(event) => {
                    let phi_original = self.evaluate_states(&event.phi)?;
                    let psi_original = self.evaluate_states(&event.psi)?;
                    let phi = lift_states(&phi_original, &to_original, matrix.num_groups());
                    let psi = lift_states(&psi_original, &to_original, matrix.num_groups());
                    let gate = &psi | &(!&phi);
                    // one-step probability of resolving positively
                    let all_groups = BitSet::full(matrix.num_groups());
                    let mass = matrix.row_group_constrained_sum(&all_groups, &psi);

                    let duplication = duplicate(&matrix, current_initial, &gate);
                    if gate.get(current_initial) {
                        // the event resolves immediately in the initial
                        // state; the objective degenerates to a constant
                        if psi.get(current_initial) {
                            offset += factor;
                        }
                        factor = 0.0;
                    }
                    let mut rewards = vec![T::zero(); duplication.matrix.num_rows()];
                    for (new_row, &old_row) in duplication.new_to_old_row.iter().enumerate() {
                        let source = duplication.matrix.group_of_row(new_row);
                        if duplication.first_copy.get(source) {
                            rewards[new_row] = if shape.negate {
                                -mass[old_row]
                            } else {
                                mass[old_row]
                            };
                        }
                    }
                    choice_rewards = rewards;
                    prepared = lift_prepared(prepared, &duplication.new_to_old_row);
                    to_original = duplication
                        .new_to_old_state
                        .iter()
                        .map(|&state| to_original[state])
                        .collect();
                    to_original_row = duplication
                        .new_to_old_row
                        .iter()
                        .map(|&row| to_original_row[row])
                        .collect();
                    current_initial = duplication.initial_state;
                    matrix = duplication.matrix;
                }
                None => {
                    let reward_model =
                        self.model.reward_model(shape.reward_model.as_deref())?;
                    let base = reward_model.total_choice_rewards(self.model.transitions());
                    match &shape.reward_reachability_target {
                        Some(target_formula) => {
                            let target_original = self.evaluate_states(target_formula)?;
                            let gate =
                                lift_states(&target_original, &to_original, matrix.num_groups());
                            let duplication = duplicate(&matrix, current_initial, &gate);
                            let mut rewards =
                                vec![T::zero(); duplication.matrix.num_rows()];
                            for (new_row, &old_row) in
                                duplication.new_to_old_row.iter().enumerate()
                            {
                                let source = duplication.matrix.group_of_row(new_row);
                                if duplication.first_copy.get(source) {
                                    let value = base[to_original_row[old_row]];
                                    rewards[new_row] =
                                        if shape.negate { -value } else { value };
                                }
                            }
                            choice_rewards = rewards;
                            prepared = lift_prepared(prepared, &duplication.new_to_old_row);
                            to_original = duplication
                                .new_to_old_state
                                .iter()
                                .map(|&state| to_original[state])
                                .collect();
                            to_original_row = duplication
                                .new_to_old_row
                                .iter()
                                .map(|&row| to_original_row[row])
                                .collect();
                            current_initial = duplication.initial_state;
                            matrix = duplication.matrix;
                        }
                        None => {
                            // total reward: no duplication needed
                            let mut rewards = Vec::with_capacity(matrix.num_rows());
                            for row in 0..matrix.num_rows() {
                                let value = base[to_original_row[row]];
                                rewards.push(if shape.negate { -value } else { value });
                            }
                            choice_rewards = rewards;
                        }
                    }
                }
            }
            prepared.push(PreparedObjective {
                choice_rewards,
                factor,
                offset,
                threshold: driver_threshold(&shape.bound, factor, offset),
            });
        }

        // a positively-rewarded end component would make some objective
        // unbounded for the maximizing driver
        let all_states = BitSet::full(matrix.num_groups());
        let all_choices = BitSet::full(matrix.num_rows());
        for mec in graph::maximal_end_components(&matrix, &all_states, &all_choices) {
            for objective in &prepared {
                let positive = mec
                    .choices
                    .ones()
                    .any(|row| objective.choice_rewards[row] > T::zero());
                if positive {
                    return Err(Error::invalid_argument(
                        "an end component accrues positive reward for a maximizing objective",
                    ));
                }
            }
        }

        info!(
            "Multi-objective preprocessing produced {} states for {} objectives",
            matrix.num_groups(),
            prepared.len()
        );
        let mut initial = BitSet::new(matrix.num_groups());
        initial.insert(current_initial);
        let model = Mdp::new(matrix, initial)?;
        Ok(PreprocessedQuery {
            model,
            objectives: prepared,
            initial_state: current_initial,
        })
    }

    /// Normalizes one sub-objective into its driver-space shape.
    fn normalize_objective(&self, objective: &StateFormula) -> Result<ObjectiveShape> {
        match objective {
            StateFormula::Probability {
                direction,
                bound,
                path,
            } => {
                let maximizing = flavor(*direction, bound)?;
                let (phi, psi, complemented) = match path {
                    PathFormula::Until(left, right) => {
                        ((**left).clone(), (**right).clone(), false)
                    }
                    PathFormula::Eventually(target) => {
                        (StateFormula::True, (**target).clone(), false)
                    }
                    PathFormula::Globally(body) => (
                        StateFormula::True,
                        StateFormula::not((**body).clone()),
                        true,
                    ),
                    _ => {
                        return Err(Error::unsupported(
                            "step-bounded sub-objectives are not supported",
                        ))
                    }
                };
                // complementing G flips the inner optimization direction
                let inner_maximizing = maximizing != complemented;
                let (factor, offset) = match (complemented, inner_maximizing) {
                    (false, true) => (1.0, 0.0),
                    (false, false) => (-1.0, 0.0),
                    (true, false) => (1.0, 1.0),
                    (true, true) => (-1.0, 1.0),
                };
                Ok(ObjectiveShape {
                    event: Some(EventShape { phi, psi }),
                    reward_model: None,
                    reward_reachability_target: None,
                    negate: !inner_maximizing,
                    factor,
                    offset,
                    bound: *bound,
                })
            }
            StateFormula::Reward {
                direction,
                bound,
                reward_model,
                path,
            } => {
                let maximizing = flavor(*direction, bound)?;
                let (factor, offset) = if maximizing { (1.0, 0.0) } else { (-1.0, 0.0) };
                let reward_reachability_target = match path {
                    RewardPathFormula::Reachability(target) => Some((**target).clone()),
                    RewardPathFormula::Total => None,
                    _ => {
                        return Err(Error::unsupported(
                            "only reachability and total reward sub-objectives are supported",
                        ))
                    }
                };
                Ok(ObjectiveShape {
                    event: None,
                    reward_model: reward_model.clone(),
                    reward_reachability_target,
                    negate: !maximizing,
                    factor,
                    offset,
                    bound: *bound,
                })
            }
            _ => Err(Error::unsupported(
                "multi-objective queries combine probability and reward operators only",
            )),
        }
    }
}

/// Whether the objective is of maximizing flavor: from the bound direction
/// when present, from the optimization direction otherwise.
fn flavor(
    direction: OptimizationDirection,
    bound: &Option<crate::checker::formula::Bound>,
) -> Result<bool> {
    match bound {
        Some(bound) => Ok(bound.comparison.is_lower_bound()),
        None => Ok(direction == OptimizationDirection::Maximize),
    }
}

/// Converts a user-space bound into the driver-space lower bound
/// `driver ≥ t`, against the final affine map. A degenerate objective has a
/// constant user value, so its bound is either always or never met.
fn driver_threshold(
    bound: &Option<crate::checker::formula::Bound>,
    factor: f64,
    offset: f64,
) -> Option<(f64, bool)> {
    let bound = (*bound)?;
    let strict = bound.comparison.is_strict();
    if factor == 0.0 {
        // large finite sentinels keep the polytope geometry well defined
        if bound.check(offset) {
            return Some((-1e18, strict));
        }
        return Some((1e18, strict));
    }
    let threshold = if factor > 0.0 {
        (bound.threshold - offset) / factor
    } else {
        (offset - bound.threshold) / -factor
    };
    Some((threshold, strict))
}

/// Lifts a state set of the original model through the accumulated
/// original-state map.
fn lift_states(original: &BitSet, to_original: &[usize], num_states: usize) -> BitSet {
    let mut lifted = BitSet::new(num_states);
    for (state, &original_state) in to_original.iter().enumerate() {
        if original.get(original_state) {
            lifted.insert(state);
        }
    }
    lifted
}

/// Lifts already prepared reward vectors through one more duplication.
fn lift_prepared<T: Value>(
    prepared: Vec<PreparedObjective<T>>,
    new_to_old_row: &[usize],
) -> Vec<PreparedObjective<T>> {
    prepared
        .into_iter()
        .map(|objective| {
            let choice_rewards = new_to_old_row
                .iter()
                .map(|&old_row| objective.choice_rewards[old_row])
                .collect();
            PreparedObjective {
                choice_rewards,
                ..objective
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseMatrixBuilder;

    #[test]
    fn test_duplication() {
        // 0 → 1 → 2 (absorbing), gate {1}
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

        let gate = BitSet::from_indices(3, vec![1]);
        let result = duplicate(&matrix, 0, &gate);
        // first copy: state 0; second copy: 1, 2
        assert_eq!(result.matrix.num_groups(), 3);
        assert_eq!(result.first_copy.count(), 1);
        assert!(result.first_copy.get(0));
        assert_eq!(result.new_to_old_state, vec![0, 1, 2]);
    }

    #[test]
    fn test_duplication_with_revisit() {
        // 0 ↔ 1 with gate {1}: state 0 appears in both copies
        let mut builder = SparseMatrixBuilder::new(2);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 1.0);
        let matrix = builder.build();

        let gate = BitSet::from_indices(2, vec![1]);
        let result = duplicate(&matrix, 0, &gate);
        assert_eq!(result.matrix.num_groups(), 3);
        assert_eq!(result.first_copy.count(), 1);
        // the second copy of 0 loops back into the second copy of 1
        let second_zero = (0..3)
            .find(|&s| result.new_to_old_state[s] == 0 && !result.first_copy.get(s))
            .unwrap();
        let row = result.matrix.rows_of_group(second_zero).start;
        let successors: Vec<usize> = result.matrix.row(row).map(|(c, _)| c).collect();
        assert_eq!(successors.len(), 1);
        assert_eq!(result.new_to_old_state[successors[0]], 1);
        assert!(!result.first_copy.get(successors[0]));
    }
}
