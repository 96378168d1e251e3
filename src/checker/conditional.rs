//! Conditional probability queries.
//!
//! `P_opt (F target | F condition)` is rewritten into a plain reachability
//! query on an augmented MDP with fresh goal, stop and fail states and a
//! restart mechanism on states from which neither set stays reachable. The
//! minimizing direction is reduced to the maximizing one by swapping the
//! target for the end components of the non-target region and complementing
//! the result.

use log::{debug, info};

use crate::checker::formula::PathFormula;
use crate::checker::{QuantitativeResult, QueryContext};
use crate::error::{Error, Result};
use crate::graph;
use crate::model::Mdp;
use crate::numeric::Value;
use crate::solver::OptimizationDirection;
use crate::storage::{renumbering, BitSet, SparseMatrixBuilder};

impl<'a, T: Value> QueryContext<'a, T> {
    pub(crate) fn conditional_probabilities(
        &self,
        direction: OptimizationDirection,
        path: &PathFormula,
        condition: &PathFormula,
    ) -> Result<QuantitativeResult<T>> {
        let target = self.eventually_target(path)?;
        let condition = self.eventually_target(condition)?;
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();
        let all_states = BitSet::full(num_states);

        let initial_state = match (
            self.model.initial_states().first_set(),
            self.model.initial_states().count(),
        ) {
            (Some(state), 1) => state,
            _ => {
                return Err(Error::invalid_argument(
                    "conditional probabilities need a unique initial state",
                ))
            }
        };

        // the minimizing case becomes a maximizing one against the end
        // components of the non-target region
        let fixed_target = match direction {
            OptimizationDirection::Maximize => target.clone(),
            OptimizationDirection::Minimize => {
                let complement = !&target;
                let all_choices = BitSet::full(transitions.num_rows());
                let mut fixed = BitSet::new(num_states);
                for mec in
                    graph::maximal_end_components(transitions, &complement, &all_choices)
                {
                    fixed.union_with(&mec.states);
                }
                fixed
            }
        };

        let condition_probabilities = self
            .until_probabilities_with(
                OptimizationDirection::Maximize,
                &all_states,
                &condition,
                false,
            )?
            .values;
        if condition_probabilities[initial_state].is_zero() {
            // the condition is unsatisfiable from the initial state
            let mut values = vec![T::zero(); num_states];
            values[initial_state] = T::infinity();
            return Ok(QuantitativeResult {
                values,
                scheduler: None,
            });
        }
        let target_probabilities = self
            .until_probabilities_with(
                OptimizationDirection::Maximize,
                &all_states,
                &fixed_target,
                false,
            )?
            .values;

        let interesting = &condition | &fixed_target;
        let problematic =
            graph::prob_0_e(transitions, &self.backward, &all_states, &interesting);
        let initial_set = BitSet::from_indices(num_states, vec![initial_state]);
        let relevant =
            graph::reachable_states(transitions, &initial_set, &all_states, Some(&interesting));
        debug!(
            "Conditional query: {} relevant states, {} problematic states",
            relevant.count(),
            problematic.count()
        );

        // augmented state space: relevant states, then goal, stop, fail
        let state_map = renumbering(&relevant);
        let goal_state = relevant.count();
        let stop_state = goal_state + 1;
        let fail_state = stop_state + 1;
        let new_initial = state_map[initial_state].expect("initial state is relevant");

        let one = T::one();
        let mut builder = SparseMatrixBuilder::new(fail_state + 1);
        for state in relevant.ones() {
            builder.new_row_group();
            if fixed_target.get(state) {
                // clamp against iteration slop so rows stay stochastic
                let probability =
                    condition_probabilities[state].max_of(T::zero()).min_of(one);
                builder.new_row();
                builder.push_entry(goal_state, probability);
                builder.push_entry(fail_state, one - probability);
            } else if condition.get(state) {
                let probability = target_probabilities[state].max_of(T::zero()).min_of(one);
                builder.new_row();
                builder.push_entry(goal_state, probability);
                builder.push_entry(stop_state, one - probability);
            } else {
                for row in transitions.rows_of_group(state) {
                    builder.new_row();
                    for (successor, probability) in transitions.row(row) {
                        let mapped = state_map[successor]
                            .expect("successors of explored states are relevant");
                        builder.push_entry(mapped, probability);
                    }
                }
                if problematic.get(state) {
                    // restart once the run can no longer decide the query
                    builder.new_row();
                    builder.push_entry(new_initial, one);
                }
            }
        }
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(goal_state, one);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(stop_state, one);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(new_initial, one);

        let augmented = Mdp::new(
            builder.build(),
            BitSet::from_indices(fail_state + 1, vec![new_initial]),
        )?;
        info!(
            "Solving conditional query on an augmented MDP with {} states",
            augmented.num_states()
        );
        let augmented_context =
            QueryContext::new(&augmented, self.environment, self.options);
        let goal_set = BitSet::from_indices(fail_state + 1, vec![goal_state]);
        let augmented_all = BitSet::full(fail_state + 1);
        let goal_probabilities = augmented_context
            .until_probabilities(OptimizationDirection::Maximize, &augmented_all, &goal_set)?
            .values;

        let mut values = vec![T::zero(); num_states];
        values[initial_state] = match direction {
            OptimizationDirection::Maximize => goal_probabilities[new_initial],
            OptimizationDirection::Minimize => one - goal_probabilities[new_initial],
        };
        Ok(QuantitativeResult {
            values,
            scheduler: None,
        })
    }

    /// The target set of an eventually-shaped path formula.
    fn eventually_target(&self, path: &PathFormula) -> Result<BitSet> {
        match path {
            PathFormula::Eventually(target) => self.evaluate_states(target),
            _ => Err(Error::unsupported(
                "conditional probabilities support eventually operands only",
            )),
        }
    }
}
