//! Quantitative PCTL queries: until and next probabilities and the reward
//! operators.
//!
//! Every unbounded query runs the same pipeline: qualitative preprocessing
//! decides the sure states, the numeric solver only sees the maybe-state
//! submatrix, and the full result is assembled afterwards. This keeps the
//! equation systems uniquely solvable, which the min/max solvers require.

use log::{debug, info};

use crate::checker::{QuantitativeResult, QueryContext};
use crate::error::Result;
use crate::graph;
use crate::numeric::Value;
use crate::solver::{OptimizationDirection, Scheduler};
use crate::storage::BitSet;
use crate::vector;

impl<'a, T: Value> QueryContext<'a, T> {
    /// One-step probabilities `P_opt (X target)`.
    pub(crate) fn next_probabilities(
        &self,
        direction: OptimizationDirection,
        target: &BitSet,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let all_states = BitSet::full(self.model.num_states());
        let choice_values = transitions.row_group_constrained_sum(&all_states, target);
        let mut values = vec![T::zero(); self.model.num_states()];
        let mut scheduler = self
            .options
            .produce_scheduler
            .then(|| Scheduler::new(self.model.num_states()));
        vector::reduce_by_group(
            &choice_values,
            transitions.group_starts(),
            direction,
            &mut values,
            scheduler.as_mut().map(|s| s.choices_mut()),
        );
        Ok(QuantitativeResult { values, scheduler })
    }

    /// Unbounded until probabilities `P_opt (phi U psi)`.
    pub(crate) fn until_probabilities(
        &self,
        direction: OptimizationDirection,
        phi: &BitSet,
        psi: &BitSet,
    ) -> Result<QuantitativeResult<T>> {
        self.until_probabilities_with(direction, phi, psi, true)
    }

    /// Until probabilities with the qualitative shortcut optionally
    /// disabled; internal callers that consume values at every state need
    /// the exact maybe-state results even when no initial state is
    /// undecided.
    pub(crate) fn until_probabilities_with(
        &self,
        direction: OptimizationDirection,
        phi: &BitSet,
        psi: &BitSet,
        allow_shortcut: bool,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();

        let (no, yes) = match direction {
            OptimizationDirection::Minimize => (
                graph::prob_0_e(transitions, &self.backward, phi, psi),
                graph::prob_1_a(transitions, &self.backward, phi, psi),
            ),
            OptimizationDirection::Maximize => (
                graph::prob_0_a(transitions, &self.backward, phi, psi),
                graph::prob_1_e(transitions, &self.backward, phi, psi),
            ),
        };
        let maybe = &(!&no) - &yes;
        info!(
            "Until preprocessing: {} no states, {} yes states, {} maybe states",
            no.count(),
            yes.count(),
            maybe.count()
        );

        let mut values = vec![T::zero(); num_states];
        vector::set_all_values(&mut values, &yes, T::one());

        let qualitative = allow_shortcut
            && (self.options.qualitative_only
                || (&maybe & self.model.initial_states()).is_empty());
        let mut maybe_scheduler = None;
        if qualitative {
            // every initial state is already decided; mark undecided states
            // with one half instead of solving
            vector::set_all_values(&mut values, &maybe, T::from_f64(0.5));
        } else if !maybe.is_empty() {
            let submatrix = transitions.submatrix(&maybe, None)?;
            let b = transitions.row_group_constrained_sum(&maybe, &yes);
            let mut x = vec![T::zero(); maybe.count()];
            let mut solver = self.environment.minmax_solver(self.options.technique);
            let context = self.solve_context();
            maybe_scheduler = solver.solve(direction, &submatrix, &mut x, &b, &context)?;
            vector::set_values(&mut values, &maybe, &x);
        }

        let scheduler = if self.options.produce_scheduler {
            Some(self.until_scheduler(direction, &no, &yes, &maybe, maybe_scheduler)?)
        } else {
            None
        };
        Ok(QuantitativeResult { values, scheduler })
    }

    /// Completes the maybe-state scheduler on the qualitatively decided
    /// states: stay inside `yes` when maximizing, stay inside `no` when
    /// minimizing, smallest local index everywhere else.
    fn until_scheduler(
        &self,
        direction: OptimizationDirection,
        no: &BitSet,
        yes: &BitSet,
        maybe: &BitSet,
        maybe_scheduler: Option<Scheduler>,
    ) -> Result<Scheduler> {
        let transitions = self.model.transitions();
        let mut scheduler = Scheduler::new(self.model.num_states());
        if let Some(partial) = maybe_scheduler {
            // submatrix groups preserve the local choice order
            for (local_state, state) in maybe.ones().enumerate() {
                scheduler[state] = partial[local_state];
            }
        }
        let closed = match direction {
            OptimizationDirection::Minimize => no,
            OptimizationDirection::Maximize => yes,
        };
        for state in closed.ones() {
            let rows = transitions.rows_of_group(state);
            let start = rows.start;
            let staying = rows.clone().find(|&row| {
                transitions
                    .row(row)
                    .all(|(successor, _)| closed.get(successor))
            });
            if let Some(row) = staying {
                scheduler[state] = (row - start) as u64;
            }
        }
        Ok(scheduler)
    }

    /// Step-bounded until probabilities `P_opt (phi U^{≤k} psi)`.
    pub(crate) fn bounded_until_probabilities(
        &self,
        direction: OptimizationDirection,
        phi: &BitSet,
        psi: &BitSet,
        steps: u64,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();

        let positive = match direction {
            OptimizationDirection::Minimize => {
                graph::prob_greater_0_a(transitions, &self.backward, phi, psi, Some(steps))
            }
            OptimizationDirection::Maximize => {
                graph::prob_greater_0_e(transitions, &self.backward, phi, psi, Some(steps))
            }
        };
        let maybe = &positive - psi;
        debug!(
            "Bounded until with {} steps: {} maybe states",
            steps,
            maybe.count()
        );

        let mut values = vec![T::zero(); num_states];
        vector::set_all_values(&mut values, psi, T::one());
        if !maybe.is_empty() && steps > 0 {
            let submatrix = transitions.submatrix(&maybe, None)?;
            let b = transitions.row_group_constrained_sum(&maybe, psi);
            let mut x = vec![T::zero(); maybe.count()];
            let mut choice_values = vec![T::zero(); submatrix.num_rows()];
            for _ in 0..steps {
                self.check_cancelled()?;
                submatrix.multiply(&x, Some(&b), &mut choice_values)?;
                vector::reduce_by_group(
                    &choice_values,
                    submatrix.group_starts(),
                    direction,
                    &mut x,
                    None,
                );
            }
            vector::set_values(&mut values, &maybe, &x);
        }
        // step-bounded optima need step-indexed choices, so no memoryless
        // scheduler is produced
        Ok(QuantitativeResult {
            values,
            scheduler: None,
        })
    }

    /// Expected reward accumulated until `target` is reached.
    pub(crate) fn reachability_reward(
        &self,
        direction: OptimizationDirection,
        target: &BitSet,
        choice_rewards: Vec<T>,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();
        let all_states = BitSet::full(num_states);

        // the extremal direction flips against the probability case: the
        // reward maximizer profits from schedulers that avoid the target
        let reach_surely = match direction {
            OptimizationDirection::Minimize => {
                graph::prob_1_e(transitions, &self.backward, &all_states, target)
            }
            OptimizationDirection::Maximize => {
                graph::prob_1_a(transitions, &self.backward, &all_states, target)
            }
        };
        let infinity = !&reach_surely;
        let maybe = &(&all_states - target) - &infinity;
        info!(
            "Reachability reward preprocessing: {} infinite states, {} maybe states",
            infinity.count(),
            maybe.count()
        );

        let mut values = vec![T::zero(); num_states];
        vector::set_all_values(&mut values, &infinity, T::infinity());
        let mut maybe_scheduler = None;
        if !maybe.is_empty() && !self.options.qualitative_only {
            let submatrix = transitions.submatrix(&maybe, None)?;
            let mut b = Vec::with_capacity(submatrix.num_rows());
            for state in maybe.ones() {
                for row in transitions.rows_of_group(state) {
                    let enters_infinity = transitions
                        .row(row)
                        .any(|(successor, _)| infinity.get(successor));
                    if enters_infinity {
                        // poisoned so finite-optimum schedulers avoid it
                        b.push(T::infinity());
                    } else {
                        b.push(choice_rewards[row]);
                    }
                }
            }
            let mut x = vec![T::zero(); maybe.count()];
            let mut solver = self.environment.minmax_solver(self.options.technique);
            let context = self.solve_context();
            maybe_scheduler = solver.solve(direction, &submatrix, &mut x, &b, &context)?;
            vector::set_values(&mut values, &maybe, &x);
        }

        let scheduler = if self.options.produce_scheduler {
            let mut scheduler = Scheduler::new(num_states);
            if let Some(partial) = maybe_scheduler {
                for (local_state, state) in maybe.ones().enumerate() {
                    scheduler[state] = partial[local_state];
                }
            }
            Some(scheduler)
        } else {
            None
        };
        Ok(QuantitativeResult { values, scheduler })
    }

    /// Expected reward accumulated over the first `steps` steps.
    pub(crate) fn cumulative_reward(
        &self,
        direction: OptimizationDirection,
        choice_rewards: Vec<T>,
        steps: u64,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();
        let mut x = vec![T::zero(); num_states];
        let mut choice_values = vec![T::zero(); transitions.num_rows()];
        for _ in 0..steps {
            self.check_cancelled()?;
            transitions.multiply(&x, Some(&choice_rewards), &mut choice_values)?;
            vector::reduce_by_group(
                &choice_values,
                transitions.group_starts(),
                direction,
                &mut x,
                None,
            );
        }
        Ok(QuantitativeResult {
            values: x,
            scheduler: None,
        })
    }

    /// Expected state reward exactly at step `steps`.
    pub(crate) fn instantaneous_reward(
        &self,
        direction: OptimizationDirection,
        state_rewards: &[T],
        steps: u64,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();
        let mut x = state_rewards.to_vec();
        let mut choice_values = vec![T::zero(); transitions.num_rows()];
        for _ in 0..steps {
            self.check_cancelled()?;
            transitions.multiply(&x, None, &mut choice_values)?;
            vector::reduce_by_group(
                &choice_values,
                transitions.group_starts(),
                direction,
                &mut x,
                None,
            );
        }
        Ok(QuantitativeResult {
            values: x,
            scheduler: None,
        })
    }

    /// Expected total reward over the infinite run.
    ///
    /// End components decide finiteness: a maximizer diverges as soon as it
    /// can reach a positively-rewarded component, a minimizer diverges when
    /// it cannot reach any zero-reward component.
    pub(crate) fn total_reward(
        &self,
        direction: OptimizationDirection,
        choice_rewards: Vec<T>,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();
        let all_states = BitSet::full(num_states);
        let all_choices = BitSet::full(transitions.num_rows());

        let mecs = graph::maximal_end_components(transitions, &all_states, &all_choices);
        let mut positive_mec_states = BitSet::new(num_states);
        let mut zero_mec_states = BitSet::new(num_states);
        for mec in &mecs {
            let has_positive = mec
                .choices
                .ones()
                .any(|row| choice_rewards[row] > T::zero());
            if has_positive {
                positive_mec_states.union_with(&mec.states);
            } else {
                zero_mec_states.union_with(&mec.states);
            }
        }

        let infinity = match direction {
            OptimizationDirection::Maximize => graph::prob_greater_0_e(
                transitions,
                &self.backward,
                &all_states,
                &positive_mec_states,
                None,
            ),
            OptimizationDirection::Minimize => !&graph::prob_greater_0_e(
                transitions,
                &self.backward,
                &all_states,
                &zero_mec_states,
                None,
            ),
        };
        let subsystem = &all_states - &infinity;
        debug!(
            "Total reward: {} states with infinite value",
            infinity.count()
        );

        let mut values = vec![T::zero(); num_states];
        vector::set_all_values(&mut values, &infinity, T::infinity());
        if !subsystem.is_empty() && !self.options.qualitative_only {
            // collapse the zero-reward components so the remaining system
            // is contracting, then solve for total reward
            let zero_choices = {
                let mut mask = BitSet::new(transitions.num_rows());
                for (row, reward) in choice_rewards.iter().enumerate() {
                    if reward.is_zero() {
                        mask.insert(row);
                    }
                }
                mask
            };
            let elimination = graph::eliminate_end_components(
                transitions,
                &subsystem,
                &zero_choices,
                &all_states,
            )?;
            let reduced = &elimination.matrix;
            let b: Vec<T> = elimination
                .new_to_old_row
                .iter()
                .map(|old| match old {
                    None => T::zero(),
                    Some(row) => {
                        let enters_infinity = transitions
                            .row(*row)
                            .any(|(successor, _)| infinity.get(successor));
                        if enters_infinity {
                            // poisoned so finite-optimum schedulers avoid it
                            T::infinity()
                        } else {
                            choice_rewards[*row]
                        }
                    }
                })
                .collect();
            let mut x = vec![T::zero(); reduced.num_groups()];
            let mut solver = self.environment.minmax_solver(self.options.technique);
            let context = self.solve_context();
            solver.solve(direction, reduced, &mut x, &b, &context)?;
            for state in subsystem.ones() {
                values[state] = x[elimination.old_to_new_state[state]];
            }
        }
        Ok(QuantitativeResult {
            values,
            scheduler: None,
        })
    }
}
