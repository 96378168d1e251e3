//! Long-run average queries.
//!
//! The classic two-stage scheme: the average reward inside every maximal
//! end component is a self-contained problem, and the transient part is a
//! stochastic-shortest-path surrogate where each component is collapsed
//! into a state that may either commit to the component's value or take one
//! of its exiting choices.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::checker::{QuantitativeResult, QueryContext};
use crate::error::{Error, Result};
use crate::graph::{self, MaximalEndComponent};
use crate::numeric::Value;
use crate::options::SolverTechnique;
use crate::solver::{ConstraintSense, OptimizationDirection};
use crate::storage::{BitSet, SparseMatrixBuilder};

/// Damping factor of the aperiodicity transformation used by the
/// value-iteration path.
const APERIODICITY_FACTOR: f64 = 0.9;

impl<'a, T: Value> QueryContext<'a, T> {
    /// Long-run average fraction of time spent in `psi`.
    pub(crate) fn long_run_average(
        &self,
        direction: OptimizationDirection,
        psi: &BitSet,
    ) -> Result<QuantitativeResult<T>> {
        let transitions = self.model.transitions();
        let num_states = self.model.num_states();
        let all_states = BitSet::full(num_states);
        let all_choices = BitSet::full(transitions.num_rows());

        // reward of a choice: the probability of landing in psi next step
        let choice_rewards = transitions.row_group_constrained_sum(&all_states, psi);

        let mecs = graph::maximal_end_components(transitions, &all_states, &all_choices);
        info!(
            "Long-run average over {} maximal end components",
            mecs.len()
        );
        let mut component_values = Vec::with_capacity(mecs.len());
        for mec in &mecs {
            self.check_cancelled()?;
            let value = self.component_average(direction, mec, &choice_rewards)?;
            debug!(
                "End component at state {} has average {}",
                mec.smallest_state(),
                value
            );
            component_values.push(value);
        }

        // stochastic-shortest-path surrogate: transient states keep their
        // choices, each component becomes one state that either commits to
        // its average or exits
        let mut in_component = BitSet::new(num_states);
        for mec in &mecs {
            in_component.union_with(&mec.states);
        }
        let mut old_to_new = vec![usize::MAX; num_states];
        let mut next = 0;
        for state in (&all_states - &in_component).ones() {
            old_to_new[state] = next;
            next += 1;
        }
        for mec in &mecs {
            for state in mec.states.ones() {
                old_to_new[state] = next;
            }
            next += 1;
        }
        let num_surrogate_states = next;

        let mut builder = SparseMatrixBuilder::new(num_surrogate_states);
        let mut b = Vec::new();
        let mut push_row = |builder: &mut SparseMatrixBuilder<T>, b: &mut Vec<T>, row: usize| {
            builder.new_row();
            b.push(T::zero());
            let mut entries: BTreeMap<usize, T> = BTreeMap::new();
            for (successor, value) in transitions.row(row) {
                *entries.entry(old_to_new[successor]).or_insert_with(T::zero) += value;
            }
            for (column, value) in entries {
                builder.push_entry(column, value);
            }
        };
        for state in (&all_states - &in_component).ones() {
            builder.new_row_group();
            for row in transitions.rows_of_group(state) {
                push_row(&mut builder, &mut b, row);
            }
        }
        for (mec, value) in mecs.iter().zip(&component_values) {
            builder.new_row_group();
            for state in mec.states.ones() {
                for row in transitions.rows_of_group(state) {
                    if !mec.choices.get(row) {
                        push_row(&mut builder, &mut b, row);
                    }
                }
            }
            // committing to the component yields its average immediately
            builder.new_row();
            b.push(*value);
        }
        let surrogate = builder.build();

        let mut x = vec![T::zero(); num_surrogate_states];
        let mut solver = self.environment.minmax_solver(self.options.technique);
        let context = self.solve_context();
        solver.solve(direction, &surrogate, &mut x, &b, &context)?;

        let mut values = vec![T::zero(); num_states];
        for state in 0..num_states {
            values[state] = x[old_to_new[state]];
        }
        Ok(QuantitativeResult {
            values,
            scheduler: None,
        })
    }

    /// The extremal average reward inside one end component.
    fn component_average(
        &self,
        direction: OptimizationDirection,
        mec: &MaximalEndComponent,
        choice_rewards: &[T],
    ) -> Result<T> {
        if self.options.technique == SolverTechnique::LinearProgramming {
            if let Some(factory) = self.environment.lp_factory() {
                return self.component_average_lp(direction, mec, choice_rewards, factory);
            }
            return Err(Error::BackendFailure(
                "no LP solver backend available for long-run averages".into(),
            ));
        }
        self.component_average_vi(direction, mec, choice_rewards)
    }

    /// Relative value iteration with an aperiodicity transformation: damp
    /// the dynamics with factor α and read the average off the span of the
    /// iterate difference.
    fn component_average_vi(
        &self,
        direction: OptimizationDirection,
        mec: &MaximalEndComponent,
        choice_rewards: &[T],
    ) -> Result<T> {
        let transitions = self.model.transitions();
        let submatrix = transitions.submatrix(&mec.states, Some(&mec.choices))?;
        let mut b = Vec::with_capacity(submatrix.num_rows());
        for state in mec.states.ones() {
            for row in transitions.rows_of_group(state) {
                if mec.choices.get(row) {
                    b.push(choice_rewards[row]);
                }
            }
        }

        let alpha = T::from_f64(APERIODICITY_FACTOR);
        let one_minus_alpha = T::one() - alpha;
        let precision = T::from_f64(self.options.precision) * alpha;
        let num_component_states = submatrix.num_groups();
        let mut x = vec![T::zero(); num_component_states];
        let mut next_x = vec![T::zero(); num_component_states];
        let mut choice_values = vec![T::zero(); submatrix.num_rows()];

        for iteration in 0..self.options.max_iterations {
            self.check_cancelled()?;
            submatrix.multiply(&x, Some(&b), &mut choice_values)?;
            crate::vector::reduce_by_group(
                &choice_values,
                submatrix.group_starts(),
                direction,
                &mut next_x,
                None,
            );
            // damped update keeps periodic components converging
            let mut min_difference = T::infinity();
            let mut max_difference = -T::infinity();
            for state in 0..num_component_states {
                let damped = alpha * next_x[state] + one_minus_alpha * x[state];
                let difference = damped - x[state];
                min_difference = min_difference.min_of(difference);
                max_difference = max_difference.max_of(difference);
                next_x[state] = damped;
            }
            std::mem::swap(&mut x, &mut next_x);
            if max_difference - min_difference <= precision {
                let two = T::from_f64(2.0);
                let average = (max_difference + min_difference) / (two * alpha);
                debug!(
                    "Component average converged after {} sweeps",
                    iteration + 1
                );
                return Ok(average);
            }
            // keep the iterate anchored to avoid unbounded drift
            let anchor = x[0];
            for value in x.iter_mut() {
                *value -= anchor;
            }
        }
        Err(Error::NotConverged {
            iterations: self.options.max_iterations,
            last_iterate: x.iter().map(|v| v.to_f64()).collect(),
        })
    }

    /// The LP formulation: optimize λ subject to
    /// `h_s ⋚ Σ_c P(r, c)·h_c + reward(r) − λ` per component choice.
    fn component_average_lp(
        &self,
        direction: OptimizationDirection,
        mec: &MaximalEndComponent,
        choice_rewards: &[T],
        factory: &dyn crate::solver::LpSolverFactory<T>,
    ) -> Result<T> {
        let transitions = self.model.transitions();
        let mut lp = factory.create()?;
        let lambda = lp.add_variable(None, None, T::one());
        let mut variable_of = std::collections::HashMap::new();
        for state in mec.states.ones() {
            variable_of.insert(state, lp.add_variable(None, None, T::zero()));
        }

        let sense = match direction {
            OptimizationDirection::Maximize => ConstraintSense::LessEqual,
            OptimizationDirection::Minimize => ConstraintSense::GreaterEqual,
        };
        for state in mec.states.ones() {
            for row in transitions.rows_of_group(state) {
                if !mec.choices.get(row) {
                    continue;
                }
                // h_s − Σ P·h_c + λ ⋚ reward(r)
                let mut terms = vec![(lambda, T::one())];
                let mut state_coefficient = T::one();
                for (successor, probability) in transitions.row(row) {
                    if successor == state {
                        state_coefficient -= probability;
                    } else {
                        terms.push((variable_of[&successor], -probability));
                    }
                }
                terms.push((variable_of[&state], state_coefficient));
                lp.add_constraint(&terms, sense, choice_rewards[row]);
            }
        }
        match lp.optimize(direction)? {
            crate::solver::LpStatus::Optimal => lp.variable_value(lambda),
            status => Err(Error::BackendFailure(format!(
                "long-run average LP ended with status {:?}",
                status
            ))),
        }
    }
}
