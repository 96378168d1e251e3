//! The weighted-sum checker: one scalarized solve per refinement step.
//!
//! The combined reward `Σ_i w_i·r_i` is maximized as a total reward on the
//! preprocessed model whose zero-rewarded end components were collapsed
//! once up front. The induced scheduler is then evaluated against every
//! objective separately, yielding the lower point; the upper point adds the
//! solver precision so the weighted gap stays within the adapted precision.

use log::debug;

use crate::checker::multi::preprocess::PreprocessedQuery;
use crate::checker::QueryContext;
use crate::error::{Error, Result};
use crate::graph::{self, EliminationResult};
use crate::numeric::Value;
use crate::solver::{OptimizationDirection, Scheduler, SolveContext};
use crate::storage::{BitSet, Point, SparseMatrix, SparseMatrixBuilder};

pub(crate) struct WeightVectorChecker<'a, T: Value> {
    context: &'a QueryContext<'a, T>,
    query: &'a PreprocessedQuery<T>,
    elimination: EliminationResult<T>,
    /// Initial state in the eliminated state space.
    reduced_initial: usize,
}

/// The two points returned by one weighted-sum call: the scheduler-induced
/// value vector and its precision-padded over-estimate, both in driver
/// space.
pub(crate) struct WeightedCheckResult {
    pub lower: Point,
    pub upper: Point,
}

impl<'a, T: Value> WeightVectorChecker<'a, T> {
    pub(crate) fn new(
        context: &'a QueryContext<'a, T>,
        query: &'a PreprocessedQuery<T>,
    ) -> Result<Self> {
        let transitions = query.model.transitions();
        let num_states = query.model.num_states();
        // choices rewarded by no objective are eligible to form collapsed
        // end components
        let mut zero_choices = BitSet::new(transitions.num_rows());
        for row in 0..transitions.num_rows() {
            let zero_everywhere = query
                .objectives
                .iter()
                .all(|objective| objective.choice_rewards[row].is_zero());
            if zero_everywhere {
                zero_choices.insert(row);
            }
        }
        let subsystem = BitSet::full(num_states);
        let possibly_recurrent = BitSet::full(num_states);
        let elimination = graph::eliminate_end_components(
            transitions,
            &subsystem,
            &zero_choices,
            &possibly_recurrent,
        )?;
        debug!(
            "Weighted checker operates on {} states after end component elimination",
            elimination.matrix.num_groups()
        );
        let reduced_initial = elimination.old_to_new_state[query.initial_state];
        Ok(Self {
            context,
            query,
            elimination,
            reduced_initial,
        })
    }

    /// Runs the weighted-sum query for normalized weights, solved to the
    /// given weighted precision.
    pub(crate) fn check(
        &self,
        weights: &[f64],
        weighted_precision: f64,
    ) -> Result<WeightedCheckResult> {
        let reduced = &self.elimination.matrix;
        let num_objectives = self.query.objectives.len();

        // combined reward on the eliminated rows
        let mut combined = vec![T::zero(); reduced.num_rows()];
        for (objective, &weight) in self.query.objectives.iter().zip(weights) {
            if weight == 0.0 {
                continue;
            }
            let factor = T::from_f64(weight);
            for (new_row, old_row) in self.elimination.new_to_old_row.iter().enumerate() {
                if let Some(old_row) = old_row {
                    combined[new_row] += factor * objective.choice_rewards[*old_row];
                }
            }
        }

        let solve_precision = weighted_precision / 2.0;
        let mut solve_context = SolveContext::new(
            T::from_f64(solve_precision),
            false,
            self.context.options.max_iterations,
        )
        .with_scheduler(true);
        solve_context.cancellation = self.context.options.cancellation.as_ref();

        let mut x = vec![T::zero(); reduced.num_groups()];
        let mut solver = self
            .context
            .environment
            .minmax_solver(self.context.options.technique);
        let scheduler = solver
            .solve(
                OptimizationDirection::Maximize,
                reduced,
                &mut x,
                &combined,
                &solve_context,
            )?
            .ok_or_else(|| Error::BackendFailure("weighted solve produced no scheduler".into()))?;

        // evaluate the induced scheduler against each objective separately
        let (induced, induced_rows) = self.induced_system(reduced, &scheduler);
        let linear_solver = self.context.environment.linear_equation_factory().create();
        let mut lower = Point::default();
        let mut upper = Point::default();
        let objective_offset = solve_precision / (num_objectives as f64).sqrt();
        for objective in &self.query.objectives {
            let b: Vec<T> = induced_rows
                .iter()
                .map(|old_row| {
                    old_row.map_or(T::zero(), |row| objective.choice_rewards[row])
                })
                .collect();
            let mut values = vec![T::zero(); induced.num_rows()];
            linear_solver.solve_fixed_point(&induced, &mut values, &b)?;
            let value = values[self.reduced_initial].to_f64();
            lower.push(value);
            upper.push(value + objective_offset);
        }
        debug!(
            "Weighted check with weights {:?} found lower point {:?}",
            weights, lower
        );
        Ok(WeightedCheckResult { lower, upper })
    }

    /// The deterministic system induced by the scheduler on the eliminated
    /// matrix, with synthetic stay-inside rows made absorbing so the system
    /// has a unique fixed point. Also returns each induced row's original
    /// row.
    fn induced_system(
        &self,
        reduced: &SparseMatrix<T>,
        scheduler: &Scheduler,
    ) -> (SparseMatrix<T>, Vec<Option<usize>>) {
        let mut builder = SparseMatrixBuilder::new(reduced.num_groups());
        let mut induced_rows = Vec::with_capacity(reduced.num_groups());
        for state in 0..reduced.num_groups() {
            let row = reduced.rows_of_group(state).start + scheduler[state] as usize;
            builder.new_row_group();
            builder.new_row();
            induced_rows.push(self.elimination.new_to_old_row[row]);
            if self.elimination.new_to_old_row[row].is_some() {
                for (column, value) in reduced.row(row) {
                    builder.push_entry(column, value);
                }
            }
            // synthetic self-loops accrue nothing and stay forever, so the
            // induced value is zero: leave the row empty
        }
        (builder.build(), induced_rows)
    }

}

/// Normalizes a weight vector so its entries sum to one.
pub(crate) fn normalize_weights(weights: &mut [f64]) {
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        for weight in weights.iter_mut() {
            *weight /= sum;
        }
    }
}

/// Distributes the multi-objective precision onto one weighted call, as a
/// fraction of the Euclidean weight norm.
pub(crate) fn adapted_precision(weights: &[f64], precision: f64, optimizing: Option<usize>) -> f64 {
    let norm = vector_norm(weights);
    match optimizing {
        Some(index) if weights[index] > 0.0 => {
            (weights[index] * precision / (2.0 * norm)).max(precision * 1e-6)
        }
        _ => precision / 2.0,
    }
}

pub(crate) fn vector_norm(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum::<f64>().sqrt()
}
