//! The multi-objective driver: weighted-sum scalarization with convex
//! under- and over-approximations of the achievable set.

pub(crate) mod preprocess;
pub(crate) mod weighted;

use log::{debug, info, warn};

use crate::checker::formula::StateFormula;
use crate::checker::{CheckResult, QueryContext};
use crate::error::{Error, Result};
use crate::export;
use crate::numeric::Value;
use crate::storage::{dot, point_from, BitSet, Halfspace, Point, Polytope};

use preprocess::PreparedObjective;
use weighted::{adapted_precision, normalize_weights, vector_norm, WeightVectorChecker};

/// The three flavors of multi-objective queries, classified from which
/// objectives carry thresholds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum QueryKind {
    /// Every objective has a threshold: does one scheduler meet them all?
    Achievability,
    /// One free objective is optimized subject to the other thresholds.
    Quantitative(usize),
    /// No thresholds: approximate the Pareto frontier.
    Pareto,
}

impl<'a, T: Value> QueryContext<'a, T> {
    pub(crate) fn check_multi_objective(
        &self,
        objectives: &[StateFormula],
    ) -> Result<CheckResult<T>> {
        let query = self.preprocess_multi_objective(objectives)?;
        let checker = WeightVectorChecker::new(self, &query)?;
        let kind = classify(&query.objectives)?;
        let dimension = query.objectives.len();
        info!(
            "Multi-objective query ({:?}) over {} objectives",
            kind, dimension
        );

        let precision = self.options.precision;
        let mut under = Polytope::empty(dimension);
        let mut over = Polytope::universe(dimension);
        let mut pending_dirac = BitSet::full(dimension);
        let mut used_directions: Vec<(Vec<f64>, f64)> = Vec::new();
        let thresholds: Vec<(usize, f64)> = query
            .objectives
            .iter()
            .enumerate()
            .filter_map(|(index, objective)| {
                objective.threshold.map(|(threshold, _)| (index, threshold))
            })
            .collect();
        let threshold_point: Point = query
            .objectives
            .iter()
            .map(|objective| objective.threshold.map_or(0.0, |(threshold, _)| threshold))
            .collect();

        let mut steps = 0u64;
        while steps < self.options.multi_objective_max_steps {
            self.check_cancelled()?;

            // pick the next weight vector: queued dirac vectors first, then
            // the most informative separating direction
            let mut weights = if let Some(index) = pending_dirac.first_set() {
                pending_dirac.remove(index);
                let mut weights = vec![0.0; dimension];
                weights[index] = 1.0;
                weights
            } else {
                match self.next_direction(kind, &under, &over, &threshold_point, &thresholds, precision) {
                    NextDirection::Refine(weights) => weights,
                    // no direction separates any further; conclude from the
                    // current approximations
                    NextDirection::Done => match kind {
                        QueryKind::Achievability => {
                            return Ok(
                                self.achievability_result(under.contains(&threshold_point))
                            );
                        }
                        QueryKind::Quantitative(optimizing) => {
                            let constraints: Vec<(usize, f64)> = thresholds
                                .iter()
                                .filter(|(index, _)| *index != optimizing)
                                .cloned()
                                .collect();
                            match under.optimize_coordinate(optimizing, &constraints) {
                                Some(lower) => {
                                    return Ok(self.quantitative_result(
                                        &query.objectives[optimizing],
                                        lower,
                                    ))
                                }
                                None => break,
                            }
                        }
                        QueryKind::Pareto => {
                            return self.pareto_result(&query.objectives, under, over, steps)
                        }
                    },
                }
            };
            normalize_weights(&mut weights);
            if let Some(index) = dirac_index(&weights) {
                pending_dirac.remove(index);
            }

            // repeating a direction tightens the allowed weighted gap
            let optimizing = match kind {
                QueryKind::Quantitative(index) => Some(index),
                _ => None,
            };
            let mut weighted_precision = adapted_precision(&weights, precision, optimizing);
            if let Some((_, previous)) = used_directions
                .iter()
                .rev()
                .find(|(direction, _)| direction == &weights)
            {
                warn!("Performing multiple refinement steps with the same direction");
                weighted_precision = weighted_precision.min(previous * 0.5);
            }
            used_directions.push((weights.clone(), weighted_precision));

            let result = checker.check(&weights, weighted_precision)?;
            steps += 1;
            debug!(
                "Refinement step {} with weights {:?}: lower {:?}",
                steps, weights, result.lower
            );

            // over := over ∩ {x : w·x ≤ w·upper}, shifted if numeric slop
            // would exclude the under-approximation
            let mut offset = dot(&weights, &result.upper);
            let mut maximum_violation = dot(&weights, &result.lower);
            for achieved in under.points() {
                maximum_violation = maximum_violation.max(dot(&weights, achieved));
            }
            if maximum_violation > offset {
                warn!(
                    "Shifting a supporting halfspace by {} to keep the approximations nested",
                    maximum_violation - offset
                );
                offset = maximum_violation;
            }
            over.intersect_halfspace(Halfspace::new(point_from(&weights), offset));
            under.insert_point(result.lower.clone());

            // termination by query kind
            match kind {
                QueryKind::Achievability => {
                    if under.contains(&threshold_point) {
                        return Ok(self.achievability_result(true));
                    }
                    if !over.contains(&threshold_point) {
                        return Ok(self.achievability_result(false));
                    }
                }
                QueryKind::Quantitative(optimizing) => {
                    let constraints: Vec<(usize, f64)> = thresholds
                        .iter()
                        .filter(|(index, _)| *index != optimizing)
                        .cloned()
                        .collect();
                    let lower = under.optimize_coordinate(optimizing, &constraints);
                    let upper = over.optimize_coordinate(optimizing, &constraints);
                    if let (Some(lower), Some(upper)) = (lower, upper) {
                        debug!("Quantitative bounds [{}, {}]", lower, upper);
                        if upper - lower <= precision {
                            return Ok(self.quantitative_result(
                                &query.objectives[optimizing],
                                lower,
                            ));
                        }
                    }
                }
                QueryKind::Pareto => {
                    if pending_dirac.is_empty()
                        && pareto_gap(&under, &over) <= precision
                    {
                        return self.pareto_result(&query.objectives, under, over, steps);
                    }
                }
            }
        }

        let best_lower = under
            .points()
            .iter()
            .map(|p| p.to_vec())
            .next_back();
        Err(Error::PrecisionNotReached {
            precision,
            steps,
            lower: best_lower,
            upper: None,
        })
    }

    fn next_direction(
        &self,
        kind: QueryKind,
        under: &Polytope,
        over: &Polytope,
        threshold_point: &Point,
        thresholds: &[(usize, f64)],
        precision: f64,
    ) -> NextDirection {
        match kind {
            QueryKind::Achievability => {
                match under.separating_halfspace(threshold_point) {
                    Some(halfspace) => NextDirection::Refine(halfspace.normal.to_vec()),
                    // the thresholds are inside the under-approximation;
                    // the caller's membership check will conclude
                    None => NextDirection::Done,
                }
            }
            QueryKind::Quantitative(optimizing) => {
                let constraints: Vec<(usize, f64)> = thresholds
                    .iter()
                    .filter(|(index, _)| *index != optimizing)
                    .cloned()
                    .collect();
                let upper = over.optimize_coordinate(optimizing, &constraints);
                let mut target = threshold_point.clone();
                if let Some(upper) = upper {
                    target[optimizing] = upper;
                }
                match under.separating_halfspace(&target) {
                    Some(halfspace) => NextDirection::Refine(halfspace.normal.to_vec()),
                    None => NextDirection::Done,
                }
            }
            QueryKind::Pareto => {
                // refine along the over-approximation facet farthest from
                // the under-approximation
                let mut best: Option<(f64, Vec<f64>)> = None;
                for halfspace in over.halfspaces() {
                    let support = match under.support(&halfspace.normal) {
                        Some(support) => support,
                        None => continue,
                    };
                    let gap =
                        (halfspace.offset - support) / vector_norm(&halfspace.normal);
                    if gap > precision
                        && best.as_ref().map_or(true, |(best_gap, _)| gap > *best_gap)
                    {
                        best = Some((gap, halfspace.normal.to_vec()));
                    }
                }
                match best {
                    Some((_, normal)) => NextDirection::Refine(normal),
                    None => NextDirection::Done,
                }
            }
        }
    }

    fn achievability_result(&self, achievable: bool) -> CheckResult<T> {
        let mut satisfied = BitSet::new(self.model.num_states());
        if achievable {
            satisfied.union_with(self.model.initial_states());
        }
        CheckResult::Qualitative(satisfied)
    }

    fn quantitative_result(
        &self,
        objective: &PreparedObjective<T>,
        driver_value: f64,
    ) -> CheckResult<T> {
        let user_value = T::from_f64(objective.to_user_space(driver_value));
        let mut values = vec![T::zero(); self.model.num_states()];
        for state in self.model.initial_states().ones() {
            values[state] = user_value;
        }
        CheckResult::Quantitative {
            values,
            scheduler: None,
        }
    }

    fn pareto_result(
        &self,
        objectives: &[PreparedObjective<T>],
        under: Polytope,
        over: Polytope,
        steps: u64,
    ) -> Result<CheckResult<T>> {
        let under_user = transform_downward_closure(&under, objectives);
        let over_user = transform_halfspaces(&over, objectives);
        if let Some(directory) = &self.options.plot_directory {
            if objectives.len() == 2 {
                export::export_pareto_plot(directory, &under_user, &over_user)?;
            }
        }
        Ok(CheckResult::Pareto {
            under: under_user,
            over: over_user,
            refinement_steps: steps,
        })
    }
}

enum NextDirection {
    Refine(Vec<f64>),
    Done,
}

fn classify<T: Value>(objectives: &[PreparedObjective<T>]) -> Result<QueryKind> {
    let unconstrained: Vec<usize> = objectives
        .iter()
        .enumerate()
        .filter_map(|(index, objective)| objective.threshold.is_none().then(|| index))
        .collect();
    match unconstrained.len() {
        0 => Ok(QueryKind::Achievability),
        1 => Ok(QueryKind::Quantitative(unconstrained[0])),
        n if n == objectives.len() => Ok(QueryKind::Pareto),
        _ => Err(Error::unsupported(
            "multi-objective queries optimize either one objective or all of them",
        )),
    }
}

fn dirac_index(weights: &[f64]) -> Option<usize> {
    let mut nonzero = weights.iter().enumerate().filter(|(_, &w)| w != 0.0);
    match (nonzero.next(), nonzero.next()) {
        (Some((index, _)), None) => Some(index),
        _ => None,
    }
}

/// The maximum normalized offset gap between the approximations.
fn pareto_gap(under: &Polytope, over: &Polytope) -> f64 {
    let mut gap: f64 = 0.0;
    for halfspace in over.halfspaces() {
        if let Some(support) = under.support(&halfspace.normal) {
            gap = gap
                .max((halfspace.offset - support) / vector_norm(&halfspace.normal));
        }
    }
    gap
}

/// Maps a driver-space downward closure into user space through the
/// per-objective affine transformations.
fn transform_downward_closure<T: Value>(
    polytope: &Polytope,
    objectives: &[PreparedObjective<T>],
) -> Polytope {
    let points: Vec<Point> = polytope
        .points()
        .iter()
        .map(|point| {
            point
                .iter()
                .zip(objectives)
                .map(|(&value, objective)| objective.to_user_space(value))
                .collect()
        })
        .collect();
    let mut result = Polytope::empty(objectives.len());
    for point in points {
        result.insert_point(point);
    }
    result
}

/// Maps driver-space halfspaces into user space: with
/// `driver_i = (user_i − offset_i)/factor_i`, the halfspace `w·v ≤ c`
/// becomes `Σ (w_i/f_i)·u_i ≤ c + Σ w_i·o_i/f_i`. Degenerate objectives
/// (`factor = 0`) have a constant zero driver coordinate and drop out.
fn transform_halfspaces<T: Value>(
    polytope: &Polytope,
    objectives: &[PreparedObjective<T>],
) -> Polytope {
    let mut result = Polytope::universe(objectives.len());
    for halfspace in polytope.halfspaces() {
        let mut normal = Point::default();
        let mut offset = halfspace.offset;
        for (weight, objective) in halfspace.normal.iter().zip(objectives) {
            if objective.factor == 0.0 {
                normal.push(0.0);
            } else {
                normal.push(weight / objective.factor);
                offset += weight * objective.offset / objective.factor;
            }
        }
        result.intersect_halfspace(Halfspace::new(normal, offset));
    }
    result
}
