//! The model checking engine: PCTL and reward queries on sparse MDPs, plus
//! the multi-objective driver.

pub mod formula;

mod conditional;
mod lra;
mod multi;
mod prctl;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::model::Mdp;
use crate::numeric::Value;
use crate::options::CheckOptions;
use crate::solver::{
    OptimizationDirection, Scheduler, SolveContext, SolverEnvironment,
};
use crate::storage::{BitSet, Polytope, SparseMatrix};

use formula::{Bound, ComparisonType, PathFormula, RewardPathFormula, StateFormula};

/// The result of a model checking query.
#[derive(Debug)]
pub enum CheckResult<T> {
    /// A truth value per state, from a bounded operator or a propositional
    /// formula.
    Qualitative(BitSet),
    /// A numeric value per state, with the optimizing scheduler when one
    /// was requested.
    Quantitative {
        values: Vec<T>,
        scheduler: Option<Scheduler>,
    },
    /// The two polytopes of a Pareto query.
    Pareto {
        under: Polytope,
        over: Polytope,
        refinement_steps: u64,
    },
}

impl<T: Value> CheckResult<T> {
    /// The per-state truth values, if this is a qualitative result.
    pub fn truth_values(&self) -> Option<&BitSet> {
        match self {
            Self::Qualitative(values) => Some(values),
            _ => None,
        }
    }

    /// The per-state numeric values, if this is a quantitative result.
    pub fn values(&self) -> Option<&[T]> {
        match self {
            Self::Quantitative { values, .. } => Some(values),
            _ => None,
        }
    }

    /// The synthesized scheduler, if one was produced.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        match self {
            Self::Quantitative { scheduler, .. } => scheduler.as_ref(),
            _ => None,
        }
    }
}

/// A quantitative solve outcome over the full state space.
#[derive(Debug)]
pub(crate) struct QuantitativeResult<T> {
    pub values: Vec<T>,
    pub scheduler: Option<Scheduler>,
}

/// The checker for a borrowed model. All queries are pure functions of the
/// model, the formula and the options; nothing persists between calls.
pub struct ModelChecker<'a, T: Value> {
    model: &'a Mdp<T>,
    environment: SolverEnvironment<T>,
    options: CheckOptions,
}

impl<'a, T: Value> ModelChecker<'a, T> {
    pub fn new(model: &'a Mdp<T>) -> Self {
        Self {
            model,
            environment: SolverEnvironment::default(),
            options: CheckOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_environment(mut self, environment: SolverEnvironment<T>) -> Self {
        self.environment = environment;
        self
    }

    /// Checks a state formula against the model.
    pub fn check(&self, formula: &StateFormula) -> Result<CheckResult<T>> {
        info!("Checking formula on a model with {} states", self.model.num_states());
        let context = QueryContext::new(self.model, &self.environment, &self.options);
        context.check_state_formula(formula)
    }
}

/// Per-query scratch shared by the engine components: the model, the solver
/// environment and the row-indexed backward transitions, computed once.
pub(crate) struct QueryContext<'a, T: Value> {
    pub model: &'a Mdp<T>,
    pub environment: &'a SolverEnvironment<T>,
    pub options: &'a CheckOptions,
    pub backward: SparseMatrix<T>,
}

impl<'a, T: Value> QueryContext<'a, T> {
    pub fn new(
        model: &'a Mdp<T>,
        environment: &'a SolverEnvironment<T>,
        options: &'a CheckOptions,
    ) -> Self {
        let backward = model.transitions().transpose(false);
        Self {
            model,
            environment,
            options,
            backward,
        }
    }

    fn check_state_formula(&self, formula: &StateFormula) -> Result<CheckResult<T>> {
        self.check_cancelled()?;
        match formula {
            StateFormula::True
            | StateFormula::False
            | StateFormula::Label(_)
            | StateFormula::Not(_)
            | StateFormula::And(..)
            | StateFormula::Or(..) => Ok(CheckResult::Qualitative(self.evaluate_states(formula)?)),
            StateFormula::Probability {
                direction,
                bound,
                path,
            } => {
                let result = self.check_path_formula(*direction, path)?;
                self.apply_bound(result, *bound)
            }
            StateFormula::Reward {
                direction,
                bound,
                reward_model,
                path,
            } => {
                let rewards = self.model.reward_model(reward_model.as_deref())?;
                let result = self.check_reward_formula(*direction, rewards, path)?;
                self.apply_bound(result, *bound)
            }
            StateFormula::LongRunAverage {
                direction,
                bound,
                states,
            } => {
                let states = self.evaluate_states(states)?;
                let result = self.long_run_average(*direction, &states)?;
                self.apply_bound(result, *bound)
            }
            StateFormula::ExpectedTime {
                direction,
                bound,
                target,
            } => {
                let target = self.evaluate_states(target)?;
                let unit_rewards = vec![T::one(); self.model.num_choices()];
                let result = self.reachability_reward(*direction, &target, unit_rewards)?;
                self.apply_bound(result, *bound)
            }
            StateFormula::Conditional {
                direction,
                bound,
                path,
                condition,
            } => {
                let result = self.conditional_probabilities(*direction, path, condition)?;
                self.apply_bound(result, *bound)
            }
            StateFormula::MultiObjective(objectives) => self.check_multi_objective(objectives),
        }
    }

    fn check_path_formula(
        &self,
        direction: OptimizationDirection,
        path: &PathFormula,
    ) -> Result<QuantitativeResult<T>> {
        match path {
            PathFormula::Next(target) => {
                let target = self.evaluate_states(target)?;
                self.next_probabilities(direction, &target)
            }
            PathFormula::Until(left, right) => {
                let phi = self.evaluate_states(left)?;
                let psi = self.evaluate_states(right)?;
                self.until_probabilities(direction, &phi, &psi)
            }
            PathFormula::BoundedUntil(left, right, bound) => {
                let phi = self.evaluate_states(left)?;
                let psi = self.evaluate_states(right)?;
                self.bounded_until_probabilities(direction, &phi, &psi, *bound)
            }
            PathFormula::Eventually(target) => {
                let phi = BitSet::full(self.model.num_states());
                let psi = self.evaluate_states(target)?;
                self.until_probabilities(direction, &phi, &psi)
            }
            PathFormula::Globally(body) => {
                // G φ holds with probability 1 − P(F ¬φ) under the dual
                // direction; the dual scheduler is the optimizing one
                let body = self.evaluate_states(body)?;
                let phi = BitSet::full(self.model.num_states());
                let complement = !&body;
                let mut result = self.until_probabilities(!direction, &phi, &complement)?;
                for value in result.values.iter_mut() {
                    *value = T::one() - *value;
                }
                Ok(result)
            }
        }
    }

    fn check_reward_formula(
        &self,
        direction: OptimizationDirection,
        rewards: &crate::model::RewardModel<T>,
        path: &RewardPathFormula,
    ) -> Result<QuantitativeResult<T>> {
        match path {
            RewardPathFormula::Reachability(target) => {
                let target = self.evaluate_states(target)?;
                let choice_rewards = rewards.total_choice_rewards(self.model.transitions());
                self.reachability_reward(direction, &target, choice_rewards)
            }
            RewardPathFormula::Cumulative(steps) => {
                let choice_rewards = rewards.total_choice_rewards(self.model.transitions());
                self.cumulative_reward(direction, choice_rewards, *steps)
            }
            RewardPathFormula::Instantaneous(steps) => {
                let state_rewards = rewards.state_rewards().ok_or_else(|| {
                    Error::invalid_argument(
                        "instantaneous reward queries need a reward model with state rewards",
                    )
                })?;
                self.instantaneous_reward(direction, state_rewards, *steps)
            }
            RewardPathFormula::Total => {
                let choice_rewards = rewards.total_choice_rewards(self.model.transitions());
                self.total_reward(direction, choice_rewards)
            }
        }
    }

    /// Evaluates a formula used as a state predicate into a bit set.
    pub(crate) fn evaluate_states(&self, formula: &StateFormula) -> Result<BitSet> {
        let num_states = self.model.num_states();
        match formula {
            StateFormula::True => Ok(BitSet::full(num_states)),
            StateFormula::False => Ok(BitSet::new(num_states)),
            StateFormula::Label(name) => Ok(self.model.label(name)?.clone()),
            StateFormula::Not(inner) => Ok(!&self.evaluate_states(inner)?),
            StateFormula::And(left, right) => {
                Ok(&self.evaluate_states(left)? & &self.evaluate_states(right)?)
            }
            StateFormula::Or(left, right) => {
                Ok(&self.evaluate_states(left)? | &self.evaluate_states(right)?)
            }
            _ => match self.check_state_formula(formula)? {
                CheckResult::Qualitative(states) => Ok(states),
                _ => Err(Error::unsupported(
                    "an operator without a bound cannot be used as a state predicate",
                )),
            },
        }
    }

    /// Turns a quantitative result into a qualitative one when the operator
    /// carries a bound.
    fn apply_bound(
        &self,
        result: QuantitativeResult<T>,
        bound: Option<Bound>,
    ) -> Result<CheckResult<T>> {
        match bound {
            None => Ok(CheckResult::Quantitative {
                values: result.values,
                scheduler: result.scheduler,
            }),
            Some(bound) => {
                if bound.comparison == ComparisonType::Less && bound.threshold == 0.0 {
                    return Err(Error::invalid_argument(
                        "a bound below zero can never be satisfied",
                    ));
                }
                let mut satisfied = BitSet::new(result.values.len());
                for (state, value) in result.values.iter().enumerate() {
                    if bound.check(value.to_f64()) {
                        satisfied.insert(state);
                    }
                }
                debug!("{} states satisfy the bound {}", satisfied.count(), bound);
                Ok(CheckResult::Qualitative(satisfied))
            }
        }
    }

    /// Builds the per-solve parameters from the query options.
    pub(crate) fn solve_context(&self) -> SolveContext<'_, T> {
        let mut context = SolveContext::new(
            T::from_f64(self.options.precision),
            self.options.relative,
            self.options.max_iterations,
        );
        context.track_scheduler = self.options.produce_scheduler;
        context.cancellation = self.options.cancellation.as_ref();
        context
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match &self.options.cancellation {
            Some(flag) if flag.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}
