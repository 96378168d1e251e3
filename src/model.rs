//! The sparse MDP model borrowed by the checker.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::numeric::Value;
use crate::storage::{BitSet, SparseMatrix};

/// A named reward structure: per-state rewards, per-choice rewards, or a
/// per-transition reward matrix congruent with the transition matrix. Any
/// combination may be present; they are reduced to a single per-choice
/// vector before solving.
#[derive(Debug, Clone, Default)]
pub struct RewardModel<T> {
    state_rewards: Option<Vec<T>>,
    choice_rewards: Option<Vec<T>>,
    transition_rewards: Option<SparseMatrix<T>>,
}

impl<T: Value> RewardModel<T> {
    pub fn new() -> Self {
        Self {
            state_rewards: None,
            choice_rewards: None,
            transition_rewards: None,
        }
    }

    pub fn with_state_rewards(mut self, rewards: Vec<T>) -> Self {
        self.state_rewards = Some(rewards);
        self
    }

    pub fn with_choice_rewards(mut self, rewards: Vec<T>) -> Self {
        self.choice_rewards = Some(rewards);
        self
    }

    pub fn with_transition_rewards(mut self, rewards: SparseMatrix<T>) -> Self {
        self.transition_rewards = Some(rewards);
        self
    }

    pub fn state_rewards(&self) -> Option<&[T]> {
        self.state_rewards.as_deref()
    }

    pub fn has_state_rewards(&self) -> bool {
        self.state_rewards.is_some()
    }

    /// Reduces all present reward structures to one vector over choices:
    /// the choice reward, plus the owning state's reward, plus the
    /// row-weighted sum of transition rewards.
    pub fn total_choice_rewards(&self, transitions: &SparseMatrix<T>) -> Vec<T> {
        let mut result = vec![T::zero(); transitions.num_rows()];
        if let Some(choice_rewards) = &self.choice_rewards {
            result.copy_from_slice(choice_rewards);
        }
        if let Some(state_rewards) = &self.state_rewards {
            for state in 0..transitions.num_groups() {
                for row in transitions.rows_of_group(state) {
                    result[row] += state_rewards[state];
                }
            }
        }
        if let Some(transition_rewards) = &self.transition_rewards {
            for row in 0..transitions.num_rows() {
                let mut weighted = T::zero();
                let mut reward_entries = transition_rewards.row(row).peekable();
                for (column, probability) in transitions.row(row) {
                    while let Some(&(reward_column, reward)) = reward_entries.peek() {
                        if reward_column < column {
                            reward_entries.next();
                        } else {
                            if reward_column == column {
                                weighted += probability * reward;
                            }
                            break;
                        }
                    }
                }
                result[row] += weighted;
            }
        }
        result
    }

    fn validate(&self, num_states: usize, num_choices: usize) -> Result<()> {
        if let Some(rewards) = &self.state_rewards {
            if rewards.len() != num_states {
                return Err(Error::DimensionMismatch {
                    expected: num_states,
                    actual: rewards.len(),
                });
            }
        }
        if let Some(rewards) = &self.choice_rewards {
            if rewards.len() != num_choices {
                return Err(Error::DimensionMismatch {
                    expected: num_choices,
                    actual: rewards.len(),
                });
            }
        }
        if let Some(rewards) = &self.transition_rewards {
            if rewards.num_rows() != num_choices {
                return Err(Error::DimensionMismatch {
                    expected: num_choices,
                    actual: rewards.num_rows(),
                });
            }
        }
        Ok(())
    }
}

/// A Markov decision process: row-grouped transitions, initial states,
/// atomic-proposition labels over states, optional action labels over
/// choices, and named reward models.
///
/// Models are owned by the caller and borrowed read-only by queries; no
/// query mutates or retains them.
#[derive(Debug, Clone)]
pub struct Mdp<T> {
    transitions: SparseMatrix<T>,
    initial_states: BitSet,
    labels: HashMap<String, BitSet>,
    action_labels: HashMap<String, BitSet>,
    reward_models: HashMap<String, RewardModel<T>>,
}

impl<T: Value> Mdp<T> {
    /// Creates a model from its transition matrix and initial states,
    /// checking the structural invariants: a nonempty initial set, no
    /// deadlock states, nonnegative probabilities and stochastic rows.
    pub fn new(transitions: SparseMatrix<T>, initial_states: BitSet) -> Result<Self> {
        if initial_states.len() != transitions.num_groups() {
            return Err(Error::DimensionMismatch {
                expected: transitions.num_groups(),
                actual: initial_states.len(),
            });
        }
        if initial_states.is_empty() {
            return Err(Error::invalid_argument("no initial state"));
        }
        let tolerance = T::from_f64(1e-6);
        for state in 0..transitions.num_groups() {
            if transitions.rows_of_group(state).is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "state {} is a deadlock; add a self-loop before model checking",
                    state
                )));
            }
            for row in transitions.rows_of_group(state) {
                for (_, probability) in transitions.row(row) {
                    if probability < T::zero() {
                        return Err(Error::InvalidArgument(format!(
                            "negative probability in row {}",
                            row
                        )));
                    }
                }
                let deviation = (transitions.row_sum(row) - T::one()).abs();
                if deviation > tolerance {
                    return Err(Error::InvalidArgument(format!(
                        "row {} does not sum to one",
                        row
                    )));
                }
            }
        }
        Ok(Self {
            transitions,
            initial_states,
            labels: HashMap::new(),
            action_labels: HashMap::new(),
            reward_models: HashMap::new(),
        })
    }

    /// Attaches a state labelling; the bit set must range over all states.
    pub fn add_label<S: Into<String>>(&mut self, name: S, states: BitSet) -> Result<()> {
        if states.len() != self.num_states() {
            return Err(Error::DimensionMismatch {
                expected: self.num_states(),
                actual: states.len(),
            });
        }
        self.labels.insert(name.into(), states);
        Ok(())
    }

    /// Attaches an action labelling over choices. Carried for external
    /// consumers; the checker itself never reads action labels.
    pub fn add_action_label<S: Into<String>>(&mut self, name: S, choices: BitSet) -> Result<()> {
        if choices.len() != self.num_choices() {
            return Err(Error::DimensionMismatch {
                expected: self.num_choices(),
                actual: choices.len(),
            });
        }
        self.action_labels.insert(name.into(), choices);
        Ok(())
    }

    /// Attaches a named reward model after validating its dimensions.
    pub fn add_reward_model<S: Into<String>>(
        &mut self,
        name: S,
        rewards: RewardModel<T>,
    ) -> Result<()> {
        rewards.validate(self.num_states(), self.num_choices())?;
        self.reward_models.insert(name.into(), rewards);
        Ok(())
    }

    pub fn transitions(&self) -> &SparseMatrix<T> {
        &self.transitions
    }

    pub fn num_states(&self) -> usize {
        self.transitions.num_groups()
    }

    pub fn num_choices(&self) -> usize {
        self.transitions.num_rows()
    }

    pub fn initial_states(&self) -> &BitSet {
        &self.initial_states
    }

    /// The states carrying the given label.
    pub fn label(&self, name: &str) -> Result<&BitSet> {
        self.labels
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown label '{}'", name)))
    }

    /// Resolves a reward model reference: a name must exist, and an omitted
    /// name is only allowed while the model has exactly one reward model.
    pub fn reward_model(&self, name: Option<&str>) -> Result<&RewardModel<T>> {
        match name {
            Some(name) => self
                .reward_models
                .get(name)
                .ok_or_else(|| Error::MissingRewardModel(name.to_string())),
            None => {
                if self.reward_models.len() == 1 {
                    Ok(self.reward_models.values().next().unwrap())
                } else {
                    Err(Error::MissingRewardModel(
                        "no reward model name given and the model does not have exactly one"
                            .into(),
                    ))
                }
            }
        }
    }
}
