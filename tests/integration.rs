//! Integration tests that check concrete models end to end, verifying both
//! the numeric values and the identity of the synthesized schedulers.

use tyto::formula::{Bound, ComparisonType, PathFormula, RewardPathFormula, StateFormula};
use tyto::storage::{BitSet, SparseMatrixBuilder};
use tyto::{
    check, check_with, CancellationFlag, CheckOptions, CheckResult, Error, Mdp,
    OptimizationDirection::{Maximize, Minimize},
    RewardModel,
};

const EPSILON: f64 = 1e-6;

/// The three-state MDP used throughout: state 0 chooses between a fair coin
/// flip over {0, 1} and a sure step to state 2; states 1 and 2 are
/// absorbing. Label `target` marks state 2, reward model `cost` charges the
/// coin flip.
fn three_state_mdp() -> Mdp<f64> {
    let mut builder = SparseMatrixBuilder::new(3);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(0, 0.5);
    builder.push_entry(1, 0.5);
    builder.new_row();
    builder.push_entry(2, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(2, 1.0);

    let mut model = Mdp::new(builder.build(), BitSet::from_indices(3, vec![0])).unwrap();
    model
        .add_label("target", BitSet::from_indices(3, vec![2]))
        .unwrap();
    model.add_label("dead", BitSet::new(3)).unwrap();
    model
        .add_reward_model(
            "cost",
            RewardModel::new().with_choice_rewards(vec![1.0, 0.0, 0.0, 0.0]),
        )
        .unwrap();
    model
}

fn eventually_target() -> PathFormula {
    PathFormula::eventually(StateFormula::label("target"))
}

/// Checks a quantitative formula and verifies the value at every state.
fn verify_values(model: &Mdp<f64>, formula: &StateFormula, expected: &[f64]) {
    let result = check(model, formula).unwrap();
    let values = result.values().expect("expected a quantitative result");
    assert_eq!(values.len(), expected.len());
    for (state, (&value, &wanted)) in values.iter().zip(expected).enumerate() {
        if wanted.is_infinite() {
            assert!(value.is_infinite(), "state {}: expected ∞, got {}", state, value);
        } else {
            assert!(
                (value - wanted).abs() < EPSILON,
                "state {}: expected {}, got {}",
                state,
                wanted,
                value
            );
        }
    }
}

/// Checks a quantitative formula with scheduler synthesis and verifies the
/// value and the chosen local index at the given state.
fn verify_scheduler_choice(
    model: &Mdp<f64>,
    formula: &StateFormula,
    state: usize,
    expected_value: f64,
    expected_choice: u64,
) {
    let options = CheckOptions {
        produce_scheduler: true,
        ..CheckOptions::default()
    };
    let result = check_with(model, formula, options).unwrap();
    let values = result.values().expect("expected a quantitative result");
    assert!((values[state] - expected_value).abs() < EPSILON);
    let scheduler = result.scheduler().expect("expected a scheduler");
    assert_eq!(scheduler[state], expected_choice);
}

#[test]
fn test_unbounded_reachability() {
    let model = three_state_mdp();
    verify_values(
        &model,
        &StateFormula::probability(Maximize, eventually_target()),
        &[1.0, 0.0, 1.0],
    );
    verify_values(
        &model,
        &StateFormula::probability(Minimize, eventually_target()),
        &[0.0, 0.0, 1.0],
    );
}

#[test]
fn test_reachability_schedulers() {
    let model = three_state_mdp();
    // the minimizer flips the coin forever, the maximizer steps across
    verify_scheduler_choice(
        &model,
        &StateFormula::probability(Minimize, eventually_target()),
        0,
        0.0,
        0,
    );
    verify_scheduler_choice(
        &model,
        &StateFormula::probability(Maximize, eventually_target()),
        0,
        1.0,
        1,
    );
}

#[test]
fn test_scheduler_soundness() {
    // applying the synthesized maximizing scheduler must reproduce the
    // optimal values in the induced deterministic model
    let model = three_state_mdp();
    let options = CheckOptions {
        produce_scheduler: true,
        ..CheckOptions::default()
    };
    let formula = StateFormula::probability(Maximize, eventually_target());
    let result = check_with(&model, &formula, options).unwrap();
    let values = result.values().unwrap().to_vec();
    let scheduler = result.scheduler().unwrap();

    let induced = model
        .transitions()
        .restrict_to_scheduler(scheduler, false)
        .unwrap();
    let mut builder_model = Mdp::new(induced, model.initial_states().clone()).unwrap();
    builder_model
        .add_label("target", BitSet::from_indices(3, vec![2]))
        .unwrap();
    let induced_result = check(&builder_model, &formula).unwrap();
    for (a, b) in induced_result.values().unwrap().iter().zip(&values) {
        assert!((a - b).abs() < EPSILON);
    }
}

#[test]
fn test_bounded_reachability() {
    let model = three_state_mdp();
    let bounded = |steps| {
        StateFormula::probability(
            Maximize,
            PathFormula::bounded_until(StateFormula::True, StateFormula::label("target"), steps),
        )
    };
    verify_values(&model, &bounded(1), &[1.0, 0.0, 1.0]);
    verify_values(&model, &bounded(0), &[0.0, 0.0, 1.0]);
}

#[test]
fn test_globally_complement() {
    let model = three_state_mdp();
    // P_min(G ¬target) = 1 − P_max(F target)
    let globally = StateFormula::probability(
        Minimize,
        PathFormula::globally(StateFormula::not(StateFormula::label("target"))),
    );
    verify_values(&model, &globally, &[0.0, 1.0, 0.0]);
}

#[test]
fn test_next() {
    let model = three_state_mdp();
    verify_values(
        &model,
        &StateFormula::probability(Maximize, PathFormula::next(StateFormula::label("target"))),
        &[1.0, 0.0, 1.0],
    );
    verify_values(
        &model,
        &StateFormula::probability(Minimize, PathFormula::next(StateFormula::label("target"))),
        &[0.0, 0.0, 1.0],
    );
}

#[test]
fn test_reachability_reward() {
    let model = three_state_mdp();
    let reward = |direction| {
        StateFormula::reward(
            direction,
            Some("cost".into()),
            RewardPathFormula::Reachability(Box::new(StateFormula::label("target"))),
        )
    };
    // the minimizer steps across immediately and pays nothing
    verify_scheduler_choice(&model, &reward(Minimize), 0, 0.0, 1);
    // the maximizer flips the coin forever
    verify_values(&model, &reward(Maximize), &[f64::INFINITY, f64::INFINITY, 0.0]);
}

#[test]
fn test_expected_time() {
    let model = three_state_mdp();
    let formula = StateFormula::ExpectedTime {
        direction: Minimize,
        bound: None,
        target: Box::new(StateFormula::label("target")),
    };
    let result = check(&model, &formula).unwrap();
    assert!((result.values().unwrap()[0] - 1.0).abs() < EPSILON);
}

#[test]
fn test_cumulative_and_instantaneous_reward() {
    let model = three_state_mdp();
    let cumulative = StateFormula::reward(
        Maximize,
        Some("cost".into()),
        RewardPathFormula::Cumulative(3),
    );
    // flipping the coin pays 1, then on average half the mass keeps paying
    verify_values(&model, &cumulative, &[1.75, 0.0, 0.0]);

    let mut model_with_state_rewards = three_state_mdp();
    model_with_state_rewards
        .add_reward_model(
            "occupancy",
            RewardModel::new().with_state_rewards(vec![0.0, 1.0, 0.0]),
        )
        .unwrap();
    let instantaneous = StateFormula::reward(
        Maximize,
        Some("occupancy".into()),
        RewardPathFormula::Instantaneous(1),
    );
    verify_values(&model_with_state_rewards, &instantaneous, &[0.5, 1.0, 0.0]);
}

#[test]
fn test_long_run_average_cycle() {
    // deterministic two-state cycle: half the time is spent in state 1
    let mut builder = SparseMatrixBuilder::new(2);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(0, 1.0);
    let mut model = Mdp::new(builder.build(), BitSet::from_indices(2, vec![0])).unwrap();
    model
        .add_label("observed", BitSet::from_indices(2, vec![1]))
        .unwrap();

    let formula = StateFormula::LongRunAverage {
        direction: Maximize,
        bound: None,
        states: Box::new(StateFormula::label("observed")),
    };
    verify_values(&model, &formula, &[0.5, 0.5]);
}

#[test]
fn test_long_run_average_choice() {
    // state 0 may stay (observed forever) or move to the unobserved sink
    let mut builder = SparseMatrixBuilder::new(2);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(0, 1.0);
    builder.new_row();
    builder.push_entry(1, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 1.0);
    let mut model = Mdp::new(builder.build(), BitSet::from_indices(2, vec![0])).unwrap();
    model
        .add_label("observed", BitSet::from_indices(2, vec![0]))
        .unwrap();

    let lra = |direction| StateFormula::LongRunAverage {
        direction,
        bound: None,
        states: Box::new(StateFormula::label("observed")),
    };
    verify_values(&model, &lra(Maximize), &[1.0, 0.0]);
    verify_values(&model, &lra(Minimize), &[0.0, 0.0]);
}

#[test]
fn test_conditional_probability() {
    let model = three_state_mdp();
    let conditional = StateFormula::Conditional {
        direction: Maximize,
        bound: None,
        path: eventually_target(),
        condition: eventually_target(),
    };
    let result = check(&model, &conditional).unwrap();
    assert!((result.values().unwrap()[0] - 1.0).abs() < EPSILON);

    // an unsatisfiable condition makes the query undefined
    let undefined = StateFormula::Conditional {
        direction: Maximize,
        bound: None,
        path: eventually_target(),
        condition: PathFormula::eventually(StateFormula::label("dead")),
    };
    let result = check(&model, &undefined).unwrap();
    assert!(result.values().unwrap()[0].is_infinite());
}

#[test]
fn test_bounded_operator_yields_truth_values() {
    let model = three_state_mdp();
    let formula = StateFormula::probability_bounded(
        Maximize,
        Bound::new(ComparisonType::GreaterEqual, 0.5),
        eventually_target(),
    );
    let result = check(&model, &formula).unwrap();
    let truth = result.truth_values().expect("expected a qualitative result");
    assert_eq!(truth, &BitSet::from_indices(3, vec![0, 2]));
}

#[test]
fn test_qualitative_only_shortcut() {
    // a coin flip between the dead end and the target leaves state 0
    // undecided; the shortcut marks it with one half instead of solving
    let mut builder = SparseMatrixBuilder::new(3);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 0.5);
    builder.push_entry(2, 0.5);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(2, 1.0);
    let mut model = Mdp::new(builder.build(), BitSet::from_indices(3, vec![0])).unwrap();
    model
        .add_label("target", BitSet::from_indices(3, vec![2]))
        .unwrap();

    let options = CheckOptions {
        qualitative_only: true,
        ..CheckOptions::default()
    };
    let formula = StateFormula::probability(Maximize, eventually_target());
    let result = check_with(&model, &formula, options).unwrap();
    let values = result.values().unwrap();
    assert!((values[0] - 0.5).abs() < EPSILON);
    assert!((values[1] - 0.0).abs() < EPSILON);
    assert!((values[2] - 1.0).abs() < EPSILON);
}

#[test]
fn test_multi_objective_achievability() {
    let model = three_state_mdp();
    // some scheduler reaches the target with probability at least one half
    // while paying at most two in expectation
    let objectives = StateFormula::MultiObjective(vec![
        StateFormula::probability_bounded(
            Maximize,
            Bound::new(ComparisonType::GreaterEqual, 0.5),
            eventually_target(),
        ),
        StateFormula::Reward {
            direction: Minimize,
            bound: Some(Bound::new(ComparisonType::LessEqual, 2.0)),
            reward_model: Some("cost".into()),
            path: RewardPathFormula::Reachability(Box::new(StateFormula::label("target"))),
        },
    ]);
    let result = check(&model, &objectives).unwrap();
    let truth = result.truth_values().expect("expected a qualitative result");
    assert!(truth.get(0), "thresholds should be achievable");

    // demanding certain reachability at zero cost is not achievable
    let impossible = StateFormula::MultiObjective(vec![
        StateFormula::probability_bounded(
            Maximize,
            Bound::new(ComparisonType::GreaterEqual, 1.0),
            PathFormula::eventually(StateFormula::label("dead")),
        ),
        StateFormula::Reward {
            direction: Minimize,
            bound: Some(Bound::new(ComparisonType::LessEqual, 2.0)),
            reward_model: Some("cost".into()),
            path: RewardPathFormula::Reachability(Box::new(StateFormula::label("target"))),
        },
    ]);
    let result = check(&model, &impossible).unwrap();
    let truth = result.truth_values().unwrap();
    assert!(!truth.get(0));
}

#[test]
fn test_multi_objective_quantitative() {
    let model = three_state_mdp();
    // the best reachability probability with expected cost at most one half
    // is still one: step across immediately for free
    let objectives = StateFormula::MultiObjective(vec![
        StateFormula::probability(Maximize, eventually_target()),
        StateFormula::Reward {
            direction: Minimize,
            bound: Some(Bound::new(ComparisonType::LessEqual, 0.5)),
            reward_model: Some("cost".into()),
            path: RewardPathFormula::Reachability(Box::new(StateFormula::label("target"))),
        },
    ]);
    let result = check(&model, &objectives).unwrap();
    let values = result.values().expect("expected a quantitative result");
    assert!((values[0] - 1.0).abs() < 1e-4);
}

/// The split MDP of the Pareto scenario: one initial choice that reaches
/// `a` with probability 0.3 and `b` with probability 0.7.
fn split_mdp() -> Mdp<f64> {
    let mut builder = SparseMatrixBuilder::new(3);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 0.3);
    builder.push_entry(2, 0.7);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(2, 1.0);
    let mut model = Mdp::new(builder.build(), BitSet::from_indices(3, vec![0])).unwrap();
    model.add_label("a", BitSet::from_indices(3, vec![1])).unwrap();
    model.add_label("b", BitSet::from_indices(3, vec![2])).unwrap();
    model
}

#[test]
fn test_multi_objective_pareto() {
    let model = split_mdp();
    let objectives = StateFormula::MultiObjective(vec![
        StateFormula::probability(Maximize, PathFormula::eventually(StateFormula::label("a"))),
        StateFormula::probability(Maximize, PathFormula::eventually(StateFormula::label("b"))),
    ]);
    let result = check(&model, &objectives).unwrap();
    match result {
        CheckResult::Pareto {
            under,
            over,
            refinement_steps,
        } => {
            assert!(refinement_steps >= 2);
            // the single achievable point is (0.3, 0.7)
            assert!(under.contains(&[0.3 - 1e-4, 0.7 - 1e-4]));
            assert!(over.contains(&[0.3, 0.7]));
            assert!(!over.contains(&[0.5, 0.7]));
            // the sandwich property: everything in under lies in over
            for point in under.points() {
                assert!(over.contains(point));
            }
        }
        other => panic!("expected a Pareto result, got {:?}", other),
    }
}

#[test]
fn test_pareto_plot_export() {
    let directory = tempfile::tempdir().unwrap();
    let model = split_mdp();
    let objectives = StateFormula::MultiObjective(vec![
        StateFormula::probability(Maximize, PathFormula::eventually(StateFormula::label("a"))),
        StateFormula::probability(Maximize, PathFormula::eventually(StateFormula::label("b"))),
    ]);
    let options = CheckOptions {
        plot_directory: Some(directory.path().to_path_buf()),
        ..CheckOptions::default()
    };
    check_with(&model, &objectives, options).unwrap();

    for name in &[
        "underapproximation.csv",
        "overapproximation.csv",
        "paretopoints.csv",
    ] {
        let content = std::fs::read_to_string(directory.path().join(name)).unwrap();
        assert!(!content.is_empty(), "{} should not be empty", name);
        let first_line = content.lines().next().unwrap();
        let coordinates: Vec<f64> = first_line
            .split(',')
            .map(|part| part.parse().unwrap())
            .collect();
        assert_eq!(coordinates.len(), 2);
    }
}

#[test]
fn test_max_dominates_min() {
    // a lopsided random walk with nondeterministic restarts
    let mut builder = SparseMatrixBuilder::new(4);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 0.6);
    builder.push_entry(2, 0.4);
    builder.new_row();
    builder.push_entry(3, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(0, 0.5);
    builder.push_entry(3, 0.5);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(2, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(3, 1.0);
    let mut model = Mdp::new(builder.build(), BitSet::from_indices(4, vec![0])).unwrap();
    model
        .add_label("target", BitSet::from_indices(4, vec![3]))
        .unwrap();

    let path = PathFormula::eventually(StateFormula::label("target"));
    let maximum = check(&model, &StateFormula::probability(Maximize, path.clone())).unwrap();
    let minimum = check(&model, &StateFormula::probability(Minimize, path)).unwrap();
    for (max_value, min_value) in maximum
        .values()
        .unwrap()
        .iter()
        .zip(minimum.values().unwrap())
    {
        assert!(max_value + EPSILON >= *min_value);
        assert!(*max_value <= 1.0 + EPSILON);
        assert!(*min_value >= -EPSILON);
    }
}

#[test]
fn test_policy_iteration_technique() {
    // two one-shot gambles so state 0 stays undecided and the numeric
    // solver actually runs
    let mut builder = SparseMatrixBuilder::new(3);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 0.5);
    builder.push_entry(2, 0.5);
    builder.new_row();
    builder.push_entry(1, 0.3);
    builder.push_entry(2, 0.7);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(1, 1.0);
    builder.new_row_group();
    builder.new_row();
    builder.push_entry(2, 1.0);
    let mut model = Mdp::new(builder.build(), BitSet::from_indices(3, vec![0])).unwrap();
    model
        .add_label("target", BitSet::from_indices(3, vec![2]))
        .unwrap();

    let options = CheckOptions {
        technique: tyto::SolverTechnique::PolicyIteration,
        produce_scheduler: true,
        ..CheckOptions::default()
    };
    let formula = StateFormula::probability(Maximize, eventually_target());
    let result = check_with(&model, &formula, options).unwrap();
    let values = result.values().unwrap();
    assert!((values[0] - 0.7).abs() < EPSILON);
    assert_eq!(result.scheduler().unwrap()[0], 1);
}

#[test]
fn test_missing_reward_model() {
    let model = three_state_mdp();
    let formula = StateFormula::reward(
        Minimize,
        Some("energy".into()),
        RewardPathFormula::Reachability(Box::new(StateFormula::label("target"))),
    );
    assert!(matches!(
        check(&model, &formula),
        Err(Error::MissingRewardModel(_))
    ));
}

#[test]
fn test_cancellation() {
    let model = three_state_mdp();
    let flag = CancellationFlag::new();
    flag.cancel();
    let options = CheckOptions {
        cancellation: Some(flag),
        ..CheckOptions::default()
    };
    let formula = StateFormula::probability(Minimize, eventually_target());
    assert!(matches!(
        check_with(&model, &formula, options),
        Err(Error::Cancelled)
    ));
}
