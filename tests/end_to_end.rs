//! End-to-end training scenarios on small synthetic datasets.

use canopy::learner::gbt::loss::LossKind;
use canopy::learner::gbt::GradientBoostedTreesLearner;
use canopy::learner::rf::RandomForestLearner;
use canopy::learner::Learner;
use canopy::dataset::ranking::RankingGroups;
use canopy::testing;
use canopy::{ForestModel, Prediction, Task, TrainingConfig};

fn gbt_config(label: &str, task: Task) -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.label = label.to_string();
    config.task = task;
    config.gbt.validation_set_ratio = 0.0;
    config.gbt.tree.min_examples = 1;
    config
}

// ---- Scenario 1: GBT binomial on D1. ----

#[test]
fn gbt_binomial_on_d1_reaches_perfect_accuracy() {
    let dataset = testing::dataset_d1();
    let mut config = gbt_config("y", Task::Classification);
    config.gbt.num_trees = 1;
    config.gbt.shrinkage = 0.1;
    config.gbt.tree.max_depth = 1;
    let model = GradientBoostedTreesLearner::new(config)
        .unwrap()
        .train(&dataset)
        .unwrap();

    // Balanced labels: the initial prediction is log(0.5/0.5) = 0, and the
    // one stump splits x at 1.5.
    let mut correct = 0;
    for row in 0..4 {
        match model.predict_row(&dataset, row).unwrap() {
            Prediction::Classification { class, distribution } => {
                let expected = if row < 2 { 1 } else { 2 };
                if class == expected {
                    correct += 1;
                }
                assert_eq!(distribution[0], 0.0);
                let total: f32 = distribution.iter().sum();
                assert!((total - 1.0).abs() < 1e-5);
            }
            other => panic!("unexpected prediction {other:?}"),
        }
    }
    assert_eq!(correct, 4);
}

// ---- Scenario 2: RF classification with OOB. ----

#[test]
fn rf_oob_accuracy_on_d1() {
    let dataset = testing::dataset_d1();
    let mut config = TrainingConfig::default();
    config.learner = "RANDOM_FOREST".to_string();
    config.label = "y".to_string();
    config.task = Task::Classification;
    config.random_seed = 123;
    config.rf.num_trees = 10;
    config.rf.winner_take_all = true;
    config.rf.tree.min_examples = 1;
    let model = RandomForestLearner::new(config).unwrap().train(&dataset).unwrap();

    // The OOB accuracy is recorded in the model description as
    // "OOB accuracy: <value> over <n> examples".
    let described = model.describe(false);
    let line = described
        .lines()
        .find(|line| line.starts_with("OOB accuracy"))
        .expect("OOB evaluation missing");
    let value: f32 = line
        .split(':')
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.parse().ok())
        .expect("unparsable OOB line");
    assert!(value >= 0.75, "OOB accuracy {value} below 0.75");
}

// ---- Scenario 3: GBT regression convergence. ----

#[test]
fn gbt_regression_drives_training_rmse_down() {
    let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
    let mut config = gbt_config("y", Task::Regression);
    config.gbt.num_trees = 100;
    config.gbt.shrinkage = 0.1;
    config.gbt.tree.max_depth = 6;
    let model = GradientBoostedTreesLearner::new(config).unwrap().train(&dataset).unwrap();

    let labels = [1.0f32, 2.0, 3.0, 4.0];
    let mut sum_squared = 0.0f64;
    for row in 0..4 {
        match model.predict_row(&dataset, row).unwrap() {
            Prediction::Regression { value } => {
                sum_squared += ((value - labels[row]) as f64).powi(2)
            }
            other => panic!("unexpected prediction {other:?}"),
        }
    }
    let rmse = (sum_squared / 4.0).sqrt();
    assert!(rmse <= 0.05, "training RMSE {rmse} above 0.05");
}

// ---- Scenario 5: LambdaMART ranking. ----

#[test]
fn lambda_mart_converges_to_perfect_ndcg() {
    let dataset = testing::ranking_dataset();
    let mut config = gbt_config("relevance", Task::Ranking);
    config.ranking_group = Some("group".to_string());
    config.gbt.num_trees = 50;
    config.gbt.loss = LossKind::LambdaMartNdcg5;
    let model = GradientBoostedTreesLearner::new(config).unwrap().train(&dataset).unwrap();

    let mut predictions = vec![0.0f32; 6];
    for (row, prediction) in predictions.iter_mut().enumerate() {
        match model.predict_row(&dataset, row).unwrap() {
            Prediction::Ranking { relevance } => *prediction = relevance,
            other => panic!("unexpected prediction {other:?}"),
        }
    }
    let groups = RankingGroups::build(&dataset, 0, 1).unwrap();
    let ndcg = groups.ndcg(&predictions, &[], 5);
    assert!((ndcg - 1.0).abs() < 1e-6, "NDCG@5 {ndcg} after convergence");
}

// ---- Scenario 6: multinomial on separable data. ----

#[test]
fn multinomial_separates_three_classes() {
    let dataset =
        testing::dataset_with_labels(&["a", "a", "a", "b", "b", "b", "c", "c", "c"]);
    let mut config = gbt_config("y", Task::Classification);
    config.gbt.num_trees = 20;
    config.gbt.loss = LossKind::MultinomialLogLikelihood;
    let model = GradientBoostedTreesLearner::new(config).unwrap().train(&dataset).unwrap();

    let labels = dataset.categorical(1).unwrap().to_vec();
    for row in 0..9 {
        match model.predict_row(&dataset, row).unwrap() {
            Prediction::Classification { class, distribution } => {
                assert_eq!(class, labels[row], "row {row} misclassified");
                assert_eq!(distribution[0], 0.0);
            }
            other => panic!("unexpected prediction {other:?}"),
        }
    }
}

// ---- Law: binary multinomial equivalence. ----

#[test]
fn binomial_and_multinomial_rank_probabilities_identically() {
    let dataset = testing::dataset_with_labels(&["a", "a", "b", "a", "b", "b"]);

    let mut binomial_config = gbt_config("y", Task::Classification);
    binomial_config.gbt.num_trees = 10;
    binomial_config.gbt.loss = LossKind::BinomialLogLikelihood;
    let binomial = GradientBoostedTreesLearner::new(binomial_config)
        .unwrap()
        .train(&dataset)
        .unwrap();

    let mut multinomial_config = gbt_config("y", Task::Classification);
    multinomial_config.gbt.num_trees = 10;
    multinomial_config.gbt.loss = LossKind::MultinomialLogLikelihood;
    let multinomial = GradientBoostedTreesLearner::new(multinomial_config)
        .unwrap()
        .train(&dataset)
        .unwrap();

    let positive_probability = |model: &dyn canopy::ForestModel, row: usize| -> f32 {
        match model.predict_row(&dataset, row).unwrap() {
            Prediction::Classification { distribution, .. } => distribution[2],
            other => panic!("unexpected prediction {other:?}"),
        }
    };

    let n = dataset.num_rows() as usize;
    for i in 0..n {
        for j in 0..n {
            let binomial_delta =
                positive_probability(binomial.as_ref(), i) - positive_probability(binomial.as_ref(), j);
            let multinomial_delta = positive_probability(multinomial.as_ref(), i)
                - positive_probability(multinomial.as_ref(), j);
            let binomial_sign = if binomial_delta.abs() < 1e-6 {
                0
            } else {
                binomial_delta.signum() as i32
            };
            let multinomial_sign = if multinomial_delta.abs() < 1e-6 {
                0
            } else {
                multinomial_delta.signum() as i32
            };
            assert_eq!(
                binomial_sign, multinomial_sign,
                "probability ordering differs between rows {i} and {j}"
            );
        }
    }
}

// ---- Invariant: training is independent of the thread count. ----

#[test]
fn gbt_is_deployment_independent() {
    let dataset = testing::dataset_d1();
    let mut config = gbt_config("y", Task::Classification);
    config.gbt.num_trees = 5;
    config.random_seed = 42;

    let single = GradientBoostedTreesLearner::new(config.clone())
        .unwrap()
        .train(&dataset)
        .unwrap();

    let mut learner = GradientBoostedTreesLearner::new(config).unwrap();
    learner.set_deployment(canopy::DeploymentConfig { num_threads: 4, ..Default::default() });
    let threaded = learner.train(&dataset).unwrap();

    assert_eq!(
        postcard::to_allocvec(single.trees()).unwrap(),
        postcard::to_allocvec(threaded.trees()).unwrap()
    );
}
