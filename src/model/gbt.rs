//! The gradient-boosted-trees model.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::{DataSpec, VerticalDataset};
use crate::error::{Error, Result};
use crate::learner::gbt::loss::LossKind;
use crate::model::{io, validate_header, ForestModel, ModelHeader, Prediction, Task};
use crate::tree::Tree;

/// Registry key of the model.
pub const MODEL_NAME: &str = "GRADIENT_BOOSTED_TREES";

/// File holding the model-specific header.
pub const HEADER_FILE_NAME: &str = "gradient_boosted_trees_header.bin";

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// =============================================================================
// Training logs
// =============================================================================

/// One line of the training log kept in the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLogEntry {
    pub iteration: u32,
    pub training_loss: f32,
    pub validation_loss: Option<f32>,
    /// Secondary metrics in the loss's order.
    pub secondary_metrics: Vec<f32>,
}

/// Model-specific header, serialized next to the generic one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GbtHeader {
    loss: LossKind,
    num_trees_per_iter: u32,
    initial_predictions: Vec<f32>,
    validation_loss: Option<f32>,
    training_logs: Vec<TrainingLogEntry>,
}

// =============================================================================
// Model
// =============================================================================

/// A trained gradient-boosted-trees forest.
///
/// Trees are interleaved by gradient channel: tree `t` belongs to channel
/// `t % num_trees_per_iter`.
#[derive(Debug, Clone)]
pub struct GradientBoostedTreesModel {
    pub header: ModelHeader,
    pub data_spec: DataSpec,
    pub trees: Vec<Tree>,
    pub loss: LossKind,
    pub num_trees_per_iter: u32,
    pub initial_predictions: Vec<f32>,
    pub validation_loss: Option<f32>,
    pub training_logs: Vec<TrainingLogEntry>,
}

impl GradientBoostedTreesModel {
    /// Raw per-channel accumulators of one example: the initial predictions
    /// plus every tree's leaf.
    pub fn accumulate(&self, dataset: &VerticalDataset, row: usize) -> Result<Vec<f32>> {
        let dim = self.num_trees_per_iter as usize;
        let mut accumulators = self.initial_predictions.clone();
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            accumulators[tree_idx % dim] += tree.regressor_value_for_row(dataset, row)?;
        }
        Ok(accumulators)
    }

    /// Load from a model directory (registry hook).
    pub fn load(dir: &Path, header: ModelHeader, data_spec: DataSpec) -> Result<Self> {
        let bytes = std::fs::read(dir.join(HEADER_FILE_NAME))?;
        let gbt_header: GbtHeader = postcard::from_bytes(&bytes)?;
        let trees = io::read_node_shards(dir)?;
        let model = Self {
            header,
            data_spec,
            trees,
            loss: gbt_header.loss,
            num_trees_per_iter: gbt_header.num_trees_per_iter,
            initial_predictions: gbt_header.initial_predictions,
            validation_loss: gbt_header.validation_loss,
            training_logs: gbt_header.training_logs,
        };
        model.validate()?;
        Ok(model)
    }
}

impl ForestModel for GradientBoostedTreesModel {
    fn name(&self) -> &'static str {
        MODEL_NAME
    }

    fn header(&self) -> &ModelHeader {
        &self.header
    }

    fn data_spec(&self) -> &DataSpec {
        &self.data_spec
    }

    fn trees(&self) -> &[Tree] {
        &self.trees
    }

    fn prediction_dim(&self) -> usize {
        match self.loss {
            LossKind::BinomialLogLikelihood => 3,
            LossKind::MultinomialLogLikelihood => self.num_trees_per_iter as usize + 1,
            _ => 1,
        }
    }

    fn predict_row(&self, dataset: &VerticalDataset, row: usize) -> Result<Prediction> {
        let accumulators = self.accumulate(dataset, row)?;
        Ok(match self.loss {
            LossKind::BinomialLogLikelihood => {
                let probability = sigmoid(accumulators[0]);
                Prediction::Classification {
                    distribution: vec![0.0, 1.0 - probability, probability],
                    class: if probability <= 0.5 { 1 } else { 2 },
                }
            }
            LossKind::MultinomialLogLikelihood => {
                let max_logit =
                    accumulators.iter().fold(f32::NEG_INFINITY, |max, &v| max.max(v));
                let exps: Vec<f32> =
                    accumulators.iter().map(|&v| (v - max_logit).exp()).collect();
                let sum: f32 = exps.iter().sum();
                let mut distribution = Vec::with_capacity(exps.len() + 1);
                distribution.push(0.0);
                distribution.extend(exps.iter().map(|e| e / sum));
                let class = exps
                    .iter()
                    .enumerate()
                    .max_by(|a, b| {
                        a.1.partial_cmp(b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            // Equal probabilities resolve to the lower class.
                            .then_with(|| b.0.cmp(&a.0))
                    })
                    .map(|(channel, _)| channel as i32 + 1)
                    .unwrap_or(1);
                Prediction::Classification { distribution, class }
            }
            LossKind::SquaredError => {
                if self.header.task == Task::Ranking {
                    Prediction::Ranking { relevance: accumulators[0] }
                } else {
                    Prediction::Regression { value: accumulators[0] }
                }
            }
            LossKind::LambdaMartNdcg5 | LossKind::XeNdcgMart => {
                Prediction::Ranking { relevance: accumulators[0] }
            }
            LossKind::Auto => {
                return Err(Error::internal("model stored with an unresolved AUTO loss"))
            }
        })
    }

    fn validate(&self) -> Result<()> {
        validate_header(&self.header, &self.data_spec)?;
        if self.loss == LossKind::Auto {
            return Err(Error::failed_precondition("model stores an unresolved AUTO loss"));
        }
        let dim = self.num_trees_per_iter as usize;
        if dim == 0 {
            return Err(Error::failed_precondition("num_trees_per_iter is zero"));
        }
        if self.trees.len() % dim != 0 {
            return Err(Error::failed_precondition(format!(
                "{} trees is not a multiple of num_trees_per_iter={dim}",
                self.trees.len()
            )));
        }
        if self.initial_predictions.len() != dim {
            return Err(Error::failed_precondition(format!(
                "{} initial predictions, expected {dim}",
                self.initial_predictions.len()
            )));
        }
        for tree in &self.trees {
            tree.validate()?;
        }
        Ok(())
    }

    fn describe(&self, full: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Model: \"{MODEL_NAME}\"");
        let _ = writeln!(out, "Task: {}", self.header.task.as_str());
        let _ = writeln!(out, "Loss: {}", self.loss.as_str());
        let _ = writeln!(
            out,
            "Trees: {} ({} per iteration)",
            self.trees.len(),
            self.num_trees_per_iter
        );
        if let Some(validation_loss) = self.validation_loss {
            let _ = writeln!(out, "Validation loss: {validation_loss}");
        }
        let _ = writeln!(out, "Initial predictions: {:?}", self.initial_predictions);
        let _ = writeln!(
            out,
            "Input features: {}",
            self.header
                .input_features
                .iter()
                .filter_map(|&f| self.data_spec.columns.get(f as usize))
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if full {
            for (idx, tree) in self.trees.iter().enumerate() {
                let _ = writeln!(out, "Tree {idx} ({} nodes):", tree.num_nodes());
                out.push_str(&tree.describe(&self.data_spec));
            }
        }
        out
    }

    fn save_parts(&self, dir: &Path) -> Result<()> {
        let header = GbtHeader {
            loss: self.loss,
            num_trees_per_iter: self.num_trees_per_iter,
            initial_predictions: self.initial_predictions.clone(),
            validation_loss: self.validation_loss,
            training_logs: self.training_logs.clone(),
        };
        let bytes = postcard::to_allocvec(&header)?;
        std::fs::write(dir.join(HEADER_FILE_NAME), bytes)?;
        io::write_node_shards(dir, &self.trees)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::tree::{Condition, InternalNode, LeafPayload, Node};
    use approx::assert_relative_eq;

    fn stump(threshold: f32, low: f32, high: f32) -> Tree {
        let mut tree = Tree::new();
        tree.push_node(Node::Internal(InternalNode {
            condition: Condition::HigherThan { attribute: 0, threshold },
            missing_to_positive: false,
            split_score: 1.0,
            negative_child: 1,
            positive_child: 2,
        }));
        tree.push_node(Node::Leaf(LeafPayload::regressor(low)));
        tree.push_node(Node::Leaf(LeafPayload::regressor(high)));
        tree
    }

    fn binomial_model() -> GradientBoostedTreesModel {
        GradientBoostedTreesModel {
            header: ModelHeader {
                name: MODEL_NAME.to_string(),
                task: Task::Classification,
                label_col: 1,
                ranking_group_col: None,
                weights_col: None,
                input_features: vec![0],
            },
            data_spec: testing::dataset_d1().spec().clone(),
            trees: vec![stump(1.5, -2.0, 2.0)],
            loss: LossKind::BinomialLogLikelihood,
            num_trees_per_iter: 1,
            initial_predictions: vec![0.0],
            validation_loss: None,
            training_logs: Vec::new(),
        }
    }

    #[test]
    fn binomial_prediction_post_processing() {
        let model = binomial_model();
        let dataset = testing::dataset_d1();
        match model.predict_row(&dataset, 0).unwrap() {
            Prediction::Classification { distribution, class } => {
                assert_eq!(class, 1);
                assert_relative_eq!(distribution[0], 0.0);
                assert_relative_eq!(distribution[2], sigmoid(-2.0), epsilon = 1e-6);
                let total: f32 = distribution.iter().sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-5);
            }
            other => panic!("unexpected prediction {other:?}"),
        }
        match model.predict_row(&dataset, 3).unwrap() {
            Prediction::Classification { class, .. } => assert_eq!(class, 2),
            other => panic!("unexpected prediction {other:?}"),
        }
    }

    #[test]
    fn shape_invariants_are_validated() {
        let mut model = binomial_model();
        model.validate().unwrap();

        model.initial_predictions = vec![0.0, 0.0];
        assert!(model.validate().is_err());

        let mut model = binomial_model();
        model.num_trees_per_iter = 2;
        assert!(model.validate().is_err());
    }

    #[test]
    fn batch_prediction_matches_per_row() {
        let model = binomial_model();
        let dataset = testing::dataset_d1();
        let matrix = model.predict(&dataset).unwrap();
        assert_eq!(matrix.shape(), &[4, 3]);
        for row in 0..4 {
            let prediction = model.predict_row(&dataset, row).unwrap().as_row();
            for col in 0..3 {
                assert_relative_eq!(matrix[(row, col)], prediction[col]);
            }
        }
    }

    #[test]
    fn regression_prediction_adds_the_initial_value() {
        let dataset = testing::regression_dataset(&[1.0, 2.0, 3.0, 4.0]);
        let model = GradientBoostedTreesModel {
            header: ModelHeader {
                name: MODEL_NAME.to_string(),
                task: Task::Regression,
                label_col: 1,
                ranking_group_col: None,
                weights_col: None,
                input_features: vec![0],
            },
            data_spec: dataset.spec().clone(),
            trees: vec![stump(1.5, -0.5, 0.5)],
            loss: LossKind::SquaredError,
            num_trees_per_iter: 1,
            initial_predictions: vec![2.5],
            validation_loss: None,
            training_logs: Vec::new(),
        };
        match model.predict_row(&dataset, 0).unwrap() {
            Prediction::Regression { value } => assert_relative_eq!(value, 2.0),
            other => panic!("unexpected prediction {other:?}"),
        }
    }
}
