//! The random-forest model.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::{DataSpec, VerticalDataset};
use crate::error::{Error, Result};
use crate::model::{io, validate_header, ForestModel, ModelHeader, Prediction, Task};
use crate::tree::{LeafPayload, Tree};

/// Registry key of the model.
pub const MODEL_NAME: &str = "RANDOM_FOREST";

/// File holding the model-specific header.
pub const HEADER_FILE_NAME: &str = "random_forest_header.bin";

// =============================================================================
// Header payloads
// =============================================================================

/// Out-of-bag evaluation computed during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OobEvaluation {
    /// "accuracy" or "rmse".
    pub metric: String,
    pub value: f32,
    /// Rows with at least one out-of-bag prediction.
    pub num_examples: u64,
}

/// Mean OOB metric drop when one feature is permuted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableImportance {
    pub attribute: u32,
    pub importance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RfHeader {
    winner_take_all: bool,
    /// Label classes, OOV included; 0 for regression.
    num_label_classes: u32,
    oob_evaluation: Option<OobEvaluation>,
    variable_importances: Vec<VariableImportance>,
}

// =============================================================================
// Model
// =============================================================================

/// A trained random forest.
#[derive(Debug, Clone)]
pub struct RandomForestModel {
    pub header: ModelHeader,
    pub data_spec: DataSpec,
    pub trees: Vec<Tree>,
    /// Classification voting: majority votes when true, averaged leaf
    /// distributions when false.
    pub winner_take_all: bool,
    /// Label classes, OOV included; 0 for regression.
    pub num_label_classes: u32,
    pub oob_evaluation: Option<OobEvaluation>,
    pub variable_importances: Vec<VariableImportance>,
}

impl RandomForestModel {
    /// Load from a model directory (registry hook).
    pub fn load(dir: &Path, header: ModelHeader, data_spec: DataSpec) -> Result<Self> {
        let bytes = std::fs::read(dir.join(HEADER_FILE_NAME))?;
        let rf_header: RfHeader = postcard::from_bytes(&bytes)?;
        let trees = io::read_node_shards(dir)?;
        let model = Self {
            header,
            data_spec,
            trees,
            winner_take_all: rf_header.winner_take_all,
            num_label_classes: rf_header.num_label_classes,
            oob_evaluation: rf_header.oob_evaluation,
            variable_importances: rf_header.variable_importances,
        };
        model.validate()?;
        Ok(model)
    }

    fn classification_distribution(
        &self,
        dataset: &VerticalDataset,
        row: usize,
    ) -> Result<Vec<f32>> {
        let num_classes = self.num_label_classes as usize;
        let mut accumulator = vec![0.0f64; num_classes];
        for tree in &self.trees {
            match tree.leaf_for_row(dataset, row)? {
                LeafPayload::Classifier { distribution, top_class } => {
                    if self.winner_take_all {
                        let class = (*top_class).clamp(0, num_classes as i32 - 1) as usize;
                        accumulator[class] += 1.0;
                    } else {
                        let total: f64 = distribution.iter().sum();
                        if total > 0.0 {
                            for (class, &weight) in distribution.iter().enumerate() {
                                if class < num_classes {
                                    accumulator[class] += weight / total;
                                }
                            }
                        }
                    }
                }
                LeafPayload::Regressor { .. } => {
                    return Err(Error::internal(
                        "regression leaf in a classification random forest",
                    ))
                }
            }
        }
        let total: f64 = accumulator.iter().sum();
        if total <= 0.0 {
            return Err(Error::failed_precondition("empty forest"));
        }
        // OOV never receives votes; renormalize over the real classes.
        accumulator[0] = 0.0;
        let total: f64 = accumulator.iter().sum();
        Ok(accumulator.iter().map(|&v| (v / total) as f32).collect())
    }
}

impl ForestModel for RandomForestModel {
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
        match self.header.task {
            Task::Classification => self.num_label_classes as usize,
            _ => 1,
        }
    }

    fn predict_row(&self, dataset: &VerticalDataset, row: usize) -> Result<Prediction> {
        match self.header.task {
            Task::Classification => {
                let distribution = self.classification_distribution(dataset, row)?;
                let class = distribution
                    .iter()
                    .enumerate()
                    .skip(1)
                    .max_by(|a, b| {
                        a.1.partial_cmp(b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| b.0.cmp(&a.0))
                    })
                    .map(|(class, _)| class as i32)
                    .unwrap_or(1);
                Ok(Prediction::Classification { distribution, class })
            }
            Task::Regression | Task::Ranking => {
                let mut sum = 0.0f64;
                for tree in &self.trees {
                    sum += tree.regressor_value_for_row(dataset, row)? as f64;
                }
                let value = (sum / self.trees.len() as f64) as f32;
                if self.header.task == Task::Regression {
                    Ok(Prediction::Regression { value })
                } else {
                    Ok(Prediction::Ranking { relevance: value })
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        validate_header(&self.header, &self.data_spec)?;
        if self.trees.is_empty() {
            return Err(Error::failed_precondition("random forest without trees"));
        }
        if self.header.task == Task::Classification && self.num_label_classes < 2 {
            return Err(Error::failed_precondition(
                "classification forest without label classes",
            ));
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
        let _ = writeln!(out, "Trees: {}", self.trees.len());
        let _ = writeln!(out, "Winner take all: {}", self.winner_take_all);
        if let Some(oob) = &self.oob_evaluation {
            let _ = writeln!(
                out,
                "OOB {}: {} over {} examples",
                oob.metric, oob.value, oob.num_examples
            );
        }
        if !self.variable_importances.is_empty() {
            let _ = writeln!(out, "Variable importances (mean OOB metric drop):");
            for importance in &self.variable_importances {
                let name = self
                    .data_spec
                    .columns
                    .get(importance.attribute as usize)
                    .map(|c| c.name.as_str())
                    .unwrap_or("?");
                let _ = writeln!(out, "  \"{name}\": {}", importance.importance);
            }
        }
        if full {
            for (idx, tree) in self.trees.iter().enumerate() {
                let _ = writeln!(out, "Tree {idx} ({} nodes):", tree.num_nodes());
                out.push_str(&tree.describe(&self.data_spec));
            }
        }
        out
    }

    fn save_parts(&self, dir: &Path) -> Result<()> {
        let header = RfHeader {
            winner_take_all: self.winner_take_all,
            num_label_classes: self.num_label_classes,
            oob_evaluation: self.oob_evaluation.clone(),
            variable_importances: self.variable_importances.clone(),
        };
        let bytes = postcard::to_allocvec(&header)?;
        std::fs::write(dir.join(HEADER_FILE_NAME), bytes)?;
        io::write_node_shards(dir, &self.trees)
    }
}

// =============================================================================
// Tests
// =============================================================================
