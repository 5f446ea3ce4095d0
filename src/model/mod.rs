//! Forest models: headers, prediction, persistence, and the name registry.
//!
//! A model is an ordered list of frozen trees plus a dataspec and a header
//! describing the task and the input features. Classification distributions
//! always reserve slot 0 for OOV with probability zero.

pub mod gbt;
pub mod io;
pub mod registry;
pub mod rf;

pub use gbt::{GradientBoostedTreesModel, TrainingLogEntry};
pub use io::{load_model, model_exists, save_model};
pub use rf::{OobEvaluation, RandomForestModel, VariableImportance};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dataset::{DataSpec, VerticalDataset};
use crate::error::{Error, Result};
use crate::tree::Tree;

// =============================================================================
// Task
// =============================================================================

/// What the model predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Classification,
    Regression,
    Ranking,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Classification => "CLASSIFICATION",
            Task::Regression => "REGRESSION",
            Task::Ranking => "RANKING",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "CLASSIFICATION" => Ok(Task::Classification),
            "REGRESSION" => Ok(Task::Regression),
            "RANKING" => Ok(Task::Ranking),
            other => Err(Error::invalid_argument(format!("unknown task \"{other}\""))),
        }
    }
}

// =============================================================================
// Generic header
// =============================================================================

/// Model-agnostic header, serialized as `header.bin` in the model directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHeader {
    /// Registered model name, the registry key at load time.
    pub name: String,
    pub task: Task,
    pub label_col: u32,
    pub ranking_group_col: Option<u32>,
    pub weights_col: Option<u32>,
    /// Columns the trees may test, by dataspec index.
    pub input_features: Vec<u32>,
}

// =============================================================================
// Predictions
// =============================================================================

/// Prediction for one example.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Classification {
        /// Probability per label index; slot 0 (OOV) is always 0 and the
        /// distribution sums to 1.
        distribution: Vec<f32>,
        class: i32,
    },
    Regression { value: f32 },
    Ranking { relevance: f32 },
}

impl Prediction {
    /// Flat numeric form, matching one row of [`ForestModel::predict`].
    pub fn as_row(&self) -> Vec<f32> {
        match self {
            Prediction::Classification { distribution, .. } => distribution.clone(),
            Prediction::Regression { value } => vec![*value],
            Prediction::Ranking { relevance } => vec![*relevance],
        }
    }
}

// =============================================================================
// Forest model trait
// =============================================================================

/// A trained decision forest that answers prediction queries.
pub trait ForestModel: Send + Sync {
    /// Registered model name.
    fn name(&self) -> &'static str;

    fn header(&self) -> &ModelHeader;

    fn data_spec(&self) -> &DataSpec;

    fn trees(&self) -> &[Tree];

    /// Predict one example of a dataset sharing this model's dataspec.
    fn predict_row(&self, dataset: &VerticalDataset, row: usize) -> Result<Prediction>;

    /// Number of columns of the batch-prediction matrix: the number of
    /// classes (OOV included) for classification, 1 otherwise.
    fn prediction_dim(&self) -> usize;

    /// Batch prediction; one row per example.
    fn predict(&self, dataset: &VerticalDataset) -> Result<Array2<f32>> {
        let n = dataset.num_rows() as usize;
        let mut output = Array2::zeros((n, self.prediction_dim()));
        for row in 0..n {
            let prediction = self.predict_row(dataset, row)?;
            for (col, value) in prediction.as_row().into_iter().enumerate() {
                output[(row, col)] = value;
            }
        }
        Ok(output)
    }

    /// Check structural invariants before saving or after loading.
    fn validate(&self) -> Result<()>;

    /// Human-readable description, used by `show_model`.
    fn describe(&self, full: bool) -> String;

    /// Write the model-specific header and the node shards into `dir`.
    fn save_parts(&self, dir: &std::path::Path) -> Result<()>;
}

/// Shared header validation.
pub(crate) fn validate_header(header: &ModelHeader, spec: &DataSpec) -> Result<()> {
    if header.label_col as usize >= spec.num_columns() {
        return Err(Error::failed_precondition(format!(
            "label column {} outside the dataspec",
            header.label_col
        )));
    }
    for &feature in &header.input_features {
        if feature as usize >= spec.num_columns() {
            return Err(Error::failed_precondition(format!(
                "input feature {feature} outside the dataspec"
            )));
        }
    }
    if header.task == Task::Ranking && header.ranking_group_col.is_none() {
        return Err(Error::failed_precondition(
            "ranking model without a ranking group column",
        ));
    }
    Ok(())
}
