//! Training and deployment configuration.
//!
//! Config files are line-oriented `key: value` records; `#` starts a
//! comment. Learner-specific hyper-parameters use the `gbt.`, `rf.`, and
//! `tree.` key prefixes (`tree.` applies to both learners).
//!
//! `hyperparameter: <name> <value>` lines carry generic hyper-parameters:
//! the same keys, but with strictly lower precedence than explicit fields,
//! intended for hyper-parameter tuners.

use std::path::Path;

use crate::error::{Error, Result};
use crate::learner::gbt::early_stopping::EarlyStoppingPolicy;
use crate::learner::gbt::loss::LossKind;
use crate::learner::gbt::{ForestExtraction, GbtParams, SamplingKind};
use crate::learner::rf::RfParams;
use crate::model::Task;
use crate::tree::{
    CategoricalAlgorithm, GrowingStrategy, MissingValuePolicy, ObliqueNormalization,
    SortingStrategy, SplitAxis,
};

// =============================================================================
// Training config
// =============================================================================

/// Everything a learner needs besides the dataset.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Registered learner name.
    pub learner: String,
    pub task: Task,
    /// Label column name.
    pub label: String,
    /// Ranking group column name; required for ranking tasks.
    pub ranking_group: Option<String>,
    /// Weight column name.
    pub weights: Option<String>,
    /// Input feature column names; empty selects every column except the
    /// label, group, and weight columns.
    pub features: Vec<String>,
    pub random_seed: u64,
    /// Training time budget; non-positive disables it.
    pub maximum_training_duration_seconds: f32,
    pub gbt: GbtParams,
    pub rf: RfParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learner: "GRADIENT_BOOSTED_TREES".to_string(),
            task: Task::Classification,
            label: String::new(),
            ranking_group: None,
            weights: None,
            features: Vec::new(),
            random_seed: 123456,
            maximum_training_duration_seconds: -1.0,
            gbt: GbtParams::default(),
            rf: RfParams::default(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::invalid_argument(format!("invalid value \"{value}\" for \"{key}\""))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::invalid_argument(format!(
            "invalid boolean \"{other}\" for \"{key}\""
        ))),
    }
}

impl TrainingConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    /// Parse a config file. Generic `hyperparameter:` lines are applied
    /// before the explicit fields so explicit fields always win.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut generic: Vec<(String, String)> = Vec::new();
        let mut explicit: Vec<(String, String)> = Vec::new();
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::invalid_argument(format!(
                    "config line {} is not \"key: value\"",
                    line_no + 1
                ))
            })?;
            let key = key.trim();
            let value = value.trim();
            if key == "hyperparameter" {
                let (name, hp_value) = value.split_once(' ').ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "hyperparameter line {} is not \"name value\"",
                        line_no + 1
                    ))
                })?;
                generic.push((name.trim().to_string(), hp_value.trim().to_string()));
            } else {
                explicit.push((key.to_string(), value.to_string()));
            }
        }

        let mut config = Self::default();
        for (key, value) in generic.iter().chain(explicit.iter()) {
            config.set_field(key, value)?;
        }
        Ok(config)
    }

    /// Apply generic hyper-parameters; explicit config fields set earlier
    /// keep precedence only if the caller applies them afterwards, so this
    /// is meant for tuner integration before `set_field` calls.
    pub fn apply_generic(&mut self, params: &GenericHyperParameters) -> Result<()> {
        for (name, value) in &params.0 {
            self.set_field(name, &value.to_field_value())?;
        }
        Ok(())
    }

    /// Set one field by its config key.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(tree_key) = key.strip_prefix("tree.") {
            set_tree_field(&mut self.gbt.tree, tree_key, value)?;
            set_tree_field(&mut self.rf.tree, tree_key, value)?;
            return Ok(());
        }
        if let Some(gbt_key) = key.strip_prefix("gbt.") {
            return set_gbt_field(&mut self.gbt, gbt_key, value);
        }
        if let Some(rf_key) = key.strip_prefix("rf.") {
            return set_rf_field(&mut self.rf, rf_key, value);
        }
        match key {
            "learner" => self.learner = value.to_string(),
            "task" => self.task = Task::parse(value)?,
            "label" => self.label = value.to_string(),
            "ranking_group" => self.ranking_group = Some(value.to_string()),
            "weights" => self.weights = Some(value.to_string()),
            "features" => {
                self.features =
                    value.split(',').map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect()
            }
            "random_seed" => self.random_seed = parse_number(key, value)?,
            "maximum_training_duration_seconds" => {
                self.maximum_training_duration_seconds = parse_number(key, value)?
            }
            other => {
                return Err(Error::invalid_argument(format!(
                    "unknown training config key \"{other}\""
                )))
            }
        }
        Ok(())
    }

    /// Cheap structural checks before training.
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(Error::invalid_argument("the \"label\" field is required"));
        }
        if self.task == Task::Ranking && self.ranking_group.is_none() {
            return Err(Error::invalid_argument(
                "a ranking task requires the \"ranking_group\" field",
            ));
        }
        Ok(())
    }
}

fn set_gbt_field(params: &mut GbtParams, key: &str, value: &str) -> Result<()> {
    match key {
        "num_trees" => params.num_trees = parse_number(key, value)?,
        "shrinkage" => params.shrinkage = parse_number(key, value)?,
        "subsample" => params.subsample = parse_number(key, value)?,
        "sampling_method" => {
            params.sampling_method = match value {
                "NONE" => SamplingKind::None,
                "RANDOM" => SamplingKind::Random,
                "GOSS" => SamplingKind::Goss,
                "SELGB" => SamplingKind::Selgb,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown sampling method \"{other}\""
                    )))
                }
            }
        }
        "goss_alpha" => params.goss_alpha = parse_number(key, value)?,
        "goss_beta" => params.goss_beta = parse_number(key, value)?,
        "selgb_ratio" => params.selgb_ratio = parse_number(key, value)?,
        "validation_set_ratio" => params.validation_set_ratio = parse_number(key, value)?,
        "early_stopping" => {
            params.early_stopping = match value {
                "NONE" => EarlyStoppingPolicy::None,
                "LOSS_INCREASE" => EarlyStoppingPolicy::LossIncrease,
                "MIN_LOSS_FINAL" => EarlyStoppingPolicy::MinLossFinal,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown early stopping policy \"{other}\""
                    )))
                }
            }
        }
        "early_stopping_num_trees_look_ahead" => {
            params.early_stopping_num_trees_look_ahead = parse_number(key, value)?
        }
        "use_hessian_gain" => params.use_hessian_gain = parse_bool(key, value)?,
        "l1_regularization" => params.l1_regularization = parse_number(key, value)?,
        "l2_regularization" => params.l2_regularization = parse_number(key, value)?,
        "l2_categorical_regularization" => {
            params.l2_categorical_regularization = parse_number(key, value)?
        }
        "clamp_leaf_logit" => params.clamp_leaf_logit = parse_number(key, value)?,
        "lambda_loss" => params.lambda_loss = parse_number(key, value)?,
        "loss" => params.loss = LossKind::parse(value)?,
        "forest_extraction" => {
            params.forest_extraction = match value {
                "MART" => ForestExtraction::Mart,
                "DART" => ForestExtraction::Dart { dropout: 0.01 },
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown forest extraction \"{other}\""
                    )))
                }
            }
        }
        "dart_dropout" => {
            let dropout = parse_number(key, value)?;
            params.forest_extraction = ForestExtraction::Dart { dropout };
        }
        "adapt_subsample_for_maximum_training_duration" => {
            params.adapt_subsample_for_maximum_training_duration = parse_bool(key, value)?
        }
        other => {
            return Err(Error::invalid_argument(format!(
                "unknown gbt config key \"{other}\""
            )))
        }
    }
    Ok(())
}

fn set_rf_field(params: &mut RfParams, key: &str, value: &str) -> Result<()> {
    match key {
        "num_trees" => params.num_trees = parse_number(key, value)?,
        "bootstrap_size_ratio" => params.bootstrap_size_ratio = parse_number(key, value)?,
        "winner_take_all" => params.winner_take_all = parse_bool(key, value)?,
        "compute_oob_performances" => {
            params.compute_oob_performances = parse_bool(key, value)?
        }
        "compute_oob_variable_importances" => {
            params.compute_oob_variable_importances = parse_bool(key, value)?
        }
        "validation_ratio" => params.validation_ratio = parse_number(key, value)?,
        other => {
            return Err(Error::invalid_argument(format!(
                "unknown rf config key \"{other}\""
            )))
        }
    }
    Ok(())
}

fn set_tree_field(params: &mut crate::tree::TreeParams, key: &str, value: &str) -> Result<()> {
    match key {
        "max_depth" => params.max_depth = parse_number(key, value)?,
        "min_examples" => params.min_examples = parse_number(key, value)?,
        "growing_strategy" => {
            params.growing_strategy = match value {
                "LOCAL" => GrowingStrategy::Local,
                "BEST_FIRST_GLOBAL" => GrowingStrategy::BestFirstGlobal,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown growing strategy \"{other}\""
                    )))
                }
            }
        }
        "max_num_nodes" => params.max_num_nodes = parse_number(key, value)?,
        "sorting_strategy" => {
            params.sorting_strategy = match value {
                "IN_NODE" => SortingStrategy::InNode,
                "PRESORT" => SortingStrategy::Presort,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown sorting strategy \"{other}\""
                    )))
                }
            }
        }
        "num_candidate_attributes" => {
            params.num_candidate_attributes = parse_number(key, value)?
        }
        "num_candidate_attributes_ratio" => {
            params.num_candidate_attributes_ratio = parse_number(key, value)?
        }
        "categorical_algorithm" => {
            params.categorical = match value {
                "CART" => CategoricalAlgorithm::Cart,
                "ONE_HOT" => CategoricalAlgorithm::OneHot,
                "RANDOM" => CategoricalAlgorithm::Random { max_num_trials: 32 },
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown categorical algorithm \"{other}\""
                    )))
                }
            }
        }
        "random_categorical_num_trials" => {
            let max_num_trials = parse_number(key, value)?;
            params.categorical = CategoricalAlgorithm::Random { max_num_trials };
        }
        "missing_value_policy" => {
            params.missing_value_policy = match value {
                "GLOBAL_IMPUTATION" => MissingValuePolicy::GlobalImputation,
                "LOCAL_IMPUTATION" => MissingValuePolicy::LocalImputation,
                "RANDOM_LOCAL_IMPUTATION" => MissingValuePolicy::RandomLocalImputation,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown missing value policy \"{other}\""
                    )))
                }
            }
        }
        "allow_na_conditions" => params.allow_na_conditions = parse_bool(key, value)?,
        "in_split_min_examples_check" => {
            params.in_split_min_examples_check = parse_bool(key, value)?
        }
        "categorical_set_greedy_sampling" => {
            params.categorical_set_greedy_sampling = parse_number(key, value)?
        }
        "categorical_set_max_num_items" => {
            params.categorical_set_max_num_items = parse_number(key, value)?
        }
        "min_gain" => params.gain.min_gain = parse_number(key, value)?,
        "split_axis" => {
            params.split_axis = match value {
                "AXIS_ALIGNED" => SplitAxis::AxisAligned,
                "SPARSE_OBLIQUE" => SplitAxis::SparseOblique {
                    num_projections_exponent: 1.0,
                    projection_density_factor: 2.0,
                    normalization: ObliqueNormalization::None,
                    max_num_projections: 500,
                },
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown split axis \"{other}\""
                    )))
                }
            }
        }
        "sparse_oblique_num_projections_exponent" => {
            if let SplitAxis::SparseOblique { num_projections_exponent, .. } =
                &mut params.split_axis
            {
                *num_projections_exponent = parse_number(key, value)?;
            }
        }
        "sparse_oblique_projection_density_factor" => {
            if let SplitAxis::SparseOblique { projection_density_factor, .. } =
                &mut params.split_axis
            {
                *projection_density_factor = parse_number(key, value)?;
            }
        }
        "sparse_oblique_normalization" => {
            if let SplitAxis::SparseOblique { normalization, .. } = &mut params.split_axis {
                *normalization = match value {
                    "NONE" => ObliqueNormalization::None,
                    "STANDARD_DEVIATION" => ObliqueNormalization::StandardDeviation,
                    "MIN_MAX" => ObliqueNormalization::MinMax,
                    other => {
                        return Err(Error::invalid_argument(format!(
                            "unknown oblique normalization \"{other}\""
                        )))
                    }
                };
            }
        }
        "sparse_oblique_max_num_projections" => {
            if let SplitAxis::SparseOblique { max_num_projections, .. } = &mut params.split_axis
            {
                *max_num_projections = parse_number(key, value)?;
            }
        }
        other => {
            return Err(Error::invalid_argument(format!(
                "unknown tree config key \"{other}\""
            )))
        }
    }
    Ok(())
}

// =============================================================================
// Generic hyper-parameters
// =============================================================================

/// Value of one generic hyper-parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum HyperParameterValue {
    Text(String),
    Integer(i64),
    Real(f64),
    CategoricalList(Vec<String>),
}

impl HyperParameterValue {
    fn to_field_value(&self) -> String {
        match self {
            HyperParameterValue::Text(text) => text.clone(),
            HyperParameterValue::Integer(value) => value.to_string(),
            HyperParameterValue::Real(value) => value.to_string(),
            HyperParameterValue::CategoricalList(items) => items.join(","),
        }
    }
}

/// `(name, value)` pairs with lower precedence than explicit config fields.
#[derive(Debug, Clone, Default)]
pub struct GenericHyperParameters(pub Vec<(String, HyperParameterValue)>);

// =============================================================================
// Deployment config
// =============================================================================

/// Where and how the training runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Local,
}

/// Computing resources used by training.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub num_threads: usize,
    pub cache_path: Option<String>,
    pub execution: Execution,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self { num_threads: 6, cache_path: None, execution: Execution::Local }
    }
}

impl DeploymentConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut config = Self::default();
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::invalid_argument(format!(
                    "deployment line {} is not \"key: value\"",
                    line_no + 1
                ))
            })?;
            let value = value.trim();
            match key.trim() {
                "num_threads" => config.num_threads = parse_number("num_threads", value)?,
                "cache_path" => config.cache_path = Some(value.to_string()),
                "execution" => {
                    if value != "LOCAL" {
                        return Err(Error::invalid_argument(format!(
                            "unsupported execution \"{value}\""
                        )));
                    }
                }
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown deployment key \"{other}\""
                    )))
                }
            }
        }
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================
