//! canopy: training and inference for axis-aligned decision forests.
//!
//! Two learners share a decision-tree substrate: gradient-boosted trees and
//! random forests. Both consume a tabular dataset described by a dataspec
//! and emit a serialized model that answers prediction queries.
//!
//! # Key Types
//!
//! - [`DataSpec`] / [`VerticalDataset`] - typed schema and columnar data
//! - [`TrainingConfig`] / [`DeploymentConfig`] - configuration
//! - [`learner::Learner`] - training algorithms, looked up by name
//! - [`model::ForestModel`] - trained forests with prediction and
//!   persistence
//!
//! # Training
//!
//! Build a [`TrainingConfig`], instantiate the learner through
//! [`learner::create_learner`], train on a [`VerticalDataset`], and persist
//! the result with [`model::save_model`].

pub mod config;
pub mod dataset;
pub mod error;
pub mod learner;
pub mod metric;
pub mod model;
pub mod testing;
pub mod tree;

pub use config::{DeploymentConfig, GenericHyperParameters, TrainingConfig};
pub use dataset::{DataSpec, VerticalDataset};
pub use error::{Error, ErrorKind, Result};
pub use model::{load_model, save_model, ForestModel, Prediction, Task};
