//! Name registries for models and learners.
//!
//! Lookup by an unknown key reports `NotFound` together with the sorted
//! list of registered names. Injection is static: [`model_registry`] and
//! the learner registry in [`crate::learner`] enumerate the entries this
//! binary supports; tests can build their own registries.

use std::path::Path;

use crate::config::TrainingConfig;
use crate::dataset::DataSpec;
use crate::error::{Error, Result};
use crate::model::{ForestModel, ModelHeader};

/// A name-to-factory map.
pub struct Registry<F> {
    kind: &'static str,
    entries: Vec<(String, F)>,
}

impl<F> Registry<F> {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, entries: Vec::new() }
    }

    /// Register a factory; a duplicate name replaces the previous entry.
    pub fn register(&mut self, name: &str, factory: F) {
        self.entries.retain(|(existing, _)| existing != name);
        self.entries.push((name.to_string(), factory));
    }

    /// Sorted registered names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.iter().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Result<&F> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, factory)| factory)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "unknown {} \"{name}\"; registered: [{}]",
                    self.kind,
                    self.names().join(", ")
                ))
            })
    }
}

// =============================================================================
// Built-in registries
// =============================================================================

/// Loads one model kind from a directory.
pub type ModelLoader =
    fn(&Path, ModelHeader, DataSpec) -> Result<Box<dyn ForestModel>>;

/// Builds one learner kind from a training config.
pub type LearnerFactory = fn(TrainingConfig) -> Result<Box<dyn crate::learner::Learner>>;

/// Registry of the models compiled into this binary.
pub fn model_registry() -> Registry<ModelLoader> {
    let mut registry: Registry<ModelLoader> = Registry::new("model");
    registry.register(crate::model::gbt::MODEL_NAME, |dir, header, spec| {
        Ok(Box::new(crate::model::gbt::GradientBoostedTreesModel::load(dir, header, spec)?))
    });
    registry.register(crate::model::rf::MODEL_NAME, |dir, header, spec| {
        Ok(Box::new(crate::model::rf::RandomForestModel::load(dir, header, spec)?))
    });
    registry
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_unknown_key_lists_registered_names() {
        let registry = model_registry();
        let err = registry.get("NEURAL_NET").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(err.message().contains("GRADIENT_BOOSTED_TREES"));
        assert!(err.message().contains("RANDOM_FOREST"));
    }

    #[test]
    fn builtin_models_are_registered() {
        let registry = model_registry();
        assert!(registry.get("GRADIENT_BOOSTED_TREES").is_ok());
        assert!(registry.get("RANDOM_FOREST").is_ok());
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut registry: Registry<u32> = Registry::new("number");
        registry.register("x", 1);
        registry.register("x", 2);
        assert_eq!(*registry.get("x").unwrap(), 2);
        assert_eq!(registry.names(), vec!["x"]);
    }
}
