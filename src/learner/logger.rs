//! Structured training output.

use crate::learner::gbt::loss::LossValue;

/// How much the learners print while training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Silent,
    Info,
    Debug,
}

/// Writes per-iteration progress lines to stderr.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    verbosity: Verbosity,
    secondary_names: Vec<&'static str>,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity, secondary_names: &[&'static str]) -> Self {
        Self { verbosity, secondary_names: secondary_names.to_vec() }
    }

    pub fn start(&self, learner: &str, num_rows: u64, num_features: usize) {
        if self.verbosity >= Verbosity::Info {
            eprintln!("[{learner}] training on {num_rows} examples, {num_features} features");
        }
    }

    pub fn iteration(
        &self,
        iteration: usize,
        training: &LossValue,
        validation: Option<&LossValue>,
    ) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        let mut line = format!("[{iteration}] train-loss:{:.6}", training.loss);
        for (name, value) in self.secondary_names.iter().zip(&training.secondary) {
            line.push_str(&format!(" train-{name}:{value:.6}"));
        }
        if let Some(validation) = validation {
            line.push_str(&format!(" valid-loss:{:.6}", validation.loss));
            for (name, value) in self.secondary_names.iter().zip(&validation.secondary) {
                line.push_str(&format!(" valid-{name}:{value:.6}"));
            }
        }
        eprintln!("{line}");
    }

    pub fn finish(&self, learner: &str, num_trees: usize) {
        if self.verbosity >= Verbosity::Info {
            eprintln!("[{learner}] done, {num_trees} trees");
        }
    }

    pub fn note(&self, message: &str) {
        if self.verbosity >= Verbosity::Info {
            eprintln!("{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_orders() {
        assert!(Verbosity::Silent < Verbosity::Info);
        assert!(Verbosity::Info < Verbosity::Debug);
        assert_eq!(Verbosity::default(), Verbosity::Silent);
    }

    #[test]
    fn silent_logger_is_quiet() {
        // Nothing to assert beyond "does not panic": the logger writes to
        // stderr only above Silent.
        let logger = TrainingLogger::new(Verbosity::Silent, &["accuracy"]);
        logger.start("TEST", 10, 2);
        logger.iteration(0, &LossValue { loss: 1.0, secondary: vec![0.5] }, None);
        logger.finish("TEST", 3);
    }
}
