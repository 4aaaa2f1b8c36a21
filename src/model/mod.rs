//! Classifier capabilities
//!
//! Three interchangeable classifiers behind one pair of traits:
//! - Logistic regression trained with burn
//! - A single decision tree with cross-validated cost-complexity pruning
//! - A random forest of unpruned trees

pub mod decision_tree;
pub mod logistic;
pub mod random_forest;

pub use decision_tree::{CpRow, DecisionTreeClassifier, Tree};
pub use logistic::{Coefficient, LogisticRegression};
pub use random_forest::RandomForestClassifier;

use rand::rngs::StdRng;
use serde::Serialize;
use std::fmt;

use crate::data::dataset::{CallDataset, FeatureMatrix};
use crate::{Config, ConversionError, ModelKind, Result};

/// Something that can be fit to labeled calls
pub trait Classifier {
    fn kind(&self) -> ModelKind;

    fn fit(&self, data: &CallDataset, rng: &mut StdRng) -> Result<Box<dyn FittedModel>>;
}

/// A fitted classifier producing P(conversion = 1) per row
pub trait FittedModel: fmt::Debug {
    fn kind(&self) -> ModelKind;

    /// Names of the feature columns the model was fit on, in order
    fn feature_names(&self) -> &[String];

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Per-feature importance, same order as `feature_names`
    fn importances(&self) -> Vec<f64>;

    fn details(&self) -> ModelDetails;

    /// The `k` most important features, largest first
    fn top_features(&self, k: usize) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = self
            .feature_names()
            .iter()
            .zip(self.importances())
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.clone(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        ranked.truncate(k);
        ranked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Model-specific fit summary for the run report
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelDetails {
    Logistic {
        intercept: f64,
        coefficients: Vec<Coefficient>,
        epochs: usize,
        converged: bool,
        final_loss: f64,
    },
    DecisionTree {
        chosen_cp: f64,
        n_leaves: usize,
        cp_table: Vec<CpRow>,
    },
    RandomForest {
        n_trees: usize,
        max_features: usize,
        oob_error: Option<f64>,
    },
}

/// Result of fitting one classifier; a failure does not stop the others
#[derive(Debug)]
pub enum ModelOutcome {
    Fitted(Box<dyn FittedModel>),
    Failed { kind: ModelKind, error: ConversionError },
}

impl ModelOutcome {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelOutcome::Fitted(model) => model.kind(),
            ModelOutcome::Failed { kind, .. } => *kind,
        }
    }

    pub fn fitted(&self) -> Option<&dyn FittedModel> {
        match self {
            ModelOutcome::Fitted(model) => Some(model.as_ref()),
            ModelOutcome::Failed { .. } => None,
        }
    }
}

/// Build the classifier for a kind from its config section
pub fn classifier(kind: ModelKind, config: &Config) -> Box<dyn Classifier> {
    match kind {
        ModelKind::Logistic => Box::new(LogisticRegression::new(config.logistic.clone())),
        ModelKind::DecisionTree => Box::new(DecisionTreeClassifier::new(config.tree.clone())),
        ModelKind::RandomForest => Box::new(RandomForestClassifier::new(config.forest.clone())),
    }
}

/// Fit every requested classifier, capturing failures per model
pub fn fit_all(
    kinds: &[ModelKind],
    config: &Config,
    train: &CallDataset,
    rng: &mut StdRng,
) -> Vec<ModelOutcome> {
    kinds
        .iter()
        .map(|&kind| {
            log::info!("Fitting {} on {} rows", kind, train.n_samples());
            match classifier(kind, config).fit(train, rng) {
                Ok(model) => ModelOutcome::Fitted(model),
                Err(error) => {
                    log::warn!("{} failed: {}", kind, error);
                    ModelOutcome::Failed { kind, error }
                }
            }
        })
        .collect()
}

/// Shared preconditions for fitting
pub(crate) fn check_training_data(data: &CallDataset) -> Result<()> {
    if data.is_empty() {
        return Err(ConversionError::InsufficientData(
            "no training rows".to_string(),
        ));
    }
    if data.n_features() == 0 {
        return Err(ConversionError::InsufficientData(
            "no feature columns".to_string(),
        ));
    }
    data.features.check_finite()
}

/// Shared precondition for prediction
pub(crate) fn check_width(expected: usize, features: &FeatureMatrix) -> Result<()> {
    if features.n_features() != expected {
        return Err(ConversionError::FeatureMismatch {
            expected,
            found: features.n_features(),
        });
    }
    Ok(())
}

/// Scale non-negative scores to sum to one; all-zero stays all-zero
pub(crate) fn normalize(mut scores: Vec<f64>) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for s in &mut scores {
            *s /= total;
        }
    }
    scores
}

#[cfg(test)]
pub(crate) mod test_data {
    use crate::data::dataset::{CallDataset, FeatureColumn, FeatureMatrix};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Two informative features and one noise feature. The label is 1 when
    /// `signal + 0.5 * weak` plus a little noise is positive.
    pub fn synthetic(n: usize, seed: u64) -> CallDataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            let signal: f64 = rng.gen_range(-2.0..2.0);
            let weak: f64 = rng.gen_range(-2.0..2.0);
            let noise: f64 = rng.gen_range(-2.0..2.0);
            let jitter: f64 = rng.gen_range(-0.3..0.3);
            labels.push(if signal + 0.5 * weak + jitter > 0.0 { 1.0 } else { 0.0 });
            rows.push(vec![signal, weak, noise]);
        }
        let columns = ["signal", "weak", "noise"]
            .iter()
            .map(|name| FeatureColumn {
                name: name.to_string(),
                source: name.to_string(),
            })
            .collect();
        CallDataset::new(FeatureMatrix::new(columns, rows), labels, (0..n).collect()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::FeatureColumn;
    use rand::SeedableRng;

    #[test]
    fn test_failures_are_captured_per_model() {
        let mut data = test_data::synthetic(60, 1);
        data.features.rows[3][0] = f64::NAN;
        let mut rng = StdRng::seed_from_u64(42);

        let outcomes = fit_all(
            &[ModelKind::DecisionTree, ModelKind::RandomForest],
            &Config::default(),
            &data,
            &mut rng,
        );

        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            match outcome {
                ModelOutcome::Failed {
                    error: ConversionError::NonFinite { column },
                    ..
                } => assert_eq!(column, "signal"),
                other => panic!("expected NonFinite failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let data = test_data::synthetic(80, 2);
        let mut rng = StdRng::seed_from_u64(42);
        let model = classifier(ModelKind::DecisionTree, &Config::default())
            .fit(&data, &mut rng)
            .unwrap();

        let narrow = FeatureMatrix::new(
            vec![FeatureColumn { name: "signal".into(), source: "signal".into() }],
            vec![vec![1.0]],
        );
        assert!(matches!(
            model.predict_proba(&narrow),
            Err(ConversionError::FeatureMismatch { expected: 3, found: 1 })
        ));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(vec![1.0, 3.0]), vec![0.25, 0.75]);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
