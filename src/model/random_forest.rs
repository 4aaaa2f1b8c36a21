//! Random forest of unpruned Gini trees on bootstrap samples

use rand::rngs::StdRng;
use rand::Rng;

use crate::data::dataset::{CallDataset, FeatureMatrix};
use crate::model::decision_tree::{GrowParams, Tree};
use crate::model::{check_training_data, check_width, normalize, Classifier, FittedModel, ModelDetails};
use crate::{ForestConfig, ModelKind, Result};

/// A tree's vote for one row: the majority class of its leaf
fn vote(probability: f64) -> f64 {
    if probability > 0.5 {
        1.0
    } else if probability < 0.5 {
        0.0
    } else {
        0.5
    }
}

/// Random forest capability
pub struct RandomForestClassifier {
    config: ForestConfig,
}

impl RandomForestClassifier {
    pub fn new(config: ForestConfig) -> Self {
        RandomForestClassifier { config }
    }

    /// Features tried per split: configured, else floor(sqrt(p)), at least 1
    fn mtry(&self, n_features: usize) -> usize {
        self.config
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features.max(1))
    }
}

impl Classifier for RandomForestClassifier {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn fit(&self, data: &CallDataset, rng: &mut StdRng) -> Result<Box<dyn FittedModel>> {
        check_training_data(data)?;

        let n = data.n_samples();
        let mtry = self.mtry(data.n_features());
        let params = GrowParams {
            min_split: (2 * self.config.min_node_size).max(2),
            min_leaf: self.config.min_node_size.max(1),
            max_depth: self.config.max_depth,
            max_features: Some(mtry),
        };

        let mut trees = Vec::with_capacity(self.config.n_trees);
        let mut oob_votes = vec![0.0; n];
        let mut oob_counts = vec![0usize; n];

        for _ in 0..self.config.n_trees {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let tree = Tree::grow(data, &bootstrap, &params, rng);

            let mut in_bag = vec![false; n];
            for &i in &bootstrap {
                in_bag[i] = true;
            }
            for i in (0..n).filter(|&i| !in_bag[i]) {
                oob_votes[i] += vote(tree.predict_row(&data.features.rows[i]));
                oob_counts[i] += 1;
            }
            trees.push(tree);
        }

        let scored: Vec<usize> = (0..n).filter(|&i| oob_counts[i] > 0).collect();
        let oob_error = (!scored.is_empty()).then(|| {
            let wrong = scored
                .iter()
                .filter(|&&i| {
                    let p = oob_votes[i] / oob_counts[i] as f64;
                    (p >= 0.5) != (data.labels[i] >= 0.5)
                })
                .count();
            wrong as f64 / scored.len() as f64
        });

        log::info!(
            "Random forest: {} trees, mtry={}, OOB error={}",
            trees.len(),
            mtry,
            oob_error.map_or("n/a".to_string(), |e| format!("{:.4}", e))
        );

        Ok(Box::new(FittedForest {
            feature_names: data.features.column_names(),
            trees,
            max_features: mtry,
            oob_error,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct FittedForest {
    feature_names: Vec<String>,
    trees: Vec<Tree>,
    max_features: usize,
    oob_error: Option<f64>,
}

impl FittedModel for FittedForest {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Fraction of trees voting for conversion
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        check_width(self.feature_names.len(), features)?;
        if self.trees.is_empty() {
            return Ok(vec![0.5; features.n_rows()]);
        }
        let n_trees = self.trees.len() as f64;
        Ok(features
            .rows
            .iter()
            .map(|row| self.trees.iter().map(|t| vote(t.predict_row(row))).sum::<f64>() / n_trees)
            .collect())
    }

    /// Mean decrease in Gini impurity
    fn importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.feature_names.len()];
        for tree in &self.trees {
            for (t, s) in total.iter_mut().zip(tree.raw_importances()) {
                *t += s;
            }
        }
        normalize(total)
    }

    fn details(&self) -> ModelDetails {
        ModelDetails::RandomForest {
            n_trees: self.trees.len(),
            max_features: self.max_features,
            oob_error: self.oob_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_data::synthetic;
    use crate::training::metrics::auc;
    use rand::SeedableRng;

    fn config(n_trees: usize) -> ForestConfig {
        ForestConfig {
            n_trees,
            min_node_size: 1,
            max_depth: 40,
            max_features: None,
        }
    }

    #[test]
    fn test_mtry_defaults_to_sqrt() {
        let forest = RandomForestClassifier::new(config(10));
        assert_eq!(forest.mtry(3), 1);
        assert_eq!(forest.mtry(16), 4);
        assert_eq!(forest.mtry(20), 4);

        let fixed = RandomForestClassifier::new(ForestConfig {
            max_features: Some(50),
            ..config(10)
        });
        assert_eq!(fixed.mtry(20), 20);
    }

    #[test]
    fn test_vote_fractions() {
        let data = synthetic(300, 21);
        let mut rng = StdRng::seed_from_u64(42);
        let model = RandomForestClassifier::new(config(25)).fit(&data, &mut rng).unwrap();

        let test = synthetic(200, 22);
        let probs = model.predict_proba(&test.features).unwrap();
        for p in &probs {
            // Each probability is a multiple of 1/(2 * n_trees)
            let scaled = p * 50.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
            assert!((0.0..=1.0).contains(p));
        }
        assert!(auc(&test.labels, &probs).unwrap() > 0.9);

        let ModelDetails::RandomForest { n_trees, oob_error, .. } = model.details() else {
            panic!("wrong details");
        };
        assert_eq!(n_trees, 25);
        assert!(oob_error.unwrap() < 0.25);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = synthetic(120, 4);
        let a = RandomForestClassifier::new(config(10))
            .fit(&data, &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = RandomForestClassifier::new(config(10))
            .fit(&data, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(
            a.predict_proba(&data.features).unwrap(),
            b.predict_proba(&data.features).unwrap()
        );
    }

    #[test]
    fn test_importances_favor_signal() {
        let data = synthetic(300, 5);
        let mut rng = StdRng::seed_from_u64(42);
        let model = RandomForestClassifier::new(config(30)).fit(&data, &mut rng).unwrap();

        let importances = model.importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(model.top_features(1)[0].feature, "signal");
    }
}
