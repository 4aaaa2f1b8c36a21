//! Full-dataset scoring, the combine policy and the augmented output table

use std::collections::BTreeMap;

use crate::data::dataset::FeatureMatrix;
use crate::data::table::{Column, Table};
use crate::features::buckets::{Bins, AGE_BINS, INCOME_BINS};
use crate::model::FittedModel;
use crate::{ConversionError, ModelKind, Result, Value};

/// Raw columns the descriptive buckets are read from
pub const AGE_COLUMN: &str = "age";
pub const INCOME_COLUMN: &str = "household_income";
pub const AGE_BUCKET_COLUMN: &str = "age_bucket";
pub const INCOME_BUCKET_COLUMN: &str = "income_bucket";

/// Output column for one classifier's estimate
pub fn likelihood_column(kind: ModelKind) -> String {
    format!("likelihood_{}", kind.code())
}

/// Elementwise mean of equally long estimate vectors
pub fn average(estimates: &[&[f64]]) -> Vec<f64> {
    let Some(first) = estimates.first() else {
        return Vec::new();
    };
    let k = estimates.len() as f64;
    (0..first.len())
        .map(|i| estimates.iter().map(|e| e[i]).sum::<f64>() / k)
        .collect()
}

/// "Combine the outputs of classifiers {A, B, ...} by mean"
#[derive(Debug, Clone, PartialEq)]
pub struct CombinePolicy {
    members: Vec<ModelKind>,
}

impl CombinePolicy {
    pub fn new(members: Vec<ModelKind>) -> Self {
        let mut unique = Vec::with_capacity(members.len());
        for kind in members {
            if !unique.contains(&kind) {
                unique.push(kind);
            }
        }
        CombinePolicy { members: unique }
    }

    pub fn members(&self) -> &[ModelKind] {
        &self.members
    }

    /// Mean over the members that produced estimates. Missing members are
    /// skipped with a warning; no member at all is an error.
    pub fn combine(&self, estimates: &BTreeMap<ModelKind, Vec<f64>>) -> Result<Vec<f64>> {
        let mut available: Vec<&[f64]> = Vec::with_capacity(self.members.len());
        for kind in &self.members {
            match estimates.get(kind) {
                Some(e) => available.push(e),
                None => log::warn!("{} produced no estimates; averaging without it", kind),
            }
        }
        if available.is_empty() {
            return Err(ConversionError::NoModels);
        }
        if available.len() < self.members.len() {
            log::warn!(
                "Combined likelihood uses {} of {} configured classifiers",
                available.len(),
                self.members.len()
            );
        }
        Ok(average(&available))
    }
}

/// Estimates for every row of the merged table; `None` for incomplete rows
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub per_model: BTreeMap<ModelKind, Vec<Option<f64>>>,
    pub combined: Vec<Option<f64>>,
}

impl Scores {
    /// Combined estimates of the scored rows only
    pub fn scored_combined(&self) -> Vec<f64> {
        self.combined.iter().flatten().copied().collect()
    }
}

/// Score the complete rows of the full encoded dataset with every fitted
/// model, then combine per the policy
pub fn score_dataset(
    models: &[&dyn FittedModel],
    features: &FeatureMatrix,
    complete_rows: &[usize],
    policy: &CombinePolicy,
) -> Result<Scores> {
    let n_rows = features.n_rows();
    let scored = features.select_rows(complete_rows);

    let mut dense: BTreeMap<ModelKind, Vec<f64>> = BTreeMap::new();
    for model in models {
        dense.insert(model.kind(), model.predict_proba(&scored)?);
    }

    let combined = policy.combine(&dense)?;
    log::info!(
        "Scored {} of {} rows ({} incomplete)",
        complete_rows.len(),
        n_rows,
        n_rows - complete_rows.len()
    );

    let scatter = |values: &[f64]| {
        let mut out = vec![None; n_rows];
        for (&row, &v) in complete_rows.iter().zip(values) {
            out[row] = Some(v);
        }
        out
    };

    Ok(Scores {
        per_model: dense.iter().map(|(&k, v)| (k, scatter(v))).collect(),
        combined: scatter(&combined),
    })
}

fn bucket_column(table: &Table, source: &str, name: &str, bins: &Bins) -> Column {
    let values = match table.column(source) {
        Some(column) => column
            .values
            .iter()
            .map(|v| match v.as_f64().and_then(|x| bins.label(x)) {
                Some(label) => Value::Text(label.to_string()),
                None => Value::Missing,
            })
            .collect(),
        None => vec![Value::Missing; table.n_rows()],
    };
    Column::new(name, values)
}

fn optional_numbers(values: &[Option<f64>]) -> Vec<Value> {
    values
        .iter()
        .map(|v| v.map_or(Value::Missing, Value::Number))
        .collect()
}

/// The merged table plus one likelihood column per classifier, the combined
/// likelihood, and age and income buckets taken from the uncleaned values
pub fn augment(merged: &Table, scores: &Scores, combined_column: &str) -> Result<Table> {
    let mut out = merged.clone();
    for (&kind, values) in &scores.per_model {
        out.push_column(Column::new(likelihood_column(kind), optional_numbers(values)))?;
    }
    out.push_column(Column::new(combined_column, optional_numbers(&scores.combined)))?;
    out.push_column(bucket_column(merged, AGE_COLUMN, AGE_BUCKET_COLUMN, &AGE_BINS))?;
    out.push_column(bucket_column(
        merged,
        INCOME_COLUMN,
        INCOME_BUCKET_COLUMN,
        &INCOME_BINS,
    ))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::FeatureColumn;
    use crate::model::ModelDetails;

    /// Echoes the first feature plus an offset
    #[derive(Debug)]
    struct Constant {
        kind: ModelKind,
        names: Vec<String>,
        offset: f64,
    }

    impl FittedModel for Constant {
        fn kind(&self) -> ModelKind {
            self.kind
        }
        fn feature_names(&self) -> &[String] {
            &self.names
        }
        fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(features.rows.iter().map(|r| r[0] + self.offset).collect())
        }
        fn importances(&self) -> Vec<f64> {
            vec![1.0]
        }
        fn details(&self) -> ModelDetails {
            ModelDetails::RandomForest {
                n_trees: 0,
                max_features: 1,
                oob_error: None,
            }
        }
    }

    fn matrix() -> FeatureMatrix {
        FeatureMatrix::new(
            vec![FeatureColumn { name: "x".into(), source: "x".into() }],
            vec![vec![0.2], vec![f64::NAN], vec![0.6]],
        )
    }

    #[test]
    fn test_average_commutes() {
        let a = [0.1, 0.5, 0.93, 0.0];
        let b = [0.7, 0.2, 0.31, 1.0];
        assert_eq!(average(&[&a[..], &b[..]]), average(&[&b[..], &a[..]]));
        assert!((average(&[&a[..], &b[..]])[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_combine_substitutes_missing_member() {
        let policy = CombinePolicy::new(vec![ModelKind::Logistic, ModelKind::RandomForest]);
        let mut estimates = BTreeMap::new();
        estimates.insert(ModelKind::Logistic, vec![0.2, 0.8]);
        estimates.insert(ModelKind::DecisionTree, vec![1.0, 1.0]);

        // Decision tree is not a member and is ignored
        assert_eq!(policy.combine(&estimates).unwrap(), vec![0.2, 0.8]);

        estimates.insert(ModelKind::RandomForest, vec![0.4, 0.4]);
        let combined = policy.combine(&estimates).unwrap();
        assert!((combined[0] - 0.3).abs() < 1e-12);
        assert!((combined[1] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_combine_without_members_fails() {
        let policy = CombinePolicy::new(vec![ModelKind::Logistic]);
        assert!(matches!(
            policy.combine(&BTreeMap::new()),
            Err(ConversionError::NoModels)
        ));
    }

    #[test]
    fn test_policy_dedupes_members() {
        let policy = CombinePolicy::new(vec![ModelKind::Logistic, ModelKind::Logistic]);
        assert_eq!(policy.members(), &[ModelKind::Logistic]);
    }

    #[test]
    fn test_incomplete_rows_get_no_estimate() {
        let logistic = Constant {
            kind: ModelKind::Logistic,
            names: vec!["x".into()],
            offset: 0.0,
        };
        let forest = Constant {
            kind: ModelKind::RandomForest,
            names: vec!["x".into()],
            offset: 0.2,
        };
        let policy = CombinePolicy::new(vec![ModelKind::Logistic, ModelKind::RandomForest]);

        let models: [&dyn FittedModel; 2] = [&logistic, &forest];
        let scores = score_dataset(&models, &matrix(), &[0, 2], &policy).unwrap();

        assert_eq!(scores.per_model[&ModelKind::Logistic], vec![Some(0.2), None, Some(0.6)]);
        assert_eq!(scores.combined[1], None);
        assert!((scores.combined[2].unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(scores.scored_combined().len(), 2);
    }

    #[test]
    fn test_augment_adds_estimates_and_buckets() {
        let merged = Table::from_rows(
            &["call_id", "age", "household_income"],
            vec![
                vec![Value::Number(1.0), Value::Number(34.0), Value::Number(150_000.0)],
                vec![Value::Number(2.0), Value::Missing, Value::Number(9_000_000.0)],
                vec![Value::Number(3.0), Value::Number(71.0), Value::Number(50_000.0)],
            ],
        )
        .unwrap();
        let logistic = Constant {
            kind: ModelKind::Logistic,
            names: vec!["x".into()],
            offset: 0.0,
        };
        let policy = CombinePolicy::new(vec![ModelKind::Logistic]);
        let models: [&dyn FittedModel; 1] = [&logistic];
        let scores = score_dataset(&models, &matrix(), &[0, 2], &policy).unwrap();

        let out = augment(&merged, &scores, "likelihood_average").unwrap();

        assert_eq!(out.n_rows(), 3);
        assert_eq!(out.get(0, "likelihood_logistic"), Some(&Value::Number(0.2)));
        assert_eq!(out.get(1, "likelihood_average"), Some(&Value::Missing));
        assert_eq!(out.get(0, "age_bucket"), Some(&Value::Text("30-39".into())));
        assert_eq!(out.get(1, "age_bucket"), Some(&Value::Missing));
        assert_eq!(out.get(2, "age_bucket"), Some(&Value::Text("70-80".into())));
        assert_eq!(out.get(0, "income_bucket"), Some(&Value::Text("100K-200K".into())));
        assert_eq!(out.get(1, "income_bucket"), Some(&Value::Missing));
    }
}
