//! One-hot encoding of cleaned tables into fixed-width feature matrices
//!
//! The schema is fit once and then applied to any table with the same
//! columns, so every encoding shares the same feature set and order.

use crate::data::dataset::{FeatureColumn, FeatureMatrix};
use crate::data::table::{Column, Table};
use crate::features::cleaning::{ColumnPolicy, Treatment};
use crate::{ConversionError, Result, Value};

/// Level used for NA in ordinary categorical columns
pub const NA_LEVEL: &str = "NA";

/// How one source column turns into feature columns
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureSpec {
    /// Copied through as a single feature
    Numeric { column: String },
    /// One indicator per level except the first
    Categorical {
        column: String,
        /// All levels, reference first
        levels: Vec<String>,
        /// NA is a level of its own; otherwise NA makes the row incomplete
        na_is_level: bool,
    },
}

impl FeatureSpec {
    pub fn column(&self) -> &str {
        match self {
            FeatureSpec::Numeric { column } | FeatureSpec::Categorical { column, .. } => column,
        }
    }

    fn width(&self) -> usize {
        match self {
            FeatureSpec::Numeric { .. } => 1,
            FeatureSpec::Categorical { levels, .. } => levels.len().saturating_sub(1),
        }
    }
}

/// Indicator column name for a level
pub fn indicator_name(column: &str, level: &str) -> String {
    format!("{}_{}", column, level)
}

/// Encoded rows plus the label, one entry per table row
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTable {
    pub features: FeatureMatrix,
    /// `None` where the label is NA
    pub labels: Vec<Option<f64>>,
}

impl EncodedTable {
    /// Rows with every feature observed
    pub fn complete_rows(&self) -> Vec<usize> {
        (0..self.features.n_rows())
            .filter(|&i| self.features.is_complete(i))
            .collect()
    }

    /// Rows usable for supervised fitting: labeled and complete
    pub fn labeled_rows(&self) -> Vec<usize> {
        (0..self.features.n_rows())
            .filter(|&i| self.labels[i].is_some() && self.features.is_complete(i))
            .collect()
    }
}

/// Fitted feature layout
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingSchema {
    specs: Vec<FeatureSpec>,
    label: Option<String>,
}

impl EncodingSchema {
    /// Derive the feature layout from a cleaned table. Columns are visited in
    /// table order; identifiers, the label, dropped and unclassified columns
    /// contribute no features.
    pub fn fit(table: &Table, policy: &ColumnPolicy) -> Result<Self> {
        let mut specs = Vec::new();

        for column in table.columns() {
            let Some(treatment) = policy.treatment(&column.name) else {
                log::warn!("Column {} has no treatment, excluded from features", column.name);
                continue;
            };

            if treatment.is_numeric_feature() {
                specs.push(FeatureSpec::Numeric {
                    column: column.name.clone(),
                });
            } else if treatment.is_categorical_feature() {
                let na_is_level = treatment == Treatment::Categorical;
                let levels = categorical_levels(column, na_is_level);
                if levels.len() < 2 {
                    log::warn!(
                        "Categorical column {} has {} level(s), contributes no indicators",
                        column.name,
                        levels.len()
                    );
                }
                specs.push(FeatureSpec::Categorical {
                    column: column.name.clone(),
                    levels,
                    na_is_level,
                });
            }
        }

        let schema = EncodingSchema {
            specs,
            label: policy.label_column().map(str::to_string),
        };
        log::info!(
            "Encoding schema: {} source columns -> {} features",
            schema.specs.len(),
            schema.n_features()
        );
        Ok(schema)
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    pub fn n_features(&self) -> usize {
        self.specs.iter().map(FeatureSpec::width).sum()
    }

    /// Feature columns in encoding order
    pub fn feature_columns(&self) -> Vec<FeatureColumn> {
        let mut columns = Vec::with_capacity(self.n_features());
        for spec in &self.specs {
            match spec {
                FeatureSpec::Numeric { column } => columns.push(FeatureColumn {
                    name: column.clone(),
                    source: column.clone(),
                }),
                FeatureSpec::Categorical { column, levels, .. } => {
                    columns.extend(levels.iter().skip(1).map(|level| FeatureColumn {
                        name: indicator_name(column, level),
                        source: column.clone(),
                    }))
                }
            }
        }
        columns
    }

    /// Encode a table. Levels absent from the table still get their (all-zero)
    /// columns; levels the schema never saw encode as all zeros.
    pub fn transform(&self, table: &Table) -> Result<EncodedTable> {
        let n = table.n_rows();
        let mut rows: Vec<Vec<f64>> = vec![Vec::with_capacity(self.n_features()); n];

        for spec in &self.specs {
            let column = table.require(spec.column())?;
            match spec {
                FeatureSpec::Numeric { column: name } => {
                    for (row, value) in rows.iter_mut().zip(&column.values) {
                        row.push(numeric_cell(name, value)?);
                    }
                }
                FeatureSpec::Categorical {
                    levels,
                    na_is_level,
                    ..
                } => {
                    for (row, value) in rows.iter_mut().zip(&column.values) {
                        encode_level(row, value, levels, *na_is_level);
                    }
                }
            }
        }

        let labels = match &self.label {
            Some(label) if table.has_column(label) => table
                .require(label)?
                .values
                .iter()
                .map(label_cell)
                .collect::<Result<Vec<_>>>()?,
            _ => vec![None; n],
        };

        Ok(EncodedTable {
            features: FeatureMatrix::new(self.feature_columns(), rows),
            labels,
        })
    }
}

fn categorical_levels(column: &Column, na_is_level: bool) -> Vec<String> {
    let mut levels = column.levels();
    if na_is_level && column.missing_count() > 0 {
        levels.push(NA_LEVEL.to_string());
    }
    levels
}

fn numeric_cell(column: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(x) => Ok(*x),
        Value::Missing => Ok(f64::NAN),
        Value::Text(s) => Err(ConversionError::Parse(format!(
            "numeric feature {} holds text {:?}",
            column, s
        ))),
    }
}

fn encode_level(row: &mut Vec<f64>, value: &Value, levels: &[String], na_is_level: bool) {
    let width = levels.len().saturating_sub(1);
    let key = match value.key() {
        Some(k) => k,
        None if na_is_level => NA_LEVEL.to_string(),
        None => {
            row.extend(std::iter::repeat(f64::NAN).take(width));
            return;
        }
    };
    row.extend(levels.iter().skip(1).map(|level| if *level == key { 1.0 } else { 0.0 }));
}

fn label_cell(value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Missing => Ok(None),
        Value::Number(x) if *x == 0.0 || *x == 1.0 => Ok(Some(*x)),
        other => Err(ConversionError::Parse(format!(
            "label must be 0, 1 or NA, found {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn policy() -> ColumnPolicy {
        let mut columns = BTreeMap::new();
        columns.insert("call_id".to_string(), Treatment::Identifier);
        columns.insert("conversion".to_string(), Treatment::Label);
        columns.insert("age".to_string(), Treatment::ImputeMean);
        columns.insert("device".to_string(), Treatment::Categorical);
        columns.insert("gender".to_string(), Treatment::BlankToNa);
        ColumnPolicy::new(columns, vec![], 1.5)
    }

    fn table() -> Table {
        Table::from_columns(vec![
            Column::new("call_id", (0..5).map(|i| Value::Number(i as f64)).collect()),
            Column::new(
                "age",
                vec![
                    Value::Number(-1.0),
                    Value::Number(0.0),
                    Value::Number(1.0),
                    Value::Number(0.5),
                    Value::Number(-0.5),
                ],
            ),
            Column::new(
                "device",
                vec![text("tablet"), text("desktop"), text("mobile"), Value::Missing, text("desktop")],
            ),
            Column::new(
                "gender",
                vec![text("F"), text("M"), Value::Missing, text("F"), text("M")],
            ),
            Column::new(
                "conversion",
                vec![
                    Value::Number(1.0),
                    Value::Number(0.0),
                    Value::Missing,
                    Value::Number(0.0),
                    Value::Number(1.0),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_feature_layout() {
        let schema = EncodingSchema::fit(&table(), &policy()).unwrap();
        let names: Vec<String> = schema.feature_columns().into_iter().map(|c| c.name).collect();

        // device levels: desktop (reference), mobile, tablet, NA
        assert_eq!(
            names,
            vec!["age", "device_mobile", "device_tablet", "device_NA", "gender_M"]
        );
    }

    #[test]
    fn test_one_indicator_per_non_reference_level() {
        let t = table();
        let schema = EncodingSchema::fit(&t, &policy()).unwrap();
        let encoded = schema.transform(&t).unwrap();
        let device = t.column("device").unwrap();

        for (i, value) in device.values.iter().enumerate() {
            let indicators = &encoded.features.rows[i][1..4];
            let ones = indicators.iter().filter(|&&x| x == 1.0).count();
            let is_reference = value.key().as_deref() == Some("desktop");
            if is_reference {
                assert_eq!(ones, 0);
            } else {
                assert_eq!(ones, 1);
            }
            assert!(indicators.iter().all(|&x| x == 0.0 || x == 1.0));
        }
    }

    #[test]
    fn test_blank_to_na_column_marks_row_incomplete() {
        let t = table();
        let schema = EncodingSchema::fit(&t, &policy()).unwrap();
        let encoded = schema.transform(&t).unwrap();

        assert!(encoded.features.rows[2][4].is_nan());
        assert_eq!(encoded.complete_rows(), vec![0, 1, 3, 4]);
        assert_eq!(encoded.labeled_rows(), vec![0, 1, 3, 4]);
        assert_eq!(encoded.labels[2], None);
    }

    #[test]
    fn test_columns_align_across_subsets() {
        let t = table();
        let schema = EncodingSchema::fit(&t, &policy()).unwrap();
        let full = schema.transform(&t).unwrap();

        // Subset without tablet or NA devices still gets their columns
        let subset = t.select_rows(&[1, 4]);
        let part = schema.transform(&subset).unwrap();

        assert_eq!(part.features.columns, full.features.columns);
        assert_eq!(part.features.rows[0], full.features.rows[1]);
        assert_eq!(part.features.rows[1][2], 0.0);
    }

    #[test]
    fn test_unseen_level_encodes_as_zeros() {
        let t = table();
        let schema = EncodingSchema::fit(&t, &policy()).unwrap();

        let mut other = t.select_rows(&[0]);
        other.require_mut("device").unwrap().values[0] = text("watch");
        let encoded = schema.transform(&other).unwrap();

        assert_eq!(&encoded.features.rows[0][1..4], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_bad_label_is_rejected() {
        let mut t = table();
        t.require_mut("conversion").unwrap().values[0] = Value::Number(2.0);
        let schema = EncodingSchema::fit(&t, &policy()).unwrap();
        assert!(schema.transform(&t).is_err());
    }
}
