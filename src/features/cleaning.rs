//! Column classification and cleaning transforms
//!
//! Every merged column is assigned one treatment through a static, reviewed
//! table (`[cleaning.columns]` in the config). Cleaning applies the
//! treatments in a fixed order: blank-to-NA, drop, mean imputation, IQR
//! capping, log transform, standardization.

use crate::data::table::{Column, Table};
use crate::{CleaningConfig, ConversionError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a column is handled before modeling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    /// Opaque key or leakage-prone metadata, never a model input
    Identifier,
    /// The conversion outcome
    Label,
    /// Single observed value
    DropConstant,
    /// More than 85% missing
    DropSparse,
    /// Under 1% missing, filled with the column mean
    ImputeMean,
    /// Categorical column whose empty strings mean "not provided"
    BlankToNa,
    /// Numeric column clamped to the IQR fences
    OutlierCap,
    /// One-hot encoded, NA is its own level
    Categorical,
    /// Numeric column standardized as is
    Numeric,
}

impl Treatment {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Treatment::DropConstant | Treatment::DropSparse)
    }

    /// Numeric columns that end up standardized
    pub fn is_numeric_feature(&self) -> bool {
        matches!(
            self,
            Treatment::ImputeMean | Treatment::OutlierCap | Treatment::Numeric
        )
    }

    pub fn is_categorical_feature(&self) -> bool {
        matches!(self, Treatment::Categorical | Treatment::BlankToNa)
    }
}

/// Static column → treatment lookup
#[derive(Debug, Clone)]
pub struct ColumnPolicy {
    columns: BTreeMap<String, Treatment>,
    log_transform: Vec<String>,
    iqr_multiplier: f64,
}

impl ColumnPolicy {
    pub fn new(
        columns: BTreeMap<String, Treatment>,
        log_transform: Vec<String>,
        iqr_multiplier: f64,
    ) -> Self {
        ColumnPolicy {
            columns,
            log_transform,
            iqr_multiplier,
        }
    }

    pub fn from_config(config: &CleaningConfig) -> Self {
        Self::new(
            config.columns.clone(),
            config.log_transform.clone(),
            config.iqr_multiplier,
        )
    }

    pub fn treatment(&self, column: &str) -> Option<Treatment> {
        self.columns.get(column).copied()
    }

    /// Configured columns with the given treatment, in name order
    pub fn columns_with(&self, treatment: Treatment) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, t)| **t == treatment)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn label_column(&self) -> Option<&str> {
        self.columns_with(Treatment::Label).into_iter().next()
    }

    pub fn is_log_transformed(&self, column: &str) -> bool {
        self.log_transform.iter().any(|c| c == column)
    }

    pub fn iqr_multiplier(&self) -> f64 {
        self.iqr_multiplier
    }
}

/// Lower and upper IQR fences
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IqrBounds {
    pub lower: f64,
    pub upper: f64,
}

/// Mean and standard deviation applied by standardization
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Standardization {
    pub mean: f64,
    pub std: f64,
}

impl Standardization {
    pub fn apply(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }
}

/// What cleaning did to each column
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningReport {
    pub dropped: Vec<String>,
    pub blanks_replaced: BTreeMap<String, usize>,
    pub imputed: BTreeMap<String, f64>,
    pub capped: BTreeMap<String, (IqrBounds, usize)>,
    pub log_transformed: Vec<String>,
    pub standardized: BTreeMap<String, Standardization>,
}

/// Replace empty strings with NA, returning how many cells changed
pub fn blank_to_na(column: &mut Column) -> usize {
    let mut replaced = 0;
    for value in column.values.iter_mut() {
        if matches!(value, Value::Text(s) if s.is_empty()) {
            *value = Value::Missing;
            replaced += 1;
        }
    }
    replaced
}

fn ensure_numeric(column: &Column) -> Result<()> {
    if column.is_numeric() {
        Ok(())
    } else {
        Err(ConversionError::Parse(format!(
            "column {} holds text but is treated as numeric",
            column.name
        )))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator)
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Quantile with linear interpolation between order statistics
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Fill NA with the mean of the observed values; `None` when nothing was observed
pub fn impute_mean(column: &mut Column) -> Result<Option<f64>> {
    ensure_numeric(column)?;
    let observed = column.numbers();
    if observed.is_empty() {
        return Ok(None);
    }
    let m = mean(&observed);
    for value in column.values.iter_mut().filter(|v| v.is_missing()) {
        *value = Value::Number(m);
    }
    Ok(Some(m))
}

/// `[Q1 - k·IQR, Q3 + k·IQR]` over the observed values
pub fn iqr_bounds(values: &[f64], multiplier: f64) -> Option<IqrBounds> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    Some(IqrBounds {
        lower: q1 - multiplier * iqr,
        upper: q3 + multiplier * iqr,
    })
}

/// Clamp values outside the IQR fences to the nearest fence. Values are
/// never removed; NA stays NA.
pub fn cap_outliers(column: &mut Column, multiplier: f64) -> Result<Option<(IqrBounds, usize)>> {
    ensure_numeric(column)?;
    let Some(bounds) = iqr_bounds(&column.numbers(), multiplier) else {
        return Ok(None);
    };
    let mut capped = 0;
    for value in column.values.iter_mut() {
        if let Value::Number(x) = value {
            let clamped = x.clamp(bounds.lower, bounds.upper);
            if clamped != *x {
                *x = clamped;
                capped += 1;
            }
        }
    }
    Ok(Some((bounds, capped)))
}

/// log(x + 1) on every observed value
pub fn log1p_transform(column: &mut Column) -> Result<()> {
    ensure_numeric(column)?;
    for value in column.values.iter_mut() {
        if let Value::Number(x) = value {
            let y = x.ln_1p();
            *value = if y.is_finite() {
                Value::Number(y)
            } else {
                Value::Missing
            };
        }
    }
    Ok(())
}

/// Subtract the mean and divide by the standard deviation. A column without
/// spread is a classification error: it belongs in the drop bucket. A mean or
/// spread that is not finite is reported as `NonFinite`.
pub fn standardize(column: &mut Column) -> Result<Standardization> {
    ensure_numeric(column)?;
    let observed = column.numbers();
    let params = Standardization {
        mean: mean(&observed),
        std: sample_std(&observed),
    };
    if !(params.mean.is_finite() && params.std.is_finite()) {
        return Err(ConversionError::NonFinite {
            column: column.name.clone(),
        });
    }
    if params.std <= 0.0 {
        return Err(ConversionError::ZeroVariance {
            column: column.name.clone(),
        });
    }
    for value in column.values.iter_mut() {
        if let Value::Number(x) = value {
            *x = params.apply(*x);
        }
    }
    Ok(params)
}

/// Applies a `ColumnPolicy` to a merged table
pub struct Cleaner {
    policy: ColumnPolicy,
}

impl Cleaner {
    pub fn new(policy: ColumnPolicy) -> Self {
        Cleaner { policy }
    }

    pub fn policy(&self) -> &ColumnPolicy {
        &self.policy
    }

    /// Configured columns with a treatment that exist in the table
    fn present<'a>(&'a self, table: &Table, treatment: Treatment) -> Vec<&'a str> {
        self.policy
            .columns_with(treatment)
            .into_iter()
            .filter(|name| {
                let found = table.has_column(name);
                if !found {
                    log::debug!("Configured column {} not present, skipping", name);
                }
                found
            })
            .collect()
    }

    /// Run every cleaning step in order, mutating the table in place
    pub fn clean(&self, table: &mut Table) -> Result<CleaningReport> {
        let mut report = CleaningReport::default();

        for name in self.present(table, Treatment::BlankToNa) {
            let replaced = blank_to_na(table.require_mut(name)?);
            report.blanks_replaced.insert(name.to_string(), replaced);
        }

        for treatment in [Treatment::DropConstant, Treatment::DropSparse] {
            for name in self.present(table, treatment) {
                table.drop_column(name);
                report.dropped.push(name.to_string());
            }
        }

        for name in self.present(table, Treatment::ImputeMean) {
            match impute_mean(table.require_mut(name)?)? {
                Some(m) => {
                    report.imputed.insert(name.to_string(), m);
                }
                None => log::warn!("Column {} has no observed values to impute from", name),
            }
        }

        for name in self.present(table, Treatment::OutlierCap) {
            if let Some(result) =
                cap_outliers(table.require_mut(name)?, self.policy.iqr_multiplier())?
            {
                log::debug!(
                    "Capped {} values of {} to [{:.3}, {:.3}]",
                    result.1,
                    name,
                    result.0.lower,
                    result.0.upper
                );
                report.capped.insert(name.to_string(), result);
            }
        }

        for name in &self.policy.log_transform {
            if let Some(column) = table.column_mut(name) {
                log1p_transform(column)?;
                report.log_transformed.push(name.clone());
            }
        }

        let numeric: Vec<&str> = [Treatment::ImputeMean, Treatment::OutlierCap, Treatment::Numeric]
            .into_iter()
            .flat_map(|t| self.present(table, t))
            .collect();
        for name in numeric {
            let params = standardize(table.require_mut(name)?)?;
            report.standardized.insert(name.to_string(), params);
        }

        log::info!(
            "Cleaned table: dropped {}, imputed {}, capped {}, standardized {} columns",
            report.dropped.len(),
            report.imputed.len(),
            report.capped.len(),
            report.standardized.len()
        );

        Ok(report)
    }
}
