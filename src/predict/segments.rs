//! Box-plot statistics of the combined likelihood per segment

use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::table::Table;
use crate::features::cleaning::quantile;
use crate::features::encoding::NA_LEVEL;
use crate::Result;

/// Five-number summary plus count and mean
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxStats {
    pub n: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

impl BoxStats {
    /// `None` for an empty slice
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        Some(BoxStats {
            n,
            min: sorted[0],
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q3: quantile(&sorted, 0.75),
            max: sorted[n - 1],
            mean: sorted.iter().sum::<f64>() / n as f64,
        })
    }
}

/// Likelihood distribution of one level of one column
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub column: String,
    pub level: String,
    pub stats: BoxStats,
}

/// Group scored rows by the values of `column`; unscored rows are skipped
/// and missing values form their own `NA` segment
pub fn summarize(table: &Table, likelihood: &[Option<f64>], column: &str) -> Result<Vec<SegmentSummary>> {
    let values = &table.require(column)?.values;

    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (value, score) in values.iter().zip(likelihood) {
        if let Some(p) = score {
            let level = value.key().unwrap_or_else(|| NA_LEVEL.to_string());
            groups.entry(level).or_default().push(*p);
        }
    }

    Ok(groups
        .into_iter()
        .filter_map(|(level, scores)| {
            BoxStats::from_values(&scores).map(|stats| SegmentSummary {
                column: column.to_string(),
                level,
                stats,
            })
        })
        .collect())
}

/// Summaries for every requested column present in the table
pub fn summarize_all(table: &Table, likelihood: &[Option<f64>], columns: &[String]) -> Result<Vec<SegmentSummary>> {
    let mut out = Vec::new();
    for column in columns {
        if !table.has_column(column) {
            log::warn!("Segment column {} not found, skipped", column);
            continue;
        }
        out.extend(summarize(table, likelihood, column)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn test_box_stats() {
        let stats = BoxStats::from_values(&[0.5, 0.1, 0.9, 0.3, 0.7]).unwrap();
        assert_eq!(stats.n, 5);
        assert_eq!(stats.min, 0.1);
        assert_eq!(stats.median, 0.5);
        assert!((stats.q1 - 0.3).abs() < 1e-12);
        assert!((stats.q3 - 0.7).abs() < 1e-12);
        assert_eq!(stats.max, 0.9);
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!(BoxStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_summaries_skip_unscored_rows() {
        let table = Table::from_rows(
            &["device"],
            vec![
                vec![Value::Text("mobile".into())],
                vec![Value::Text("desktop".into())],
                vec![Value::Text("mobile".into())],
                vec![Value::Missing],
                vec![Value::Text("desktop".into())],
            ],
        )
        .unwrap();
        let likelihood = [Some(0.2), Some(0.6), Some(0.4), Some(0.9), None];

        let segments = summarize(&table, &likelihood, "device").unwrap();
        let levels: Vec<&str> = segments.iter().map(|s| s.level.as_str()).collect();
        assert_eq!(levels, vec!["NA", "desktop", "mobile"]);

        let mobile = &segments[2].stats;
        assert_eq!(mobile.n, 2);
        assert!((mobile.mean - 0.3).abs() < 1e-12);
        assert_eq!(segments[1].stats.n, 1);
    }

    #[test]
    fn test_unknown_columns_are_skipped() {
        let table = Table::from_rows(&["state"], vec![vec![Value::Text("CA".into())]]).unwrap();
        let segments = summarize_all(&table, &[Some(0.5)], &["state".into(), "browser".into()]).unwrap();
        assert_eq!(segments.len(), 1);
    }
}
