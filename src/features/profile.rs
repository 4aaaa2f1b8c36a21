//! Per-column profile of the merged table
//!
//! Supports review of the static column classification: flags columns that
//! look constant or sparse so they can be moved into a drop bucket.

use crate::data::table::Table;
use crate::features::cleaning::{ColumnPolicy, Treatment};
use serde::Serialize;

/// Missing share above which a column is considered sparse
pub const SPARSE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub treatment: Option<Treatment>,
    pub numeric: bool,
    pub missing_fraction: f64,
    pub blank_count: usize,
    pub distinct: usize,
    pub looks_constant: bool,
    pub looks_sparse: bool,
}

impl ColumnProfile {
    /// The observed shape disagrees with the configured treatment
    pub fn needs_review(&self) -> bool {
        match self.treatment {
            None => true,
            Some(t) if t.is_dropped() => false,
            Some(Treatment::Identifier) | Some(Treatment::Label) => false,
            Some(_) => self.looks_constant || self.looks_sparse,
        }
    }
}

/// Profile every column of the table against the policy
pub fn profile(table: &Table, policy: &ColumnPolicy) -> Vec<ColumnProfile> {
    table
        .columns()
        .iter()
        .map(|column| {
            let missing_fraction = column.missing_fraction();
            let distinct = column.levels().len();
            let blank_count = column
                .values
                .iter()
                .filter(|v| matches!(v, crate::Value::Text(s) if s.is_empty()))
                .count();
            ColumnProfile {
                name: column.name.clone(),
                treatment: policy.treatment(&column.name),
                numeric: column.is_numeric(),
                missing_fraction,
                blank_count,
                distinct,
                looks_constant: distinct <= 1,
                looks_sparse: missing_fraction > SPARSE_THRESHOLD,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Column;
    use crate::Value;
    use std::collections::BTreeMap;

    #[test]
    fn test_profile_flags() {
        let mut columns = BTreeMap::new();
        columns.insert("country".to_string(), Treatment::Categorical);
        columns.insert("spouse_age".to_string(), Treatment::DropSparse);
        let policy = ColumnPolicy::new(columns, vec![], 1.5);

        let mut spouse = vec![Value::Missing; 9];
        spouse.push(Value::Number(40.0));
        let table = Table::from_columns(vec![
            Column::new("country", vec![Value::Text("US".into()); 10]),
            Column::new("spouse_age", spouse),
            Column::new("mystery", vec![Value::Number(1.0); 10]),
        ])
        .unwrap();

        let profiles = profile(&table, &policy);

        assert!(profiles[0].looks_constant);
        assert!(profiles[0].needs_review());
        assert!(profiles[1].looks_sparse);
        assert!(!profiles[1].needs_review());
        assert_eq!(profiles[2].treatment, None);
        assert!(profiles[2].needs_review());
    }
}
