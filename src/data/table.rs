//! Column-headered table of mixed numeric/text cells
//!
//! Every stage of the pipeline mutates one of these in place; columns are
//! added and removed, rows are never deleted.

use crate::{ConversionError, Result, Value};
use std::collections::HashMap;

/// A named column of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Column {
            name: name.into(),
            values,
        }
    }

    /// Observed numeric values, skipping missing and text cells
    pub fn numbers(&self) -> Vec<f64> {
        self.values.iter().filter_map(Value::as_f64).collect()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }

    /// Fraction of cells that are missing (blank strings count as present)
    pub fn missing_fraction(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.missing_count() as f64 / self.values.len() as f64
        }
    }

    /// Distinct observed keys, sorted
    pub fn levels(&self) -> Vec<String> {
        let mut levels: Vec<String> = self.values.iter().filter_map(Value::key).collect();
        levels.sort();
        levels.dedup();
        levels
    }

    pub fn is_numeric(&self) -> bool {
        self.values
            .iter()
            .all(|v| matches!(v, Value::Number(_) | Value::Missing))
    }
}

/// Row-count-consistent collection of columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns that must share a row count
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let n_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        let mut table = Table {
            columns: Vec::with_capacity(columns.len()),
            n_rows,
        };
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    /// Build a table from a header and row-major cells
    pub fn from_rows(header: &[&str], rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut columns: Vec<Column> = header
            .iter()
            .map(|name| Column::new(*name, Vec::with_capacity(rows.len())))
            .collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != header.len() {
                return Err(ConversionError::Parse(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    header.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }
        Table::from_columns(columns)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Column lookup that treats absence as an error
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| ConversionError::MissingColumn(name.to_string()))
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut Column> {
        self.column_mut(name)
            .ok_or_else(|| ConversionError::MissingColumn(name.to_string()))
    }

    /// Append a column, replacing any existing column of the same name
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if self.columns.is_empty() && self.n_rows == 0 {
            self.n_rows = column.values.len();
        }
        if column.values.len() != self.n_rows {
            return Err(ConversionError::Parse(format!(
                "column {} has {} rows, table has {}",
                column.name,
                column.values.len(),
                self.n_rows
            )));
        }
        match self.position(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Remove a column, returning it if it existed
    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        self.position(name).map(|idx| self.columns.remove(idx))
    }

    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|c| c.values.get(row))
    }

    /// Row-major copy of one row
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| c.values.get(row).cloned().unwrap_or(Value::Missing))
            .collect()
    }

    /// Stack another table under this one; columns absent on either side fill with NA
    pub fn append(&mut self, other: Table) {
        let top_rows = self.n_rows;
        let bottom_rows = other.n_rows;

        for column in &mut self.columns {
            column
                .values
                .extend(std::iter::repeat(Value::Missing).take(bottom_rows));
        }
        for column in other.columns {
            match self.position(&column.name) {
                Some(idx) => {
                    let values = &mut self.columns[idx].values;
                    values.truncate(top_rows);
                    values.extend(column.values);
                }
                None => {
                    let mut values = vec![Value::Missing; top_rows];
                    values.extend(column.values);
                    self.columns.push(Column::new(column.name, values));
                }
            }
        }
        self.n_rows = top_rows + bottom_rows;
    }

    /// Left join `right` on `key`: every left row is kept, each matching right
    /// row produces one output row, unmatched rows get NA in the right columns.
    /// Duplicate keys in `right` fan out without complaint.
    pub fn left_join(&self, right: &Table, key: &str) -> Result<Table> {
        let left_key = self.require(key)?;
        let right_key = right.require(key)?;

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, value) in right_key.values.iter().enumerate() {
            if let Some(k) = value.key() {
                index.entry(k).or_default().push(i);
            }
        }

        // (left row, matching right row)
        let mut pairs: Vec<(usize, Option<usize>)> = Vec::with_capacity(self.n_rows);
        for (i, value) in left_key.values.iter().enumerate() {
            match value.key().and_then(|k| index.get(&k)) {
                Some(matches) => pairs.extend(matches.iter().map(|&j| (i, Some(j)))),
                None => pairs.push((i, None)),
            }
        }

        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .map(|c| {
                Column::new(
                    c.name.clone(),
                    pairs.iter().map(|&(i, _)| c.values[i].clone()).collect(),
                )
            })
            .collect();

        for c in right.columns.iter().filter(|c| c.name != key) {
            let name = if self.has_column(&c.name) {
                format!("{}_y", c.name)
            } else {
                c.name.clone()
            };
            let values = pairs
                .iter()
                .map(|&(_, j)| j.map(|j| c.values[j].clone()).unwrap_or(Value::Missing))
                .collect();
            columns.push(Column::new(name, values));
        }

        Table::from_columns(columns)
    }

    /// Keep the given rows, in order
    pub fn select_rows(&self, rows: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| {
                    Column::new(
                        c.name.clone(),
                        rows.iter().map(|&i| c.values[i].clone()).collect(),
                    )
                })
                .collect(),
            n_rows: rows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(x: f64) -> Value {
        Value::Number(x)
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_append_fills_missing_columns() {
        let mut a = Table::from_rows(&["call_id", "age"], vec![vec![num(1.0), num(30.0)]]).unwrap();
        let b = Table::from_rows(
            &["call_id", "device"],
            vec![vec![num(2.0), text("mobile")], vec![num(3.0), text("desktop")]],
        )
        .unwrap();

        a.append(b);

        assert_eq!(a.n_rows(), 3);
        assert_eq!(a.column_names(), vec!["call_id", "age", "device"]);
        assert_eq!(a.get(1, "age"), Some(&Value::Missing));
        assert_eq!(a.get(0, "device"), Some(&Value::Missing));
        assert_eq!(a.get(2, "device"), Some(&text("desktop")));
    }

    #[test]
    fn test_left_join_keeps_unmatched_rows() {
        let calls = Table::from_rows(
            &["call_id", "source_id"],
            vec![
                vec![num(1.0), num(10.0)],
                vec![num(2.0), num(11.0)],
                vec![num(3.0), Value::Missing],
            ],
        )
        .unwrap();
        let sources = Table::from_rows(
            &["source_id", "source_name"],
            vec![vec![num(10.0), text("search")]],
        )
        .unwrap();

        let joined = calls.left_join(&sources, "source_id").unwrap();

        assert_eq!(joined.n_rows(), 3);
        assert_eq!(joined.get(0, "source_name"), Some(&text("search")));
        assert_eq!(joined.get(1, "source_name"), Some(&Value::Missing));
        assert_eq!(joined.get(2, "source_name"), Some(&Value::Missing));
    }

    #[test]
    fn test_left_join_fans_out_duplicate_keys() {
        let calls = Table::from_rows(
            &["call_id", "source_id"],
            vec![vec![num(1.0), num(10.0)], vec![num(2.0), num(12.0)]],
        )
        .unwrap();
        let sources = Table::from_rows(
            &["source_id", "source_name"],
            vec![vec![num(10.0), text("search")], vec![num(10.0), text("social")]],
        )
        .unwrap();

        let joined = calls.left_join(&sources, "source_id").unwrap();

        // Known limitation: duplicate lookup keys multiply the left row
        assert_eq!(joined.n_rows(), 3);
        assert_eq!(joined.get(0, "call_id"), Some(&num(1.0)));
        assert_eq!(joined.get(1, "call_id"), Some(&num(1.0)));
    }

    #[test]
    fn test_join_requires_key() {
        let calls = Table::from_rows(&["call_id"], vec![vec![num(1.0)]]).unwrap();
        let other = Table::from_rows(&["x"], vec![vec![num(1.0)]]).unwrap();
        assert!(matches!(
            calls.left_join(&other, "source_id"),
            Err(ConversionError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_column_statistics() {
        let column = Column::new(
            "gender",
            vec![text("F"), text(""), Value::Missing, text("M"), text("F")],
        );
        assert_eq!(column.missing_count(), 1);
        assert!((column.missing_fraction() - 0.2).abs() < 1e-12);
        assert_eq!(column.levels(), vec!["", "F", "M"]);
        assert!(!column.is_numeric());
    }
}
