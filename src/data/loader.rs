//! CSV loading and merging of the four call-center sources

use crate::data::table::{Column, Table};
use crate::{Config, ConversionError, Result, Season, Value};
use std::io::{Read, Write};
use std::path::Path;

/// Join keys of the lookup tables
pub const SOURCE_KEY: &str = "source_id";
pub const CALL_KEY: &str = "call_id";

/// The four raw inputs before merging
#[derive(Debug, Clone)]
pub struct RawSources {
    /// First call log (period A)
    pub call_log_a: Table,
    /// Second call log (period B)
    pub call_log_b: Table,
    /// Lookup keyed by source_id
    pub sources: Table,
    /// User-provided attributes keyed by call_id
    pub user_provided: Table,
}

impl RawSources {
    /// Read all four inputs from the paths in the config
    pub fn load(config: &Config) -> Result<Self> {
        Ok(RawSources {
            call_log_a: read_csv(&config.data.call_log_a)?,
            call_log_b: read_csv(&config.data.call_log_b)?,
            sources: read_csv(&config.data.sources)?,
            user_provided: read_csv(&config.data.user_provided)?,
        })
    }
}

/// Read a headered CSV file into a table
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| {
        ConversionError::Config(format!("Failed to open {}: {}", display, e))
    })?;
    let table = read_csv_from_reader(file).map_err(|source| ConversionError::Csv {
        path: display.clone(),
        source,
    })?;
    log::debug!(
        "Read {} rows x {} columns from {}",
        table.n_rows(),
        table.n_columns(),
        display
    );
    Ok(table)
}

/// Parse CSV text. A column whose non-blank cells all parse as numbers is
/// numeric and its blanks become NA; otherwise it is text and blanks are kept
/// as empty strings. The literal `NA` is missing in both, and so are
/// `inf`/`NaN` cells of a numeric column.
pub fn read_csv_from_reader<R: Read>(rdr: R) -> std::result::Result<Table, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(rdr);
    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut raw: Vec<Vec<String>> = vec![Vec::new(); header.len()];
    for result in reader.records() {
        let record = result?;
        for (i, cells) in raw.iter_mut().enumerate() {
            cells.push(record.get(i).unwrap_or("").to_string());
        }
    }

    let columns: Vec<Column> = header
        .into_iter()
        .zip(raw)
        .map(|(name, cells)| {
            let values = parse_cells(&name, cells);
            Column::new(name, values)
        })
        .collect();

    // Row counts are equal by construction
    Ok(Table::from_columns(columns).unwrap_or_default())
}

/// Write a table as headered CSV, creating parent directories. Missing
/// cells are written as `NA`.
pub fn write_csv<P: AsRef<Path>>(table: &Table, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_csv_to_writer(table, file)?;
    log::info!("Wrote {} rows to {}", table.n_rows(), path.display());
    Ok(())
}

pub fn write_csv_to_writer<W: Write>(table: &Table, wtr: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(wtr);
    writer.write_record(table.column_names())?;
    for row in 0..table.n_rows() {
        writer.write_record(table.columns().iter().map(|c| c.values[row].to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_cells(name: &str, cells: Vec<String>) -> Vec<Value> {
    let is_blank = |s: &str| s.is_empty() || s == "NA";
    let numeric = cells
        .iter()
        .filter(|s| !is_blank(s))
        .all(|s| s.trim().parse::<f64>().is_ok());

    let mut non_finite = 0;
    let values = cells
        .into_iter()
        .map(|s| {
            if s == "NA" {
                Value::Missing
            } else if numeric {
                match s.trim().parse::<f64>() {
                    Ok(x) if x.is_finite() => Value::Number(x),
                    Ok(_) => {
                        non_finite += 1;
                        Value::Missing
                    }
                    Err(_) => Value::Missing,
                }
            } else {
                Value::Text(s)
            }
        })
        .collect();

    if non_finite > 0 {
        log::warn!("Column {}: {} non-finite cells read as NA", name, non_finite);
    }
    values
}

/// Stack both call logs, tag each row with its season and attach both lookups
pub fn merge(raw: RawSources, config: &Config) -> Result<Table> {
    let season_column = config.data.season_column.as_str();
    let RawSources {
        mut call_log_a,
        call_log_b,
        sources,
        user_provided,
    } = raw;

    let n_a = call_log_a.n_rows();
    let n_b = call_log_b.n_rows();
    call_log_a.push_column(Column::new(
        season_column,
        vec![Value::Text(config.season_label(Season::PeriodA).to_string()); n_a],
    ))?;

    let mut calls = call_log_a;
    calls.append(call_log_b);

    // Everything not already tagged came from the second log
    let period_b = config.season_label(Season::PeriodB).to_string();
    if let Some(season) = calls.column_mut(season_column) {
        for value in season.values.iter_mut().filter(|v| v.is_missing()) {
            *value = Value::Text(period_b.clone());
        }
    }

    let n_calls = calls.n_rows();
    let merged = calls
        .left_join(&sources, SOURCE_KEY)?
        .left_join(&user_provided, CALL_KEY)?;

    log::info!(
        "Merged {} + {} calls into {} rows x {} columns",
        n_a,
        n_b,
        merged.n_rows(),
        merged.n_columns()
    );
    if merged.n_rows() != n_calls {
        log::warn!(
            "Join fan-out: {} call rows became {} merged rows (duplicate lookup keys)",
            n_calls,
            merged.n_rows()
        );
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table(csv: &str) -> Table {
        read_csv_from_reader(csv.as_bytes()).unwrap()
    }

    fn raw_sources() -> RawSources {
        RawSources {
            call_log_a: table("call_id,source_id,call_duration\n1,10,120\n2,11,45\n"),
            call_log_b: table("call_id,source_id\n3,10\n4,99\n"),
            sources: table("source_id,source_name\n10,search\n11,social\n"),
            user_provided: table("call_id,age,gender\n1,34,F\n3,51,\n4,NA,M\n"),
        }
    }

    #[test]
    fn test_numeric_and_text_inference() {
        let t = table("age,gender,zip\n34,F,02139\n,,NA\n51,M,10001\n");

        let age = t.column("age").unwrap();
        assert_eq!(age.values, vec![Value::Number(34.0), Value::Missing, Value::Number(51.0)]);

        // Blank stays an empty string in text columns
        let gender = t.column("gender").unwrap();
        assert_eq!(gender.values[1], Value::Text(String::new()));

        let zip = t.column("zip").unwrap();
        assert_eq!(zip.values[1], Value::Missing);
    }

    #[test]
    fn test_non_finite_cells_are_missing() {
        let t = table("age,household_income\n30,1000\n40,inf\n50,NaN\n");

        let income = t.column("household_income").unwrap();
        assert!(income.is_numeric());
        assert_eq!(
            income.values,
            vec![Value::Number(1000.0), Value::Missing, Value::Missing]
        );
        assert_eq!(t.get(1, "age"), Some(&Value::Number(40.0)));
    }

    #[test]
    fn test_merge_tags_seasons() {
        let config = Config::default();
        let merged = merge(raw_sources(), &config).unwrap();

        let season = merged.column("season").unwrap();
        assert_eq!(season.values[0], Value::Text("period_a".into()));
        assert_eq!(season.values[1], Value::Text("period_a".into()));
        assert_eq!(season.values[2], Value::Text("period_b".into()));
        assert_eq!(season.values[3], Value::Text("period_b".into()));
    }

    #[test]
    fn test_merge_row_count_and_lookups() {
        let config = Config::default();
        let merged = merge(raw_sources(), &config).unwrap();

        assert_eq!(merged.n_rows(), 4);
        assert_eq!(merged.get(2, "source_name"), Some(&Value::Text("search".into())));
        // Unmatched source id leaves NA
        assert_eq!(merged.get(3, "source_name"), Some(&Value::Missing));
        // Call 2 has no user-provided row
        assert_eq!(merged.get(1, "age"), Some(&Value::Missing));
        // Column only present in log A is NA for log B rows
        assert_eq!(merged.get(2, "call_duration"), Some(&Value::Missing));
    }

    #[test]
    fn test_read_csv_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_id,source_name").unwrap();
        writeln!(file, "10,search").unwrap();

        let t = read_csv(file.path()).unwrap();
        assert_eq!(t.n_rows(), 1);
        assert_eq!(t.get(0, "source_id"), Some(&Value::Number(10.0)));
    }

    #[test]
    fn test_read_csv_missing_file() {
        assert!(read_csv("/nonexistent/calls.csv").is_err());
    }

    #[test]
    fn test_write_csv_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("scored.csv");
        let t = table("call_id,age\n1,34\n2,NA\n");

        write_csv(&t, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "call_id,age\n1,34\n2,NA\n");
    }
}
