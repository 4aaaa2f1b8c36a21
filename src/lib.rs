//! Call-center conversion likelihood
//!
//! Merges call logs with their lookups, cleans and one-hot encodes the merged
//! records, fits three classifiers on a balanced training partition, ranks them
//! on a held-out partition and scores every call with a combined likelihood.

pub mod data;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod training;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::features::cleaning::Treatment;

/// A single cell of a loaded table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Missing,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    /// Key used for joins and categorical levels; missing cells have no key
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            Value::Number(x) => Some(format_number(*x)),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => write!(f, "NA"),
            Value::Number(x) => write!(f, "{}", format_number(*x)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

/// Which call log a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Season {
    PeriodA,
    PeriodB,
}

/// The three interchangeable classifier capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Logistic,
    DecisionTree,
    RandomForest,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::Logistic,
        ModelKind::DecisionTree,
        ModelKind::RandomForest,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic",
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::RandomForest => "random_forest",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Logistic => write!(f, "Logistic regression"),
            ModelKind::DecisionTree => write!(f, "Decision tree"),
            ModelKind::RandomForest => write!(f, "Random forest"),
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.code() == s.to_lowercase())
            .ok_or_else(|| ConversionError::Config(format!("Unknown model: {}", s)))
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("CSV error: {0}")]
    CsvWrite(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Column {column} has zero variance and cannot be standardized")]
    ZeroVariance { column: String },

    #[error("Feature {column} contains non-finite values")]
    NonFinite { column: String },

    #[error("{model} did not converge: {reason}")]
    NotConverged { model: ModelKind, reason: String },

    #[error("Model expects {expected} features, got {found}")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No classifier in the combine policy produced estimates")]
    NoModels,

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ConversionError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seed for every random draw in a run
    pub seed: u64,
    pub data: DataConfig,
    pub cleaning: CleaningConfig,
    pub split: SplitConfig,
    pub logistic: LogisticConfig,
    pub tree: TreeConfig,
    pub forest: ForestConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// First call log, tagged as period A
    pub call_log_a: String,
    /// Second call log, tagged as period B
    pub call_log_b: String,
    /// Source lookup keyed by source_id
    pub sources: String,
    /// User-provided data keyed by call_id
    pub user_provided: String,
    /// Augmented dataset written after scoring
    pub output: String,
    pub season_column: String,
    pub season_a: String,
    pub season_b: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Columns receiving log(x + 1) after imputation and capping
    pub log_transform: Vec<String>,
    pub iqr_multiplier: f64,
    /// Column name → treatment
    pub columns: BTreeMap<String, Treatment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub train_ratio: f64,
    /// Source columns whose features are dropped right before splitting
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub max_epochs: usize,
    /// Absolute change in mean log-loss that counts as converged
    pub tolerance: f64,
    /// Treat reaching `max_epochs` before `tolerance` as a failed fit;
    /// otherwise it is only a warning
    pub fail_on_max_epochs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Minimum node size for a split to be attempted
    pub min_split: usize,
    /// Complexity parameter floor used while growing
    pub cp: f64,
    /// Folds in the internal cross-validation
    pub folds: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    /// Minimum size of a terminal node
    pub min_node_size: usize,
    pub max_depth: usize,
    /// Features tried per split; square root of the feature count when unset
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Probability at or above which a call is predicted to convert
    pub threshold: f64,
    /// Classifiers whose full-dataset estimates are averaged
    pub combine: Vec<ModelKind>,
    /// Output column holding the combined estimate
    pub likelihood_column: String,
    /// Categorical columns summarized by likelihood segment
    pub segment_columns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            seed: 42,
            data: DataConfig {
                call_log_a: "data/calls_period_a.csv".to_string(),
                call_log_b: "data/calls_period_b.csv".to_string(),
                sources: "data/sources.csv".to_string(),
                user_provided: "data/user_provided.csv".to_string(),
                output: "output/scored_calls.csv".to_string(),
                season_column: "season".to_string(),
                season_a: "period_a".to_string(),
                season_b: "period_b".to_string(),
            },
            cleaning: CleaningConfig {
                log_transform: vec!["household_income".to_string()],
                iqr_multiplier: 1.5,
                columns: default_columns(),
            },
            split: SplitConfig {
                train_ratio: 0.8,
                exclude: vec![
                    "weight".to_string(),
                    "height".to_string(),
                    "bmi".to_string(),
                    "currently_insured".to_string(),
                ],
            },
            logistic: LogisticConfig {
                learning_rate: 0.5,
                max_epochs: 20_000,
                tolerance: 1e-6,
                fail_on_max_epochs: true,
            },
            tree: TreeConfig {
                min_split: 20,
                cp: 0.001,
                folds: 10,
                max_depth: 30,
            },
            forest: ForestConfig {
                n_trees: 100,
                min_node_size: 1,
                max_depth: 40,
                max_features: None,
            },
            scoring: ScoringConfig {
                threshold: 0.5,
                combine: vec![ModelKind::Logistic, ModelKind::RandomForest],
                likelihood_column: "likelihood_average".to_string(),
                segment_columns: vec!["state".to_string(), "device".to_string()],
            },
        }
    }
}

fn default_columns() -> BTreeMap<String, Treatment> {
    let table: &[(&str, Treatment)] = &[
        ("call_id", Treatment::Identifier),
        ("buyer_id", Treatment::Identifier),
        ("seller_id", Treatment::Identifier),
        ("source_id", Treatment::Identifier),
        ("phone_hash", Treatment::Identifier),
        ("call_time", Treatment::Identifier),
        ("call_duration", Treatment::Identifier),
        ("conversion", Treatment::Label),
        ("country", Treatment::DropConstant),
        ("campaign_type", Treatment::DropConstant),
        ("spouse_age", Treatment::DropSparse),
        ("num_vehicles", Treatment::DropSparse),
        ("tobacco_use", Treatment::DropSparse),
        ("age", Treatment::ImputeMean),
        ("household_income", Treatment::ImputeMean),
        ("household_size", Treatment::ImputeMean),
        ("gender", Treatment::BlankToNa),
        ("connection_type", Treatment::BlankToNa),
        ("coverage_type", Treatment::BlankToNa),
        ("weight", Treatment::OutlierCap),
        ("height", Treatment::OutlierCap),
        ("bmi", Treatment::OutlierCap),
        ("season", Treatment::Categorical),
        ("state", Treatment::Categorical),
        ("device", Treatment::Categorical),
        ("browser", Treatment::Categorical),
        ("company", Treatment::Categorical),
        ("currently_insured", Treatment::Categorical),
        ("source_name", Treatment::Categorical),
    ];
    table
        .iter()
        .map(|(name, treatment)| (name.to_string(), *treatment))
        .collect()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConversionError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ConversionError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run can use
    pub fn validate(&self) -> Result<()> {
        let threshold = self.scoring.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConversionError::Config(format!(
                "scoring.threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        let ratio = self.split.train_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConversionError::Config(format!(
                "split.train_ratio must be in (0, 1), got {}",
                ratio
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConversionError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Label of the season tag for a call log
    pub fn season_label(&self, season: Season) -> &str {
        match season {
            Season::PeriodA => &self.data.season_a,
            Season::PeriodB => &self.data.season_b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.seed, 42);
        assert_eq!(parsed.cleaning.columns.get("bmi"), Some(&Treatment::OutlierCap));
        assert_eq!(
            parsed.scoring.combine,
            vec![ModelKind::Logistic, ModelKind::RandomForest]
        );
        assert_eq!(parsed.forest.max_features, None);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.scoring.threshold = 2.0;
        assert!(matches!(config.validate(), Err(ConversionError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        config.save(path).unwrap();
        assert!(matches!(Config::load(path), Err(ConversionError::Config(_))));
    }

    #[test]
    fn test_value_keys() {
        assert_eq!(Value::Number(12.0).key().as_deref(), Some("12"));
        assert_eq!(Value::Number(1.5).key().as_deref(), Some("1.5"));
        assert_eq!(Value::Text("CA".into()).key().as_deref(), Some("CA"));
        assert_eq!(Value::Missing.key(), None);
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("random_forest".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        assert!("svm".parse::<ModelKind>().is_err());
    }
}
