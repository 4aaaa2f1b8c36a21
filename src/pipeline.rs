//! The full run, stage by stage
//!
//! merge → clean → encode → exclude → split → balance → fit → evaluate →
//! score → augment. The order matters: encoding happens once on the whole
//! table so every partition shares its columns, and balancing only ever
//! sees the training partition.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::data::dataset::CallDataset;
use crate::data::loader::{merge, RawSources};
use crate::data::table::Table;
use crate::features::cleaning::{Cleaner, CleaningReport, ColumnPolicy};
use crate::features::encoding::EncodingSchema;
use crate::model::{fit_all, FeatureImportance, FittedModel, ModelDetails, ModelOutcome};
use crate::predict::scoring::{augment, score_dataset, CombinePolicy, AGE_BUCKET_COLUMN, INCOME_BUCKET_COLUMN};
use crate::predict::segments::{summarize_all, SegmentSummary};
use crate::training::metrics::Evaluation;
use crate::training::split::{stratified_split, upsample};
use crate::{Config, ConversionError, ModelKind, Result};

/// Features listed per model in the report
const TOP_FEATURES: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RowCounts {
    pub merged: usize,
    /// Rows with every feature observed
    pub complete: usize,
    /// Complete rows with a label
    pub labeled: usize,
    pub train: usize,
    pub train_balanced: usize,
    pub test: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Fitted {
        evaluation: Evaluation,
        top_features: Vec<FeatureImportance>,
        details: ModelDetails,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub kind: ModelKind,
    #[serde(flatten)]
    pub status: ModelStatus,
}

/// Everything a run learned, printable as a table or JSON
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed: u64,
    pub rows: RowCounts,
    pub cleaning: CleaningReport,
    pub n_features: usize,
    pub excluded_features: usize,
    pub models: Vec<ModelReport>,
    pub combine: Vec<ModelKind>,
    pub segments: Vec<SegmentSummary>,
}

impl RunReport {
    pub fn evaluations(&self) -> impl Iterator<Item = &Evaluation> {
        self.models.iter().filter_map(|m| match &m.status {
            ModelStatus::Fitted { evaluation, .. } => Some(evaluation),
            ModelStatus::Failed { .. } => None,
        })
    }
}

pub struct RunOutput {
    pub report: RunReport,
    /// Merged table with likelihood and bucket columns
    pub augmented: Table,
}

fn evaluate(model: &dyn FittedModel, test: &CallDataset, threshold: f64) -> Result<Evaluation> {
    let probs = model.predict_proba(&test.features)?;
    Ok(Evaluation::compute(model.kind(), &test.labels, &probs, threshold))
}

/// Run every stage on already-loaded inputs
pub fn run(config: &Config, raw: RawSources) -> Result<RunOutput> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut rows = RowCounts::default();

    let merged = merge(raw, config)?;
    rows.merged = merged.n_rows();

    let policy = ColumnPolicy::from_config(&config.cleaning);
    let mut cleaned = merged.clone();
    let cleaning = Cleaner::new(policy.clone()).clean(&mut cleaned)?;

    let schema = EncodingSchema::fit(&cleaned, &policy)?;
    let mut encoded = schema.transform(&cleaned)?;
    let excluded_features = encoded.features.drop_sources(&config.split.exclude);
    log::info!(
        "Excluded {} features from {:?}; {} remain",
        excluded_features,
        config.split.exclude,
        encoded.features.n_features()
    );

    let complete = encoded.complete_rows();
    let labeled = encoded.labeled_rows();
    rows.complete = complete.len();
    rows.labeled = labeled.len();
    if rows.complete < rows.merged {
        log::warn!(
            "{} rows have missing features and are left unscored",
            rows.merged - rows.complete
        );
    }

    let data = CallDataset::new(
        encoded.features.select_rows(&labeled),
        labeled.iter().filter_map(|&i| encoded.labels[i]).collect(),
        labeled.clone(),
    )?;

    let partition = stratified_split(&data, config.split.train_ratio, &mut rng)?;
    let train = upsample(&partition.train, &mut rng);
    rows.train = partition.train.n_samples();
    rows.train_balanced = train.n_samples();
    rows.test = partition.test.n_samples();

    let outcomes = fit_all(&ModelKind::ALL, config, &train, &mut rng);

    let threshold = config.scoring.threshold;
    let mut models = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        let status = match outcome {
            ModelOutcome::Fitted(model) => match evaluate(model.as_ref(), &partition.test, threshold) {
                Ok(evaluation) => {
                    log::info!("{}", evaluation);
                    ModelStatus::Fitted {
                        evaluation,
                        top_features: model.top_features(TOP_FEATURES),
                        details: model.details(),
                    }
                }
                Err(e) => {
                    log::warn!("{} could not be evaluated: {}", model.kind(), e);
                    ModelStatus::Failed { error: e.to_string() }
                }
            },
            ModelOutcome::Failed { error, .. } => ModelStatus::Failed {
                error: error.to_string(),
            },
        };
        models.push(ModelReport {
            kind: outcome.kind(),
            status,
        });
    }

    let combine = CombinePolicy::new(config.scoring.combine.clone());
    let members: Vec<&dyn FittedModel> = outcomes
        .iter()
        .filter_map(ModelOutcome::fitted)
        .filter(|m| combine.members().contains(&m.kind()))
        .collect();
    if members.is_empty() {
        return Err(ConversionError::NoModels);
    }
    let scores = score_dataset(&members, &encoded.features, &complete, &combine)?;

    let augmented = augment(&merged, &scores, &config.scoring.likelihood_column)?;

    let mut segment_columns = vec![
        AGE_BUCKET_COLUMN.to_string(),
        INCOME_BUCKET_COLUMN.to_string(),
        config.data.season_column.clone(),
    ];
    for column in &config.scoring.segment_columns {
        if !segment_columns.contains(column) {
            segment_columns.push(column.clone());
        }
    }
    let segments = summarize_all(&augmented, &scores.combined, &segment_columns)?;

    Ok(RunOutput {
        report: RunReport {
            seed: config.seed,
            rows,
            cleaning,
            n_features: encoded.features.n_features(),
            excluded_features,
            models,
            combine: combine.members().to_vec(),
            segments,
        },
        augmented,
    })
}
