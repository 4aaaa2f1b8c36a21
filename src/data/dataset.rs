//! Numeric feature matrices and the burn Dataset over labeled calls
//!
//! The encoder produces one `FeatureMatrix` for the whole merged table; the
//! splitter slices it into `CallDataset`s that the classifiers consume.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::{ConversionError, Result};

/// One model input column and the source column it was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumn {
    pub name: String,
    pub source: String,
}

/// Dense row-major feature matrix with named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<FeatureColumn>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<FeatureColumn>, rows: Vec<Vec<f64>>) -> Self {
        FeatureMatrix { columns, rows }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// A row is complete when every feature is finite
    pub fn is_complete(&self, row: usize) -> bool {
        self.rows[row].iter().all(|x| x.is_finite())
    }

    /// Rows in the given order
    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            columns: self.columns.clone(),
            rows: rows.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Drop every feature derived from one of the given source columns,
    /// returning how many features were removed
    pub fn drop_sources(&mut self, sources: &[String]) -> usize {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !sources.contains(&c.source))
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return 0;
        }

        self.columns = self
            .columns
            .drain(..)
            .zip(&keep)
            .filter_map(|(c, &k)| k.then_some(c))
            .collect();
        for row in &mut self.rows {
            *row = row
                .drain(..)
                .zip(&keep)
                .filter_map(|(x, &k)| k.then_some(x))
                .collect();
        }
        removed
    }

    /// Fail on the first column holding NaN or infinity
    pub fn check_finite(&self) -> Result<()> {
        for (j, column) in self.columns.iter().enumerate() {
            if self.rows.iter().any(|r| !r[j].is_finite()) {
                return Err(ConversionError::NonFinite {
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn column_values(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[j]).collect()
    }
}

/// Labeled rows ready for fitting or evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallDataset {
    pub features: FeatureMatrix,
    /// Binary labels, 0.0 or 1.0
    pub labels: Vec<f64>,
    /// Row index of each sample in the merged table
    pub row_ids: Vec<usize>,
}

impl CallDataset {
    pub fn new(features: FeatureMatrix, labels: Vec<f64>, row_ids: Vec<usize>) -> Result<Self> {
        if features.n_rows() != labels.len() || labels.len() != row_ids.len() {
            return Err(ConversionError::InsufficientData(format!(
                "{} feature rows, {} labels and {} row ids",
                features.n_rows(),
                labels.len(),
                row_ids.len()
            )));
        }
        Ok(CallDataset {
            features,
            labels,
            row_ids,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.n_features()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// (negatives, positives)
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.labels.iter().filter(|&&y| y >= 0.5).count();
        (self.labels.len() - positives, positives)
    }

    /// Samples at the given positions, duplicates allowed
    pub fn subset(&self, positions: &[usize]) -> CallDataset {
        CallDataset {
            features: self.features.select_rows(positions),
            labels: positions.iter().map(|&i| self.labels[i]).collect(),
            row_ids: positions.iter().map(|&i| self.row_ids[i]).collect(),
        }
    }
}

/// A single training sample in tensor precision
#[derive(Debug, Clone)]
pub struct CallSample {
    pub features: Vec<f32>,
    pub label: f32,
}

impl Dataset<CallSample> for CallDataset {
    fn get(&self, index: usize) -> Option<CallSample> {
        let row = self.features.rows.get(index)?;
        Some(CallSample {
            features: row.iter().map(|&x| x as f32).collect(),
            label: self.labels[index] as f32,
        })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

/// Batch of call samples
#[derive(Debug, Clone)]
pub struct CallBatch<B: Backend> {
    /// Features: [batch, n_features]
    pub features: Tensor<B, 2>,
    /// Labels: [batch, 1]
    pub labels: Tensor<B, 2>,
}

/// Batcher stacking call samples into tensors
#[derive(Clone)]
pub struct CallBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> CallBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        CallBatcher { device }
    }
}

impl<B: Backend> Batcher<B, CallSample, CallBatch<B>> for CallBatcher<B> {
    fn batch(&self, items: Vec<CallSample>, _device: &B::Device) -> CallBatch<B> {
        let batch_size = items.len();
        let n_features = items.first().map(|s| s.features.len()).unwrap_or(0);

        let mut feature_data = Vec::with_capacity(batch_size * n_features);
        let mut label_data = Vec::with_capacity(batch_size);
        for sample in &items {
            feature_data.extend_from_slice(&sample.features);
            label_data.push(sample.label);
        }

        let features = Tensor::<B, 1>::from_floats(feature_data.as_slice(), &self.device)
            .reshape([batch_size, n_features]);
        let labels = Tensor::<B, 1>::from_floats(label_data.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        CallBatch { features, labels }
    }
}
