//! Logistic regression trained with burn
//!
//! A single zero-initialized `Linear(p -> 1)` layer and binary cross-entropy
//! on its logits, stepped full-batch until the loss settles. A loss that
//! rises or stops being finite is divergence. The fitted weights are copied
//! out so scoring needs no tensor backend.

use burn::backend::{Autodiff, NdArray};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use rand::rngs::StdRng;
use serde::Serialize;

use crate::data::dataset::{CallBatcher, CallDataset, CallSample, FeatureMatrix};
use crate::model::{check_training_data, check_width, Classifier, FittedModel, ModelDetails};
use crate::{ConversionError, LogisticConfig, ModelKind, Result};

type TrainBackend = Autodiff<NdArray<f32>>;

/// Fitted coefficient of one feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub feature: String,
    pub coefficient: f64,
    /// exp(coefficient): multiplicative change in the odds per unit
    pub odds_ratio: f64,
}

/// Loss trace of one training run
#[derive(Debug, Clone)]
pub struct TrainingTrace {
    pub epochs: usize,
    pub final_loss: f64,
    pub converged: bool,
}

/// Full-batch gradient trainer for the linear layer
pub struct LogisticTrainer<B: AutodiffBackend> {
    model: Linear<B>,
    optimizer: burn::optim::adaptor::OptimizerAdaptor<burn::optim::Sgd<B::InnerBackend>, Linear<B>, B>,
    learning_rate: f64,
    device: B::Device,
}

impl<B: AutodiffBackend> LogisticTrainer<B> {
    pub fn new(device: B::Device, n_features: usize, learning_rate: f64) -> Self {
        let model = LinearConfig::new(n_features, 1)
            .with_initializer(Initializer::Zeros)
            .init(&device);
        let optimizer = SgdConfig::new().init();

        LogisticTrainer {
            model,
            optimizer,
            learning_rate,
            device,
        }
    }

    /// Train until the absolute change in loss drops below `tolerance` or
    /// `max_epochs` is reached. A non-finite loss, or a loss more than
    /// `tolerance` above the previous epoch's, is `NotConverged`.
    pub fn train(
        mut self,
        data: &CallDataset,
        max_epochs: usize,
        tolerance: f64,
    ) -> Result<(Linear<B>, TrainingTrace)> {
        let batcher = CallBatcher::<B>::new(self.device.clone());
        let items: Vec<CallSample> = (0..data.len()).filter_map(|i| data.get(i)).collect();
        let batch = batcher.batch(items, &self.device);

        let mut previous = f64::INFINITY;
        let mut trace = TrainingTrace {
            epochs: 0,
            final_loss: f64::NAN,
            converged: false,
        };

        for epoch in 0..max_epochs {
            let logits = self.model.forward(batch.features.clone());
            let loss = binary_cross_entropy_with_logits(logits, batch.labels.clone());
            let loss_val: f32 = loss.clone().into_scalar().elem();
            let loss_val = loss_val as f64;

            if !loss_val.is_finite() {
                return Err(diverged(format!("loss became non-finite at epoch {}", epoch + 1)));
            }
            if loss_val > previous + tolerance {
                return Err(diverged(format!(
                    "loss rose from {:.6} to {:.6} at epoch {}",
                    previous,
                    loss_val,
                    epoch + 1
                )));
            }

            trace.epochs = epoch + 1;
            trace.final_loss = loss_val;
            if (previous - loss_val).abs() < tolerance {
                trace.converged = true;
                break;
            }
            previous = loss_val;

            let grads = loss.backward();
            let grads_params = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(self.learning_rate, self.model, grads_params);

            if epoch % 500 == 0 {
                log::debug!("Epoch {}/{}: loss={:.6}", epoch + 1, max_epochs, loss_val);
            }
        }

        Ok((self.model, trace))
    }
}

fn diverged(reason: String) -> ConversionError {
    ConversionError::NotConverged {
        model: ModelKind::Logistic,
        reason,
    }
}

/// Mean of `max(z, 0) - z·y + ln(1 + e^-|z|)`, which stays finite and keeps
/// its gradient for saturated logits
fn binary_cross_entropy_with_logits<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let softplus = (logits.clone().abs().neg().exp() + 1.0).log();
    let loss = logits.clone().clamp_min(0.0) - logits * targets + softplus;
    loss.mean()
}

/// Copy (intercept, weights) out of a trained layer
fn extract_weights<B: AutodiffBackend>(model: &Linear<B>) -> Result<(f64, Vec<f64>)> {
    let to_vec = |data: burn::tensor::TensorData| {
        data.to_vec::<f32>().map_err(|e| ConversionError::NotConverged {
            model: ModelKind::Logistic,
            reason: format!("unreadable weights: {:?}", e),
        })
    };

    let weights = to_vec(model.weight.val().into_data())?;
    let intercept = match &model.bias {
        Some(bias) => to_vec(bias.val().into_data())?.first().copied().unwrap_or(0.0),
        None => 0.0,
    };
    Ok((intercept as f64, weights.into_iter().map(f64::from).collect()))
}

/// Logistic regression capability
pub struct LogisticRegression {
    config: LogisticConfig,
}

impl LogisticRegression {
    pub fn new(config: LogisticConfig) -> Self {
        LogisticRegression { config }
    }
}

impl Classifier for LogisticRegression {
    fn kind(&self) -> ModelKind {
        ModelKind::Logistic
    }

    fn fit(&self, data: &CallDataset, _rng: &mut StdRng) -> Result<Box<dyn FittedModel>> {
        check_training_data(data)?;

        let device = Default::default();
        let trainer = LogisticTrainer::<TrainBackend>::new(device, data.n_features(), self.config.learning_rate);
        let (model, trace) = trainer.train(data, self.config.max_epochs, self.config.tolerance)?;
        let (intercept, weights) = extract_weights(&model)?;

        if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(ConversionError::NotConverged {
                model: ModelKind::Logistic,
                reason: "non-finite weights".to_string(),
            });
        }

        if trace.converged {
            log::info!(
                "Logistic regression converged after {} epochs, loss={:.6}",
                trace.epochs,
                trace.final_loss
            );
        } else if self.config.fail_on_max_epochs {
            return Err(diverged(format!(
                "no convergence within {} epochs, loss={:.6}",
                trace.epochs, trace.final_loss
            )));
        } else {
            log::warn!(
                "Logistic regression stopped at max epochs ({}) without converging, loss={:.6}",
                trace.epochs,
                trace.final_loss
            );
        }

        Ok(Box::new(FittedLogistic {
            feature_names: data.features.column_names(),
            intercept,
            weights,
            trace,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct FittedLogistic {
    feature_names: Vec<String>,
    intercept: f64,
    weights: Vec<f64>,
    trace: TrainingTrace,
}

impl FittedLogistic {
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> Vec<Coefficient> {
        self.feature_names
            .iter()
            .zip(&self.weights)
            .map(|(feature, &w)| Coefficient {
                feature: feature.clone(),
                coefficient: w,
                odds_ratio: w.exp(),
            })
            .collect()
    }

    fn score(&self, row: &[f64]) -> f64 {
        let z: f64 = self.intercept + row.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

impl FittedModel for FittedLogistic {
    fn kind(&self) -> ModelKind {
        ModelKind::Logistic
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        check_width(self.weights.len(), features)?;
        Ok(features.rows.iter().map(|row| self.score(row)).collect())
    }

    /// Absolute coefficient; features are standardized or indicators
    fn importances(&self) -> Vec<f64> {
        self.weights.iter().map(|w| w.abs()).collect()
    }

    fn details(&self) -> ModelDetails {
        ModelDetails::Logistic {
            intercept: self.intercept,
            coefficients: self.coefficients(),
            epochs: self.trace.epochs,
            converged: self.trace.converged,
            final_loss: self.trace.final_loss,
        }
    }
}
