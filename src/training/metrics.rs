//! Evaluation metrics for ranking classifiers
//!
//! Accuracy at a decision threshold, the ROC curve over every distinct
//! predicted probability, and the area under it.

use serde::Serialize;
use std::fmt;

use crate::ModelKind;

/// Confusion matrix at a fixed threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// A probability at or above `threshold` predicts conversion
    pub fn from_probabilities(labels: &[f64], probs: &[f64], threshold: f64) -> Self {
        let mut cm = ConfusionMatrix::default();
        for (&y, &p) in labels.iter().zip(probs) {
            match (y >= 0.5, p >= threshold) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// Share of rows whose thresholded prediction equals the label
    pub fn accuracy(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            (self.tp + self.tn) as f64 / self.total() as f64
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "             Predicted 0  Predicted 1")?;
        writeln!(f, "  Actual 0   {:>11}  {:>11}", self.tn, self.fp)?;
        write!(f, "  Actual 1   {:>11}  {:>11}", self.fn_, self.tp)
    }
}

/// One point of the ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RocPoint {
    /// Rows scoring at or above this value are predicted positive
    pub threshold: f64,
    pub fpr: f64,
    pub tpr: f64,
}

/// ROC curve from (0, 0) to (1, 1), one point per distinct probability.
/// Empty when either class is absent.
pub fn roc_curve(labels: &[f64], probs: &[f64]) -> Vec<RocPoint> {
    let n_pos = labels.iter().filter(|&&y| y >= 0.5).count() as f64;
    let n_neg = labels.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return Vec::new();
    }

    let mut pairs: Vec<(f64, bool)> = probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| (p, y >= 0.5))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut points = vec![RocPoint {
        threshold: f64::INFINITY,
        fpr: 0.0,
        tpr: 0.0,
    }];
    let (mut tp, mut fp) = (0.0, 0.0);
    let mut i = 0;
    while i < pairs.len() {
        // Ties move together
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0.total_cmp(&score).is_eq() {
            if pairs[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        points.push(RocPoint {
            threshold: score,
            fpr: fp / n_neg,
            tpr: tp / n_pos,
        });
    }
    points
}

/// Trapezoidal area under a ROC curve
pub fn auc_from_curve(points: &[RocPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1].fpr - w[0].fpr) * (w[1].tpr + w[0].tpr) / 2.0)
        .sum()
}

/// Area under the ROC curve, `None` when only one class is present
pub fn auc(labels: &[f64], probs: &[f64]) -> Option<f64> {
    let curve = roc_curve(labels, probs);
    if curve.is_empty() {
        None
    } else {
        Some(auc_from_curve(&curve))
    }
}

/// Held-out performance of one classifier
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub model: ModelKind,
    pub threshold: f64,
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub auc: Option<f64>,
    pub roc: Vec<RocPoint>,
}

impl Evaluation {
    pub fn compute(model: ModelKind, labels: &[f64], probs: &[f64], threshold: f64) -> Self {
        let confusion = ConfusionMatrix::from_probabilities(labels, probs, threshold);
        let roc = roc_curve(labels, probs);
        let auc = if roc.is_empty() {
            None
        } else {
            Some(auc_from_curve(&roc))
        };
        Evaluation {
            model,
            threshold,
            accuracy: confusion.accuracy(),
            confusion,
            auc,
            roc,
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auc = self
            .auc
            .map(|a| format!("{:.4}", a))
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "{} | Acc: {:.2}% @ {:.2} | AUC: {} | ROC points: {}",
            self.model,
            self.accuracy * 100.0,
            self.threshold,
            auc,
            self.roc.len()
        )
    }
}
