//! Partitioning and evaluation
//!
//! Stratified split, training-only upsampling, k-fold assignment and
//! ranking metrics.

pub mod cross_validation;
pub mod metrics;
pub mod split;

pub use metrics::{ConfusionMatrix, Evaluation, RocPoint};
pub use split::{stratified_split, upsample, Partition};
