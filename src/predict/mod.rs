//! Scoring
//!
//! Full-dataset estimates, the combine policy and per-segment summaries.

pub mod scoring;
pub mod segments;

pub use scoring::{augment, average, score_dataset, CombinePolicy, Scores};
pub use segments::{summarize_all, BoxStats, SegmentSummary};
