//! Data ingestion and feature matrices
//!
//! CSV loading, merging of the call logs with their lookups, and the numeric
//! datasets handed to the classifiers.

pub mod dataset;
pub mod loader;
pub mod table;

pub use dataset::{CallDataset, FeatureColumn, FeatureMatrix};
pub use loader::{merge, read_csv, RawSources};
pub use table::{Column, Table};
