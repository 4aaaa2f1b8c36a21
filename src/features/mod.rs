//! Cleaning and feature engineering
//!
//! Turns the merged call table into a fixed-width numeric matrix.

pub mod buckets;
pub mod cleaning;
pub mod encoding;
pub mod profile;

pub use cleaning::{Cleaner, CleaningReport, ColumnPolicy, Treatment};
pub use encoding::{EncodedTable, EncodingSchema};
pub use profile::ColumnProfile;
