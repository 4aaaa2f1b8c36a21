//! Stratified train/test split and training-only upsampling

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::dataset::CallDataset;
use crate::{ConversionError, Result};

/// Train and held-out partitions of the labeled rows
#[derive(Debug, Clone)]
pub struct Partition {
    pub train: CallDataset,
    pub test: CallDataset,
}

/// Split keeping each class's share in both partitions. Each class
/// contributes `round(n_class * train_ratio)` rows to training.
pub fn stratified_split(data: &CallDataset, train_ratio: f64, rng: &mut StdRng) -> Result<Partition> {
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Err(ConversionError::Config(format!(
            "train ratio must be in (0, 1), got {}",
            train_ratio
        )));
    }
    if data.is_empty() {
        return Err(ConversionError::InsufficientData(
            "no labeled rows to split".to_string(),
        ));
    }

    let mut train_positions = Vec::new();
    let mut test_positions = Vec::new();

    for class in [0.0, 1.0] {
        let mut positions: Vec<usize> = (0..data.n_samples())
            .filter(|&i| data.labels[i] == class)
            .collect();
        positions.shuffle(rng);

        let n_train = (positions.len() as f64 * train_ratio).round() as usize;
        train_positions.extend_from_slice(&positions[..n_train]);
        test_positions.extend_from_slice(&positions[n_train..]);
    }

    // Keep original row order inside each partition
    train_positions.sort_unstable();
    test_positions.sort_unstable();

    let partition = Partition {
        train: data.subset(&train_positions),
        test: data.subset(&test_positions),
    };

    log::info!(
        "Split {} labeled rows: train={} {:?}, test={} {:?}",
        data.n_samples(),
        partition.train.n_samples(),
        partition.train.class_counts(),
        partition.test.n_samples(),
        partition.test.class_counts()
    );

    Ok(partition)
}

/// Duplicate minority-class rows, drawn with replacement, until both classes
/// have the same count. Only ever applied to the training partition.
pub fn upsample(train: &CallDataset, rng: &mut StdRng) -> CallDataset {
    let (negatives, positives) = train.class_counts();
    if negatives == positives {
        return train.clone();
    }
    if negatives == 0 || positives == 0 {
        log::warn!("Training partition has a single class; upsampling skipped");
        return train.clone();
    }

    let minority_class = if positives < negatives { 1.0 } else { 0.0 };
    let minority: Vec<usize> = (0..train.n_samples())
        .filter(|&i| train.labels[i] == minority_class)
        .collect();
    let extra = negatives.abs_diff(positives);

    let mut positions: Vec<usize> = (0..train.n_samples()).collect();
    positions.extend((0..extra).map(|_| minority[rng.gen_range(0..minority.len())]));

    let balanced = train.subset(&positions);
    log::info!(
        "Upsampled training partition from {:?} to {:?}",
        (negatives, positives),
        balanced.class_counts()
    );
    balanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{FeatureColumn, FeatureMatrix};
    use rand::SeedableRng;

    /// Ten calls with household_income 10k..100k, seven non-converting
    fn toy() -> CallDataset {
        let rows: Vec<Vec<f64>> = (1..=10).map(|i| vec![i as f64 * 10_000.0]).collect();
        let labels = vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let features = FeatureMatrix::new(
            vec![FeatureColumn {
                name: "household_income".into(),
                source: "household_income".into(),
            }],
            rows,
        );
        CallDataset::new(features, labels, (0..10).collect()).unwrap()
    }

    #[test]
    fn test_toy_split_sizes() {
        let mut rng = StdRng::seed_from_u64(42);
        let partition = stratified_split(&toy(), 0.8, &mut rng).unwrap();

        assert_eq!(partition.train.n_samples(), 8);
        assert_eq!(partition.test.n_samples(), 2);
        assert_eq!(partition.train.class_counts(), (6, 2));
        assert_eq!(partition.test.class_counts(), (1, 1));
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let mut rng = StdRng::seed_from_u64(7);
        let partition = stratified_split(&toy(), 0.8, &mut rng).unwrap();

        let mut all: Vec<usize> = partition
            .train
            .row_ids
            .iter()
            .chain(&partition.test.row_ids)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_deterministic_for_seed() {
        let a = stratified_split(&toy(), 0.8, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = stratified_split(&toy(), 0.8, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a.train.row_ids, b.train.row_ids);
        assert_eq!(a.test.row_ids, b.test.row_ids);
    }

    #[test]
    fn test_upsampling_balances_train_only() {
        let mut rng = StdRng::seed_from_u64(42);
        let partition = stratified_split(&toy(), 0.8, &mut rng).unwrap();
        let test_before = partition.test.clone();

        let balanced = upsample(&partition.train, &mut rng);

        assert_eq!(balanced.class_counts(), (6, 6));
        // Every original training row survives
        for id in &partition.train.row_ids {
            assert!(balanced.row_ids.contains(id));
        }
        // Added rows are copies of training rows, never test rows
        for id in &balanced.row_ids {
            assert!(partition.train.row_ids.contains(id));
            assert!(!partition.test.row_ids.contains(id));
        }
        assert_eq!(balanced.n_samples(), 12);
        assert_eq!(partition.test, test_before);
    }

    #[test]
    fn test_invalid_ratio() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(stratified_split(&toy(), 1.0, &mut rng).is_err());
    }
}
