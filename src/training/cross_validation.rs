//! Seeded k-fold assignment

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// One train/validation split of sample positions
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Shuffle positions and deal them into `n_folds` folds of near-equal size.
/// Fewer samples than folds yields one fold per sample.
pub fn k_fold(n_samples: usize, n_folds: usize, rng: &mut StdRng) -> Vec<CVSplit> {
    let n_folds = n_folds.clamp(2, n_samples.max(2));
    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(rng);

    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_folds];
    for (i, idx) in indices.into_iter().enumerate() {
        folds[i % n_folds].push(idx);
    }

    (0..n_folds)
        .filter(|&k| !folds[k].is_empty())
        .map(|k| CVSplit {
            train_indices: folds
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != k)
                .flat_map(|(_, f)| f.iter().copied())
                .collect(),
            test_indices: folds[k].clone(),
        })
        .collect()
}
