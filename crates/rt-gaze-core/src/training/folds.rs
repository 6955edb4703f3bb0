//! Subject partitions for training runs.

use serde::Serialize;

/// Number of subjects in the dataset layout the fixed partitions assume.
pub const NUM_SUBJECTS: usize = 17;

/// Train/validation/test subject lists of one fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    /// Subjects used for fitting.
    pub train: Vec<usize>,
    /// Subjects used for per-epoch validation.
    pub validate: Vec<usize>,
    /// Held-out subjects; empty when the run has no test pass.
    pub test: Vec<usize>,
}

impl Fold {
    /// Returns true if no subject appears in two lists.
    #[must_use]
    pub fn is_disjoint(&self) -> bool {
        let mut seen = [false; NUM_SUBJECTS];
        self.train
            .iter()
            .chain(&self.validate)
            .chain(&self.test)
            .all(|&s| s < NUM_SUBJECTS && !std::mem::replace(&mut seen[s], true))
    }
}

/// Subjects 0..=15 for training and 16 for validation, no test set.
#[must_use]
pub fn single_split() -> Vec<Fold> {
    vec![Fold {
        train: (0..=15).collect(),
        validate: vec![16],
        test: Vec::new(),
    }]
}

/// `(train, validate, test)` subject lists of the three cross-validation
/// folds.
pub const THREE_FOLD: [(&[usize], &[usize], &[usize]); 3] = [
    (
        &[0, 1, 2, 8, 10, 3, 4, 7, 9],
        &[14, 15, 16],
        &[5, 6, 11, 12, 13],
    ),
    (
        &[0, 1, 2, 8, 10, 5, 6, 11, 12, 13],
        &[14, 15, 16],
        &[3, 4, 7, 9],
    ),
    (
        &[3, 4, 7, 9, 5, 6, 11, 12, 13],
        &[14, 15, 16],
        &[0, 1, 2, 8, 10],
    ),
];

/// The fixed three-fold cross-validation partition, see [`THREE_FOLD`].
#[must_use]
pub fn three_fold() -> Vec<Fold> {
    THREE_FOLD
        .iter()
        .map(|(train, validate, test)| Fold {
            train: train.to_vec(),
            validate: validate.to_vec(),
            test: test.to_vec(),
        })
        .collect()
}

/// Selects the partition for a run.
#[must_use]
pub fn folds(k_fold_validation: bool) -> Vec<Fold> {
    if k_fold_validation {
        three_fold()
    } else {
        single_split()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_split() {
        let folds = single_split();
        assert_eq!(folds.len(), 1);
        assert_eq!(folds[0].train, (0..=15).collect::<Vec<_>>());
        assert_eq!(folds[0].validate, vec![16]);
        assert!(folds[0].test.is_empty());
    }

    #[test]
    fn test_three_fold_literal_partition() {
        let folds = three_fold();
        assert_eq!(folds[0].train, vec![0, 1, 2, 8, 10, 3, 4, 7, 9]);
        assert_eq!(folds[1].train, vec![0, 1, 2, 8, 10, 5, 6, 11, 12, 13]);
        assert_eq!(folds[2].train, vec![3, 4, 7, 9, 5, 6, 11, 12, 13]);
        assert_eq!(folds[0].test, vec![5, 6, 11, 12, 13]);
        assert_eq!(folds[1].test, vec![3, 4, 7, 9]);
        assert_eq!(folds[2].test, vec![0, 1, 2, 8, 10]);
        for fold in &folds {
            assert_eq!(fold.validate, vec![14, 15, 16]);
        }
    }

    #[test]
    fn test_k_fold_flag_selects_partition() {
        assert_eq!(folds(true), three_fold());
        assert_eq!(folds(false), single_split());
        assert_eq!(three_fold().len(), THREE_FOLD.len());
    }

    #[test]
    fn test_folds_are_disjoint_and_cover_all_subjects() {
        for fold in single_split().iter().chain(&three_fold()) {
            assert!(fold.is_disjoint(), "{fold:?}");
        }
        for fold in three_fold() {
            let mut all: Vec<usize> =
                fold.train.iter().chain(&fold.validate).chain(&fold.test).copied().collect();
            all.sort_unstable();
            assert_eq!(all, (0..NUM_SUBJECTS).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_overlap_detected() {
        let fold = Fold {
            train: vec![1, 2],
            validate: vec![2],
            test: vec![],
        };
        assert!(!fold.is_disjoint());
    }
}
