//! Stratified labeled/unlabeled split by class index
//!
//! The training indices are grouped by class, shuffled within each class,
//! reduced to `dataset_ratio`, then cut per class into a labeled and an
//! unlabeled part by `[supervised_ratio, 1 - supervised_ratio]`. Every class
//! keeps the same proportions in both parts and the parts never overlap.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SslError};

/// Indices of each class, `result[c]` lists the examples labeled `c`
pub fn class_indices(labels: &[usize], nb_classes: usize) -> Result<Vec<Vec<usize>>> {
    let mut classes = vec![Vec::new(); nb_classes];
    for (index, &label) in labels.iter().enumerate() {
        let class = classes.get_mut(label).ok_or_else(|| {
            SslError::Dataset(format!(
                "Label {} of example {} is out of range for {} classes",
                label, index, nb_classes
            ))
        })?;
        class.push(index);
    }
    Ok(classes)
}

pub fn shuffle_class_indices<R: Rng>(classes: &mut [Vec<usize>], rng: &mut R) {
    for class in classes.iter_mut() {
        class.shuffle(rng);
    }
}

/// Keep the first `ratio` of each class
pub fn reduce_class_indices(classes: &[Vec<usize>], ratio: f64) -> Vec<Vec<usize>> {
    classes
        .iter()
        .map(|class| {
            let keep = (class.len() as f64 * ratio).round() as usize;
            class[..keep.min(class.len())].to_vec()
        })
        .collect()
}

/// Cut each class by consecutive `ratios` and merge the parts across classes
pub fn split_class_indices(classes: &[Vec<usize>], ratios: &[f64]) -> Vec<Vec<usize>> {
    let mut parts = vec![Vec::new(); ratios.len()];
    for class in classes {
        let mut begin = 0;
        let mut cumulated = 0.0;
        for (i, ratio) in ratios.iter().enumerate() {
            cumulated += ratio;
            let end = if i + 1 == ratios.len() {
                class.len()
            } else {
                ((class.len() as f64 * cumulated).round() as usize).min(class.len())
            };
            parts[i].extend_from_slice(&class[begin..end.max(begin)]);
            begin = end.max(begin);
        }
    }
    parts
}

/// Labeled and unlabeled training indices of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSplit {
    pub labeled: Vec<usize>,
    pub unlabeled: Vec<usize>,
}

impl LabeledSplit {
    pub fn from_labels(
        labels: &[usize],
        nb_classes: usize,
        dataset_ratio: f64,
        supervised_ratio: f64,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut classes = class_indices(labels, nb_classes)?;
        shuffle_class_indices(&mut classes, &mut rng);
        let classes = reduce_class_indices(&classes, dataset_ratio);

        let mut parts =
            split_class_indices(&classes, &[supervised_ratio, 1.0 - supervised_ratio]).into_iter();
        let labeled = parts.next().unwrap_or_default();
        let unlabeled = parts.next().unwrap_or_default();

        if labeled.is_empty() {
            return Err(SslError::Dataset(format!(
                "No labeled examples with dataset_ratio {} and supervised_ratio {}",
                dataset_ratio, supervised_ratio
            )));
        }
        Ok(Self { labeled, unlabeled })
    }

    /// Labeled followed by unlabeled indices
    pub fn all(&self) -> Vec<usize> {
        self.labeled
            .iter()
            .chain(&self.unlabeled)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels() -> Vec<usize> {
        (0..1000).map(|i| i % 10).collect()
    }

    #[test]
    fn test_class_indices_groups_by_label() {
        let classes = class_indices(&[0, 1, 0, 2], 3).unwrap();
        assert_eq!(classes, vec![vec![0, 2], vec![1], vec![3]]);
        assert!(class_indices(&[0, 5], 3).is_err());
    }

    #[test]
    fn test_split_is_stratified_and_disjoint() {
        let labels = labels();
        let split = LabeledSplit::from_labels(&labels, 10, 1.0, 0.1, 123).unwrap();
        assert_eq!(split.labeled.len(), 100);
        assert_eq!(split.unlabeled.len(), 900);

        let mut per_class = [0usize; 10];
        for &i in &split.labeled {
            per_class[labels[i]] += 1;
        }
        assert!(per_class.iter().all(|&n| n == 10));

        let labeled: HashSet<_> = split.labeled.iter().collect();
        assert!(split.unlabeled.iter().all(|i| !labeled.contains(i)));
    }

    #[test]
    fn test_dataset_ratio_reduces_both_parts() {
        let split = LabeledSplit::from_labels(&labels(), 10, 0.5, 0.2, 0).unwrap();
        assert_eq!(split.labeled.len() + split.unlabeled.len(), 500);
        assert_eq!(split.labeled.len(), 100);
        assert_eq!(split.all().len(), 500);
    }

    #[test]
    fn test_split_is_reproducible() {
        let a = LabeledSplit::from_labels(&labels(), 10, 1.0, 0.1, 7).unwrap();
        let b = LabeledSplit::from_labels(&labels(), 10, 1.0, 0.1, 7).unwrap();
        let c = LabeledSplit::from_labels(&labels(), 10, 1.0, 0.1, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_ratios_cover_each_class() {
        let classes = vec![vec![0, 1, 2], vec![3, 4, 5, 6, 7]];
        let parts = split_class_indices(&classes, &[0.4, 0.6]);
        assert_eq!(parts[0].len() + parts[1].len(), 8);
    }
}
