//! Metrics Module
//!
//! Batch metrics computed on prediction tensors, running means over an
//! epoch, and a recorder that keeps the per-epoch history with min/max.

use std::collections::BTreeMap;

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

/// Fraction of rows whose argmax matches the argmax of the target distribution
pub fn categorical_accuracy<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> f64 {
    let [batch_size, _] = pred.dims();
    if batch_size == 0 {
        return 0.0;
    }
    let correct = pred
        .argmax(1)
        .equal(target.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    correct as f64 / batch_size as f64
}

/// Fraction of rows whose thresholded multi-label prediction matches every target bit
pub fn multilabel_accuracy<B: Backend>(
    pred: Tensor<B, 2>,
    target: Tensor<B, 2>,
    threshold: f64,
) -> f64 {
    let [batch_size, num_classes] = pred.dims();
    if batch_size == 0 {
        return 0.0;
    }
    let binarized = pred.greater_elem(threshold).float();
    let matching = binarized
        .equal(target.greater_elem(0.5).float())
        .int()
        .sum_dim(1)
        .equal_elem(num_classes as i64)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    matching as f64 / batch_size as f64
}

/// Running means of named scalars over one epoch
#[derive(Debug, Clone, Default)]
pub struct EpochMeans {
    sums: BTreeMap<String, (f64, usize)>,
}

impl EpochMeans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: f64) {
        let entry = self.sums.entry(name.to_string()).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        self.sums
            .get(name)
            .filter(|(_, count)| *count > 0)
            .map(|(sum, count)| sum / *count as f64)
    }

    /// All means, sorted by name
    pub fn means(&self) -> Vec<(String, f64)> {
        self.sums
            .iter()
            .filter(|(_, (_, count))| *count > 0)
            .map(|(name, (sum, count))| (name.clone(), sum / *count as f64))
            .collect()
    }

    pub fn reset(&mut self) {
        self.sums.clear();
    }
}

/// Per-epoch history of one metric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricHistory {
    pub values: Vec<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricHistory {
    fn push(&mut self, value: f64) {
        self.values.push(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

/// Keeps every epoch value per metric so the learner can report min/max and best epochs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsRecorder {
    metrics: BTreeMap<String, MetricHistory>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    pub fn history(&self, name: &str) -> Option<&MetricHistory> {
        self.metrics.get(name)
    }

    pub fn max(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|h| h.max)
    }

    pub fn min(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|h| h.min)
    }

    /// Epoch index of the maximum value (first occurrence)
    pub fn best_epoch(&self, name: &str) -> Option<usize> {
        let history = self.metrics.get(name)?;
        let best = history.max?;
        history.values.iter().position(|v| *v == best)
    }

    /// One line per metric with its min and max
    pub fn summary(&self) -> String {
        self.metrics
            .iter()
            .filter_map(|(name, h)| {
                Some(format!("{:<16} min {:.4}  max {:.4}", name, h.min?, h.max?))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
