//! Metrics Module for Binary Clip Classification
//!
//! Provides running accumulators for the five statistics tracked per split:
//! - Accuracy
//! - Precision
//! - Recall
//! - F1-score
//! - Intersection-over-union (Jaccard index)
//!
//! Every accumulator follows the same lifecycle: `update` any number of times
//! within an epoch, `compute` to read the epoch value, `reset` exactly once
//! before the next epoch starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A sample counts as a positive prediction when its probability is strictly above this
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Confusion counts for a binary problem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatScores {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl StatScores {
    /// Count outcomes for a batch of probabilities against integer labels
    pub fn from_probabilities(probs: &[f32], labels: &[i64]) -> Self {
        assert_eq!(
            probs.len(),
            labels.len(),
            "Probabilities and labels must have same length"
        );

        let mut scores = Self::default();
        for (&p, &y) in probs.iter().zip(labels.iter()) {
            let predicted = p > DECISION_THRESHOLD;
            let actual = y != 0;
            match (predicted, actual) {
                (true, true) => scores.true_positives += 1,
                (true, false) => scores.false_positives += 1,
                (false, false) => scores.true_negatives += 1,
                (false, true) => scores.false_negatives += 1,
            }
        }
        scores
    }

    /// Total number of samples counted
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    fn merge(&mut self, other: &StatScores) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.true_negatives += other.true_negatives;
        self.false_negatives += other.false_negatives;
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// The statistic a [`BinaryMetric`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryMetricKind {
    Accuracy,
    Precision,
    Recall,
    F1,
    Iou,
}

impl BinaryMetricKind {
    /// All kinds in the order they are reported
    pub const ALL: [BinaryMetricKind; 5] = [
        BinaryMetricKind::Accuracy,
        BinaryMetricKind::Precision,
        BinaryMetricKind::Recall,
        BinaryMetricKind::F1,
        BinaryMetricKind::Iou,
    ];

    /// Short name used in step and epoch log keys
    pub fn short_name(&self) -> &'static str {
        match self {
            BinaryMetricKind::Accuracy => "acc",
            BinaryMetricKind::Precision => "prec",
            BinaryMetricKind::Recall => "rec",
            BinaryMetricKind::F1 => "f1",
            BinaryMetricKind::Iou => "iou",
        }
    }

    /// Evaluate this statistic on a set of confusion counts.
    ///
    /// Zero-division cases evaluate to 0.0.
    pub fn evaluate(&self, s: &StatScores) -> f64 {
        let tp = s.true_positives;
        let fp = s.false_positives;
        let fnn = s.false_negatives;
        match self {
            BinaryMetricKind::Accuracy => ratio(tp + s.true_negatives, s.total()),
            BinaryMetricKind::Precision => ratio(tp, tp + fp),
            BinaryMetricKind::Recall => ratio(tp, tp + fnn),
            BinaryMetricKind::F1 => ratio(2 * tp, 2 * tp + fp + fnn),
            BinaryMetricKind::Iou => ratio(tp, tp + fp + fnn),
        }
    }
}

/// A running accumulator for one binary statistic
#[derive(Debug, Clone)]
pub struct BinaryMetric {
    kind: BinaryMetricKind,
    state: StatScores,
    updates: usize,
}

impl BinaryMetric {
    pub fn new(kind: BinaryMetricKind) -> Self {
        Self {
            kind,
            state: StatScores::default(),
            updates: 0,
        }
    }

    pub fn kind(&self) -> BinaryMetricKind {
        self.kind
    }

    /// Absorb a batch into the running state
    pub fn update(&mut self, probs: &[f32], labels: &[i64]) {
        let batch = StatScores::from_probabilities(probs, labels);
        self.state.merge(&batch);
        self.updates += 1;
    }

    /// Absorb a batch and return the statistic over that batch alone
    pub fn forward(&mut self, probs: &[f32], labels: &[i64]) -> f64 {
        let batch = StatScores::from_probabilities(probs, labels);
        self.state.merge(&batch);
        self.updates += 1;
        self.kind.evaluate(&batch)
    }

    /// Statistic over everything absorbed since the last reset.
    ///
    /// Returns 0.0 when nothing has been absorbed.
    pub fn compute(&self) -> f64 {
        if self.updates == 0 {
            warn!(
                "{} computed before any update in this epoch",
                self.kind.short_name()
            );
        }
        self.kind.evaluate(&self.state)
    }

    pub fn reset(&mut self) {
        self.state = StatScores::default();
        self.updates = 0;
    }

    /// Number of updates since the last reset
    pub fn updates(&self) -> usize {
        self.updates
    }
}

/// One value per tracked statistic
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub iou: f64,
}

impl BinaryScores {
    pub fn get(&self, kind: BinaryMetricKind) -> f64 {
        match kind {
            BinaryMetricKind::Accuracy => self.accuracy,
            BinaryMetricKind::Precision => self.precision,
            BinaryMetricKind::Recall => self.recall,
            BinaryMetricKind::F1 => self.f1,
            BinaryMetricKind::Iou => self.iou,
        }
    }

    fn set(&mut self, kind: BinaryMetricKind, value: f64) {
        match kind {
            BinaryMetricKind::Accuracy => self.accuracy = value,
            BinaryMetricKind::Precision => self.precision = value,
            BinaryMetricKind::Recall => self.recall = value,
            BinaryMetricKind::F1 => self.f1 = value,
            BinaryMetricKind::Iou => self.iou = value,
        }
    }

    /// Named values keyed by short metric name
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BinaryMetricKind::ALL
            .iter()
            .map(|k| (k.short_name().to_string(), self.get(*k)))
            .collect()
    }
}

/// Which split a set of accumulators belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Train,
    Validation,
}

impl Phase {
    /// Prefix used for log keys
    pub fn prefix(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Validation => "val",
        }
    }
}

/// The five accumulators owned by one split
#[derive(Debug, Clone)]
pub struct PhaseMetrics {
    phase: Phase,
    metrics: [BinaryMetric; 5],
}

impl PhaseMetrics {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            metrics: BinaryMetricKind::ALL.map(BinaryMetric::new),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Absorb a batch into every accumulator and return the batch values
    pub fn step(&mut self, probs: &[f32], labels: &[i64]) -> BinaryScores {
        let mut scores = BinaryScores::default();
        for metric in self.metrics.iter_mut() {
            let value = metric.forward(probs, labels);
            scores.set(metric.kind(), value);
        }
        scores
    }

    /// Epoch values over everything absorbed since the last reset
    pub fn compute(&self) -> BinaryScores {
        let mut scores = BinaryScores::default();
        for metric in &self.metrics {
            scores.set(metric.kind(), metric.compute());
        }
        scores
    }

    pub fn reset(&mut self) {
        for metric in self.metrics.iter_mut() {
            metric.reset();
        }
    }

    /// Read the epoch values, then clear the accumulators.
    pub fn finish_epoch(&mut self) -> BinaryScores {
        let scores = self.compute();
        self.reset();
        scores
    }

    /// Updates absorbed since the last reset
    pub fn updates(&self) -> usize {
        self.metrics[0].updates()
    }
}
