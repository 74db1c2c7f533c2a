//! Classification accuracy.

use super::Metric;
use ndarray::{ArrayD, ArrayView2, Axis};

/// Fraction of correctly classified items.
///
/// Predictions whose last axis has more than one entry are multi-class
/// scores: every row is one item, classified by argmax, and the target row is
/// one-hot. Otherwise every element is a binary item, positive when the
/// prediction reaches `threshold` and the target reaches 0.5.
#[derive(Debug, Clone)]
pub struct Accuracy {
    correct: usize,
    total: usize,
    threshold: f32,
}

impl Default for Accuracy {
    fn default() -> Self {
        Self { correct: 0, total: 0, threshold: 0.5 }
    }
}

impl Accuracy {
    /// Binary predictions are probabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binary predictions are raw logits, positive from 0.
    pub fn for_logits() -> Self {
        Self { threshold: 0.0, ..Self::default() }
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

fn argmax_rows(rows: ArrayView2<f32>) -> Vec<usize> {
    rows.outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

fn as_rows(a: &ArrayD<f32>) -> Option<ArrayView2<'_, f32>> {
    let classes = *a.shape().last()?;
    let rows = a.len() / classes.max(1);
    a.view().into_shape((rows, classes)).ok()
}

impl Metric for Accuracy {
    type Prediction = ArrayD<f32>;
    type Target = ArrayD<f32>;
    type Output = f64;

    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target) {
        let is_multiclass = predictions.shape().last().map_or(false, |&c| c > 1);

        if is_multiclass {
            if let (Some(pred_rows), Some(target_rows)) = (as_rows(predictions), as_rows(targets)) {
                let hits = argmax_rows(pred_rows)
                    .into_iter()
                    .zip(argmax_rows(target_rows))
                    .filter(|(p, t)| p == t)
                    .count();
                self.correct += hits;
                self.total += pred_rows.len_of(Axis(0));
            }
        } else {
            for (pred, target) in predictions.iter().zip(targets.iter()) {
                if (*pred >= self.threshold) == (*target >= 0.5) {
                    self.correct += 1;
                }
                self.total += 1;
            }
        }
    }

    fn compute(&self) -> Self::Output {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn name(&self) -> &str {
        "accuracy"
    }
}
