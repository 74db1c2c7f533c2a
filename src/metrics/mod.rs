//! Metrics for training reports.
//!
//! - **Classification**: [`Accuracy`]
//! - **Running statistics**: [`RunningMean`]
//!
//! ```rust,ignore
//! use topoasg::metrics::{Accuracy, Metric};
//!
//! let mut accuracy = Accuracy::for_logits();
//! accuracy.update(&predictions, &targets);
//! println!("Accuracy: {:.4}", accuracy.compute());
//! accuracy.reset();
//! ```

pub mod classification;
pub mod running;

pub use classification::Accuracy;
pub use running::RunningMean;

/// Base trait for metrics.
pub trait Metric {
    type Prediction;
    type Target;
    type Output;

    /// Updates the metric state with new data.
    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target);

    fn compute(&self) -> Self::Output;

    fn reset(&mut self);

    fn name(&self) -> &str;
}
