//! The `Dataset` trait and the in-memory dataset of topological samples.

use crate::error::ConfigurationError;
use crate::topology::Rank;
use ndarray::ArrayD;
use std::collections::BTreeMap;

/// Source of indexed items.
pub trait Dataset {
    type Item;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<Self::Item>;
}

/// Ground truth of one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Dense labels per rank, shaped like the model's per-rank logits.
    PerRank(BTreeMap<Rank, ArrayD<f32>>),
    /// One class for the whole sample.
    Class(usize),
}

/// Per-rank input signals of one sample plus its target.
///
/// Signals are `(n_cells, channels)` matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub signals: BTreeMap<Rank, ArrayD<f32>>,
    pub target: Target,
}

impl Sample {
    pub fn new(signals: BTreeMap<Rank, ArrayD<f32>>, target: Target) -> Self {
        Self { signals, target }
    }

    /// Shape of every signal.
    pub fn signal_shapes(&self) -> BTreeMap<Rank, Vec<usize>> {
        self.signals.iter().map(|(&r, s)| (r, s.shape().to_vec())).collect()
    }
}

/// In-memory list of samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopoDataset {
    samples: Vec<Sample>,
}

impl TopoDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Pairs signals with labels; the counts must agree.
    pub fn from_parts(
        signals: Vec<BTreeMap<Rank, ArrayD<f32>>>,
        targets: Vec<Target>,
    ) -> Result<Self, ConfigurationError> {
        if signals.len() != targets.len() {
            return Err(ConfigurationError::SampleLabelMismatch { samples: signals.len(), labels: targets.len() });
        }
        Ok(Self::new(signals.into_iter().zip(targets).map(|(s, t)| Sample::new(s, t)).collect()))
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// First `round(len * train_fraction)` samples for training, the rest held out.
    pub fn split(&self, train_fraction: f64) -> Result<(TopoDataset, TopoDataset), ConfigurationError> {
        if !(0.0..=1.0).contains(&train_fraction) {
            return Err(ConfigurationError::InvalidHyperparameter {
                name: "train_fraction".to_string(),
                reason: format!("{} is not within [0, 1]", train_fraction),
            });
        }
        let n_train = ((self.samples.len() as f64) * train_fraction).round() as usize;
        let n_train = n_train.min(self.samples.len());
        let (train, test) = self.samples.split_at(n_train);
        Ok((TopoDataset::new(train.to_vec()), TopoDataset::new(test.to_vec())))
    }
}

impl Dataset for TopoDataset {
    type Item = Sample;

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> BTreeMap<Rank, ArrayD<f32>> {
        BTreeMap::from([(0, ArrayD::zeros(vec![3, 2]))])
    }

    #[test]
    fn test_from_parts_checks_counts() {
        let err = TopoDataset::from_parts(vec![signals(), signals()], vec![Target::Class(0)]).unwrap_err();
        assert_eq!(err, ConfigurationError::SampleLabelMismatch { samples: 2, labels: 1 });
    }

    #[test]
    fn test_split() {
        let ds = TopoDataset::from_parts(vec![signals(); 5], (0..5).map(Target::Class).collect()).unwrap();
        let (train, test) = ds.split(0.8).unwrap();
        assert_eq!(train.len(), 4);
        assert_eq!(test.len(), 1);
        assert_eq!(test.get(0).unwrap().target, Target::Class(4));
        assert!(ds.split(1.5).is_err());
    }
}
