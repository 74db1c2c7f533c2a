//! Seeded synthetic datasets for the tutorials and tests.

use super::dataset::{Sample, Target, TopoDataset};
use crate::topology::Rank;
use ndarray::{ArrayD, Axis};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// `num_samples` samples of standard normal signals, `cells[r] = (n_cells, channels)`.
///
/// The class of a sample is a fixed function of its lowest-rank signal: the
/// column means are folded into `num_classes` buckets (channel `c` goes to
/// bucket `c % num_classes`) and the largest bucket wins. Models can
/// therefore learn it.
pub fn classification_samples(
    num_samples: usize,
    cells: &BTreeMap<Rank, (usize, usize)>,
    num_classes: usize,
    seed: u64,
) -> TopoDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..num_samples)
        .map(|_| {
            let signals: BTreeMap<Rank, ArrayD<f32>> = cells
                .iter()
                .map(|(&rank, &(n, c))| (rank, ArrayD::random_using(vec![n, c], StandardNormal, &mut rng)))
                .collect();
            let class = signals.values().next().map_or(0, |s| bucket_class(s, num_classes));
            Sample::new(signals, Target::Class(class))
        })
        .collect();
    TopoDataset::new(samples)
}

/// Standard normal `(n_cells, channels)` signals on one rank with one binary
/// label per cell: 1 when the cell's channels sum to a positive value.
pub fn cell_labeling_samples(num_samples: usize, rank: Rank, n_cells: usize, channels: usize, seed: u64) -> TopoDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..num_samples)
        .map(|_| {
            let signal: ArrayD<f32> = ArrayD::random_using(vec![n_cells, channels], StandardNormal, &mut rng);
            let labels = signal
                .sum_axis(Axis(1))
                .mapv(|s| if s > 0.0 { 1.0 } else { 0.0 })
                .insert_axis(Axis(1));
            Sample::new(BTreeMap::from([(rank, signal)]), Target::PerRank(BTreeMap::from([(rank, labels)])))
        })
        .collect();
    TopoDataset::new(samples)
}

fn bucket_class(signal: &ArrayD<f32>, num_classes: usize) -> usize {
    let num_classes = num_classes.max(1);
    let means = signal.mean_axis(Axis(0));
    let mut buckets = vec![0.0f32; num_classes];
    if let Some(means) = means {
        for (c, m) in means.iter().enumerate() {
            buckets[c % num_classes] += m;
        }
    }
    buckets
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}
