//! Online statistics.

/// Running mean, updated incrementally.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    mean: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
    }

    pub fn compute(&self) -> f64 {
        self.mean
    }

    /// Number of values seen since the last reset.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.mean = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut m = RunningMean::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            m.update(v);
        }
        assert_eq!(m.count(), 4);
        assert!((m.compute() - 2.5).abs() < 1e-12);
        m.reset();
        assert_eq!(m.count(), 0);
    }
}
