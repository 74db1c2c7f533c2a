//! Parameter initialization schemes and the parameter store.
//!
//! Parameter nodes only carry a shape and a scheme. Real values are drawn
//! once, from a seeded generator, when a model is compiled for training.

use crate::asg::Value;
use crate::error::ConfigurationError;
use crate::tensor::ParameterSpec;
use ndarray::ArrayD;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Current values of every trainable parameter, keyed by parameter name.
pub type ParameterStore = HashMap<String, Value>;

/// Gain used by the message-passing convolutions.
pub const DEFAULT_CONV_GAIN: f32 = 1.414;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    Zeros,
    /// U(-b, b) with b = gain * sqrt(6 / (fan_in + fan_out))
    XavierUniform { gain: f32 },
    /// N(0, s) with s = gain * sqrt(2 / (fan_in + fan_out))
    XavierNormal { gain: f32 },
}

impl Initialization {
    pub fn with_gain(self, gain: f32) -> Self {
        match self {
            Initialization::Zeros => Initialization::Zeros,
            Initialization::XavierUniform { .. } => Initialization::XavierUniform { gain },
            Initialization::XavierNormal { .. } => Initialization::XavierNormal { gain },
        }
    }

    /// Draws a tensor of the given shape.
    pub fn sample<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> Result<ArrayD<f32>, ConfigurationError> {
        let (fan_in, fan_out) = fans(shape);
        match *self {
            Initialization::Zeros => Ok(ArrayD::zeros(shape)),
            Initialization::XavierUniform { gain } => {
                let bound = gain * (6.0 / (fan_in + fan_out) as f32).sqrt();
                if !(bound.is_finite() && bound > 0.0) {
                    return Err(invalid_gain(gain));
                }
                Ok(ArrayD::random_using(shape, Uniform::new(-bound, bound), rng))
            }
            Initialization::XavierNormal { gain } => {
                let std = gain * (2.0 / (fan_in + fan_out) as f32).sqrt();
                let dist = Normal::new(0.0, std).map_err(|_| invalid_gain(gain))?;
                if !std.is_finite() {
                    return Err(invalid_gain(gain));
                }
                Ok(ArrayD::random_using(shape, dist, rng))
            }
        }
    }
}

impl FromStr for Initialization {
    type Err = ConfigurationError;

    /// Parses a scheme name. The gain defaults to 1.0, use [`Initialization::with_gain`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xavier_uniform" => Ok(Initialization::XavierUniform { gain: 1.0 }),
            "xavier_normal" => Ok(Initialization::XavierNormal { gain: 1.0 }),
            "zeros" => Ok(Initialization::Zeros),
            other => Err(ConfigurationError::UnknownInitialization(other.to_string())),
        }
    }
}

fn invalid_gain(gain: f32) -> ConfigurationError {
    ConfigurationError::InvalidHyperparameter {
        name: "gain".to_string(),
        reason: format!("{} does not give a usable scale", gain),
    }
}

/// Fan-in/fan-out of a weight laid out `(in, out)`. Vectors count as (1, n).
fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (1, *n),
        [rows, cols, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (rows * receptive, cols * receptive)
        }
    }
}

/// Draws initial values for every registered parameter, in registry order.
pub fn init_parameters<R: Rng + ?Sized>(
    specs: &[ParameterSpec],
    rng: &mut R,
) -> Result<ParameterStore, ConfigurationError> {
    let mut store = ParameterStore::with_capacity(specs.len());
    for spec in specs {
        let data = spec.init.sample(&spec.shape, rng)?;
        store.insert(spec.name.clone(), Value::Tensor(data));
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_names() {
        assert_eq!("xavier_uniform".parse(), Ok(Initialization::XavierUniform { gain: 1.0 }));
        assert_eq!("xavier_normal".parse(), Ok(Initialization::XavierNormal { gain: 1.0 }));
        assert_eq!(
            "invalid".parse::<Initialization>(),
            Err(ConfigurationError::UnknownInitialization("invalid".to_string()))
        );
    }

    #[test]
    fn test_xavier_uniform_respects_bound() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = Initialization::XavierUniform { gain: DEFAULT_CONV_GAIN }.sample(&[3, 3], &mut rng).unwrap();
        assert_eq!(w.shape(), &[3, 3]);
        let bound = DEFAULT_CONV_GAIN * (6.0f32 / 6.0).sqrt();
        assert!(w.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_xavier_normal_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = Initialization::XavierNormal { gain: 1.0 }.sample(&[3, 3], &mut rng).unwrap();
        assert_eq!(w.shape(), &[3, 3]);
    }

    #[test]
    fn test_same_seed_same_values() {
        let a = Initialization::XavierUniform { gain: 1.0 }
            .sample(&[4, 2], &mut StdRng::seed_from_u64(7))
            .unwrap();
        let b = Initialization::XavierUniform { gain: 1.0 }
            .sample(&[4, 2], &mut StdRng::seed_from_u64(7))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fans_follow_in_out_layout() {
        assert_eq!(fans(&[3, 5]), (3, 5));
        assert_eq!(fans(&[4]), (1, 4));
        assert_eq!(fans(&[2, 3, 4]), (8, 12));
    }

    #[test]
    fn test_bad_gain_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Initialization::XavierUniform { gain: f32::NAN }.sample(&[2, 2], &mut rng).is_err());
    }
}
