//! Training hyperparameters.

use crate::error::{ConfigurationError, Result};
use crate::optimizers::OptimizerKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Loss family used for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Independent logits, binary cross-entropy.
    Binary,
    /// Softmax over the last axis, categorical cross-entropy.
    MultiClass,
}

/// Everything the training loop needs besides the model and the data.
///
/// Every field has a default, so a JSON file only needs to name what it
/// changes:
///
/// ```json
/// { "learning_rate": 0.01, "optimizer": { "type": "sgd", "momentum": 0.9 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub num_epochs: usize,
    /// Held-out evaluation runs on every epoch that is a multiple of this.
    pub eval_interval: usize,
    pub optimizer: OptimizerKind,
    /// Visit training samples in a seeded random order instead of dataset order.
    pub shuffle: bool,
    /// Seeds parameter initialization and shuffling.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            num_epochs: 5,
            eval_interval: 2,
            optimizer: OptimizerKind::Adam,
            shuffle: false,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TrainConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        let invalid = |name: &str, reason: String| ConfigurationError::InvalidHyperparameter { name: name.to_string(), reason };

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(invalid("learning_rate", format!("must be positive and finite, got {}", self.learning_rate)));
        }
        if self.num_epochs == 0 {
            return Err(invalid("num_epochs", "must be at least 1".to_string()));
        }
        if self.eval_interval == 0 {
            return Err(invalid("eval_interval", "must be at least 1".to_string()));
        }
        if let OptimizerKind::Sgd { momentum } = self.optimizer {
            if !(0.0..1.0).contains(&momentum) {
                return Err(invalid("momentum", format!("must be within [0, 1), got {}", momentum)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainConfig::default();
        assert_eq!(config.learning_rate, 0.1);
        assert_eq!(config.num_epochs, 5);
        assert_eq!(config.eval_interval, 2);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = TrainConfig::from_json_str(r#"{"num_epochs": 3, "optimizer": {"type": "sgd", "momentum": 0.5}}"#).unwrap();
        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.eval_interval, 2);
        assert_eq!(config.optimizer, OptimizerKind::Sgd { momentum: 0.5 });
    }

    #[test]
    fn test_rejects_invalid_values() {
        for bad in [
            TrainConfig { learning_rate: 0.0, ..TrainConfig::default() },
            TrainConfig { learning_rate: f32::NAN, ..TrainConfig::default() },
            TrainConfig { num_epochs: 0, ..TrainConfig::default() },
            TrainConfig { eval_interval: 0, ..TrainConfig::default() },
            TrainConfig { optimizer: OptimizerKind::Sgd { momentum: 1.5 }, ..TrainConfig::default() },
        ] {
            assert!(matches!(bad.validate(), Err(ConfigurationError::InvalidHyperparameter { .. })));
        }
        assert!(TrainConfig::from_json_str(r#"{"eval_interval": 0}"#).is_err());
    }
}
