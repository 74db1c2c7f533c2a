//! Optimizers that update parameter values.
//!
//! Optimizers work on real numeric data (`Value`) on the CPU. They receive
//! current parameter values and computed gradients and apply their update
//! rule in place. Updates happen only through [`Optimizer::step`].

use crate::asg::Value;
use crate::nn::init::ParameterStore;
use crate::runtime::backend::RuntimeError;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Common interface of all optimizers.
pub trait Optimizer {
    /// Performs one optimization step.
    ///
    /// * `parameters` - current parameter values, keyed by parameter name.
    /// * `gradients` - gradients of the loss for those parameters.
    ///
    /// Fails when a gradient names an unknown parameter or does not match
    /// the parameter's shape.
    fn step(&mut self, parameters: &mut ParameterStore, gradients: &HashMap<String, Value>) -> Result<(), RuntimeError>;

    fn learning_rate(&self) -> f32;
}

/// Serializable optimizer choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OptimizerKind {
    Sgd {
        #[serde(default)]
        momentum: f32,
    },
    Adam,
}

impl Default for OptimizerKind {
    fn default() -> Self {
        OptimizerKind::Adam
    }
}

impl OptimizerKind {
    pub fn build(&self, learning_rate: f32) -> Box<dyn Optimizer> {
        match *self {
            OptimizerKind::Sgd { momentum } => Box::new(Sgd::new(learning_rate).with_momentum(momentum)),
            OptimizerKind::Adam => Box::new(Adam::new(learning_rate)),
        }
    }
}

/// The dense parameter and gradient an update applies to.
fn update_pair<'a>(
    parameters: &'a mut ParameterStore,
    name: &str,
    grad: &'a Value,
) -> Result<(&'a mut ArrayD<f32>, &'a ArrayD<f32>), RuntimeError> {
    let param = match parameters.get_mut(name) {
        Some(Value::Tensor(p)) => p,
        Some(other) => {
            return Err(RuntimeError::TypeError { expected: "tensor parameter".to_string(), actual: other.kind().to_string() })
        }
        None => return Err(RuntimeError::UnknownParameter(name.to_string())),
    };
    let grad = match grad {
        Value::Tensor(g) => g,
        other => {
            return Err(RuntimeError::TypeError { expected: "tensor gradient".to_string(), actual: other.kind().to_string() })
        }
    };
    if param.shape() != grad.shape() {
        return Err(RuntimeError::ShapeError(format!(
            "gradient of '{}' has shape {:?}, parameter has {:?}",
            name,
            grad.shape(),
            param.shape()
        )));
    }
    Ok((param, grad))
}

/// Stochastic gradient descent with optional momentum.
///
/// ```text
/// v = momentum * v + g
/// p = p - lr * v
/// ```
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocity: HashMap<String, ArrayD<f32>>,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self { lr, momentum: 0.0, velocity: HashMap::new() }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, parameters: &mut ParameterStore, gradients: &HashMap<String, Value>) -> Result<(), RuntimeError> {
        for (param_name, grad_value) in gradients {
            let (param_value, grad_tensor) = update_pair(parameters, param_name, grad_value)?;
            if self.momentum == 0.0 {
                ndarray::azip!((p in param_value, &g in grad_tensor) *p -= self.lr * g);
                continue;
            }
            let velocity = self
                .velocity
                .entry(param_name.clone())
                .or_insert_with(|| ArrayD::zeros(grad_tensor.raw_dim()));
            let (lr, momentum) = (self.lr, self.momentum);
            ndarray::azip!((p in param_value, v in velocity, &g in grad_tensor) {
                *v = momentum * *v + g;
                *p -= lr * *v;
            });
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adam with bias correction.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self { lr, beta1: 0.9, beta2: 0.999, eps: 1e-8, t: 0, m: HashMap::new(), v: HashMap::new() }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, parameters: &mut ParameterStore, gradients: &HashMap<String, Value>) -> Result<(), RuntimeError> {
        self.t += 1;
        let (lr, beta1, beta2, eps) = (self.lr, self.beta1, self.beta2, self.eps);
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);

        for (param_name, grad_value) in gradients {
            let (param_value, grad_tensor) = update_pair(parameters, param_name, grad_value)?;
            let m = self
                .m
                .entry(param_name.clone())
                .or_insert_with(|| ArrayD::zeros(grad_tensor.raw_dim()));
            let v = self
                .v
                .entry(param_name.clone())
                .or_insert_with(|| ArrayD::zeros(grad_tensor.raw_dim()));
            ndarray::azip!((p in param_value, m in m, v in v, &g in grad_tensor) {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn store(value: ArrayD<f32>) -> ParameterStore {
        HashMap::from([("w".to_string(), Value::Tensor(value))])
    }

    #[test]
    fn test_sgd_step() {
        let mut params = store(array![1.0f32, 2.0].into_dyn());
        let grads = HashMap::from([("w".to_string(), Value::Tensor(array![0.5f32, -1.0].into_dyn()))]);
        Sgd::new(0.1).step(&mut params, &grads).unwrap();
        let w = params["w"].as_tensor().unwrap();
        assert!((w[0] - 0.95).abs() < 1e-6);
        assert!((w[1] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut params = store(array![0.0f32].into_dyn());
        let grads = HashMap::from([("w".to_string(), Value::Tensor(array![1.0f32].into_dyn()))]);
        let mut sgd = Sgd::new(1.0).with_momentum(0.5);
        sgd.step(&mut params, &grads).unwrap();
        sgd.step(&mut params, &grads).unwrap();
        // -1 then -1.5
        assert!((params["w"].as_tensor().unwrap()[0] + 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_is_lr_sized() {
        let mut params = store(array![0.0f32, 0.0].into_dyn());
        let grads = HashMap::from([("w".to_string(), Value::Tensor(array![3.0f32, -0.01].into_dyn()))]);
        Adam::new(0.1).step(&mut params, &grads).unwrap();
        let w = params["w"].as_tensor().unwrap();
        assert!((w[0] + 0.1).abs() < 1e-4);
        assert!((w[1] - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_mismatched_gradients_rejected() {
        let mut params = store(array![1.0f32, 2.0].into_dyn());
        let unknown = HashMap::from([("b".to_string(), Value::Tensor(array![1.0f32].into_dyn()))]);
        assert_eq!(
            Sgd::new(0.1).step(&mut params, &unknown),
            Err(RuntimeError::UnknownParameter("b".to_string()))
        );
        let wrong_shape = HashMap::from([("w".to_string(), Value::Tensor(array![1.0f32].into_dyn()))]);
        assert!(matches!(Adam::new(0.1).step(&mut params, &wrong_shape), Err(RuntimeError::ShapeError(_))));
        assert_eq!(params["w"].as_tensor().unwrap(), &array![1.0f32, 2.0].into_dyn());
    }

    #[test]
    fn test_kind_deserializes() {
        let kind: OptimizerKind = serde_json::from_str(r#"{"type":"sgd","momentum":0.9}"#).unwrap();
        assert_eq!(kind, OptimizerKind::Sgd { momentum: 0.9 });
        let adam: OptimizerKind = serde_json::from_str(r#"{"type":"adam"}"#).unwrap();
        assert_eq!(adam, OptimizerKind::Adam);
    }
}
