//! Loss functions in graph paradigm.
//!
//! Loss functions here are regular Rust functions that take symbolic
//! `Tensor` descriptors and add the nodes computing the error value. Each
//! returns a scalar node.
//!
//! - **Binary cross-entropy on logits**: `bce_with_logits`
//! - **Categorical cross-entropy on logits**: `cross_entropy_with_logits`
//! - **MSE**: `mse_loss`

use crate::tensor::Tensor;

/// Binary cross-entropy on raw logits, averaged over elements.
///
/// ```text
/// BCE = mean(softplus(z) - z * y)
/// ```
///
/// Equals `-[y log σ(z) + (1 - y) log(1 - σ(z))]` without evaluating `log`
/// of a saturated sigmoid.
pub fn bce_with_logits(logits: &Tensor, y_true: &Tensor) -> Tensor {
    let softplus = logits.softplus(1.0);
    let zy = logits * y_true;
    (&softplus - &zy).mean()
}

/// Categorical cross-entropy on raw logits (classes on the last axis).
///
/// ```text
/// CE = -sum(y * log_softmax(z))
/// ```
///
/// `y_true` is one-hot (or a distribution) with the shape of `logits`.
/// For a batch of rows the losses are summed.
pub fn cross_entropy_with_logits(logits: &Tensor, y_true: &Tensor) -> Tensor {
    let log_probs = logits.log_softmax();
    (y_true * &log_probs).sum().neg()
}

/// Mean squared error.
pub fn mse_loss(y_pred: &Tensor, y_true: &Tensor) -> Tensor {
    let error = y_pred - y_true;
    (&error * &error).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::Value;
    use crate::runtime::backend::{Backend, Memo};
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::tensor::new_context;
    use ndarray::{array, ArrayD};

    fn eval(loss_fn: fn(&Tensor, &Tensor) -> Tensor, z: ArrayD<f32>, y: ArrayD<f32>) -> f32 {
        let ctx = new_context();
        let zt = Tensor::new_input(&ctx, "z");
        let yt = Tensor::new_input(&ctx, "y");
        let loss = loss_fn(&zt, &yt);
        let mut asg = ctx.borrow().main_graph().clone();
        asg.set_output(loss.node_id);
        let memo: Memo<Value> = [((0, zt.node_id), Value::Tensor(z)), ((0, yt.node_id), Value::Tensor(y))]
            .into_iter()
            .collect();
        let (out, _) = CpuBackend::new().run(&asg, memo).unwrap();
        *out[0].as_tensor().unwrap().first().unwrap()
    }

    #[test]
    fn test_bce_with_logits_at_zero() {
        let loss = eval(bce_with_logits, array![[0.0f32], [0.0]].into_dyn(), array![[1.0f32], [0.0]].into_dyn());
        assert!((loss - 2.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_bce_with_logits_matches_definition() {
        let z = 1.5f32;
        let expected = -(1.0 / (1.0 + (-z).exp())).ln();
        let loss = eval(bce_with_logits, array![z].into_dyn(), array![1.0f32].into_dyn());
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let loss = eval(
            cross_entropy_with_logits,
            array![0.0f32, 0.0, 0.0].into_dyn(),
            array![0.0f32, 1.0, 0.0].into_dyn(),
        );
        assert!((loss - 3.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_mse() {
        let loss = eval(mse_loss, array![1.0f32, 3.0].into_dyn(), array![0.0f32, 0.0].into_dyn());
        assert!((loss - 5.0).abs() < 1e-6);
    }
}
