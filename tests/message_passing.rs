//! Message passing over the 3×3 upper-triangular neighborhood.

use ndarray::{array, Array2, ArrayD};
use std::collections::HashMap;
use topoasg::asg::Value;
use topoasg::nn::{Initialization, MessagePassing, NeighborhoodAggregation, Propagation};
use topoasg::runtime::backend::{Backend, Memo};
use topoasg::runtime::cpu_backend::CpuBackend;
use topoasg::sparse::SparseMatrix;
use topoasg::tensor::{new_context, Tensor};
use topoasg::ConfigurationError;

fn neighborhood() -> SparseMatrix {
    let rows = [0, 0, 0, 1, 1, 2];
    let cols = [0, 1, 2, 1, 2, 2];
    let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    SparseMatrix::from_triplets(3, 3, (0..6).map(|k| (rows[k], cols[k], values[k]))).unwrap()
}

fn signal() -> Array2<f32> {
    array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]
}

fn propagate(aggregation: NeighborhoodAggregation) -> ArrayD<f32> {
    let ctx = new_context();
    let x = Tensor::new_input(&ctx, "x");
    let n = Tensor::new_input(&ctx, "n");
    let y = Propagation { aggregation }.propagate(&x, &n);

    let mut graph = ctx.borrow().main_graph().clone();
    graph.set_output(y.node_id);
    let memo: Memo<Value> = HashMap::from([
        ((graph.id, x.node_id), Value::Tensor(signal().into_dyn())),
        ((graph.id, n.node_id), Value::Sparse(neighborhood())),
    ]);
    let (out, _) = CpuBackend::new().run(&graph, memo).unwrap();
    out[0].as_tensor().unwrap().clone()
}

#[test]
fn test_propagate() {
    let result = propagate(NeighborhoodAggregation::Sum);
    assert_eq!(result.shape(), &[3, 2]);
    assert_eq!(result, array![[22.0f32, 28.0], [37.0, 46.0], [30.0, 36.0]].into_dyn());
}

#[test]
fn test_propagate_mean() {
    let result = propagate(NeighborhoodAggregation::Mean);
    // rows of the neighborhood sum to 6, 9 and 6
    let expected = array![[22.0f32 / 6.0, 28.0 / 6.0], [37.0 / 9.0, 46.0 / 9.0], [5.0, 6.0]].into_dyn();
    for (a, b) in result.iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_sparsify_message() {
    let x = signal();
    let gathered = neighborhood().gather_sources(&x.view()).unwrap();
    assert_eq!(gathered, array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [3.0, 4.0], [5.0, 6.0], [5.0, 6.0]]);
}

#[test]
fn test_gather_targets() {
    let x = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
    let gathered = neighborhood().gather_targets(&x.view()).unwrap();
    assert_eq!(
        gathered,
        array![[1.0, 2.0, 3.0], [1.0, 2.0, 3.0], [1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]
    );
    assert!(neighborhood().gather_targets(&array![[1.0f32, 2.0]].view()).is_err());
}

#[test]
fn test_aggregate() {
    let n = neighborhood();
    let mut messages = n.gather_sources(&signal().view()).unwrap();
    for (k, mut row) in messages.outer_iter_mut().enumerate() {
        row *= n.values()[k];
    }
    let result = n.scatter_targets(&messages.view()).unwrap();
    assert_eq!(result, array![[22.0, 28.0], [37.0, 46.0], [30.0, 36.0]]);
}

#[test]
fn test_initialization_names() {
    assert!(matches!("xavier_uniform".parse::<Initialization>(), Ok(Initialization::XavierUniform { .. })));
    assert!(matches!("xavier_normal".parse::<Initialization>(), Ok(Initialization::XavierNormal { .. })));
    assert_eq!(
        "invalid".parse::<Initialization>(),
        Err(ConfigurationError::UnknownInitialization("invalid".to_string()))
    );
}
