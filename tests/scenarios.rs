//! End-to-end training runs on the tutorial domains.

use ndarray::{array, ArrayD, Dimension};
use std::collections::{BTreeMap, HashMap};
use topoasg::asg::Value;
use topoasg::data::Dataset;
use topoasg::models::{ChannelSpec, LayerKind, ModelConfig, ModelOutput, ReadoutAggregation, StackedClassifier};
use topoasg::nn::{NeighborhoodTensors, Signals};
use topoasg::optimizers::OptimizerKind;
use topoasg::runtime::backend::{Backend, Memo};
use topoasg::runtime::cpu_backend::CpuBackend;
use topoasg::tensor::{new_context, Tensor};
use topoasg::topology::{Domain, NeighborhoodRequest, SimplicialComplex};
use topoasg::training::{Prediction, TrainConfig, TrainerState};
use topoasg::tutorials;

fn config(num_epochs: usize) -> TrainConfig {
    TrainConfig { num_epochs, ..TrainConfig::default() }
}

#[test]
fn scenario_hsn_domain() {
    let domain = SimplicialComplex::new([[1usize, 2], [1, 3]]).unwrap();
    assert_eq!(domain.num_cells(0).unwrap(), 3);
    assert_eq!(domain.num_cells(1).unwrap(), 2);
    assert_eq!(domain.incidence(1).unwrap().shape(), [3, 2]);
    assert_eq!(domain.adjacency(0).unwrap().shape(), [3, 3]);
}

#[test]
fn scenario_hsn_trains_five_epochs() {
    let mut tutorial = tutorials::hsn::setup(config(5)).unwrap();
    for epoch in 1..=5 {
        let report = tutorial.trainer.train_epoch(&tutorial.train).unwrap();
        assert_eq!(report.epoch, epoch);
        assert!(report.mean_loss.is_finite());

        let sample = tutorial.train.get(0).unwrap();
        match tutorial.trainer.predict(&sample.signals).unwrap() {
            Prediction::PerRank(logits) => assert_eq!(logits[&0].shape(), &[3, 1]),
            other => panic!("unexpected prediction {:?}", other),
        }
    }
}

#[test]
fn scenario_convcxn_domain() {
    let domain = tutorials::convcxn::hexagon().unwrap();
    assert_eq!(domain.num_cells(0).unwrap(), 6);
    assert_eq!(domain.num_cells(1).unwrap(), 6);
    assert_eq!(domain.num_cells(2).unwrap(), 1);
    assert_eq!(NeighborhoodRequest::incidence(1, 2).resolve(&domain).unwrap().shape(), [1, 6]);
    assert_eq!(domain.adjacency(0).unwrap().shape(), [6, 6]);
}

#[test]
fn scenario_convcxn_three_epochs() {
    let mut cfg = config(3);
    cfg.eval_interval = 2;
    let mut tutorial = tutorials::convcxn::setup(cfg).unwrap();
    assert_eq!(tutorial.train.len() + tutorial.test.len(), tutorials::convcxn::NUM_SAMPLES);

    let history = tutorial.fit().unwrap();
    assert_eq!(history.epochs.len(), 3);
    let evaluations: Vec<usize> = history.evaluations().iter().map(|&(epoch, _)| epoch).collect();
    assert_eq!(evaluations, vec![2]);
    for report in &history.epochs {
        assert_eq!(report.optimizer_steps, tutorial.train.len());
        assert!((0.0..=1.0).contains(&report.train_accuracy));
    }
    assert_eq!(tutorial.trainer.state(), TrainerState::Done);
}

#[test]
fn template_tutorial_runs() {
    let mut cfg = config(2);
    cfg.optimizer = OptimizerKind::Sgd { momentum: 0.9 };
    let history = tutorials::template::run(cfg).unwrap();
    assert_eq!(history.epochs.len(), 2);
    assert!(history.epochs.iter().all(|r| r.mean_loss.is_finite()));
}

#[test]
fn evaluation_leaves_parameters_untouched() {
    let mut tutorial = tutorials::convcxn::setup(config(1)).unwrap();
    tutorial.trainer.train_epoch(&tutorial.train).unwrap();
    let before = tutorial.trainer.parameters().clone();
    tutorial.trainer.evaluate(&tutorial.test).unwrap();
    assert_eq!(&before, tutorial.trainer.parameters());
    assert_eq!(tutorial.trainer.state(), TrainerState::Idle);
}

#[test]
fn training_changes_parameters() {
    let mut tutorial = tutorials::hsn::setup(config(1)).unwrap();
    let before = tutorial.trainer.parameters().clone();
    let report = tutorial.trainer.train_epoch(&tutorial.train).unwrap();
    assert_eq!(report.optimizer_steps, 1);
    assert_ne!(&before, tutorial.trainer.parameters());
}

#[test]
fn same_seed_same_history() {
    let a = tutorials::hsn::run(config(3)).unwrap();
    let b = tutorials::hsn::run(config(3)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn forward_is_deterministic() {
    let tutorial = tutorials::convcxn::setup(config(1)).unwrap();
    let sample = tutorial.test.get(0).unwrap();
    let first = tutorial.trainer.predict(&sample.signals).unwrap();
    let second = tutorial.trainer.predict(&sample.signals).unwrap();
    assert_eq!(first, second);
}

#[test]
fn shuffled_training_visits_every_sample() {
    let mut cfg = config(2);
    cfg.shuffle = true;
    cfg.seed = 3;
    let mut tutorial = tutorials::convcxn::setup(cfg).unwrap();
    let history = tutorial.fit().unwrap();
    assert!(history.epochs.iter().all(|r| r.optimizer_steps == tutorial.train.len()));
}

/// Per-rank logits of shapes (3,2), (3,2), (1,2) pool to the sum of their
/// column means, or to their weighted sum.
#[test]
fn pooled_readout_aggregation() {
    let ctx = new_context();
    let spec = ChannelSpec {
        inputs: BTreeMap::from([(0, 2), (1, 2)]),
        layer: LayerKind::ConvCxn { c0: 2, c1: 2, c2: 2 },
        readouts: BTreeMap::from([(0, 2), (1, 2), (2, 2)]),
    };
    let per_rank = StackedClassifier::new(&ctx, &spec, 1, ModelConfig::default()).unwrap();
    // A pooled copy of the same model; both get the same parameter values.
    let pooled = StackedClassifier::new(
        &ctx,
        &spec,
        1,
        ModelConfig::default().with_aggregation(ReadoutAggregation::SumOfMeans),
    )
    .unwrap();
    let weights = BTreeMap::from([(0, 0.5f32), (1, 2.0), (2, -1.0)]);
    let weighted = StackedClassifier::new(
        &ctx,
        &spec,
        1,
        ModelConfig::default().with_aggregation(ReadoutAggregation::WeightedSumOfMeans(weights.clone())),
    )
    .unwrap();

    let domain = SimplicialComplex::new([[0usize, 1, 2]]).unwrap();
    let x0 = Tensor::new_input(&ctx, "x0");
    let x1 = Tensor::new_input(&ctx, "x1");
    let a0 = Tensor::new_input(&ctx, "a0");
    let b12 = Tensor::new_input(&ctx, "b12");
    let signals = Signals::from([(0, x0.clone()), (1, x1.clone())]);
    let hoods = NeighborhoodTensors::from([
        (NeighborhoodRequest::adjacency(0), a0.clone()),
        (NeighborhoodRequest::incidence(1, 2), b12.clone()),
    ]);

    let ModelOutput::PerRank(logits) = per_rank.forward(&signals, &hoods).unwrap() else {
        panic!("expected per-rank output");
    };
    let ModelOutput::Pooled(pooled_out) = pooled.forward(&signals, &hoods).unwrap() else {
        panic!("expected pooled output");
    };
    let ModelOutput::Pooled(weighted_out) = weighted.forward(&signals, &hoods).unwrap() else {
        panic!("expected pooled output");
    };

    let mut outputs: Vec<usize> = logits.values().map(|t| t.node_id).collect();
    outputs.push(pooled_out.node_id);
    outputs.push(weighted_out.node_id);
    let mut graph = ctx.borrow().main_graph().clone();
    graph.set_outputs(outputs);

    // parameter names repeat across the two models
    let values: HashMap<String, ArrayD<f32>> = ctx
        .borrow()
        .parameters()
        .iter()
        .map(|p| {
            let value = ArrayD::from_shape_fn(p.shape.clone(), |idx| 0.1 * (idx.slice().iter().sum::<usize>() as f32 + 1.0));
            (p.name.clone(), value)
        })
        .collect();
    let mut memo: Memo<Value> = HashMap::new();
    for p in ctx.borrow().parameters() {
        memo.insert((graph.id, p.node_id), Value::Tensor(values[&p.name].clone()));
    }
    memo.insert((graph.id, x0.node_id), Value::Tensor(array![[1.0f32, 0.5], [-0.5, 1.0], [0.2, 0.3]].into_dyn()));
    memo.insert((graph.id, x1.node_id), Value::Tensor(array![[0.4f32, -1.0], [1.0, 1.0], [0.3, 0.6]].into_dyn()));
    memo.insert((graph.id, a0.node_id), Value::Sparse(domain.adjacency(0).unwrap()));
    memo.insert(
        (graph.id, b12.node_id),
        Value::Sparse(NeighborhoodRequest::incidence(1, 2).resolve(&domain).unwrap()),
    );

    let (out, _) = CpuBackend::new().run(&graph, memo).unwrap();
    let shapes: Vec<Vec<usize>> = out.iter().map(|v| v.shape()).collect();
    assert_eq!(shapes, vec![vec![3, 2], vec![3, 2], vec![1, 2], vec![2], vec![2]]);

    let mut expected = ndarray::Array1::<f32>::zeros(2);
    let mut expected_weighted = ndarray::Array1::<f32>::zeros(2);
    for (rank, v) in logits.keys().zip(&out[..3]) {
        let a = v.as_tensor().unwrap().clone().into_dimensionality::<ndarray::Ix2>().unwrap();
        let mean = a.mean_axis(ndarray::Axis(0)).unwrap();
        expected_weighted = expected_weighted + &mean * weights[rank];
        expected = expected + mean;
    }
    for (g, e) in out[3].as_tensor().unwrap().iter().zip(expected.iter()) {
        assert!((g - e).abs() < 1e-5, "pooled {} != sum of means {}", g, e);
    }
    for (g, e) in out[4].as_tensor().unwrap().iter().zip(expected_weighted.iter()) {
        assert!((g - e).abs() < 1e-5, "weighted {} != weighted sum of means {}", g, e);
    }
}
