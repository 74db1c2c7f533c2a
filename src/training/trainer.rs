//! The training loop.
//!
//! ```text
//!            train_epoch                     evaluate
//!   Idle ──────────────► TrainingEpoch ──► Idle ──────► Evaluating ──► Idle
//!    ▲                                                                  │
//!    └──────────────────────── next epoch ──────────────────────────────┘
//!                                                 last epoch ──► Done
//! ```
//!
//! Each training sample runs forward, loss, backward and one optimizer step.
//! Evaluation only runs the inference graph and never touches parameters.

use crate::asg::Value;
use crate::data::{Dataset, RandomSampler, Sample, Sampler, SequentialSampler, TopoDataset};
use crate::error::{ConfigurationError, Result};
use crate::metrics::{Accuracy, Metric, RunningMean};
use crate::models::StackedClassifier;
use crate::nn::init::{init_parameters, ParameterStore};
use crate::optimizers::Optimizer;
use crate::runtime::backend::{Backend, RuntimeError};
use crate::runtime::cpu_backend::CpuBackend;
use crate::topology::{Neighborhoods, Rank};
use crate::training::compiled::{CompiledModel, Prediction};
use crate::training::config::{Task, TrainConfig};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    /// Inside the given (1-based) epoch.
    TrainingEpoch(usize),
    /// Evaluating after the given epoch.
    Evaluating(usize),
    Done,
}

/// Summary of one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub mean_loss: f64,
    pub train_accuracy: f64,
    /// Only set on evaluation epochs.
    pub test_accuracy: Option<f64>,
    pub optimizer_steps: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochReport>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }

    /// `(epoch, test_accuracy)` of every evaluation.
    pub fn evaluations(&self) -> Vec<(usize, f64)> {
        self.epochs.iter().filter_map(|r| r.test_accuracy.map(|a| (r.epoch, a))).collect()
    }
}

pub struct Trainer {
    classifier: StackedClassifier,
    compiled: CompiledModel,
    neighborhoods: Neighborhoods,
    config: TrainConfig,
    parameters: ParameterStore,
    gradients: HashMap<String, Value>,
    optimizer: Box<dyn Optimizer>,
    backend: CpuBackend,
    state: TrainerState,
    epoch: usize,
}

impl Trainer {
    /// Compiles the classifier for `sample_shapes` and initializes its
    /// parameters from `config.seed`.
    pub fn new(
        classifier: StackedClassifier,
        task: Task,
        neighborhoods: Neighborhoods,
        sample_shapes: &BTreeMap<Rank, Vec<usize>>,
        config: TrainConfig,
    ) -> Result<Self> {
        config.validate()?;
        let compiled = CompiledModel::compile(&classifier, task, &neighborhoods, sample_shapes)?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let parameters = init_parameters(&compiled.parameters, &mut rng)?;
        let optimizer = config.optimizer.build(config.learning_rate);

        debug!(?task, optimizer = ?config.optimizer, lr = config.learning_rate, "trainer ready");
        Ok(Self {
            classifier,
            compiled,
            neighborhoods,
            config,
            parameters,
            gradients: HashMap::new(),
            optimizer,
            backend: CpuBackend::new(),
            state: TrainerState::Idle,
            epoch: 0,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    fn transition(&mut self, next: TrainerState) {
        debug!(from = ?self.state, to = ?next, "trainer state");
        self.state = next;
    }

    /// Current parameter values by name.
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn classifier(&self) -> &StackedClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Number of epochs trained so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Model outputs for the signals of one sample.
    pub fn predict(&self, signals: &BTreeMap<Rank, ArrayD<f32>>) -> Result<Prediction> {
        let mut memo = self.compiled.base_memo(&self.parameters, &self.neighborhoods)?;
        self.compiled.feed_signals(&mut memo, signals)?;
        let (outputs, _) = self.backend.run(&self.compiled.inference, memo)?;
        self.compiled.prediction(self.backend.retrieve_data(&outputs)?)
    }

    /// Forward, backward and one optimizer step on a single sample.
    ///
    /// Returns the loss and the outputs computed before the step.
    fn train_step(&mut self, sample: &Sample) -> Result<(f32, Prediction, Vec<ArrayD<f32>>)> {
        self.gradients.clear();

        let targets = self.compiled.target_arrays(&sample.target)?;
        let mut memo = self.compiled.base_memo(&self.parameters, &self.neighborhoods)?;
        self.compiled.feed_signals(&mut memo, &sample.signals)?;
        self.compiled.feed_targets(&mut memo, &targets);

        let (mut outputs, memo) = self.backend.run(&self.compiled.training, memo)?;
        let (grads, _) = self.backend.run(&self.compiled.gradients, memo)?;

        let loss = match outputs.first() {
            Some(Value::Tensor(l)) => l.iter().next().copied().unwrap_or(f32::NAN),
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "scalar loss".to_string(),
                    actual: other.map_or("nothing", Value::kind).to_string(),
                }
                .into())
            }
        };
        let prediction = self.compiled.prediction(outputs.split_off(1))?;

        for (spec, grad) in self.compiled.parameters.iter().zip(grads) {
            self.gradients.insert(spec.name.clone(), grad);
        }
        self.optimizer.step(&mut self.parameters, &self.gradients)?;

        Ok((loss, prediction, targets))
    }

    /// Runs one epoch over `train` and returns its report.
    pub fn train_epoch(&mut self, train: &TopoDataset) -> Result<EpochReport> {
        if train.is_empty() {
            return Err(ConfigurationError::EmptyDataset.into());
        }
        let epoch = self.epoch + 1;
        self.transition(TrainerState::TrainingEpoch(epoch));

        let sampler: Box<dyn Sampler> = if self.config.shuffle {
            Box::new(RandomSampler::with_seed(train.len(), self.config.seed.wrapping_add(epoch as u64)))
        } else {
            Box::new(SequentialSampler::new(train.len()))
        };

        let mut loss = RunningMean::new();
        let mut accuracy = Accuracy::for_logits();
        let mut steps = 0;
        for index in sampler {
            let sample = train.samples().get(index).ok_or(ConfigurationError::EmptyDataset)?;
            let (sample_loss, prediction, targets) = self.train_step(sample)?;
            steps += 1;
            loss.update(sample_loss as f64);
            for (output, target) in prediction.arrays().into_iter().zip(&targets) {
                accuracy.update(output, target);
            }
            trace!(epoch, index, loss = sample_loss, "sample");
        }

        self.epoch = epoch;
        self.transition(TrainerState::Idle);

        let report = EpochReport {
            epoch,
            mean_loss: loss.compute(),
            train_accuracy: accuracy.compute(),
            test_accuracy: None,
            optimizer_steps: steps,
        };
        info!(epoch, loss = report.mean_loss, accuracy = report.train_accuracy, "epoch finished");
        Ok(report)
    }

    /// Accuracy over `test`, computed with the inference graph only.
    pub fn evaluate(&mut self, test: &TopoDataset) -> Result<f64> {
        if test.is_empty() {
            return Err(ConfigurationError::EmptyDataset.into());
        }
        let previous = self.state;
        self.transition(TrainerState::Evaluating(self.epoch));

        let mut accuracy = Accuracy::for_logits();
        for sample in test.iter() {
            let targets = self.compiled.target_arrays(&sample.target)?;
            let prediction = self.predict(&sample.signals)?;
            for (output, target) in prediction.arrays().into_iter().zip(&targets) {
                accuracy.update(output, target);
            }
        }

        self.transition(if previous == TrainerState::Done { TrainerState::Done } else { TrainerState::Idle });
        let result = accuracy.compute();
        info!(epoch = self.epoch, accuracy = result, "evaluation finished");
        Ok(result)
    }

    /// Trains for `config.num_epochs` epochs, evaluating on `test` every
    /// `config.eval_interval` epochs when it is not empty.
    pub fn fit(&mut self, train: &TopoDataset, test: &TopoDataset) -> Result<TrainingHistory> {
        let mut history = TrainingHistory::default();
        for _ in 0..self.config.num_epochs {
            let mut report = self.train_epoch(train)?;
            if report.epoch % self.config.eval_interval == 0 && !test.is_empty() {
                report.test_accuracy = Some(self.evaluate(test)?);
            }
            history.epochs.push(report);
        }
        self.transition(TrainerState::Done);
        Ok(history)
    }
}
