//! End-to-end examples: build a domain, a classifier and a trainer, then fit.
//!
//! Each tutorial exposes `setup`, which returns a ready [`Tutorial`], and
//! `run`, which also trains it.

pub mod convcxn;
pub mod hsn;
pub mod template;

use crate::data::TopoDataset;
use crate::error::Result;
use crate::training::{Trainer, TrainingHistory};

/// A trainer with its train and held-out data.
pub struct Tutorial {
    pub trainer: Trainer,
    pub train: TopoDataset,
    pub test: TopoDataset,
}

impl Tutorial {
    pub fn fit(&mut self) -> Result<TrainingHistory> {
        self.trainer.fit(&self.train, &self.test)
    }
}
