//! # topoasg: message-passing networks on topological domains
//!
//! Models are built as an **Abstract Semantic Graph (ASG)**: layers add
//! symbolic nodes, shape inference checks the graph, autograd derives a
//! separate gradient graph and a backend executes both.
//!
//! Domains (simplicial and cell complexes) provide the sparse neighborhood
//! matrices messages travel along.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use topoasg::models::{ChannelSpec, LayerKind, ModelConfig, StackedClassifier};
//! use topoasg::tensor::new_context;
//! use topoasg::topology::{Neighborhoods, SimplicialComplex};
//!
//! # fn main() -> topoasg::error::Result<()> {
//! // 1. Domain and graph context
//! let domain = SimplicialComplex::new([[1usize, 2], [1, 3]])?;
//! let context = new_context();
//!
//! // 2. Two HSN layers with a one-class read-out on the nodes
//! let spec = ChannelSpec {
//!     inputs: BTreeMap::from([(0, 2)]),
//!     layer: LayerKind::Hsn { channels: 2 },
//!     readouts: BTreeMap::from([(0, 1)]),
//! };
//! let model = StackedClassifier::new(&context, &spec, 2, ModelConfig::default())?;
//!
//! // 3. The neighborhoods the layers read
//! let neighborhoods = Neighborhoods::from_domain(&domain, &model.neighborhood_requests())?;
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod asg;
pub mod autograd;
pub mod data;
pub mod error;
pub mod losses;
pub mod metrics;
pub mod models;
pub mod nn;
pub mod optimizers;
pub mod runtime;
pub mod sparse;
pub mod tensor;
pub mod topology;
pub mod training;
pub mod tutorials;

pub use error::{ConfigurationError, Result, TopoError};
