//! # Neural Network Layers Module
//!
//! Building blocks for message-passing networks on topological domains.
//!
//! In the graph-based architecture, each "layer" is a constructor that adds
//! a specific pattern of nodes (operations and parameters) to the ASG.
//!
//! ## Available Layers
//!
//! ### Core
//! - [`Linear`]: fully connected read-out head
//! - [`Conv`]: `update(N · xW)` over one neighborhood
//! - [`Aggregation`]: combines signals produced for the same rank
//! - [`MessagePassing`]: the message / aggregate template `Conv` builds on
//!
//! ### Topological layers
//! - [`HsnLayer`]: High Skip Network, nodes in, nodes out
//! - [`ConvCxnLayer`]: nodes + edges in, nodes + edges + faces out
//! - [`TemplateLayer`]: edges to nodes to edges
//!
//! ## Example
//!
//! ```ignore
//! use topoasg::nn::{HsnLayer, TopologicalLayer};
//! use topoasg::tensor::new_context;
//!
//! let ctx = new_context();
//! let layer = HsnLayer::new(&ctx, "hsn_0", 2);
//! let out = layer.forward(&signals, &neighborhoods)?;
//! ```

pub mod activations;
pub mod aggregation;
pub mod conv;
pub mod cxn;
pub mod hsn;
pub mod init;
pub mod layer;
pub mod linear;
pub mod message_passing;
pub mod module;
pub mod template;

pub use activations::UpdateFunction;
pub use aggregation::{Aggregation, AggregationFunction};
pub use conv::{Conv, ConvConfig};
pub use cxn::ConvCxnLayer;
pub use hsn::HsnLayer;
pub use init::{Initialization, ParameterStore};
pub use layer::{NeighborhoodTensors, Signals, TopologicalLayer};
pub use linear::Linear;
pub use message_passing::{MessagePassing, NeighborhoodAggregation, Propagation};
pub use module::Module;
pub use template::TemplateLayer;
