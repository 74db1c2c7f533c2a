//! # Graph Analysis Module
//!
//! Analysis passes that process the ASG before execution.
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): propagates tensor shapes
//!   through the graph, detecting shape mismatches before runtime.
//!
//! ```text
//! ASG (untyped) -> Shape Inference -> ASG (with shapes/dtypes)
//! ```
//!
//! Models are compiled once, so a wrongly sized neighborhood or read-out is
//! reported here rather than halfway through the first epoch.

pub mod shape_inference;
