//! Abstract interface for execution backends.

use crate::asg::{Asg, AsgId, NodeId, Value};
use crate::sparse::SparseError;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while executing a graph. Shared by all backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Node with ID {0} not found in graph {1}. Check that the graph was built correctly.")]
    NodeNotFound(NodeId, AsgId),

    #[error("Graph with ID {0} is not registered in the execution context.")]
    GraphNotFound(AsgId),

    #[error("Type mismatch: operation expected {expected}, got {actual}.")]
    TypeError { expected: String, actual: String },

    #[error("Tensor shape error: {0}")]
    ShapeError(String),

    #[error("Missing value for input '{0}' (node ID: {1}). Add it to the memo passed to backend.run().")]
    MissingInput(String, NodeId),

    #[error("Missing value for parameter '{0}' (node ID: {1}). Initialize parameters before running the graph.")]
    MissingParameter(String, NodeId),

    #[error("Gradient given for parameter '{0}', which has no value to update.")]
    UnknownParameter(String),

    #[error("Value of node {1} of graph {0} referenced by an External node was not computed by the forward run.")]
    MissingExternal(AsgId, NodeId),

    #[error("Sparse operation failed: {0}")]
    Sparse(#[from] SparseError),
}

/// Cache of computed node values, keyed by (AsgId, NodeId).
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// Common interface of an execution backend.
///
/// A backend takes an ASG plus a memo pre-filled with inputs and parameters,
/// and computes the graph outputs.
pub trait Backend {
    /// Device-side representation of a value.
    type DeviceData: std::fmt::Debug;

    /// Executes the graph, reading and extending the memo.
    ///
    /// Only nodes the outputs depend on are evaluated. The returned memo holds
    /// every intermediate value, so a gradient graph built against this graph
    /// can be run with it.
    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Copies device values back to the host.
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}
