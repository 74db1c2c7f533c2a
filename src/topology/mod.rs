//! # Topological domains
//!
//! Minimal domain builders and the adapter that turns their relations into
//! sparse neighborhood matrices.
//!
//! - [`SimplicialComplex`]: closure of a list of simplices.
//! - [`CellComplex`]: nodes, edges and polygonal faces.
//! - [`Neighborhoods`]: the resolved `(target, source)` matrices a model runs on.

pub mod cell;
pub mod domain;
pub mod neighborhood;
pub mod simplicial;

pub use cell::CellComplex;
pub use domain::{Cell, Domain, DomainQueryError, Rank};
pub use neighborhood::{NeighborhoodRequest, Neighborhoods, RelationKind};
pub use simplicial::SimplicialComplex;
