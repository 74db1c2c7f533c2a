use super::domain::{incidence_from_boundaries, Cell, Domain, DomainQueryError, Rank};
use crate::sparse::SparseMatrix;
use std::collections::{BTreeSet, HashMap};

/// 2-dimensional cell complex: nodes, edges and polygonal faces.
///
/// Cells are enumerated in insertion order. Adding a face adds its boundary
/// edges and nodes if they are missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellComplex {
    nodes: Vec<Cell>,
    edges: Vec<Cell>,
    faces: Vec<Cell>,
    node_index: HashMap<usize, usize>,
    edge_index: HashMap<(usize, usize), usize>,
    face_keys: BTreeSet<Vec<usize>>,
}

impl CellComplex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cell of the given rank: one vertex, an edge `[u, v]`, or a face
    /// given as its vertex cycle.
    pub fn add_cell(&mut self, vertices: &[usize], rank: Rank) -> Result<(), DomainQueryError> {
        match (rank, vertices) {
            (0, [v]) => {
                self.add_node(*v);
                Ok(())
            }
            (1, [u, v]) => self.add_edge(*u, *v).map(|_| ()),
            (2, cycle) => self.add_face(cycle),
            _ => Err(DomainQueryError::InvalidCell {
                cell: vertices.to_vec(),
                reason: format!("cannot be a cell of rank {}", rank),
            }),
        }
    }

    pub fn add_node(&mut self, v: usize) -> usize {
        if let Some(&idx) = self.node_index.get(&v) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(vec![v]);
        self.node_index.insert(v, idx);
        idx
    }

    pub fn add_edge(&mut self, u: usize, v: usize) -> Result<usize, DomainQueryError> {
        if u == v {
            return Err(DomainQueryError::InvalidCell {
                cell: vec![u, v],
                reason: "self loops are not cells".to_string(),
            });
        }
        let key = (u.min(v), u.max(v));
        if let Some(&idx) = self.edge_index.get(&key) {
            return Ok(idx);
        }
        self.add_node(key.0);
        self.add_node(key.1);
        let idx = self.edges.len();
        self.edges.push(vec![key.0, key.1]);
        self.edge_index.insert(key, idx);
        Ok(idx)
    }

    fn add_face(&mut self, cycle: &[usize]) -> Result<(), DomainQueryError> {
        let distinct: BTreeSet<usize> = cycle.iter().copied().collect();
        if cycle.len() < 3 || distinct.len() != cycle.len() {
            return Err(DomainQueryError::InvalidCell {
                cell: cycle.to_vec(),
                reason: "a face needs at least 3 distinct vertices".to_string(),
            });
        }
        let mut boundary = Vec::with_capacity(cycle.len());
        for (i, &u) in cycle.iter().enumerate() {
            let v = cycle[(i + 1) % cycle.len()];
            boundary.push(self.add_edge(u, v)?);
        }
        boundary.sort_unstable();
        if self.face_keys.insert(boundary) {
            self.faces.push(cycle.to_vec());
        }
        Ok(())
    }

    fn edge_of(&self, u: usize, v: usize) -> Option<usize> {
        self.edge_index.get(&(u.min(v), u.max(v))).copied()
    }
}

impl Domain for CellComplex {
    fn dim(&self) -> Rank {
        if !self.faces.is_empty() {
            2
        } else if !self.edges.is_empty() {
            1
        } else {
            0
        }
    }

    fn cells(&self, rank: Rank) -> Result<&[Cell], DomainQueryError> {
        self.check_rank(rank)?;
        Ok(match rank {
            0 => &self.nodes,
            1 => &self.edges,
            _ => &self.faces,
        })
    }

    fn incidence(&self, rank: Rank) -> Result<SparseMatrix, DomainQueryError> {
        self.check_rank(rank)?;
        let boundaries: Vec<Vec<usize>> = match rank {
            1 => self
                .edges
                .iter()
                .map(|e| e.iter().filter_map(|v| self.node_index.get(v).copied()).collect())
                .collect(),
            2 => self
                .faces
                .iter()
                .map(|f| {
                    (0..f.len())
                        .filter_map(|i| self.edge_of(f[i], f[(i + 1) % f.len()]))
                        .collect()
                })
                .collect(),
            _ => {
                return Err(DomainQueryError::UnsupportedRelation {
                    relation: "incidence".to_string(),
                    from_rank: rank,
                    to_rank: rank,
                })
            }
        };
        Ok(incidence_from_boundaries(self.num_cells(rank - 1)?, &boundaries))
    }
}
