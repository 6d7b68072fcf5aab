//! Planar-graph primitives and the per-sheet primitive store.

use std::collections::HashMap;

use geo_types::Coord;

use crate::{Error, Result};

/// A point primitive (`PNO` block).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub coord: Coord<f64>,
    pub z: Option<f64>,
}

/// An arc primitive (`PAR` block): an ordered vertex sequence with the
/// identifiers of its start and end nodes. The node references may be
/// redundant with the vertex list but must stay consistent with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
    pub id: String,
    pub vertices: Vec<Coord<f64>>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// A signed reference to an arc; `reversed` flips the traversal direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArc {
    pub id: String,
    pub reversed: bool,
}

/// A face primitive (`PFE` block): a closed boundary given as an ordered
/// list of signed arc references, filled in from composition links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Face {
    pub id: String,
    pub arcs: Vec<SignedArc>,
}

/// Per-sheet arena of parsed primitives, keyed by identifier and segmented
/// by primitive kind. Insertion is append-only during the parse pass;
/// lookups are O(1). The whole store is dropped when the sheet is done.
#[derive(Debug, Default)]
pub struct PrimitiveStore {
    nodes: HashMap<String, Node>,
    arcs: HashMap<String, Arc>,
    faces: HashMap<String, Face>,
}

impl PrimitiveStore {
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn insert_arc(&mut self, arc: Arc) {
        self.arcs.insert(arc.id.clone(), arc);
    }

    pub fn insert_face(&mut self, face: Face) {
        self.faces.insert(face.id.clone(), face);
    }

    /// Register a face identifier without touching arcs already collected
    /// from composition links.
    pub fn ensure_face(&mut self, id: &str) {
        self.faces.entry(id.to_string()).or_insert_with(|| Face {
            id: id.to_string(),
            ..Face::default()
        });
    }

    /// Append a signed arc reference to a face, creating the face if the
    /// composition link arrived before its `PFE` block.
    pub fn push_face_arc(&mut self, face_id: &str, arc: SignedArc) {
        self.faces
            .entry(face_id.to_string())
            .or_insert_with(|| Face {
                id: face_id.to_string(),
                ..Face::default()
            })
            .arcs
            .push(arc);
    }

    pub fn node(&self, id: &str) -> Result<&Node> {
        self.nodes.get(id).ok_or_else(|| Error::PrimitiveMissing {
            kind: "node",
            id: id.to_string(),
        })
    }

    pub fn arc(&self, id: &str) -> Result<&Arc> {
        self.arcs.get(id).ok_or_else(|| Error::PrimitiveMissing {
            kind: "arc",
            id: id.to_string(),
        })
    }

    pub fn face(&self, id: &str) -> Result<&Face> {
        self.faces.get(id).ok_or_else(|| Error::PrimitiveMissing {
            kind: "face",
            id: id.to_string(),
        })
    }

    /// Enforce the graph invariant once a parse pass is complete: every
    /// node referenced by an arc exists in the store.
    pub fn validate_references(&self) -> Result<()> {
        for arc in self.arcs.values() {
            for node in [&arc.start, &arc.end].into_iter().flatten() {
                self.node(node)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.arcs.len() + self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
