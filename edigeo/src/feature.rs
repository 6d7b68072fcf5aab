//! Decoded semantic objects.

use std::collections::HashMap;

use geo_types::Geometry;

/// Reference from a semantic object to one of its geometry primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveRef {
    Node(String),
    Arc(String),
    Face(String),
}

/// One semantic object with its assembled geometry.
///
/// `kind` is the SCD object name (`PARCELLE_id`, `BATIMENT_id`, ...);
/// attribute names are normalized to upper-case.
#[derive(Debug, Clone)]
pub struct Feature {
    pub kind: String,
    pub id: String,
    pub attributes: HashMap<String, String>,
    pub geometry: Geometry<f64>,
}

impl Feature {
    /// Attribute value by (upper-case) name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A semantic link between two objects, e.g. `NUMVOIE_PARCELLE`.
/// `source` and `target` are sheet-local object identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub source: String,
    pub target: String,
}
