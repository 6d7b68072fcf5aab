//! Sheet-level reader: VEC block parsing, link resolution and feature
//! assembly.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};

use crate::assembler::assemble;
use crate::feature::{Feature, PrimitiveRef, Relation};
use crate::scanner::{blocks, parse_point, Block, ObjectRef};
use crate::schema::{sheet_label, Crs, Schema};
use crate::topology::{Arc, Node, PrimitiveStore, SignedArc};
use crate::{Error, Result, SheetBundle};

/// A semantic object whose geometry could not be assembled. The object is
/// dropped from the feature set and surfaced here instead.
#[derive(Debug)]
pub struct DroppedObject {
    pub kind: String,
    pub id: String,
    pub reason: Error,
}

/// The decoded content of one sheet archive.
#[derive(Debug)]
pub struct Sheet {
    /// Sheet label from the THF support descriptor
    pub label: Option<String>,
    pub crs: Crs,
    pub schema: Schema,
    pub features: Vec<Feature>,
    pub relations: Vec<Relation>,
    pub dropped: Vec<DroppedObject>,
}

impl Sheet {
    /// First feature of `kind`, when the sheet carries one.
    pub fn feature_of_kind(&self, kind: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.kind == kind)
    }
}

/// Semantic object as read from a `FEA` block, before assembly.
#[derive(Debug, Default)]
struct RawObject {
    kind: String,
    attributes: HashMap<String, String>,
    refs: Vec<PrimitiveRef>,
}

/// Reads the content of one sheet archive.
pub struct SheetReader {
    bundle: SheetBundle,
}

impl SheetReader {
    /// Open a `.tar.bz2` sheet archive.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            bundle: SheetBundle::from_path(path)?,
        })
    }

    pub fn from_bundle(bundle: SheetBundle) -> Self {
        Self { bundle }
    }

    /// Decode the whole sheet.
    pub fn read(&self) -> Result<Sheet> {
        self.read_filtered(|_| true)
    }

    /// Decode the sheet, discarding objects whose kind fails `keep` before
    /// geometry assembly. Dropping unconfigured kinds early keeps the
    /// assembly pass proportional to what the caller will actually use.
    pub fn read_filtered<F: Fn(&str) -> bool>(&self, keep: F) -> Result<Sheet> {
        let label = sheet_label(&self.bundle.thf);
        let crs = Crs::parse(&self.bundle.geo)?;
        let schema = Schema::parse(&self.bundle.scd)?;

        let mut store = PrimitiveStore::default();
        let mut objects: HashMap<String, RawObject> = HashMap::new();
        let mut links: Vec<Link> = Vec::new();

        // Primitives must be fully loaded before assembly starts, and a
        // link may precede the block it points to, so parsing is a full
        // pass over every VEC member before any link is applied.
        for (name, content) in &self.bundle.vec {
            for block in blocks(name, content)? {
                match block.ty {
                    "PNO" => {
                        if let Some(node) = parse_node(&block) {
                            store.insert_node(node);
                        }
                    }
                    "PAR" => {
                        if let Some(arc) = parse_arc(&block) {
                            store.insert_arc(arc);
                        }
                    }
                    "PFE" => {
                        if let Some(id) = block.id() {
                            store.ensure_face(id);
                        }
                    }
                    "FEA" => {
                        if let Some((id, object)) = parse_object(&block, &schema) {
                            objects.insert(id, object);
                        }
                    }
                    "LNK" => {
                        if let Some(link) = Link::parse(&block) {
                            links.push(link);
                        }
                    }
                    other => debug!("{name}: ignoring block type {other}"),
                }
            }
        }

        let mut relations = Vec::new();
        for link in links {
            apply_link(link, &mut store, &mut objects, &mut relations);
        }

        // Primitives are complete; every node an arc declares as an
        // endpoint must exist before assembly starts.
        store.validate_references()?;

        let mut features = Vec::new();
        let mut dropped = Vec::new();
        for (id, object) in objects {
            if !keep(&object.kind) {
                continue;
            }
            match assemble(&id, &object.refs, &store) {
                Ok(geometry) => features.push(Feature {
                    kind: object.kind,
                    id,
                    attributes: object.attributes,
                    geometry,
                }),
                Err(reason) => {
                    warn!("dropping {} `{}`: {}", object.kind, id, reason);
                    dropped.push(DroppedObject {
                        kind: object.kind,
                        id,
                        reason,
                    });
                }
            }
        }
        // Sheet-local object ids are parse-order artifacts; keep output
        // deterministic for callers and tests.
        features.sort_by(|a, b| (&a.kind, &a.id).cmp(&(&b.kind, &b.id)));

        Ok(Sheet {
            label,
            crs,
            schema,
            features,
            relations,
            dropped,
        })
    }
}

fn parse_node(block: &Block) -> Option<Node> {
    let id = block.id()?;
    let (x, y, z) = block.all("COR").find_map(parse_point)?;
    Some(Node {
        id: id.to_string(),
        coord: geo_types::Coord { x, y },
        z,
    })
}

fn parse_arc(block: &Block) -> Option<Arc> {
    let id = block.id()?;
    let vertices: Vec<geo_types::Coord<f64>> = block
        .all("COR")
        .filter_map(parse_point)
        .map(|(x, y, _)| geo_types::Coord { x, y })
        .collect();
    if vertices.len() < 2 {
        return None;
    }
    if let Some(declared) = block.first("PTC").and_then(|v| v.trim().parse::<usize>().ok()) {
        if declared != vertices.len() {
            debug!("arc {id}: declared {declared} vertices, read {}", vertices.len());
        }
    }
    let mut nodes = block
        .all("FTP")
        .filter_map(ObjectRef::parse)
        .filter(|r| r.ty == "PNO")
        .map(|r| r.id.to_string());
    Some(Arc {
        id: id.to_string(),
        vertices,
        start: nodes.next(),
        end: nodes.next(),
    })
}

fn parse_object(block: &Block, schema: &Schema) -> Option<(String, RawObject)> {
    let id = block.id()?;
    let kind = block
        .first("SCP")
        .and_then(ObjectRef::parse)
        .map(|r| r.id.to_string())?;
    let mut object = RawObject {
        kind,
        ..RawObject::default()
    };
    // ATP names the attribute, the next ATV carries its value.
    let mut pending: Option<String> = None;
    for field in &block.fields {
        match field.tag {
            "ATP" => {
                pending = ObjectRef::parse(field.value).map(|r| {
                    schema
                        .attributes
                        .get(r.id)
                        .map_or_else(|| r.id.to_ascii_uppercase(), |def| def.name.clone())
                });
            }
            "ATV" => {
                if let Some(name) = pending.take() {
                    object.attributes.insert(name, field.value.to_string());
                }
            }
            "FTP" => {
                if let Some(r) = ObjectRef::parse(field.value).and_then(primitive_ref) {
                    object.refs.push(r);
                }
            }
            _ => {}
        }
    }
    Some((id.to_string(), object))
}

fn primitive_ref(r: ObjectRef) -> Option<PrimitiveRef> {
    match r.ty {
        "PNO" => Some(PrimitiveRef::Node(r.id.to_string())),
        "PAR" => Some(PrimitiveRef::Arc(r.id.to_string())),
        "PFE" => Some(PrimitiveRef::Face(r.id.to_string())),
        _ => None,
    }
}

/// One `LNK` block: the first `FTP` is the source, the rest are targets.
#[derive(Debug)]
struct Link {
    relation: Option<String>,
    reversed: bool,
    source: (String, String),
    targets: Vec<(String, String)>,
}

impl Link {
    fn parse(block: &Block) -> Option<Self> {
        let mut refs = block
            .all("FTP")
            .filter_map(ObjectRef::parse)
            .map(|r| (r.ty.to_string(), r.id.to_string()));
        let source = refs.next()?;
        let targets: Vec<_> = refs.collect();
        if targets.is_empty() {
            return None;
        }
        Some(Self {
            relation: block.first("SCP").and_then(ObjectRef::parse).map(|r| r.id.to_string()),
            reversed: block.first("SNS") == Some("-"),
            source,
            targets,
        })
    }
}

fn apply_link(
    link: Link,
    store: &mut PrimitiveStore,
    objects: &mut HashMap<String, RawObject>,
    relations: &mut Vec<Relation>,
) {
    let (source_ty, source_id) = &link.source;
    for (target_ty, target_id) in &link.targets {
        match (source_ty.as_str(), target_ty.as_str()) {
            // Face composition: ordered signed arc list.
            ("PFE", "PAR") => store.push_face_arc(
                source_id,
                SignedArc {
                    id: target_id.clone(),
                    reversed: link.reversed,
                },
            ),
            // Geometry attachment.
            ("FEA", "PNO" | "PAR" | "PFE") => {
                if let Some(object) = objects.get_mut(source_id) {
                    let r = match target_ty.as_str() {
                        "PNO" => PrimitiveRef::Node(target_id.clone()),
                        "PAR" => PrimitiveRef::Arc(target_id.clone()),
                        _ => PrimitiveRef::Face(target_id.clone()),
                    };
                    object.refs.push(r);
                } else {
                    debug!("link to unknown object `{source_id}` ignored");
                }
            }
            // Semantic relation between two objects.
            ("FEA", "FEA") => {
                if let Some(name) = &link.relation {
                    relations.push(Relation {
                        name: name.clone(),
                        source: source_id.clone(),
                        target: target_id.clone(),
                    });
                }
            }
            other => debug!("ignoring link {other:?}"),
        }
    }
}
