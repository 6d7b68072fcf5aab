//! Geometry assembly from the planar-graph primitives.
//!
//! Faces are rebuilt by resolving their signed arc references, chaining the
//! oriented arcs end-to-end at shared endpoints and splitting the result
//! into rings. The ring with the largest absolute signed area becomes the
//! outer ring; the rest are holes. Ring orientation is normalized to the
//! right-hand rule: outer counter-clockwise, holes clockwise.

use geo::{Area, Winding};
use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};

use crate::feature::PrimitiveRef;
use crate::topology::{Arc, Face, Node, PrimitiveStore};
use crate::{Error, Result};

/// Endpoint comparison tolerance, in coordinate units. Not applied to
/// areas or distances reported to callers.
pub const ENDPOINT_TOLERANCE: f64 = 1e-6;

fn close(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= ENDPOINT_TOLERANCE && (a.y - b.y).abs() <= ENDPOINT_TOLERANCE
}

/// Drop consecutive vertices that coincide within the endpoint tolerance.
fn dedup_vertices(vertices: &mut Vec<Coord<f64>>) {
    vertices.dedup_by(|next, prev| close(*next, *prev));
}

/// A node maps directly to a point.
pub fn node_point(node: &Node) -> Point<f64> {
    Point::from(node.coord)
}

/// An arc maps directly to a line string with duplicates collapsed.
pub fn arc_linestring(arc: &Arc) -> LineString<f64> {
    let mut vertices = arc.vertices.clone();
    dedup_vertices(&mut vertices);
    LineString::from(vertices)
}

/// Assemble the polygon of one face from its signed arc references.
pub fn face_polygon(face: &Face, store: &PrimitiveStore) -> Result<Polygon<f64>> {
    let mut pieces: Vec<Vec<Coord<f64>>> = Vec::with_capacity(face.arcs.len());
    for signed in &face.arcs {
        let arc = store.arc(&signed.id)?;
        let mut vertices = arc.vertices.clone();
        if signed.reversed {
            vertices.reverse();
        }
        dedup_vertices(&mut vertices);
        if vertices.len() >= 2 {
            pieces.push(vertices);
        }
    }
    let rings = chain_rings(&face.id, pieces)?;
    Ok(orient_rings(rings))
}

/// Chain arc vertex runs into closed rings. Signs have already been
/// applied; a run may still attach in either direction because the
/// composition links carry no ordering.
fn chain_rings(face_id: &str, mut pieces: Vec<Vec<Coord<f64>>>) -> Result<Vec<LineString<f64>>> {
    let incomplete = || Error::GeometryIncomplete(face_id.to_string());
    let mut rings = Vec::new();
    while let Some(mut chain) = pieces.pop() {
        loop {
            let first = *chain.first().ok_or_else(incomplete)?;
            let last = *chain.last().ok_or_else(incomplete)?;
            if chain.len() > 2 && close(first, last) {
                // Snap the closure exactly and emit the ring.
                if let Some(end) = chain.last_mut() {
                    *end = first;
                }
                dedup_vertices(&mut chain);
                if chain.len() < 3 {
                    return Err(incomplete());
                }
                chain.push(first);
                rings.push(LineString::from(chain));
                break;
            }
            let next = pieces.iter().position(|piece| {
                close(last, piece[0]) || close(last, piece[piece.len() - 1])
            });
            let Some(idx) = next else {
                return Err(incomplete());
            };
            let mut piece = pieces.swap_remove(idx);
            if !close(last, piece[0]) {
                piece.reverse();
            }
            chain.extend_from_slice(&piece[1..]);
            dedup_vertices(&mut chain);
        }
    }
    if rings.is_empty() {
        return Err(incomplete());
    }
    Ok(rings)
}

/// Pick the ring with the largest absolute signed area as the outer ring
/// and normalize winding: outer counter-clockwise, holes clockwise.
fn orient_rings(mut rings: Vec<LineString<f64>>) -> Polygon<f64> {
    let outer_idx = rings
        .iter()
        .enumerate()
        .map(|(i, ring)| (i, ring_area(ring).abs()))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut exterior = rings.swap_remove(outer_idx);
    exterior.make_ccw_winding();
    for hole in &mut rings {
        hole.make_cw_winding();
    }
    Polygon::new(exterior, rings)
}

fn ring_area(ring: &LineString<f64>) -> f64 {
    Polygon::new(ring.clone(), Vec::new()).signed_area()
}

/// Assemble the geometry of one semantic object from its primitive
/// references. Multiple references of one kind yield the Multi* variant;
/// mixed kinds are invalid.
pub fn assemble(
    object_id: &str,
    refs: &[PrimitiveRef],
    store: &PrimitiveStore,
) -> Result<Geometry<f64>> {
    let mut points: Vec<Point<f64>> = Vec::new();
    let mut lines: Vec<LineString<f64>> = Vec::new();
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for r in refs {
        match r {
            PrimitiveRef::Node(id) => points.push(node_point(store.node(id)?)),
            PrimitiveRef::Arc(id) => lines.push(arc_linestring(store.arc(id)?)),
            PrimitiveRef::Face(id) => polygons.push(face_polygon(store.face(id)?, store)?),
        }
    }
    let kinds =
        usize::from(!points.is_empty()) + usize::from(!lines.is_empty()) + usize::from(!polygons.is_empty());
    if kinds > 1 {
        return Err(Error::MixedGeometry(object_id.to_string()));
    }
    match (points.len(), lines.len(), polygons.len()) {
        (1, 0, 0) => Ok(Geometry::Point(points.remove(0))),
        (_, 0, 0) if !points.is_empty() => Ok(Geometry::MultiPoint(MultiPoint(points))),
        (0, 1, 0) => Ok(Geometry::LineString(lines.remove(0))),
        (0, _, 0) if !lines.is_empty() => Ok(Geometry::MultiLineString(MultiLineString(lines))),
        (0, 0, 1) => Ok(Geometry::Polygon(polygons.remove(0))),
        (0, 0, _) if !polygons.is_empty() => Ok(Geometry::MultiPolygon(MultiPolygon(polygons))),
        _ => Err(Error::EmptyGeometry(object_id.to_string())),
    }
}
