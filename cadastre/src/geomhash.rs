//! Stable geometry digests for cross-run deduplication.
//!
//! The digest is a SHA-256 over a canonical GeoJSON rendering: fixed key
//! order, no whitespace, coordinates at a fixed 7-decimal precision. Two
//! geometries that are equal after coordinate rounding hash identically.

use std::fmt::Write as _;

use geo_types::{Coord, Geometry, LineString, Polygon};
use sha2::{Digest, Sha256};

const PRECISION: usize = 7;

/// 256-bit digest of the canonical form of `geometry`.
pub fn geometry_hash(geometry: &Geometry<f64>) -> Vec<u8> {
    Sha256::digest(canonical_json(geometry)).to_vec()
}

/// The canonical rendering fed to the hash.
pub fn canonical_json(geometry: &Geometry<f64>) -> String {
    let mut out = String::new();
    write_geometry(&mut out, geometry);
    out
}

fn write_geometry(out: &mut String, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(p) => {
            out.push_str(r#"{"type":"Point","coordinates":"#);
            write_coord(out, p.0);
        }
        Geometry::MultiPoint(mp) => {
            out.push_str(r#"{"type":"MultiPoint","coordinates":"#);
            write_seq(out, mp.0.iter().map(|p| p.0), write_coord);
        }
        Geometry::LineString(ls) => {
            out.push_str(r#"{"type":"LineString","coordinates":"#);
            write_line(out, ls);
        }
        Geometry::MultiLineString(mls) => {
            out.push_str(r#"{"type":"MultiLineString","coordinates":"#);
            write_seq(out, mls.0.iter(), |out, ls| write_line(out, ls));
        }
        Geometry::Polygon(p) => {
            out.push_str(r#"{"type":"Polygon","coordinates":"#);
            write_polygon(out, p);
        }
        Geometry::MultiPolygon(mp) => {
            out.push_str(r#"{"type":"MultiPolygon","coordinates":"#);
            write_seq(out, mp.0.iter(), |out, p| write_polygon(out, p));
        }
        // Remaining variants never leave the assembler; hash their parts.
        Geometry::GeometryCollection(gc) => {
            out.push_str(r#"{"type":"GeometryCollection","geometries":"#);
            write_seq(out, gc.0.iter(), |out, g| write_geometry(out, g));
        }
        Geometry::Rect(r) => return write_geometry(out, &Geometry::Polygon(r.to_polygon())),
        Geometry::Triangle(t) => return write_geometry(out, &Geometry::Polygon(t.to_polygon())),
        Geometry::Line(l) => {
            return write_geometry(out, &Geometry::LineString(LineString::from(vec![l.start, l.end])))
        }
    }
    out.push('}');
}

fn write_seq<T>(out: &mut String, items: impl Iterator<Item = T>, write: impl Fn(&mut String, T)) {
    out.push('[');
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push(',');
        }
        write(out, item);
    }
    out.push(']');
}

fn write_polygon(out: &mut String, polygon: &Polygon<f64>) {
    write_seq(
        out,
        std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()),
        |out, ring| write_line(out, ring),
    );
}

fn write_line(out: &mut String, line: &LineString<f64>) {
    write_seq(out, line.0.iter().copied(), write_coord);
}

fn write_coord(out: &mut String, coord: Coord<f64>) {
    let _ = write!(out, "[{:.p$},{:.p$}]", coord.x, coord.y, p = PRECISION);
}
