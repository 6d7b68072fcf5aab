//! Department code resolution.
//!
//! Three modes, in priority order: an explicit two-character code, the
//! archive filename (`edigeo-<dep>...`), or a spatial lookup of the sheet
//! against a department boundary set. The boundary index is built at most
//! once per process and published through a `OnceLock`; after that it is
//! read-only.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use geo::{Area, BooleanOps, BoundingRect};
use geo_types::{Geometry, MultiPolygon, Rect};
use log::warn;
use rstar::{RTree, RTreeObject, AABB};

use crate::error::{CadastreError, Result};

/// How the department code of an archive is determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepPolicy {
    /// Use the given code verbatim
    Explicit(String),
    /// Take the two characters after `edigeo-` in the archive basename
    FromFilename,
    /// Intersect the sheet with the department boundary set
    Spatial,
}

/// Department code from an archive basename `edigeo-<dep>...`.
/// Corsican codes `2A`/`2B` come through as-is.
pub fn from_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("edigeo-")?;
    if rest.len() < 2 || !rest.is_char_boundary(2) {
        return None;
    }
    Some(rest[..2].to_ascii_uppercase())
}

#[derive(Debug)]
struct DeptBox {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for DeptBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Static spatial index over the department boundary set.
pub struct DepartmentIndex {
    departments: Vec<(String, MultiPolygon<f64>)>,
    rtree: RTree<DeptBox>,
}

static INDEX: OnceLock<DepartmentIndex> = OnceLock::new();

impl DepartmentIndex {
    /// Load a GeoJSON FeatureCollection whose features carry a `code`
    /// property and Polygon/MultiPolygon geometries.
    pub fn load(path: &Path) -> Result<Self> {
        let bad = |msg: String| CadastreError::Departments(msg);
        let text = fs::read_to_string(path)?;
        let collection: geojson::FeatureCollection = text
            .parse()
            .map_err(|e| bad(format!("{}: {e}", path.display())))?;
        let mut departments = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let code = feature
                .property("code")
                .and_then(|v| v.as_str())
                .ok_or_else(|| bad("feature without `code` property".to_string()))?
                .to_string();
            let geometry = feature
                .geometry
                .ok_or_else(|| bad(format!("department {code} without geometry")))?;
            let geometry = Geometry::<f64>::try_from(geometry.value)
                .map_err(|e| bad(format!("department {code}: {e}")))?;
            let shape = match geometry {
                Geometry::Polygon(p) => MultiPolygon(vec![p]),
                Geometry::MultiPolygon(mp) => mp,
                other => {
                    return Err(bad(format!(
                        "department {code}: unexpected {other:?} geometry"
                    )))
                }
            };
            departments.push((code, shape));
        }
        let rtree = RTree::bulk_load(
            departments
                .iter()
                .enumerate()
                .filter_map(|(idx, (_, shape))| {
                    shape.bounding_rect().map(|bbox| DeptBox { idx, bbox })
                })
                .collect(),
        );
        Ok(Self { departments, rtree })
    }

    /// The process-wide index; the first caller builds it, later callers
    /// observe the published structure.
    pub fn global(path: &Path) -> Result<&'static Self> {
        if let Some(index) = INDEX.get() {
            return Ok(index);
        }
        let built = Self::load(path)?;
        Ok(INDEX.get_or_init(|| built))
    }

    /// Department with the largest overlap with `bbox`. Ties resolve to
    /// the lower INSEE code; no intersection resolves to `00` with a
    /// warning surfaced to the caller's log.
    pub fn resolve(&self, bbox: Rect<f64>) -> String {
        let search = AABB::from_corners(bbox.min().into(), bbox.max().into());
        let probe = MultiPolygon(vec![bbox.to_polygon()]);
        let mut candidates: Vec<&DeptBox> =
            self.rtree.locate_in_envelope_intersecting(&search).collect();
        candidates.sort_by(|a, b| self.departments[a.idx].0.cmp(&self.departments[b.idx].0));

        let mut best: Option<(f64, &str)> = None;
        for candidate in candidates {
            let (code, shape) = &self.departments[candidate.idx];
            let overlap = shape.intersection(&probe).unsigned_area();
            if overlap <= 0.0 {
                continue;
            }
            // Candidates come in code order, so a strict comparison keeps
            // the lower INSEE code on equal overlap.
            if best.map_or(true, |(area, _)| overlap > area) {
                best = Some((overlap, code));
            }
        }
        match best {
            Some((_, code)) => code.to_string(),
            None => {
                warn!("sheet intersects no department, using 00");
                "00".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;
    use std::path::PathBuf;

    fn index(departments: Vec<(&str, MultiPolygon<f64>)>) -> DepartmentIndex {
        let departments: Vec<(String, MultiPolygon<f64>)> = departments
            .into_iter()
            .map(|(code, shape)| (code.to_string(), shape))
            .collect();
        let rtree = RTree::bulk_load(
            departments
                .iter()
                .enumerate()
                .map(|(idx, (_, shape))| DeptBox {
                    idx,
                    bbox: shape.bounding_rect().unwrap(),
                })
                .collect(),
        );
        DepartmentIndex { departments, rtree }
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0),
        ]])
    }

    #[test]
    fn filename_department_extraction() {
        let dep = |s: &str| from_filename(&PathBuf::from(s));
        assert_eq!(dep("edigeo-380030000A01.tar.bz2"), Some("38".to_string()));
        assert_eq!(dep("edigeo-2A0040000B02.tar.bz2"), Some("2A".to_string()));
        assert_eq!(dep("edigeo-2b004.tar.bz2"), Some("2B".to_string()));
        assert_eq!(dep("cadastre-38.tar.bz2"), None);
    }

    #[test]
    fn largest_overlap_wins() {
        let ix = index(vec![
            ("38", square(0.0, 0.0, 10.0, 10.0)),
            ("73", square(10.0, 0.0, 30.0, 10.0)),
        ]);
        // Sheet bbox sits 1 unit in dep 38, 5 units in dep 73.
        let bbox = Rect::new((9.0, 4.0), (15.0, 5.0));
        assert_eq!(ix.resolve(bbox), "73");
    }

    #[test]
    fn equal_overlap_resolves_to_lower_code() {
        let ix = index(vec![
            ("74", square(10.0, 0.0, 20.0, 10.0)),
            ("38", square(0.0, 0.0, 10.0, 10.0)),
        ]);
        // Exactly 2 units on each side of the boundary at x=10.
        let bbox = Rect::new((8.0, 4.0), (12.0, 5.0));
        assert_eq!(ix.resolve(bbox), "38");
    }

    #[test]
    fn no_intersection_falls_back_to_00() {
        let ix = index(vec![("38", square(0.0, 0.0, 10.0, 10.0))]);
        let bbox = Rect::new((100.0, 100.0), (101.0, 101.0));
        assert_eq!(ix.resolve(bbox), "00");
    }
}
