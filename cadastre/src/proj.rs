//! Reprojection between the well-known French CRS set and the output CRS.

use geo::MapCoords;
use geo_types::{Coord, Geometry};
use proj4rs::proj::Proj as Proj4;
use proj4rs::transform::transform;

use crate::error::{CadastreError, Result};

/// PROJ.4 definition for one of the supported EPSG codes.
/// Only the French cadastral set plus the two output references.
fn proj_string(epsg: u32) -> Option<&'static str> {
    Some(match epsg {
        4326 => "+proj=longlat +datum=WGS84 +no_defs +type=crs",
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs +type=crs",
        2154 => "+proj=lcc +lat_1=49 +lat_2=44 +lat_0=46.5 +lon_0=3 +x_0=700000 +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs",
        // NTF Lambert zones (legacy sheets), Paris meridian.
        27571 => "+proj=lcc +lat_1=49.5 +lat_0=49.5 +lon_0=0 +k_0=0.999877341 +x_0=600000 +y_0=1200000 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27572 => "+proj=lcc +lat_1=46.8 +lat_0=46.8 +lon_0=0 +k_0=0.99987742 +x_0=600000 +y_0=2200000 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27573 => "+proj=lcc +lat_1=44.1 +lat_0=44.1 +lon_0=0 +k_0=0.999877499 +x_0=600000 +y_0=3200000 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27574 => "+proj=lcc +lat_1=42.165 +lat_0=42.165 +lon_0=0 +k_0=0.99994471 +x_0=234.358 +y_0=4185861.369 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27561 => "+proj=lcc +lat_1=49.5 +lat_0=49.5 +lon_0=0 +k_0=0.999877341 +x_0=600000 +y_0=200000 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27562 => "+proj=lcc +lat_1=46.8 +lat_0=46.8 +lon_0=0 +k_0=0.99987742 +x_0=600000 +y_0=200000 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27563 => "+proj=lcc +lat_1=44.1 +lat_0=44.1 +lon_0=0 +k_0=0.999877499 +x_0=600000 +y_0=200000 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        27564 => "+proj=lcc +lat_1=42.165 +lat_0=42.165 +lon_0=0 +k_0=0.99994471 +x_0=234.358 +y_0=185861.369 +a=6378249.2 +b=6356515 +towgs84=-168,-60,320,0,0,0,0 +pm=paris +units=m +no_defs +type=crs",
        // DOM UTM references.
        2970 => "+proj=utm +zone=20 +ellps=intl +towgs84=-467,-16,-300,0,0,0,0 +units=m +no_defs +type=crs",
        2971 => "+proj=utm +zone=22 +ellps=intl +towgs84=-186,230,110,0,0,0,0 +units=m +no_defs +type=crs",
        2972 => "+proj=utm +zone=22 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs",
        2973 => "+proj=utm +zone=20 +ellps=intl +towgs84=186,482,151,0,0,0,0 +units=m +no_defs +type=crs",
        2975 => "+proj=utm +zone=40 +south +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs",
        _ => return None,
    })
}

fn is_geographic(epsg: u32) -> bool {
    epsg == 4326
}

/// Reprojects geometries of one sheet; built once per archive.
pub struct Reprojector {
    from_epsg: u32,
    to_epsg: u32,
    projs: Option<(Proj4, Proj4)>,
    decimals: i32,
}

impl Reprojector {
    /// Fails with `ReprojectionFailed` when either side is outside the
    /// supported set.
    pub fn new(from_epsg: u32, to_epsg: u32) -> Result<Self> {
        let failed = || CadastreError::ReprojectionFailed {
            from: from_epsg,
            to: to_epsg,
        };
        let projs = if from_epsg == to_epsg {
            None
        } else {
            let from = Proj4::from_proj_string(proj_string(from_epsg).ok_or_else(failed)?)
                .map_err(|_| failed())?;
            let to = Proj4::from_proj_string(proj_string(to_epsg).ok_or_else(failed)?)
                .map_err(|_| failed())?;
            Some((from, to))
        };
        // Geographic outputs keep 7 decimals (~1 cm), metric outputs 2.
        let decimals = if is_geographic(to_epsg) { 7 } else { 2 };
        Ok(Self {
            from_epsg,
            to_epsg,
            projs,
            decimals,
        })
    }

    pub fn to_epsg(&self) -> u32 {
        self.to_epsg
    }

    /// Transform one geometry. Identity when input and output agree.
    pub fn reproject(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
        let Some((from, to)) = &self.projs else {
            return Ok(geometry.clone());
        };
        let failed = || CadastreError::ReprojectionFailed {
            from: self.from_epsg,
            to: self.to_epsg,
        };
        let scale = 10f64.powi(self.decimals);
        // proj4rs works in radians on the geographic side.
        let geometry = geometry.try_map_coords(|coord: Coord<f64>| {
            let mut point = if is_geographic(self.from_epsg) {
                (coord.x.to_radians(), coord.y.to_radians(), 0.0)
            } else {
                (coord.x, coord.y, 0.0)
            };
            transform(from, to, &mut point).map_err(|_| failed())?;
            let (mut x, mut y) = (point.0, point.1);
            if is_geographic(self.to_epsg) {
                x = x.to_degrees();
                y = y.to_degrees();
            }
            Ok::<_, CadastreError>(Coord {
                x: (x * scale).round() / scale,
                y: (y * scale).round() / scale,
            })
        })?;
        Ok(geometry)
    }
}
