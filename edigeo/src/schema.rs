//! Semantic schema (SCD) and coordinate reference (GEO) parsing.

use std::collections::{BTreeSet, HashMap};

use crate::scanner::{blocks, Scanner};
use crate::{Error, Result};

/// Attribute descriptor declared by the SCD file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    /// Declared value type (`T` text, `N` numeric, ...)
    pub ty: String,
}

/// The semantic schema of one sheet: declared object kinds and their
/// attribute descriptors.
#[derive(Debug, Default)]
pub struct Schema {
    pub kinds: BTreeSet<String>,
    pub attributes: HashMap<String, AttributeDef>,
}

impl Schema {
    pub fn parse(scd: &str) -> Result<Self> {
        let mut schema = Self::default();
        for block in blocks("SCD", scd)? {
            let Some(id) = block.id() else { continue };
            match block.ty {
                "OBJ" => {
                    schema.kinds.insert(id.to_string());
                }
                "ATT" => {
                    schema.attributes.insert(
                        id.to_string(),
                        AttributeDef {
                            name: id.to_ascii_uppercase(),
                            ty: block.first("TYP").unwrap_or("T").to_string(),
                        },
                    );
                }
                // REL/ASS blocks declare link types; link records carry the
                // relation name themselves, so nothing to keep here.
                _ => {}
            }
        }
        Ok(schema)
    }
}

/// Coordinate reference discovered from the GEO file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    pub fn epsg(self) -> u32 {
        self.epsg
    }

    /// True for geographic (degree-based) references.
    pub fn is_geographic(self) -> bool {
        self.epsg == 4326
    }

    /// Map an EDIGEO `REL` label to its EPSG code. Only the well-known
    /// French references are accepted.
    pub fn from_label(label: &str) -> Result<Self> {
        let epsg = match label {
            "LAMB93" => 2154,
            "LAMB1" => 27571,
            "LAMB2" => 27572,
            "LAMB3" => 27573,
            "LAMB4" => 27574,
            "LAMB1C" => 27561,
            "LAMB2C" => 27562,
            "LAMB3C" => 27563,
            "LAMB4C" => 27564,
            "GUAD48UTM20" => 2970,
            "CSG67UTM22" => 2971,
            "RGFG95UTM22" => 2972,
            "MART38UTM20" => 2973,
            "RGR92UTM40S" => 2975,
            "WGS84G" => 4326,
            other => return Err(Error::UnsupportedCrs(other.to_string())),
        };
        Ok(Self { epsg })
    }

    /// Extract the coordinate reference from a GEO file.
    pub fn parse(geo: &str) -> Result<Self> {
        for field in Scanner::new("GEO", geo) {
            let field = field?;
            if field.tag == "REL" {
                return Self::from_label(field.value);
            }
        }
        Err(Error::UnsupportedCrs(String::from("<missing REL record>")))
    }
}

/// The sheet label from the THF support descriptor (`LON`), when present.
pub fn sheet_label(thf: &str) -> Option<String> {
    Scanner::new("THF", thf)
        .filter_map(std::result::Result::ok)
        .find(|f| f.tag == "LON")
        .map(|f| f.value.to_string())
}
