//! Reader for EDIGEO (AFNOR NF Z 52000) cadastre sheet archives.
//!
//! One archive holds one cadastral sheet: a descriptor (THF), a semantic
//! schema (SCD), a coordinate reference (GEO), a quality file (QAL) and
//! zero or more vector files (VEC). The vector files describe planar-graph
//! primitives (nodes, arcs, faces) referencing one another by identifier,
//! plus semantic objects referencing the primitives that carry their
//! geometry. [`SheetReader`] decodes the bundle into typed [`Feature`]s
//! with fully assembled `geo-types` geometries.
//!
//! ```no_run
//! use edigeo::SheetReader;
//!
//! let sheet = SheetReader::from_path("edigeo-380030000A01.tar.bz2")?.read()?;
//! for feature in &sheet.features {
//!     println!("{} {}", feature.kind, feature.id);
//! }
//! # Ok::<(), edigeo::Error>(())
//! ```

mod archive;
mod assembler;
mod feature;
mod reader;
pub mod scanner;
mod schema;
mod topology;

pub use crate::archive::SheetBundle;
pub use crate::feature::{Feature, Relation};
pub use crate::reader::{DroppedObject, Sheet, SheetReader};
pub use crate::schema::{AttributeDef, Crs, Schema};
pub use crate::topology::{Arc, Face, Node, PrimitiveStore, SignedArc};

/// All errors that can happen when decoding a sheet archive
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around standard io::Error raised while decompressing or
    /// de-framing the archive
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    /// THF, SCD or GEO member absent from the archive
    #[error("sheet archive has no `{0}` member")]
    MissingMember(&'static str),
    /// A record line that does not follow the `NNNTFLL:value` grammar
    #[error("malformed record on line {line} of `{file}`")]
    Record { file: String, line: usize },
    /// The GEO file declares a coordinate reference this crate does not know
    #[error("unsupported coordinate reference `{0}`")]
    UnsupportedCrs(String),
    /// An object references a primitive that is not in the sheet
    #[error("unresolved {kind} reference `{id}`")]
    PrimitiveMissing { kind: &'static str, id: String },
    /// The boundary of a face could not be chained into closed rings
    #[error("face `{0}` boundary cannot be closed")]
    GeometryIncomplete(String),
    /// A feature references primitives of more than one kind
    #[error("object `{0}` mixes primitive kinds")]
    MixedGeometry(String),
    /// A feature references no primitive at all
    #[error("object `{0}` carries no geometry")]
    EmptyGeometry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
