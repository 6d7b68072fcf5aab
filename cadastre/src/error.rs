//! Error and Result types.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CadastreError {
    /// Sheet archive could not be decoded (archive I/O, missing member,
    /// unsupported CRS, broken primitive graph)
    #[error("decoding sheet: {0}")]
    Decode(#[from] edigeo::Error),
    #[error("I/O error `{0}`")]
    Io(#[from] std::io::Error),
    /// Static config problem, detected before any archive is read
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
    /// Non-nullable column received a value its coercions cannot produce
    #[error("cannot coerce `{value}` into non-nullable column `{column}`")]
    CoercionFailed { column: String, value: String },
    #[error("reprojection EPSG:{from} -> EPSG:{to} failed")]
    ReprojectionFailed { from: u32, to: u32 },
    /// Unique-key violation not absorbed by `ON CONFLICT DO NOTHING`
    #[error("unique key violation on `{0}`")]
    SinkConflict(String),
    /// The store connection dropped; retried once, then fatal to the worker
    #[error("database connection lost")]
    ConnectionLost,
    #[error("database error `{0}`")]
    Sink(#[from] postgres::Error),
    #[error("department boundaries: {0}")]
    Departments(String),
    #[error("worker pool: {0}")]
    Pool(String),
    #[error("invalid millesime `{0}`, expected YYYY-MM")]
    Millesime(String),
}

pub type Result<T> = std::result::Result<T, CadastreError>;
