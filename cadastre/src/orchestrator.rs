//! Parallel ingest orchestration.
//!
//! The orchestrator owns the archive list and the incremental journal;
//! workers own everything per-archive (primitive store, feature set,
//! transform context). Archives are dispatched across a fixed rayon pool;
//! completion reports come back over a channel so journal writes and
//! progress accounting stay on the orchestrator thread.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use geo::BoundingRect;
use log::{error, info, warn};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use edigeo::{Sheet, SheetBundle, SheetReader};

use crate::coerce::parse_millesime;
use crate::config::{Config, TableType};
use crate::departments::{self, DepartmentIndex, DepPolicy};
use crate::error::{CadastreError, Result};
use crate::proj::Reprojector;
use crate::sink::{PgParams, Sink};
use crate::transform::{feature_row, relation_row, Row, TransformCtx};

/// Ingest run options, filled by the CLI.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// A directory tree walked for `*.tar.bz2`, or a single archive
    pub source: PathBuf,
    /// `YYYY-MM` release date; its year becomes the millésime
    pub millesime: String,
    pub schema: String,
    /// Output EPSG for all geometry columns
    pub epsg: u32,
    /// Worker cap; effective count is `min(workers, host CPUs)`
    pub workers: Option<usize>,
    pub dep_policy: DepPolicy,
    /// 0..=3; drives progress cadence and log detail
    pub verbosity: u8,
    pub drop_schema: bool,
    pub drop_table: bool,
    /// Department boundary GeoJSON, required for the spatial policy
    pub departments_file: Option<PathBuf>,
}

/// End-of-run accounting.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub loaded: usize,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, String)>,
    /// Rows actually inserted, per table
    pub rows: HashMap<String, u64>,
    /// Features dropped by decoders (geometry/primitive errors)
    pub dropped_features: usize,
}

impl IngestReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum WorkerReport {
    Loaded {
        path: PathBuf,
        checksum: Vec<u8>,
        rows: HashMap<String, u64>,
        dropped: usize,
    },
    Skipped {
        path: PathBuf,
    },
    Failed {
        path: PathBuf,
        reason: String,
        connection_lost: bool,
    },
}

pub struct Orchestrator {
    config: Config,
    options: IngestOptions,
    millesime: i32,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: Config, options: IngestOptions) -> Result<Self> {
        let millesime = parse_millesime(&options.millesime)?;
        if options.dep_policy == DepPolicy::Spatial && options.departments_file.is_none() {
            return Err(CadastreError::ConfigInvalid(
                "spatial department policy needs a boundary file".to_string(),
            ));
        }
        Ok(Self {
            config,
            options,
            millesime,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Cooperative stop: no further archives are dispatched once set;
    /// in-flight workers finish their current archive.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(&self, pg: &PgParams) -> Result<IngestReport> {
        let archives = discover(&self.options.source)?;
        info!("{} archive(s) under {}", archives.len(), self.options.source.display());

        let sink = Sink::connect(pg, &self.options.schema, self.options.epsg)?;
        sink.prepare(&self.config, self.options.drop_schema, self.options.drop_table)?;
        let journal = sink.journal()?;

        let index = match &self.options.departments_file {
            Some(path) if self.options.dep_policy == DepPolicy::Spatial => {
                Some(DepartmentIndex::global(path)?)
            }
            _ => None,
        };

        let host_cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let workers = self.options.workers.map_or(host_cpus, |w| w.min(host_cpus)).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ingest-{i}"))
            .build()
            .map_err(|e| CadastreError::Pool(e.to_string()))?;
        info!("dispatching across {workers} worker(s)");

        // Kinds the decoder must keep: configured tables plus the two
        // constant sources.
        let mut keep: HashSet<String> = self.config.feature_kinds();
        keep.insert("COMMUNE_id".to_string());
        keep.insert("SECTION_id".to_string());

        let (tx, rx) = mpsc::channel::<WorkerReport>();
        let mut report = IngestReport::default();
        let total = archives.len();
        let progress_every = match self.options.verbosity {
            0 | 1 => 100,
            2 => 10,
            _ => 1,
        };

        std::thread::scope(|scope| {
            scope.spawn(|| {
                pool.install(|| {
                    archives.par_iter().for_each_with(tx, |tx, path| {
                        let outcome = self.process(path, &sink, &journal, index, &keep);
                        // The channel only closes after this loop; a send
                        // failure means the orchestrator died.
                        let _ = tx.send(outcome);
                    });
                });
            });

            let mut done = 0usize;
            for worker_report in rx {
                done += 1;
                match worker_report {
                    WorkerReport::Loaded { path, checksum, rows, dropped } => {
                        // Journal writes happen here only, never in workers.
                        if let Err(e) = sink.record(&path.display().to_string(), &checksum) {
                            warn!("journal update failed for {}: {e}", path.display());
                        }
                        for (table, n) in rows {
                            *report.rows.entry(table).or_insert(0) += n;
                        }
                        report.dropped_features += dropped;
                        report.loaded += 1;
                    }
                    WorkerReport::Skipped { path } => {
                        info!("unchanged, skipping {}", path.display());
                        report.skipped += 1;
                    }
                    WorkerReport::Failed { path, reason, connection_lost } => {
                        error!("archive {} failed: {reason}", path.display());
                        if connection_lost {
                            self.stop.store(true, Ordering::Relaxed);
                        }
                        report.failed.push((path, reason));
                    }
                }
                if done % progress_every == 0 || done == total {
                    info!("processed {done}/{total} archives");
                }
            }
        });

        if let Err(e) = sink.finish(&self.config) {
            error!("deferred constraints failed: {e}");
            report.failed.push((self.options.source.clone(), e.to_string()));
        }

        for (table, n) in &report.rows {
            info!("{table}: {n} row(s) inserted");
        }
        info!(
            "done: {} loaded, {} skipped, {} failed, {} feature(s) dropped",
            report.loaded,
            report.skipped,
            report.failed.len(),
            report.dropped_features
        );
        Ok(report)
    }

    fn process(
        &self,
        path: &Path,
        sink: &Sink,
        journal: &HashMap<String, Vec<u8>>,
        index: Option<&'static DepartmentIndex>,
        keep: &HashSet<String>,
    ) -> WorkerReport {
        if self.stop.load(Ordering::Relaxed) {
            return WorkerReport::Failed {
                path: path.to_path_buf(),
                reason: "skipped after stop signal".to_string(),
                connection_lost: false,
            };
        }
        match self.ingest_one(path, sink, journal, index, keep) {
            Ok(Some((checksum, rows, dropped))) => WorkerReport::Loaded {
                path: path.to_path_buf(),
                checksum,
                rows,
                dropped,
            },
            Ok(None) => WorkerReport::Skipped {
                path: path.to_path_buf(),
            },
            Err(e) => WorkerReport::Failed {
                path: path.to_path_buf(),
                reason: e.to_string(),
                connection_lost: matches!(e, CadastreError::ConnectionLost),
            },
        }
    }

    /// The full C1..C9 pipeline for one archive. Returns `None` when the
    /// journal already has this content checksum.
    #[allow(clippy::type_complexity)]
    fn ingest_one(
        &self,
        path: &Path,
        sink: &Sink,
        journal: &HashMap<String, Vec<u8>>,
        index: Option<&'static DepartmentIndex>,
        keep: &HashSet<String>,
    ) -> Result<Option<(Vec<u8>, HashMap<String, u64>, usize)>> {
        let bytes = std::fs::read(path)?;
        let checksum = Sha256::digest(&bytes).to_vec();
        if journal.get(&path.display().to_string()) == Some(&checksum) {
            return Ok(None);
        }

        let bundle = SheetBundle::from_reader(bytes.as_slice())?;
        let sheet = SheetReader::from_bundle(bundle).read_filtered(|kind| keep.contains(kind))?;

        let dep = self.department(path, &sheet, index);
        let idu_of = |kind: &str| {
            sheet
                .feature_of_kind(kind)
                .and_then(|f| f.attribute("IDU"))
                .map(str::to_string)
        };
        let ctx = TransformCtx {
            millesime: self.millesime,
            dep,
            commune_id: idu_of("COMMUNE_id"),
            section_id: idu_of("SECTION_id"),
            lot: sheet.label.clone(),
        };
        let reprojector = Reprojector::new(sheet.crs.epsg(), self.options.epsg)?;

        let features_by_id: HashMap<&str, &edigeo::Feature> = sheet
            .features
            .iter()
            .map(|f| (f.id.as_str(), f))
            .collect();

        let mut inserted = HashMap::new();
        // Tables load in config order so key prerequisites land first.
        for (kind, table) in &self.config.tables {
            let rows: Vec<Row> = match table.ty {
                TableType::FeatureCollection => sheet
                    .features
                    .iter()
                    .filter(|f| f.kind == *kind)
                    .map(|f| feature_row(table, f, &ctx, &reprojector))
                    .collect::<Result<_>>()?,
                TableType::Relation => sheet
                    .relations
                    .iter()
                    .filter(|r| r.name == *kind)
                    .map(|r| relation_row(table, r, &features_by_id, &ctx))
                    .filter_map(Result::transpose)
                    .collect::<Result<_>>()?,
            };
            let n = sink.insert_rows(table, &rows)?;
            if n > 0 {
                inserted.insert(table.table.clone(), n);
            }
        }
        Ok(Some((checksum, inserted, sheet.dropped.len())))
    }

    fn department(&self, path: &Path, sheet: &Sheet, index: Option<&'static DepartmentIndex>) -> String {
        match &self.options.dep_policy {
            DepPolicy::Explicit(code) => code.clone(),
            DepPolicy::FromFilename => departments::from_filename(path).unwrap_or_else(|| {
                warn!("{}: no edigeo-<dep> prefix, using 00", path.display());
                "00".to_string()
            }),
            DepPolicy::Spatial => {
                let bbox = sheet
                    .feature_of_kind("SECTION_id")
                    .and_then(|f| f.geometry.bounding_rect());
                match (index, bbox) {
                    (Some(index), Some(bbox)) => index.resolve(bbox),
                    _ => {
                        warn!("{}: no section bbox for spatial lookup, using 00", path.display());
                        "00".to_string()
                    }
                }
            }
        }
    }
}

/// Collect the archives under `source`: the file itself, or every
/// `*.tar.bz2` in the tree, in deterministic order.
fn discover(source: &Path) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    let mut archives: Vec<PathBuf> = WalkDir::new(source)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.to_ascii_lowercase().ends_with(".tar.bz2"))
        })
        .map(walkdir::DirEntry::into_path)
        .collect();
    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_walks_recursively_and_sorts() {
        let dir = std::env::temp_dir().join(format!("cadastre-test-{}", std::process::id()));
        let sub = dir.join("38");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(dir.join("edigeo-38b.tar.bz2"), b"x").unwrap();
        std::fs::write(sub.join("edigeo-38a.TAR.BZ2"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let found = discover(&dir).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0] < found[1]);
        assert!(found.iter().all(|p| p.extension().is_some()));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn single_file_source_is_one_archive() {
        let dir = std::env::temp_dir().join(format!("cadastre-single-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("edigeo-38003.tar.bz2");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(discover(&file).unwrap(), vec![file]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn spatial_policy_requires_boundaries() {
        let options = IngestOptions {
            source: PathBuf::from("."),
            millesime: "2025-04".to_string(),
            schema: "cadastre".to_string(),
            epsg: 4326,
            workers: None,
            dep_policy: DepPolicy::Spatial,
            verbosity: 1,
            drop_schema: false,
            drop_table: false,
            departments_file: None,
        };
        let config = Config::preset("light").unwrap();
        assert!(matches!(
            Orchestrator::new(config, options),
            Err(CadastreError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn bad_millesime_fails_at_startup() {
        let options = IngestOptions {
            source: PathBuf::from("."),
            millesime: "April 2025".to_string(),
            schema: "cadastre".to_string(),
            epsg: 4326,
            workers: None,
            dep_policy: DepPolicy::FromFilename,
            verbosity: 1,
            drop_schema: false,
            drop_table: false,
            departments_file: None,
        };
        let config = Config::preset("light").unwrap();
        assert!(matches!(
            Orchestrator::new(config, options),
            Err(CadastreError::Millesime(_))
        ));
    }
}
