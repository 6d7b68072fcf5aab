use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, LevelFilter};

use cadastre::{Config, DepPolicy, IngestOptions, Orchestrator, PgParams};

/// Load EDIGEO cadastre archives into a PostGIS schema.
#[derive(Parser)]
#[command(name = "cadastre", version, about)]
struct Cli {
    /// Directory tree walked for *.tar.bz2 archives, or a single archive
    source: PathBuf,

    /// Release date of the cadastre drop, YYYY-MM; its year is the millésime
    millesime: String,

    /// Target schema
    #[arg(long, default_value = "cadastre")]
    schema: String,

    /// Output EPSG for all geometry columns (4326 or 3857)
    #[arg(long, default_value_t = 4326)]
    epsg: u32,

    /// Worker count, capped at the host CPU count [default: CPU count]
    #[arg(long)]
    workers: Option<usize>,

    /// Department policy: `auto` (spatial lookup), `fromFile` (archive
    /// name), or a literal two-character code
    #[arg(long, default_value = "fromFile")]
    dep: String,

    /// Department boundary GeoJSON, needed with `--dep auto`
    #[arg(long)]
    departments: Option<PathBuf>,

    /// Verbosity, 0 (errors) to 3 (trace)
    #[arg(short, long, default_value_t = 1)]
    verbose: u8,

    /// Drop the whole target schema before loading
    #[arg(long)]
    drop_schema: bool,

    /// Drop the configured tables before loading
    #[arg(long)]
    drop_table: bool,

    /// Built-in table preset
    #[arg(long, default_value = "full", conflicts_with = "config")]
    preset: String,

    /// Explicit table config path, instead of a preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database host
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    host: String,

    /// Database port
    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    port: u16,

    /// Database name
    #[arg(long, env = "PGDATABASE", default_value = "cadastre")]
    database: String,

    /// Database user
    #[arg(long, env = "PGUSER", default_value = "postgres")]
    user: String,

    /// Database password
    #[arg(long, env = "PGPASSWORD")]
    password: Option<String>,

    /// TLS mode: disable, prefer or require
    #[arg(long, env = "PGSSLMODE")]
    ssl: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> cadastre::Result<bool> {
    let config = match &cli.config {
        Some(path) => Config::from_json(&std::fs::read_to_string(path)?)?,
        None => Config::preset(&cli.preset)?,
    };

    let dep_policy = match cli.dep.as_str() {
        "auto" => DepPolicy::Spatial,
        "fromFile" => DepPolicy::FromFilename,
        code => DepPolicy::Explicit(code.to_string()),
    };

    let options = IngestOptions {
        source: cli.source,
        millesime: cli.millesime,
        schema: cli.schema,
        epsg: cli.epsg,
        workers: cli.workers,
        dep_policy,
        verbosity: cli.verbose,
        drop_schema: cli.drop_schema,
        drop_table: cli.drop_table,
        departments_file: cli.departments,
    };
    let pg = PgParams {
        host: cli.host,
        port: cli.port,
        dbname: cli.database,
        user: cli.user,
        password: cli.password,
        sslmode: cli.ssl,
    };

    let orchestrator = Orchestrator::new(config, options)?;
    let report = orchestrator.run(&pg)?;
    Ok(report.success())
}
