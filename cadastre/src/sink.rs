//! PostGIS sink: DDL synthesis, batched inserts and the incremental
//! journal.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use geozero::wkb;
use log::{debug, info, warn};
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, NoTls};

use crate::coerce::Value;
use crate::config::{Config, TableConfig};
use crate::error::{CadastreError, Result};
use crate::transform::Row;

/// Connection parameters; the CLI fills these from flags and the
/// `PG*` environment.
#[derive(Debug, Clone)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub sslmode: Option<String>,
}

impl PgParams {
    fn to_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .application_name("cadastre");
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(mode) = &self.sslmode {
            config.ssl_mode(match mode.as_str() {
                "disable" => postgres::config::SslMode::Disable,
                "require" => postgres::config::SslMode::Require,
                _ => postgres::config::SslMode::Prefer,
            });
        }
        config
    }
}

/// A small checkout pool of `postgres` clients, shared across workers.
/// Each worker holds a client only for the duration of its batches.
struct ClientPool {
    config: postgres::Config,
    idle: Mutex<Vec<Client>>,
}

impl ClientPool {
    fn new(config: postgres::Config) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> Result<Client> {
        if let Some(client) = self.idle.lock().expect("pool poisoned").pop() {
            return Ok(client);
        }
        Ok(self.config.connect(NoTls)?)
    }

    fn release(&self, client: Client) {
        self.idle.lock().expect("pool poisoned").push(client);
    }
}

/// The relational store behind one ingest run.
pub struct Sink {
    pool: ClientPool,
    schema: String,
    epsg: u32,
}

const JOURNAL_TABLE: &str = "edigeo_journal";

impl Sink {
    /// Connect and verify the store is reachable.
    pub fn connect(params: &PgParams, schema: &str, epsg: u32) -> Result<Self> {
        let sink = Self {
            pool: ClientPool::new(params.to_config()),
            schema: schema.to_string(),
            epsg,
        };
        let client = sink.pool.acquire()?;
        sink.pool.release(client);
        Ok(sink)
    }

    /// Create the schema, the configured tables, their geometry indexes
    /// and the incremental journal. Runs before any archive is processed.
    pub fn prepare(&self, config: &Config, drop_schema: bool, drop_table: bool) -> Result<()> {
        let mut client = self.pool.acquire()?;
        let schema = quote(&self.schema);
        if drop_schema {
            client.batch_execute(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))?;
        }
        client.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))?;
        for (kind, table) in &config.tables {
            debug!("preparing table {} for {kind}", table.table);
            if drop_table {
                client.batch_execute(&format!(
                    "DROP TABLE IF EXISTS {schema}.{} CASCADE",
                    quote(&table.table)
                ))?;
            }
            client.batch_execute(&self.create_table_ddl(table))?;
            if let Some(geom) = &table.geom_field {
                client.batch_execute(&format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {schema}.{} USING GIST ({})",
                    quote(&format!("{}_{}_gist", table.table, geom.name)),
                    quote(&table.table),
                    quote(&geom.name),
                ))?;
            }
        }
        client.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {schema}.{JOURNAL_TABLE} (
                archive text PRIMARY KEY,
                checksum bytea NOT NULL,
                loaded_at timestamptz NOT NULL DEFAULT now()
            )"
        ))?;
        self.pool.release(client);
        Ok(())
    }

    fn create_table_ddl(&self, table: &TableConfig) -> String {
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (",
            quote(&self.schema),
            quote(&table.table)
        );
        let mut first = true;
        let mut push = |ddl: &mut String, piece: &str| {
            if !first {
                ddl.push_str(", ");
            }
            first = false;
            ddl.push_str(piece);
        };
        if table.insert_gid {
            push(&mut ddl, "gid serial");
        }
        for field in &table.fields {
            push(&mut ddl, &format!("{} {}", quote(&field.db), field.pgtype));
        }
        if table.hash_geom {
            push(&mut ddl, "geomhash bytea");
        }
        if let Some(geom) = &table.geom_field {
            push(
                &mut ddl,
                &format!("{} geometry(Geometry, {})", quote(&geom.name), self.epsg),
            );
        }
        for constraint in &table.constraints {
            push(&mut ddl, constraint);
        }
        ddl.push(')');
        ddl
    }

    /// Batched multi-row insert with `ON CONFLICT DO NOTHING`: re-ingesting
    /// an unchanged sheet is a no-op on the declared keys. Returns the
    /// number of rows actually inserted.
    pub fn insert_rows(&self, table: &TableConfig, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        // Stay well below the wire limit on parameters per statement.
        let per_row = table.fields.len()
            + usize::from(table.hash_geom)
            + usize::from(table.geom_field.is_some());
        let chunk_rows = (60_000 / per_row.max(1)).clamp(1, 200);

        let mut inserted = 0;
        let mut client = self.pool.acquire()?;
        for chunk in rows.chunks(chunk_rows) {
            match self.insert_chunk(&mut client, table, chunk) {
                Ok(n) => inserted += n,
                // One retry with backoff after a dropped connection.
                Err(CadastreError::ConnectionLost) => {
                    warn!("connection lost, retrying batch for {}", table.table);
                    std::thread::sleep(Duration::from_millis(500));
                    client = self.pool.acquire()?;
                    inserted += self.insert_chunk(&mut client, table, chunk)?;
                }
                Err(e) => return Err(e),
            }
        }
        self.pool.release(client);
        Ok(inserted)
    }

    fn insert_chunk(&self, client: &mut Client, table: &TableConfig, rows: &[Row]) -> Result<u64> {
        let mut sql = format!(
            "INSERT INTO {}.{} (",
            quote(&self.schema),
            quote(&table.table)
        );
        for (i, field) in table.fields.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&quote(&field.db));
        }
        if table.hash_geom {
            sql.push_str(", geomhash");
        }
        if let Some(geom) = &table.geom_field {
            let _ = write!(sql, ", {}", quote(&geom.name));
        }
        sql.push_str(") VALUES ");

        let mut params: Vec<Box<dyn ToSql + Sync>> = Vec::new();
        for (r, row) in rows.iter().enumerate() {
            if r > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (i, (value, field)) in row.values.iter().zip(&table.fields).enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                params.push(param(value, &field.pgtype));
                let _ = write!(sql, "${}", params.len());
            }
            if table.hash_geom {
                params.push(Box::new(row.geomhash.clone()));
                let _ = write!(sql, ", ${}", params.len());
            }
            if table.geom_field.is_some() {
                params.push(Box::new(row.geometry.clone().map(wkb::Encode)));
                let _ = write!(sql, ", ST_SetSRID(${}, {})", params.len(), self.epsg);
            }
            sql.push(')');
        }
        sql.push_str(" ON CONFLICT DO NOTHING");

        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(Box::as_ref).collect();
        client
            .execute(sql.as_str(), &refs)
            .map_err(|e| self.classify(&table.table, e))
    }

    fn classify(&self, table: &str, error: postgres::Error) -> CadastreError {
        if error.is_closed() {
            return CadastreError::ConnectionLost;
        }
        if error.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            return CadastreError::SinkConflict(table.to_string());
        }
        CadastreError::Sink(error)
    }

    /// Read the whole incremental journal: archive path -> checksum.
    pub fn journal(&self) -> Result<HashMap<String, Vec<u8>>> {
        let mut client = self.pool.acquire()?;
        let rows = client.query(
            format!(
                "SELECT archive, checksum FROM {}.{JOURNAL_TABLE}",
                quote(&self.schema)
            )
            .as_str(),
            &[],
        )?;
        self.pool.release(client);
        Ok(rows
            .into_iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect())
    }

    /// Record the checksum of a successfully loaded archive.
    pub fn record(&self, archive: &str, checksum: &[u8]) -> Result<()> {
        let mut client = self.pool.acquire()?;
        client.execute(
            format!(
                "INSERT INTO {}.{JOURNAL_TABLE} (archive, checksum) VALUES ($1, $2)
                 ON CONFLICT (archive) DO UPDATE
                 SET checksum = EXCLUDED.checksum, loaded_at = now()",
                quote(&self.schema)
            )
            .as_str(),
            &[&archive, &checksum],
        )?;
        self.pool.release(client);
        Ok(())
    }

    /// Deferred statements (foreign keys) run strictly after all archives
    /// completed; `$schema$` is substituted with the target schema.
    pub fn finish(&self, config: &Config) -> Result<()> {
        let mut client = self.pool.acquire()?;
        for (_, table) in &config.tables {
            for statement in &table.fk_constraints {
                let statement = statement.replace("$schema$", &self.schema);
                info!("applying deferred constraint on {}", table.table);
                // Re-runs hit already-existing constraints; that is fine.
                if let Err(e) = client.batch_execute(&statement) {
                    if e.code() == Some(&SqlState::DUPLICATE_OBJECT) {
                        debug!("constraint already present on {}", table.table);
                    } else {
                        return Err(self.classify(&table.table, e));
                    }
                }
            }
        }
        self.pool.release(client);
        Ok(())
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn param(value: &Value, pgtype: &str) -> Box<dyn ToSql + Sync> {
    let ty = pgtype.to_ascii_lowercase();
    let family = ty.split_whitespace().next().unwrap_or("text");
    match value {
        Value::Null => null_param(family),
        Value::Int(i) => match family {
            "smallint" | "int2" => Box::new(Some(*i as i16)),
            "bigint" | "int8" => Box::new(Some(*i)),
            "real" | "float4" | "double" | "float8" => Box::new(Some(*i as f64)),
            "integer" | "int4" | "int" => Box::new(Some(*i as i32)),
            _ => Box::new(Some(i.to_string())),
        },
        Value::Float(f) => match family {
            "real" | "float4" => Box::new(Some(*f as f32)),
            _ => Box::new(Some(*f)),
        },
        Value::Date(d) => Box::new(Some(*d)),
        Value::Text(t) => Box::new(Some(t.clone())),
    }
}

fn null_param(family: &str) -> Box<dyn ToSql + Sync> {
    match family {
        "smallint" | "int2" => Box::new(None::<i16>),
        "bigint" | "int8" => Box::new(None::<i64>),
        "integer" | "int4" | "int" => Box::new(None::<i32>),
        "real" | "float4" => Box::new(None::<f32>),
        "double" | "float8" => Box::new(None::<f64>),
        "date" => Box::new(None::<NaiveDate>),
        _ => Box::new(None::<String>),
    }
}
