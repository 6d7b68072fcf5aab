//! Table-mapping configuration.
//!
//! The config is a JSON object whose top-level keys are EDIGEO object
//! kinds (`PARCELLE_id`, ...) or relation names (`NUMVOIE_PARCELLE`).
//! Declaration order matters: the sink creates and fills tables in config
//! order so foreign-key prerequisites land before their dependents.

use serde::Deserialize;

use crate::coerce::Coercion;
use crate::error::{CadastreError, Result};

/// `FeatureCollection` tables are fed from decoded features, `relation`
/// tables from the semantic links between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TableType {
    FeatureCollection,
    #[serde(rename = "relation")]
    Relation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeomField {
    pub name: String,
}

/// One target column.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    /// Target column name
    pub db: String,
    /// Source attribute name (upper-cased EDIGEO attribute)
    #[serde(default)]
    pub json: Option<String>,
    /// Constant key: `millesime`, `dep`, `commune_id`, `section_id`, `lot`
    #[serde(default, rename = "const")]
    pub constant: Option<String>,
    /// Coercions, composed left-to-right
    #[serde(default)]
    pub functions: Vec<String>,
    /// Target SQL type, copied verbatim into the DDL; may carry
    /// `not null`, which turns failed coercions into errors
    pub pgtype: String,
    /// For relation tables: the FeatureCollection table the key refers
    /// to. Must name a configured table; the reference itself resolves
    /// by natural key.
    #[serde(default, rename = "tableSource")]
    pub table_source: Option<String>,
}

impl FieldConfig {
    pub fn coercions(&self) -> Result<Vec<Coercion>> {
        self.functions.iter().map(|n| Coercion::parse(n)).collect()
    }

    pub fn not_null(&self) -> bool {
        self.pgtype.to_ascii_lowercase().contains("not null")
    }
}

/// Mapping of one object kind (or relation) to one target table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    #[serde(rename = "type")]
    pub ty: TableType,
    pub table: String,
    #[serde(default, rename = "geomField")]
    pub geom_field: Option<GeomField>,
    #[serde(default, rename = "insertGid")]
    pub insert_gid: bool,
    #[serde(default, rename = "hashGeom")]
    pub hash_geom: bool,
    pub fields: Vec<FieldConfig>,
    /// Constraint clauses appended verbatim to CREATE TABLE
    #[serde(default, rename = "pgCONSTRAINT")]
    pub constraints: Vec<String>,
    /// Deferred statements run after all archives, `$schema$` substituted
    #[serde(default, rename = "pgFkCONSTRAINT")]
    pub fk_constraints: Vec<String>,
}

/// The whole config: `(kind, table)` pairs in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub tables: Vec<(String, TableConfig)>,
}

impl Config {
    /// Parse and statically validate a config document.
    pub fn from_json(json: &str) -> Result<Self> {
        let invalid = |msg: String| CadastreError::ConfigInvalid(msg);
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| invalid(format!("not valid JSON: {e}")))?;
        let serde_json::Value::Object(map) = value else {
            return Err(invalid("top level must be an object".to_string()));
        };
        let mut tables = Vec::with_capacity(map.len());
        for (kind, entry) in map {
            let table: TableConfig = serde_json::from_value(entry)
                .map_err(|e| invalid(format!("`{kind}`: {e}")))?;
            tables.push((kind, table));
        }
        let config = Self { tables };
        config.validate()?;
        Ok(config)
    }

    /// Load one of the built-in presets.
    pub fn preset(name: &str) -> Result<Self> {
        let json = match name {
            "full" => include_str!("../presets/full.json"),
            "light" => include_str!("../presets/light.json"),
            "bati" => include_str!("../presets/bati.json"),
            other => {
                return Err(CadastreError::ConfigInvalid(format!(
                    "unknown preset `{other}` (expected full, light or bati)"
                )))
            }
        };
        Self::from_json(json)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| CadastreError::ConfigInvalid(msg);
        if self.tables.is_empty() {
            return Err(invalid("config declares no tables".to_string()));
        }
        let declared: std::collections::HashSet<&str> =
            self.tables.iter().map(|(_, t)| t.table.as_str()).collect();
        for (kind, table) in &self.tables {
            if table.table.is_empty() {
                return Err(invalid(format!("`{kind}`: empty table name")));
            }
            let mut seen = std::collections::HashSet::new();
            for field in &table.fields {
                if !seen.insert(field.db.as_str()) {
                    return Err(invalid(format!(
                        "`{kind}`: duplicate column `{}`",
                        field.db
                    )));
                }
                if field.json.is_some() && field.constant.is_some() {
                    return Err(invalid(format!(
                        "`{kind}`.`{}`: both json and const given",
                        field.db
                    )));
                }
                // Unknown coercion names are a config error, caught now.
                field
                    .coercions()
                    .map_err(|e| invalid(format!("`{kind}`.`{}`: {e}", field.db)))?;
                if let Some(source) = &field.table_source {
                    if !declared.contains(source.as_str()) {
                        return Err(invalid(format!(
                            "`{kind}`.`{}`: tableSource `{source}` is not a configured table",
                            field.db
                        )));
                    }
                }
            }
            if table.ty == TableType::Relation && table.geom_field.is_some() {
                return Err(invalid(format!(
                    "`{kind}`: relation tables carry no geometry"
                )));
            }
        }
        Ok(())
    }

    /// Object kinds fed into FeatureCollection tables.
    pub fn feature_kinds(&self) -> std::collections::HashSet<String> {
        self.tables
            .iter()
            .filter(|(_, t)| t.ty == TableType::FeatureCollection)
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub fn get(&self, kind: &str) -> Option<&TableConfig> {
        self.tables
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, t)| t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_and_validate() {
        for preset in ["full", "light", "bati"] {
            let config = Config::preset(preset).unwrap();
            assert!(!config.tables.is_empty(), "preset {preset}");
        }
    }

    #[test]
    fn bati_preset_is_communes_and_buildings_only() {
        let config = Config::preset("bati").unwrap();
        let kinds = config.feature_kinds();
        assert!(kinds.contains("COMMUNE_id"));
        assert!(kinds.contains("BATIMENT_id"));
        assert!(!kinds.contains("PARCELLE_id"));
    }

    #[test]
    fn declaration_order_is_preserved() {
        let config = Config::preset("full").unwrap();
        let first = &config.tables[0].0;
        assert_eq!(first, "COMMUNE_id", "communes must load before dependents");
    }

    #[test]
    fn unknown_coercion_is_a_config_error() {
        let json = r#"{"X_id": {"type": "FeatureCollection", "table": "t",
            "fields": [{"db": "a", "json": "A", "functions": ["toRoman"], "pgtype": "text"}]}}"#;
        assert!(matches!(
            Config::from_json(json),
            Err(CadastreError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn table_source_must_name_a_configured_table() {
        let json = r#"{"X_PARCELLE": {"type": "relation", "table": "t",
            "fields": [{"db": "parcelle_id", "json": "target", "pgtype": "varchar(14)",
                        "tableSource": "edi_parcelle"}]}}"#;
        assert!(matches!(
            Config::from_json(json),
            Err(CadastreError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn duplicate_column_is_a_config_error() {
        let json = r#"{"X_id": {"type": "FeatureCollection", "table": "t",
            "fields": [{"db": "a", "json": "A", "pgtype": "text"},
                       {"db": "a", "json": "B", "pgtype": "text"}]}}"#;
        assert!(Config::from_json(json).is_err());
    }
}
