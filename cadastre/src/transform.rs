//! Schema-driven transform of decoded features into table rows.

use std::collections::HashMap;

use edigeo::{Feature, Relation};
use geo_types::Geometry;
use log::debug;

use crate::coerce::{apply_all, CoercionCtx, Value};
use crate::config::TableConfig;
use crate::error::{CadastreError, Result};
use crate::geomhash::geometry_hash;
use crate::proj::Reprojector;

/// Per-archive context: the coercion inputs plus the constant table.
/// `commune_id` and `section_id` are the IDUs of the sheet's COMMUNE and
/// SECTION features, extracted by the orchestrator from the decoded set.
#[derive(Debug, Default)]
pub struct TransformCtx {
    pub millesime: i32,
    pub dep: String,
    pub commune_id: Option<String>,
    pub section_id: Option<String>,
    /// Sheet label (THF support descriptor)
    pub lot: Option<String>,
}

impl TransformCtx {
    fn coercion(&self) -> CoercionCtx<'_> {
        CoercionCtx {
            millesime: self.millesime,
            dep: &self.dep,
        }
    }

    fn constant(&self, key: &str) -> Value {
        match key {
            "millesime" => Value::Int(i64::from(self.millesime)),
            "dep" => Value::Text(self.dep.clone()),
            "commune_id" => text_or_null(self.commune_id.as_deref()),
            "section_id" => text_or_null(self.section_id.as_deref()),
            "lot" => text_or_null(self.lot.as_deref()),
            other => {
                debug!("unknown constant `{other}`");
                Value::Null
            }
        }
    }
}

fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

/// One row ready for the sink: plain column values in field order, plus
/// the optional geometry column and its digest.
#[derive(Debug)]
pub struct Row {
    pub values: Vec<Value>,
    pub geometry: Option<Geometry<f64>>,
    pub geomhash: Option<Vec<u8>>,
}

fn field_values(table: &TableConfig, source: impl Fn(&str) -> Value, ctx: &TransformCtx) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(table.fields.len());
    for field in &table.fields {
        let raw = match (&field.json, &field.constant) {
            (Some(attr), _) => source(&attr.to_ascii_uppercase()),
            (None, Some(key)) => ctx.constant(key),
            (None, None) => Value::Null,
        };
        let value = apply_all(&field.coercions()?, raw.clone(), ctx.coercion());
        if value.is_null() && field.not_null() {
            return Err(CadastreError::CoercionFailed {
                column: field.db.clone(),
                value: match raw {
                    Value::Text(t) => t,
                    other => format!("{other:?}"),
                },
            });
        }
        values.push(value);
    }
    Ok(values)
}

/// Transform one feature into a row of its configured table.
pub fn feature_row(
    table: &TableConfig,
    feature: &Feature,
    ctx: &TransformCtx,
    reprojector: &Reprojector,
) -> Result<Row> {
    let values = field_values(table, |name| text_or_null(feature.attribute(name)), ctx)?;
    let geometry = if table.geom_field.is_some() {
        Some(reprojector.reproject(&feature.geometry)?)
    } else {
        None
    };
    let geomhash = match (&geometry, table.hash_geom) {
        (Some(g), true) => Some(geometry_hash(g)),
        _ => None,
    };
    Ok(Row {
        values,
        geometry,
        geomhash,
    })
}

/// Transform one semantic link into a row of a relation table.
///
/// The `json` selector `source`/`target` resolves to the endpoint's IDU
/// (its sheet-local id when the kind has none); `source_<attr>` and
/// `target_<attr>` reach any endpoint attribute. A link whose endpoint
/// was dropped during decoding yields no row, which keeps the declared
/// foreign keys satisfiable.
pub fn relation_row(
    table: &TableConfig,
    relation: &Relation,
    features_by_id: &HashMap<&str, &Feature>,
    ctx: &TransformCtx,
) -> Result<Option<Row>> {
    let Some(source) = features_by_id.get(relation.source.as_str()) else {
        debug!("relation {}: source `{}` not decoded", relation.name, relation.source);
        return Ok(None);
    };
    let Some(target) = features_by_id.get(relation.target.as_str()) else {
        debug!("relation {}: target `{}` not decoded", relation.name, relation.target);
        return Ok(None);
    };
    let key = |feature: &Feature| {
        feature
            .attribute("IDU")
            .map_or_else(|| feature.id.clone(), str::to_string)
    };
    let mut pair: HashMap<String, String> = HashMap::from([
        ("SOURCE".to_string(), key(source)),
        ("TARGET".to_string(), key(target)),
    ]);
    for (role, feature) in [("SOURCE", source), ("TARGET", target)] {
        for (name, value) in &feature.attributes {
            pair.insert(format!("{role}_{name}"), value.clone());
        }
    }
    let values = field_values(
        table,
        |name| text_or_null(pair.get(name).map(String::as_str)),
        ctx,
    )?;
    Ok(Some(Row {
        values,
        geometry: None,
        geomhash: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;

    fn ctx() -> TransformCtx {
        TransformCtx {
            millesime: 2025,
            dep: "38".to_string(),
            commune_id: Some("380030000".to_string()),
            section_id: Some("380030000A".to_string()),
            lot: Some("EDAB01".to_string()),
        }
    }

    fn table(json: &str) -> TableConfig {
        serde_json::from_str(json).unwrap()
    }

    fn parcel() -> Feature {
        Feature {
            kind: "PARCELLE_id".to_string(),
            id: "Obj_01".to_string(),
            attributes: HashMap::from([
                ("IDU".to_string(), "0030000A0012".to_string()),
                ("SUPF".to_string(), "0042".to_string()),
            ]),
            geometry: Geometry::Point(Point::new(700_000.0, 6_600_000.0)),
        }
    }

    #[test]
    fn maps_attributes_constants_and_coercions() {
        let table = table(
            r#"{"type": "FeatureCollection", "table": "edi_parcelle",
                "geomField": {"name": "geom"}, "hashGeom": true,
                "fields": [
                  {"db": "idu", "json": "IDU", "functions": ["addDep"], "pgtype": "varchar(14) not null"},
                  {"db": "supf", "json": "SUPF", "functions": ["toInt"], "pgtype": "integer"},
                  {"db": "commune_id", "const": "commune_id", "functions": ["addDep"], "pgtype": "varchar(11)"},
                  {"db": "millesime", "functions": ["addMillesime"], "pgtype": "smallint"}
                ]}"#,
        );
        let reprojector = Reprojector::new(2154, 4326).unwrap();
        let row = feature_row(&table, &parcel(), &ctx(), &reprojector).unwrap();
        assert_eq!(row.values[0], Value::Text("380030000A0012".to_string()));
        assert_eq!(row.values[1], Value::Int(42));
        assert_eq!(row.values[2], Value::Text("38380030000".to_string()));
        assert_eq!(row.values[3], Value::Int(2025));
        let Some(Geometry::Point(p)) = row.geometry else {
            panic!("expected reprojected point");
        };
        assert!((p.x() - 3.0).abs() < 1e-6);
        assert_eq!(row.geomhash.as_ref().map(Vec::len), Some(32));
    }

    #[test]
    fn non_nullable_coercion_failure_is_an_error() {
        let table = table(
            r#"{"type": "FeatureCollection", "table": "t",
                "fields": [{"db": "supf", "json": "SUPF", "functions": ["toInt"],
                            "pgtype": "integer not null"}]}"#,
        );
        let mut feature = parcel();
        feature
            .attributes
            .insert("SUPF".to_string(), "not a number".to_string());
        let reprojector = Reprojector::new(2154, 2154).unwrap();
        assert!(matches!(
            feature_row(&table, &feature, &ctx(), &reprojector),
            Err(CadastreError::CoercionFailed { .. })
        ));
    }

    #[test]
    fn relation_rows_use_endpoint_idus() {
        let table = table(
            r#"{"type": "relation", "table": "edi_numvoie_parcelle",
                "fields": [
                  {"db": "numvoie_id", "json": "source", "functions": ["addDep"], "pgtype": "varchar(14)"},
                  {"db": "numvoie_tex", "json": "source_tex", "pgtype": "varchar(20)"},
                  {"db": "parcelle_id", "json": "target", "functions": ["addDep"], "pgtype": "varchar(14)"},
                  {"db": "millesime", "functions": ["addMillesime"], "pgtype": "smallint"}
                ]}"#,
        );
        let parcel = parcel();
        let mut numvoie = parcel.clone();
        numvoie.id = "Obj_02".to_string();
        numvoie.attributes.insert("IDU".to_string(), "V0001".to_string());
        numvoie.attributes.insert("TEX".to_string(), "12bis".to_string());
        let by_id: HashMap<&str, &Feature> =
            HashMap::from([("Obj_01", &parcel), ("Obj_02", &numvoie)]);
        let relation = Relation {
            name: "NUMVOIE_PARCELLE".to_string(),
            source: "Obj_02".to_string(),
            target: "Obj_01".to_string(),
        };
        let row = relation_row(&table, &relation, &by_id, &ctx()).unwrap().unwrap();
        assert_eq!(row.values[0], Value::Text("38V0001".to_string()));
        assert_eq!(row.values[1], Value::Text("12bis".to_string()));
        assert_eq!(row.values[2], Value::Text("380030000A0012".to_string()));

        // A link to a dropped feature yields no row.
        let dangling = Relation {
            name: "NUMVOIE_PARCELLE".to_string(),
            source: "Obj_99".to_string(),
            target: "Obj_01".to_string(),
        };
        assert!(relation_row(&table, &dangling, &by_id, &ctx()).unwrap().is_none());
    }
}
