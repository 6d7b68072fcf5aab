use edigeo::{SheetBundle, SheetReader};
use geo_types::Geometry;

fn rec(tag: &str, value: &str) -> String {
    format!("{tag}SA{:02}:{value}\n", value.len().min(99))
}

fn scd() -> String {
    let mut s = String::new();
    for kind in ["COMMUNE_id", "PARCELLE_id", "NUMVOIE_id"] {
        s += &rec("RTY", "OBJ");
        s += &rec("RID", kind);
    }
    for (att, ty) in [("IDU", "T"), ("TEX", "T"), ("SUPF", "N")] {
        s += &rec("RTY", "ATT");
        s += &rec("RID", att);
        s += &rec("TYP", ty);
    }
    s
}

fn vec_file() -> String {
    let mut v = String::new();
    // Street-number label point.
    v += &rec("RTY", "PNO");
    v += &rec("RID", "Nod_01");
    v += &rec("COR", "+10.0;+20.0;");
    // Parcel boundary: two arcs closing a 4x3 rectangle.
    v += &rec("RTY", "PAR");
    v += &rec("RID", "Arc_01");
    v += &rec("PTC", "3");
    v += &rec("COR", "+0.0;+0.0;");
    v += &rec("COR", "+4.0;+0.0;");
    v += &rec("COR", "+4.0;+3.0;");
    v += &rec("RTY", "PAR");
    v += &rec("RID", "Arc_02");
    v += &rec("PTC", "3");
    v += &rec("COR", "+4.0;+3.0;");
    v += &rec("COR", "+0.0;+3.0;");
    v += &rec("COR", "+0.0;+0.0;");
    v += &rec("RTY", "PFE");
    v += &rec("RID", "Fac_01");
    // Parcel object with attributes.
    v += &rec("RTY", "FEA");
    v += &rec("RID", "Obj_01");
    v += &rec("SCP", "SeSD;Ob_E_1;OBJ;PARCELLE_id");
    v += &rec("ATP", "SeSD;Ob_E_1;ATT;IDU");
    v += &rec("ATV", "0010000A0012");
    v += &rec("ATP", "SeSD;Ob_E_1;ATT;SUPF");
    v += &rec("ATV", "1234");
    // Street-number object.
    v += &rec("RTY", "FEA");
    v += &rec("RID", "Obj_02");
    v += &rec("SCP", "SeSD;Ob_E_1;OBJ;NUMVOIE_id");
    v += &rec("ATP", "SeSD;Ob_E_1;ATT;TEX");
    v += &rec("ATV", "12bis");
    // Face composition links.
    v += &rec("RTY", "LNK");
    v += &rec("RID", "Lnk_01");
    v += &rec("SCP", "SeSD;Ob_E_1;REL;ID_S_RCO_FAC_ARC");
    v += &rec("FTP", "SeT1;VEC;PFE;Fac_01");
    v += &rec("FTP", "SeT1;VEC;PAR;Arc_01");
    v += &rec("FTP", "SeT1;VEC;PAR;Arc_02");
    // Geometry attachments.
    v += &rec("RTY", "LNK");
    v += &rec("RID", "Lnk_02");
    v += &rec("SCP", "SeSD;Ob_E_1;REL;ID_S_RCO_OBJ_FAC");
    v += &rec("FTP", "SeT1;VEC;FEA;Obj_01");
    v += &rec("FTP", "SeT1;VEC;PFE;Fac_01");
    v += &rec("RTY", "LNK");
    v += &rec("RID", "Lnk_03");
    v += &rec("SCP", "SeSD;Ob_E_1;REL;ID_S_RCO_OBJ_NOD");
    v += &rec("FTP", "SeT1;VEC;FEA;Obj_02");
    v += &rec("FTP", "SeT1;VEC;PNO;Nod_01");
    // Semantic relation between the two objects.
    v += &rec("RTY", "LNK");
    v += &rec("RID", "Lnk_04");
    v += &rec("SCP", "SeSD;Ob_E_1;ASS;NUMVOIE_PARCELLE");
    v += &rec("FTP", "SeT1;VEC;FEA;Obj_02");
    v += &rec("FTP", "SeT1;VEC;FEA;Obj_01");
    v
}

fn bundle() -> SheetBundle {
    SheetBundle {
        thf: rec("LON", "EDAB01"),
        scd: scd(),
        geo: rec("RTY", "GEO") + &rec("REL", "LAMB93"),
        qal: None,
        vec: vec![("T1.VEC".to_string(), vec_file())],
    }
}

#[test]
fn decodes_a_whole_sheet() {
    let sheet = SheetReader::from_bundle(bundle()).read().unwrap();

    assert_eq!(sheet.label.as_deref(), Some("EDAB01"));
    assert_eq!(sheet.crs.epsg(), 2154);
    assert!(sheet.schema.kinds.contains("PARCELLE_id"));
    assert!(sheet.dropped.is_empty());
    assert_eq!(sheet.features.len(), 2);

    let parcel = sheet.feature_of_kind("PARCELLE_id").unwrap();
    assert_eq!(parcel.attribute("IDU"), Some("0010000A0012"));
    assert_eq!(parcel.attribute("SUPF"), Some("1234"));
    match &parcel.geometry {
        Geometry::Polygon(p) => {
            assert_eq!(p.exterior().0.len(), 5);
            assert_eq!(p.interiors().len(), 0);
        }
        other => panic!("expected Polygon, got {other:?}"),
    }

    let numvoie = sheet.feature_of_kind("NUMVOIE_id").unwrap();
    assert_eq!(numvoie.attribute("TEX"), Some("12bis"));
    assert!(matches!(numvoie.geometry, Geometry::Point(_)));

    assert_eq!(sheet.relations.len(), 1);
    let relation = &sheet.relations[0];
    assert_eq!(relation.name, "NUMVOIE_PARCELLE");
    assert_eq!(relation.source, "Obj_02");
    assert_eq!(relation.target, "Obj_01");
}

#[test]
fn kind_filter_discards_before_assembly() {
    let sheet = SheetReader::from_bundle(bundle())
        .read_filtered(|kind| kind == "NUMVOIE_id")
        .unwrap();
    assert_eq!(sheet.features.len(), 1);
    assert_eq!(sheet.features[0].kind, "NUMVOIE_id");
}

#[test]
fn arc_referencing_missing_node_rejects_the_sheet() {
    let mut b = bundle();
    let mut extra = String::new();
    extra += &rec("RTY", "PAR");
    extra += &rec("RID", "Arc_03");
    extra += &rec("COR", "+0.0;+9.0;");
    extra += &rec("COR", "+1.0;+9.0;");
    extra += &rec("FTP", "SeT1;VEC;PNO;Nod_99");
    b.vec[0].1 += &extra;
    assert!(matches!(
        SheetReader::from_bundle(b).read(),
        Err(edigeo::Error::PrimitiveMissing { kind: "node", .. })
    ));
}

#[test]
fn unresolved_primitive_drops_the_feature() {
    let mut b = bundle();
    // Make the face reference an arc that does not exist.
    b.vec[0].1 = b.vec[0].1.replace("PAR;Arc_02", "PAR;Arc_99");
    let sheet = SheetReader::from_bundle(b).read().unwrap();
    assert_eq!(sheet.features.len(), 1);
    assert_eq!(sheet.dropped.len(), 1);
    assert_eq!(sheet.dropped[0].kind, "PARCELLE_id");
}
