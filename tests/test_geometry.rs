use std::io::Write;
use tempfile::Builder;

use sarflood::core::geometry::{load_roi, RoiConstruction};
use sarflood::io::shapes::read_shapes;
use sarflood::FloodError;

const ROI_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    { "type": "Feature", "properties": { "id": 1 },
      "geometry": { "type": "Polygon", "coordinates": [[[16.0, 48.0], [16.2, 48.0], [16.1, 48.05], [16.0, 48.0]]] } },
    { "type": "Feature", "properties": { "id": 2 },
      "geometry": { "type": "Point", "coordinates": [16.1, 48.2] } }
  ]
}"#;

fn vector_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(".geojson").tempfile().expect("temp file");
    file.write_all(content.as_bytes()).expect("write vector file");
    file.flush().expect("flush vector file");
    file
}

#[test]
fn test_vertices_of_all_records_are_pooled() {
    sarflood::init();
    let file = vector_file(ROI_GEOJSON);

    let shapes = read_shapes(file.path()).unwrap();
    assert_eq!(shapes.len(), 2);
    assert_eq!(shapes[0].points.len(), 4);
    assert_eq!(shapes[1].points, vec![(16.1, 48.2)]);

    let roi = load_roi(file.path(), RoiConstruction::ConvexHull).unwrap();
    assert_eq!(roi.vertices(), &[(16.0, 48.0), (16.2, 48.0), (16.1, 48.2)]);
    assert_eq!(roi.to_wkt(), "POLYGON ((16 48, 16.2 48, 16.1 48.2, 16 48))");
}

#[test]
fn test_point_order_follows_the_file() {
    sarflood::init();
    let file = vector_file(ROI_GEOJSON);
    let roi = load_roi(file.path(), RoiConstruction::PointOrder).unwrap();
    assert_eq!(roi.vertices(), &[(16.0, 48.0), (16.2, 48.0), (16.1, 48.05), (16.0, 48.0), (16.1, 48.2)]);
    assert!(roi.to_wkt().ends_with("16.1 48.2, 16 48))"));
}

#[test]
fn test_unreadable_inputs() {
    sarflood::init();
    let missing = load_roi("/nonexistent/area.shp", RoiConstruction::ConvexHull).unwrap_err();
    assert!(matches!(missing, FloodError::GeometryRead { .. }));

    let empty = vector_file(r#"{ "type": "FeatureCollection", "features": [] }"#);
    let err = load_roi(empty.path(), RoiConstruction::ConvexHull).unwrap_err();
    match err {
        FloodError::GeometryRead { path, .. } => assert_eq!(path, empty.path()),
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_roi_mode_names() {
    assert_eq!("convex-hull".parse::<RoiConstruction>().unwrap(), RoiConstruction::ConvexHull);
    assert_eq!("point-order".parse::<RoiConstruction>().unwrap(), RoiConstruction::PointOrder);
    assert!("hull".parse::<RoiConstruction>().is_err());
}
