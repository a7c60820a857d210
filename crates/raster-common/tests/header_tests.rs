//! Tests for Header geometry and persisted-map handling.

use std::collections::BTreeMap;

use raster_common::{keys, Header, RasterError, ScalarKind};

fn header_4x3() -> Header {
    // Lower-left cell center at (1.5, 1.5), 1-unit cells.
    Header::new(4, 3, 1.5, 1.5, 1.0, -9999.0)
}

// ============================================================================
// Coordinate mapping tests
// ============================================================================

#[test]
fn test_coordinate_of_corners() {
    let h = header_4x3();
    assert_eq!(h.coordinate_of(3, 0), (1.5, 1.5));
    assert_eq!(h.coordinate_of(0, 0), (1.5, 4.5));
    assert_eq!(h.coordinate_of(0, 2), (3.5, 4.5));
}

#[test]
fn test_position_coordinate_bijection() {
    let h = header_4x3();
    for row in 0..h.rows() {
        for col in 0..h.cols() {
            let (x, y) = h.coordinate_of(row, col);
            assert_eq!(h.position_of(x, y), Some((row, col)));
        }
    }
}

#[test]
fn test_position_of_outside_extent() {
    let h = header_4x3();
    // extent is x in [1.0, 4.0), y in (1.0, 5.0]
    assert_eq!(h.position_of(0.9, 2.0), None);
    assert_eq!(h.position_of(4.0, 2.0), None);
    assert_eq!(h.position_of(2.0, 5.1), None);
    assert_eq!(h.position_of(2.0, 1.0), None);
    assert_eq!(h.position_of(f64::NAN, 2.0), None);
}

#[test]
fn test_position_of_cell_edges() {
    let h = header_4x3();
    assert_eq!(h.position_of(1.0, 5.0), Some((0, 0)));
    assert_eq!(h.position_of(3.99, 1.01), Some((3, 2)));
}

#[test]
fn test_flat_index() {
    let h = header_4x3();
    assert_eq!(h.flat_index(0, 0), Some(0));
    assert_eq!(h.flat_index(3, 2), Some(11));
    assert_eq!(h.flat_index(4, 0), None);
    assert_eq!(h.flat_index(0, 3), None);
}

// ============================================================================
// Persisted map tests
// ============================================================================

#[test]
fn test_from_maps_converts_corners() {
    let mut numeric = BTreeMap::new();
    numeric.insert(keys::NCOLS.to_string(), 3.0);
    numeric.insert(keys::NROWS.to_string(), 4.0);
    numeric.insert(keys::XLLCORNER.to_string(), 1.0);
    numeric.insert(keys::YLLCORNER.to_string(), 1.0);
    numeric.insert(keys::CELLSIZE.to_string(), 1.0);

    let h = Header::from_maps(numeric, BTreeMap::new());
    assert_eq!(h.xll(), 1.5);
    assert_eq!(h.yll(), 1.5);
    assert_eq!(h.get(keys::XLLCORNER), None);
    assert!(h.validate().is_ok());
}

#[test]
fn test_maps_round_trip_keeps_unknown_keys() {
    let mut h = header_4x3();
    h.set("PARAM_SCALE", 0.01);
    h.set_spatial_ref("EPSG:4326");
    h.set_output_kind(ScalarKind::Int16);

    let (numeric, strings) = h.clone().into_maps();
    let back = Header::from_maps(numeric, strings);
    assert_eq!(back, h);
    assert_eq!(back.get("PARAM_SCALE"), Some(0.01));
    assert_eq!(back.output_kind(), ScalarKind::Int16);
}

#[test]
fn test_serde_json_shape() {
    let h = header_4x3();
    let json = serde_json::to_value(&h).unwrap();
    assert_eq!(json["numeric"]["NROWS"], 4.0);
    assert!(json["strings"].as_object().unwrap().is_empty());
}

// ============================================================================
// Validation tests
// ============================================================================

#[test]
fn test_validate_missing_fields() {
    let mut numeric = BTreeMap::new();
    numeric.insert(keys::NCOLS.to_string(), 3.0);
    let h = Header::from_maps(numeric, BTreeMap::new());

    match h.validate() {
        Err(RasterError::HeaderIncomplete(msg)) => {
            assert!(msg.contains("NROWS"));
            assert!(msg.contains("CELLSIZE"));
        }
        other => panic!("expected HeaderIncomplete, got {:?}", other),
    }
}

#[test]
fn test_validate_rejects_zero_cellsize() {
    let h = Header::new(2, 2, 0.0, 0.0, 0.0, -9999.0);
    assert!(matches!(h.validate(), Err(RasterError::HeaderIncomplete(_))));
}

#[test]
fn test_same_geometry() {
    let a = header_4x3();
    let b = header_4x3().with_nodata(0.0);
    let c = Header::new(4, 3, 2.5, 1.5, 1.0, -9999.0);
    assert!(a.same_geometry(&b));
    assert!(!a.same_geometry(&c));
}
