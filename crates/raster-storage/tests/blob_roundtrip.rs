//! Blob backend tests against an in-memory object store.

use bytes::Bytes;
use raster_common::{keys, Header, RasterError, ScalarKind};
use raster_core::{GridOptions, RasterGrid};
use raster_storage::{
    load_grid_blob, store_grid_blob, BlobBackend, ObjectStoreBackend, StringFilter, WriteOptions,
};
use test_utils::{create_grid_with_nodata, create_test_grid, demo_mask_r4c7, unit_header};

#[tokio::test]
async fn test_full_extent_with_output_kind() {
    let backend = ObjectStoreBackend::in_memory();
    let (header, values) = create_grid_with_nodata(2, 3, 7.9, &[(1, 1)]);
    let grid = RasterGrid::from_full_buffer(header, values, None, GridOptions::default()).unwrap();

    let options = WriteOptions::default()
        .with_output_kind(ScalarKind::Int16)
        .with_spatial_ref("EPSG:32650");
    store_grid_blob(&backend, "grids/soil", &grid, &options).await.unwrap();

    let record = backend.get("grids/soil", &StringFilter::new()).await.unwrap();
    assert_eq!(record.data.len(), 6 * 2);
    assert_eq!(record.header.output_kind(), ScalarKind::Int16);
    assert_eq!(record.header.input_kind(), ScalarKind::Float32);
    assert_eq!(record.header.spatial_ref(), "EPSG:32650");
    assert!(record.header.include_nodata());

    let loaded = load_grid_blob::<f32>(&backend, "grids/soil", None, GridOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded.value_at(0, 0), 7.0);
    assert_eq!(loaded.value_at(1, 1), -9999.0);
    assert_eq!(loaded.header().spatial_ref(), "EPSG:32650");
}

#[tokio::test]
async fn test_valid_cells_only_needs_mask() {
    let backend = ObjectStoreBackend::in_memory();
    let (mask_header, mask_values) = demo_mask_r4c7();
    let mask = RasterGrid::from_full_buffer(mask_header, mask_values, None, GridOptions::compressed())
        .unwrap()
        .to_named_mask("demo")
        .unwrap();

    let grid = RasterGrid::from_full_buffer(
        unit_header(4, 7),
        create_test_grid(7, 4),
        Some(mask.clone()),
        GridOptions::compressed(),
    )
    .unwrap();
    assert_eq!(grid.valid_cell_count(), 20);

    let options = WriteOptions::default().with_valid_cells_only(true);
    store_grid_blob(&backend, "valid", &grid, &options).await.unwrap();

    let record = backend.get("valid", &StringFilter::new()).await.unwrap();
    assert_eq!(record.header.valid_cell_count(), Some(20));
    assert_eq!(record.data.len(), 20 * 4);

    let err = load_grid_blob::<f32>(&backend, "valid", None, GridOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RasterError::NotInitialized(_)));

    let loaded = load_grid_blob::<f32>(&backend, "valid", Some(mask), GridOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded.valid_cell_count(), 20);
    for i in 0..20 {
        assert_eq!(loaded.value_at_index(i), grid.value_at_index(i));
    }
}

#[tokio::test]
async fn test_multi_layer_round_trip() {
    let backend = ObjectStoreBackend::in_memory();
    let header = unit_header(2, 3);
    let first = create_test_grid(3, 2);
    let second: Vec<f32> = first.iter().map(|v| v * 2.0).collect();
    let grid = RasterGrid::from_layers(
        vec![(header.clone(), first), (header, second)],
        None,
        GridOptions::default(),
    )
    .unwrap();

    store_grid_blob(&backend, "layers", &grid, &WriteOptions::default()).await.unwrap();
    let record = backend.get("layers", &StringFilter::new()).await.unwrap();
    assert_eq!(record.header.layers(), 2);
    assert_eq!(record.data.len(), 6 * 2 * 4);

    let loaded = load_grid_blob::<f32>(&backend, "layers", None, GridOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded.layers(), 2);
    assert_eq!(loaded.values_at(1, 2), vec![2001.0, 4002.0]);
}

#[tokio::test]
async fn test_nodata_resubstituted_for_narrow_kind() {
    let backend = ObjectStoreBackend::in_memory();
    let (header, values) = create_grid_with_nodata(2, 2, 12.0, &[(0, 1)]);
    let grid = RasterGrid::from_full_buffer(header, values, None, GridOptions::default()).unwrap();

    let options = WriteOptions::default().with_output_kind(ScalarKind::UInt8);
    store_grid_blob(&backend, "narrow", &grid, &options).await.unwrap();

    let loaded = load_grid_blob::<u8>(&backend, "narrow", None, GridOptions::compressed())
        .await
        .unwrap();
    assert_eq!(loaded.no_data(), 255);
    assert_eq!(loaded.valid_cell_count(), 3);
    assert_eq!(loaded.value_at(1, 1), 12);
}

#[tokio::test]
async fn test_put_requires_known_output_kind() {
    let backend = ObjectStoreBackend::in_memory();
    let header = Header::new(1, 2, 0.5, 0.5, 1.0, -9999.0);
    let err = backend
        .put("raw", Bytes::from_static(&[0; 8]), &header)
        .await
        .unwrap_err();
    assert!(matches!(err, RasterError::UnknownKind(_)));

    let mut typed = header.clone();
    typed.set_string(keys::DATATYPE_OUT, "FLOAT");
    backend.put("raw", Bytes::from_static(&[0; 8]), &typed).await.unwrap();
    assert!(backend.exists("raw").await.unwrap());
}
