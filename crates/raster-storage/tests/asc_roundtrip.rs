//! ASCII grid file tests, from single files up to split and merge through disk.

use raster_common::{RasterError, ScalarKind};
use raster_core::{CombineOptions, GridOptions, RasterGrid};
use raster_storage::{
    load_subset_files, read_full_grid, read_grid, read_mask, read_mask_with_subsets, write_combined,
    write_full_grid, write_grid, write_subsets, GridPath, WriteOptions,
};
use test_utils::{
    asc, assert_approx_eq, create_test_grid, demo_grid_r4c3, demo_mask_r3c3, demo_mask_r4c7, unit_header,
    FixtureDir,
};

#[test]
fn test_write_then_read_reproduces_grid() {
    let fixtures = FixtureDir::new();
    let (header, values) = demo_grid_r4c3();
    let path = fixtures.path("out/grid.asc");

    write_full_grid(&path, &header, &values, &WriteOptions::default()).unwrap();
    let read = read_full_grid::<f32>(&path).unwrap();

    assert_eq!(read.header.rows(), 4);
    assert_eq!(read.header.cols(), 3);
    assert_eq!(read.header.xll(), header.xll());
    assert_eq!(read.header.yll(), header.yll());
    assert_eq!(read.header.nodata(), -9999.0);
    assert_eq!(read.values, values);

    let before = RasterGrid::from_full_buffer(header, values, None, GridOptions::compressed()).unwrap();
    let after = read_grid::<f32>(&path, None, GridOptions::compressed()).unwrap();
    assert_eq!(after.valid_cell_count(), before.valid_cell_count());
    for row in 0..4 {
        for col in 0..3 {
            assert_eq!(after.value_at(row, col), before.value_at(row, col));
        }
    }
}

#[test]
fn test_corner_header_masked_by_file_mask() {
    let fixtures = FixtureDir::new();
    let grid_path = fixtures.write("grid.asc", asc::SMALL_CORNER);
    let (mask_header, mask_values) = demo_mask_r3c3();
    let mask_path = fixtures.path("basin.asc");
    write_full_grid(&mask_path, &mask_header, &mask_values, &WriteOptions::default()).unwrap();

    let mask = read_mask(&mask_path).unwrap();
    assert_eq!(mask.name(), Some("basin"));

    let grid = read_grid::<f32>(&grid_path, Some(mask), GridOptions::compressed()).unwrap();
    assert_eq!(grid.header().xll(), 1.5);
    assert_eq!(grid.valid_cell_count(), 3);
    assert_approx_eq!(grid.minimum(), 3.0);
    assert_approx_eq!(grid.maximum(), 5.0);
    assert_approx_eq!(grid.average(), 4.0);
}

#[test]
fn test_malformed_files() {
    let fixtures = FixtureDir::new();

    let short = fixtures.write("short.asc", asc::SHORT_VALUES);
    assert!(matches!(
        read_full_grid::<f32>(&short),
        Err(RasterError::InvalidArgument(_))
    ));

    let no_cellsize = fixtures.write("no_cellsize.asc", asc::MISSING_CELLSIZE);
    assert!(matches!(
        read_full_grid::<f32>(&no_cellsize),
        Err(RasterError::HeaderIncomplete(_))
    ));

    assert!(matches!(
        read_full_grid::<f32>(fixtures.path("missing.asc")),
        Err(RasterError::Io(_))
    ));
}

#[test]
fn test_nodata_outside_target_kind() {
    let fixtures = FixtureDir::new();
    let path = fixtures.write("tiny.asc", asc::TINY_CENTER);

    // -1 does not fit u8, so no-data cells move to 255
    let read = read_full_grid::<u8>(&path).unwrap();
    assert_eq!(read.header.nodata(), 255.0);
    assert_eq!(read.values, vec![1, 2, 255, 4]);
}

#[test]
fn test_output_kind_conversion() {
    let fixtures = FixtureDir::new();
    let header = unit_header(1, 3);

    let path = fixtures.path("as_u8.asc");
    let options = WriteOptions::default().with_output_kind(ScalarKind::UInt8);
    write_full_grid(&path, &header, &[1.7f32, -9999.0, 200.0], &options).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("NODATA_VALUE 255"));
    assert!(text.ends_with("1 255 200\n"));

    let err = write_full_grid(fixtures.path("bad.asc"), &header, &[1.0f32, 300.0, 400.0], &options).unwrap_err();
    assert!(matches!(
        err,
        RasterError::TypeConversionOverflow {
            kind: ScalarKind::UInt8,
            count: 2
        }
    ));
    assert!(!fixtures.path("bad.asc").exists());
}

#[test]
fn test_write_grid_splits_layers() {
    let fixtures = FixtureDir::new();
    let header = unit_header(2, 2);
    let grid = RasterGrid::from_layers(
        vec![(header.clone(), vec![1.0f64, 2.0, 3.0, 4.0]), (header, vec![5.0, 6.0, 7.0, 8.0])],
        None,
        GridOptions::default(),
    )
    .unwrap();

    let written = write_grid(&grid, fixtures.path("multi.asc"), &WriteOptions::default()).unwrap();
    assert_eq!(written, vec![fixtures.path("multi_1.asc"), fixtures.path("multi_2.asc")]);
    assert_eq!(read_full_grid::<f64>(&written[1]).unwrap().values, vec![5.0, 6.0, 7.0, 8.0]);

    let valid_only = WriteOptions::default().with_valid_cells_only(true);
    assert!(write_grid(&grid, fixtures.path("x.asc"), &valid_only).is_err());
}

#[test]
fn test_decompose_and_combine_through_files() {
    let fixtures = FixtureDir::new();
    let (mask_header, mask_values) = demo_mask_r4c7();
    let mask_path = fixtures.path("mask.asc");
    write_full_grid(&mask_path, &mask_header, &mask_values, &WriteOptions::default()).unwrap();

    let original = create_test_grid(7, 4);
    let input_path = fixtures.path("values.asc");
    write_full_grid(&input_path, &unit_header(4, 7), &original, &WriteOptions::default()).unwrap();

    // split
    let mask = read_mask_with_subsets(&mask_path, None).unwrap();
    let grid = read_grid::<f32>(&input_path, Some(mask.clone()), GridOptions::default()).unwrap();
    let out = fixtures.path("parts/values.asc");
    let files = write_subsets(&grid, &out, &CombineOptions::from_origin(), &WriteOptions::default()).unwrap();

    assert_eq!(files.len(), 4);
    assert_eq!(files[1], GridPath::subset_path(&out, 2, None));
    let two = read_full_grid::<f32>(&files[1]).unwrap();
    assert_eq!((two.header.rows(), two.header.cols()), (3, 2));
    assert_eq!(two.header.xll(), 2.5);
    assert_eq!(two.header.yll(), 0.5);

    // merge
    let mut target =
        RasterGrid::from_mask_values(mask.clone(), vec![-9999.0f64; mask.valid_count()], -9999.0).unwrap();
    let loaded = load_subset_files(&mut target, &files).unwrap();
    assert_eq!(loaded, vec![1, 2, 3, 4]);

    let combined = write_combined(&target, &out, &CombineOptions::default(), &WriteOptions::default()).unwrap();
    assert_eq!(combined, vec![fixtures.path("parts/0_values.asc")]);

    let merged = read_full_grid::<f32>(&combined[0]).unwrap();
    for (i, &m) in mask_values.iter().enumerate() {
        if m == -9999 {
            assert_eq!(merged.values[i], -9999.0, "cell {}", i);
        } else {
            assert_eq!(merged.values[i], original[i], "cell {}", i);
        }
    }
}
