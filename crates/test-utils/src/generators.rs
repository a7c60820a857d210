//! Test data generators with known layouts.
//!
//! Every generator returns a `(Header, values)` pair in row-major order,
//! row 0 at the top, ready for `RasterGrid::from_full_buffer`.

use raster_common::Header;

/// No-data used by all generated grids.
pub const TEST_NODATA: f64 = -9999.0;

const ND: i32 = -9999;

/// Creates a test grid with predictable values.
///
/// Each cell value is `col * 1000 + row`, so `grid[row * width + col]` can be
/// checked directly.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0);  // col=1, row=0
/// assert_eq!(grid[10], 1.0);    // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Header of a `rows x cols` grid with unit cells and its lower-left cell
/// centered at `(0.5, 0.5)`.
pub fn unit_header(rows: usize, cols: usize) -> Header {
    Header::new(rows, cols, 0.5, 0.5, 1.0, TEST_NODATA)
}

/// Creates a grid of `value` with no-data at the given `(row, col)` cells.
pub fn create_grid_with_nodata(
    rows: usize,
    cols: usize,
    value: f32,
    nodata_positions: &[(usize, usize)],
) -> (Header, Vec<f32>) {
    let mut data = vec![value; rows * cols];
    for &(row, col) in nodata_positions {
        if row < rows && col < cols {
            data[row * cols + col] = TEST_NODATA as f32;
        }
    }
    (unit_header(rows, cols), data)
}

/// A 4x7 mask with four groups and 20 valid cells.
///
/// ```text
/// 1 . . . . . 3
/// 1 1 2 2 3 . .
/// 1 1 1 2 3 4 4
/// 1 . 2 3 3 3 4
/// ```
pub fn demo_mask_r4c7() -> (Header, Vec<i32>) {
    #[rustfmt::skip]
    let values = vec![
        1, ND, ND, ND, ND, ND, 3,
        1, 1,  2,  2,  3,  ND, ND,
        1, 1,  1,  2,  3,  4,  4,
        1, ND, 2,  3,  3,  3,  4,
    ];
    (unit_header(4, 7), values)
}

/// A 4x3 grid whose only valid cells are the first row: 3, 4, 5.
pub fn demo_grid_r4c3() -> (Header, Vec<f32>) {
    let nd = TEST_NODATA as f32;
    #[rustfmt::skip]
    let values = vec![
        3.0, 4.0, 5.0,
        nd,  nd,  nd,
        nd,  nd,  nd,
        nd,  nd,  nd,
    ];
    (Header::new(4, 3, 1.5, 1.5, 1.0, TEST_NODATA), values)
}

/// A 3x3 all-ones mask covering rows 0-2 of [`demo_grid_r4c3`].
pub fn demo_mask_r3c3() -> (Header, Vec<i32>) {
    (Header::new(3, 3, 1.5, 2.5, 1.0, TEST_NODATA), vec![1; 9])
}
