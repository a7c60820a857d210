//! Raster header: the geometry and descriptive fields of a grid.
//!
//! A header is persisted as two maps, one of numeric fields and one of string
//! fields. Keys not known to this crate are carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, RasterResult};
use crate::kind::{ScalarKind, NODATA_VALUE};

/// Persisted field names.
pub mod keys {
    pub const NCOLS: &str = "NCOLS";
    pub const NROWS: &str = "NROWS";
    pub const XLLCENTER: &str = "XLLCENTER";
    pub const YLLCENTER: &str = "YLLCENTER";
    pub const XLLCORNER: &str = "XLLCORNER";
    pub const YLLCORNER: &str = "YLLCORNER";
    pub const CELLSIZE: &str = "CELLSIZE";
    pub const NODATA_VALUE: &str = "NODATA_VALUE";
    pub const LAYERS: &str = "LAYERS";
    pub const CELLSNUM: &str = "CELLSNUM";

    pub const SRS: &str = "SRS";
    pub const DATATYPE: &str = "DATATYPE";
    pub const DATATYPE_OUT: &str = "DATATYPE_OUT";
    pub const INCLUDE_NODATA: &str = "INCLUDE_NODATA";
    pub const MASK_NAME: &str = "MASK_NAME";
}

/// Geometry and metadata of a raster grid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    numeric: BTreeMap<String, f64>,
    strings: BTreeMap<String, String>,
}

impl Header {
    /// Create a single-layer header whose valid-cell count is `rows * cols`.
    pub fn new(rows: usize, cols: usize, xll: f64, yll: f64, cellsize: f64, nodata: f64) -> Self {
        let mut header = Self::default();
        header.set_dims(rows, cols);
        header.set_origin(xll, yll);
        header.set_cellsize(cellsize);
        header.set_nodata(nodata);
        header.set_layers(1);
        header.set_valid_cell_count(rows * cols);
        header
    }

    /// Build from the persisted two-map shape.
    ///
    /// Lower-left corner coordinates are converted to cell centers when no
    /// center coordinate is present.
    pub fn from_maps(numeric: BTreeMap<String, f64>, strings: BTreeMap<String, String>) -> Self {
        let mut header = Self { numeric, strings };
        let half = header.get(keys::CELLSIZE).map(|cs| cs * 0.5);
        if let Some(half) = half {
            if !header.numeric.contains_key(keys::XLLCENTER) {
                if let Some(x) = header.numeric.remove(keys::XLLCORNER) {
                    header.set(keys::XLLCENTER, x + half);
                }
            }
            if !header.numeric.contains_key(keys::YLLCENTER) {
                if let Some(y) = header.numeric.remove(keys::YLLCORNER) {
                    header.set(keys::YLLCENTER, y + half);
                }
            }
        }
        header
    }

    pub fn numeric(&self) -> &BTreeMap<String, f64> {
        &self.numeric
    }

    pub fn strings(&self) -> &BTreeMap<String, String> {
        &self.strings
    }

    pub fn into_maps(self) -> (BTreeMap<String, f64>, BTreeMap<String, String>) {
        (self.numeric, self.strings)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.numeric.get(key).copied()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.strings.get(key).map(String::as_str)
    }

    /// The single accessor through which numeric fields change.
    pub fn set(&mut self, key: &str, value: f64) {
        self.numeric.insert(key.to_string(), value);
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.strings.insert(key.to_string(), value.into());
    }

    fn get_count(&self, key: &str) -> usize {
        match self.get(key) {
            Some(v) if v > 0.0 => v as usize,
            _ => 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.get_count(keys::NROWS)
    }

    pub fn cols(&self) -> usize {
        self.get_count(keys::NCOLS)
    }

    pub fn xll(&self) -> f64 {
        self.get(keys::XLLCENTER).unwrap_or(0.0)
    }

    pub fn yll(&self) -> f64 {
        self.get(keys::YLLCENTER).unwrap_or(0.0)
    }

    pub fn cellsize(&self) -> f64 {
        self.get(keys::CELLSIZE).unwrap_or(0.0)
    }

    pub fn nodata(&self) -> f64 {
        self.get(keys::NODATA_VALUE).unwrap_or(NODATA_VALUE)
    }

    /// Layer count, at least 1.
    pub fn layers(&self) -> usize {
        self.get_count(keys::LAYERS).max(1)
    }

    /// Declared valid-cell count, `None` when unset or negative.
    pub fn valid_cell_count(&self) -> Option<usize> {
        match self.get(keys::CELLSNUM) {
            Some(v) if v >= 0.0 => Some(v as usize),
            _ => None,
        }
    }

    pub fn set_dims(&mut self, rows: usize, cols: usize) {
        self.set(keys::NROWS, rows as f64);
        self.set(keys::NCOLS, cols as f64);
    }

    pub fn set_origin(&mut self, xll: f64, yll: f64) {
        self.set(keys::XLLCENTER, xll);
        self.set(keys::YLLCENTER, yll);
    }

    pub fn set_cellsize(&mut self, cellsize: f64) {
        self.set(keys::CELLSIZE, cellsize);
    }

    pub fn set_nodata(&mut self, nodata: f64) {
        self.set(keys::NODATA_VALUE, nodata);
    }

    pub fn set_layers(&mut self, layers: usize) {
        self.set(keys::LAYERS, layers as f64);
    }

    pub fn set_valid_cell_count(&mut self, count: usize) {
        self.set(keys::CELLSNUM, count as f64);
    }

    /// Mark layer and cell counts as not yet known.
    pub fn clear_counts(&mut self) {
        self.set(keys::CELLSNUM, -1.0);
        self.set(keys::LAYERS, -1.0);
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.set_nodata(nodata);
        self
    }

    pub fn with_layers(mut self, layers: usize) -> Self {
        self.set_layers(layers);
        self
    }

    pub fn with_valid_cell_count(mut self, count: usize) -> Self {
        self.set_valid_cell_count(count);
        self
    }

    // === String fields ===

    pub fn spatial_ref(&self) -> &str {
        self.get_string(keys::SRS).unwrap_or("")
    }

    pub fn set_spatial_ref(&mut self, srs: impl Into<String>) {
        self.set_string(keys::SRS, srs);
    }

    pub fn input_kind(&self) -> ScalarKind {
        self.get_string(keys::DATATYPE)
            .map(ScalarKind::from_str)
            .unwrap_or_default()
    }

    pub fn set_input_kind(&mut self, kind: ScalarKind) {
        self.set_string(keys::DATATYPE, kind.as_str());
    }

    pub fn output_kind(&self) -> ScalarKind {
        self.get_string(keys::DATATYPE_OUT)
            .map(ScalarKind::from_str)
            .unwrap_or_default()
    }

    pub fn set_output_kind(&mut self, kind: ScalarKind) {
        self.set_string(keys::DATATYPE_OUT, kind.as_str());
    }

    /// Whether persisted payloads carry the full extent (default) or valid cells only.
    pub fn include_nodata(&self) -> bool {
        match self.get_string(keys::INCLUDE_NODATA) {
            Some(v) => {
                let v = v.trim().to_lowercase();
                v == "true" || v == "1"
            }
            None => true,
        }
    }

    pub fn set_include_nodata(&mut self, include: bool) {
        self.set_string(keys::INCLUDE_NODATA, if include { "TRUE" } else { "FALSE" });
    }

    pub fn mask_name(&self) -> Option<&str> {
        self.get_string(keys::MASK_NAME)
    }

    pub fn set_mask_name(&mut self, name: impl Into<String>) {
        self.set_string(keys::MASK_NAME, name);
    }

    // === Geometry ===

    /// Check the fields every grid needs are present and sane.
    pub fn validate(&self) -> RasterResult<()> {
        let required = [
            keys::NCOLS,
            keys::NROWS,
            keys::XLLCENTER,
            keys::YLLCENTER,
            keys::CELLSIZE,
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|k| !self.numeric.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(RasterError::header_incomplete(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        if self.rows() == 0 || self.cols() == 0 {
            return Err(RasterError::header_incomplete("rows and cols must be > 0"));
        }
        if self.cellsize() <= 0.0 {
            return Err(RasterError::header_incomplete("cellsize must be > 0"));
        }
        Ok(())
    }

    /// Number of cells in the full extent.
    pub fn len(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major offset of `(row, col)` in a full buffer.
    pub fn flat_index(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        Some(row * self.cols() + col)
    }

    /// Center coordinate of the cell at `(row, col)`. Row 0 is the top row.
    pub fn coordinate_of(&self, row: usize, col: usize) -> (f64, f64) {
        let cs = self.cellsize();
        let x = self.xll() + col as f64 * cs;
        let y = self.yll() + (self.rows() as f64 - row as f64 - 1.0) * cs;
        (x, y)
    }

    /// Cell containing the coordinate, `None` outside the extent.
    pub fn position_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let cs = self.cellsize();
        if cs <= 0.0 {
            return None;
        }
        let (xmin, ymin, xmax, ymax) = self.extent();
        if !(x >= xmin && x < xmax && y > ymin && y <= ymax) {
            return None;
        }
        let row = ((ymax - y) / cs).floor() as usize;
        let col = ((x - xmin) / cs).floor() as usize;
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        Some((row, col))
    }

    /// Outer edges as `(xmin, ymin, xmax, ymax)`.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let cs = self.cellsize();
        let xmin = self.xll() - cs * 0.5;
        let ymin = self.yll() - cs * 0.5;
        (
            xmin,
            ymin,
            xmin + cs * self.cols() as f64,
            ymin + cs * self.rows() as f64,
        )
    }

    /// Whether both headers describe the same cells.
    pub fn same_geometry(&self, other: &Header) -> bool {
        const EPS: f64 = 1e-9;
        self.rows() == other.rows()
            && self.cols() == other.cols()
            && (self.xll() - other.xll()).abs() < EPS
            && (self.yll() - other.yll()).abs() < EPS
            && (self.cellsize() - other.cellsize()).abs() < EPS
    }
}
