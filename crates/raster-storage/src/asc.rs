//! Plain-text ASCII grid files.
//!
//! ```text
//! NCOLS 3
//! NROWS 2
//! XLLCENTER 0.5        (or XLLCORNER 0.0)
//! YLLCENTER 0.5        (or YLLCORNER 0.0)
//! CELLSIZE 1
//! NODATA_VALUE -9999
//! 1 2 3
//! 4 5 -9999
//! ```
//!
//! Header keys are case-insensitive. Row 0 is the top row.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use raster_common::{keys, Header, RasterError, RasterResult, ScalarKind, NODATA_VALUE};
use raster_core::RasterScalar;
use tracing::{debug, instrument};

use crate::codec::{cast_values, convert_to_kind};

/// Six header lines plus at least one row of values.
const MIN_LINES: usize = 7;

/// A grid as read from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct FullGrid<T> {
    pub header: Header,
    /// Row-major, `rows * cols` values.
    pub values: Vec<T>,
    /// Kind of the values as stored in the file.
    pub kind: ScalarKind,
    pub spatial_ref: String,
}

/// Options recognized by [`write_full_grid`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Convert to this kind before writing. `None` keeps the grid's own kind.
    pub output_kind: Option<ScalarKind>,
    /// Recorded in the header's `SRS` field by backends that persist it.
    pub spatial_ref: Option<String>,
    /// Persist stored cells only instead of the full extent. Only the blob
    /// backend supports this.
    pub valid_cells_only: bool,
}

impl WriteOptions {
    pub fn with_output_kind(mut self, kind: ScalarKind) -> Self {
        self.output_kind = Some(kind);
        self
    }

    pub fn with_spatial_ref(mut self, srs: impl Into<String>) -> Self {
        self.spatial_ref = Some(srs.into());
        self
    }

    pub fn with_valid_cells_only(mut self, valid_cells_only: bool) -> Self {
        self.valid_cells_only = valid_cells_only;
        self
    }
}

/// Parse ASCII grid text into a header and raw values.
pub fn parse_asc(text: &str) -> RasterResult<(Header, Vec<f64>)> {
    let line_count = text.lines().filter(|l| !l.trim().is_empty()).count();
    if line_count < MIN_LINES {
        return Err(RasterError::header_incomplete(format!(
            "expected at least {} lines, found {}",
            MIN_LINES, line_count
        )));
    }

    let mut numeric = BTreeMap::new();
    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
    while let Some(&line) = lines.peek() {
        let mut tokens = line.split_whitespace();
        let key = match tokens.next() {
            Some(k) if k.starts_with(|c: char| c.is_ascii_alphabetic()) => k.to_uppercase(),
            _ => break,
        };
        let value: f64 = tokens
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RasterError::header_incomplete(format!("no value for {}", key)))?;
        numeric.insert(key, value);
        lines.next();
    }

    let mut header = Header::from_maps(numeric, BTreeMap::new());
    header.validate()?;
    if header.get(keys::NODATA_VALUE).is_none() {
        header.set_nodata(NODATA_VALUE);
    }
    header.set_layers(1);

    let values = lines
        .flat_map(str::split_whitespace)
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| RasterError::invalid_argument(format!("bad cell value {:?}", token)))
        })
        .collect::<RasterResult<Vec<f64>>>()?;

    if values.len() != header.len() {
        return Err(RasterError::invalid_argument(format!(
            "expected {} values for a {}x{} grid, found {}",
            header.len(),
            header.rows(),
            header.cols(),
            values.len()
        )));
    }
    header.set_valid_cell_count(values.len());
    Ok((header, values))
}

/// Read an ASCII grid file and convert its values to `T`.
///
/// When the file's no-data does not fit `T`, no-data cells take `T`'s
/// default no-data and the header is updated to match.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_full_grid<T: RasterScalar>(path: impl AsRef<Path>) -> RasterResult<FullGrid<T>> {
    let text = fs::read_to_string(path.as_ref())?;
    let (mut header, raw) = parse_asc(&text)?;
    let (values, nodata) = cast_values::<T>(&raw, header.nodata())?;
    header.set_nodata(nodata.as_f64());
    header.set_input_kind(ScalarKind::Float64);
    debug!(rows = header.rows(), cols = header.cols(), "Read ASCII grid");

    Ok(FullGrid {
        spatial_ref: header.spatial_ref().to_string(),
        header,
        values,
        kind: ScalarKind::Float64,
    })
}

/// Render a full-extent grid as ASCII grid text.
pub fn format_asc<T: RasterScalar>(header: &Header, values: &[T], options: &WriteOptions) -> RasterResult<String> {
    if values.len() != header.len() {
        return Err(RasterError::invalid_argument(format!(
            "expected {} values for a {}x{} grid, got {}",
            header.len(),
            header.rows(),
            header.cols(),
            values.len()
        )));
    }
    let kind = options.output_kind.unwrap_or(T::KIND);
    let raw: Vec<f64> = values.iter().map(|v| v.as_f64()).collect();
    let converted = convert_to_kind(&raw, header.nodata(), kind)?;

    let mut out = String::with_capacity(values.len() * 8);
    let _ = writeln!(out, "{} {}", keys::NCOLS, header.cols());
    let _ = writeln!(out, "{} {}", keys::NROWS, header.rows());
    let _ = writeln!(out, "{} {}", keys::XLLCENTER, header.xll());
    let _ = writeln!(out, "{} {}", keys::YLLCENTER, header.yll());
    let _ = writeln!(out, "{} {}", keys::CELLSIZE, header.cellsize());
    let _ = writeln!(out, "{} {}", keys::NODATA_VALUE, converted.nodata);

    for row in converted.values.chunks(header.cols()) {
        let line: Vec<String> = row
            .iter()
            .map(|&v| format_cell(v, converted.nodata, kind))
            .collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    Ok(out)
}

fn format_cell(value: f64, nodata: f64, kind: ScalarKind) -> String {
    if value == nodata || kind != ScalarKind::Float32 {
        value.to_string()
    } else {
        (value as f32).to_string()
    }
}

/// Write a full-extent grid, creating parent directories.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn write_full_grid<T: RasterScalar>(
    path: impl AsRef<Path>,
    header: &Header,
    values: &[T],
    options: &WriteOptions,
) -> RasterResult<()> {
    let path = path.as_ref();
    let text = format_asc(header, values, options)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, text)?;
    debug!(rows = header.rows(), cols = header.cols(), "Wrote ASCII grid");
    Ok(())
}
