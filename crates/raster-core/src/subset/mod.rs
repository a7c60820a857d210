//! Subsets: groups of a grid's valid cells with their own bounding box.
//!
//! A subset refers back to its parent through `global_indices` (storage
//! slots of the parent) and carries `local_positions` relative to its own
//! bounding box, so it can be written, processed and read back on its own.

mod combine;
mod partition;

pub use combine::{CombineOptions, GridBuffer, ReclassMap};

use std::collections::BTreeMap;
use std::sync::Arc;

use raster_common::{Header, RasterError, RasterResult};

use crate::position::CellPos;

/// Key a subset is grouped under.
pub type GroupId = i32;

/// Where a grid's subsets came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum SubsetOrigin {
    #[default]
    None,
    /// `build_subsets` with this grouping.
    Built(Option<BTreeMap<i32, GroupId>>),
    /// Carried over from a mask.
    Mask,
}

/// Per-cell values set on a subset independently of its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum SubsetPayload {
    Single(Vec<f64>),
    /// Indexed `[cell][layer]`.
    Layered(Vec<Vec<f64>>),
}

impl SubsetPayload {
    pub fn layers(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Layered(cells) => cells.first().map(Vec::len).unwrap_or(1),
        }
    }

    /// Value of `cell` in the 0-based `layer`.
    pub fn get(&self, cell: usize, layer: usize) -> Option<f64> {
        match self {
            Self::Single(values) if layer == 0 => values.get(cell).copied(),
            Self::Single(_) => None,
            Self::Layered(cells) => cells.get(cell).and_then(|c| c.get(layer)).copied(),
        }
    }
}

/// One group's worth of a grid's valid cells.
#[derive(Debug)]
pub struct Subset {
    group_id: GroupId,
    /// Whether this subset takes part in output and combination.
    pub usable: bool,
    row_span: (usize, usize),
    col_span: (usize, usize),
    layers: Option<usize>,
    global_indices: Arc<[usize]>,
    local_positions: Arc<[CellPos]>,
    payload: Option<SubsetPayload>,
}

impl Subset {
    /// Build a subset from parent storage slots and their parent positions.
    ///
    /// `positions[i]` is the parent position of `global_indices[i]`. Returns
    /// `None` for an empty group.
    pub fn from_cells(
        group_id: GroupId,
        global_indices: Vec<usize>,
        positions: &[CellPos],
    ) -> Option<Self> {
        debug_assert_eq!(global_indices.len(), positions.len());
        let first = positions.first()?;
        let (mut min_row, mut max_row) = (first.0, first.0);
        let (mut min_col, mut max_col) = (first.1, first.1);
        for &(row, col) in positions {
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
        }

        let local_positions: Vec<CellPos> = positions
            .iter()
            .map(|&(row, col)| (row - min_row, col - min_col))
            .collect();

        Some(Self {
            group_id,
            usable: true,
            row_span: (min_row, max_row),
            col_span: (min_col, max_col),
            layers: None,
            global_indices: global_indices.into(),
            local_positions: local_positions.into(),
            payload: None,
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Inclusive `(min, max)` parent rows.
    pub fn row_span(&self) -> (usize, usize) {
        self.row_span
    }

    /// Inclusive `(min, max)` parent columns.
    pub fn col_span(&self) -> (usize, usize) {
        self.col_span
    }

    pub fn rows(&self) -> usize {
        self.row_span.1 - self.row_span.0 + 1
    }

    pub fn cols(&self) -> usize {
        self.col_span.1 - self.col_span.0 + 1
    }

    pub fn n_cells(&self) -> usize {
        self.global_indices.len()
    }

    /// Layer count of the payload, once known.
    pub fn layers(&self) -> Option<usize> {
        self.layers
    }

    pub(crate) fn set_layers(&mut self, layers: Option<usize>) {
        self.layers = layers;
    }

    pub fn global_indices(&self) -> &[usize] {
        &self.global_indices
    }

    pub fn local_positions(&self) -> &[CellPos] {
        &self.local_positions
    }

    pub fn payload(&self) -> Option<&SubsetPayload> {
        self.payload.as_ref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Copy with independently owned arrays.
    pub fn clone_deep(&self) -> Self {
        Self {
            group_id: self.group_id,
            usable: self.usable,
            row_span: self.row_span,
            col_span: self.col_span,
            layers: self.layers,
            global_indices: self.global_indices.to_vec().into(),
            local_positions: self.local_positions.to_vec().into(),
            payload: self.payload.clone(),
        }
    }

    /// Copy sharing the index arrays with `self`.
    pub fn clone_shared(&self) -> Self {
        Self {
            group_id: self.group_id,
            usable: self.usable,
            row_span: self.row_span,
            col_span: self.col_span,
            layers: self.layers,
            global_indices: Arc::clone(&self.global_indices),
            local_positions: Arc::clone(&self.local_positions),
            payload: self.payload.clone(),
        }
    }

    pub fn shares_indices_with(&self, other: &Subset) -> bool {
        Arc::ptr_eq(&self.global_indices, &other.global_indices)
            && Arc::ptr_eq(&self.local_positions, &other.local_positions)
    }

    /// Set a single-layer payload, one value per subset cell.
    pub fn set_payload(&mut self, values: Vec<f64>) -> RasterResult<()> {
        if values.len() != self.n_cells() {
            return Err(RasterError::invalid_argument(format!(
                "subset {} expects {} values, got {}",
                self.group_id,
                self.n_cells(),
                values.len()
            )));
        }
        self.payload = Some(SubsetPayload::Single(values));
        self.layers = Some(1);
        self.usable = true;
        Ok(())
    }

    /// Set a payload indexed `[cell][layer]`.
    pub fn set_payload_2d(&mut self, values: Vec<Vec<f64>>) -> RasterResult<()> {
        if values.len() != self.n_cells() {
            return Err(RasterError::invalid_argument(format!(
                "subset {} expects {} cells, got {}",
                self.group_id,
                self.n_cells(),
                values.len()
            )));
        }
        let layers = values.first().map(Vec::len).unwrap_or(0);
        if layers == 0 || values.iter().any(|cell| cell.len() != layers) {
            return Err(RasterError::invalid_argument(
                "every cell must carry the same non-zero number of layers",
            ));
        }
        self.payload = Some(if layers == 1 {
            SubsetPayload::Single(values.into_iter().map(|cell| cell[0]).collect())
        } else {
            SubsetPayload::Layered(values)
        });
        self.layers = Some(layers);
        self.usable = true;
        Ok(())
    }

    /// Load an interleaved buffer (`[cell * layers + layer]`) covering either
    /// the subset cells only or the whole bounding box.
    pub fn load_payload(&mut self, values: &[f64], layers: usize) -> RasterResult<()> {
        if layers == 0 {
            return Err(RasterError::invalid_argument("layers must be > 0"));
        }
        let n = self.n_cells();
        let bbox_len = self.rows() * self.cols();

        let offsets: Vec<usize> = if values.len() == n * layers {
            (0..n).map(|i| i * layers).collect()
        } else if values.len() == bbox_len * layers {
            let cols = self.cols();
            self.local_positions
                .iter()
                .map(|&(row, col)| (row * cols + col) * layers)
                .collect()
        } else {
            return Err(RasterError::invalid_argument(format!(
                "subset {}: {} values fit neither {} cells nor a {}x{} box",
                self.group_id,
                values.len(),
                n,
                self.rows(),
                self.cols()
            )));
        };

        let payload = if layers == 1 {
            SubsetPayload::Single(offsets.iter().map(|&start| values[start]).collect())
        } else {
            SubsetPayload::Layered(
                offsets
                    .iter()
                    .map(|&start| values[start..start + layers].to_vec())
                    .collect(),
            )
        };

        self.payload = Some(payload);
        self.layers = Some(layers);
        self.usable = true;
        Ok(())
    }

    pub fn clear_payload(&mut self) {
        self.payload = None;
    }

    /// Header scoped to this subset's bounding box within `parent`.
    ///
    /// Layer and cell counts are left unset until a buffer is produced.
    pub fn header(&self, parent: &Header, nodata: f64) -> Header {
        let cs = parent.cellsize();
        let mut header = parent.clone();
        header.set_dims(self.rows(), self.cols());
        header.set_origin(
            parent.xll() + self.col_span.0 as f64 * cs,
            parent.yll() + (parent.rows() as f64 - self.row_span.1 as f64 - 1.0) * cs,
        );
        header.set_nodata(nodata);
        header.clear_counts();
        header
    }

    /// The payload as one bounding-box-sized buffer per layer.
    pub fn output(&self, nodata: f64) -> RasterResult<Vec<Vec<f64>>> {
        let payload = self.payload.as_ref().ok_or_else(|| {
            RasterError::not_initialized(format!("subset {} has no payload", self.group_id))
        })?;
        let cols = self.cols();
        let layers = payload.layers();
        let mut out = vec![vec![nodata; self.rows() * cols]; layers];
        for (i, &(row, col)) in self.local_positions.iter().enumerate() {
            for (layer, buffer) in out.iter_mut().enumerate() {
                if let Some(v) = payload.get(i, layer) {
                    buffer[row * cols + col] = v;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subset() -> Subset {
        // Parent cells (1,2), (2,2), (2,3) stored at slots 4, 7, 8.
        Subset::from_cells(5, vec![4, 7, 8], &[(1, 2), (2, 2), (2, 3)]).unwrap()
    }

    #[test]
    fn test_from_cells_bbox() {
        let s = subset();
        assert_eq!(s.row_span(), (1, 2));
        assert_eq!(s.col_span(), (2, 3));
        assert_eq!((s.rows(), s.cols()), (2, 2));
        assert_eq!(s.local_positions(), &[(0, 0), (1, 0), (1, 1)]);
        assert!(s.usable);
        assert!(Subset::from_cells(1, vec![], &[]).is_none());
    }

    #[test]
    fn test_clone_ownership() {
        let s = subset();
        assert!(s.clone_shared().shares_indices_with(&s));
        assert!(!s.clone_deep().shares_indices_with(&s));
    }

    #[test]
    fn test_set_payload_checks_length() {
        let mut s = subset();
        assert!(s.set_payload(vec![1.0, 2.0]).is_err());
        s.set_payload(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s.layers(), Some(1));
    }

    #[test]
    fn test_load_payload_from_bbox() {
        let mut s = subset();
        // 2x2 box, (0,1) is not part of the subset
        s.load_payload(&[1.0, -9999.0, 2.0, 3.0], 1).unwrap();
        assert_eq!(s.payload(), Some(&SubsetPayload::Single(vec![1.0, 2.0, 3.0])));

        let out = s.output(-9999.0).unwrap();
        assert_eq!(out, vec![vec![1.0, -9999.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_load_payload_layered() {
        let mut s = subset();
        s.load_payload(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0], 2).unwrap();
        assert_eq!(s.layers(), Some(2));
        assert_eq!(s.payload().unwrap().get(2, 1), Some(30.0));
        assert!(s.load_payload(&[1.0; 5], 2).is_err());
    }

    #[test]
    fn test_header_is_bbox_scoped() {
        let parent = Header::new(4, 7, 0.5, 0.5, 1.0, -9999.0);
        let h = subset().header(&parent, -1.0);
        assert_eq!((h.rows(), h.cols()), (2, 2));
        assert_eq!(h.xll(), 2.5);
        assert_eq!(h.yll(), 1.5);
        assert_eq!(h.nodata(), -1.0);
        assert_eq!(h.valid_cell_count(), None);
    }
}
