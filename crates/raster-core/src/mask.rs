//! Masking and compression engine.
//!
//! Reconciles a grid's cells against the valid footprint of a [`Mask`], or,
//! without a mask, compresses the grid to its own valid cells.

use std::collections::BTreeMap;
use std::sync::Arc;

use raster_common::{Header, RasterError, RasterResult};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::grid::{CellStorage, RasterGrid};
use crate::position::{CellPos, PositionIndex};
use crate::scalar::RasterScalar;
use crate::subset::{GroupId, Subset, SubsetOrigin};

/// The valid footprint of a grid, used read-only to mask other grids.
#[derive(Debug)]
pub struct Mask {
    name: Option<String>,
    header: Header,
    positions: Arc<[CellPos]>,
    subsets: BTreeMap<GroupId, Subset>,
}

impl Mask {
    /// `positions` must be unique, row-major sorted and inside `header`.
    pub fn new(
        name: Option<String>,
        mut header: Header,
        positions: Arc<[CellPos]>,
        subsets: BTreeMap<GroupId, Subset>,
    ) -> RasterResult<Self> {
        if let Some(pair) = positions.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(RasterError::invalid_argument(format!(
                "mask positions must be unique and row-major sorted, found {:?} before {:?}",
                pair[0], pair[1]
            )));
        }
        if let Some(&(row, col)) = positions.last() {
            let outside = positions
                .iter()
                .any(|&(r, c)| r >= header.rows() || c >= header.cols());
            if outside {
                return Err(RasterError::out_of_range(format!(
                    "mask positions up to ({}, {}) exceed a {}x{} header",
                    row,
                    col,
                    header.rows(),
                    header.cols()
                )));
            }
        }
        header.set_valid_cell_count(positions.len());
        if let Some(name) = &name {
            header.set_mask_name(name.as_str());
        }
        Ok(Self {
            name,
            header,
            positions,
            subsets,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn valid_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &Arc<[CellPos]> {
        &self.positions
    }

    /// Cell-center coordinate of the mask's `idx`-th valid cell.
    pub fn coordinate_of(&self, idx: usize) -> Option<(f64, f64)> {
        self.positions
            .get(idx)
            .map(|&(row, col)| self.header.coordinate_of(row, col))
    }

    pub fn subsets(&self) -> &BTreeMap<GroupId, Subset> {
        &self.subsets
    }

    pub fn has_subsets(&self) -> bool {
        !self.subsets.is_empty()
    }
}

/// What reconciliation did to a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Storage left as it was.
    Unchanged,
    /// Compressed to the grid's own valid cells.
    SelfCompressed,
    /// Reshaped to a mask's footprint.
    Masked {
        match_exactly: bool,
        within_extent: bool,
    },
    /// No valid cell of the mask hits a valid cell of the grid; the grid
    /// storage has been emptied.
    NoOverlap,
}

/// How the result of a mask scan is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentPolicy {
    /// Compute a fresh, owned position index.
    pub recalc_pos: bool,
    /// Shrink the header to the bounding box of matched cells.
    pub update_rowcol: bool,
    /// Store a full `rows * cols` buffer without a position index.
    pub store_fullsize: bool,
}

impl ExtentPolicy {
    pub fn decide(use_mask_extent: bool, within_extent: bool, calc_pos: bool, match_exactly: bool) -> Self {
        if use_mask_extent || within_extent {
            Self {
                recalc_pos: calc_pos && !match_exactly,
                update_rowcol: false,
                store_fullsize: false,
            }
        } else {
            Self {
                recalc_pos: calc_pos,
                update_rowcol: true,
                store_fullsize: !calc_pos,
            }
        }
    }
}

/// Inclusive bounding box in mask rows and columns.
#[derive(Debug, Clone, Copy)]
struct BoundingBox {
    min_row: usize,
    max_row: usize,
    min_col: usize,
    max_col: usize,
}

impl BoundingBox {
    fn at((row, col): CellPos) -> Self {
        Self {
            min_row: row,
            max_row: row,
            min_col: col,
            max_col: col,
        }
    }

    fn extend(&mut self, (row, col): CellPos) {
        self.min_row = self.min_row.min(row);
        self.max_row = self.max_row.max(row);
        self.min_col = self.min_col.min(col);
        self.max_col = self.max_col.max(col);
    }

    fn contains(&self, (row, col): CellPos) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }

    fn rows(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    fn cols(&self) -> usize {
        self.max_col - self.min_col + 1
    }
}

impl<T: RasterScalar> RasterGrid<T> {
    /// Establish storage and position index from the current mask and flags.
    pub fn reconcile(&mut self) -> RasterResult<ReconcileOutcome> {
        let Some(mask) = self.mask.clone() else {
            if !self.calc_pos {
                self.sync_counts();
                return Ok(ReconcileOutcome::Unchanged);
            }
            if self.positions.is_some() {
                return Ok(ReconcileOutcome::Unchanged);
            }
            return self.compress_self();
        };
        self.reconcile_with(&mask)
    }

    fn reconcile_with(&mut self, mask: &Arc<Mask>) -> RasterResult<ReconcileOutcome> {
        let mask_positions = mask.positions();
        let no_data = self.no_data;
        let fill = self.default_as_t();

        // Storage slot of this grid under each valid mask cell.
        let sources: Vec<Option<usize>> = mask_positions
            .par_iter()
            .map(|&(row, col)| {
                let (x, y) = mask.header().coordinate_of(row, col);
                self.header
                    .position_of(x, y)
                    .and_then(|(r, c)| self.index_of(r, c))
            })
            .collect();

        let mut matched = 0usize;
        let mut bbox: Option<BoundingBox> = None;
        for (k, source) in sources.iter().enumerate() {
            let hit = source
                .and_then(|slot| self.cells.get(slot, 0))
                .map_or(false, |v| !v.same_value(no_data));
            if hit {
                matched += 1;
                match bbox.as_mut() {
                    Some(b) => b.extend(mask_positions[k]),
                    None => bbox = Some(BoundingBox::at(mask_positions[k])),
                }
            }
        }

        let Some(bbox) = bbox else {
            warn!(
                mask = mask.name().unwrap_or("<unnamed>"),
                mask_cells = mask.valid_count(),
                "Mask does not overlap any valid cell"
            );
            self.cells = CellStorage::Empty;
            self.positions = None;
            self.release_subsets();
            self.sync_counts();
            self.invalidate_statistics();
            return Ok(ReconcileOutcome::NoOverlap);
        };

        let scan = self.scan_values(&sources, fill);
        let previous = self.positions.take();

        let mask_header = mask.header();
        let match_exactly = matched == mask.valid_count();
        let within_extent = bbox.min_row == 0
            && bbox.min_col == 0
            && bbox.max_row + 1 == mask_header.rows()
            && bbox.max_col + 1 == mask_header.cols();
        let policy = ExtentPolicy::decide(self.use_mask_extent, within_extent, self.calc_pos, match_exactly);

        self.adopt_mask_header(mask);
        if policy.update_rowcol {
            let cs = mask_header.cellsize();
            self.header.set_dims(bbox.rows(), bbox.cols());
            self.header.set_origin(
                mask_header.xll() + bbox.min_col as f64 * cs,
                mask_header.yll() + (mask_header.rows() - bbox.max_row - 1) as f64 * cs,
            );
            self.header.set_cellsize(cs);
        }

        // New position of each mask cell under the (possibly shrunk) header.
        let relocated: Vec<Option<CellPos>> = mask_positions
            .iter()
            .map(|&(row, col)| {
                if !policy.update_rowcol {
                    Some((row, col))
                } else if bbox.contains((row, col)) {
                    Some((row - bbox.min_row, col - bbox.min_col))
                } else {
                    None
                }
            })
            .collect();

        if policy.recalc_pos {
            let keep: Vec<usize> = (0..scan.len())
                .filter(|&k| {
                    relocated[k].is_some() && scan.get(k, 0).map_or(false, |v| !v.same_value(no_data))
                })
                .collect();
            let positions: Vec<CellPos> = keep.iter().filter_map(|&k| relocated[k]).collect();
            self.cells = scan.select(&keep);
            self.positions = Some(PositionIndex::owned(positions));
        } else if policy.store_fullsize {
            let cols = self.header.cols();
            let targets: Vec<Option<usize>> = relocated
                .iter()
                .map(|p| p.map(|(row, col)| row * cols + col))
                .collect();
            self.cells = scan.scatter(&targets, self.header.len(), no_data, self.layers);
            self.positions = None;
        } else {
            self.cells = scan;
            self.positions = Some(PositionIndex::from(Arc::clone(mask_positions)));
        }

        self.calc_pos = !policy.store_fullsize;
        self.sync_counts();
        self.invalidate_statistics();

        if mask.has_subsets() {
            self.remap_mask_subsets(mask, &relocated);
        } else {
            let same_slots = match (&previous, &self.positions) {
                (Some(before), Some(after)) => before.as_slice() == after.as_slice(),
                _ => false,
            };
            if !same_slots {
                self.renumber_subsets()?;
            }
        }

        if policy.store_fullsize || policy.recalc_pos {
            self.mask = None;
        }

        info!(
            mask = mask.name().unwrap_or("<unnamed>"),
            matched,
            mask_cells = mask.valid_count(),
            match_exactly,
            within_extent,
            recalc_pos = policy.recalc_pos,
            update_rowcol = policy.update_rowcol,
            store_fullsize = policy.store_fullsize,
            valid_cells = self.cells.len(),
            "Reconciled grid with mask"
        );

        Ok(ReconcileOutcome::Masked {
            match_exactly,
            within_extent,
        })
    }

    /// Values of this grid under each mask cell, no-data replaced by `fill`.
    fn scan_values(&self, sources: &[Option<usize>], fill: T) -> CellStorage<T> {
        let no_data = self.no_data;
        let substitute = |v: T| if v.same_value(no_data) { fill } else { v };
        match &self.cells {
            CellStorage::Empty => CellStorage::Empty,
            CellStorage::Flat(values) => CellStorage::Flat(
                sources
                    .par_iter()
                    .map(|s| s.map_or(fill, |slot| substitute(values[slot])))
                    .collect(),
            ),
            CellStorage::Layered(values) => {
                let layers = self.layers;
                CellStorage::Layered(
                    sources
                        .par_iter()
                        .map(|s| match s {
                            Some(slot) => values[*slot].iter().map(|&v| substitute(v)).collect::<Vec<T>>(),
                            None => vec![fill; layers],
                        })
                        .collect(),
                )
            }
        }
    }

    /// Mask numeric fields, this grid's string fields.
    fn adopt_mask_header(&mut self, mask: &Mask) {
        let (_, strings) = self.header.clone().into_maps();
        let (numeric, _) = mask.header().clone().into_maps();
        let mut header = Header::from_maps(numeric, strings);
        header.set_nodata(self.no_data.as_f64());
        header.set_spatial_ref(mask.header().spatial_ref());
        if let Some(name) = mask.name() {
            header.set_mask_name(name);
        }
        self.header = header;
    }

    /// Carry the mask's subsets over to this grid's storage.
    ///
    /// Subsets whose cells all map one-to-one keep sharing the mask's arrays.
    /// Others are rebuilt from the cells that still hold data; their payload
    /// is dropped.
    fn remap_mask_subsets(&mut self, mask: &Mask, relocated: &[Option<CellPos>]) {
        let no_data = self.no_data;
        let mut subsets = BTreeMap::new();
        let mut rebuilt = 0usize;

        for (&id, subset) in mask.subsets() {
            let mut slots = Vec::with_capacity(subset.n_cells());
            let mut positions = Vec::with_capacity(subset.n_cells());
            let mut identical = true;

            for &g in subset.global_indices() {
                let target = relocated
                    .get(g)
                    .copied()
                    .flatten()
                    .and_then(|(row, col)| self.index_of(row, col).map(|slot| (slot, (row, col))));
                match target {
                    Some((slot, pos))
                        if self.cells.get(slot, 0).map_or(false, |v| !v.same_value(no_data)) =>
                    {
                        identical &= slot == g && pos == mask.positions()[g];
                        slots.push(slot);
                        positions.push(pos);
                    }
                    _ => identical = false,
                }
            }

            let mut carried = if identical {
                subset.clone_shared()
            } else {
                rebuilt += 1;
                match Subset::from_cells(id, slots, &positions) {
                    Some(s) => s,
                    None => continue,
                }
            };
            carried.set_layers(Some(self.layers));
            subsets.insert(id, carried);
        }

        debug!(
            subsets = subsets.len(),
            rebuilt,
            dropped = mask.subsets().len() - subsets.len(),
            "Carried mask subsets"
        );
        self.subsets = subsets;
        self.subset_origin = SubsetOrigin::Mask;
    }
}
