//! The raster grid container.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use raster_common::{Header, RasterError, RasterResult, ScalarKind, NODATA_VALUE};
use rayon::prelude::*;
use tracing::debug;

use crate::config::GridOptions;
use crate::mask::{Mask, ReconcileOutcome};
use crate::position::{CellPos, PositionIndex};
use crate::scalar::RasterScalar;
use crate::stats::{StatKind, Statistics};
use crate::subset::{GroupId, Subset, SubsetOrigin};

/// Cell values of a grid.
///
/// Slot `i` is either the row-major cell `i` of the full extent, or, when
/// the grid is compressed, the cell at `position_index[i]`.
#[derive(Debug, Clone, PartialEq)]
pub enum CellStorage<T> {
    /// Not constructed, or emptied by a failed reconciliation.
    Empty,
    /// One value per slot.
    Flat(Vec<T>),
    /// Indexed `[slot][layer]`, every slot holding the same number of layers.
    Layered(Vec<Vec<T>>),
}

impl<T: RasterScalar> CellStorage<T> {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Flat(v) => v.len(),
            Self::Layered(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `slot` in the 0-based `layer`.
    pub(crate) fn get(&self, slot: usize, layer: usize) -> Option<T> {
        match self {
            Self::Empty => None,
            Self::Flat(v) if layer == 0 => v.get(slot).copied(),
            Self::Flat(_) => None,
            Self::Layered(v) => v.get(slot).and_then(|cell| cell.get(layer)).copied(),
        }
    }

    /// Keep only `slots`, in the given order.
    pub(crate) fn select(&self, slots: &[usize]) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Flat(v) => Self::Flat(slots.iter().map(|&s| v[s]).collect()),
            Self::Layered(v) => Self::Layered(slots.iter().map(|&s| v[s].clone()).collect()),
        }
    }

    /// Place slot `k` at `targets[k]` in a buffer of `len` slots filled with `fill`.
    /// Slots whose target is `None` are dropped.
    pub(crate) fn scatter(&self, targets: &[Option<usize>], len: usize, fill: T, layers: usize) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Flat(v) => {
                let mut out = vec![fill; len];
                for (value, target) in v.iter().zip(targets) {
                    if let Some(t) = target {
                        out[*t] = *value;
                    }
                }
                Self::Flat(out)
            }
            Self::Layered(v) => {
                let mut out = vec![vec![fill; layers]; len];
                for (cell, target) in v.iter().zip(targets) {
                    if let Some(t) = target {
                        out[*t] = cell.clone();
                    }
                }
                Self::Layered(out)
            }
        }
    }
}

/// A 2D grid of `T` with optional compression, mask and subsets.
///
/// The grid is always in one of two storage states: full extent (`rows *
/// cols` slots, no position index) or compressed (one slot per valid cell
/// and a [`PositionIndex`]).
#[derive(Debug)]
pub struct RasterGrid<T: RasterScalar> {
    pub(crate) header: Header,
    pub(crate) layers: usize,
    pub(crate) cells: CellStorage<T>,
    pub(crate) positions: Option<PositionIndex>,
    pub(crate) mask: Option<Arc<Mask>>,
    pub(crate) no_data: T,
    pub(crate) default_value: f64,
    pub(crate) use_mask_extent: bool,
    pub(crate) calc_pos: bool,
    pub(crate) subsets: BTreeMap<GroupId, Subset>,
    pub(crate) subset_origin: SubsetOrigin,
    stats: OnceLock<Vec<Statistics>>,
}

impl<T: RasterScalar> RasterGrid<T> {
    fn empty(header: Header, no_data: T, mask: Option<Arc<Mask>>, options: &GridOptions) -> Self {
        let mut grid = Self {
            header,
            layers: 1,
            cells: CellStorage::Empty,
            positions: None,
            mask,
            no_data,
            default_value: options.default_value,
            use_mask_extent: options.use_mask_extent,
            calc_pos: options.compress,
            subsets: BTreeMap::new(),
            subset_origin: SubsetOrigin::None,
            stats: OnceLock::new(),
        };
        grid.check_default_value();
        grid
    }

    /// Resolve the header's no-data into `T`, falling back to the kind default.
    fn resolve_nodata(header: &mut Header) -> T {
        match T::from_f64_checked(header.nodata()) {
            Some(v) => v,
            None => {
                let fallback = T::default_nodata();
                debug!(
                    nodata = header.nodata(),
                    kind = %T::KIND,
                    "No-data not representable, using kind default"
                );
                header.set_nodata(fallback.as_f64());
                fallback
            }
        }
    }

    fn prepare_header(mut header: Header) -> RasterResult<(Header, T)> {
        header.validate()?;
        let no_data = Self::resolve_nodata(&mut header);
        if header.input_kind() == ScalarKind::Unknown {
            header.set_input_kind(T::KIND);
        }
        Ok((header, no_data))
    }

    /// Run reconciliation at construction; zero overlap is fatal.
    fn finish_construction(mut self) -> RasterResult<Self> {
        match self.reconcile()? {
            ReconcileOutcome::NoOverlap => Err(RasterError::mask_mismatch(format!(
                "no valid cell of mask {} overlaps the grid",
                self.mask
                    .as_ref()
                    .and_then(|m| m.name())
                    .unwrap_or("<unnamed>")
            ))),
            _ => Ok(self),
        }
    }

    /// Build from a row-major full-extent buffer.
    pub fn from_full_buffer(
        header: Header,
        values: Vec<T>,
        mask: Option<Arc<Mask>>,
        options: GridOptions,
    ) -> RasterResult<Self> {
        let (header, no_data) = Self::prepare_header(header)?;
        if values.len() != header.len() {
            return Err(RasterError::invalid_argument(format!(
                "expected {} values for a {}x{} grid, got {}",
                header.len(),
                header.rows(),
                header.cols(),
                values.len()
            )));
        }

        let mut grid = Self::empty(header, no_data, mask, &options);
        grid.cells = CellStorage::Flat(values);
        grid.sync_counts();
        grid.finish_construction()
    }

    /// Build a multi-layer grid from `(header, values)` pairs.
    ///
    /// The first layer defines the grid. Layers with the same geometry are
    /// taken as-is; other layers are sampled at each cell's center.
    pub fn from_layers(
        layers: Vec<(Header, Vec<T>)>,
        mask: Option<Arc<Mask>>,
        options: GridOptions,
    ) -> RasterResult<Self> {
        let mut iter = layers.into_iter();
        let (first_header, first_values) = iter
            .next()
            .ok_or_else(|| RasterError::invalid_argument("at least one layer is required"))?;
        let rest: Vec<(Header, Vec<T>)> = iter.collect();
        if rest.is_empty() {
            return Self::from_full_buffer(first_header, first_values, mask, options);
        }

        let (mut header, no_data) = Self::prepare_header(first_header)?;
        if first_values.len() != header.len() {
            return Err(RasterError::invalid_argument("first layer does not match its header"));
        }

        let mut sampled: Vec<Vec<T>> = Vec::with_capacity(rest.len());
        for (i, (layer_header, values)) in rest.into_iter().enumerate() {
            layer_header.validate()?;
            if values.len() != layer_header.len() {
                return Err(RasterError::invalid_argument(format!(
                    "layer {} does not match its header",
                    i + 2
                )));
            }
            if layer_header.same_geometry(&header) {
                sampled.push(values);
                continue;
            }
            let layer_nodata = T::from_f64_checked(layer_header.nodata());
            let resampled = (0..header.len())
                .into_par_iter()
                .map(|idx| {
                    let (x, y) = header.coordinate_of(idx / header.cols(), idx % header.cols());
                    layer_header
                        .position_of(x, y)
                        .and_then(|(r, c)| layer_header.flat_index(r, c))
                        .map(|src| values[src])
                        .filter(|v| layer_nodata.map_or(true, |nd| !v.same_value(nd)))
                        .unwrap_or(no_data)
                })
                .collect();
            sampled.push(resampled);
        }

        let n_layers = sampled.len() + 1;
        let cells: Vec<Vec<T>> = first_values
            .into_par_iter()
            .enumerate()
            .map(|(idx, v)| {
                let mut cell = Vec::with_capacity(n_layers);
                cell.push(v);
                cell.extend(sampled.iter().map(|layer| layer[idx]));
                cell
            })
            .collect();

        header.set_layers(n_layers);
        let mut grid = Self::empty(header, no_data, mask, &options);
        grid.layers = n_layers;
        grid.cells = CellStorage::Layered(cells);
        grid.sync_counts();
        grid.finish_construction()
    }

    /// Build from values already aligned with `mask`'s valid cells.
    pub fn from_mask_values(mask: Arc<Mask>, values: Vec<T>, no_data: T) -> RasterResult<Self> {
        if values.len() != mask.valid_count() {
            return Err(RasterError::invalid_argument(format!(
                "mask has {} valid cells, got {} values",
                mask.valid_count(),
                values.len()
            )));
        }
        Ok(Self::attach_to_mask(mask, CellStorage::Flat(values), 1, no_data))
    }

    /// Build from per-cell layer values aligned with `mask`'s valid cells.
    pub fn from_mask_layers(mask: Arc<Mask>, values: Vec<Vec<T>>, no_data: T) -> RasterResult<Self> {
        if values.len() != mask.valid_count() {
            return Err(RasterError::invalid_argument(format!(
                "mask has {} valid cells, got {} cells",
                mask.valid_count(),
                values.len()
            )));
        }
        let layers = values.first().map(Vec::len).unwrap_or(1);
        if layers == 0 || values.iter().any(|cell| cell.len() != layers) {
            return Err(RasterError::invalid_argument(
                "every cell must carry the same non-zero number of layers",
            ));
        }
        let cells = if layers == 1 {
            CellStorage::Flat(values.into_iter().map(|cell| cell[0]).collect())
        } else {
            CellStorage::Layered(values)
        };
        Ok(Self::attach_to_mask(mask, cells, layers, no_data))
    }

    fn attach_to_mask(mask: Arc<Mask>, cells: CellStorage<T>, layers: usize, no_data: T) -> Self {
        let mut header = mask.header().clone();
        header.set_nodata(no_data.as_f64());
        header.set_input_kind(T::KIND);
        if let Some(name) = mask.name() {
            header.set_mask_name(name);
        }

        let options = GridOptions::compressed();
        let mut grid = Self::empty(header, no_data, None, &options);
        grid.layers = layers;
        grid.cells = cells;
        grid.positions = Some(PositionIndex::from(Arc::clone(mask.positions())));
        grid.subsets = mask
            .subsets()
            .iter()
            .map(|(id, s)| {
                let mut s = s.clone_shared();
                s.set_layers(Some(layers));
                (*id, s)
            })
            .collect();
        if !grid.subsets.is_empty() {
            grid.subset_origin = SubsetOrigin::Mask;
        }
        grid.mask = Some(mask);
        grid.sync_counts();
        grid
    }

    /// Copy owning every array.
    pub fn clone_deep(&self) -> Self {
        Self {
            header: self.header.clone(),
            layers: self.layers,
            cells: self.cells.clone(),
            positions: self.positions.as_ref().map(PositionIndex::to_owned_copy),
            mask: self.mask.clone(),
            no_data: self.no_data,
            default_value: self.default_value,
            use_mask_extent: self.use_mask_extent,
            calc_pos: self.calc_pos,
            subsets: self.subsets.iter().map(|(id, s)| (*id, s.clone_deep())).collect(),
            subset_origin: self.subset_origin.clone(),
            stats: OnceLock::new(),
        }
    }

    /// Copy with its own cell values, sharing the position index and subset
    /// index arrays with `self`.
    pub fn clone_shared(&self) -> Self {
        Self {
            header: self.header.clone(),
            layers: self.layers,
            cells: self.cells.clone(),
            positions: self.positions.as_ref().map(PositionIndex::borrow_shared),
            mask: self.mask.clone(),
            no_data: self.no_data,
            default_value: self.default_value,
            use_mask_extent: self.use_mask_extent,
            calc_pos: self.calc_pos,
            subsets: self.subsets.iter().map(|(id, s)| (*id, s.clone_shared())).collect(),
            subset_origin: self.subset_origin.clone(),
            stats: OnceLock::new(),
        }
    }

    /// Keep the header's counts in line with the materialized storage.
    pub(crate) fn sync_counts(&mut self) {
        self.header.set_layers(self.layers);
        self.header.set_valid_cell_count(self.cells.len());
    }

    pub(crate) fn invalidate_statistics(&mut self) {
        self.stats.take();
    }

    fn check_default_value(&mut self) {
        let nodata = self.no_data.as_f64();
        if self.default_value == NODATA_VALUE && nodata != NODATA_VALUE {
            self.default_value = nodata;
        }
    }

    /// Default value as `T`, or no-data when it does not fit.
    pub(crate) fn default_as_t(&self) -> T {
        T::from_f64_checked(self.default_value).unwrap_or(self.no_data)
    }

    // === Accessors ===

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn rows(&self) -> usize {
        self.header.rows()
    }

    pub fn cols(&self) -> usize {
        self.header.cols()
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    pub fn kind(&self) -> ScalarKind {
        T::KIND
    }

    /// Number of storage slots.
    pub fn valid_cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn no_data(&self) -> T {
        self.no_data
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    pub fn set_default_value(&mut self, value: f64) {
        self.default_value = value;
        self.check_default_value();
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(self.cells, CellStorage::Empty)
    }

    pub fn is_compressed(&self) -> bool {
        self.positions.is_some()
    }

    pub fn position_index(&self) -> Option<&PositionIndex> {
        self.positions.as_ref()
    }

    pub fn mask(&self) -> Option<&Arc<Mask>> {
        self.mask.as_ref()
    }

    pub fn uses_mask_extent(&self) -> bool {
        self.use_mask_extent
    }

    pub fn storage(&self) -> &CellStorage<T> {
        &self.cells
    }

    /// Single-layer slot values.
    pub fn cells(&self) -> Option<&[T]> {
        match &self.cells {
            CellStorage::Flat(v) => Some(v),
            _ => None,
        }
    }

    /// Multi-layer slot values, indexed `[slot][layer]`.
    pub fn layered_cells(&self) -> Option<&[Vec<T>]> {
        match &self.cells {
            CellStorage::Layered(v) => Some(v),
            _ => None,
        }
    }

    pub fn subsets(&self) -> &BTreeMap<GroupId, Subset> {
        &self.subsets
    }

    pub fn subset(&self, id: GroupId) -> Option<&Subset> {
        self.subsets.get(&id)
    }

    pub fn subset_mut(&mut self, id: GroupId) -> Option<&mut Subset> {
        self.subsets.get_mut(&id)
    }

    pub fn subsets_mut(&mut self) -> impl Iterator<Item = &mut Subset> {
        self.subsets.values_mut()
    }

    pub fn is_nodata(&self, value: T) -> bool {
        value.same_value(self.no_data)
    }

    // === Cell access ===

    /// Storage slot of `(row, col)`.
    pub fn index_of(&self, row: usize, col: usize) -> Option<usize> {
        match &self.positions {
            Some(index) => index.lookup(row, col),
            None => self.header.flat_index(row, col),
        }
    }

    /// Position of storage slot `idx`.
    pub fn position_of_index(&self, idx: usize) -> Option<CellPos> {
        if idx >= self.cells.len() {
            return None;
        }
        match &self.positions {
            Some(index) => index.get(idx).copied(),
            None => {
                let cols = self.cols();
                (cols > 0).then(|| (idx / cols, idx % cols))
            }
        }
    }

    /// Value in 1-based `layer` at slot `idx`; no-data when out of range.
    pub fn value_at_index_layer(&self, idx: usize, layer: usize) -> T {
        if layer == 0 {
            return self.no_data;
        }
        self.cells.get(idx, layer - 1).unwrap_or(self.no_data)
    }

    pub fn value_at_index(&self, idx: usize) -> T {
        self.value_at_index_layer(idx, 1)
    }

    /// Value in 1-based `layer` at `(row, col)`; no-data when out of range.
    pub fn value_at_layer(&self, row: usize, col: usize, layer: usize) -> T {
        match self.index_of(row, col) {
            Some(idx) => self.value_at_index_layer(idx, layer),
            None => self.no_data,
        }
    }

    pub fn value_at(&self, row: usize, col: usize) -> T {
        self.value_at_layer(row, col, 1)
    }

    /// All layer values at `(row, col)`.
    pub fn values_at(&self, row: usize, col: usize) -> Vec<T> {
        (1..=self.layers)
            .map(|layer| self.value_at_layer(row, col, layer))
            .collect()
    }

    pub fn value_at_coordinate(&self, x: f64, y: f64, layer: usize) -> T {
        match self.header.position_of(x, y) {
            Some((row, col)) => self.value_at_layer(row, col, layer),
            None => self.no_data,
        }
    }

    /// Slot values of one 1-based layer.
    pub fn layer_values(&self, layer: usize) -> RasterResult<Vec<T>> {
        self.check_layer(layer)?;
        Ok(match &self.cells {
            CellStorage::Empty => Vec::new(),
            CellStorage::Flat(v) => v.clone(),
            CellStorage::Layered(v) => v.par_iter().map(|cell| cell[layer - 1]).collect(),
        })
    }

    fn check_layer(&self, layer: usize) -> RasterResult<()> {
        if !self.is_initialized() {
            return Err(RasterError::not_initialized("grid has no cell storage"));
        }
        if layer == 0 || layer > self.layers {
            return Err(RasterError::out_of_range(format!(
                "layer {} not in 1..={}",
                layer, self.layers
            )));
        }
        Ok(())
    }

    /// Materialize one 1-based layer over the full `rows * cols` extent.
    pub fn to_full_buffer(&self, layer: usize) -> RasterResult<Vec<T>> {
        let values = self.layer_values(layer)?;
        let Some(index) = &self.positions else {
            return Ok(values);
        };
        let cols = self.cols();
        let mut out = vec![self.no_data; self.header.len()];
        for (&(row, col), value) in index.iter().zip(values) {
            out[row * cols + col] = value;
        }
        Ok(out)
    }

    pub fn to_full_layers(&self) -> RasterResult<Vec<Vec<T>>> {
        (1..=self.layers).map(|layer| self.to_full_buffer(layer)).collect()
    }

    // === Mutation ===

    /// Set the value at `(row, col)`.
    ///
    /// Returns `Ok(false)` for a cell that a compressed grid does not store.
    pub fn set_value(&mut self, row: usize, col: usize, value: T, layer: usize) -> RasterResult<bool> {
        self.check_layer(layer)?;
        if row >= self.rows() || col >= self.cols() {
            return Err(RasterError::out_of_range(format!(
                "({}, {}) outside {}x{}",
                row,
                col,
                self.rows(),
                self.cols()
            )));
        }
        let Some(idx) = self.index_of(row, col) else {
            return Ok(false);
        };
        match &mut self.cells {
            CellStorage::Flat(v) => v[idx] = value,
            CellStorage::Layered(v) => v[idx][layer - 1] = value,
            CellStorage::Empty => return Ok(false),
        }
        self.invalidate_statistics();
        Ok(true)
    }

    /// Rewrite every no-data cell to `new_nodata` and adopt it as no-data.
    pub fn replace_no_data(&mut self, new_nodata: T) {
        let old = self.no_data;
        let swap = |v: &mut T| {
            if v.same_value(old) {
                *v = new_nodata;
            }
        };
        match &mut self.cells {
            CellStorage::Flat(v) => v.par_iter_mut().for_each(swap),
            CellStorage::Layered(v) => v
                .par_iter_mut()
                .for_each(|cell| cell.iter_mut().for_each(swap)),
            CellStorage::Empty => {}
        }
        if self.default_value == old.as_f64() {
            self.default_value = new_nodata.as_f64();
        }
        self.no_data = new_nodata;
        self.header.set_nodata(new_nodata.as_f64());
        self.invalidate_statistics();
    }

    /// Map every valid value through `map`; values with no entry, or no `i32`
    /// key, become no-data.
    pub fn reclassify(&mut self, map: &BTreeMap<i32, T>) {
        let no_data = self.no_data;
        let apply = |v: &mut T| {
            if !v.same_value(no_data) {
                *v = v.to_key().and_then(|k| map.get(&k)).copied().unwrap_or(no_data);
            }
        };
        match &mut self.cells {
            CellStorage::Flat(v) => v.par_iter_mut().for_each(apply),
            CellStorage::Layered(v) => v
                .par_iter_mut()
                .for_each(|cell| cell.iter_mut().for_each(apply)),
            CellStorage::Empty => {}
        }
        self.invalidate_statistics();
    }

    // === Statistics ===

    fn statistics_cache(&self) -> &[Statistics] {
        self.stats.get_or_init(|| {
            (1..=self.layers)
                .map(|layer| match self.layer_values(layer) {
                    Ok(values) => Statistics::compute(&values, self.no_data),
                    Err(_) => Statistics::empty(self.no_data.as_f64()),
                })
                .collect()
        })
    }

    /// Statistics of a 1-based layer.
    pub fn statistics(&self, layer: usize) -> Option<Statistics> {
        if layer == 0 {
            return None;
        }
        self.statistics_cache().get(layer - 1).copied()
    }

    /// One statistic of a 1-based layer; no-data for an invalid layer.
    pub fn get_statistic(&self, kind: StatKind, layer: usize) -> f64 {
        self.statistics(layer)
            .map(|s| s.get(kind))
            .unwrap_or_else(|| self.no_data.as_f64())
    }

    /// Recompute statistics now.
    pub fn update_statistics(&mut self) {
        self.invalidate_statistics();
        self.statistics_cache();
    }

    pub fn minimum(&self) -> f64 {
        self.get_statistic(StatKind::Min, 1)
    }

    pub fn maximum(&self) -> f64 {
        self.get_statistic(StatKind::Max, 1)
    }

    pub fn average(&self) -> f64 {
        self.get_statistic(StatKind::Mean, 1)
    }

    // === Compression ===

    /// Ensure a position index exists, compressing the grid to its own valid
    /// cells when it has none.
    pub fn compress(&mut self) -> RasterResult<ReconcileOutcome> {
        self.calc_pos = true;
        if self.positions.is_some() {
            return Ok(ReconcileOutcome::Unchanged);
        }
        self.compress_self()
    }

    /// Drop no-data cells from a full-extent grid, in row-major order.
    pub(crate) fn compress_self(&mut self) -> RasterResult<ReconcileOutcome> {
        if !self.is_initialized() {
            return Err(RasterError::not_initialized("grid has no cell storage"));
        }
        let cols = self.cols();
        let no_data = self.no_data;
        let slots: Vec<usize> = (0..self.cells.len())
            .filter(|&i| {
                self.cells
                    .get(i, 0)
                    .map_or(false, |v| !v.same_value(no_data))
            })
            .collect();
        let positions: Vec<CellPos> = slots.iter().map(|&i| (i / cols, i % cols)).collect();

        self.cells = self.cells.select(&slots);
        self.positions = Some(PositionIndex::owned(positions));
        self.sync_counts();
        self.invalidate_statistics();
        self.renumber_subsets()?;

        debug!(valid_cells = slots.len(), "Compressed grid to its valid cells");
        Ok(ReconcileOutcome::SelfCompressed)
    }

    /// Re-run reconciliation keeping the mask's full extent.
    pub fn set_use_mask_extent(&mut self) -> RasterResult<ReconcileOutcome> {
        self.use_mask_extent = true;
        if self.mask.is_none() {
            return Ok(ReconcileOutcome::Unchanged);
        }
        self.reconcile()
    }

    /// A read-only mask describing this grid's valid footprint.
    pub fn to_mask(&self) -> RasterResult<Arc<Mask>> {
        let name = self.header.mask_name().map(str::to_string);
        self.build_mask(name)
    }

    /// Like [`to_mask`](Self::to_mask), naming the mask.
    pub fn to_named_mask(&self, name: impl Into<String>) -> RasterResult<Arc<Mask>> {
        self.build_mask(Some(name.into()))
    }

    fn build_mask(&self, name: Option<String>) -> RasterResult<Arc<Mask>> {
        if !self.is_initialized() {
            return Err(RasterError::not_initialized("grid has no cell storage"));
        }
        let positions: Arc<[CellPos]> = match &self.positions {
            Some(PositionIndex::Owned(p)) | Some(PositionIndex::Borrowed(p)) => Arc::clone(p),
            None => {
                let cols = self.cols();
                (0..self.cells.len())
                    .filter(|&i| {
                        self.cells
                            .get(i, 0)
                            .map_or(false, |v| !v.same_value(self.no_data))
                    })
                    .map(|i| (i / cols, i % cols))
                    .collect::<Vec<_>>()
                    .into()
            }
        };
        let subsets = self
            .subsets
            .iter()
            .map(|(id, s)| (*id, s.clone_shared()))
            .collect();
        Ok(Arc::new(Mask::new(name, self.header.clone(), positions, subsets)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_3x3() -> RasterGrid<i32> {
        let header = Header::new(3, 3, 0.5, 0.5, 1.0, -9999.0);
        let values = vec![1, -9999, 2, 3, 4, -9999, -9999, 5, 6];
        RasterGrid::from_full_buffer(header, values, None, GridOptions::default()).unwrap()
    }

    #[test]
    fn test_full_buffer_uncompressed() {
        let grid = grid_3x3();
        assert!(!grid.is_compressed());
        assert_eq!(grid.valid_cell_count(), 9);
        assert_eq!(grid.header().valid_cell_count(), Some(9));
        assert_eq!(grid.value_at(1, 1), 4);
        assert_eq!(grid.value_at(5, 5), -9999);
        assert_eq!(grid.header().input_kind(), ScalarKind::Int32);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let header = Header::new(2, 2, 0.5, 0.5, 1.0, -9999.0);
        let err = RasterGrid::<i32>::from_full_buffer(header, vec![1, 2, 3], None, GridOptions::default())
            .unwrap_err();
        assert!(matches!(err, RasterError::InvalidArgument(_)));
    }

    #[test]
    fn test_unrepresentable_nodata_falls_back() {
        let header = Header::new(1, 2, 0.5, 0.5, 1.0, -9999.0);
        let grid = RasterGrid::<u8>::from_full_buffer(header, vec![1, 255], None, GridOptions::default())
            .unwrap();
        assert_eq!(grid.no_data(), u8::MAX);
        assert_eq!(grid.header().nodata(), 255.0);
        assert_eq!(grid.default_value(), 255.0);
    }

    #[test]
    fn test_compress_self() {
        let mut grid = grid_3x3();
        let outcome = grid.compress().unwrap();
        assert_eq!(outcome, ReconcileOutcome::SelfCompressed);
        assert_eq!(grid.valid_cell_count(), 6);
        assert_eq!(grid.header().valid_cell_count(), Some(6));
        assert!(grid.position_index().unwrap().is_owned());
        assert_eq!(grid.value_at(2, 2), 6);
        assert_eq!(grid.value_at(0, 1), -9999);
        assert_eq!(grid.compress().unwrap(), ReconcileOutcome::Unchanged);
    }

    #[test]
    fn test_to_full_buffer_after_compress() {
        let mut grid = grid_3x3();
        let before = grid.to_full_buffer(1).unwrap();
        grid.compress().unwrap();
        assert_eq!(grid.to_full_buffer(1).unwrap(), before);
        assert!(grid.to_full_buffer(2).is_err());
    }

    #[test]
    fn test_set_value_invalidates_statistics() {
        let mut grid = grid_3x3();
        grid.compress().unwrap();
        assert_eq!(grid.maximum(), 6.0);

        assert!(grid.set_value(2, 2, 60, 1).unwrap());
        assert_eq!(grid.maximum(), 60.0);

        // (0,1) is not stored by the compressed grid
        assert!(!grid.set_value(0, 1, 7, 1).unwrap());
        assert!(grid.set_value(3, 0, 7, 1).is_err());
    }

    #[test]
    fn test_replace_no_data() {
        let mut grid = grid_3x3();
        grid.replace_no_data(-1);
        assert_eq!(grid.no_data(), -1);
        assert_eq!(grid.value_at(0, 1), -1);
        assert_eq!(grid.header().nodata(), -1.0);
        assert_eq!(grid.default_value(), -1.0);
    }

    #[test]
    fn test_reclassify_missing_keys_become_nodata() {
        let mut grid = grid_3x3();
        let map = BTreeMap::from([(1, 10), (2, 20)]);
        grid.reclassify(&map);
        assert_eq!(grid.value_at(0, 0), 10);
        assert_eq!(grid.value_at(0, 2), 20);
        assert_eq!(grid.value_at(1, 0), -9999);
    }

    #[test]
    fn test_from_layers_same_geometry() {
        let header = Header::new(1, 3, 0.5, 0.5, 1.0, -9999.0);
        let grid = RasterGrid::from_layers(
            vec![
                (header.clone(), vec![1.0f32, 2.0, -9999.0]),
                (header, vec![10.0, 20.0, 30.0]),
            ],
            None,
            GridOptions::compressed(),
        )
        .unwrap();
        assert_eq!(grid.layers(), 2);
        assert_eq!(grid.valid_cell_count(), 2);
        assert_eq!(grid.values_at(0, 1), vec![2.0, 20.0]);
        assert_eq!(grid.header().layers(), 2);
    }

    #[test]
    fn test_from_layers_resamples_other_geometry() {
        let base = Header::new(1, 2, 0.5, 0.5, 1.0, -9999.0);
        // second layer shifted one cell to the right
        let shifted = Header::new(1, 2, 1.5, 0.5, 1.0, -9999.0);
        let grid = RasterGrid::from_layers(
            vec![(base, vec![1i16, 2]), (shifted, vec![7, 8])],
            None,
            GridOptions::default(),
        )
        .unwrap();
        assert_eq!(grid.values_at(0, 0), vec![1, -9999]);
        assert_eq!(grid.values_at(0, 1), vec![2, 7]);
    }

    #[test]
    fn test_clone_deep_and_shared() {
        let mut grid = grid_3x3();
        grid.compress().unwrap();

        let deep = grid.clone_deep();
        assert!(!deep
            .position_index()
            .unwrap()
            .shares_storage_with(grid.position_index().unwrap()));

        let shared = grid.clone_shared();
        let index = shared.position_index().unwrap();
        assert!(!index.is_owned());
        assert!(index.shares_storage_with(grid.position_index().unwrap()));
    }

    #[test]
    fn test_invalid_layer_statistic_is_nodata() {
        let grid = grid_3x3();
        assert_eq!(grid.get_statistic(StatKind::Mean, 2), -9999.0);
        assert_eq!(grid.get_statistic(StatKind::ValidCount, 1), 6.0);
    }
}
