//! Grid-level read and write helpers over the file and blob backends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use raster_common::{Header, RasterError, RasterResult};
use raster_core::{CombineOptions, GridBuffer, GridOptions, GroupId, Mask, RasterGrid, RasterScalar};
use tracing::{debug, info, instrument};

use crate::asc::{read_full_grid, write_full_grid, WriteOptions};
use crate::blob::{check_payload, BlobBackend, StringFilter};
use crate::codec::{cast_values, convert_to_kind, decode, encode};
use crate::paths::{GridPath, COMBINED_GROUP};

/// Read one ASCII grid, masking it when `mask` is given.
pub fn read_grid<T: RasterScalar>(
    path: impl AsRef<Path>,
    mask: Option<Arc<Mask>>,
    options: GridOptions,
) -> RasterResult<RasterGrid<T>> {
    let full = read_full_grid::<T>(path)?;
    RasterGrid::from_full_buffer(full.header, full.values, mask, options)
}

/// Read several ASCII grids as the layers of one grid. The first file
/// defines the geometry.
pub fn read_grid_layers<T: RasterScalar, P: AsRef<Path>>(
    paths: &[P],
    mask: Option<Arc<Mask>>,
    options: GridOptions,
) -> RasterResult<RasterGrid<T>> {
    let layers = paths
        .iter()
        .map(|p| read_full_grid::<T>(p).map(|g| (g.header, g.values)))
        .collect::<RasterResult<Vec<_>>>()?;
    RasterGrid::from_layers(layers, mask, options)
}

/// Read a mask grid, named after the file.
pub fn read_mask(path: impl AsRef<Path>) -> RasterResult<Arc<Mask>> {
    let path = path.as_ref();
    let grid = read_grid::<i32>(path, None, GridOptions::compressed())?;
    grid.to_named_mask(GridPath::core_name(path))
}

/// Read a mask grid and partition it into subsets.
///
/// `grouping` maps cell values to group ids; `None` groups by value.
pub fn read_mask_with_subsets(
    path: impl AsRef<Path>,
    grouping: Option<&BTreeMap<i32, GroupId>>,
) -> RasterResult<Arc<Mask>> {
    let path = path.as_ref();
    let mut grid = read_grid::<i32>(path, None, GridOptions::compressed())?;
    let count = grid.build_subsets(grouping)?;
    debug!(path = %path.display(), subsets = count, "Built mask subsets");
    grid.to_named_mask(GridPath::core_name(path))
}

fn require_full_extent(options: &WriteOptions, what: &str) -> RasterResult<()> {
    if options.valid_cells_only {
        return Err(RasterError::invalid_argument(format!(
            "{} go to ASCII grids, which always hold the full extent",
            what
        )));
    }
    Ok(())
}

/// Write a grid over its full extent. Multi-layer grids get one file per layer.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn write_grid<T: RasterScalar>(
    grid: &RasterGrid<T>,
    path: impl AsRef<Path>,
    options: &WriteOptions,
) -> RasterResult<Vec<PathBuf>> {
    require_full_extent(options, "grids")?;
    let path = path.as_ref();
    let mut header = grid.header().clone();
    header.set_layers(1);
    header.set_valid_cell_count(grid.valid_cell_count());

    let mut written = Vec::with_capacity(grid.layers());
    for layer in 1..=grid.layers() {
        let target = if grid.layers() == 1 {
            path.to_path_buf()
        } else {
            GridPath::layer_path(path, layer)
        };
        write_full_grid(&target, &header, &grid.to_full_buffer(layer)?, options)?;
        written.push(target);
    }
    Ok(written)
}

fn write_buffer<T: RasterScalar>(
    buffer: &GridBuffer<T>,
    path: &Path,
    group: GroupId,
    options: &WriteOptions,
) -> RasterResult<Vec<PathBuf>> {
    let mut header = buffer.header.clone();
    header.set_layers(1);

    let mut written = Vec::with_capacity(buffer.layers);
    for layer in 1..=buffer.layers {
        let values = buffer
            .layer(layer)
            .ok_or_else(|| RasterError::out_of_range(format!("layer {}", layer)))?;
        let target = GridPath::subset_path(path, group, (buffer.layers > 1).then_some(layer));
        write_full_grid(&target, &header, &values, options)?;
        written.push(target);
    }
    Ok(written)
}

/// Write every usable subset to `{group}_{core}.{ext}` next to `path`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn write_subsets<T: RasterScalar>(
    grid: &RasterGrid<T>,
    path: impl AsRef<Path>,
    combine: &CombineOptions,
    options: &WriteOptions,
) -> RasterResult<Vec<PathBuf>> {
    require_full_extent(options, "subsets")?;
    if !combine.include_nodata {
        return Err(RasterError::invalid_argument(
            "subset files need bounding-box buffers (include_nodata = true)",
        ));
    }
    let path = path.as_ref();
    let buffers = grid.subset_buffers(combine)?;

    let mut written = Vec::new();
    for (group, buffer) in &buffers {
        written.extend(write_buffer(buffer, path, *group, options)?);
    }
    info!(subsets = buffers.len(), files = written.len(), "Wrote subsets");
    Ok(written)
}

/// Combine all subsets and write the result as group 0 next to `path`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn write_combined<T: RasterScalar>(
    grid: &RasterGrid<T>,
    path: impl AsRef<Path>,
    combine: &CombineOptions,
    options: &WriteOptions,
) -> RasterResult<Vec<PathBuf>> {
    require_full_extent(options, "combined grids")?;
    if !combine.include_nodata {
        return Err(RasterError::invalid_argument(
            "combined files need the full extent (include_nodata = true)",
        ));
    }
    let buffer = grid.combine_subsets(combine)?;
    write_buffer(&buffer, path.as_ref(), COMBINED_GROUP, options)
}

/// Load subset files into the subsets of `grid`.
///
/// Each file's group comes from its `{group}_` name prefix. Files whose
/// group has no subset are skipped. Returns the groups loaded.
pub fn load_subset_files<T: RasterScalar, P: AsRef<Path>>(
    grid: &mut RasterGrid<T>,
    paths: &[P],
) -> RasterResult<Vec<GroupId>> {
    let mut loaded = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let group = GridPath::group_of(path).ok_or_else(|| {
            RasterError::invalid_argument(format!("{} has no group prefix", path.display()))
        })?;
        let Some(subset) = grid.subset_mut(group) else {
            debug!(group, path = %path.display(), "No subset for file, skipping");
            continue;
        };
        let full = read_full_grid::<f64>(path)?;
        subset.load_payload(&full.values, 1)?;
        loaded.push(group);
    }
    Ok(loaded)
}

fn interleave(layers: &[Vec<f64>]) -> Vec<f64> {
    let cells = layers.first().map(Vec::len).unwrap_or(0);
    let mut out = Vec::with_capacity(cells * layers.len());
    for cell in 0..cells {
        out.extend(layers.iter().map(|layer| layer[cell]));
    }
    out
}

/// Encode a grid in the header's output kind and store it.
///
/// With `valid_cells_only` only stored cells are persisted, in position
/// index order; loading such a payload needs the same mask.
#[instrument(skip(backend, grid, options))]
pub async fn store_grid_blob<T: RasterScalar>(
    backend: &dyn BlobBackend,
    name: &str,
    grid: &RasterGrid<T>,
    options: &WriteOptions,
) -> RasterResult<()> {
    let layers: Vec<Vec<f64>> = (1..=grid.layers())
        .map(|layer| -> RasterResult<Vec<f64>> {
            let values = if options.valid_cells_only {
                grid.layer_values(layer)?
            } else {
                grid.to_full_buffer(layer)?
            };
            Ok(values.into_iter().map(RasterScalar::as_f64).collect())
        })
        .collect::<RasterResult<_>>()?;
    let cells = layers.first().map(Vec::len).unwrap_or(0);

    let mut header = grid.header().clone();
    let kind = options.output_kind.unwrap_or(T::KIND);
    let converted = convert_to_kind(&interleave(&layers), header.nodata(), kind)?;

    header.set_nodata(converted.nodata);
    header.set_layers(grid.layers());
    header.set_valid_cell_count(cells);
    header.set_include_nodata(!options.valid_cells_only);
    header.set_input_kind(T::KIND);
    header.set_output_kind(kind);
    if let Some(srs) = &options.spatial_ref {
        header.set_spatial_ref(srs.clone());
    }

    let data = encode(&converted.values, kind)?;
    backend.put(name, data, &header).await
}

/// Load a grid stored by [`store_grid_blob`].
#[instrument(skip(backend, mask, options))]
pub async fn load_grid_blob<T: RasterScalar>(
    backend: &dyn BlobBackend,
    name: &str,
    mask: Option<Arc<Mask>>,
    options: GridOptions,
) -> RasterResult<RasterGrid<T>> {
    let record = backend.get(name, &StringFilter::new()).await?;
    let kind = check_payload(&record.header, record.data.len())?;
    let raw = decode(&record.data, kind)?;

    let mut header: Header = record.header;
    let (values, nodata) = cast_values::<T>(&raw, header.nodata())?;
    header.set_nodata(nodata.as_f64());
    let layers = header.layers().max(1);

    if !header.include_nodata() {
        let mask = mask.ok_or_else(|| {
            RasterError::not_initialized(format!("{} holds valid cells only and needs its mask", name))
        })?;
        return if layers == 1 {
            RasterGrid::from_mask_values(mask, values, nodata)
        } else {
            let cells = values.chunks(layers).map(<[T]>::to_vec).collect();
            RasterGrid::from_mask_layers(mask, cells, nodata)
        };
    }

    header.set_layers(1);
    header.set_valid_cell_count(header.len());
    let per_layer: Vec<(Header, Vec<T>)> = (0..layers)
        .map(|layer| {
            let values = values.iter().skip(layer).step_by(layers).copied().collect();
            (header.clone(), values)
        })
        .collect();
    RasterGrid::from_layers(per_layer, mask, options)
}
