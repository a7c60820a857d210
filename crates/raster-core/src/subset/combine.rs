//! Recombining subsets into output buffers.

use std::collections::BTreeMap;

use raster_common::{Header, RasterError, RasterResult, NODATA_VALUE};
use tracing::debug;

use crate::grid::RasterGrid;
use crate::scalar::RasterScalar;
use crate::subset::{GroupId, Subset};

/// Replacement values per key, one entry per output layer.
pub type ReclassMap = BTreeMap<i32, Vec<f64>>;

/// How subset values are selected and laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct CombineOptions {
    /// Read values from the parent grid instead of subset payloads.
    pub out_origin: bool,
    /// Lay buffers out over the full extent (`true`) or valid cells only.
    pub include_nodata: bool,
    /// Substitute values keyed by group id, or by the parent value when
    /// `out_origin` is set.
    pub reclass: Option<ReclassMap>,
    /// Value for keys missing from `reclass` and for unusable subsets.
    /// `NODATA_VALUE` selects the grid's own default.
    pub default_value: f64,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            out_origin: false,
            include_nodata: true,
            reclass: None,
            default_value: NODATA_VALUE,
        }
    }
}

impl CombineOptions {
    /// Values taken from the parent grid.
    pub fn from_origin() -> Self {
        Self {
            out_origin: true,
            ..Self::default()
        }
    }

    pub fn with_reclass(mut self, reclass: ReclassMap) -> Self {
        self.reclass = Some(reclass);
        self
    }

    pub fn with_include_nodata(mut self, include_nodata: bool) -> Self {
        self.include_nodata = include_nodata;
        self
    }

    pub fn with_default_value(mut self, default_value: f64) -> Self {
        self.default_value = default_value;
        self
    }
}

/// An output buffer ready for a grid writer.
#[derive(Debug, Clone, PartialEq)]
pub struct GridBuffer<T> {
    pub header: Header,
    pub layers: usize,
    /// Interleaved, `[cell * layers + layer]`.
    pub values: Vec<T>,
}

impl<T: Copy> GridBuffer<T> {
    /// Values of one 1-based layer.
    pub fn layer(&self, layer: usize) -> Option<Vec<T>> {
        if layer == 0 || layer > self.layers {
            return None;
        }
        Some(
            self.values
                .iter()
                .skip(layer - 1)
                .step_by(self.layers)
                .copied()
                .collect(),
        )
    }

    pub fn cells(&self) -> usize {
        if self.layers == 0 {
            0
        } else {
            self.values.len() / self.layers
        }
    }
}

/// Resolved settings for one combine call.
struct Plan<'a> {
    out_origin: bool,
    reclass: Option<&'a ReclassMap>,
    default_value: f64,
    layers: usize,
    nodata: f64,
}

impl<T: RasterScalar> RasterGrid<T> {
    fn plan<'a>(&self, options: &'a CombineOptions) -> RasterResult<Plan<'a>> {
        let reclass = options.reclass.as_ref().filter(|r| !r.is_empty());
        let reclass_len = match reclass {
            Some(map) => {
                let mut lens = map.values().map(Vec::len);
                let first = lens.next().unwrap_or(0);
                if first == 0 || lens.any(|len| len != first) {
                    return Err(RasterError::invalid_argument(
                        "reclassification vectors must share one non-zero length",
                    ));
                }
                Some(first)
            }
            None => None,
        };

        let mut subset_layers: Option<usize> = None;
        for subset in self.subsets.values().filter(|s| s.usable) {
            let Some(layers) = subset.payload().map(|p| p.layers()) else {
                continue;
            };
            match subset_layers {
                Some(expected) if expected != layers => {
                    return Err(RasterError::subset_inconsistent(format!(
                        "subset {} has {} layer(s), expected {}",
                        subset.group_id(),
                        layers,
                        expected
                    )));
                }
                _ => subset_layers = Some(layers),
            }
        }

        let layers = if options.out_origin {
            reclass_len.unwrap_or(self.layers)
        } else {
            reclass_len.or(subset_layers).unwrap_or(1)
        };

        let default_value = if options.default_value == NODATA_VALUE {
            self.default_value
        } else {
            options.default_value
        };

        Ok(Plan {
            out_origin: options.out_origin,
            reclass,
            default_value,
            layers,
            nodata: self.no_data.as_f64(),
        })
    }

    /// Value of subset cell `i` in the 0-based `layer`.
    fn select_value(&self, plan: &Plan<'_>, subset: &Subset, i: usize, layer: usize) -> RasterResult<f64> {
        let slot = subset.global_indices()[i];
        if let Some(reclass) = plan.reclass {
            let key = if plan.out_origin {
                self.value_at_index(slot).to_key()
            } else {
                Some(subset.group_id())
            };
            return Ok(key
                .and_then(|k| reclass.get(&k))
                .and_then(|values| values.get(layer))
                .copied()
                .unwrap_or(plan.default_value));
        }
        if plan.out_origin {
            return Ok(self.value_at_index_layer(slot, layer + 1).as_f64());
        }
        match subset.payload() {
            Some(payload) => Ok(payload.get(i, layer).unwrap_or(plan.nodata)),
            None => Err(RasterError::not_initialized(format!(
                "subset {} has no payload, origin values or reclassification",
                subset.group_id()
            ))),
        }
    }

    /// Write `subset` into `out` at `offset(i) * layers + layer`.
    ///
    /// Fails when the subset refers to slots this grid does not store or
    /// lands outside `out`.
    fn fill_subset(
        &self,
        plan: &Plan<'_>,
        subset: &Subset,
        out: &mut [T],
        offset: impl Fn(usize) -> RasterResult<usize>,
    ) -> RasterResult<usize> {
        let stored = self.valid_cell_count();
        if let Some(&slot) = subset.global_indices().iter().find(|&&g| g >= stored) {
            return Err(RasterError::subset_inconsistent(format!(
                "subset {} refers to slot {} of a grid storing {} cells",
                subset.group_id(),
                slot,
                stored
            )));
        }

        let default = if subset.usable {
            None
        } else if plan.default_value == plan.nodata {
            return Ok(0);
        } else {
            Some(T::from_f64_checked(plan.default_value))
        };

        let mut overflow = 0usize;
        for i in 0..subset.n_cells() {
            let base = offset(i)? * plan.layers;
            for layer in 0..plan.layers {
                let value = match default {
                    Some(value) => value,
                    None => T::from_f64_checked(self.select_value(plan, subset, i, layer)?),
                };
                let target = out.get_mut(base + layer).ok_or_else(|| {
                    RasterError::out_of_range(format!(
                        "subset {} cell {} maps past the end of the output",
                        subset.group_id(),
                        i
                    ))
                })?;
                match value {
                    Some(v) => *target = v,
                    None => overflow += 1,
                }
            }
        }
        Ok(overflow)
    }

    /// Combine every subset into one buffer scoped to this grid's extent, or
    /// to its valid cells when `include_nodata` is off.
    pub fn combine_subsets(&self, options: &CombineOptions) -> RasterResult<GridBuffer<T>> {
        let plan = self.plan(options)?;
        let cols = self.cols();
        let cells = if options.include_nodata {
            self.header.len()
        } else {
            self.valid_cell_count()
        };
        let mut values = vec![self.no_data; cells * plan.layers];

        let mut overflow = 0usize;
        for subset in self.subsets.values() {
            overflow += if options.include_nodata {
                self.fill_subset(&plan, subset, &mut values, |i| {
                    let slot = subset.global_indices()[i];
                    let (row, col) = self.position_of_index(slot).ok_or_else(|| {
                        RasterError::out_of_range(format!("slot {} has no position", slot))
                    })?;
                    Ok(row * cols + col)
                })?
            } else {
                self.fill_subset(&plan, subset, &mut values, |i| Ok(subset.global_indices()[i]))?
            };
        }
        if overflow > 0 {
            return Err(RasterError::TypeConversionOverflow {
                kind: T::KIND,
                count: overflow,
            });
        }

        let mut header = self.header.clone();
        header.set_layers(plan.layers);
        header.set_valid_cell_count(cells);
        header.set_include_nodata(options.include_nodata);

        debug!(
            subsets = self.subsets.len(),
            layers = plan.layers,
            cells,
            "Combined subsets"
        );
        Ok(GridBuffer {
            header,
            layers: plan.layers,
            values,
        })
    }

    /// One buffer per usable subset, scoped to its bounding box, or to its
    /// cells when `include_nodata` is off.
    pub fn subset_buffers(&self, options: &CombineOptions) -> RasterResult<BTreeMap<GroupId, GridBuffer<T>>> {
        let plan = self.plan(options)?;
        let nodata = plan.nodata;
        let mut buffers = BTreeMap::new();

        for (&id, subset) in self.subsets.iter().filter(|(_, s)| s.usable) {
            let bbox_cols = subset.cols();
            let cells = if options.include_nodata {
                subset.rows() * bbox_cols
            } else {
                subset.n_cells()
            };
            let mut values = vec![self.no_data; cells * plan.layers];
            let overflow = if options.include_nodata {
                self.fill_subset(&plan, subset, &mut values, |i| {
                    let (row, col) = subset.local_positions()[i];
                    Ok(row * bbox_cols + col)
                })?
            } else {
                self.fill_subset(&plan, subset, &mut values, Ok)?
            };
            if overflow > 0 {
                return Err(RasterError::TypeConversionOverflow {
                    kind: T::KIND,
                    count: overflow,
                });
            }

            let mut header = subset.header(&self.header, nodata);
            header.set_layers(plan.layers);
            header.set_valid_cell_count(cells);
            header.set_include_nodata(options.include_nodata);
            buffers.insert(
                id,
                GridBuffer {
                    header,
                    layers: plan.layers,
                    values,
                },
            );
        }
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_extraction() {
        let buffer = GridBuffer {
            header: Header::default(),
            layers: 2,
            values: vec![1, 10, 2, 20, 3, 30],
        };
        assert_eq!(buffer.cells(), 3);
        assert_eq!(buffer.layer(1), Some(vec![1, 2, 3]));
        assert_eq!(buffer.layer(2), Some(vec![10, 20, 30]));
        assert_eq!(buffer.layer(3), None);
    }

    #[test]
    fn test_options_builder() {
        let options = CombineOptions::from_origin()
            .with_include_nodata(false)
            .with_default_value(0.0);
        assert!(options.out_origin);
        assert!(!options.include_nodata);
        assert_eq!(options.default_value, 0.0);
        assert!(options.reclass.is_none());
    }

    #[test]
    fn test_subset_past_storage_is_rejected() {
        use crate::config::GridOptions;

        let header = Header::new(2, 2, 0.5, 0.5, 1.0, -9999.0);
        let mut grid =
            RasterGrid::from_full_buffer(header, vec![1.0f32, 2.0, 3.0, 4.0], None, GridOptions::compressed())
                .unwrap();
        grid.build_subsets(None).unwrap();
        let stale = Subset::from_cells(9, vec![7], &[(1, 1)]).unwrap();
        grid.subsets.insert(9, stale);

        for options in [
            CombineOptions::from_origin(),
            CombineOptions::from_origin().with_include_nodata(false),
        ] {
            assert!(matches!(
                grid.combine_subsets(&options),
                Err(RasterError::SubsetInconsistent(_))
            ));
        }
        assert!(matches!(
            grid.subset_buffers(&CombineOptions::from_origin()),
            Err(RasterError::SubsetInconsistent(_))
        ));
    }
}
