//! Grouping a grid's valid cells into subsets.

use std::collections::BTreeMap;

use raster_common::{RasterError, RasterResult};
use rayon::prelude::*;
use tracing::debug;

use crate::grid::RasterGrid;
use crate::position::CellPos;
use crate::scalar::RasterScalar;
use crate::subset::{GroupId, Subset, SubsetOrigin};

impl<T: RasterScalar> RasterGrid<T> {
    /// Group valid cells into subsets keyed by their own value, or by
    /// `grouping[value]` when the value has an entry.
    ///
    /// Compresses the grid first when it has no position index. Does
    /// nothing when subsets already exist. Returns the number of subsets.
    pub fn build_subsets(&mut self, grouping: Option<&BTreeMap<i32, GroupId>>) -> RasterResult<usize> {
        if !self.subsets.is_empty() {
            return Ok(self.subsets.len());
        }
        if self.positions.is_none() {
            self.compress()?;
        }
        let positions = self
            .positions
            .as_ref()
            .ok_or_else(|| RasterError::not_initialized("grid has no position index"))?;

        // Sequential pass: slot order inside each group stays row-major.
        let mut groups: BTreeMap<GroupId, Vec<usize>> = BTreeMap::new();
        for slot in 0..self.cells.len() {
            let Some(value) = self.cells.get(slot, 0) else {
                continue;
            };
            if value.same_value(self.no_data) {
                continue;
            }
            let key = value.to_key().ok_or_else(|| {
                RasterError::out_of_range(format!(
                    "cell value {:?} at slot {} has no integer group key",
                    value, slot
                ))
            })?;
            let group = grouping.and_then(|g| g.get(&key).copied()).unwrap_or(key);
            groups.entry(group).or_default().push(slot);
        }

        let subsets: BTreeMap<GroupId, Subset> = groups
            .into_par_iter()
            .filter_map(|(group, slots)| {
                let cells: Vec<CellPos> = slots.iter().map(|&s| positions[s]).collect();
                Subset::from_cells(group, slots, &cells).map(|s| (group, s))
            })
            .collect();

        debug!(
            subsets = subsets.len(),
            cells = subsets.values().map(Subset::n_cells).sum::<usize>(),
            regrouped = grouping.is_some(),
            "Built subsets"
        );
        self.subsets = subsets;
        self.subset_origin = SubsetOrigin::Built(grouping.cloned());
        Ok(self.subsets.len())
    }

    /// Drop every subset and build again with `grouping`.
    pub fn rebuild_subsets(&mut self, grouping: Option<&BTreeMap<i32, GroupId>>) -> RasterResult<usize> {
        self.release_subsets();
        self.build_subsets(grouping)
    }

    /// Drop every subset. Cell storage and position index are untouched.
    pub fn release_subsets(&mut self) {
        self.subsets.clear();
        self.subset_origin = SubsetOrigin::None;
    }

    /// Bring subsets in line with storage whose slots were renumbered.
    ///
    /// Subsets from [`build_subsets`](Self::build_subsets) are built again
    /// with the same grouping while the grid has a position index. All
    /// others are released, payloads included.
    pub(crate) fn renumber_subsets(&mut self) -> RasterResult<()> {
        let origin = std::mem::take(&mut self.subset_origin);
        if self.subsets.is_empty() {
            return Ok(());
        }
        let released = self.subsets.len();
        self.subsets.clear();
        match origin {
            SubsetOrigin::Built(grouping) if self.positions.is_some() => {
                let rebuilt = self.build_subsets(grouping.as_ref())?;
                debug!(released, rebuilt, "Rebuilt subsets over renumbered storage");
            }
            _ => debug!(released, "Released subsets over renumbered storage"),
        }
        Ok(())
    }
}
