//! Output file naming.

use std::path::{Path, PathBuf};

use raster_core::GroupId;

/// Extension used when a path has none.
pub const DEFAULT_EXTENSION: &str = "asc";

/// Group id under which a combined grid is written.
pub const COMBINED_GROUP: GroupId = 0;

/// Path builder for consistent output layout.
pub struct GridPath;

impl GridPath {
    /// File stem of `path`, e.g. `soil` for `out/soil.asc`.
    pub fn core_name(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }

    fn sibling(path: &Path, file_name: String) -> PathBuf {
        match path.parent() {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    /// One file per layer.
    /// Format: {dir}/{core}_{layer}.{ext}
    pub fn layer_path(path: &Path, layer: usize) -> PathBuf {
        let name = format!("{}_{}.{}", Self::core_name(path), layer, Self::extension(path));
        Self::sibling(path, name)
    }

    /// Output of one subset, optionally one of several layers.
    /// Format: {dir}/{group}_{core}[_{layer}].{ext}
    pub fn subset_path(path: &Path, group: GroupId, layer: Option<usize>) -> PathBuf {
        let core = Self::core_name(path);
        let name = match layer {
            Some(layer) => format!("{}_{}_{}.{}", group, core, layer, Self::extension(path)),
            None => format!("{}_{}.{}", group, core, Self::extension(path)),
        };
        Self::sibling(path, name)
    }

    /// Output of a combined grid.
    /// Format: {dir}/0_{core}[_{layer}].{ext}
    pub fn combined_path(path: &Path, layer: Option<usize>) -> PathBuf {
        Self::subset_path(path, COMBINED_GROUP, layer)
    }

    /// Default output of the mask mode.
    /// Format: {dir}/{core}_masked.asc
    pub fn masked_path(input: &Path) -> PathBuf {
        let name = format!("{}_masked.{}", Self::core_name(input), DEFAULT_EXTENSION);
        Self::sibling(input, name)
    }

    /// Group id encoded as the `{group}_` prefix of a subset file name.
    pub fn group_of(path: &Path) -> Option<GroupId> {
        let core = Self::core_name(path);
        let (prefix, rest) = core.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        prefix.parse().ok()
    }
}
