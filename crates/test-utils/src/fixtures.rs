//! Common test fixtures: sample grid files and temporary directories.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

/// Sample ASCII grid files.
pub mod asc {
    /// 4x3 grid with corner coordinates and lowercase keys.
    pub const SMALL_CORNER: &str = "\
ncols 3
nrows 4
xllcorner 1.0
yllcorner 1.0
cellsize 1.0
NODATA_value -9999
3 4 5
-9999 -9999 -9999
-9999 -9999 -9999
-9999 -9999 -9999
";

    /// 2x2 grid with center coordinates.
    pub const TINY_CENTER: &str = "\
NCOLS 2
NROWS 2
XLLCENTER 10.5
YLLCENTER 20.5
CELLSIZE 1
NODATA_VALUE -1
1.5 2.5
-1 4
";

    /// Header declares 2x2 but only three values follow.
    pub const SHORT_VALUES: &str = "\
NCOLS 2
NROWS 2
XLLCENTER 0.5
YLLCENTER 0.5
CELLSIZE 1
NODATA_VALUE -9999
1 2
3
";

    /// No CELLSIZE line.
    pub const MISSING_CELLSIZE: &str = "\
NCOLS 2
NROWS 2
XLLCENTER 0.5
YLLCENTER 0.5
NODATA_VALUE -9999
1 2
3 4
";
}

/// A temporary directory holding fixture files, removed on drop.
pub struct FixtureDir {
    dir: TempDir,
}

impl FixtureDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    /// Path of `name` inside the directory, whether or not it exists.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `contents` to `name` and return its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create fixture dir");
        }
        fs::write(&path, contents).expect("Failed to write fixture");
        path
    }
}

impl Default for FixtureDir {
    fn default() -> Self {
        Self::new()
    }
}
