//! Common types shared across the raster engine crates.

pub mod error;
pub mod header;
pub mod kind;

pub use error::{RasterError, RasterResult};
pub use header::{keys, Header};
pub use kind::{ScalarKind, MISSING_FLOAT, NODATA_VALUE};
