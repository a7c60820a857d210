//! In-memory raster grids with valid-cell compression, masking and subsets.
//!
//! A [`RasterGrid`] holds a 2D (optionally multi-layer) grid of any
//! [`RasterScalar`] type. It can be compressed down to its valid cells,
//! reshaped to the footprint of a [`Mask`], partitioned into [`Subset`]s
//! and recombined.
//!
//! # Architecture
//!
//! ```text
//! full buffer + Header
//!      │
//!      ▼
//! RasterGrid::from_full_buffer(.., mask, GridOptions)
//!      │
//!      ├─► no mask, compress ─► keep non-no-data cells, owned PositionIndex
//!      │
//!      └─► mask ─► scan mask cells, classify overlap
//!               │
//!               ├─► borrowed PositionIndex (mask's own)
//!               ├─► recalculated, owned PositionIndex
//!               └─► full rows*cols buffer over the overlap
//!      │
//!      ▼
//! build_subsets(grouping) ─► Subset per group (bbox + local positions)
//!      │
//!      ▼
//! combine_subsets / subset_buffers ─► GridBuffer ─► writer
//! ```
//!
//! # Example
//!
//! ```ignore
//! use raster_core::{GridOptions, RasterGrid};
//!
//! let mask = RasterGrid::<i32>::from_full_buffer(mask_header, mask_values, None, GridOptions::compressed())?
//!     .to_named_mask("basins")?;
//! let mut grid = RasterGrid::<f32>::from_full_buffer(header, values, Some(mask), GridOptions::default())?;
//! grid.build_subsets(None)?;
//! let combined = grid.combine_subsets(&CombineOptions::from_origin())?;
//! ```

pub mod config;
pub mod grid;
pub mod mask;
pub mod position;
pub mod scalar;
pub mod stats;
pub mod subset;

// Re-export commonly used types at crate root
pub use config::GridOptions;
pub use grid::{CellStorage, RasterGrid};
pub use mask::{ExtentPolicy, Mask, ReconcileOutcome};
pub use position::{CellPos, PositionIndex};
pub use scalar::{RasterScalar, FLOAT_TOLERANCE};
pub use stats::{StatKind, Statistics};
pub use subset::{CombineOptions, GridBuffer, GroupId, ReclassMap, Subset, SubsetPayload};
