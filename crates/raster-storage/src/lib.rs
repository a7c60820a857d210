//! Persistence for raster grids.
//!
//! Provides:
//! - ASCII grid files (read/write, corner or center origin)
//! - Object storage (S3/MinIO) blobs with a JSON header sidecar
//! - Kind-checked conversion to the persisted element type
//! - Subset and combined output naming

pub mod asc;
pub mod blob;
pub mod cache;
pub mod codec;
pub mod config;
pub mod io;
pub mod paths;

pub use asc::{read_full_grid, write_full_grid, FullGrid, WriteOptions};
pub use blob::{BlobBackend, BlobRecord, ObjectStoreBackend, StringFilter};
pub use cache::{MaskCache, MaskCacheStats};
pub use config::ObjectStorageConfig;
pub use io::{
    load_grid_blob, load_subset_files, read_grid, read_grid_layers, read_mask, read_mask_with_subsets,
    store_grid_blob, write_combined, write_grid, write_subsets,
};
pub use paths::GridPath;
