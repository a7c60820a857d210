//! Options controlling how a grid is built.

use raster_common::NODATA_VALUE;
use serde::{Deserialize, Serialize};

/// Construction options for a [`RasterGrid`](crate::RasterGrid).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridOptions {
    /// Store only valid cells plus a position index.
    pub compress: bool,

    /// Keep the mask's full extent instead of shrinking to the overlap.
    pub use_mask_extent: bool,

    /// Value substituted where the mask covers cells this grid has no data for.
    /// `NODATA_VALUE` means "no substitution".
    pub default_value: f64,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            compress: false,
            use_mask_extent: true,
            default_value: NODATA_VALUE,
        }
    }
}

impl GridOptions {
    /// Load options from environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(val) = std::env::var("RASTER_COMPRESS") {
            options.compress = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("RASTER_USE_MASK_EXTENT") {
            options.use_mask_extent = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("RASTER_DEFAULT_VALUE") {
            if let Ok(v) = val.parse() {
                options.default_value = v;
            }
        }

        options
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), String> {
        if !self.default_value.is_finite() {
            return Err("default_value must be finite".to_string());
        }
        Ok(())
    }

    pub fn compressed() -> Self {
        Self {
            compress: true,
            ..Self::default()
        }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_use_mask_extent(mut self, use_mask_extent: bool) -> Self {
        self.use_mask_extent = use_mask_extent;
        self
    }

    pub fn with_default_value(mut self, default_value: f64) -> Self {
        self.default_value = default_value;
        self
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GridOptions::default();
        assert!(!options.compress);
        assert!(options.use_mask_extent);
        assert_eq!(options.default_value, NODATA_VALUE);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = GridOptions::compressed()
            .with_use_mask_extent(false)
            .with_default_value(0.0);
        assert!(options.compress);
        assert!(!options.use_mask_extent);
        assert_eq!(options.default_value, 0.0);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let options = GridOptions::default().with_default_value(f64::NAN);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let options = GridOptions::compressed();
        let json = serde_json::to_string(&options).unwrap();
        let back: GridOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
