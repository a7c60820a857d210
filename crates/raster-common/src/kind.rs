//! Scalar storage kinds and their no-data conventions.

use serde::{Deserialize, Serialize};

/// Generic no-data sentinel used by headers when nothing better is known.
pub const NODATA_VALUE: f64 = -9999.0;

/// No-data sentinel for floating point kinds.
pub const MISSING_FLOAT: f64 = -(f32::MAX as f64);

/// Closed set of element types a raster can be stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScalarKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    #[default]
    Unknown,
}

impl ScalarKind {
    /// Every concrete kind, narrowest first.
    pub const ALL: [ScalarKind; 10] = [
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
    ];

    /// Parse from string (case-insensitive). Unrecognized names map to `Unknown`.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "INT8" | "CHAR" | "GDT_INT8" => Self::Int8,
            "UINT8" | "UCHAR" | "BYTE" | "GDT_BYTE" => Self::UInt8,
            "INT16" | "GDT_INT16" => Self::Int16,
            "UINT16" | "GDT_UINT16" => Self::UInt16,
            "INT32" | "INT" | "GDT_INT32" => Self::Int32,
            "UINT32" | "GDT_UINT32" => Self::UInt32,
            "INT64" | "GDT_INT64" => Self::Int64,
            "UINT64" | "GDT_UINT64" => Self::UInt64,
            "FLOAT" | "FLOAT32" | "GDT_FLOAT32" => Self::Float32,
            "DOUBLE" | "FLOAT64" | "GDT_FLOAT64" => Self::Float64,
            _ => Self::Unknown,
        }
    }

    /// Canonical name as persisted in header string fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "INT8",
            Self::UInt8 => "UINT8",
            Self::Int16 => "INT16",
            Self::UInt16 => "UINT16",
            Self::Int32 => "INT32",
            Self::UInt32 => "UINT32",
            Self::Int64 => "INT64",
            Self::UInt64 => "UINT64",
            Self::Float32 => "FLOAT",
            Self::Float64 => "DOUBLE",
            Self::Unknown => "Unknown",
        }
    }

    /// Size of one element in bytes.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::Unknown => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    /// Canonical no-data sentinel: signed kinds use their minimum, unsigned
    /// kinds their maximum, float kinds `MISSING_FLOAT`.
    pub fn default_nodata(&self) -> f64 {
        match self {
            Self::Int8 => i8::MIN as f64,
            Self::UInt8 => u8::MAX as f64,
            Self::Int16 => i16::MIN as f64,
            Self::UInt16 => u16::MAX as f64,
            Self::Int32 => i32::MIN as f64,
            Self::UInt32 => u32::MAX as f64,
            Self::Int64 => i64::MIN as f64,
            Self::UInt64 => u64::MAX as f64,
            Self::Float32 | Self::Float64 => MISSING_FLOAT,
            Self::Unknown => NODATA_VALUE,
        }
    }

    /// Inclusive range of representable values.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let range = match self {
            Self::Int8 => (i8::MIN as f64, i8::MAX as f64),
            Self::UInt8 => (0.0, u8::MAX as f64),
            Self::Int16 => (i16::MIN as f64, i16::MAX as f64),
            Self::UInt16 => (0.0, u16::MAX as f64),
            Self::Int32 => (i32::MIN as f64, i32::MAX as f64),
            Self::UInt32 => (0.0, u32::MAX as f64),
            Self::Int64 => (i64::MIN as f64, i64::MAX as f64),
            Self::UInt64 => (0.0, u64::MAX as f64),
            Self::Float32 => (-(f32::MAX as f64), f32::MAX as f64),
            Self::Float64 => (f64::MIN, f64::MAX),
            Self::Unknown => return None,
        };
        Some(range)
    }

    /// Whether `value` fits this kind without leaving its range.
    pub fn contains(&self, value: f64) -> bool {
        match self.value_range() {
            Some((min, max)) => value >= min && value <= max,
            None => false,
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
