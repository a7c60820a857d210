//! Element types a raster can be stored as.

use num_traits::{Bounded, NumCast, ToPrimitive};
use raster_common::{ScalarKind, MISSING_FLOAT};

/// Tolerance used when comparing floating point cells against no-data.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// A primitive usable as raster storage.
///
/// Ties the compile-time element type to its runtime [`ScalarKind`] tag and
/// provides the range-checked conversions the I/O layer needs.
pub trait RasterScalar:
    Copy + PartialOrd + NumCast + Bounded + Send + Sync + std::fmt::Debug + 'static
{
    /// Runtime tag for this type.
    const KIND: ScalarKind;

    /// Canonical no-data sentinel for this type.
    fn default_nodata() -> Self;

    fn as_f64(self) -> f64 {
        ToPrimitive::to_f64(&self).unwrap_or(f64::NAN)
    }

    /// Convert with a range check. Fractional parts are truncated for
    /// integer types; `None` when the value does not fit.
    fn from_f64_checked(value: f64) -> Option<Self> {
        if Self::KIND.is_float() && !value.is_finite() {
            return NumCast::from(value);
        }
        if !Self::KIND.contains(value) {
            return None;
        }
        NumCast::from(value)
    }

    /// Convert, saturating at the type's bounds.
    fn from_f64_lossy(value: f64) -> Self {
        match Self::from_f64_checked(value) {
            Some(v) => v,
            None if value.is_nan() => Self::default_nodata(),
            None if value < 0.0 => Self::min_value(),
            None => Self::max_value(),
        }
    }

    /// Equality as used for no-data tests.
    fn same_value(self, other: Self) -> bool {
        if !Self::KIND.is_float() {
            return self == other;
        }
        let (a, b) = (self.as_f64(), other.as_f64());
        a == b || (a.is_nan() && b.is_nan()) || (a - b).abs() < FLOAT_TOLERANCE
    }

    /// Discrete key used for grouping and reclassification. Floats are
    /// truncated; `None` when the value has no `i32` key.
    fn to_key(self) -> Option<i32> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_scalar {
    ($t:ty, $kind:expr, $nodata:expr) => {
        impl RasterScalar for $t {
            const KIND: ScalarKind = $kind;

            fn default_nodata() -> Self {
                $nodata
            }
        }
    };
}

impl_raster_scalar!(i8, ScalarKind::Int8, i8::MIN);
impl_raster_scalar!(u8, ScalarKind::UInt8, u8::MAX);
impl_raster_scalar!(i16, ScalarKind::Int16, i16::MIN);
impl_raster_scalar!(u16, ScalarKind::UInt16, u16::MAX);
impl_raster_scalar!(i32, ScalarKind::Int32, i32::MIN);
impl_raster_scalar!(u32, ScalarKind::UInt32, u32::MAX);
impl_raster_scalar!(i64, ScalarKind::Int64, i64::MIN);
impl_raster_scalar!(u64, ScalarKind::UInt64, u64::MAX);
impl_raster_scalar!(f32, ScalarKind::Float32, -f32::MAX);
impl_raster_scalar!(f64, ScalarKind::Float64, MISSING_FLOAT);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(<u8 as RasterScalar>::KIND, ScalarKind::UInt8);
        assert_eq!(<f64 as RasterScalar>::KIND, ScalarKind::Float64);
    }

    #[test]
    fn test_default_nodata_matches_kind() {
        assert_eq!(i16::default_nodata().as_f64(), ScalarKind::Int16.default_nodata());
        assert_eq!(u32::default_nodata().as_f64(), ScalarKind::UInt32.default_nodata());
        assert_eq!(f32::default_nodata().as_f64(), MISSING_FLOAT);
        assert_eq!(f64::default_nodata(), MISSING_FLOAT);
    }

    #[test]
    fn test_checked_conversion() {
        assert_eq!(u8::from_f64_checked(255.0), Some(255));
        assert_eq!(u8::from_f64_checked(256.0), None);
        assert_eq!(u8::from_f64_checked(-1.0), None);
        assert_eq!(i8::from_f64_checked(-128.0), Some(-128));
        assert_eq!(i32::from_f64_checked(3.7), Some(3));
        assert_eq!(f32::from_f64_checked(1e39), None);
        assert!(f32::from_f64_checked(f64::NAN).unwrap().is_nan());
    }

    #[test]
    fn test_lossy_conversion_saturates() {
        assert_eq!(u8::from_f64_lossy(-9999.0), 0);
        assert_eq!(u8::from_f64_lossy(1000.0), 255);
        assert_eq!(i16::from_f64_lossy(-9999.0), -9999);
    }

    #[test]
    fn test_same_value() {
        assert!((-9999.0f32).same_value(-9999.0));
        assert!(1.0f64.same_value(1.0 + 1e-9));
        assert!(!1.0f64.same_value(1.1));
        assert!(f64::NAN.same_value(f64::NAN));
        assert!(!3i32.same_value(4));
    }

    #[test]
    fn test_to_key_truncates() {
        assert_eq!(3.9f32.to_key(), Some(3));
        assert_eq!((-2.5f64).to_key(), Some(-2));
        assert_eq!(7u8.to_key(), Some(7));
    }

    #[test]
    fn test_to_key_out_of_range() {
        assert_eq!(3_000_000_000u32.to_key(), None);
        assert_eq!(i64::MIN.to_key(), None);
        assert_eq!(u64::MAX.to_key(), None);
        assert_eq!(1e12f64.to_key(), None);
        assert_eq!(f32::NAN.to_key(), None);
        assert_eq!((i32::MAX as u32).to_key(), Some(i32::MAX));
    }
}
