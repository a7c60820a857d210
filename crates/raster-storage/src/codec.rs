//! Kind-checked value conversion and little-endian byte encoding.
//!
//! Every persisted payload passes through [`convert_to_kind`] first, so the
//! encoder only ever sees values that fit the target kind.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rayon::prelude::*;
use raster_common::{RasterError, RasterResult, ScalarKind};
use raster_core::{RasterScalar, FLOAT_TOLERANCE};

/// Values converted to a target kind, still held as `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub values: Vec<f64>,
    /// No-data after conversion. Differs from the source no-data when that
    /// value does not fit the target kind.
    pub nodata: f64,
}

fn is_nodata(value: f64, nodata: f64) -> bool {
    value == nodata || (value.is_nan() && nodata.is_nan()) || (value - nodata).abs() < FLOAT_TOLERANCE
}

/// Convert `values` so each fits `kind`.
///
/// No-data cells are rewritten to `kind`'s default no-data when the source
/// no-data is out of range. Any other value out of range fails with
/// `TypeConversionOverflow`. Integer kinds truncate fractions.
pub fn convert_to_kind(values: &[f64], nodata: f64, kind: ScalarKind) -> RasterResult<Converted> {
    if kind == ScalarKind::Unknown {
        return Err(RasterError::UnknownKind(kind.as_str().to_string()));
    }
    let target_nodata = if kind.contains(nodata) {
        nodata
    } else {
        kind.default_nodata()
    };

    let converted: Vec<Option<f64>> = values
        .par_iter()
        .map(|&v| {
            if is_nodata(v, nodata) {
                Some(target_nodata)
            } else if !v.is_finite() {
                kind.is_float().then_some(v)
            } else if kind.contains(v) {
                Some(if kind.is_float() { v } else { v.trunc() })
            } else {
                None
            }
        })
        .collect();

    let overflow = converted.iter().filter(|v| v.is_none()).count();
    if overflow > 0 {
        return Err(RasterError::TypeConversionOverflow {
            kind,
            count: overflow,
        });
    }

    Ok(Converted {
        values: converted.into_iter().flatten().collect(),
        nodata: target_nodata,
    })
}

/// Convert to the in-memory element type `T`.
///
/// Returns the values and the no-data they now use.
pub fn cast_values<T: RasterScalar>(values: &[f64], nodata: f64) -> RasterResult<(Vec<T>, T)> {
    let converted = convert_to_kind(values, nodata, T::KIND)?;
    let cast = converted
        .values
        .par_iter()
        .map(|&v| T::from_f64_lossy(v))
        .collect();
    Ok((cast, T::from_f64_lossy(converted.nodata)))
}

/// Encode values as little-endian `kind` elements.
///
/// Values are expected to have gone through [`convert_to_kind`].
pub fn encode(values: &[f64], kind: ScalarKind) -> RasterResult<Bytes> {
    let width = kind
        .byte_width()
        .ok_or_else(|| RasterError::UnknownKind(kind.as_str().to_string()))?;
    let mut buf = BytesMut::with_capacity(values.len() * width);
    for &v in values {
        match kind {
            ScalarKind::Int8 => buf.put_i8(v as i8),
            ScalarKind::UInt8 => buf.put_u8(v as u8),
            ScalarKind::Int16 => buf.put_i16_le(v as i16),
            ScalarKind::UInt16 => buf.put_u16_le(v as u16),
            ScalarKind::Int32 => buf.put_i32_le(v as i32),
            ScalarKind::UInt32 => buf.put_u32_le(v as u32),
            ScalarKind::Int64 => buf.put_i64_le(v as i64),
            ScalarKind::UInt64 => buf.put_u64_le(v as u64),
            ScalarKind::Float32 => buf.put_f32_le(v as f32),
            ScalarKind::Float64 => buf.put_f64_le(v),
            ScalarKind::Unknown => unreachable!("width checked above"),
        }
    }
    Ok(buf.freeze())
}

/// Decode little-endian `kind` elements.
pub fn decode(mut data: &[u8], kind: ScalarKind) -> RasterResult<Vec<f64>> {
    let width = kind
        .byte_width()
        .ok_or_else(|| RasterError::UnknownKind(kind.as_str().to_string()))?;
    if data.len() % width != 0 {
        return Err(RasterError::Metadata(format!(
            "{} bytes is not a whole number of {} elements",
            data.len(),
            kind
        )));
    }

    let mut values = Vec::with_capacity(data.len() / width);
    while data.has_remaining() {
        let v = match kind {
            ScalarKind::Int8 => data.get_i8() as f64,
            ScalarKind::UInt8 => data.get_u8() as f64,
            ScalarKind::Int16 => data.get_i16_le() as f64,
            ScalarKind::UInt16 => data.get_u16_le() as f64,
            ScalarKind::Int32 => data.get_i32_le() as f64,
            ScalarKind::UInt32 => data.get_u32_le() as f64,
            ScalarKind::Int64 => data.get_i64_le() as f64,
            ScalarKind::UInt64 => data.get_u64_le() as f64,
            ScalarKind::Float32 => data.get_f32_le() as f64,
            ScalarKind::Float64 => data.get_f64_le(),
            ScalarKind::Unknown => unreachable!("width checked above"),
        };
        values.push(v);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodata_resubstituted_when_out_of_range() {
        let converted = convert_to_kind(&[1.0, -9999.0, 200.0], -9999.0, ScalarKind::UInt8).unwrap();
        assert_eq!(converted.nodata, 255.0);
        assert_eq!(converted.values, vec![1.0, 255.0, 200.0]);
    }

    #[test]
    fn test_out_of_range_values_fail() {
        let err = convert_to_kind(&[1.0, 300.0, -2.0], -9999.0, ScalarKind::UInt8).unwrap_err();
        match err {
            RasterError::TypeConversionOverflow { kind, count } => {
                assert_eq!(kind, ScalarKind::UInt8);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_integer_kinds_truncate() {
        let converted = convert_to_kind(&[2.7, -1.5], -9999.0, ScalarKind::Int16).unwrap();
        assert_eq!(converted.values, vec![2.0, -1.0]);
        assert_eq!(converted.nodata, -9999.0);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(matches!(
            convert_to_kind(&[1.0], 0.0, ScalarKind::Unknown),
            Err(RasterError::UnknownKind(_))
        ));
        assert!(encode(&[1.0], ScalarKind::Unknown).is_err());
    }

    #[test]
    fn test_encoding_is_little_endian() {
        let bytes = encode(&[1.0, 258.0], ScalarKind::UInt16).unwrap();
        assert_eq!(bytes.as_ref(), &[1, 0, 2, 1]);
        assert_eq!(decode(&bytes, ScalarKind::UInt16).unwrap(), vec![1.0, 258.0]);
    }

    #[test]
    fn test_decode_rejects_partial_elements() {
        assert!(decode(&[0, 0, 0], ScalarKind::Int32).is_err());
    }

    #[test]
    fn test_cast_values_to_i16() {
        let (values, nodata) = cast_values::<i16>(&[3.0, -9999.0], -9999.0).unwrap();
        assert_eq!(values, vec![3, -9999]);
        assert_eq!(nodata, -9999);
    }
}
