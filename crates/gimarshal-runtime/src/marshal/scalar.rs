//! Scalar conversions - integers, floats, enums, flags, length parameters
//!
//! Every conversion is range-checked; nothing wraps or saturates.

use crate::descriptor::{EnumInfo, FloatWidth, IntWidth, Signedness};
use crate::error::{MarshalError, TruncationError};
use crate::heap::NativeRepr;
use crate::value::HostValue;

fn int_name(width: IntWidth, signedness: Signedness) -> String {
    match signedness {
        Signedness::Signed => format!("int{}", width.bits()),
        Signedness::Unsigned => format!("uint{}", width.bits()),
    }
}

/// Store `value` in the native integer of the given width, if it fits
pub fn int_from_i128(value: i128, width: IntWidth, signedness: Signedness) -> Option<NativeRepr> {
    match (width, signedness) {
        (IntWidth::W8, Signedness::Signed) => i8::try_from(value).ok().map(NativeRepr::I8),
        (IntWidth::W8, Signedness::Unsigned) => u8::try_from(value).ok().map(NativeRepr::U8),
        (IntWidth::W16, Signedness::Signed) => i16::try_from(value).ok().map(NativeRepr::I16),
        (IntWidth::W16, Signedness::Unsigned) => u16::try_from(value).ok().map(NativeRepr::U16),
        (IntWidth::W32, Signedness::Signed) => i32::try_from(value).ok().map(NativeRepr::I32),
        (IntWidth::W32, Signedness::Unsigned) => u32::try_from(value).ok().map(NativeRepr::U32),
        (IntWidth::W64, Signedness::Signed) => i64::try_from(value).ok().map(NativeRepr::I64),
        (IntWidth::W64, Signedness::Unsigned) => u64::try_from(value).ok().map(NativeRepr::U64),
    }
}

/// Zero of the given integer width
pub fn zero(width: IntWidth, signedness: Signedness) -> NativeRepr {
    // zero fits every width
    int_from_i128(0, width, signedness).unwrap_or(NativeRepr::I32(0))
}

pub fn int_to_native(
    value: &HostValue,
    width: IntWidth,
    signedness: Signedness,
) -> Result<NativeRepr, MarshalError> {
    let wide: i128 = match value {
        HostValue::Int(v) => *v as i128,
        HostValue::UInt(v) => *v as i128,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: int_name(width, signedness),
                got: other.type_name().to_string(),
            })
        }
    };
    int_from_i128(wide, width, signedness).ok_or_else(|| MarshalError::OutOfRange {
        value: wide.to_string(),
        target: int_name(width, signedness),
    })
}

pub fn int_from_native(
    repr: &NativeRepr,
    width: IntWidth,
    signedness: Signedness,
) -> Result<HostValue, MarshalError> {
    let wide = repr.as_int().ok_or_else(|| MarshalError::TypeMismatch {
        expected: int_name(width, signedness),
        got: format!("{:?}", repr),
    })?;
    if int_from_i128(wide, width, signedness).is_none() {
        return Err(MarshalError::OutOfRange {
            value: wide.to_string(),
            target: int_name(width, signedness),
        });
    }
    Ok(match signedness {
        Signedness::Signed => HostValue::Int(wide as i64),
        Signedness::Unsigned => HostValue::UInt(wide as u64),
    })
}

pub fn float_to_native(value: &HostValue, width: FloatWidth) -> Result<NativeRepr, MarshalError> {
    let v = match value {
        HostValue::Float(f) => *f,
        HostValue::Int(i) => *i as f64,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: "float".to_string(),
                got: other.type_name().to_string(),
            })
        }
    };
    match width {
        FloatWidth::F64 => Ok(NativeRepr::F64(v)),
        FloatWidth::F32 => {
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                Err(MarshalError::OutOfRange {
                    value: v.to_string(),
                    target: "float".to_string(),
                })
            } else {
                Ok(NativeRepr::F32(v as f32))
            }
        }
    }
}

pub fn float_from_native(repr: &NativeRepr) -> Result<HostValue, MarshalError> {
    repr.as_f64()
        .map(HostValue::Float)
        .ok_or_else(|| MarshalError::TypeMismatch {
            expected: "float".to_string(),
            got: format!("{:?}", repr),
        })
}

pub fn enum_to_native(value: &HostValue, info: &EnumInfo) -> Result<NativeRepr, MarshalError> {
    let v = match value {
        HostValue::Enum(v) | HostValue::Int(v) => *v,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: format!("enum {}", info.name),
                got: other.type_name().to_string(),
            })
        }
    };
    if info.member(v).is_none() {
        return Err(MarshalError::InvalidEnumValue {
            type_name: info.name.clone(),
            value: v,
        });
    }
    int_from_i128(v as i128, info.width, info.signedness).ok_or_else(|| MarshalError::OutOfRange {
        value: v.to_string(),
        target: info.name.clone(),
    })
}

pub fn enum_from_native(repr: &NativeRepr, info: &EnumInfo) -> Result<HostValue, MarshalError> {
    let v = repr
        .as_i64()
        .ok_or_else(|| MarshalError::TypeMismatch {
            expected: format!("enum {}", info.name),
            got: format!("{:?}", repr),
        })?;
    if info.member(v).is_none() {
        return Err(MarshalError::InvalidEnumValue {
            type_name: info.name.clone(),
            value: v,
        });
    }
    Ok(HostValue::Enum(v))
}

pub fn flags_to_native(value: &HostValue, info: &EnumInfo) -> Result<NativeRepr, MarshalError> {
    let bits = match value {
        HostValue::Flags(v) | HostValue::UInt(v) => *v as i128,
        HostValue::Int(v) if *v >= 0 => *v as i128,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: format!("flags {}", info.name),
                got: other.type_name().to_string(),
            })
        }
    };
    // flags are stored unsigned regardless of the declared signedness
    int_from_i128(bits, info.width, Signedness::Unsigned).ok_or_else(|| MarshalError::OutOfRange {
        value: bits.to_string(),
        target: info.name.clone(),
    })
}

pub fn flags_from_native(repr: &NativeRepr, info: &EnumInfo) -> Result<HostValue, MarshalError> {
    let bits = repr.as_int().ok_or_else(|| MarshalError::TypeMismatch {
        expected: format!("flags {}", info.name),
        got: format!("{:?}", repr),
    })?;
    u64::try_from(bits)
        .map(HostValue::Flags)
        .map_err(|_| MarshalError::OutOfRange {
            value: bits.to_string(),
            target: info.name.clone(),
        })
}

/// Encode an array length into its length parameter
pub fn length_to_native(
    length: usize,
    width: IntWidth,
    signedness: Signedness,
) -> Result<NativeRepr, TruncationError> {
    int_from_i128(length as i128, width, signedness).ok_or(TruncationError {
        length: length as u128,
        width,
        signedness,
    })
}

/// Decode a length parameter written by the native side
pub fn length_from_native(repr: &NativeRepr) -> Result<usize, MarshalError> {
    let wide = repr.as_int().ok_or_else(|| MarshalError::TypeMismatch {
        expected: "integer length".to_string(),
        got: format!("{:?}", repr),
    })?;
    usize::try_from(wide).map_err(|_| MarshalError::OutOfRange {
        value: wide.to_string(),
        target: "array length".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_boundaries() {
        assert_eq!(
            int_to_native(&HostValue::Int(i8::MAX as i64), IntWidth::W8, Signedness::Signed),
            Ok(NativeRepr::I8(i8::MAX))
        );
        assert!(matches!(
            int_to_native(&HostValue::Int(128), IntWidth::W8, Signedness::Signed),
            Err(MarshalError::OutOfRange { .. })
        ));
        assert!(matches!(
            int_to_native(&HostValue::Int(-1), IntWidth::W32, Signedness::Unsigned),
            Err(MarshalError::OutOfRange { .. })
        ));
        assert_eq!(
            int_to_native(&HostValue::UInt(u64::MAX), IntWidth::W64, Signedness::Unsigned),
            Ok(NativeRepr::U64(u64::MAX))
        );
    }

    #[test]
    fn test_int_from_native_checks_width() {
        assert_eq!(
            int_from_native(&NativeRepr::U8(255), IntWidth::W8, Signedness::Unsigned),
            Ok(HostValue::UInt(255))
        );
        assert!(int_from_native(&NativeRepr::I32(300), IntWidth::W8, Signedness::Signed).is_err());
    }

    #[test]
    fn test_float32_range() {
        assert_eq!(
            float_to_native(&HostValue::Float(1.5), FloatWidth::F32),
            Ok(NativeRepr::F32(1.5))
        );
        assert!(float_to_native(&HostValue::Float(f64::MAX), FloatWidth::F32).is_err());
        assert!(float_to_native(&HostValue::Float(f64::INFINITY), FloatWidth::F32).is_ok());
    }

    #[test]
    fn test_enum_membership() {
        let info = EnumInfo::new("Enum", &[("VALUE1", 0), ("VALUE2", 1), ("VALUE3", 42)]);
        assert_eq!(enum_to_native(&HostValue::Enum(42), &info), Ok(NativeRepr::I32(42)));
        assert!(matches!(
            enum_to_native(&HostValue::Enum(7), &info),
            Err(MarshalError::InvalidEnumValue { value: 7, .. })
        ));
        assert_eq!(enum_from_native(&NativeRepr::I32(1), &info), Ok(HostValue::Enum(1)));
    }

    #[test]
    fn test_length_truncation() {
        assert_eq!(
            length_to_native(255, IntWidth::W8, Signedness::Unsigned),
            Ok(NativeRepr::U8(255))
        );
        let err = length_to_native(256, IntWidth::W8, Signedness::Unsigned).unwrap_err();
        assert_eq!(err.length, 256);
        assert!(length_to_native(128, IntWidth::W8, Signedness::Signed).is_err());
        assert!(length_from_native(&NativeRepr::I32(-1)).is_err());
    }
}
