//! Scalars: booleans, integers of every width, floats, enums, flags and
//! type identifiers

use super::{expect, Types, CONSTANT_NUMBER};
use crate::descriptor::{ArgInfo, CallableInfo, IntWidth, Signedness, TypeDescriptor};
use crate::error::RegistryError;
use crate::gtype::GType;
use crate::heap::NativeRepr;
use crate::invoke::native;
use crate::marshal::scalar;
use crate::registry::Library;
use crate::transfer::TransferMode;

const INT_TYPES: [(&str, IntWidth, Signedness); 8] = [
    ("int8", IntWidth::W8, Signedness::Signed),
    ("uint8", IntWidth::W8, Signedness::Unsigned),
    ("int16", IntWidth::W16, Signedness::Signed),
    ("uint16", IntWidth::W16, Signedness::Unsigned),
    ("int32", IntWidth::W32, Signedness::Signed),
    ("uint32", IntWidth::W32, Signedness::Unsigned),
    ("int64", IntWidth::W64, Signedness::Signed),
    ("uint64", IntWidth::W64, Signedness::Unsigned),
];

/// Smallest and largest value of an integer type
pub fn bounds(width: IntWidth, signedness: Signedness) -> (i128, i128) {
    let bits = width.bits();
    match signedness {
        Signedness::Signed => (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1),
        Signedness::Unsigned => (0, (1i128 << bits) - 1),
    }
}

pub(super) fn register(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    for (name, width, signedness) in INT_TYPES {
        register_int(library, name, width, signedness)?;
    }

    let boolean = TypeDescriptor::Boolean;
    for (suffix, value) in [("true", true), ("false", false)] {
        let repr = NativeRepr::Bool(value);
        value_return(library, &format!("boolean_return_{}", suffix), &boolean, repr.clone())?;
        value_in(library, &format!("boolean_in_{}", suffix), &boolean, repr.clone())?;
        value_out(library, &format!("boolean_out_{}", suffix), &boolean, repr)?;
    }
    value_inout(
        library,
        "boolean_inout_true_false",
        &boolean,
        NativeRepr::Bool(true),
        NativeRepr::Bool(false),
    )?;
    value_inout(
        library,
        "boolean_inout_false_true",
        &boolean,
        NativeRepr::Bool(false),
        NativeRepr::Bool(true),
    )?;

    let float = TypeDescriptor::float();
    value_return(library, "float_return", &float, NativeRepr::F32(f32::MAX))?;
    value_in(library, "float_in", &float, NativeRepr::F32(f32::MAX))?;
    value_out(library, "float_out", &float, NativeRepr::F32(f32::MAX))?;
    value_inout(
        library,
        "float_inout",
        &float,
        NativeRepr::F32(f32::MAX),
        NativeRepr::F32(f32::MIN_POSITIVE),
    )?;

    let double = TypeDescriptor::double();
    value_return(library, "double_return", &double, NativeRepr::F64(f64::MAX))?;
    value_in(library, "double_in", &double, NativeRepr::F64(f64::MAX))?;
    value_out(library, "double_out", &double, NativeRepr::F64(f64::MAX))?;
    value_inout(
        library,
        "double_inout",
        &double,
        NativeRepr::F64(f64::MAX),
        NativeRepr::F64(f64::MIN_POSITIVE),
    )?;

    let enum_ = TypeDescriptor::Enum(std::sync::Arc::clone(&types.enum_));
    value_return(library, "enum_returnv", &enum_, NativeRepr::I32(42))?;
    value_in(library, "enum_inv", &enum_, NativeRepr::I32(42))?;
    value_out(library, "enum_outv", &enum_, NativeRepr::I32(42))?;
    value_inout(library, "enum_inoutv", &enum_, NativeRepr::I32(42), NativeRepr::I32(0))?;

    let flags = TypeDescriptor::Flags(std::sync::Arc::clone(&types.flags));
    value_return(library, "flags_returnv", &flags, NativeRepr::U32(2))?;
    value_in(library, "flags_inv", &flags, NativeRepr::U32(2))?;
    value_out(library, "flags_outv", &flags, NativeRepr::U32(2))?;
    value_inout(library, "flags_inoutv", &flags, NativeRepr::U32(2), NativeRepr::U32(1))?;

    let gtype = TypeDescriptor::GType;
    let word = |t: GType| NativeRepr::U64(t.raw());
    value_return(library, "gtype_return", &gtype, word(GType::NONE))?;
    value_in(library, "gtype_in", &gtype, word(GType::NONE))?;
    value_out(library, "gtype_out", &gtype, word(GType::NONE))?;
    value_return(library, "gtype_string_return", &gtype, word(GType::STRING))?;
    value_in(library, "gtype_string_in", &gtype, word(GType::STRING))?;
    value_out(library, "gtype_string_out", &gtype, word(GType::STRING))?;
    value_inout(library, "gtype_inout", &gtype, word(GType::NONE), word(GType::INT))?;

    value_return(
        library,
        "constant_number",
        &TypeDescriptor::int32(),
        NativeRepr::I32(CONSTANT_NUMBER as i32),
    )?;

    register_multiple_outputs(library)
}

fn register_int(
    library: &mut Library,
    name: &str,
    width: IntWidth,
    signedness: Signedness,
) -> Result<(), RegistryError> {
    let ty = TypeDescriptor::Int { width, signedness };
    let (min, max) = bounds(width, signedness);
    // the bounds of a width always fit it
    let repr = |v: i128| scalar::int_from_i128(v, width, signedness).unwrap_or_else(|| scalar::zero(width, signedness));

    match signedness {
        Signedness::Signed => {
            for (suffix, value) in [("max", max), ("min", min)] {
                value_return(library, &format!("{}_return_{}", name, suffix), &ty, repr(value))?;
                value_in(library, &format!("{}_in_{}", name, suffix), &ty, repr(value))?;
                value_out(library, &format!("{}_out_{}", name, suffix), &ty, repr(value))?;
            }
            value_inout(library, &format!("{}_inout_max_min", name), &ty, repr(max), repr(min))?;
            value_inout(library, &format!("{}_inout_min_max", name), &ty, repr(min), repr(max))?;
        }
        Signedness::Unsigned => {
            value_return(library, &format!("{}_return", name), &ty, repr(max))?;
            value_in(library, &format!("{}_in", name), &ty, repr(max))?;
            value_out(library, &format!("{}_out", name), &ty, repr(max))?;
            value_inout(library, &format!("{}_inout", name), &ty, repr(max), repr(0))?;
        }
    }
    Ok(())
}

fn value_return(
    library: &mut Library,
    name: &str,
    ty: &TypeDescriptor,
    value: NativeRepr,
) -> Result<(), RegistryError> {
    let info = CallableInfo::new(name).returns(ty.clone(), TransferMode::None);
    library.register_function(
        info,
        native(move |frame| {
            frame.set_return(value.clone());
            Ok(())
        }),
    )
}

fn value_in(
    library: &mut Library,
    name: &str,
    ty: &TypeDescriptor,
    expected: NativeRepr,
) -> Result<(), RegistryError> {
    let info = CallableInfo::new(name).arg(ArgInfo::new("v", ty.clone()));
    library.register_function(info, native(move |frame| expect("v", frame.arg(0), &expected)))
}

fn value_out(
    library: &mut Library,
    name: &str,
    ty: &TypeDescriptor,
    value: NativeRepr,
) -> Result<(), RegistryError> {
    let info = CallableInfo::new(name).arg(ArgInfo::new("v", ty.clone()).out());
    library.register_function(
        info,
        native(move |frame| {
            frame.set_arg(0, value.clone());
            Ok(())
        }),
    )
}

fn value_inout(
    library: &mut Library,
    name: &str,
    ty: &TypeDescriptor,
    expected: NativeRepr,
    replacement: NativeRepr,
) -> Result<(), RegistryError> {
    let info = CallableInfo::new(name).arg(ArgInfo::new("v", ty.clone()).inout());
    library.register_function(
        info,
        native(move |frame| {
            expect("v", frame.arg(0), &expected)?;
            frame.set_arg(0, replacement.clone());
            Ok(())
        }),
    )
}

fn register_multiple_outputs(library: &mut Library) -> Result<(), RegistryError> {
    let int = TypeDescriptor::int32;

    library.register_function(
        CallableInfo::new("int_out_out")
            .arg(ArgInfo::new("int0", int()).out())
            .arg(ArgInfo::new("int1", int()).out()),
        native(|frame| {
            frame.set_arg(0, NativeRepr::I32(6));
            frame.set_arg(1, NativeRepr::I32(7));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("int_three_in_three_out")
            .arg(ArgInfo::new("a", int()))
            .arg(ArgInfo::new("b", int()))
            .arg(ArgInfo::new("c", int()))
            .arg(ArgInfo::new("out0", int()).out())
            .arg(ArgInfo::new("out1", int()).out())
            .arg(ArgInfo::new("out2", int()).out()),
        native(|frame| {
            for i in 0..3 {
                let value = frame.arg(i).clone();
                frame.set_arg(i + 3, value);
            }
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("int_return_out")
            .arg(ArgInfo::new("int_", int()).out())
            .returns(int(), TransferMode::None),
        native(|frame| {
            frame.set_return(NativeRepr::I32(6));
            frame.set_arg(0, NativeRepr::I32(7));
            Ok(())
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert_eq!(bounds(IntWidth::W8, Signedness::Signed), (-128, 127));
        assert_eq!(bounds(IntWidth::W8, Signedness::Unsigned), (0, 255));
        assert_eq!(
            bounds(IntWidth::W64, Signedness::Signed),
            (i64::MIN as i128, i64::MAX as i128)
        );
        assert_eq!(bounds(IntWidth::W64, Signedness::Unsigned), (0, u64::MAX as i128));
    }
}
