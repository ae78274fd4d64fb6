use super::check::{ensure_eq, ensure_marshal, outputs, returns, CaseResult, Failure};
use super::Case;
use crate::boundary::Boundary;
use crate::error::MarshalError;
use crate::fixture::CONSTANT_NUMBER;
use crate::gtype::GType;
use crate::value::HostValue;

const CATEGORY: &str = "scalars";

/// (name, min, max)
const INTEGERS: [(&str, i128, i128); 8] = [
    ("int8", i8::MIN as i128, i8::MAX as i128),
    ("uint8", 0, u8::MAX as i128),
    ("int16", i16::MIN as i128, i16::MAX as i128),
    ("uint16", 0, u16::MAX as i128),
    ("int32", i32::MIN as i128, i32::MAX as i128),
    ("uint32", 0, u32::MAX as i128),
    ("int64", i64::MIN as i128, i64::MAX as i128),
    ("uint64", 0, u64::MAX as i128),
];

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "boolean", boolean),
        Case::new(CATEGORY, "signed_integers", signed_integers),
        Case::new(CATEGORY, "unsigned_integers", unsigned_integers),
        Case::new(CATEGORY, "integer_out_of_range", integer_out_of_range),
        Case::new(CATEGORY, "float", float),
        Case::new(CATEGORY, "double", double),
        Case::new(CATEGORY, "enum", enum_),
        Case::new(CATEGORY, "enum_rejects_non_member", enum_rejects_non_member),
        Case::new(CATEGORY, "flags", flags),
        Case::new(CATEGORY, "gtype", gtype),
        Case::new(CATEGORY, "gtype_rejects_non_type", gtype_rejects_non_type),
        Case::new(CATEGORY, "constant_number", constant_number),
        Case::new(CATEGORY, "multiple_outputs", multiple_outputs),
    ]
}

fn host_int(value: i128, signed: bool) -> HostValue {
    if signed {
        HostValue::Int(value as i64)
    } else {
        HostValue::UInt(value as u64)
    }
}

/// `return`, `in`, `out` and `inout` of one value per function
fn value_matrix(
    boundary: &mut Boundary,
    prefix: &str,
    value: &HostValue,
    inout: (&str, &HostValue, &HostValue),
) -> CaseResult {
    returns(boundary, &format!("{}_return", prefix), &[], value)?;
    boundary.invoke(&format!("{}_in", prefix), std::slice::from_ref(value))?;
    outputs(boundary, &format!("{}_out", prefix), &[], std::slice::from_ref(value))?;
    let (name, given, replaced) = inout;
    outputs(boundary, name, std::slice::from_ref(given), std::slice::from_ref(replaced))
}

fn boolean(boundary: &mut Boundary) -> CaseResult {
    for (suffix, value) in [("true", true), ("false", false)] {
        let value = HostValue::Bool(value);
        returns(boundary, &format!("boolean_return_{}", suffix), &[], &value)?;
        boundary.invoke(&format!("boolean_in_{}", suffix), std::slice::from_ref(&value))?;
        outputs(boundary, &format!("boolean_out_{}", suffix), &[], std::slice::from_ref(&value))?;
    }
    outputs(
        boundary,
        "boolean_inout_true_false",
        &[HostValue::Bool(true)],
        &[HostValue::Bool(false)],
    )?;
    outputs(
        boundary,
        "boolean_inout_false_true",
        &[HostValue::Bool(false)],
        &[HostValue::Bool(true)],
    )
}

fn signed_integers(boundary: &mut Boundary) -> CaseResult {
    for (name, min, max) in INTEGERS.iter().filter(|(_, min, _)| *min < 0) {
        let (min, max) = (host_int(*min, true), host_int(*max, true));
        for (suffix, value) in [("max", &max), ("min", &min)] {
            returns(boundary, &format!("{}_return_{}", name, suffix), &[], value)?;
            boundary.invoke(&format!("{}_in_{}", name, suffix), std::slice::from_ref(value))?;
            outputs(boundary, &format!("{}_out_{}", name, suffix), &[], std::slice::from_ref(value))?;
        }
        outputs(
            boundary,
            &format!("{}_inout_max_min", name),
            std::slice::from_ref(&max),
            std::slice::from_ref(&min),
        )?;
        outputs(
            boundary,
            &format!("{}_inout_min_max", name),
            std::slice::from_ref(&min),
            std::slice::from_ref(&max),
        )?;
    }
    Ok(())
}

fn unsigned_integers(boundary: &mut Boundary) -> CaseResult {
    for (name, _, max) in INTEGERS.iter().filter(|(_, min, _)| *min == 0) {
        let max = host_int(*max, false);
        value_matrix(
            boundary,
            name,
            &max,
            (&format!("{}_inout", name), &max, &HostValue::UInt(0)),
        )?;
    }
    Ok(())
}

/// Values one past a bound are refused, never wrapped
fn integer_out_of_range(boundary: &mut Boundary) -> CaseResult {
    for (name, min, max) in INTEGERS.iter().filter(|(name, _, _)| !name.ends_with("64")) {
        let signed = *min < 0;
        let function = if signed {
            format!("{}_in_max", name)
        } else {
            format!("{}_in", name)
        };
        let error = ensure_marshal(boundary.invoke(&function, &[host_int(max + 1, signed)]))?;
        if !matches!(error, MarshalError::OutOfRange { .. }) {
            return Err(Failure::Check(format!("{}: expected out of range, got {}", function, error)));
        }
        if signed {
            ensure_marshal(boundary.invoke(&format!("{}_in_min", name), &[host_int(min - 1, true)]))?;
        }
    }
    ensure_marshal(boundary.invoke("uint32_in", &[HostValue::Int(-1)]))?;
    Ok(())
}

fn float(boundary: &mut Boundary) -> CaseResult {
    let max = HostValue::Float(f64::from(f32::MAX));
    let min = HostValue::Float(f64::from(f32::MIN_POSITIVE));
    value_matrix(boundary, "float", &max, ("float_inout", &max, &min))?;
    let error = ensure_marshal(boundary.invoke("float_in", &[HostValue::Float(f64::MAX)]))?;
    ensure_eq(
        "float overflow",
        &matches!(error, MarshalError::OutOfRange { .. }),
        &true,
    )
}

fn double(boundary: &mut Boundary) -> CaseResult {
    let max = HostValue::Float(f64::MAX);
    let min = HostValue::Float(f64::MIN_POSITIVE);
    value_matrix(boundary, "double", &max, ("double_inout", &max, &min))
}

fn enum_(boundary: &mut Boundary) -> CaseResult {
    let value3 = HostValue::Enum(42);
    returns(boundary, "enum_returnv", &[], &value3)?;
    boundary.invoke("enum_inv", std::slice::from_ref(&value3))?;
    outputs(boundary, "enum_outv", &[], std::slice::from_ref(&value3))?;
    outputs(boundary, "enum_inoutv", &[value3], &[HostValue::Enum(0)])
}

fn enum_rejects_non_member(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_marshal(boundary.invoke("enum_inv", &[HostValue::Enum(7)]))?;
    ensure_eq(
        "error",
        &error,
        &MarshalError::InvalidEnumValue {
            type_name: "Enum".to_string(),
            value: 7,
        },
    )
}

fn flags(boundary: &mut Boundary) -> CaseResult {
    let value2 = HostValue::Flags(2);
    returns(boundary, "flags_returnv", &[], &value2)?;
    boundary.invoke("flags_inv", std::slice::from_ref(&value2))?;
    outputs(boundary, "flags_outv", &[], std::slice::from_ref(&value2))?;
    outputs(boundary, "flags_inoutv", &[value2], &[HostValue::Flags(1)])
}

fn gtype(boundary: &mut Boundary) -> CaseResult {
    let none = HostValue::Type(GType::NONE);
    let string = HostValue::Type(GType::STRING);
    returns(boundary, "gtype_return", &[], &none)?;
    returns(boundary, "gtype_string_return", &[], &string)?;
    boundary.invoke("gtype_in", std::slice::from_ref(&none))?;
    boundary.invoke("gtype_string_in", std::slice::from_ref(&string))?;
    outputs(boundary, "gtype_out", &[], std::slice::from_ref(&none))?;
    outputs(boundary, "gtype_string_out", &[], std::slice::from_ref(&string))?;
    outputs(
        boundary,
        "gtype_inout",
        &[none],
        &[HostValue::Type(GType::INT)],
    )
}

fn gtype_rejects_non_type(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_marshal(boundary.invoke("gtype_in", &[HostValue::string("foo")]))?;
    ensure_eq(
        "error",
        &error,
        &MarshalError::TypeMismatch {
            expected: "gtype".to_string(),
            got: "string".to_string(),
        },
    )
}

fn constant_number(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "constant_number", &[], &HostValue::Int(CONSTANT_NUMBER))
}

fn multiple_outputs(boundary: &mut Boundary) -> CaseResult {
    outputs(boundary, "int_out_out", &[], &[HostValue::Int(6), HostValue::Int(7)])?;
    let given = [HostValue::Int(1), HostValue::Int(2), HostValue::Int(3)];
    outputs(boundary, "int_three_in_three_out", &given, &given)?;
    let output = boundary.invoke("int_return_out", &[])?;
    ensure_eq("return", output.ret(), &HostValue::Int(6))?;
    ensure_eq("out", output.out(0), &HostValue::Int(7))
}
