use super::check::{
    accepts, ensure, ensure_eq, ensure_marshal, long_field, outputs, returns, string_list, strings, CaseResult,
};
use super::Case;
use crate::boundary::Boundary;
use crate::error::MarshalError;
use crate::value::HostValue;

const CATEGORY: &str = "containers";

const MODES: [&str; 3] = ["none", "container", "full"];

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "array_fixed", array_fixed),
        Case::new(CATEGORY, "array_fixed_length_checked", array_fixed_length_checked),
        Case::new(CATEGORY, "array_length_param", array_length_param),
        Case::new(CATEGORY, "array_length_widths", array_length_widths),
        Case::new(CATEGORY, "array_length_truncation", array_length_truncation),
        Case::new(CATEGORY, "array_in_sum", array_in_sum),
        Case::new(CATEGORY, "array_out_etc", array_out_etc),
        Case::new(CATEGORY, "array_zero_terminated", array_zero_terminated),
        Case::new(CATEGORY, "array_zero_terminated_structs", array_zero_terminated_structs),
        Case::new(CATEGORY, "list", list),
        Case::new(CATEGORY, "slist", slist),
        Case::new(CATEGORY, "map_int", map_int),
        Case::new(CATEGORY, "map_utf8", map_utf8),
        Case::new(CATEGORY, "null_is_not_empty", null_is_not_empty),
    ]
}

fn array_fixed(boundary: &mut Boundary) -> CaseResult {
    let fixed = HostValue::ints([-1, 0, 1, 2]);
    returns(boundary, "array_fixed_int_return", &[], &fixed)?;
    accepts(boundary, "array_fixed_int_in", std::slice::from_ref(&fixed))?;
    outputs(boundary, "array_fixed_out", &[], std::slice::from_ref(&fixed))?;
    outputs(boundary, "array_fixed_inout", std::slice::from_ref(&fixed), &[HostValue::ints([2, 1, 0, -1])])?;
    outputs(boundary, "array_fixed_caller_allocated_out", &[], &[fixed])
}

fn array_fixed_length_checked(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_marshal(boundary.invoke("array_fixed_int_in", &[HostValue::ints([-1, 0, 1])]))?;
    ensure_eq("error", &error, &MarshalError::FixedLength { expected: 4, got: 3 })
}

/// The length parameter is hidden from the host in both directions
fn array_length_param(boundary: &mut Boundary) -> CaseResult {
    let ints = HostValue::ints([-1, 0, 1, 2]);
    let output = accepts(boundary, "array_return", &[])?;
    ensure_eq("array_return", output.ret(), &ints)?;
    ensure_eq("array_return outs", &output.outs.len(), &0)?;

    accepts(boundary, "array_in", std::slice::from_ref(&ints))?;
    accepts(boundary, "array_in_len_before", std::slice::from_ref(&ints))?;
    outputs(boundary, "array_out", &[], std::slice::from_ref(&ints))?;
    outputs(boundary, "array_inout", &[ints], &[HostValue::ints([-2, -1, 0, 1, 2])])
}

fn array_length_widths(boundary: &mut Boundary) -> CaseResult {
    let ints = HostValue::ints([-1, 0, 1, 2]);
    accepts(boundary, "array_in_guint8_len", std::slice::from_ref(&ints))?;
    accepts(boundary, "array_in_guint64_len", &[ints])?;
    Ok(())
}

/// 256 elements do not fit a `uint8` length; nothing is left allocated
fn array_length_truncation(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_marshal(boundary.invoke("array_in_guint8_len", &[HostValue::ints(0..256)]))?;
    ensure(
        matches!(error, MarshalError::Truncation(_)),
        "a truncation error",
    )
}

/// 64-bit sum of a caller-owned array; the array is left as it was
fn array_in_sum(boundary: &mut Boundary) -> CaseResult {
    let given = HostValue::ints([1, -1, i32::MAX as i64, i32::MIN as i64, 0]);
    let snapshot = given.clone();
    outputs(boundary, "array_in_sum", std::slice::from_ref(&given), &[HostValue::Int(-1)])?;
    ensure_eq("input", &given, &snapshot)
}

fn array_out_etc(boundary: &mut Boundary) -> CaseResult {
    outputs(
        boundary,
        "array_out_etc",
        &[HostValue::Int(9), HostValue::Int(5)],
        &[HostValue::ints([9, 0, 1, 5]), HostValue::Int(14)],
    )
}

fn array_zero_terminated(boundary: &mut Boundary) -> CaseResult {
    let strv = strings(&["0", "1", "2"]);
    returns(boundary, "array_zero_terminated_return", &[], &strv)?;
    returns(boundary, "array_zero_terminated_return_null", &[], &HostValue::Null)?;
    returns(boundary, "array_zero_terminated_full_return", &[], &strv)?;
    accepts(boundary, "array_zero_terminated_in", std::slice::from_ref(&strv))?;
    outputs(boundary, "array_zero_terminated_out", &[], std::slice::from_ref(&strv))?;
    outputs(
        boundary,
        "array_zero_terminated_inout",
        &[strv],
        &[strings(&["-1", "0", "1", "2"])],
    )
}

fn array_zero_terminated_structs(boundary: &mut Boundary) -> CaseResult {
    let output = accepts(boundary, "array_zero_terminated_return_struct", &[])?;
    let longs = output
        .ret()
        .as_seq()
        .unwrap_or_default()
        .iter()
        .map(long_field)
        .collect::<Result<Vec<_>, _>>()?;
    ensure_eq("longs", longs.as_slice(), &[42, 43, 44][..])
}

fn lists(boundary: &mut Boundary, prefix: &str) -> CaseResult {
    for mode in MODES {
        returns(
            boundary,
            &format!("{}_utf8_{}_return", prefix, mode),
            &[],
            &string_list(&["0", "1", "2"]),
        )?;
        outputs(
            boundary,
            &format!("{}_utf8_{}_inout", prefix, mode),
            &[string_list(&["0", "1", "2"])],
            &[string_list(&["-2", "-1", "0", "1"])],
        )?;
    }
    let ints = HostValue::List(vec![
        HostValue::Int(-1),
        HostValue::Int(0),
        HostValue::Int(1),
        HostValue::Int(2),
    ]);
    accepts(boundary, &format!("{}_int_none_in", prefix), &[ints])?;
    accepts(
        boundary,
        &format!("{}_utf8_none_in", prefix),
        &[string_list(&["0", "1", "2"])],
    )?;
    Ok(())
}

fn list(boundary: &mut Boundary) -> CaseResult {
    lists(boundary, "list")
}

fn slist(boundary: &mut Boundary) -> CaseResult {
    lists(boundary, "slist")
}

fn map_int(boundary: &mut Boundary) -> CaseResult {
    let want = HostValue::Map(
        [(-1, 1), (0, 0), (1, -1), (2, -2)]
            .into_iter()
            .map(|(k, v)| (HostValue::Int(k), HostValue::Int(v)))
            .collect(),
    );
    returns(boundary, "map_int_none_return", &[], &want)
}

fn map_utf8(boundary: &mut Boundary) -> CaseResult {
    let returned = HostValue::string_map([("-1", "1"), ("0", "0"), ("1", "-1"), ("2", "-2")]);
    let replaced = HostValue::string_map([("-1", "1"), ("0", "0"), ("1", "1")]);
    for mode in MODES {
        returns(boundary, &format!("map_utf8_{}_return", mode), &[], &returned)?;
        outputs(
            boundary,
            &format!("map_utf8_{}_inout", mode),
            std::slice::from_ref(&returned),
            std::slice::from_ref(&replaced),
        )?;
    }
    accepts(boundary, "map_utf8_none_in", &[returned])?;
    Ok(())
}

fn null_is_not_empty(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "map_echo", &[HostValue::Null], &HostValue::Null)?;
    returns(boundary, "map_echo", &[HostValue::Map(Vec::new())], &HostValue::Map(Vec::new()))?;
    let error = ensure_marshal(boundary.invoke("array_zero_terminated_in", &[HostValue::Null]))?;
    ensure(
        matches!(error, MarshalError::UnexpectedNull(_)),
        "null to be refused where only an empty array is allowed",
    )
}
