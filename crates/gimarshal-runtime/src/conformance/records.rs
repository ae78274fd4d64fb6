use super::check::{accepts, ensure_eq, long_field, outputs, returns, CaseResult};
use super::Case;
use crate::boundary::Boundary;
use crate::value::HostValue;

const CATEGORY: &str = "records";

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "simple_struct", simple_struct),
        Case::new(CATEGORY, "simple_struct_caller_allocated_out", simple_struct_caller_allocated_out),
        Case::new(CATEGORY, "boxed_struct_return", boxed_struct_return),
        Case::new(CATEGORY, "boxed_struct_in_out", boxed_struct_in_out),
        Case::new(CATEGORY, "array_struct_take_in", array_struct_take_in),
        Case::new(CATEGORY, "shared_struct_refcount", shared_struct_refcount),
    ]
}

fn simple(long: i64, int8: i64) -> HostValue {
    HostValue::record([("long_", HostValue::Int(long)), ("int8", HostValue::Int(int8))])
}

fn boxed(long: i64, string: HostValue) -> HostValue {
    HostValue::record([("long_", HostValue::Int(long)), ("string_", string)])
}

fn simple_struct(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "simple_struct_returnv", &[], &simple(6, 7))?;
    accepts(boundary, "simple_struct_inv", &[simple(6, 7)])?;
    Ok(())
}

/// Storage comes from the host; the callee only fills it in
fn simple_struct_caller_allocated_out(boundary: &mut Boundary) -> CaseResult {
    outputs(boundary, "simple_struct_caller_allocated_out", &[], &[simple(6, 7)])
}

fn boxed_struct_return(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "boxed_struct_returnv", &[], &boxed(42, HostValue::Null))?;
    returns(
        boundary,
        "boxed_struct_return_full",
        &[],
        &boxed(42, HostValue::string("boxed")),
    )
}

fn boxed_struct_in_out(boundary: &mut Boundary) -> CaseResult {
    accepts(boundary, "boxed_struct_inv", &[boxed(42, HostValue::Null)])?;
    outputs(boundary, "boxed_struct_out", &[], &[boxed(42, HostValue::Null)])?;
    let output = accepts(boundary, "boxed_struct_inout", &[boxed(42, HostValue::string("given"))])?;
    ensure_eq("long_", &long_field(output.out(0))?, &0)
}

/// The callee takes the array and every record in it
fn array_struct_take_in(boundary: &mut Boundary) -> CaseResult {
    let structs = HostValue::Array((1..=3).map(|long| boxed(long, HostValue::Null)).collect());
    accepts(boundary, "array_struct_take_in", &[structs])?;
    Ok(())
}

fn shared_struct_refcount(boundary: &mut Boundary) -> CaseResult {
    let output = accepts(boundary, "shared_struct_new", &[])?;
    let shared = output.ret().clone();
    ensure_eq("long_", &long_field(&shared)?, &42)?;
    returns(boundary, "shared_struct_ref", std::slice::from_ref(&shared), &shared)?;
    accepts(boundary, "shared_struct_unref", &[shared])?;
    Ok(())
}
