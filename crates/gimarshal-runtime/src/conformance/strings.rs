use super::check::{ensure, ensure_eq, ensure_marshal, ensure_usage, outputs, returns, CaseResult};
use super::Case;
use crate::boundary::Boundary;
use crate::error::{MarshalError, UsageError};
use crate::fixture::CONSTANT_UTF8;
use crate::heap::Block;
use crate::value::HostValue;

const CATEGORY: &str = "strings";

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "constant", constant),
        Case::new(CATEGORY, "none_return", none_return),
        Case::new(CATEGORY, "full_return_not_aliased", full_return_not_aliased),
        Case::new(CATEGORY, "in", in_),
        Case::new(CATEGORY, "out", out),
        Case::new(CATEGORY, "inout", inout),
        Case::new(CATEGORY, "nullable_in", nullable_in),
        Case::new(CATEGORY, "null_rejected", null_rejected),
        Case::new(CATEGORY, "dangling_out_expires", dangling_out_expires).provoking_violation(),
    ]
}

fn utf8() -> HostValue {
    HostValue::string(CONSTANT_UTF8)
}

fn constant(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "constant_utf8", &[], &utf8())
}

fn none_return(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "utf8_none_return", &[], &utf8())?;
    // the callee's copy is untouched by the caller reading it
    returns(boundary, "utf8_none_return", &[], &utf8())
}

/// Every full return is a fresh copy the host frees on its own
fn full_return_not_aliased(boundary: &mut Boundary) -> CaseResult {
    let first = boundary.invoke("utf8_full_return", &[])?;
    let second = boundary.invoke("utf8_full_return", &[])?;
    ensure_eq("first", first.ret(), &utf8())?;
    ensure_eq("second", second.ret(), &utf8())?;
    let frees = boundary.audit().events_of("free").len();
    ensure(frees >= 2, "each full return to be freed")
}

fn in_(boundary: &mut Boundary) -> CaseResult {
    boundary.invoke("utf8_none_in", &[utf8()])?;
    boundary.invoke("utf8_full_in", &[utf8()])?;
    Ok(())
}

fn out(boundary: &mut Boundary) -> CaseResult {
    outputs(boundary, "utf8_none_out", &[], &[utf8()])?;
    outputs(boundary, "utf8_full_out", &[], &[utf8()])
}

fn inout(boundary: &mut Boundary) -> CaseResult {
    outputs(boundary, "utf8_none_inout", &[utf8()], &[HostValue::string("")])?;
    outputs(boundary, "utf8_full_inout", &[utf8()], &[HostValue::string("")])
}

fn nullable_in(boundary: &mut Boundary) -> CaseResult {
    boundary.invoke("utf8_nullable_in", &[HostValue::Null])?;
    Ok(())
}

fn null_rejected(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_marshal(boundary.invoke("utf8_none_in", &[HostValue::Null]))?;
    ensure_eq("error", &error, &MarshalError::UnexpectedNull("utf8".to_string()))
}

/// A dangling out value can be read until the next boundary call only
fn dangling_out_expires(boundary: &mut Boundary) -> CaseResult {
    let output = boundary.invoke("utf8_dangling_out", &[])?;
    ensure_eq("utf8", output.out(0), &utf8())?;
    let view = output
        .views
        .first()
        .copied()
        .ok_or_else(|| super::Failure::Check("expected a borrowed view".to_string()))?;
    ensure_eq(
        "view",
        &boundary.read_view(&view)?,
        &Block::Utf8(CONSTANT_UTF8.to_string()),
    )?;

    boundary.invoke("constant_number", &[])?;
    let error = ensure_usage(boundary.read_view(&view))?;
    ensure(
        matches!(error, UsageError::DanglingBorrow { .. }),
        "the view to have expired",
    )
}
