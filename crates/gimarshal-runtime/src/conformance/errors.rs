use super::check::{ensure, ensure_domain, ensure_eq, ensure_usage, outputs, returns, CaseResult};
use super::Case;
use crate::boundary::Boundary;
use crate::channel::{ErrorSlot, NativeError, Quark};
use crate::error::UsageError;
use crate::fixture::{ERROR_CODE, ERROR_DEBUG, ERROR_DOMAIN, ERROR_MESSAGE, SECOND_ERROR_DOMAIN};
use crate::value::HostValue;

const CATEGORY: &str = "errors";

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "thrown", thrown),
        Case::new(CATEGORY, "thrown_after_array_in", thrown_after_array_in),
        Case::new(CATEGORY, "out", out),
        Case::new(CATEGORY, "return", return_),
        Case::new(CATEGORY, "domains_are_distinct", domains_are_distinct),
        Case::new(CATEGORY, "error_slot", error_slot).provoking_violation(),
    ]
}

fn raised() -> HostValue {
    HostValue::Error(NativeError::new(&Quark::new(ERROR_DOMAIN), ERROR_CODE, ERROR_MESSAGE))
}

fn thrown(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_domain(boundary.invoke("gerror", &[]), ERROR_DOMAIN, ERROR_CODE)?;
    ensure_eq("message", error.message.as_str(), ERROR_MESSAGE)
}

/// Inputs marshalled before the failure are released all the same
fn thrown_after_array_in(boundary: &mut Boundary) -> CaseResult {
    ensure_domain(
        boundary.invoke("gerror_array_in", &[HostValue::ints([-1, 0, 1, 2])]),
        ERROR_DOMAIN,
        ERROR_CODE,
    )?;
    let leaks = boundary.leaks();
    ensure(leaks.is_clean(), &format!("no leaks after a failed call, found {}", leaks))
}

fn out(boundary: &mut Boundary) -> CaseResult {
    let want = [raised(), HostValue::string(ERROR_DEBUG)];
    outputs(boundary, "gerror_out", &[], &want)?;
    outputs(boundary, "gerror_out_transfer_none", &[], &want)
}

fn return_(boundary: &mut Boundary) -> CaseResult {
    returns(boundary, "gerror_return", &[], &raised())?;
    returns(boundary, "gerror_none_return", &[], &HostValue::Null)
}

/// Equal codes in different domains never identify the same error
fn domains_are_distinct(boundary: &mut Boundary) -> CaseResult {
    let error = ensure_domain(
        boundary.invoke("gerror_second_domain", &[]),
        SECOND_ERROR_DOMAIN,
        ERROR_CODE,
    )?;
    ensure(
        !error.matches(&Quark::new(ERROR_DOMAIN), ERROR_CODE),
        "the second domain not to match the first",
    )?;
    ensure(HostValue::Error(error) != raised(), "errors from distinct domains to differ")
}

/// A populated slot is refused until the caller takes its error
fn error_slot(boundary: &mut Boundary) -> CaseResult {
    let mut slot = ErrorSlot::new();
    ensure_domain(
        boundary.invoke_with_slot("gerror", &[], &mut slot),
        ERROR_DOMAIN,
        ERROR_CODE,
    )?;
    let stored = slot
        .peek()
        .cloned()
        .ok_or_else(|| super::Failure::Check("expected the slot to hold the error".to_string()))?;
    ensure(stored.matches(&Quark::new(ERROR_DOMAIN), ERROR_CODE), "the stored error")?;

    let error = ensure_usage(boundary.invoke_with_slot("gerror", &[], &mut slot))?;
    ensure_eq("error", &error, &UsageError::ErrorSlotOccupied(stored))?;

    ensure(slot.take().is_some(), "the slot to give up its error")?;
    boundary.invoke_with_slot("constant_number", &[], &mut slot)?;
    ensure(!slot.is_set(), "a successful call to leave the slot empty")
}
