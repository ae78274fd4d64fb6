use super::check::{accepts, ensure, ensure_domain, ensure_eq, ensure_usage, returns, CaseResult};
use super::Case;
use crate::boundary::Boundary;
use crate::callback::{CallbackId, HostClosure};
use crate::channel::Quark;
use crate::error::UsageError;
use crate::fixture::{ERROR_CODE, ERROR_DOMAIN};
use crate::value::HostValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CATEGORY: &str = "callbacks";

/// Invocations `callback_on_worker_threads` makes
const WORKERS: u64 = 4;

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "return_and_out_shapes", return_and_out_shapes),
        Case::new(CATEGORY, "notified", notified),
        Case::new(CATEGORY, "notified_never_invoked", notified_never_invoked),
        Case::new(CATEGORY, "async_releases_after_first_call", async_releases_after_first_call),
        Case::new(CATEGORY, "worker_threads", worker_threads),
        Case::new(CATEGORY, "error_argument", error_argument),
        Case::new(CATEGORY, "host_error", host_error),
        Case::new(CATEGORY, "invoke_after_release", invoke_after_release).provoking_violation(),
    ]
}

fn constant(values: Vec<HostValue>) -> HostClosure {
    HostClosure::new(move |_, _| Ok(values.clone()))
}

fn doubling() -> HostClosure {
    HostClosure::new(|args, _| {
        let x = args.first().and_then(HostValue::as_i64).unwrap_or_default();
        Ok(vec![HostValue::Int(x * 2)])
    })
}

/// Destroy notifications seen so far
fn counted(closure: HostClosure) -> (HostClosure, Arc<AtomicUsize>) {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&destroyed);
    let closure = closure.on_destroy(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (closure, destroyed)
}

fn ensure_released(boundary: &Boundary, id: CallbackId) -> CaseResult {
    ensure(boundary.callbacks().is_released(id)?, "the binding to be released")
}

/// Call-scoped callbacks live exactly as long as the call
fn return_and_out_shapes(boundary: &mut Boundary) -> CaseResult {
    let shapes: [(&str, Vec<HostValue>); 5] = [
        ("callback_return_value_only", vec![HostValue::Int(42)]),
        ("callback_one_out_parameter", vec![HostValue::Float(42.0)]),
        (
            "callback_multiple_out_parameters",
            vec![HostValue::Float(42.0), HostValue::Float(43.0)],
        ),
        (
            "callback_return_value_and_one_out_parameter",
            vec![HostValue::Int(42), HostValue::Int(43)],
        ),
        (
            "callback_return_value_and_multiple_out_parameters",
            vec![HostValue::Int(42), HostValue::Int(43), HostValue::Int(44)],
        ),
    ];
    for (function, values) in shapes {
        let id = boundary.register_callback(constant(values.clone()));
        let output = accepts(boundary, function, &[HostValue::Callback(id)])?;
        ensure_eq(function, &output.values(), &values)?;
        ensure_released(boundary, id)?;
    }
    Ok(())
}

fn notified(boundary: &mut Boundary) -> CaseResult {
    let (closure, destroyed) = counted(doubling());
    let id = boundary.register_callback(closure);
    accepts(boundary, "callback_notified_store", &[HostValue::Callback(id)])?;
    returns(boundary, "callback_notified_call", &[HostValue::Int(3)], &HostValue::Int(6))?;
    returns(boundary, "callback_notified_call", &[HostValue::Int(21)], &HostValue::Int(42))?;
    ensure_eq("destroyed before release", &destroyed.load(Ordering::SeqCst), &0)?;
    accepts(boundary, "callback_notified_release", &[])?;
    ensure_eq("destroyed", &destroyed.load(Ordering::SeqCst), &1)?;
    ensure_eq("invocations", &boundary.callbacks().invocations(id)?, &2)
}

/// Teardown still notifies when the callback never ran
fn notified_never_invoked(boundary: &mut Boundary) -> CaseResult {
    let (closure, destroyed) = counted(doubling());
    let id = boundary.register_callback(closure);
    accepts(boundary, "callback_notified_store", &[HostValue::Callback(id)])?;
    accepts(boundary, "callback_notified_release", &[])?;
    ensure_eq("destroyed", &destroyed.load(Ordering::SeqCst), &1)?;
    ensure_eq("invocations", &boundary.callbacks().invocations(id)?, &0)
}

fn async_releases_after_first_call(boundary: &mut Boundary) -> CaseResult {
    let (closure, destroyed) = counted(doubling());
    let id = boundary.register_callback(closure);
    accepts(boundary, "callback_async_store", &[HostValue::Callback(id)])?;
    ensure(!boundary.callbacks().is_released(id)?, "the binding to outlive the storing call")?;
    returns(boundary, "callback_async_call", &[HostValue::Int(4)], &HostValue::Int(8))?;
    ensure_released(boundary, id)?;
    ensure_eq("destroyed", &destroyed.load(Ordering::SeqCst), &1)
}

/// Invocations from foreign threads, released once they are all done
fn worker_threads(boundary: &mut Boundary) -> CaseResult {
    let (closure, destroyed) = counted(doubling());
    let id = boundary.register_callback(closure);
    returns(
        boundary,
        "callback_on_worker_threads",
        &[HostValue::Callback(id), HostValue::Int(5)],
        &HostValue::Int(40),
    )?;
    ensure_eq("invocations", &boundary.callbacks().invocations(id)?, &WORKERS)?;
    ensure_released(boundary, id)?;
    ensure_eq("destroyed", &destroyed.load(Ordering::SeqCst), &1)
}

/// Borrowed and owned error arguments reach the host intact
fn error_argument(boundary: &mut Boundary) -> CaseResult {
    let domain = Quark::new(ERROR_DOMAIN);
    for function in ["callback_error_none", "callback_error_full"] {
        let seen = Arc::new(AtomicUsize::new(0));
        let matched = Arc::clone(&seen);
        let domain = domain.clone();
        let id = boundary.register_callback(HostClosure::new(move |args, _| {
            if let Some(HostValue::Error(error)) = args.first() {
                if error.matches(&domain, ERROR_CODE) {
                    matched.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(Vec::new())
        }));
        accepts(boundary, function, &[HostValue::Callback(id)])?;
        ensure_eq(function, &seen.load(Ordering::SeqCst), &1)?;
    }
    Ok(())
}

/// A failing host callback surfaces as the call's domain error
fn host_error(boundary: &mut Boundary) -> CaseResult {
    let domain = Quark::new(ERROR_DOMAIN);
    let id = boundary.register_callback(HostClosure::new(move |_, _| {
        Err(crate::channel::NativeError::new(&domain, ERROR_CODE, "host callback failed"))
    }));
    let error = ensure_domain(
        boundary.invoke("callback_return_value_only", &[HostValue::Callback(id)]),
        ERROR_DOMAIN,
        ERROR_CODE,
    )?;
    ensure_eq("message", error.message.as_str(), "host callback failed")?;
    ensure_released(boundary, id)
}

fn invoke_after_release(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.register_callback(doubling());
    boundary.callbacks().release(id)?;
    let error = ensure_usage(boundary.callbacks().invoke(id, &[HostValue::Int(1)]))?;
    ensure_eq("error", &error, &UsageError::InvokeAfterRelease(id))?;
    let error = boundary.callbacks().release(id).err();
    ensure_eq("second release", &error, &Some(UsageError::DoubleRelease(id)))
}
