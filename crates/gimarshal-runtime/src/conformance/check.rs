//! Assertions shared by the conformance cases

use crate::boundary::{Boundary, CallOutput};
use crate::channel::{NativeError, Quark};
use crate::error::{CallError, ClassError, MarshalError, UsageError};
use crate::object::ObjectId;
use crate::value::HostValue;
use std::fmt::Debug;
use thiserror::Error;

/// Why a case failed
#[derive(Debug, Error)]
pub enum Failure {
    #[error("call failed: {0}")]
    Call(#[from] CallError),

    #[error("contract violated: {0}")]
    Usage(#[from] UsageError),

    #[error("class rejected: {0}")]
    Class(#[from] ClassError),

    #[error("{0}")]
    Check(String),
}

pub type CaseResult = Result<(), Failure>;

pub fn ensure(condition: bool, what: &str) -> CaseResult {
    if condition {
        Ok(())
    } else {
        Err(Failure::Check(format!("expected {}", what)))
    }
}

pub fn ensure_eq<T: PartialEq + Debug + ?Sized>(what: &str, got: &T, want: &T) -> CaseResult {
    if got == want {
        Ok(())
    } else {
        Err(Failure::Check(format!("{}: expected {:?}, got {:?}", what, want, got)))
    }
}

/// The call must fail through the error channel with `domain`/`code`
pub fn ensure_domain<T: Debug>(result: Result<T, CallError>, domain: &str, code: i32) -> Result<NativeError, Failure> {
    match result {
        Err(CallError::Domain(error)) if error.matches(&Quark::new(domain), code) => Ok(error),
        other => Err(Failure::Check(format!(
            "expected an error {}:{}, got {:?}",
            domain, code, other
        ))),
    }
}

pub fn ensure_marshal<T: Debug>(result: Result<T, CallError>) -> Result<MarshalError, Failure> {
    match result {
        Err(CallError::Marshal(error)) => Ok(error),
        other => Err(Failure::Check(format!("expected a marshalling error, got {:?}", other))),
    }
}

pub fn ensure_usage<T: Debug>(result: Result<T, CallError>) -> Result<UsageError, Failure> {
    match result {
        Err(CallError::Usage(error)) => Ok(error),
        other => Err(Failure::Check(format!("expected a usage error, got {:?}", other))),
    }
}

pub fn object_of(value: &HostValue) -> Result<ObjectId, Failure> {
    value
        .as_object()
        .ok_or_else(|| Failure::Check(format!("expected an object, got {:?}", value)))
}

pub fn refs(boundary: &Boundary, id: ObjectId) -> Result<u32, Failure> {
    Ok(boundary.objects().ref_count(id)?)
}

pub fn ensure_refs(boundary: &Boundary, id: ObjectId, want: u32) -> CaseResult {
    ensure_eq(&format!("references of {}", id), &refs(boundary, id)?, &want)
}

pub fn field(boundary: &Boundary, id: ObjectId, name: &str) -> Result<Option<HostValue>, Failure> {
    Ok(boundary.objects().field(id, name)?)
}

/// A host-owned instance with its `int` field set
pub fn object_with_int(boundary: &mut Boundary, class: &str, value: i64) -> Result<ObjectId, Failure> {
    let id = boundary.new_object(class)?;
    boundary.objects().set_field(id, "int", HostValue::Int(value))?;
    Ok(id)
}

pub fn release_object(boundary: &mut Boundary, id: ObjectId) -> CaseResult {
    Ok(boundary.release(&HostValue::Object(id))?)
}

/// Call and compare the return value
pub fn returns(boundary: &mut Boundary, name: &str, args: &[HostValue], want: &HostValue) -> CaseResult {
    let output = boundary.invoke(name, args)?;
    ensure_eq(name, output.ret(), want)
}

/// Call and compare the out values
pub fn outputs(boundary: &mut Boundary, name: &str, args: &[HostValue], want: &[HostValue]) -> CaseResult {
    let output = boundary.invoke(name, args)?;
    ensure_eq(name, output.outs.as_slice(), want)
}

pub fn accepts(boundary: &mut Boundary, name: &str, args: &[HostValue]) -> Result<CallOutput, Failure> {
    Ok(boundary.invoke(name, args)?)
}

pub fn strings(values: &[&str]) -> HostValue {
    HostValue::strings(values.iter().copied())
}

pub fn string_list(values: &[&str]) -> HostValue {
    HostValue::string_list(values.iter().copied())
}

/// `long_` field of a lifted record
pub fn long_field(value: &HostValue) -> Result<i64, Failure> {
    value
        .field("long_")
        .and_then(HostValue::as_i64)
        .ok_or_else(|| Failure::Check(format!("expected a record with long_, got {:?}", value)))
}
