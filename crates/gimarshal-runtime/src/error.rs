//! Error taxonomy of the boundary
//!
//! - `UsageError`: the ownership contract was broken (double free, use after
//!   free, expired borrow, populated error slot, ...). Programmer error.
//! - `TransferMismatch`: a descriptor and the observed ownership disagree.
//!   Reported by the conformance driver.
//! - `NativeError` (see `channel`): a declared failure path, surfaced unchanged.
//! - `TruncationError`: a length that does not fit its parameter width.

use crate::callback::CallbackId;
use crate::channel::NativeError;
use crate::descriptor::{IntWidth, Signedness};
use crate::heap::{Party, Ptr};
use crate::object::ObjectId;
use crate::transfer::Lifetime;
use serde::Serialize;
use thiserror::Error;

/// Ownership contract violation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageError {
    #[error("dereference of a null pointer")]
    NullDeref,

    #[error("double free of {0}")]
    DoubleFree(Ptr),

    #[error("use after free of {0}")]
    UseAfterFree(Ptr),

    #[error("{0} was never allocated")]
    InvalidPtr(Ptr),

    #[error("{by} released {ptr}, which is owned by {owner}")]
    NotOwner { ptr: Ptr, owner: Party, by: Party },

    #[error("{0} is static data and cannot be freed")]
    StaticFree(Ptr),

    #[error("borrowed view of {ptr} expired ({lifetime})")]
    DanglingBorrow { ptr: Ptr, lifetime: Lifetime },

    #[error("object {0} has been destroyed")]
    ObjectDestroyed(ObjectId),

    #[error("object {0} does not exist")]
    UnknownObject(ObjectId),

    #[error("unref of floating object {0}")]
    UnrefFloating(ObjectId),

    #[error("ref of floating object {0}; it must be claimed first")]
    RefFloating(ObjectId),

    #[error("record {0} reference count underflow")]
    RecordUnderflow(Ptr),

    #[error("callback {0} released twice")]
    DoubleRelease(CallbackId),

    #[error("callback {0} invoked after release")]
    InvokeAfterRelease(CallbackId),

    #[error("callback {0} does not exist")]
    UnknownCallback(CallbackId),

    #[error("error slot already holds an error: {0}")]
    ErrorSlotOccupied(NativeError),
}

/// A length value does not fit the declared length-parameter width
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("length {length} does not fit a {}{} length parameter", sign_prefix(.signedness), .width.bits())]
pub struct TruncationError {
    pub length: u128,
    pub width: IntWidth,
    pub signedness: Signedness,
}

fn sign_prefix(signedness: &Signedness) -> &'static str {
    match signedness {
        Signedness::Signed => "int",
        Signedness::Unsigned => "uint",
    }
}

/// Descriptor says one thing, observed ownership says another
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("transfer mismatch in {subject}: expected {expected}, observed {observed}")]
pub struct TransferMismatch {
    pub subject: String,
    pub expected: String,
    pub observed: String,
}

/// Conversion failure between host and native representations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("{value} out of range for {target}")]
    OutOfRange { value: String, target: String },

    #[error("invalid string: {0}")]
    InvalidString(String),

    #[error("null is not allowed for {0}")]
    UnexpectedNull(String),

    #[error("fixed-length array expects {expected} elements, got {got}")]
    FixedLength { expected: usize, got: usize },

    #[error("array length for {0} is unknown")]
    MissingLength(String),

    #[error("length {length} exceeds the {available} elements available")]
    LengthOverrun { length: usize, available: usize },

    #[error("element {index} equals the terminating sentinel")]
    SentinelInInput { index: usize },

    #[error("zero-terminated array has no terminator")]
    MissingSentinel,

    #[error("{0} has no zero value to terminate an array with")]
    NoSentinel(String),

    #[error("{value} is not a member of {type_name}")]
    InvalidEnumValue { type_name: String, value: i64 },

    #[error("expected an instance of {expected}, got {got}")]
    WrongClass { expected: String, got: String },

    #[error("expected an error from domain {expected}, got {got}")]
    DomainMismatch { expected: String, got: String },

    #[error(transparent)]
    Truncation(#[from] TruncationError),

    #[error(transparent)]
    Usage(#[from] UsageError),
}

/// Failure of a boundary call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("{0}")]
    Domain(#[from] NativeError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("no native function named '{0}'")]
    UnknownFunction(String),

    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("{type_name} has no implementation of {method}")]
    NoImplementation { type_name: String, method: String },

    #[error("{type_name} has no property '{name}'")]
    UnknownProperty { type_name: String, name: String },
}

impl From<TruncationError> for CallError {
    fn from(err: TruncationError) -> Self {
        CallError::Marshal(MarshalError::Truncation(err))
    }
}

impl CallError {
    /// The ownership-contract violation behind this failure, if any
    pub fn usage(&self) -> Option<&UsageError> {
        match self {
            CallError::Usage(e) | CallError::Marshal(MarshalError::Usage(e)) => Some(e),
            _ => None,
        }
    }

    pub fn domain(&self) -> Option<&NativeError> {
        match self {
            CallError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Descriptor registration failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    Duplicate(String),

    #[error("{name} names parent {parent}, which is not registered")]
    UnknownParent { name: String, parent: String },

    #[error("{name} implements {interface}, which is not registered")]
    UnknownInterface { name: String, interface: String },

    #[error("{callable}: container transfer on non-container {ty} ({arg})")]
    ContainerTransferOnLeaf {
        callable: String,
        arg: String,
        ty: String,
    },

    #[error("{callable}: argument {arg} names length argument {index}, which is not an integer argument")]
    BadLengthArg {
        callable: String,
        arg: String,
        index: usize,
    },

    #[error("no type named '{0}'")]
    UnknownType(String),

    #[error(transparent)]
    Class(#[from] ClassError),
}

/// Class construction failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassError {
    #[error("{class}: '{method}' matches several declarations ({}); qualify the override", .candidates.join(", "))]
    AmbiguousOverride {
        class: String,
        method: String,
        candidates: Vec<String>,
    },

    #[error("{class} declares no virtual function '{name}'")]
    UnknownVfunc { class: String, name: String },

    #[error("{class} does not implement interface {interface}")]
    UnknownInterface { class: String, interface: String },

    #[error("{class}: no virtual function or interface method named '{method}'")]
    UnknownMethod { class: String, method: String },

    #[error("no class named '{0}'")]
    UnknownClass(String),

    #[error("{class}: parent class {got} does not match declared parent {expected}")]
    ParentMismatch {
        class: String,
        expected: String,
        got: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_message() {
        let err = TruncationError {
            length: 256,
            width: IntWidth::W8,
            signedness: Signedness::Unsigned,
        };
        assert_eq!(err.to_string(), "length 256 does not fit a uint8 length parameter");
    }

    #[test]
    fn test_call_error_exposes_usage() {
        let err = CallError::Marshal(MarshalError::Usage(UsageError::NullDeref));
        assert_eq!(err.usage(), Some(&UsageError::NullDeref));
        assert!(err.domain().is_none());
    }

    #[test]
    fn test_ambiguous_override_lists_candidates() {
        let err = ClassError::AmbiguousOverride {
            class: "Clash".to_string(),
            method: "test_int8_in".to_string(),
            candidates: vec!["Interface".to_string(), "Interface2".to_string()],
        };
        assert!(err.to_string().contains("Interface, Interface2"));
    }
}
