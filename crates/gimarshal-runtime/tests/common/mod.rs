//! Shared helpers for boundary integration tests

#![allow(dead_code)]

use gimarshal_config::RuntimeConfig;
use gimarshal_runtime::{Boundary, CallOutput, HostValue};

pub use pretty_assertions::{assert_eq, assert_ne};

/// A boundary over the fixture library that reports usage errors
pub fn boundary() -> Boundary {
    Boundary::with_fixture(RuntimeConfig::default()).expect("fixture library registers")
}

/// Call `name` and unwrap the output
pub fn call(boundary: &mut Boundary, name: &str, args: &[HostValue]) -> CallOutput {
    boundary
        .invoke(name, args)
        .unwrap_or_else(|e| panic!("{} failed: {}", name, e))
}

/// Assert nothing host-owned is left outstanding once lent values are released
pub fn assert_clean(boundary: &mut Boundary) {
    boundary.flush().expect("flush succeeds");
    let leaks = boundary.leaks();
    assert!(leaks.is_clean(), "leaked: {}", leaks);
}
