//! Integration tests for the host side of the boundary
//!
//! Calls go through `Boundary::invoke` against the fixture library and
//! check both the values handed back and the ownership left behind.

mod common;

use common::{assert_clean, assert_eq, boundary, call};
use gimarshal_config::{DanglingWindow, OverrideResolution, RuntimeConfig, UsagePolicy};
use gimarshal_runtime::descriptor::{IntWidth, Signedness, TypeDescriptor};
use gimarshal_runtime::marshal::scalar;
use gimarshal_runtime::transfer::Lifetime;
use gimarshal_runtime::{
    host_method, resolve_transfer, AuditLogger, Boundary, CallError, Direction, GType, HostValue,
    MarshalError, TransferMode, UsageError,
};
use proptest::prelude::*;
use rstest::rstest;

// ============================================================================
// Values
// ============================================================================

#[rstest]
#[case("boolean_return_true", HostValue::Bool(true))]
#[case("int8_return_min", HostValue::Int(i8::MIN as i64))]
#[case("uint16_return", HostValue::UInt(u16::MAX as u64))]
#[case("int64_return_max", HostValue::Int(i64::MAX))]
#[case("uint64_return", HostValue::UInt(u64::MAX))]
#[case("double_return", HostValue::Float(f64::MAX))]
#[case("constant_number", HostValue::Int(42))]
#[case("utf8_full_return", HostValue::string("const \u{2665} utf8"))]
#[case("array_fixed_int_return", HostValue::ints([-1, 0, 1, 2]))]
#[case("array_zero_terminated_return_null", HostValue::Null)]
fn test_returns(#[case] function: &str, #[case] want: HostValue) {
    let mut b = boundary();
    let output = call(&mut b, function, &[]);
    assert_eq!(output.ret(), &want);
    assert_clean(&mut b);
}

#[test]
fn test_array_in_sum_leaves_input_alone() {
    let mut b = boundary();
    let given = HostValue::ints([1, -1, i32::MAX as i64, i32::MIN as i64, 0]);
    let output = call(&mut b, "array_in_sum", std::slice::from_ref(&given));
    assert_eq!(output.ret, None);
    assert_eq!(output.out(0), &HostValue::Int(-1));
    assert_eq!(given, HostValue::ints([1, -1, i32::MAX as i64, i32::MIN as i64, 0]));
    assert_clean(&mut b);
}

#[test]
fn test_null_and_empty_map_are_distinct() {
    let mut b = boundary();
    assert_eq!(call(&mut b, "map_echo", &[HostValue::Null]).ret(), &HostValue::Null);
    assert_eq!(
        call(&mut b, "map_echo", &[HostValue::Map(Vec::new())]).ret(),
        &HostValue::Map(Vec::new())
    );
}

#[test]
fn test_unknown_function_and_arity() {
    let mut b = boundary();
    assert!(matches!(
        b.invoke("no_such_function", &[]),
        Err(CallError::UnknownFunction(name)) if name == "no_such_function"
    ));
    assert!(matches!(
        b.invoke("int8_in_max", &[]),
        Err(CallError::Arity { expected: 1, got: 0, .. })
    ));
}

#[test]
fn test_length_truncation_releases_everything() {
    let mut b = boundary();
    let result = b.invoke("array_in_guint8_len", &[HostValue::ints(0..256)]);
    assert!(matches!(result, Err(CallError::Marshal(MarshalError::Truncation(_)))));
    assert_clean(&mut b);
}

// ============================================================================
// Dangling views
// ============================================================================

#[test]
fn test_dangling_view_expires_on_next_call() {
    let mut b = boundary();
    let output = call(&mut b, "utf8_dangling_out", &[]);
    let view = output.views[0];
    assert!(b.read_view(&view).is_ok());

    call(&mut b, "constant_number", &[]);
    let err = b.read_view(&view).unwrap_err();
    assert!(matches!(err.usage(), Some(UsageError::DanglingBorrow { .. })));
    assert_eq!(b.audit().events_of("borrow-expired").len(), 1);
}

#[test]
fn test_dangling_view_tied_to_owner() {
    let config = RuntimeConfig {
        dangling: DanglingWindow::OwnerDestroyed,
        ..RuntimeConfig::default()
    };
    let mut b = Boundary::with_fixture(config).unwrap();
    let output = call(&mut b, "utf8_dangling_out", &[]);
    let view = output.views[0];
    assert_eq!(view.lifetime, Lifetime::WhileSourceAlive);

    call(&mut b, "constant_number", &[]);
    assert!(b.read_view(&view).is_ok());
}

#[test]
#[should_panic(expected = "ownership contract violated")]
fn test_panic_policy_aborts_on_violation() {
    let config = RuntimeConfig {
        usage_policy: UsagePolicy::Panic,
        ..RuntimeConfig::default()
    };
    let mut b = Boundary::with_fixture(config).unwrap();
    let id = b.new_object("Object").unwrap();
    b.release(&HostValue::Object(id)).unwrap();
    let _ = b.release(&HostValue::Object(id));
}

// ============================================================================
// Objects
// ============================================================================

#[rstest]
#[case("object_none_return", 2)]
#[case("object_full_return", 1)]
fn test_returned_object_references(#[case] function: &str, #[case] refs: u32) {
    let mut b = boundary();
    let output = call(&mut b, function, &[]);
    let id = output.ret().as_object().unwrap();
    assert_eq!(b.objects().ref_count(id).unwrap(), refs);
    b.release(output.ret()).unwrap();
    assert_eq!(b.objects().ref_count(id).ok(), (refs > 1).then_some(refs - 1));
}

#[test]
fn test_released_object_is_finalized_once() {
    let mut b = boundary();
    let id = b.new_object("Object").unwrap();
    b.release(&HostValue::Object(id)).unwrap();
    assert!(!b.objects().is_alive(id));
    assert_eq!(b.audit().events_of("finalized").len(), 1);

    let err = b.release(&HostValue::Object(id)).unwrap_err();
    assert_eq!(err.usage(), Some(&UsageError::ObjectDestroyed(id)));
    assert_eq!(b.audit().events_of("finalized").len(), 1);
}

#[rstest]
#[case("object_none_return")]
#[case("object_full_return")]
fn test_returned_object_is_held_until_released(#[case] function: &str) {
    let mut b = boundary();
    let output = call(&mut b, function, &[]);
    let id = output.ret().as_object().unwrap();
    assert_eq!(b.held(id), 1);
    assert!(b.leaks().to_string().contains("objects ["));
    b.release(output.ret()).unwrap();
    assert_clean(&mut b);
}

#[test]
fn test_out_objects_are_held() {
    let mut b = boundary();
    let kept = call(&mut b, "object_none_out", &[]).out(0).clone();
    let owned = call(&mut b, "object_full_out", &[]).out(0).clone();
    assert_eq!(b.leaks().objects.len(), 2);
    b.release(&kept).unwrap();
    b.release(&owned).unwrap();
    assert_clean(&mut b);
}

#[rstest]
#[case(OverrideResolution::Error, false)]
#[case(OverrideResolution::LastWins, true)]
fn test_subclass_resolution_follows_config(#[case] resolution: OverrideResolution, #[case] builds: bool) {
    let config = RuntimeConfig {
        ambiguous_override: resolution,
        ..RuntimeConfig::default()
    };
    let b = Boundary::with_fixture(config).unwrap();
    let built = b
        .subclass("HostClash", "Base", &["Interface", "Interface2"])
        .unwrap()
        .method("test_int8_in", host_method(|_, _| Ok(Vec::new())))
        .build();
    assert_eq!(built.is_ok(), builds);
}

#[rstest]
#[case("some_boolean", HostValue::Bool(false), HostValue::Bool(true))]
#[case("some_int", HostValue::Int(0), HostValue::Int(i32::MAX as i64))]
#[case("some_uint64", HostValue::UInt(0), HostValue::UInt(u64::MAX))]
#[case("some_gtype", HostValue::Type(GType::INVALID), HostValue::Type(GType::INT))]
#[case("some_strv", HostValue::Null, HostValue::strings(["0", "1"]))]
fn test_property_default_then_set(#[case] name: &str, #[case] default: HostValue, #[case] set: HostValue) {
    let mut b = boundary();
    let id = b.new_object("PropertiesObject").unwrap();
    assert_eq!(b.get_property(id, name).unwrap(), default);
    b.set_property(id, name, &set).unwrap();
    assert_eq!(b.get_property(id, name).unwrap(), set);
    b.release(&HostValue::Object(id)).unwrap();
    assert_clean(&mut b);
}

#[rstest]
#[case("gtype_return", HostValue::Type(GType::NONE))]
#[case("gtype_string_return", HostValue::Type(GType::STRING))]
fn test_gtype_returns(#[case] function: &str, #[case] want: HostValue) {
    let mut b = boundary();
    assert_eq!(call(&mut b, function, &[]).ret(), &want);
}

#[test]
fn test_gtype_inout() {
    let mut b = boundary();
    let output = call(&mut b, "gtype_inout", &[HostValue::Type(GType::NONE)]);
    assert_eq!(output.out(0), &HostValue::Type(GType::INT));
    let err = b.invoke("gtype_in", &[HostValue::string("foo")]).unwrap_err();
    assert!(matches!(err, CallError::Marshal(MarshalError::TypeMismatch { .. })));
}

// ============================================================================
// Transfer plans
// ============================================================================

#[rstest]
#[case(Direction::In, TransferMode::None, true, true, false)]
#[case(Direction::In, TransferMode::Container, false, true, true)]
#[case(Direction::In, TransferMode::Full, false, false, true)]
#[case(Direction::OutCalleeAllocates, TransferMode::None, false, false, false)]
#[case(Direction::OutCalleeAllocates, TransferMode::Container, true, false, false)]
#[case(Direction::OutCalleeAllocates, TransferMode::Full, true, true, false)]
fn test_string_array_plans(
    #[case] direction: Direction,
    #[case] mode: TransferMode,
    #[case] skeleton: bool,
    #[case] elements: bool,
    #[case] callee_frees: bool,
) {
    let ty = TypeDescriptor::zero_terminated(TypeDescriptor::Utf8);
    let plan = resolve_transfer(direction, mode, &ty);
    assert_eq!(plan.caller_frees.skeleton, skeleton);
    assert_eq!(plan.caller_frees.elements, elements);
    assert_eq!(plan.callee_frees, callee_frees);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_int32_round_trips(v in any::<i32>()) {
        let value = HostValue::Int(v as i64);
        let native = scalar::int_to_native(&value, IntWidth::W32, Signedness::Signed).unwrap();
        let lifted = scalar::int_from_native(&native, IntWidth::W32, Signedness::Signed).unwrap();
        prop_assert_eq!(lifted, value);
    }

    #[test]
    fn prop_uint8_never_wraps(v in any::<i64>()) {
        let result = scalar::int_to_native(&HostValue::Int(v), IntWidth::W8, Signedness::Unsigned);
        prop_assert_eq!(result.is_ok(), (0..=255).contains(&v));
    }

    #[test]
    fn prop_array_in_sum(ints in proptest::collection::vec(any::<i32>(), 0..64)) {
        let mut b = boundary();
        let want: i64 = ints.iter().map(|&v| v as i64).sum();
        let output = b.invoke("array_in_sum", &[HostValue::ints(ints.iter().map(|&v| v as i64))]).unwrap();
        prop_assert_eq!(output.out(0), &HostValue::Int(want));
        prop_assert!(b.leaks().is_clean());
    }
}
