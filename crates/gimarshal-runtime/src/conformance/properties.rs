//! Typed properties: every value the instance stores is its own

use super::check::{ensure, ensure_eq, ensure_marshal, ensure_refs, release_object, strings, CaseResult, Failure};
use super::Case;
use crate::boundary::Boundary;
use crate::error::{CallError, MarshalError};
use crate::gtype::GType;
use crate::heap::Party;
use crate::value::HostValue;

const CATEGORY: &str = "properties";

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "boolean", boolean),
        Case::new(CATEGORY, "construct", construct),
        Case::new(CATEGORY, "scalars", scalars),
        Case::new(CATEGORY, "containers", containers),
        Case::new(CATEGORY, "boxed_struct", boxed_struct),
        Case::new(CATEGORY, "object", object),
        Case::new(CATEGORY, "replace_frees_previous", replace_frees_previous),
        Case::new(CATEGORY, "rejects_wrong_type", rejects_wrong_type),
        Case::new(CATEGORY, "unknown", unknown),
    ]
}

fn roundtrip(boundary: &mut Boundary, name: &str, value: HostValue) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    boundary.set_property(id, name, &value)?;
    let got = boundary.get_property(id, name)?;
    boundary.release(&got)?;
    ensure_eq(name, &got, &value)?;
    release_object(boundary, id)
}

fn boolean(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    ensure_eq("default", &boundary.get_property(id, "some_boolean")?, &HostValue::Bool(false))?;
    boundary.set_property(id, "some_boolean", &HostValue::Bool(true))?;
    ensure_eq("after set", &boundary.get_property(id, "some_boolean")?, &HostValue::Bool(true))?;
    release_object(boundary, id)
}

fn construct(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object_with("PropertiesObject", &[("some_boolean", HostValue::Bool(true))])?;
    ensure_eq("some_boolean", &boundary.get_property(id, "some_boolean")?, &HostValue::Bool(true))?;
    release_object(boundary, id)
}

fn scalars(boundary: &mut Boundary) -> CaseResult {
    let values = [
        ("some_char", HostValue::Int(i8::MIN as i64)),
        ("some_uchar", HostValue::UInt(u8::MAX as u64)),
        ("some_int", HostValue::Int(i32::MIN as i64)),
        ("some_uint", HostValue::UInt(u32::MAX as u64)),
        ("some_long", HostValue::Int(i64::MIN)),
        ("some_ulong", HostValue::UInt(u64::MAX)),
        ("some_int64", HostValue::Int(i64::MAX)),
        ("some_uint64", HostValue::UInt(u64::MAX)),
        ("some_float", HostValue::Float(3.5)),
        ("some_double", HostValue::Float(-1.25)),
        ("some_gtype", HostValue::Type(GType::STRING)),
    ];
    for (name, value) in values {
        roundtrip(boundary, name, value)?;
    }
    Ok(())
}

fn containers(boundary: &mut Boundary) -> CaseResult {
    roundtrip(boundary, "some_strv", strings(&["0", "1", "2"]))?;
    roundtrip(
        boundary,
        "some_boxed_glist",
        HostValue::List(vec![HostValue::Int(-1), HostValue::Int(0), HostValue::Int(1)]),
    )
}

fn boxed_struct(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    ensure_eq("default", &boundary.get_property(id, "some_boxed_struct")?, &HostValue::Null)?;
    release_object(boundary, id)?;
    roundtrip(
        boundary,
        "some_boxed_struct",
        HostValue::record([("long_", HostValue::Int(42)), ("string_", HostValue::string("hello"))]),
    )
}

/// The instance keeps its own reference to a stored object
fn object(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    let stored = boundary.new_object("Base")?;
    boundary.set_property(id, "some_object", &HostValue::Object(stored))?;
    ensure_refs(boundary, stored, 2)?;

    let got = boundary.get_property(id, "some_object")?;
    ensure_eq("some_object", &got, &HostValue::Object(stored))?;
    ensure_refs(boundary, stored, 3)?;
    boundary.release(&got)?;
    release_object(boundary, stored)?;
    ensure_refs(boundary, stored, 1)?;

    release_object(boundary, id)?;
    ensure(!boundary.objects().is_alive(stored), "stored object to die with its owner")
}

fn replace_frees_previous(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    boundary.set_property(id, "some_strv", &strings(&["a", "b"]))?;
    let blocks = boundary.heap().live(Party::Native).len();
    boundary.set_property(id, "some_strv", &strings(&["c", "d"]))?;
    ensure_eq("live blocks", &boundary.heap().live(Party::Native).len(), &blocks)?;
    release_object(boundary, id)
}

fn rejects_wrong_type(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    boundary.set_property(id, "some_int", &HostValue::Int(1))?;
    let error = ensure_marshal(boundary.set_property(id, "some_int", &HostValue::string("one")))?;
    ensure(
        matches!(error, MarshalError::TypeMismatch { .. }),
        &format!("a type mismatch, got {}", error),
    )?;
    ensure_eq("kept value", &boundary.get_property(id, "some_int")?, &HostValue::Int(1))?;
    release_object(boundary, id)
}

fn unknown(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("PropertiesObject")?;
    match boundary.get_property(id, "no_such_property") {
        Err(CallError::UnknownProperty { type_name, name }) => {
            ensure_eq("class", type_name.as_str(), "PropertiesObject")?;
            ensure_eq("property", name.as_str(), "no_such_property")?;
        }
        other => return Err(Failure::Check(format!("expected an unknown property error, got {:?}", other))),
    }
    release_object(boundary, id)
}
