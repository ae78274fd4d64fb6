use super::check::{
    accepts, ensure, ensure_domain, ensure_eq, ensure_marshal, ensure_refs, ensure_usage, field,
    object_of, object_with_int, release_object, CaseResult, Failure,
};
use super::Case;
use crate::boundary::{host_method, Boundary};
use crate::channel::{NativeError, Quark};
use crate::error::{CallError, ClassError, MarshalError, UsageError};
use crate::fixture::{ERROR_CODE, ERROR_DOMAIN, ERROR_MESSAGE};
use crate::object::{Class, ObjectId, ObjectSpace};
use crate::value::HostValue;
use gimarshal_config::OverrideResolution;
use std::sync::{Arc, Mutex, PoisonError};

const CATEGORY: &str = "objects";

pub(super) fn cases() -> Vec<Case> {
    vec![
        Case::new(CATEGORY, "lifecycle", lifecycle),
        Case::new(CATEGORY, "floating_constructor", floating_constructor),
        Case::new(CATEGORY, "floating_claim_race", floating_claim_race),
        Case::new(CATEGORY, "ref_of_floating", ref_of_floating).provoking_violation(),
        Case::new(CATEGORY, "use_after_release", use_after_release).provoking_violation(),
        Case::new(CATEGORY, "return_transfer", return_transfer),
        Case::new(CATEGORY, "in_transfer", in_transfer),
        Case::new(CATEGORY, "out_transfer", out_transfer),
        Case::new(CATEGORY, "inout_none", inout_none),
        Case::new(CATEGORY, "inout_full", inout_full),
        Case::new(CATEGORY, "inout_same", inout_same),
        Case::new(CATEGORY, "wrong_class", wrong_class),
        Case::new(CATEGORY, "deep_hierarchy", deep_hierarchy),
        Case::new(CATEGORY, "overridden_method", overridden_method),
        Case::new(CATEGORY, "host_vfuncs", host_vfuncs),
        Case::new(CATEGORY, "host_vfunc_error", host_vfunc_error),
        Case::new(CATEGORY, "vfunc_object_references", vfunc_object_references),
        Case::new(CATEGORY, "interface", interface),
        Case::new(CATEGORY, "interface_clash", interface_clash),
        Case::new(CATEGORY, "ambiguous_override", ambiguous_override),
    ]
}

fn get_int(boundary: &mut Boundary, id: ObjectId) -> Result<HostValue, Failure> {
    Ok(boundary.invoke_method(id, "object_get_int", &[])?.ret().clone())
}

fn host_failure(error: UsageError) -> NativeError {
    NativeError::new(&Quark::new("gimarshal-host"), 0, error.to_string())
}

fn lifecycle(boundary: &mut Boundary) -> CaseResult {
    let output = accepts(boundary, "object_new", &[HostValue::Int(42)])?;
    let id = object_of(output.ret())?;
    ensure_refs(boundary, id, 1)?;
    ensure(!boundary.objects().is_floating(id)?, "a claimed object")?;
    ensure_eq("int", &get_int(boundary, id)?, &HostValue::Int(42))?;
    boundary.invoke_method(id, "object_set_int", &[HostValue::Int(7)])?;
    ensure_eq("int", &get_int(boundary, id)?, &HostValue::Int(7))?;
    release_object(boundary, id)?;
    ensure(!boundary.objects().is_alive(id), "the object to be finalized")
}

/// A floating reference returned with `full` transfer belongs to the host
fn floating_constructor(boundary: &mut Boundary) -> CaseResult {
    let output = accepts(boundary, "object_new_floating", &[])?;
    let id = object_of(output.ret())?;
    ensure_refs(boundary, id, 1)?;
    ensure(!boundary.objects().is_floating(id)?, "the floating reference to be claimed")?;
    release_object(boundary, id)
}

/// Two racing claims: one wins, one is rejected
fn floating_claim_race(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_floating("Object")?;
    let objects = Arc::clone(boundary.objects());
    let claims: Vec<Result<bool, UsageError>> = std::thread::scope(|scope| {
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let objects = Arc::clone(&objects);
                scope.spawn(move || objects.claim(id))
            })
            .collect();
        racers
            .into_iter()
            .map(|racer| racer.join().unwrap_or(Err(UsageError::UnknownObject(id))))
            .collect()
    });
    let mut won = 0;
    for claim in claims {
        if claim? {
            won += 1;
        }
    }
    ensure_eq("successful claims", &won, &1)?;
    ensure_refs(boundary, id, 1)?;
    release_object(boundary, id)
}

fn ref_of_floating(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_floating("Object")?;
    ensure_eq(
        "ref of a floating object",
        &boundary.objects().ref_(id),
        &Err(UsageError::RefFloating(id)),
    )?;
    boundary.objects().claim(id)?;
    release_object(boundary, id)
}

fn use_after_release(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("Object")?;
    release_object(boundary, id)?;
    let error = ensure_usage(boundary.invoke_method(id, "object_get_int", &[]))?;
    ensure_eq("error", &error, &UsageError::ObjectDestroyed(id))
}

fn return_transfer(boundary: &mut Boundary) -> CaseResult {
    let output = accepts(boundary, "object_none_return", &[])?;
    let kept = object_of(output.ret())?;
    // the fixture keeps its own reference
    ensure_refs(boundary, kept, 2)?;
    release_object(boundary, kept)?;
    ensure_refs(boundary, kept, 1)?;

    let output = accepts(boundary, "object_full_return", &[])?;
    let owned = object_of(output.ret())?;
    ensure_refs(boundary, owned, 1)?;
    release_object(boundary, owned)?;
    ensure(!boundary.objects().is_alive(owned), "the returned object to be finalized")
}

fn in_transfer(boundary: &mut Boundary) -> CaseResult {
    let id = object_with_int(boundary, "Object", 42)?;
    accepts(boundary, "object_none_in", &[HostValue::Object(id)])?;
    ensure_refs(boundary, id, 1)?;
    accepts(boundary, "object_full_in", &[HostValue::Object(id)])?;
    ensure_refs(boundary, id, 1)?;
    release_object(boundary, id)
}

fn out_transfer(boundary: &mut Boundary) -> CaseResult {
    let output = accepts(boundary, "object_none_out", &[])?;
    let kept = object_of(output.out(0))?;
    ensure_refs(boundary, kept, 2)?;
    let output = accepts(boundary, "object_full_out", &[])?;
    let owned = object_of(output.out(0))?;
    ensure_refs(boundary, owned, 1)?;
    release_object(boundary, kept)?;
    release_object(boundary, owned)
}

fn inout_none(boundary: &mut Boundary) -> CaseResult {
    let given = object_with_int(boundary, "Object", 42)?;
    let output = accepts(boundary, "object_none_inout", &[HostValue::Object(given)])?;
    let replaced = object_of(output.out(0))?;
    ensure_refs(boundary, given, 1)?;
    ensure_refs(boundary, replaced, 2)?;
    ensure_eq("int", &get_int(boundary, replaced)?, &HostValue::Int(12))?;
    release_object(boundary, given)?;
    release_object(boundary, replaced)
}

/// The callee keeps the object it was given and hands out a new one
fn inout_full(boundary: &mut Boundary) -> CaseResult {
    let given = object_with_int(boundary, "Object", 42)?;
    let output = accepts(boundary, "object_full_inout", &[HostValue::Object(given)])?;
    let replaced = object_of(output.out(0))?;
    ensure_refs(boundary, given, 2)?;
    ensure_refs(boundary, replaced, 1)?;
    ensure_eq("int", &get_int(boundary, replaced)?, &HostValue::Int(12))?;
    release_object(boundary, given)?;
    release_object(boundary, replaced)
}

/// Handing back the same reference leaves the count untouched
fn inout_same(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("Object")?;
    let output = accepts(boundary, "object_inout_same", &[HostValue::Object(id)])?;
    ensure_eq("object", output.out(0), &HostValue::Object(id))?;
    ensure_refs(boundary, id, 1)?;
    release_object(boundary, id)
}

fn wrong_class(boundary: &mut Boundary) -> CaseResult {
    let base = boundary.new_object("Base")?;
    let error = ensure_marshal(boundary.invoke("object_none_in", &[HostValue::Object(base)]))?;
    ensure_eq(
        "error",
        &error,
        &MarshalError::WrongClass {
            expected: "Object".to_string(),
            got: "Base".to_string(),
        },
    )?;
    ensure_refs(boundary, base, 1)?;
    release_object(boundary, base)
}

fn deep_hierarchy(boundary: &mut Boundary) -> CaseResult {
    let deep = boundary.new_object("SubSubObject")?;
    ensure(boundary.objects().is_a(deep, "Object")?, "SubSubObject to be an Object")?;
    boundary.invoke_method(deep, "object_method_deep_hierarchy", &[HostValue::Int(5)])?;
    ensure_eq("sub_sub_int", &field(boundary, deep, "sub_sub_int")?, &Some(HostValue::Int(5)))?;
    ensure_eq("int", &field(boundary, deep, "int")?, &None)?;

    let plain = boundary.new_object("Object")?;
    boundary.invoke_method(plain, "object_method_int8_in", &[HostValue::Int(3)])?;
    ensure_eq("int", &field(boundary, plain, "int")?, &Some(HostValue::Int(3)))?;

    release_object(boundary, deep)?;
    release_object(boundary, plain)
}

fn overridden_method(boundary: &mut Boundary) -> CaseResult {
    for (class, want) in [("Object", 0), ("SubObject", 1), ("SubSubObject", 1)] {
        let id = boundary.new_object(class)?;
        let output = boundary.invoke_method(id, "object_overridden_method", &[])?;
        ensure_eq(class, output.ret(), &HostValue::Int(want))?;
        release_object(boundary, id)?;
    }
    Ok(())
}

/// Host implementations reached through native invokers
fn host_vfuncs(boundary: &mut Boundary) -> CaseResult {
    let class = boundary.subclass("HostObject", "Object", &[])?
        .vfunc(
            "vfunc_return_value_only",
            host_method(|_, _| Ok(vec![HostValue::Int(42)])),
        )
        .vfunc(
            "vfunc_one_out_parameter",
            host_method(|_, _| Ok(vec![HostValue::Float(42.0)])),
        )
        .vfunc(
            "vfunc_multiple_out_parameters",
            host_method(|_, _| Ok(vec![HostValue::Float(42.0), HostValue::Float(43.0)])),
        )
        .vfunc(
            "vfunc_return_value_and_one_out_parameter",
            host_method(|_, _| Ok(vec![HostValue::Int(42), HostValue::Int(43)])),
        )
        .vfunc(
            "vfunc_return_value_and_multiple_out_parameters",
            host_method(|_, _| Ok(vec![HostValue::Int(42), HostValue::Int(43), HostValue::Int(44)])),
        )
        .build()?;
    let id = boundary.instantiate(&class)?;

    let output = boundary.invoke_method(id, "object_vfunc_return_value_only", &[])?;
    ensure_eq("return_value_only", output.ret(), &HostValue::Int(42))?;
    let output = boundary.invoke_method(id, "object_vfunc_one_out_parameter", &[])?;
    ensure_eq("one_out_parameter", output.outs.as_slice(), &[HostValue::Float(42.0)][..])?;
    let output = boundary.invoke_method(id, "object_vfunc_multiple_out_parameters", &[])?;
    ensure_eq(
        "multiple_out_parameters",
        output.outs.as_slice(),
        &[HostValue::Float(42.0), HostValue::Float(43.0)][..],
    )?;
    let output = boundary.invoke_method(id, "object_vfunc_return_value_and_one_out_parameter", &[])?;
    ensure_eq(
        "return_value_and_one_out_parameter",
        &output.values(),
        &vec![HostValue::Int(42), HostValue::Int(43)],
    )?;
    let output = boundary.invoke_method(id, "object_vfunc_return_value_and_multiple_out_parameters", &[])?;
    ensure_eq(
        "return_value_and_multiple_out_parameters",
        &output.values(),
        &vec![HostValue::Int(42), HostValue::Int(43), HostValue::Int(44)],
    )?;

    // overrides not given fall back to the parent's
    boundary.invoke_method(id, "object_method_int8_in", &[HostValue::Int(8)])?;
    ensure_eq("int", &field(boundary, id, "int")?, &Some(HostValue::Int(8)))?;
    release_object(boundary, id)
}

/// Only 42 succeeds; anything else fails through the error channel
fn host_vfunc_error(boundary: &mut Boundary) -> CaseResult {
    let class = boundary.subclass("HostObject", "Object", &[])?
        .vfunc(
            "vfunc_meth_with_err",
            host_method(|_, args| match args.first() {
                Some(HostValue::Int(42)) => Ok(vec![HostValue::Bool(true)]),
                _ => Err(NativeError::new(&Quark::new(ERROR_DOMAIN), ERROR_CODE, ERROR_MESSAGE)),
            }),
        )
        .build()?;
    let id = boundary.instantiate(&class)?;

    let output = boundary.invoke_method(id, "object_vfunc_meth_with_error", &[HostValue::Int(42)])?;
    ensure_eq("return", output.ret(), &HostValue::Bool(true))?;
    let error = ensure_domain(
        boundary.invoke_method(id, "object_vfunc_meth_with_error", &[HostValue::Int(0)]),
        ERROR_DOMAIN,
        ERROR_CODE,
    )?;
    ensure_eq("message", error.message.as_str(), ERROR_MESSAGE)?;
    release_object(boundary, id)
}

/// Host-created objects handed to native code, remembered for release
#[derive(Clone)]
struct Made {
    objects: Arc<ObjectSpace>,
    class: Arc<Class>,
    ids: Arc<Mutex<Vec<ObjectId>>>,
}

impl Made {
    fn new(boundary: &Boundary) -> Result<Self, Failure> {
        let class = boundary
            .library()
            .class("Object")
            .cloned()
            .ok_or_else(|| Failure::Check("fixture has no Object class".to_string()))?;
        Ok(Self {
            objects: Arc::clone(boundary.objects()),
            class,
            ids: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn make(&self) -> HostValue {
        let id = self.objects.create(&self.class);
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        HostValue::Object(id)
    }

    fn release_all(&self, boundary: &mut Boundary) -> CaseResult {
        let ids = std::mem::take(&mut *self.ids.lock().unwrap_or_else(PoisonError::into_inner));
        for id in ids {
            release_object(boundary, id)?;
        }
        Ok(())
    }
}

/// Reference state native code observes for objects crossing virtual
/// functions. The host keeps its own reference to what it returns, so a
/// `none` result is seen with one reference and a `full` result with two.
fn vfunc_object_references(boundary: &mut Boundary) -> CaseResult {
    let made = Made::new(boundary)?;
    let mut builder = boundary.subclass("HostObject", "Object", &[])?;
    for vfunc in [
        "vfunc_return_object_transfer_none",
        "vfunc_return_object_transfer_full",
        "vfunc_out_object_transfer_none",
        "vfunc_out_object_transfer_full",
    ] {
        let made = made.clone();
        builder = builder.vfunc(vfunc, host_method(move |_, _| Ok(vec![made.make()])));
    }
    for vfunc in ["vfunc_in_object_transfer_none", "vfunc_in_object_transfer_full"] {
        builder = builder.vfunc(vfunc, host_method(|_, _| Ok(Vec::new())));
    }
    let id = boundary.instantiate(&builder.build()?)?;

    let reports = [
        ("vfunc_return_object_transfer_none", 1),
        ("vfunc_return_object_transfer_full", 2),
        ("vfunc_out_object_transfer_none", 1),
        ("vfunc_out_object_transfer_full", 2),
    ];
    for (vfunc, want) in reports {
        let reporter = format!("object_get_ref_info_for_{}", vfunc);
        let output = boundary.invoke_method(id, &reporter, &[])?;
        ensure_eq(
            vfunc,
            output.outs.as_slice(),
            &[HostValue::UInt(want), HostValue::Bool(false)][..],
        )?;
    }
    made.release_all(boundary)?;

    for vfunc in ["vfunc_in_object_transfer_none", "vfunc_in_object_transfer_full"] {
        let reporter = format!("object_get_ref_info_for_{}", vfunc);
        let output = boundary.invoke_method(id, &reporter, &[HostValue::string("Object")])?;
        ensure_eq(
            vfunc,
            output.outs.as_slice(),
            &[HostValue::UInt(1), HostValue::Bool(false)][..],
        )?;
    }
    ensure_eq("live objects", &boundary.objects().live_count(), &1)?;
    release_object(boundary, id)
}

fn interface(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("InterfaceImpl")?;
    ensure(boundary.objects().implements(id, "Interface")?, "InterfaceImpl to implement Interface")?;
    ensure(!boundary.objects().implements(id, "Interface2")?, "InterfaceImpl not to implement Interface2")?;

    accepts(boundary, "test_interface_test_int8_in", &[HostValue::Object(id), HostValue::Int(42)])?;
    ensure_eq("int8_in", &field(boundary, id, "int8_in")?, &Some(HostValue::Int(42)))?;
    boundary.invoke_interface(id, "Interface", "test_int8_in", &[HostValue::Int(3)])?;
    ensure_eq("int8_in", &field(boundary, id, "int8_in")?, &Some(HostValue::Int(3)))?;
    ensure_refs(boundary, id, 1)?;

    let error = ensure_marshal(boundary.invoke(
        "test_interface2_test_int8_in",
        &[HostValue::Object(id), HostValue::Int(1)],
    ))?;
    ensure(matches!(error, MarshalError::WrongClass { .. }), "a wrong class error")?;
    release_object(boundary, id)
}

/// Same method name on two interfaces, each implementation reachable
fn interface_clash(boundary: &mut Boundary) -> CaseResult {
    let id = boundary.new_object("Clash")?;
    accepts(boundary, "test_interface_test_int8_in", &[HostValue::Object(id), HostValue::Int(1)])?;
    accepts(boundary, "test_interface2_test_int8_in", &[HostValue::Object(id), HostValue::Int(2)])?;
    ensure_eq("interface", &field(boundary, id, "interface")?, &Some(HostValue::Int(1)))?;
    ensure_eq("interface2", &field(boundary, id, "interface2")?, &Some(HostValue::Int(2)))?;
    release_object(boundary, id)
}

/// An unqualified override matching two interfaces is refused unless the
/// resolution says otherwise
fn ambiguous_override(boundary: &mut Boundary) -> CaseResult {
    let interfaces = ["Interface", "Interface2"];
    let objects = Arc::clone(boundary.objects());
    let record = move |id: ObjectId, args: &[HostValue]| -> Result<Vec<HostValue>, NativeError> {
        let value = args.first().cloned().unwrap_or(HostValue::Null);
        objects.set_field(id, "host", value).map_err(host_failure)?;
        Ok(Vec::new())
    };

    let refused = boundary.subclass("HostClash", "Base", &interfaces)?
        .method("test_int8_in", host_method(record.clone()))
        .resolution(OverrideResolution::Error)
        .build();
    match refused {
        Err(ClassError::AmbiguousOverride { candidates, .. }) => {
            ensure_eq("candidates", candidates.as_slice(), &["Interface", "Interface2"].map(String::from)[..])?;
        }
        other => {
            return Err(Failure::Check(format!(
                "expected an ambiguous override, got {:?}",
                other.map(|class| class.name().to_string())
            )))
        }
    }

    let class = boundary.subclass("HostClash", "Base", &interfaces)?
        .method("test_int8_in", host_method(record))
        .resolution(OverrideResolution::LastWins)
        .build()?;
    let id = boundary.instantiate(&class)?;
    accepts(boundary, "test_interface2_test_int8_in", &[HostValue::Object(id), HostValue::Int(9)])?;
    ensure_eq("host", &field(boundary, id, "host")?, &Some(HostValue::Int(9)))?;

    let unresolved = boundary.invoke("test_interface_test_int8_in", &[HostValue::Object(id), HostValue::Int(1)]);
    ensure(
        matches!(unresolved, Err(CallError::NoImplementation { .. })),
        "Interface.test_int8_in to stay unimplemented",
    )?;
    release_object(boundary, id)
}
