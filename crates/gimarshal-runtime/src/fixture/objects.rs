//! Objects: reference counting across the boundary, inheritance, virtual
//! functions and interfaces

use super::{expect, fail, new_instance, Types};
use crate::descriptor::{ArgInfo, CallableInfo, ObjectInfo, TypeDescriptor};
use crate::error::{CallError, ClassError, RegistryError};
use crate::heap::NativeRepr;
use crate::invoke::{native, Frame};
use crate::object::{ClassBuilder, ObjectId};
use crate::registry::{Library, RegisteredType};
use crate::transfer::TransferMode;
use crate::value::HostValue;
use std::sync::Arc;

/// Declaration of `Object`, the class host subclasses derive from
///
/// Object-typed parameters of its virtual functions name the root class,
/// since a class cannot refer to its own descriptor.
pub(super) fn object_info(base: &Arc<ObjectInfo>) -> ObjectInfo {
    let object = || TypeDescriptor::Object(Arc::clone(base));
    let int64 = TypeDescriptor::int64;
    let float = TypeDescriptor::float;

    ObjectInfo::new("Object")
        .parent(base)
        .vfunc(CallableInfo::new("method_int8_in").arg(ArgInfo::new("in", TypeDescriptor::int8())))
        .vfunc(CallableInfo::new("overridden_method").returns(TypeDescriptor::int32(), TransferMode::None))
        .vfunc(CallableInfo::new("vfunc_return_value_only").returns(int64(), TransferMode::None))
        .vfunc(CallableInfo::new("vfunc_one_out_parameter").arg(ArgInfo::new("a", float()).out()))
        .vfunc(
            CallableInfo::new("vfunc_multiple_out_parameters")
                .arg(ArgInfo::new("a", float()).out())
                .arg(ArgInfo::new("b", float()).out()),
        )
        .vfunc(
            CallableInfo::new("vfunc_return_value_and_one_out_parameter")
                .arg(ArgInfo::new("a", int64()).out())
                .returns(int64(), TransferMode::None),
        )
        .vfunc(
            CallableInfo::new("vfunc_return_value_and_multiple_out_parameters")
                .arg(ArgInfo::new("a", int64()).out())
                .arg(ArgInfo::new("b", int64()).out())
                .returns(int64(), TransferMode::None),
        )
        .vfunc(
            CallableInfo::new("vfunc_meth_with_err")
                .arg(ArgInfo::new("x", TypeDescriptor::int32()))
                .returns(TypeDescriptor::Boolean, TransferMode::None)
                .throws(),
        )
        .vfunc(CallableInfo::new("vfunc_return_object_transfer_none").returns(object(), TransferMode::None))
        .vfunc(CallableInfo::new("vfunc_return_object_transfer_full").returns(object(), TransferMode::Full))
        .vfunc(CallableInfo::new("vfunc_out_object_transfer_none").arg(ArgInfo::new("object", object()).out()))
        .vfunc(
            CallableInfo::new("vfunc_out_object_transfer_full")
                .arg(ArgInfo::new("object", object()).out().transfer(TransferMode::Full)),
        )
        .vfunc(CallableInfo::new("vfunc_in_object_transfer_none").arg(ArgInfo::new("object", object())))
        .vfunc(
            CallableInfo::new("vfunc_in_object_transfer_full")
                .arg(ArgInfo::new("object", object()).transfer(TransferMode::Full)),
        )
}

/// Start a host-defined subclass of a registered class
///
/// Add overrides with `ClassBuilder::vfunc` (usually wrapping a closure in
/// `host_method`), build it, and create instances with
/// `Boundary::instantiate`.
pub fn host_subclass(
    library: &Library,
    name: &str,
    parent: &str,
    interfaces: &[&str],
) -> Result<ClassBuilder, ClassError> {
    let parent_class = library
        .class(parent)
        .cloned()
        .ok_or_else(|| ClassError::UnknownClass(parent.to_string()))?;
    let mut info = ObjectInfo::new(name).parent(parent_class.info());
    for interface in interfaces {
        match library.registry().lookup(interface) {
            Some(RegisteredType::Interface(iface)) => info = info.implements(iface),
            _ => {
                return Err(ClassError::UnknownInterface {
                    class: name.to_string(),
                    interface: interface.to_string(),
                })
            }
        }
    }
    Ok(ClassBuilder::new(&Arc::new(info)).parent(&parent_class))
}

/// Field value of an instance as an integer
fn int_field(frame: &Frame<'_>, id: ObjectId, name: &str) -> Result<Option<i64>, CallError> {
    Ok(frame.objects().field(id, name)?.and_then(|v| v.as_i64()))
}

fn store_int(frame: &Frame<'_>, name: &str, value: i64) -> Result<(), CallError> {
    let id = frame.instance()?;
    frame.objects().set_field(id, name, HostValue::Int(value))?;
    Ok(())
}

/// Write the reference count and floating state of `id` to outs 0 and 1
fn report_refs(frame: &mut Frame<'_>, id: ObjectId, first_out: usize) -> Result<(), CallError> {
    let objects = frame.objects();
    let count = objects.ref_count(id)?;
    let floating = objects.is_floating(id)?;
    frame.set_arg(first_out, NativeRepr::U32(count));
    frame.set_arg(first_out + 1, NativeRepr::Bool(floating));
    Ok(())
}

fn returned_object(repr: &NativeRepr, what: &str) -> Result<ObjectId, CallError> {
    repr.as_object()
        .ok_or_else(|| fail(format!("{} produced no object: {:?}", what, repr)))
}

/// A fixture-owned object kept in a global slot, created on first use
fn kept_object(frame: &mut Frame<'_>, slot: &str) -> Result<ObjectId, CallError> {
    if let Some(id) = frame.global(slot).and_then(NativeRepr::as_object) {
        return Ok(id);
    }
    let id = new_instance(frame, "Object", false)?;
    frame.set_global(slot, NativeRepr::Object(id));
    Ok(id)
}

pub(super) fn register(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    register_classes(library, types)?;
    register_lifecycle(library, types)?;
    register_vfunc_invokers(library)?;
    register_ref_info(library)?;
    register_interfaces(library, types)
}

fn register_classes(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let base = ClassBuilder::new(&types.base).build()?;

    let object = ClassBuilder::new(&types.object)
        .parent(&base)
        .vfunc(
            "method_int8_in",
            native(|frame| {
                let value = frame.int(0)?;
                store_int(frame, "int", value)
            }),
        )
        .vfunc(
            "overridden_method",
            native(|frame| {
                frame.set_return(NativeRepr::I32(0));
                Ok(())
            }),
        )
        .build()?;

    let sub_object = ClassBuilder::new(&types.sub_object)
        .parent(&object)
        .vfunc(
            "overridden_method",
            native(|frame| {
                frame.set_return(NativeRepr::I32(1));
                Ok(())
            }),
        )
        .build()?;

    let sub_sub_object = ClassBuilder::new(&types.sub_sub_object)
        .parent(&sub_object)
        .vfunc(
            "method_int8_in",
            native(|frame| {
                let value = frame.int(0)?;
                store_int(frame, "sub_sub_int", value)
            }),
        )
        .build()?;

    let interface_impl = ClassBuilder::new(&types.interface_impl)
        .parent(&base)
        .interface_method(
            "Interface",
            "test_int8_in",
            native(|frame| {
                let value = frame.int(0)?;
                store_int(frame, "int8_in", value)
            }),
        )
        .build()?;

    let clash = ClassBuilder::new(&types.clash)
        .parent(&base)
        .interface_method(
            "Interface",
            "test_int8_in",
            native(|frame| {
                let value = frame.int(0)?;
                store_int(frame, "interface", value)
            }),
        )
        .interface_method(
            "Interface2",
            "test_int8_in",
            native(|frame| {
                let value = frame.int(0)?;
                store_int(frame, "interface2", value)
            }),
        )
        .build()?;

    let properties_object = ClassBuilder::new(&types.properties_object).parent(&base).build()?;

    for class in [
        base,
        object,
        sub_object,
        sub_sub_object,
        interface_impl,
        clash,
        properties_object,
    ] {
        library.register_class(class)?;
    }
    Ok(())
}

fn register_lifecycle(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let object = || TypeDescriptor::Object(Arc::clone(&types.object));

    library.register_function(
        CallableInfo::new("object_new")
            .arg(ArgInfo::new("int_", TypeDescriptor::int32()))
            .returns(object(), TransferMode::Full),
        native(|frame| {
            let value = frame.int(0)?;
            let id = new_instance(frame, "Object", false)?;
            frame.objects().set_field(id, "int", HostValue::Int(value))?;
            frame.set_return(NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_new_floating").returns(object(), TransferMode::Full),
        native(|frame| {
            let id = new_instance(frame, "Object", true)?;
            frame.set_return(NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_get_int")
            .method()
            .returns(TypeDescriptor::int32(), TransferMode::None),
        native(|frame| {
            let id = frame.instance()?;
            let value = int_field(frame, id, "int")?.unwrap_or(0);
            let value = i32::try_from(value).map_err(|_| fail(format!("int {} out of range", value)))?;
            frame.set_return(NativeRepr::I32(value));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_set_int")
            .method()
            .arg(ArgInfo::new("int_", TypeDescriptor::int32())),
        native(|frame| {
            let value = frame.int(0)?;
            store_int(frame, "int", value)
        }),
    )?;

    // the fixture keeps its own reference, the host gets a second one
    library.register_function(
        CallableInfo::new("object_none_return").returns(object(), TransferMode::None),
        native(|frame| {
            let id = kept_object(frame, "object:none_return")?;
            frame.set_return(NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_full_return").returns(object(), TransferMode::Full),
        native(|frame| {
            let id = new_instance(frame, "Object", false)?;
            frame.set_return(NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_none_in").arg(ArgInfo::new("object", object())),
        native(|frame| {
            let id = frame.object(0)?;
            expect("int", &int_field(frame, id, "int")?, &Some(42))
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_full_in").arg(ArgInfo::new("object", object()).transfer(TransferMode::Full)),
        native(|frame| {
            let id = frame.object(0)?;
            expect("int", &int_field(frame, id, "int")?, &Some(42))?;
            frame.objects().unref(id)?;
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_none_out").arg(ArgInfo::new("object", object()).out()),
        native(|frame| {
            let id = kept_object(frame, "object:none_out")?;
            frame.set_arg(0, NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_full_out")
            .arg(ArgInfo::new("object", object()).out().transfer(TransferMode::Full)),
        native(|frame| {
            let id = new_instance(frame, "Object", false)?;
            frame.set_arg(0, NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_none_inout").arg(ArgInfo::new("object", object()).inout()),
        native(|frame| {
            let given = frame.object(0)?;
            expect("int", &int_field(frame, given, "int")?, &Some(42))?;
            let id = kept_object(frame, "object:none_inout")?;
            frame.objects().set_field(id, "int", HostValue::Int(12))?;
            frame.set_arg(0, NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    // keeps the reference it was given and hands out a new object
    library.register_function(
        CallableInfo::new("object_full_inout")
            .arg(ArgInfo::new("object", object()).inout().transfer(TransferMode::Full)),
        native(|frame| {
            let given = frame.object(0)?;
            expect("int", &int_field(frame, given, "int")?, &Some(42))?;
            if let Some(previous) = frame.set_global("object:full_inout", NativeRepr::Object(given)) {
                if let Some(previous) = previous.as_object() {
                    frame.objects().unref(previous)?;
                }
            }
            let id = new_instance(frame, "Object", false)?;
            frame.objects().set_field(id, "int", HostValue::Int(12))?;
            frame.set_arg(0, NativeRepr::Object(id));
            Ok(())
        }),
    )?;

    // hands back the very reference it was given
    library.register_function(
        CallableInfo::new("object_inout_same")
            .arg(ArgInfo::new("object", object()).inout().transfer(TransferMode::Full)),
        native(|frame| {
            frame.object(0)?;
            Ok(())
        }),
    )?;

    Ok(())
}

fn register_vfunc_invokers(library: &mut Library) -> Result<(), RegistryError> {
    let int64 = TypeDescriptor::int64;
    let float = TypeDescriptor::float;

    library.register_function(
        CallableInfo::new("object_method_int8_in")
            .method()
            .arg(ArgInfo::new("in", TypeDescriptor::int8())),
        native(|frame| {
            let id = frame.instance()?;
            let arg = frame.arg(0).clone();
            frame.call_vfunc(id, "method_int8_in", vec![arg])?;
            Ok(())
        }),
    )?;

    // same dispatch, documented for instances several levels below Object
    library.register_function(
        CallableInfo::new("object_method_deep_hierarchy")
            .method()
            .arg(ArgInfo::new("in", TypeDescriptor::int8())),
        native(|frame| {
            let id = frame.instance()?;
            let arg = frame.arg(0).clone();
            frame.call_vfunc(id, "method_int8_in", vec![arg])?;
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_overridden_method")
            .method()
            .returns(TypeDescriptor::int32(), TransferMode::None),
        native(|frame| {
            let id = frame.instance()?;
            let (ret, _) = frame.call_vfunc(id, "overridden_method", Vec::new())?;
            frame.set_return(ret);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_vfunc_return_value_only")
            .method()
            .returns(int64(), TransferMode::None),
        native(|frame| {
            let id = frame.instance()?;
            let (ret, _) = frame.call_vfunc(id, "vfunc_return_value_only", Vec::new())?;
            frame.set_return(ret);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_vfunc_one_out_parameter")
            .method()
            .arg(ArgInfo::new("a", float()).out()),
        native(|frame| {
            let id = frame.instance()?;
            let (_, outs) = frame.call_vfunc(id, "vfunc_one_out_parameter", Vec::new())?;
            copy_outs(frame, &outs, &[0]);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_vfunc_multiple_out_parameters")
            .method()
            .arg(ArgInfo::new("a", float()).out())
            .arg(ArgInfo::new("b", float()).out()),
        native(|frame| {
            let id = frame.instance()?;
            let (_, outs) = frame.call_vfunc(id, "vfunc_multiple_out_parameters", Vec::new())?;
            copy_outs(frame, &outs, &[0, 1]);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_vfunc_return_value_and_one_out_parameter")
            .method()
            .arg(ArgInfo::new("a", int64()).out())
            .returns(int64(), TransferMode::None),
        native(|frame| {
            let id = frame.instance()?;
            let (ret, outs) = frame.call_vfunc(id, "vfunc_return_value_and_one_out_parameter", Vec::new())?;
            frame.set_return(ret);
            copy_outs(frame, &outs, &[0]);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_vfunc_return_value_and_multiple_out_parameters")
            .method()
            .arg(ArgInfo::new("a", int64()).out())
            .arg(ArgInfo::new("b", int64()).out())
            .returns(int64(), TransferMode::None),
        native(|frame| {
            let id = frame.instance()?;
            let (ret, outs) =
                frame.call_vfunc(id, "vfunc_return_value_and_multiple_out_parameters", Vec::new())?;
            frame.set_return(ret);
            copy_outs(frame, &outs, &[0, 1]);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("object_vfunc_meth_with_error")
            .method()
            .arg(ArgInfo::new("x", TypeDescriptor::int32()))
            .returns(TypeDescriptor::Boolean, TransferMode::None)
            .throws(),
        native(|frame| {
            let id = frame.instance()?;
            let x = frame.arg(0).clone();
            let (ret, _) = frame.call_vfunc(id, "vfunc_meth_with_err", vec![x])?;
            frame.set_return(ret);
            Ok(())
        }),
    )?;

    Ok(())
}

fn copy_outs(frame: &mut Frame<'_>, outs: &[NativeRepr], indices: &[usize]) {
    for &i in indices {
        frame.set_arg(i, outs.get(i).cloned().unwrap_or(NativeRepr::Void));
    }
}

/// Reference-state reports: run an object-passing virtual function and
/// report what the object's reference count looks like afterwards
fn register_ref_info(library: &mut Library) -> Result<(), RegistryError> {
    let ref_info = |name: &str| {
        CallableInfo::new(name)
            .method()
            .arg(ArgInfo::new("ref_count", TypeDescriptor::uint32()).out())
            .arg(ArgInfo::new("is_floating", TypeDescriptor::Boolean).out())
    };

    for mode in ["none", "full"] {
        let vfunc = format!("vfunc_return_object_transfer_{}", mode);
        library.register_function(
            ref_info(&format!("object_get_ref_info_for_{}", vfunc)),
            native(move |frame| {
                let id = frame.instance()?;
                let (ret, _) = frame.call_vfunc(id, &vfunc, Vec::new())?;
                let object = returned_object(&ret, &vfunc)?;
                report_refs(frame, object, 0)?;
                if mode == "full" {
                    frame.objects().unref(object)?;
                }
                Ok(())
            }),
        )?;

        let vfunc = format!("vfunc_out_object_transfer_{}", mode);
        library.register_function(
            ref_info(&format!("object_get_ref_info_for_{}", vfunc)),
            native(move |frame| {
                let id = frame.instance()?;
                let (_, outs) = frame.call_vfunc(id, &vfunc, Vec::new())?;
                let object = returned_object(outs.first().unwrap_or(&NativeRepr::Null), &vfunc)?;
                report_refs(frame, object, 0)?;
                if mode == "full" {
                    frame.objects().unref(object)?;
                }
                Ok(())
            }),
        )?;

        // the fixture keeps one reference of its own across the call
        let vfunc = format!("vfunc_in_object_transfer_{}", mode);
        library.register_function(
            CallableInfo::new(&format!("object_get_ref_info_for_{}", vfunc))
                .method()
                .arg(ArgInfo::new("type_name", TypeDescriptor::Utf8))
                .arg(ArgInfo::new("ref_count", TypeDescriptor::uint32()).out())
                .arg(ArgInfo::new("is_floating", TypeDescriptor::Boolean).out()),
            native(move |frame| {
                let id = frame.instance()?;
                let type_name = frame.utf8(0)?;
                let object = new_instance(frame, &type_name, false)?;
                if mode == "full" {
                    frame.objects().ref_(object)?;
                }
                frame.call_vfunc(id, &vfunc, vec![NativeRepr::Object(object)])?;
                report_refs(frame, object, 1)?;
                frame.objects().unref(object)?;
                Ok(())
            }),
        )?;
    }
    Ok(())
}

fn register_interfaces(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    library.register_function(
        CallableInfo::new("test_interface_test_int8_in")
            .arg(ArgInfo::new("test_iface", TypeDescriptor::Interface(Arc::clone(&types.interface))))
            .arg(ArgInfo::new("in", TypeDescriptor::int8())),
        native(|frame| {
            let id = frame.object(0)?;
            let value = frame.arg(1).clone();
            frame.call_interface(id, "Interface", "test_int8_in", vec![value])?;
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("test_interface2_test_int8_in")
            .arg(ArgInfo::new("test_iface", TypeDescriptor::Interface(Arc::clone(&types.interface2))))
            .arg(ArgInfo::new("in", TypeDescriptor::int8())),
        native(|frame| {
            let id = frame.object(0)?;
            let value = frame.arg(1).clone();
            frame.call_interface(id, "Interface2", "test_int8_in", vec![value])?;
            Ok(())
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::library;

    #[test]
    fn test_host_subclass_requires_known_parent() {
        let library = library().unwrap();
        let err = host_subclass(&library, "HostObject", "Missing", &[]).err();
        assert_eq!(err, Some(ClassError::UnknownClass("Missing".to_string())));
    }

    #[test]
    fn test_host_subclass_inherits_declarations() {
        let library = library().unwrap();
        let class = host_subclass(&library, "HostObject", "Object", &["Interface"])
            .unwrap()
            .build()
            .unwrap();
        assert!(class.is_a("Object"));
        assert!(class.implements("Interface"));
        assert!(class.info().find_vfunc("vfunc_return_value_only").is_some());
        assert!(class.resolve_vfunc("method_int8_in").is_some());
    }
}
