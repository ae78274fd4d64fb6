//! Records: plain structs, boxed structs and reference-counted structs

use super::{expect, fail, free_owned, items, Types};
use crate::descriptor::{ArgInfo, CallableInfo, IntWidth, Signedness, TypeDescriptor};
use crate::error::{CallError, RegistryError};
use crate::heap::{Block, NativeRepr};
use crate::invoke::{native, Frame};
use crate::registry::Library;
use crate::transfer::TransferMode;

fn record(name: &str, fields: Vec<NativeRepr>) -> Block {
    Block::Record {
        name: name.to_string(),
        fields,
        refcount: None,
    }
}

/// `long_` field of a boxed record argument
fn long_field(frame: &Frame<'_>, repr: &NativeRepr) -> Result<i64, CallError> {
    match frame.read(repr)? {
        Block::Record { fields, .. } => fields
            .first()
            .and_then(NativeRepr::as_i64)
            .ok_or_else(|| fail("record has no long_ field".to_string())),
        other => Err(fail(format!("expected a record, got {}", other.kind()))),
    }
}

pub(super) fn register(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    register_simple(library, types)?;
    register_boxed(library, types)?;
    register_shared(library, types)
}

fn register_simple(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let boxed = TypeDescriptor::boxed(&types.simple_struct);
    let inline = TypeDescriptor::inline(&types.simple_struct);
    let name = types.simple_struct.name.clone();

    let key = name.clone();
    library.register_function(
        CallableInfo::new("simple_struct_returnv").returns(boxed.clone(), TransferMode::None),
        native(move |frame| {
            let s = frame.constant(
                "simple_struct",
                record(&key, vec![NativeRepr::I64(6), NativeRepr::I8(7)]),
            );
            frame.set_return(s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("simple_struct_inv").arg(ArgInfo::new("struct_", inline)),
        native(|frame| {
            expect(
                "struct_",
                frame.arg(0),
                &NativeRepr::Inline(vec![NativeRepr::I64(6), NativeRepr::I8(7)]),
            )
        }),
    )?;

    library.register_function(
        CallableInfo::new("simple_struct_caller_allocated_out")
            .arg(ArgInfo::new("struct_", boxed).out_caller_allocates()),
        native(move |frame| {
            let storage = frame.ptr(0)?;
            *frame.heap().get_mut(storage)? = record(&name, vec![NativeRepr::I64(6), NativeRepr::I8(7)]);
            Ok(())
        }),
    )?;

    Ok(())
}

fn register_boxed(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let boxed = || TypeDescriptor::boxed(&types.boxed_struct);
    let name = types.boxed_struct.name.clone();

    let key = name.clone();
    library.register_function(
        CallableInfo::new("boxed_struct_returnv").returns(boxed(), TransferMode::None),
        native(move |frame| {
            let s = frame.constant("boxed_struct", record(&key, vec![NativeRepr::I64(42), NativeRepr::Null]));
            frame.set_return(s);
            Ok(())
        }),
    )?;

    let key = name.clone();
    library.register_function(
        CallableInfo::new("boxed_struct_return_full").returns(boxed(), TransferMode::Full),
        native(move |frame| {
            let string = frame.new_utf8("boxed");
            let s = frame.alloc(record(&key, vec![NativeRepr::I64(42), string]));
            frame.set_return(s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("boxed_struct_inv").arg(ArgInfo::new("struct_", boxed())),
        native(|frame| {
            let long = long_field(frame, frame.arg(0))?;
            expect("long_", &long, &42)
        }),
    )?;

    let key = name.clone();
    library.register_function(
        CallableInfo::new("boxed_struct_out")
            .arg(ArgInfo::new("struct_", boxed()).out().transfer(TransferMode::Full)),
        native(move |frame| {
            let s = frame.alloc(record(&key, vec![NativeRepr::I64(42), NativeRepr::Null]));
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    let key = name.clone();
    library.register_function(
        CallableInfo::new("boxed_struct_inout")
            .arg(ArgInfo::new("struct_", boxed()).inout().transfer(TransferMode::Full)),
        native(move |frame| {
            let given = frame.arg(0).clone();
            expect("long_", &long_field(frame, &given)?, &42)?;
            free_owned(frame, &given)?;
            let s = frame.alloc(record(&key, vec![NativeRepr::I64(0), NativeRepr::Null]));
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    // takes the array and every struct in it
    library.register_function(
        CallableInfo::new("array_struct_take_in")
            .arg(
                ArgInfo::new(
                    "structs",
                    TypeDescriptor::length_array(boxed(), IntWidth::W32, Signedness::Signed),
                )
                .length_arg(1)
                .transfer(TransferMode::Full),
            )
            .arg(ArgInfo::new("length", TypeDescriptor::int32())),
        native(|frame| {
            let given = frame.arg(0).clone();
            let block = frame.read(&given)?;
            let view: &Frame<'_> = frame;
            let longs = items(&block)
                .iter()
                .map(|s| long_field(view, s))
                .collect::<Result<Vec<_>, _>>()?;
            expect("longs", longs.as_slice(), &[1, 2, 3][..])?;
            free_owned(frame, &given)
        }),
    )?;

    Ok(())
}

fn register_shared(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let shared = || TypeDescriptor::boxed(&types.shared_struct);
    let name = types.shared_struct.name.clone();

    library.register_function(
        CallableInfo::new("shared_struct_new").returns(shared(), TransferMode::Full),
        native(move |frame| {
            let s = frame.alloc(Block::Record {
                name: name.clone(),
                fields: vec![NativeRepr::I64(42)],
                refcount: Some(1),
            });
            frame.set_return(s);
            Ok(())
        }),
    )?;

    // returns the struct it was given with one more reference
    library.register_function(
        CallableInfo::new("shared_struct_ref")
            .arg(ArgInfo::new("struct_", shared()))
            .returns(shared(), TransferMode::Full),
        native(|frame| {
            let ptr = frame.ptr(0)?;
            let count = frame.heap().ref_record(ptr)?;
            expect("refcount", &count, &2)?;
            frame.set_return(NativeRepr::Ptr(ptr));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("shared_struct_unref")
            .arg(ArgInfo::new("struct_", shared()).transfer(TransferMode::Full)),
        native(|frame| {
            let ptr = frame.ptr(0)?;
            let remaining = frame.heap().unref_record(ptr)?;
            expect("refcount", &remaining, &0)
        }),
    )?;

    Ok(())
}
