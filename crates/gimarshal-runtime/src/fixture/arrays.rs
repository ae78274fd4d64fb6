//! Arrays: fixed size, length parameter, zero-terminated

use super::{expect, fail, ints_of, new_strings, static_strings, strings_of, Types};
use crate::descriptor::{ArgInfo, CallableInfo, IntWidth, Signedness, TypeDescriptor};
use crate::error::{CallError, RegistryError};
use crate::heap::{Block, NativeRepr};
use crate::invoke::{native, Frame};
use crate::registry::Library;
use crate::transfer::TransferMode;

const FIXED: [i32; 4] = [-1, 0, 1, 2];

fn int_block(values: &[i32]) -> Block {
    Block::Array(values.iter().map(|v| NativeRepr::I32(*v)).collect())
}

fn fixed_ints(frame: &mut Frame<'_>) -> NativeRepr {
    frame.constant("array:fixed", int_block(&FIXED))
}

fn zero_terminated_strings(frame: &mut Frame<'_>, key: &str, values: &[&str]) -> NativeRepr {
    let mut items = static_strings(frame, values);
    items.push(NativeRepr::Null);
    frame.constant(key, Block::Array(items))
}

fn expect_ints(frame: &Frame<'_>, index: usize, want: &[i64]) -> Result<(), CallError> {
    let block = frame.block(index)?;
    expect("ints", ints_of(&block)?.as_slice(), want)
}

fn length_array(width: IntWidth, signedness: Signedness) -> TypeDescriptor {
    TypeDescriptor::length_array(TypeDescriptor::int32(), width, signedness)
}

pub(super) fn register(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    register_fixed(library)?;
    register_length(library)?;
    register_zero_terminated(library, types)
}

fn register_fixed(library: &mut Library) -> Result<(), RegistryError> {
    let fixed = || TypeDescriptor::fixed_array(TypeDescriptor::int32(), 4);

    library.register_function(
        CallableInfo::new("array_fixed_int_return").returns(fixed(), TransferMode::None),
        native(|frame| {
            let ints = fixed_ints(frame);
            frame.set_return(ints);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_fixed_int_in").arg(ArgInfo::new("ints", fixed())),
        native(|frame| expect_ints(frame, 0, &[-1, 0, 1, 2])),
    )?;

    library.register_function(
        CallableInfo::new("array_fixed_out").arg(ArgInfo::new("ints", fixed()).out()),
        native(|frame| {
            let ints = fixed_ints(frame);
            frame.set_arg(0, ints);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_fixed_inout").arg(ArgInfo::new("ints", fixed()).inout()),
        native(|frame| {
            expect_ints(frame, 0, &[-1, 0, 1, 2])?;
            let reversed = frame.constant("array:fixed_reversed", int_block(&[2, 1, 0, -1]));
            frame.set_arg(0, reversed);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_fixed_caller_allocated_out")
            .arg(ArgInfo::new("ints", fixed()).out_caller_allocates()),
        native(|frame| {
            let storage = frame.ptr(0)?;
            *frame.heap().get_mut(storage)? = int_block(&FIXED);
            Ok(())
        }),
    )?;

    Ok(())
}

fn register_length(library: &mut Library) -> Result<(), RegistryError> {
    let ints = || length_array(IntWidth::W32, Signedness::Signed);
    let int = TypeDescriptor::int32;

    library.register_function(
        CallableInfo::new("array_return")
            .arg(ArgInfo::new("length", int()).out())
            .returns_array(ints(), TransferMode::None, 0),
        native(|frame| {
            let ints = fixed_ints(frame);
            frame.set_return(ints);
            frame.set_arg(0, NativeRepr::I32(4));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_in")
            .arg(ArgInfo::new("ints", ints()).length_arg(1))
            .arg(ArgInfo::new("length", int())),
        native(|frame| {
            expect("length", frame.arg(1), &NativeRepr::I32(4))?;
            expect_ints(frame, 0, &[-1, 0, 1, 2])
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_in_len_before")
            .arg(ArgInfo::new("length", int()))
            .arg(ArgInfo::new("ints", ints()).length_arg(0)),
        native(|frame| {
            expect("length", frame.arg(0), &NativeRepr::I32(4))?;
            expect_ints(frame, 1, &[-1, 0, 1, 2])
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_in_guint8_len")
            .arg(ArgInfo::new("ints", length_array(IntWidth::W8, Signedness::Unsigned)).length_arg(1))
            .arg(ArgInfo::new("length", TypeDescriptor::uint8())),
        native(|frame| {
            expect("length", frame.arg(1), &NativeRepr::U8(4))?;
            expect_ints(frame, 0, &[-1, 0, 1, 2])
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_in_guint64_len")
            .arg(ArgInfo::new("ints", length_array(IntWidth::W64, Signedness::Unsigned)).length_arg(1))
            .arg(ArgInfo::new("length", TypeDescriptor::uint64())),
        native(|frame| {
            expect("length", frame.arg(1), &NativeRepr::U64(4))?;
            expect_ints(frame, 0, &[-1, 0, 1, 2])
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_in_sum")
            .arg(ArgInfo::new("ints", ints()).length_arg(1))
            .arg(ArgInfo::new("length", int()))
            .arg(ArgInfo::new("sum", TypeDescriptor::int64()).out()),
        native(|frame| {
            let block = frame.block(0)?;
            let sum: i64 = ints_of(&block)?.iter().sum();
            frame.set_arg(2, NativeRepr::I64(sum));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_out")
            .arg(ArgInfo::new("ints", ints()).out().length_arg(1))
            .arg(ArgInfo::new("length", int()).out()),
        native(|frame| {
            let ints = fixed_ints(frame);
            frame.set_arg(0, ints);
            frame.set_arg(1, NativeRepr::I32(4));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_inout")
            .arg(ArgInfo::new("ints", ints()).inout().length_arg(1))
            .arg(ArgInfo::new("length", int()).inout()),
        native(|frame| {
            expect_ints(frame, 0, &[-1, 0, 1, 2])?;
            let ints = frame.constant("array:inout", int_block(&[-2, -1, 0, 1, 2]));
            frame.set_arg(0, ints);
            frame.set_arg(1, NativeRepr::I32(5));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_out_etc")
            .arg(ArgInfo::new("first", int()))
            .arg(ArgInfo::new("ints", ints()).out().length_arg(2).transfer(TransferMode::Full))
            .arg(ArgInfo::new("length", int()).out())
            .arg(ArgInfo::new("last", int()))
            .arg(ArgInfo::new("sum", int()).out()),
        native(|frame| {
            let first = frame.int(0)?;
            let last = frame.int(3)?;
            let first = i32::try_from(first).map_err(|_| fail(format!("first {} out of range", first)))?;
            let last = i32::try_from(last).map_err(|_| fail(format!("last {} out of range", last)))?;
            let ints = frame.alloc(int_block(&[first, 0, 1, last]));
            frame.set_arg(1, ints);
            frame.set_arg(2, NativeRepr::I32(4));
            frame.set_arg(4, NativeRepr::I32(first.wrapping_add(last)));
            Ok(())
        }),
    )?;

    Ok(())
}

fn register_zero_terminated(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let strv = || TypeDescriptor::zero_terminated(TypeDescriptor::Utf8);

    library.register_function(
        CallableInfo::new("array_zero_terminated_return").returns(strv(), TransferMode::None),
        native(|frame| {
            let strv = zero_terminated_strings(frame, "array:strv", &["0", "1", "2"]);
            frame.set_return(strv);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_zero_terminated_return_null")
            .returns_nullable(strv(), TransferMode::None),
        native(|frame| {
            frame.set_return(NativeRepr::Null);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_zero_terminated_in").arg(ArgInfo::new("utf8s", strv())),
        native(|frame| {
            let block = frame.block(0)?;
            expect("utf8s", strings_of(frame, &block)?.as_slice(), &["0", "1", "2"].map(String::from)[..])
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_zero_terminated_out").arg(ArgInfo::new("utf8s", strv()).out()),
        native(|frame| {
            let strv = zero_terminated_strings(frame, "array:strv", &["0", "1", "2"]);
            frame.set_arg(0, strv);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_zero_terminated_inout").arg(ArgInfo::new("utf8s", strv()).inout()),
        native(|frame| {
            let block = frame.block(0)?;
            expect("utf8s", strings_of(frame, &block)?.as_slice(), &["0", "1", "2"].map(String::from)[..])?;
            let strv = zero_terminated_strings(frame, "array:strv_inout", &["-1", "0", "1", "2"]);
            frame.set_arg(0, strv);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("array_zero_terminated_full_return")
            .returns(strv(), TransferMode::Full),
        native(|frame| {
            let mut items = new_strings(frame, &["0", "1", "2"]);
            items.push(NativeRepr::Null);
            let strv = frame.alloc(Block::Array(items));
            frame.set_return(strv);
            Ok(())
        }),
    )?;

    let boxed = TypeDescriptor::boxed(&types.boxed_struct);
    let name = types.boxed_struct.name.clone();
    library.register_function(
        CallableInfo::new("array_zero_terminated_return_struct")
            .returns(TypeDescriptor::zero_terminated(boxed), TransferMode::Full),
        native(move |frame| {
            let mut items: Vec<NativeRepr> = (42..=44)
                .map(|long| {
                    frame.alloc(Block::Record {
                        name: name.clone(),
                        fields: vec![NativeRepr::I64(long), NativeRepr::Null],
                        refcount: None,
                    })
                })
                .collect();
            items.push(NativeRepr::Null);
            let array = frame.alloc(Block::Array(items));
            frame.set_return(array);
            Ok(())
        }),
    )?;

    Ok(())
}
