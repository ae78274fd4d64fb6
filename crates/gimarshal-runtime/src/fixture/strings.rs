//! UTF-8 strings under every transfer mode

use super::{expect, CONSTANT_UTF8};
use crate::descriptor::{ArgInfo, CallableInfo, TypeDescriptor};
use crate::error::RegistryError;
use crate::heap::NativeRepr;
use crate::invoke::native;
use crate::registry::Library;
use crate::transfer::TransferMode;

const DANGLING_SLOT: &str = "utf8_dangling_out";

pub(super) fn register(library: &mut Library) -> Result<(), RegistryError> {
    let utf8 = || TypeDescriptor::Utf8;

    library.register_function(
        CallableInfo::new("constant_utf8").returns(utf8(), TransferMode::None),
        native(|frame| {
            let s = frame.constant_utf8(CONSTANT_UTF8);
            frame.set_return(s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_none_return").returns(utf8(), TransferMode::None),
        native(|frame| {
            let s = frame.constant_utf8(CONSTANT_UTF8);
            frame.set_return(s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_full_return").returns(utf8(), TransferMode::Full),
        native(|frame| {
            let s = frame.new_utf8(CONSTANT_UTF8);
            frame.set_return(s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_none_in").arg(ArgInfo::new("utf8", utf8())),
        native(|frame| expect("utf8", frame.utf8(0)?.as_str(), CONSTANT_UTF8)),
    )?;

    library.register_function(
        CallableInfo::new("utf8_full_in").arg(ArgInfo::new("utf8", utf8()).transfer(TransferMode::Full)),
        native(|frame| {
            expect("utf8", frame.utf8(0)?.as_str(), CONSTANT_UTF8)?;
            let given = frame.arg(0).clone();
            frame.free(&given)?;
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_none_out").arg(ArgInfo::new("utf8", utf8()).out()),
        native(|frame| {
            let s = frame.constant_utf8(CONSTANT_UTF8);
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_full_out")
            .arg(ArgInfo::new("utf8", utf8()).out().transfer(TransferMode::Full)),
        native(|frame| {
            let s = frame.new_utf8(CONSTANT_UTF8);
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    // scratch buffer reused across calls: the previous result is freed here
    library.register_function(
        CallableInfo::new("utf8_dangling_out").arg(ArgInfo::new("utf8", utf8()).out().dangling()),
        native(|frame| {
            if let Some(previous) = frame.take_global(DANGLING_SLOT) {
                frame.free(&previous)?;
            }
            let s = frame.new_utf8(CONSTANT_UTF8);
            frame.set_global(DANGLING_SLOT, s.clone());
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_none_inout").arg(ArgInfo::new("utf8", utf8()).inout()),
        native(|frame| {
            expect("utf8", frame.utf8(0)?.as_str(), CONSTANT_UTF8)?;
            let s = frame.constant_utf8("");
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_full_inout")
            .arg(ArgInfo::new("utf8", utf8()).inout().transfer(TransferMode::Full)),
        native(|frame| {
            expect("utf8", frame.utf8(0)?.as_str(), CONSTANT_UTF8)?;
            let given = frame.arg(0).clone();
            frame.free(&given)?;
            let s = frame.new_utf8("");
            frame.set_arg(0, s);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("utf8_nullable_in").arg(ArgInfo::new("utf8", utf8()).nullable()),
        native(|frame| expect("utf8", frame.arg(0), &NativeRepr::Null)),
    )?;

    Ok(())
}
