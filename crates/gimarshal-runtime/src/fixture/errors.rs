//! Error channel: thrown errors, errors as out and return values

use super::{expect, ints_of, Types, ERROR_CODE, ERROR_DEBUG, ERROR_MESSAGE};
use crate::channel::NativeError;
use crate::descriptor::{ArgInfo, CallableInfo, IntWidth, Signedness, TypeDescriptor};
use crate::error::RegistryError;
use crate::heap::{Block, NativeRepr};
use crate::invoke::native;
use crate::registry::Library;
use crate::transfer::TransferMode;
use std::sync::Arc;

pub(super) fn register(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let domain = types.error_domain.domain.clone();
    let error_type = || TypeDescriptor::Error(Some(Arc::clone(&types.error_domain)));

    let raised = NativeError::new(&domain, ERROR_CODE, ERROR_MESSAGE);
    let error = raised.clone();
    library.register_function(
        CallableInfo::new("gerror").throws(),
        native(move |frame| Err(frame.raise(error.clone()))),
    )?;

    let error = raised.clone();
    library.register_function(
        CallableInfo::new("gerror_array_in")
            .arg(
                ArgInfo::new(
                    "in_ints",
                    TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W32, Signedness::Signed),
                )
                .length_arg(1),
            )
            .arg(ArgInfo::new("length", TypeDescriptor::int32()))
            .throws(),
        native(move |frame| {
            let block = frame.block(0)?;
            expect("in_ints", ints_of(&block)?.as_slice(), &[-1, 0, 1, 2][..])?;
            Err(frame.raise(error.clone()))
        }),
    )?;

    let error = raised.clone();
    library.register_function(
        CallableInfo::new("gerror_out")
            .arg(ArgInfo::new("error", error_type()).out().transfer(TransferMode::Full))
            .arg(ArgInfo::new("debug", TypeDescriptor::Utf8).out().transfer(TransferMode::Full)),
        native(move |frame| {
            let e = frame.alloc(Block::Error(error.clone()));
            let debug = frame.new_utf8(ERROR_DEBUG);
            frame.set_arg(0, e);
            frame.set_arg(1, debug);
            Ok(())
        }),
    )?;

    let error = raised.clone();
    library.register_function(
        CallableInfo::new("gerror_out_transfer_none")
            .arg(ArgInfo::new("error", error_type()).out())
            .arg(ArgInfo::new("debug", TypeDescriptor::Utf8).out()),
        native(move |frame| {
            let e = frame.constant("gerror", Block::Error(error.clone()));
            let debug = frame.constant_utf8(ERROR_DEBUG);
            frame.set_arg(0, e);
            frame.set_arg(1, debug);
            Ok(())
        }),
    )?;

    let error = raised;
    library.register_function(
        CallableInfo::new("gerror_return").returns_nullable(error_type(), TransferMode::Full),
        native(move |frame| {
            let e = frame.alloc(Block::Error(error.clone()));
            frame.set_return(e);
            Ok(())
        }),
    )?;

    // same code, different domain: must never compare equal to `gerror`
    let second = NativeError::new(&types.second_domain.domain, ERROR_CODE, ERROR_MESSAGE);
    library.register_function(
        CallableInfo::new("gerror_second_domain").throws(),
        native(move |frame| Err(frame.raise(second.clone()))),
    )?;

    library.register_function(
        CallableInfo::new("gerror_none_return").returns_nullable(error_type(), TransferMode::Full),
        native(|frame| {
            frame.set_return(NativeRepr::Null);
            Ok(())
        }),
    )?;

    Ok(())
}
