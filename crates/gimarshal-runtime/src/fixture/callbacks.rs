//! Callbacks: every scope, return/out shapes, errors and foreign threads

use super::{expect, fail, Types, ERROR_CODE, ERROR_MESSAGE};
use crate::callback::CallbackId;
use crate::channel::NativeError;
use crate::descriptor::{ArgInfo, CallableInfo, CallbackInfo, CallbackScope, TypeDescriptor};
use crate::error::{CallError, RegistryError};
use crate::heap::{Block, NativeRepr};
use crate::invoke::{native, Frame};
use crate::registry::Library;
use crate::transfer::TransferMode;
use crate::value::HostValue;
use std::sync::Arc;

const NOTIFIED_SLOT: &str = "callback:notified";
const ASYNC_SLOT: &str = "callback:async";

/// Invocations made by `callback_on_worker_threads`
pub const WORKER_THREADS: usize = 4;

fn callback_arg(info: &Arc<CallbackInfo>, scope: CallbackScope) -> ArgInfo {
    ArgInfo::new("callback", TypeDescriptor::Callback(Arc::clone(info))).scope(scope)
}

fn callback_id(frame: &Frame<'_>, index: usize) -> Result<CallbackId, CallError> {
    match frame.arg(index) {
        NativeRepr::Callback(id) => Ok(*id),
        other => Err(fail(format!("expected a callback, got {:?}", other))),
    }
}

fn stored_callback(frame: &Frame<'_>, slot: &str) -> Result<CallbackId, CallError> {
    match frame.global(slot) {
        Some(NativeRepr::Callback(id)) => Ok(*id),
        _ => Err(fail(format!("no callback stored in {}", slot))),
    }
}

pub(super) fn register(library: &mut Library, types: &Types) -> Result<(), RegistryError> {
    let int32 = TypeDescriptor::int32;
    let float = TypeDescriptor::float;
    let registry = library.registry_mut();

    let return_value_only = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackReturnValueOnly").returns(int32(), TransferMode::None),
    ))?;
    let one_out = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackOneOutParameter").arg(ArgInfo::new("a", float()).out()),
    ))?;
    let multiple_out = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackMultipleOutParameters")
            .arg(ArgInfo::new("a", float()).out())
            .arg(ArgInfo::new("b", float()).out()),
    ))?;
    let value_and_one_out = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackReturnValueAndOneOutParameter")
            .arg(ArgInfo::new("a", int32()).out())
            .returns(int32(), TransferMode::None),
    ))?;
    let value_and_multiple_out = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackReturnValueAndMultipleOutParameters")
            .arg(ArgInfo::new("a", int32()).out())
            .arg(ArgInfo::new("b", int32()).out())
            .returns(int32(), TransferMode::None),
    ))?;
    let int_int = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackIntInt")
            .arg(ArgInfo::new("x", int32()))
            .returns(int32(), TransferMode::None),
    ))?;
    let error_type = || TypeDescriptor::Error(Some(Arc::clone(&types.error_domain)));
    let none_error = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackNoneError").arg(ArgInfo::new("error", error_type())),
    ))?;
    let owned_error = registry.register_callback(CallbackInfo::new(
        CallableInfo::new("CallbackOwnedError")
            .arg(ArgInfo::new("error", error_type()).transfer(TransferMode::Full)),
    ))?;

    // (function, callback type, outs copied back, has return value)
    let shapes = [
        ("callback_return_value_only", &return_value_only, 0, true),
        ("callback_one_out_parameter", &one_out, 1, false),
        ("callback_multiple_out_parameters", &multiple_out, 2, false),
        ("callback_return_value_and_one_out_parameter", &value_and_one_out, 1, true),
        ("callback_return_value_and_multiple_out_parameters", &value_and_multiple_out, 2, true),
    ];
    for (name, info, outs, returns) in shapes {
        let mut callable = CallableInfo::new(name).arg(callback_arg(info, CallbackScope::Call));
        for out in &info.signature.args {
            callable = callable.arg(out.clone());
        }
        if let Some(ret) = &info.signature.ret {
            callable = callable.returns(ret.ty.clone(), ret.transfer);
        }
        library.register_function(
            callable,
            native(move |frame| {
                let id = callback_id(frame, 0)?;
                let (ret, args) = frame.invoke_callback(id, Vec::new())?;
                if returns {
                    frame.set_return(ret);
                }
                for i in 0..outs {
                    frame.set_arg(i + 1, args.get(i).cloned().unwrap_or(NativeRepr::Void));
                }
                Ok(())
            }),
        )?;
    }

    register_scopes(library, &int_int)?;
    register_error_callbacks(library, &none_error, &owned_error, types)
}

fn register_scopes(library: &mut Library, int_int: &Arc<CallbackInfo>) -> Result<(), RegistryError> {
    let int32 = TypeDescriptor::int32;

    library.register_function(
        CallableInfo::new("callback_notified_store").arg(callback_arg(int_int, CallbackScope::Notified)),
        native(|frame| {
            let id = callback_id(frame, 0)?;
            frame.set_global(NOTIFIED_SLOT, NativeRepr::Callback(id));
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("callback_notified_call")
            .arg(ArgInfo::new("x", int32()))
            .returns(int32(), TransferMode::None),
        native(|frame| {
            let id = stored_callback(frame, NOTIFIED_SLOT)?;
            let x = frame.arg(0).clone();
            let (ret, _) = frame.invoke_callback(id, vec![x])?;
            frame.set_return(ret);
            Ok(())
        }),
    )?;

    library.register_function(
        CallableInfo::new("callback_notified_release"),
        native(|frame| {
            let id = stored_callback(frame, NOTIFIED_SLOT)?;
            frame.take_global(NOTIFIED_SLOT);
            frame.release_callback(id)
        }),
    )?;

    library.register_function(
        CallableInfo::new("callback_async_store").arg(callback_arg(int_int, CallbackScope::Async)),
        native(|frame| {
            let id = callback_id(frame, 0)?;
            frame.set_global(ASYNC_SLOT, NativeRepr::Callback(id));
            Ok(())
        }),
    )?;

    // the binding releases itself after this invocation
    library.register_function(
        CallableInfo::new("callback_async_call")
            .arg(ArgInfo::new("x", int32()))
            .returns(int32(), TransferMode::None),
        native(|frame| {
            let id = stored_callback(frame, ASYNC_SLOT)?;
            frame.take_global(ASYNC_SLOT);
            let x = frame.arg(0).clone();
            let (ret, _) = frame.invoke_callback(id, vec![x])?;
            frame.set_return(ret);
            Ok(())
        }),
    )?;

    // Invokes the callback once from each worker, then releases it from the
    // calling thread. Scalars cross without touching the heap, so workers
    // hand the value to the binding directly.
    library.register_function(
        CallableInfo::new("callback_on_worker_threads")
            .arg(callback_arg(int_int, CallbackScope::Notified))
            .arg(ArgInfo::new("x", int32()))
            .returns(TypeDescriptor::int64(), TransferMode::None),
        native(|frame| {
            let id = callback_id(frame, 0)?;
            let x = frame.int(1)?;
            let binding = frame.callbacks().get(id)?;
            let results: Vec<Result<Vec<HostValue>, CallError>> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..WORKER_THREADS)
                    .map(|_| {
                        let binding = Arc::clone(&binding);
                        scope.spawn(move || binding.invoke(&[HostValue::Int(x)]))
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|worker| {
                        worker
                            .join()
                            .unwrap_or_else(|_| Err(fail("callback worker panicked".to_string())))
                    })
                    .collect()
            });
            let mut sum = 0i64;
            for result in results {
                let values = result?;
                sum += values
                    .first()
                    .and_then(HostValue::as_i64)
                    .ok_or_else(|| fail("callback returned no integer".to_string()))?;
            }
            frame.release_callback(id)?;
            frame.set_return(NativeRepr::I64(sum));
            Ok(())
        }),
    )?;

    Ok(())
}

fn register_error_callbacks(
    library: &mut Library,
    none_error: &Arc<CallbackInfo>,
    owned_error: &Arc<CallbackInfo>,
    types: &Types,
) -> Result<(), RegistryError> {
    let domain = types.error_domain.domain.clone();
    library.register_function(
        CallableInfo::new("callback_error_none").arg(callback_arg(none_error, CallbackScope::Call)),
        native(move |frame| {
            let id = callback_id(frame, 0)?;
            let error = frame.alloc(Block::Error(NativeError::new(&domain, ERROR_CODE, ERROR_MESSAGE)));
            frame.invoke_callback(id, vec![error.clone()])?;
            // the callback only borrowed it
            match frame.free(&error)? {
                Block::Error(e) => expect("error", &e.message.as_str(), &ERROR_MESSAGE),
                other => Err(fail(format!("expected an error block, got {}", other.kind()))),
            }
        }),
    )?;

    let domain = types.error_domain.domain.clone();
    library.register_function(
        CallableInfo::new("callback_error_full").arg(callback_arg(owned_error, CallbackScope::Call)),
        native(move |frame| {
            let id = callback_id(frame, 0)?;
            let error = frame.alloc(Block::Error(NativeError::new(&domain, ERROR_CODE, ERROR_MESSAGE)));
            frame.invoke_callback(id, vec![error])?;
            Ok(())
        }),
    )?;

    Ok(())
}
