//! Native call frames
//!
//! A native body sees its arguments exactly as they sit in native argument
//! slots: scalars by value, strings and containers as heap pointers, objects
//! and callbacks as handles. Out slots are written with `set_arg`, the return
//! value with `set_return`. Failing through the error channel is returning
//! `Err(CallError::Domain(..))`.

use crate::boundary::Boundary;
use crate::callback::{CallbackBridge, CallbackId};
use crate::channel::NativeError;
use crate::descriptor::CallableInfo;
use crate::error::{CallError, MarshalError};
use crate::heap::{Block, NativeHeap, NativeRepr, Party, Ptr};
use crate::object::{ObjectId, ObjectSpace};
use crate::value::HostValue;
use std::fmt;
use std::sync::Arc;

static VOID: NativeRepr = NativeRepr::Void;

/// Implementation of a native function, method or virtual function
pub type NativeBody = Arc<dyn Fn(&mut Frame<'_>) -> Result<(), CallError> + Send + Sync>;

/// Wrap a closure as a `NativeBody`
pub fn native<F>(body: F) -> NativeBody
where
    F: Fn(&mut Frame<'_>) -> Result<(), CallError> + Send + Sync + 'static,
{
    Arc::new(body)
}

/// A registered native function: signature plus body
#[derive(Clone)]
pub struct NativeFunction {
    pub info: Arc<CallableInfo>,
    pub body: NativeBody,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.info.name)
            .finish()
    }
}

/// Arguments of one native invocation
pub struct Frame<'b> {
    boundary: &'b mut Boundary,
    instance: Option<ObjectId>,
    info: Arc<CallableInfo>,
    args: Vec<NativeRepr>,
    ret: NativeRepr,
}

impl<'b> Frame<'b> {
    pub(crate) fn new(
        boundary: &'b mut Boundary,
        instance: Option<ObjectId>,
        info: Arc<CallableInfo>,
        args: Vec<NativeRepr>,
    ) -> Self {
        Self {
            boundary,
            instance,
            info,
            args,
            ret: NativeRepr::Void,
        }
    }

    pub fn info(&self) -> &CallableInfo {
        &self.info
    }

    /// Receiver of a method call
    pub fn instance(&self) -> Result<ObjectId, CallError> {
        self.instance.ok_or_else(|| {
            CallError::Marshal(MarshalError::UnexpectedNull(format!(
                "receiver of {}",
                self.info.name
            )))
        })
    }

    pub fn arg(&self, index: usize) -> &NativeRepr {
        self.args.get(index).unwrap_or(&VOID)
    }

    pub fn set_arg(&mut self, index: usize, repr: NativeRepr) {
        if index >= self.args.len() {
            self.args.resize(index + 1, NativeRepr::Void);
        }
        self.args[index] = repr;
    }

    pub fn set_return(&mut self, repr: NativeRepr) {
        self.ret = repr;
    }

    pub fn boundary(&mut self) -> &mut Boundary {
        &mut *self.boundary
    }

    pub fn heap(&mut self) -> &mut NativeHeap {
        &mut self.boundary.heap
    }

    pub fn objects(&self) -> Arc<ObjectSpace> {
        Arc::clone(&self.boundary.objects)
    }

    /// Callback bindings, shareable with threads the native side spawns
    pub fn callbacks(&self) -> Arc<CallbackBridge> {
        Arc::clone(&self.boundary.callbacks)
    }

    pub(crate) fn into_parts(self) -> (Vec<NativeRepr>, NativeRepr) {
        (self.args, self.ret)
    }

    /// Integer argument
    pub fn int(&self, index: usize) -> Result<i64, CallError> {
        let repr = self.arg(index);
        repr.as_i64().ok_or_else(|| {
            MarshalError::TypeMismatch {
                expected: "integer".to_string(),
                got: format!("{:?}", repr),
            }
            .into()
        })
    }

    /// Pointer argument
    pub fn ptr(&self, index: usize) -> Result<Ptr, CallError> {
        let repr = self.arg(index);
        repr.as_ptr().ok_or_else(|| {
            MarshalError::TypeMismatch {
                expected: "pointer".to_string(),
                got: format!("{:?}", repr),
            }
            .into()
        })
    }

    /// Object argument
    pub fn object(&self, index: usize) -> Result<ObjectId, CallError> {
        let repr = self.arg(index);
        repr.as_object().ok_or_else(|| {
            MarshalError::TypeMismatch {
                expected: "object".to_string(),
                got: format!("{:?}", repr),
            }
            .into()
        })
    }

    /// Contents of a string argument
    pub fn utf8(&self, index: usize) -> Result<String, CallError> {
        self.read_utf8(self.arg(index))
    }

    /// Contents of an array, list or map skeleton
    pub fn block(&self, index: usize) -> Result<Block, CallError> {
        self.read(self.arg(index))
    }

    /// Dereference any pointer value
    pub fn read(&self, repr: &NativeRepr) -> Result<Block, CallError> {
        let ptr = repr.as_ptr().ok_or(crate::error::UsageError::NullDeref)?;
        Ok(self.boundary.heap.get(ptr)?.clone())
    }

    pub fn read_utf8(&self, repr: &NativeRepr) -> Result<String, CallError> {
        match self.read(repr)? {
            Block::Utf8(s) => Ok(s),
            other => Err(MarshalError::TypeMismatch {
                expected: "utf8".to_string(),
                got: other.kind().to_string(),
            }
            .into()),
        }
    }

    /// Fresh native-owned string
    pub fn new_utf8(&mut self, s: &str) -> NativeRepr {
        NativeRepr::Ptr(self.boundary.heap.alloc_utf8(s, Party::Native))
    }

    /// Fresh native-owned block
    pub fn alloc(&mut self, block: Block) -> NativeRepr {
        NativeRepr::Ptr(self.boundary.heap.alloc(block, Party::Native))
    }

    /// Read-only native data, allocated once per boundary
    pub fn constant(&mut self, key: &str, block: Block) -> NativeRepr {
        let slot = format!("static:{}", key);
        if let Some(repr) = self.boundary.globals.get(&slot) {
            return repr.clone();
        }
        let repr = NativeRepr::Ptr(self.boundary.heap.alloc_static(block));
        self.boundary.globals.insert(slot, repr.clone());
        repr
    }

    pub fn constant_utf8(&mut self, s: &str) -> NativeRepr {
        self.constant(s, Block::Utf8(s.to_string()))
    }

    /// Free a block the native side owns
    pub fn free(&mut self, repr: &NativeRepr) -> Result<Block, CallError> {
        let ptr = repr.as_ptr().ok_or(crate::error::UsageError::NullDeref)?;
        Ok(self.boundary.heap.free(ptr, Party::Native)?)
    }

    /// Native-side global state
    pub fn global(&self, key: &str) -> Option<&NativeRepr> {
        self.boundary.globals.get(key)
    }

    pub fn set_global(&mut self, key: &str, repr: NativeRepr) -> Option<NativeRepr> {
        self.boundary.globals.insert(key.to_string(), repr)
    }

    pub fn take_global(&mut self, key: &str) -> Option<NativeRepr> {
        self.boundary.globals.remove(key)
    }

    /// Dispatch a virtual function to the most derived implementation
    pub fn call_vfunc(
        &mut self,
        object: ObjectId,
        name: &str,
        args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        self.boundary.dispatch_vfunc(object, name, args)
    }

    /// Dispatch an interface method
    pub fn call_interface(
        &mut self,
        object: ObjectId,
        interface: &str,
        method: &str,
        args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        self.boundary
            .dispatch_interface(object, interface, method, args)
    }

    /// Invoke a host callback from native code
    pub fn invoke_callback(
        &mut self,
        id: CallbackId,
        args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        self.boundary.call_callback(id, args)
    }

    /// Native side is done with a notified callback
    pub fn release_callback(&mut self, id: CallbackId) -> Result<(), CallError> {
        Ok(self.boundary.callbacks.release(id)?)
    }

    /// Run a host implementation of this frame's callable
    ///
    /// `host` sees the input arguments as borrowed host values and returns
    /// the return value (if any) followed by the out values.
    pub fn run_host<F>(&mut self, host: F) -> Result<(), CallError>
    where
        F: FnOnce(&[HostValue]) -> Result<Vec<HostValue>, CallError>,
    {
        self.boundary
            .run_host(&self.info, &mut self.args, &mut self.ret, host)
    }

    /// Fail through the error channel
    pub fn raise(&self, error: NativeError) -> CallError {
        CallError::Domain(error)
    }
}
