//! The boundary: host-side entry point for every native call
//!
//! A call runs in four steps:
//!
//! 1. marshal the host inputs (`to_native` per argument transfer), writing
//!    length parameters and binding callback arguments,
//! 2. run the native body in a `Frame`,
//! 3. lift the return value and out/inout arguments (`from_native`),
//! 4. release host temporaries and call-scoped callbacks.
//!
//! The boundary also carries native bodies back into the host: callbacks,
//! host-implemented virtual functions and interface methods all go through
//! `run_host`, which lends the host borrowed inputs and marshals its results
//! per the callee's declared transfer.

use crate::audit::{logger_for, AuditEvent, AuditLogger};
use crate::callback::{CallbackBridge, CallbackId, HostClosure};
use crate::channel::{ErrorSlot, NativeError};
use crate::descriptor::{ArrayLength, CallableInfo, CallbackScope, IntWidth, Signedness, TypeDescriptor};
use crate::error::{CallError, ClassError, MarshalError, RegistryError, UsageError};
use crate::heap::{Block, Borrow, NativeHeap, NativeRepr};
use crate::invoke::{native, Frame, NativeBody};
use crate::marshal::{scalar, zero_of, Marshaller, Release};
use crate::object::{Class, ClassBuilder, ObjectId, ObjectSpace};
use crate::registry::Library;
use crate::transfer::{Direction, Lifetime, TransferMode};
use crate::value::HostValue;
use gimarshal_config::{DanglingWindow, RuntimeConfig, UsagePolicy};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

static NULL: HostValue = HostValue::Null;

/// Values handed back to the host by one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutput {
    /// Return value, absent for `void` callables
    pub ret: Option<HostValue>,
    /// Out and inout values in argument order
    pub outs: Vec<HostValue>,
    /// Views of dangling out values, checked on every read
    pub views: Vec<Borrow>,
}

impl CallOutput {
    pub fn ret(&self) -> &HostValue {
        self.ret.as_ref().unwrap_or(&NULL)
    }

    pub fn out(&self, index: usize) -> &HostValue {
        self.outs.get(index).unwrap_or(&NULL)
    }

    /// Return value (if any) followed by the outs
    pub fn values(&self) -> Vec<HostValue> {
        self.ret.iter().chain(self.outs.iter()).cloned().collect()
    }
}

/// What the host still owns after a sequence of calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    /// Host-owned blocks never released
    pub blocks: Vec<String>,
    /// Callbacks never released by the native side
    pub callbacks: Vec<String>,
    /// Object references the host took and never dropped
    pub objects: Vec<String>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.blocks.is_empty() && self.callbacks.is_empty() && self.objects.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "no leaks");
        }
        let mut parts = Vec::new();
        if !self.blocks.is_empty() {
            parts.push(format!("blocks [{}]", self.blocks.join(", ")));
        }
        if !self.callbacks.is_empty() {
            parts.push(format!("callbacks [{}]", self.callbacks.join(", ")));
        }
        if !self.objects.is_empty() {
            parts.push(format!("objects [{}]", self.objects.join(", ")));
        }
        write!(f, "leaked {}", parts.join("; "))
    }
}

/// Host override of a virtual function or interface method
///
/// The closure receives the instance and the borrowed inputs, and returns
/// the return value (if any) followed by the outs.
pub fn host_method<F>(method: F) -> NativeBody
where
    F: Fn(ObjectId, &[HostValue]) -> Result<Vec<HostValue>, NativeError> + Send + Sync + 'static,
{
    native(move |frame| {
        let instance = frame.instance()?;
        frame.run_host(|args| method(instance, args).map_err(CallError::Domain))
    })
}

/// Host side of the marshalling boundary
pub struct Boundary {
    pub(crate) heap: NativeHeap,
    pub(crate) objects: Arc<ObjectSpace>,
    pub(crate) callbacks: Arc<CallbackBridge>,
    pub(crate) globals: HashMap<String, NativeRepr>,
    library: Arc<Library>,
    config: RuntimeConfig,
    audit: Arc<dyn AuditLogger>,
    /// Host results lent to native callers, released on the next call
    deferred: Vec<Release>,
    /// References the host holds, per object
    held: BTreeMap<ObjectId, u32>,
    /// Typed property values, owned by their instance
    properties: BTreeMap<(ObjectId, String), (TypeDescriptor, NativeRepr)>,
}

impl Boundary {
    pub fn new(library: Arc<Library>, config: RuntimeConfig) -> Self {
        let audit = logger_for(&config);
        Self {
            heap: NativeHeap::new(Arc::clone(&audit)),
            objects: Arc::new(ObjectSpace::new(Arc::clone(&audit))),
            callbacks: Arc::new(CallbackBridge::new(Arc::clone(&audit))),
            globals: HashMap::new(),
            library,
            config,
            audit,
            deferred: Vec::new(),
            held: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Boundary over the built-in conformance fixture
    pub fn with_fixture(config: RuntimeConfig) -> Result<Self, RegistryError> {
        Ok(Self::new(crate::fixture::library()?, config))
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    pub fn heap(&self) -> &NativeHeap {
        &self.heap
    }

    pub fn objects(&self) -> &Arc<ObjectSpace> {
        &self.objects
    }

    pub fn callbacks(&self) -> &Arc<CallbackBridge> {
        &self.callbacks
    }

    /// Native-side global state, as the fixture's bodies left it
    pub fn global(&self, key: &str) -> Option<&NativeRepr> {
        self.globals.get(key)
    }

    /// Call a free function
    pub fn invoke(&mut self, name: &str, args: &[HostValue]) -> Result<CallOutput, CallError> {
        let result = self.lookup(name).and_then(|function| {
            if function.info.is_method {
                return Err(CallError::Arity {
                    name: name.to_string(),
                    expected: function.info.host_inputs() + 1,
                    got: args.len(),
                });
            }
            self.call(&function.info, &function.body, None, args)
        });
        self.enforce(result)
    }

    /// Call a function, reporting domain errors through `slot`
    ///
    /// The slot must be empty on entry; a populated slot is a usage error.
    pub fn invoke_with_slot(
        &mut self,
        name: &str,
        args: &[HostValue],
        slot: &mut ErrorSlot,
    ) -> Result<CallOutput, CallError> {
        let checked = slot.ensure_empty().map_err(|error| self.violation(error));
        self.enforce(checked)?;
        match self.invoke(name, args) {
            Err(CallError::Domain(error)) => {
                let stored = slot.set(error.clone()).map_err(|e| self.violation(e));
                self.enforce(stored)?;
                Err(CallError::Domain(error))
            }
            other => other,
        }
    }

    /// Call a method on `object`
    pub fn invoke_method(
        &mut self,
        object: ObjectId,
        name: &str,
        args: &[HostValue],
    ) -> Result<CallOutput, CallError> {
        let result = self.lookup(name).and_then(|function| {
            self.objects.instance(object)?;
            self.call(&function.info, &function.body, Some(object), args)
        });
        self.enforce(result)
    }

    /// Dispatch a virtual function to the most derived implementation
    pub fn invoke_virtual(
        &mut self,
        object: ObjectId,
        name: &str,
        args: &[HostValue],
    ) -> Result<CallOutput, CallError> {
        let result = self.resolve_vfunc(object, name).and_then(|(info, body)| {
            self.call(&info, &body, Some(object), args)
        });
        self.enforce(result)
    }

    /// Call an interface method through `object`'s implementation
    pub fn invoke_interface(
        &mut self,
        object: ObjectId,
        interface: &str,
        method: &str,
        args: &[HostValue],
    ) -> Result<CallOutput, CallError> {
        let result = self
            .resolve_interface(object, interface, method)
            .and_then(|(info, body)| self.call(&info, &body, Some(object), args));
        self.enforce(result)
    }

    /// Construct an instance owned by the host; floating constructors are sunk
    pub fn new_object(&mut self, class: &str) -> Result<ObjectId, CallError> {
        let class = self.class(class)?;
        self.instantiate(&class)
    }

    /// Start a host subclass of a registered class
    ///
    /// Ambiguous unqualified overrides resolve per the configured
    /// `ambiguous_override` unless the builder is told otherwise.
    pub fn subclass(&self, name: &str, parent: &str, interfaces: &[&str]) -> Result<ClassBuilder, ClassError> {
        let builder = crate::fixture::host_subclass(&self.library, name, parent, interfaces)?;
        Ok(builder.resolution(self.config.ambiguous_override))
    }

    /// Construct an instance of a class defined at runtime by the host
    pub fn instantiate(&mut self, class: &Arc<Class>) -> Result<ObjectId, CallError> {
        let id = self.objects.create(class);
        if self.objects.is_floating(id)? {
            self.objects.claim(id)?;
        }
        self.hold(id);
        Ok(id)
    }

    /// Construct an instance holding a floating reference
    pub fn new_floating(&mut self, class: &str) -> Result<ObjectId, CallError> {
        let class = self.class(class)?;
        let id = self.objects.create_with(&class, true);
        self.hold(id);
        Ok(id)
    }

    /// Construct an instance with typed properties already set
    pub fn new_object_with(
        &mut self,
        class: &str,
        properties: &[(&str, HostValue)],
    ) -> Result<ObjectId, CallError> {
        let id = self.new_object(class)?;
        for (name, value) in properties {
            if let Err(error) = self.set_property(id, name, value) {
                self.release(&HostValue::Object(id))?;
                return Err(error);
            }
        }
        Ok(id)
    }

    /// Drop the host references held by `value`
    pub fn release(&mut self, value: &HostValue) -> Result<(), CallError> {
        for id in value.objects() {
            let result = self.objects.unref(id).map(|_| ()).map_err(CallError::from);
            self.enforce(result)?;
            self.drop_held(id);
        }
        self.prune_properties();
        Ok(())
    }

    /// Read a typed property; the host gets its own copy
    ///
    /// A property never set reads as the zero value of its type.
    pub fn get_property(&mut self, object: ObjectId, name: &str) -> Result<HostValue, CallError> {
        let result = self.property_type(object, name).and_then(|ty| {
            let key = (object, name.to_string());
            let repr = self
                .properties
                .get(&key)
                .map_or_else(|| zero_of(&ty), |(_, repr)| repr.clone());
            let mut marshaller = Marshaller::new(&mut self.heap, &self.objects);
            Ok(marshaller.from_native(&repr, &ty, TransferMode::None)?)
        });
        let value = self.enforce(result)?;
        for id in value.objects() {
            self.hold(id);
        }
        Ok(value)
    }

    /// Store a typed property; the instance takes ownership of the value
    ///
    /// The previous value is freed. A floating object handed over is sunk
    /// by the instance and leaves the host nothing to release.
    pub fn set_property(&mut self, object: ObjectId, name: &str, value: &HostValue) -> Result<(), CallError> {
        let result = self.property_type(object, name).and_then(|ty| {
            let sunk: Vec<ObjectId> = value
                .objects()
                .into_iter()
                .filter(|id| self.objects.is_floating(*id).unwrap_or(false))
                .collect();
            let mut marshaller = Marshaller::new(&mut self.heap, &self.objects);
            let repr = marshaller.to_native(value, &ty, TransferMode::Full)?;
            let previous = self
                .properties
                .insert((object, name.to_string()), (ty.clone(), repr));
            if let Some((_, old)) = previous {
                marshaller.drop_native(&old, &ty);
            }
            Ok(sunk)
        });
        for id in self.enforce(result)? {
            self.drop_held(id);
        }
        Ok(())
    }

    fn property_type(&self, object: ObjectId, name: &str) -> Result<TypeDescriptor, CallError> {
        let class = self.objects.class_of(object)?;
        class
            .info()
            .find_property(name)
            .map(|property| property.ty.clone())
            .ok_or_else(|| CallError::UnknownProperty {
                type_name: class.name().to_string(),
                name: name.to_string(),
            })
    }

    /// Free the property values of destroyed instances
    fn prune_properties(&mut self) {
        loop {
            let dead: Vec<(ObjectId, String)> = self
                .properties
                .keys()
                .filter(|(id, _)| !self.objects.is_alive(*id))
                .cloned()
                .collect();
            if dead.is_empty() {
                return;
            }
            let mut marshaller = Marshaller::new(&mut self.heap, &self.objects);
            for key in dead {
                if let Some((ty, repr)) = self.properties.remove(&key) {
                    marshaller.drop_native(&repr, &ty);
                }
            }
        }
    }

    /// References the host still holds on `id`
    pub fn held(&self, id: ObjectId) -> u32 {
        self.held.get(&id).copied().unwrap_or(0)
    }

    /// Make a host closure passable as a callback argument
    pub fn register_callback(&mut self, closure: HostClosure) -> CallbackId {
        self.callbacks.register(closure)
    }

    /// Read through a borrowed view, checking its expiry rule
    pub fn read_view(&self, view: &Borrow) -> Result<Block, CallError> {
        if view.lifetime == Lifetime::WhileSourceAlive {
            if let Some(source) = view.source {
                if !self.objects.is_alive(source) {
                    self.audit.log(AuditEvent::BorrowExpired {
                        ptr: view.ptr,
                        lifetime: view.lifetime,
                    });
                    let error = self.violation(UsageError::DanglingBorrow {
                        ptr: view.ptr,
                        lifetime: view.lifetime,
                    });
                    return self.enforce(Err(error.into()));
                }
            }
        }
        let read = self
            .heap
            .read_borrow(view)
            .map(Block::clone)
            .map_err(CallError::from);
        self.enforce(read)
    }

    /// Host blocks and callbacks still outstanding
    ///
    /// Values lent to native callers are not counted until the next call
    /// has had the chance to release them.
    pub fn leaks(&self) -> LeakReport {
        let lent: Vec<_> = self
            .deferred
            .iter()
            .filter_map(|release| release.repr.as_ptr())
            .collect();
        LeakReport {
            blocks: self
                .heap
                .leaks()
                .into_iter()
                .filter(|ptr| !lent.contains(ptr))
                .map(|ptr| ptr.to_string())
                .collect(),
            callbacks: self
                .callbacks
                .unreleased()
                .into_iter()
                .map(|id| id.to_string())
                .collect(),
            objects: self
                .held
                .iter()
                .filter(|(id, _)| self.objects.is_alive(**id))
                .map(|(id, count)| match count {
                    1 => id.to_string(),
                    n => format!("{} x{}", id, n),
                })
                .collect(),
        }
    }

    /// Release everything still lent to native callers
    pub fn flush(&mut self) -> Result<(), CallError> {
        let deferred = std::mem::take(&mut self.deferred);
        let mut marshaller = Marshaller::with_pending(&mut self.heap, &self.objects, deferred);
        let released = marshaller.release_pending().map_err(CallError::from);
        drop(marshaller);
        self.enforce(released)
    }

    fn lookup(&self, name: &str) -> Result<crate::invoke::NativeFunction, CallError> {
        self.library
            .function(name)
            .cloned()
            .ok_or_else(|| CallError::UnknownFunction(name.to_string()))
    }

    fn class(&self, name: &str) -> Result<Arc<Class>, CallError> {
        self.library
            .class(name)
            .cloned()
            .ok_or_else(|| CallError::NoImplementation {
                type_name: name.to_string(),
                method: "new".to_string(),
            })
    }

    fn resolve_vfunc(
        &self,
        object: ObjectId,
        name: &str,
    ) -> Result<(Arc<CallableInfo>, NativeBody), CallError> {
        let class = self.objects.class_of(object)?;
        let missing = || CallError::NoImplementation {
            type_name: class.name().to_string(),
            method: name.to_string(),
        };
        let info = class.info().find_vfunc(name).cloned().ok_or_else(missing)?;
        let body = class.resolve_vfunc(name).ok_or_else(missing)?;
        Ok((info, body))
    }

    fn resolve_interface(
        &self,
        object: ObjectId,
        interface: &str,
        method: &str,
    ) -> Result<(Arc<CallableInfo>, NativeBody), CallError> {
        let class = self.objects.class_of(object)?;
        let iface = class.info().find_interface(interface).ok_or_else(|| {
            MarshalError::WrongClass {
                expected: interface.to_string(),
                got: class.name().to_string(),
            }
        })?;
        let missing = || CallError::NoImplementation {
            type_name: class.name().to_string(),
            method: format!("{}.{}", interface, method),
        };
        let info = iface.find_method(method).cloned().ok_or_else(missing)?;
        let body = class.resolve_interface(interface, method).ok_or_else(missing)?;
        Ok((info, body))
    }

    fn hold(&mut self, id: ObjectId) {
        *self.held.entry(id).or_insert(0) += 1;
    }

    fn drop_held(&mut self, id: ObjectId) {
        if let Some(count) = self.held.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.held.remove(&id);
            }
        }
    }

    fn violation(&self, error: UsageError) -> CallError {
        self.audit.log(AuditEvent::UsageViolation {
            error: error.clone(),
        });
        CallError::Usage(error)
    }

    /// Apply the configured usage policy to a result
    fn enforce<T>(&self, result: Result<T, CallError>) -> Result<T, CallError> {
        if self.config.usage_policy == UsagePolicy::Panic {
            if let Err(error) = &result {
                if let Some(usage) = error.usage() {
                    panic!("ownership contract violated: {}", usage);
                }
            }
        }
        result
    }

    fn dangling_lifetime(&self) -> Lifetime {
        match self.config.dangling {
            DanglingWindow::NextCall => Lifetime::UntilNextCall,
            DanglingWindow::OwnerDestroyed => Lifetime::WhileSourceAlive,
        }
    }

    /// Start a new call: epoch-bound views expire, lent values are released
    fn begin_call(&mut self, name: &str) -> Result<(), CallError> {
        let epoch = self.heap.advance_epoch();
        self.audit.log(AuditEvent::CallStarted {
            function: name.to_string(),
            epoch,
        });
        let deferred = std::mem::take(&mut self.deferred);
        let mut marshaller = Marshaller::with_pending(&mut self.heap, &self.objects, deferred);
        marshaller.release_pending()?;
        Ok(())
    }

    fn call(
        &mut self,
        info: &Arc<CallableInfo>,
        body: &NativeBody,
        instance: Option<ObjectId>,
        host_args: &[HostValue],
    ) -> Result<CallOutput, CallError> {
        self.begin_call(&info.name)?;
        let expected = info.host_inputs();
        if host_args.len() != expected {
            return Err(CallError::Arity {
                name: info.name.clone(),
                expected,
                got: host_args.len(),
            });
        }

        let mut native_args: Vec<NativeRepr> = info.args.iter().map(|a| zero_of(&a.ty)).collect();
        let mut handed = Handed::default();
        let marshalled = {
            let mut marshaller = Marshaller::new(&mut self.heap, &self.objects);
            let result = marshal_inputs(
                &mut marshaller,
                &self.callbacks,
                info,
                host_args,
                &mut native_args,
                &mut handed,
            );
            match result {
                Ok(()) => Ok(marshaller.take_pending()),
                Err(error) => {
                    for (repr, ty, mode) in &handed.values {
                        marshaller.reclaim(repr, ty, *mode);
                    }
                    for repr in &handed.storage {
                        marshaller.free_storage(repr);
                    }
                    Err(error)
                }
            }
        };
        for id in &handed.sunk {
            self.drop_held(*id);
        }
        let call_scoped = handed.call_scoped;
        let pending = match marshalled {
            Ok(pending) => pending,
            Err(error) => {
                self.release_call_scoped(&call_scoped);
                return Err(error);
            }
        };

        let old_args = native_args.clone();
        let mut frame = Frame::new(self, instance, Arc::clone(info), native_args);
        let outcome = body(&mut frame);
        let (args, ret) = frame.into_parts();

        let result = match outcome {
            Ok(()) => self.lift_outputs(info, instance, &old_args, &args, &ret, pending),
            Err(error) => {
                let mut marshaller = Marshaller::with_pending(&mut self.heap, &self.objects, pending);
                // the call already failed; a release failure is audited but not reported
                let _ = marshaller.release_pending();
                drop(marshaller);
                if let CallError::Domain(raised) = &error {
                    self.audit.log(AuditEvent::ErrorRaised {
                        error: raised.clone(),
                    });
                }
                Err(error)
            }
        };
        self.release_call_scoped(&call_scoped);
        result
    }

    fn lift_outputs(
        &mut self,
        info: &CallableInfo,
        instance: Option<ObjectId>,
        old_args: &[NativeRepr],
        args: &[NativeRepr],
        ret: &NativeRepr,
        pending: Vec<Release>,
    ) -> Result<CallOutput, CallError> {
        let hidden = info.length_args();
        let dangling = self.dangling_lifetime();
        let mut output = CallOutput::default();
        // references the host takes over by lifting; handed-back inouts excluded
        let mut acquired = Vec::new();
        let mut marshaller = Marshaller::with_pending(&mut self.heap, &self.objects, pending);

        if let Some(ret_info) = &info.ret {
            if ret_info.ty != TypeDescriptor::Void {
                let length = native_length(args, ret_info.length_arg)?;
                let value = marshaller.from_native_with_length(ret, &ret_info.ty, ret_info.transfer, length)?;
                acquired.extend(value.objects());
                output.ret = Some(value);
            }
        }

        for (i, arg) in info.args.iter().enumerate() {
            if hidden.contains(&i) || !arg.direction.is_output() {
                continue;
            }
            let repr = args.get(i).unwrap_or(&NativeRepr::Void);
            let old = old_args.get(i).unwrap_or(&NativeRepr::Void);
            let length = native_length(args, arg.length_arg)?;
            let value = match arg.direction {
                Direction::OutCallerAllocates => {
                    let value = marshaller.from_caller_storage(repr, &arg.ty, arg.transfer)?;
                    acquired.extend(value.objects());
                    value
                }
                Direction::InOut if repr.same_identity(old) => {
                    if arg.transfer == TransferMode::None {
                        marshaller.peek(repr, &arg.ty, length)?
                    } else {
                        // the callee handed back the value it was given
                        let value = marshaller.from_native_with_length(repr, &arg.ty, arg.transfer, length)?;
                        if let Some(id) = repr.as_object() {
                            self.objects.unref(id)?;
                        }
                        value
                    }
                }
                _ => {
                    let value = marshaller.from_native_with_length(repr, &arg.ty, arg.transfer, length)?;
                    acquired.extend(value.objects());
                    if arg.dangling && arg.transfer == TransferMode::None {
                        if let Some(ptr) = repr.as_ptr() {
                            output.views.push(marshaller.borrow(ptr, dangling, instance));
                        }
                    }
                    value
                }
            };
            output.outs.push(value);
        }
        let released = marshaller.release_pending();
        drop(marshaller);
        for id in acquired {
            self.hold(id);
        }
        released?;
        Ok(output)
    }

    fn release_call_scoped(&self, ids: &[CallbackId]) {
        for id in ids {
            // the callee may have released it already
            if self.callbacks.is_released(*id) == Ok(false) {
                let _ = self.callbacks.release(*id);
            }
        }
    }

    pub(crate) fn dispatch_vfunc(
        &mut self,
        object: ObjectId,
        name: &str,
        args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        let (info, body) = self.resolve_vfunc(object, name)?;
        self.run_body(&body, Some(object), info, args)
    }

    pub(crate) fn dispatch_interface(
        &mut self,
        object: ObjectId,
        interface: &str,
        method: &str,
        args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        let (info, body) = self.resolve_interface(object, interface, method)?;
        self.run_body(&body, Some(object), info, args)
    }

    fn run_body(
        &mut self,
        body: &NativeBody,
        instance: Option<ObjectId>,
        info: Arc<CallableInfo>,
        mut args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        if args.len() < info.args.len() {
            args.extend(info.args[args.len()..].iter().map(|a| zero_of(&a.ty)));
        }
        let mut frame = Frame::new(self, instance, info, args);
        body(&mut frame)?;
        let (args, ret) = frame.into_parts();
        Ok((ret, args))
    }

    /// Invoke a host callback on behalf of native code
    pub(crate) fn call_callback(
        &mut self,
        id: CallbackId,
        mut args: Vec<NativeRepr>,
    ) -> Result<(NativeRepr, Vec<NativeRepr>), CallError> {
        let binding = self.callbacks.get(id)?;
        let info = binding.info().ok_or(UsageError::UnknownCallback(id))?;
        let signature = info.signature.clone();
        if args.len() < signature.args.len() {
            args.extend(signature.args[args.len()..].iter().map(|a| zero_of(&a.ty)));
        }
        let mut ret = NativeRepr::Void;
        self.run_host(&signature, &mut args, &mut ret, |host_args| binding.invoke(host_args))?;
        Ok((ret, args))
    }

    /// Run a host implementation of a native-declared callable
    ///
    /// Inputs reach the host borrowed: `none` inputs are only read, other
    /// inputs are taken over and their object references dropped once the
    /// results are marshalled. Results cross with the callable's declared
    /// transfer; host temporaries stay valid until the next boundary call.
    pub(crate) fn run_host<F>(
        &mut self,
        info: &CallableInfo,
        args: &mut Vec<NativeRepr>,
        ret: &mut NativeRepr,
        host: F,
    ) -> Result<(), CallError>
    where
        F: FnOnce(&[HostValue]) -> Result<Vec<HostValue>, CallError>,
    {
        if args.len() < info.args.len() {
            args.resize(info.args.len(), NativeRepr::Void);
        }
        let hidden = info.length_args();
        let mut host_args = Vec::new();
        let mut adopted = Vec::new();
        {
            let mut marshaller = Marshaller::new(&mut self.heap, &self.objects);
            for (i, arg) in info.args.iter().enumerate() {
                if hidden.contains(&i) || !arg.direction.is_input() {
                    continue;
                }
                let length = native_length(args, arg.length_arg)?;
                let value = if arg.transfer == TransferMode::None {
                    marshaller.peek(&args[i], &arg.ty, length)?
                } else {
                    let value = marshaller.from_native_with_length(&args[i], &arg.ty, arg.transfer, length)?;
                    adopted.extend(value.objects());
                    value
                };
                host_args.push(value);
            }
        }

        let outcome = host(&host_args).and_then(|results| {
            let expected = host_outputs(info);
            if results.len() != expected {
                return Err(CallError::Arity {
                    name: info.name.clone(),
                    expected,
                    got: results.len(),
                });
            }
            self.marshal_host_results(info, args, ret, results)
        });
        for id in adopted {
            // references taken while lifting; the host closure has returned
            let _ = self.objects.unref(id);
        }
        outcome
    }

    fn marshal_host_results(
        &mut self,
        info: &CallableInfo,
        args: &mut [NativeRepr],
        ret: &mut NativeRepr,
        results: Vec<HostValue>,
    ) -> Result<(), CallError> {
        let hidden = info.length_args();
        let mut results = results.into_iter();
        let lent = {
            let mut marshaller = Marshaller::new(&mut self.heap, &self.objects);
            if let Some(ret_info) = info.ret.as_ref().filter(|r| r.ty != TypeDescriptor::Void) {
                let value = results.next().unwrap_or(HostValue::Null);
                if let Some(index) = ret_info.length_arg {
                    write_length(info, args, index, &ret_info.ty, &value)?;
                }
                *ret = marshaller.to_native(&value, &ret_info.ty, ret_info.transfer)?;
            }
            for (i, arg) in info.args.iter().enumerate() {
                if hidden.contains(&i) || !arg.direction.is_output() {
                    continue;
                }
                let value = results.next().unwrap_or(HostValue::Null);
                if let Some(index) = arg.length_arg {
                    write_length(info, args, index, &arg.ty, &value)?;
                }
                args[i] = match arg.direction {
                    Direction::OutCallerAllocates => {
                        marshaller.write_storage(&args[i], &value, &arg.ty)?
                    }
                    _ => marshaller.to_native(&value, &arg.ty, arg.transfer)?,
                };
            }
            marshaller.take_pending()
        };
        self.deferred.extend(lent);
        Ok(())
    }
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("heap", &self.heap)
            .field("objects", &self.objects)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

/// What marshalling the inputs gave to the native side
#[derive(Debug, Default)]
struct Handed {
    /// `full` and `container` inputs, taken back if the call never runs
    values: Vec<(NativeRepr, TypeDescriptor, TransferMode)>,
    /// Caller-allocated out storage
    storage: Vec<NativeRepr>,
    /// Floating host references sunk by a `full` input
    sunk: Vec<ObjectId>,
    call_scoped: Vec<CallbackId>,
}

fn marshal_inputs(
    marshaller: &mut Marshaller<'_>,
    callbacks: &CallbackBridge,
    info: &CallableInfo,
    host_args: &[HostValue],
    native_args: &mut [NativeRepr],
    handed: &mut Handed,
) -> Result<(), CallError> {
    let hidden = info.length_args();
    let mut inputs = host_args.iter();
    for (i, arg) in info.args.iter().enumerate() {
        if hidden.contains(&i) {
            continue;
        }
        match arg.direction {
            Direction::In | Direction::InOut => {
                let value = inputs.next().unwrap_or(&NULL);
                if value.is_null() && arg.ty.is_pointer() && !arg.nullable {
                    return Err(MarshalError::UnexpectedNull(arg.name.clone()).into());
                }
                if let Some(index) = arg.length_arg {
                    let length = value.as_seq().map_or(0, <[HostValue]>::len);
                    let (width, signedness) = length_width(info, &arg.ty, index);
                    native_args[index] = scalar::length_to_native(length, width, signedness)?;
                }
                let sinks = arg.transfer == TransferMode::Full
                    || (arg.transfer == TransferMode::Container && !arg.ty.is_container());
                let floating: Vec<ObjectId> = if sinks {
                    value
                        .objects()
                        .into_iter()
                        .filter(|id| marshaller.is_floating(*id))
                        .collect()
                } else {
                    Vec::new()
                };
                native_args[i] = marshaller.to_native(value, &arg.ty, arg.transfer)?;
                handed.sunk.extend(floating);
                if arg.transfer != TransferMode::None {
                    handed
                        .values
                        .push((native_args[i].clone(), arg.ty.clone(), arg.transfer));
                }
                if let (HostValue::Callback(id), TypeDescriptor::Callback(callback)) = (value, &arg.ty) {
                    let scope = arg.scope.unwrap_or(CallbackScope::Notified);
                    callbacks.get(*id)?.bind(callback, scope)?;
                    if scope == CallbackScope::Call {
                        handed.call_scoped.push(*id);
                    }
                }
            }
            Direction::OutCallerAllocates => {
                native_args[i] = marshaller.caller_storage(&arg.ty)?;
                handed.storage.push(native_args[i].clone());
            }
            Direction::OutCalleeAllocates => {}
        }
    }
    Ok(())
}

/// Number of values a host implementation hands back
fn host_outputs(info: &CallableInfo) -> usize {
    let hidden = info.length_args();
    let ret = info
        .ret
        .as_ref()
        .map_or(0, |r| usize::from(r.ty != TypeDescriptor::Void));
    ret + info
        .args
        .iter()
        .enumerate()
        .filter(|(i, a)| !hidden.contains(i) && a.direction.is_output())
        .count()
}

/// Width of the length parameter at `index`
fn length_width(info: &CallableInfo, ty: &TypeDescriptor, index: usize) -> (IntWidth, Signedness) {
    if let Some(TypeDescriptor::Int { width, signedness }) = info.args.get(index).map(|a| &a.ty) {
        return (*width, *signedness);
    }
    match ty {
        TypeDescriptor::Array {
            length: ArrayLength::Param { width, signedness },
            ..
        } => (*width, *signedness),
        _ => (IntWidth::W64, Signedness::Unsigned),
    }
}

fn write_length(
    info: &CallableInfo,
    args: &mut [NativeRepr],
    index: usize,
    ty: &TypeDescriptor,
    value: &HostValue,
) -> Result<(), CallError> {
    let length = value.as_seq().map_or(0, <[HostValue]>::len);
    let (width, signedness) = length_width(info, ty, index);
    if let Some(slot) = args.get_mut(index) {
        *slot = scalar::length_to_native(length, width, signedness)?;
    }
    Ok(())
}

fn native_length(args: &[NativeRepr], index: Option<usize>) -> Result<Option<usize>, CallError> {
    index
        .map(|i| scalar::length_from_native(args.get(i).unwrap_or(&NativeRepr::Void)))
        .transpose()
        .map_err(CallError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ArgInfo, ObjectInfo};
    use crate::heap::Party;
    use crate::registry::TypeRegistry;

    fn library_with(functions: Vec<(CallableInfo, NativeBody)>) -> Arc<Library> {
        let mut registry = TypeRegistry::new();
        let object = registry.register_object(ObjectInfo::new("Object")).unwrap();
        let mut library = Library::new(registry);
        let class = ClassBuilder::new(&object).build().unwrap();
        library.register_class(class).unwrap();
        for (info, body) in functions {
            library.register_function(info, body).unwrap();
        }
        Arc::new(library)
    }

    #[test]
    fn test_arity_checked() {
        let info = CallableInfo::new("int8_in").arg(ArgInfo::new("v", TypeDescriptor::int8()));
        let mut boundary = Boundary::new(
            library_with(vec![(info, native(|_| Ok(())))]),
            RuntimeConfig::default(),
        );
        let err = boundary.invoke("int8_in", &[]).unwrap_err();
        assert!(matches!(err, CallError::Arity { expected: 1, got: 0, .. }));
    }

    #[test]
    fn test_unknown_function() {
        let mut boundary = Boundary::new(library_with(Vec::new()), RuntimeConfig::default());
        assert_eq!(
            boundary.invoke("missing", &[]).unwrap_err(),
            CallError::UnknownFunction("missing".to_string())
        );
    }

    #[test]
    fn test_non_nullable_pointer_rejects_null() {
        let info = CallableInfo::new("utf8_none_in").arg(ArgInfo::new("s", TypeDescriptor::Utf8));
        let mut boundary = Boundary::new(
            library_with(vec![(info, native(|_| Ok(())))]),
            RuntimeConfig::default(),
        );
        let err = boundary.invoke("utf8_none_in", &[HostValue::Null]).unwrap_err();
        assert!(matches!(err, CallError::Marshal(MarshalError::UnexpectedNull(_))));
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_length_parameter_written() {
        let info = CallableInfo::new("array_in")
            .arg(
                ArgInfo::new(
                    "ints",
                    TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W8, Signedness::Unsigned),
                )
                .length_arg(1),
            )
            .arg(ArgInfo::new("length", TypeDescriptor::uint8()));
        let body = native(|frame| {
            assert_eq!(frame.int(1)?, 3);
            Ok(())
        });
        let mut boundary = Boundary::new(library_with(vec![(info, body)]), RuntimeConfig::default());
        boundary.invoke("array_in", &[HostValue::ints([1, 2, 3])]).unwrap();
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_length_truncation_leaves_nothing_behind() {
        let info = CallableInfo::new("array_in")
            .arg(
                ArgInfo::new(
                    "ints",
                    TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W8, Signedness::Unsigned),
                )
                .length_arg(1),
            )
            .arg(ArgInfo::new("length", TypeDescriptor::uint8()));
        let mut boundary = Boundary::new(
            library_with(vec![(info, native(|_| Ok(())))]),
            RuntimeConfig::default(),
        );
        let err = boundary
            .invoke("array_in", &[HostValue::ints(0..256)])
            .unwrap_err();
        assert!(matches!(err, CallError::Marshal(MarshalError::Truncation(_))));
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_new_object_sinks_floating() {
        let mut registry = TypeRegistry::new();
        let info = registry
            .register_object(ObjectInfo::new("Floating").floating())
            .unwrap();
        let mut library = Library::new(registry);
        library
            .register_class(ClassBuilder::new(&info).build().unwrap())
            .unwrap();
        let mut boundary = Boundary::new(Arc::new(library), RuntimeConfig::default());

        let owned = boundary.new_object("Floating").unwrap();
        assert!(!boundary.objects().is_floating(owned).unwrap());
        assert_eq!(boundary.objects().ref_count(owned).unwrap(), 1);

        let floating = boundary.new_floating("Floating").unwrap();
        assert!(boundary.objects().is_floating(floating).unwrap());
    }

    fn object_ty() -> TypeDescriptor {
        TypeDescriptor::Object(Arc::new(ObjectInfo::new("Object")))
    }

    #[test]
    fn test_failed_input_returns_full_object_reference() {
        let info = CallableInfo::new("object_full_utf8_in")
            .arg(ArgInfo::new("obj", object_ty()).transfer(TransferMode::Full))
            .arg(ArgInfo::new("s", TypeDescriptor::Utf8));
        let mut boundary = Boundary::new(
            library_with(vec![(info, native(|_| Ok(())))]),
            RuntimeConfig::default(),
        );
        let id = boundary.new_object("Object").unwrap();

        let err = boundary
            .invoke("object_full_utf8_in", &[HostValue::Object(id), HostValue::Null])
            .unwrap_err();
        assert_eq!(err, CallError::Marshal(MarshalError::UnexpectedNull("s".to_string())));
        assert_eq!(boundary.objects().ref_count(id).unwrap(), 1);

        boundary.release(&HostValue::Object(id)).unwrap();
        assert!(!boundary.objects().is_alive(id));
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_failed_input_frees_handed_blocks() {
        let info = CallableInfo::new("handed_then_null")
            .arg(ArgInfo::new("full", TypeDescriptor::list(TypeDescriptor::Utf8)).transfer(TransferMode::Full))
            .arg(
                ArgInfo::new("container", TypeDescriptor::list(TypeDescriptor::Utf8))
                    .transfer(TransferMode::Container),
            )
            .arg(ArgInfo::new("s", TypeDescriptor::Utf8));
        let mut boundary = Boundary::new(
            library_with(vec![(info, native(|_| Ok(())))]),
            RuntimeConfig::default(),
        );
        let err = boundary
            .invoke(
                "handed_then_null",
                &[
                    HostValue::string_list(["a", "b"]),
                    HostValue::string_list(["c"]),
                    HostValue::Null,
                ],
            )
            .unwrap_err();
        assert!(matches!(err, CallError::Marshal(MarshalError::UnexpectedNull(_))));
        assert!(boundary.heap().live(Party::Native).is_empty());
        assert!(boundary.heap().live(Party::Host).is_empty());
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_unreleased_object_reference_is_a_leak() {
        let mut boundary = Boundary::new(library_with(Vec::new()), RuntimeConfig::default());
        let id = boundary.new_object("Object").unwrap();
        assert_eq!(boundary.held(id), 1);

        let leaks = boundary.leaks();
        assert_eq!(leaks.objects, vec![id.to_string()]);
        assert!(leaks.to_string().contains("objects ["));

        boundary.release(&HostValue::Object(id)).unwrap();
        assert_eq!(boundary.held(id), 0);
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_floating_full_input_leaves_host_nothing_to_release() {
        let mut registry = TypeRegistry::new();
        let floating = registry
            .register_object(ObjectInfo::new("Object").floating())
            .unwrap();
        let mut library = Library::new(registry);
        library
            .register_class(ClassBuilder::new(&floating).build().unwrap())
            .unwrap();
        let info = CallableInfo::new("object_full_in")
            .arg(ArgInfo::new("obj", object_ty()).transfer(TransferMode::Full));
        library.register_function(info, native(|_| Ok(()))).unwrap();
        let mut boundary = Boundary::new(Arc::new(library), RuntimeConfig::default());

        let id = boundary.new_floating("Object").unwrap();
        boundary.invoke("object_full_in", &[HostValue::Object(id)]).unwrap();
        assert!(!boundary.objects().is_floating(id).unwrap());
        assert_eq!(boundary.objects().ref_count(id).unwrap(), 1);
        assert_eq!(boundary.held(id), 0);
        assert!(boundary.leaks().is_clean());
    }

    fn properties_library() -> Arc<Library> {
        let mut registry = TypeRegistry::new();
        let object = registry
            .register_object(ObjectInfo::new("Object").floating())
            .unwrap();
        let holder = registry
            .register_object(
                ObjectInfo::new("Holder")
                    .property("strv", TypeDescriptor::zero_terminated(TypeDescriptor::Utf8))
                    .property("object", TypeDescriptor::Object(Arc::clone(&object))),
            )
            .unwrap();
        let mut library = Library::new(registry);
        for info in [&object, &holder] {
            library
                .register_class(ClassBuilder::new(info).build().unwrap())
                .unwrap();
        }
        Arc::new(library)
    }

    #[test]
    fn test_property_values_freed_with_instance() {
        let mut boundary = Boundary::new(properties_library(), RuntimeConfig::default());
        let holder = boundary.new_object("Holder").unwrap();
        let strv = HostValue::strings(["a", "b"]);
        boundary.set_property(holder, "strv", &strv).unwrap();
        assert_eq!(boundary.heap().live(Party::Native).len(), 3);

        let copy = boundary.get_property(holder, "strv").unwrap();
        assert_eq!(copy, strv);
        boundary.release(&HostValue::Object(holder)).unwrap();
        assert!(boundary.heap().live(Party::Native).is_empty());
        assert!(boundary.leaks().is_clean(), "{}", boundary.leaks());
    }

    #[test]
    fn test_floating_object_sunk_by_property() {
        let mut boundary = Boundary::new(properties_library(), RuntimeConfig::default());
        let holder = boundary.new_object("Holder").unwrap();
        let object = boundary.new_floating("Object").unwrap();
        boundary
            .set_property(holder, "object", &HostValue::Object(object))
            .unwrap();
        assert!(!boundary.objects().is_floating(object).unwrap());
        assert_eq!(boundary.objects().ref_count(object).unwrap(), 1);
        assert_eq!(boundary.held(object), 0);

        boundary.release(&HostValue::Object(holder)).unwrap();
        assert!(!boundary.objects().is_alive(object));
        assert!(boundary.leaks().is_clean());
    }

    #[test]
    fn test_unknown_property_rejected() {
        let mut boundary = Boundary::new(properties_library(), RuntimeConfig::default());
        let holder = boundary.new_object("Holder").unwrap();
        let err = boundary
            .set_property(holder, "missing", &HostValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, CallError::UnknownProperty { .. }));
        let err = boundary
            .new_object_with("Holder", &[("strv", HostValue::Int(1))])
            .unwrap_err();
        assert!(matches!(err, CallError::Marshal(MarshalError::TypeMismatch { .. })));
        assert_eq!(boundary.objects().live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "ownership contract violated")]
    fn test_panic_policy() {
        let config = RuntimeConfig {
            usage_policy: UsagePolicy::Panic,
            ..RuntimeConfig::default()
        };
        let mut boundary = Boundary::new(library_with(Vec::new()), config);
        let id = boundary.new_object("Object").unwrap();
        boundary.release(&HostValue::Object(id)).unwrap();
        let _ = boundary.release(&HostValue::Object(id));
    }
}
