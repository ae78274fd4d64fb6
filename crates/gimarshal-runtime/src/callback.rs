//! Callback/closure bridge
//!
//! A binding pairs a host function with optional user data and an optional
//! destroy notifier. The native side may invoke it any number of times, from
//! any thread. Invocation and teardown are serialised per binding: release
//! refuses new invocations at once, and the destroy notifier runs exactly
//! once, when the last in-flight invocation has returned. A host function
//! may therefore release its own binding.

use crate::audit::{AuditEvent, AuditLogger};
use crate::channel::NativeError;
use crate::descriptor::{CallbackInfo, CallbackScope};
use crate::error::{CallError, UsageError};
use crate::value::HostValue;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle to a callback binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn from_raw(raw: u64) -> Self {
        CallbackId(raw)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}

/// Opaque user data handed to every invocation
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Host function behind a binding: arguments in, return value then out values
pub type HostCallback =
    Arc<dyn Fn(&[HostValue], Option<&UserData>) -> Result<Vec<HostValue>, NativeError> + Send + Sync>;

/// Runs once when the binding is released
pub type DestroyNotify = Box<dyn FnOnce(Option<UserData>) + Send>;

/// A host closure ready to be registered
pub struct HostClosure {
    func: HostCallback,
    user_data: Option<UserData>,
    destroy: Option<DestroyNotify>,
}

impl HostClosure {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[HostValue], Option<&UserData>) -> Result<Vec<HostValue>, NativeError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Arc::new(func),
            user_data: None,
            destroy: None,
        }
    }

    pub fn with_user_data(mut self, data: UserData) -> Self {
        self.user_data = Some(data);
        self
    }

    pub fn on_destroy<F>(mut self, notify: F) -> Self
    where
        F: FnOnce(Option<UserData>) + Send + 'static,
    {
        self.destroy = Some(Box::new(notify));
        self
    }
}

#[derive(Debug)]
struct BindingState {
    in_flight: usize,
    released: bool,
    /// The destroy notifier has run
    destroyed: bool,
    invocations: u64,
    scope: CallbackScope,
    info: Option<Arc<CallbackInfo>>,
}

/// One registered callback
pub struct CallbackBinding {
    id: CallbackId,
    func: HostCallback,
    user_data: Option<UserData>,
    destroy: Mutex<Option<DestroyNotify>>,
    state: Mutex<BindingState>,
    audit: Arc<dyn AuditLogger>,
}

/// Decrements the in-flight count even if the host function panics; the
/// last invocation out of a released binding runs its destroy notifier
struct InFlight<'a> {
    binding: &'a CallbackBinding,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let finished = {
            let mut state = self.binding.lock_state();
            state.in_flight -= 1;
            state.in_flight == 0 && state.released && self.binding.mark_destroyed(&mut state)
        };
        if finished {
            self.binding.destroy();
        }
    }
}

impl CallbackBinding {
    fn lock_state(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    pub fn scope(&self) -> CallbackScope {
        self.lock_state().scope
    }

    pub fn info(&self) -> Option<Arc<CallbackInfo>> {
        self.lock_state().info.clone()
    }

    pub fn invocations(&self) -> u64 {
        self.lock_state().invocations
    }

    pub fn is_released(&self) -> bool {
        self.lock_state().released
    }

    /// Released and no invocation left in flight
    pub fn is_destroyed(&self) -> bool {
        self.lock_state().destroyed
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// Attach the signature and scope of the argument slot it was passed in
    pub fn bind(&self, info: &Arc<CallbackInfo>, scope: CallbackScope) -> Result<(), UsageError> {
        let mut state = self.lock_state();
        if state.released {
            return Err(UsageError::InvokeAfterRelease(self.id));
        }
        state.info = Some(Arc::clone(info));
        state.scope = scope;
        Ok(())
    }

    /// Invoke the host function
    ///
    /// Async-scope bindings release themselves after their first invocation.
    pub fn invoke(&self, args: &[HostValue]) -> Result<Vec<HostValue>, CallError> {
        let (invocation, scope) = {
            let mut state = self.lock_state();
            if state.released {
                let error = UsageError::InvokeAfterRelease(self.id);
                self.audit.log(AuditEvent::UsageViolation {
                    error: error.clone(),
                });
                return Err(error.into());
            }
            state.in_flight += 1;
            state.invocations += 1;
            (state.invocations, state.scope)
        };

        self.audit.log(AuditEvent::CallbackInvoked {
            callback: self.id,
            invocation,
        });

        let result = {
            let _guard = InFlight { binding: self };
            (self.func)(args, self.user_data.as_ref())
        };

        if scope == CallbackScope::Async {
            self.teardown();
        }

        result.map_err(CallError::Domain)
    }

    /// Release the binding; a second release is a usage error
    pub fn release(&self) -> Result<(), UsageError> {
        if self.teardown() {
            Ok(())
        } else {
            let error = UsageError::DoubleRelease(self.id);
            self.audit.log(AuditEvent::UsageViolation {
                error: error.clone(),
            });
            Err(error)
        }
    }

    /// Mark released; notify now, or leave it to the last in-flight invocation
    fn teardown(&self) -> bool {
        let finished = {
            let mut state = self.lock_state();
            if state.released {
                return false;
            }
            state.released = true;
            state.in_flight == 0 && self.mark_destroyed(&mut state)
        };
        if finished {
            self.destroy();
        }
        true
    }

    /// Claim the one destroy notification
    fn mark_destroyed(&self, state: &mut BindingState) -> bool {
        !std::mem::replace(&mut state.destroyed, true)
    }

    /// Runs outside the state lock, so the notifier may call back into the bridge
    fn destroy(&self) {
        let notify = self
            .destroy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(notify) = notify {
            notify(self.user_data.clone());
        }
        self.audit.log(AuditEvent::CallbackDestroyed {
            callback: self.id,
            invocations: self.invocations(),
        });
    }
}

impl fmt::Debug for CallbackBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBinding")
            .field("id", &self.id)
            .field("state", &*self.lock_state())
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Live bindings, and the invocation counts of destroyed ones
#[derive(Default)]
struct Bindings {
    live: BTreeMap<CallbackId, Arc<CallbackBinding>>,
    retired: BTreeMap<CallbackId, u64>,
}

impl Bindings {
    /// Move bindings whose destroy notifier has run out of the live table
    fn prune(&mut self) {
        let destroyed: Vec<CallbackId> = self
            .live
            .iter()
            .filter(|(_, binding)| binding.is_destroyed())
            .map(|(id, _)| *id)
            .collect();
        for id in destroyed {
            if let Some(binding) = self.live.remove(&id) {
                self.retired.insert(id, binding.invocations());
            }
        }
    }
}

/// Registry of callback bindings
pub struct CallbackBridge {
    next_id: AtomicU64,
    bindings: Mutex<Bindings>,
    audit: Arc<dyn AuditLogger>,
}

impl CallbackBridge {
    pub fn new(audit: Arc<dyn AuditLogger>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            bindings: Mutex::new(Bindings::default()),
            audit,
        }
    }

    fn lock_bindings(&self) -> MutexGuard<'_, Bindings> {
        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        bindings.prune();
        bindings
    }

    fn violation(&self, error: UsageError) -> UsageError {
        self.audit.log(AuditEvent::UsageViolation {
            error: error.clone(),
        });
        error
    }

    /// Register a closure; its scope is fixed when it is passed to a call
    pub fn register(&self, closure: HostClosure) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let binding = Arc::new(CallbackBinding {
            id,
            func: closure.func,
            user_data: closure.user_data,
            destroy: Mutex::new(closure.destroy),
            state: Mutex::new(BindingState {
                in_flight: 0,
                released: false,
                destroyed: false,
                invocations: 0,
                scope: CallbackScope::Notified,
                info: None,
            }),
            audit: Arc::clone(&self.audit),
        });
        self.lock_bindings().live.insert(id, binding);
        self.audit.log(AuditEvent::CallbackRegistered { callback: id });
        id
    }

    /// The live binding, or whether `id` was retired
    fn lookup(&self, id: CallbackId) -> (Option<Arc<CallbackBinding>>, bool) {
        let bindings = self.lock_bindings();
        (bindings.live.get(&id).cloned(), bindings.retired.contains_key(&id))
    }

    /// A binding that is still live; a destroyed one can no longer be used
    pub fn get(&self, id: CallbackId) -> Result<Arc<CallbackBinding>, UsageError> {
        match self.lookup(id) {
            (Some(binding), _) => Ok(binding),
            (None, true) => Err(self.violation(UsageError::InvokeAfterRelease(id))),
            (None, false) => Err(UsageError::UnknownCallback(id)),
        }
    }

    pub fn is_released(&self, id: CallbackId) -> Result<bool, UsageError> {
        match self.lookup(id) {
            (Some(binding), _) => Ok(binding.is_released()),
            (None, true) => Ok(true),
            (None, false) => Err(UsageError::UnknownCallback(id)),
        }
    }

    /// Invocations so far, kept after the binding is destroyed
    pub fn invocations(&self, id: CallbackId) -> Result<u64, UsageError> {
        let bindings = self.lock_bindings();
        match (bindings.live.get(&id), bindings.retired.get(&id)) {
            (Some(binding), _) => Ok(binding.invocations()),
            (None, Some(&count)) => Ok(count),
            (None, None) => Err(UsageError::UnknownCallback(id)),
        }
    }

    pub fn invoke(&self, id: CallbackId, args: &[HostValue]) -> Result<Vec<HostValue>, CallError> {
        self.get(id)?.invoke(args)
    }

    pub fn release(&self, id: CallbackId) -> Result<(), UsageError> {
        let binding = match self.lookup(id) {
            (Some(binding), _) => binding,
            (None, true) => return Err(self.violation(UsageError::DoubleRelease(id))),
            (None, false) => return Err(UsageError::UnknownCallback(id)),
        };
        binding.release()?;
        // locking retires it, unless an invocation is still running
        drop(self.lock_bindings());
        Ok(())
    }

    /// Bindings not released yet
    pub fn unreleased(&self) -> Vec<CallbackId> {
        self.lock_bindings()
            .live
            .values()
            .filter(|b| !b.is_released())
            .map(|b| b.id)
            .collect()
    }
}

impl fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBridge")
            .field("unreleased", &self.unreleased())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::descriptor::CallableInfo;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn bridge() -> CallbackBridge {
        CallbackBridge::new(Arc::new(MemoryAuditLogger::new()))
    }

    fn echo() -> HostClosure {
        HostClosure::new(|args, _| Ok(args.to_vec()))
    }

    #[test]
    fn test_destroy_fires_once_with_zero_invocations() {
        let bridge = bridge();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = bridge.register(echo().on_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bridge.release(id).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.release(id), Err(UsageError::DoubleRelease(id)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_user_data_is_shared_across_invocations() {
        let bridge = bridge();
        let data: UserData = Arc::new(7i64);
        let expected = Arc::clone(&data);
        let id = bridge.register(
            HostClosure::new(move |_, user_data| {
                let same = user_data.map_or(false, |d| Arc::ptr_eq(d, &expected));
                Ok(vec![HostValue::Bool(same)])
            })
            .with_user_data(data),
        );

        for _ in 0..3 {
            assert_eq!(bridge.invoke(id, &[]).unwrap(), vec![HostValue::Bool(true)]);
        }
        assert_eq!(bridge.get(id).unwrap().invocations(), 3);
    }

    #[test]
    fn test_invoke_after_release_refused() {
        let bridge = bridge();
        let id = bridge.register(echo());
        bridge.release(id).unwrap();
        let err = bridge.invoke(id, &[]).unwrap_err();
        assert_eq!(err.usage(), Some(&UsageError::InvokeAfterRelease(id)));
    }

    #[test]
    fn test_async_scope_releases_after_first_invocation() {
        let bridge = bridge();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = bridge.register(echo().on_destroy(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let info = Arc::new(CallbackInfo::new(CallableInfo::new("Async")));
        bridge.get(id).unwrap().bind(&info, CallbackScope::Async).unwrap();

        bridge.invoke(id, &[HostValue::Int(1)]).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(bridge.invoke(id, &[]).is_err());
        assert!(bridge.unreleased().is_empty());
    }

    #[test]
    fn test_destroy_runs_after_in_flight_invocation() {
        let bridge = Arc::new(bridge());
        let log = Arc::new(Mutex::new(Vec::new()));

        let invoke_log = Arc::clone(&log);
        let destroy_log = Arc::clone(&log);
        let id = bridge.register(
            HostClosure::new(move |_, _| {
                thread::sleep(Duration::from_millis(50));
                invoke_log.lock().unwrap().push("invoked");
                Ok(vec![])
            })
            .on_destroy(move |_| destroy_log.lock().unwrap().push("destroyed")),
        );

        let binding = bridge.get(id).unwrap();
        let worker = {
            let binding = Arc::clone(&binding);
            thread::spawn(move || binding.invoke(&[]))
        };
        // let the worker enter the invocation
        while binding.invocations() == 0 {
            thread::yield_now();
        }
        bridge.release(id).unwrap();
        assert!(binding.is_released());
        worker.join().unwrap().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["invoked", "destroyed"]);
        assert!(binding.is_destroyed());
        assert_eq!(bridge.invocations(id), Ok(1));
    }

    #[test]
    fn test_host_function_releases_its_own_binding() {
        let bridge = Arc::new(bridge());
        let fired = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&bridge);
        let slot = Arc::clone(&own_id);
        let counter = Arc::clone(&fired);
        let id = bridge.register(
            HostClosure::new(move |_, _| {
                let id = slot.lock().unwrap().expect("id stored before invocation");
                let bridge = weak.upgrade().expect("bridge alive");
                bridge.release(id).map_err(|e| {
                    NativeError::new(&crate::channel::Quark::new("test"), 1, e.to_string())
                })?;
                // the notifier waits for this invocation to return
                Ok(vec![HostValue::Bool(bridge.get(id).map_or(false, |b| !b.is_destroyed()))])
            })
            .on_destroy(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        *own_id.lock().unwrap() = Some(id);

        let (done, finished) = std::sync::mpsc::channel();
        let invoker = Arc::clone(&bridge);
        thread::spawn(move || {
            let _ = done.send(invoker.invoke(id, &[]));
        });
        let result = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("self-release inside an invocation returns");

        assert_eq!(result.unwrap(), vec![HostValue::Bool(true)]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.is_released(id), Ok(true));
        assert_eq!(bridge.release(id), Err(UsageError::DoubleRelease(id)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroyed_bindings_are_retired() {
        let bridge = bridge();
        let ids: Vec<CallbackId> = (0..100).map(|_| bridge.register(echo())).collect();
        let kept = bridge.register(echo());
        for &id in &ids {
            bridge.invoke(id, &[]).unwrap();
            bridge.release(id).unwrap();
        }

        {
            let bindings = bridge.bindings.lock().unwrap();
            assert_eq!(bindings.live.len(), 1);
            assert!(bindings.live.contains_key(&kept));
            assert_eq!(bindings.retired.len(), ids.len());
        }
        assert_eq!(bridge.invocations(ids[0]), Ok(1));
        assert_eq!(bridge.release(ids[0]), Err(UsageError::DoubleRelease(ids[0])));
        let err = bridge.invoke(ids[1], &[]).unwrap_err();
        assert_eq!(err.usage(), Some(&UsageError::InvokeAfterRelease(ids[1])));
        assert_eq!(bridge.unreleased(), vec![kept]);
        assert_eq!(
            bridge.get(CallbackId::from_raw(9999)).unwrap_err(),
            UsageError::UnknownCallback(CallbackId::from_raw(9999))
        );
    }

    #[test]
    fn test_registration_is_audited() {
        let audit = Arc::new(MemoryAuditLogger::new());
        let bridge = CallbackBridge::new(audit.clone());
        let id = bridge.register(echo());
        assert_eq!(
            audit.events_of("callback-registered"),
            vec![AuditEvent::CallbackRegistered { callback: id }]
        );
    }
}
