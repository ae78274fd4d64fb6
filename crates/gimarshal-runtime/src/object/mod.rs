//! Object lifecycle manager
//!
//! Instances live in an arena keyed by `ObjectId`. Each carries atomic
//! reference state (count + floating flag) and a handle to its `Class`.
//! Reaching zero references finalizes the instance and removes it from the
//! arena; the id is never reused, so later use is reported as
//! `ObjectDestroyed` rather than touching a different object.

pub mod class;
pub mod refcount;

pub use class::{Class, ClassBuilder};
pub use refcount::{RefError, RefState};

use crate::audit::{AuditEvent, AuditLogger};
use crate::error::UsageError;
use crate::value::HostValue;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Handle to an object instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn from_raw(raw: u64) -> Self {
        ObjectId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// A live object
#[derive(Debug)]
pub struct Instance {
    id: ObjectId,
    class: Arc<Class>,
    refs: RefState,
    fields: Mutex<BTreeMap<String, HostValue>>,
}

impl Instance {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    pub fn refs(&self) -> &RefState {
        &self.refs
    }
}

/// Arena of object instances
pub struct ObjectSpace {
    next_id: AtomicU64,
    live: RwLock<HashMap<ObjectId, Arc<Instance>>>,
    audit: Arc<dyn AuditLogger>,
}

impl ObjectSpace {
    pub fn new(audit: Arc<dyn AuditLogger>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            live: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Construct per the class's documented default (floating or owned)
    pub fn create(&self, class: &Arc<Class>) -> ObjectId {
        self.create_with(class, class.info().floating)
    }

    pub fn create_with(&self, class: &Arc<Class>, floating: bool) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let instance = Arc::new(Instance {
            id,
            class: Arc::clone(class),
            refs: RefState::new(floating),
            fields: Mutex::new(BTreeMap::new()),
        });
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, instance);
        id
    }

    pub fn instance(&self, id: ObjectId) -> Result<Arc<Instance>, UsageError> {
        if let Some(instance) = self
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Ok(Arc::clone(instance));
        }
        let error = if id.0 != 0 && id.0 < self.next_id.load(Ordering::Relaxed) {
            UsageError::ObjectDestroyed(id)
        } else {
            UsageError::UnknownObject(id)
        };
        Err(self.violation(error))
    }

    fn violation(&self, error: UsageError) -> UsageError {
        self.audit.log(AuditEvent::UsageViolation {
            error: error.clone(),
        });
        error
    }

    fn map_ref_error(&self, id: ObjectId, err: RefError, unref: bool) -> UsageError {
        let error = match (err, unref) {
            (RefError::Floating, true) => UsageError::UnrefFloating(id),
            (RefError::Floating, false) => UsageError::RefFloating(id),
            (RefError::Destroyed, _) => UsageError::ObjectDestroyed(id),
        };
        self.violation(error)
    }

    /// Add a strong reference
    pub fn ref_(&self, id: ObjectId) -> Result<u32, UsageError> {
        let instance = self.instance(id)?;
        let count = instance
            .refs
            .acquire()
            .map_err(|e| self.map_ref_error(id, e, false))?;
        self.audit.log(AuditEvent::Ref { object: id, count });
        Ok(count)
    }

    /// Drop a strong reference; the last one finalizes the object
    pub fn unref(&self, id: ObjectId) -> Result<u32, UsageError> {
        let instance = self.instance(id)?;
        let count = instance
            .refs
            .release()
            .map_err(|e| self.map_ref_error(id, e, true))?;
        self.audit.log(AuditEvent::Unref { object: id, count });
        if count == 0 {
            self.live
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            self.audit.log(AuditEvent::Finalized {
                object: id,
                class: instance.class.name().to_string(),
            });
        }
        Ok(count)
    }

    /// Claim a floating reference; `false` if it was already claimed
    pub fn claim(&self, id: ObjectId) -> Result<bool, UsageError> {
        let instance = self.instance(id)?;
        let claimed = instance.refs.claim();
        if claimed {
            self.audit.log(AuditEvent::Claim { object: id });
        } else {
            self.audit.log(AuditEvent::ClaimRejected { object: id });
        }
        Ok(claimed)
    }

    /// Take ownership: claim a floating reference or add a new one
    pub fn ref_sink(&self, id: ObjectId) -> Result<u32, UsageError> {
        let instance = self.instance(id)?;
        if instance.refs.claim() {
            self.audit.log(AuditEvent::Claim { object: id });
            return Ok(instance.refs.count());
        }
        self.ref_(id)
    }

    pub fn ref_count(&self, id: ObjectId) -> Result<u32, UsageError> {
        Ok(self.instance(id)?.refs.count())
    }

    pub fn is_floating(&self, id: ObjectId) -> Result<bool, UsageError> {
        Ok(self.instance(id)?.refs.is_floating())
    }

    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn class_of(&self, id: ObjectId) -> Result<Arc<Class>, UsageError> {
        Ok(Arc::clone(&self.instance(id)?.class))
    }

    pub fn is_a(&self, id: ObjectId, type_name: &str) -> Result<bool, UsageError> {
        Ok(self.instance(id)?.class.is_a(type_name))
    }

    /// Capability query by interface name, independent of concrete type
    pub fn implements(&self, id: ObjectId, interface: &str) -> Result<bool, UsageError> {
        Ok(self.instance(id)?.class.implements(interface))
    }

    /// Untyped per-instance storage the native bodies keep their state in
    pub fn field(&self, id: ObjectId, name: &str) -> Result<Option<HostValue>, UsageError> {
        let instance = self.instance(id)?;
        let fields = instance
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(fields.get(name).cloned())
    }

    pub fn set_field(&self, id: ObjectId, name: &str, value: HostValue) -> Result<(), UsageError> {
        let instance = self.instance(id)?;
        instance
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn live_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for ObjectSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSpace")
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::descriptor::{InterfaceInfo, ObjectInfo};

    fn space() -> (ObjectSpace, Arc<MemoryAuditLogger>) {
        let audit = Arc::new(MemoryAuditLogger::new());
        (ObjectSpace::new(audit.clone()), audit)
    }

    fn class(floating: bool) -> Arc<Class> {
        let iface = Arc::new(InterfaceInfo::new("Interface"));
        let mut info = ObjectInfo::new("Object").implements(&iface);
        info.floating = floating;
        ClassBuilder::new(&Arc::new(info)).build().unwrap()
    }

    #[test]
    fn test_unref_to_zero_destroys() {
        let (space, audit) = space();
        let id = space.create(&class(false));
        assert_eq!(space.ref_(id).unwrap(), 2);
        assert_eq!(space.unref(id).unwrap(), 1);
        assert_eq!(space.unref(id).unwrap(), 0);
        assert!(!space.is_alive(id));
        assert_eq!(space.unref(id), Err(UsageError::ObjectDestroyed(id)));
        assert_eq!(audit.events_of("finalized").len(), 1);
    }

    #[test]
    fn test_floating_lifecycle() {
        let (space, _) = space();
        let id = space.create(&class(true));
        assert!(space.is_floating(id).unwrap());
        assert_eq!(space.unref(id), Err(UsageError::UnrefFloating(id)));
        assert_eq!(space.ref_(id), Err(UsageError::RefFloating(id)));

        assert!(space.claim(id).unwrap());
        assert!(!space.claim(id).unwrap());
        assert_eq!(space.ref_count(id).unwrap(), 1);
        assert!(!space.is_floating(id).unwrap());
    }

    #[test]
    fn test_ref_sink() {
        let (space, _) = space();
        let id = space.create(&class(true));
        assert_eq!(space.ref_sink(id).unwrap(), 1);
        assert_eq!(space.ref_sink(id).unwrap(), 2);
    }

    #[test]
    fn test_capability_query() {
        let (space, _) = space();
        let id = space.create(&class(false));
        assert!(space.implements(id, "Interface").unwrap());
        assert!(!space.implements(id, "Interface2").unwrap());
        assert!(space.is_a(id, "Object").unwrap());
    }

    #[test]
    fn test_unknown_object() {
        let (space, _) = space();
        let ghost = ObjectId::from_raw(999);
        assert_eq!(space.ref_count(ghost), Err(UsageError::UnknownObject(ghost)));
    }

    #[test]
    fn test_fields() {
        let (space, _) = space();
        let id = space.create(&class(false));
        space.set_field(id, "int", HostValue::Int(42)).unwrap();
        assert_eq!(space.field(id, "int").unwrap(), Some(HostValue::Int(42)));
        assert_eq!(space.field(id, "missing").unwrap(), None);
    }
}
