//! Classes: implementations bound to an `ObjectInfo`
//!
//! Inheritance is a parent link; interface implementations live in a
//! separate table keyed by interface name. Virtual dispatch walks from the
//! most derived class upward and takes the first implementation found.

use crate::descriptor::ObjectInfo;
use crate::error::ClassError;
use crate::invoke::NativeBody;
use gimarshal_config::OverrideResolution;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Runtime class
pub struct Class {
    info: Arc<ObjectInfo>,
    parent: Option<Arc<Class>>,
    vfuncs: BTreeMap<String, NativeBody>,
    interfaces: BTreeMap<String, BTreeMap<String, NativeBody>>,
}

impl Class {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &Arc<ObjectInfo> {
        &self.info
    }

    pub fn parent(&self) -> Option<&Arc<Class>> {
        self.parent.as_ref()
    }

    /// Most derived implementation of a virtual function
    pub fn resolve_vfunc(&self, name: &str) -> Option<NativeBody> {
        let mut class = Some(self);
        while let Some(current) = class {
            if let Some(body) = current.vfuncs.get(name) {
                return Some(Arc::clone(body));
            }
            class = current.parent.as_deref();
        }
        None
    }

    /// Most derived implementation of an interface method
    pub fn resolve_interface(&self, interface: &str, method: &str) -> Option<NativeBody> {
        let mut class = Some(self);
        while let Some(current) = class {
            if let Some(body) = current.interfaces.get(interface).and_then(|m| m.get(method)) {
                return Some(Arc::clone(body));
            }
            class = current.parent.as_deref();
        }
        None
    }

    /// Capability query by interface identity
    pub fn implements(&self, interface: &str) -> bool {
        self.info.find_interface(interface).is_some()
    }

    pub fn is_a(&self, name: &str) -> bool {
        self.info.is_a(name)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.info.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name().to_string()))
            .field("vfuncs", &self.vfuncs.keys().collect::<Vec<_>>())
            .field("interfaces", &self.interfaces.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Vfunc,
    Interface(String),
}

/// Builds a `Class`, resolving every override against the declared
/// virtual functions and interfaces
pub struct ClassBuilder {
    info: Arc<ObjectInfo>,
    parent: Option<Arc<Class>>,
    vfuncs: Vec<(String, NativeBody)>,
    qualified: Vec<(String, String, NativeBody)>,
    unqualified: Vec<(String, NativeBody)>,
    resolution: OverrideResolution,
}

impl ClassBuilder {
    pub fn new(info: &Arc<ObjectInfo>) -> Self {
        Self {
            info: Arc::clone(info),
            parent: None,
            vfuncs: Vec::new(),
            qualified: Vec::new(),
            unqualified: Vec::new(),
            resolution: OverrideResolution::default(),
        }
    }

    pub fn parent(mut self, parent: &Arc<Class>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Override a virtual function of this class or an ancestor
    pub fn vfunc(mut self, name: &str, body: NativeBody) -> Self {
        self.vfuncs.push((name.to_string(), body));
        self
    }

    /// Implement one method of a named interface
    pub fn interface_method(mut self, interface: &str, method: &str, body: NativeBody) -> Self {
        self.qualified
            .push((interface.to_string(), method.to_string(), body));
        self
    }

    /// Override by bare method name; resolved against every declaration
    pub fn method(mut self, name: &str, body: NativeBody) -> Self {
        self.unqualified.push((name.to_string(), body));
        self
    }

    pub fn resolution(mut self, resolution: OverrideResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn build(self) -> Result<Arc<Class>, ClassError> {
        let class_name = self.info.name.clone();

        let declared_parent = self.info.parent.as_ref().map(|p| p.name.clone());
        let given_parent = self.parent.as_ref().map(|p| p.name().to_string());
        if declared_parent != given_parent {
            return Err(ClassError::ParentMismatch {
                class: class_name,
                expected: declared_parent.unwrap_or_else(|| "none".to_string()),
                got: given_parent.unwrap_or_else(|| "none".to_string()),
            });
        }

        let mut vfuncs = BTreeMap::new();
        for (name, body) in self.vfuncs {
            if self.info.find_vfunc(&name).is_none() {
                return Err(ClassError::UnknownVfunc {
                    class: class_name,
                    name,
                });
            }
            vfuncs.insert(name, body);
        }

        let mut interfaces: BTreeMap<String, BTreeMap<String, NativeBody>> = BTreeMap::new();
        for (interface, method, body) in self.qualified {
            let info = self.info.find_interface(&interface).ok_or_else(|| {
                ClassError::UnknownInterface {
                    class: class_name.clone(),
                    interface: interface.clone(),
                }
            })?;
            if info.find_method(&method).is_none() {
                return Err(ClassError::UnknownMethod {
                    class: class_name,
                    method,
                });
            }
            interfaces.entry(interface).or_default().insert(method, body);
        }

        for (method, body) in self.unqualified {
            let mut candidates = Vec::new();
            if self.info.find_vfunc(&method).is_some() {
                candidates.push(Target::Vfunc);
            }
            for iface in self.info.all_interfaces() {
                if iface.find_method(&method).is_some() {
                    candidates.push(Target::Interface(iface.name.clone()));
                }
            }

            let target = match candidates.len() {
                0 => {
                    return Err(ClassError::UnknownMethod {
                        class: class_name,
                        method,
                    })
                }
                1 => candidates.remove(0),
                _ => match self.resolution {
                    OverrideResolution::Error => {
                        return Err(ClassError::AmbiguousOverride {
                            class: class_name.clone(),
                            method,
                            candidates: candidates
                                .iter()
                                .map(|t| match t {
                                    Target::Vfunc => class_name.clone(),
                                    Target::Interface(name) => name.clone(),
                                })
                                .collect(),
                        })
                    }
                    OverrideResolution::LastWins => candidates.pop().unwrap_or(Target::Vfunc),
                },
            };

            match target {
                Target::Vfunc => {
                    vfuncs.insert(method, body);
                }
                Target::Interface(interface) => {
                    interfaces.entry(interface).or_default().insert(method, body);
                }
            }
        }

        Ok(Arc::new(Class {
            info: self.info,
            parent: self.parent,
            vfuncs,
            interfaces,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ArgInfo, CallableInfo, InterfaceInfo, TypeDescriptor};
    use crate::heap::NativeRepr;
    use crate::invoke::native;

    fn body(tag: i64) -> NativeBody {
        native(move |frame| {
            frame.set_return(NativeRepr::I64(tag));
            Ok(())
        })
    }

    fn int8_in(name: &str) -> CallableInfo {
        CallableInfo::new(name).arg(ArgInfo::new("in", TypeDescriptor::int8()))
    }

    fn clash_info() -> Arc<ObjectInfo> {
        let iface = Arc::new(InterfaceInfo::new("Interface").method(int8_in("test_int8_in")));
        let iface2 = Arc::new(InterfaceInfo::new("Interface2").method(int8_in("test_int8_in")));
        Arc::new(
            ObjectInfo::new("Clash")
                .implements(&iface)
                .implements(&iface2),
        )
    }

    #[test]
    fn test_ambiguous_override_rejected_by_default() {
        let err = ClassBuilder::new(&clash_info())
            .method("test_int8_in", body(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClassError::AmbiguousOverride { ref candidates, .. }
            if candidates == &vec!["Interface".to_string(), "Interface2".to_string()]));
    }

    #[test]
    fn test_ambiguous_override_last_wins() {
        let class = ClassBuilder::new(&clash_info())
            .method("test_int8_in", body(1))
            .resolution(OverrideResolution::LastWins)
            .build()
            .unwrap();
        assert!(class.resolve_interface("Interface2", "test_int8_in").is_some());
        assert!(class.resolve_interface("Interface", "test_int8_in").is_none());
    }

    #[test]
    fn test_qualified_override_is_never_ambiguous() {
        let class = ClassBuilder::new(&clash_info())
            .interface_method("Interface", "test_int8_in", body(1))
            .interface_method("Interface2", "test_int8_in", body(2))
            .build()
            .unwrap();
        assert!(class.implements("Interface"));
        assert!(class.implements("Interface2"));
        assert!(class.resolve_interface("Interface", "test_int8_in").is_some());
    }

    #[test]
    fn test_parent_must_match_declaration() {
        let base = Arc::new(ObjectInfo::new("Object"));
        let sub = Arc::new(ObjectInfo::new("SubObject").parent(&base));
        let err = ClassBuilder::new(&sub).build().unwrap_err();
        assert!(matches!(err, ClassError::ParentMismatch { .. }));
    }

    #[test]
    fn test_unknown_vfunc_rejected() {
        let info = Arc::new(ObjectInfo::new("Object"));
        let err = ClassBuilder::new(&info).vfunc("nope", body(0)).build().unwrap_err();
        assert!(matches!(err, ClassError::UnknownVfunc { .. }));
    }

    #[test]
    fn test_inherited_vfunc_resolution() {
        let base_info = Arc::new(ObjectInfo::new("Object").vfunc(CallableInfo::new("overridden_method")));
        let sub_info = Arc::new(ObjectInfo::new("SubObject").parent(&base_info));
        let base = ClassBuilder::new(&base_info)
            .vfunc("overridden_method", body(1))
            .build()
            .unwrap();
        let sub = ClassBuilder::new(&sub_info).parent(&base).build().unwrap();

        assert!(sub.resolve_vfunc("overridden_method").is_some());
        assert!(sub.is_a("Object"));
        assert!(!base.is_a("SubObject"));
    }
}
