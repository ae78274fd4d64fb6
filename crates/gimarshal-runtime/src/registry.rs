//! Type descriptor registry and native library
//!
//! The registry is the metadata table the boundary consumes: every named
//! enum, flags, record, interface, object, callback and error domain.
//! Objects may only name parents and interfaces that are already
//! registered, so the descriptor graph stays acyclic.
//!
//! A `Library` pairs the registry with native function bodies and runtime
//! classes. Registering a function validates its signature first.

use crate::descriptor::{
    ArrayLength, CallableInfo, CallbackInfo, EnumInfo, ErrorDomainInfo, IntWidth, InterfaceInfo,
    ObjectInfo, RecordInfo, Signedness, TypeDescriptor,
};
use crate::error::RegistryError;
use crate::invoke::{NativeBody, NativeFunction};
use crate::object::Class;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named entry in the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegisteredType {
    Enum(Arc<EnumInfo>),
    Flags(Arc<EnumInfo>),
    Record(Arc<RecordInfo>),
    Interface(Arc<InterfaceInfo>),
    Object(Arc<ObjectInfo>),
    Callback(Arc<CallbackInfo>),
    ErrorDomain(Arc<ErrorDomainInfo>),
}

impl RegisteredType {
    pub fn kind(&self) -> &'static str {
        match self {
            RegisteredType::Enum(_) => "enum",
            RegisteredType::Flags(_) => "flags",
            RegisteredType::Record(_) => "record",
            RegisteredType::Interface(_) => "interface",
            RegisteredType::Object(_) => "object",
            RegisteredType::Callback(_) => "callback",
            RegisteredType::ErrorDomain(_) => "error-domain",
        }
    }
}

fn write_signature(f: &mut fmt::Formatter<'_>, info: &CallableInfo) -> fmt::Result {
    write!(f, "{}(", info.name)?;
    for (i, arg) in info.args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(
            f,
            "{} {}: {} [{}]",
            arg.direction, arg.name, arg.ty, arg.transfer
        )?;
    }
    write!(f, ")")?;
    if let Some(ret) = &info.ret {
        write!(f, " -> {} [{}]", ret.ty, ret.transfer)?;
    }
    if info.throws {
        write!(f, " throws")?;
    }
    Ok(())
}

impl fmt::Display for CallableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_signature(f, self)
    }
}

impl fmt::Display for RegisteredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisteredType::Enum(info) | RegisteredType::Flags(info) => {
                writeln!(f, "{} {}", self.kind(), info.name)?;
                for member in &info.members {
                    writeln!(f, "  {} = {}", member.name, member.value)?;
                }
                Ok(())
            }
            RegisteredType::Record(info) => {
                let refcounted = if info.refcounted { " (refcounted)" } else { "" };
                writeln!(f, "record {}{}", info.name, refcounted)?;
                for field in &info.fields {
                    writeln!(f, "  {}: {} [{}]", field.name, field.ty, field.transfer)?;
                }
                Ok(())
            }
            RegisteredType::Interface(info) => {
                writeln!(f, "interface {}", info.name)?;
                for method in &info.methods {
                    write!(f, "  ")?;
                    write_signature(f, method)?;
                    writeln!(f)?;
                }
                Ok(())
            }
            RegisteredType::Object(info) => {
                write!(f, "object {}", info.name)?;
                if let Some(parent) = &info.parent {
                    write!(f, " : {}", parent.name)?;
                }
                if info.floating {
                    write!(f, " (floating)")?;
                }
                writeln!(f)?;
                for iface in &info.interfaces {
                    writeln!(f, "  implements {}", iface.name)?;
                }
                for property in &info.properties {
                    writeln!(f, "  property {}: {}", property.name, property.ty)?;
                }
                for vfunc in &info.vfuncs {
                    write!(f, "  vfunc ")?;
                    write_signature(f, vfunc)?;
                    writeln!(f)?;
                }
                Ok(())
            }
            RegisteredType::Callback(info) => {
                write!(f, "callback ")?;
                write_signature(f, &info.signature)?;
                writeln!(f)
            }
            RegisteredType::ErrorDomain(info) => {
                writeln!(f, "error-domain {} (codes: {})", info.domain, info.codes.name)
            }
        }
    }
}

/// Named descriptor table
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<String, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, entry: RegisteredType) -> Result<(), RegistryError> {
        if self.types.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.types.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn register_enum(&mut self, info: EnumInfo) -> Result<Arc<EnumInfo>, RegistryError> {
        let info = Arc::new(info);
        self.insert(&info.name, RegisteredType::Enum(Arc::clone(&info)))?;
        Ok(info)
    }

    pub fn register_flags(&mut self, info: EnumInfo) -> Result<Arc<EnumInfo>, RegistryError> {
        let info = Arc::new(info);
        self.insert(&info.name, RegisteredType::Flags(Arc::clone(&info)))?;
        Ok(info)
    }

    pub fn register_record(&mut self, info: RecordInfo) -> Result<Arc<RecordInfo>, RegistryError> {
        for field in &info.fields {
            if !field.transfer.applies_to(&field.ty) {
                return Err(RegistryError::ContainerTransferOnLeaf {
                    callable: info.name.clone(),
                    arg: field.name.clone(),
                    ty: field.ty.to_string(),
                });
            }
        }
        let info = Arc::new(info);
        self.insert(&info.name, RegisteredType::Record(Arc::clone(&info)))?;
        Ok(info)
    }

    pub fn register_interface(
        &mut self,
        info: InterfaceInfo,
    ) -> Result<Arc<InterfaceInfo>, RegistryError> {
        for method in &info.methods {
            self.validate_callable(method)?;
        }
        let info = Arc::new(info);
        self.insert(&info.name, RegisteredType::Interface(Arc::clone(&info)))?;
        Ok(info)
    }

    /// Register an object; its parent and interfaces must already be known
    pub fn register_object(&mut self, info: ObjectInfo) -> Result<Arc<ObjectInfo>, RegistryError> {
        if let Some(parent) = &info.parent {
            if !matches!(self.types.get(&parent.name), Some(RegisteredType::Object(_))) {
                return Err(RegistryError::UnknownParent {
                    name: info.name.clone(),
                    parent: parent.name.clone(),
                });
            }
        }
        for iface in &info.interfaces {
            if !matches!(self.types.get(&iface.name), Some(RegisteredType::Interface(_))) {
                return Err(RegistryError::UnknownInterface {
                    name: info.name.clone(),
                    interface: iface.name.clone(),
                });
            }
        }
        for vfunc in &info.vfuncs {
            self.validate_callable(vfunc)?;
        }
        let info = Arc::new(info);
        self.insert(&info.name, RegisteredType::Object(Arc::clone(&info)))?;
        Ok(info)
    }

    pub fn register_callback(&mut self, info: CallbackInfo) -> Result<Arc<CallbackInfo>, RegistryError> {
        self.validate_callable(&info.signature)?;
        let info = Arc::new(info);
        self.insert(&info.name, RegisteredType::Callback(Arc::clone(&info)))?;
        Ok(info)
    }

    pub fn register_error_domain(
        &mut self,
        info: ErrorDomainInfo,
    ) -> Result<Arc<ErrorDomainInfo>, RegistryError> {
        let info = Arc::new(info);
        let name = info.domain.to_string();
        self.insert(&name, RegisteredType::ErrorDomain(Arc::clone(&info)))?;
        Ok(info)
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredType> {
        self.types.get(name)
    }

    pub fn object(&self, name: &str) -> Result<Arc<ObjectInfo>, RegistryError> {
        match self.types.get(name) {
            Some(RegisteredType::Object(info)) => Ok(Arc::clone(info)),
            _ => Err(RegistryError::UnknownType(name.to_string())),
        }
    }

    /// Descriptor for a type spelling
    ///
    /// Accepts the scalar names, `utf8`, `error`, registered names (records
    /// resolve to their boxed form), `list<T>`, `slist<T>`, `map<K, V>` and
    /// array suffixes: `T[N]` fixed, `T[]` zero-terminated, `T[length]`
    /// with an `int32` length parameter.
    pub fn descriptor(&self, spelling: &str) -> Result<TypeDescriptor, RegistryError> {
        let spelling = spelling.trim();
        let unknown = || RegistryError::UnknownType(spelling.to_string());

        if let Some(stripped) = spelling.strip_suffix(']') {
            let open = stripped.rfind('[').ok_or_else(unknown)?;
            let element = self.descriptor(&stripped[..open])?;
            let length = match stripped[open + 1..].trim() {
                "" => ArrayLength::ZeroTerminated,
                "length" => ArrayLength::Param {
                    width: IntWidth::W32,
                    signedness: Signedness::Signed,
                },
                n => ArrayLength::Fixed(n.parse().map_err(|_| unknown())?),
            };
            return Ok(TypeDescriptor::array(element, length));
        }
        if let Some(inner) = generic_args(spelling, "list") {
            return Ok(TypeDescriptor::list(self.descriptor(inner)?));
        }
        if let Some(inner) = generic_args(spelling, "slist") {
            return Ok(TypeDescriptor::slist(self.descriptor(inner)?));
        }
        if let Some(inner) = generic_args(spelling, "map") {
            let (key, value) = inner.split_once(',').ok_or_else(unknown)?;
            return Ok(TypeDescriptor::map(self.descriptor(key)?, self.descriptor(value)?));
        }

        let builtin = match spelling {
            "void" => Some(TypeDescriptor::Void),
            "boolean" => Some(TypeDescriptor::Boolean),
            "int8" => Some(TypeDescriptor::int8()),
            "uint8" => Some(TypeDescriptor::uint8()),
            "int16" => Some(TypeDescriptor::int16()),
            "uint16" => Some(TypeDescriptor::uint16()),
            "int32" => Some(TypeDescriptor::int32()),
            "uint32" => Some(TypeDescriptor::uint32()),
            "int64" => Some(TypeDescriptor::int64()),
            "uint64" => Some(TypeDescriptor::uint64()),
            "float" => Some(TypeDescriptor::float()),
            "double" => Some(TypeDescriptor::double()),
            "utf8" => Some(TypeDescriptor::Utf8),
            "error" => Some(TypeDescriptor::Error(None)),
            "gtype" => Some(TypeDescriptor::GType),
            _ => None,
        };
        if let Some(ty) = builtin {
            return Ok(ty);
        }

        match self.lookup(spelling).ok_or_else(unknown)? {
            RegisteredType::Enum(info) => Ok(TypeDescriptor::Enum(Arc::clone(info))),
            RegisteredType::Flags(info) => Ok(TypeDescriptor::Flags(Arc::clone(info))),
            RegisteredType::Record(info) => Ok(TypeDescriptor::boxed(info)),
            RegisteredType::Interface(info) => Ok(TypeDescriptor::Interface(Arc::clone(info))),
            RegisteredType::Object(info) => Ok(TypeDescriptor::Object(Arc::clone(info))),
            RegisteredType::Callback(info) => Ok(TypeDescriptor::Callback(Arc::clone(info))),
            RegisteredType::ErrorDomain(info) => Ok(TypeDescriptor::Error(Some(Arc::clone(info)))),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Check transfer declarations and length linkage of a signature
    pub fn validate_callable(&self, info: &CallableInfo) -> Result<(), RegistryError> {
        let length_is_int = |index: usize| {
            info.args
                .get(index)
                .map_or(false, |a| matches!(a.ty, TypeDescriptor::Int { .. }))
        };

        for arg in &info.args {
            if !arg.transfer.applies_to(&arg.ty) {
                return Err(RegistryError::ContainerTransferOnLeaf {
                    callable: info.name.clone(),
                    arg: arg.name.clone(),
                    ty: arg.ty.to_string(),
                });
            }
            if let Some(index) = arg.length_arg {
                let takes_length = matches!(
                    arg.ty,
                    TypeDescriptor::Array {
                        length: ArrayLength::Param { .. },
                        ..
                    }
                );
                if !takes_length || !length_is_int(index) {
                    return Err(RegistryError::BadLengthArg {
                        callable: info.name.clone(),
                        arg: arg.name.clone(),
                        index,
                    });
                }
            }
        }

        if let Some(ret) = &info.ret {
            if !ret.transfer.applies_to(&ret.ty) {
                return Err(RegistryError::ContainerTransferOnLeaf {
                    callable: info.name.clone(),
                    arg: "return".to_string(),
                    ty: ret.ty.to_string(),
                });
            }
            if let Some(index) = ret.length_arg {
                if !length_is_int(index) {
                    return Err(RegistryError::BadLengthArg {
                        callable: info.name.clone(),
                        arg: "return".to_string(),
                        index,
                    });
                }
            }
        }
        Ok(())
    }
}

/// `name<args>` to `args`
fn generic_args<'a>(spelling: &'a str, name: &str) -> Option<&'a str> {
    spelling
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

/// Registry plus native implementations
#[derive(Debug, Default)]
pub struct Library {
    registry: TypeRegistry,
    functions: BTreeMap<String, NativeFunction>,
    classes: BTreeMap<String, Arc<Class>>,
}

impl Library {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            functions: BTreeMap::new(),
            classes: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn register_function(&mut self, info: CallableInfo, body: NativeBody) -> Result<(), RegistryError> {
        self.registry.validate_callable(&info)?;
        if self.functions.contains_key(&info.name) {
            return Err(RegistryError::Duplicate(info.name));
        }
        let info = Arc::new(info);
        self.functions
            .insert(info.name.clone(), NativeFunction { info, body });
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.get(name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Register the runtime class of a registered object type
    pub fn register_class(&mut self, class: Arc<Class>) -> Result<(), RegistryError> {
        let name = class.name().to_string();
        self.registry.object(&name)?;
        if self.classes.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.classes.insert(name, class);
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&Arc<Class>> {
        self.classes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ArgInfo;
    use crate::transfer::TransferMode;

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = TypeRegistry::new();
        registry
            .register_enum(EnumInfo::new("Enum", &[("VALUE1", 0)]))
            .unwrap();
        assert_eq!(
            registry.register_flags(EnumInfo::new("Enum", &[("VALUE1", 1)])),
            Err(RegistryError::Duplicate("Enum".to_string()))
        );
    }

    #[test]
    fn test_parent_must_be_registered_first() {
        let mut registry = TypeRegistry::new();
        let base = Arc::new(ObjectInfo::new("Object"));
        let err = registry
            .register_object(ObjectInfo::new("SubObject").parent(&base))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParent { .. }));

        let base = registry.register_object(ObjectInfo::new("Object")).unwrap();
        assert!(registry
            .register_object(ObjectInfo::new("SubObject").parent(&base))
            .is_ok());
    }

    #[test]
    fn test_container_transfer_on_leaf_rejected() {
        let registry = TypeRegistry::new();
        let info = CallableInfo::new("utf8_container_in")
            .arg(ArgInfo::new("utf8", TypeDescriptor::Utf8).transfer(TransferMode::Container));
        assert!(matches!(
            registry.validate_callable(&info),
            Err(RegistryError::ContainerTransferOnLeaf { .. })
        ));
    }

    #[test]
    fn test_length_arg_must_be_integer() {
        let registry = TypeRegistry::new();
        let ints = TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W32, Signedness::Signed);
        let bad = CallableInfo::new("array_in")
            .arg(ArgInfo::new("ints", ints.clone()).length_arg(1))
            .arg(ArgInfo::new("length", TypeDescriptor::Utf8));
        assert!(matches!(
            registry.validate_callable(&bad),
            Err(RegistryError::BadLengthArg { index: 1, .. })
        ));

        let good = CallableInfo::new("array_in")
            .arg(ArgInfo::new("ints", ints).length_arg(1))
            .arg(ArgInfo::new("length", TypeDescriptor::int32()));
        assert!(registry.validate_callable(&good).is_ok());
    }

    #[test]
    fn test_describe_object() {
        let mut registry = TypeRegistry::new();
        let iface = registry.register_interface(InterfaceInfo::new("Interface")).unwrap();
        registry
            .register_object(ObjectInfo::new("Object").implements(&iface).floating())
            .unwrap();
        let text = registry.lookup("Object").unwrap().to_string();
        assert!(text.starts_with("object Object (floating)"));
        assert!(text.contains("implements Interface"));
    }

    #[test]
    fn test_type_spellings() {
        let mut registry = TypeRegistry::new();
        registry.register_record(RecordInfo::new("BoxedStruct")).unwrap();

        let utf8_array = registry.descriptor("utf8[]").unwrap();
        assert_eq!(utf8_array, TypeDescriptor::zero_terminated(TypeDescriptor::Utf8));
        assert_eq!(
            registry.descriptor("int32[4]").unwrap(),
            TypeDescriptor::fixed_array(TypeDescriptor::int32(), 4)
        );
        assert_eq!(
            registry.descriptor("map<utf8, list<int32>>").unwrap().to_string(),
            "map<utf8, list<int32>>"
        );
        assert_eq!(registry.descriptor("BoxedStruct").unwrap().to_string(), "BoxedStruct*");
        assert_eq!(
            registry.descriptor("Missing"),
            Err(RegistryError::UnknownType("Missing".to_string()))
        );
    }
}
