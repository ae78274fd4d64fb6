//! Type descriptors - canonical description of every marshallable kind
//!
//! A `TypeDescriptor` is the machine-checkable answer to "what crosses the
//! boundary here": scalar width and signedness, string encoding, enum/flag
//! storage, record layout, container shape and length convention, object and
//! interface identity, callback signature, error domain.
//!
//! Descriptors are immutable and share named sub-descriptors through `Arc`,
//! so the descriptor graph is acyclic by construction (instances may form
//! cycles at runtime, descriptors cannot).

use crate::channel::Quark;
use crate::transfer::{Direction, TransferMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Integer storage width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

/// Integer signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// Floating-point width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatWidth {
    F32,
    F64,
}

/// Linked list flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListKind {
    Singly,
    Doubly,
}

/// How an array's length is known; exactly one applies per descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayLength {
    /// Compile-time length, no length parameter
    Fixed(usize),
    /// Length travels in a separate integer argument of this width
    Param {
        width: IntWidth,
        signedness: Signedness,
    },
    /// Terminated by the element type's zero value, which is not counted
    ZeroTerminated,
}

/// Whether a record crosses the boundary by pointer or embedded by value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    Boxed,
    Inline,
}

/// Lifetime scope of a callback argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallbackScope {
    /// Valid for the duration of the registering call only
    Call,
    /// Valid until the callee releases it; the destroy notifier fires then
    Notified,
    /// Valid until its first invocation
    Async,
}

/// A named member of an enum or flags type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

/// Enum or flags type description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumInfo {
    pub name: String,
    pub width: IntWidth,
    pub signedness: Signedness,
    pub members: Vec<EnumMember>,
}

impl EnumInfo {
    pub fn new(name: &str, members: &[(&str, i64)]) -> Self {
        Self {
            name: name.to_string(),
            width: IntWidth::W32,
            signedness: Signedness::Signed,
            members: members
                .iter()
                .map(|(n, v)| EnumMember {
                    name: n.to_string(),
                    value: *v,
                })
                .collect(),
        }
    }

    pub fn with_storage(mut self, width: IntWidth, signedness: Signedness) -> Self {
        self.width = width;
        self.signedness = signedness;
        self
    }

    pub fn member(&self, value: i64) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.value == value)
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.members.iter().find(|m| m.name == name).map(|m| m.value)
    }

    /// Union of all member bits (flags)
    pub fn mask(&self) -> u64 {
        self.members.iter().fold(0u64, |acc, m| acc | m.value as u64)
    }
}

/// A record field with its own declared transfer
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub transfer: TransferMode,
}

/// Plain structured value, optionally reference counted
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub refcounted: bool,
}

impl RecordInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            refcounted: false,
        }
    }

    pub fn field(mut self, name: &str, ty: TypeDescriptor, transfer: TransferMode) -> Self {
        self.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            transfer,
        });
        self
    }

    pub fn refcounted(mut self) -> Self {
        self.refcounted = true;
        self
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// One argument of a callable
#[derive(Debug, Clone, PartialEq)]
pub struct ArgInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub direction: Direction,
    pub transfer: TransferMode,
    pub nullable: bool,
    /// Index of the argument carrying this array's length
    pub length_arg: Option<usize>,
    /// Out value documented as valid only until the next boundary call
    pub dangling: bool,
    pub scope: Option<CallbackScope>,
}

impl ArgInfo {
    pub fn new(name: &str, ty: TypeDescriptor) -> Self {
        Self {
            name: name.to_string(),
            ty,
            direction: Direction::In,
            transfer: TransferMode::None,
            nullable: false,
            length_arg: None,
            dangling: false,
            scope: None,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn out(self) -> Self {
        self.direction(Direction::OutCalleeAllocates)
    }

    pub fn out_caller_allocates(self) -> Self {
        self.direction(Direction::OutCallerAllocates)
    }

    pub fn inout(self) -> Self {
        self.direction(Direction::InOut)
    }

    pub fn transfer(mut self, transfer: TransferMode) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn length_arg(mut self, index: usize) -> Self {
        self.length_arg = Some(index);
        self
    }

    pub fn dangling(mut self) -> Self {
        self.dangling = true;
        self
    }

    pub fn scope(mut self, scope: CallbackScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Return value of a callable
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnInfo {
    pub ty: TypeDescriptor,
    pub transfer: TransferMode,
    pub nullable: bool,
    pub length_arg: Option<usize>,
}

/// Signature of a function, method, virtual function or callback
#[derive(Debug, Clone, PartialEq)]
pub struct CallableInfo {
    pub name: String,
    pub args: Vec<ArgInfo>,
    pub ret: Option<ReturnInfo>,
    pub throws: bool,
    /// Takes the receiving object as an implicit first host argument
    pub is_method: bool,
}

impl CallableInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            ret: None,
            throws: false,
            is_method: false,
        }
    }

    pub fn arg(mut self, arg: ArgInfo) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor, transfer: TransferMode) -> Self {
        self.ret = Some(ReturnInfo {
            ty,
            transfer,
            nullable: false,
            length_arg: None,
        });
        self
    }

    /// Returned array whose length is written to the given out argument
    pub fn returns_array(mut self, ty: TypeDescriptor, transfer: TransferMode, length_arg: usize) -> Self {
        self.ret = Some(ReturnInfo {
            ty,
            transfer,
            nullable: false,
            length_arg: Some(length_arg),
        });
        self
    }

    pub fn returns_nullable(mut self, ty: TypeDescriptor, transfer: TransferMode) -> Self {
        self.ret = Some(ReturnInfo {
            ty,
            transfer,
            nullable: true,
            length_arg: None,
        });
        self
    }

    pub fn throws(mut self) -> Self {
        self.throws = true;
        self
    }

    pub fn method(mut self) -> Self {
        self.is_method = true;
        self
    }

    /// Indices of arguments that only carry another argument's length
    pub fn length_args(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .args
            .iter()
            .filter_map(|a| a.length_arg)
            .chain(self.ret.iter().filter_map(|r| r.length_arg))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Arguments the host supplies (in and inout, minus length carriers)
    pub fn host_inputs(&self) -> usize {
        let hidden = self.length_args();
        self.args
            .iter()
            .enumerate()
            .filter(|(i, a)| !hidden.contains(i) && a.direction.is_input())
            .count()
    }
}

/// Capability: a named set of methods implementable by any class
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceInfo {
    pub name: String,
    pub methods: Vec<Arc<CallableInfo>>,
}

impl InterfaceInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: CallableInfo) -> Self {
        self.methods.push(Arc::new(method.method()));
        self
    }

    pub fn find_method(&self, name: &str) -> Option<&Arc<CallableInfo>> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Typed property of a class; the instance owns the stored value
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: TypeDescriptor,
}

/// Object class description: single parent link plus capability set
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    pub parent: Option<Arc<ObjectInfo>>,
    pub interfaces: Vec<Arc<InterfaceInfo>>,
    pub vfuncs: Vec<Arc<CallableInfo>>,
    pub properties: Vec<PropertyInfo>,
    /// Constructor yields a floating reference
    pub floating: bool,
}

impl ObjectInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            interfaces: Vec::new(),
            vfuncs: Vec::new(),
            properties: Vec::new(),
            floating: false,
        }
    }

    pub fn parent(mut self, parent: &Arc<ObjectInfo>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    pub fn implements(mut self, iface: &Arc<InterfaceInfo>) -> Self {
        self.interfaces.push(Arc::clone(iface));
        self
    }

    pub fn vfunc(mut self, vfunc: CallableInfo) -> Self {
        self.vfuncs.push(Arc::new(vfunc.method()));
        self
    }

    pub fn property(mut self, name: &str, ty: TypeDescriptor) -> Self {
        self.properties.push(PropertyInfo {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn floating(mut self) -> Self {
        self.floating = true;
        self
    }

    /// This class followed by its ancestors, most derived first
    pub fn lineage(&self) -> Vec<&ObjectInfo> {
        let mut chain = vec![self];
        let mut current = self.parent.as_deref();
        while let Some(info) = current {
            chain.push(info);
            current = info.parent.as_deref();
        }
        chain
    }

    pub fn is_a(&self, name: &str) -> bool {
        self.lineage().iter().any(|info| info.name == name)
    }

    /// Virtual function declared by this class or an ancestor
    pub fn find_vfunc(&self, name: &str) -> Option<&Arc<CallableInfo>> {
        self.lineage()
            .into_iter()
            .find_map(|info| info.vfuncs.iter().find(|v| v.name == name))
    }

    /// Property declared by this class or an ancestor
    pub fn find_property(&self, name: &str) -> Option<&PropertyInfo> {
        self.lineage()
            .into_iter()
            .find_map(|info| info.properties.iter().find(|p| p.name == name))
    }

    /// Interface attached to this class or an ancestor
    pub fn find_interface(&self, name: &str) -> Option<&Arc<InterfaceInfo>> {
        self.lineage()
            .into_iter()
            .find_map(|info| info.interfaces.iter().find(|i| i.name == name))
    }

    /// All interfaces in declaration order, ancestors first
    pub fn all_interfaces(&self) -> Vec<&Arc<InterfaceInfo>> {
        let mut out: Vec<&Arc<InterfaceInfo>> = Vec::new();
        for info in self.lineage().into_iter().rev() {
            for iface in &info.interfaces {
                if !out.iter().any(|i| i.name == iface.name) {
                    out.push(iface);
                }
            }
        }
        out
    }
}

/// Function value type
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackInfo {
    pub name: String,
    pub signature: CallableInfo,
}

impl CallbackInfo {
    pub fn new(signature: CallableInfo) -> Self {
        Self {
            name: signature.name.clone(),
            signature,
        }
    }
}

/// Error domain with its code enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDomainInfo {
    pub domain: Quark,
    pub codes: Arc<EnumInfo>,
}

/// Canonical description of a marshallable kind
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Void,
    Boolean,
    Int {
        width: IntWidth,
        signedness: Signedness,
    },
    Float(FloatWidth),
    Utf8,
    Enum(Arc<EnumInfo>),
    Flags(Arc<EnumInfo>),
    Record(Arc<RecordInfo>, Storage),
    Array {
        element: Box<TypeDescriptor>,
        length: ArrayLength,
    },
    List {
        element: Box<TypeDescriptor>,
        kind: ListKind,
    },
    Map {
        key: Box<TypeDescriptor>,
        value: Box<TypeDescriptor>,
    },
    Object(Arc<ObjectInfo>),
    Interface(Arc<InterfaceInfo>),
    Callback(Arc<CallbackInfo>),
    /// Error value; `None` accepts any domain
    Error(Option<Arc<ErrorDomainInfo>>),
    /// Runtime type identifier, passed as a word
    GType,
}

macro_rules! int_ctor {
    ($name:ident, $width:ident, $sign:ident) => {
        pub fn $name() -> Self {
            TypeDescriptor::Int {
                width: IntWidth::$width,
                signedness: Signedness::$sign,
            }
        }
    };
}

impl TypeDescriptor {
    int_ctor!(int8, W8, Signed);
    int_ctor!(uint8, W8, Unsigned);
    int_ctor!(int16, W16, Signed);
    int_ctor!(uint16, W16, Unsigned);
    int_ctor!(int32, W32, Signed);
    int_ctor!(uint32, W32, Unsigned);
    int_ctor!(int64, W64, Signed);
    int_ctor!(uint64, W64, Unsigned);

    pub fn float() -> Self {
        TypeDescriptor::Float(FloatWidth::F32)
    }

    pub fn double() -> Self {
        TypeDescriptor::Float(FloatWidth::F64)
    }

    pub fn array(element: TypeDescriptor, length: ArrayLength) -> Self {
        TypeDescriptor::Array {
            element: Box::new(element),
            length,
        }
    }

    pub fn fixed_array(element: TypeDescriptor, len: usize) -> Self {
        Self::array(element, ArrayLength::Fixed(len))
    }

    pub fn zero_terminated(element: TypeDescriptor) -> Self {
        Self::array(element, ArrayLength::ZeroTerminated)
    }

    pub fn length_array(element: TypeDescriptor, width: IntWidth, signedness: Signedness) -> Self {
        Self::array(element, ArrayLength::Param { width, signedness })
    }

    pub fn list(element: TypeDescriptor) -> Self {
        TypeDescriptor::List {
            element: Box::new(element),
            kind: ListKind::Doubly,
        }
    }

    pub fn slist(element: TypeDescriptor) -> Self {
        TypeDescriptor::List {
            element: Box::new(element),
            kind: ListKind::Singly,
        }
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn boxed(info: &Arc<RecordInfo>) -> Self {
        TypeDescriptor::Record(Arc::clone(info), Storage::Boxed)
    }

    pub fn inline(info: &Arc<RecordInfo>) -> Self {
        TypeDescriptor::Record(Arc::clone(info), Storage::Inline)
    }

    /// Crosses the boundary as a pointer (and therefore has an owner)
    pub fn is_pointer(&self) -> bool {
        match self {
            TypeDescriptor::Void
            | TypeDescriptor::Boolean
            | TypeDescriptor::GType
            | TypeDescriptor::Int { .. }
            | TypeDescriptor::Float(_)
            | TypeDescriptor::Enum(_)
            | TypeDescriptor::Flags(_) => false,
            TypeDescriptor::Record(_, storage) => *storage == Storage::Boxed,
            _ => true,
        }
    }

    /// Has a skeleton distinct from its elements
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Array { .. } | TypeDescriptor::List { .. } | TypeDescriptor::Map { .. }
        )
    }

    /// Types whose ownership is a reference count rather than a block
    pub fn is_refcounted(&self) -> bool {
        match self {
            TypeDescriptor::Object(_) | TypeDescriptor::Interface(_) => true,
            TypeDescriptor::Record(info, Storage::Boxed) => info.refcounted,
            _ => false,
        }
    }

    /// Direct child descriptors (elements, keys/values, fields)
    pub fn children(&self) -> Vec<&TypeDescriptor> {
        match self {
            TypeDescriptor::Array { element, .. } | TypeDescriptor::List { element, .. } => {
                vec![element.as_ref()]
            }
            TypeDescriptor::Map { key, value } => vec![key.as_ref(), value.as_ref()],
            TypeDescriptor::Record(info, _) => info.fields.iter().map(|f| &f.ty).collect(),
            _ => Vec::new(),
        }
    }

    /// Short display name
    pub fn name(&self) -> String {
        self.to_string()
    }
}

fn int_name(width: IntWidth, signedness: Signedness) -> String {
    match signedness {
        Signedness::Signed => format!("int{}", width.bits()),
        Signedness::Unsigned => format!("uint{}", width.bits()),
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Void => write!(f, "void"),
            TypeDescriptor::Boolean => write!(f, "boolean"),
            TypeDescriptor::Int { width, signedness } => {
                write!(f, "{}", int_name(*width, *signedness))
            }
            TypeDescriptor::Float(FloatWidth::F32) => write!(f, "float"),
            TypeDescriptor::Float(FloatWidth::F64) => write!(f, "double"),
            TypeDescriptor::Utf8 => write!(f, "utf8"),
            TypeDescriptor::Enum(info) => write!(f, "enum {}", info.name),
            TypeDescriptor::Flags(info) => write!(f, "flags {}", info.name),
            TypeDescriptor::Record(info, Storage::Boxed) => write!(f, "{}*", info.name),
            TypeDescriptor::Record(info, Storage::Inline) => write!(f, "{}", info.name),
            TypeDescriptor::Array { element, length } => match length {
                ArrayLength::Fixed(n) => write!(f, "{}[{}]", element, n),
                ArrayLength::Param { width, signedness } => {
                    write!(f, "{}[length: {}]", element, int_name(*width, *signedness))
                }
                ArrayLength::ZeroTerminated => write!(f, "{}[zero-terminated]", element),
            },
            TypeDescriptor::List { element, kind } => match kind {
                ListKind::Singly => write!(f, "slist<{}>", element),
                ListKind::Doubly => write!(f, "list<{}>", element),
            },
            TypeDescriptor::Map { key, value } => write!(f, "map<{}, {}>", key, value),
            TypeDescriptor::Object(info) => write!(f, "object {}", info.name),
            TypeDescriptor::Interface(info) => write!(f, "interface {}", info.name),
            TypeDescriptor::Callback(info) => write!(f, "callback {}", info.name),
            TypeDescriptor::Error(Some(domain)) => write!(f, "error {}", domain.domain),
            TypeDescriptor::Error(None) => write!(f, "error"),
            TypeDescriptor::GType => write!(f, "gtype"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_classification() {
        assert!(!TypeDescriptor::int32().is_pointer());
        assert!(!TypeDescriptor::double().is_pointer());
        assert!(TypeDescriptor::Utf8.is_pointer());
        assert!(TypeDescriptor::list(TypeDescriptor::Utf8).is_pointer());

        let simple = Arc::new(RecordInfo::new("SimpleStruct").field(
            "long_",
            TypeDescriptor::int64(),
            TransferMode::None,
        ));
        assert!(TypeDescriptor::boxed(&simple).is_pointer());
        assert!(!TypeDescriptor::inline(&simple).is_pointer());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(TypeDescriptor::uint8().to_string(), "uint8");
        assert_eq!(
            TypeDescriptor::zero_terminated(TypeDescriptor::Utf8).to_string(),
            "utf8[zero-terminated]"
        );
        assert_eq!(
            TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W8, Signedness::Unsigned)
                .to_string(),
            "int32[length: uint8]"
        );
        assert_eq!(
            TypeDescriptor::map(TypeDescriptor::Utf8, TypeDescriptor::int32()).to_string(),
            "map<utf8, int32>"
        );
    }

    #[test]
    fn test_lineage_and_vfunc_lookup() {
        let base = Arc::new(ObjectInfo::new("Object").vfunc(CallableInfo::new("method_int8_in")));
        let sub = Arc::new(ObjectInfo::new("SubObject").parent(&base));
        let subsub = ObjectInfo::new("SubSubObject").parent(&sub);

        let names: Vec<&str> = subsub.lineage().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["SubSubObject", "SubObject", "Object"]);
        assert!(subsub.is_a("Object"));
        assert!(!base.is_a("SubObject"));
        assert!(subsub.find_vfunc("method_int8_in").is_some());
    }

    #[test]
    fn test_property_lookup_follows_lineage() {
        let base = Arc::new(ObjectInfo::new("Base").property("some-int", TypeDescriptor::int32()));
        let sub = ObjectInfo::new("Sub")
            .parent(&base)
            .property("some-string", TypeDescriptor::Utf8);

        assert_eq!(sub.find_property("some-int").map(|p| &p.ty), Some(&TypeDescriptor::int32()));
        assert!(sub.find_property("some-string").is_some());
        assert!(base.find_property("some-string").is_none());
    }

    #[test]
    fn test_length_args_hidden_from_host() {
        let info = CallableInfo::new("array_in")
            .arg(
                ArgInfo::new(
                    "ints",
                    TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W32, Signedness::Signed),
                )
                .length_arg(1),
            )
            .arg(ArgInfo::new("length", TypeDescriptor::int32()));
        assert_eq!(info.length_args(), vec![1]);
        assert_eq!(info.host_inputs(), 1);
    }

    #[test]
    fn test_flags_mask() {
        let flags = EnumInfo::new("Flags", &[("VALUE1", 1), ("VALUE2", 2), ("VALUE3", 4)]);
        assert_eq!(flags.mask(), 7);
        assert_eq!(flags.value_of("VALUE2"), Some(2));
        assert!(flags.member(8).is_none());
    }
}
