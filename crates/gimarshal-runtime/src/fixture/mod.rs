//! Native fixture library
//!
//! A native library covering the marshalling matrix: every scalar width,
//! strings, arrays of each length convention, lists, maps, records, objects,
//! interfaces, callbacks and errors, crossing in every direction and with
//! every transfer mode that makes sense for the type.
//!
//! Each function checks the exact values it expects, produces exact values,
//! and frees whatever its declared transfer leaves it responsible for. A
//! failed check is raised through the error channel in the
//! `gimarshal-fixture-assertion` domain.

mod arrays;
mod callbacks;
mod collections;
mod errors;
mod objects;
mod records;
mod scalars;
mod strings;

use crate::channel::{NativeError, Quark};
use crate::descriptor::{
    ArgInfo, CallableInfo, EnumInfo, ErrorDomainInfo, InterfaceInfo, ObjectInfo, RecordInfo,
    TypeDescriptor,
};
use crate::error::{CallError, RegistryError};
use crate::heap::{Block, NativeRepr};
use crate::invoke::Frame;
use crate::registry::{Library, TypeRegistry};
use crate::transfer::TransferMode;
use crate::object::ObjectId;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

pub use objects::host_subclass;

pub const CONSTANT_NUMBER: i64 = 42;
pub const CONSTANT_UTF8: &str = "const \u{2665} utf8";
pub const ERROR_DOMAIN: &str = "gi-marshalling-tests-gerror-domain";
pub const SECOND_ERROR_DOMAIN: &str = "gi-marshalling-tests-second-domain";
pub const ERROR_CODE: i32 = 5;
pub const ERROR_MESSAGE: &str = "gi-marshalling-tests-gerror-message";
pub const ERROR_DEBUG: &str = "we got an error, life is shit";
pub const ASSERTION_DOMAIN: &str = "gimarshal-fixture-assertion";

static LIBRARY: OnceLock<Result<Arc<Library>, RegistryError>> = OnceLock::new();

/// The fixture library, built once per process
pub fn library() -> Result<Arc<Library>, RegistryError> {
    LIBRARY.get_or_init(build).clone()
}

fn build() -> Result<Arc<Library>, RegistryError> {
    let mut registry = TypeRegistry::new();
    let types = Types::register(&mut registry)?;
    let mut library = Library::new(registry);
    scalars::register(&mut library, &types)?;
    strings::register(&mut library)?;
    arrays::register(&mut library, &types)?;
    collections::register(&mut library)?;
    records::register(&mut library, &types)?;
    objects::register(&mut library, &types)?;
    callbacks::register(&mut library, &types)?;
    errors::register(&mut library, &types)?;
    Ok(Arc::new(library))
}

/// Named types shared by the fixture's functions
pub(crate) struct Types {
    pub enum_: Arc<EnumInfo>,
    pub flags: Arc<EnumInfo>,
    pub simple_struct: Arc<RecordInfo>,
    pub boxed_struct: Arc<RecordInfo>,
    pub shared_struct: Arc<RecordInfo>,
    pub base: Arc<ObjectInfo>,
    pub object: Arc<ObjectInfo>,
    pub sub_object: Arc<ObjectInfo>,
    pub sub_sub_object: Arc<ObjectInfo>,
    pub interface: Arc<InterfaceInfo>,
    pub interface2: Arc<InterfaceInfo>,
    pub interface_impl: Arc<ObjectInfo>,
    pub clash: Arc<ObjectInfo>,
    pub properties_object: Arc<ObjectInfo>,
    pub error_domain: Arc<ErrorDomainInfo>,
    pub second_domain: Arc<ErrorDomainInfo>,
}

impl Types {
    fn register(registry: &mut TypeRegistry) -> Result<Self, RegistryError> {
        let enum_ = registry.register_enum(EnumInfo::new(
            "Enum",
            &[("VALUE1", 0), ("VALUE2", 1), ("VALUE3", 42)],
        ))?;
        let flags = registry.register_flags(EnumInfo::new(
            "Flags",
            &[("VALUE1", 1), ("VALUE2", 2), ("VALUE3", 4)],
        ))?;

        let simple_struct = registry.register_record(
            RecordInfo::new("SimpleStruct")
                .field("long_", TypeDescriptor::int64(), TransferMode::None)
                .field("int8", TypeDescriptor::int8(), TransferMode::None),
        )?;
        let boxed_struct = registry.register_record(
            RecordInfo::new("BoxedStruct")
                .field("long_", TypeDescriptor::int64(), TransferMode::None)
                .field("string_", TypeDescriptor::Utf8, TransferMode::Full),
        )?;
        let shared_struct = registry.register_record(
            RecordInfo::new("SharedStruct")
                .field("long_", TypeDescriptor::int64(), TransferMode::None)
                .refcounted(),
        )?;

        let base = registry.register_object(ObjectInfo::new("Base"))?;
        let object = registry.register_object(objects::object_info(&base))?;
        let sub_object = registry.register_object(
            ObjectInfo::new("SubObject")
                .parent(&object)
                .vfunc(CallableInfo::new("sub_method")),
        )?;
        let sub_sub_object =
            registry.register_object(ObjectInfo::new("SubSubObject").parent(&sub_object))?;

        let test_int8_in = || CallableInfo::new("test_int8_in").arg(ArgInfo::new("in", TypeDescriptor::int8()));
        let interface = registry.register_interface(InterfaceInfo::new("Interface").method(test_int8_in()))?;
        let interface2 = registry.register_interface(InterfaceInfo::new("Interface2").method(test_int8_in()))?;
        let interface_impl = registry.register_object(
            ObjectInfo::new("InterfaceImpl")
                .parent(&base)
                .implements(&interface),
        )?;
        let clash = registry.register_object(
            ObjectInfo::new("Clash")
                .parent(&base)
                .implements(&interface)
                .implements(&interface2),
        )?;
        let properties_object = registry.register_object(
            ObjectInfo::new("PropertiesObject")
                .parent(&base)
                .property("some_boolean", TypeDescriptor::Boolean)
                .property("some_char", TypeDescriptor::int8())
                .property("some_uchar", TypeDescriptor::uint8())
                .property("some_int", TypeDescriptor::int32())
                .property("some_uint", TypeDescriptor::uint32())
                .property("some_long", TypeDescriptor::int64())
                .property("some_ulong", TypeDescriptor::uint64())
                .property("some_int64", TypeDescriptor::int64())
                .property("some_uint64", TypeDescriptor::uint64())
                .property("some_float", TypeDescriptor::float())
                .property("some_double", TypeDescriptor::double())
                .property("some_strv", TypeDescriptor::zero_terminated(TypeDescriptor::Utf8))
                .property("some_boxed_struct", TypeDescriptor::boxed(&boxed_struct))
                .property("some_boxed_glist", TypeDescriptor::list(TypeDescriptor::int32()))
                .property("some_gtype", TypeDescriptor::GType)
                .property("some_object", TypeDescriptor::Object(Arc::clone(&base))),
        )?;

        let codes = Arc::new(EnumInfo::new("ErrorCode", &[("GERROR_CODE", ERROR_CODE as i64)]));
        let error_domain = registry.register_error_domain(ErrorDomainInfo {
            domain: Quark::new(ERROR_DOMAIN),
            codes: Arc::clone(&codes),
        })?;
        let second_domain = registry.register_error_domain(ErrorDomainInfo {
            domain: Quark::new(SECOND_ERROR_DOMAIN),
            codes,
        })?;

        Ok(Self {
            enum_,
            flags,
            simple_struct,
            boxed_struct,
            shared_struct,
            base,
            object,
            sub_object,
            sub_sub_object,
            interface,
            interface2,
            interface_impl,
            clash,
            properties_object,
            error_domain,
            second_domain,
        })
    }
}

/// Failed expectation inside a fixture body
pub(crate) fn fail(message: String) -> CallError {
    CallError::Domain(NativeError::new(&Quark::new(ASSERTION_DOMAIN), 0, message))
}

pub(crate) fn expect<T: PartialEq + Debug + ?Sized>(what: &str, got: &T, want: &T) -> Result<(), CallError> {
    if got == want {
        Ok(())
    } else {
        Err(fail(format!("{}: expected {:?}, got {:?}", what, want, got)))
    }
}

/// Element slots of an array, list or map block (keys and values interleaved)
pub(crate) fn items(block: &Block) -> Vec<NativeRepr> {
    match block {
        Block::Array(items) | Block::List { items, .. } => items.clone(),
        Block::Map(pairs) => pairs
            .iter()
            .flat_map(|(k, v)| [k.clone(), v.clone()])
            .collect(),
        Block::Record { fields, .. } => fields.clone(),
        _ => Vec::new(),
    }
}

pub(crate) fn ints_of(block: &Block) -> Result<Vec<i64>, CallError> {
    items(block)
        .iter()
        .map(|repr| {
            repr.as_i64()
                .ok_or_else(|| fail(format!("expected an integer element, got {:?}", repr)))
        })
        .collect()
}

/// String elements, stopping at a null terminator
pub(crate) fn strings_of(frame: &Frame<'_>, block: &Block) -> Result<Vec<String>, CallError> {
    items(block)
        .iter()
        .take_while(|repr| !repr.is_null())
        .map(|repr| frame.read_utf8(repr))
        .collect()
}

/// Pairs of a string-to-string map
pub(crate) fn string_pairs(frame: &Frame<'_>, block: &Block) -> Result<Vec<(String, String)>, CallError> {
    match block {
        Block::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| Ok((frame.read_utf8(k)?, frame.read_utf8(v)?)))
            .collect(),
        other => Err(fail(format!("expected a map, got {}", other.kind()))),
    }
}

pub(crate) fn static_strings(frame: &mut Frame<'_>, values: &[&str]) -> Vec<NativeRepr> {
    values.iter().map(|s| frame.constant_utf8(s)).collect()
}

pub(crate) fn new_strings(frame: &mut Frame<'_>, values: &[&str]) -> Vec<NativeRepr> {
    values.iter().map(|s| frame.new_utf8(s)).collect()
}

/// Free a native-owned value and every block it points to
pub(crate) fn free_owned(frame: &mut Frame<'_>, repr: &NativeRepr) -> Result<(), CallError> {
    if repr.as_ptr().is_none() {
        return Ok(());
    }
    let block = frame.free(repr)?;
    for child in items(&block) {
        free_owned(frame, &child)?;
    }
    Ok(())
}

/// Instance of a fixture class, owned by the native side
pub(crate) fn new_instance(frame: &mut Frame<'_>, class: &str, floating: bool) -> Result<ObjectId, CallError> {
    let class = frame
        .boundary()
        .library()
        .class(class)
        .cloned()
        .ok_or_else(|| fail(format!("no class named {}", class)))?;
    Ok(frame.objects().create_with(&class, floating))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_builds() {
        let library = library().unwrap();
        assert!(library.function("int8_return_max").is_some());
        assert!(library.function("array_in_sum").is_some());
        assert!(library.class("SubSubObject").is_some());
        assert!(library.registry().lookup("Interface2").is_some());
    }

    #[test]
    fn test_constants() {
        assert_eq!(CONSTANT_UTF8, "const ♥ utf8");
        assert_eq!(CONSTANT_NUMBER, 42);
    }
}
