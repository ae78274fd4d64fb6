//! Container marshaller - `to_native` / `from_native` per type descriptor
//!
//! Converting a host value builds native heap blocks whose owner follows the
//! declared transfer:
//!
//! - `none`: blocks stay host-owned and are queued as pending releases,
//!   freed once the call has returned.
//! - `container`: the skeleton is handed to the native side, the elements
//!   stay host-owned and pending.
//! - `full`: everything is native-owned; objects gain a native reference.
//!
//! Lifting a native value copies it into a `HostValue` and settles
//! ownership the other way round: `none` copies and takes a host reference
//! on objects, `container` additionally frees the skeleton, `full` adopts
//! object references and frees every block.
//!
//! A `null` container is `NativeRepr::Null` and lifts back to
//! `HostValue::Null`; an empty container is a live, empty block.

pub mod scalar;

use crate::descriptor::{ArrayLength, RecordInfo, Storage, TypeDescriptor};
use crate::error::{MarshalError, UsageError};
use crate::gtype::GType;
use crate::heap::{Block, Borrow, NativeHeap, NativeRepr, Party, Ptr};
use crate::object::{ObjectId, ObjectSpace};
use crate::transfer::{Lifetime, TransferMode};
use crate::value::HostValue;

/// A temporary the caller still has to release after the call
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub repr: NativeRepr,
    pub ty: TypeDescriptor,
}

/// How object references are settled while lifting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// Host takes its own reference (claims a floating one)
    Sink,
    /// Host takes over the reference it was given
    Adopt,
    /// No reference change
    Peek,
}

fn mismatch(ty: &TypeDescriptor, got: impl Into<String>) -> MarshalError {
    MarshalError::TypeMismatch {
        expected: ty.to_string(),
        got: got.into(),
    }
}

fn expect_ptr(repr: &NativeRepr, ty: &TypeDescriptor) -> Result<Ptr, MarshalError> {
    repr.as_ptr().ok_or_else(|| mismatch(ty, format!("{:?}", repr)))
}

/// Zero value of a type: `false`, `0`, `0.0`, zeroed inline record or null
pub fn zero_of(ty: &TypeDescriptor) -> NativeRepr {
    match ty {
        TypeDescriptor::Void => NativeRepr::Void,
        TypeDescriptor::Boolean => NativeRepr::Bool(false),
        TypeDescriptor::GType => NativeRepr::U64(GType::INVALID.raw()),
        TypeDescriptor::Int { width, signedness } => scalar::zero(*width, *signedness),
        TypeDescriptor::Float(crate::descriptor::FloatWidth::F32) => NativeRepr::F32(0.0),
        TypeDescriptor::Float(crate::descriptor::FloatWidth::F64) => NativeRepr::F64(0.0),
        TypeDescriptor::Enum(info) | TypeDescriptor::Flags(info) => {
            scalar::zero(info.width, info.signedness)
        }
        TypeDescriptor::Record(info, Storage::Inline) => {
            NativeRepr::Inline(info.fields.iter().map(|f| zero_of(&f.ty)).collect())
        }
        _ => NativeRepr::Null,
    }
}

/// Terminator of a zero-terminated array of `element`
pub fn sentinel_of(element: &TypeDescriptor) -> Result<NativeRepr, MarshalError> {
    match element {
        TypeDescriptor::Int { .. } | TypeDescriptor::Enum(_) | TypeDescriptor::Flags(_) => {
            Ok(zero_of(element))
        }
        ty if ty.is_pointer() => Ok(NativeRepr::Null),
        other => Err(MarshalError::NoSentinel(other.to_string())),
    }
}

fn is_sentinel(value: &HostValue, element: &TypeDescriptor) -> bool {
    if element.is_pointer() {
        value.is_null()
    } else {
        value.as_i64() == Some(0)
    }
}

/// Converts values across the boundary and tracks what must be released
pub struct Marshaller<'a> {
    heap: &'a mut NativeHeap,
    objects: &'a ObjectSpace,
    pending: Vec<Release>,
}

impl<'a> Marshaller<'a> {
    pub fn new(heap: &'a mut NativeHeap, objects: &'a ObjectSpace) -> Self {
        Self::with_pending(heap, objects, Vec::new())
    }

    /// Resume with releases taken from an earlier marshaller
    pub fn with_pending(
        heap: &'a mut NativeHeap,
        objects: &'a ObjectSpace,
        pending: Vec<Release>,
    ) -> Self {
        Self {
            heap,
            objects,
            pending,
        }
    }

    /// Host gives `value` to the native side under `mode`
    pub fn to_native(
        &mut self,
        value: &HostValue,
        ty: &TypeDescriptor,
        mode: TransferMode,
    ) -> Result<NativeRepr, MarshalError> {
        match mode {
            TransferMode::Full => self.build(value, ty, Party::Native, true),
            TransferMode::None => {
                let repr = self.build(value, ty, Party::Host, false)?;
                self.defer(repr.clone(), ty);
                Ok(repr)
            }
            TransferMode::Container if ty.is_container() => {
                let repr = self.build(value, ty, Party::Host, false)?;
                if let Some(ptr) = repr.as_ptr() {
                    for (element, element_ty) in self.elements(ptr, ty)? {
                        self.defer(element, &element_ty);
                    }
                    self.heap.transfer(ptr, Party::Host, Party::Native)?;
                }
                Ok(repr)
            }
            TransferMode::Container => self.to_native(value, ty, TransferMode::Full),
        }
    }

    /// Host receives `repr` from the native side under `mode`
    pub fn from_native(
        &mut self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        mode: TransferMode,
    ) -> Result<HostValue, MarshalError> {
        self.from_native_with_length(repr, ty, mode, None)
    }

    /// As `from_native`, for arrays whose length travels separately
    pub fn from_native_with_length(
        &mut self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        mode: TransferMode,
        length: Option<usize>,
    ) -> Result<HostValue, MarshalError> {
        match mode {
            TransferMode::None => self.lift(repr, ty, length, Claim::Sink),
            TransferMode::Container if ty.is_container() => {
                let value = self.lift(repr, ty, length, Claim::Sink)?;
                if let Some(ptr) = repr.as_ptr() {
                    self.adopt(ptr)?;
                    self.heap.free(ptr, Party::Host)?;
                }
                Ok(value)
            }
            _ => {
                let value = self.lift(repr, ty, length, Claim::Adopt)?;
                self.free_deep(repr, ty, Party::Host, true)?;
                Ok(value)
            }
        }
    }

    /// Read a value without any ownership effect
    pub fn peek(
        &self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        length: Option<usize>,
    ) -> Result<HostValue, MarshalError> {
        self.lift(repr, ty, length, Claim::Peek)
    }

    /// Storage the caller provides for an out-caller-allocates argument
    pub fn caller_storage(&mut self, ty: &TypeDescriptor) -> Result<NativeRepr, MarshalError> {
        match ty {
            TypeDescriptor::Record(info, Storage::Boxed) => {
                let fields = info.fields.iter().map(|f| zero_of(&f.ty)).collect();
                let block = Block::Record {
                    name: info.name.clone(),
                    fields,
                    refcount: None,
                };
                Ok(NativeRepr::Ptr(self.heap.alloc(block, Party::Host)))
            }
            TypeDescriptor::Array {
                element,
                length: ArrayLength::Fixed(n),
            } => {
                let block = Block::Array(vec![zero_of(element); *n]);
                Ok(NativeRepr::Ptr(self.heap.alloc(block, Party::Host)))
            }
            other if !other.is_pointer() => Ok(zero_of(other)),
            other => Err(mismatch(other, "storage of unknown size")),
        }
    }

    /// Lift caller-provided storage after the callee wrote into it
    ///
    /// The storage itself is always the caller's; pointer fields written
    /// into it are released only under `full`.
    pub fn from_caller_storage(
        &mut self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        mode: TransferMode,
    ) -> Result<HostValue, MarshalError> {
        let claim = if mode == TransferMode::Full {
            Claim::Adopt
        } else {
            Claim::Sink
        };
        let value = self.lift(repr, ty, None, claim)?;
        match repr {
            NativeRepr::Ptr(ptr) => {
                let block = self.heap.free(*ptr, Party::Host)?;
                if mode == TransferMode::Full {
                    self.free_children(block, ty, Party::Host, true)?;
                }
            }
            NativeRepr::Inline(_) if mode == TransferMode::Full => {
                self.free_deep(repr, ty, Party::Host, true)?;
            }
            _ => {}
        }
        Ok(value)
    }

    /// Write a host value into storage the native caller provided
    ///
    /// Pointer fields written into the storage belong to the native side.
    pub fn write_storage(
        &mut self,
        storage: &NativeRepr,
        value: &HostValue,
        ty: &TypeDescriptor,
    ) -> Result<NativeRepr, MarshalError> {
        let built = self.build(value, ty, Party::Native, true)?;
        match (storage, &built) {
            (NativeRepr::Ptr(target), NativeRepr::Ptr(temp)) => {
                let block = self.heap.free(*temp, Party::Native)?;
                *self.heap.get_mut(*target)? = block;
                Ok(storage.clone())
            }
            _ => Ok(built),
        }
    }

    /// Hand out a view of a block the host does not own
    pub fn borrow(&self, ptr: Ptr, lifetime: Lifetime, source: Option<ObjectId>) -> Borrow {
        self.heap.borrow(ptr, lifetime, source)
    }

    pub fn is_floating(&self, id: ObjectId) -> bool {
        self.objects.is_floating(id).unwrap_or(false)
    }

    pub fn pending(&self) -> &[Release] {
        &self.pending
    }

    pub fn take_pending(&mut self) -> Vec<Release> {
        std::mem::take(&mut self.pending)
    }

    /// Drop pending releases without freeing (ownership settled elsewhere)
    pub fn forget_pending(&mut self) {
        self.pending.clear();
    }

    /// Free every pending temporary on behalf of the host
    pub fn release_pending(&mut self) -> Result<(), UsageError> {
        let pending = self.take_pending();
        let mut first_error = None;
        for release in pending {
            if let Err(e) = self.release(&release) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Free one host-owned temporary
    pub fn release(&mut self, release: &Release) -> Result<(), UsageError> {
        self.free_deep(&release.repr, &release.ty, Party::Host, false)
    }

    /// Take back what `to_native` handed over for a call that never ran
    ///
    /// Host-owned parts are still pending and go with the next release.
    pub fn reclaim(&mut self, repr: &NativeRepr, ty: &TypeDescriptor, mode: TransferMode) {
        match mode {
            TransferMode::None => {}
            TransferMode::Container if ty.is_container() => {
                if let Some(ptr) = repr.as_ptr() {
                    let _ = self.heap.free(ptr, Party::Native);
                }
            }
            _ => self.drop_native(repr, ty),
        }
    }

    /// Free a value the native side owns outright, with its references
    pub fn drop_native(&mut self, repr: &NativeRepr, ty: &TypeDescriptor) {
        self.discard(repr, ty, Party::Native, true);
    }

    /// Free storage from `caller_storage` the callee never wrote into
    pub fn free_storage(&mut self, repr: &NativeRepr) {
        if let Some(ptr) = repr.as_ptr() {
            let _ = self.heap.free(ptr, Party::Host);
        }
    }

    fn defer(&mut self, repr: NativeRepr, ty: &TypeDescriptor) {
        if matches!(repr, NativeRepr::Ptr(_) | NativeRepr::Inline(_)) {
            self.pending.push(Release {
                repr,
                ty: ty.clone(),
            });
        }
    }

    fn elements(
        &self,
        ptr: Ptr,
        ty: &TypeDescriptor,
    ) -> Result<Vec<(NativeRepr, TypeDescriptor)>, MarshalError> {
        let out = match (self.heap.get(ptr)?, ty) {
            (Block::Array(items), TypeDescriptor::Array { element, .. })
            | (Block::List { items, .. }, TypeDescriptor::List { element, .. }) => items
                .iter()
                .map(|item| (item.clone(), element.as_ref().clone()))
                .collect(),
            (Block::Map(pairs), TypeDescriptor::Map { key, value }) => pairs
                .iter()
                .flat_map(|(k, v)| {
                    [
                        (k.clone(), key.as_ref().clone()),
                        (v.clone(), value.as_ref().clone()),
                    ]
                })
                .collect(),
            (block, _) => return Err(mismatch(ty, block.kind())),
        };
        Ok(out)
    }

    fn build(
        &mut self,
        value: &HostValue,
        ty: &TypeDescriptor,
        owner: Party,
        take_refs: bool,
    ) -> Result<NativeRepr, MarshalError> {
        if value.is_null() {
            return if ty.is_pointer() {
                Ok(NativeRepr::Null)
            } else {
                Err(mismatch(ty, "null"))
            };
        }

        match ty {
            TypeDescriptor::Void => Ok(NativeRepr::Void),
            TypeDescriptor::Boolean => match value {
                HostValue::Bool(b) => Ok(NativeRepr::Bool(*b)),
                other => Err(mismatch(ty, other.type_name())),
            },
            TypeDescriptor::Int { width, signedness } => {
                scalar::int_to_native(value, *width, *signedness)
            }
            TypeDescriptor::Float(width) => scalar::float_to_native(value, *width),
            TypeDescriptor::Enum(info) => scalar::enum_to_native(value, info),
            TypeDescriptor::Flags(info) => scalar::flags_to_native(value, info),
            TypeDescriptor::GType => match value {
                HostValue::Type(gtype) => Ok(NativeRepr::U64(gtype.raw())),
                other => Err(mismatch(ty, other.type_name())),
            },
            TypeDescriptor::Utf8 => {
                let s = value
                    .as_str()
                    .ok_or_else(|| mismatch(ty, value.type_name()))?;
                if s.contains('\0') {
                    return Err(MarshalError::InvalidString(
                        "interior NUL byte".to_string(),
                    ));
                }
                Ok(NativeRepr::Ptr(self.heap.alloc_utf8(s, owner)))
            }
            TypeDescriptor::Record(info, storage) => {
                self.build_record(value, ty, info, *storage, owner, take_refs)
            }
            TypeDescriptor::Array { element, length } => {
                let items = value
                    .as_seq()
                    .ok_or_else(|| mismatch(ty, value.type_name()))?;
                if let ArrayLength::Fixed(n) = length {
                    if items.len() != *n {
                        return Err(MarshalError::FixedLength {
                            expected: *n,
                            got: items.len(),
                        });
                    }
                }
                let sentinel = match length {
                    ArrayLength::ZeroTerminated => {
                        let sentinel = sentinel_of(element)?;
                        if let Some(index) = items.iter().position(|v| is_sentinel(v, element)) {
                            return Err(MarshalError::SentinelInInput { index });
                        }
                        Some(sentinel)
                    }
                    _ => None,
                };
                let mut reprs = self.build_all(items, element, owner, take_refs)?;
                reprs.extend(sentinel);
                Ok(NativeRepr::Ptr(self.heap.alloc(Block::Array(reprs), owner)))
            }
            TypeDescriptor::List { element, kind } => {
                let items = value
                    .as_seq()
                    .ok_or_else(|| mismatch(ty, value.type_name()))?;
                let items = self.build_all(items, element, owner, take_refs)?;
                let block = Block::List { kind: *kind, items };
                Ok(NativeRepr::Ptr(self.heap.alloc(block, owner)))
            }
            TypeDescriptor::Map { key, value: value_ty } => {
                let pairs = match value {
                    HostValue::Map(pairs) => pairs,
                    other => return Err(mismatch(ty, other.type_name())),
                };
                let mut built: Vec<(NativeRepr, NativeRepr)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let entry = self.build(k, key, owner, take_refs).and_then(|k_repr| {
                        match self.build(v, value_ty, owner, take_refs) {
                            Ok(v_repr) => Ok((k_repr, v_repr)),
                            Err(e) => {
                                self.discard(&k_repr, key, owner, take_refs);
                                Err(e)
                            }
                        }
                    });
                    match entry {
                        Ok(pair) => built.push(pair),
                        Err(e) => {
                            for (k_repr, v_repr) in &built {
                                self.discard(k_repr, key, owner, take_refs);
                                self.discard(v_repr, value_ty, owner, take_refs);
                            }
                            return Err(e);
                        }
                    }
                }
                Ok(NativeRepr::Ptr(self.heap.alloc(Block::Map(built), owner)))
            }
            TypeDescriptor::Object(info) => {
                let id = value
                    .as_object()
                    .ok_or_else(|| mismatch(ty, value.type_name()))?;
                let class = self.objects.class_of(id)?;
                if !class.is_a(&info.name) {
                    return Err(MarshalError::WrongClass {
                        expected: info.name.clone(),
                        got: class.name().to_string(),
                    });
                }
                if take_refs {
                    self.objects.ref_sink(id)?;
                }
                Ok(NativeRepr::Object(id))
            }
            TypeDescriptor::Interface(info) => {
                let id = value
                    .as_object()
                    .ok_or_else(|| mismatch(ty, value.type_name()))?;
                let class = self.objects.class_of(id)?;
                if !class.implements(&info.name) {
                    return Err(MarshalError::WrongClass {
                        expected: info.name.clone(),
                        got: class.name().to_string(),
                    });
                }
                if take_refs {
                    self.objects.ref_sink(id)?;
                }
                Ok(NativeRepr::Object(id))
            }
            TypeDescriptor::Callback(_) => match value {
                HostValue::Callback(id) => Ok(NativeRepr::Callback(*id)),
                other => Err(mismatch(ty, other.type_name())),
            },
            TypeDescriptor::Error(domain) => {
                let error = match value {
                    HostValue::Error(e) => e,
                    other => return Err(mismatch(ty, other.type_name())),
                };
                if let Some(domain) = domain {
                    if error.domain != domain.domain {
                        return Err(MarshalError::DomainMismatch {
                            expected: domain.domain.to_string(),
                            got: error.domain.to_string(),
                        });
                    }
                }
                Ok(NativeRepr::Ptr(
                    self.heap.alloc(Block::Error(error.clone()), owner),
                ))
            }
        }
    }

    fn build_record(
        &mut self,
        value: &HostValue,
        ty: &TypeDescriptor,
        info: &RecordInfo,
        storage: Storage,
        owner: Party,
        take_refs: bool,
    ) -> Result<NativeRepr, MarshalError> {
        let given = match value {
            HostValue::Record(fields) => fields,
            other => return Err(mismatch(ty, other.type_name())),
        };
        if let Some((name, _)) = given.iter().find(|(n, _)| info.field_index(n).is_none()) {
            return Err(mismatch(ty, format!("record with field '{}'", name)));
        }

        let mut fields = Vec::with_capacity(info.fields.len());
        for field in &info.fields {
            let built = match given.iter().find(|(n, _)| *n == field.name) {
                Some((_, v)) => self.build(v, &field.ty, owner, take_refs),
                None => Ok(zero_of(&field.ty)),
            };
            match built {
                Ok(repr) => fields.push(repr),
                Err(e) => {
                    for (repr, done) in fields.iter().zip(&info.fields) {
                        self.discard(repr, &done.ty, owner, take_refs);
                    }
                    return Err(e);
                }
            }
        }

        match storage {
            Storage::Inline => Ok(NativeRepr::Inline(fields)),
            Storage::Boxed => {
                // shared records live on the native heap; their count decides lifetime
                let (owner, refcount) = if info.refcounted {
                    (Party::Native, Some(1))
                } else {
                    (owner, None)
                };
                let block = Block::Record {
                    name: info.name.clone(),
                    fields,
                    refcount,
                };
                Ok(NativeRepr::Ptr(self.heap.alloc(block, owner)))
            }
        }
    }

    fn build_all(
        &mut self,
        items: &[HostValue],
        element: &TypeDescriptor,
        owner: Party,
        take_refs: bool,
    ) -> Result<Vec<NativeRepr>, MarshalError> {
        let mut built = Vec::with_capacity(items.len());
        for item in items {
            match self.build(item, element, owner, take_refs) {
                Ok(repr) => built.push(repr),
                Err(e) => {
                    for repr in &built {
                        self.discard(repr, element, owner, take_refs);
                    }
                    return Err(e);
                }
            }
        }
        Ok(built)
    }

    /// Undo a partial build after a later element failed
    fn discard(&mut self, repr: &NativeRepr, ty: &TypeDescriptor, owner: Party, took_refs: bool) {
        if took_refs {
            for id in self.objects_in(repr, ty) {
                let _ = self.objects.unref(id);
            }
        }
        let _ = self.free_deep(repr, ty, owner, false);
    }

    fn objects_in(&self, repr: &NativeRepr, ty: &TypeDescriptor) -> Vec<ObjectId> {
        self.peek(repr, ty, None)
            .map(|value| value.objects())
            .unwrap_or_default()
    }

    fn lift(
        &self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        length: Option<usize>,
        claim: Claim,
    ) -> Result<HostValue, MarshalError> {
        if repr.is_null() {
            return if ty.is_pointer() {
                Ok(HostValue::Null)
            } else {
                Err(mismatch(ty, "null"))
            };
        }

        match ty {
            TypeDescriptor::Void => Ok(HostValue::Null),
            TypeDescriptor::Boolean => repr
                .as_bool()
                .map(HostValue::Bool)
                .ok_or_else(|| mismatch(ty, format!("{:?}", repr))),
            TypeDescriptor::Int { width, signedness } => {
                scalar::int_from_native(repr, *width, *signedness)
            }
            TypeDescriptor::Float(_) => scalar::float_from_native(repr),
            TypeDescriptor::Enum(info) => scalar::enum_from_native(repr, info),
            TypeDescriptor::Flags(info) => scalar::flags_from_native(repr, info),
            TypeDescriptor::GType => match repr {
                NativeRepr::U64(raw) => GType::from_raw(*raw)
                    .map(HostValue::Type)
                    .ok_or_else(|| mismatch(ty, format!("unknown type id {}", raw))),
                other => Err(mismatch(ty, format!("{:?}", other))),
            },
            TypeDescriptor::Utf8 => match self.heap.get(expect_ptr(repr, ty)?)? {
                Block::Utf8(s) => Ok(HostValue::string(s)),
                other => Err(mismatch(ty, other.kind())),
            },
            TypeDescriptor::Record(info, storage) => {
                let fields = match (storage, repr) {
                    (Storage::Inline, NativeRepr::Inline(fields)) => fields.clone(),
                    (Storage::Boxed, NativeRepr::Ptr(ptr)) => match self.heap.get(*ptr)? {
                        Block::Record { fields, .. } => fields.clone(),
                        other => return Err(mismatch(ty, other.kind())),
                    },
                    _ => return Err(mismatch(ty, format!("{:?}", repr))),
                };
                let mut out = Vec::with_capacity(fields.len());
                for (field, field_repr) in info.fields.iter().zip(&fields) {
                    out.push((
                        field.name.clone(),
                        self.lift(field_repr, &field.ty, None, claim)?,
                    ));
                }
                Ok(HostValue::Record(out))
            }
            TypeDescriptor::Array {
                element,
                length: convention,
            } => {
                let items = match self.heap.get(expect_ptr(repr, ty)?)? {
                    Block::Array(items) => items.clone(),
                    other => return Err(mismatch(ty, other.kind())),
                };
                let count = match convention {
                    ArrayLength::Fixed(n) => *n,
                    ArrayLength::Param { .. } => {
                        length.ok_or_else(|| MarshalError::MissingLength(ty.to_string()))?
                    }
                    ArrayLength::ZeroTerminated => {
                        let sentinel = sentinel_of(element)?;
                        items
                            .iter()
                            .position(|r| *r == sentinel)
                            .ok_or(MarshalError::MissingSentinel)?
                    }
                };
                if count > items.len() {
                    return Err(MarshalError::LengthOverrun {
                        length: count,
                        available: items.len(),
                    });
                }
                let mut values = Vec::with_capacity(count);
                for item in &items[..count] {
                    values.push(self.lift(item, element, None, claim)?);
                }
                Ok(HostValue::Array(values))
            }
            TypeDescriptor::List { element, .. } => {
                let items = match self.heap.get(expect_ptr(repr, ty)?)? {
                    Block::List { items, .. } => items.clone(),
                    other => return Err(mismatch(ty, other.kind())),
                };
                let mut values = Vec::with_capacity(items.len());
                for item in &items {
                    values.push(self.lift(item, element, None, claim)?);
                }
                Ok(HostValue::List(values))
            }
            TypeDescriptor::Map { key, value } => {
                let pairs = match self.heap.get(expect_ptr(repr, ty)?)? {
                    Block::Map(pairs) => pairs.clone(),
                    other => return Err(mismatch(ty, other.kind())),
                };
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in &pairs {
                    out.push((
                        self.lift(k, key, None, claim)?,
                        self.lift(v, value, None, claim)?,
                    ));
                }
                Ok(HostValue::Map(out))
            }
            TypeDescriptor::Object(info) => {
                let id = self.lift_object(repr, ty, claim)?;
                let class = self.objects.class_of(id)?;
                if !class.is_a(&info.name) {
                    return Err(MarshalError::WrongClass {
                        expected: info.name.clone(),
                        got: class.name().to_string(),
                    });
                }
                Ok(HostValue::Object(id))
            }
            TypeDescriptor::Interface(info) => {
                let id = self.lift_object(repr, ty, claim)?;
                let class = self.objects.class_of(id)?;
                if !class.implements(&info.name) {
                    return Err(MarshalError::WrongClass {
                        expected: info.name.clone(),
                        got: class.name().to_string(),
                    });
                }
                Ok(HostValue::Object(id))
            }
            TypeDescriptor::Callback(_) => match repr {
                NativeRepr::Callback(id) => Ok(HostValue::Callback(*id)),
                other => Err(mismatch(ty, format!("{:?}", other))),
            },
            TypeDescriptor::Error(domain) => match self.heap.get(expect_ptr(repr, ty)?)? {
                Block::Error(error) => {
                    if let Some(domain) = domain {
                        if error.domain != domain.domain {
                            return Err(MarshalError::DomainMismatch {
                                expected: domain.domain.to_string(),
                                got: error.domain.to_string(),
                            });
                        }
                    }
                    Ok(HostValue::Error(error.clone()))
                }
                other => Err(mismatch(ty, other.kind())),
            },
        }
    }

    fn lift_object(
        &self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        claim: Claim,
    ) -> Result<ObjectId, MarshalError> {
        let id = repr
            .as_object()
            .ok_or_else(|| mismatch(ty, format!("{:?}", repr)))?;
        match claim {
            Claim::Sink => {
                self.objects.ref_sink(id)?;
            }
            Claim::Adopt => {
                self.objects.claim(id)?;
            }
            Claim::Peek => {
                self.objects.instance(id)?;
            }
        }
        Ok(id)
    }

    /// Hand a native-owned block to the host before the host frees it
    fn adopt(&mut self, ptr: Ptr) -> Result<(), UsageError> {
        if self.heap.owner(ptr)? == Party::Native {
            self.heap.transfer(ptr, Party::Native, Party::Host)?;
        }
        Ok(())
    }

    /// Free a value and everything it owns on behalf of `by`
    ///
    /// Static blocks are skipped, reference-counted records drop one
    /// reference, objects and callbacks are untouched. With `adopt`, blocks
    /// still owned by the native side are taken over first.
    fn free_deep(
        &mut self,
        repr: &NativeRepr,
        ty: &TypeDescriptor,
        by: Party,
        adopt: bool,
    ) -> Result<(), UsageError> {
        match (repr, ty) {
            (NativeRepr::Inline(fields), TypeDescriptor::Record(info, _)) => {
                for (field_repr, field) in fields.iter().zip(&info.fields) {
                    if field.transfer != TransferMode::None {
                        self.free_deep(field_repr, &field.ty, by, adopt)?;
                    }
                }
                Ok(())
            }
            (NativeRepr::Ptr(ptr), _) => {
                let ptr = *ptr;
                if self.heap.is_static(ptr) {
                    return Ok(());
                }
                if let TypeDescriptor::Record(info, Storage::Boxed) = ty {
                    if info.refcounted {
                        self.heap.unref_record(ptr)?;
                        return Ok(());
                    }
                }
                if adopt && by == Party::Host {
                    self.adopt(ptr)?;
                }
                let block = self.heap.free(ptr, by)?;
                self.free_children(block, ty, by, adopt)
            }
            _ => Ok(()),
        }
    }

    fn free_children(
        &mut self,
        block: Block,
        ty: &TypeDescriptor,
        by: Party,
        adopt: bool,
    ) -> Result<(), UsageError> {
        match (block, ty) {
            (Block::Array(items), TypeDescriptor::Array { element, .. })
            | (Block::List { items, .. }, TypeDescriptor::List { element, .. }) => {
                for item in &items {
                    self.free_deep(item, element, by, adopt)?;
                }
            }
            (Block::Map(pairs), TypeDescriptor::Map { key, value }) => {
                for (k, v) in &pairs {
                    self.free_deep(k, key, by, adopt)?;
                    self.free_deep(v, value, by, adopt)?;
                }
            }
            (Block::Record { fields, .. }, TypeDescriptor::Record(info, _)) => {
                for (field_repr, field) in fields.iter().zip(&info.fields) {
                    if field.transfer != TransferMode::None {
                        self.free_deep(field_repr, &field.ty, by, adopt)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Drop for Marshaller<'_> {
    fn drop(&mut self) {
        // violations are already in the audit log
        let _ = self.release_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::descriptor::{IntWidth, Signedness};
    use std::sync::Arc;

    fn setup() -> (NativeHeap, ObjectSpace) {
        let audit = Arc::new(MemoryAuditLogger::new());
        (NativeHeap::new(audit.clone()), ObjectSpace::new(audit))
    }

    fn utf8_list() -> TypeDescriptor {
        TypeDescriptor::list(TypeDescriptor::Utf8)
    }

    #[test]
    fn test_none_in_is_released_after_call() {
        let (mut heap, objects) = setup();
        let mut m = Marshaller::new(&mut heap, &objects);
        let repr = m
            .to_native(&HostValue::string_list(["0", "1"]), &utf8_list(), TransferMode::None)
            .unwrap();
        assert_eq!(m.pending().len(), 1);
        m.release_pending().unwrap();
        drop(m);
        assert!(!heap.is_live(repr.as_ptr().unwrap()));
        assert!(heap.leaks().is_empty());
    }

    #[test]
    fn test_container_in_hands_over_skeleton_only() {
        let (mut heap, objects) = setup();
        let mut m = Marshaller::new(&mut heap, &objects);
        let repr = m
            .to_native(&HostValue::string_list(["a", "b"]), &utf8_list(), TransferMode::Container)
            .unwrap();
        assert_eq!(m.pending().len(), 2);
        m.release_pending().unwrap();
        drop(m);
        let skeleton = repr.as_ptr().unwrap();
        assert_eq!(heap.owner(skeleton).unwrap(), Party::Native);
        assert!(heap.leaks().is_empty());
    }

    #[test]
    fn test_full_out_frees_everything() {
        let (mut heap, objects) = setup();
        let a = heap.alloc_utf8("0", Party::Native);
        let list = heap.alloc(
            Block::List {
                kind: crate::descriptor::ListKind::Doubly,
                items: vec![NativeRepr::Ptr(a)],
            },
            Party::Native,
        );
        let mut m = Marshaller::new(&mut heap, &objects);
        let value = m
            .from_native(&NativeRepr::Ptr(list), &utf8_list(), TransferMode::Full)
            .unwrap();
        drop(m);
        assert_eq!(value, HostValue::string_list(["0"]));
        assert!(!heap.is_live(a));
        assert!(!heap.is_live(list));
    }

    #[test]
    fn test_null_and_empty_stay_distinct() {
        let (mut heap, objects) = setup();
        let ty = TypeDescriptor::zero_terminated(TypeDescriptor::Utf8);
        let mut m = Marshaller::new(&mut heap, &objects);
        let null = m.to_native(&HostValue::Null, &ty, TransferMode::None).unwrap();
        let empty = m
            .to_native(&HostValue::Array(vec![]), &ty, TransferMode::None)
            .unwrap();
        assert_eq!(null, NativeRepr::Null);
        assert!(empty.as_ptr().is_some());
        assert_eq!(m.peek(&null, &ty, None).unwrap(), HostValue::Null);
        assert_eq!(m.peek(&empty, &ty, None).unwrap(), HostValue::Array(vec![]));
    }

    #[test]
    fn test_zero_terminated_rejects_sentinel_in_input() {
        let (mut heap, objects) = setup();
        let ty = TypeDescriptor::zero_terminated(TypeDescriptor::Utf8);
        let mut m = Marshaller::new(&mut heap, &objects);
        let err = m
            .to_native(
                &HostValue::Array(vec![HostValue::string("0"), HostValue::Null]),
                &ty,
                TransferMode::None,
            )
            .unwrap_err();
        assert_eq!(err, MarshalError::SentinelInInput { index: 1 });
        drop(m);
        assert!(heap.leaks().is_empty());
    }

    #[test]
    fn test_partial_build_is_discarded() {
        let (mut heap, objects) = setup();
        let mut m = Marshaller::new(&mut heap, &objects);
        let value = HostValue::List(vec![HostValue::string("a"), HostValue::Int(3)]);
        let err = m
            .to_native(&value, &utf8_list(), TransferMode::None)
            .unwrap_err();
        assert!(matches!(err, MarshalError::TypeMismatch { .. }));
        drop(m);
        assert!(heap.leaks().is_empty());
    }

    #[test]
    fn test_length_param_array_needs_length() {
        let (mut heap, objects) = setup();
        let ty = TypeDescriptor::length_array(TypeDescriptor::int32(), IntWidth::W32, Signedness::Signed);
        let ptr = heap.alloc(
            Block::Array(vec![NativeRepr::I32(1), NativeRepr::I32(2)]),
            Party::Native,
        );
        let m = Marshaller::new(&mut heap, &objects);
        let repr = NativeRepr::Ptr(ptr);
        assert!(matches!(
            m.peek(&repr, &ty, None),
            Err(MarshalError::MissingLength(_))
        ));
        assert_eq!(m.peek(&repr, &ty, Some(2)).unwrap(), HostValue::ints([1, 2]));
        assert!(matches!(
            m.peek(&repr, &ty, Some(3)),
            Err(MarshalError::LengthOverrun { length: 3, available: 2 })
        ));
    }

    #[test]
    fn test_fixed_length_checked() {
        let (mut heap, objects) = setup();
        let ty = TypeDescriptor::fixed_array(TypeDescriptor::int32(), 4);
        let mut m = Marshaller::new(&mut heap, &objects);
        assert_eq!(
            m.to_native(&HostValue::ints([1, 2]), &ty, TransferMode::None),
            Err(MarshalError::FixedLength {
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn test_float_arrays_cannot_be_zero_terminated() {
        let (mut heap, objects) = setup();
        let ty = TypeDescriptor::zero_terminated(TypeDescriptor::double());
        let mut m = Marshaller::new(&mut heap, &objects);
        assert!(matches!(
            m.to_native(&HostValue::Array(vec![]), &ty, TransferMode::None),
            Err(MarshalError::NoSentinel(_))
        ));
    }

    #[test]
    fn test_interior_nul_rejected() {
        let (mut heap, objects) = setup();
        let mut m = Marshaller::new(&mut heap, &objects);
        assert!(matches!(
            m.to_native(&HostValue::string("a\0b"), &TypeDescriptor::Utf8, TransferMode::None),
            Err(MarshalError::InvalidString(_))
        ));
    }
}
