//! Native heap - the memory side of the call boundary
//!
//! Blocks are addressed by opaque `Ptr` handles and owned by exactly one
//! `Party` at a time. Freed blocks are tombstoned and handles are never
//! reused, so double free, use after free and freeing someone else's block
//! are always detected instead of corrupting state. Static blocks model
//! read-only native data and can never be freed.

use crate::audit::{AuditEvent, AuditLogger};
use crate::callback::CallbackId;
use crate::channel::NativeError;
use crate::descriptor::ListKind;
use crate::error::UsageError;
use crate::object::ObjectId;
use crate::transfer::Lifetime;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Opaque native pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ptr(u64);

impl Ptr {
    pub const NULL: Ptr = Ptr(0);

    pub fn from_raw(raw: u64) -> Self {
        Ptr(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "0x{:04x}", self.0)
        }
    }
}

/// Side of the boundary that owns a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    /// The managed caller
    Host,
    /// The native library
    Native,
}

impl Party {
    pub fn other(self) -> Party {
        match self {
            Party::Host => Party::Native,
            Party::Native => Party::Host,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Host => write!(f, "host"),
            Party::Native => write!(f, "native"),
        }
    }
}

/// A native value as it sits in an argument slot or container
#[derive(Debug, Clone, PartialEq)]
pub enum NativeRepr {
    Void,
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(Ptr),
    Object(ObjectId),
    Callback(CallbackId),
    /// Record embedded by value
    Inline(Vec<NativeRepr>),
}

impl NativeRepr {
    pub fn is_null(&self) -> bool {
        matches!(self, NativeRepr::Null)
    }

    pub fn as_ptr(&self) -> Option<Ptr> {
        match self {
            NativeRepr::Ptr(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            NativeRepr::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Integer payload widened to i128 (covers every signed and unsigned width)
    pub fn as_int(&self) -> Option<i128> {
        match self {
            NativeRepr::I8(v) => Some(*v as i128),
            NativeRepr::U8(v) => Some(*v as i128),
            NativeRepr::I16(v) => Some(*v as i128),
            NativeRepr::U16(v) => Some(*v as i128),
            NativeRepr::I32(v) => Some(*v as i128),
            NativeRepr::U32(v) => Some(*v as i128),
            NativeRepr::I64(v) => Some(*v as i128),
            NativeRepr::U64(v) => Some(*v as i128),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_int().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NativeRepr::F32(v) => Some(*v as f64),
            NativeRepr::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeRepr::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Same native identity (pointer, object or callback handle)
    pub fn same_identity(&self, other: &NativeRepr) -> bool {
        match (self, other) {
            (NativeRepr::Ptr(a), NativeRepr::Ptr(b)) => a == b,
            (NativeRepr::Object(a), NativeRepr::Object(b)) => a == b,
            (NativeRepr::Callback(a), NativeRepr::Callback(b)) => a == b,
            _ => false,
        }
    }
}

/// Contents of a heap block
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Utf8(String),
    /// Array storage; zero-terminated arrays keep their sentinel
    Array(Vec<NativeRepr>),
    List {
        kind: ListKind,
        items: Vec<NativeRepr>,
    },
    Map(Vec<(NativeRepr, NativeRepr)>),
    Record {
        name: String,
        fields: Vec<NativeRepr>,
        /// `Some` for reference-counted records
        refcount: Option<u32>,
    },
    Error(NativeError),
}

impl Block {
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Utf8(_) => "utf8",
            Block::Array(_) => "array",
            Block::List {
                kind: ListKind::Singly,
                ..
            } => "slist",
            Block::List {
                kind: ListKind::Doubly,
                ..
            } => "list",
            Block::Map(_) => "map",
            Block::Record { .. } => "record",
            Block::Error(_) => "error",
        }
    }
}

/// A borrowed view with an expiry rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Borrow {
    pub ptr: Ptr,
    pub lifetime: Lifetime,
    /// Call epoch the view was handed out in
    pub epoch: u64,
    /// Object the view belongs to
    pub source: Option<ObjectId>,
}

/// Allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub allocations: u64,
    pub frees: u64,
    pub transfers: u64,
}

struct Slot {
    /// `None` once freed (tombstone)
    block: Option<Block>,
    owner: Party,
    is_static: bool,
}

/// Typed native heap with ownership tracking
pub struct NativeHeap {
    slots: Vec<Slot>,
    epoch: u64,
    stats: HeapStats,
    audit: Arc<dyn AuditLogger>,
}

impl NativeHeap {
    pub fn new(audit: Arc<dyn AuditLogger>) -> Self {
        Self {
            slots: Vec::new(),
            epoch: 0,
            stats: HeapStats::default(),
            audit,
        }
    }

    /// Allocate a block owned by `owner`
    pub fn alloc(&mut self, block: Block, owner: Party) -> Ptr {
        self.insert(block, owner, false)
    }

    /// Allocate read-only native data that lives as long as the heap
    pub fn alloc_static(&mut self, block: Block) -> Ptr {
        self.insert(block, Party::Native, true)
    }

    pub fn alloc_utf8(&mut self, s: &str, owner: Party) -> Ptr {
        self.alloc(Block::Utf8(s.to_string()), owner)
    }

    fn insert(&mut self, block: Block, owner: Party, is_static: bool) -> Ptr {
        let kind = block.kind();
        self.slots.push(Slot {
            block: Some(block),
            owner,
            is_static,
        });
        let ptr = Ptr(self.slots.len() as u64);
        self.stats.allocations += 1;
        self.audit.log(AuditEvent::Alloc { ptr, kind, owner });
        ptr
    }

    fn slot(&self, ptr: Ptr) -> Result<&Slot, UsageError> {
        if ptr.is_null() {
            return Err(self.violation(UsageError::NullDeref));
        }
        self.slots
            .get((ptr.0 - 1) as usize)
            .ok_or_else(|| self.violation(UsageError::InvalidPtr(ptr)))
    }

    fn slot_mut(&mut self, ptr: Ptr) -> Result<&mut Slot, UsageError> {
        // validate first so violations are logged once
        self.slot(ptr)?;
        Ok(&mut self.slots[(ptr.0 - 1) as usize])
    }

    fn violation(&self, error: UsageError) -> UsageError {
        self.audit.log(AuditEvent::UsageViolation {
            error: error.clone(),
        });
        error
    }

    pub fn get(&self, ptr: Ptr) -> Result<&Block, UsageError> {
        let slot = self.slot(ptr)?;
        slot.block
            .as_ref()
            .ok_or_else(|| self.violation(UsageError::UseAfterFree(ptr)))
    }

    pub fn get_mut(&mut self, ptr: Ptr) -> Result<&mut Block, UsageError> {
        if self.slot(ptr)?.block.is_none() {
            return Err(self.violation(UsageError::UseAfterFree(ptr)));
        }
        let slot = self.slot_mut(ptr)?;
        slot.block.as_mut().ok_or(UsageError::UseAfterFree(ptr))
    }

    pub fn owner(&self, ptr: Ptr) -> Result<Party, UsageError> {
        self.get(ptr)?;
        Ok(self.slot(ptr)?.owner)
    }

    pub fn is_live(&self, ptr: Ptr) -> bool {
        !ptr.is_null()
            && self
                .slots
                .get((ptr.0 - 1) as usize)
                .map_or(false, |s| s.block.is_some())
    }

    pub fn is_static(&self, ptr: Ptr) -> bool {
        !ptr.is_null()
            && self
                .slots
                .get((ptr.0 - 1) as usize)
                .map_or(false, |s| s.is_static)
    }

    /// Free a block on behalf of `by`, which must own it
    pub fn free(&mut self, ptr: Ptr, by: Party) -> Result<Block, UsageError> {
        let slot = self.slot(ptr)?;
        if slot.block.is_none() {
            return Err(self.violation(UsageError::DoubleFree(ptr)));
        }
        if slot.is_static {
            return Err(self.violation(UsageError::StaticFree(ptr)));
        }
        if slot.owner != by {
            let owner = slot.owner;
            return Err(self.violation(UsageError::NotOwner { ptr, owner, by }));
        }

        let block = self.slot_mut(ptr)?.block.take();
        self.stats.frees += 1;
        self.audit.log(AuditEvent::Free { ptr, by });
        block.ok_or(UsageError::DoubleFree(ptr))
    }

    /// Hand a block from one party to the other
    pub fn transfer(&mut self, ptr: Ptr, from: Party, to: Party) -> Result<(), UsageError> {
        let owner = self.owner(ptr)?;
        if self.is_static(ptr) {
            return Err(self.violation(UsageError::StaticFree(ptr)));
        }
        if owner != from {
            return Err(self.violation(UsageError::NotOwner { ptr, owner, by: from }));
        }
        if from != to {
            self.slot_mut(ptr)?.owner = to;
            self.stats.transfers += 1;
            self.audit.log(AuditEvent::Transfer { ptr, from, to });
        }
        Ok(())
    }

    /// Take another reference to a reference-counted record
    pub fn ref_record(&mut self, ptr: Ptr) -> Result<u32, UsageError> {
        match self.get_mut(ptr)? {
            Block::Record {
                refcount: Some(count),
                ..
            } => {
                *count += 1;
                Ok(*count)
            }
            _ => Ok(1),
        }
    }

    /// Drop a reference to a reference-counted record, freeing it at zero
    pub fn unref_record(&mut self, ptr: Ptr) -> Result<u32, UsageError> {
        let remaining = match self.get_mut(ptr)? {
            Block::Record {
                refcount: Some(count),
                ..
            } => {
                if *count == 0 {
                    return Err(UsageError::RecordUnderflow(ptr));
                }
                *count -= 1;
                *count
            }
            _ => 0,
        };
        if remaining == 0 {
            let owner = self.owner(ptr)?;
            self.free(ptr, owner)?;
        }
        Ok(remaining)
    }

    /// Hand out a view of `ptr` that expires per `lifetime`
    pub fn borrow(&self, ptr: Ptr, lifetime: Lifetime, source: Option<ObjectId>) -> Borrow {
        Borrow {
            ptr,
            lifetime,
            epoch: self.epoch,
            source,
        }
    }

    /// Read through a borrowed view, checking the call-epoch window
    pub fn read_borrow(&self, borrow: &Borrow) -> Result<&Block, UsageError> {
        let epoch_bound = matches!(
            borrow.lifetime,
            Lifetime::CallDuration | Lifetime::UntilNextCall
        );
        if epoch_bound && borrow.epoch != self.epoch {
            self.audit.log(AuditEvent::BorrowExpired {
                ptr: borrow.ptr,
                lifetime: borrow.lifetime,
            });
            return Err(self.violation(UsageError::DanglingBorrow {
                ptr: borrow.ptr,
                lifetime: borrow.lifetime,
            }));
        }
        self.get(borrow.ptr)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start a new boundary call; epoch-bound views expire
    pub fn advance_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Live, non-static blocks owned by `party`
    pub fn live(&self, party: Party) -> Vec<Ptr> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.block.is_some() && !s.is_static && s.owner == party)
            .map(|(i, _)| Ptr(i as u64 + 1))
            .collect()
    }

    /// Host-owned blocks still alive
    pub fn leaks(&self) -> Vec<Ptr> {
        self.live(Party::Host)
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }
}

impl fmt::Debug for NativeHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHeap")
            .field("blocks", &self.slots.len())
            .field("epoch", &self.epoch)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;

    fn heap() -> NativeHeap {
        NativeHeap::new(Arc::new(MemoryAuditLogger::new()))
    }

    #[test]
    fn test_alloc_and_free() {
        let mut heap = heap();
        let ptr = heap.alloc_utf8("hello", Party::Host);
        assert_eq!(heap.get(ptr).unwrap(), &Block::Utf8("hello".to_string()));

        let block = heap.free(ptr, Party::Host).unwrap();
        assert_eq!(block, Block::Utf8("hello".to_string()));
        assert!(!heap.is_live(ptr));
    }

    #[test]
    fn test_double_free_detected() {
        let mut heap = heap();
        let ptr = heap.alloc_utf8("x", Party::Host);
        heap.free(ptr, Party::Host).unwrap();
        assert_eq!(heap.free(ptr, Party::Host), Err(UsageError::DoubleFree(ptr)));
        assert_eq!(heap.get(ptr), Err(UsageError::UseAfterFree(ptr)));
    }

    #[test]
    fn test_free_by_non_owner_detected() {
        let mut heap = heap();
        let ptr = heap.alloc_utf8("x", Party::Native);
        let err = heap.free(ptr, Party::Host).unwrap_err();
        assert_eq!(
            err,
            UsageError::NotOwner {
                ptr,
                owner: Party::Native,
                by: Party::Host
            }
        );
    }

    #[test]
    fn test_static_blocks_cannot_be_freed() {
        let mut heap = heap();
        let ptr = heap.alloc_static(Block::Utf8("const".to_string()));
        assert_eq!(heap.free(ptr, Party::Native), Err(UsageError::StaticFree(ptr)));
        assert!(heap.live(Party::Native).is_empty());
    }

    #[test]
    fn test_transfer_moves_ownership() {
        let mut heap = heap();
        let ptr = heap.alloc(Block::Array(vec![]), Party::Native);
        heap.transfer(ptr, Party::Native, Party::Host).unwrap();
        assert_eq!(heap.owner(ptr).unwrap(), Party::Host);
        assert_eq!(heap.leaks(), vec![ptr]);
        assert!(heap.transfer(ptr, Party::Native, Party::Host).is_err());
    }

    #[test]
    fn test_until_next_call_borrow_expires() {
        let mut heap = heap();
        let ptr = heap.alloc_static(Block::Utf8("dangling".to_string()));
        let view = heap.borrow(ptr, Lifetime::UntilNextCall, None);
        assert!(heap.read_borrow(&view).is_ok());

        heap.advance_epoch();
        assert_eq!(
            heap.read_borrow(&view),
            Err(UsageError::DanglingBorrow {
                ptr,
                lifetime: Lifetime::UntilNextCall
            })
        );
    }

    #[test]
    fn test_refcounted_record_freed_at_zero() {
        let mut heap = heap();
        let ptr = heap.alloc(
            Block::Record {
                name: "RefStruct".to_string(),
                fields: vec![NativeRepr::I64(1)],
                refcount: Some(1),
            },
            Party::Native,
        );
        assert_eq!(heap.ref_record(ptr).unwrap(), 2);
        assert_eq!(heap.unref_record(ptr).unwrap(), 1);
        assert!(heap.is_live(ptr));
        assert_eq!(heap.unref_record(ptr).unwrap(), 0);
        assert!(!heap.is_live(ptr));
    }

    #[test]
    fn test_null_and_invalid_pointers() {
        let heap = heap();
        assert_eq!(heap.get(Ptr::NULL), Err(UsageError::NullDeref));
        assert_eq!(
            heap.get(Ptr::from_raw(99)),
            Err(UsageError::InvalidPtr(Ptr::from_raw(99)))
        );
    }

    #[test]
    fn test_violations_are_audited() {
        let audit = Arc::new(MemoryAuditLogger::new());
        let mut heap = NativeHeap::new(audit.clone());
        let ptr = heap.alloc_utf8("x", Party::Host);
        heap.free(ptr, Party::Host).unwrap();
        let _ = heap.free(ptr, Party::Host);
        assert_eq!(audit.events_of("usage-violation").len(), 1);
    }
}
