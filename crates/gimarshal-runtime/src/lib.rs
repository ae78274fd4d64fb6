//! gimarshal runtime - ownership contract of an introspection binding boundary
//!
//! This library models every value crossing between a managed host and a
//! native library:
//! - Type descriptors and the transfer model (who allocates, who frees)
//! - A tracked native heap, object lifecycle and callback bridge
//! - The container marshaller and the descriptor-driven invoker
//! - A native fixture library and the conformance driver that exercises it

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod audit;
pub mod boundary;
pub mod callback;
pub mod channel;
pub mod conformance;
pub mod descriptor;
pub mod error;
pub mod fixture;
pub mod gtype;
pub mod heap;
pub mod invoke;
pub mod marshal;
pub mod object;
pub mod registry;
pub mod transfer;
pub mod value;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, MemoryAuditLogger, NullAuditLogger};
pub use boundary::{host_method, Boundary, CallOutput, LeakReport};
pub use callback::{CallbackBridge, CallbackId, HostClosure};
pub use channel::{ErrorSlot, NativeError, Quark};
pub use conformance::{Case, CaseOutcome, ConformanceReport};
pub use descriptor::{
    ArgInfo, ArrayLength, CallableInfo, CallbackInfo, CallbackScope, EnumInfo, InterfaceInfo,
    ObjectInfo, PropertyInfo, RecordInfo, TypeDescriptor,
};
pub use error::{
    CallError, ClassError, MarshalError, RegistryError, TransferMismatch, TruncationError,
    UsageError,
};
pub use gtype::GType;
pub use heap::{Block, Borrow, NativeHeap, NativeRepr, Party, Ptr};
pub use invoke::{native, Frame, NativeBody, NativeFunction};
pub use marshal::Marshaller;
pub use object::{Class, ClassBuilder, ObjectId, ObjectSpace};
pub use registry::{Library, TypeRegistry};
pub use transfer::{resolve_transfer, Direction, Lifetime, TransferMode, TransferPlan};
pub use value::HostValue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
