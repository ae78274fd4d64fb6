//! Boundary audit logging
//!
//! Structured record of every ownership event crossing the boundary
//! (allocations, frees, transfers, reference count changes, callback
//! teardown, raised errors, contract violations). The conformance driver
//! reads it back to attribute failures.

use crate::callback::CallbackId;
use crate::channel::NativeError;
use crate::error::UsageError;
use crate::heap::{Party, Ptr};
use crate::object::ObjectId;
use crate::transfer::Lifetime;
use chrono::{DateTime, Utc};
use gimarshal_config::RuntimeConfig;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Boundary audit event types
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// Heap block allocated
    Alloc {
        ptr: Ptr,
        kind: &'static str,
        owner: Party,
    },
    /// Heap block freed
    Free { ptr: Ptr, by: Party },
    /// Block ownership moved between parties
    Transfer { ptr: Ptr, from: Party, to: Party },
    /// A borrowed view was read after its window closed
    BorrowExpired { ptr: Ptr, lifetime: Lifetime },
    /// Boundary call entered
    CallStarted { function: String, epoch: u64 },
    Ref { object: ObjectId, count: u32 },
    Unref { object: ObjectId, count: u32 },
    /// Floating reference claimed
    Claim { object: ObjectId },
    /// Claim attempt lost to an earlier claim
    ClaimRejected { object: ObjectId },
    /// Object reached zero references
    Finalized { object: ObjectId, class: String },
    /// Host closure handed to the bridge
    CallbackRegistered { callback: CallbackId },
    CallbackInvoked { callback: CallbackId, invocation: u64 },
    /// Callback released; destroy notifier (if any) has run
    CallbackDestroyed { callback: CallbackId, invocations: u64 },
    /// Native operation failed through the error channel
    ErrorRaised { error: NativeError },
    /// Ownership contract violated
    UsageViolation { error: UsageError },
}

impl AuditEvent {
    /// Short event kind, stable for filtering
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::Alloc { .. } => "alloc",
            AuditEvent::Free { .. } => "free",
            AuditEvent::Transfer { .. } => "transfer",
            AuditEvent::BorrowExpired { .. } => "borrow-expired",
            AuditEvent::CallStarted { .. } => "call",
            AuditEvent::Ref { .. } => "ref",
            AuditEvent::Unref { .. } => "unref",
            AuditEvent::Claim { .. } => "claim",
            AuditEvent::ClaimRejected { .. } => "claim-rejected",
            AuditEvent::Finalized { .. } => "finalized",
            AuditEvent::CallbackRegistered { .. } => "callback-registered",
            AuditEvent::CallbackInvoked { .. } => "callback-invoked",
            AuditEvent::CallbackDestroyed { .. } => "callback-destroyed",
            AuditEvent::ErrorRaised { .. } => "error",
            AuditEvent::UsageViolation { .. } => "usage-violation",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::Alloc { ptr, kind, owner } => {
                write!(f, "alloc {} {} (owner: {})", kind, ptr, owner)
            }
            AuditEvent::Free { ptr, by } => write!(f, "free {} by {}", ptr, by),
            AuditEvent::Transfer { ptr, from, to } => {
                write!(f, "transfer {}: {} -> {}", ptr, from, to)
            }
            AuditEvent::BorrowExpired { ptr, lifetime } => {
                write!(f, "borrow of {} expired ({})", ptr, lifetime)
            }
            AuditEvent::CallStarted { function, epoch } => {
                write!(f, "call {} (epoch {})", function, epoch)
            }
            AuditEvent::Ref { object, count } => write!(f, "ref {} -> {}", object, count),
            AuditEvent::Unref { object, count } => write!(f, "unref {} -> {}", object, count),
            AuditEvent::Claim { object } => write!(f, "claim {}", object),
            AuditEvent::ClaimRejected { object } => {
                write!(f, "claim of {} rejected: already claimed", object)
            }
            AuditEvent::Finalized { object, class } => {
                write!(f, "finalized {} ({})", object, class)
            }
            AuditEvent::CallbackRegistered { callback } => write!(f, "callback {} registered", callback),
            AuditEvent::CallbackInvoked {
                callback,
                invocation,
            } => write!(f, "callback {} invocation #{}", callback, invocation),
            AuditEvent::CallbackDestroyed {
                callback,
                invocations,
            } => write!(
                f,
                "callback {} destroyed after {} invocations",
                callback, invocations
            ),
            AuditEvent::ErrorRaised { error } => write!(f, "error raised: {}", error),
            AuditEvent::UsageViolation { error } => write!(f, "usage violation: {}", error),
        }
    }
}

/// Audit log entry with timestamp
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event
        )
    }
}

/// Audit logger trait for customizable logging backends
pub trait AuditLogger: Send + Sync {
    fn log(&self, event: AuditEvent);

    /// All retained entries, oldest first
    fn entries(&self) -> Vec<AuditEntry>;

    fn clear(&self);

    /// Retained events of one kind
    fn events_of(&self, kind: &str) -> Vec<AuditEvent> {
        self.entries()
            .into_iter()
            .filter(|e| e.event.kind() == kind)
            .map(|e| e.event)
            .collect()
    }
}

/// In-memory audit logger (default implementation)
///
/// With a capacity set, the oldest entries are dropped first.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLogger {
    entries: Arc<Mutex<VecDeque<AuditEntry>>>,
    max_entries: Option<usize>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries: Some(max_entries),
        }
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: AuditEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(max) = self.max_entries {
            while entries.len() >= max {
                entries.pop_front();
            }
        }
        entries.push_back(AuditEntry::new(event));
    }

    fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Null audit logger (no-op)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditLogger;

impl NullAuditLogger {
    pub fn new() -> Self {
        Self
    }
}

impl AuditLogger for NullAuditLogger {
    fn log(&self, _event: AuditEvent) {}

    fn entries(&self) -> Vec<AuditEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}

/// Logger selected by the `[audit]` configuration section
pub fn logger_for(config: &RuntimeConfig) -> Arc<dyn AuditLogger> {
    if !config.audit_enabled {
        return Arc::new(NullAuditLogger::new());
    }
    match config.audit_max_entries {
        Some(max) => Arc::new(MemoryAuditLogger::with_capacity(max)),
        None => Arc::new(MemoryAuditLogger::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_display() {
        let event = AuditEvent::Transfer {
            ptr: Ptr::from_raw(3),
            from: Party::Host,
            to: Party::Native,
        };
        assert_eq!(event.to_string(), "transfer 0x0003: host -> native");
    }

    #[test]
    fn test_audit_entry_log_line_format() {
        let entry = AuditEntry::new(AuditEvent::Claim {
            object: ObjectId::from_raw(7),
        });
        let line = entry.to_log_line();
        assert!(line.starts_with('['));
        assert!(line.ends_with("claim object#7"));
    }

    #[test]
    fn test_memory_logger_stores_and_filters() {
        let logger = MemoryAuditLogger::new();
        logger.log(AuditEvent::Ref {
            object: ObjectId::from_raw(1),
            count: 2,
        });
        logger.log(AuditEvent::Unref {
            object: ObjectId::from_raw(1),
            count: 1,
        });

        assert_eq!(logger.entries().len(), 2);
        assert_eq!(logger.events_of("unref").len(), 1);

        logger.clear();
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let logger = MemoryAuditLogger::with_capacity(2);
        for epoch in 0..3 {
            logger.log(AuditEvent::CallStarted {
                function: "f".to_string(),
                epoch,
            });
        }
        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].event, AuditEvent::CallStarted { epoch: 1, .. }));
    }

    #[test]
    fn test_disabled_config_selects_null_logger() {
        let config = RuntimeConfig {
            audit_enabled: false,
            ..RuntimeConfig::default()
        };
        let logger = logger_for(&config);
        logger.log(AuditEvent::Claim {
            object: ObjectId::from_raw(1),
        });
        assert!(logger.entries().is_empty());
    }
}
