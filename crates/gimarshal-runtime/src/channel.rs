//! Error channel - out-of-band failure values
//!
//! A fallible native operation returns `Result<_, NativeError>`: either its
//! declared outputs or a `(domain, code, message)` triple, never both.
//! Domains are compared by identity string, so two domains that share code
//! values never compare equal.

use crate::error::UsageError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Interned error-domain identifier
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quark(Arc<str>);

impl Quark {
    pub fn new(name: &str) -> Self {
        Quark(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quark({:?})", self.as_str())
    }
}

impl fmt::Display for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Quark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A domain error value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Error)]
#[error("{domain} ({code}): {message}")]
pub struct NativeError {
    pub domain: Quark,
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(domain: &Quark, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain: domain.clone(),
            code,
            message: message.into(),
        }
    }

    /// Same domain and code; the code alone never identifies an error
    pub fn matches(&self, domain: &Quark, code: i32) -> bool {
        self.domain == *domain && self.code == code
    }
}

/// Caller-provided slot a failing call writes its error into
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ErrorSlot {
    value: Option<NativeError>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an error; refuses to overwrite a populated slot
    pub fn set(&mut self, error: NativeError) -> Result<(), UsageError> {
        if let Some(existing) = &self.value {
            return Err(UsageError::ErrorSlotOccupied(existing.clone()));
        }
        self.value = Some(error);
        Ok(())
    }

    /// Fail early when a call is handed a slot that already holds an error
    pub fn ensure_empty(&self) -> Result<(), UsageError> {
        match &self.value {
            Some(existing) => Err(UsageError::ErrorSlotOccupied(existing.clone())),
            None => Ok(()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn peek(&self) -> Option<&NativeError> {
        self.value.as_ref()
    }

    pub fn take(&mut self) -> Option<NativeError> {
        self.value.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_sharing_codes_differ() {
        let a = Quark::new("first-domain");
        let b = Quark::new("second-domain");
        let ea = NativeError::new(&a, 1, "boom");
        let eb = NativeError::new(&b, 1, "boom");

        assert_ne!(ea, eb);
        assert!(ea.matches(&a, 1));
        assert!(!ea.matches(&b, 1));
    }

    #[test]
    fn test_slot_refuses_overwrite() {
        let domain = Quark::new("domain");
        let mut slot = ErrorSlot::new();
        slot.set(NativeError::new(&domain, 1, "first")).unwrap();

        let err = slot.set(NativeError::new(&domain, 2, "second")).unwrap_err();
        assert!(matches!(err, UsageError::ErrorSlotOccupied(ref e) if e.code == 1));
        assert_eq!(slot.peek().map(|e| e.code), Some(1));
    }

    #[test]
    fn test_slot_take_empties() {
        let domain = Quark::new("domain");
        let mut slot = ErrorSlot::new();
        assert!(slot.ensure_empty().is_ok());
        slot.set(NativeError::new(&domain, 5, "msg")).unwrap();
        assert!(slot.ensure_empty().is_err());
        assert_eq!(slot.take().map(|e| e.message), Some("msg".to_string()));
        assert!(!slot.is_set());
    }

    #[test]
    fn test_display() {
        let err = NativeError::new(&Quark::new("d"), 5, "bad thing");
        assert_eq!(err.to_string(), "d (5): bad thing");
    }
}
