//! Runtime type identifiers
//!
//! A `GType` crosses the boundary as a plain word. Only the fundamental
//! types are known here; ids are spaced by four, with zero meaning
//! "invalid".

use serde::Serialize;
use std::fmt;

/// Identifier of a runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GType(u64);

const FUNDAMENTALS: [(u64, &str); 22] = [
    (0, "invalid"),
    (4, "void"),
    (8, "GInterface"),
    (12, "gchar"),
    (16, "guchar"),
    (20, "gboolean"),
    (24, "gint"),
    (28, "guint"),
    (32, "glong"),
    (36, "gulong"),
    (40, "gint64"),
    (44, "guint64"),
    (48, "GEnum"),
    (52, "GFlags"),
    (56, "gfloat"),
    (60, "gdouble"),
    (64, "gchararray"),
    (68, "gpointer"),
    (72, "GBoxed"),
    (76, "GParam"),
    (80, "GObject"),
    (84, "GVariant"),
];

impl GType {
    pub const INVALID: GType = GType(0);
    pub const NONE: GType = GType(4);
    pub const BOOLEAN: GType = GType(20);
    pub const INT: GType = GType(24);
    pub const UINT: GType = GType(28);
    pub const INT64: GType = GType(40);
    pub const DOUBLE: GType = GType(60);
    pub const STRING: GType = GType(64);
    pub const OBJECT: GType = GType(80);

    /// Known type with this raw id
    pub fn from_raw(raw: u64) -> Option<Self> {
        FUNDAMENTALS
            .iter()
            .any(|(id, _)| *id == raw)
            .then_some(GType(raw))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FUNDAMENTALS
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(id, _)| GType(*id))
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn name(self) -> &'static str {
        FUNDAMENTALS
            .iter()
            .find(|(id, _)| *id == self.0)
            .map_or("invalid", |(_, name)| name)
    }
}

impl fmt::Display for GType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(GType::NONE.name(), "void");
        assert_eq!(GType::STRING.name(), "gchararray");
        assert_eq!(GType::from_name("gint"), Some(GType::INT));
        assert_eq!(GType::from_name("foo"), None);
    }

    #[test]
    fn test_unknown_raw_id_rejected() {
        assert_eq!(GType::from_raw(64), Some(GType::STRING));
        assert_eq!(GType::from_raw(65), None);
        assert_eq!(GType::from_raw(4096), None);
    }
}
