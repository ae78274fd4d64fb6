//! Host value representation
//!
//! The managed caller's view of a marshalled value. Host values own nothing
//! native by themselves: an `Object` handle stands for one reference held by
//! the host, released explicitly through `Boundary::release`.

use crate::callback::CallbackId;
use crate::channel::NativeError;
use crate::gtype::GType;
use crate::object::ObjectId;
use std::fmt;
use std::sync::Arc;

/// Value on the host side of the boundary
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Arc<str>),
    Enum(i64),
    Flags(u64),
    Array(Vec<HostValue>),
    List(Vec<HostValue>),
    Map(Vec<(HostValue, HostValue)>),
    /// Field name/value pairs in declaration order
    Record(Vec<(String, HostValue)>),
    Object(ObjectId),
    Callback(CallbackId),
    Error(NativeError),
    Type(GType),
}

impl HostValue {
    pub fn string(s: &str) -> Self {
        HostValue::Str(Arc::from(s))
    }

    pub fn ints<I: IntoIterator<Item = i64>>(values: I) -> Self {
        HostValue::Array(values.into_iter().map(HostValue::Int).collect())
    }

    pub fn strings<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        HostValue::Array(values.into_iter().map(HostValue::string).collect())
    }

    pub fn string_list<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        HostValue::List(values.into_iter().map(HostValue::string).collect())
    }

    pub fn string_map<'a, I: IntoIterator<Item = (&'a str, &'a str)>>(pairs: I) -> Self {
        HostValue::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (HostValue::string(k), HostValue::string(v)))
                .collect(),
        )
    }

    pub fn record<'a, I: IntoIterator<Item = (&'a str, HostValue)>>(fields: I) -> Self {
        HostValue::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::UInt(_) => "uint",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "string",
            HostValue::Enum(_) => "enum",
            HostValue::Flags(_) => "flags",
            HostValue::Array(_) => "array",
            HostValue::List(_) => "list",
            HostValue::Map(_) => "map",
            HostValue::Record(_) => "record",
            HostValue::Object(_) => "object",
            HostValue::Callback(_) => "callback",
            HostValue::Error(_) => "error",
            HostValue::Type(_) => "gtype",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Int(v) | HostValue::Enum(v) => Some(*v),
            HostValue::UInt(v) => i64::try_from(*v).ok(),
            HostValue::Flags(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            HostValue::UInt(v) | HostValue::Flags(v) => Some(*v),
            HostValue::Int(v) | HostValue::Enum(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            HostValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Elements of an array or list
    pub fn as_seq(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Array(items) | HostValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Field of a record by name
    pub fn field(&self, name: &str) -> Option<&HostValue> {
        match self {
            HostValue::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Every object handle reachable from this value
    pub fn objects(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        self.collect_objects(&mut out);
        out
    }

    fn collect_objects(&self, out: &mut Vec<ObjectId>) {
        match self {
            HostValue::Object(id) => out.push(*id),
            HostValue::Array(items) | HostValue::List(items) => {
                items.iter().for_each(|v| v.collect_objects(out))
            }
            HostValue::Map(pairs) => pairs.iter().for_each(|(k, v)| {
                k.collect_objects(out);
                v.collect_objects(out);
            }),
            HostValue::Record(fields) => fields.iter().for_each(|(_, v)| v.collect_objects(out)),
            _ => {}
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(v) | HostValue::Enum(v) => write!(f, "{}", v),
            HostValue::UInt(v) | HostValue::Flags(v) => write!(f, "{}", v),
            HostValue::Float(v) => write!(f, "{}", v),
            HostValue::Str(s) => write!(f, "{:?}", s),
            HostValue::Array(items) | HostValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            HostValue::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            HostValue::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, v)?;
                }
                write!(f, "}}")
            }
            HostValue::Object(id) => write!(f, "{}", id),
            HostValue::Callback(id) => write!(f, "{}", id),
            HostValue::Error(e) => write!(f, "error({})", e),
            HostValue::Type(t) => write!(f, "gtype({})", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(HostValue::ints([1, -1]).to_string(), "[1, -1]");
        assert_eq!(
            HostValue::string_map([("0", "0")]).to_string(),
            "{\"0\": \"0\"}"
        );
        assert_eq!(HostValue::Null.to_string(), "null");
    }

    #[test]
    fn test_objects_reachable() {
        let value = HostValue::List(vec![
            HostValue::Object(ObjectId::from_raw(1)),
            HostValue::record([("obj", HostValue::Object(ObjectId::from_raw(2)))]),
        ]);
        assert_eq!(
            value.objects(),
            vec![ObjectId::from_raw(1), ObjectId::from_raw(2)]
        );
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(HostValue::UInt(u64::MAX).as_i64(), None);
        assert_eq!(HostValue::Int(-1).as_u64(), None);
        assert_eq!(HostValue::Enum(42).as_i64(), Some(42));
    }
}
