//! Dynamic values carried through the XDR type descriptors.
//!
//! A [`Value`] is what a [`super::Type`] encodes from and decodes into. Structures
//! are maps from component name to value; a decoded union is a structure holding
//! the fields of the selected arm plus the discriminant under [`DISCRIMINANT`].

use std::collections::BTreeMap;

/// Reserved structure key under which a union keeps its discriminant.
pub const DISCRIMINANT: &str = "_discriminant";

/// Named components of a structure (or of a union arm).
pub type Fields = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// XDR `void`
    Void,
    /// XDR `bool`
    Bool(bool),
    /// XDR `int`
    Int(i32),
    /// XDR `unsigned int`
    UInt(u32),
    /// XDR `hyper`
    Hyper(i64),
    /// XDR `unsigned hyper`
    UHyper(u64),
    /// XDR `float`
    Float(f32),
    /// XDR `double`
    Double(f64),
    /// Symbolic name of an `enum` value
    Enum(String),
    /// Fixed or variable length `opaque`
    Bytes(Vec<u8>),
    /// Fixed or variable length `string`
    String(String),
    /// Fixed or variable length array
    Array(Vec<Value>),
    /// Optional data (`type *identifier`)
    Optional(Option<Box<Value>>),
    /// `struct` or decoded `union`
    Struct(Fields),
}

impl Value {
    /// Builds a structure value from `(name, value)` pairs.
    pub fn structure<K, I>(fields: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds a union value: the arm fields plus the discriminant.
    pub fn union_of<K, I>(discriminant: impl Into<Value>, fields: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut fields: Fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        fields.insert(DISCRIMINANT.to_string(), discriminant.into());
        Value::Struct(fields)
    }

    /// Builds a union value whose selected arm is void.
    pub fn void_union(discriminant: impl Into<Value>) -> Value {
        Value::union_of(discriminant, std::iter::empty::<(String, Value)>())
    }

    pub fn enumeration(name: impl Into<String>) -> Value {
        Value::Enum(name.into())
    }

    pub fn some(value: Value) -> Value {
        Value::Optional(Some(Box::new(value)))
    }

    pub fn none() -> Value {
        Value::Optional(None)
    }

    /// Looks up a structure component.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Returns the discriminant of a union value.
    pub fn discriminant(&self) -> Option<&Value> {
        self.field(DISCRIMINANT)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Enum(name) if name == "TRUE" => Some(true),
            Value::Enum(name) if name == "FALSE" => Some(false),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Hyper(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UHyper(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the symbolic name of an enumeration value.
    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Value::Enum(name) => Some(name),
            _ => None,
        }
    }

    /// Raw bytes of an opaque or string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Text of a string value, or of an opaque value holding UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// `Some(None)` for an absent optional, `Some(Some(v))` for a present one.
    pub fn as_optional(&self) -> Option<Option<&Value>> {
        match self {
            Value::Optional(inner) => Some(inner.as_deref()),
            _ => None,
        }
    }

    pub fn into_fields(mut self) -> Option<Fields> {
        match &mut self {
            Value::Struct(fields) => Some(std::mem::take(fields)),
            _ => None,
        }
    }

    /// Unwraps an optional value; `None` if `self` is not an optional.
    pub fn into_optional(mut self) -> Option<Option<Value>> {
        match &mut self {
            Value::Optional(inner) => Some(inner.take().map(|mut boxed| std::mem::take(&mut *boxed))),
            _ => None,
        }
    }

    /// Unwraps an opaque or string value.
    pub fn into_bytes(mut self) -> Option<Vec<u8>> {
        match &mut self {
            Value::Bytes(bytes) => Some(std::mem::take(bytes)),
            Value::String(s) => Some(std::mem::take(s).into_bytes()),
            _ => None,
        }
    }

    pub fn into_enum(mut self) -> Option<String> {
        match &mut self {
            Value::Enum(name) => Some(std::mem::take(name)),
            _ => None,
        }
    }

    /// Name of the variant, used in codec error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "unsigned int",
            Value::Hyper(_) => "hyper",
            Value::UHyper(_) => "unsigned hyper",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Enum(_) => "enum",
            Value::Bytes(_) => "opaque",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Optional(_) => "optional",
            Value::Struct(_) => "struct",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Void
    }
}

// Decoded linked lists nest one `Optional` per node, so the derived drop glue
// would recurse once per node. Children are detached onto a heap stack instead.
impl Drop for Value {
    fn drop(&mut self) {
        let mut stack = Vec::new();
        detach_children(self, &mut stack);
        while let Some(mut value) = stack.pop() {
            detach_children(&mut value, &mut stack);
        }
    }
}

fn detach_children(value: &mut Value, stack: &mut Vec<Value>) {
    match value {
        Value::Optional(inner) => {
            if let Some(mut boxed) = inner.take() {
                stack.push(std::mem::take(&mut *boxed));
            }
        }
        Value::Struct(fields) if !fields.is_empty() => stack.extend(std::mem::take(fields).into_values()),
        Value::Array(items) if !items.is_empty() => stack.append(items),
        _ => {}
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Hyper(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UHyper(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Option<Value>> for Value {
    fn from(v: Option<Value>) -> Self {
        Value::Optional(v.map(Box::new))
    }
}

impl From<Fields> for Value {
    fn from(v: Fields) -> Self {
        Value::Struct(v)
    }
}

/// Removes a component from decoded fields.
pub fn take(fields: &mut Fields, name: &str) -> std::io::Result<Value> {
    fields
        .remove(name)
        .ok_or_else(|| super::utils::invalid_data(format!("missing structure component {name}")))
}

pub fn take_u32(fields: &mut Fields, name: &str) -> std::io::Result<u32> {
    take(fields, name)?
        .as_u32()
        .ok_or_else(|| super::utils::invalid_data(format!("component {name} is not an unsigned int")))
}

pub fn take_bool(fields: &mut Fields, name: &str) -> std::io::Result<bool> {
    take(fields, name)?
        .as_bool()
        .ok_or_else(|| super::utils::invalid_data(format!("component {name} is not a bool")))
}

pub fn take_enum(fields: &mut Fields, name: &str) -> std::io::Result<String> {
    take(fields, name)?
        .into_enum()
        .ok_or_else(|| super::utils::invalid_data(format!("component {name} is not an enum")))
}

pub fn take_bytes(fields: &mut Fields, name: &str) -> std::io::Result<Vec<u8>> {
    take(fields, name)?
        .into_bytes()
        .ok_or_else(|| super::utils::invalid_data(format!("component {name} is not opaque")))
}

pub fn take_fields(fields: &mut Fields, name: &str) -> std::io::Result<Fields> {
    take(fields, name)?
        .into_fields()
        .ok_or_else(|| super::utils::invalid_data(format!("component {name} is not a struct")))
}
