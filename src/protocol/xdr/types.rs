//! XDR type descriptors.
//!
//! A [`Type`] describes one wire representable shape and knows how to encode a
//! [`Value`] into it and decode a [`Value`] out of it. Composite descriptors
//! share their children through [`Arc`], so a descriptor graph is built once and
//! then used read-only by every call.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Weak};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

use super::utils::{self, invalid_data};
use super::value::{Fields, Value, DISCRIMINANT};
use super::XDREndian;

/// Upper bound on slots reserved ahead of decoding a variable array.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

#[derive(Clone, Debug)]
pub enum Type {
    /// Encodes nothing.
    Void,
    /// 32-bit two's complement integer.
    Int,
    /// 32-bit unsigned integer.
    UInt,
    /// 64-bit two's complement integer.
    Hyper,
    /// 64-bit unsigned integer.
    UHyper,
    /// `enum { FALSE = 0, TRUE = 1 }`.
    Bool,
    /// IEEE-754 single precision.
    Float,
    /// IEEE-754 double precision.
    Double,
    Enum(Arc<Enumeration>),
    /// `opaque identifier[n]`
    FixedOpaque(usize),
    /// `opaque identifier<m>`, unbounded when `None`
    Opaque(Option<usize>),
    /// `string identifier[n]`
    FixedString(usize),
    /// `string identifier<m>`, unbounded when `None`
    String(Option<usize>),
    /// `type identifier[n]`
    FixedArray(Arc<Type>, usize),
    /// `type identifier<m>`, unbounded when `None`
    Array(Arc<Type>, Option<usize>),
    /// `type *identifier`, a variable array of at most one element.
    Optional(Arc<Type>),
    Struct(Arc<Structure>),
    Union(Arc<Union>),
    /// Back reference from a recursive structure to itself.
    SelfRef(Weak<Structure>),
}

impl Type {
    pub fn opaque() -> Type {
        Type::Opaque(None)
    }

    pub fn bounded_opaque(max: usize) -> Type {
        Type::Opaque(Some(max))
    }

    pub fn string() -> Type {
        Type::String(None)
    }

    pub fn bounded_string(max: usize) -> Type {
        Type::String(Some(max))
    }

    pub fn array(element: impl Into<Type>) -> Type {
        Type::Array(Arc::new(element.into()), None)
    }

    pub fn bounded_array(element: impl Into<Type>, max: usize) -> Type {
        Type::Array(Arc::new(element.into()), Some(max))
    }

    pub fn fixed_array(element: impl Into<Type>, n: usize) -> Type {
        Type::FixedArray(Arc::new(element.into()), n)
    }

    pub fn optional(element: impl Into<Type>) -> Type {
        Type::Optional(Arc::new(element.into()))
    }

    /// Encodes `value` into a fresh buffer.
    pub fn to_bytes(&self, value: &Value) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(value, &mut buf)?;
        Ok(buf)
    }

    /// Decodes one value from the front of `data`, ignoring whatever follows it.
    pub fn from_bytes(&self, mut data: &[u8]) -> std::io::Result<Value> {
        self.decode(&mut data)
    }

    pub fn encode<W: Write>(&self, value: &Value, dest: &mut W) -> std::io::Result<()> {
        match self {
            Type::Void => Ok(()),
            Type::Int => dest.write_i32::<XDREndian>(expect_int(value)?),
            Type::UInt => dest.write_u32::<XDREndian>(expect_uint(value)?),
            Type::Hyper => match value {
                Value::Hyper(v) => dest.write_i64::<XDREndian>(*v),
                other => Err(mismatch("hyper", other)),
            },
            Type::UHyper => match value {
                Value::UHyper(v) => dest.write_u64::<XDREndian>(*v),
                other => Err(mismatch("unsigned hyper", other)),
            },
            Type::Bool => match value.as_bool() {
                Some(b) => dest.write_u32::<XDREndian>(u32::from(b)),
                None => Err(mismatch("bool", value)),
            },
            Type::Float => match value {
                Value::Float(v) => dest.write_f32::<XDREndian>(*v),
                other => Err(mismatch("float", other)),
            },
            Type::Double => match value {
                Value::Double(v) => dest.write_f64::<XDREndian>(*v),
                other => Err(mismatch("double", other)),
            },
            Type::Enum(enumeration) => enumeration.encode(value, dest),
            Type::FixedOpaque(n) | Type::FixedString(n) => {
                let bytes = expect_bytes(self, value)?;
                let take = bytes.len().min(*n);
                dest.write_all(&bytes[..take])?;
                // Short values are NUL filled up to the declared size.
                dest.write_all(&vec![0u8; n - take])?;
                utils::write_padding(*n, dest)
            }
            Type::Opaque(max) | Type::String(max) => {
                let bytes = expect_bytes(self, value)?;
                let len = clamp(bytes.len(), *max);
                write_length(len, dest)?;
                dest.write_all(&bytes[..len])?;
                utils::write_padding(len, dest)
            }
            Type::FixedArray(element, n) => {
                let items = expect_array(value)?;
                if items.len() != *n {
                    return Err(invalid_data(format!(
                        "fixed array expects {n} elements, got {}",
                        items.len()
                    )));
                }
                items.iter().try_for_each(|item| element.encode(item, dest))
            }
            Type::Array(element, max) => {
                let items = expect_array(value)?;
                let len = clamp(items.len(), *max);
                write_length(len, dest)?;
                items[..len].iter().try_for_each(|item| element.encode(item, dest))
            }
            Type::Optional(element) => encode_optional(element, value, dest),
            Type::Struct(structure) => structure.encode(value, dest),
            Type::Union(union) => union.encode(value, dest),
            Type::SelfRef(weak) => upgrade(weak)?.encode(value, dest),
        }
    }

    pub fn decode<R: Read>(&self, src: &mut R) -> std::io::Result<Value> {
        let value = match self {
            Type::Void => Value::Void,
            Type::Int => Value::Int(src.read_i32::<XDREndian>()?),
            Type::UInt => Value::UInt(src.read_u32::<XDREndian>()?),
            Type::Hyper => Value::Hyper(src.read_i64::<XDREndian>()?),
            Type::UHyper => Value::UHyper(src.read_u64::<XDREndian>()?),
            Type::Bool => match src.read_u32::<XDREndian>()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(invalid_data(format!("invalid value {other} for bool"))),
            },
            Type::Float => Value::Float(src.read_f32::<XDREndian>()?),
            Type::Double => Value::Double(src.read_f64::<XDREndian>()?),
            Type::Enum(enumeration) => enumeration.decode(src)?,
            Type::FixedOpaque(n) => {
                let mut bytes = utils::read_opaque(utils::padded_len(*n), src)?;
                bytes.truncate(*n);
                Value::Bytes(bytes)
            }
            Type::FixedString(n) => {
                let mut bytes = utils::read_opaque(utils::padded_len(*n), src)?;
                bytes.truncate(*n);
                Value::String(into_string(bytes)?)
            }
            Type::Opaque(_) => {
                let len = read_length(src)?;
                Value::Bytes(utils::read_opaque(len, src)?)
            }
            Type::String(_) => {
                let len = read_length(src)?;
                Value::String(into_string(utils::read_opaque(len, src)?)?)
            }
            Type::FixedArray(element, n) => Value::Array(decode_elements(element, *n, src)?),
            Type::Array(element, _) => {
                let len = read_length(src)?;
                Value::Array(decode_elements(element, len, src)?)
            }
            Type::Optional(element) => decode_optional(element, src)?,
            Type::Struct(structure) => structure.decode(src)?,
            Type::Union(union) => union.decode(src)?,
            Type::SelfRef(weak) => upgrade(weak)?.decode(src)?,
        };
        Ok(value)
    }
}

impl Type {
    fn as_structure(&self) -> std::io::Result<Option<Arc<Structure>>> {
        match self {
            Type::Struct(structure) => Ok(Some(Arc::clone(structure))),
            Type::SelfRef(weak) => upgrade(weak).map(Some),
            _ => Ok(None),
        }
    }
}

impl From<Enumeration> for Type {
    fn from(e: Enumeration) -> Self {
        Type::Enum(Arc::new(e))
    }
}

impl From<Arc<Enumeration>> for Type {
    fn from(e: Arc<Enumeration>) -> Self {
        Type::Enum(e)
    }
}

impl From<Structure> for Type {
    fn from(s: Structure) -> Self {
        Type::Struct(Arc::new(s))
    }
}

impl From<Arc<Structure>> for Type {
    fn from(s: Arc<Structure>) -> Self {
        Type::Struct(s)
    }
}

impl From<Union> for Type {
    fn from(u: Union) -> Self {
        Type::Union(Arc::new(u))
    }
}

impl From<Arc<Union>> for Type {
    fn from(u: Arc<Union>) -> Self {
        Type::Union(u)
    }
}

/// Enumeration: a signed integer with a bidirectional name table.
#[derive(Debug, Default)]
pub struct Enumeration {
    values: HashMap<String, i32>,
    names: HashMap<i32, String>,
}

impl Enumeration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named value.
    pub fn name(mut self, name: impl Into<String>, value: i32) -> Self {
        let name = name.into();
        self.values.insert(name.clone(), value);
        self.names.insert(value, name);
        self
    }

    /// Builds the name table of a Rust enum from its variants.
    pub fn of<T: ToPrimitive>(variants: impl IntoIterator<Item = (T, &'static str)>) -> Self {
        variants.into_iter().fold(Self::new(), |e, (variant, name)| match variant.to_i32() {
            Some(value) => e.name(name, value),
            None => e,
        })
    }

    /// Looks up the Rust enum variant carrying the value named `name`.
    pub fn variant<T: FromPrimitive>(&self, name: &str) -> Option<T> {
        self.value_of(name).and_then(T::from_i32)
    }

    pub fn variant_name<T: ToPrimitive>(&self, variant: T) -> Option<&str> {
        variant.to_i32().and_then(|value| self.name_of(value))
    }

    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.values.get(name).copied()
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.names.get(&value).map(String::as_str)
    }

    fn encode<W: Write>(&self, value: &Value, dest: &mut W) -> std::io::Result<()> {
        let name = match value {
            Value::Enum(name) | Value::String(name) => name,
            other => return Err(mismatch("enum", other)),
        };
        match self.value_of(name) {
            Some(v) => dest.write_i32::<XDREndian>(v),
            None => Err(invalid_data(format!("unknown enumeration name {name}"))),
        }
    }

    fn decode<R: Read>(&self, src: &mut R) -> std::io::Result<Value> {
        let v = src.read_i32::<XDREndian>()?;
        match self.name_of(v) {
            Some(name) => Ok(Value::Enum(name.to_string())),
            None => Err(invalid_data(format!("unknown enumeration value {v}"))),
        }
    }
}

/// Structure: named components encoded in declaration order.
#[derive(Debug, Default)]
pub struct Structure {
    components: Vec<(String, Type)>,
}

impl Structure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a component.
    pub fn component(mut self, name: impl Into<String>, ty: impl Into<Type>) -> Self {
        self.components.push((name.into(), ty.into()));
        self
    }

    /// Builds a structure that refers to itself, e.g. a linked list node.
    ///
    /// `build` receives a [`Type`] standing for the structure under
    /// construction; it is usually wrapped in [`Type::optional`].
    pub fn recursive(build: impl FnOnce(Type) -> Structure) -> Arc<Structure> {
        Arc::new_cyclic(|this| build(Type::SelfRef(this.clone())))
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.components.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    fn encode<W: Write>(&self, value: &Value, dest: &mut W) -> std::io::Result<()> {
        match value {
            Value::Struct(fields) => self.encode_fields(fields, dest),
            other => Err(mismatch("struct", other)),
        }
    }

    fn decode<R: Read>(&self, src: &mut R) -> std::io::Result<Value> {
        let mut fields = Fields::new();
        self.decode_fields(src, &mut fields)?;
        Ok(Value::Struct(fields))
    }

    fn encode_fields<W: Write>(&self, fields: &Fields, dest: &mut W) -> std::io::Result<()> {
        encode_components(&self.components, fields, dest)
    }

    fn decode_fields<R: Read>(&self, src: &mut R, into: &mut Fields) -> std::io::Result<()> {
        decode_components(&self.components, src, into)
    }

    /// Splits a list node into its leading components and a trailing
    /// optional link.
    fn tail_link(&self) -> Option<(&[(String, Type)], &str, &Arc<Type>)> {
        match self.components.split_last() {
            Some(((name, Type::Optional(next)), head)) => Some((head, name.as_str(), next)),
            _ => None,
        }
    }
}

fn encode_components<W: Write>(
    components: &[(String, Type)],
    fields: &Fields,
    dest: &mut W,
) -> std::io::Result<()> {
    for (name, ty) in components {
        let Some(value) = fields.get(name) else {
            return Err(invalid_data(format!("missing structure component {name}")));
        };
        ty.encode(value, dest)?;
    }
    Ok(())
}

fn decode_components<R: Read>(
    components: &[(String, Type)],
    src: &mut R,
    into: &mut Fields,
) -> std::io::Result<()> {
    for (name, ty) in components {
        into.insert(name.clone(), ty.decode(src)?);
    }
    Ok(())
}

/// Encodes optional data. A structure whose last component is itself
/// optional is a list node; the walk follows that link in a loop so the
/// stack depth does not grow with the list length.
fn encode_optional<W: Write>(element: &Arc<Type>, value: &Value, dest: &mut W) -> std::io::Result<()> {
    let mut element = Arc::clone(element);
    let mut value = value;
    loop {
        let inner = match value {
            Value::Optional(None) => return write_length(0, dest),
            Value::Optional(Some(inner)) => inner.as_ref(),
            other => return Err(mismatch("optional", other)),
        };
        write_length(1, dest)?;
        let Some(structure) = element.as_structure()? else {
            return element.encode(inner, dest);
        };
        let Some((head, link, next)) = structure.tail_link() else {
            return structure.encode(inner, dest);
        };
        let Value::Struct(fields) = inner else {
            return Err(mismatch("struct", inner));
        };
        encode_components(head, fields, dest)?;
        value = fields
            .get(link)
            .ok_or_else(|| invalid_data(format!("missing structure component {link}")))?;
        element = Arc::clone(next);
    }
}

/// Decodes optional data, the same wire shape as a variable array bounded to
/// one element. List nodes are collected front to back and linked afterwards.
fn decode_optional<R: Read>(element: &Arc<Type>, src: &mut R) -> std::io::Result<Value> {
    let mut element = Arc::clone(element);
    let mut nodes: Vec<(Fields, String)> = Vec::new();
    let mut list = loop {
        match read_length(src)? {
            0 => break Value::none(),
            1 => {}
            n => return Err(invalid_data(format!("optional data with {n} elements"))),
        }
        let Some(structure) = element.as_structure()? else {
            break Value::some(element.decode(src)?);
        };
        let Some((head, link, next)) = structure.tail_link() else {
            break Value::some(structure.decode(src)?);
        };
        let mut fields = Fields::new();
        decode_components(head, src, &mut fields)?;
        nodes.push((fields, link.to_string()));
        element = Arc::clone(next);
    };
    while let Some((mut fields, link)) = nodes.pop() {
        fields.insert(link, list);
        list = Value::some(Value::Struct(fields));
    }
    Ok(list)
}

/// Discriminated union. Each arm is a structure whose components are merged
/// into the union value next to the discriminant.
///
/// A discriminant with neither a matching arm nor a default arm is treated as
/// selecting a void arm.
#[derive(Debug)]
pub struct Union {
    discriminant: Type,
    arms: Vec<(Value, Arc<Structure>)>,
    default: Option<Arc<Structure>>,
}

impl Union {
    pub fn new(discriminant: impl Into<Type>) -> Self {
        Self { discriminant: discriminant.into(), arms: Vec::new(), default: None }
    }

    /// Adds an arm selected by `case`. Enumeration cases may be given by name.
    pub fn arm(mut self, case: impl Into<Value>, arm: Structure) -> Self {
        let case = self.normalize(case.into());
        self.arms.push((case, Arc::new(arm)));
        self
    }

    /// Adds a void arm selected by `case`.
    pub fn void_arm(self, case: impl Into<Value>) -> Self {
        self.arm(case, Structure::new())
    }

    /// Sets the arm used when no case matches.
    pub fn default_arm(mut self, arm: Structure) -> Self {
        self.default = Some(Arc::new(arm));
        self
    }

    fn select(&self, case: &Value) -> Option<&Arc<Structure>> {
        self.arms
            .iter()
            .find(|(c, _)| c == case)
            .map(|(_, arm)| arm)
            .or(self.default.as_ref())
    }

    // Brings a case to the form the discriminant decodes into.
    fn normalize(&self, mut case: Value) -> Value {
        match &self.discriminant {
            Type::Enum(_) => {
                if let Value::String(name) = &mut case {
                    return Value::Enum(std::mem::take(name));
                }
                case
            }
            Type::Bool => case.as_bool().map_or(case, Value::Bool),
            _ => case,
        }
    }

    fn encode<W: Write>(&self, value: &Value, dest: &mut W) -> std::io::Result<()> {
        let Value::Struct(fields) = value else {
            return Err(mismatch("union", value));
        };
        let Some(case) = fields.get(DISCRIMINANT) else {
            return Err(invalid_data("missing union discriminant"));
        };
        self.discriminant.encode(case, dest)?;
        match self.select(&self.normalize(case.clone())) {
            Some(arm) => arm.encode_fields(fields, dest),
            None => Ok(()),
        }
    }

    fn decode<R: Read>(&self, src: &mut R) -> std::io::Result<Value> {
        let case = self.discriminant.decode(src)?;
        let mut fields = Fields::new();
        if let Some(arm) = self.select(&case) {
            arm.decode_fields(src, &mut fields)?;
        }
        fields.insert(DISCRIMINANT.to_string(), case);
        Ok(Value::Struct(fields))
    }
}

fn upgrade(weak: &Weak<Structure>) -> std::io::Result<Arc<Structure>> {
    weak.upgrade().ok_or_else(|| invalid_data("recursive structure no longer exists"))
}

fn mismatch(expected: &str, got: &Value) -> std::io::Error {
    invalid_data(format!("expected {expected} value, got {}", got.kind()))
}

fn expect_int(value: &Value) -> std::io::Result<i32> {
    value.as_i32().ok_or_else(|| mismatch("int", value))
}

fn expect_uint(value: &Value) -> std::io::Result<u32> {
    value.as_u32().ok_or_else(|| mismatch("unsigned int", value))
}

fn expect_bytes<'a>(ty: &Type, value: &'a Value) -> std::io::Result<&'a [u8]> {
    let expected = match ty {
        Type::FixedString(_) | Type::String(_) => "string",
        _ => "opaque",
    };
    value.as_bytes().ok_or_else(|| mismatch(expected, value))
}

fn expect_array(value: &Value) -> std::io::Result<&[Value]> {
    value.as_array().ok_or_else(|| mismatch("array", value))
}

/// A declared maximum silently truncates on encode.
fn clamp(len: usize, max: Option<usize>) -> usize {
    max.map_or(len, |max| len.min(max))
}

fn write_length<W: Write>(len: usize, dest: &mut W) -> std::io::Result<()> {
    let len = u32::try_from(len).map_err(|_| invalid_data("cannot cast `usize` to `u32`"))?;
    dest.write_u32::<XDREndian>(len)
}

fn read_length<R: Read>(src: &mut R) -> std::io::Result<usize> {
    let len = src.read_u32::<XDREndian>()?;
    usize::try_from(len).map_err(|_| invalid_data("cannot cast `u32` to `usize`"))
}

fn decode_elements<R: Read>(element: &Type, len: usize, src: &mut R) -> std::io::Result<Vec<Value>> {
    let mut items = Vec::with_capacity(len.min(MAX_PREALLOCATED_ELEMENTS));
    for _ in 0..len {
        items.push(element.decode(src)?);
    }
    Ok(items)
}

fn into_string(bytes: Vec<u8>) -> std::io::Result<String> {
    String::from_utf8(bytes).map_err(|_| invalid_data("string is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> Enumeration {
        Enumeration::new().name("RED", 0).name("GREEN", 1).name("BLUE", -2)
    }

    #[test]
    fn integers_are_big_endian() {
        assert_eq!(Type::UInt.to_bytes(&Value::UInt(0x0102_0304)).unwrap(), [1, 2, 3, 4]);
        assert_eq!(Type::Int.to_bytes(&Value::Int(-1)).unwrap(), [0xff; 4]);
        assert_eq!(Type::Int.from_bytes(&[0xff, 0xff, 0xff, 0xfe]).unwrap(), Value::Int(-2));
        assert_eq!(
            Type::Hyper.to_bytes(&Value::Hyper(1)).unwrap(),
            [0, 0, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn enumeration_rejects_unknown_names_and_values() {
        let ty = Type::from(color());
        assert_eq!(ty.to_bytes(&Value::enumeration("BLUE")).unwrap(), (-2i32).to_be_bytes());
        assert_eq!(ty.from_bytes(&1i32.to_be_bytes()).unwrap(), Value::enumeration("GREEN"));
        assert!(ty.to_bytes(&Value::enumeration("PURPLE")).is_err());
        assert!(ty.from_bytes(&7i32.to_be_bytes()).is_err());
    }

    #[test]
    fn bool_accepts_only_zero_and_one() {
        assert_eq!(Type::Bool.to_bytes(&Value::enumeration("TRUE")).unwrap(), [0, 0, 0, 1]);
        assert_eq!(Type::Bool.from_bytes(&[0, 0, 0, 0]).unwrap(), Value::Bool(false));
        assert!(Type::Bool.from_bytes(&[0, 0, 0, 2]).is_err());
    }

    #[test]
    fn fixed_opaque_pads_and_truncates() {
        let ty = Type::FixedOpaque(5);
        let encoded = ty.to_bytes(&Value::Bytes(vec![1, 2])).unwrap();
        assert_eq!(encoded, [1, 2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(ty.from_bytes(&encoded).unwrap(), Value::Bytes(vec![1, 2, 0, 0, 0]));

        let long = ty.to_bytes(&Value::Bytes(vec![9; 7])).unwrap();
        assert_eq!(long, [9, 9, 9, 9, 9, 0, 0, 0]);
    }

    #[test]
    fn bounded_string_truncates_on_encode() {
        let ty = Type::bounded_string(3);
        let encoded = ty.to_bytes(&Value::from("abcdef")).unwrap();
        assert_eq!(encoded, [0, 0, 0, 3, b'a', b'b', b'c', 0]);
        assert_eq!(ty.from_bytes(&encoded).unwrap(), Value::from("abc"));
    }

    #[test]
    fn decode_trusts_wire_length_over_bound() {
        let ty = Type::bounded_opaque(2);
        let wire = [0, 0, 0, 4, 1, 2, 3, 4];
        assert_eq!(ty.from_bytes(&wire).unwrap(), Value::Bytes(vec![1, 2, 3, 4]));
    }

    #[test]
    fn aligned_payloads_get_no_extra_block() {
        let ty = Type::opaque();
        assert_eq!(ty.to_bytes(&Value::Bytes(vec![7; 4])).unwrap().len(), 8);
        assert_eq!(ty.to_bytes(&Value::Bytes(vec![7; 8])).unwrap().len(), 12);
        assert_eq!(Type::FixedOpaque(4).to_bytes(&Value::Bytes(vec![7; 4])).unwrap().len(), 4);
    }

    #[test]
    fn array_clamps_to_maximum() {
        let ty = Type::bounded_array(Type::UInt, 2);
        let value = Value::Array(vec![1u32.into(), 2u32.into(), 3u32.into()]);
        let encoded = ty.to_bytes(&value).unwrap();
        assert_eq!(encoded, [0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn fixed_array_has_no_length_prefix() {
        let ty = Type::fixed_array(Type::UInt, 2);
        let value = Value::Array(vec![1u32.into(), 2u32.into()]);
        assert_eq!(ty.to_bytes(&value).unwrap(), [0, 0, 0, 1, 0, 0, 0, 2]);
        assert!(ty.to_bytes(&Value::Array(vec![1u32.into()])).is_err());
    }

    #[test]
    fn optional_is_a_one_element_array() {
        let ty = Type::optional(Type::UInt);
        assert_eq!(ty.to_bytes(&Value::none()).unwrap(), [0, 0, 0, 0]);
        assert_eq!(ty.to_bytes(&Value::some(5u32.into())).unwrap(), [0, 0, 0, 1, 0, 0, 0, 5]);
        assert_eq!(
            ty.from_bytes(&[0, 0, 0, 1, 0, 0, 0, 5]).unwrap(),
            Value::some(Value::UInt(5))
        );
        assert!(ty.from_bytes(&[0, 0, 0, 2, 0, 0, 0, 5, 0, 0, 0, 6]).is_err());
    }

    #[test]
    fn floats_and_hyper_extremes_round_trip() {
        let cases = [
            (Type::Float, Value::Float(-1.5e-3), 4),
            (Type::Float, Value::Float(f32::MAX), 4),
            (Type::Double, Value::Double(-6.25e300), 8),
            (Type::Double, Value::Double(f64::MIN_POSITIVE), 8),
            (Type::Hyper, Value::Hyper(i64::MIN), 8),
            (Type::Hyper, Value::Hyper(-1), 8),
            (Type::UHyper, Value::UHyper(u64::MAX), 8),
        ];
        for (ty, value, len) in cases {
            let encoded = ty.to_bytes(&value).unwrap();
            assert_eq!(encoded.len(), len, "{value:?}");
            assert_eq!(ty.from_bytes(&encoded).unwrap(), value);
        }

        assert_eq!(Type::Float.to_bytes(&Value::Float(1.0)).unwrap(), [0x3f, 0x80, 0, 0]);
        assert_eq!(Type::Double.to_bytes(&Value::Double(-2.0)).unwrap(), [0xc0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Type::Hyper.to_bytes(&Value::Hyper(i64::MIN)).unwrap(), [0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Type::UHyper.to_bytes(&Value::UHyper(u64::MAX)).unwrap(), [0xff; 8]);
        assert!(Type::Double.to_bytes(&Value::Float(1.0)).is_err());
    }

    #[test]
    fn fixed_string_pads_and_truncates() {
        let ty = Type::FixedString(5);
        assert_eq!(ty.to_bytes(&Value::from("hello")).unwrap(), *b"hello\0\0\0");

        let truncated = ty.to_bytes(&Value::from("hello world")).unwrap();
        assert_eq!(truncated, *b"hello\0\0\0");
        assert_eq!(ty.from_bytes(&truncated).unwrap(), Value::from("hello"));

        let short = ty.to_bytes(&Value::from("hi")).unwrap();
        assert_eq!(short.len(), 8);
        assert_eq!(ty.from_bytes(&short).unwrap(), Value::from("hi\0\0\0"));
    }

    #[test]
    fn structure_reports_missing_component() {
        let ty = Type::from(Structure::new().component("a", Type::UInt).component("b", Type::UInt));
        let err = ty.to_bytes(&Value::structure([("a", Value::UInt(1))])).unwrap_err();
        assert!(err.to_string().contains("missing structure component b"), "{err}");
    }

    #[test]
    fn decode_leaves_remainder_in_cursor() {
        let ty = Type::from(Structure::new().component("a", Type::UInt));
        let data = [0, 0, 0, 1, 0xaa, 0xbb];
        let mut cursor = &data[..];
        ty.decode(&mut cursor).unwrap();
        assert_eq!(cursor, [0xaa, 0xbb]);
    }

    #[test]
    fn union_injects_discriminant_and_falls_back_to_default() {
        let ty = Type::from(
            Union::new(color())
                .arm("RED", Structure::new().component("level", Type::UInt))
                .void_arm("GREEN")
                .default_arm(Structure::new().component("other", Type::Int)),
        );

        let red = Value::union_of(Value::enumeration("RED"), [("level", Value::UInt(9))]);
        let encoded = ty.to_bytes(&red).unwrap();
        assert_eq!(encoded, [0, 0, 0, 0, 0, 0, 0, 9]);
        assert_eq!(ty.from_bytes(&encoded).unwrap(), red);

        let green = ty.to_bytes(&Value::void_union("GREEN")).unwrap();
        assert_eq!(green, [0, 0, 0, 1]);

        let blue = Value::union_of(Value::enumeration("BLUE"), [("other", Value::Int(-1))]);
        assert_eq!(ty.from_bytes(&ty.to_bytes(&blue).unwrap()).unwrap(), blue);
    }

    #[test]
    fn union_without_matching_arm_is_void() {
        let ty = Type::from(Union::new(Type::UInt).arm(0u32, Structure::new().component("x", Type::UInt)));
        assert_eq!(ty.to_bytes(&Value::void_union(3u32)).unwrap(), [0, 0, 0, 3]);
        assert_eq!(ty.from_bytes(&[0, 0, 0, 3]).unwrap(), Value::void_union(3u32));
    }

    #[test]
    fn recursive_structure_decodes_a_chain() {
        let node = Structure::recursive(|this| {
            Structure::new().component("value", Type::UInt).component("next", Type::optional(this))
        });
        let ty = Type::optional(node);

        let list = Value::some(Value::structure([
            ("value", Value::UInt(1)),
            (
                "next",
                Value::some(Value::structure([("value", Value::UInt(2)), ("next", Value::none())])),
            ),
        ]));
        let encoded = ty.to_bytes(&list).unwrap();
        assert_eq!(encoded.len(), 4 + 4 + 4 + 4 + 4);
        assert_eq!(ty.from_bytes(&encoded).unwrap(), list);
    }

    #[test]
    fn long_chains_are_walked_without_recursion() {
        const NODES: u32 = 200_000;
        let node = Structure::recursive(|this| {
            Structure::new().component("value", Type::UInt).component("next", Type::optional(this))
        });
        let ty = Type::optional(node);

        let list = (0..NODES).rev().fold(Value::none(), |next, i| {
            Value::some(Value::structure([("value", Value::UInt(i)), ("next", next)]))
        });
        let encoded = ty.to_bytes(&list).unwrap();
        assert_eq!(encoded.len(), NODES as usize * 8 + 4);
        drop(list);

        let decoded = ty.from_bytes(&encoded).unwrap();
        let mut count = 0;
        let mut cursor = &decoded;
        while let Some(Some(node)) = cursor.as_optional() {
            assert_eq!(node.field("value"), Some(&Value::UInt(count)));
            count += 1;
            cursor = node.field("next").unwrap();
        }
        assert_eq!(count, NODES);
    }
}
