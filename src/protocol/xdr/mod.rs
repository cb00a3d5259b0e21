//! XDR is a standard for the description and encoding of data.
//! It is useful for transferring data between different computer
//! architectures, and it has been used to communicate data between such
//! diverse machines as the SUN WORKSTATION*, VAX*, IBM-PC*, and Cray*
//!
//! <https://datatracker.ietf.org/doc/html/rfc4506>
//!
//! This implementation is descriptor based: a schema is a graph of [`Type`]
//! values assembled once (usually in a `LazyLock` or a builder function) and
//! each descriptor encodes a dynamic [`Value`] to, and decodes it from, the
//! byte aligned wire format. Decoding always consumes exactly the bytes the
//! descriptor needs from the front of the reader and leaves the rest for the
//! next field, so a message can be decoded piecewise from one cursor.
//!
//! Wire rules:
//! - every integer is 4 bytes big endian (8 for `hyper`)
//! - opaque data and strings are padded with zero bytes to a 4-byte boundary
//! - variable length items carry a 4-byte length prefix; a declared maximum
//!   truncates on encode while decode trusts the wire length
//! - optional data is a variable array of at most one element

use std::io::{Read, Write};

use byteorder::BigEndian;

mod types;
pub mod utils;
mod value;

pub use types::{Enumeration, Structure, Type, Union};
pub use value::{take, take_bool, take_bytes, take_enum, take_fields, take_u32, Fields, Value, DISCRIMINANT};

/// XDR assumes big endian encoding.
pub type XDREndian = BigEndian;

/// A Rust type bound to a fixed XDR schema.
///
/// The schema does the wire work; implementors only convert between their
/// fields and a [`Value`].
pub trait XdrCodec: Sized {
    /// Descriptor that encodes and decodes this type.
    fn schema() -> &'static Type;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> std::io::Result<Self>;

    /// Serializes the implementing type to the provided writer.
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        Self::schema().encode(&self.to_value(), dest)
    }
}

/// Deserializes a value of type `T` from the front of `src`.
pub fn deserialize<T: XdrCodec>(src: &mut impl Read) -> std::io::Result<T> {
    T::from_value(T::schema().decode(src)?)
}
