//! The portmapper protocol (RFC 1833 section 3, version 2).
//!
//! Portmap maps RPC program numbers to network port numbers. Servers register
//! each (program, version, protocol) they serve with SET and remove it with
//! UNSET; clients ask for the port with GETPORT.

// Type names follow the RFC XDR definitions
#![allow(non_camel_case_types)]

use std::sync::{Arc, LazyLock};

use crate::protocol::rpc::{Program, Version, IPPROTO_TCP, IPPROTO_UDP};
use crate::protocol::xdr::utils::invalid_data;
use crate::protocol::xdr::{take_enum, take_u32, Enumeration, Structure, Type, Value, XdrCodec};

/// Portmap RPC program number
pub const PROGRAM: u32 = 100000;
/// Portmap RPC version number
pub const VERSION: u32 = 2;
/// Well known portmapper port
pub const PMAP_PORT: u16 = 111;

pub const PMAPPROC_SET: u32 = 1;
pub const PMAPPROC_UNSET: u32 = 2;
pub const PMAPPROC_GETPORT: u32 = 3;
pub const PMAPPROC_DUMP: u32 = 4;
pub const PMAPPROC_CALLIT: u32 = 5;

pub static PROT: LazyLock<Arc<Enumeration>> = LazyLock::new(|| {
    Arc::new(Enumeration::new().name("TCP_IP", IPPROTO_TCP as i32).name("UDP_IP", IPPROTO_UDP as i32))
});

pub static MAPPING: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("prog", Type::UInt)
        .component("vers", Type::UInt)
        .component("prot", PROT.clone())
        .component("port", Type::UInt)
        .into()
});

/// `pmaplist *`: a linked list of mappings, as returned by DUMP.
pub static PMAPLIST: LazyLock<Type> = LazyLock::new(|| {
    let node = Structure::recursive(|this| {
        Structure::new().component("map", MAPPING.clone()).component("next", Type::optional(this))
    });
    Type::optional(node)
});

pub static CALL_ARGS: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("prog", Type::UInt)
        .component("vers", Type::UInt)
        .component("proc", Type::UInt)
        .component("args", Type::opaque())
        .into()
});

pub static CALL_RESULT: LazyLock<Type> = LazyLock::new(|| {
    Structure::new().component("port", Type::UInt).component("res", Type::opaque()).into()
});

/// A fresh copy of the portmapper program, without handlers.
pub fn program() -> Program {
    Program::new("PMAP_PROG", PROGRAM).version(
        Version::new(VERSION)
            .procedure(PMAPPROC_SET, "SET", MAPPING.clone(), Type::Bool)
            .procedure(PMAPPROC_UNSET, "UNSET", MAPPING.clone(), Type::Bool)
            .procedure(PMAPPROC_GETPORT, "GETPORT", MAPPING.clone(), Type::UInt)
            .procedure(PMAPPROC_DUMP, "DUMP", Type::Void, PMAPLIST.clone())
            .procedure(PMAPPROC_CALLIT, "CALLIT", CALL_ARGS.clone(), CALL_RESULT.clone()),
    )
}

/// Represents a mapping between an RPC program and a network port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct mapping {
    /// The RPC program number
    pub prog: u32,
    /// The RPC program version number
    pub vers: u32,
    /// The transport protocol (see the IPPROTO_* constants)
    pub prot: u32,
    /// The port number where the service is listening
    pub port: u32,
}

impl XdrCodec for mapping {
    fn schema() -> &'static Type {
        &MAPPING
    }

    fn to_value(&self) -> Value {
        let prot = PROT.name_of(self.prot as i32).map(str::to_string).unwrap_or_else(|| self.prot.to_string());
        Value::structure([
            ("prog", Value::UInt(self.prog)),
            ("vers", Value::UInt(self.vers)),
            ("prot", Value::Enum(prot)),
            ("port", Value::UInt(self.port)),
        ])
    }

    fn from_value(value: Value) -> std::io::Result<Self> {
        let mut fields = value.into_fields().ok_or_else(|| invalid_data("mapping is not a struct"))?;
        let prot = take_enum(&mut fields, "prot")?;
        let prot = PROT.value_of(&prot).ok_or_else(|| invalid_data(format!("unknown protocol {prot}")))?;
        Ok(mapping {
            prog: take_u32(&mut fields, "prog")?,
            vers: take_u32(&mut fields, "vers")?,
            prot: prot as u32,
            port: take_u32(&mut fields, "port")?,
        })
    }
}

/// Builds the DUMP result from a list of mappings.
pub fn pmaplist_value(mappings: &[mapping]) -> Value {
    mappings.iter().rev().fold(Value::none(), |next, map| {
        Value::some(Value::structure([("map", map.to_value()), ("next", next)]))
    })
}

/// Flattens a decoded DUMP result.
pub fn pmaplist_from_value(mut list: Value) -> std::io::Result<Vec<mapping>> {
    let mut mappings = Vec::new();
    loop {
        let kind = list.kind();
        let node = match list.into_optional() {
            Some(None) => return Ok(mappings),
            Some(Some(node)) => node,
            None => return Err(invalid_data(format!("pmaplist is {kind}, not optional"))),
        };
        let mut fields = node.into_fields().ok_or_else(|| invalid_data("pmaplist node is not a struct"))?;
        let map = fields.remove("map").ok_or_else(|| invalid_data("pmaplist node without map"))?;
        mappings.push(mapping::from_value(map)?);
        list = fields.remove("next").ok_or_else(|| invalid_data("pmaplist node without next"))?;
    }
}
