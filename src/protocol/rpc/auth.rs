//! AUTH_UNIX credentials (RFC 5531 Appendix A, "AUTH_SYS").
//!
//! The envelope treats credentials as opaque; a handler that cares about the
//! caller's identity decodes the body here. Any flavor other than AUTH_UNIX is
//! refused.

// Type names follow the RFC XDR definitions
#![allow(non_camel_case_types)]

use std::sync::LazyLock;

use smallvec::SmallVec;

use super::envelope::{auth_flavor, auth_stat, opaque_auth};
use super::fault::RpcError;
use crate::protocol::xdr::utils::invalid_data;
use crate::protocol::xdr::{
    deserialize, take, take_bytes, take_u32, Structure, Type, Value, XdrCodec,
};

pub const AUTH_UNIX_MAX_MACHINE_NAME_LEN: usize = 255;
pub const AUTH_UNIX_MAX_GIDS: usize = 16;

pub static AUTH_UNIX: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("stamp", Type::UInt)
        .component("machinename", Type::bounded_string(AUTH_UNIX_MAX_MACHINE_NAME_LEN))
        .component("uid", Type::UInt)
        .component("gid", Type::UInt)
        .component("gids", Type::bounded_array(Type::UInt, AUTH_UNIX_MAX_GIDS))
        .into()
});

/// UNIX-style credentials sent by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct auth_unix {
    /// Timestamp to prevent replay attacks
    pub stamp: u32,
    /// The name of the client machine
    pub machinename: String,
    /// The effective user ID of the caller
    pub uid: u32,
    /// The effective group ID of the caller
    pub gid: u32,
    /// A list of additional group IDs for the caller
    pub gids: SmallVec<[u32; AUTH_UNIX_MAX_GIDS]>,
}

impl XdrCodec for auth_unix {
    fn schema() -> &'static Type {
        &AUTH_UNIX
    }

    fn to_value(&self) -> Value {
        Value::structure([
            ("stamp", Value::UInt(self.stamp)),
            ("machinename", Value::String(self.machinename.clone())),
            ("uid", Value::UInt(self.uid)),
            ("gid", Value::UInt(self.gid)),
            ("gids", Value::Array(self.gids.iter().copied().map(Value::UInt).collect())),
        ])
    }

    fn from_value(value: Value) -> std::io::Result<Self> {
        let mut fields = value.into_fields().ok_or_else(|| invalid_data("auth_unix is not a struct"))?;
        let gids: SmallVec<[u32; AUTH_UNIX_MAX_GIDS]> = match &take(&mut fields, "gids")? {
            Value::Array(items) => items
                .iter()
                .map(|gid| gid.as_u32().ok_or_else(|| invalid_data("gid is not an unsigned int")))
                .collect::<std::io::Result<_>>()?,
            _ => return Err(invalid_data("gids is not an array")),
        };
        let machinename = String::from_utf8(take_bytes(&mut fields, "machinename")?)
            .map_err(|_| invalid_data("machine name is not valid UTF-8"))?;
        Ok(auth_unix {
            stamp: take_u32(&mut fields, "stamp")?,
            machinename,
            uid: take_u32(&mut fields, "uid")?,
            gid: take_u32(&mut fields, "gid")?,
            gids,
        })
    }
}

impl auth_unix {
    /// Decodes the caller's identity from a call credential.
    ///
    /// Fails with `AUTH_TOOWEAK` for any flavor but AUTH_UNIX and with
    /// `AUTH_BADCRED` when the body does not decode.
    pub fn from_credential(cred: &opaque_auth) -> Result<auth_unix, RpcError> {
        if cred.flavor != auth_flavor::AUTH_UNIX {
            return Err(RpcError::auth(auth_stat::AUTH_TOOWEAK));
        }
        deserialize::<auth_unix>(&mut &cred.body[..]).map_err(|_| RpcError::auth(auth_stat::AUTH_BADCRED))
    }

    /// Wraps these credentials into an AUTH_UNIX `opaque_auth`.
    pub fn to_credential(&self) -> std::io::Result<opaque_auth> {
        let mut body = Vec::new();
        self.serialize(&mut body)?;
        Ok(opaque_auth { flavor: auth_flavor::AUTH_UNIX, body })
    }
}
