//! This module provides data structures for the Remote Procedure Call (RPC) protocol
//! as defined in RFC 5531 (previously RFC 1057). These structures handle serialization and deserialization
//! of RPC messages between client and server.
//!
//! The wire layout is declared once as XDR descriptors ([`RPC_MSG`] and friends);
//! the Rust types below convert to and from the dynamic values those
//! descriptors produce.

// Type names follow the RFC XDR definitions
#![allow(non_camel_case_types)]

use std::sync::{Arc, LazyLock};

use num_derive::{FromPrimitive, ToPrimitive};

use crate::protocol::xdr::utils::invalid_data;
use crate::protocol::xdr::{
    take_bytes, take_enum, take_fields, take_u32, Enumeration, Fields, Structure, Type, Union,
    Value, XdrCodec, DISCRIMINANT,
};

/// The only RPC protocol version this crate speaks.
pub const RPC_VERSION: u32 = 2;
/// Maximum size of the body of an `opaque_auth`.
pub const MAX_AUTH_LEN: usize = 400;

pub static AUTH_FLAVOR: LazyLock<Arc<Enumeration>> = LazyLock::new(|| {
    Arc::new(Enumeration::of([
        (auth_flavor::AUTH_NULL, "AUTH_NULL"),
        (auth_flavor::AUTH_UNIX, "AUTH_UNIX"),
        (auth_flavor::AUTH_SHORT, "AUTH_SHORT"),
        (auth_flavor::AUTH_DES, "AUTH_DES"),
    ]))
});

pub static AUTH_STAT: LazyLock<Arc<Enumeration>> = LazyLock::new(|| {
    Arc::new(Enumeration::of([
        (auth_stat::AUTH_BADCRED, "AUTH_BADCRED"),
        (auth_stat::AUTH_REJECTEDCRED, "AUTH_REJECTEDCRED"),
        (auth_stat::AUTH_BADVERF, "AUTH_BADVERF"),
        (auth_stat::AUTH_REJECTEDVERF, "AUTH_REJECTEDVERF"),
        (auth_stat::AUTH_TOOWEAK, "AUTH_TOOWEAK"),
    ]))
});

pub static OPAQUE_AUTH: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("flavor", AUTH_FLAVOR.clone())
        .component("body", Type::bounded_opaque(MAX_AUTH_LEN))
        .into()
});

fn mismatch_info_struct() -> Structure {
    Structure::new().component("low", Type::UInt).component("high", Type::UInt)
}

pub static CALL_BODY: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("rpcvers", Type::UInt)
        .component("prog", Type::UInt)
        .component("vers", Type::UInt)
        .component("proc", Type::UInt)
        .component("cred", OPAQUE_AUTH.clone())
        .component("verf", OPAQUE_AUTH.clone())
        .into()
});

pub static ACCEPTED_REPLY: LazyLock<Type> = LazyLock::new(|| {
    let accept_stat = Enumeration::new()
        .name("SUCCESS", 0)
        .name("PROG_UNAVAIL", 1)
        .name("PROG_MISMATCH", 2)
        .name("PROC_UNAVAIL", 3)
        .name("GARBAGE_ARGS", 4);
    // Procedure specific results follow a SUCCESS reply on the wire.
    let reply_data = Union::new(accept_stat)
        .void_arm("SUCCESS")
        .arm("PROG_MISMATCH", mismatch_info_struct())
        .default_arm(Structure::new());
    Structure::new()
        .component("verf", OPAQUE_AUTH.clone())
        .component("reply_data", reply_data)
        .into()
});

pub static REJECTED_REPLY: LazyLock<Type> = LazyLock::new(|| {
    let reject_stat = Enumeration::new().name("RPC_MISMATCH", 0).name("AUTH_ERROR", 1);
    Union::new(reject_stat)
        .arm("RPC_MISMATCH", mismatch_info_struct())
        .arm("AUTH_ERROR", Structure::new().component("stat", AUTH_STAT.clone()))
        .into()
});

pub static REPLY_BODY: LazyLock<Type> = LazyLock::new(|| {
    let reply_stat = Enumeration::new().name("MSG_ACCEPTED", 0).name("MSG_DENIED", 1);
    Union::new(reply_stat)
        .arm("MSG_ACCEPTED", Structure::new().component("areply", ACCEPTED_REPLY.clone()))
        .arm("MSG_DENIED", Structure::new().component("rreply", REJECTED_REPLY.clone()))
        .into()
});

pub static RPC_MSG: LazyLock<Type> = LazyLock::new(|| {
    let msg_type = Enumeration::new().name("CALL", 0).name("REPLY", 1);
    let body = Union::new(msg_type)
        .arm("CALL", Structure::new().component("cbody", CALL_BODY.clone()))
        .arm("REPLY", Structure::new().component("rbody", REPLY_BODY.clone()));
    Structure::new().component("xid", Type::UInt).component("body", body).into()
});

/// Authentication status codes indicating why authentication failed
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Invalid credentials provided by client (checksum/signature verification failed)
    AUTH_BADCRED = 1,
    /// Credentials rejected - client needs to establish a new session
    AUTH_REJECTEDCRED = 2,
    /// Invalid verifier provided by client (checksum/signature verification failed)
    AUTH_BADVERF = 3,
    /// Verifier rejected due to expiration or replay attempt
    AUTH_REJECTEDVERF = 4,
    /// Authentication mechanism too weak for requested operation
    AUTH_TOOWEAK = 5,
}

impl auth_stat {
    pub fn name(self) -> &'static str {
        AUTH_STAT.variant_name(self).unwrap_or_default()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AUTH_STAT.variant(name)
    }
}

/// Authentication flavor (mechanism) identifiers for RPC
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_flavor {
    /// No authentication
    #[default]
    AUTH_NULL = 0,
    /// UNIX-style authentication (uid/gid)
    AUTH_UNIX = 1,
    /// Short-form authentication
    AUTH_SHORT = 2,
    /// DES authentication
    AUTH_DES = 3,
}

impl auth_flavor {
    pub fn name(self) -> &'static str {
        AUTH_FLAVOR.variant_name(self).unwrap_or_default()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AUTH_FLAVOR.variant(name)
    }
}

/// Authentication data structure used in RPC protocol for both client and server authentication.
///
/// - Call messages contain two auth fields: credentials and verifier
/// - Reply messages contain one auth field: response verifier
///
/// The body is opaque at the envelope level; its format depends on the flavor
/// (see [`super::auth_unix`]).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct opaque_auth {
    /// The authentication mechanism being used
    pub flavor: auth_flavor,
    /// The opaque authentication data associated with that mechanism
    pub body: Vec<u8>,
}

impl XdrCodec for opaque_auth {
    fn schema() -> &'static Type {
        &OPAQUE_AUTH
    }

    fn to_value(&self) -> Value {
        Value::structure([
            ("flavor", Value::enumeration(self.flavor.name())),
            ("body", Value::Bytes(self.body.clone())),
        ])
    }

    fn from_value(value: Value) -> std::io::Result<Self> {
        let mut fields = value.into_fields().ok_or_else(|| invalid_data("opaque_auth is not a struct"))?;
        Self::from_fields(&mut fields)
    }
}

impl opaque_auth {
    fn from_fields(fields: &mut Fields) -> std::io::Result<Self> {
        let flavor = take_enum(fields, "flavor")?;
        let flavor = auth_flavor::from_name(&flavor)
            .ok_or_else(|| invalid_data(format!("unknown auth flavor {flavor}")))?;
        let body = take_bytes(fields, "body")?;
        Ok(opaque_auth { flavor, body })
    }
}

/// RPC message structure as defined in RFC 5531 (previously RFC 1057).
///
/// Each RPC message begins with a transaction identifier (xid) followed by a
/// discriminated union containing either a CALL or REPLY message body.
///
/// The xid in a REPLY always matches the xid from the initiating CALL; it is
/// only used for request/response matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct rpc_msg {
    /// Transaction identifier used to match calls and replies
    pub xid: u32,
    /// The body of the RPC message (call or reply)
    pub body: rpc_body,
}

/// The body of an RPC message, which can be either a call or a reply
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum rpc_body {
    /// A call to a remote procedure
    CALL(call_body),
    /// A reply from a remote procedure
    REPLY(reply_body),
}

/// The body of an RPC call, containing all information needed for a remote procedure call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct call_body {
    /// RPC version, must be 2
    pub rpcvers: u32,
    /// The program to call
    pub prog: u32,
    /// The version of the program
    pub vers: u32,
    /// The procedure within the program to call
    pub proc: u32,
    /// Authentication credentials for the caller
    pub cred: opaque_auth,
    /// Authentication verifier for the caller
    pub verf: opaque_auth,
    /* procedure specific parameters start here */
}

/// The body of an RPC reply, indicating whether the call was accepted or denied
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum reply_body {
    /// The call was accepted
    MSG_ACCEPTED(accepted_reply),
    /// The call was denied
    MSG_DENIED(rejected_reply),
}

/// Information about version mismatch
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    /// Lowest version supported
    pub low: u32,
    /// Highest version supported
    pub high: u32,
}

/// Reply to an RPC call that was accepted by the server.
///
/// Even though the call was accepted, there could still be an error in processing it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct accepted_reply {
    /// Authentication verifier from server
    pub verf: opaque_auth,
    /// Reply data union discriminated by accept_stat
    pub reply_data: accept_body,
}

/// Response data for an accepted RPC call, discriminated by accept_stat.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum accept_body {
    /// Call completed successfully, results follow the envelope
    #[default]
    SUCCESS,
    /// Program is not available on this server
    PROG_UNAVAIL,
    /// Program version mismatch, includes supported version range
    PROG_MISMATCH(mismatch_info),
    /// Requested procedure is not available
    PROC_UNAVAIL,
    /// Server could not decode the call arguments
    GARBAGE_ARGS,
}

/// Reply sent when an RPC call is rejected by the server.
///
/// 1. RPC_MISMATCH: the caller speaks another RPC protocol version
/// 2. AUTH_ERROR: the server refuses to authenticate the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum rejected_reply {
    /// RPC version mismatch - includes supported version range
    RPC_MISMATCH(mismatch_info),
    /// Authentication failed - includes specific error code
    AUTH_ERROR(auth_stat),
}

fn mismatch_value(info: &mismatch_info) -> [(&'static str, Value); 2] {
    [("low", Value::UInt(info.low)), ("high", Value::UInt(info.high))]
}

fn mismatch_from_fields(fields: &mut Fields) -> std::io::Result<mismatch_info> {
    Ok(mismatch_info { low: take_u32(fields, "low")?, high: take_u32(fields, "high")? })
}

fn call_value(call: &call_body) -> Value {
    Value::structure([
        ("rpcvers", Value::UInt(call.rpcvers)),
        ("prog", Value::UInt(call.prog)),
        ("vers", Value::UInt(call.vers)),
        ("proc", Value::UInt(call.proc)),
        ("cred", call.cred.to_value()),
        ("verf", call.verf.to_value()),
    ])
}

fn accepted_value(reply: &accepted_reply) -> Value {
    let reply_data = match &reply.reply_data {
        accept_body::SUCCESS => Value::void_union(Value::enumeration("SUCCESS")),
        accept_body::PROG_UNAVAIL => Value::void_union(Value::enumeration("PROG_UNAVAIL")),
        accept_body::PROG_MISMATCH(info) => {
            Value::union_of(Value::enumeration("PROG_MISMATCH"), mismatch_value(info))
        }
        accept_body::PROC_UNAVAIL => Value::void_union(Value::enumeration("PROC_UNAVAIL")),
        accept_body::GARBAGE_ARGS => Value::void_union(Value::enumeration("GARBAGE_ARGS")),
    };
    Value::structure([("verf", reply.verf.to_value()), ("reply_data", reply_data)])
}

fn rejected_value(reply: &rejected_reply) -> Value {
    match reply {
        rejected_reply::RPC_MISMATCH(info) => {
            Value::union_of(Value::enumeration("RPC_MISMATCH"), mismatch_value(info))
        }
        rejected_reply::AUTH_ERROR(stat) => Value::union_of(
            Value::enumeration("AUTH_ERROR"),
            [("stat", Value::enumeration(stat.name()))],
        ),
    }
}

impl XdrCodec for rpc_msg {
    fn schema() -> &'static Type {
        &RPC_MSG
    }

    fn to_value(&self) -> Value {
        let body = match &self.body {
            rpc_body::CALL(call) => {
                Value::union_of(Value::enumeration("CALL"), [("cbody", call_value(call))])
            }
            rpc_body::REPLY(reply) => {
                let rbody = match reply {
                    reply_body::MSG_ACCEPTED(accepted) => Value::union_of(
                        Value::enumeration("MSG_ACCEPTED"),
                        [("areply", accepted_value(accepted))],
                    ),
                    reply_body::MSG_DENIED(rejected) => Value::union_of(
                        Value::enumeration("MSG_DENIED"),
                        [("rreply", rejected_value(rejected))],
                    ),
                };
                Value::union_of(Value::enumeration("REPLY"), [("rbody", rbody)])
            }
        };
        Value::structure([("xid", Value::UInt(self.xid)), ("body", body)])
    }

    fn from_value(value: Value) -> std::io::Result<Self> {
        let mut msg = value.into_fields().ok_or_else(|| invalid_data("rpc_msg is not a struct"))?;
        let xid = take_u32(&mut msg, "xid")?;
        let mut body = take_fields(&mut msg, "body")?;
        let body = match take_enum(&mut body, DISCRIMINANT)?.as_str() {
            "CALL" => rpc_body::CALL(call_from_fields(take_fields(&mut body, "cbody")?)?),
            "REPLY" => rpc_body::REPLY(reply_from_fields(take_fields(&mut body, "rbody")?)?),
            other => return Err(invalid_data(format!("Invalid message type in rpc_body: {other}"))),
        };
        Ok(rpc_msg { xid, body })
    }
}

fn call_from_fields(mut fields: Fields) -> std::io::Result<call_body> {
    Ok(call_body {
        rpcvers: take_u32(&mut fields, "rpcvers")?,
        prog: take_u32(&mut fields, "prog")?,
        vers: take_u32(&mut fields, "vers")?,
        proc: take_u32(&mut fields, "proc")?,
        cred: opaque_auth::from_fields(&mut take_fields(&mut fields, "cred")?)?,
        verf: opaque_auth::from_fields(&mut take_fields(&mut fields, "verf")?)?,
    })
}

fn reply_from_fields(mut fields: Fields) -> std::io::Result<reply_body> {
    match take_enum(&mut fields, DISCRIMINANT)?.as_str() {
        "MSG_ACCEPTED" => {
            let mut areply = take_fields(&mut fields, "areply")?;
            let verf = opaque_auth::from_fields(&mut take_fields(&mut areply, "verf")?)?;
            let mut data = take_fields(&mut areply, "reply_data")?;
            let reply_data = match take_enum(&mut data, DISCRIMINANT)?.as_str() {
                "SUCCESS" => accept_body::SUCCESS,
                "PROG_UNAVAIL" => accept_body::PROG_UNAVAIL,
                "PROG_MISMATCH" => accept_body::PROG_MISMATCH(mismatch_from_fields(&mut data)?),
                "PROC_UNAVAIL" => accept_body::PROC_UNAVAIL,
                "GARBAGE_ARGS" => accept_body::GARBAGE_ARGS,
                other => return Err(invalid_data(format!("Invalid accept stat: {other}"))),
            };
            Ok(reply_body::MSG_ACCEPTED(accepted_reply { verf, reply_data }))
        }
        "MSG_DENIED" => {
            let mut rreply = take_fields(&mut fields, "rreply")?;
            let rejected = match take_enum(&mut rreply, DISCRIMINANT)?.as_str() {
                "RPC_MISMATCH" => rejected_reply::RPC_MISMATCH(mismatch_from_fields(&mut rreply)?),
                "AUTH_ERROR" => {
                    let stat = take_enum(&mut rreply, "stat")?;
                    rejected_reply::AUTH_ERROR(
                        auth_stat::from_name(&stat)
                            .ok_or_else(|| invalid_data(format!("unknown auth stat {stat}")))?,
                    )
                }
                other => return Err(invalid_data(format!("Invalid reject stat: {other}"))),
            };
            Ok(reply_body::MSG_DENIED(rejected))
        }
        other => Err(invalid_data(format!("Invalid reply status in reply_body: {other}"))),
    }
}

/// Builds a call message with null credentials.
pub fn make_call(xid: u32, prog: u32, vers: u32, proc: u32) -> rpc_msg {
    rpc_msg {
        xid,
        body: rpc_body::CALL(call_body {
            rpcvers: RPC_VERSION,
            prog,
            vers,
            proc,
            cred: opaque_auth::default(),
            verf: opaque_auth::default(),
        }),
    }
}

fn accepted(xid: u32, reply_data: accept_body) -> rpc_msg {
    let reply = reply_body::MSG_ACCEPTED(accepted_reply { verf: opaque_auth::default(), reply_data });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a reply message indicating that the requested procedure is not available
pub fn proc_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::PROC_UNAVAIL)
}

/// Creates a reply message indicating that the requested program is not available
pub fn prog_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::PROG_UNAVAIL)
}

/// Creates a reply message indicating a program version mismatch
pub fn prog_mismatch_reply_message(xid: u32, low: u32, high: u32) -> rpc_msg {
    accepted(xid, accept_body::PROG_MISMATCH(mismatch_info { low, high }))
}

/// Creates a reply message indicating that the arguments could not be decoded
pub fn garbage_args_reply_message(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::GARBAGE_ARGS)
}

/// Creates a reply message indicating an RPC version mismatch
pub fn rpc_vers_mismatch(xid: u32, low: u32, high: u32) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(mismatch_info { low, high }));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a reply message refusing to authenticate the caller
pub fn auth_error_reply_message(xid: u32, stat: auth_stat) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a successful reply header; procedure results are appended after it
pub fn make_success_reply(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::deserialize;

    #[test]
    fn auth_names_follow_wire_values() {
        let stats = [
            auth_stat::AUTH_BADCRED,
            auth_stat::AUTH_REJECTEDCRED,
            auth_stat::AUTH_BADVERF,
            auth_stat::AUTH_REJECTEDVERF,
            auth_stat::AUTH_TOOWEAK,
        ];
        for stat in stats {
            assert_eq!(auth_stat::from_name(stat.name()), Some(stat));
            assert_eq!(AUTH_STAT.value_of(stat.name()), Some(stat as i32));
        }
        assert_eq!(auth_flavor::AUTH_UNIX.name(), "AUTH_UNIX");
        assert_eq!(auth_flavor::from_name("AUTH_DES"), Some(auth_flavor::AUTH_DES));
        assert_eq!(auth_flavor::from_name("RPCSEC_GSS"), None);
    }

    #[test]
    fn success_reply_matches_rfc_layout() {
        let mut buf = Vec::new();
        make_success_reply(9).serialize(&mut buf).unwrap();
        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 9, // xid
            0, 0, 0, 1, // REPLY
            0, 0, 0, 0, // MSG_ACCEPTED
            0, 0, 0, 0, 0, 0, 0, 0, // AUTH_NULL verifier, empty body
            0, 0, 0, 0, // SUCCESS
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn call_round_trips_with_remaining_arguments() {
        let mut call = make_call(3, 100003, 2, 1);
        if let rpc_body::CALL(body) = &mut call.body {
            body.cred = opaque_auth { flavor: auth_flavor::AUTH_UNIX, body: vec![1, 2, 3, 4, 5] };
        }
        let mut buf = Vec::new();
        call.serialize(&mut buf).unwrap();
        buf.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let mut cursor = &buf[..];
        let decoded = deserialize::<rpc_msg>(&mut cursor).unwrap();
        assert_eq!(decoded, call);
        assert_eq!(cursor, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn denied_replies_round_trip() {
        for msg in [rpc_vers_mismatch(1, 2, 2), auth_error_reply_message(2, auth_stat::AUTH_TOOWEAK)]
        {
            let mut buf = Vec::new();
            msg.serialize(&mut buf).unwrap();
            assert_eq!(deserialize::<rpc_msg>(&mut &buf[..]).unwrap(), msg);
        }
    }

    #[test]
    fn prog_mismatch_carries_bounds() {
        let mut buf = Vec::new();
        prog_mismatch_reply_message(5, 2, 3).serialize(&mut buf).unwrap();
        assert_eq!(&buf[buf.len() - 12..], [0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 3]);
    }
}
