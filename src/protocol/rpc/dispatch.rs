//! Server side request handling, shared by every transport.
//!
//! `receive -> decode envelope -> registry -> encode reply -> send`: transports
//! own the first and last step, this module everything in between. Every
//! failure becomes a fault, and a fault either renders to a reply or to nothing.

use tracing::{debug, error, trace, warn};

use super::context::CallContext;
use super::envelope::{call_body, make_success_reply, rpc_body, rpc_msg, RPC_VERSION};
use super::fault::RpcError;
use super::program::Registry;
use crate::protocol::xdr::{deserialize, XdrCodec};

/// A decoded call envelope and the argument bytes following it.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub xid: u32,
    pub call: call_body,
    pub args: &'a [u8],
}

/// Transaction id of a message, if it is long enough to have one.
pub fn peek_xid(data: &[u8]) -> Option<u32> {
    let xid = data.get(..4)?;
    Some(u32::from_be_bytes([xid[0], xid[1], xid[2], xid[3]]))
}

/// Decodes the envelope of an inbound call.
///
/// Malformed input and REPLY messages are dropped with
/// [`RpcError::IgnoreRequest`]; a call for an RPC version other than 2 is
/// denied with the supported range.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope<'_>, RpcError> {
    let mut rest = data;
    let msg = deserialize::<rpc_msg>(&mut rest).map_err(|e| {
        debug!("dropping malformed RPC message: {}", e);
        RpcError::IgnoreRequest
    })?;
    let rpc_body::CALL(call) = msg.body else {
        warn!("Unexpectedly received a Reply instead of a Call");
        return Err(RpcError::IgnoreRequest);
    };
    if call.rpcvers != RPC_VERSION {
        warn!("Invalid RPC version {} != {}", call.rpcvers, RPC_VERSION);
        return Err(RpcError::rpc_mismatch());
    }
    Ok(Envelope { xid: msg.xid, call, args: rest })
}

/// Handles one inbound message and returns the reply to send, if any.
pub async fn handle_request(registry: &Registry, data: &[u8], mut context: CallContext) -> Option<Vec<u8>> {
    let outcome = match decode_envelope(data) {
        Ok(envelope) => {
            trace!(
                "call xid:{} prog:{} vers:{} proc:{} from {}",
                envelope.xid,
                envelope.call.prog,
                envelope.call.vers,
                envelope.call.proc,
                context.client_addr
            );
            context.xid = envelope.xid;
            context.cred = envelope.call.cred.clone();
            context.verf = envelope.call.verf.clone();
            let call = &envelope.call;
            match registry.call(call.prog, call.vers, call.proc, envelope.args, context).await {
                Ok(result) => success_reply(envelope.xid, &result),
                Err(fault) => Err(fault),
            }
        }
        Err(fault) => Err(fault),
    };
    match outcome {
        Ok(reply) => Some(reply),
        Err(fault) => {
            let xid = peek_xid(data)?;
            debug!("xid {} answered with fault: {}", xid, fault);
            match fault.render(xid) {
                Ok(reply) => reply,
                Err(e) => {
                    error!("failed to encode fault reply for xid {}: {}", xid, e);
                    None
                }
            }
        }
    }
}

fn success_reply(xid: u32, result: &[u8]) -> Result<Vec<u8>, RpcError> {
    let mut reply = Vec::with_capacity(24 + result.len());
    make_success_reply(xid).serialize(&mut reply).map_err(|e| {
        error!("failed to encode reply header for xid {}: {}", xid, e);
        RpcError::IgnoreRequest
    })?;
    reply.extend_from_slice(result);
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::protocol::rpc::context::Protocol;
    use crate::protocol::rpc::envelope::{make_call, reply_body, accept_body};
    use crate::protocol::rpc::program::{Program, Version};
    use crate::protocol::xdr::{Type, Value};

    fn context() -> CallContext {
        CallContext::new(SocketAddr::from(([127, 0, 0, 1], 900)), 0, Protocol::Tcp)
    }

    fn registry() -> Registry {
        let program = Program::new("DOUBLE", 400)
            .version(Version::new(1).procedure(1, "DOUBLE", Type::UInt, Type::UInt))
            .with_handler(1, "DOUBLE", |args: Value, _: CallContext| async move {
                let n = args.as_u32().ok_or_else(RpcError::garbage_arguments)?;
                Ok(Value::UInt(n * 2))
            })
            .unwrap();
        Registry::new([program])
    }

    fn call_bytes(xid: u32, rpcvers: u32, proc: u32, args: &[u8]) -> Vec<u8> {
        let mut msg = make_call(xid, 400, 1, proc);
        if let rpc_body::CALL(call) = &mut msg.body {
            call.rpcvers = rpcvers;
        }
        let mut buf = Vec::new();
        msg.serialize(&mut buf).unwrap();
        buf.extend_from_slice(args);
        buf
    }

    #[tokio::test]
    async fn success_reply_carries_result() {
        let reply = handle_request(&registry(), &call_bytes(5, 2, 1, &[0, 0, 0, 21]), context()).await.unwrap();
        let mut rest = &reply[..];
        let msg = deserialize::<rpc_msg>(&mut rest).unwrap();
        assert_eq!(msg.xid, 5);
        let rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted)) = msg.body else {
            panic!("expected an accepted reply");
        };
        assert_eq!(accepted.reply_data, accept_body::SUCCESS);
        assert_eq!(rest, &[0, 0, 0, 42]);
    }

    #[tokio::test]
    async fn wrong_rpc_version_is_denied() {
        let reply = handle_request(&registry(), &call_bytes(6, 3, 1, &[]), context()).await.unwrap();
        let msg = deserialize::<rpc_msg>(&mut &reply[..]).unwrap();
        let rpc_body::REPLY(body) = msg.body else {
            panic!("expected a reply");
        };
        assert_eq!(RpcError::from_reply(&body), Some(RpcError::rpc_mismatch()));
    }

    #[tokio::test]
    async fn garbage_and_replies_are_dropped() {
        assert_eq!(handle_request(&registry(), &[0, 0, 0, 1, 0, 0], context()).await, None);

        let mut reply = Vec::new();
        make_success_reply(8).serialize(&mut reply).unwrap();
        assert_eq!(handle_request(&registry(), &reply, context()).await, None);
    }
}
