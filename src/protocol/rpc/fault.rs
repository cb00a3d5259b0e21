//! Protocol faults.
//!
//! Every way a call can fail short of a successful reply is one of these
//! values. A fault renders itself into a complete reply message for a given
//! transaction id, except [`RpcError::IgnoreRequest`] which means "send nothing".

use super::envelope::{
    accept_body, auth_error_reply_message, auth_stat, garbage_args_reply_message,
    proc_unavail_reply_message, prog_mismatch_reply_message, prog_unavail_reply_message,
    rejected_reply, reply_body, rpc_msg, rpc_vers_mismatch, RPC_VERSION,
};
use crate::protocol::xdr::XdrCodec;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Drop the request without answering.
    #[error("request ignored")]
    IgnoreRequest,
    /// The call was rejected (`MSG_DENIED`).
    #[error("request denied: {0}")]
    Denied(#[from] Denial),
    /// The call was accepted but could not be carried out.
    #[error("call failed: {0}")]
    Accepted(#[from] AcceptedError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("RPC version mismatch, server supports {low}..={high}")]
    RpcMismatch { low: u32, high: u32 },
    #[error("authentication error {}", .0.name())]
    Auth(auth_stat),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AcceptedError {
    #[error("program unavailable")]
    ProgramUnavailable,
    #[error("program version mismatch, server supports {low}..={high}")]
    ProgramMismatch { low: u32, high: u32 },
    #[error("procedure unavailable")]
    ProcedureUnavailable,
    #[error("garbage arguments")]
    GarbageArguments,
}

impl RpcError {
    pub fn auth(stat: auth_stat) -> Self {
        RpcError::Denied(Denial::Auth(stat))
    }

    /// RPC version mismatch for a server speaking only version 2.
    pub fn rpc_mismatch() -> Self {
        RpcError::Denied(Denial::RpcMismatch { low: RPC_VERSION, high: RPC_VERSION })
    }

    pub fn program_unavailable() -> Self {
        RpcError::Accepted(AcceptedError::ProgramUnavailable)
    }

    pub fn program_mismatch(low: u32, high: u32) -> Self {
        RpcError::Accepted(AcceptedError::ProgramMismatch { low, high })
    }

    pub fn procedure_unavailable() -> Self {
        RpcError::Accepted(AcceptedError::ProcedureUnavailable)
    }

    pub fn garbage_arguments() -> Self {
        RpcError::Accepted(AcceptedError::GarbageArguments)
    }

    /// The reply message answering `xid` with this fault.
    pub fn to_reply(&self, xid: u32) -> Option<rpc_msg> {
        let msg = match self {
            RpcError::IgnoreRequest => return None,
            RpcError::Denied(Denial::RpcMismatch { low, high }) => rpc_vers_mismatch(xid, *low, *high),
            RpcError::Denied(Denial::Auth(stat)) => auth_error_reply_message(xid, *stat),
            RpcError::Accepted(AcceptedError::ProgramUnavailable) => prog_unavail_reply_message(xid),
            RpcError::Accepted(AcceptedError::ProgramMismatch { low, high }) => {
                prog_mismatch_reply_message(xid, *low, *high)
            }
            RpcError::Accepted(AcceptedError::ProcedureUnavailable) => proc_unavail_reply_message(xid),
            RpcError::Accepted(AcceptedError::GarbageArguments) => garbage_args_reply_message(xid),
        };
        Some(msg)
    }

    /// Encodes the complete reply, or `None` when nothing should be sent.
    pub fn render(&self, xid: u32) -> std::io::Result<Option<Vec<u8>>> {
        let Some(msg) = self.to_reply(xid) else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        msg.serialize(&mut buf)?;
        Ok(Some(buf))
    }

    /// Maps a reply that is not an accepted success to the fault it reports.
    pub fn from_reply(reply: &reply_body) -> Option<RpcError> {
        let err = match reply {
            reply_body::MSG_ACCEPTED(accepted) => match &accepted.reply_data {
                accept_body::SUCCESS => return None,
                accept_body::PROG_UNAVAIL => RpcError::program_unavailable(),
                accept_body::PROG_MISMATCH(info) => RpcError::program_mismatch(info.low, info.high),
                accept_body::PROC_UNAVAIL => RpcError::procedure_unavailable(),
                accept_body::GARBAGE_ARGS => RpcError::garbage_arguments(),
            },
            reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info)) => {
                RpcError::Denied(Denial::RpcMismatch { low: info.low, high: info.high })
            }
            reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => RpcError::auth(*stat),
        };
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rpc::envelope::rpc_body;
    use crate::protocol::xdr::deserialize;

    #[test]
    fn ignore_renders_nothing() {
        assert_eq!(RpcError::IgnoreRequest.render(1).unwrap(), None);
    }

    #[test]
    fn every_fault_maps_back_from_its_reply() {
        let faults = [
            RpcError::rpc_mismatch(),
            RpcError::auth(auth_stat::AUTH_REJECTEDVERF),
            RpcError::program_unavailable(),
            RpcError::program_mismatch(2, 3),
            RpcError::procedure_unavailable(),
            RpcError::garbage_arguments(),
        ];
        for fault in faults {
            let bytes = fault.render(11).unwrap().unwrap();
            let msg = deserialize::<rpc_msg>(&mut &bytes[..]).unwrap();
            assert_eq!(msg.xid, 11);
            let rpc_body::REPLY(reply) = msg.body else {
                panic!("expected a reply for {fault:?}");
            };
            assert_eq!(RpcError::from_reply(&reply), Some(fault));
        }
    }
}
