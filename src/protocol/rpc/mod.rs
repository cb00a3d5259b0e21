//! RPC (Remote Procedure Call) protocol implementation as specified in RFC 5531 (previously RFC 1057).
//!
//! The RPC protocol enables programs to call procedures on remote systems as if
//! they were local calls. This module implements RPC version 2 on top of the
//! descriptor based XDR codec:
//!
//! 1. The call/reply envelope ([`rpc_msg`] and friends)
//! 2. Protocol faults and how they render into replies ([`RpcError`])
//! 3. Program/version/procedure catalogs with late bound handlers ([`Program`], [`Registry`])
//! 4. Server side dispatch shared by the transports ([`handle_request`])
//! 5. The client call path ([`RpcClient`])
//! 6. Record marking for stream transports ([`RecordReader`], [`write_fragment`])
//!
//! Authentication beyond decoding AUTH_UNIX credentials ([`auth_unix`]) is left
//! to handlers.

mod auth;
mod client;
mod context;
mod dispatch;
mod envelope;
mod fault;
mod program;
mod wire;

pub use auth::{auth_unix, AUTH_UNIX};
pub use client::{next_xid, ClientError, RpcClient, TcpTransport, Transport, UdpTransport};
pub use context::{CallContext, Protocol, IPPROTO_TCP, IPPROTO_UDP};
pub use dispatch::{decode_envelope, handle_request, peek_xid, Envelope};
pub use envelope::*;
pub use fault::{AcceptedError, Denial, RpcError};
pub use program::{BindError, Handler, Procedure, Program, Registry, Version, NULL_PROCEDURE};
pub use wire::{read_fragment, read_record, write_fragment, RecordReader, MAX_RPC_RECORD_LENGTH};

/// Largest datagram the UDP transports read.
pub const UDP_RECV_MTU: usize = 65536;
