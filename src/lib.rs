//! SunRPC - ONC RPC version 2 and XDR for Rust
//!
//! This library implements the Remote Procedure Call protocol used by NFS and
//! its companion services, together with the External Data Representation it
//! encodes everything in. Programs are described declaratively, served over
//! UDP and TCP, and called with a matching client.
//!
//! ## Main Components
//!
//! - `protocol::xdr`: descriptor based XDR codec. Schemas are graphs of [`xdr::Type`]
//!   values that encode and decode dynamic [`xdr::Value`]s.
//!
//! - `protocol::rpc`: the call/reply envelope, protocol faults, the
//!   program/version/procedure registry, request dispatch and the client.
//!
//! - `protocol::schema`: ready made schemas for PORTMAP, MOUNT, NFS version 2
//!   and a minimal demo program.
//!
//! - `udp` and `tcp`: transport servers; `portmap`: the portmapper service,
//!   its client and startup registration helpers.
//!
//! ## Standards Compliance
//!
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2 (obsoletes RFC 1831)
//! - RFC 4506: XDR: External Data Representation Standard (obsoletes RFC 1832)
//! - RFC 1833: Binding Protocols for ONC RPC Version 2
//! - RFC 1094: NFS: Network File System Protocol Specification
//!
//! ## Usage
//!
//! Take a schema, bind handlers with `Program::on_call`, freeze the programs
//! into a `Registry` and serve it with [`udp::RpcUdpServer`] or
//! [`tcp::RpcTcpListener`].

pub mod portmap;
pub mod protocol;
pub mod server;
pub mod tcp;
pub mod udp;

pub use protocol::{rpc, schema, xdr};
pub use server::RpcServer;
