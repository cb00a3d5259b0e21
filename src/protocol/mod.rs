//! Protocol module implements ONC RPC version 2 and the encoding it is built on.
//!
//! - `xdr`: External Data Representation (XDR) codec according to RFC 4506.
//!
//! - `rpc`: Remote Procedure Call (RPC) protocol: envelope, faults, program
//!   registry, dispatch and client, as defined in RFC 5531.
//!
//! - `schema`: declarative schemas of the PORTMAP, MOUNT and NFS version 2
//!   programs.

pub mod rpc;
pub mod schema;
pub mod xdr;
