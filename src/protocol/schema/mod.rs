//! Declarative schemas of the programs commonly served over SunRPC.
//!
//! Each submodule exposes its wire types as shared descriptors and a
//! `program()` builder returning a fresh, handler-less [`Program`](crate::protocol::rpc::Program)
//! that a server binds and registers.

pub mod minimal;
pub mod mount;
pub mod nfs2;
pub mod portmap;
