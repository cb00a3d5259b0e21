//! Per-call context handed to procedure handlers.
//!
//! The envelope leaves credentials opaque, so a handler that authenticates
//! its caller decodes [`CallContext::cred`] itself (see
//! [`super::auth_unix::from_credential`]).

use std::fmt;
use std::net::SocketAddr;

use super::envelope::opaque_auth;

/// IP protocol number of TCP, as registered with the portmapper.
pub const IPPROTO_TCP: u32 = 6;
/// IP protocol number of UDP, as registered with the portmapper.
pub const IPPROTO_UDP: u32 = 17;

/// Transport a call arrived on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    /// The portmapper's `prot` value for this transport.
    pub fn ipproto(self) -> u32 {
        match self {
            Protocol::Udp => IPPROTO_UDP,
            Protocol::Tcp => IPPROTO_TCP,
        }
    }

    pub fn from_ipproto(prot: u32) -> Option<Self> {
        match prot {
            IPPROTO_UDP => Some(Protocol::Udp),
            IPPROTO_TCP => Some(Protocol::Tcp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Udp => f.write_str("udp"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Everything about a call except its arguments.
///
/// Transports build one per request; the registry fills in the envelope
/// fields before the handler runs.
#[derive(Clone)]
pub struct CallContext {
    /// Transaction id of the call
    pub xid: u32,

    /// Caller's credential, opaque at the envelope level
    pub cred: opaque_auth,

    /// Caller's verifier
    pub verf: opaque_auth,

    /// Client's network address (IP:port)
    pub client_addr: SocketAddr,

    /// Port number on which the server is listening
    pub local_port: u16,

    /// Transport the call arrived on
    pub protocol: Protocol,
}

impl CallContext {
    pub fn new(client_addr: SocketAddr, local_port: u16, protocol: Protocol) -> Self {
        Self {
            xid: 0,
            cred: opaque_auth::default(),
            verf: opaque_auth::default(),
            client_addr,
            local_port,
            protocol,
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::CallContext")
            .field("xid", &self.xid)
            .field("client_addr", &self.client_addr)
            .field("local_port", &self.local_port)
            .field("protocol", &self.protocol)
            .field("cred_flavor", &self.cred.flavor)
            .finish()
    }
}
