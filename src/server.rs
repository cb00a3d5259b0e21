//! What every transport server offers, whatever the socket type.

use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

/// Interface for RPC servers bound to a socket and serving a
/// [`Registry`](crate::protocol::rpc::Registry).
#[async_trait]
pub trait RpcServer: Send + Sync {
    /// Returns the actual port number on which the server is listening
    ///
    /// This is especially useful when binding to port 0, which allows the OS
    /// to assign any available port.
    fn get_listen_port(&self) -> u16;

    /// Returns the IP address on which the server is listening
    fn get_listen_ip(&self) -> IpAddr;

    /// Serves requests until the socket fails.
    async fn handle_forever(&self) -> io::Result<()>;
}

/// Parses an "IP:PORT" bind address, e.g. "0.0.0.0:111" or "[::1]:0".
pub(crate) fn parse_bind_address(ipstr: &str) -> io::Result<SocketAddr> {
    let (ip, port) = ipstr.rsplit_once(':').ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "IP Address must be of form ip:port")
    })?;
    let port = port
        .parse::<u16>()
        .map_err(|_| io::Error::new(io::ErrorKind::AddrNotAvailable, "Port not in range 0..=65535"))?;
    let ip = ip
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map_err(|_| io::Error::new(io::ErrorKind::AddrNotAvailable, format!("Invalid IP address {ip}")))?;
    Ok(SocketAddr::new(ip, port))
}
