//! RPC over UDP.
//!
//! A single loop reads datagrams and spawns an independent task for each, so
//! a slow handler never stalls intake. Replies go back to the datagram's
//! source address; sends on the shared socket are serialized.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{error, info, trace};

use crate::protocol::rpc::{self, CallContext, Protocol, Registry, UDP_RECV_MTU};
use crate::server::{parse_bind_address, RpcServer};

/// Serves RPC requests arriving as UDP datagrams.
pub struct RpcUdpServer {
    socket: Arc<UdpSocket>,
    /// Held while sending a reply
    send_lock: Arc<Mutex<()>>,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
}

impl RpcUdpServer {
    /// Creates a server bound to `ipstr` ("IP:PORT"; port 0 picks a free one).
    pub async fn bind(ipstr: &str, registry: impl Into<Arc<Registry>>) -> io::Result<RpcUdpServer> {
        let addr = parse_bind_address(ipstr)?;
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("Listening on udp {}", local_addr);
        Ok(RpcUdpServer {
            socket: Arc::new(socket),
            send_lock: Arc::new(Mutex::new(())),
            local_addr,
            registry: registry.into(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

async fn process_datagram(
    request: Vec<u8>,
    client_addr: SocketAddr,
    local_port: u16,
    registry: Arc<Registry>,
    socket: Arc<UdpSocket>,
    send_lock: Arc<Mutex<()>>,
) {
    let context = CallContext::new(client_addr, local_port, Protocol::Udp);
    let Some(reply) = rpc::handle_request(&registry, &request, context).await else {
        return;
    };
    let _guard = send_lock.lock().await;
    if let Err(e) = socket.send_to(&reply, client_addr).await {
        error!("Failed to send reply to {}: {:?}", client_addr, e);
    }
}

#[async_trait]
impl RpcServer for RpcUdpServer {
    fn get_listen_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    async fn handle_forever(&self) -> io::Result<()> {
        let mut buf = vec![0u8; UDP_RECV_MTU];
        loop {
            let (n, client_addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                // ICMP errors for earlier replies surface here on some platforms
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset
                    || e.kind() == io::ErrorKind::ConnectionRefused =>
                {
                    trace!("Ignoring {:?} on udp socket", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            trace!("Received {} byte datagram from {}", n, client_addr);
            tokio::spawn(process_datagram(
                buf[..n].to_vec(),
                client_addr,
                self.local_addr.port(),
                self.registry.clone(),
                self.socket.clone(),
                self.send_lock.clone(),
            ));
        }
    }
}
