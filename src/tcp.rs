//! RPC over TCP.
//!
//! One task accepts connections and spawns a task per connection. Within a
//! connection, requests are served strictly one after another: read a whole
//! record, dispatch it, write the reply record, repeat until the peer closes
//! or a read fails.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};
use tracing_attributes::instrument;

use crate::protocol::rpc::{self, CallContext, Protocol, Registry};
use crate::server::{parse_bind_address, RpcServer};

/// Accepts RPC clients over TCP and serves them from a registry.
pub struct RpcTcpListener {
    /// TCP Listener for accepting incoming connections
    listener: TcpListener,
    /// Address the listener is bound to
    local_addr: SocketAddr,
    /// Programs served on this listener
    registry: Arc<Registry>,
}

/// Serves one established connection until it closes.
#[instrument(skip(socket, registry))]
async fn process_socket(
    mut socket: TcpStream,
    client_addr: SocketAddr,
    local_port: u16,
    registry: Arc<Registry>,
) -> Result<(), anyhow::Error> {
    let _ = socket.set_nodelay(true);
    loop {
        let request = match rpc::read_record(&mut socket).await {
            Ok(request) => request,
            Err(e) => {
                debug!("Message loop broken due to {:?}", e);
                return Ok(());
            }
        };
        let context = CallContext::new(client_addr, local_port, Protocol::Tcp);
        if let Some(reply) = rpc::handle_request(&registry, &request, context).await {
            if let Err(e) = rpc::write_fragment(&mut socket, &reply).await {
                error!("Write error {:?}", e);
                return Err(e);
            }
        }
    }
}

impl RpcTcpListener {
    /// Creates a listener bound to `ipstr` ("IP:PORT"; port 0 picks a free one).
    pub async fn bind(ipstr: &str, registry: impl Into<Arc<Registry>>) -> io::Result<RpcTcpListener> {
        let addr = parse_bind_address(ipstr)?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening on tcp {}", local_addr);
        Ok(RpcTcpListener { listener, local_addr, registry: registry.into() })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

#[async_trait]
impl RpcServer for RpcTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    /// Accepts connections and spawns a task for each. Only returns if there
    /// is an error with the underlying TCP listener.
    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let (socket, client_addr) = self.listener.accept().await?;
            info!("Accepting connection from {}", client_addr);
            let registry = self.registry.clone();
            let local_port = self.local_addr.port();
            tokio::spawn(async move {
                let _ = process_socket(socket, client_addr, local_port, registry).await;
            });
        }
    }
}
