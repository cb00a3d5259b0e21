//! Client call path.
//!
//! A call allocates the next transaction id, sends the envelope followed by
//! the encoded argument, then reads responses until one is a REPLY carrying
//! the same id. Anything else (stale replies, foreign traffic, garbage) is
//! discarded, so several calls may share one socket over time.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::envelope::{call_body, opaque_auth, rpc_body, rpc_msg, RPC_VERSION};
use super::fault::RpcError;
use super::program::Program;
use super::wire::{write_fragment, RecordReader};
use super::UDP_RECV_MTU;
use crate::protocol::xdr::{deserialize, Value, XdrCodec};

/// Process-wide transaction id counter, shared by every client.
static NEXT_XID: AtomicU32 = AtomicU32::new(1);

/// Allocates a fresh transaction id.
pub fn next_xid() -> u32 {
    NEXT_XID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("server answered with a fault: {0}")]
    Rpc(#[from] RpcError),
    #[error("failed to encode arguments: {0}")]
    Encode(#[source] io::Error),
    #[error("failed to decode result: {0}")]
    Decode(#[source] io::Error),
    #[error("program {program} has no version {version}")]
    UnknownVersion { program: u32, version: u32 },
    #[error("no procedure {0} in this program version")]
    UnknownProcedure(String),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Moves whole messages to and from a server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &[u8]) -> io::Result<()>;

    /// Waits for the next whole message.
    async fn receive(&self) -> io::Result<Vec<u8>>;
}

/// Datagram transport over a connected UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn connect(server: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, message: &[u8]) -> io::Result<()> {
        self.socket.send(message).await?;
        Ok(())
    }

    async fn receive(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; UDP_RECV_MTU];
        let n = self.socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Stream transport with record marking.
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<RecordReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    pub async fn connect(server: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(server).await?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Self { reader: Mutex::new(RecordReader::new(reader)), writer: Mutex::new(writer) })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, message: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        write_fragment(&mut *writer, message).await.map_err(io::Error::other)
    }

    async fn receive(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        reader.next_record().await.map_err(io::Error::other)
    }
}

/// Calls procedures of one program version on one server.
///
/// Calls through a shared client are serialized, so no call can swallow the
/// reply another one is waiting for.
#[derive(Debug)]
pub struct RpcClient<T: Transport> {
    transport: T,
    program: Arc<Program>,
    version: u32,
    cred: opaque_auth,
    verf: opaque_auth,
    timeout: Option<Duration>,
    in_flight: Mutex<()>,
}

impl<T: Transport> RpcClient<T> {
    /// Creates a client speaking `version` of `program`, using null
    /// credentials and waiting for replies without a deadline.
    pub fn new(transport: T, program: impl Into<Arc<Program>>, version: u32) -> Self {
        Self {
            transport,
            program: program.into(),
            version,
            cred: opaque_auth::default(),
            verf: opaque_auth::default(),
            timeout: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Gives up on a call when no matching reply arrives within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends `cred` (e.g. AUTH_UNIX) instead of null credentials.
    pub fn with_credential(mut self, cred: opaque_auth) -> Self {
        self.cred = cred;
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Calls the procedure named `name`. Procedures without arguments take
    /// [`Value::Void`].
    pub async fn call(&self, name: &str, arg: Value) -> Result<Value, ClientError> {
        let number = self
            .version()?
            .lookup(name)
            .ok_or_else(|| ClientError::UnknownProcedure(name.to_string()))?
            .number();
        self.call_procedure(number, arg).await
    }

    /// Calls a procedure by number.
    pub async fn call_procedure(&self, procedure: u32, arg: Value) -> Result<Value, ClientError> {
        let proc = self
            .version()?
            .get(procedure)
            .ok_or_else(|| ClientError::UnknownProcedure(procedure.to_string()))?;
        let args = proc.args().to_bytes(&arg).map_err(ClientError::Encode)?;
        let result = self.call_raw(self.program.number(), self.version, procedure, &args).await?;
        proc.result().from_bytes(&result).map_err(ClientError::Decode)
    }

    /// Calls any procedure with pre-encoded arguments and returns the raw
    /// result bytes.
    pub async fn call_raw(&self, prog: u32, vers: u32, proc: u32, args: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.call_with_xid(next_xid(), prog, vers, proc, args).await
    }

    /// Like [`RpcClient::call_raw`], with a caller chosen transaction id.
    pub async fn call_with_xid(
        &self,
        xid: u32,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let call = rpc_msg {
            xid,
            body: rpc_body::CALL(call_body {
                rpcvers: RPC_VERSION,
                prog,
                vers,
                proc,
                cred: self.cred.clone(),
                verf: self.verf.clone(),
            }),
        };
        let mut request = Vec::new();
        call.serialize(&mut request).map_err(ClientError::Encode)?;
        request.extend_from_slice(args);

        let _guard = self.in_flight.lock().await;
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(xid, &request))
                .await
                .map_err(|_| ClientError::Timeout(timeout))?,
            None => self.exchange(xid, &request).await,
        }
    }

    fn version(&self) -> Result<&super::program::Version, ClientError> {
        self.program.get(self.version).ok_or(ClientError::UnknownVersion {
            program: self.program.number(),
            version: self.version,
        })
    }

    async fn exchange(&self, xid: u32, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.transport.send(request).await?;
        loop {
            let data = self.transport.receive().await?;
            let mut rest = &data[..];
            let msg = match deserialize::<rpc_msg>(&mut rest) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("discarding malformed response while waiting for xid {}: {}", xid, e);
                    continue;
                }
            };
            if msg.xid != xid {
                trace!("discarding response for xid {} while waiting for xid {}", msg.xid, xid);
                continue;
            }
            let rpc_body::REPLY(reply) = msg.body else {
                trace!("discarding call message with xid {}", xid);
                continue;
            };
            if let Some(fault) = RpcError::from_reply(&reply) {
                return Err(ClientError::Rpc(fault));
            }
            return Ok(rest.to_vec());
        }
    }
}
