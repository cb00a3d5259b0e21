//! Portmapper service and client (RFC 1833, version 2).
//!
//! [`PortmapServer`] keeps an in-memory table of (program, version,
//! protocol) to port mappings and serves it as an ordinary RPC program.
//! [`PortmapClient`] talks to any portmapper over UDP, and
//! [`register_programs`] announces a server's programs at startup.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::protocol::rpc::{
    BindError, CallContext, ClientError, Program, Protocol, Registry, RpcClient, RpcError,
    UdpTransport, IPPROTO_UDP,
};
use crate::protocol::schema::portmap::{self, mapping, pmaplist_from_value, pmaplist_value};
use crate::protocol::xdr::utils::invalid_data;
use crate::protocol::xdr::{take_bytes, take_u32, Value, XdrCodec};

/// How long CALLIT waits for the relayed call before dropping the request.
const CALLIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The portmapper on this host.
pub fn local_portmap_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), portmap::PMAP_PORT)
}

/// Key of a port mapping entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortmapKey {
    pub prog: u32,
    pub vers: u32,
    pub prot: u32,
}

/// Program-to-port mappings.
#[derive(Debug, Default)]
pub struct PortmapTable {
    table: HashMap<PortmapKey, u32>,
}

impl PortmapTable {
    /// Adds a mapping; false if the key already has a port.
    pub fn set(&mut self, map: &mapping) -> bool {
        let key = PortmapKey { prog: map.prog, vers: map.vers, prot: map.prot };
        if self.table.contains_key(&key) {
            return false;
        }
        self.table.insert(key, map.port);
        true
    }

    /// Removes every protocol of (prog, vers); false if nothing was mapped.
    pub fn unset(&mut self, prog: u32, vers: u32) -> bool {
        let before = self.table.len();
        self.table.retain(|key, _| key.prog != prog || key.vers != vers);
        self.table.len() != before
    }

    /// The mapped port, or 0.
    pub fn get_port(&self, prog: u32, vers: u32, prot: u32) -> u32 {
        self.table.get(&PortmapKey { prog, vers, prot }).copied().unwrap_or(0)
    }

    /// Every mapping, ordered by key.
    pub fn dump(&self) -> Vec<mapping> {
        let mut entries: Vec<mapping> = self
            .table
            .iter()
            .map(|(key, port)| mapping { prog: key.prog, vers: key.vers, prot: key.prot, port: *port })
            .collect();
        entries.sort_by_key(|m| (m.prog, m.vers, m.prot));
        entries
    }
}

/// The portmapper program with its handlers bound to a shared table.
#[derive(Clone, Debug, Default)]
pub struct PortmapServer {
    table: Arc<RwLock<PortmapTable>>,
}

fn garbage(e: io::Error) -> RpcError {
    debug!("bad portmap arguments: {}", e);
    RpcError::garbage_arguments()
}

impl PortmapServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &Arc<RwLock<PortmapTable>> {
        &self.table
    }

    /// A bound copy of the portmapper program, ready to register.
    pub fn program(&self) -> Result<Program, BindError> {
        let mut program = portmap::program();

        let table = self.table.clone();
        program.on_call(portmap::VERSION, "SET", move |args: Value, _: CallContext| {
            let table = table.clone();
            async move {
                let map = mapping::from_value(args).map_err(garbage)?;
                let added = table.write().unwrap_or_else(PoisonError::into_inner).set(&map);
                debug!("SET {:?} -> {}", map, added);
                Ok(Value::Bool(added))
            }
        })?;

        let table = self.table.clone();
        program.on_call(portmap::VERSION, "UNSET", move |args: Value, _: CallContext| {
            let table = table.clone();
            async move {
                let map = mapping::from_value(args).map_err(garbage)?;
                let removed = table.write().unwrap_or_else(PoisonError::into_inner).unset(map.prog, map.vers);
                debug!("UNSET {}/{} -> {}", map.prog, map.vers, removed);
                Ok(Value::Bool(removed))
            }
        })?;

        let table = self.table.clone();
        program.on_call(portmap::VERSION, "GETPORT", move |args: Value, _: CallContext| {
            let table = table.clone();
            async move {
                let map = mapping::from_value(args).map_err(garbage)?;
                let port = table.read().unwrap_or_else(PoisonError::into_inner).get_port(map.prog, map.vers, map.prot);
                Ok(Value::UInt(port))
            }
        })?;

        let table = self.table.clone();
        program.on_call(portmap::VERSION, "DUMP", move |_: Value, _: CallContext| {
            let table = table.clone();
            async move {
                let entries = table.read().unwrap_or_else(PoisonError::into_inner).dump();
                Ok(pmaplist_value(&entries))
            }
        })?;

        let table = self.table.clone();
        program.on_call(portmap::VERSION, "CALLIT", move |args: Value, context: CallContext| {
            let table = table.clone();
            async move { callit(&table, args, context).await }
        })?;

        Ok(program)
    }
}

/// Relays a call to a program registered over UDP on this host.
///
/// Unknown targets and failed relays are not answered at all.
async fn callit(table: &RwLock<PortmapTable>, args: Value, context: CallContext) -> Result<Value, RpcError> {
    let mut fields = args.into_fields().ok_or_else(RpcError::garbage_arguments)?;
    let prog = take_u32(&mut fields, "prog").map_err(garbage)?;
    let vers = take_u32(&mut fields, "vers").map_err(garbage)?;
    let proc = take_u32(&mut fields, "proc").map_err(garbage)?;
    let call_args = take_bytes(&mut fields, "args").map_err(garbage)?;

    let port = table.read().unwrap_or_else(PoisonError::into_inner).get_port(prog, vers, IPPROTO_UDP);
    let Ok(port16) = u16::try_from(port) else {
        return Err(RpcError::IgnoreRequest);
    };
    if port16 == 0 {
        debug!("CALLIT for unregistered program {}/{}", prog, vers);
        return Err(RpcError::IgnoreRequest);
    }

    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port16);
    let transport = UdpTransport::connect(target).await.map_err(|e| {
        debug!("CALLIT relay to {} failed: {}", target, e);
        RpcError::IgnoreRequest
    })?;
    let client = RpcClient::new(transport, Program::new("CALLIT", prog), vers)
        .with_timeout(CALLIT_TIMEOUT)
        .with_credential(context.cred);
    match client.call_raw(prog, vers, proc, &call_args).await {
        Ok(res) => Ok(Value::structure([("port", Value::UInt(port)), ("res", Value::Bytes(res))])),
        Err(e) => {
            debug!("CALLIT relay to {} failed: {}", target, e);
            Err(RpcError::IgnoreRequest)
        }
    }
}

/// Talks to a portmapper over UDP.
#[derive(Debug)]
pub struct PortmapClient {
    client: RpcClient<UdpTransport>,
}

fn unexpected(what: &str, value: &Value) -> ClientError {
    ClientError::Decode(invalid_data(format!("{what} result is {}", value.kind())))
}

impl PortmapClient {
    pub async fn connect(portmap_addr: SocketAddr) -> io::Result<Self> {
        let transport = UdpTransport::connect(portmap_addr).await?;
        Ok(Self { client: RpcClient::new(transport, portmap::program(), portmap::VERSION) })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    pub async fn set(&self, map: mapping) -> Result<bool, ClientError> {
        let result = self.client.call("SET", map.to_value()).await?;
        result.as_bool().ok_or_else(|| unexpected("SET", &result))
    }

    /// Removes every protocol of (prog, vers).
    pub async fn unset(&self, prog: u32, vers: u32) -> Result<bool, ClientError> {
        // prot and port are ignored by UNSET but still travel on the wire.
        let map = mapping { prog, vers, prot: IPPROTO_UDP, port: 0 };
        let result = self.client.call("UNSET", map.to_value()).await?;
        result.as_bool().ok_or_else(|| unexpected("UNSET", &result))
    }

    /// The port serving (prog, vers) over `protocol`, 0 if none.
    pub async fn get_port(&self, prog: u32, vers: u32, protocol: Protocol) -> Result<u32, ClientError> {
        let map = mapping { prog, vers, prot: protocol.ipproto(), port: 0 };
        let result = self.client.call("GETPORT", map.to_value()).await?;
        result.as_u32().ok_or_else(|| unexpected("GETPORT", &result))
    }

    pub async fn dump(&self) -> Result<Vec<mapping>, ClientError> {
        let result = self.client.call("DUMP", Value::Void).await?;
        pmaplist_from_value(result).map_err(ClientError::Decode)
    }

    /// Calls a UDP program through the portmapper; returns its port and the
    /// raw result.
    pub async fn callit(&self, prog: u32, vers: u32, proc: u32, args: &[u8]) -> Result<(u32, Vec<u8>), ClientError> {
        let call_args = Value::structure([
            ("prog", Value::UInt(prog)),
            ("vers", Value::UInt(vers)),
            ("proc", Value::UInt(proc)),
            ("args", Value::Bytes(args.to_vec())),
        ]);
        let result = self.client.call("CALLIT", call_args).await?;
        let mut fields = result.into_fields().ok_or_else(|| ClientError::Decode(invalid_data("CALLIT result is not a struct")))?;
        let port = take_u32(&mut fields, "port").map_err(ClientError::Decode)?;
        let res = take_bytes(&mut fields, "res").map_err(ClientError::Decode)?;
        Ok((port, res))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("portmapper unreachable: {0}")]
    Client(#[from] ClientError),
    #[error("unable to add port mapping for program {prog} version {vers}")]
    Refused { prog: u32, vers: u32 },
}

/// Mappings announced by [`register_programs`].
#[derive(Debug)]
pub struct Registration {
    portmap: PortmapClient,
    mappings: Vec<mapping>,
}

impl Registration {
    pub fn mappings(&self) -> &[mapping] {
        &self.mappings
    }

    /// Removes the announced mappings again.
    pub async fn unregister(self) -> Result<(), ClientError> {
        let mut keys: Vec<(u32, u32)> = self.mappings.iter().map(|m| (m.prog, m.vers)).collect();
        keys.dedup();
        for (prog, vers) in keys {
            self.portmap.unset(prog, vers).await?;
        }
        info!("Unregistered {} port mappings", self.mappings.len());
        Ok(())
    }
}

/// Announces every (program, version) of `registry` as served on `port`
/// over `protocol`.
///
/// When the portmapper refuses one mapping, the mappings already made by
/// this call are withdrawn before the refusal is returned.
pub async fn register_programs(
    portmap_addr: SocketAddr,
    registry: &Registry,
    protocol: Protocol,
    port: u16,
) -> Result<Registration, RegistrationError> {
    let portmap = PortmapClient::connect(portmap_addr).await.map_err(ClientError::Io)?;
    let mut mappings = Vec::new();
    let mut programs: Vec<_> = registry.programs().collect();
    programs.sort_by_key(|p| p.number());
    for program in programs {
        for version in program.versions() {
            let map = mapping {
                prog: program.number(),
                vers: version.number(),
                prot: protocol.ipproto(),
                port: u32::from(port),
            };
            if !portmap.set(map).await? {
                let partial = Registration { portmap, mappings };
                if let Err(e) = partial.unregister().await {
                    warn!("Failed to withdraw mappings after refusal: {}", e);
                }
                return Err(RegistrationError::Refused { prog: map.prog, vers: map.vers });
            }
            info!("Registered {} version {} on {} port {}", program.name(), version.number(), protocol, port);
            mappings.push(map);
        }
    }
    Ok(Registration { portmap, mappings })
}

/// Asks the portmapper at `portmap_addr` where `program` version `version`
/// listens over UDP, and connects a client to it.
pub async fn connect_udp_via_portmap(
    portmap_addr: SocketAddr,
    program: impl Into<Arc<Program>>,
    version: u32,
) -> Result<RpcClient<UdpTransport>, ClientError> {
    let program = program.into();
    let port = PortmapClient::connect(portmap_addr).await?.get_port(program.number(), version, Protocol::Udp).await?;
    let port = match u16::try_from(port) {
        Ok(0) | Err(_) => return Err(ClientError::Rpc(RpcError::program_unavailable())),
        Ok(port) => port,
    };
    let transport = UdpTransport::connect(SocketAddr::new(portmap_addr.ip(), port)).await?;
    Ok(RpcClient::new(transport, program, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rpc::IPPROTO_TCP;

    fn map(prog: u32, vers: u32, prot: u32, port: u32) -> mapping {
        mapping { prog, vers, prot, port }
    }

    #[test]
    fn set_refuses_taken_keys() {
        let mut table = PortmapTable::default();
        assert!(table.set(&map(100003, 2, IPPROTO_UDP, 2049)));
        assert!(!table.set(&map(100003, 2, IPPROTO_UDP, 2050)));
        assert!(table.set(&map(100003, 2, IPPROTO_TCP, 2049)));
        assert_eq!(table.get_port(100003, 2, IPPROTO_UDP), 2049);
    }

    #[test]
    fn unset_drops_every_protocol() {
        let mut table = PortmapTable::default();
        table.set(&map(100005, 1, IPPROTO_UDP, 700));
        table.set(&map(100005, 1, IPPROTO_TCP, 701));
        table.set(&map(100005, 3, IPPROTO_TCP, 702));
        assert!(table.unset(100005, 1));
        assert!(!table.unset(100005, 1));
        assert_eq!(table.dump(), vec![map(100005, 3, IPPROTO_TCP, 702)]);
    }
}
