use std::net::SocketAddr;
use std::time::Duration;

use sunrpc::portmap::{connect_udp_via_portmap, register_programs, PortmapClient, PortmapServer, RegistrationError};
use sunrpc::protocol::rpc::{CallContext, ClientError, Protocol, Registry, RpcError, IPPROTO_TCP, IPPROTO_UDP};
use sunrpc::protocol::schema::portmap::mapping;
use sunrpc::protocol::schema::{minimal, nfs2};
use sunrpc::server::RpcServer;
use sunrpc::udp::RpcUdpServer;
use sunrpc::xdr::{Type, Value};

/// Starts a portmapper on a free UDP port and returns its address.
async fn start_portmapper() -> SocketAddr {
    let registry = Registry::new([PortmapServer::new().program().unwrap()]);
    let server = RpcUdpServer::bind("127.0.0.1:0", registry).await.unwrap();
    let addr = SocketAddr::new(server.get_listen_ip(), server.get_listen_port());
    tokio::spawn(async move { server.handle_forever().await });
    addr
}

async fn start_reverse_server() -> RpcUdpServer {
    let program = minimal::program()
        .with_handler(minimal::VERSION, "REVERSE", |args: Value, _: CallContext| async move {
            let text = args.as_str().ok_or_else(RpcError::garbage_arguments)?;
            Ok(Value::String(text.chars().rev().collect()))
        })
        .unwrap();
    RpcUdpServer::bind("127.0.0.1:0", Registry::new([program])).await.unwrap()
}

async fn portmap_client(addr: SocketAddr) -> PortmapClient {
    PortmapClient::connect(addr).await.unwrap().with_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn set_getport_unset() {
    let portmap = portmap_client(start_portmapper().await).await;

    let nfs_udp = mapping { prog: nfs2::PROGRAM, vers: 2, prot: IPPROTO_UDP, port: 2049 };
    assert!(portmap.set(nfs_udp).await.unwrap());
    assert!(!portmap.set(mapping { port: 3049, ..nfs_udp }).await.unwrap());
    assert!(portmap.set(mapping { prot: IPPROTO_TCP, ..nfs_udp }).await.unwrap());

    assert_eq!(portmap.get_port(nfs2::PROGRAM, 2, Protocol::Udp).await.unwrap(), 2049);
    assert_eq!(portmap.get_port(nfs2::PROGRAM, 3, Protocol::Udp).await.unwrap(), 0);

    assert!(portmap.unset(nfs2::PROGRAM, 2).await.unwrap());
    assert!(!portmap.unset(nfs2::PROGRAM, 2).await.unwrap());
    assert_eq!(portmap.get_port(nfs2::PROGRAM, 2, Protocol::Udp).await.unwrap(), 0);
    assert_eq!(portmap.get_port(nfs2::PROGRAM, 2, Protocol::Tcp).await.unwrap(), 0);
}

#[tokio::test]
async fn dump_lists_every_mapping() {
    let portmap = portmap_client(start_portmapper().await).await;
    assert!(portmap.dump().await.unwrap().is_empty());

    let mount = mapping { prog: 100005, vers: 1, prot: IPPROTO_UDP, port: 635 };
    let nfs = mapping { prog: nfs2::PROGRAM, vers: 2, prot: IPPROTO_TCP, port: 2049 };
    assert!(portmap.set(mount).await.unwrap());
    assert!(portmap.set(nfs).await.unwrap());

    assert_eq!(portmap.dump().await.unwrap(), vec![nfs, mount]);
}

#[tokio::test]
async fn registration_roundtrip() {
    let portmap_addr = start_portmapper().await;
    let server = start_reverse_server().await;
    let port = server.get_listen_port();

    let registration = register_programs(portmap_addr, server.registry(), Protocol::Udp, port).await.unwrap();
    assert_eq!(
        registration.mappings(),
        [mapping { prog: minimal::PROGRAM, vers: minimal::VERSION, prot: IPPROTO_UDP, port: u32::from(port) }]
    );

    // A second registration of the same key is refused.
    let err = register_programs(portmap_addr, server.registry(), Protocol::Udp, port).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Refused { prog: minimal::PROGRAM, vers: minimal::VERSION }));

    tokio::spawn(async move { server.handle_forever().await });
    let client = connect_udp_via_portmap(portmap_addr, minimal::program(), minimal::VERSION).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(1), client.call("REVERSE", Value::from("portmap")))
        .await
        .expect("REVERSE timed out")
        .unwrap();
    assert_eq!(reply, Value::from("pamtrop"));

    registration.unregister().await.unwrap();
    let portmap = portmap_client(portmap_addr).await;
    assert_eq!(portmap.get_port(minimal::PROGRAM, minimal::VERSION, Protocol::Udp).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_program_is_unavailable() {
    let portmap_addr = start_portmapper().await;
    let err = connect_udp_via_portmap(portmap_addr, minimal::program(), minimal::VERSION).await.err().unwrap();
    assert!(matches!(err, ClientError::Rpc(e) if e == RpcError::program_unavailable()));
}

#[tokio::test]
async fn callit_relays_to_the_registered_port() {
    let portmap_addr = start_portmapper().await;
    let server = start_reverse_server().await;
    let port = server.get_listen_port();
    tokio::spawn(async move { server.handle_forever().await });

    let portmap = portmap_client(portmap_addr).await;
    let map = mapping { prog: minimal::PROGRAM, vers: minimal::VERSION, prot: IPPROTO_UDP, port: u32::from(port) };
    assert!(portmap.set(map).await.unwrap());

    let args = Type::string().to_bytes(&Value::from("relay")).unwrap();
    let (relay_port, res) = portmap.callit(minimal::PROGRAM, minimal::VERSION, minimal::REVERSE, &args).await.unwrap();
    assert_eq!(relay_port, u32::from(port));
    assert_eq!(Type::string().from_bytes(&res).unwrap(), Value::from("yaler"));
}

#[tokio::test]
async fn callit_for_unknown_program_is_dropped() {
    let portmap = PortmapClient::connect(start_portmapper().await)
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(200));
    let err = portmap.callit(minimal::PROGRAM, minimal::VERSION, minimal::REVERSE, &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
}

#[tokio::test]
async fn refused_registration_withdraws_earlier_mappings() {
    let portmap_addr = start_portmapper().await;
    let portmap = portmap_client(portmap_addr).await;
    let taken = mapping { prog: minimal::PROGRAM, vers: minimal::VERSION, prot: IPPROTO_UDP, port: 4000 };
    assert!(portmap.set(taken).await.unwrap());

    // NFS sorts first and is announced before MINIMAL_PROG is refused.
    let registry = Registry::new([nfs2::program(), minimal::program()]);
    let err = register_programs(portmap_addr, &registry, Protocol::Udp, 5000).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Refused { prog: minimal::PROGRAM, vers: minimal::VERSION }));

    assert_eq!(portmap.get_port(nfs2::PROGRAM, nfs2::VERSION, Protocol::Udp).await.unwrap(), 0);
    assert_eq!(portmap.get_port(minimal::PROGRAM, minimal::VERSION, Protocol::Udp).await.unwrap(), 4000);
}
