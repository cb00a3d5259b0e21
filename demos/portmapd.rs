use std::sync::Arc;

use sunrpc::portmap::PortmapServer;
use sunrpc::protocol::rpc::Registry;
use sunrpc::server::RpcServer;
use sunrpc::tcp::RpcTcpListener;
use sunrpc::udp::RpcUdpServer;

/// A standalone portmapper
///
/// Serves the portmap program on UDP and TCP. The bind address defaults to
/// 0.0.0.0:111, which needs privileges on most systems.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut bind = String::from("0.0.0.0:111");
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                eprintln!(
                    "Usage: portmapd [IP:PORT]\n\
                     \n\
                     Serves PORTMAP version 2 on UDP and TCP (default 0.0.0.0:111)"
                );
                return Ok(());
            }
            _ if arg.starts_with('-') => {
                eprintln!("Unknown flag: {arg}");
                eprintln!("Run with --help for usage.");
                std::process::exit(2);
            }
            _ => bind = arg,
        }
    }

    let server = PortmapServer::new();
    let registry = Arc::new(Registry::new([server.program()?]));
    let udp = RpcUdpServer::bind(&bind, registry.clone()).await?;
    let tcp = RpcTcpListener::bind(&bind, registry).await?;

    tokio::select! {
        res = udp.handle_forever() => res?,
        res = tcp.handle_forever() => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}
