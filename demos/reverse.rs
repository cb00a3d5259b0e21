use std::time::Duration;

use sunrpc::portmap::{connect_udp_via_portmap, local_portmap_addr, register_programs};
use sunrpc::protocol::rpc::{CallContext, Protocol, Registry, RpcError};
use sunrpc::protocol::schema::minimal;
use sunrpc::protocol::xdr::Value;
use sunrpc::server::RpcServer;
use sunrpc::udp::RpcUdpServer;

/// Serves the minimal REVERSE program on a free UDP port, announces it to
/// the local portmapper and calls it once through the portmapper's answer.
/// Runs until interrupted.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let text = std::env::args().nth(1).unwrap_or_else(|| String::from("Hello, world"));

    let program = minimal::program().with_handler(minimal::VERSION, "REVERSE", |args: Value, _: CallContext| async move {
        let text = args.as_str().ok_or_else(RpcError::garbage_arguments)?;
        Ok(Value::String(text.chars().rev().collect()))
    })?;
    let server = RpcUdpServer::bind("0.0.0.0:0", Registry::new([program])).await?;

    let registration =
        register_programs(local_portmap_addr(), server.registry(), Protocol::Udp, server.get_listen_port()).await?;

    let serve = server.handle_forever();
    tokio::pin!(serve);

    let client = connect_udp_via_portmap(local_portmap_addr(), minimal::program(), minimal::VERSION)
        .await?
        .with_timeout(Duration::from_secs(5));
    tokio::select! {
        res = &mut serve => res?,
        reply = client.call("REVERSE", Value::from(text)) => println!("{:?}", reply?),
    }

    tokio::select! {
        res = &mut serve => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    registration.unregister().await?;
    Ok(())
}
