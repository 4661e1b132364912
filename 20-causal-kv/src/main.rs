use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use causal_kv::{
    cli::{Cli, Command, ServerArgs},
    client,
    runtime::spawn_node,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let topology = args.topology.topology()?;
    let listen = topology.addr(args.index)?.to_string();
    let config = args.node_config(topology.datacenters().clone())?;

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let server = Server::new(listener, spawn_node(config));
    let addr = server.local_addr()?;
    info!("datacenter {} listening on {}", args.index, addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("datacenter exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
