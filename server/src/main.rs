use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use server::{
    HttpProvisioner, MatchProvisioner, Server, ServerConfig, StaticProvisioner,
    DEFAULT_MATCH_DURATION,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// UDP port to listen on
    #[clap(short, long, default_value = "41234")]
    port: u16,

    /// Maximum players per match
    #[clap(short, long, default_value = "2")]
    max_players: u8,

    /// Run as a non-host proxy, forwarding datagrams verbatim to this host
    #[clap(long)]
    proxy_host: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Note: set RUST_LOG=info to see server logs");
    }

    let args = Args::parse();

    let provisioner: Arc<dyn MatchProvisioner> = match std::env::var("MVSI_SERVER") {
        Ok(base_url) => {
            info!("provisioning via {}", base_url);
            Arc::new(HttpProvisioner::new(base_url))
        }
        Err(_) => {
            warn!("MVSI_SERVER not set; provisioning matches with local defaults");
            Arc::new(StaticProvisioner::new(args.max_players, DEFAULT_MATCH_DURATION))
        }
    };

    let config = ServerConfig {
        port: args.port,
        max_players: args.max_players,
        proxy_host: args.proxy_host,
        ..ServerConfig::default()
    };

    let server = match Server::bind(config, provisioner).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind UDP socket: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("server stopped with error: {}", e);
        std::process::exit(1);
    }
}
