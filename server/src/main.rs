use chatty_server::network::Server;
use chatty_shared::{MAX_CLIENTS, SERVER_PORT};
use clap::Parser;
use log::error;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Maximum number of concurrently connected clients
    #[arg(short, long, default_value_t = MAX_CLIENTS)]
    max_clients: usize,
}

/// Parses arguments, binds the listener and serves until a fatal error.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let address: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| {
            error!("Invalid bind address {}:{}: {}", args.host, args.port, e);
            e
        })?;

    let mut server = Server::bind(address, args.max_clients).await.map_err(|e| {
        error!("Failed to start server on {}: {}", address, e);
        e
    })?;

    if let Err(e) = server.run().await {
        error!("Server stopped: {}", e);
        return Err(e.into());
    }

    Ok(())
}
