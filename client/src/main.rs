use chatty_client::input::{self, InputReader};
use chatty_client::network::{Client, Handshake};
use chatty_shared::SERVER_PORT;
use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address (IP or IP:port); asked for interactively when omitted
    #[arg(short, long)]
    server: Option<String>,

    /// Port used when the server address has none
    #[arg(short, long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Display name; asked for interactively when omitted
    #[arg(short, long)]
    name: Option<String>,

    /// How long to wait for the server to refuse the connection
    #[arg(long, default_value = "250")]
    handshake_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut input = InputReader::stdin();

    let address = match args.server {
        Some(server) => parse_address(&server, args.port)?,
        None => {
            let answer = input
                .prompt("Enter server IP address: ")
                .await?
                .unwrap_or_default();
            parse_address(&answer, args.port)?
        }
    };

    info!("Connecting to {}", address);
    let mut client = Client::connect(address).await.map_err(|e| {
        error!("Failed to connect to {}: {}", address, e);
        e
    })?;

    if let Handshake::Rejected(status) = client
        .handshake(Duration::from_millis(args.handshake_ms))
        .await?
    {
        println!("Server: {}", status);
        std::process::exit(1);
    }

    let name = match args.name.as_deref().and_then(input::sanitize_name) {
        Some(name) => name,
        None => loop {
            match input.prompt("Enter your name: ").await? {
                Some(answer) => {
                    if let Some(name) = input::sanitize_name(&answer) {
                        break name;
                    }
                }
                None => return Ok(()),
            }
        },
    };

    println!("Welcome, {}! Type a message and press Enter to send it.", name);
    client.run(&name, input).await?;

    Ok(())
}

fn parse_address(input: &str, default_port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    input::parse_server_addr(input, default_port).map_err(|e| {
        error!("Invalid server address '{}': {}", input.trim(), e);
        e.into()
    })
}
