//! Loris chat server
//!
//! Development entry point: boots the QUIC chat backend over an in-memory
//! store, seeds two demo accounts and logs their bearer tokens so clients
//! can connect immediately.
//!
//! Usage:
//!   cargo run -- server                    # Run the chat server
//!   cargo run -- server --port 4433        # Run on specific port

use std::env;
use std::sync::Arc;
use std::time::Duration;

use loris::auth::TokenVerifier;
use loris::server::{ChatServer, ServerConfig};
use loris::store::{MemoryStore, User};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            let port = parse_port(&args);
            run_server(port).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Loris - QUIC backend for one-to-one chat");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 10000)");
    println!();
    println!("PROTOCOL:");
    println!("    One bidirectional control stream per connection carries the");
    println!("    authenticate handshake, commands and reliable server events.");
    println!("    Typing indicators and presence announcements ride QUIC");
    println!("    datagrams and are lossy by design.");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4433 // default port
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    10000 // default
}

async fn run_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let max_connections = parse_max_connections(&args);

    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", port).parse()?,
        max_connections,
        idle_timeout: Duration::from_secs(300),
        enable_datagrams: true,
        store_timeout: Duration::from_secs(5),
    };

    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - Datagrams enabled: {}", config.enable_datagrams);

    let store = Arc::new(MemoryStore::new());
    let verifier = Arc::new(TokenVerifier::new());

    // Seed demo accounts so a fresh server is immediately usable
    for name in ["alice", "bob"] {
        let user = User::new(name);
        let token = verifier.issue(user.id.clone()).await;
        info!("Demo user {} ({}) token: {}", name, user.id, token);
        store.insert_user(user).await;
    }

    let mut server = ChatServer::new(config, store, verifier);

    if let Err(e) = server.start().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
