use std::time::Duration;

use anyhow::Result;
use echo_client::{ClientCertPath, ClientConfig, EchoClient};

/// Talks to a running echo server.
///
/// Usage: `cargo run --example basic -- <host:port> <roots.pem> [domain]`
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:50051".to_string());
    let roots = args.next().unwrap_or_else(|| "frontend.cert".to_string());
    let domain = args.next().unwrap_or_else(|| "localhost".to_string());

    println!("=== Echo Client Basic Example ===");

    // Example 1: one connection, several calls
    println!("\n1. Reusing a connection:");
    let config = ClientConfig::new()
        .with_cert_path(ClientCertPath::from_file(&roots))
        .with_server_addr(&addr)
        .with_domain_name(&domain)
        .with_timeout(Duration::from_secs(5));

    let mut client = EchoClient::new(config.clone())?;
    client.connect().await?;
    for text in ["hello world", "", "héllo wörld 🦀"] {
        let reply = client.echo(text).await?;
        println!("  sent {text:?}, got {reply:?}");
    }

    let stats = client.get_stats();
    println!("Client connected: {}", stats.connected);
    println!("Calls made: {}", stats.calls_made);
    println!("Timeout: {:?}", stats.timeout);
    client.disconnect();

    // Example 2: one-shot call
    println!("\n2. One-shot call:");
    let reply = EchoClient::echo_once(config, "hello world").await?;
    println!("  got {reply:?}");

    println!("\n✓ All examples completed successfully!");
    Ok(())
}
