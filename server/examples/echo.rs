use std::path::PathBuf;

use anyhow::{Context, Result};
use echo_common::ServerCertPath;
use echo_server::EchoServer;
use tracing::info;

/// Echo server on a local port using the test certificates, for trying the
/// service out with the client example or grpcurl.
///
/// Uses `$ECHO_CERTS_DIR` when set, otherwise `certs/testdata`.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Echo Server Example ===");
    println!("This server returns every message unchanged");

    let cert_path = match std::env::var_os("ECHO_CERTS_DIR") {
        Some(_) => ServerCertPath::new(),
        None => {
            let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../certs/testdata");
            ServerCertPath::from_files(dir.join("backend.cert"), dir.join("backend.key"))
        }
    };

    println!("Certificate paths:");
    println!("  - Server cert: {:?}", cert_path.cert_path);
    println!("  - Server key: {:?}", cert_path.key_path);

    let bound = EchoServer::new(cert_path, "127.0.0.1:50051")
        .context("Failed to create echo server")?
        .bind()
        .await
        .context("Failed to bind echo server")?;
    let addr = bound.local_addr();

    println!("✓ Echo server listening on {addr}");
    println!("You can test it with:");
    println!("  cargo run -p echo-client --example basic -- {addr} certs/testdata/frontend.cert");
    println!(
        "  grpcurl -cacert certs/testdata/frontend.cert -authority localhost \
         -d '{{\"text\":\"hi\"}}' {addr} echo.EchoService/Echo"
    );
    println!("Press Ctrl+C to stop the server");

    info!("Starting echo server...");
    bound.run().await.context("Echo server error")?;

    println!("✓ Echo server shutdown completed");
    Ok(())
}
