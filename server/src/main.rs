use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use echo_common::{ServerCertPath, DEFAULT_LISTEN_ADDR};
use echo_server::EchoServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "echo-server")]
#[command(about = "TLS-secured gRPC echo server")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Address to listen on
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// PEM certificate chain [default: $ECHO_CERTS_DIR/backend.cert]
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM private key [default: $ECHO_CERTS_DIR/backend.key]
    #[arg(long)]
    key: Option<PathBuf>,

    /// Do not register the gRPC reflection service
    #[arg(long)]
    no_reflection: bool,
}

impl Args {
    fn cert_path(&self) -> ServerCertPath {
        let defaults = ServerCertPath::new();
        ServerCertPath::from_files(
            self.cert.clone().unwrap_or(defaults.cert_path),
            self.key.clone().unwrap_or(defaults.key_path),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("Starting echo server...");
    let server = EchoServer::new(args.cert_path(), args.listen.clone())
        .context("Failed to load server certificate")?
        .with_reflection(!args.no_reflection);

    let listen_addr = server.listen_addr().to_string();
    let bound = server
        .bind()
        .await
        .with_context(|| format!("Failed to listen on {listen_addr}"))?;
    bound.run().await.context("Server error")?;
    Ok(())
}
