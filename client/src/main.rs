use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use echo_client::{ClientCertPath, ClientConfig, EchoClient};
use echo_common::{DEFAULT_ECHO_TEXT, DEFAULT_SERVER_ADDR};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "echo-client")]
#[command(about = "Sends one message to a TLS-secured gRPC echo server")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Server address as host:port
    #[arg(long, default_value = DEFAULT_SERVER_ADDR)]
    addr: String,

    /// PEM bundle of trusted roots [default: $ECHO_CERTS_DIR/frontend.cert]
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Name the server certificate must carry, if not the dialed host
    #[arg(long)]
    domain_name: Option<String>,

    /// Text to echo
    #[arg(long, default_value = DEFAULT_ECHO_TEXT)]
    text: String,

    /// Deadline for the whole invocation, in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let cert_path = self
            .ca_cert
            .clone()
            .map(|path| ClientCertPath::from_file(path))
            .unwrap_or_default();

        let config = ClientConfig::new()
            .with_cert_path(cert_path)
            .with_server_addr(self.addr.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs));

        match &self.domain_name {
            Some(name) => config.with_domain_name(name.clone()),
            None => config,
        }
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

    info!("Starting echo client...");
    let reply = EchoClient::echo_once(args.client_config(), args.text.clone())
        .await
        .context("Echo failed")?;

    info!("got res: {reply:?}");
    println!("{reply}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let args = Args::parse_from(["echo-client"]);
        let config = args.client_config();
        assert_eq!(config.server_addr, "frontend.local:4443");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.cert_path.ca_path.ends_with("frontend.cert"));
        assert_eq!(args.text, "hello world");
    }

    #[test]
    fn overrides_reach_the_config() {
        let args = Args::parse_from([
            "echo-client",
            "--addr",
            "127.0.0.1:50051",
            "--ca-cert",
            "/srv/tls/roots.pem",
            "--domain-name",
            "localhost",
            "--timeout-secs",
            "5",
        ]);
        let config = args.client_config();
        assert_eq!(config.server_addr, "127.0.0.1:50051");
        assert_eq!(config.cert_path.ca_path, PathBuf::from("/srv/tls/roots.pem"));
        assert_eq!(config.domain_name.as_deref(), Some("localhost"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
