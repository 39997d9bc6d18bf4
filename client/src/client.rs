use std::{io, sync::Arc, time::Duration};

use echo_common::{
    error::{EchoError, Result},
    proto::{EchoMessage, EchoServiceClient},
    tls, ClientCertPath, CALL_DEADLINE, DEFAULT_SERVER_ADDR,
};
use hyper_util::rt::TokioIo;
use rustls::{pki_types::ServerName, ClientConfig as RustlsClientConfig};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::{
    transport::{Channel, Endpoint, Uri},
    Code, Request,
};
use tower::service_fn;

/// Configuration for the echo client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Trusted root certificates
    pub cert_path:   ClientCertPath,
    /// `host:port` to dial
    pub server_addr: String,
    /// Name the server certificate must match; defaults to the dialed host
    pub domain_name: Option<String>,
    /// Deadline for a single invocation
    pub timeout:     Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cert_path:   ClientCertPath::new(),
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            domain_name: None,
            timeout:     CALL_DEADLINE,
        }
    }
}

impl ClientConfig {
    /// Creates a client configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the trusted root certificate path
    pub fn with_cert_path(mut self, cert_path: ClientCertPath) -> Self {
        self.cert_path = cert_path;
        self
    }

    /// Set the server address
    pub fn with_server_addr<S: Into<String>>(mut self, server_addr: S) -> Self {
        self.server_addr = server_addr.into();
        self
    }

    /// Validate the server certificate against this name instead of the
    /// dialed host
    pub fn with_domain_name<S: Into<String>>(mut self, domain_name: S) -> Self {
        self.domain_name = Some(domain_name.into());
        self
    }

    /// Set the call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Splits `host:port` (or `[v6]:port`) and returns the host.
fn host_of(server_addr: &str) -> Result<&str> {
    let invalid = || EchoError::InvalidAddress(format!("{server_addr:?} is not host:port"));

    let (host, port) = server_addr.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(host)
}

/// A gRPC echo client over a server-authenticated TLS connection
pub struct EchoClient {
    tls_config:  Arc<RustlsClientConfig>,
    server_addr: String,
    server_name: ServerName<'static>,
    channel:     Option<Channel>,
    calls_made:  u32,
    timeout:     Duration,
}

impl EchoClient {
    /// Loads the trust store and validates the address.
    ///
    /// Fails if the root certificate file is unreadable or holds no valid
    /// certificate. No connection is made yet.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let tls_config = tls::client_config(&config.cert_path)?;

        let domain_name = match config.domain_name {
            Some(name) => name,
            None => host_of(&config.server_addr)?.to_string(),
        };
        let server_name = ServerName::try_from(domain_name.clone())
            .map_err(|e| EchoError::InvalidAddress(format!("{domain_name:?}: {e}")))?;

        tracing::debug!("Client created for {} (expecting {domain_name})", config.server_addr);

        Ok(Self {
            tls_config: Arc::new(tls_config),
            server_addr: config.server_addr,
            server_name,
            channel: None,
            calls_made: 0,
            timeout: config.timeout,
        })
    }

    /// Connects and completes the TLS handshake.
    ///
    /// The server's chain is validated against the trust store and its
    /// certificate must match the expected server name. A handshake that
    /// does not finish within the deadline fails with
    /// [`EchoError::DeadlineExceeded`].
    pub async fn connect(&mut self) -> Result<()> {
        tracing::info!("Connecting to echo server: {}", self.server_addr);

        // TLS is applied by the connector, the URI only carries the authority
        let endpoint = Endpoint::from_shared(format!("http://{}", self.server_addr))
            .map_err(|e| EchoError::InvalidAddress(format!("{}: {e}", self.server_addr)))?;

        let connector = TlsConnector::from(Arc::clone(&self.tls_config));
        let server_name = self.server_name.clone();
        let addr = self.server_addr.clone();

        let connecting = endpoint.connect_with_connector(service_fn(move |_: Uri| {
            let connector = connector.clone();
            let server_name = server_name.clone();
            let addr = addr.clone();
            async move {
                let tcp = TcpStream::connect(addr.as_str()).await?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok::<_, io::Error>(TokioIo::new(tls))
            }
        }));

        let channel = tokio::time::timeout(self.timeout, connecting)
            .await
            .map_err(|_| EchoError::DeadlineExceeded(self.timeout))?
            .map_err(|source| {
                EchoError::Connect {
                    addr: self.server_addr.clone(),
                    source,
                }
            })?;

        self.channel = Some(channel);
        tracing::info!("✓ Secure connection established");
        Ok(())
    }

    /// Sends `text` and returns the server's reply.
    ///
    /// Bounded by the configured deadline; never retried.
    pub async fn echo(&mut self, text: impl Into<String>) -> Result<String> {
        let deadline = self.timeout;
        let channel = self.channel.clone().ok_or(EchoError::NotConnected)?;
        let mut client = EchoServiceClient::new(channel);

        self.calls_made = self.calls_made.saturating_add(1);
        let mut request = Request::new(EchoMessage::new(text));
        request.set_timeout(deadline);

        let response = match tokio::time::timeout(deadline, client.echo(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(status)) if status.code() == Code::DeadlineExceeded => {
                return Err(EchoError::DeadlineExceeded(deadline));
            }
            Ok(Err(status)) => return Err(EchoError::Call(status)),
            Err(_) => return Err(EchoError::DeadlineExceeded(deadline)),
        };

        let reply = response.into_inner().text;
        tracing::debug!("Call {} returned {} byte(s)", self.calls_made, reply.len());
        Ok(reply)
    }

    /// Drops the connection. Safe to call when not connected.
    ///
    /// The connection closes once every clone handed out by
    /// [`EchoClient::channel`] is dropped as well.
    pub fn disconnect(&mut self) {
        if self.channel.take().is_some() {
            tracing::debug!("Disconnected from {}", self.server_addr);
        }
    }

    /// Check if client is connected to the server
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// The established gRPC channel, for calling other services (such as
    /// reflection) over the same TLS connection
    pub fn channel(&self) -> Option<Channel> {
        self.channel.clone()
    }

    /// Get connection and usage statistics
    pub fn get_stats(&self) -> ClientStats {
        ClientStats {
            connected:   self.is_connected(),
            server_addr: self.server_addr.clone(),
            calls_made:  self.calls_made,
            timeout:     self.timeout,
        }
    }
}

/// Statistics about the client connection
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub connected:   bool,
    pub server_addr: String,
    pub calls_made:  u32,
    pub timeout:     Duration,
}

impl Drop for EchoClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl EchoClient {
    /// Connect, echo once, disconnect.
    ///
    /// The deadline starts when this is called and covers both the
    /// handshake and the call. The connection is released on every path.
    pub async fn echo_once(config: ClientConfig, text: impl Into<String>) -> Result<String> {
        let deadline = config.timeout;
        let text = text.into();
        let mut client = Self::new(config)?;

        let result = tokio::time::timeout(deadline, async {
            client.connect().await?;
            client.echo(text).await
        })
        .await
        .unwrap_or(Err(EchoError::DeadlineExceeded(deadline)));

        client.disconnect();
        result
    }
}
